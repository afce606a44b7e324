//! Print an Argon2id hash for `auth.password_hash`
//!
//! Usage: `hash-password <password>`, or pipe the password on stdin.

use anyhow::{Context, Result};
use std::io::BufRead;

fn main() -> Result<()> {
    let password = match std::env::args().nth(1) {
        Some(password) => password,
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };

    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }

    println!("{}", nalu::services::hash_password(&password)?);
    Ok(())
}
