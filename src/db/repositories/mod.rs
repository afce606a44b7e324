//! Database repositories
//!
//! One repository per table. Each exposes a trait used by the services and a
//! SQLx implementation that dispatches to SQLite or MySQL.

pub mod session;
pub mod voucher;

pub use session::{SessionRepository, SqlxSessionRepository};
pub use voucher::{SqlxVoucherRepository, VoucherRepository};
