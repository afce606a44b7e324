//! QR rendering
//!
//! The QR payload is the bare voucher id, encoded with the highest error
//! correction level so a partly damaged print still scans.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use image::{ImageFormat, Luma};
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

/// Default PNG edge length in pixels
pub const DEFAULT_PNG_SIZE: u32 = 300;

/// Largest PNG edge length served
pub const MAX_PNG_SIZE: u32 = 2048;

fn encode(id: &str) -> Result<QrCode> {
    QrCode::with_error_correction_level(id.as_bytes(), EcLevel::H)
        .with_context(|| format!("Failed to encode QR code for {}", id))
}

/// Render the voucher id as an SVG document
pub fn render_svg(id: &str) -> Result<String> {
    let code = encode(id)?;
    Ok(code
        .render::<svg::Color<'_>>()
        .min_dimensions(DEFAULT_PNG_SIZE, DEFAULT_PNG_SIZE)
        .quiet_zone(true)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

/// Render the voucher id as a PNG at least `size` pixels square
pub fn render_png(id: &str, size: u32) -> Result<Vec<u8>> {
    let size = size.clamp(1, MAX_PNG_SIZE);
    let image = encode(id)?
        .render::<Luma<u8>>()
        .min_dimensions(size, size)
        .quiet_zone(true)
        .build();

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(bytes)
}

/// Attachment name for a downloaded voucher image
pub fn download_file_name(id: &str, date: NaiveDate) -> String {
    let short: String = id.chars().take(8).collect();
    format!("nalu-discount-{}-{}.png", short, date.format("%Y-%m-%d"))
}
