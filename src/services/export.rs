//! CSV export of the voucher list

use crate::models::Voucher;
use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};

const HEADER: [&str; 6] = ["id", "name", "contact", "created_at", "status", "used_at"];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One parsed export row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub id: String,
    pub name: String,
    pub contact: String,
    pub created_at: String,
    pub is_used: bool,
    pub used_at: Option<String>,
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn push_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    let line: Vec<String> = fields.into_iter().map(escape_field).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

/// Render vouchers as CSV, one row per voucher in the given order
pub fn to_csv(vouchers: &[Voucher]) -> String {
    let mut out = String::new();
    push_record(&mut out, HEADER);

    for voucher in vouchers {
        let created_at = format_timestamp(voucher.created_at);
        let used_at = voucher.used_at.map(format_timestamp).unwrap_or_default();
        push_record(
            &mut out,
            [
                voucher.id.as_str(),
                voucher.name.as_str(),
                voucher.contact.as_str(),
                created_at.as_str(),
                voucher.status_label(),
                used_at.as_str(),
            ],
        );
    }

    out
}

/// Split CSV text into records of raw fields
fn split_records(text: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        bail!("Unterminated quoted field");
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}

/// Read back a document produced by `to_csv`
pub fn parse_csv(text: &str) -> Result<Vec<ExportRow>> {
    let mut records = split_records(text)?.into_iter();

    match records.next() {
        Some(header) if header == HEADER => {}
        Some(header) => bail!("Unexpected CSV header: {}", header.join(",")),
        None => return Ok(Vec::new()),
    }

    records
        .enumerate()
        .filter(|(_, record)| !(record.len() == 1 && record[0].is_empty()))
        .map(|(index, record)| {
            let line = index + 2;
            let [id, name, contact, created_at, status, used_at]: [String; 6] =
                record.try_into().map_err(|r: Vec<String>| {
                    anyhow::anyhow!("Line {}: expected 6 fields, found {}", line, r.len())
                })?;

            let is_used = match status.as_str() {
                "Used" => true,
                "Not Used" => false,
                other => bail!("Line {}: unknown status '{}'", line, other),
            };

            Ok(ExportRow {
                id,
                name,
                contact,
                created_at,
                is_used,
                used_at: (!used_at.is_empty()).then_some(used_at),
            })
        })
        .collect()
}

/// Attachment name for an export taken on `date`
pub fn export_file_name(date: NaiveDate) -> String {
    format!("nalu-vouchers-{}.csv", date.format("%Y-%m-%d"))
}
