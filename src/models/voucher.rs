//! Voucher model
//!
//! A voucher is a single-use discount identified by a random UUID, which is
//! also the payload of its QR code. It moves from unused to used exactly once.

use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Single-use discount voucher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// Lowercase hyphenated UUID v4
    pub id: String,
    pub name: String,
    pub contact: String,
    pub created_at: DateTime<Utc>,
    pub is_used: bool,
    /// Set exactly when `is_used` becomes true
    pub used_at: Option<DateTime<Utc>>,
}

impl Voucher {
    /// Create a fresh, unused voucher. Inputs are expected to be validated.
    pub fn new(name: impl Into<String>, contact: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            contact: contact.into(),
            created_at: Utc::now().trunc_subsecs(6),
            is_used: false,
            used_at: None,
        }
    }

    /// Human-readable status as shown in exports
    pub fn status_label(&self) -> &'static str {
        if self.is_used {
            "Used"
        } else {
            "Not Used"
        }
    }

    /// Case-insensitive substring match against id, name and contact
    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        self.id.to_lowercase().contains(&term)
            || self.name.to_lowercase().contains(&term)
            || self.contact.to_lowercase().contains(&term)
    }
}

/// Input for issuing a voucher from the client form
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVoucherInput {
    pub name: String,
    pub contact: String,
}

impl CreateVoucherInput {
    pub fn new(name: impl Into<String>, contact: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contact: contact.into(),
        }
    }
}

/// Used/unused filter for the staff list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Used,
    Unused,
}

impl StatusFilter {
    pub fn matches(self, voucher: &Voucher) -> bool {
        match self {
            Self::All => true,
            Self::Used => voucher.is_used,
            Self::Unused => !voucher.is_used,
        }
    }
}

impl std::fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Used => write!(f, "used"),
            Self::Unused => write!(f, "unused"),
        }
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "used" => Ok(Self::Used),
            "unused" => Ok(Self::Unused),
            _ => Err(anyhow::anyhow!("Invalid status filter: {}", s)),
        }
    }
}

/// Client-side projection over the voucher list. Never touches the store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoucherFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub status: StatusFilter,
}

impl VoucherFilter {
    pub fn new(search: Option<String>, status: StatusFilter) -> Self {
        Self { search, status }
    }

    pub fn matches(&self, voucher: &Voucher) -> bool {
        let search_ok = self
            .search
            .as_deref()
            .map_or(true, |term| voucher.matches_search(term));
        search_ok && self.status.matches(voucher)
    }

    /// Keep the matching vouchers, preserving input order
    pub fn apply(&self, vouchers: &[Voucher]) -> Vec<Voucher> {
        vouchers.iter().filter(|v| self.matches(v)).cloned().collect()
    }
}

/// Number of days in the generation series
pub const DAILY_SERIES_DAYS: usize = 7;

/// Vouchers issued on one UTC calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: usize,
}

/// Usage counters and chart series shown on the statistics page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherStatistics {
    pub total: usize,
    pub used: usize,
    pub unused: usize,
    pub last_week_generated: usize,
    pub last_week_used: usize,
    /// Redeemed share of all vouchers in whole percent, 0 when there are none
    pub usage_rate: usize,
    /// Issued per day for the last seven days, oldest first, ending today
    pub daily_generated: Vec<DailyCount>,
    /// Redemptions by UTC hour of day, over all time
    pub hourly_used: [usize; 24],
}

impl VoucherStatistics {
    /// Aggregate over `vouchers` with the trailing week ending at `now`
    pub fn compute(vouchers: &[Voucher], now: DateTime<Utc>) -> Self {
        let week_ago = now - Duration::days(7);

        let total = vouchers.len();
        let used = vouchers.iter().filter(|v| v.is_used).count();
        let last_week_generated = vouchers.iter().filter(|v| v.created_at >= week_ago).count();
        let last_week_used = vouchers
            .iter()
            .filter(|v| v.is_used && v.used_at.is_some_and(|at| at >= week_ago))
            .count();

        let mut hourly_used = [0usize; 24];
        for at in vouchers.iter().filter(|v| v.is_used).filter_map(|v| v.used_at) {
            hourly_used[at.hour() as usize] += 1;
        }

        Self {
            total,
            used,
            unused: total - used,
            last_week_generated,
            last_week_used,
            usage_rate: usage_rate(used, total),
            daily_generated: daily_generated(vouchers, now.date_naive()),
            hourly_used,
        }
    }
}

/// `used / total` as a percentage rounded half up
fn usage_rate(used: usize, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    (200 * used + total) / (2 * total)
}

fn daily_generated(vouchers: &[Voucher], today: NaiveDate) -> Vec<DailyCount> {
    (0..DAILY_SERIES_DAYS)
        .rev()
        .filter_map(|days_back| today.checked_sub_days(chrono::Days::new(days_back as u64)))
        .map(|date| DailyCount {
            date,
            count: vouchers
                .iter()
                .filter(|v| v.created_at.date_naive() == date)
                .count(),
        })
        .collect()
}

/// Why a redemption was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    #[serde(rename = "not found")]
    NotFound,
    #[serde(rename = "already used")]
    AlreadyUsed,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::AlreadyUsed => write!(f, "already used"),
        }
    }
}

/// Result of a redemption attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: Option<RejectionReason>,
    /// The voucher as it stands after the attempt, if it exists
    pub voucher: Option<Voucher>,
}

impl ValidationOutcome {
    pub fn accepted(voucher: Voucher) -> Self {
        Self {
            valid: true,
            reason: None,
            voucher: Some(voucher),
        }
    }

    pub fn not_found() -> Self {
        Self {
            valid: false,
            reason: Some(RejectionReason::NotFound),
            voucher: None,
        }
    }

    pub fn already_used(voucher: Voucher) -> Self {
        Self {
            valid: false,
            reason: Some(RejectionReason::AlreadyUsed),
            voucher: Some(voucher),
        }
    }
}

/// Change notification published by the voucher store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "voucher", rename_all = "lowercase")]
pub enum VoucherEvent {
    Created(Voucher),
    Redeemed(Voucher),
}

impl VoucherEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Redeemed(_) => "redeemed",
        }
    }

    pub fn voucher(&self) -> &Voucher {
        match self {
            Self::Created(v) | Self::Redeemed(v) => v,
        }
    }
}
