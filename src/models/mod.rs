//! Data models
//!
//! - `Voucher` and the projections built from it (filters, statistics,
//!   validation outcomes, change events)
//! - `Session` for the staff console

mod session;
mod voucher;

pub use session::Session;
pub use voucher::{
    CreateVoucherInput, DailyCount, RejectionReason, StatusFilter, ValidationOutcome, Voucher,
    VoucherEvent, VoucherFilter, VoucherStatistics, DAILY_SERIES_DAYS,
};
