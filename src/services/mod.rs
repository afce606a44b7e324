//! Services layer - Business logic
//!
//! Services are responsible for:
//! - Implementing business rules
//! - Owning the live voucher view and its change notifications
//! - Handling validation and error cases

pub mod export;
pub mod password;
pub mod qr;
pub mod session;
pub mod voucher;

pub use export::{export_file_name, parse_csv, to_csv, ExportRow};
pub use password::{hash_password, verify_password};
pub use session::{IssuedSession, SessionError, SessionGate, StaffCredential};
pub use voucher::{VoucherService, VoucherServiceError};
