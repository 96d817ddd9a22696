pub mod audit_record;
pub mod customer;

pub use audit_record::{AuditRecord, NewAuditRecord, OperationType, ReportStatus};
pub use customer::{Customer, CustomerInput};
