pub mod audit_records;
pub mod customers;
pub mod unit_of_work;

pub use audit_records::PgAuditStore;
pub use unit_of_work::UnitOfWork;
