//! Customer records: the reference business collaborator whose mutations
//! are audited.

pub mod service;
