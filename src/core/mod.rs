mod check;
mod report;

pub use check::ComplianceCheck;
pub use report::{StatusReport, StoredReport};
