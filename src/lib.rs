pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit;
pub mod export;
pub mod filter;
pub mod ingest;
pub mod logs;
pub mod resolve;
pub mod store;
pub mod ui;

pub use crate::core::{ComplianceCheck, StatusReport, StoredReport};
pub use crate::engine::{Engine, FleetSummary};
pub use crate::error::{IngestError, StoreError, ValidationError};
pub use crate::export::{ExportMode, ExportTable};
pub use crate::filter::StatusFilter;
pub use crate::resolve::{ResolvedSet, SortOrder};
pub use crate::store::{JsonlStore, MemoryStore, ReportStore};
