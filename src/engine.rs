use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;

use crate::core::{ComplianceCheck, StoredReport};
use crate::error::{IngestError, StoreError};
use crate::export::{ExportMode, ExportTable};
use crate::filter::StatusFilter;
use crate::ingest::BatchOutcome;
use crate::resolve::{SortOrder, resolve_reports, sort_records};
use crate::store::ReportStore;

/// Boundary operations over an injected report store.
///
/// Cheap to clone; every clone shares the same store. Queries take one
/// snapshot and compute on it without holding any lock.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn ReportStore>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsSummary {
    pub machines: usize,
    pub with_issues: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetSummary {
    pub filter: StatusFilter,
    pub stored_reports: usize,
    pub machines: usize,
    pub compliant: usize,
    pub with_issues: usize,
    pub by_os: BTreeMap<String, OsSummary>,
    pub failing_checks: BTreeMap<ComplianceCheck, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_report_at: Option<String>,
}

impl Engine {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn ReportStore {
        self.store.as_ref()
    }

    pub fn submit_report(&self, value: &Value) -> Result<u64, IngestError> {
        crate::ingest::submit_report(self.store.as_ref(), value)
    }

    pub fn submit_batch(&self, values: &[Value]) -> Result<BatchOutcome, IngestError> {
        crate::ingest::submit_batch(self.store.as_ref(), values)
    }

    /// Current record per machine that passes `filter`. An empty filter
    /// lists the whole fleet.
    pub fn list_current_status(
        &self,
        filter: &StatusFilter,
        order: SortOrder,
    ) -> Result<Vec<StoredReport>, StoreError> {
        let resolved = crate::resolve::resolve(self.store.as_ref())?;
        Ok(filter.apply(resolved.into_records(order)))
    }

    pub fn export_table(&self, records: &[StoredReport], mode: ExportMode) -> ExportTable {
        crate::export::export_table(records, mode)
    }

    /// Every stored report passing `filter`, newest first, superseded ones
    /// included.
    pub fn export_history(
        &self,
        filter: &StatusFilter,
        mode: ExportMode,
    ) -> Result<ExportTable, StoreError> {
        let mut records = filter.apply(self.store.snapshot()?);
        sort_records(&mut records, SortOrder::NewestFirst);
        Ok(crate::export::export_table(&records, mode))
    }

    pub fn summary(&self, filter: &StatusFilter) -> Result<FleetSummary, StoreError> {
        let snapshot = self.store.snapshot()?;
        let stored_reports = snapshot.len();
        let current = filter.apply(resolve_reports(snapshot).into_records(SortOrder::Unordered));

        let mut summary = FleetSummary {
            filter: filter.clone(),
            stored_reports,
            machines: current.len(),
            ..FleetSummary::default()
        };
        for check in ComplianceCheck::ALL {
            summary.failing_checks.insert(check, 0);
        }

        for record in &current {
            let r = &record.report;
            let issue = r.has_issue();
            let os = summary
                .by_os
                .entry(r.os_label().unwrap_or("N/A").to_string())
                .or_default();
            os.machines += 1;
            if issue {
                os.with_issues += 1;
                summary.with_issues += 1;
            } else {
                summary.compliant += 1;
            }
            for check in r.failing_checks() {
                *summary.failing_checks.entry(check).or_insert(0) += 1;
            }
        }

        summary.latest_report_at = current
            .iter()
            .map(|r| r.report.timestamp)
            .max()
            .and_then(|ts| ts.format(&Rfc3339).ok());

        Ok(summary)
    }
}
