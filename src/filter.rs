use serde::{Deserialize, Serialize};

use crate::core::{StatusReport, StoredReport};

/// Conjunctive predicate over current records.
///
/// `os` is an exact, case-sensitive match; `None` or `""` disables it.
/// `issue = Some(true)` keeps records with at least one failing check;
/// `None` and `Some(false)` disable it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<bool>,
}

impl StatusFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    pub fn issues_only(mut self) -> Self {
        self.issue = Some(true);
        self
    }

    /// Builds a filter from raw query parameters (`?os=Windows&issue=true`).
    /// `issue` is only active for the literal `true`.
    pub fn from_query(os: Option<&str>, issue: Option<&str>) -> Self {
        Self {
            os: os.filter(|s| !s.is_empty()).map(str::to_string),
            issue: issue.map(|v| v == "true"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.os_filter().is_none() && !self.issue_filter()
    }

    fn os_filter(&self) -> Option<&str> {
        self.os.as_deref().filter(|s| !s.is_empty())
    }

    fn issue_filter(&self) -> bool {
        self.issue == Some(true)
    }

    pub fn matches(&self, report: &StatusReport) -> bool {
        if let Some(os) = self.os_filter() {
            if report.os.as_deref() != Some(os) {
                return false;
            }
        }
        if self.issue_filter() && !report.has_issue() {
            return false;
        }
        true
    }

    /// Keeps matching records in their original order.
    pub fn apply(&self, records: Vec<StoredReport>) -> Vec<StoredReport> {
        if self.is_empty() {
            return records;
        }
        records
            .into_iter()
            .filter(|r| self.matches(&r.report))
            .collect()
    }
}
