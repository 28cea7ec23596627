use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::ComplianceCheck;

/// One status report as sent by an agent. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub machine_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    pub disk_encrypted: bool,
    pub os_up_to_date: bool,
    pub antivirus_enabled: bool,
    pub sleep_setting_ok: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl StatusReport {
    /// True when at least one compliance flag is false.
    pub fn has_issue(&self) -> bool {
        !(self.disk_encrypted
            && self.os_up_to_date
            && self.antivirus_enabled
            && self.sleep_setting_ok)
    }

    pub fn failing_checks(&self) -> Vec<ComplianceCheck> {
        ComplianceCheck::ALL
            .into_iter()
            .filter(|c| !c.passed(self))
            .collect()
    }

    /// `os` with empty strings treated as absent.
    pub fn os_label(&self) -> Option<&str> {
        self.os.as_deref().filter(|s| !s.is_empty())
    }
}

/// A report together with the sequence number the store assigned on append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReport {
    pub seq: u64,
    #[serde(flatten)]
    pub report: StatusReport,
}

impl StoredReport {
    /// Ordering key for "which report is current": timestamp, then append order.
    pub fn recency_key(&self) -> (OffsetDateTime, u64) {
        (self.report.timestamp, self.seq)
    }
}
