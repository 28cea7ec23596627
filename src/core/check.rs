use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::StatusReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceCheck {
    DiskEncrypted,
    OsUpToDate,
    AntivirusEnabled,
    SleepSettingOk,
}

impl ComplianceCheck {
    pub const ALL: [ComplianceCheck; 4] = [
        ComplianceCheck::DiskEncrypted,
        ComplianceCheck::OsUpToDate,
        ComplianceCheck::AntivirusEnabled,
        ComplianceCheck::SleepSettingOk,
    ];

    /// Field name in the report payload.
    pub const fn as_str(self) -> &'static str {
        match self {
            ComplianceCheck::DiskEncrypted => "disk_encrypted",
            ComplianceCheck::OsUpToDate => "os_up_to_date",
            ComplianceCheck::AntivirusEnabled => "antivirus_enabled",
            ComplianceCheck::SleepSettingOk => "sleep_setting_ok",
        }
    }

    /// Column title used by table output and CSV headers.
    pub const fn label(self) -> &'static str {
        match self {
            ComplianceCheck::DiskEncrypted => "Disk Encrypted",
            ComplianceCheck::OsUpToDate => "OS Up To Date",
            ComplianceCheck::AntivirusEnabled => "Antivirus Enabled",
            ComplianceCheck::SleepSettingOk => "Sleep OK",
        }
    }

    pub fn passed(self, report: &StatusReport) -> bool {
        match self {
            ComplianceCheck::DiskEncrypted => report.disk_encrypted,
            ComplianceCheck::OsUpToDate => report.os_up_to_date,
            ComplianceCheck::AntivirusEnabled => report.antivirus_enabled,
            ComplianceCheck::SleepSettingOk => report.sleep_setting_ok,
        }
    }
}

impl fmt::Display for ComplianceCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplianceCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ComplianceCheck::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "チェック名が不正です: {s}（disk_encrypted|os_up_to_date|antivirus_enabled|sleep_setting_ok を指定してください）"
                )
            })
    }
}
