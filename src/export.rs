use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::core::{ComplianceCheck, StoredReport};

pub const HEADER: [&str; 7] = [
    "Machine ID",
    "OS",
    "Disk Encrypted",
    "OS Up To Date",
    "Antivirus Enabled",
    "Sleep OK",
    "Timestamp",
];

pub const CONTENT_TYPE: &str = "text/csv; charset=utf-8";

const NOT_AVAILABLE: &str = "N/A";

/// How a table is rendered.
///
/// `Human` is the operator-facing report: `yes`/`no`, `N/A` for missing
/// values and a readable UTC timestamp. `Bulk` is the machine-facing dump:
/// `true`/`false`, empty for missing values and ISO-8601 with milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    Human,
    Bulk,
}

impl ExportMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ExportMode::Human => "human",
            ExportMode::Bulk => "bulk",
        }
    }

    pub const fn suggested_filename(self) -> &'static str {
        match self {
            ExportMode::Human => "machine_status_report.csv",
            ExportMode::Bulk => "export.csv",
        }
    }

    fn render_bool(self, value: bool) -> &'static str {
        match (self, value) {
            (ExportMode::Human, true) => "yes",
            (ExportMode::Human, false) => "no",
            (ExportMode::Bulk, true) => "true",
            (ExportMode::Bulk, false) => "false",
        }
    }

    fn render_text<'a>(self, value: Option<&'a str>) -> &'a str {
        match (self, value) {
            (_, Some(v)) if !v.is_empty() => v,
            (ExportMode::Human, _) => NOT_AVAILABLE,
            (ExportMode::Bulk, _) => "",
        }
    }

    pub fn render_timestamp(self, ts: OffsetDateTime) -> String {
        let Some(utc) = ts.checked_to_offset(UtcOffset::UTC) else {
            return "unknown".to_string();
        };
        let formatted = match self {
            ExportMode::Human => utc.format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second] UTC"
            )),
            ExportMode::Bulk => utc.format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
            )),
        };
        formatted.unwrap_or_else(|_| "unknown".to_string())
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" | "report" => Ok(ExportMode::Human),
            "bulk" | "api" => Ok(ExportMode::Bulk),
            other => Err(format!(
                "エクスポート形式が不正です: {other}（human|bulk を指定してください）"
            )),
        }
    }
}

/// A rendered table plus what a transport needs to offer it as a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    pub filename: String,
    pub content_type: String,
    pub mode: ExportMode,
    pub rows: usize,
    #[serde(skip)]
    pub body: String,
}

pub fn export_table(records: &[StoredReport], mode: ExportMode) -> ExportTable {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_csv(&mut buf, records, mode);
    ExportTable {
        filename: mode.suggested_filename().to_string(),
        content_type: CONTENT_TYPE.to_string(),
        mode,
        rows: records.len(),
        body: String::from_utf8_lossy(&buf).into_owned(),
    }
}

/// Header row first, then one row per record in the given order.
pub fn write_csv<W: Write>(
    out: &mut W,
    records: &[StoredReport],
    mode: ExportMode,
) -> io::Result<()> {
    write_row(out, HEADER.iter().copied())?;
    for record in records {
        let r = &record.report;
        let timestamp = mode.render_timestamp(r.timestamp);
        let mut fields: Vec<&str> = Vec::with_capacity(HEADER.len());
        fields.push(mode.render_text(Some(r.machine_id.as_str())));
        fields.push(mode.render_text(r.os.as_deref()));
        for check in ComplianceCheck::ALL {
            fields.push(mode.render_bool(check.passed(r)));
        }
        fields.push(&timestamp);
        write_row(out, fields.into_iter())?;
    }
    Ok(())
}

fn write_row<'a, W: Write>(out: &mut W, fields: impl Iterator<Item = &'a str>) -> io::Result<()> {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        out.write_all(quote_field(field).as_bytes())?;
    }
    out.write_all(b"\n")
}

/// RFC 4180 quoting: fields holding a delimiter, quote or line break are
/// wrapped in double quotes with inner quotes doubled.
pub fn quote_field(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains([',', '"', '\r', '\n']) {
        std::borrow::Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        std::borrow::Cow::Borrowed(field)
    }
}
