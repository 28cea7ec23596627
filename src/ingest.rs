use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use walkdir::WalkDir;

use crate::core::{ComplianceCheck, StatusReport};
use crate::error::{IngestError, ValidationError};
use crate::store::ReportStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub accepted: usize,
    pub seqs: Vec<u64>,
}

/// Checks one decoded payload and builds the report it describes.
///
/// Every problem found is reported, not just the first. Fields other than
/// the report's own are ignored.
pub fn validate_report(value: &Value) -> Result<StatusReport, ValidationError> {
    let Some(obj) = value.as_object() else {
        return Err(ValidationError::single(format!(
            "report must be a JSON object (got {})",
            json_kind(value)
        )));
    };

    let mut problems = Vec::new();

    let machine_id = match obj.get("machine_id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::String(_)) => {
            problems.push("machine_id must not be empty".to_string());
            None
        }
        None | Some(Value::Null) => {
            problems.push("machine_id is required".to_string());
            None
        }
        Some(other) => {
            problems.push(format!("machine_id must be a string (got {})", json_kind(other)));
            None
        }
    };

    let os = match obj.get("os") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            problems.push(format!("os must be a string (got {})", json_kind(other)));
            None
        }
    };

    let mut flags = [false; 4];
    for (slot, check) in flags.iter_mut().zip(ComplianceCheck::ALL) {
        match read_flag(obj, check) {
            Ok(v) => *slot = v,
            Err(problem) => problems.push(problem),
        }
    }

    let timestamp = match obj.get("timestamp") {
        None | Some(Value::Null) => {
            problems.push("timestamp is required".to_string());
            None
        }
        Some(v) => match parse_timestamp(v) {
            Ok(ts) => Some(ts),
            Err(problem) => {
                problems.push(problem);
                None
            }
        },
    };

    match (machine_id, timestamp) {
        (Some(machine_id), Some(timestamp)) if problems.is_empty() => Ok(StatusReport {
            machine_id,
            os,
            disk_encrypted: flags[0],
            os_up_to_date: flags[1],
            antivirus_enabled: flags[2],
            sleep_setting_ok: flags[3],
            timestamp,
        }),
        _ => Err(ValidationError::new(problems)),
    }
}

fn read_flag(obj: &Map<String, Value>, check: ComplianceCheck) -> Result<bool, String> {
    match obj.get(check.as_str()) {
        Some(Value::Bool(b)) => Ok(*b),
        None | Some(Value::Null) => Err(format!("{check} is required")),
        Some(other) => Err(format!("{check} must be a boolean (got {})", json_kind(other))),
    }
}

/// Accepts RFC 3339, a naive ISO-8601 date-time (taken as UTC), or integer
/// epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Result<OffsetDateTime, String> {
    let ts = match value {
        Value::String(s) => parse_timestamp_str(s.trim())
            .ok_or_else(|| format!("timestamp is not a valid ISO-8601 date-time: {s:?}")),
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .ok_or_else(|| format!("timestamp must be integer epoch milliseconds: {n}"))?;
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
                .map_err(|err| format!("timestamp out of range: {err}"))
        }
        other => Err(format!(
            "timestamp must be a string or a number (got {})",
            json_kind(other)
        )),
    }?;
    ensure_storable(ts)
}

/// Stored records carry RFC 3339 timestamps and exports render them in UTC,
/// both of which need a year in 0..=9999.
fn ensure_storable(ts: OffsetDateTime) -> Result<OffsetDateTime, String> {
    let utc_year = ts.checked_to_offset(UtcOffset::UTC).map(|utc| utc.year());
    if !utc_year.is_some_and(|y| (0..=9999).contains(&y)) || ts.format(&Rfc3339).is_err() {
        return Err(format!(
            "timestamp is outside the supported range (years 0000-9999): {ts}"
        ));
    }
    Ok(ts)
}

fn parse_timestamp_str(s: &str) -> Option<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(ts);
    }
    let with_fraction =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    let whole_seconds = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(s, with_fraction)
        .or_else(|_| PrimitiveDateTime::parse(s, whole_seconds))
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Splits a payload into report values. Accepts one object, an array of
/// objects, or a stream of objects such as JSON Lines.
pub fn parse_payload(text: &str) -> Result<Vec<Value>, ValidationError> {
    let mut out = Vec::new();
    let stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    for (i, item) in stream.enumerate() {
        let value = item.map_err(|err| {
            ValidationError::single(format!("payload is not valid JSON (value {}): {err}", i + 1))
        })?;
        match value {
            Value::Array(items) => out.extend(items),
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return Err(ValidationError::single("payload contains no reports"));
    }
    Ok(out)
}

/// Validates then appends. A rejected report never reaches the store.
pub fn submit_report(store: &dyn ReportStore, value: &Value) -> Result<u64, IngestError> {
    let report = validate_report(value)?;
    Ok(store.append(report)?)
}

/// Validates the whole batch before appending anything. If any report is
/// invalid the store is left unchanged.
pub fn submit_batch(
    store: &dyn ReportStore,
    values: &[Value],
) -> Result<BatchOutcome, IngestError> {
    let mut reports = Vec::with_capacity(values.len());
    let mut rejected = Vec::new();
    for (i, value) in values.iter().enumerate() {
        match validate_report(value) {
            Ok(report) => reports.push(report),
            Err(err) => rejected.push(err.at(i)),
        }
    }
    if !rejected.is_empty() {
        return Err(IngestError::BatchRejected {
            total: values.len(),
            rejected,
        });
    }

    let mut seqs = Vec::with_capacity(reports.len());
    for report in reports {
        seqs.push(store.append(report)?);
    }
    Ok(BatchOutcome {
        accepted: seqs.len(),
        seqs,
    })
}

/// One payload read from a file, a walked directory, or stdin.
#[derive(Debug, Clone)]
pub struct PayloadSource {
    pub label: String,
    pub text: String,
}

pub fn collect_sources(paths: &[PathBuf]) -> Result<Vec<PayloadSource>> {
    let mut out = Vec::new();
    for path in paths {
        if path.as_os_str() == "-" {
            let mut text = String::new();
            std::io::stdin()
                .lock()
                .read_to_string(&mut text)
                .context("標準入力の読み取りに失敗しました")?;
            out.push(PayloadSource {
                label: "<stdin>".to_string(),
                text,
            });
        } else if path.is_dir() {
            out.extend(collect_dir(path)?);
        } else {
            out.push(read_source(path)?);
        }
    }
    Ok(out)
}

fn collect_dir(root: &Path) -> Result<Vec<PayloadSource>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("ディレクトリの走査に失敗しました: {}", root.display()))?;
        if !entry.file_type().is_file() || !is_payload_file(entry.path()) {
            continue;
        }
        out.push(read_source(entry.path())?);
    }
    Ok(out)
}

fn is_payload_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("jsonl")
    )
}

fn read_source(path: &Path) -> Result<PayloadSource> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("レポートファイルの読み取りに失敗しました: {}", path.display()))?;
    Ok(PayloadSource {
        label: path.display().to_string(),
        text,
    })
}
