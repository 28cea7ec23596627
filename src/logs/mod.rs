use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::export::ExportMode;
use crate::filter::StatusFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Rejected,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub source: String,
    pub problems: Vec<String>,
}

/// What one `submit` run did, as recorded in its log file.
#[derive(Debug, Clone)]
pub struct IngestRun<'a> {
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub store_path: &'a Path,
    pub sources: &'a [String],
    pub received: usize,
    pub accepted_seqs: &'a [u64],
    pub rejected: Vec<Rejection>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExportRun<'a> {
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub store_path: &'a Path,
    pub mode: ExportMode,
    pub history: bool,
    pub filter: &'a StatusFilter,
    pub rows: usize,
    /// `None` when the table went to stdout.
    pub destination: Option<&'a Path>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct IngestLog {
    schema_version: &'static str,
    tool_version: String,
    command: &'static str,
    started_at: String,
    finished_at: String,
    status: RunStatus,
    store: String,
    sources: Vec<String>,
    received: usize,
    accepted: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    accepted_seqs: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rejected: Vec<Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExportLog {
    schema_version: &'static str,
    tool_version: String,
    command: &'static str,
    started_at: String,
    finished_at: String,
    status: RunStatus,
    store: String,
    mode: ExportMode,
    history: bool,
    filter: StatusFilter,
    rows: usize,
    destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn logs_dir(home_dir: &Path) -> PathBuf {
    crate::config::config_dir(home_dir).join("logs")
}

pub fn write_ingest_log(home_dir: &Path, run: &IngestRun<'_>) -> Result<PathBuf> {
    let status = if run.error.is_some() {
        RunStatus::Error
    } else if !run.rejected.is_empty() {
        RunStatus::Rejected
    } else {
        RunStatus::Ok
    };

    let log = IngestLog {
        schema_version: "1.0",
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        command: "submit",
        started_at: format_time(run.started_at),
        finished_at: format_time(run.finished_at),
        status,
        store: mask_home(run.store_path, home_dir),
        sources: run
            .sources
            .iter()
            .map(|s| mask_home(Path::new(s), home_dir))
            .collect(),
        received: run.received,
        accepted: run.accepted_seqs.len(),
        accepted_seqs: run.accepted_seqs.to_vec(),
        rejected: run
            .rejected
            .iter()
            .map(|r| Rejection {
                source: mask_home(Path::new(&r.source), home_dir),
                problems: r.problems.clone(),
            })
            .collect(),
        error: run.error.clone(),
    };

    write_log(home_dir, "ingest", run.finished_at, &log)
}

pub fn write_export_log(home_dir: &Path, run: &ExportRun<'_>) -> Result<PathBuf> {
    let log = ExportLog {
        schema_version: "1.0",
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        command: "export",
        started_at: format_time(run.started_at),
        finished_at: format_time(run.finished_at),
        status: if run.error.is_some() {
            RunStatus::Error
        } else {
            RunStatus::Ok
        },
        store: mask_home(run.store_path, home_dir),
        mode: run.mode,
        history: run.history,
        filter: run.filter.clone(),
        rows: run.rows,
        destination: run
            .destination
            .map(|p| mask_home(p, home_dir))
            .unwrap_or_else(|| "<stdout>".to_string()),
        error: run.error.clone(),
    };

    write_log(home_dir, "export", run.finished_at, &log)
}

fn write_log<T: Serialize>(
    home_dir: &Path,
    kind: &str,
    finished_at: OffsetDateTime,
    log: &T,
) -> Result<PathBuf> {
    let dir = logs_dir(home_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("ログディレクトリの作成に失敗しました: {}", dir.display()))?;

    let pid = std::process::id();
    let ts = finished_at.unix_timestamp_nanos();
    let path = dir.join(format!("{kind}-{pid}-{ts}.json"));

    let buf = serde_json::to_vec_pretty(log).context("ログ(JSON)のシリアライズに失敗しました")?;
    std::fs::write(&path, buf)
        .with_context(|| format!("ログの書き込みに失敗しました: {}", path.display()))?;
    Ok(path)
}

fn format_time(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| "unknown".to_string())
}

pub fn mask_home(path: &Path, home_dir: &Path) -> String {
    let Ok(stripped) = path.strip_prefix(home_dir) else {
        return path.display().to_string();
    };
    let stripped = stripped.display().to_string();
    if stripped.is_empty() {
        "~".to_string()
    } else {
        format!("~/{stripped}")
    }
}
