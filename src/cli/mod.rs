use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use time::OffsetDateTime;

use crate::engine::Engine;
use crate::error::IngestError;
use crate::export::ExportMode;
use crate::filter::StatusFilter;
use crate::logs::{ExportRun, IngestRun, Rejection};
use crate::resolve::SortOrder;
use crate::store::JsonlStore;
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "fleetstat",
    version,
    about = "端末フリートのコンプライアンス状態（ディスク暗号化/OS更新/ウイルス対策/スリープ設定）を集約し、最新状態の表示・絞り込み・CSV出力を行う"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Report log to use instead of `store.path` from the config.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Submit(SubmitArgs),
    Status(StatusArgs),
    Summary(SummaryArgs),
    Export(ExportArgs),
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Report files (JSON object, array or JSON Lines), directories, or `-` for stdin.
    #[arg(default_value = "-")]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct FilterArgs {
    /// Exact, case-sensitive OS label.
    #[arg(long)]
    pub os: Option<String>,
    /// Only machines with at least one failing check.
    #[arg(long)]
    pub issue: bool,
}

impl FilterArgs {
    fn to_filter(&self) -> StatusFilter {
        StatusFilter {
            os: self.os.clone().filter(|s| !s.is_empty()),
            issue: self.issue.then_some(true),
        }
    }
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub filter: FilterArgs,
    #[arg(long, default_value = "machine")]
    pub sort: SortOrder,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub filter: FilterArgs,
    /// `human` (yes/no, N/A) or `bulk` (true/false, ISO-8601). Defaults to `export.default_mode`.
    #[arg(long)]
    pub mode: Option<ExportMode>,
    /// Every stored report, newest first, instead of the current record per machine.
    #[arg(long)]
    pub history: bool,
    #[arg(long, default_value = "machine")]
    pub sort: SortOrder,
    /// Destination file, or `-` for stdout. Defaults to the suggested filename.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

#[derive(Debug, Serialize)]
struct SubmitOutput {
    status: &'static str,
    store: String,
    received: usize,
    accepted: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    seqs: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rejected: Vec<Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExportOutput<'a> {
    #[serde(flatten)]
    table: &'a crate::export::ExportTable,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<String>,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::config::home_dir()?;

    let env_config_path = std::env::var_os("FLEETSTAT_CONFIG").map(std::path::PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let store_path = cli
        .store
        .clone()
        .unwrap_or_else(|| cfg.store_path(&home_dir));
    if ui_cfg.verbose {
        eprintln!("ストア: {}", store_path.display());
    }
    let engine = Engine::new(Arc::new(JsonlStore::open(&store_path)));

    match cli.command {
        Commands::Submit(args) => {
            let started_at = OffsetDateTime::now_utc();
            let sources = crate::ingest::collect_sources(&args.paths)
                .map_err(crate::exit::invalid_args_err)?;
            let source_labels: Vec<String> = sources.iter().map(|s| s.label.clone()).collect();

            let mut values = Vec::new();
            let mut origins = Vec::new();
            let mut rejected = Vec::new();
            for source in &sources {
                match crate::ingest::parse_payload(&source.text) {
                    Ok(parsed) => {
                        for (i, value) in parsed.into_iter().enumerate() {
                            origins.push(format!("{}#{}", source.label, i + 1));
                            values.push(value);
                        }
                    }
                    Err(err) => rejected.push(Rejection {
                        source: source.label.clone(),
                        problems: err.problems,
                    }),
                }
            }
            if ui_cfg.verbose {
                eprintln!(
                    "入力: sources={} reports={}",
                    source_labels.len(),
                    values.len()
                );
            }

            let progress_enabled =
                ui_cfg.stderr_is_tty && !ui_cfg.quiet && !cli.json && values.len() > 1;
            let pb = if progress_enabled {
                let pb = indicatif::ProgressBar::new_spinner();
                pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                pb.set_message(format!("{}件のレポートを保存中...", values.len()));
                pb.enable_steady_tick(Duration::from_millis(120));
                Some(pb)
            } else {
                None
            };

            let mut seqs = Vec::new();
            let mut store_error = None;
            if rejected.is_empty() {
                match engine.submit_batch(&values) {
                    Ok(outcome) => seqs = outcome.seqs,
                    Err(IngestError::BatchRejected { rejected: errs, .. }) => {
                        for err in errs {
                            let source = err
                                .index
                                .and_then(|i| origins.get(i).cloned())
                                .unwrap_or_else(|| "<unknown>".to_string());
                            rejected.push(Rejection {
                                source,
                                problems: err.problems,
                            });
                        }
                    }
                    Err(err) => store_error = Some(err),
                }
            }

            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            let finished_at = OffsetDateTime::now_utc();

            let log_path = if cfg.logs.enabled {
                let written = crate::logs::write_ingest_log(
                    &home_dir,
                    &IngestRun {
                        started_at,
                        finished_at,
                        store_path: &store_path,
                        sources: &source_labels,
                        received: values.len(),
                        accepted_seqs: &seqs,
                        rejected: rejected.clone(),
                        error: store_error.as_ref().map(|e| e.to_string()),
                    },
                );
                match written {
                    Ok(path) => Some(path),
                    Err(err) if store_error.is_some() || !rejected.is_empty() => {
                        if ui_cfg.verbose {
                            eprintln!("ログの書き込みに失敗しました: {err}");
                        }
                        None
                    }
                    Err(err) => {
                        return Err(err.context(format!(
                            "submit: {}件を保存しましたが、ログの書き込みに失敗しました",
                            seqs.len()
                        )));
                    }
                }
            } else {
                None
            };
            let log_hint = log_path.as_deref().map(|p| crate::logs::mask_home(p, &home_dir));

            if let Some(err) = store_error {
                return Err(crate::exit::ingest_err(err));
            }

            if cli.json {
                write_json(&SubmitOutput {
                    status: if rejected.is_empty() { "ok" } else { "rejected" },
                    store: crate::logs::mask_home(&store_path, &home_dir),
                    received: values.len(),
                    accepted: seqs.len(),
                    seqs: seqs.clone(),
                    rejected: rejected.clone(),
                    log: log_hint.clone(),
                })?;
            }

            if !rejected.is_empty() {
                let mut msg = format!(
                    "不正なレポートがあるため、何も保存しませんでした（不正: {}件 / 受信: {}件）",
                    rejected.len(),
                    values.len()
                );
                for r in &rejected {
                    msg.push_str(&format!("\n- {}: {}", r.source, r.problems.join("; ")));
                }
                if let Some(hint) = &log_hint {
                    msg.push_str(&format!("\nログ: {hint}"));
                }
                return Err(crate::exit::invalid_args(msg));
            }

            if !cli.json && !ui_cfg.quiet {
                println!(
                    "{}件のレポートを保存しました（ストア: {}）",
                    seqs.len(),
                    crate::logs::mask_home(&store_path, &home_dir)
                );
                if let Some(hint) = &log_hint {
                    println!("ログ: {hint}");
                }
            }
        }
        Commands::Status(args) => {
            let filter = args.filter.to_filter();
            let records = engine
                .list_current_status(&filter, args.sort)
                .map_err(crate::exit::store_err)?;
            if cli.json {
                write_json(&records)?;
            } else {
                crate::ui::print_status(&records, &filter, &ui_cfg);
            }
        }
        Commands::Summary(args) => {
            let filter = args.filter.to_filter();
            let summary = engine.summary(&filter).map_err(crate::exit::store_err)?;
            if cli.json {
                write_json(&summary)?;
            } else {
                crate::ui::print_summary(&summary, &ui_cfg);
            }
        }
        Commands::Export(args) => {
            let to_stdout = args.output.as_deref() == Some(Path::new("-"));
            if to_stdout && cli.json {
                return Err(crate::exit::invalid_args(
                    "export --output - は --json と併用できません",
                ));
            }
            if args.history && args.sort != SortOrder::MachineId {
                return Err(crate::exit::invalid_args(
                    "export --history は常に新しい順です（--sort と併用できません）",
                ));
            }

            let started_at = OffsetDateTime::now_utc();
            let mode = args.mode.unwrap_or(cfg.export.default_mode);
            let filter = args.filter.to_filter();
            let table = if args.history {
                engine.export_history(&filter, mode)
            } else {
                engine
                    .list_current_status(&filter, args.sort)
                    .map(|records| engine.export_table(&records, mode))
            }
            .map_err(crate::exit::store_err)?;

            let destination = if to_stdout {
                None
            } else {
                Some(match args.output {
                    Some(path) => path,
                    None => {
                        let dir = match cfg.export_dir(&home_dir) {
                            Some(dir) => dir,
                            None => std::env::current_dir()
                                .context("カレントディレクトリの取得に失敗しました")?,
                        };
                        dir.join(&table.filename)
                    }
                })
            };

            let written = match destination.as_deref() {
                None => write_stdout(table.body.as_bytes()),
                Some(path) => write_export_file(path, &table.body),
            };
            let finished_at = OffsetDateTime::now_utc();

            let log_path = if cfg.logs.enabled {
                let logged = crate::logs::write_export_log(
                    &home_dir,
                    &ExportRun {
                        started_at,
                        finished_at,
                        store_path: &store_path,
                        mode,
                        history: args.history,
                        filter: &filter,
                        rows: table.rows,
                        destination: destination.as_deref(),
                        error: written.as_ref().err().map(|e| format!("{e:#}")),
                    },
                );
                match logged {
                    Ok(path) => Some(path),
                    Err(err) => {
                        if ui_cfg.verbose {
                            eprintln!("ログの書き込みに失敗しました: {err:#}");
                        }
                        None
                    }
                }
            } else {
                None
            };
            written?;

            if let Some(path) = destination {
                let log = log_path.map(|p| crate::logs::mask_home(&p, &home_dir));
                if cli.json {
                    write_json(&ExportOutput {
                        table: &table,
                        path: path.display().to_string(),
                        log,
                    })?;
                } else if !ui_cfg.quiet {
                    println!(
                        "{}件をエクスポートしました（mode={}）: {}",
                        table.rows,
                        mode,
                        path.display()
                    );
                }
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "fleetstat", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: `fleetstat config --show` を使用してください");
            }
        }
    }

    Ok(())
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut buf = serde_json::to_vec_pretty(value)?;
    buf.push(b'\n');
    write_stdout(&buf)
}

fn write_stdout(buf: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(buf).and_then(|()| stdout.flush()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn write_export_file(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("出力先ディレクトリの作成に失敗しました: {}", parent.display())
            })?;
        }
    }
    std::fs::write(path, body)
        .with_context(|| format!("エクスポートの書き込みに失敗しました: {}", path.display()))
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn filter_args_map_to_status_filter() {
        let args = FilterArgs {
            os: Some("Windows".to_string()),
            issue: true,
        };
        assert_eq!(
            args.to_filter(),
            StatusFilter::all().os("Windows").issues_only()
        );

        let empty = FilterArgs {
            os: Some(String::new()),
            issue: false,
        };
        assert!(empty.to_filter().is_empty());
    }

    #[test]
    fn export_args_parse_mode_and_output() {
        let cli = Cli::try_parse_from([
            "fleetstat", "export", "--mode", "bulk", "--os", "Linux", "--issue", "-o", "-",
        ])
        .expect("parse");
        let Commands::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(args.mode, Some(ExportMode::Bulk));
        assert_eq!(args.output.as_deref(), Some(Path::new("-")));
        assert_eq!(
            args.filter.to_filter(),
            StatusFilter::all().os("Linux").issues_only()
        );
    }

    #[test]
    fn submit_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["fleetstat", "submit"]).expect("parse");
        let Commands::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(args.paths, vec![PathBuf::from("-")]);
    }

    #[test]
    fn parse_shell_rejects_unknown() {
        assert!(parse_shell("zsh").is_ok());
        assert!(parse_shell("powershell").is_err());
    }
}
