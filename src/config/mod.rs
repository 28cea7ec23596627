use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::export::ExportMode;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub store: StoreConfig,
    pub ui: UiConfig,
    pub export: ExportConfig,
    pub logs: LogsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportConfig {
    pub default_mode: ExportMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsConfig {
    pub enabled: bool,
}

impl EffectiveConfig {
    pub fn defaults(home_dir: &Path) -> Self {
        Self {
            store: StoreConfig {
                path: default_store_path(home_dir).display().to_string(),
            },
            ui: UiConfig {
                color: true,
                max_table_rows: 200,
            },
            export: ExportConfig {
                default_mode: ExportMode::Human,
                directory: None,
            },
            logs: LogsConfig { enabled: true },
            config_path: None,
        }
    }

    pub fn store_path(&self, home_dir: &Path) -> PathBuf {
        expand_home(&self.store.path, home_dir)
    }

    pub fn export_dir(&self, home_dir: &Path) -> Option<PathBuf> {
        self.export
            .directory
            .as_deref()
            .map(|d| expand_home(d, home_dir))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    store: Option<RawStoreConfig>,
    ui: Option<RawUiConfig>,
    export: Option<RawExportConfig>,
    logs: Option<RawLogsConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStoreConfig {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExportConfig {
    default_mode: Option<ExportMode>,
    directory: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogsConfig {
    enabled: Option<bool>,
}

pub fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("環境変数 HOME が設定されていません"))
}

pub fn config_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/fleetstat")
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    config_dir(home_dir).join("config.toml")
}

pub fn default_store_path(home_dir: &Path) -> PathBuf {
    config_dir(home_dir).join("reports.jsonl")
}

/// `~` and `~/...` are relative to `home_dir`; everything else is kept as is.
pub fn expand_home(path: &str, home_dir: &Path) -> PathBuf {
    if path == "~" {
        return home_dir.to_path_buf();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home_dir.join(rest),
        None => PathBuf::from(path),
    }
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::defaults(home_dir);

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&s).context("設定ファイル(TOML)の解析に失敗しました")?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    } else if config_path.is_some() {
        return Err(anyhow::anyhow!(
            "指定された設定ファイルが見つかりません: {}",
            path.display()
        ));
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(store) = raw.store {
        if let Some(path) = store.path.filter(|p| !p.trim().is_empty()) {
            cfg.store.path = path;
        }
    }

    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(export) = raw.export {
        if let Some(default_mode) = export.default_mode {
            cfg.export.default_mode = default_mode;
        }
        if let Some(directory) = export.directory.filter(|d| !d.trim().is_empty()) {
            cfg.export.directory = Some(directory);
        }
    }

    if let Some(logs) = raw.logs {
        if let Some(enabled) = logs.enabled {
            cfg.logs.enabled = enabled;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("FLEETSTAT_STORE_PATH") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.store.path = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("FLEETSTAT_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "FLEETSTAT_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("FLEETSTAT_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "FLEETSTAT_UI_MAX_TABLE_ROWS")?;
    }
    if let Ok(v) = std::env::var("FLEETSTAT_EXPORT_DEFAULT_MODE") {
        cfg.export.default_mode = v
            .parse::<ExportMode>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "FLEETSTAT_EXPORT_DEFAULT_MODE")?;
    }
    if let Ok(v) = std::env::var("FLEETSTAT_EXPORT_DIRECTORY") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.export.directory = Some(v.to_string());
        }
    }
    if let Ok(v) = std::env::var("FLEETSTAT_LOGS_ENABLED") {
        cfg.logs.enabled = parse_bool(&v).with_context(|| "FLEETSTAT_LOGS_ENABLED")?;
    }

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for s in ["1", "true", "YES", " on "] {
            assert!(parse_bool(s).expect(s));
        }
        for s in ["0", "false", "No", "off"] {
            assert!(!parse_bool(s).expect(s));
        }
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        let home = Path::new("/home/ops");
        assert_eq!(expand_home("~", home), PathBuf::from("/home/ops"));
        assert_eq!(
            expand_home("~/fleet/reports.jsonl", home),
            PathBuf::from("/home/ops/fleet/reports.jsonl")
        );
        assert_eq!(
            expand_home("/var/lib/fleetstat.jsonl", home),
            PathBuf::from("/var/lib/fleetstat.jsonl")
        );
        assert_eq!(expand_home("~other/x", home), PathBuf::from("~other/x"));
    }

    #[test]
    fn raw_config_overrides_only_present_keys() {
        let home = Path::new("/home/ops");
        let mut cfg = EffectiveConfig::defaults(home);
        let raw: RawConfig = toml::from_str(
            r#"
[ui]
max_table_rows = 5

[export]
default_mode = "bulk"
"#,
        )
        .expect("parse");
        apply_raw_config(&mut cfg, raw);

        assert_eq!(cfg.ui.max_table_rows, 5);
        assert!(cfg.ui.color);
        assert_eq!(cfg.export.default_mode, ExportMode::Bulk);
        assert_eq!(
            cfg.store_path(home),
            PathBuf::from("/home/ops/.config/fleetstat/reports.jsonl")
        );
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(toml::from_str::<RawConfig>("[scan]\ndeep = true\n").is_err());
    }

    #[test]
    fn misspelled_keys_inside_sections_are_rejected() {
        for bad in [
            "[store]\npth = \"/tmp/r.jsonl\"\n",
            "[ui]\ncolour = false\n",
            "[export]\nmode = \"bulk\"\n",
            "[logs]\nenable = false\n",
        ] {
            assert!(toml::from_str::<RawConfig>(bad).is_err(), "{bad}");
        }
    }
}
