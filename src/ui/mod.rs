use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::{ComplianceCheck, StoredReport};
use crate::engine::FleetSummary;
use crate::export::ExportMode;
use crate::filter::StatusFilter;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 詳細を見るには `--verbose` を付けて再実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なコマンド/オプションは `fleetstat --help` を参照してください"
    );
}

pub fn print_status(records: &[StoredReport], filter: &StatusFilter, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let total = records.len();
    let issues = records.iter().filter(|r| r.report.has_issue()).count();
    let _ = writeln!(
        out,
        "端末: {total}台  問題あり: {issues}台{}",
        describe_filter(filter)
    );
    if total == 0 {
        let _ = writeln!(out, "該当する端末はありません。");
        return;
    }

    let rows = cfg.max_table_rows.max(1).min(total);
    let _ = writeln!(out);
    print_status_table(&mut out, records, rows, cfg.color);
    if total > rows {
        let _ = writeln!(
            out,
            "...（{rows}件表示 / 全{total}件。全件は `fleetstat export` で出力できます）"
        );
    }
}

pub fn print_summary(summary: &FleetSummary, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "概要: 端末={}  準拠={}  問題あり={}  保存済みレポート={}{}",
        summary.machines,
        summary.compliant,
        format_issue_count(summary.with_issues, cfg.color),
        summary.stored_reports,
        describe_filter(&summary.filter)
    );
    if let Some(at) = &summary.latest_report_at {
        let _ = writeln!(out, "最新レポート: {at}");
    }

    if !summary.by_os.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "OS別:");
        let os_w = summary
            .by_os
            .keys()
            .map(|k| visible_width_ansi(k))
            .max()
            .unwrap_or(0);
        for (os, s) in &summary.by_os {
            let _ = writeln!(
                out,
                "- {}  端末={}  問題あり={}",
                pad_end_display(os, os_w),
                s.machines,
                format_issue_count(s.with_issues, cfg.color)
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "チェック別の不合格:");
    for check in ComplianceCheck::ALL {
        let failing = summary.failing_checks.get(&check).copied().unwrap_or(0);
        let _ = writeln!(
            out,
            "- {}: {}",
            check.label(),
            format_issue_count(failing, cfg.color)
        );
    }
}

fn describe_filter(filter: &StatusFilter) -> String {
    let mut parts = Vec::new();
    if let Some(os) = filter.os.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("os={os}"));
    }
    if filter.issue == Some(true) {
        parts.push("issue=true".to_string());
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("  （フィルタ: {}）", parts.join(" "))
    }
}

fn print_status_table(out: &mut dyn Write, records: &[StoredReport], rows: usize, color: bool) {
    let label_id = "Machine ID";
    let label_os = "OS";
    let label_seen = "Last Seen";

    let shown = &records[..rows];
    let id_w = shown
        .iter()
        .map(|r| visible_width_ansi(&truncate_middle(&r.report.machine_id, 32)))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_id));
    let os_w = shown
        .iter()
        .map(|r| visible_width_ansi(&truncate_middle(r.report.os_label().unwrap_or("N/A"), 24)))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_os));
    let check_w: Vec<usize> = ComplianceCheck::ALL
        .iter()
        .map(|c| visible_width_ansi(c.label()))
        .collect();

    let mut header = format!(
        "{}  {}",
        pad_end_display(label_id, id_w),
        pad_end_display(label_os, os_w)
    );
    let mut rule = format!("{}  {}", "-".repeat(id_w), "-".repeat(os_w));
    for (check, w) in ComplianceCheck::ALL.iter().zip(&check_w) {
        header.push_str(&format!("  {}", pad_end_display(check.label(), *w)));
        rule.push_str(&format!("  {}", "-".repeat(*w)));
    }
    header.push_str(&format!("  {label_seen}"));
    rule.push_str(&format!("  {}", "-".repeat(23)));
    let _ = writeln!(out, "{header}");
    let _ = writeln!(out, "{rule}");

    for record in shown {
        let r = &record.report;
        let id = truncate_middle(&r.machine_id, 32);
        let id = if color && r.has_issue() {
            format!("\x1b[31m{id}\x1b[0m")
        } else {
            id
        };
        let os = truncate_middle(r.os_label().unwrap_or("N/A"), 24);

        let mut line = format!("{}  {}", pad_end_ansi(&id, id_w), pad_end_display(&os, os_w));
        for (check, w) in ComplianceCheck::ALL.iter().zip(&check_w) {
            let cell = format_flag(check.passed(r), color);
            line.push_str(&format!("  {}", pad_end_ansi(&cell, *w)));
        }
        line.push_str(&format!("  {}", ExportMode::Human.render_timestamp(r.timestamp)));
        let _ = writeln!(out, "{line}");
    }
}

fn format_flag(ok: bool, color: bool) -> String {
    let s = if ok { "yes" } else { "no" };
    if !color {
        return s.to_string();
    }
    let code = if ok { "32" } else { "31" };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn format_issue_count(n: usize, color: bool) -> String {
    if color && n > 0 {
        format!("\x1b[31m{n}\x1b[0m")
    } else {
        n.to_string()
    }
}

fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s
        .chars()
        .rev()
        .take(right)
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    format!("{prefix}...{suffix}")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    // Cells may hold agent-supplied text; keep control characters out of the table.
    let cleaned: String = s.chars().map(|c| if c.is_control() { ' ' } else { c }).collect();
    pad_end_ansi(&cleaned, width)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StatusReport;
    use time::macros::datetime;

    fn record(id: &str, os: Option<&str>, av: bool) -> StoredReport {
        StoredReport {
            seq: 0,
            report: StatusReport {
                machine_id: id.to_string(),
                os: os.map(str::to_string),
                disk_encrypted: true,
                os_up_to_date: true,
                antivirus_enabled: av,
                sleep_setting_ok: true,
                timestamp: datetime!(2024-01-01 09:30:00 UTC),
            },
        }
    }

    #[test]
    fn visible_width_ignores_ansi_and_counts_wide_chars() {
        assert_eq!(visible_width_ansi("\x1b[31mno\x1b[0m"), 2);
        assert_eq!(visible_width_ansi("端末"), 4);
    }

    #[test]
    fn truncate_middle_keeps_both_ends() {
        assert_eq!(truncate_middle("abcdefghij", 7), "ab...ij");
        assert_eq!(truncate_middle("short", 7), "short");
    }

    #[test]
    fn status_table_aligns_columns_without_color() {
        let records = vec![record("LAPTOP-1", Some("Windows"), true), record("m2", None, false)];
        let mut buf = Vec::new();
        print_status_table(&mut buf, &records, 2, false);
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Machine ID  OS     "), "{text}");
        assert!(lines[2].starts_with("LAPTOP-1    Windows  yes"), "{text}");
        assert!(lines[3].starts_with("m2          N/A      yes"), "{text}");
        assert!(lines[3].contains("  no "), "{text}");
        assert!(lines[3].ends_with("2024-01-01 09:30:00 UTC"), "{text}");
    }

    #[test]
    fn status_table_colors_issue_rows() {
        let records = vec![record("bad", Some("Linux"), false)];
        let mut buf = Vec::new();
        print_status_table(&mut buf, &records, 1, true);
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("\x1b[31mbad\x1b[0m"), "{text:?}");
        assert!(text.contains("\x1b[31mno\x1b[0m"), "{text:?}");
    }

    #[test]
    fn describe_filter_lists_active_parts_only() {
        assert_eq!(describe_filter(&StatusFilter::all()), "");
        assert_eq!(
            describe_filter(&StatusFilter::all().os("Linux").issues_only()),
            "  （フィルタ: os=Linux issue=true）"
        );
    }
}
