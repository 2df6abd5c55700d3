//! Transport-neutral reply text.
//!
//! Output uses Telegram's legacy Markdown subset (`*bold*`, `` `code` ``,
//! `_italic_`); channels that reject it resend plain text, and the CLI
//! prints it as-is.

use crate::pipeline::{Platform, RewriteFailure};
use crate::session::Mode;
use crate::store::{Output, Thought, UsageSummary};

/// Inline platform messages are cut below Telegram's 4096 limit.
pub const MAX_INLINE_CHARS: usize = 3800;

/// Records listed by `/history`.
pub const HISTORY_LIMIT: usize = 10;

const HISTORY_SUMMARY_CHARS: usize = 60;

const SCORE_CELLS: u8 = 10;

fn rule() -> String {
    "─".repeat(17)
}

/// `███████░░░` for a 0-10 score.
pub fn score_bar(score: u8) -> String {
    let filled = score.min(SCORE_CELLS) as usize;
    format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(SCORE_CELLS as usize - filled)
    )
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "✅" } else { "❌" }
}

fn platform_list(platforms: &[Platform]) -> String {
    if platforms.is_empty() {
        return "N/A".to_string();
    }
    platforms
        .iter()
        .map(Platform::display_name)
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Keep at most `max_chars` characters, backing up to the last whitespace
/// when it is in the second half of the kept text.
fn truncate_at_word(text: &str, max_chars: usize) -> &str {
    let end = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(i, _)| i);
    let head = &text[..end];
    if end == text.len() {
        return head;
    }
    match head.rfind(char::is_whitespace) {
        Some(i) if i >= end / 2 => head[..i].trim_end(),
        _ => head,
    }
}

/// Analysis card sent after a pipeline run.
pub fn format_analysis(thought: &Thought) -> String {
    let a = &thought.analysis;
    [
        "📊 *Analysis Results*".to_string(),
        String::new(),
        format!("Type: `{}`", a.idea_type),
        format!("Novelty: {}/10  {}", a.novelty_score, score_bar(a.novelty_score)),
        format!("Clarity: {}/10  {}", a.clarity_score, score_bar(a.clarity_score)),
        format!("Risk: `{}`", a.risk_level),
        format!("Publishable: {}", yes_no(a.publishable)),
        String::new(),
        format!("💡 Summary: {}", a.summary),
        String::new(),
        format!(
            "📌 Recommended platforms: *{}*",
            platform_list(&thought.recommended_platforms)
        ),
        format!(
            "_(Record ID: {id}. Full version: /show {id})_",
            id = thought.id
        ),
    ]
    .join("\n")
}

/// One platform's output. Returns the text and whether it was truncated.
pub fn format_platform_output(platform: Platform, content: &str, thought_id: i64) -> (String, bool) {
    let header = format!("{} *{}*\n{}\n", platform.icon(), platform.display_name(), rule());
    let full = format!("{header}{content}");
    if full.chars().count() <= MAX_INLINE_CHARS {
        return (full, false);
    }

    let footer = format!("\n\n_(Truncated. Full version: /show {thought_id})_");
    let budget = MAX_INLINE_CHARS
        .saturating_sub(header.chars().count())
        .saturating_sub(footer.chars().count());
    let kept = truncate_at_word(content, budget);
    (format!("{header}{kept}{footer}"), true)
}

/// Warning listing platforms whose rewrite failed.
pub fn format_failures(failures: &[RewriteFailure], thought_id: i64) -> String {
    let names: Vec<&str> = failures.iter().map(|f| f.platform.display_name()).collect();
    format!(
        "⚠️ Partial result: no output for {}. The rest was saved as record #{thought_id}.",
        names.join(", ")
    )
}

/// `/history` listing, most recent first.
pub fn format_history(thoughts: &[Thought]) -> String {
    if thoughts.is_empty() {
        return "No records yet.".to_string();
    }

    let mut lines = vec!["📋 *Recent Records*".to_string(), String::new()];
    for t in thoughts {
        let a = &t.analysis;
        lines.push(format!(
            "`#{}` {} | `{}` | {}/10",
            t.id,
            t.created_at.format("%Y-%m-%d"),
            a.idea_type,
            a.novelty_score
        ));
        let summary: String = a.summary.chars().take(HISTORY_SUMMARY_CHARS).collect();
        if !summary.is_empty() {
            lines.push(format!("     _{summary}_"));
        }
        lines.push(format!("     👉 /show {}", t.id));
        lines.push(String::new());
    }
    lines.join("\n").trim_end().to_string()
}

/// `/show` reply: a header message, then every output in full.
pub fn format_full_record(thought: &Thought, outputs: &[Output]) -> Vec<String> {
    let a = &thought.analysis;
    let mut header = vec![
        format!("📊 *Record #{}*", thought.id),
        String::new(),
        format!("Date: `{}`", thought.created_at.format("%Y-%m-%d %H:%M:%S")),
        format!("Source: `{}`", thought.source),
        format!("Type: `{}`", a.idea_type),
        format!("Novelty: {}/10  {}", a.novelty_score, score_bar(a.novelty_score)),
        format!("Clarity: {}/10  {}", a.clarity_score, score_bar(a.clarity_score)),
        format!("Risk: `{}`  Publishable: {}", a.risk_level, yes_no(a.publishable)),
        String::new(),
        format!("💡 {}", a.summary),
    ];
    if !thought.failed_platforms.is_empty() {
        header.push(String::new());
        header.push(format!(
            "⚠️ Missing outputs: {}",
            platform_list(&thought.failed_platforms).replace(" → ", ", ")
        ));
    }

    let mut messages = vec![header.join("\n")];
    for output in outputs {
        messages.push(format!(
            "{} *{}*\n{}\n{}",
            output.platform.icon(),
            output.platform.display_name(),
            rule(),
            output.content
        ));
    }
    messages
}

/// Everything `/status` reports.
#[derive(Debug, Clone)]
pub struct StatusView<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub authorized: bool,
    pub mode: Mode,
    pub buffered: usize,
    pub last_tag: Option<&'a str>,
    pub thought_count: Option<u64>,
    pub usage: Option<&'a UsageSummary>,
}

pub fn format_status(view: &StatusView<'_>) -> String {
    let mut lines = vec![
        "⚙️ *Bot Status*".to_string(),
        String::new(),
        format!("🤖 LLM: `{}` / `{}`", view.provider, view.model),
        format!(
            "👤 Access: {}",
            if view.authorized { "✅ Authorized" } else { "❌ Unauthorized" }
        ),
    ];
    if view.authorized {
        lines.push(format!("🧭 Mode: `{}` ({} buffered)", view.mode, view.buffered));
        if let Some(label) = view.last_tag {
            lines.push(format!("🏷 Last tag: {label}"));
        }
        if let Some(count) = view.thought_count {
            lines.push(format!("📊 Your records: `{count}`"));
        }
        if let Some(usage) = view.usage {
            lines.push(format!(
                "💰 LLM usage: {} calls, {} in / {} out tokens, ${}",
                usage.call_count,
                usage.total_input_tokens,
                usage.total_output_tokens,
                usage.total_cost.round_dp(4)
            ));
        }
    }
    lines.join("\n")
}

pub fn welcome_text() -> String {
    "👋 Welcome to *Media Leverage*\n\n\
     Turn your raw ideas and conversations into publishable content.\n\n\
     Send /help to see all available commands."
        .to_string()
}

pub fn help_text() -> String {
    [
        "📖 *Commands*",
        "",
        "*Content*",
        "/chat - Explore ideas with AI (use /analyze afterward to publish)",
        "/process - Process mode (paste text or upload a file)",
        "/analyze - Analyze the current session, or messages since the last tag",
        "/tag [label] - Place a marker at the current position",
        "",
        "*Records*",
        "/history - Last 10 processed records",
        "/show <id> - Full analysis and platform outputs for a record",
        "/clear - Delete all your records",
        "",
        "*Other*",
        "/status - Bot status and your usage",
        "/whoami - Show your user ID",
        "/cancel - Exit the current mode",
    ]
    .join("\n")
}

pub fn whoami_text(user_id: i64, authorized: bool) -> String {
    format!(
        "Your user ID: `{user_id}`\nStatus: {}\n\nShare this ID with the admin to request access.",
        if authorized { "✅ Authorized" } else { "❌ Unauthorized" }
    )
}

pub fn unauthorized_text(user_id: i64) -> String {
    format!(
        "You don't have access to this bot.\n\n\
         Your user ID: `{user_id}`\n\n\
         Send this ID to the admin to request access.\n\
         Use /whoami at any time to see your ID."
    )
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::pipeline::{Analysis, IdeaType, RiskLevel};

    fn thought(id: i64, summary: &str) -> Thought {
        Thought {
            id,
            user_id: 1,
            source: "process".into(),
            source_text: "text".into(),
            analysis: Analysis {
                idea_type: IdeaType::Essay,
                novelty_score: 7,
                clarity_score: 4,
                publishable: true,
                risk_level: RiskLevel::Low,
                summary: summary.into(),
                key_points: vec![],
                platform_assessments: vec![],
            },
            recommended_platforms: vec![Platform::X, Platform::Medium],
            failed_platforms: vec![],
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn score_bar_fills_ten_cells() {
        assert_eq!(score_bar(0), "░░░░░░░░░░");
        assert_eq!(score_bar(7), "███████░░░");
        assert_eq!(score_bar(10), "██████████");
        assert_eq!(score_bar(15), "██████████");
    }

    #[test]
    fn analysis_card_lists_platforms_and_id() {
        let card = format_analysis(&thought(12, "Short summary"));
        assert!(card.contains("Novelty: 7/10  ███████░░░"));
        assert!(card.contains("Clarity: 4/10  ████░░░░░░"));
        assert!(card.contains("*X → Medium*"));
        assert!(card.contains("/show 12"));
        assert!(card.contains("Type: `essay`"));
    }

    #[test]
    fn analysis_card_without_platforms() {
        let mut t = thought(1, "s");
        t.recommended_platforms.clear();
        assert!(format_analysis(&t).contains("*N/A*"));
    }

    #[test]
    fn short_output_is_not_truncated() {
        let (text, truncated) = format_platform_output(Platform::X, "hello world", 3);
        assert!(!truncated);
        assert!(text.starts_with(&format!("🐦 *X*\n{}\n", "─".repeat(17))));
        assert!(text.ends_with("hello world"));
    }

    #[test]
    fn long_output_is_truncated_on_a_word() {
        let content = "word ".repeat(1000);
        let (text, truncated) = format_platform_output(Platform::Medium, &content, 9);
        assert!(truncated);
        assert!(text.chars().count() <= MAX_INLINE_CHARS);
        assert!(text.contains("/show 9"));
        let body = text.split("\n\n_(Truncated").next().unwrap();
        assert!(body.ends_with("word"));
    }

    #[test]
    fn truncate_at_word_handles_multibyte() {
        let text = "é".repeat(50);
        assert_eq!(truncate_at_word(&text, 10).chars().count(), 10);
        assert_eq!(truncate_at_word("abc", 10), "abc");
    }

    #[test]
    fn history_truncates_summary() {
        let long = "x".repeat(200);
        let text = format_history(&[thought(5, &long), thought(4, "second")]);
        assert!(text.contains("`#5` 2026-03-01 | `essay` | 7/10"));
        assert!(text.contains(&format!("_{}_", "x".repeat(60))));
        assert!(!text.contains(&"x".repeat(61)));
        assert!(text.find("#5").unwrap() < text.find("#4").unwrap());
    }

    #[test]
    fn history_empty() {
        assert_eq!(format_history(&[]), "No records yet.");
    }

    #[test]
    fn full_record_has_every_output_verbatim() {
        let t = thought(3, "sum");
        let content = "a".repeat(5000);
        let outputs = vec![Output {
            id: 1,
            thought_id: 3,
            platform: Platform::Medium,
            content: content.clone(),
            tokens_used: 10,
            created_at: t.created_at,
        }];
        let messages = format_full_record(&t, &outputs);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("Record #3"));
        assert!(messages[0].contains("Source: `process`"));
        assert!(messages[1].ends_with(&content));
    }

    #[test]
    fn full_record_mentions_failed_platforms() {
        let mut t = thought(3, "sum");
        t.failed_platforms = vec![Platform::Medium];
        let messages = format_full_record(&t, &[]);
        assert!(messages[0].contains("Missing outputs: Medium"));
    }

    #[test]
    fn status_hides_details_for_unauthorized() {
        let view = StatusView {
            provider: "anthropic",
            model: "claude",
            authorized: false,
            mode: Mode::None,
            buffered: 0,
            last_tag: None,
            thought_count: None,
            usage: None,
        };
        let text = format_status(&view);
        assert!(text.contains("❌ Unauthorized"));
        assert!(!text.contains("Mode"));
    }

    #[test]
    fn status_reports_usage() {
        let usage = UsageSummary {
            total_cost: rust_decimal_macros::dec!(0.123456),
            total_input_tokens: 1000,
            total_output_tokens: 200,
            call_count: 3,
        };
        let view = StatusView {
            provider: "openai",
            model: "gpt-4o",
            authorized: true,
            mode: Mode::Process,
            buffered: 2,
            last_tag: Some("launch"),
            thought_count: Some(4),
            usage: Some(&usage),
        };
        let text = format_status(&view);
        assert!(text.contains("`process` (2 buffered)"));
        assert!(text.contains("Last tag: launch"));
        assert!(text.contains("`4`"));
        assert!(text.contains("3 calls"));
        assert!(text.contains("$0.1235"));
    }
}
