//! Bot command parsing.
//!
//! Channels hand over `/name args...` already split; this maps the name to a
//! [`Command`] and validates arguments.

/// A recognized slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Chat,
    Process,
    Tag { label: Option<String> },
    Analyze,
    Cancel,
    Clear,
    /// `/show <id>`; `None` when the id is missing or not a number.
    Show(Option<i64>),
    History,
    Status,
    Whoami,
    Unknown(String),
}

impl Command {
    /// Parse a command name (without the leading `/`) and its arguments.
    pub fn parse(name: &str, args: &[String]) -> Self {
        match name.to_lowercase().as_str() {
            "start" => Self::Start,
            "help" | "?" => Self::Help,
            "chat" => Self::Chat,
            "process" => Self::Process,
            "tag" => Self::Tag {
                label: parse_label(args),
            },
            "analyze" => Self::Analyze,
            "cancel" => Self::Cancel,
            "clear" => Self::Clear,
            "show" => Self::Show(args.first().and_then(|a| a.trim_start_matches('#').parse().ok())),
            "history" => Self::History,
            "status" => Self::Status,
            "whoami" => Self::Whoami,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether the command requires an allowlisted user.
    pub fn is_gated(&self) -> bool {
        !matches!(
            self,
            Self::Start | Self::Help | Self::Whoami | Self::Status | Self::Unknown(_)
        )
    }
}

/// Join the arguments into a label, dropping one level of surrounding quotes.
fn parse_label(args: &[String]) -> Option<String> {
    let joined = args.join(" ");
    let trimmed = joined.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim();
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn simple_commands() {
        assert_eq!(Command::parse("chat", &[]), Command::Chat);
        assert_eq!(Command::parse("PROCESS", &[]), Command::Process);
        assert_eq!(Command::parse("analyze", &[]), Command::Analyze);
        assert_eq!(Command::parse("whoami", &[]), Command::Whoami);
    }

    #[test]
    fn tag_label_joins_and_unquotes() {
        assert_eq!(
            Command::parse("tag", &args(&["\"weekly", "notes\""])),
            Command::Tag {
                label: Some("weekly notes".into())
            }
        );
        assert_eq!(Command::parse("tag", &[]), Command::Tag { label: None });
        assert_eq!(
            Command::parse("tag", &args(&["\"\""])),
            Command::Tag { label: None }
        );
    }

    #[test]
    fn show_requires_numeric_id() {
        assert_eq!(Command::parse("show", &args(&["42"])), Command::Show(Some(42)));
        assert_eq!(Command::parse("show", &args(&["#7"])), Command::Show(Some(7)));
        assert_eq!(Command::parse("show", &args(&["abc"])), Command::Show(None));
        assert_eq!(Command::parse("show", &[]), Command::Show(None));
    }

    #[test]
    fn unknown_is_preserved() {
        assert_eq!(
            Command::parse("frobnicate", &[]),
            Command::Unknown("frobnicate".into())
        );
    }

    #[test]
    fn gating() {
        assert!(!Command::Start.is_gated());
        assert!(!Command::Help.is_gated());
        assert!(!Command::Whoami.is_gated());
        assert!(!Command::Status.is_gated());
        assert!(Command::Chat.is_gated());
        assert!(Command::Analyze.is_gated());
        assert!(Command::Show(Some(1)).is_gated());
        assert!(Command::Clear.is_gated());
    }
}
