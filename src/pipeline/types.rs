//! Shared types for the content pipeline.

use serde::{Deserialize, Serialize};

use crate::session::{Accumulator, Message};
use crate::store::{Output, Thought};

// ── Platforms ───────────────────────────────────────────────────────

/// Publishing destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    X,
    Medium,
    Substack,
    Reddit,
}

impl Platform {
    pub const ALL: [Platform; 4] = [Self::X, Self::Medium, Self::Substack, Self::Reddit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Medium => "medium",
            Self::Substack => "substack",
            Self::Reddit => "reddit",
        }
    }

    /// Human-facing name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::X => "X",
            Self::Medium => "Medium",
            Self::Substack => "Substack",
            Self::Reddit => "Reddit",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::X => "🐦",
            Self::Medium => "📝",
            Self::Substack => "📧",
            Self::Reddit => "🤖",
        }
    }

    /// Article-length platforms get a larger rewrite budget.
    pub fn is_long_form(&self) -> bool {
        matches!(self, Self::Medium | Self::Substack)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "x" | "twitter" => Ok(Self::X),
            "medium" => Ok(Self::Medium),
            "substack" => Ok(Self::Substack),
            "reddit" => Ok(Self::Reddit),
            other => Err(format!("unknown platform: '{other}'")),
        }
    }
}

// ── Analysis ────────────────────────────────────────────────────────

/// Kind of idea, as classified by Analyze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdeaType {
    Opinion,
    Analysis,
    Essay,
    Tutorial,
    Story,
    Thread,
    News,
}

impl IdeaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opinion => "opinion",
            Self::Analysis => "analysis",
            Self::Essay => "essay",
            Self::Tutorial => "tutorial",
            Self::Story => "story",
            Self::Thread => "thread",
            Self::News => "news",
        }
    }
}

impl std::fmt::Display for IdeaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IdeaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "opinion" => Ok(Self::Opinion),
            "analysis" => Ok(Self::Analysis),
            "essay" => Ok(Self::Essay),
            "tutorial" => Ok(Self::Tutorial),
            "story" => Ok(Self::Story),
            "thread" => Ok(Self::Thread),
            "news" => Ok(Self::News),
            other => Err(format!("unknown idea type: '{other}'")),
        }
    }
}

/// Publishing risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown risk level: '{other}'")),
        }
    }
}

/// Per-platform verdict from Analyze.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformAssessment {
    pub platform: Platform,
    pub novelty_score: u8,
    pub clarity_score: u8,
    pub publishable: bool,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

/// Validated output of the Analyze stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub idea_type: IdeaType,
    pub novelty_score: u8,
    pub clarity_score: u8,
    pub publishable: bool,
    pub risk_level: RiskLevel,
    pub summary: String,
    pub key_points: Vec<String>,
    /// At most one entry per platform, in [`Platform::ALL`] order.
    pub platform_assessments: Vec<PlatformAssessment>,
}

impl Analysis {
    pub fn assessment(&self, platform: Platform) -> Option<&PlatformAssessment> {
        self.platform_assessments
            .iter()
            .find(|a| a.platform == platform)
    }

    /// Platform-specific summary, falling back to the global one.
    pub fn summary_for(&self, platform: Platform) -> &str {
        self.assessment(platform)
            .map(|a| a.summary.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.summary)
    }

    /// Platform-specific key points, falling back to the global ones.
    pub fn key_points_for(&self, platform: Platform) -> &[String] {
        match self.assessment(platform) {
            Some(a) if !a.key_points.is_empty() => &a.key_points,
            _ => &self.key_points,
        }
    }
}

// ── Batches ─────────────────────────────────────────────────────────

/// Where a batch came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSource {
    /// Live Chat-mode buffer.
    Chat,
    /// Live Process-mode buffer.
    Process,
    /// Stored messages after a tag.
    Tag { label: Option<String> },
    /// Stored messages from the current UTC day (no tag placed).
    Today,
}

impl BatchSource {
    /// Stored in `thoughts.source`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Process => "process",
            Self::Tag { .. } => "tag",
            Self::Today => "today",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Chat => "chat session".to_string(),
            Self::Process => "process session".to_string(),
            Self::Tag { label: Some(label) } => format!("messages since tag '{label}'"),
            Self::Tag { label: None } => "messages since last tag".to_string(),
            Self::Today => "today's messages".to_string(),
        }
    }
}

/// Finalized input of one pipeline run.
#[derive(Debug, Clone)]
pub struct Batch {
    pub source: BatchSource,
    pub messages: Vec<Message>,
}

impl Batch {
    pub fn new(source: BatchSource, messages: Vec<Message>) -> Self {
        Self { source, messages }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.iter().all(|m| m.text.trim().is_empty())
    }

    /// Text handed to Analyze and Rewrite.
    pub fn render(&self) -> String {
        Accumulator::render(&self.messages)
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// A successful rewrite, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutput {
    pub platform: Platform,
    pub content: String,
    pub tokens_used: u32,
}

/// A platform whose rewrite did not produce content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteFailure {
    pub platform: Platform,
    pub reason: String,
}

/// Outcome of a completed run. Failures here are partial, never fatal.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub thought: Thought,
    pub outputs: Vec<Output>,
    pub failures: Vec<RewriteFailure>,
}

impl PipelineRun {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis() -> Analysis {
        Analysis {
            idea_type: IdeaType::Essay,
            novelty_score: 7,
            clarity_score: 6,
            publishable: true,
            risk_level: RiskLevel::Low,
            summary: "global summary".into(),
            key_points: vec!["global point".into()],
            platform_assessments: vec![PlatformAssessment {
                platform: Platform::Medium,
                novelty_score: 7,
                clarity_score: 6,
                publishable: true,
                risk_level: RiskLevel::Low,
                summary: "medium angle".into(),
                key_points: vec![],
                reason: String::new(),
            }],
        }
    }

    #[test]
    fn platform_parse_and_display() {
        assert_eq!("Twitter".parse::<Platform>().unwrap(), Platform::X);
        assert_eq!(" substack ".parse::<Platform>().unwrap(), Platform::Substack);
        assert!("tiktok".parse::<Platform>().is_err());
        assert_eq!(Platform::Reddit.to_string(), "reddit");
        assert_eq!(Platform::X.display_name(), "X");
        assert!(Platform::Medium.is_long_form());
        assert!(!Platform::X.is_long_form());
    }

    #[test]
    fn platform_serde_is_lowercase() {
        let json = serde_json::to_string(&Platform::Substack).unwrap();
        assert_eq!(json, "\"substack\"");
    }

    #[test]
    fn assessment_fallbacks() {
        let a = analysis();
        assert_eq!(a.summary_for(Platform::Medium), "medium angle");
        assert_eq!(a.summary_for(Platform::X), "global summary");
        // Empty platform key points fall back too.
        assert_eq!(a.key_points_for(Platform::Medium), ["global point".to_string()]);
    }

    #[test]
    fn batch_render_and_empty() {
        let batch = Batch::new(
            BatchSource::Process,
            vec![Message::user("one"), Message::user("two")],
        );
        assert!(!batch.is_empty());
        assert_eq!(batch.render(), "one\n\ntwo");
        assert!(Batch::new(BatchSource::Today, vec![]).is_empty());
    }

    #[test]
    fn batch_source_labels() {
        assert_eq!(BatchSource::Tag { label: None }.as_str(), "tag");
        assert_eq!(
            BatchSource::Tag {
                label: Some("foo".into())
            }
            .describe(),
            "messages since tag 'foo'"
        );
    }
}
