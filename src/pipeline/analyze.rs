//! Analyze stage: one LLM call returning a strictly validated [`Analysis`].

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::llm::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, RetryPolicy, with_retry,
};
use crate::pipeline::prompts;
use crate::pipeline::types::{Analysis, IdeaType, Platform, PlatformAssessment, RiskLevel};

/// Max tokens for the analysis call.
pub const ANALYZE_MAX_TOKENS: u32 = 1024;

/// Low temperature keeps scores stable across runs.
pub const ANALYZE_TEMPERATURE: f32 = 0.2;

const MAX_SCORE: f64 = 10.0;

pub fn build_request(source_text: &str) -> CompletionRequest {
    CompletionRequest::new(vec![
        ChatMessage::system(prompts::analyze_system_prompt()),
        ChatMessage::user(prompts::analyze_user_prompt(source_text)),
    ])
    .with_temperature(ANALYZE_TEMPERATURE)
    .with_max_tokens(ANALYZE_MAX_TOKENS)
}

/// Run the call and parse its output. Transient LLM errors are retried;
/// any parse problem fails the stage.
pub async fn analyze(
    llm: &dyn LlmProvider,
    source_text: &str,
    retry: RetryPolicy,
) -> Result<(Analysis, CompletionResponse), PipelineError> {
    let request = build_request(source_text);
    let response = with_retry(retry, || llm.complete(request.clone())).await?;
    let analysis = parse_analysis(&response.content).map_err(|e| {
        warn!(raw_response = %response.content, error = %e, "Unparseable analysis");
        PipelineError::Analyze(e)
    })?;
    debug!(
        idea_type = %analysis.idea_type,
        novelty = analysis.novelty_score,
        publishable = analysis.publishable,
        "Analysis parsed"
    );
    Ok((analysis, response))
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    idea_type: String,
    novelty_score: f64,
    clarity_score: f64,
    publishable: bool,
    risk_level: String,
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    platform_assessments: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    platform: String,
    novelty_score: f64,
    clarity_score: f64,
    publishable: bool,
    risk_level: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    reason: String,
}

/// Parse and validate the model's JSON.
pub fn parse_analysis(raw: &str) -> Result<Analysis, String> {
    let json_str = extract_json_object(raw);
    let parsed: RawAnalysis =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let idea_type: IdeaType = parsed.idea_type.parse()?;
    let risk_level: RiskLevel = parsed.risk_level.parse()?;
    let novelty_score = score("novelty_score", parsed.novelty_score)?;
    let clarity_score = score("clarity_score", parsed.clarity_score)?;
    let summary = parsed.summary.trim().to_string();
    if summary.is_empty() {
        return Err("summary is empty".into());
    }

    let mut platform_assessments: Vec<PlatformAssessment> = parsed
        .platform_assessments
        .into_iter()
        .filter_map(parse_assessment)
        .collect();
    platform_assessments.sort_by_key(|a| a.platform);
    platform_assessments.dedup_by_key(|a| a.platform);

    Ok(Analysis {
        idea_type,
        novelty_score,
        clarity_score,
        publishable: parsed.publishable,
        risk_level,
        summary,
        key_points: clean_points(parsed.key_points),
        platform_assessments,
    })
}

/// Invalid or unknown-platform entries are dropped; the platform then counts
/// as not publishable.
fn parse_assessment(value: serde_json::Value) -> Option<PlatformAssessment> {
    let raw: RawAssessment = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Skipping malformed platform assessment");
            return None;
        }
    };
    let platform: Platform = match raw.platform.parse() {
        Ok(p) => p,
        Err(_) => {
            debug!(platform = %raw.platform, "Ignoring assessment for unknown platform");
            return None;
        }
    };
    match validate_assessment(platform, raw) {
        Ok(a) => Some(a),
        Err(e) => {
            warn!(%platform, error = %e, "Skipping invalid platform assessment");
            None
        }
    }
}

fn validate_assessment(platform: Platform, raw: RawAssessment) -> Result<PlatformAssessment, String> {
    Ok(PlatformAssessment {
        platform,
        novelty_score: score("novelty_score", raw.novelty_score)?,
        clarity_score: score("clarity_score", raw.clarity_score)?,
        publishable: raw.publishable,
        risk_level: raw.risk_level.parse()?,
        summary: raw.summary.trim().to_string(),
        key_points: clean_points(raw.key_points),
        reason: raw.reason.trim().to_string(),
    })
}

fn score(field: &str, value: f64) -> Result<u8, String> {
    if !value.is_finite() || !(0.0..=MAX_SCORE).contains(&value) {
        return Err(format!("{field} out of range: {value}"));
    }
    Ok(value.round() as u8)
}

fn clean_points(points: Vec<String>) -> Vec<String> {
    points
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
