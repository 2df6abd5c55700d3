//! Rewrite stage: one independent LLM call per platform.
//!
//! Calls run concurrently. Each is bounded by the per-call deadline and
//! retried on transient errors; a failure is collected, never propagated,
//! so siblings always finish.

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, RetryPolicy, with_retry,
};
use crate::pipeline::prompts;
use crate::pipeline::types::{Analysis, Platform, RewriteFailure, RewriteOutput};

/// Max tokens for article-length platforms.
pub const LONG_FORM_MAX_TOKENS: u32 = 2048;

/// Max tokens for everything else.
pub const SHORT_FORM_MAX_TOKENS: u32 = 512;

pub const REWRITE_TEMPERATURE: f32 = 0.7;

/// Successful rewrites (with their raw responses, for usage accounting) and
/// failures, both in input platform order.
#[derive(Debug, Default)]
pub struct RewriteResults {
    pub outputs: Vec<(RewriteOutput, CompletionResponse)>,
    pub failures: Vec<RewriteFailure>,
}

pub fn build_request(
    source_text: &str,
    platform: Platform,
    analysis: &Analysis,
    style: Option<&str>,
) -> CompletionRequest {
    let max_tokens = if platform.is_long_form() {
        LONG_FORM_MAX_TOKENS
    } else {
        SHORT_FORM_MAX_TOKENS
    };
    CompletionRequest::new(vec![
        ChatMessage::system(prompts::rewrite_system_prompt()),
        ChatMessage::user(prompts::rewrite_user_prompt(
            source_text,
            platform,
            analysis,
            style,
        )),
    ])
    .with_temperature(REWRITE_TEMPERATURE)
    .with_max_tokens(max_tokens)
}

/// Rewrite for every platform concurrently.
pub async fn rewrite_all(
    llm: &dyn LlmProvider,
    source_text: &str,
    analysis: &Analysis,
    platforms: &[Platform],
    style: Option<&str>,
    deadline: Duration,
    retry: RetryPolicy,
) -> RewriteResults {
    let calls = platforms.iter().map(|&platform| async move {
        let request = build_request(source_text, platform, analysis, style);
        let result = rewrite_one(llm, platform, request, deadline, retry).await;
        (platform, result)
    });

    let mut results = RewriteResults::default();
    for (platform, result) in join_all(calls).await {
        match result {
            Ok(response) => {
                debug!(%platform, tokens = response.output_tokens, "Rewrite finished");
                let output = RewriteOutput {
                    platform,
                    content: response.content.trim().to_string(),
                    tokens_used: response.total_tokens(),
                };
                results.outputs.push((output, response));
            }
            Err(reason) => {
                warn!(%platform, %reason, "Rewrite failed");
                results.failures.push(RewriteFailure { platform, reason });
            }
        }
    }
    results
}

async fn rewrite_one(
    llm: &dyn LlmProvider,
    platform: Platform,
    request: CompletionRequest,
    deadline: Duration,
    retry: RetryPolicy,
) -> Result<CompletionResponse, String> {
    let call = with_retry(retry, || llm.complete(request.clone()));
    let response = match tokio::time::timeout(deadline, call).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(describe(&e)),
        Err(_) => return Err(format!("timed out after {}s", deadline.as_secs())),
    };
    if response.content.trim().is_empty() {
        return Err(format!("empty {platform} rewrite"));
    }
    Ok(response)
}

fn describe(error: &LlmError) -> String {
    match error {
        LlmError::RateLimited { .. } => "provider rate limited".to_string(),
        LlmError::AuthFailed { .. } => "provider authentication failed".to_string(),
        other => other.to_string(),
    }
}
