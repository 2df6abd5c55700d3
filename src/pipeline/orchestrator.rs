//! Pipeline orchestrator: Analyze → Route → Filter → Rewrite → Persist.
//!
//! Nothing is written until every LLM stage has finished, and the thought
//! plus its outputs are committed in one transaction, so a thought is never
//! visible half-built. A Rewrite failure only removes that platform's output.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::{CompletionResponse, LlmProvider, RetryPolicy};
use crate::pipeline::analyze;
use crate::pipeline::rewrite;
use crate::pipeline::route::{self, RouteTable};
use crate::pipeline::types::{Batch, PipelineRun, RewriteOutput};
use crate::store::{Database, LlmCallRecord, NewThought};

/// Default per-call deadline for LLM stages.
pub const DEFAULT_LLM_DEADLINE: Duration = Duration::from_secs(120);

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound for Analyze and for each Rewrite call, retries included.
    pub llm_deadline: Duration,
    pub retry: RetryPolicy,
    pub route: RouteTable,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm_deadline: DEFAULT_LLM_DEADLINE,
            retry: RetryPolicy::default(),
            route: RouteTable::default(),
        }
    }
}

/// Runs one batch through every stage.
pub struct PipelineOrchestrator {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn Database>,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(llm: Arc<dyn LlmProvider>, store: Arc<dyn Database>, config: PipelineConfig) -> Self {
        Self { llm, store, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline over `batch` for `user_id`.
    ///
    /// Errors mean no thought was saved. Rewrite failures are reported in
    /// [`PipelineRun::failures`] instead.
    pub async fn run(
        &self,
        user_id: i64,
        batch: &Batch,
        style: Option<&str>,
    ) -> Result<PipelineRun, PipelineError> {
        if batch.is_empty() {
            return Err(PipelineError::EmptyBatch {
                source_label: batch.source.describe(),
            });
        }
        let source_text = batch.render();
        info!(
            user_id,
            source = batch.source.as_str(),
            messages = batch.messages.len(),
            "Pipeline started"
        );

        // 1. Analyze
        let deadline = self.config.llm_deadline;
        let (analysis, response) = tokio::time::timeout(
            deadline,
            analyze::analyze(self.llm.as_ref(), &source_text, self.config.retry),
        )
        .await
        .map_err(|_| PipelineError::Timeout {
            stage: "analyze".to_string(),
            after: deadline,
        })??;
        record_usage(self.store.as_ref(), self.llm.as_ref(), user_id, "analyze", &response).await;

        // 2-3. Route and Filter
        let candidates = self
            .config
            .route
            .route(analysis.idea_type, analysis.novelty_score);
        let platforms = route::filter(&candidates, &analysis);
        debug!(
            user_id,
            candidates = ?candidates,
            selected = ?platforms,
            "Platforms routed"
        );

        // 4. Rewrite
        let results = rewrite::rewrite_all(
            self.llm.as_ref(),
            &source_text,
            &analysis,
            &platforms,
            style,
            deadline,
            self.config.retry,
        )
        .await;
        for (output, response) in &results.outputs {
            let purpose = format!("rewrite:{}", output.platform);
            record_usage(self.store.as_ref(), self.llm.as_ref(), user_id, &purpose, response)
                .await;
        }

        // 5. Persist
        let new_thought = NewThought {
            user_id,
            source: batch.source.as_str().to_string(),
            source_text,
            analysis,
            recommended_platforms: platforms,
            failed_platforms: results.failures.iter().map(|f| f.platform).collect(),
        };
        let outputs: Vec<RewriteOutput> = results.outputs.into_iter().map(|(o, _)| o).collect();
        let (thought, outputs) = self.store.save_run(&new_thought, &outputs).await?;

        info!(
            user_id,
            thought_id = thought.id,
            outputs = outputs.len(),
            failed = results.failures.len(),
            "Pipeline finished"
        );
        Ok(PipelineRun {
            thought,
            outputs,
            failures: results.failures,
        })
    }
}

/// Record one LLM call. Failures are logged and otherwise ignored.
pub async fn record_usage(
    store: &dyn Database,
    llm: &dyn LlmProvider,
    user_id: i64,
    purpose: &str,
    response: &CompletionResponse,
) {
    let record = LlmCallRecord {
        user_id,
        provider: llm.provider_name(),
        model: llm.model_name(),
        input_tokens: response.input_tokens,
        output_tokens: response.output_tokens,
        cost: llm.cost_of(response),
        purpose,
    };
    if let Err(e) = store.record_llm_call(&record).await {
        warn!(user_id, purpose, error = %e, "Failed to record LLM usage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionRequest;
    use crate::pipeline::types::{BatchSource, Platform};
    use crate::session::Message;
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    const ANALYSIS: &str = r#"{
        "idea_type": "essay", "novelty_score": 5, "clarity_score": 7,
        "publishable": true, "risk_level": "low",
        "summary": "Writing is thinking.", "key_points": ["Drafts reveal gaps"],
        "platform_assessments": [
            {"platform": "x", "novelty_score": 5, "clarity_score": 7, "publishable": true, "risk_level": "low"},
            {"platform": "medium", "novelty_score": 5, "clarity_score": 7, "publishable": true, "risk_level": "low"}
        ]
    }"#;

    /// Answers Analyze with `analysis` and each rewrite with a platform tag.
    struct ScriptedLlm {
        analysis: String,
        fail_rewrite: Option<&'static str>,
        analyze_delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(analysis: &str) -> Self {
            Self {
                analysis: analysis.to_string(),
                fail_rewrite: None,
                analyze_delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let prompt = request.messages[1].content.clone();
            self.prompts.lock().unwrap().push(prompt.clone());

            let content = if prompt.starts_with("Analyze the content below") {
                tokio::time::sleep(self.analyze_delay).await;
                self.analysis.clone()
            } else {
                let platform = Platform::ALL
                    .into_iter()
                    .find(|p| prompt.ends_with(&format!("Write the {p} version now:")))
                    .expect("rewrite prompt names a platform");
                if self.fail_rewrite == Some(platform.as_str()) {
                    return Err(LlmError::RequestFailed {
                        provider: "scripted".into(),
                        reason: "upstream 500".into(),
                    });
                }
                format!("{platform} version")
            };
            Ok(CompletionResponse {
                content,
                input_tokens: 10,
                output_tokens: 20,
            })
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            llm_deadline: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            route: RouteTable::default(),
        }
    }

    fn batch(texts: &[&str]) -> Batch {
        Batch::new(
            BatchSource::Process,
            texts.iter().map(|t| Message::user(*t)).collect(),
        )
    }

    async fn setup(llm: ScriptedLlm) -> (PipelineOrchestrator, Arc<LibSqlBackend>, Arc<ScriptedLlm>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let llm = Arc::new(llm);
        let orchestrator = PipelineOrchestrator::new(llm.clone(), db.clone(), config());
        (orchestrator, db, llm)
    }

    #[tokio::test]
    async fn full_run_persists_thought_and_outputs() {
        let (orchestrator, db, llm) = setup(ScriptedLlm::new(ANALYSIS)).await;
        let run = orchestrator
            .run(7, &batch(&["first", "second"]), Some("dry"))
            .await
            .unwrap();

        assert!(!run.is_partial());
        assert_eq!(run.thought.source, "process");
        assert_eq!(run.thought.source_text, "first\n\nsecond");
        assert_eq!(
            run.thought.recommended_platforms,
            vec![Platform::X, Platform::Medium]
        );
        let contents: Vec<&str> = run.outputs.iter().map(|o| o.content.as_str()).collect();
        assert_eq!(contents, vec!["x version", "medium version"]);

        let (stored, outputs) = db.get_by_id(7, run.thought.id).await.unwrap();
        assert_eq!(stored, run.thought);
        assert_eq!(outputs, run.outputs);

        // Style reaches every rewrite prompt.
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1..].iter().all(|p| p.contains("User style preference: dry")));

        let usage = db.usage_summary(7).await.unwrap();
        assert_eq!(usage.call_count, 3);
    }

    #[tokio::test]
    async fn rewrite_failure_is_partial_not_fatal() {
        let mut llm = ScriptedLlm::new(ANALYSIS);
        llm.fail_rewrite = Some("medium");
        let (orchestrator, db, _) = setup(llm).await;

        let run = orchestrator.run(1, &batch(&["idea"]), None).await.unwrap();
        assert!(run.is_partial());
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].platform, Platform::Medium);
        assert_eq!(run.thought.failed_platforms, vec![Platform::Medium]);

        let (_, outputs) = db.get_by_id(1, run.thought.id).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].platform, Platform::X);
    }

    #[tokio::test]
    async fn malformed_analysis_fails_without_saving() {
        let (orchestrator, db, llm) = setup(ScriptedLlm::new("not json at all")).await;
        let err = orchestrator.run(1, &batch(&["idea"]), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Analyze(_)));
        assert_eq!(db.count_thoughts(1).await.unwrap(), 0);
        // No rewrite was attempted.
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unpublishable_analysis_saves_without_outputs() {
        let unpublishable = ANALYSIS.replacen("\"publishable\": true", "\"publishable\": false", 1);
        let (orchestrator, db, llm) = setup(ScriptedLlm::new(&unpublishable)).await;

        let run = orchestrator.run(1, &batch(&["idea"]), None).await.unwrap();
        assert!(run.outputs.is_empty());
        assert!(run.thought.recommended_platforms.is_empty());
        assert_eq!(db.count_thoughts(1).await.unwrap(), 1);
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let (orchestrator, _, llm) = setup(ScriptedLlm::new(ANALYSIS)).await;
        let err = orchestrator.run(1, &batch(&[]), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyBatch { .. }));
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn hanging_analyze_times_out() {
        let mut llm = ScriptedLlm::new(ANALYSIS);
        llm.analyze_delay = Duration::from_secs(3600);
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut cfg = config();
        cfg.llm_deadline = Duration::from_millis(50);
        let orchestrator = PipelineOrchestrator::new(Arc::new(llm), db.clone(), cfg);

        let err = orchestrator.run(1, &batch(&["idea"]), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { ref stage, .. } if stage == "analyze"));
        assert_eq!(db.count_thoughts(1).await.unwrap(), 0);
    }
}
