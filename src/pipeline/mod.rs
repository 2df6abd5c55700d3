//! Content pipeline.
//!
//! Every analyzed batch flows through:
//! 1. `analyze`: one LLM call, strictly parsed into an `Analysis`
//! 2. `route`: idea type and novelty pick candidate platforms (no LLM)
//! 3. `filter`: candidates Analyze marked publishable
//! 4. `rewrite`: one concurrent LLM call per platform, failures collected
//! 5. persist: thought and outputs committed together
//!
//! [`PipelineOrchestrator`] sequences the stages.

pub mod analyze;
pub mod orchestrator;
pub mod prompts;
pub mod rewrite;
pub mod route;
pub mod types;

pub use orchestrator::{PipelineConfig, PipelineOrchestrator, record_usage};
pub use route::RouteTable;
pub use types::{
    Analysis, Batch, BatchSource, IdeaType, PipelineRun, Platform, PlatformAssessment,
    RewriteFailure, RewriteOutput, RiskLevel,
};
