use agents::RequestError;
use thiserror::Error;

use crate::usage::UsageMetrics;

pub const IRRELEVANT_FALLBACK: &str =
    "The article could not be mapped to a specific topic in the exam syllabus.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Relevance,
    Generation,
    Verification,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Relevance => "relevance classification",
            Stage::Generation => "content generation",
            Stage::Verification => "verification",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// Expected outcome for off-syllabus articles, not a fault.
    #[error("article is not relevant to the syllabus: {reason}")]
    Irrelevant { reason: String, usage: UsageMetrics },

    #[error("{stage} failed: {reason}")]
    StageFailed {
        stage: Stage,
        reason: String,
        usage: UsageMetrics,
    },

    /// The consumer went away before `stage` started.
    #[error("run cancelled before {stage}")]
    Cancelled { stage: Stage, usage: UsageMetrics },

    #[error("syllabus reference unavailable: {0:#}")]
    Reference(anyhow::Error),
}

impl PipelineError {
    /// Reason suitable for showing to an end user. Internal details stay in logs.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::InvalidRequest(e) => e.to_string(),
            PipelineError::Irrelevant { reason, .. } => reason.clone(),
            PipelineError::StageFailed { stage, .. } => format!(
                "We could not complete {} for this article. Please try again.",
                stage
            ),
            PipelineError::Cancelled { .. } => "The analysis was cancelled.".to_string(),
            PipelineError::Reference(_) => {
                "The exam syllabus is currently unavailable. Please try again later.".to_string()
            }
        }
    }

    /// Tokens spent before the run terminated, when any stage was called.
    pub fn usage(&self) -> Option<&UsageMetrics> {
        match self {
            PipelineError::Irrelevant { usage, .. }
            | PipelineError::StageFailed { usage, .. }
            | PipelineError::Cancelled { usage, .. } => Some(usage),
            _ => None,
        }
    }
}
