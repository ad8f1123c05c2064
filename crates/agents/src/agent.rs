use anyhow::{Context, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{GenerativeBackend, TokenUsage};
use crate::prompt::{PromptTemplate, VERIFY_INSTRUCTION};
use crate::schema::{AnalysisRequest, RelevanceAssessment, StructuredAnalysis};
use syllabus::SyllabusReference;

static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][A-Za-z0-9_-]*(\s[^<>]*)?>").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Error)]
#[error("contract violation: {0}")]
pub struct ContractViolation(pub String);

fn violation(message: impl Into<String>) -> Result<(), ContractViolation> {
    Err(ContractViolation(message.into()))
}

/// Structural checks applied to every record crossing an agent boundary.
pub trait Contract {
    fn check(&self) -> Result<(), ContractViolation>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevanceInput {
    #[serde(flatten)]
    pub request: AnalysisRequest,
    pub prelims_syllabus: String,
    pub mains_syllabus: String,
}

impl RelevanceInput {
    pub fn new(request: &AnalysisRequest, syllabus: &SyllabusReference) -> Self {
        Self {
            request: request.clone(),
            prelims_syllabus: syllabus.prelims_text.clone(),
            mains_syllabus: syllabus.mains_text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInput {
    #[serde(flatten)]
    pub request: AnalysisRequest,
    pub prelims_syllabus: String,
    pub mains_syllabus: String,
    pub syllabus_topic: String,
}

impl GenerationInput {
    pub fn new(request: &AnalysisRequest, syllabus: &SyllabusReference, topic: &str) -> Self {
        Self {
            request: request.clone(),
            prelims_syllabus: syllabus.prelims_text.clone(),
            mains_syllabus: syllabus.mains_text.clone(),
            syllabus_topic: topic.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationInput {
    #[serde(flatten)]
    pub request: AnalysisRequest,
    pub draft_analysis: StructuredAnalysis,
    pub instruction: String,
}

impl VerificationInput {
    pub fn new(request: &AnalysisRequest, draft: &StructuredAnalysis) -> Self {
        Self {
            request: request.clone(),
            draft_analysis: draft.clone(),
            instruction: VERIFY_INSTRUCTION.to_string(),
        }
    }
}

/// Content generator output, prior to verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftAnalysis(pub StructuredAnalysis);

/// Verification editor output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerifiedAnalysis(pub StructuredAnalysis);

impl Contract for RelevanceInput {
    fn check(&self) -> Result<(), ContractViolation> {
        if self.request.source_text.trim().is_empty() {
            return violation("sourceText is empty");
        }
        if self.prelims_syllabus.trim().is_empty() || self.mains_syllabus.trim().is_empty() {
            return violation("syllabus reference is empty");
        }
        Ok(())
    }
}

impl Contract for GenerationInput {
    fn check(&self) -> Result<(), ContractViolation> {
        if self.request.source_text.trim().is_empty() {
            return violation("sourceText is empty");
        }
        if self.syllabus_topic.trim().is_empty() {
            return violation("syllabusTopic is empty");
        }
        Ok(())
    }
}

impl Contract for VerificationInput {
    fn check(&self) -> Result<(), ContractViolation> {
        if self.instruction.trim().is_empty() {
            return violation("instruction is empty");
        }
        DraftAnalysis(self.draft_analysis.clone()).check()
    }
}

impl Contract for RelevanceAssessment {
    fn check(&self) -> Result<(), ContractViolation> {
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return violation(format!(
                "confidenceScore {} outside [0, 1]",
                self.confidence_score
            ));
        }
        Ok(())
    }
}

fn check_difficulty(kind: &str, index: usize, difficulty: Option<u8>) -> Result<(), ContractViolation> {
    match difficulty {
        Some(d) if !(1..=10).contains(&d) => {
            violation(format!("{} {} difficulty {} outside 1-10", kind, index + 1, d))
        }
        _ => Ok(()),
    }
}

impl Contract for DraftAnalysis {
    fn check(&self) -> Result<(), ContractViolation> {
        if self.0.prelims.mcqs.is_empty() {
            return violation("draft has no mcqs");
        }
        for (i, mcq) in self.0.prelims.mcqs.iter().enumerate() {
            if mcq.question.trim().is_empty() {
                return violation(format!("mcq {} has an empty question", i + 1));
            }
            if mcq.options.len() < 2 {
                return violation(format!("mcq {} has fewer than two options", i + 1));
            }
            check_difficulty("mcq", i, mcq.difficulty)?;
        }
        for (i, question) in self.0.mains_questions().iter().enumerate() {
            if question.question.trim().is_empty() {
                return violation(format!("mains question {} is empty", i + 1));
            }
        }
        Ok(())
    }
}

impl Contract for VerifiedAnalysis {
    fn check(&self) -> Result<(), ContractViolation> {
        let analysis = &self.0;
        DraftAnalysis(analysis.clone()).check()?;

        for (i, question) in analysis.mains_questions().iter().enumerate() {
            check_difficulty("mains question", i, question.difficulty)?;
        }
        if let Some(score) = analysis.quality_score {
            if !(0.0..=1.0).contains(&score) {
                return violation(format!("qualityScore {} outside [0, 1]", score));
            }
        }
        if let Some(summary) = analysis.non_empty_summary() {
            if MARKUP_TAG.is_match(summary) {
                return violation("summary contains markup");
            }
        }
        if let Some(graph) = &analysis.knowledge_graph {
            for edge in &graph.edges {
                let len = edge.label.trim().chars().count();
                if !(3..=40).contains(&len) {
                    return violation(format!("edge label '{}' must be 3-40 characters", edge.label));
                }
            }
        }
        Ok(())
    }
}

/// Result of one stage call. `output: None` is a stage failure, distinct from
/// an `Err` raised by the backend.
#[derive(Debug, Clone)]
pub struct StageOutcome<O> {
    pub output: Option<O>,
    pub usage: Option<TokenUsage>,
}

/// One typed step of the pipeline, bound to a prompt template.
pub struct StageAgent<I, O> {
    template: PromptTemplate,
    backend: Arc<dyn GenerativeBackend>,
    _contract: PhantomData<fn(I) -> O>,
}

impl<I, O> StageAgent<I, O>
where
    I: Serialize + Contract + Sync,
    O: DeserializeOwned + Contract + Send,
{
    pub fn new(template: PromptTemplate, backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            template,
            backend,
            _contract: PhantomData,
        }
    }

    /// Validate `input`, call the backend, and decode plus validate its output.
    pub async fn invoke(&self, input: &I) -> Result<StageOutcome<O>> {
        input
            .check()
            .with_context(|| format!("{} input rejected", self.template))?;

        let payload = serde_json::to_value(input)
            .with_context(|| format!("Failed to serialize {} input", self.template))?;

        let response = self.backend.invoke(self.template, &payload).await?;
        debug!(
            template = self.template.id(),
            backend = self.backend.name(),
            has_output = response.output.is_some(),
            "Stage call returned"
        );

        let output = response.output.and_then(|value| {
            match serde_json::from_value::<O>(value) {
                Ok(decoded) => match decoded.check() {
                    Ok(()) => Some(decoded),
                    Err(e) => {
                        warn!(template = self.template.id(), error = %e, "Stage output rejected");
                        None
                    }
                },
                Err(e) => {
                    warn!(template = self.template.id(), error = %e, "Stage output failed to decode");
                    None
                }
            }
        });

        Ok(StageOutcome {
            output,
            usage: response.usage,
        })
    }
}

pub type RelevanceClassifier = StageAgent<RelevanceInput, RelevanceAssessment>;
pub type ContentGenerator = StageAgent<GenerationInput, DraftAnalysis>;
pub type VerificationEditor = StageAgent<VerificationInput, VerifiedAnalysis>;

/// The three agents of the pipeline, sharing one backend.
pub struct StageAgents {
    pub classifier: RelevanceClassifier,
    pub generator: ContentGenerator,
    pub editor: VerificationEditor,
}

impl StageAgents {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            classifier: StageAgent::new(PromptTemplate::RelevanceClassifier, Arc::clone(&backend)),
            generator: StageAgent::new(PromptTemplate::ContentGenerator, Arc::clone(&backend)),
            editor: StageAgent::new(PromptTemplate::VerificationEditor, backend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockReply};
    use serde_json::json;

    fn syllabus() -> SyllabusReference {
        SyllabusReference {
            prelims_text: "Economic and Social Development".to_string(),
            mains_text: "GS-III: Indian Economy".to_string(),
        }
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::new("The RBI kept the repo rate unchanged at 6.5%.", "economy")
    }

    #[tokio::test]
    async fn test_classifier_decodes_assessment() {
        let backend = Arc::new(MockBackend::new().reply(
            PromptTemplate::RelevanceClassifier,
            MockReply::output_with_usage(
                json!({"isRelevant": true, "syllabusTopic": "Monetary policy", "confidenceScore": 0.92}),
                120,
                30,
            ),
        ));
        let agents = StageAgents::new(backend.clone());

        let outcome = agents
            .classifier
            .invoke(&RelevanceInput::new(&request(), &syllabus()))
            .await
            .unwrap();

        let assessment = outcome.output.unwrap();
        assert_eq!(assessment.accepted_topic(), Some("Monetary policy"));
        assert_eq!(outcome.usage, Some(TokenUsage::new(120, 30)));

        // The request is flattened into the payload next to the syllabus
        let sent = backend.inputs_for(PromptTemplate::RelevanceClassifier);
        assert_eq!(sent[0]["analysisFocus"], "economy");
        assert_eq!(sent[0]["mainsSyllabus"], "GS-III: Indian Economy");
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_is_a_stage_failure() {
        let backend = Arc::new(MockBackend::new().reply(
            PromptTemplate::RelevanceClassifier,
            MockReply::output_with_usage(json!({"isRelevant": true, "confidenceScore": 7}), 10, 2),
        ));
        let agents = StageAgents::new(backend);

        let outcome = agents
            .classifier
            .invoke(&RelevanceInput::new(&request(), &syllabus()))
            .await
            .unwrap();

        assert!(outcome.output.is_none());
        assert_eq!(outcome.usage, Some(TokenUsage::new(10, 2)));
    }

    #[tokio::test]
    async fn test_malformed_output_is_a_stage_failure() {
        let backend = Arc::new(MockBackend::new().reply(
            PromptTemplate::ContentGenerator,
            MockReply::output(json!({"prelims": "not a list"})),
        ));
        let agents = StageAgents::new(backend);

        let outcome = agents
            .generator
            .invoke(&GenerationInput::new(&request(), &syllabus(), "Monetary policy"))
            .await
            .unwrap();

        assert!(outcome.output.is_none());
    }

    #[tokio::test]
    async fn test_empty_topic_is_rejected_before_backend_call() {
        let backend = Arc::new(MockBackend::new());
        let agents = StageAgents::new(backend.clone());

        let result = agents
            .generator
            .invoke(&GenerationInput::new(&request(), &syllabus(), " "))
            .await;

        assert!(result.is_err());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let backend = Arc::new(MockBackend::new().reply(
            PromptTemplate::RelevanceClassifier,
            MockReply::Error("connection refused".to_string()),
        ));
        let agents = StageAgents::new(backend);

        let result = agents
            .classifier
            .invoke(&RelevanceInput::new(&request(), &syllabus()))
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_verified_contract_rejects_markup_in_summary() {
        let mut analysis: StructuredAnalysis = serde_json::from_value(json!({
            "prelims": {"mcqs": [{"question": "Who chairs the MPC?", "options": [
                {"text": "RBI Governor", "correct": true}, {"text": "Finance Minister"}]}]}
        }))
        .unwrap();
        analysis.summary = Some("<mcq question=\"x\">".to_string());
        assert!(DraftAnalysis(analysis.clone()).check().is_ok());
        assert!(VerifiedAnalysis(analysis).check().is_err());
    }

    #[test]
    fn test_verified_contract_checks_quality_and_edges() {
        let mut analysis: StructuredAnalysis = serde_json::from_value(json!({
            "prelims": {"mcqs": [{"question": "Q", "options": [
                {"text": "a", "correct": true}, {"text": "b"}]}]},
            "knowledgeGraph": {
                "nodes": [
                    {"id": "a", "label": "A", "type": "Policy"},
                    {"id": "b", "label": "B", "type": "Date"}
                ],
                "edges": [{"source": "a", "target": "b", "label": "on"}]
            },
            "qualityScore": 0.7
        }))
        .unwrap();
        assert!(VerifiedAnalysis(analysis.clone()).check().is_err());

        analysis.knowledge_graph.as_mut().unwrap().edges[0].label = "enacted on".to_string();
        assert!(VerifiedAnalysis(analysis.clone()).check().is_ok());

        analysis.quality_score = Some(1.5);
        assert!(VerifiedAnalysis(analysis).check().is_err());
    }

    #[test]
    fn test_draft_contract_checks_difficulty_range() {
        let analysis: StructuredAnalysis = serde_json::from_value(json!({
            "prelims": {"mcqs": [{
                "question": "Q",
                "difficulty": 11,
                "options": [{"text": "a", "correct": true}, {"text": "b"}]
            }]}
        }))
        .unwrap();
        assert!(DraftAnalysis(analysis).check().is_err());
    }

    #[tokio::test]
    async fn test_draft_without_mcqs_is_a_stage_failure() {
        let backend = Arc::new(MockBackend::new().reply(
            PromptTemplate::ContentGenerator,
            MockReply::output_with_usage(json!({"summary": "s", "prelims": {"mcqs": []}}), 900, 20),
        ));
        let agents = StageAgents::new(backend);

        let outcome = agents
            .generator
            .invoke(&GenerationInput::new(&request(), &syllabus(), "Monetary policy"))
            .await
            .unwrap();

        assert!(outcome.output.is_none());
        assert_eq!(outcome.usage, Some(TokenUsage::new(900, 20)));
    }
}
