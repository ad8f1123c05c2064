use agents::{
    AnalysisRequest, GenerationInput, GenerativeBackend, GraphSanitizer, RelevanceInput,
    RequestLimits, StageAgents, StructuredAnalysis, VerificationInput,
};
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use syllabus::SyllabusCache;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{IRRELEVANT_FALLBACK, PipelineError, Stage};
use crate::stream::{StreamChunk, emit_chunks};
use crate::usage::{Pricing, UsageAccountant, UsageMetrics};

const CHUNK_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    RelevanceChecked,
    IrrelevantTerminal,
    Generating,
    GenerationFailedTerminal,
    Verifying,
    Verified,
    VerificationFailedFallback,
    Cancelled,
    Streaming,
    Done,
}

/// A completed analysis, verified or fallen back to the generator draft.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub analysis: StructuredAnalysis,
    pub syllabus_topic: String,
    pub usage: UsageMetrics,
    /// False when the editor produced nothing and the draft was used as-is.
    pub verified: bool,
}

struct RunTracker {
    run_id: Uuid,
    state: PipelineState,
    accountant: UsageAccountant,
}

impl RunTracker {
    fn new(pricing: Pricing) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: PipelineState::Init,
            accountant: UsageAccountant::new(pricing),
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(run_id = %self.run_id, from = ?self.state, to = ?next, "Pipeline transition");
        self.state = next;
    }

    fn irrelevant(&mut self, reason: String) -> PipelineError {
        self.advance(PipelineState::IrrelevantTerminal);
        info!(run_id = %self.run_id, reason = %reason, "Article rejected as irrelevant");
        PipelineError::Irrelevant {
            reason,
            usage: self.accountant.metrics(),
        }
    }

    fn generation_failed(&mut self, reason: String) -> PipelineError {
        self.advance(PipelineState::GenerationFailedTerminal);
        warn!(run_id = %self.run_id, reason = %reason, "Content generation failed");
        PipelineError::StageFailed {
            stage: Stage::Generation,
            reason,
            usage: self.accountant.metrics(),
        }
    }

    fn cancelled(&mut self, stage: Stage) -> PipelineError {
        self.advance(PipelineState::Cancelled);
        info!(run_id = %self.run_id, stage = %stage, "Consumer went away, skipping remaining stages");
        PipelineError::Cancelled {
            stage,
            usage: self.accountant.metrics(),
        }
    }
}

/// Sequences the three stage agents for one request at a time.
pub struct Pipeline {
    agents: StageAgents,
    syllabus: Arc<SyllabusCache>,
    pricing: Pricing,
    limits: RequestLimits,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        syllabus: Arc<SyllabusCache>,
        pricing: Pricing,
        limits: RequestLimits,
    ) -> Self {
        Self {
            agents: StageAgents::new(backend),
            syllabus,
            pricing,
            limits,
        }
    }

    pub fn syllabus(&self) -> &SyllabusCache {
        &self.syllabus
    }

    /// Run classification, generation and verification to completion.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<PipelineRun, PipelineError> {
        self.execute(request, || false).await
    }

    /// `cancelled` is checked before every stage call. Once it returns true no
    /// further backend call is made.
    async fn execute<C>(
        &self,
        request: &AnalysisRequest,
        cancelled: C,
    ) -> Result<PipelineRun, PipelineError>
    where
        C: Fn() -> bool,
    {
        request.validate(&self.limits)?;
        let syllabus = self
            .syllabus
            .get_syllabus_content()
            .await
            .map_err(PipelineError::Reference)?;

        let started = Instant::now();
        let mut run = RunTracker::new(self.pricing);
        info!(
            run_id = %run.run_id,
            exam_type = %request.exam_type,
            focus = %request.analysis_focus,
            source_chars = request.source_text.len(),
            "Starting analysis"
        );

        // Stage 1: relevance
        if cancelled() {
            return Err(run.cancelled(Stage::Relevance));
        }
        let assessment = match self
            .agents
            .classifier
            .invoke(&RelevanceInput::new(request, &syllabus))
            .await
        {
            Ok(outcome) => {
                run.accountant.record(outcome.usage);
                outcome.output
            }
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Relevance classifier call failed");
                None
            }
        };
        run.advance(PipelineState::RelevanceChecked);

        let Some(assessment) = assessment else {
            return Err(run.irrelevant(IRRELEVANT_FALLBACK.to_string()));
        };
        let topic = assessment.accepted_topic().map(str::to_string);
        let Some(topic) = topic else {
            let reason = assessment
                .reasoning
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| IRRELEVANT_FALLBACK.to_string());
            return Err(run.irrelevant(reason));
        };
        info!(
            run_id = %run.run_id,
            topic = %topic,
            confidence = assessment.confidence_score,
            "Article mapped to syllabus topic"
        );

        // Stage 2: generation
        if cancelled() {
            return Err(run.cancelled(Stage::Generation));
        }
        run.advance(PipelineState::Generating);
        let draft = match self
            .agents
            .generator
            .invoke(&GenerationInput::new(request, &syllabus, &topic))
            .await
        {
            Ok(outcome) => {
                run.accountant.record(outcome.usage);
                match outcome.output {
                    Some(draft) => draft.0,
                    None => {
                        return Err(run.generation_failed(
                            "backend returned no usable output".to_string(),
                        ));
                    }
                }
            }
            Err(e) => return Err(run.generation_failed(format!("{:#}", e))),
        };
        debug!(
            run_id = %run.run_id,
            mcqs = draft.prelims.mcqs.len(),
            mains = draft.mains_questions().len(),
            "Draft generated"
        );

        // Stage 3: verification, falling back to the draft
        if cancelled() {
            return Err(run.cancelled(Stage::Verification));
        }
        run.advance(PipelineState::Verifying);
        let verified = match self
            .agents
            .editor
            .invoke(&VerificationInput::new(request, &draft))
            .await
        {
            Ok(outcome) => {
                run.accountant.record(outcome.usage);
                outcome.output.map(|v| v.0)
            }
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Verification editor call failed");
                None
            }
        };

        let (analysis, is_verified) = match verified {
            Some(analysis) => {
                run.advance(PipelineState::Verified);
                (finalize_verified(analysis, &topic), true)
            }
            None => {
                run.advance(PipelineState::VerificationFailedFallback);
                warn!(run_id = %run.run_id, "Verification produced no output, using unverified draft");
                (draft, false)
            }
        };

        let usage = run.accountant.metrics();
        info!(
            run_id = %run.run_id,
            verified = is_verified,
            questions = analysis.total_questions(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost = usage.cost,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis complete"
        );

        Ok(PipelineRun {
            run_id: run.run_id,
            analysis,
            syllabus_topic: topic,
            usage,
            verified: is_verified,
        })
    }

    /// Run the pipeline on a background task and yield its chunks in order.
    ///
    /// Dropping the returned stream stops the run before its next stage and
    /// stops emission. A backend call already in flight still completes.
    pub fn stream(
        self: Arc<Self>,
        request: AnalysisRequest,
    ) -> impl Stream<Item = StreamChunk> + Send + 'static {
        self.stream_with(request, |_| {})
    }

    /// Same as [`Pipeline::stream`], handing the run outcome to `on_finish`
    /// before the first chunk is sent. Cancelled runs are reported too.
    pub fn stream_with<F>(
        self: Arc<Self>,
        request: AnalysisRequest,
        on_finish: F,
    ) -> impl Stream<Item = StreamChunk> + Send + 'static
    where
        F: FnOnce(&Result<PipelineRun, PipelineError>) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<StreamChunk>(CHUNK_BUFFER);

        tokio::spawn(async move {
            let outcome = self.execute(&request, || tx.is_closed()).await;
            on_finish(&outcome);

            let chunks = match outcome {
                Ok(run) => {
                    debug!(run_id = %run.run_id, state = ?PipelineState::Streaming, "Emitting chunks");
                    emit_chunks(&run)
                }
                Err(PipelineError::Cancelled { .. }) => return,
                Err(e) => vec![StreamChunk::Error(e.user_message())],
            };

            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    debug!("Chunk consumer went away, stopping emission");
                    return;
                }
            }
            debug!(state = ?PipelineState::Done, "All chunks delivered");
        });

        async_stream::stream! {
            let mut rx = rx;
            while let Some(chunk) = rx.recv().await {
                yield chunk;
            }
        }
    }
}

/// Post-editor cleanup: sound graph, accurate count, topic carried through.
fn finalize_verified(mut analysis: StructuredAnalysis, topic: &str) -> StructuredAnalysis {
    if let Some(graph) = analysis.knowledge_graph.as_mut() {
        let report = GraphSanitizer::sanitize(graph);
        if !report.is_clean() {
            debug!(
                renamed = report.renamed_nodes,
                merged = report.merged_nodes,
                dropped_edges = report.dropped_edges,
                "Sanitized knowledge graph"
            );
        }
    }
    if !(2..=3).contains(&analysis.tags.len()) {
        warn!(tags = analysis.tags.len(), "Verified analysis should carry 2-3 tags");
    }
    analysis.questions_count = Some(analysis.total_questions());
    if analysis
        .syllabus_topic
        .as_deref()
        .is_none_or(|t| t.trim().is_empty())
    {
        analysis.syllabus_topic = Some(topic.to_string());
    }
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use agents::{MockBackend, MockReply, PromptTemplate};
    use futures::StreamExt;
    use serde_json::{Value, json};
    use syllabus::SyllabusReference;

    const ARTICLE: &str = "The Reserve Bank of India's Monetary Policy Committee kept the repo rate \
        unchanged at 6.5 per cent, citing sticky food inflation and robust GDP growth.";

    fn request() -> AnalysisRequest {
        AnalysisRequest::new(ARTICLE, "economy")
    }

    fn pricing() -> Pricing {
        Pricing {
            input_rate_per_1k: 1.0,
            output_rate_per_1k: 2.0,
            currency_conversion_rate: 1.0,
        }
    }

    fn pipeline(backend: Arc<MockBackend>) -> Arc<Pipeline> {
        let syllabus = SyllabusCache::preloaded(SyllabusReference {
            prelims_text: "Economic and Social Development".to_string(),
            mains_text: "GS-III: Indian Economy, monetary policy".to_string(),
        });
        Arc::new(Pipeline::new(
            backend,
            Arc::new(syllabus),
            pricing(),
            RequestLimits {
                min_source_chars: 20,
                max_source_chars: 5000,
            },
        ))
    }

    fn relevant() -> MockReply {
        MockReply::output_with_usage(
            json!({
                "isRelevant": true,
                "syllabusTopic": "GS-III: Monetary policy",
                "reasoning": "Covers RBI rate decisions",
                "confidenceScore": 0.9
            }),
            1000,
            100,
        )
    }

    fn draft() -> Value {
        json!({
            "summary": "The MPC held the repo rate at 6.5%.",
            "prelims": {"mcqs": [
                {"question": "Who sets the repo rate?", "difficulty": 3, "options": [
                    {"text": "MPC", "correct": true}, {"text": "SEBI"},
                    {"text": "NITI Aayog"}, {"text": "Finance Commission"}]},
                {"question": "Repo rate after the meeting?", "difficulty": 2, "options": [
                    {"text": "6.5%", "correct": true}, {"text": "6.25%"},
                    {"text": "6.75%"}, {"text": "7%"}]}
            ]},
            "mains": {"questions": [{"question": "Evaluate inflation targeting in India.", "difficulty": 7}]},
            "knowledgeGraph": {
                "nodes": [
                    {"id": "RBI", "label": "Reserve Bank of India", "type": "Organization"},
                    {"id": "repo_rate", "label": "Repo rate", "type": "Policy"}
                ],
                "edges": [{"source": "RBI", "target": "repo_rate", "label": "sets"}]
            },
            "tags": ["Economy"]
        })
    }

    fn verified() -> Value {
        let mut value = draft();
        value["summary"] = json!("The Monetary Policy Committee kept the repo rate at 6.5 per cent.");
        value["tags"] = json!(["Economy", "Monetary Policy"]);
        value["qualityScore"] = json!(0.82);
        value
    }

    async fn collect(pipeline: Arc<Pipeline>) -> Vec<StreamChunk> {
        pipeline.stream(request()).collect().await
    }

    fn kinds(chunks: &[StreamChunk]) -> Vec<&'static str> {
        chunks.iter().map(StreamChunk::kind).collect()
    }

    #[tokio::test]
    async fn test_irrelevant_article_yields_single_error_chunk() {
        let backend = Arc::new(MockBackend::new().reply(
            PromptTemplate::RelevanceClassifier,
            MockReply::output(json!({
                "isRelevant": false,
                "syllabusTopic": null,
                "reasoning": "Sports transfer news has no syllabus mapping.",
                "confidenceScore": 0.95
            })),
        ));

        let chunks = collect(pipeline(backend.clone())).await;

        assert_eq!(
            chunks,
            vec![StreamChunk::Error("Sports transfer news has no syllabus mapping.".to_string())]
        );
        assert_eq!(backend.calls(), vec![PromptTemplate::RelevanceClassifier]);
    }

    #[tokio::test]
    async fn test_relevant_without_topic_is_irrelevant() {
        let backend = Arc::new(MockBackend::new().reply(
            PromptTemplate::RelevanceClassifier,
            MockReply::output(json!({"isRelevant": true, "syllabusTopic": "", "confidenceScore": 0.4})),
        ));

        let err = pipeline(backend.clone()).analyze(&request()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Irrelevant { .. }));
        assert_eq!(err.user_message(), IRRELEVANT_FALLBACK);
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_classifier_failure_stops_pipeline() {
        let backend = Arc::new(MockBackend::new().reply(
            PromptTemplate::RelevanceClassifier,
            MockReply::Error("timeout".to_string()),
        ));

        let chunks = collect(pipeline(backend.clone())).await;

        assert_eq!(chunks, vec![StreamChunk::Error(IRRELEVANT_FALLBACK.to_string())]);
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_verified_run_chunk_sequence() {
        let backend = Arc::new(
            MockBackend::new()
                .reply(PromptTemplate::RelevanceClassifier, relevant())
                .reply(PromptTemplate::ContentGenerator, MockReply::output_with_usage(draft(), 2000, 800))
                .reply(PromptTemplate::VerificationEditor, MockReply::output_with_usage(verified(), 1500, 700)),
        );

        let chunks = collect(pipeline(backend.clone())).await;

        assert_eq!(
            kinds(&chunks),
            vec!["summary", "prelims", "prelims", "mains", "knowledgeGraph", "metadata"]
        );
        assert_eq!(
            chunks[0],
            StreamChunk::Summary("The Monetary Policy Committee kept the repo rate at 6.5 per cent.".to_string())
        );

        // Graph ids are normalized after verification
        let StreamChunk::KnowledgeGraph(graph) = &chunks[4] else {
            panic!("expected graph chunk");
        };
        assert_eq!(graph.nodes[0].id, "rbi");
        assert_eq!(graph.edges[0].source, "rbi");

        let StreamChunk::Metadata(meta) = &chunks[5] else {
            panic!("expected metadata chunk");
        };
        assert_eq!(meta.questions_count, 3);
        assert_eq!(meta.syllabus_topic.as_deref(), Some("GS-III: Monetary policy"));
        assert_eq!(meta.tags, vec!["Economy", "Monetary Policy"]);
        assert_eq!(meta.quality_score, Some(0.82));
        assert_eq!(meta.total_tokens, 6100);
        // (4500 / 1000) * 1.0 + (1600 / 1000) * 2.0 = 7.7
        assert_eq!(meta.cost, 7.7);

        // The topic and the draft are threaded into later stages
        let generation_input = &backend.inputs_for(PromptTemplate::ContentGenerator)[0];
        assert_eq!(generation_input["syllabusTopic"], "GS-III: Monetary policy");
        let editor_input = &backend.inputs_for(PromptTemplate::VerificationEditor)[0];
        assert_eq!(editor_input["draftAnalysis"]["prelims"]["mcqs"].as_array().unwrap().len(), 2);
        assert!(editor_input["instruction"].as_str().unwrap().contains("Re-verify"));
    }

    #[tokio::test]
    async fn test_verification_without_output_falls_back_to_draft() {
        let backend = Arc::new(
            MockBackend::new()
                .reply(PromptTemplate::RelevanceClassifier, relevant())
                .reply(PromptTemplate::ContentGenerator, MockReply::output_with_usage(draft(), 2000, 800))
                .reply(PromptTemplate::VerificationEditor, MockReply::no_output_with_usage(1500, 10)),
        );

        let run = pipeline(backend).analyze(&request()).await.unwrap();

        assert!(!run.verified);
        let expected: StructuredAnalysis = serde_json::from_value(draft()).unwrap();
        assert_eq!(run.analysis, expected);
        // Editor usage still counts even though it produced nothing
        assert_eq!(run.usage.input_tokens, 4500);
        assert_eq!(run.usage.output_tokens, 910);

        let chunks = emit_chunks(&run);
        let terminal = chunks
            .iter()
            .filter(|c| matches!(c, StreamChunk::Metadata(_) | StreamChunk::Error(_)))
            .count();
        assert_eq!(terminal, 1);
        assert_eq!(chunks[0], StreamChunk::Summary("The MPC held the repo rate at 6.5%.".to_string()));
        let Some(StreamChunk::Metadata(meta)) = chunks.last() else {
            panic!("expected metadata chunk last");
        };
        assert_eq!(meta.questions_count, 3);
        assert_eq!(
            meta.questions_count,
            run.analysis.prelims.mcqs.len() + run.analysis.mains_questions().len()
        );
    }

    #[tokio::test]
    async fn test_fallback_metadata_counts_questions_not_draft_claim() {
        let mut stale = draft();
        stale["questionsCount"] = json!(9);
        let backend = Arc::new(
            MockBackend::new()
                .reply(PromptTemplate::RelevanceClassifier, relevant())
                .reply(PromptTemplate::ContentGenerator, MockReply::output(stale))
                .reply(PromptTemplate::VerificationEditor, MockReply::no_output()),
        );

        let chunks = collect(pipeline(backend)).await;

        let prelims = chunks.iter().filter(|c| c.kind() == "prelims").count();
        let mains = chunks.iter().filter(|c| c.kind() == "mains").count();
        let Some(StreamChunk::Metadata(meta)) = chunks.last() else {
            panic!("expected metadata chunk last");
        };
        assert_eq!(meta.questions_count, prelims + mains);
        assert_eq!(meta.questions_count, 3);
    }

    #[tokio::test]
    async fn test_draft_without_mcqs_fails_generation() {
        let backend = Arc::new(
            MockBackend::new()
                .reply(PromptTemplate::RelevanceClassifier, relevant())
                .reply(
                    PromptTemplate::ContentGenerator,
                    MockReply::output(json!({"summary": "s", "prelims": {"mcqs": []}})),
                )
                .reply(PromptTemplate::VerificationEditor, MockReply::no_output()),
        );

        let err = pipeline(backend.clone()).analyze(&request()).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StageFailed { stage: Stage::Generation, .. }
        ));
        assert!(!backend.calls().contains(&PromptTemplate::VerificationEditor));
    }

    #[tokio::test]
    async fn test_editor_error_also_falls_back() {
        let backend = Arc::new(
            MockBackend::new()
                .reply(PromptTemplate::RelevanceClassifier, relevant())
                .reply(PromptTemplate::ContentGenerator, MockReply::output(draft()))
                .reply(PromptTemplate::VerificationEditor, MockReply::Error("502".to_string())),
        );

        let chunks = collect(pipeline(backend)).await;

        assert!(!chunks.iter().any(|c| matches!(c, StreamChunk::Error(_))));
        assert_eq!(chunks.last().map(StreamChunk::kind), Some("metadata"));
    }

    #[tokio::test]
    async fn test_generation_failure_emits_error() {
        let backend = Arc::new(
            MockBackend::new()
                .reply(PromptTemplate::RelevanceClassifier, relevant())
                .reply(PromptTemplate::ContentGenerator, MockReply::no_output_with_usage(2000, 5)),
        );

        let err = pipeline(backend.clone()).analyze(&request()).await.unwrap_err();

        match &err {
            PipelineError::StageFailed { stage, usage, .. } => {
                assert_eq!(*stage, Stage::Generation);
                assert_eq!(usage.input_tokens, 3000);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!backend.calls().contains(&PromptTemplate::VerificationEditor));
    }

    #[tokio::test]
    async fn test_generation_failure_stream_has_only_error() {
        let backend = Arc::new(
            MockBackend::new()
                .reply(PromptTemplate::RelevanceClassifier, relevant())
                .reply(PromptTemplate::ContentGenerator, MockReply::Error("boom".to_string())),
        );

        let chunks = collect(pipeline(backend)).await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind(), "error");
    }

    #[tokio::test]
    async fn test_invalid_request_never_calls_backend() {
        let backend = Arc::new(MockBackend::new());
        let short = AnalysisRequest::new("too short", "economy");

        let err = pipeline(backend.clone()).analyze(&short).await.unwrap_err();

        assert!(matches!(err, PipelineError::InvalidRequest(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_stream_makes_no_further_calls() {
        let backend = Arc::new(
            MockBackend::new()
                .reply(PromptTemplate::RelevanceClassifier, relevant())
                .reply(PromptTemplate::ContentGenerator, MockReply::output(draft()))
                .reply(PromptTemplate::VerificationEditor, MockReply::output(verified())),
        );
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let stream = pipeline(backend.clone()).stream_with(request(), move |outcome| {
            let _ = done_tx.send(outcome.as_ref().err().map(ToString::to_string));
        });
        drop(stream);

        let outcome = done_rx.await.unwrap();
        assert_eq!(
            outcome.as_deref(),
            Some("run cancelled before relevance classification")
        );
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stream_reports_outcome_before_chunks() {
        let backend = Arc::new(
            MockBackend::new()
                .reply(PromptTemplate::RelevanceClassifier, relevant())
                .reply(PromptTemplate::ContentGenerator, MockReply::output(draft()))
                .reply(PromptTemplate::VerificationEditor, MockReply::no_output()),
        );
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let chunks: Vec<StreamChunk> = pipeline(backend)
            .stream_with(request(), move |outcome| {
                let _ = done_tx.send(outcome.as_ref().map(|run| run.verified).ok());
            })
            .collect()
            .await;

        assert_eq!(done_rx.await.unwrap(), Some(false));
        assert_eq!(chunks.last().map(StreamChunk::kind), Some("metadata"));
    }

    #[test]
    fn test_finalize_fills_topic_and_count() {
        let analysis: StructuredAnalysis = serde_json::from_value(draft()).unwrap();
        let finalized = finalize_verified(analysis, "GS-III: Monetary policy");
        assert_eq!(finalized.questions_count, Some(3));
        assert_eq!(finalized.syllabus_topic.as_deref(), Some("GS-III: Monetary policy"));
    }
}
