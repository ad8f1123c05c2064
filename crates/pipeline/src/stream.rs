use agents::{KnowledgeGraph, MainsQuestion, Mcq};
use serde::{Deserialize, Serialize};

use crate::orchestrator::PipelineRun;

/// Trailing record of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub syllabus_topic: Option<String>,
    pub quality_score: Option<f64>,
    pub tags: Vec<String>,
    pub questions_count: usize,
    pub total_tokens: u64,
    pub cost: f64,
}

/// One unit of incremental output, serialized as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum StreamChunk {
    Summary(String),
    Prelims(Mcq),
    Mains(MainsQuestion),
    KnowledgeGraph(KnowledgeGraph),
    Metadata(RunMetadata),
    Error(String),
}

impl StreamChunk {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamChunk::Summary(_) => "summary",
            StreamChunk::Prelims(_) => "prelims",
            StreamChunk::Mains(_) => "mains",
            StreamChunk::KnowledgeGraph(_) => "knowledgeGraph",
            StreamChunk::Metadata(_) => "metadata",
            StreamChunk::Error(_) => "error",
        }
    }
}

/// Turn a finished run into its chunk sequence: summary, one chunk per MCQ,
/// one per mains question, the graph, then exactly one metadata chunk.
pub fn emit_chunks(run: &PipelineRun) -> Vec<StreamChunk> {
    let analysis = &run.analysis;
    let mut chunks = Vec::with_capacity(analysis.total_questions() + 3);

    if let Some(summary) = analysis.non_empty_summary() {
        chunks.push(StreamChunk::Summary(summary.to_string()));
    }

    chunks.extend(analysis.prelims.mcqs.iter().cloned().map(StreamChunk::Prelims));
    chunks.extend(analysis.mains_questions().iter().cloned().map(StreamChunk::Mains));

    if let Some(graph) = &analysis.knowledge_graph {
        chunks.push(StreamChunk::KnowledgeGraph(graph.clone()));
    }

    chunks.push(StreamChunk::Metadata(RunMetadata {
        syllabus_topic: Some(run.syllabus_topic.clone()),
        quality_score: analysis.quality_score,
        tags: analysis.tags.clone(),
        questions_count: analysis.total_questions(),
        total_tokens: run.usage.total_tokens,
        cost: run.usage.cost,
    }));

    chunks
}
