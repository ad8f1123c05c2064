use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_EXAM_TYPE: &str = "UPSC";
pub const DEFAULT_OUTPUT_LANGUAGE: &str = "English";

fn default_exam_type() -> String {
    DEFAULT_EXAM_TYPE.to_string()
}

fn default_output_language() -> String {
    DEFAULT_OUTPUT_LANGUAGE.to_string()
}

/// Caller input to the pipeline. Consumed once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub source_text: String,
    #[serde(default = "default_exam_type")]
    pub exam_type: String,
    pub analysis_focus: String,
    #[serde(default = "default_output_language")]
    pub output_language: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestLimits {
    pub min_source_chars: usize,
    pub max_source_chars: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            min_source_chars: 100,
            max_source_chars: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("source text is too short ({actual} characters, minimum {min})")]
    TooShort { min: usize, actual: usize },
    #[error("source text is too long ({actual} characters, maximum {max})")]
    TooLong { max: usize, actual: usize },
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),
}

impl AnalysisRequest {
    pub fn new(source_text: impl Into<String>, analysis_focus: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            exam_type: default_exam_type(),
            analysis_focus: analysis_focus.into(),
            output_language: default_output_language(),
        }
    }

    pub fn validate(&self, limits: &RequestLimits) -> Result<(), RequestError> {
        let actual = self.source_text.trim().chars().count();
        if actual < limits.min_source_chars {
            return Err(RequestError::TooShort {
                min: limits.min_source_chars,
                actual,
            });
        }
        if actual > limits.max_source_chars {
            return Err(RequestError::TooLong {
                max: limits.max_source_chars,
                actual,
            });
        }

        for (name, value) in [
            ("examType", &self.exam_type),
            ("analysisFocus", &self.analysis_focus),
            ("outputLanguage", &self.output_language),
        ] {
            if value.trim().is_empty() {
                return Err(RequestError::EmptyField(name));
            }
        }
        Ok(())
    }
}

/// Stage 1 output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevanceAssessment {
    pub is_relevant: bool,
    #[serde(default)]
    pub syllabus_topic: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    pub confidence_score: f64,
}

impl RelevanceAssessment {
    /// The identified topic, if the assessment permits generation to proceed.
    pub fn accepted_topic(&self) -> Option<&str> {
        if !self.is_relevant {
            return None;
        }
        self.syllabus_topic
            .as_deref()
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McqOption {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
}

impl McqOption {
    pub fn is_correct(&self) -> bool {
        self.correct.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mcq {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u8>,
    pub options: Vec<McqOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainsQuestion {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Person,
    Organization,
    Location,
    Policy,
    Concept,
    Date,
    Statistic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraphEdge {
    pub source: String,
    pub target: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub nodes: Vec<KnowledgeGraphNode>,
    #[serde(default)]
    pub edges: Vec<KnowledgeGraphEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prelims {
    #[serde(default)]
    pub mcqs: Vec<Mcq>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mains {
    #[serde(default)]
    pub questions: Vec<MainsQuestion>,
}

/// Study material assembled by stages 2 and 3.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub prelims: Prelims,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mains: Option<Mains>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    pub syllabus_topic: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions_count: Option<usize>,
}

impl StructuredAnalysis {
    pub fn mains_questions(&self) -> &[MainsQuestion] {
        self.mains
            .as_ref()
            .map(|mains| mains.questions.as_slice())
            .unwrap_or_default()
    }

    /// MCQs plus mains questions.
    pub fn total_questions(&self) -> usize {
        self.prelims.mcqs.len() + self.mains_questions().len()
    }

    /// Summary text, if present and not blank.
    pub fn non_empty_summary(&self) -> Option<&str> {
        self.summary
            .as_deref()
            .filter(|summary| !summary.trim().is_empty())
    }
}
