pub mod agent;
pub mod llm;
pub mod mock;
pub mod normalizer;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use agent::{
    ContentGenerator, Contract, ContractViolation, DraftAnalysis, GenerationInput,
    RelevanceClassifier, RelevanceInput, StageAgent, StageAgents, StageOutcome,
    VerificationEditor, VerificationInput, VerifiedAnalysis,
};
pub use llm::{BackendResponse, GenerativeBackend, OllamaClient, TokenUsage};
pub use mock::{MockBackend, MockReply};
pub use normalizer::{GraphSanitizer, SanitizeReport};
pub use prompt::PromptTemplate;
pub use retry::RetryPolicy;
pub use schema::{
    AnalysisRequest, KnowledgeGraph, KnowledgeGraphEdge, KnowledgeGraphNode, MainsQuestion,
    Mains, Mcq, McqOption, NodeType, Prelims, RelevanceAssessment, RequestError, RequestLimits,
    StructuredAnalysis,
};
