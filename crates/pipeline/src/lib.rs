pub mod error;
pub mod orchestrator;
pub mod render;
pub mod stream;
pub mod usage;

pub use error::{PipelineError, Stage};
pub use orchestrator::{Pipeline, PipelineRun, PipelineState};
pub use render::{MarkdownRendering, render_markdown};
pub use stream::{RunMetadata, StreamChunk, emit_chunks};
pub use usage::{Pricing, UsageAccountant, UsageMetrics};
