pub mod reader;

pub use reader::FileReader;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Location of the two reference syllabus texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyllabusPaths {
    pub prelims_path: PathBuf,
    pub mains_path: PathBuf,
}

impl Default for SyllabusPaths {
    fn default() -> Self {
        Self {
            prelims_path: PathBuf::from("data/syllabus/prelims.txt"),
            mains_path: PathBuf::from("data/syllabus/mains.txt"),
        }
    }
}

/// Grounding context shared read-only by every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyllabusReference {
    pub prelims_text: String,
    pub mains_text: String,
}

/// Lazily loaded, never invalidated syllabus store.
///
/// One instance is created per process and handed to the pipeline behind an
/// `Arc`. Concurrent first calls wait on the same initialisation and observe
/// the same value.
pub struct SyllabusCache {
    paths: SyllabusPaths,
    cell: OnceCell<Arc<SyllabusReference>>,
}

impl SyllabusCache {
    pub fn new(paths: SyllabusPaths) -> Self {
        Self {
            paths,
            cell: OnceCell::new(),
        }
    }

    /// Build a cache that is already populated. Used where the texts come from
    /// somewhere other than disk.
    pub fn preloaded(reference: SyllabusReference) -> Self {
        Self {
            paths: SyllabusPaths::default(),
            cell: OnceCell::new_with(Some(Arc::new(reference))),
        }
    }

    /// Return the memoized syllabus, reading both files on the first call.
    pub async fn get_syllabus_content(&self) -> Result<Arc<SyllabusReference>> {
        let reference = self
            .cell
            .get_or_try_init(|| async {
                let prelims_text = FileReader::read_file(&self.paths.prelims_path)
                    .await
                    .context("Failed to load prelims syllabus")?;
                let mains_text = FileReader::read_file(&self.paths.mains_path)
                    .await
                    .context("Failed to load mains syllabus")?;

                info!(
                    prelims_chars = prelims_text.len(),
                    mains_chars = mains_text.len(),
                    "Syllabus reference loaded"
                );

                Ok::<_, anyhow::Error>(Arc::new(SyllabusReference {
                    prelims_text,
                    mains_text,
                }))
            })
            .await?;

        Ok(Arc::clone(reference))
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}
