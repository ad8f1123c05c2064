use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

pub struct FileReader;

impl FileReader {
    /// Read a plain-text reference document. Only `.txt` and `.md` are accepted.
    pub async fn read_file(path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match extension {
            "txt" | "md" => {
                let content = fs::read_to_string(path)
                    .await
                    .context(format!("Failed to read syllabus file: {:?}", path))?;

                if content.trim().is_empty() {
                    anyhow::bail!("Syllabus file is empty: {:?}", path);
                }

                Ok(content)
            }
            _ => anyhow::bail!("Unsupported syllabus format: {}", extension),
        }
    }
}
