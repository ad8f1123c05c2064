use agents::AnalysisRequest;
use dashmap::DashMap;
use pipeline::PipelineRun;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Completed batch analyses keyed by a hash of the request.
pub struct AnalysisCache {
    runs: Arc<DashMap<String, PipelineRun>>,
    max_entries: usize,
}

impl AnalysisCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            max_entries,
        }
    }

    pub fn get(&self, request: &AnalysisRequest) -> Option<PipelineRun> {
        let key = Self::key(request);
        self.runs.get(&key).map(|r| r.value().clone())
    }

    pub fn insert(&self, request: &AnalysisRequest, run: PipelineRun) {
        if self.max_entries == 0 {
            return;
        }
        if self.runs.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .runs
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.runs.remove(&key);
            }
        }
        self.runs.insert(Self::key(request), run);
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    fn key(request: &AnalysisRequest) -> String {
        let mut hasher = Sha256::new();
        for field in [
            &request.source_text,
            &request.exam_type,
            &request.analysis_focus,
            &request.output_language,
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}
