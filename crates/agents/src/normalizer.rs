use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::schema::KnowledgeGraph;

static INVALID_ID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// What [`GraphSanitizer::sanitize`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub renamed_nodes: usize,
    pub merged_nodes: usize,
    pub dropped_edges: usize,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        self.renamed_nodes == 0 && self.merged_nodes == 0 && self.dropped_edges == 0
    }
}

/// Makes knowledge-graph ids syntactically valid and edges referentially sound.
pub struct GraphSanitizer;

impl GraphSanitizer {
    /// Normalize a node id: lowercase, runs of anything but `[a-z0-9]` become `_`.
    pub fn normalize_id(raw: &str) -> String {
        let lowered = raw.trim().to_lowercase();
        INVALID_ID_CHARS
            .replace_all(&lowered, "_")
            .trim_matches('_')
            .to_string()
    }

    pub fn sanitize(graph: &mut KnowledgeGraph) -> SanitizeReport {
        let mut report = SanitizeReport::default();
        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();

        let nodes = std::mem::take(&mut graph.nodes);
        for (index, mut node) in nodes.into_iter().enumerate() {
            let mut normalized = Self::normalize_id(&node.id);
            if normalized.is_empty() {
                normalized = Self::normalize_id(&node.label);
            }
            if normalized.is_empty() {
                normalized = format!("node_{}", index + 1);
            }

            if normalized != node.id {
                report.renamed_nodes += 1;
            }
            id_map.insert(node.id.clone(), normalized.clone());

            // Two raw ids collapsing to one normalized id are the same entity
            if !seen.insert(normalized.clone()) {
                report.merged_nodes += 1;
                continue;
            }

            node.id = normalized;
            graph.nodes.push(node);
        }

        let edges = std::mem::take(&mut graph.edges);
        let mut edge_keys = HashSet::new();
        for mut edge in edges {
            let source = id_map
                .get(&edge.source)
                .cloned()
                .unwrap_or_else(|| Self::normalize_id(&edge.source));
            let target = id_map
                .get(&edge.target)
                .cloned()
                .unwrap_or_else(|| Self::normalize_id(&edge.target));

            if !seen.contains(&source) || !seen.contains(&target) {
                report.dropped_edges += 1;
                continue;
            }
            if !edge_keys.insert((source.clone(), target.clone(), edge.label.clone())) {
                report.dropped_edges += 1;
                continue;
            }

            edge.source = source;
            edge.target = target;
            graph.edges.push(edge);
        }

        report
    }
}
