use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Instruction handed to the verification editor alongside the draft.
pub const VERIFY_INSTRUCTION: &str = "Re-verify the draft analysis against the source text. \
Remove anything not grounded in the source, keep difficulty scores as integers from 1 to 10, \
make the summary clean prose, check knowledge graph ids and edges, \
set questionsCount and a qualityScore between 0 and 1, and keep 2-3 topical tags.";

/// Identifies which prompt a backend call renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    RelevanceClassifier,
    ContentGenerator,
    VerificationEditor,
}

impl PromptTemplate {
    pub fn id(&self) -> &'static str {
        match self {
            PromptTemplate::RelevanceClassifier => "relevance_classifier",
            PromptTemplate::ContentGenerator => "content_generator",
            PromptTemplate::VerificationEditor => "verification_editor",
        }
    }
}

impl std::fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

pub fn build_prompt(template: PromptTemplate, input: &Value) -> String {
    let input_json = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
    match template {
        PromptTemplate::RelevanceClassifier => build_relevance_prompt(&input_json),
        PromptTemplate::ContentGenerator => build_generation_prompt(&input_json),
        PromptTemplate::VerificationEditor => build_verification_prompt(&input_json),
    }
}

fn build_relevance_prompt(input_json: &str) -> String {
    format!(
        r#"You are an expert examiner for competitive exams. Decide whether the news article maps to a specific point in the syllabus.

INSTRUCTIONS:
1. Read the article in "sourceText" and the syllabi in "prelimsSyllabus" and "mainsSyllabus"
2. If the article maps to a granular syllabus point, name the single most specific topic
3. If it does not, explain why and return a null topic
4. Output ONLY valid JSON, nothing else

SCHEMA:
{{
  "isRelevant": true,
  "syllabusTopic": "GS Paper II: Federalism - Centre-State financial relations" | null,
  "reasoning": "one or two sentences",
  "confidenceScore": 0.0-1.0
}}

INPUT:
{}

JSON OUTPUT:"#,
        input_json
    )
}

fn build_generation_prompt(input_json: &str) -> String {
    format!(
        r#"You prepare study material for a competitive exam from a news article, anchored on the syllabus topic given in "syllabusTopic".

INSTRUCTIONS:
1. Write a concise summary of the article in plain prose
2. Write exam-pattern MCQs: multi-statement, assertion-reason, matching pairs and direct recall
3. Write mains questions with structured answer guidance
4. Extract a knowledge graph of entities and relationships found in the article
5. Write in the language given in "outputLanguage"
6. Output ONLY valid JSON, nothing else

SCHEMA:
{{
  "summary": "plain prose",
  "prelims": {{"mcqs": [{{"question": "...", "subject": "...", "explanation": "...", "difficulty": 1-10,
      "options": [{{"text": "...", "correct": true}}, {{"text": "..."}}, {{"text": "..."}}, {{"text": "..."}}]}}]}},
  "mains": {{"questions": [{{"question": "...", "guidance": "...", "difficulty": 1-10}}]}},
  "knowledgeGraph": {{
    "nodes": [{{"id": "rbi", "label": "Reserve Bank of India", "type": "Person|Organization|Location|Policy|Concept|Date|Statistic"}}],
    "edges": [{{"source": "rbi", "target": "repo_rate", "label": "revises"}}]
  }},
  "syllabusTopic": "...",
  "tags": ["...", "..."]
}}

RULES:
- Every MCQ has exactly four options and exactly one correct option
- Node ids are lowercase with underscores; every edge refers to existing node ids
- Edge labels are 3-40 characters
- Output ONLY the JSON object, no markdown, no explanations

INPUT:
{}

JSON OUTPUT:"#,
        input_json
    )
}

fn build_verification_prompt(input_json: &str) -> String {
    format!(
        r#"You are the verification editor for exam study material. Follow "instruction" and return the corrected analysis.

INSTRUCTIONS:
1. Compare "draftAnalysis" against "sourceText" and strip anything not grounded in the article
2. Keep difficulty scores as integers from 1 to 10
3. Ensure "summary" is clean prose with no markup; rewrite it if absent or malformed
4. Ensure knowledge graph node ids are valid and edges reference existing nodes
5. Set "questionsCount" and a "qualityScore" between 0 and 1
6. Ensure 2-3 topical tags
7. Output ONLY valid JSON using the same schema as "draftAnalysis"

INPUT:
{}

JSON OUTPUT:"#,
        input_json
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}
