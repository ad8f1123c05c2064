//! Structural quality gate for generated question markup.
//!
//! A question block looks like:
//!
//! ```text
//! <mcq question="Which body recommends tax devolution?" difficultyScore="4">
//!   <option correct="true">Finance Commission</option>
//!   <option>NITI Aayog</option>
//!   <option>GST Council</option>
//!   <option>Inter-State Council</option>
//! </mcq>
//! ```
//!
//! Text without any block is valid: it simply carries no questions.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

pub const QUESTION_TAG: &str = "mcq";
pub const OPTION_TAG: &str = "option";
pub const DIFFICULTY_ATTR: &str = "difficultyScore";
pub const EXPECTED_OPTIONS: usize = 4;

// Quoted attribute values are matched whole so a `>` inside them does not end the tag
static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<mcq\b((?:[^>"']|"[^"]*"|'[^']*')*)>(.*?)</mcq\s*>"#)
        .expect("static regex")
});

static OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<option\b((?:[^>"']|"[^"]*"|'[^']*')*?)/?>"#).expect("static regex")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w:.-]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+)))?"#)
        .expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Lowercased attribute name -> value. Bare attributes (`<option correct>`)
/// map to `""`.
fn parse_attributes(raw: &str) -> HashMap<String, String> {
    ATTRIBUTE
        .captures_iter(raw)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (caps[1].to_ascii_lowercase(), value)
        })
        .collect()
}

fn is_correct(attributes: &HashMap<String, String>) -> bool {
    attributes.get("correct").is_some_and(|value| {
        let value = value.trim().to_ascii_lowercase();
        value.is_empty() || value == "true" || value == "yes" || value == "1"
    })
}

fn describe(index: usize, question: Option<&String>) -> String {
    match question {
        Some(text) if !text.trim().is_empty() => {
            let short: String = text.chars().take(60).collect();
            let ellipsis = if text.chars().count() > 60 { "..." } else { "" };
            format!("Question {} (\"{}{}\")", index + 1, short, ellipsis)
        }
        _ => format!("Question {}", index + 1),
    }
}

/// Check every question block in `text`. Errors from all blocks are collected
/// into one list.
pub fn validate(text: &str) -> ValidationReport {
    let mut errors = Vec::new();

    for (index, block) in BLOCK.captures_iter(text).enumerate() {
        let attributes = parse_attributes(&block[1]);
        let body = &block[2];
        let label = describe(index, attributes.get("question"));

        if !attributes.contains_key("question") {
            errors.push(format!("{} is missing the question attribute", label));
        }

        if !attributes.contains_key(&DIFFICULTY_ATTR.to_ascii_lowercase()) {
            errors.push(format!("{} is missing the {} attribute", label, DIFFICULTY_ATTR));
        }

        let options: Vec<HashMap<String, String>> = OPTION
            .captures_iter(body)
            .map(|caps| parse_attributes(&caps[1]))
            .collect();

        if options.len() != EXPECTED_OPTIONS {
            errors.push(format!(
                "{} must have exactly {} <{}> tags, found {}",
                label,
                EXPECTED_OPTIONS,
                OPTION_TAG,
                options.len()
            ));
        }

        let correct = options.iter().filter(|attrs| is_correct(attrs)).count();
        if correct != 1 {
            errors.push(format!(
                "{} must have exactly one correct option, found {}",
                label, correct
            ));
        }
    }

    ValidationReport::from_errors(errors)
}
