use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::llm::{BackendResponse, GenerativeBackend, TokenUsage};
use crate::prompt::PromptTemplate;

/// One scripted backend reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Output {
        value: Value,
        usage: Option<TokenUsage>,
    },
    NoOutput {
        usage: Option<TokenUsage>,
    },
    Error(String),
}

impl MockReply {
    pub fn output(value: Value) -> Self {
        MockReply::Output { value, usage: None }
    }

    pub fn output_with_usage(value: Value, input_tokens: u64, output_tokens: u64) -> Self {
        MockReply::Output {
            value,
            usage: Some(TokenUsage::new(input_tokens, output_tokens)),
        }
    }

    pub fn no_output() -> Self {
        MockReply::NoOutput { usage: None }
    }

    pub fn no_output_with_usage(input_tokens: u64, output_tokens: u64) -> Self {
        MockReply::NoOutput {
            usage: Some(TokenUsage::new(input_tokens, output_tokens)),
        }
    }
}

/// Deterministic backend that replays queued replies per template and
/// records every call it receives.
#[derive(Default)]
pub struct MockBackend {
    replies: Mutex<HashMap<PromptTemplate, VecDeque<MockReply>>>,
    calls: Mutex<Vec<(PromptTemplate, Value)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for the next call rendering `template`.
    pub fn reply(self, template: PromptTemplate, reply: MockReply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(template)
            .or_default()
            .push_back(reply);
        self
    }

    /// Templates invoked so far, in call order.
    pub fn calls(&self) -> Vec<PromptTemplate> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(template, _)| *template)
            .collect()
    }

    /// Inputs sent for `template`, in call order.
    pub fn inputs_for(&self, template: PromptTemplate) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(t, _)| *t == template)
            .map(|(_, input)| input.clone())
            .collect()
    }
}

#[async_trait]
impl GenerativeBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn invoke(&self, template: PromptTemplate, input: &Value) -> Result<BackendResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((template, input.clone()));

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(&template)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(MockReply::Output { value, usage }) => Ok(BackendResponse {
                output: Some(value),
                usage,
            }),
            Some(MockReply::NoOutput { usage }) => Ok(BackendResponse { output: None, usage }),
            Some(MockReply::Error(message)) => Err(anyhow::anyhow!(message)),
            None => anyhow::bail!("no scripted reply for {}", template),
        }
    }
}
