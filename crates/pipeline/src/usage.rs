use agents::TokenUsage;
use serde::{Deserialize, Serialize};

/// Per-1K token rates and the currency factor applied to their sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_rate_per_1k: f64,
    pub output_rate_per_1k: f64,
    pub currency_conversion_rate: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_rate_per_1k: 0.000125,
            output_rate_per_1k: 0.000375,
            currency_conversion_rate: 83.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Sums token usage over the stage calls of one run.
#[derive(Debug, Clone)]
pub struct UsageAccountant {
    pricing: Pricing,
    totals: TokenUsage,
}

impl UsageAccountant {
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            totals: TokenUsage::default(),
        }
    }

    pub fn accumulate(&mut self, usage: &TokenUsage) {
        self.totals += *usage;
    }

    /// Accumulate if the backend reported anything.
    pub fn record(&mut self, usage: Option<TokenUsage>) {
        if let Some(usage) = usage {
            self.accumulate(&usage);
        }
    }

    pub fn compute_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input = (input_tokens as f64 / 1000.0) * self.pricing.input_rate_per_1k;
        let output = (output_tokens as f64 / 1000.0) * self.pricing.output_rate_per_1k;
        round_to_cents((input + output) * self.pricing.currency_conversion_rate)
    }

    /// Current totals, with cost derived from them.
    pub fn metrics(&self) -> UsageMetrics {
        UsageMetrics {
            input_tokens: self.totals.input_tokens,
            output_tokens: self.totals.output_tokens,
            total_tokens: self.totals.total(),
            cost: self.compute_cost(self.totals.input_tokens, self.totals.output_tokens),
        }
    }
}
