//! Model pricing registry.
//!
//! Costs are in nanodollars (1e-9 USD) per token. Unknown models get a
//! mid-range default so cost reporting degrades gracefully instead of
//! disappearing.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Pricing information for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Cost per input token in nanodollars.
    pub input_nanos_per_token: i64,
    /// Cost per output token in nanodollars.
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// Verify periodically against provider pricing pages.
// GPT-4o: $2.50/1M input, $10.00/1M output
const GPT_4O: ModelPricing = ModelPricing::new(2_500, 10_000);
// GPT-4o-mini: $0.15/1M input, $0.60/1M output
const GPT_4O_MINI: ModelPricing = ModelPricing::new(150, 600);
// Claude 3.5 Sonnet: $3.00/1M input, $15.00/1M output
const CLAUDE_35_SONNET: ModelPricing = ModelPricing::new(3_000, 15_000);
// Claude 3.5 Haiku: $0.80/1M input, $4.00/1M output
const CLAUDE_35_HAIKU: ModelPricing = ModelPricing::new(800, 4_000);
// Locally-hosted models: free at the meter.
const LOCAL: ModelPricing = ModelPricing::new(0, 0);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();

    map.insert("gpt-4o", GPT_4O);
    map.insert("gpt-4-turbo", GPT_4O);
    map.insert("gpt-4o-mini", GPT_4O_MINI);
    map.insert("claude-3-5-sonnet", CLAUDE_35_SONNET);
    map.insert("claude-sonnet", CLAUDE_35_SONNET);
    map.insert("claude-3-5-haiku", CLAUDE_35_HAIKU);
    map.insert("claude-haiku", CLAUDE_35_HAIKU);
    map.insert("llama3", LOCAL);
    map.insert("mistral", LOCAL);
    map.insert("phi3", LOCAL);

    map
}

/// Get pricing for a model.
pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    let map = PRICING_MAP.get_or_init(init_pricing);
    map.get(model_id).copied()
}

/// Calculate chat cost, defaulting unknown models to a mid-range price.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    let default = ModelPricing::new(1_000, 5_000);
    let pricing = get_pricing(model).unwrap_or(default);
    pricing.calculate_cost(input_tokens, output_tokens)
}

/// Length-based token estimate for responses that carried no usage data:
/// roughly 4 characters per token, never less than 1 for non-empty text.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    ((text.len() + 3) / 4) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_cost_known_model() {
        // 1K input + 1K output for Claude 3.5 Haiku
        // Input: 1000 * 800 = 800,000 nanos
        // Output: 1000 * 4000 = 4,000,000 nanos
        let cost = chat_cost("claude-3-5-haiku", 1_000, 1_000);
        assert_eq!(cost, 4_800_000);
    }

    #[test]
    fn test_chat_cost_unknown_model_uses_default() {
        let cost = chat_cost("acme-experimental", 1_000, 1_000);
        assert_eq!(cost, 1_000 * 1_000 + 1_000 * 5_000);
    }

    #[test]
    fn test_local_models_are_free() {
        assert_eq!(chat_cost("llama3", 10_000, 10_000), 0);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }
}
