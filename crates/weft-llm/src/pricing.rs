use std::collections::HashMap;

use weft_core::config::PricingConfig;
use weft_core::types::TokenUsage;

/// USD per million tokens for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Monetary cost of one call.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_per_million
            + usage.completion_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

impl From<PricingConfig> for ModelPrice {
    fn from(config: PricingConfig) -> Self {
        Self::new(config.input_per_million, config.output_per_million)
    }
}

/// Price applied to models that match no entry.
pub const DEFAULT_PRICE: ModelPrice = ModelPrice::new(1.0, 2.0);

const BUILTIN_PRICES: &[(&str, ModelPrice)] = &[
    ("gpt-4o-mini", ModelPrice::new(0.15, 0.60)),
    ("gpt-4o", ModelPrice::new(2.50, 10.0)),
    ("gpt-4.1-mini", ModelPrice::new(0.40, 1.60)),
    ("gpt-4.1", ModelPrice::new(2.0, 8.0)),
    ("gpt-4", ModelPrice::new(30.0, 60.0)),
    ("gpt-3.5-turbo", ModelPrice::new(0.50, 1.50)),
    ("o3-mini", ModelPrice::new(1.10, 4.40)),
    ("claude-3-5-haiku", ModelPrice::new(0.80, 4.0)),
    ("claude-3-haiku", ModelPrice::new(0.25, 1.25)),
    ("claude-3-5-sonnet", ModelPrice::new(3.0, 15.0)),
    ("claude-sonnet-4", ModelPrice::new(3.0, 15.0)),
    ("claude-3-opus", ModelPrice::new(15.0, 75.0)),
    ("claude-opus-4", ModelPrice::new(15.0, 75.0)),
    ("mistral-small", ModelPrice::new(0.20, 0.60)),
    ("mistral-large", ModelPrice::new(2.0, 6.0)),
    ("deepseek-chat", ModelPrice::new(0.27, 1.10)),
    ("llama", ModelPrice::new(0.0, 0.0)),
    ("mock", ModelPrice::new(0.0, 0.0)),
];

/// Per-model prices, matched by longest model id prefix.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPrice>,
    default: ModelPrice,
}

impl PricingTable {
    /// A table with no entries; every model gets `default`.
    pub fn empty(default: ModelPrice) -> Self {
        Self {
            prices: HashMap::new(),
            default,
        }
    }

    /// The builtin price list.
    pub fn builtin() -> Self {
        let mut table = Self::empty(DEFAULT_PRICE);
        for (model, price) in BUILTIN_PRICES {
            table.set(*model, *price);
        }
        table
    }

    /// Builtin prices overridden by configured ones.
    pub fn with_overrides(overrides: &HashMap<String, PricingConfig>) -> Self {
        let mut table = Self::builtin();
        for (model, price) in overrides {
            table.set(model.clone(), (*price).into());
        }
        table
    }

    pub fn set(&mut self, model_prefix: impl Into<String>, price: ModelPrice) {
        self.prices
            .insert(model_prefix.into().to_ascii_lowercase(), price);
    }

    /// Price for a model id.
    pub fn price_for(&self, model_id: &str) -> ModelPrice {
        let model = model_id.to_ascii_lowercase();
        // Strip a vendor namespace such as "openai/gpt-4o"
        let model = model.rsplit('/').next().unwrap_or(&model);
        self.prices
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, price)| *price)
            .unwrap_or(self.default)
    }

    /// Cost of one call to `model_id`.
    pub fn cost(&self, model_id: &str, usage: &TokenUsage) -> f64 {
        self.price_for(model_id).cost(usage)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u64, completion: u64) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    #[test]
    fn test_cost_formula() {
        let price = ModelPrice::new(3.0, 15.0);
        let cost = price.cost(&usage(1_000, 2_000));
        assert!((cost - 0.033).abs() < 1e-12);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = PricingTable::builtin();
        assert_eq!(table.price_for("gpt-4o-mini-2024-07-18"), ModelPrice::new(0.15, 0.60));
        assert_eq!(table.price_for("gpt-4o-2024-08-06"), ModelPrice::new(2.50, 10.0));
        assert_eq!(table.price_for("openai/gpt-4o"), ModelPrice::new(2.50, 10.0));
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let table = PricingTable::builtin();
        assert_eq!(table.price_for("something-new"), DEFAULT_PRICE);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "gpt-4o-mini".to_string(),
            PricingConfig {
                input_per_million: 1.0,
                output_per_million: 1.0,
            },
        );
        let table = PricingTable::with_overrides(&overrides);
        let cost = table.cost("gpt-4o-mini", &usage(500_000, 500_000));
        assert!((cost - 1.0).abs() < 1e-12);
    }
}
