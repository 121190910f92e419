//! Per-model token pricing, injected as configuration.

use crate::types::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// Prices in currency units per million tokens.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub cache_read: Option<f64>,
    #[serde(default)]
    pub cache_write: Option<f64>,
}

impl ModelPricing {
    pub fn cost(&self, usage: &Usage) -> f64 {
        let input = usage.input_tokens.unwrap_or(0) as f64 * self.input;
        let output = usage.output_tokens.unwrap_or(0) as f64 * self.output;
        // Cache reads without a dedicated price bill at the input rate.
        let cache_read =
            usage.cache_read_tokens.unwrap_or(0) as f64 * self.cache_read.unwrap_or(self.input);
        let cache_write = usage.cache_write_tokens.unwrap_or(0) as f64 * self.cache_write.unwrap_or(0.0);
        (input + output + cache_read + cache_write) / TOKENS_PER_UNIT
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable {
    models: HashMap<String, ModelPricing>,
}

impl PriceTable {
    pub fn new(models: HashMap<String, ModelPricing>) -> Self {
        Self { models }
    }

    pub fn with_model(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.models.insert(model.into(), pricing);
        self
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.models.get(model)
    }

    /// Incremental cost of one step. Unpriced models cost nothing.
    pub fn cost_for(&self, model: &str, usage: &Usage) -> f64 {
        self.get(model)
            .map(|pricing| pricing.cost(usage))
            .unwrap_or(0.0)
    }
}
