//! Token pricing used for cost estimates.
//!
//! B_i: Published rates drift; the built-in table is an estimate and the
//! `[[pricing]]` config section overrides it per model prefix.

use crate::models::PricingOverride;

/// Rate used for models that match no known prefix.
pub const DEFAULT_INPUT_PRICE_PER_1M: f64 = 1.0;
pub const DEFAULT_OUTPUT_PRICE_PER_1M: f64 = 3.0;

/// Price of one million tokens for models matching `prefix`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPrice {
    pub prefix: String,
    pub input_price_per_1m: f64,
    pub output_price_per_1m: f64,
}

impl ModelPrice {
    fn new(prefix: &str, input: f64, output: f64) -> Self {
        Self {
            prefix: prefix.to_string(),
            input_price_per_1m: input,
            output_price_per_1m: output,
        }
    }

    /// Calculate cost for a request.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_price_per_1m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_price_per_1m;
        input_cost + output_cost
    }
}

/// Prefix-matched price table. The longest matching prefix wins.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: Vec<ModelPrice>,
    fallback: ModelPrice,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            prices: vec![
                ModelPrice::new("gpt-4o-mini", 0.15, 0.60),
                ModelPrice::new("gpt-4o", 2.50, 10.00),
                ModelPrice::new("gpt-4.1-nano", 0.10, 0.40),
                ModelPrice::new("gpt-4.1-mini", 0.40, 1.60),
                ModelPrice::new("gpt-4.1", 2.00, 8.00),
                ModelPrice::new("gpt-5-nano", 0.05, 0.40),
                ModelPrice::new("gpt-5-mini", 0.25, 2.00),
                ModelPrice::new("gpt-5", 1.25, 10.00),
                ModelPrice::new("o1-mini", 1.10, 4.40),
                ModelPrice::new("o1", 15.00, 60.00),
                ModelPrice::new("o3-mini", 1.10, 4.40),
                ModelPrice::new("o3", 2.00, 8.00),
                ModelPrice::new("o4-mini", 1.10, 4.40),
            ],
            fallback: ModelPrice::new("", DEFAULT_INPUT_PRICE_PER_1M, DEFAULT_OUTPUT_PRICE_PER_1M),
        }
    }
}

impl PricingTable {
    /// Built-in table with config overrides layered on top. Prefixes are
    /// matched case-insensitively.
    pub fn with_overrides(overrides: &[PricingOverride]) -> Self {
        let mut table = Self::default();
        for o in overrides {
            let prefix = o.prefix.to_ascii_lowercase();
            let price = ModelPrice::new(&prefix, o.input_price_per_1m, o.output_price_per_1m);
            match table.prices.iter_mut().find(|p| p.prefix == prefix) {
                Some(existing) => *existing = price,
                None => table.prices.push(price),
            }
        }
        table
    }

    /// Price entry for a model id (provider path stripped).
    pub fn lookup(&self, model: &str) -> &ModelPrice {
        let name = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();
        self.prices
            .iter()
            .filter(|p| name.starts_with(&p.prefix))
            .max_by_key(|p| p.prefix.len())
            .unwrap_or(&self.fallback)
    }

    /// Estimated cost in USD of one call.
    pub fn estimate(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.lookup(model).cost(input_tokens, output_tokens)
    }
}
