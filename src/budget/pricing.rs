//! Model pricing definitions for cost calculation.
//!
//! Used when a provider does not report a call's cost itself. Prices are per
//! million tokens and can be overridden via environment variables or
//! programmatically.

use std::collections::HashMap;
use std::sync::LazyLock;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{fallback_keys, normalize_model_name};
use crate::types::Usage;

const TOKENS_PER_MTOK: Decimal = dec!(1_000_000);
const ENV_PREFIX: &str = "LLM_INVOKE_PRICING";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_mtok: Decimal,
    pub output_per_mtok: Decimal,
}

impl ModelPricing {
    pub const fn new(input_per_mtok: Decimal, output_per_mtok: Decimal) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    pub fn calculate(&self, usage: &Usage) -> Decimal {
        let input = Decimal::from(usage.prompt_tokens) * self.input_per_mtok;
        let output = Decimal::from(usage.completion_tokens) * self.output_per_mtok;
        (input + output) / TOKENS_PER_MTOK
    }
}

#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
    default: Option<ModelPricing>,
}

impl PricingTable {
    pub fn builder() -> PricingTableBuilder {
        PricingTableBuilder::new()
    }

    /// Pricing for `model`, matched like context windows: normalized key,
    /// then shorter prefixes, then the table default if one was set.
    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        let key = normalize_model_name(model);
        std::iter::once(key.as_str())
            .chain(fallback_keys(&key))
            .find_map(|candidate| self.models.get(candidate))
            .or(self.default.as_ref())
    }

    /// `None` when the model is unpriced.
    pub fn calculate(&self, model: &str, usage: &Usage) -> Option<Decimal> {
        self.get(model).map(|pricing| pricing.calculate(usage))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PricingTableBuilder {
    models: HashMap<String, ModelPricing>,
    default: Option<ModelPricing>,
}

impl PricingTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(mut self) -> Self {
        for (name, input, output) in [
            ("claude-opus-4-6", dec!(5), dec!(25)),
            ("claude-opus-4-5", dec!(5), dec!(25)),
            ("claude-opus-4-1", dec!(15), dec!(75)),
            ("claude-opus-4", dec!(15), dec!(75)),
            ("claude-sonnet-4-5", dec!(3), dec!(15)),
            ("claude-sonnet-4", dec!(3), dec!(15)),
            ("claude-3-7-sonnet", dec!(3), dec!(15)),
            ("claude-haiku-4-5", dec!(1), dec!(5)),
            ("claude-3-5-haiku", dec!(0.80), dec!(4)),
            ("gpt-5", dec!(1.25), dec!(10)),
            ("gpt-5-mini", dec!(0.25), dec!(2)),
            ("gpt-5-nano", dec!(0.05), dec!(0.40)),
            ("gpt-4.1", dec!(2), dec!(8)),
            ("gpt-4.1-mini", dec!(0.40), dec!(1.60)),
            ("gpt-4o", dec!(2.50), dec!(10)),
            ("gpt-4o-mini", dec!(0.15), dec!(0.60)),
            ("o3", dec!(2), dec!(8)),
            ("o4-mini", dec!(1.10), dec!(4.40)),
            ("gemini-2.5-pro", dec!(1.25), dec!(10)),
            ("gemini-2.5-flash", dec!(0.30), dec!(2.50)),
            ("deepseek-chat", dec!(0.27), dec!(1.10)),
        ] {
            self.models
                .insert(name.to_string(), ModelPricing::new(input, output));
        }
        self
    }

    /// Register pricing under the normalized form of `name`.
    pub fn model(mut self, name: impl AsRef<str>, pricing: ModelPricing) -> Self {
        self.models
            .insert(normalize_model_name(name.as_ref()), pricing);
        self
    }

    pub fn model_base(self, name: impl AsRef<str>, input: Decimal, output: Decimal) -> Self {
        self.model(name, ModelPricing::new(input, output))
    }

    /// Pricing for models with no entry. Without it, unknown models are unpriced.
    pub fn default_pricing(mut self, pricing: ModelPricing) -> Self {
        self.default = Some(pricing);
        self
    }

    /// Defaults, then `LLM_INVOKE_PRICING_<MODEL>_{INPUT,OUTPUT}` overrides for
    /// every known model. `<MODEL>` is the key upper-cased with `-` and `.`
    /// replaced by `_`.
    pub fn from_env(mut self) -> Self {
        self = self.with_defaults();

        let overrides: Vec<(String, ModelPricing)> = self
            .models
            .keys()
            .filter_map(|name| Self::parse_env_pricing(name).map(|p| (name.clone(), p)))
            .collect();
        for (name, pricing) in overrides {
            tracing::debug!(model = %name, "pricing overridden from environment");
            self.models.insert(name, pricing);
        }

        self
    }

    fn env_name(model: &str) -> String {
        model
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn parse_env_pricing(model: &str) -> Option<ModelPricing> {
        let name = Self::env_name(model);
        let input = std::env::var(format!("{ENV_PREFIX}_{name}_INPUT"))
            .ok()?
            .parse::<Decimal>()
            .ok()?;
        let output = std::env::var(format!("{ENV_PREFIX}_{name}_OUTPUT"))
            .ok()?
            .parse::<Decimal>()
            .ok()?;
        Some(ModelPricing::new(input, output))
    }

    pub fn build(self) -> PricingTable {
        PricingTable {
            models: self.models,
            default: self.default,
        }
    }
}

static GLOBAL_PRICING: LazyLock<PricingTable> =
    LazyLock::new(|| PricingTableBuilder::new().from_env().build());

pub fn global_pricing_table() -> &'static PricingTable {
    &GLOBAL_PRICING
}
