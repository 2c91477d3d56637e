//! Engine catalog: provider/model/cost metadata.
//!
//! Grounded in the `Model` enum + string-converter pattern already used per-client in
//! [`crate::cloudllm::clients::openai`] and [`crate::cloudllm::clients::claude`], generalized
//! into a single provider-agnostic catalog so the rest of the runtime (step machine, mailbox
//! dispatch, persistence) can work with one `Engine` value instead of a client-specific enum.

use std::fmt;

/// The wire protocol family a model speaks. Selects which [`crate::cloudllm::mailbox::Mailbox`]
/// adapter handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAI,
    Gemini,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::OpenAI => write!(f, "openai"),
            Provider::Gemini => write!(f, "gemini"),
        }
    }
}

/// Price per single token, in USD, for a model.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TokenPrice {
    pub input_usd_per_token: f64,
    pub output_usd_per_token: f64,
}

/// One entry of the engine catalog: a provider, its wire model id, and pricing.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Engine {
    pub provider: Provider,
    /// Wire model id, e.g. `"claude-sonnet-4-0"`, `"gpt-4.1"`, `"gemini-1.5-pro"`.
    pub model_id: String,
    pub price: TokenPrice,
}

impl Engine {
    pub fn new(provider: Provider, model_id: impl Into<String>, price: TokenPrice) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            price,
        }
    }

    /// Deterministic cost for a completed call.
    pub fn cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        input_tokens as f64 * self.price.input_usd_per_token
            + output_tokens as f64 * self.price.output_usd_per_token
    }
}

/// Built-in catalog of known engines (Jan 2025 snapshot pricing, matching the model lists already
/// maintained per-client in `clients::openai`, `clients::claude`, `clients::gemini`, `clients::grok`).
pub struct EngineCatalog {
    entries: Vec<Engine>,
}

impl EngineCatalog {
    /// The catalog shipped with the runtime. Applications may extend it via [`EngineCatalog::push`]
    /// without needing to change any other component — adding a model requires only a wire id,
    /// provider tag, and prices.
    pub fn builtin() -> Self {
        let entries = vec![
            Engine::new(
                Provider::Anthropic,
                "claude-opus-4-1",
                TokenPrice {
                    input_usd_per_token: 15.0 / 1_000_000.0,
                    output_usd_per_token: 75.0 / 1_000_000.0,
                },
            ),
            Engine::new(
                Provider::Anthropic,
                "claude-sonnet-4-0",
                TokenPrice {
                    input_usd_per_token: 3.0 / 1_000_000.0,
                    output_usd_per_token: 15.0 / 1_000_000.0,
                },
            ),
            Engine::new(
                Provider::Anthropic,
                "claude-haiku-3-5-haiku-latest",
                TokenPrice {
                    input_usd_per_token: 0.8 / 1_000_000.0,
                    output_usd_per_token: 4.0 / 1_000_000.0,
                },
            ),
            Engine::new(
                Provider::OpenAI,
                "gpt-4.1",
                TokenPrice {
                    input_usd_per_token: 2.0 / 1_000_000.0,
                    output_usd_per_token: 8.0 / 1_000_000.0,
                },
            ),
            Engine::new(
                Provider::OpenAI,
                "gpt-4.1-mini",
                TokenPrice {
                    input_usd_per_token: 0.4 / 1_000_000.0,
                    output_usd_per_token: 1.6 / 1_000_000.0,
                },
            ),
            Engine::new(
                Provider::Gemini,
                "gemini-1.5-pro",
                TokenPrice {
                    input_usd_per_token: 1.25 / 1_000_000.0,
                    output_usd_per_token: 5.0 / 1_000_000.0,
                },
            ),
        ];
        Self { entries }
    }

    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register or replace a catalog entry.
    pub fn push(&mut self, engine: Engine) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.model_id == engine.model_id)
        {
            *existing = engine;
        } else {
            self.entries.push(engine);
        }
    }

    /// Reverse lookup by wire model id.
    pub fn lookup(&self, model_id: &str) -> Option<&Engine> {
        self.entries.iter().find(|e| e.model_id == model_id)
    }

    pub fn provider_of(&self, model_id: &str) -> Option<Provider> {
        self.lookup(model_id).map(|e| e.provider)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Engine> {
        self.entries.iter()
    }
}

impl Default for EngineCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_provider() {
        let catalog = EngineCatalog::builtin();
        let engine = catalog.lookup("claude-sonnet-4-0").unwrap();
        assert_eq!(engine.provider, Provider::Anthropic);
    }

    #[test]
    fn unknown_model_resolves_to_none() {
        let catalog = EngineCatalog::builtin();
        assert!(catalog.lookup("not-a-real-model").is_none());
    }

    #[test]
    fn push_replaces_existing_entry_by_model_id() {
        let mut catalog = EngineCatalog::empty();
        catalog.push(Engine::new(
            Provider::OpenAI,
            "custom-model",
            TokenPrice {
                input_usd_per_token: 1.0,
                output_usd_per_token: 1.0,
            },
        ));
        catalog.push(Engine::new(
            Provider::OpenAI,
            "custom-model",
            TokenPrice {
                input_usd_per_token: 2.0,
                output_usd_per_token: 2.0,
            },
        ));
        assert_eq!(catalog.iter().count(), 1);
        assert_eq!(catalog.lookup("custom-model").unwrap().price.input_usd_per_token, 2.0);
    }

    #[test]
    fn cost_is_deterministic() {
        let engine = Engine::new(
            Provider::Anthropic,
            "m",
            TokenPrice {
                input_usd_per_token: 0.001,
                output_usd_per_token: 0.002,
            },
        );
        assert!((engine.cost(1000, 500) - 2.0).abs() < 1e-9);
    }
}
