//! A single credential lookup point. The core reads provider API keys only through this
//! function; it never writes them to disk, and a `.bot` file never contains one.

use crate::cloudllm::engine::Provider;

fn env_var_for(provider: Provider) -> &'static str {
    match provider {
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::OpenAI => "OPENAI_API_KEY",
        Provider::Gemini => "GEMINI_API_KEY",
    }
}

/// Resolve the API key for `provider` from its conventional environment variable.
pub fn credentials(provider: Provider) -> Result<String, std::env::VarError> {
    std::env::var(env_var_for(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_provider_maps_to_a_distinct_env_var() {
        assert_eq!(env_var_for(Provider::Anthropic), "ANTHROPIC_API_KEY");
        assert_eq!(env_var_for(Provider::OpenAI), "OPENAI_API_KEY");
        assert_eq!(env_var_for(Provider::Gemini), "GEMINI_API_KEY");
    }
}
