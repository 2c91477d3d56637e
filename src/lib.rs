// src/lib.rs

// Import the top-level `cloudllm` module.
pub mod cloudllm;

// If you want to provide direct access (without having to navigate through the whole hierarchy) to certain types or functionalities at the crate level, you can use re-exports:

// Re-exporting key items for easier external access.
pub use cloudllm::client_wrapper::{ClientWrapper, Message, Role};
pub use cloudllm::llm_session::LLMSession;
// If you wish, you can also re-export specific clients or functionalities from the `clients` submodule:
// pub use cloudllm::clients::openai;

// The tree-native runtime's public surface. `tree::Role` is exported as `NodeRole` to avoid
// colliding with `client_wrapper::Role` above.
pub use cloudllm::bot::{Bot, Turn};
pub use cloudllm::callbacks::{CancellationToken, NoopCallbacks, StepCallbacks};
pub use cloudllm::config::{AutosavePolicy, RuntimeConfig};
pub use cloudllm::credentials::credentials;
pub use cloudllm::engine::{Engine, EngineCatalog, Provider, TokenPrice};
pub use cloudllm::error::{CoreError, CoreResult};
pub use cloudllm::mailbox::{Mailbox, RawResponse, RetryConfig, UsageReport};
pub use cloudllm::navigator::{LeafPreview, Navigator};
pub use cloudllm::persistence::BotDocument;
pub use cloudllm::tool_registry::{BotToolRegistry, ToolRegistrySnapshot};
pub use cloudllm::tree::{NodeId, Role as NodeRole, Tree};

/// Install `env_logger` as the global logger, ignoring the error raised when a logger is already
/// set (tests in the same binary call this repeatedly).
pub fn init_logger() {
    let _ = env_logger::try_init();
}
