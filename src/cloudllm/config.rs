//! Ambient runtime configuration.
//!
//! A plain struct with a hand-written `Default` — no TOML/YAML/file-parsing dependency is
//! introduced just to hold a save directory and a timeout.

use std::path::PathBuf;

/// Whether autosave overwrites the bot's last save path, or always writes a fresh timestamped
/// file. Left as an explicit runtime choice rather than hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosavePolicy {
    /// Overwrite the path the bot was last saved to or loaded from (the default).
    OverwriteLastPath,
    /// Always write `<bot_name>@<utc_timestamp>.bot` in `save_dir`, never overwriting.
    AlwaysTimestamped,
}

impl Default for AutosavePolicy {
    fn default() -> Self {
        AutosavePolicy::OverwriteLastPath
    }
}

/// Ambient runtime configuration: where bots autosave, how long adapter calls may take, and the
/// default autosave discipline.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory autosave writes into when the bot has no prior save path.
    pub save_dir: PathBuf,
    pub autosave_policy: AutosavePolicy,
    /// Default timeout for a single adapter `send` call.
    pub request_timeout: std::time::Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("."),
            autosave_policy: AutosavePolicy::default(),
            request_timeout: std::time::Duration::from_secs(60),
        }
    }
}
