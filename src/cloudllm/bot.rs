//! `Bot`: the process-visible object binding an engine, a conversation tree, a tool registry, and
//! the step machine that drives turns. Tree-native (cursor + branch-aware), unlike
//! [`crate::cloudllm::llm_session::LLMSession`]'s flat single-session transcript.

use crate::cloudllm::callbacks::{CancellationToken, NoopCallbacks, StepCallbacks};
use crate::cloudllm::config::{AutosavePolicy, RuntimeConfig};
use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::mailbox::Mailbox;
use crate::cloudllm::navigator::Navigator;
use crate::cloudllm::persistence::{self, BotDocument};
use crate::cloudllm::tool_registry::BotToolRegistry;
use crate::cloudllm::tree::{NodeId, Role, Tree};
use std::path::PathBuf;
use std::sync::Arc;

/// A bot's conversation turn. Created by [`Bot::respond`], which drives the underlying
/// [`Bot::step`] tool loop.
pub struct Turn {
    pub response: String,
    pub node: NodeId,
}

pub struct Bot {
    pub name: String,
    pub role: String,
    pub role_description: String,
    pub system_message: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub mailbox: Arc<dyn Mailbox>,
    pub tree: Tree,
    pub navigator: Navigator,
    pub tools: BotToolRegistry,
    pub autosave: bool,
    pub runtime_config: RuntimeConfig,
    pub last_save_path: Option<PathBuf>,
    pub callbacks: Arc<dyn StepCallbacks>,
    pub cancellation: CancellationToken,
    turn_in_flight: bool,
}

impl Bot {
    pub fn new(name: impl Into<String>, mailbox: Arc<dyn Mailbox>) -> Self {
        let tree = Tree::new();
        let navigator = Navigator::new(&tree);
        Self {
            name: name.into(),
            role: "assistant".to_string(),
            role_description: String::new(),
            system_message: String::new(),
            max_tokens: 4096,
            temperature: 0.7,
            mailbox,
            tree,
            navigator,
            tools: BotToolRegistry::new(),
            autosave: false,
            runtime_config: RuntimeConfig::default(),
            last_save_path: None,
            callbacks: Arc::new(NoopCallbacks),
            cancellation: CancellationToken::new(),
            turn_in_flight: false,
        }
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = message.into();
        self
    }

    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn StepCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn cursor(&self) -> NodeId {
        self.navigator.cursor()
    }

    /// Drive one user-visible turn: append the prompt, run the tool loop, and autosave if
    /// configured.
    pub async fn respond(&mut self, prompt: &str, role: Role) -> CoreResult<Turn> {
        if self.turn_in_flight {
            return Err(CoreError::ConcurrentTurnError);
        }
        self.turn_in_flight = true;
        let result = self.respond_inner(prompt, role).await;
        self.turn_in_flight = false;
        result
    }

    async fn respond_inner(&mut self, prompt: &str, role: Role) -> CoreResult<Turn> {
        let parent = self.navigator.cursor();
        let prompt_node = self.tree.append_reply(parent, role, prompt, vec![]);
        self.navigator.set_cursor(prompt_node);

        match self.step().await {
            Ok((text, node)) => {
                if self.autosave {
                    if let Err(e) = self.save_autosave().await {
                        log::error!("autosave failed for bot '{}': {}", self.name, e);
                    }
                }
                Ok(Turn { response: text, node })
            }
            Err(e) => {
                // Leave the cursor at the user-prompt node; the assistant node was never created.
                // Undoing the navigator's move into the prompt node is not needed since the
                // prompt node itself stays in the tree as valid history.
                self.tools.clear();
                Err(e)
            }
        }
    }

    /// The tool loop: send, extract, execute tools, resend, until the model returns a response
    /// with no tool calls. No hard iteration cap here; orchestration layers apply their own
    /// bounds.
    pub async fn step(&mut self) -> CoreResult<(String, NodeId)> {
        self.tools.clear();
        loop {
            if self.cancellation.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            self.callbacks.on_step_start("send");
            let messages = self.tree.build_messages(self.navigator.cursor());
            let request = self.mailbox.build_request(
                &self.system_message,
                &messages,
                self.tools.tools(),
                self.max_tokens,
                self.temperature,
            );
            let raw = self.mailbox.send(request).await.map_err(|e| {
                self.callbacks.on_error(&e);
                e
            })?;
            self.callbacks.on_step_complete("send");

            let usage = self.mailbox.extract_usage(&raw);
            self.callbacks.on_api_usage(&usage);

            let text = self.mailbox.extract_text(&raw);
            let tool_calls = self.mailbox.extract_tool_calls(&raw);

            let assistant_node =
                self.tree
                    .append_reply(self.navigator.cursor(), Role::Assistant, &text, tool_calls.clone());
            self.navigator.set_cursor(assistant_node);

            if tool_calls.is_empty() {
                return Ok((text, assistant_node));
            }

            self.tools.queue_requests(tool_calls);
            for pending in self.tree.get(assistant_node).tool_calls.clone() {
                self.callbacks.on_tool_start(&pending.name, &pending.arguments);
            }
            let results = self.tools.exec_requests().await;
            for r in &results {
                self.callbacks.on_tool_complete(&r.call_id, &r.content);
            }
            self.tree.get_mut(assistant_node).pending_results = results;
            self.tree.commit_pending_results(assistant_node);

            if self.cancellation.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
        }
    }

    pub fn to_document(&self) -> BotDocument {
        persistence::to_document(
            &self.name,
            &self.mailbox.engine().model_id,
            self.max_tokens,
            self.temperature,
            &self.role,
            &self.role_description,
            &self.system_message,
            &self.tree,
            self.navigator.cursor(),
            self.navigator.labels(),
            self.tools.snapshot(),
            self.autosave,
        )
    }

    /// Load tree/labels/tool-registry state from a document into this bot in place, preserving
    /// the caller-supplied mailbox (engine selection is an application concern at load time).
    pub fn load_document(&mut self, doc: &BotDocument) -> CoreResult<()> {
        let (tree, cursor, labels) = doc.tree_and_cursor()?;
        self.name = doc.name.clone();
        self.max_tokens = doc.max_tokens;
        self.temperature = doc.temperature;
        self.role = doc.role.clone();
        self.role_description = doc.role_description.clone();
        self.system_message = doc.system_message.clone();
        self.tree = tree;
        self.navigator = Navigator::at(&self.tree, cursor);
        for (name, id) in labels {
            self.navigator.labels_mut().insert(name, id);
        }
        self.tools = BotToolRegistry::from_snapshot(doc.tool_handler.clone())?;
        self.autosave = doc.autosave;
        Ok(())
    }

    async fn save_autosave(&mut self) -> CoreResult<()> {
        let path = persistence::resolve_autosave_path(
            self.runtime_config.autosave_policy,
            &self.runtime_config.save_dir,
            &self.name,
            self.last_save_path.as_deref(),
            chrono::Utc::now(),
        );
        self.save_to(&path).await
    }

    pub async fn save_to(&mut self, path: &std::path::Path) -> CoreResult<()> {
        let doc = self.to_document();
        let json = doc.to_json()?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| CoreError::PersistSchemaViolation(format!("writing {:?}: {}", path, e)))?;
        self.last_save_path = Some(path.to_path_buf());
        Ok(())
    }

    pub async fn load_from(&mut self, path: &std::path::Path) -> CoreResult<()> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::PersistSchemaViolation(format!("reading {:?}: {}", path, e)))?;
        let doc = BotDocument::from_json(&json)?;
        self.load_document(&doc)?;
        self.last_save_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Same-runtime deep copy preserving the live `function_map`: branch isolation copies the
    /// tree structurally but does not route through source rehydration on every branch, since
    /// the tools are already callable in this process.
    pub fn deep_copy(&self) -> Bot {
        Bot {
            name: self.name.clone(),
            role: self.role.clone(),
            role_description: self.role_description.clone(),
            system_message: self.system_message.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            mailbox: self.mailbox.clone(),
            tree: self.tree.clone(),
            navigator: Navigator::at(&self.tree, self.navigator.cursor()),
            tools: self.tools.clone(),
            autosave: false,
            runtime_config: self.runtime_config.clone(),
            last_save_path: None,
            callbacks: self.callbacks.clone(),
            cancellation: self.cancellation.child(),
            turn_in_flight: false,
        }
    }
}

/// Used only by [`AutosavePolicy`] consumers that want to branch on it without importing
/// `config` directly elsewhere.
pub use crate::cloudllm::config::AutosavePolicy as BotAutosavePolicy;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::engine::{Engine, Provider, TokenPrice};
    use crate::cloudllm::mailbox::{Mailbox, RawResponse, UsageReport};
    use crate::cloudllm::tool_protocol::ToolMetadata;
    use crate::cloudllm::tree::{ConversationMessage, ToolCallRecord, ToolResultRecord};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedMailbox {
        engine: Engine,
        responses: Mutex<Vec<(String, Vec<ToolCallRecord>)>>,
    }

    #[async_trait]
    impl Mailbox for ScriptedMailbox {
        fn engine(&self) -> &Engine {
            &self.engine
        }
        fn build_request(
            &self,
            _s: &str,
            _m: &[ConversationMessage],
            _t: &[ToolMetadata],
            _mt: u32,
            _tm: f32,
        ) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn send(&self, _r: serde_json::Value) -> Result<RawResponse, CoreError> {
            Ok(RawResponse(serde_json::json!({})))
        }
        fn extract_text(&self, _r: &RawResponse) -> String {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                String::new()
            } else {
                responses[0].0.clone()
            }
        }
        fn extract_tool_calls(&self, _r: &RawResponse) -> Vec<ToolCallRecord> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                vec![]
            } else {
                responses.remove(0).1
            }
        }
        fn extract_usage(&self, _r: &RawResponse) -> UsageReport {
            UsageReport::default()
        }
        fn attach_results_to_next_message(&self, _r: &[ToolResultRecord]) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    fn engine() -> Engine {
        Engine::new(
            Provider::Anthropic,
            "claude-sonnet-4-0",
            TokenPrice {
                input_usd_per_token: 0.0,
                output_usd_per_token: 0.0,
            },
        )
    }

    #[tokio::test]
    async fn respond_with_no_tool_calls_terminates_in_one_iteration() {
        let mailbox = Arc::new(ScriptedMailbox {
            engine: engine(),
            responses: Mutex::new(vec![("hi there".to_string(), vec![])]),
        });
        let mut bot = Bot::new("t", mailbox);
        let turn = bot.respond("hello", Role::User).await.unwrap();
        assert_eq!(turn.response, "hi there");
    }

    #[tokio::test]
    async fn concurrent_turn_is_rejected() {
        let mailbox = Arc::new(ScriptedMailbox {
            engine: engine(),
            responses: Mutex::new(vec![("ok".to_string(), vec![])]),
        });
        let mut bot = Bot::new("t", mailbox);
        bot.turn_in_flight = true;
        let err = bot.respond("hello", Role::User).await.unwrap_err();
        assert!(matches!(err, CoreError::ConcurrentTurnError));
    }

    #[tokio::test]
    async fn deep_copy_can_independently_respond() {
        let mailbox = Arc::new(ScriptedMailbox {
            engine: engine(),
            responses: Mutex::new(vec![("first".to_string(), vec![])]),
        });
        let mut bot = Bot::new("t", mailbox);
        bot.respond("hi", Role::User).await.unwrap();

        let mut copy = bot.deep_copy();
        assert_eq!(copy.tree.subtree_size(copy.tree.root()), bot.tree.subtree_size(bot.tree.root()));

        // mutate the copy; original must be unaffected (branch isolation)
        let mailbox2 = Arc::new(ScriptedMailbox {
            engine: engine(),
            responses: Mutex::new(vec![("second".to_string(), vec![])]),
        });
        copy.mailbox = mailbox2;
        copy.respond("more", Role::User).await.unwrap();
        assert_ne!(
            copy.tree.subtree_size(copy.tree.root()),
            bot.tree.subtree_size(bot.tree.root())
        );
    }
}
