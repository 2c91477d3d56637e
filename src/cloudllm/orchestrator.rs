//! Functional-prompt orchestrator: chain/branch/prompt-while/parallel variants and recombination,
//! built over [`Bot`]. An `Orchestration`-style builder restructured around a tree/cursor model:
//! each variant runs `tokio::spawn`-based fan-out where useful, but operates on branches of one
//! conversation tree instead of a flat multi-agent transcript.

use crate::cloudllm::bot::{Bot, Turn};
use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::tree::{NodeId, Role};
use async_trait::async_trait;
use std::sync::Arc;

/// A predicate over post-turn bot state, used by [`prompt_while`]/[`chain_while`]/[`branch_while`].
pub type StopCondition = Arc<dyn Fn(&Bot) -> bool + Send + Sync>;

fn last_assistant_had_tool_calls(bot: &Bot) -> bool {
    !bot.tree.get(bot.cursor()).tool_calls.is_empty()
}

/// Stops as soon as the last assistant turn made no tool calls.
pub fn tool_not_used() -> StopCondition {
    Arc::new(|bot| !last_assistant_had_tool_calls(bot))
}

/// Stops once the last assistant response contains `marker` (e.g. `"DONE"`, `"READY"`).
pub fn said(marker: impl Into<String>) -> StopCondition {
    let marker: String = marker.into();
    Arc::new(move |bot| bot.tree.get(bot.cursor()).content.contains(marker.as_str()))
}

/// Stops after `n` evaluations — a simple depth cap usable directly as a `prompt_while` stop
/// condition instead of (or alongside) its `max_iterations` parameter.
pub fn n_iterations(n: usize) -> StopCondition {
    let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    Arc::new(move |_bot| counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1 >= n)
}

/// Stops when the last assistant turn's tool results encode a tool execution failure (the
/// registry prefixes failures with `"error:"`; see [`crate::cloudllm::tool_registry`]).
pub fn error_in_response() -> StopCondition {
    Arc::new(|bot| {
        bot.tree
            .get(bot.cursor())
            .tool_results
            .iter()
            .any(|r| r.content.starts_with("error:"))
    })
}

/// Thin wrapper over [`Bot::respond`].
pub async fn single_prompt(bot: &mut Bot, prompt: &str) -> CoreResult<Turn> {
    bot.respond(prompt, Role::User).await
}

/// Sequential `respond` calls; each builds on the previous turn's context.
pub async fn chain(bot: &mut Bot, prompts: &[String]) -> CoreResult<Vec<Turn>> {
    let mut turns = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        turns.push(bot.respond(prompt, Role::User).await?);
    }
    Ok(turns)
}

/// Send `initial`, then repeat `continue_prompt` until `stop` holds. `max_iterations` is an
/// optional safety cap; `None` means no limit.
pub async fn prompt_while(
    bot: &mut Bot,
    initial: &str,
    continue_prompt: &str,
    stop: StopCondition,
    max_iterations: Option<usize>,
) -> CoreResult<Vec<Turn>> {
    let mut turns = vec![bot.respond(initial, Role::User).await?];
    let mut iterations = 1usize;
    while !stop(bot) {
        if let Some(max) = max_iterations {
            if iterations >= max {
                break;
            }
        }
        turns.push(bot.respond(continue_prompt, Role::User).await?);
        iterations += 1;
    }
    Ok(turns)
}

/// Each step of the chain may itself iterate until `stop` holds before moving to the next prompt.
pub async fn chain_while(
    bot: &mut Bot,
    prompts: &[String],
    continue_prompt: &str,
    stop: StopCondition,
    max_iterations_per_step: Option<usize>,
) -> CoreResult<Vec<Turn>> {
    let mut turns = Vec::new();
    for prompt in prompts {
        let mut step_turns =
            prompt_while(bot, prompt, continue_prompt, stop.clone(), max_iterations_per_step).await?;
        turns.append(&mut step_turns);
    }
    Ok(turns)
}

/// Run `prompt` on an isolated deep copy of `bot`, returning its response and the id of the
/// resulting node once re-attached under `bot`'s original cursor.
async fn run_isolated_branch(bot: &Bot, prompt: &str) -> CoreResult<(String, NodeId, Bot)> {
    let mut branch_bot = bot.deep_copy();
    let turn = branch_bot.respond(prompt, Role::User).await?;
    Ok((turn.response, turn.node, branch_bot))
}

/// From the current cursor, run each prompt as an independent sibling branch and graft each
/// branch's resulting subtree back under the original cursor. Branches share no state.
pub async fn branch(bot: &mut Bot, prompts: &[String]) -> CoreResult<Vec<(String, NodeId)>> {
    let original_cursor = bot.cursor();
    let mut out = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let (response, branch_root, mut branch_bot) = run_isolated_branch(bot, prompt).await?;
        graft_branch_subtree(bot, &mut branch_bot, original_cursor, branch_root);
        out.push((response, branch_root));
    }
    Ok(out)
}

/// As [`branch`], but each branch iterates to its own stop condition independently.
pub async fn branch_while(
    bot: &mut Bot,
    prompts: &[String],
    continue_prompt: &str,
    stop: StopCondition,
    max_iterations: Option<usize>,
) -> CoreResult<Vec<(String, NodeId)>> {
    let original_cursor = bot.cursor();
    let mut out = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let mut branch_bot = bot.deep_copy();
        let turns = prompt_while(&mut branch_bot, prompt, continue_prompt, stop.clone(), max_iterations).await?;
        let last = turns.last().expect("prompt_while always returns at least one turn");
        let branch_root_in_branch_tree = first_node_after(&branch_bot, original_cursor);
        graft_branch_subtree(bot, &mut branch_bot, original_cursor, branch_root_in_branch_tree);
        out.push((last.response.clone(), branch_root_in_branch_tree));
    }
    Ok(out)
}

/// The first node appended after `from` in a branch bot's tree — the root of what needs grafting.
fn first_node_after(branch_bot: &Bot, from: NodeId) -> NodeId {
    *branch_bot
        .tree
        .children_of(from)
        .last()
        .expect("branch must have appended at least one node under the anchor")
}

/// Graft a branch's newly produced subtree back onto the original bot's tree, re-parenting the
/// branch root under `original_cursor`. Node ids differ between the two trees (deep copies are
/// structurally identical up to `original_cursor`, so this walks both trees in lockstep and
/// copies only the nodes that exist in the branch but not yet in the original).
fn graft_branch_subtree(original: &mut Bot, branch_bot: &mut Bot, original_cursor: NodeId, branch_root: NodeId) {
    fn copy_subtree(original: &mut Bot, branch_tree: &crate::cloudllm::tree::Tree, parent: NodeId, branch_node: NodeId) -> NodeId {
        let node = branch_tree.get(branch_node);
        let new_id = original.tree.append_reply(parent, node.role, node.content.clone(), node.tool_calls.clone());
        original.tree.get_mut(new_id).tool_results = node.tool_results.clone();
        original.tree.get_mut(new_id).attributes = node.attributes.clone();
        for &child in branch_tree.children_of(branch_node) {
            copy_subtree(original, branch_tree, new_id, child);
        }
        new_id
    }
    copy_subtree(original, &branch_bot.tree, original_cursor, branch_root);
}

/// Run `prompts` as independent branches concurrently (`tokio::spawn`), returning results in
/// input order regardless of completion order.
pub async fn par_branch(bot: &mut Bot, prompts: &[String]) -> CoreResult<Vec<(String, NodeId)>> {
    let original_cursor = bot.cursor();
    let handles: Vec<_> = prompts
        .iter()
        .cloned()
        .map(|prompt| {
            let snapshot = bot.deep_copy();
            tokio::spawn(async move {
                let mut branch_bot = snapshot;
                let turn = branch_bot.respond(&prompt, Role::User).await?;
                Ok::<_, CoreError>((turn.response, turn.node, branch_bot))
            })
        })
        .collect();

    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        let (response, branch_root, mut branch_bot) = handle
            .await
            .map_err(|e| CoreError::ProviderFatal(format!("branch task panicked: {}", e)))??;
        graft_branch_subtree(bot, &mut branch_bot, original_cursor, branch_root);
        out.push((response, branch_root));
    }
    Ok(out)
}

/// As [`par_branch`], but each branch iterates via [`prompt_while`] to its own stop condition
/// independently, running concurrently (`tokio::spawn`) rather than sequentially like
/// [`branch_while`].
pub async fn par_branch_while(
    bot: &mut Bot,
    prompts: &[String],
    continue_prompt: &str,
    stop: StopCondition,
    max_iterations: Option<usize>,
) -> CoreResult<Vec<(String, NodeId)>> {
    let original_cursor = bot.cursor();
    let handles: Vec<_> = prompts
        .iter()
        .cloned()
        .map(|prompt| {
            let mut branch_bot = bot.deep_copy();
            let continue_prompt = continue_prompt.to_string();
            let stop = stop.clone();
            tokio::spawn(async move {
                let turns =
                    prompt_while(&mut branch_bot, &prompt, &continue_prompt, stop, max_iterations)
                        .await?;
                let last = turns
                    .into_iter()
                    .last()
                    .expect("prompt_while always returns at least one turn");
                Ok::<_, CoreError>((last, branch_bot))
            })
        })
        .collect();

    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        let (last, mut branch_bot) = handle
            .await
            .map_err(|e| CoreError::ProviderFatal(format!("branch task panicked: {}", e)))??;
        let branch_root_in_branch_tree = first_node_after(&branch_bot, original_cursor);
        graft_branch_subtree(bot, &mut branch_bot, original_cursor, branch_root_in_branch_tree);
        out.push((last.response, branch_root_in_branch_tree));
    }
    Ok(out)
}

/// Enumerate leaves under the cursor and run `prompt` on each, skipping leaves bearing any label
/// in `skip_labels`. Parallel by default.
pub async fn broadcast_to_leaves(
    bot: &mut Bot,
    prompt: &str,
    skip_labels: &[String],
) -> CoreResult<Vec<(NodeId, String)>> {
    let leaves = bot.navigator.leaves(&bot.tree);
    let labeled: std::collections::HashSet<NodeId> = bot
        .navigator
        .labels()
        .iter()
        .filter(|(name, _)| skip_labels.iter().any(|s| s == *name))
        .map(|(_, &id)| id)
        .collect();

    let targets: Vec<NodeId> = leaves
        .into_iter()
        .map(|l| l.node)
        .filter(|id| !labeled.contains(id))
        .collect();

    let handles: Vec<_> = targets
        .iter()
        .map(|&leaf| {
            let mut branch_bot = bot.deep_copy();
            branch_bot.navigator = crate::cloudllm::navigator::Navigator::at(&branch_bot.tree, leaf);
            let prompt = prompt.to_string();
            tokio::spawn(async move {
                let turn = branch_bot.respond(&prompt, Role::User).await?;
                Ok::<_, CoreError>((leaf, turn.response, turn.node, branch_bot))
            })
        })
        .collect();

    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        let (leaf, response, branch_root, mut branch_bot) = handle
            .await
            .map_err(|e| CoreError::ProviderFatal(format!("broadcast task panicked: {}", e)))??;
        graft_branch_subtree(bot, &mut branch_bot, leaf, branch_root);
        out.push((leaf, response));
    }
    Ok(out)
}

type LeafFuture = std::pin::Pin<Box<dyn std::future::Future<Output = CoreResult<(String, NodeId, Bot)>> + Send>>;

/// As [`broadcast_to_leaves`], but runs an arbitrary functional-prompt `op` against each branch
/// bot instead of a single literal prompt, so callers can compose `chain`/`prompt_while`/custom
/// logic per leaf. `op` receives an owned deep copy of the bot positioned at that leaf and must
/// return its response, the id of the new leaf node, and the (possibly further-mutated) bot.
pub async fn broadcast_fp<F>(
    bot: &mut Bot,
    skip_labels: &[String],
    op: F,
) -> CoreResult<Vec<(NodeId, String)>>
where
    F: Fn(Bot) -> LeafFuture + Send + Sync + 'static,
{
    let leaves = bot.navigator.leaves(&bot.tree);
    let labeled: std::collections::HashSet<NodeId> = bot
        .navigator
        .labels()
        .iter()
        .filter(|(name, _)| skip_labels.iter().any(|s| s == *name))
        .map(|(_, &id)| id)
        .collect();

    let targets: Vec<NodeId> = leaves
        .into_iter()
        .map(|l| l.node)
        .filter(|id| !labeled.contains(id))
        .collect();

    let op = Arc::new(op);
    let handles: Vec<_> = targets
        .iter()
        .map(|&leaf| {
            let mut branch_bot = bot.deep_copy();
            branch_bot.navigator = crate::cloudllm::navigator::Navigator::at(&branch_bot.tree, leaf);
            let op = op.clone();
            tokio::spawn(async move { (leaf, op(branch_bot).await) })
        })
        .collect();

    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        let (leaf, result) = handle
            .await
            .map_err(|e| CoreError::ProviderFatal(format!("broadcast task panicked: {}", e)))?;
        let (response, branch_root, mut branch_bot) = result?;
        graft_branch_subtree(bot, &mut branch_bot, leaf, branch_root);
        out.push((leaf, response));
    }
    Ok(out)
}

/// A pure `responses[] -> response` fold. Async because merge/vote/judge strategies need to call
/// out to a helper bot.
#[async_trait]
pub trait Recombinator: Send + Sync {
    async fn recombine(&self, responses: &[String]) -> CoreResult<String>;
}

/// Joins responses with a separator. The simplest recombinator; no helper bot required.
pub struct Concatenate {
    pub separator: String,
}

impl Default for Concatenate {
    fn default() -> Self {
        Self { separator: "\n\n---\n\n".to_string() }
    }
}

#[async_trait]
impl Recombinator for Concatenate {
    async fn recombine(&self, responses: &[String]) -> CoreResult<String> {
        Ok(responses.join(&self.separator))
    }
}

/// Which recombination strategy a helper-bot-backed recombinator applies.
pub enum JudgeStrategy {
    /// Ask the helper bot to synthesize one answer drawing on all responses.
    Merge,
    /// Ask the helper bot to pick the single best response verbatim.
    Vote,
    /// Ask the helper bot to critique and return a final, judged answer.
    Judge,
}

/// Recombinator that delegates to a helper bot (usually a small/cheap model) per
/// [`JudgeStrategy`]: merge, vote, and judge strategies share one implementation parameterized
/// by prompt framing.
pub struct AgentRecombinator {
    pub judge: tokio::sync::Mutex<Bot>,
    pub strategy: JudgeStrategy,
}

impl AgentRecombinator {
    pub fn new(judge: Bot, strategy: JudgeStrategy) -> Self {
        Self { judge: tokio::sync::Mutex::new(judge), strategy }
    }
}

#[async_trait]
impl Recombinator for AgentRecombinator {
    async fn recombine(&self, responses: &[String]) -> CoreResult<String> {
        let instruction = match self.strategy {
            JudgeStrategy::Merge => {
                "Synthesize a single best answer drawing on the candidates below."
            }
            JudgeStrategy::Vote => "Pick the single best candidate below and return it verbatim.",
            JudgeStrategy::Judge => {
                "Critique the candidates below and return your final, judged answer."
            }
        };
        let mut prompt = String::from(instruction);
        prompt.push('\n');
        for (i, r) in responses.iter().enumerate() {
            prompt.push_str(&format!("\nCandidate {}:\n{}\n", i + 1, r));
        }
        let mut judge = self.judge.lock().await;
        let turn = judge.respond(&prompt, Role::User).await?;
        Ok(turn.response)
    }
}

/// Branch over `prompts`, then fold the resulting responses via `recombinator` into a single
/// node re-attached under the original cursor.
pub async fn tree_of_thought(
    bot: &mut Bot,
    prompts: &[String],
    recombinator: &dyn Recombinator,
) -> CoreResult<(String, NodeId)> {
    let original_cursor = bot.cursor();
    let branches = branch(bot, prompts).await?;
    let responses: Vec<String> = branches.iter().map(|(r, _)| r.clone()).collect();
    let combined = recombinator.recombine(&responses).await?;
    let node = bot.tree.append_reply(original_cursor, Role::Assistant, combined.clone(), vec![]);
    bot.navigator.set_cursor(node);
    Ok((combined, node))
}

/// Fold the current leaf set via `recombinator`.
pub async fn combine_leaves(bot: &mut Bot, recombinator: &dyn Recombinator) -> CoreResult<(String, NodeId)> {
    let cursor = bot.cursor();
    let leaves = bot.navigator.leaves(&bot.tree);
    let responses: Vec<String> = leaves.iter().map(|l| bot.tree.get(l.node).content.clone()).collect();
    let combined = recombinator.recombine(&responses).await?;
    let node = bot.tree.append_reply(cursor, Role::Assistant, combined.clone(), vec![]);
    bot.navigator.set_cursor(node);
    Ok((combined, node))
}

/// Run the same prompt across a list of distinct bots in parallel (e.g. an A/B across providers).
pub async fn par_dispatch(bots: &mut [Bot], prompt: &str) -> Vec<Option<Turn>> {
    let handles: Vec<_> = bots
        .iter()
        .map(|bot| {
            let mut copy = bot.deep_copy();
            let prompt = prompt.to_string();
            tokio::spawn(async move {
                let result = copy.respond(&prompt, Role::User).await;
                (copy, result)
            })
        })
        .collect();

    let mut out = Vec::with_capacity(handles.len());
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok((copy, Ok(turn))) => {
                bots[i] = copy;
                out.push(Some(turn));
            }
            _ => out.push(None),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::engine::{Engine, Provider, TokenPrice};
    use crate::cloudllm::mailbox::{Mailbox, RawResponse, UsageReport};
    use crate::cloudllm::tool_protocol::ToolMetadata;
    use crate::cloudllm::tree::{ConversationMessage, ToolCallRecord, ToolResultRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMailbox {
        engine: Engine,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Mailbox for CountingMailbox {
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
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            format!("response-{}", n)
        }
        fn extract_tool_calls(&self, _r: &RawResponse) -> Vec<ToolCallRecord> {
            vec![]
        }
        fn extract_usage(&self, _r: &RawResponse) -> UsageReport {
            UsageReport::default()
        }
        fn attach_results_to_next_message(&self, _r: &[ToolResultRecord]) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    fn bot_with_counter(counter: Arc<AtomicUsize>) -> Bot {
        let engine = Engine::new(
            Provider::Anthropic,
            "claude-sonnet-4-0",
            TokenPrice { input_usd_per_token: 0.0, output_usd_per_token: 0.0 },
        );
        Bot::new("t", Arc::new(CountingMailbox { engine, counter }))
    }

    #[tokio::test]
    async fn chain_builds_on_previous_context() {
        let mut bot = bot_with_counter(Arc::new(AtomicUsize::new(0)));
        let turns = chain(
            &mut bot,
            &["first".to_string(), "second".to_string(), "third".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(turns.len(), 3);
    }

    #[tokio::test]
    async fn branch_produces_isolated_siblings_and_restores_original_cursor_tree() {
        let mut bot = bot_with_counter(Arc::new(AtomicUsize::new(0)));
        let pre_branch_cursor = bot.cursor();
        let results = branch(&mut bot, &["opinion a".to_string(), "opinion b".to_string()])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(bot.tree.children_of(pre_branch_cursor).len(), 2);
    }

    #[tokio::test]
    async fn par_branch_returns_results_in_input_order() {
        let mut bot = bot_with_counter(Arc::new(AtomicUsize::new(0)));
        let results = par_branch(
            &mut bot,
            &["a".to_string(), "b".to_string(), "c".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn concatenate_recombinator_joins_in_order() {
        let recombinator = Concatenate::default();
        let combined = recombinator
            .recombine(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(combined.starts_with('a'));
        assert!(combined.ends_with('b'));
    }

    #[tokio::test]
    async fn par_branch_while_iterates_each_branch_independently() {
        let mut bot = bot_with_counter(Arc::new(AtomicUsize::new(0)));
        let pre_branch_cursor = bot.cursor();
        let results = par_branch_while(
            &mut bot,
            &["a".to_string(), "b".to_string()],
            "continue",
            tool_not_used(),
            Some(5),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(bot.tree.children_of(pre_branch_cursor).len(), 2);
    }

    #[tokio::test]
    async fn prompt_while_stops_when_tool_not_used() {
        let mut bot = bot_with_counter(Arc::new(AtomicUsize::new(0)));
        let turns = prompt_while(&mut bot, "start", "continue", tool_not_used(), Some(5))
            .await
            .unwrap();
        // CountingMailbox never produces tool calls, so tool_not_used is true on turn 1.
        assert_eq!(turns.len(), 1);
    }
}
