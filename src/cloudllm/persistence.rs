//! Persistence: the portable `.bot` JSON document.
//!
//! Two copy disciplines are both required and must differ:
//!
//! - [`to_document`] / [`from_document`] — strict-JSON disk save/load. Any node attribute that
//!   is not already JSON (it always is, here — attributes are `serde_json::Value`) would fail
//!   loudly; the real failure mode this guards is non-JSON-representable *tool state*, which is
//!   why tool functions are never embedded in the document, only their source.
//! - [`crate::cloudllm::bot::Bot::deep_copy`] — the richer same-runtime path used by branch
//!   isolation, which preserves the live `function_map` instead of going through source
//!   rehydration on every branch.

use crate::cloudllm::config::AutosavePolicy;
use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::tool_registry::ToolRegistrySnapshot;
use crate::cloudllm::tree::{NodeData, NodeId, Role, Tree};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Recursive, disk-friendly mirror of a [`NodeData`]. Unlike the arena, replies are nested
/// directly so the document round-trips without needing stable arena indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoc {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<crate::cloudllm::tree::ToolCallRecord>,
    #[serde(default)]
    pub tool_results: Vec<crate::cloudllm::tree::ToolResultRecord>,
    #[serde(default)]
    pub pending_results: Vec<crate::cloudllm::tree::ToolResultRecord>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    pub node_class: String,
    #[serde(default)]
    pub replies: Vec<NodeDoc>,
}

fn node_to_doc(tree: &Tree, id: NodeId) -> NodeDoc {
    let n: &NodeData = tree.get(id);
    if !n.pending_results.is_empty() {
        log::warn!(
            "node {} has {} uncommitted pending_results at save time; this indicates a turn was \
             interrupted mid-flight and is dropped rather than persisted",
            id,
            n.pending_results.len()
        );
    }
    NodeDoc {
        role: n.role,
        content: n.content.clone(),
        tool_calls: n.tool_calls.clone(),
        tool_results: n.tool_results.clone(),
        pending_results: Vec::new(),
        attributes: n.attributes.clone(),
        node_class: "Node".to_string(),
        replies: tree.children_of(id).iter().map(|&c| node_to_doc(tree, c)).collect(),
    }
}

fn doc_to_tree(doc: &NodeDoc) -> Tree {
    let mut tree = Tree::new();
    let root = tree.root();
    {
        let r = tree.get_mut(root);
        r.content = doc.content.clone();
        r.tool_calls = doc.tool_calls.clone();
        r.tool_results = doc.tool_results.clone();
        r.attributes = doc.attributes.clone();
    }
    fn insert_children(tree: &mut Tree, parent: NodeId, doc: &NodeDoc) {
        for child_doc in &doc.replies {
            let child = tree.append_reply(
                parent,
                child_doc.role,
                child_doc.content.clone(),
                child_doc.tool_calls.clone(),
            );
            tree.get_mut(child).tool_results = child_doc.tool_results.clone();
            tree.get_mut(child).attributes = child_doc.attributes.clone();
            insert_children(tree, child, child_doc);
        }
    }
    insert_children(&mut tree, root, doc);
    tree
}

/// A label stored as a path of reply indices from the root, so it survives a round trip without
/// depending on arena-index stability.
pub type LabelPath = Vec<usize>;

pub fn path_to_node(tree: &Tree, path: &[usize]) -> CoreResult<NodeId> {
    let mut current = tree.root();
    for &idx in path {
        current = *tree
            .children_of(current)
            .get(idx)
            .ok_or_else(|| CoreError::NavigationError(format!("invalid label path at {}", idx)))?;
    }
    Ok(current)
}

pub fn node_to_path(tree: &Tree, mut node: NodeId) -> Vec<usize> {
    let mut path = Vec::new();
    while let Some(parent) = tree.parent_of(node) {
        let idx = tree
            .children_of(parent)
            .iter()
            .position(|&c| c == node)
            .expect("node must be among its parent's replies");
        path.push(idx);
        node = parent;
    }
    path.reverse();
    path
}

/// The full portable bot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotDocument {
    pub name: String,
    pub model_engine: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub role: String,
    pub role_description: String,
    pub system_message: String,
    pub conversation: NodeDoc,
    pub labels: HashMap<String, LabelPath>,
    pub cursor_path: LabelPath,
    pub tool_handler: ToolRegistrySnapshot,
    pub autosave: bool,
    pub bot_class: String,
}

impl BotDocument {
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::PersistSchemaViolation(e.to_string()))
    }

    pub fn from_json(text: &str) -> CoreResult<Self> {
        serde_json::from_str(text).map_err(|e| CoreError::PersistSchemaViolation(e.to_string()))
    }

    pub fn tree_and_cursor(&self) -> CoreResult<(Tree, NodeId, HashMap<String, NodeId>)> {
        let tree = doc_to_tree(&self.conversation);
        let mut cursor = path_to_node(&tree, &self.cursor_path)?;

        // Re-anchor to a branch-anchor attribute if one is present, stripping it so it isn't
        // observed again on the next save/load cycle.
        let mut tree = tree;
        if let Some(anchor) = tree.find_anchor() {
            tree.take_anchor(anchor);
            cursor = anchor;
        }

        let mut labels = HashMap::new();
        for (name, path) in &self.labels {
            labels.insert(name.clone(), path_to_node(&tree, path)?);
        }
        Ok((tree, cursor, labels))
    }
}

/// Build a [`BotDocument`] from live state. Returns [`CoreError::PersistSchemaViolation`] only in
/// pathological cases (path resolution failures) — the JSON encode itself cannot fail since every
/// stored value is already JSON-representable by construction.
pub fn to_document(
    name: &str,
    model_engine: &str,
    max_tokens: u32,
    temperature: f32,
    role: &str,
    role_description: &str,
    system_message: &str,
    tree: &Tree,
    cursor: NodeId,
    labels: &HashMap<String, NodeId>,
    tool_handler: ToolRegistrySnapshot,
    autosave: bool,
) -> BotDocument {
    BotDocument {
        name: name.to_string(),
        model_engine: model_engine.to_string(),
        max_tokens,
        temperature,
        role: role.to_string(),
        role_description: role_description.to_string(),
        system_message: system_message.to_string(),
        conversation: node_to_doc(tree, tree.root()),
        labels: labels
            .iter()
            .map(|(name, &id)| (name.clone(), node_to_path(tree, id)))
            .collect(),
        cursor_path: node_to_path(tree, cursor),
        tool_handler,
        autosave,
        bot_class: "Bot".to_string(),
    }
}

/// Default autosave file name: `<bot_name>@<utc_timestamp>.bot`.
pub fn autosave_file_name(bot_name: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    format!("{}@{}.bot", bot_name, now.format("%Y%m%dT%H%M%SZ"))
}

/// Decide the save path for an autosave given the bot's policy and any prior save path.
pub fn resolve_autosave_path(
    policy: AutosavePolicy,
    save_dir: &std::path::Path,
    bot_name: &str,
    last_save_path: Option<&std::path::Path>,
    now: chrono::DateTime<chrono::Utc>,
) -> std::path::PathBuf {
    match (policy, last_save_path) {
        (AutosavePolicy::OverwriteLastPath, Some(path)) => path.to_path_buf(),
        _ => save_dir.join(autosave_file_name(bot_name, now)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::tree::ToolCallRecord;

    fn sample_tree() -> (Tree, NodeId) {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.append_reply(root, Role::User, "hello", vec![]);
        let b = tree.append_reply(
            a,
            Role::Assistant,
            "calling a tool",
            vec![ToolCallRecord {
                id: "call_1".into(),
                name: "add".into(),
                arguments: serde_json::json!({"x": 1}),
            }],
        );
        (tree, b)
    }

    #[test]
    fn to_document_then_from_document_round_trips_structure_and_cursor() {
        let (tree, cursor) = sample_tree();
        let mut labels = HashMap::new();
        labels.insert("checkpoint".to_string(), cursor);

        let doc = to_document(
            "bot1",
            "claude-sonnet-4-0",
            1024,
            0.7,
            "assistant",
            "helper",
            "be helpful",
            &tree,
            cursor,
            &labels,
            ToolRegistrySnapshot {
                tools: vec![],
                function_paths: HashMap::new(),
                modules: HashMap::new(),
                requests: vec![],
                results: vec![],
            },
            true,
        );

        let json = doc.to_json().unwrap();
        let reloaded = BotDocument::from_json(&json).unwrap();
        let (reloaded_tree, reloaded_cursor, reloaded_labels) = reloaded.tree_and_cursor().unwrap();

        assert_eq!(reloaded_tree.subtree_size(reloaded_tree.root()), tree.subtree_size(tree.root()));
        assert_eq!(reloaded_tree.get(reloaded_cursor).content, "calling a tool");
        assert_eq!(
            reloaded_tree.get(reloaded_labels["checkpoint"]).content,
            "calling a tool"
        );
    }

    #[test]
    fn pending_results_are_never_persisted() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.append_reply(root, Role::User, "hi", vec![]);
        tree.get_mut(a).pending_results.push(crate::cloudllm::tree::ToolResultRecord {
            call_id: "x".into(),
            content: "y".into(),
        });
        let doc = node_to_doc(&tree, root);
        assert!(doc.replies[0].pending_results.is_empty());
    }

    #[test]
    fn branch_anchor_reanchors_cursor_on_load_and_is_stripped() {
        let (tree, _cursor) = sample_tree();
        let mut tree = tree;
        let anchor_node = tree.root();
        tree.get_mut(anchor_node).attributes.insert(
            format!("{}xyz", crate::cloudllm::tree::BRANCH_ANCHOR_PREFIX),
            serde_json::json!(true),
        );

        let doc = to_document(
            "bot1",
            "claude-sonnet-4-0",
            1024,
            0.7,
            "assistant",
            "helper",
            "",
            &tree,
            tree.deepest_rightmost_leaf(),
            &HashMap::new(),
            ToolRegistrySnapshot {
                tools: vec![],
                function_paths: HashMap::new(),
                modules: HashMap::new(),
                requests: vec![],
                results: vec![],
            },
            false,
        );

        let (reloaded_tree, reloaded_cursor, _) = doc.tree_and_cursor().unwrap();
        assert_eq!(reloaded_cursor, reloaded_tree.root());
        assert!(reloaded_tree.find_anchor().is_none());
    }
}
