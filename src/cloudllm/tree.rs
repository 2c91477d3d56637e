//! The conversation tree: nodes, roles, tool call/result records, and the arena that owns them.
//!
//! Nodes are stored in a flat arena (`Vec<NodeData>`) addressed by [`NodeId`] rather than as
//! `Rc<RefCell<Node>>` links. This keeps parent/child/sibling traversal, deep-copy, and
//! to/from-JSON conversion simple indexing operations instead of interior mutability plumbing,
//! while still giving every node a stable identity across a turn.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Index of a node within a [`Tree`]'s arena. Stable for the lifetime of the tree; never reused
/// after a node is created (the arena never deletes entries, only re-parents subtrees).
pub type NodeId = usize;

/// The role a node's content is authored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Reserved for the tree's sentinel root. Never produced by a turn.
    Empty,
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model on an assistant node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Provider-assigned call id, used to pair this request with its result.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The outcome of executing a [`ToolCallRecord`], attached to a later node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub call_id: String,
    pub content: String,
}

/// One vertex of the conversation tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub tool_results: Vec<ToolResultRecord>,
    /// Results computed but not yet committed onto the node's `tool_results`. Must be empty at
    /// save time; non-empty here means a turn was interrupted between executing tools and
    /// committing their results.
    #[serde(default)]
    pub pending_results: Vec<ToolResultRecord>,
    /// Arbitrary JSON-representable attributes attached by orchestration (e.g. branch anchors).
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    #[serde(skip)]
    pub(crate) parent: Option<NodeId>,
    #[serde(default)]
    pub(crate) replies: Vec<NodeId>,
}

impl NodeData {
    fn leaf(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            pending_results: Vec::new(),
            attributes: HashMap::new(),
            parent: None,
            replies: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.replies.is_empty()
    }
}

/// Prefix reserved for branch-anchor attributes. Stripped on load once consumed.
pub const BRANCH_ANCHOR_PREFIX: &str = "_branch_self_anchor_";

/// Owning arena for a conversation tree, rooted at a single `Role::Empty` sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Tree {
    /// A fresh tree containing only the root sentinel.
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData::leaf(Role::Empty, "")],
            root: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> &NodeData {
        &self.nodes[id]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a new child under `parent`, in insertion order among its existing replies.
    pub fn append_reply(
        &mut self,
        parent: NodeId,
        role: Role,
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) -> NodeId {
        let mut node = NodeData::leaf(role, content);
        node.tool_calls = tool_calls;
        node.parent = Some(parent);
        let id = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].replies.push(id);
        id
    }

    /// Re-parent an existing subtree root under a new parent, appended after existing children.
    /// Used by branch/tree-of-thought recombination to graft a branch's result back in.
    pub fn reparent(&mut self, subtree_root: NodeId, new_parent: NodeId) {
        if let Some(old_parent) = self.nodes[subtree_root].parent {
            self.nodes[old_parent].replies.retain(|&c| c != subtree_root);
        }
        self.nodes[subtree_root].parent = Some(new_parent);
        self.nodes[new_parent].replies.push(subtree_root);
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].replies
    }

    /// Walk from the root to `cursor` inclusive, emitting one provider-neutral message per
    /// non-root node. A node carrying both text and tool calls emits a single message with both.
    pub fn build_messages(&self, cursor: NodeId) -> Vec<ConversationMessage> {
        let mut path = Vec::new();
        let mut current = Some(cursor);
        while let Some(id) = current {
            path.push(id);
            current = self.nodes[id].parent;
        }
        path.reverse();

        path.into_iter()
            .filter(|&id| self.nodes[id].role != Role::Empty)
            .map(|id| {
                let n = &self.nodes[id];
                ConversationMessage {
                    role: n.role,
                    content: n.content.clone(),
                    tool_calls: n.tool_calls.clone(),
                    tool_results: n.tool_results.clone(),
                }
            })
            .collect()
    }

    /// All leaves in the subtree rooted at `from`, depth-first left-to-right, with stable
    /// indices matching their visitation order.
    pub fn leaves_under(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_leaves(from, &mut out);
        out
    }

    fn collect_leaves(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let node = &self.nodes[id];
        if node.is_leaf() {
            out.push(id);
            return;
        }
        for &child in &node.replies {
            self.collect_leaves(child, out);
        }
    }

    pub fn subtree_size(&self, from: NodeId) -> usize {
        let mut count = 1;
        for &child in &self.nodes[from].replies {
            count += self.subtree_size(child);
        }
        count
    }

    /// Strip a single branch-anchor attribute matching [`BRANCH_ANCHOR_PREFIX`] from `id`,
    /// returning whether one was found and removed. Used once on load.
    pub fn take_anchor(&mut self, id: NodeId) -> bool {
        let node = &mut self.nodes[id];
        let key = node
            .attributes
            .keys()
            .find(|k| k.starts_with(BRANCH_ANCHOR_PREFIX))
            .cloned();
        if let Some(key) = key {
            node.attributes.remove(&key);
            true
        } else {
            false
        }
    }

    /// Find the node (if any) anywhere in the tree carrying a branch-anchor attribute.
    pub fn find_anchor(&self) -> Option<NodeId> {
        self.nodes.iter().enumerate().find_map(|(id, n)| {
            if n.attributes.keys().any(|k| k.starts_with(BRANCH_ANCHOR_PREFIX)) {
                Some(id)
            } else {
                None
            }
        })
    }

    /// Move a node's staged tool results into its committed `tool_results`, clearing
    /// `pending_results`. Called once per loop iteration in `Bot::step`, between executing the
    /// tool batch and building the next outbound request.
    pub fn commit_pending_results(&mut self, id: NodeId) {
        let staged = std::mem::take(&mut self.nodes[id].pending_results);
        self.nodes[id].tool_results = staged;
    }

    /// Default re-anchor target on load when no branch anchor is present: the last leaf of the
    /// deepest, right-most path from the root.
    pub fn deepest_rightmost_leaf(&self) -> NodeId {
        let mut current = self.root;
        loop {
            match self.nodes[current].replies.last() {
                Some(&next) => current = next,
                None => return current,
            }
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

/// A provider-neutral message produced by [`Tree::build_messages`]; mailbox adapters translate
/// these into wire-specific shapes.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolResultRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tree_has_single_empty_root() {
        let tree = Tree::new();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(tree.root()).role, Role::Empty);
    }

    #[test]
    fn append_reply_links_parent_and_child() {
        let mut tree = Tree::new();
        let root = tree.root();
        let child = tree.append_reply(root, Role::User, "hi", vec![]);
        assert_eq!(tree.parent_of(child), Some(root));
        assert_eq!(tree.children_of(root), &[child]);
    }

    #[test]
    fn build_messages_excludes_root_and_preserves_order() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.append_reply(root, Role::User, "first", vec![]);
        let b = tree.append_reply(a, Role::Assistant, "second", vec![]);
        let messages = tree.build_messages(b);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
    }

    #[test]
    fn leaves_under_depth_first_left_to_right() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.append_reply(root, Role::User, "a", vec![]);
        let _l1 = tree.append_reply(a, Role::Assistant, "l1", vec![]);
        let _l2 = tree.append_reply(a, Role::Assistant, "l2", vec![]);
        let leaves = tree.leaves_under(root);
        assert_eq!(leaves.len(), 2);
    }

    #[test]
    fn reparent_moves_subtree_and_updates_both_parents() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.append_reply(root, Role::User, "a", vec![]);
        let b = tree.append_reply(root, Role::User, "b", vec![]);
        let child = tree.append_reply(a, Role::Assistant, "c", vec![]);
        tree.reparent(child, b);
        assert_eq!(tree.children_of(a), &[] as &[NodeId]);
        assert_eq!(tree.children_of(b), &[child]);
        assert_eq!(tree.parent_of(child), Some(b));
    }

    #[test]
    fn anchor_round_trips_through_take_anchor() {
        let mut tree = Tree::new();
        let root = tree.root();
        let child = tree.append_reply(root, Role::User, "x", vec![]);
        tree.get_mut(child)
            .attributes
            .insert(format!("{}abc", BRANCH_ANCHOR_PREFIX), serde_json::json!(true));
        assert_eq!(tree.find_anchor(), Some(child));
        assert!(tree.take_anchor(child));
        assert_eq!(tree.find_anchor(), None);
    }
}
