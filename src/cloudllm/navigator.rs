//! Tree navigator: cursor movement, labels, and leaf enumeration.

use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::tree::{NodeId, Tree};
use std::collections::HashMap;

/// A leaf preview returned by [`Navigator::leaves`]: path from cursor plus a content snippet.
#[derive(Debug, Clone)]
pub struct LeafPreview {
    pub node: NodeId,
    pub preview: String,
}

/// Cursor state layered on top of a [`Tree`]: current position, named bookmarks, and a
/// single-slot undo backup consulted by the surrounding shell before destructive navigation.
pub struct Navigator {
    cursor: NodeId,
    labels: HashMap<String, NodeId>,
    backup: Option<NodeId>,
}

const PREVIEW_CHARS: usize = 80;

impl Navigator {
    pub fn new(tree: &Tree) -> Self {
        Self {
            cursor: tree.root(),
            labels: HashMap::new(),
            backup: None,
        }
    }

    pub fn at(tree: &Tree, cursor: NodeId) -> Self {
        let _ = tree.get(cursor); // panics with a clear index-out-of-bounds if invalid
        Self {
            cursor,
            labels: HashMap::new(),
            backup: None,
        }
    }

    pub fn cursor(&self) -> NodeId {
        self.cursor
    }

    fn snapshot_and_move(&mut self, to: NodeId) {
        self.backup = Some(self.cursor);
        self.cursor = to;
    }

    pub fn set_cursor(&mut self, to: NodeId) {
        self.snapshot_and_move(to);
    }

    /// Restore the cursor to its position before the last navigation call.
    pub fn undo(&mut self) -> CoreResult<()> {
        match self.backup.take() {
            Some(prev) => {
                self.cursor = prev;
                Ok(())
            }
            None => Err(CoreError::NavigationError("no navigation to undo".into())),
        }
    }

    pub fn up(&mut self, tree: &Tree) -> CoreResult<NodeId> {
        match tree.parent_of(self.cursor) {
            Some(parent) => {
                self.snapshot_and_move(parent);
                Ok(parent)
            }
            None => Err(CoreError::NavigationError("already at root".into())),
        }
    }

    pub fn down(&mut self, tree: &Tree, index: Option<usize>) -> CoreResult<NodeId> {
        let children = tree.children_of(self.cursor);
        let target = match (children.len(), index) {
            (0, _) => return Err(CoreError::NavigationError("current node has no replies".into())),
            (1, None) => children[0],
            (_, Some(i)) => *children
                .get(i)
                .ok_or_else(|| CoreError::NavigationError(format!("no reply at index {}", i)))?,
            (_, None) => {
                return Err(CoreError::NavigationError(
                    "ambiguous child: multiple replies, pass an index".into(),
                ))
            }
        };
        self.snapshot_and_move(target);
        Ok(target)
    }

    fn sibling_index(&self, tree: &Tree) -> CoreResult<(NodeId, usize)> {
        let parent = tree
            .parent_of(self.cursor)
            .ok_or_else(|| CoreError::NavigationError("root has no siblings".into()))?;
        let siblings = tree.children_of(parent);
        let idx = siblings
            .iter()
            .position(|&n| n == self.cursor)
            .expect("cursor must be among its parent's replies");
        Ok((parent, idx))
    }

    pub fn left(&mut self, tree: &Tree) -> CoreResult<NodeId> {
        let (parent, idx) = self.sibling_index(tree)?;
        if idx == 0 {
            return Err(CoreError::NavigationError("already at leftmost sibling".into()));
        }
        let target = tree.children_of(parent)[idx - 1];
        self.snapshot_and_move(target);
        Ok(target)
    }

    pub fn right(&mut self, tree: &Tree) -> CoreResult<NodeId> {
        let (parent, idx) = self.sibling_index(tree)?;
        let siblings = tree.children_of(parent);
        if idx + 1 >= siblings.len() {
            return Err(CoreError::NavigationError("already at rightmost sibling".into()));
        }
        let target = siblings[idx + 1];
        self.snapshot_and_move(target);
        Ok(target)
    }

    pub fn root(&mut self, tree: &Tree) {
        self.snapshot_and_move(tree.root());
    }

    pub fn label(&mut self, name: impl Into<String>) {
        self.labels.insert(name.into(), self.cursor);
    }

    pub fn goto(&mut self, name: &str) -> CoreResult<NodeId> {
        let target = *self
            .labels
            .get(name)
            .ok_or_else(|| CoreError::NavigationError(format!("no such label: {}", name)))?;
        self.snapshot_and_move(target);
        Ok(target)
    }

    pub fn labels(&self) -> &HashMap<String, NodeId> {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut HashMap<String, NodeId> {
        &mut self.labels
    }

    pub fn leaves(&self, tree: &Tree) -> Vec<LeafPreview> {
        tree.leaves_under(self.cursor)
            .into_iter()
            .map(|node| LeafPreview {
                node,
                preview: tree.get(node).content.chars().take(PREVIEW_CHARS).collect(),
            })
            .collect()
    }

    pub fn goto_leaf(&mut self, tree: &Tree, k: usize) -> CoreResult<NodeId> {
        let leaves = tree.leaves_under(self.cursor);
        let target = *leaves
            .get(k)
            .ok_or_else(|| CoreError::NavigationError(format!("no leaf at index {}", k)))?;
        self.snapshot_and_move(target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::tree::Role;

    #[test]
    fn up_fails_at_root() {
        let tree = Tree::new();
        let mut nav = Navigator::new(&tree);
        assert!(nav.up(&tree).is_err());
    }

    #[test]
    fn down_with_single_child_is_unambiguous() {
        let mut tree = Tree::new();
        let root = tree.root();
        let child = tree.append_reply(root, Role::User, "x", vec![]);
        let mut nav = Navigator::new(&tree);
        assert_eq!(nav.down(&tree, None).unwrap(), child);
    }

    #[test]
    fn down_with_multiple_children_requires_index() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.append_reply(root, Role::User, "a", vec![]);
        tree.append_reply(root, Role::User, "b", vec![]);
        let mut nav = Navigator::new(&tree);
        assert!(nav.down(&tree, None).is_err());
        assert!(nav.down(&tree, Some(1)).is_ok());
    }

    #[test]
    fn label_then_goto_returns_to_exact_node_after_intervening_navigation() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.append_reply(root, Role::User, "a", vec![]);
        let b = tree.append_reply(a, Role::User, "b", vec![]);
        let mut nav = Navigator::at(&tree, a);
        nav.label("checkpoint");
        nav.set_cursor(b);
        assert_eq!(nav.goto("checkpoint").unwrap(), a);
    }

    #[test]
    fn goto_leaf_visits_in_depth_first_order() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.append_reply(root, Role::User, "a", vec![]);
        let l0 = tree.append_reply(a, Role::User, "l0", vec![]);
        let l1 = tree.append_reply(a, Role::User, "l1", vec![]);
        let mut nav = Navigator::new(&tree);
        assert_eq!(nav.goto_leaf(&tree, 0).unwrap(), l0);
        assert_eq!(nav.goto_leaf(&tree, 1).unwrap(), l1);
    }
}
