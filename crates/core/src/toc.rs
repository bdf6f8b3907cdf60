//! Table-of-contents tree stored as an arena.
//!
//! Nodes refer to each other by [`TocNodeId`] into one `Vec`, so the tree has a single
//! owner and can be walked iteratively without recursion on deep outlines.

use crate::error::TocError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TocNodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocNode {
    pub title: String,
    pub page: u32,
    pub parent: Option<TocNodeId>,
    pub children: Vec<TocNodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocTree {
    nodes: Vec<TocNode>,
    roots: Vec<TocNodeId>,
}

/// Wire shape of a ToC entry: what the model emits and what callers receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedTocNode {
    pub title: String,
    pub page_number: u32,
    #[serde(default)]
    pub children: Vec<NestedTocNode>,
}

/// A node in reading order with its depth, as yielded by [`TocTree::pre_order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocVisit<'a> {
    pub id: TocNodeId,
    pub depth: usize,
    pub node: &'a TocNode,
}

impl TocTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn roots(&self) -> &[TocNodeId] {
        &self.roots
    }

    pub fn node(&self, id: TocNodeId) -> Option<&TocNode> {
        self.nodes.get(id.0)
    }

    pub fn add_root(&mut self, title: impl Into<String>, page: u32) -> TocNodeId {
        let id = self.push(title.into(), page, None);
        self.roots.push(id);
        id
    }

    pub fn add_child(
        &mut self,
        parent: TocNodeId,
        title: impl Into<String>,
        page: u32,
    ) -> Result<TocNodeId, TocError> {
        if parent.0 >= self.nodes.len() {
            return Err(TocError::UnknownNode(parent.0));
        }
        let id = self.push(title.into(), page, Some(parent));
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    fn push(&mut self, title: String, page: u32, parent: Option<TocNodeId>) -> TocNodeId {
        let id = TocNodeId(self.nodes.len());
        self.nodes.push(TocNode {
            title,
            page,
            parent,
            children: Vec::new(),
        });
        id
    }

    /// Reading order: each node before its children, siblings left to right.
    pub fn pre_order(&self) -> Vec<TocVisit<'_>> {
        let mut visits = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(TocNodeId, usize)> =
            self.roots.iter().rev().map(|id| (*id, 0)).collect();
        let mut seen = vec![false; self.nodes.len()];

        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(id.0) else {
                continue;
            };
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            visits.push(TocVisit { id, depth, node });
            stack.extend(node.children.iter().rev().map(|child| (*child, depth + 1)));
        }

        visits
    }

    /// Checks parent links, reachability, and non-decreasing pages in reading order.
    pub fn validate(&self) -> Result<(), TocError> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<TocNodeId> = self.roots.iter().rev().copied().collect();

        for root in &self.roots {
            let node = self.nodes.get(root.0).ok_or(TocError::UnknownNode(root.0))?;
            if node.parent.is_some() {
                return Err(TocError::BrokenParent(root.0));
            }
        }

        let mut previous_page: Option<u32> = None;
        while let Some(id) = stack.pop() {
            let node = self.nodes.get(id.0).ok_or(TocError::UnknownNode(id.0))?;
            if std::mem::replace(&mut seen[id.0], true) {
                return Err(TocError::Cycle(id.0));
            }
            if let Some(previous) = previous_page {
                if node.page < previous {
                    return Err(TocError::PageOrder {
                        title: node.title.clone(),
                        page: node.page,
                        previous,
                    });
                }
            }
            previous_page = Some(node.page);

            for child in node.children.iter().rev() {
                let child_node = self
                    .nodes
                    .get(child.0)
                    .ok_or(TocError::UnknownNode(child.0))?;
                if child_node.parent != Some(id) {
                    return Err(TocError::BrokenParent(child.0));
                }
                stack.push(*child);
            }
        }

        match seen.iter().position(|visited| !visited) {
            Some(orphan) => Err(TocError::BrokenParent(orphan)),
            None => Ok(()),
        }
    }

    pub fn from_nested(entries: &[NestedTocNode]) -> Self {
        let mut tree = Self::new();
        let mut stack: Vec<(Option<TocNodeId>, &NestedTocNode)> =
            entries.iter().rev().map(|entry| (None, entry)).collect();

        while let Some((parent, entry)) = stack.pop() {
            let title = entry.title.trim().to_string();
            let id = match parent {
                None => tree.add_root(title, entry.page_number),
                Some(parent) => {
                    let id = tree.push(title, entry.page_number, Some(parent));
                    tree.nodes[parent.0].children.push(id);
                    id
                }
            };
            stack.extend(entry.children.iter().rev().map(|child| (Some(id), child)));
        }

        tree
    }

    pub fn to_nested(&self) -> Vec<NestedTocNode> {
        // Children are always pushed after their parent, so a reverse sweep
        // builds every subtree before the node that owns it.
        let mut built: Vec<Option<NestedTocNode>> = vec![None; self.nodes.len()];
        for index in (0..self.nodes.len()).rev() {
            let node = &self.nodes[index];
            let children = node
                .children
                .iter()
                .filter_map(|child| built.get_mut(child.0).and_then(Option::take))
                .collect();
            built[index] = Some(NestedTocNode {
                title: node.title.clone(),
                page_number: node.page,
                children,
            });
        }

        self.roots
            .iter()
            .filter_map(|root| built.get_mut(root.0).and_then(Option::take))
            .collect()
    }
}
