//! Interval tree that maps every byte of a file to a value.
//!
//! The tree starts as a single leaf covering `[0, len)`. Inserting a value
//! over a part of a leaf splits it at the midpoint until the inserted range
//! is covered by whole leaves. Sibling leaves that end up holding the same
//! value are collapsed back into their parent, so the tree only grows where
//! the state of the file actually differs.
//!
//! Nodes live in an arena and point to their parent by index, merges walk
//! these indices upwards.
use thunderdome::{Arena, Index};

use crate::range::Range;

#[derive(Debug, Clone)]
struct Node<T> {
    range: Range,
    value: T,
    parent: Option<Index>,
    children: Option<(Index, Index)>,
}

#[derive(Debug, Clone)]
pub struct RangeTree<T> {
    nodes: Arena<Node<T>>,
    root: Index,
}

impl<T: Clone + PartialEq> RangeTree<T> {
    /// Create a tree for a file of `length` bytes, every byte holding
    /// `value`.
    pub fn new(length: u64, value: T) -> Self {
        let mut nodes = Arena::new();
        let root = nodes.insert(Node {
            range: Range::by_length(0, length),
            value,
            parent: None,
            children: None,
        });
        Self { nodes, root }
    }

    /// The range of the whole file.
    pub fn range(&self) -> Range {
        self.nodes[self.root].range
    }

    /// Mark `range` as holding `value`.
    ///
    /// The parts of `range` outside of the file are ignored, and so is a
    /// range that doesn't touch the file at all.
    pub fn insert(&mut self, range: Range, value: T) {
        let mut touched = Vec::new();
        self.assign(self.root, range, &value, &mut touched);

        for leaf in touched {
            self.merge_upwards(leaf);
        }
    }

    fn assign(
        &mut self,
        idx: Index,
        range: Range,
        value: &T,
        touched: &mut Vec<Index>,
    ) {
        let node = &self.nodes[idx];

        if !node.range.intersects(&range) {
            return;
        }

        let (left, right) = match node.children {
            Some(children) => children,
            None => {
                if node.value == *value {
                    return;
                }
                if range.contains(&node.range) {
                    self.nodes[idx].value = value.clone();
                    touched.push(idx);
                    return;
                }
                self.split(idx)
            }
        };

        self.assign(left, range, value, touched);
        self.assign(right, range, value, touched);
    }

    /// Turn a leaf into an internal node with two children that inherit
    /// its value.
    fn split(&mut self, idx: Index) -> (Index, Index) {
        let node = &self.nodes[idx];
        let (l, r) = node.range.halves();
        let value = node.value.clone();

        let left = self.nodes.insert(Node {
            range: l,
            value: value.clone(),
            parent: Some(idx),
            children: None,
        });
        let right = self.nodes.insert(Node {
            range: r,
            value,
            parent: Some(idx),
            children: None,
        });

        self.nodes[idx].children = Some((left, right));
        (left, right)
    }

    /// Collapse equal sibling leaves into their parent, walking up while it
    /// keeps succeeding.
    fn merge_upwards(&mut self, mut idx: Index) {
        // an earlier merge of the same insert may already have removed this
        // leaf, in that case its parent chain was handled then.
        while let Some(node) = self.nodes.get(idx) {
            let Some(parent) = node.parent else { break };
            let Some((left, right)) = self.nodes[parent].children else {
                break;
            };

            let (Some(l), Some(r)) = (self.nodes.get(left), self.nodes.get(right))
            else {
                break;
            };

            if l.children.is_some() || r.children.is_some() || l.value != r.value
            {
                break;
            }

            let value = l.value.clone();
            self.nodes.remove(left);
            self.nodes.remove(right);

            let parent_node = &mut self.nodes[parent];
            parent_node.value = value;
            parent_node.children = None;

            idx = parent;
        }
    }

    /// Find the largest contiguous part of `range` holding `value`.
    ///
    /// When the matches of the two halves of a node cannot be joined into a
    /// single range, the one on the left wins. Callers that need every match
    /// should call this repeatedly, changing the state of what they found in
    /// between, or use [`RangeTree::ranges_of`].
    pub fn search(&self, range: Range, value: &T) -> Option<Range> {
        self.search_at(self.root, range, value)
    }

    fn search_at(&self, idx: Index, range: Range, value: &T) -> Option<Range> {
        let node = &self.nodes[idx];
        let clipped = node.range.intersection(&range)?;

        let Some((left, right)) = node.children else {
            return (node.value == *value).then_some(clipped);
        };

        let l = self.search_at(left, range, value);
        let r = self.search_at(right, range, value);

        match (l, r) {
            (Some(l), Some(r)) if l.end() + 1 == r.start() => {
                Some(Range::by_length(l.start(), l.length() + r.length()))
            }
            (Some(l), _) => Some(l),
            (None, r) => r,
        }
    }

    /// Every maximal run of bytes holding `value`, in file order.
    pub fn ranges_of(&self, value: &T) -> Vec<Range> {
        let mut runs: Vec<Range> = Vec::new();

        for (range, v) in self.leaves() {
            if v != value {
                continue;
            }
            match runs.last_mut() {
                Some(last) if last.limit() == range.start() => {
                    *last = Range::by_length(
                        last.start(),
                        last.length() + range.length(),
                    );
                }
                _ => runs.push(range),
            }
        }

        runs
    }

    /// How many bytes of `range` hold `value`.
    pub fn count(&self, range: Range, value: &T) -> u64 {
        self.leaves()
            .into_iter()
            .filter(|(_, v)| *v == value)
            .filter_map(|(r, _)| r.intersection(&range))
            .map(|r| r.length())
            .sum()
    }

    /// The value of the byte at `offset`, if it is inside the file.
    pub fn value_at(&self, offset: u64) -> Option<&T> {
        let mut idx = self.root;
        if !self.nodes[idx].range.intersects(&Range::by_length(offset, 1)) {
            return None;
        }
        while let Some((left, right)) = self.nodes[idx].children {
            idx = if offset < self.nodes[right].range.start() {
                left
            } else {
                right
            };
        }
        Some(&self.nodes[idx].value)
    }

    /// Leaves in file order.
    fn leaves(&self) -> Vec<(Range, &T)> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            match node.children {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None if node.range.is_empty() => {}
                None => leaves.push((node.range, &node.value)),
            }
        }

        leaves
    }

    /// Maximum depth of the tree, a tree with a single leaf has depth 0.
    pub fn depth(&self) -> usize {
        self.depth_at(self.root)
    }

    fn depth_at(&self, idx: Index) -> usize {
        match self.nodes[idx].children {
            Some((left, right)) => {
                1 + self.depth_at(left).max(self.depth_at(right))
            }
            None => 0,
        }
    }

    /// Number of nodes currently allocated, leaves and internal ones.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
