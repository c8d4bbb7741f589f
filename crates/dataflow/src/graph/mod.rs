//! # Slice graph
//!
//! Versioned dependency graph over cells or statements. Every execution of a
//! node creates a new version; edges are keyed by the stable node key and
//! resolve to whichever version is current, except for dangling edges which
//! record dependencies on versions that were already superseded.
//!
//! Slicing takes the closure of a set of seed nodes over the parent edges of
//! the enabled [`SliceKind`]s.

mod edges;

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

use index_vec::IndexVec;
use rustc_hash::{FxHashMap, FxHashSet};

pub use self::edges::{EdgeContext, EdgeMap, EdgeMaps, SliceKind};
use self::edges::{extend_edge, shrink_edge};
use crate::symbol::SymbolId;
use crate::timestamp::Timestamp;

index_vec::define_index_type! {
    /// A node version within one slice graph
    pub struct NodeId = usize;

    MAX_INDEX = usize::MAX;
}

/// A node that can take part in slicing
pub trait Sliceable {
    type Key: Clone + Eq + Hash + Ord + fmt::Debug;

    /// Stable identity shared by every version of the node
    fn key(&self) -> &Self::Key;

    /// When this version was produced
    fn timestamp(&self) -> Timestamp;

    /// Normalize a timestamp to the granularity of this node type, so that
    /// any timestamp produced inside a version finds that version
    fn locate(ts: Timestamp) -> Timestamp;

    fn text(&self) -> &str;

    fn edges(&self) -> &EdgeMaps<Self::Key>;

    fn edges_mut(&mut self) -> &mut EdgeMaps<Self::Key>;
}

#[derive(Debug, Clone)]
struct NodeEntry<N> {
    node: N,
    prev: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct SliceGraph<N: Sliceable> {
    nodes: IndexVec<NodeId, NodeEntry<N>>,
    current: FxHashMap<N::Key, NodeId>,
    by_timestamp: FxHashMap<Timestamp, NodeId>,
}

impl<N: Sliceable> Default for SliceGraph<N> {
    fn default() -> Self {
        Self {
            nodes: IndexVec::new(),
            current: FxHashMap::default(),
            by_timestamp: FxHashMap::default(),
        }
    }
}

impl<N: Sliceable> SliceGraph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new version; it supersedes the current version with the same key.
    ///
    /// Only the current version and the one it superseded are ever consulted
    /// for dangling edges, so the version two steps back loses them.
    pub fn insert(&mut self, node: N) -> NodeId {
        let key = node.key().clone();
        let ts = N::locate(node.timestamp());
        let prev = self.current.get(&key).copied();
        let id = self.nodes.push(NodeEntry { node, prev });
        self.current.insert(key, id);
        self.by_timestamp.insert(ts, id);
        if let Some(stale) = prev.and_then(|prev| self.prev(prev)) {
            self.nodes[stale].node.edges_mut().clear_dangling();
        }
        id
    }

    pub fn node(&self, id: NodeId) -> &N {
        &self.nodes[id].node
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn current(&self, key: &N::Key) -> Option<NodeId> {
        self.current.get(key).copied()
    }

    pub fn at_timestamp(&self, ts: Timestamp) -> Option<NodeId> {
        self.by_timestamp.get(&N::locate(ts)).copied()
    }

    pub fn is_current(&self, id: NodeId) -> bool {
        self.current.get(self.node(id).key()) == Some(&id)
    }

    /// The version this one superseded
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].prev
    }

    /// The slot an edge to `other` belongs in
    pub fn context_for(&self, other: NodeId, kind: SliceKind) -> EdgeContext {
        EdgeContext {
            kind,
            dangling: !self.is_current(other),
        }
    }

    /// Keys of the non-dangling parents of `id`
    pub fn parent_keys(&self, id: NodeId, kind: SliceKind) -> impl Iterator<Item = &N::Key> {
        self.node(id).edges().parents(EdgeContext::current(kind)).keys()
    }

    /// Current versions of the non-dangling parents of `id`
    pub fn parents(&self, id: NodeId, kind: SliceKind) -> Vec<NodeId> {
        self.parent_keys(id, kind)
            .filter_map(|key| self.current(key))
            .collect()
    }

    /// Record that `child` consumed `syms` produced by `parent`.
    ///
    /// A child that is already a parent of `parent` is left alone so that no
    /// two-node cycle forms. An edge from a node to an earlier version of
    /// itself is replaced by the edges that earlier version had for the same
    /// symbols.
    pub fn add_parent_edges(
        &mut self,
        child: NodeId,
        parent: NodeId,
        syms: &FxHashSet<SymbolId>,
        kind: SliceKind,
    ) {
        if syms.is_empty() {
            return;
        }
        let child_key = self.node(child).key().clone();
        let parent_key = self.node(parent).key().clone();
        if self
            .node(child)
            .edges()
            .children(EdgeContext::current(kind))
            .contains_key(&parent_key)
        {
            return;
        }
        if parent_key == child_key {
            self.inherit_parent_edges(child, syms, kind);
            return;
        }
        let ctx = self.context_for(parent, kind);
        tracing::trace!("edge {parent_key:?} -> {child_key:?} ({ctx:?})");
        extend_edge(
            self.nodes[child].node.edges_mut().parents_mut(ctx),
            parent_key,
            syms.iter().copied(),
        );
        extend_edge(
            self.nodes[parent].node.edges_mut().children_mut(ctx),
            child_key,
            syms.iter().copied(),
        );
    }

    fn inherit_parent_edges(&mut self, child: NodeId, syms: &FxHashSet<SymbolId>, kind: SliceKind) {
        let Some(prev) = self.prev(child) else {
            return;
        };
        let child_key = self.node(child).key().clone();
        for ctx in [EdgeContext::current(kind), EdgeContext::dangling(kind)] {
            let inherited: Vec<(N::Key, FxHashSet<SymbolId>)> = self
                .node(prev)
                .edges()
                .parents(ctx)
                .iter()
                .filter(|(parent_key, _)| **parent_key != child_key)
                .filter_map(|(parent_key, prev_syms)| {
                    let common: FxHashSet<SymbolId> = prev_syms.intersection(syms).copied().collect();
                    (!common.is_empty()).then(|| (parent_key.clone(), common))
                })
                .collect();
            for (parent_key, common) in inherited {
                let parent = self.current(&parent_key);
                extend_edge(
                    self.nodes[child].node.edges_mut().parents_mut(ctx),
                    parent_key,
                    common.iter().copied(),
                );
                if let Some(parent) = parent {
                    extend_edge(
                        self.nodes[parent].node.edges_mut().children_mut(ctx),
                        child_key.clone(),
                        common,
                    );
                }
            }
        }
    }

    pub fn remove_parent_edges(
        &mut self,
        child: NodeId,
        parent: NodeId,
        syms: &FxHashSet<SymbolId>,
        kind: SliceKind,
    ) {
        let child_key = self.node(child).key().clone();
        let parent_key = self.node(parent).key().clone();
        let ctx = self.context_for(parent, kind);
        shrink_edge(
            self.nodes[child].node.edges_mut().parents_mut(ctx),
            &parent_key,
            syms,
        );
        shrink_edge(
            self.nodes[parent].node.edges_mut().children_mut(ctx),
            &child_key,
            syms,
        );
    }

    /// Move the edge `prev_parent -> child` so that it comes from `new_parent`
    pub fn replace_parent_edges(
        &mut self,
        child: NodeId,
        prev_parent: NodeId,
        new_parent: NodeId,
        kind: SliceKind,
    ) {
        let child_key = self.node(child).key().clone();
        let prev_key = self.node(prev_parent).key().clone();
        let prev_ctx = self.context_for(prev_parent, kind);
        let Some(syms) = self.nodes[child]
            .node
            .edges_mut()
            .parents_mut(prev_ctx)
            .remove(&prev_key)
        else {
            return;
        };
        self.nodes[prev_parent]
            .node
            .edges_mut()
            .children_mut(prev_ctx)
            .remove(&child_key);

        let new_key = self.node(new_parent).key().clone();
        let new_ctx = self.context_for(new_parent, kind);
        extend_edge(
            self.nodes[child].node.edges_mut().parents_mut(new_ctx),
            new_key,
            syms.iter().copied(),
        );
        extend_edge(
            self.nodes[new_parent].node.edges_mut().children_mut(new_ctx),
            child_key,
            syms,
        );
    }

    /// Move the edge `parent -> prev_child` so that it goes to `new_child`
    pub fn replace_child_edges(
        &mut self,
        parent: NodeId,
        prev_child: NodeId,
        new_child: NodeId,
        kind: SliceKind,
    ) {
        let parent_key = self.node(parent).key().clone();
        let prev_key = self.node(prev_child).key().clone();
        let prev_ctx = self.context_for(prev_child, kind);
        let Some(syms) = self.nodes[parent]
            .node
            .edges_mut()
            .children_mut(prev_ctx)
            .remove(&prev_key)
        else {
            return;
        };
        self.nodes[prev_child]
            .node
            .edges_mut()
            .parents_mut(prev_ctx)
            .remove(&parent_key);

        let new_key = self.node(new_child).key().clone();
        let new_ctx = self.context_for(new_child, kind);
        extend_edge(
            self.nodes[parent].node.edges_mut().children_mut(new_ctx),
            new_key,
            syms.iter().copied(),
        );
        extend_edge(
            self.nodes[new_child].node.edges_mut().parents_mut(new_ctx),
            parent_key,
            syms,
        );
    }

    /// Closure of `seeds` over the parent edges of `kinds`, ordered by
    /// timestamp. Empty when no kind is enabled.
    pub fn make_multi_slice(
        &self,
        seeds: impl IntoIterator<Item = NodeId>,
        kinds: &[SliceKind],
    ) -> Vec<NodeId> {
        if kinds.is_empty() {
            return Vec::new();
        }
        let mut closure: FxHashSet<NodeId> = FxHashSet::default();
        let mut stack: Vec<NodeId> = seeds.into_iter().collect();
        while let Some(id) = stack.pop() {
            if !closure.insert(id) {
                continue;
            }
            for kind in kinds {
                stack.extend(self.parents(id, *kind));
            }
        }
        let mut closure: Vec<NodeId> = closure.into_iter().collect();
        closure.sort_by_key(|id| (self.node(*id).timestamp(), *id));
        closure
    }

    /// Texts of a closure grouped by cell counter, joined with newlines
    pub fn make_cell_dict_from_closure(&self, closure: &[NodeId]) -> BTreeMap<i64, String> {
        let mut ordered: Vec<NodeId> = closure.to_vec();
        ordered.sort_by_key(|id| (self.node(*id).timestamp(), *id));
        let mut texts: BTreeMap<i64, Vec<&str>> = BTreeMap::new();
        for id in ordered {
            let node = self.node(id);
            texts
                .entry(node.timestamp().cell_counter)
                .or_default()
                .push(node.text());
        }
        texts
            .into_iter()
            .map(|(counter, parts)| (counter, parts.join("\n")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal node for graph tests: one statement per version
    #[derive(Debug, Clone)]
    struct TestNode {
        key: u32,
        ts: Timestamp,
        text: String,
        edges: EdgeMaps<u32>,
    }

    impl TestNode {
        fn new(key: u32, counter: i64, text: &str) -> Self {
            Self {
                key,
                ts: Timestamp::new(counter, 0),
                text: text.to_string(),
                edges: EdgeMaps::default(),
            }
        }
    }

    impl Sliceable for TestNode {
        type Key = u32;

        fn key(&self) -> &u32 {
            &self.key
        }

        fn timestamp(&self) -> Timestamp {
            self.ts
        }

        fn locate(ts: Timestamp) -> Timestamp {
            ts
        }

        fn text(&self) -> &str {
            &self.text
        }

        fn edges(&self) -> &EdgeMaps<u32> {
            &self.edges
        }

        fn edges_mut(&mut self) -> &mut EdgeMaps<u32> {
            &mut self.edges
        }
    }

    fn syms(ids: &[usize]) -> FxHashSet<SymbolId> {
        ids.iter().map(|id| SymbolId::new(*id)).collect()
    }

    const STATIC: SliceKind = SliceKind::Static;

    #[test]
    fn test_edges_are_symmetric() {
        let mut graph = SliceGraph::new();
        let a = graph.insert(TestNode::new(0, 1, "x = 1"));
        let b = graph.insert(TestNode::new(1, 2, "y = x"));
        graph.add_parent_edges(b, a, &syms(&[0]), STATIC);

        assert_eq!(graph.parents(b, STATIC), vec![a]);
        assert!(graph
            .node(a)
            .edges()
            .children(EdgeContext::current(STATIC))
            .contains_key(&1));
        assert!(graph.parents(b, SliceKind::Dynamic).is_empty());
    }

    #[test]
    fn test_no_two_node_cycles() {
        let mut graph = SliceGraph::new();
        let a = graph.insert(TestNode::new(0, 1, "a"));
        let b = graph.insert(TestNode::new(1, 2, "b"));
        graph.add_parent_edges(b, a, &syms(&[0]), STATIC);
        graph.add_parent_edges(a, b, &syms(&[1]), STATIC);
        assert!(graph.parents(a, STATIC).is_empty());
    }

    #[test]
    fn test_empty_symbols_add_nothing() {
        let mut graph = SliceGraph::new();
        let a = graph.insert(TestNode::new(0, 1, "a"));
        let b = graph.insert(TestNode::new(1, 2, "b"));
        graph.add_parent_edges(b, a, &syms(&[]), STATIC);
        assert!(graph.parents(b, STATIC).is_empty());
    }

    #[test]
    fn test_superseded_parent_goes_to_dangling_slot() {
        let mut graph = SliceGraph::new();
        let old_a = graph.insert(TestNode::new(0, 1, "x = 1"));
        graph.insert(TestNode::new(0, 2, "x = 2"));
        let b = graph.insert(TestNode::new(1, 3, "y = x"));
        graph.add_parent_edges(b, old_a, &syms(&[0]), STATIC);

        assert!(graph.parents(b, STATIC).is_empty());
        assert!(graph
            .node(b)
            .edges()
            .parents(EdgeContext::dangling(STATIC))
            .contains_key(&0));
    }

    #[test]
    fn test_self_edge_inherits_previous_parents() {
        let mut graph = SliceGraph::new();
        let a = graph.insert(TestNode::new(0, 1, "x = 1"));
        let c1 = graph.insert(TestNode::new(2, 2, "x = x + 1"));
        graph.add_parent_edges(c1, a, &syms(&[0]), STATIC);
        let c2 = graph.insert(TestNode::new(2, 3, "x = x + 1"));
        graph.add_parent_edges(c2, c1, &syms(&[0]), STATIC);

        assert_eq!(graph.parents(c2, STATIC), vec![a]);
        assert!(graph.prev(c2) == Some(c1));
    }

    #[test]
    fn test_remove_and_replace_edges() {
        let mut graph = SliceGraph::new();
        let a = graph.insert(TestNode::new(0, 1, "a"));
        let b = graph.insert(TestNode::new(1, 2, "b"));
        let c = graph.insert(TestNode::new(2, 3, "c"));
        graph.add_parent_edges(c, a, &syms(&[0, 1]), STATIC);

        graph.remove_parent_edges(c, a, &syms(&[0]), STATIC);
        assert_eq!(graph.parents(c, STATIC), vec![a]);

        graph.replace_parent_edges(c, a, b, STATIC);
        assert_eq!(graph.parents(c, STATIC), vec![b]);
        assert!(graph
            .node(a)
            .edges()
            .children(EdgeContext::current(STATIC))
            .is_empty());

        let d = graph.insert(TestNode::new(3, 4, "d"));
        graph.replace_child_edges(b, c, d, STATIC);
        assert!(graph.parents(c, STATIC).is_empty());
        assert_eq!(graph.parents(d, STATIC), vec![b]);
    }

    #[test]
    fn test_replacement_child_slot_follows_its_currency() {
        let mut graph = SliceGraph::new();
        let a = graph.insert(TestNode::new(0, 1, "x = 1"));
        let old_b = graph.insert(TestNode::new(1, 2, "y = x"));
        let c = graph.insert(TestNode::new(2, 3, "z = x"));
        graph.add_parent_edges(c, a, &syms(&[0]), STATIC);
        graph.insert(TestNode::new(1, 4, "y = x + 1"));

        // `a` is current, the replacement child is not
        graph.replace_child_edges(a, c, old_b, STATIC);
        let edges = graph.node(a).edges();
        assert!(edges.children(EdgeContext::current(STATIC)).is_empty());
        assert!(edges.children(EdgeContext::dangling(STATIC)).contains_key(&1));
        assert!(graph
            .node(old_b)
            .edges()
            .parents(EdgeContext::dangling(STATIC))
            .contains_key(&0));
        assert!(graph.parents(c, STATIC).is_empty());
    }

    #[test]
    fn test_dangling_edges_pruned_two_versions_back() {
        let mut graph = SliceGraph::new();
        let a1 = graph.insert(TestNode::new(0, 1, "x = 1"));
        let b = graph.insert(TestNode::new(1, 2, "y = x"));
        let c = graph.insert(TestNode::new(2, 3, "z = y"));
        graph.add_parent_edges(c, b, &syms(&[1]), STATIC);
        graph.insert(TestNode::new(0, 4, "x = 2"));
        graph.add_parent_edges(b, a1, &syms(&[0]), STATIC);
        let b2 = graph.insert(TestNode::new(1, 5, "y = x"));
        graph.add_parent_edges(b2, a1, &syms(&[0]), STATIC);

        let dangling = EdgeContext::dangling(STATIC);
        assert!(graph.node(b).edges().parents(dangling).contains_key(&0));
        assert!(graph.node(b2).edges().parents(dangling).contains_key(&0));

        graph.insert(TestNode::new(1, 6, "y = 0"));
        assert!(graph.node(b).edges().parents(dangling).is_empty());
        assert!(graph.node(b2).edges().parents(dangling).contains_key(&0));
        // current edges survive
        assert!(graph
            .node(b)
            .edges()
            .children(EdgeContext::current(STATIC))
            .contains_key(&2));
    }

    #[test]
    fn test_slice_follows_current_versions() {
        let mut graph = SliceGraph::new();
        let a = graph.insert(TestNode::new(0, 1, "x = 1"));
        let b = graph.insert(TestNode::new(1, 2, "y = x"));
        let c = graph.insert(TestNode::new(2, 3, "z = y"));
        graph.insert(TestNode::new(3, 4, "w = 0"));
        graph.add_parent_edges(b, a, &syms(&[0]), STATIC);
        graph.add_parent_edges(c, b, &syms(&[1]), SliceKind::Dynamic);

        assert_eq!(graph.make_multi_slice([c], &[STATIC]), vec![c]);
        assert_eq!(
            graph.make_multi_slice([c], &[STATIC, SliceKind::Dynamic]),
            vec![a, b, c]
        );
        assert!(graph.make_multi_slice([c], &[]).is_empty());

        let closure = graph.make_multi_slice([c], &[STATIC, SliceKind::Dynamic]);
        let dict = graph.make_cell_dict_from_closure(&closure);
        assert_eq!(dict.get(&1).map(String::as_str), Some("x = 1"));
        assert_eq!(dict.len(), 3);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Graph of `n` single-version nodes with edges from lower to higher keys
        fn graph_from_edges(n: u32, edges: &[(u32, u32)]) -> SliceGraph<TestNode> {
            let mut graph = SliceGraph::new();
            for key in 0..n {
                graph.insert(TestNode::new(key, i64::from(key), "stmt"));
            }
            for (i, (a, b)) in edges.iter().enumerate() {
                let (parent, child) = ((*a).min(*b), (*a).max(*b));
                if parent != child {
                    graph.add_parent_edges(
                        NodeId::new(child as usize),
                        NodeId::new(parent as usize),
                        &syms(&[i]),
                        STATIC,
                    );
                }
            }
            graph
        }

        /// Naive fixed point over the parent relation
        fn naive_closure(graph: &SliceGraph<TestNode>, seeds: &[NodeId]) -> Vec<NodeId> {
            let mut closure: FxHashSet<NodeId> = seeds.iter().copied().collect();
            loop {
                let before = closure.len();
                let snapshot: Vec<NodeId> = closure.iter().copied().collect();
                for id in snapshot {
                    closure.extend(graph.parents(id, STATIC));
                }
                if closure.len() == before {
                    break;
                }
            }
            let mut closure: Vec<NodeId> = closure.into_iter().collect();
            closure.sort_by_key(|id| (graph.node(*id).timestamp(), *id));
            closure
        }

        proptest! {
            #[test]
            fn slice_matches_fixed_point_in_any_seed_order(
                edges in prop::collection::vec((0u32..12, 0u32..12), 0..40),
                seeds in prop::collection::vec(0usize..12, 1..4),
            ) {
                let graph = graph_from_edges(12, &edges);
                let seeds: Vec<NodeId> = seeds.into_iter().map(NodeId::new).collect();
                let expected = naive_closure(&graph, &seeds);

                let forward = graph.make_multi_slice(seeds.iter().copied(), &[STATIC]);
                let backward = graph.make_multi_slice(seeds.iter().rev().copied(), &[STATIC]);
                prop_assert_eq!(&forward, &expected);
                prop_assert_eq!(&backward, &expected);
                prop_assert!(graph.make_multi_slice(seeds, &[]).is_empty());
            }
        }
    }
}
