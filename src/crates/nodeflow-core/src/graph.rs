//! Node graph structure: nodes, links and the connection rules
//!
//! Structural rules are checked before a link is stored, so a rejected
//! connection never leaves a trace in the graph:
//!
//! - a node cannot be linked to itself
//! - data outputs feed data inputs and event outputs feed event inputs
//! - declared type names must match unless one side is `"*"`
//! - an input slot holds one link; connecting to it replaces the old one
//! - an event output slot drives a single target node
//!
//! Whenever an event input gains or loses its link the target's
//! [`ExecutionMode`] is re-inferred with [`infer_mode`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{GraphError, LinkErrorKind, Result};
use crate::events::{EngineEvent, EventBus, GraphEvent};
use crate::node::{GraphNode, NodeId};
use crate::port::{infer_mode, ExecutionMode, PortKind};

/// Identifier of a link within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(u64);

impl LinkId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directed edge from an output slot to an input slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub origin: NodeId,
    pub origin_slot: usize,
    pub target: NodeId,
    pub target_slot: usize,
    pub kind: PortKind,
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, Arc<GraphNode>>,
    /// Insertion order, used to break ties in the execution order
    order: Vec<NodeId>,
    links: BTreeMap<LinkId, Link>,
    next_link: u64,
}

impl GraphState {
    fn node(&self, id: NodeId) -> Result<&Arc<GraphNode>> {
        self.nodes
            .get(&id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    fn input_link(&self, target: NodeId, slot: usize) -> Option<&Link> {
        self.links
            .values()
            .find(|l| l.target == target && l.target_slot == slot)
    }

    fn event_input_connected(&self, target: NodeId) -> bool {
        self.links
            .values()
            .any(|l| l.target == target && l.kind == PortKind::Event)
    }

    /// Re-run mode inference for `target`, returning the new mode if it changed
    fn reinfer(&self, target: NodeId) -> Option<(NodeId, ExecutionMode)> {
        let node = self.nodes.get(&target)?;
        let current = node.mode();
        let next = infer_mode(current, self.event_input_connected(target));
        if next == current {
            return None;
        }
        node.set_mode(next);
        Some((target, next))
    }
}

/// Container of nodes and links with an attached event bus
pub struct NodeGraph {
    state: RwLock<GraphState>,
    events: EventBus,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::with_events(EventBus::default())
    }

    pub fn with_events(events: EventBus) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Add a node, taking ownership of it
    pub fn add_node(&self, node: GraphNode) -> Arc<GraphNode> {
        let node = Arc::new(node);
        node.set_attached(true);
        let mut state = self.state.write();
        state.order.push(node.id());
        state.nodes.insert(node.id(), Arc::clone(&node));
        tracing::debug!(node = %node.id(), title = %node.title(), "Node added");
        node
    }

    /// Remove a node and every link touching it
    pub fn remove_node(&self, id: NodeId) -> Result<Arc<GraphNode>> {
        let (node, changed) = {
            let mut state = self.state.write();
            let node = state
                .nodes
                .remove(&id)
                .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
            state.order.retain(|n| *n != id);

            let mut affected = BTreeSet::new();
            state.links.retain(|_, link| {
                if link.origin == id || link.target == id {
                    if link.kind == PortKind::Event && link.target != id {
                        affected.insert(link.target);
                    }
                    false
                } else {
                    true
                }
            });
            let changed: Vec<_> = affected.into_iter().filter_map(|t| state.reinfer(t)).collect();
            (node, changed)
        };

        node.set_attached(false);
        tracing::debug!(node = %id, "Node removed");
        self.publish_mode_changes(changed);
        Ok(node)
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<GraphNode>> {
        self.state.read().nodes.get(&id).cloned()
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> Vec<Arc<GraphNode>> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.state.read().nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().nodes.is_empty()
    }

    /// Link output `origin_slot` of `origin` to input `target_slot` of `target`
    pub fn connect(
        &self,
        origin: NodeId,
        origin_slot: usize,
        target: NodeId,
        target_slot: usize,
    ) -> Result<LinkId> {
        let result = {
            let mut state = self.state.write();
            Self::connect_locked(&mut state, origin, origin_slot, target, target_slot)
        };

        match result {
            Ok((id, changed)) => {
                self.publish_mode_changes(changed);
                Ok(id)
            }
            Err(GraphError::LinkRejected { kind }) => {
                tracing::warn!(
                    origin = %origin,
                    origin_slot,
                    target = %target,
                    kind = ?kind,
                    "Link rejected"
                );
                self.events.publish(GraphEvent::LinkRejected {
                    kind,
                    origin,
                    origin_slot,
                    target,
                });
                Err(GraphError::LinkRejected { kind })
            }
            Err(e) => Err(e),
        }
    }

    fn connect_locked(
        state: &mut GraphState,
        origin: NodeId,
        origin_slot: usize,
        target: NodeId,
        target_slot: usize,
    ) -> Result<(LinkId, Vec<(NodeId, ExecutionMode)>)> {
        let source = state.node(origin)?;
        let sink = state.node(target)?;
        let output = source.output_port(origin_slot)?;
        let input = sink.input_port(target_slot)?;

        if origin == target {
            return Err(GraphError::LinkRejected {
                kind: LinkErrorKind::SelfLink,
            });
        }

        output.accepts(input).map_err(|reason| {
            GraphError::incompatible(
                format!("{}[{}]", source.title(), origin_slot),
                format!("{}[{}]", sink.title(), target_slot),
                reason,
            )
        })?;
        let kind = output.kind;

        if kind == PortKind::Event {
            let drives_other = state.links.values().any(|l| {
                l.origin == origin && l.origin_slot == origin_slot && l.target != target
            });
            if drives_other {
                return Err(GraphError::LinkRejected {
                    kind: LinkErrorKind::MultipleEvent,
                });
            }
        }

        let mut touched = BTreeSet::new();
        if let Some(old) = state.input_link(target, target_slot).map(|l| l.id) {
            if let Some(link) = state.links.remove(&old) {
                tracing::debug!(link = %old, "Replacing existing input link");
                if link.kind == PortKind::Event {
                    touched.insert(link.target);
                }
            }
        }

        state.next_link += 1;
        let id = LinkId(state.next_link);
        state.links.insert(
            id,
            Link {
                id,
                origin,
                origin_slot,
                target,
                target_slot,
                kind,
            },
        );
        if kind == PortKind::Event {
            touched.insert(target);
        }

        let changed = touched.into_iter().filter_map(|t| state.reinfer(t)).collect();
        Ok((id, changed))
    }

    /// Remove a link
    pub fn disconnect(&self, id: LinkId) -> Result<Link> {
        let (link, changed) = {
            let mut state = self.state.write();
            let link = state
                .links
                .remove(&id)
                .ok_or(GraphError::LinkNotFound(id.value()))?;
            let changed = if link.kind == PortKind::Event {
                state.reinfer(link.target)
            } else {
                None
            };
            (link, changed)
        };
        self.publish_mode_changes(changed);
        Ok(link)
    }

    /// All links in creation order
    pub fn links(&self) -> Vec<Link> {
        self.state.read().links.values().cloned().collect()
    }

    pub fn links_from(&self, origin: NodeId, slot: usize) -> Vec<Link> {
        self.state
            .read()
            .links
            .values()
            .filter(|l| l.origin == origin && l.origin_slot == slot)
            .cloned()
            .collect()
    }

    pub fn input_link(&self, target: NodeId, slot: usize) -> Option<Link> {
        self.state.read().input_link(target, slot).cloned()
    }

    /// Node and output slot feeding input `slot` of `target`
    pub fn input_source(&self, target: NodeId, slot: usize) -> Option<(Arc<GraphNode>, usize)> {
        let state = self.state.read();
        let link = state.input_link(target, slot)?;
        let source = state.nodes.get(&link.origin)?;
        Some((Arc::clone(source), link.origin_slot))
    }

    /// Nodes connected to event output `slot` of `origin`
    pub fn event_targets(&self, origin: NodeId, slot: usize) -> Vec<Arc<GraphNode>> {
        let state = self.state.read();
        state
            .links
            .values()
            .filter(|l| l.origin == origin && l.origin_slot == slot && l.kind == PortKind::Event)
            .filter_map(|l| state.nodes.get(&l.target).cloned())
            .collect()
    }

    /// Topological order over all links, ties broken by insertion order.
    ///
    /// Nodes on a cycle are appended in insertion order.
    pub fn execution_order(&self) -> Vec<Arc<GraphNode>> {
        let state = self.state.read();
        let position: HashMap<NodeId, usize> = state
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let mut indegree = vec![0usize; state.order.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); state.order.len()];
        for link in state.links.values() {
            if let (Some(&from), Some(&to)) = (position.get(&link.origin), position.get(&link.target)) {
                successors[from].push(to);
                indegree[to] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..indegree.len()).filter(|i| indegree[*i] == 0).collect();
        let mut visited = vec![false; indegree.len()];
        let mut order = Vec::with_capacity(indegree.len());
        while let Some(next) = ready.pop_first() {
            visited[next] = true;
            order.push(next);
            for &succ in &successors[next] {
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    ready.insert(succ);
                }
            }
        }
        order.extend((0..visited.len()).filter(|i| !visited[*i]));

        order
            .into_iter()
            .filter_map(|i| state.nodes.get(&state.order[i]).cloned())
            .collect()
    }

    /// Set a node's mode explicitly, as a user mute/unmute would
    pub fn set_node_mode(&self, id: NodeId, mode: ExecutionMode) -> Result<()> {
        let node = self
            .node(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        if node.mode() != mode {
            node.set_mode(mode);
            self.events.publish(GraphEvent::ModeChanged { node: id, mode });
        }
        Ok(())
    }

    fn publish_mode_changes(&self, changed: impl IntoIterator<Item = (NodeId, ExecutionMode)>) {
        for (node, mode) in changed {
            tracing::debug!(node = %node, mode = %mode, "Execution mode inferred");
            self.events.publish(GraphEvent::ModeChanged { node, mode });
        }
    }
}

impl Default for NodeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("NodeGraph")
            .field("nodes", &state.order.len())
            .field("links", &state.links.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::compute_fn;
    use crate::port::PortSpec;
    use proptest::prelude::*;

    fn noop(title: &str) -> GraphNode {
        GraphNode::new(title, compute_fn(|_| Ok(())))
    }

    fn event_source(graph: &NodeGraph, title: &str) -> Arc<GraphNode> {
        graph.add_node(noop(title).with_output(PortSpec::event("fired")))
    }

    fn event_sink(graph: &NodeGraph, title: &str) -> Arc<GraphNode> {
        graph.add_node(noop(title).with_input(PortSpec::event("on")))
    }

    #[test]
    fn test_connect_event_infers_on_trigger() {
        let graph = NodeGraph::new();
        let mut rx = graph.subscribe();
        let s = event_source(&graph, "s");
        let a = event_sink(&graph, "a");

        let link = graph.connect(s.id(), 0, a.id(), 0).unwrap();
        assert_eq!(a.mode(), ExecutionMode::OnTrigger);
        assert_eq!(
            rx.try_recv().unwrap().event,
            GraphEvent::ModeChanged {
                node: a.id(),
                mode: ExecutionMode::OnTrigger
            }
        );

        graph.disconnect(link).unwrap();
        assert_eq!(a.mode(), ExecutionMode::Always);
    }

    #[test]
    fn test_second_event_target_rejected() {
        let graph = NodeGraph::new();
        let s = event_source(&graph, "s");
        let a = event_sink(&graph, "a");
        let b = event_sink(&graph, "b");

        let first = graph.connect(s.id(), 0, a.id(), 0).unwrap();
        let mut rx = graph.subscribe();

        let err = graph.connect(s.id(), 0, b.id(), 0).unwrap_err();
        assert!(matches!(
            err,
            GraphError::LinkRejected {
                kind: LinkErrorKind::MultipleEvent
            }
        ));
        assert!(matches!(
            rx.try_recv().unwrap().event,
            GraphEvent::LinkRejected {
                kind: LinkErrorKind::MultipleEvent,
                ..
            }
        ));

        let links = graph.links_from(s.id(), 0);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].id, first);
        assert_eq!(links[0].target, a.id());
        assert_eq!(b.mode(), ExecutionMode::Always);
    }

    #[test]
    fn test_self_link_rejected() {
        let graph = NodeGraph::new();
        let n = graph.add_node(
            noop("loop")
                .with_input(PortSpec::data("in"))
                .with_output(PortSpec::data("out")),
        );
        let err = graph.connect(n.id(), 0, n.id(), 0).unwrap_err();
        assert!(matches!(
            err,
            GraphError::LinkRejected {
                kind: LinkErrorKind::SelfLink
            }
        ));
        assert!(graph.links().is_empty());
    }

    #[test]
    fn test_kind_mismatch_is_incompatible() {
        let graph = NodeGraph::new();
        let s = event_source(&graph, "s");
        let d = graph.add_node(noop("d").with_input(PortSpec::data("in")));
        assert!(matches!(
            graph.connect(s.id(), 0, d.id(), 0),
            Err(GraphError::IncompatiblePorts { .. })
        ));
    }

    #[test]
    fn test_input_link_is_replaced() {
        let graph = NodeGraph::new();
        let a = graph.add_node(noop("a").with_output(PortSpec::data("out")));
        let b = graph.add_node(noop("b").with_output(PortSpec::data("out")));
        let c = graph.add_node(noop("c").with_input(PortSpec::data("in")));

        graph.connect(a.id(), 0, c.id(), 0).unwrap();
        graph.connect(b.id(), 0, c.id(), 0).unwrap();

        assert_eq!(graph.links().len(), 1);
        let (source, slot) = graph.input_source(c.id(), 0).unwrap();
        assert_eq!(source.id(), b.id());
        assert_eq!(slot, 0);
    }

    #[test]
    fn test_never_survives_connection_changes() {
        let graph = NodeGraph::new();
        let s = event_source(&graph, "s");
        let a = event_sink(&graph, "a");
        graph.set_node_mode(a.id(), ExecutionMode::Never).unwrap();

        let link = graph.connect(s.id(), 0, a.id(), 0).unwrap();
        assert_eq!(a.mode(), ExecutionMode::Never);
        graph.disconnect(link).unwrap();
        assert_eq!(a.mode(), ExecutionMode::Never);
    }

    #[test]
    fn test_remove_node_drops_links_and_reinfers() {
        let graph = NodeGraph::new();
        let s = event_source(&graph, "s");
        let a = event_sink(&graph, "a");
        graph.connect(s.id(), 0, a.id(), 0).unwrap();

        let removed = graph.remove_node(s.id()).unwrap();
        assert!(!removed.is_attached());
        assert!(graph.links().is_empty());
        assert_eq!(a.mode(), ExecutionMode::Always);
        assert!(matches!(
            graph.remove_node(s.id()),
            Err(GraphError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_disconnect_unknown_link() {
        let graph = NodeGraph::new();
        assert!(matches!(
            graph.disconnect(LinkId(42)),
            Err(GraphError::LinkNotFound(42))
        ));
    }

    #[test]
    fn test_execution_order_respects_links() {
        let graph = NodeGraph::new();
        let sink = graph.add_node(noop("sink").with_input(PortSpec::data("in")));
        let source = graph.add_node(noop("source").with_output(PortSpec::data("out")));
        let lone = graph.add_node(noop("lone"));
        graph.connect(source.id(), 0, sink.id(), 0).unwrap();

        let order: Vec<_> = graph
            .execution_order()
            .iter()
            .map(|n| n.title().to_string())
            .collect();
        assert_eq!(order, vec!["source", "lone", "sink"]);
    }

    proptest! {
        #[test]
        fn prop_execution_order_is_a_permutation(
            count in 1usize..8,
            edges in proptest::collection::vec((0usize..8, 0usize..8), 0..16),
        ) {
            let graph = NodeGraph::new();
            let nodes: Vec<_> = (0..count)
                .map(|i| graph.add_node(
                    noop(&format!("n{}", i))
                        .with_input(PortSpec::data("in"))
                        .with_output(PortSpec::data("out")),
                ))
                .collect();
            for (from, to) in edges {
                if from < count && to < count {
                    let _ = graph.connect(nodes[from].id(), 0, nodes[to].id(), 0);
                }
            }

            let order = graph.execution_order();
            prop_assert_eq!(order.len(), count);
            let unique: BTreeSet<_> = order.iter().map(|n| n.id()).collect();
            prop_assert_eq!(unique.len(), count);
        }

        #[test]
        fn prop_event_slot_drives_one_target(
            attempts in proptest::collection::vec(0usize..4, 1..12),
        ) {
            let graph = NodeGraph::new();
            let s = event_source(&graph, "s");
            let sinks: Vec<_> = (0..4).map(|i| event_sink(&graph, &format!("t{}", i))).collect();
            for i in attempts {
                let _ = graph.connect(s.id(), 0, sinks[i].id(), 0);
            }
            let targets: BTreeSet<_> = graph.links_from(s.id(), 0).iter().map(|l| l.target).collect();
            prop_assert_eq!(targets.len(), 1);
        }
    }
}
