//! Graph definition files and the node kind registry
//!
//! A definition names its nodes and links them by name:
//!
//! ```yaml
//! name: ticker_demo
//! nodes:
//!   - name: tick
//!     kind: ticker
//!   - name: out
//!     kind: print
//!     breakpoint: true
//! links:
//!   - from: tick
//!     to: out
//!     to_slot: 1
//! ```
//!
//! Node kinds are resolved through a [`NodeRegistry`] supplied by the host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::load_config_file;
use crate::error::{GraphError, Result};
use crate::events::EventBus;
use crate::graph::NodeGraph;
use crate::node::{ComputeStep, GraphNode, NodeId};
use crate::port::{ExecutionMode, PortSpec};

/// Top-level graph definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub nodes: Vec<NodeDefinition>,

    #[serde(default)]
    pub links: Vec<LinkDefinition>,
}

/// Node entry in a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique name within the definition, used by links
    pub name: String,

    /// Registered node kind
    pub kind: String,

    /// Display title; defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub breakpoint: bool,

    /// Explicit mode, applied after links are connected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,

    /// Kind-specific settings passed to the factory
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl NodeDefinition {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// Link entry in a definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDefinition {
    pub from: String,
    #[serde(default)]
    pub from_slot: usize,
    pub to: String,
    #[serde(default)]
    pub to_slot: usize,
}

impl GraphDefinition {
    /// Load a definition from a YAML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_config_file(path)
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check names and link endpoints
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(GraphError::Validation(format!(
                "Graph '{}' has no nodes",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                return Err(GraphError::Validation("Node name cannot be empty".into()));
            }
            if !names.insert(node.name.as_str()) {
                return Err(GraphError::Validation(format!(
                    "Duplicate node name: {}",
                    node.name
                )));
            }
        }

        for link in &self.links {
            if !names.contains(link.from.as_str()) {
                return Err(GraphError::Validation(format!(
                    "Link source '{}' does not exist",
                    link.from
                )));
            }
            if !names.contains(link.to.as_str()) {
                return Err(GraphError::Validation(format!(
                    "Link target '{}' does not exist",
                    link.to
                )));
            }
        }
        Ok(())
    }

    /// Instantiate the graph, resolving kinds through `registry`
    pub fn build(&self, registry: &NodeRegistry, events: EventBus) -> Result<LoadedGraph> {
        self.validate()?;

        let graph = Arc::new(NodeGraph::with_events(events));
        let mut names = BTreeMap::new();
        for def in &self.nodes {
            let node = graph.add_node(registry.create(def)?);
            names.insert(def.name.clone(), node.id());
        }

        for link in &self.links {
            // validate() guarantees both names exist
            let (Some(&from), Some(&to)) = (names.get(&link.from), names.get(&link.to)) else {
                continue;
            };
            graph
                .connect(from, link.from_slot, to, link.to_slot)
                .map_err(|e| {
                    GraphError::Validation(format!(
                        "Link {}[{}] -> {}[{}]: {}",
                        link.from, link.from_slot, link.to, link.to_slot, e
                    ))
                })?;
        }

        for def in &self.nodes {
            if let (Some(mode), Some(&id)) = (def.mode, names.get(&def.name)) {
                graph.set_node_mode(id, mode)?;
            }
        }

        tracing::info!(
            graph = %self.name,
            nodes = self.nodes.len(),
            links = self.links.len(),
            "Graph built"
        );
        Ok(LoadedGraph { graph, names })
    }
}

/// Ports and compute step produced by a node factory
pub struct NodeTemplate {
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
    pub compute: Arc<dyn ComputeStep>,
}

impl NodeTemplate {
    pub fn new(compute: Arc<dyn ComputeStep>) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            compute,
        }
    }

    pub fn input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self
    }
}

type NodeFactory = Arc<dyn Fn(&NodeDefinition) -> Result<NodeTemplate> + Send + Sync>;

/// Maps node kind names to factories
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&NodeDefinition) -> Result<NodeTemplate> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn create(&self, def: &NodeDefinition) -> Result<GraphNode> {
        let factory = self
            .factories
            .get(&def.kind)
            .ok_or_else(|| GraphError::UnknownNodeKind(def.kind.clone()))?;
        let template = factory(def)?;
        Ok(GraphNode::new(def.title(), template.compute)
            .with_kind(def.kind.clone())
            .with_inputs(template.inputs)
            .with_outputs(template.outputs)
            .with_breakpoint(def.breakpoint))
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// A built graph together with the definition names of its nodes
#[derive(Debug, Clone)]
pub struct LoadedGraph {
    pub graph: Arc<NodeGraph>,
    pub names: BTreeMap<String, NodeId>,
}

impl LoadedGraph {
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node(&self, name: &str) -> Option<Arc<GraphNode>> {
        self.node_id(name).and_then(|id| self.graph.node(id))
    }

    /// Definition name of a node id
    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }
}
