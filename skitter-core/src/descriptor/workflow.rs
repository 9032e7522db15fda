//! The `Workflow` descriptor, its validation invariants, and nested-workflow
//! flattening.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::descriptor::operation::Operation;
use crate::descriptor::port::{NodeId, PortName};
use crate::descriptor::strategy::Strategy;
use crate::value::Value;

/// `out_port -> [(node_id, in_port)]`.
pub type Links = HashMap<PortName, Vec<(NodeId, PortName)>>;

/// A single node occurrence inside a workflow. Either leaf (backed by an
/// `Operation`) or nested (backed by a sub-`Workflow`, flattened away before
/// deployment).
#[derive(Clone)]
pub enum Node {
    Leaf {
        operation: Arc<Operation>,
        args: Value,
        /// `None` means "use `operation.default_strategy`"; both being
        /// absent is the `NoStrategy` validation error.
        strategy: Option<Arc<Strategy>>,
        links: Links,
    },
    Nested {
        workflow: Arc<Workflow>,
        links: Links,
    },
}

impl Node {
    pub fn links(&self) -> &Links {
        match self {
            Node::Leaf { links, .. } => links,
            Node::Nested { links, .. } => links,
        }
    }

    /// The strategy actually governing this node: its own, or its
    /// operation's default.
    pub fn resolved_strategy(&self) -> Option<Arc<Strategy>> {
        match self {
            Node::Leaf {
                strategy,
                operation,
                ..
            } => strategy.clone().or_else(|| operation.default_strategy.clone()),
            Node::Nested { .. } => None,
        }
    }
}

/// Immutable directed graph of nodes with typed in/out ports.
#[derive(Clone)]
pub struct Workflow {
    pub in_ports: Vec<PortName>,
    pub out_ports: Vec<PortName>,
    /// Routing for values entering through a workflow in-port, `in_port ->
    /// [(node_id, in_port)]` — distinct from a node's own out-port links.
    pub entry_links: Links,
    pub nodes: HashMap<NodeId, Node>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("link destination references unknown node `{0}`")]
    UnknownDestinationNode(String),
    #[error("link destination references unknown in-port `{0}` on node `{1}`")]
    UnknownDestinationPort(String, String),
    #[error("emitted out-port `{0}` on node `{1}` is not a valid out-port of its operation")]
    UnknownSourcePort(String, String),
    #[error("workflow in-port `{0}` has no downstream destination")]
    DanglingWorkflowInPort(String),
    #[error("node without a strategy and without a default strategy: `{0}`")]
    NoStrategy(String),
    #[error("workflow contains a dependency cycle")]
    Cycle,
}

impl Workflow {
    pub fn new(
        in_ports: Vec<PortName>,
        out_ports: Vec<PortName>,
        entry_links: Links,
        nodes: HashMap<NodeId, Node>,
    ) -> Result<Self, ValidationError> {
        let workflow = Self {
            in_ports,
            out_ports,
            entry_links,
            nodes,
        };
        workflow.validate()?;
        Ok(workflow)
    }

    /// Structural validation invariants. Cycle detection happens
    /// separately, as part of the deployment engine's topological sort,
    /// since it needs the same traversal.
    fn validate(&self) -> Result<(), ValidationError> {
        for (node_id, node) in &self.nodes {
            if let Node::Leaf { operation, .. } = node {
                for port in node.links().keys() {
                    if !operation.has_out_port(port) {
                        return Err(ValidationError::UnknownSourcePort(
                            port.to_string(),
                            node_id.to_string(),
                        ));
                    }
                }
                if node.resolved_strategy().is_none() {
                    return Err(ValidationError::NoStrategy(node_id.to_string()));
                }
            }
            for (_, dests) in node.links() {
                for (dest_node, dest_port) in dests {
                    let dest = self
                        .nodes
                        .get(dest_node)
                        .ok_or_else(|| ValidationError::UnknownDestinationNode(dest_node.to_string()))?;
                    if let Node::Leaf { operation, .. } = dest {
                        if !operation.has_in_port(dest_port) {
                            return Err(ValidationError::UnknownDestinationPort(
                                dest_port.to_string(),
                                dest_node.to_string(),
                            ));
                        }
                    }
                }
            }
        }

        for (dest_node, dest_port) in self.entry_links.values().flatten() {
            let dest = self
                .nodes
                .get(dest_node)
                .ok_or_else(|| ValidationError::UnknownDestinationNode(dest_node.to_string()))?;
            if let Node::Leaf { operation, .. } = dest {
                if !operation.has_in_port(dest_port) {
                    return Err(ValidationError::UnknownDestinationPort(
                        dest_port.to_string(),
                        dest_node.to_string(),
                    ));
                }
            }
        }

        let connected: HashSet<&PortName> = self.entry_links.keys().collect();
        for port in &self.in_ports {
            if !connected.contains(port) {
                return Err(ValidationError::DanglingWorkflowInPort(port.to_string()));
            }
        }

        Ok(())
    }
}

/// Flattens nested workflows into siblings of the parent, rewriting external
/// links, and generating unique ids for interior nodes of the formerly
/// nested workflow.
pub fn flatten(workflow: &Workflow) -> Workflow {
    let mut flat_nodes = HashMap::new();
    flatten_into(workflow, "", &mut flat_nodes);
    Workflow {
        in_ports: workflow.in_ports.clone(),
        out_ports: workflow.out_ports.clone(),
        entry_links: workflow.entry_links.clone(),
        nodes: flat_nodes,
    }
}

fn flatten_into(workflow: &Workflow, prefix: &str, out: &mut HashMap<NodeId, Node>) {
    for (node_id, node) in &workflow.nodes {
        let flat_id = if prefix.is_empty() {
            node_id.clone()
        } else {
            NodeId::new(format!("{prefix}/{node_id}"))
        };
        match node {
            Node::Leaf {
                operation,
                args,
                strategy,
                links,
            } => {
                let rewritten_links = rewrite_links(links, prefix);
                out.insert(
                    flat_id,
                    Node::Leaf {
                        operation: operation.clone(),
                        args: args.clone(),
                        strategy: strategy.clone(),
                        links: rewritten_links,
                    },
                );
            }
            Node::Nested {
                workflow: nested,
                links,
            } => {
                let nested_prefix = flat_id.0.clone();
                let mut interior = HashMap::new();
                flatten_into(nested, &nested_prefix, &mut interior);
                // `links` routes the sub-workflow's own out-ports to
                // destinations in the *parent* scope, so its destinations
                // are rewritten at this level's prefix, not the nested one.
                let exit_links = rewrite_links(links, prefix);
                attach_exit_links(&mut interior, &exit_links);
                out.extend(interior);
            }
        }
    }
}

/// Routes a flattened nested workflow's exit links onto its terminal
/// interior leaves: the leaves whose own links are empty, since nothing
/// inside the sub-workflow routes further once a value reaches them.
fn attach_exit_links(interior: &mut HashMap<NodeId, Node>, exit_links: &Links) {
    if exit_links.is_empty() {
        return;
    }
    let terminal_ids: Vec<NodeId> = interior
        .iter()
        .filter(|(_, node)| matches!(node, Node::Leaf { .. }) && node.links().is_empty())
        .map(|(id, _)| id.clone())
        .collect();
    for id in &terminal_ids {
        if let Some(Node::Leaf { links, .. }) = interior.get_mut(id) {
            for (port, dests) in exit_links {
                links.entry(port.clone()).or_default().extend(dests.clone());
            }
        }
    }
}

fn rewrite_links(links: &Links, prefix: &str) -> Links {
    links
        .iter()
        .map(|(port, dests)| {
            let rewritten = dests
                .iter()
                .map(|(dest_node, dest_port)| {
                    let flat = if prefix.is_empty() {
                        dest_node.clone()
                    } else {
                        NodeId::new(format!("{prefix}/{dest_node}"))
                    };
                    (flat, dest_port.clone())
                })
                .collect();
            (port.clone(), rewritten)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::operation::Callback;

    fn identity_op(name: &str) -> Arc<Operation> {
        Arc::new(
            Operation::new(
                Some(name.into()),
                vec![PortName::new("in")],
                vec![PortName::new("out")],
                Value::Nil,
                None,
                None,
                vec![Callback::new("react", 1, false, false, true, |_, _, args, emit| {
                    emit.push("out", args[0].clone());
                    Value::Nil
                })],
            )
            .unwrap(),
        )
    }

    fn dummy_strategy() -> Arc<Strategy> {
        use crate::descriptor::strategy::Hooks;
        Arc::new(
            Strategy::new(
                Some("Dummy".into()),
                Hooks {
                    deploy: Some(Arc::new(|_| Value::Nil)),
                    deliver: Some(Arc::new(|_, _, _| {})),
                    process: Some(Arc::new(|_, _, _, _| {})),
                    ..Default::default()
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn rejects_unknown_destination_node() {
        let mut links = Links::new();
        links.insert(
            PortName::new("out"),
            vec![(NodeId::new("missing"), PortName::new("in"))],
        );
        let mut nodes = HashMap::new();
        nodes.insert(
            NodeId::new("a"),
            Node::Leaf {
                operation: identity_op("Id"),
                args: Value::Nil,
                strategy: Some(dummy_strategy()),
                links,
            },
        );
        let err = Workflow::new(vec![], vec![], Links::new(), nodes).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownDestinationNode("missing".into())
        );
    }

    #[test]
    fn flatten_rewrites_nested_links_with_unique_prefix() {
        let mut inner_links = Links::new();
        inner_links.insert(
            PortName::new("out"),
            vec![(NodeId::new("b"), PortName::new("in"))],
        );
        let mut inner_nodes = HashMap::new();
        inner_nodes.insert(
            NodeId::new("a"),
            Node::Leaf {
                operation: identity_op("Id"),
                args: Value::Nil,
                strategy: Some(dummy_strategy()),
                links: inner_links,
            },
        );
        inner_nodes.insert(
            NodeId::new("b"),
            Node::Leaf {
                operation: identity_op("Id"),
                args: Value::Nil,
                strategy: Some(dummy_strategy()),
                links: Links::new(),
            },
        );
        let inner = Arc::new(Workflow {
            in_ports: vec![],
            out_ports: vec![],
            entry_links: Links::new(),
            nodes: inner_nodes,
        });

        let mut outer_nodes = HashMap::new();
        outer_nodes.insert(
            NodeId::new("sub"),
            Node::Nested {
                workflow: inner,
                links: Links::new(),
            },
        );
        let outer = Workflow {
            in_ports: vec![],
            out_ports: vec![],
            entry_links: Links::new(),
            nodes: outer_nodes,
        };

        let flat = flatten(&outer);
        assert!(flat.nodes.contains_key(&NodeId::new("sub/a")));
        assert!(flat.nodes.contains_key(&NodeId::new("sub/b")));
        let a = flat.nodes.get(&NodeId::new("sub/a")).unwrap();
        let dests = a.links().get(&PortName::new("out")).unwrap();
        assert_eq!(dests[0].0, NodeId::new("sub/b"));
    }

    #[test]
    fn flatten_routes_a_nested_node_s_own_links_onto_its_terminal_interior_leaf() {
        let mut inner_links = Links::new();
        inner_links.insert(
            PortName::new("out"),
            vec![(NodeId::new("b"), PortName::new("in"))],
        );
        let mut inner_nodes = HashMap::new();
        inner_nodes.insert(
            NodeId::new("a"),
            Node::Leaf {
                operation: identity_op("Id"),
                args: Value::Nil,
                strategy: Some(dummy_strategy()),
                links: inner_links,
            },
        );
        inner_nodes.insert(
            NodeId::new("b"),
            Node::Leaf {
                operation: identity_op("Id"),
                args: Value::Nil,
                strategy: Some(dummy_strategy()),
                links: Links::new(),
            },
        );
        let inner = Arc::new(Workflow {
            in_ports: vec![],
            out_ports: vec![PortName::new("out")],
            entry_links: Links::new(),
            nodes: inner_nodes,
        });

        let mut outer_nodes = HashMap::new();
        let mut nested_links = Links::new();
        nested_links.insert(
            PortName::new("out"),
            vec![(NodeId::new("sink"), PortName::new("in"))],
        );
        outer_nodes.insert(
            NodeId::new("sub"),
            Node::Nested {
                workflow: inner,
                links: nested_links,
            },
        );
        outer_nodes.insert(
            NodeId::new("sink"),
            Node::Leaf {
                operation: identity_op("Sink"),
                args: Value::Nil,
                strategy: Some(dummy_strategy()),
                links: Links::new(),
            },
        );
        let outer = Workflow {
            in_ports: vec![],
            out_ports: vec![],
            entry_links: Links::new(),
            nodes: outer_nodes,
        };

        let flat = flatten(&outer);
        let terminal = flat.nodes.get(&NodeId::new("sub/b")).unwrap();
        let dests = terminal.links().get(&PortName::new("out")).unwrap();
        assert_eq!(dests, &vec![(NodeId::new("sink"), PortName::new("in"))]);
    }
}
