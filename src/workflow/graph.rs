//! Workflow graph: an arena of nodes with slot-addressed connections.

use std::collections::{HashMap, HashSet};

use super::types::{NodeDefinition, WorkflowDefinition, MAIN_CONNECTION};
use super::validator::validate_workflow;
use crate::error::{Error, Result};
use crate::nodes::NodeRegistry;

/// Index of a node inside a [`WorkflowGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A resolved connection between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub source: NodeId,
    pub source_output: usize,
    pub target: NodeId,
    pub target_input: usize,
    pub kind: String,
}

impl Connection {
    pub fn is_main(&self) -> bool {
        self.kind == MAIN_CONNECTION
    }
}

/// Immutable graph built from a validated [`WorkflowDefinition`].
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: Vec<NodeDefinition>,
    by_name: HashMap<String, NodeId>,
    connections: Vec<Connection>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl WorkflowGraph {
    /// Validate the definition and build the graph.
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self> {
        let report = validate_workflow(definition);
        if !report.valid {
            return Err(Error::Validation(report.errors));
        }
        Ok(Self::build(definition))
    }

    /// Build without validation. Duplicate names keep the first node and
    /// connections with unknown endpoints are dropped.
    pub(crate) fn build(definition: &WorkflowDefinition) -> Self {
        let mut by_name = HashMap::new();
        let mut nodes = Vec::with_capacity(definition.nodes.len());
        for node in &definition.nodes {
            if by_name.contains_key(&node.name) {
                continue;
            }
            by_name.insert(node.name.clone(), NodeId(nodes.len()));
            nodes.push(node.clone());
        }

        let mut graph = Self {
            outgoing: vec![Vec::new(); nodes.len()],
            incoming: vec![Vec::new(); nodes.len()],
            nodes,
            by_name,
            connections: Vec::new(),
        };

        // Walk sources in definition order so fan-out order is stable.
        for index in 0..graph.nodes.len() {
            let source_name = graph.nodes[index].name.clone();
            let Some(kinds) = definition.connections.get(&source_name) else {
                continue;
            };
            for (kind, slots) in kinds {
                for (output, targets) in slots.iter().enumerate() {
                    for target in targets {
                        let Some(&target_id) = graph.by_name.get(&target.node) else {
                            continue;
                        };
                        let connection = Connection {
                            source: NodeId(index),
                            source_output: output,
                            target: target_id,
                            target_input: target.index,
                            kind: kind.clone(),
                        };
                        let id = graph.connections.len();
                        graph.connections.push(connection);
                        graph.outgoing[index].push(id);
                        graph.incoming[target_id.0].push(id);
                    }
                }
            }
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &NodeDefinition {
        &self.nodes[id.0]
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn get_node(&self, name: &str) -> Option<&NodeDefinition> {
        self.node_id(name).map(|id| self.node(id))
    }

    /// All nodes in definition order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeDefinition)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Main connections leaving a node, in definition order.
    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Connection> {
        self.outgoing[id.0]
            .iter()
            .map(|&c| &self.connections[c])
            .filter(|c| c.is_main())
    }

    /// Main connections entering a node.
    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Connection> {
        self.incoming[id.0]
            .iter()
            .map(|&c| &self.connections[c])
            .filter(|c| c.is_main())
    }

    pub(crate) fn parent_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut parents: Vec<NodeId> = self
            .incoming(id)
            .map(|c| c.source)
            .filter(|s| seen.insert(*s))
            .collect();
        parents.sort();
        parents
    }

    pub(crate) fn child_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut children: Vec<NodeId> = self
            .outgoing(id)
            .map(|c| c.target)
            .filter(|t| seen.insert(*t))
            .collect();
        children.sort();
        children
    }

    fn names(&self, ids: impl IntoIterator<Item = NodeId>) -> Vec<&str> {
        ids.into_iter()
            .map(|id| self.nodes[id.0].name.as_str())
            .collect()
    }

    /// Direct parents of a node, in definition order.
    pub fn get_parent_nodes(&self, name: &str) -> Vec<&str> {
        match self.node_id(name) {
            Some(id) => self.names(self.parent_ids(id)),
            None => Vec::new(),
        }
    }

    /// Direct children of a node, in definition order.
    pub fn get_child_nodes(&self, name: &str) -> Vec<&str> {
        match self.node_id(name) {
            Some(id) => self.names(self.child_ids(id)),
            None => Vec::new(),
        }
    }

    pub(crate) fn ancestor_ids(&self, id: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack = self.parent_ids(id);
        while let Some(current) = stack.pop() {
            if seen.insert(current) {
                stack.extend(self.parent_ids(current));
            }
        }
        seen
    }

    /// Every node from which `name` is reachable, in definition order.
    pub fn get_parent_nodes_transitive(&self, name: &str) -> Vec<&str> {
        let Some(id) = self.node_id(name) else {
            return Vec::new();
        };
        let mut ancestors: Vec<NodeId> = self.ancestor_ids(id).into_iter().collect();
        ancestors.sort();
        self.names(ancestors)
    }

    /// Nodes with no incoming main connection.
    pub fn get_start_nodes(&self) -> Vec<&str> {
        self.names(self.root_ids())
    }

    pub(crate) fn root_ids(&self) -> Vec<NodeId> {
        self.nodes()
            .map(|(id, _)| id)
            .filter(|id| self.incoming(*id).next().is_none())
            .collect()
    }

    /// Nodes whose registered type belongs to a trigger, webhook or schedule group.
    pub fn get_trigger_nodes(&self, registry: &NodeRegistry) -> Vec<&str> {
        self.names(self.trigger_ids(registry))
    }

    pub(crate) fn trigger_ids(&self, registry: &NodeRegistry) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, node)| !node.disabled && registry.is_trigger_type(&node.node_type))
            .map(|(id, _)| id)
            .collect()
    }

    /// Find a cycle, returning the node names along it.
    ///
    /// Depth-first search with an explicit stack; reaching a node that is
    /// still on the stack closes a cycle.
    pub fn check_for_cycles(&self) -> Option<Vec<String>> {
        let mut visited = vec![false; self.nodes.len()];
        let mut on_stack = vec![false; self.nodes.len()];

        for (root, _) in self.nodes() {
            if visited[root.0] {
                continue;
            }
            visited[root.0] = true;
            on_stack[root.0] = true;
            let mut stack = vec![(root, self.child_ids(root), 0usize)];

            while let Some((id, children, next)) = stack.last_mut() {
                let id = *id;
                let Some(child) = children.get(*next).copied() else {
                    on_stack[id.0] = false;
                    stack.pop();
                    continue;
                };
                *next += 1;

                if on_stack[child.0] {
                    let pos = stack
                        .iter()
                        .position(|(n, _, _)| *n == child)
                        .unwrap_or(0);
                    let mut path: Vec<String> = stack[pos..]
                        .iter()
                        .map(|(n, _, _)| self.node(*n).name.clone())
                        .collect();
                    path.push(self.node(child).name.clone());
                    return Some(path);
                }
                if !visited[child.0] {
                    visited[child.0] = true;
                    on_stack[child.0] = true;
                    stack.push((child, self.child_ids(child), 0));
                }
            }
        }
        None
    }

    pub fn has_cycle(&self) -> bool {
        self.check_for_cycles().is_some()
    }

    /// Topological order: DFS from every sink backward through parents,
    /// emitting a node after all of its parents.
    pub fn get_execution_order(&self) -> Vec<&str> {
        // 0 = unvisited, 1 = on the stack, 2 = emitted
        let mut state = vec![0u8; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        let sinks = self
            .nodes()
            .map(|(id, _)| id)
            .filter(|id| self.outgoing(*id).next().is_none());
        // Nodes only reachable through a cycle have no sink; keep them listed.
        let starts: Vec<NodeId> = sinks.chain(self.nodes().map(|(id, _)| id)).collect();

        for start in starts {
            if state[start.0] != 0 {
                continue;
            }
            state[start.0] = 1;
            let mut stack = vec![(start, self.parent_ids(start), 0usize)];

            while let Some((id, parents, next)) = stack.last_mut() {
                let id = *id;
                match parents.get(*next).copied() {
                    Some(parent) => {
                        *next += 1;
                        if state[parent.0] == 0 {
                            state[parent.0] = 1;
                            stack.push((parent, self.parent_ids(parent), 0));
                        }
                    }
                    None => {
                        state[id.0] = 2;
                        order.push(id);
                        stack.pop();
                    }
                }
            }
        }
        self.names(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::parse_workflow;

    fn diamond() -> WorkflowDefinition {
        parse_workflow(
            r#"
name: diamond
nodes:
  - name: Start
    type: manualTrigger
  - name: Left
    type: noOp
  - name: Right
    type: noOp
  - name: Join
    type: noOp
connections:
  Start:
    main:
      - - node: Left
        - node: Right
  Left:
    main:
      - - node: Join
  Right:
    main:
      - - node: Join
          index: 1
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_structural_queries() {
        let graph = WorkflowGraph::from_definition(&diamond()).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.get_node("Left").unwrap().node_type, "noOp");
        assert!(graph.get_node("Missing").is_none());
        assert_eq!(graph.get_child_nodes("Start"), vec!["Left", "Right"]);
        assert_eq!(graph.get_parent_nodes("Join"), vec!["Left", "Right"]);
        assert_eq!(graph.get_start_nodes(), vec!["Start"]);
        assert_eq!(
            graph.get_parent_nodes_transitive("Join"),
            vec!["Start", "Left", "Right"]
        );
        let join = graph.node_id("Join").unwrap();
        let inputs: Vec<usize> = graph.incoming(join).map(|c| c.target_input).collect();
        assert_eq!(inputs, vec![0, 1]);
    }

    #[test]
    fn test_trigger_nodes_use_registry_group() {
        let graph = WorkflowGraph::from_definition(&diamond()).unwrap();
        let registry = NodeRegistry::new();
        assert_eq!(graph.get_trigger_nodes(&registry), vec!["Start"]);
    }

    #[test]
    fn test_execution_order_respects_edges() {
        let definition = diamond();
        let graph = WorkflowGraph::from_definition(&definition).unwrap();
        let order = graph.get_execution_order();
        assert_eq!(order.len(), 4);
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
        for (source, kinds) in &definition.connections {
            for slots in kinds.values() {
                for targets in slots {
                    for target in targets {
                        assert!(pos(source) < pos(&target.node));
                    }
                }
            }
        }
    }

    #[test]
    fn test_long_chain_orders_without_recursion() {
        let mut definition = WorkflowDefinition::default();
        for i in 0..5_000 {
            definition.nodes.push(NodeDefinition::new(&format!("N{}", i), "noOp"));
            if i > 0 {
                definition.connect(&format!("N{}", i - 1), 0, &format!("N{}", i), 0);
            }
        }
        let graph = WorkflowGraph::from_definition(&definition).unwrap();
        let order = graph.get_execution_order();
        let expected: Vec<String> = (0..5_000).map(|i| format!("N{}", i)).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_generated_dag_order_respects_every_edge() {
        // Layered DAG: each node feeds a few nodes in later layers.
        let mut definition = WorkflowDefinition::default();
        let count = 300;
        for i in 0..count {
            definition.nodes.push(NodeDefinition::new(&format!("N{}", i), "noOp"));
        }
        let mut edges = Vec::new();
        for i in 0..count {
            for step in [1, 7, 31] {
                let target = i + step + (i * 13) % 5;
                if target < count {
                    definition.connect(&format!("N{}", i), 0, &format!("N{}", target), 0);
                    edges.push((i, target));
                }
            }
        }
        // Shuffle definition order so the sort cannot lean on it.
        definition.nodes.reverse();

        let graph = WorkflowGraph::from_definition(&definition).unwrap();
        let order = graph.get_execution_order();
        assert_eq!(order.len(), count);
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(pos, name)| (*name, pos)).collect();
        for (source, target) in edges {
            let (source, target) = (format!("N{}", source), format!("N{}", target));
            assert!(
                position[source.as_str()] < position[target.as_str()],
                "{} must run before {}",
                source,
                target
            );
        }
    }

    #[test]
    fn test_check_for_cycles_reports_path() {
        let mut definition = diamond();
        definition.connect("Join", 0, "Start", 0);
        let graph = WorkflowGraph::build(&definition);
        let cycle = graph.check_for_cycles().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&"Join".to_string()));
        assert!(WorkflowGraph::from_definition(&definition).is_err());
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let mut definition = diamond();
        definition.connect("Left", 0, "Left", 0);
        let graph = WorkflowGraph::build(&definition);
        assert_eq!(
            graph.check_for_cycles(),
            Some(vec!["Left".to_string(), "Left".to_string()])
        );
    }

    #[test]
    fn test_non_main_connections_do_not_link_execution() {
        let definition = parse_workflow(
            r#"
name: t
nodes:
  - name: A
    type: noOp
  - name: B
    type: noOp
connections:
  A:
    ai_tool:
      - - node: B
          type: ai_tool
"#,
        )
        .unwrap();
        let graph = WorkflowGraph::from_definition(&definition).unwrap();
        assert!(graph.get_child_nodes("A").is_empty());
        assert_eq!(graph.get_start_nodes(), vec!["A", "B"]);
    }
}
