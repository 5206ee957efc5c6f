use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{Error, Result};
use crate::model::{ExecutionGraph, Node, NodeId, OnnxModel};

/// Graph builder responsible for constructing the computational graph
pub struct GraphBuilder;

impl GraphBuilder {
    /// Order the model's nodes for execution and record their dependencies.
    ///
    /// Fails if a node consumes a value nothing provides, or if the graph
    /// has a cycle.
    pub fn build_graph(model: &OnnxModel) -> Result<ExecutionGraph> {
        let graph = &model.graph;
        let producers = Self::tensor_producers(&graph.nodes)?;

        let available: HashSet<&str> = graph
            .inputs
            .iter()
            .map(|input| input.name.as_str())
            .chain(graph.initializers.keys().map(String::as_str))
            .collect();

        for node in &graph.nodes {
            for input in node.inputs.iter().filter(|name| !name.is_empty()) {
                if !producers.contains_key(input.as_str()) && !available.contains(input.as_str()) {
                    return Err(Error::InvalidModel(format!(
                        "node {} consumes {} which is neither a graph input, an initializer nor a node output",
                        node.name, input
                    )));
                }
            }
        }
        for output in &graph.outputs {
            if !producers.contains_key(output.name.as_str()) && !available.contains(output.name.as_str()) {
                return Err(Error::InvalidModel(format!("graph output {} is never produced", output.name)));
            }
        }

        let dependencies = Self::build_dependency_map(&graph.nodes, &producers);
        let nodes = Self::topological_sort(&graph.nodes, &dependencies)?;

        Ok(ExecutionGraph { nodes, dependencies })
    }

    /// Map each produced tensor name to its producing node
    fn tensor_producers(nodes: &[Node]) -> Result<HashMap<&str, NodeId>> {
        let mut producers = HashMap::new();
        for node in nodes {
            for output in node.outputs.iter().filter(|name| !name.is_empty()) {
                if producers.insert(output.as_str(), node.id).is_some() {
                    return Err(Error::InvalidModel(format!("tensor {} is produced twice", output)));
                }
            }
        }
        Ok(producers)
    }

    /// Build a dependency map for all nodes
    pub fn build_dependency_map(nodes: &[Node], producers: &HashMap<&str, NodeId>) -> HashMap<NodeId, Vec<NodeId>> {
        nodes
            .iter()
            .map(|node| {
                let mut dependencies = Vec::new();
                for input in &node.inputs {
                    if let Some(&producer) = producers.get(input.as_str()) {
                        if !dependencies.contains(&producer) {
                            dependencies.push(producer);
                        }
                    }
                }
                (node.id, dependencies)
            })
            .collect()
    }

    /// Sort nodes topologically
    pub fn topological_sort(nodes: &[Node], dependencies: &HashMap<NodeId, Vec<NodeId>>) -> Result<Vec<Node>> {
        let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
        let indices: HashMap<NodeId, NodeIndex> = nodes
            .iter()
            .map(|node| (node.id, graph.add_node(node.id)))
            .collect();

        for node in nodes {
            for dependency in dependencies.get(&node.id).into_iter().flatten() {
                if let (Some(&from), Some(&to)) = (indices.get(dependency), indices.get(&node.id)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let id = graph[cycle.node_id()];
            let name = nodes.iter().find(|n| n.id == id).map(|n| n.name.as_str()).unwrap_or("?");
            Error::InvalidModel(format!("graph contains a cycle through node {}", name))
        })?;

        let by_id: HashMap<NodeId, &Node> = nodes.iter().map(|node| (node.id, node)).collect();
        Ok(order
            .into_iter()
            .filter_map(|index| by_id.get(&graph[index]).map(|node| (*node).clone()))
            .collect())
    }
}
