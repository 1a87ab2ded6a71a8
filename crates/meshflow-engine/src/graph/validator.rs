use std::collections::{HashMap, HashSet};

use serde::Serialize;

use meshflow_core::graph::{Edge, EdgeType, Node, NodeType, WorkflowGraph};

/// Outcome of structural validation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn add_error(&mut self, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(message.into());
    }
}

/// Structural checks run before any node executes.
///
/// Every check runs regardless of earlier failures; problems accumulate as
/// messages and nothing panics or returns early.
pub struct WorkflowValidator;

impl WorkflowValidator {
    /// Validate a node/edge set and return all issues found.
    pub fn validate(nodes: &[Node], edges: &[Edge]) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::check_not_empty(nodes, &mut result);
        Self::check_duplicate_ids(nodes, &mut result);
        Self::check_trigger(nodes, &mut result);
        Self::check_terminal(nodes, &mut result);
        Self::check_orphans(nodes, edges, &mut result);
        Self::check_edge_endpoints(nodes, edges, &mut result);
        Self::check_cycles(nodes, edges, &mut result);
        Self::check_schema_compatibility(nodes, edges, &mut result);

        result
    }

    /// Validate a registered workflow graph.
    pub fn validate_graph(graph: &WorkflowGraph) -> ValidationResult {
        Self::validate(&graph.nodes, &graph.edges)
    }

    fn check_not_empty(nodes: &[Node], result: &mut ValidationResult) {
        if nodes.is_empty() {
            result.add_error("Workflow contains no nodes");
        }
    }

    fn check_duplicate_ids(nodes: &[Node], result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for node in nodes {
            if !seen.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
                result.add_error(format!("Duplicate node id '{}'", node.id));
            }
        }
    }

    fn check_trigger(nodes: &[Node], result: &mut ValidationResult) {
        if !nodes.iter().any(|n| n.node_type == NodeType::Trigger) {
            result.add_error("Workflow must have at least one trigger node");
        }
    }

    fn check_terminal(nodes: &[Node], result: &mut ValidationResult) {
        if !nodes.iter().any(|n| n.node_type == NodeType::Terminal) {
            result.add_error("Workflow must have at least one terminal node");
        }
    }

    /// Non-trigger nodes that no edge touches.
    fn check_orphans(nodes: &[Node], edges: &[Edge], result: &mut ValidationResult) {
        let referenced: HashSet<&str> = edges
            .iter()
            .flat_map(|e| [e.source.as_str(), e.target.as_str()])
            .collect();

        let orphans: Vec<&str> = nodes
            .iter()
            .filter(|n| n.node_type != NodeType::Trigger && !referenced.contains(n.id.as_str()))
            .map(|n| n.display_name())
            .collect();

        if !orphans.is_empty() {
            result.add_error(format!("Orphaned nodes detected: {}", orphans.join(", ")));
        }
    }

    fn check_edge_endpoints(nodes: &[Node], edges: &[Edge], result: &mut ValidationResult) {
        let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in edges {
            for (role, endpoint) in [("source", &edge.source), ("target", &edge.target)] {
                if !ids.contains(endpoint.as_str()) {
                    result.add_error(format!(
                        "Edge '{}' references unknown {} node '{}'",
                        edge.id, role, endpoint
                    ));
                }
            }
        }
    }

    /// Directed DFS tracking the current path; a node met while still on
    /// the path closes a cycle.
    fn check_cycles(nodes: &[Node], edges: &[Edge], result: &mut ValidationResult) {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in edges {
            adjacency
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();

        for node in nodes {
            if visited.contains(node.id.as_str()) {
                continue;
            }
            if let Some((from, to)) =
                find_back_edge(node.id.as_str(), &adjacency, &mut visited, &mut on_stack)
            {
                result.add_error(format!(
                    "Workflow contains cycles (edge {} -> {} closes a loop)",
                    from, to
                ));
                return;
            }
        }
    }

    /// Data edges whose endpoints both declare schemas must agree on type.
    fn check_schema_compatibility(nodes: &[Node], edges: &[Edge], result: &mut ValidationResult) {
        let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        for edge in edges.iter().filter(|e| e.edge_type == EdgeType::Data) {
            let (Some(source), Some(target)) = (
                by_id.get(edge.source.as_str()),
                by_id.get(edge.target.as_str()),
            ) else {
                continue;
            };
            if let (Some(out), Some(input)) = (&source.output_schema, &target.input_schema) {
                if out.kind != input.kind {
                    result.add_error(format!(
                        "Data flow incompatibility between {} and {}: {} -> {}",
                        source.display_name(),
                        target.display_name(),
                        out.kind,
                        input.kind
                    ));
                }
            }
        }
    }
}

/// Iterative DFS from `root`. Each frame is a node and the index of the next
/// outgoing edge to try, so path length never touches the thread stack.
fn find_back_edge<'a>(
    root: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut HashSet<&'a str>,
) -> Option<(&'a str, &'a str)> {
    let mut frames: Vec<(&'a str, usize)> = vec![(root, 0)];
    visited.insert(root);
    on_stack.insert(root);

    while let Some((node, next_idx)) = frames.last_mut() {
        let node = *node;
        let Some(&next) = adjacency.get(node).and_then(|t| t.get(*next_idx)) else {
            on_stack.remove(node);
            frames.pop();
            continue;
        };
        *next_idx += 1;

        if on_stack.contains(next) {
            return Some((node, next));
        }
        if visited.insert(next) {
            on_stack.insert(next);
            frames.push((next, 0));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> (Vec<Node>, Vec<Edge>) {
        (
            vec![
                Node::new("t", NodeType::Trigger),
                Node::new("p", NodeType::Processor),
                Node::new("e", NodeType::Terminal),
            ],
            vec![Edge::control("t", "p"), Edge::control("p", "e")],
        )
    }

    #[test]
    fn test_valid_linear_workflow() {
        let (nodes, edges) = linear();
        let result = WorkflowValidator::validate(&nodes, &edges);
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_missing_trigger() {
        let nodes = vec![
            Node::new("p", NodeType::Processor),
            Node::new("e", NodeType::Terminal),
        ];
        let edges = vec![Edge::control("p", "e")];
        let result = WorkflowValidator::validate(&nodes, &edges);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("trigger")));
    }

    #[test]
    fn test_missing_terminal() {
        let nodes = vec![
            Node::new("t", NodeType::Trigger),
            Node::new("p", NodeType::Processor),
        ];
        let edges = vec![Edge::control("t", "p")];
        let result = WorkflowValidator::validate(&nodes, &edges);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("terminal")));
    }

    #[test]
    fn test_orphan_detection_ignores_triggers() {
        let (mut nodes, edges) = linear();
        nodes.push(Node::new("t2", NodeType::Trigger));
        nodes.push(Node::new("lonely", NodeType::Integration).with_label("Lonely CRM"));

        let result = WorkflowValidator::validate(&nodes, &edges);
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["Orphaned nodes detected: Lonely CRM"]);
    }

    #[test]
    fn test_cycle_reported_alongside_other_errors() {
        let nodes = vec![
            Node::new("a", NodeType::Processor),
            Node::new("b", NodeType::Processor),
            Node::new("c", NodeType::Processor),
        ];
        let edges = vec![
            Edge::control("a", "b"),
            Edge::control("b", "c"),
            Edge::control("c", "a"),
        ];
        let result = WorkflowValidator::validate(&nodes, &edges);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("trigger")));
        assert!(result.errors.iter().any(|e| e.contains("terminal")));
        assert!(result.errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let (nodes, mut edges) = linear();
        edges.push(Edge::control("p", "p"));
        let result = WorkflowValidator::validate(&nodes, &edges);
        assert!(result.errors.iter().any(|e| e.contains("p -> p")));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let nodes = vec![
            Node::new("t", NodeType::Trigger),
            Node::new("a", NodeType::Processor),
            Node::new("b", NodeType::Processor),
            Node::new("e", NodeType::Terminal),
        ];
        let edges = vec![
            Edge::control("t", "a"),
            Edge::control("t", "b"),
            Edge::control("a", "e"),
            Edge::control("b", "e"),
        ];
        assert!(WorkflowValidator::validate(&nodes, &edges).is_valid);
    }

    #[test]
    fn test_schema_mismatch_on_data_edge() {
        let nodes = vec![
            Node::new("t", NodeType::Trigger).with_output_schema("object"),
            Node::new("p", NodeType::Processor)
                .with_label("Summarizer")
                .with_input_schema("string"),
            Node::new("e", NodeType::Terminal),
        ];
        let edges = vec![Edge::data("t", "p"), Edge::control("p", "e")];
        let result = WorkflowValidator::validate(&nodes, &edges);
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec!["Data flow incompatibility between t and Summarizer: object -> string"]
        );
    }

    #[test]
    fn test_schema_mismatch_ignored_on_control_edge_or_missing_schema() {
        let nodes = vec![
            Node::new("t", NodeType::Trigger).with_output_schema("object"),
            Node::new("p", NodeType::Processor).with_input_schema("string"),
            Node::new("e", NodeType::Terminal).with_input_schema("number"),
        ];
        let edges = vec![Edge::control("t", "p"), Edge::data("p", "e")];
        assert!(WorkflowValidator::validate(&nodes, &edges).is_valid);
    }

    #[test]
    fn test_unknown_endpoint_and_duplicates() {
        let (mut nodes, mut edges) = linear();
        nodes.push(Node::new("p", NodeType::Processor));
        edges.push(Edge::control("p", "ghost"));
        let result = WorkflowValidator::validate(&nodes, &edges);
        assert!(result.errors.iter().any(|e| e == "Duplicate node id 'p'"));
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("unknown target node 'ghost'")));
    }

    fn chain(len: usize) -> (Vec<Node>, Vec<Edge>) {
        let ids: Vec<String> = (0..len).map(|i| format!("n{i}")).collect();
        let nodes = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let kind = match i {
                    0 => NodeType::Trigger,
                    i if i == len - 1 => NodeType::Terminal,
                    _ => NodeType::Processor,
                };
                Node::new(id.as_str(), kind)
            })
            .collect();
        let edges = ids
            .windows(2)
            .map(|w| Edge::control(w[0].as_str(), w[1].as_str()))
            .collect();
        (nodes, edges)
    }

    #[test]
    fn test_long_chain_validates_without_deep_recursion() {
        let (nodes, edges) = chain(60_000);
        let result = WorkflowValidator::validate(&nodes, &edges);
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn test_back_edge_at_end_of_long_chain() {
        let (nodes, mut edges) = chain(60_000);
        edges.push(Edge::control("n59998", "n1"));
        let result = WorkflowValidator::validate(&nodes, &edges);
        assert_eq!(
            result.errors,
            vec!["Workflow contains cycles (edge n59998 -> n1 closes a loop)"]
        );
    }

    #[test]
    fn test_empty_graph() {
        let result = WorkflowValidator::validate(&[], &[]);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3);
    }
}
