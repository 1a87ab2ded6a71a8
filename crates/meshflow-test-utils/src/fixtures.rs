use meshflow_core::graph::{Edge, Node, NodeType, WorkflowGraph};

/// trigger `t` -> processor `p` -> terminal `e`.
pub fn linear_graph() -> WorkflowGraph {
    WorkflowGraph::new(
        vec![
            Node::new("t", NodeType::Trigger),
            Node::new("p", NodeType::Processor),
            Node::new("e", NodeType::Terminal),
        ],
        vec![Edge::control("t", "p"), Edge::control("p", "e")],
    )
    .with_id("linear")
    .with_name("Linear")
}

/// `t` fans out to `a` and `b`, which both lead to terminal `e`.
pub fn diamond_graph() -> WorkflowGraph {
    WorkflowGraph::new(
        vec![
            Node::new("t", NodeType::Trigger),
            Node::new("a", NodeType::Processor),
            Node::new("b", NodeType::Processor),
            Node::new("e", NodeType::Terminal),
        ],
        vec![
            Edge::control("t", "a"),
            Edge::control("t", "b"),
            Edge::control("a", "e"),
            Edge::control("b", "e"),
        ],
    )
    .with_id("diamond")
}

/// Agent nodes chained by a2a edges, framed by a trigger `t` and terminal
/// `e` so the graph also validates.
pub fn agent_chain(agent_ids: &[&str]) -> WorkflowGraph {
    let mut nodes = vec![Node::new("t", NodeType::Trigger)];
    nodes.extend(agent_ids.iter().map(|id| Node::new(*id, NodeType::Agent)));
    nodes.push(Node::new("e", NodeType::Terminal));

    let mut edges = Vec::new();
    if let (Some(first), Some(last)) = (agent_ids.first(), agent_ids.last()) {
        edges.push(Edge::control("t", *first));
        edges.extend(agent_ids.windows(2).map(|w| Edge::a2a(w[0], w[1])));
        edges.push(Edge::control(*last, "e"));
    }

    WorkflowGraph::new(nodes, edges).with_id("agents")
}
