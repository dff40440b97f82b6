//! Graph validation and execution ordering.
//!
//! Ordering is Kahn's algorithm. The ready queue is seeded in node
//! declaration order and successors are released in edge declaration order,
//! so ties between independent nodes break by discovery order. Only the
//! dependency order is guaranteed.

use std::collections::{HashMap, HashSet, VecDeque};

use weft_core::error::{Result, WeftError};
use weft_core::types::{Edge, Node, NodeKind, Workflow};

/// Check everything about the graph except acyclicity.
pub fn check_shape(nodes: &[Node], edges: &[Edge]) -> Result<()> {
    if nodes.is_empty() {
        return Err(WeftError::Shape("workflow has no nodes".into()));
    }

    let mut seen = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if node.id.trim().is_empty() {
            return Err(WeftError::Shape("node with empty id".into()));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(WeftError::Shape(format!("duplicate node id '{}'", node.id)));
        }
        match &node.kind {
            NodeKind::Unknown(kind) => {
                return Err(WeftError::Shape(format!(
                    "node '{}' has unrecognized type '{}'",
                    node.id, kind
                )));
            }
            NodeKind::Llm { provider, model } if provider.trim().is_empty() || model.trim().is_empty() => {
                return Err(WeftError::Shape(format!(
                    "llm node '{}' needs both a provider and a model",
                    node.id
                )));
            }
            NodeKind::Npm { package } if package.trim().is_empty() => {
                return Err(WeftError::Shape(format!(
                    "npm node '{}' needs a package",
                    node.id
                )));
            }
            _ => {}
        }
    }

    for edge in edges {
        for end in [&edge.source, &edge.target] {
            if !seen.contains(end.as_str()) {
                return Err(WeftError::Shape(format!(
                    "edge {} -> {} references unknown node '{}'",
                    edge.source, edge.target, end
                )));
            }
        }
    }

    Ok(())
}

/// Validate the graph and return its nodes in dependency order.
pub fn sort<'a>(nodes: &'a [Node], edges: &[Edge]) -> Result<Vec<&'a Node>> {
    check_shape(nodes, edges)?;

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut indeg = vec![0usize; nodes.len()];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for edge in edges {
        let (s, t) = (index[edge.source.as_str()], index[edge.target.as_str()]);
        indeg[t] += 1;
        outgoing[s].push(t);
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| indeg[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = queue.pop_front() {
        order.push(&nodes[i]);
        for &next in &outgoing[i] {
            indeg[next] -= 1;
            if indeg[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&str> = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| indeg[*i] > 0)
            .map(|(_, n)| n.id.as_str())
            .collect();
        return Err(WeftError::Cycle(format!(
            "unresolved nodes: {}",
            stuck.join(", ")
        )));
    }

    Ok(order)
}

/// Execution order of a workflow.
pub fn execution_order(workflow: &Workflow) -> Result<Vec<&Node>> {
    sort(&workflow.nodes, &workflow.edges)
}

/// Group nodes by dependency depth: level 0 has no predecessors, level `n`
/// depends on something at level `n - 1`.
pub fn levels<'a>(nodes: &'a [Node], edges: &[Edge]) -> Result<Vec<Vec<&'a Node>>> {
    let order = sort(nodes, edges)?;

    let mut depth: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    for node in &order {
        let level = edges
            .iter()
            .filter(|e| e.target == node.id)
            .filter_map(|e| depth.get(e.source.as_str()).copied())
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);
        depth.insert(node.id.as_str(), level);
    }

    let max_level = depth.values().copied().max().unwrap_or(0);
    let mut levels = vec![Vec::new(); max_level + 1];
    for node in order {
        levels[depth[node.id.as_str()]].push(node);
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ids(order: &[&Node]) -> Vec<String> {
        order.iter().map(|n| n.id.clone()).collect()
    }

    fn chain() -> Workflow {
        Workflow::new("chain")
            .with_node(Node::output("out"))
            .with_node(Node::npm("transform", "lodash"))
            .with_node(Node::input("in"))
            .with_edge("in", "transform")
            .with_edge("transform", "out")
    }

    #[test]
    fn test_sort_chain() {
        let wf = chain();
        let order = execution_order(&wf).unwrap();
        assert_eq!(ids(&order), vec!["in", "transform", "out"]);
    }

    #[test]
    fn test_ties_break_by_declaration_order() {
        let wf = Workflow::new("fan")
            .with_node(Node::input("b"))
            .with_node(Node::input("a"))
            .with_node(Node::output("out"))
            .with_edge("a", "out")
            .with_edge("b", "out");
        assert_eq!(ids(&execution_order(&wf).unwrap()), vec!["b", "a", "out"]);
    }

    #[test]
    fn test_cycle_detected() {
        let wf = Workflow::new("loop")
            .with_node(Node::npm("a", "lodash"))
            .with_node(Node::npm("b", "lodash"))
            .with_edge("a", "b")
            .with_edge("b", "a");
        let err = execution_order(&wf).unwrap_err();
        assert!(matches!(err, WeftError::Cycle(_)));
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let wf = Workflow::new("self")
            .with_node(Node::input("a"))
            .with_edge("a", "a");
        assert!(matches!(execution_order(&wf), Err(WeftError::Cycle(_))));
    }

    #[test]
    fn test_empty_workflow_is_shape_error() {
        let err = execution_order(&Workflow::new("empty")).unwrap_err();
        assert!(matches!(err, WeftError::Shape(_)));
    }

    #[test]
    fn test_unknown_kind_is_shape_error() {
        let wf = Workflow::new("w").with_node(Node::new("x", NodeKind::Unknown("webhook".into())));
        let err = execution_order(&wf).unwrap_err();
        assert!(err.to_string().contains("webhook"));
    }

    #[test]
    fn test_shape_errors() {
        let dup = Workflow::new("w")
            .with_node(Node::input("a"))
            .with_node(Node::output("a"));
        assert!(execution_order(&dup).unwrap_err().to_string().contains("duplicate"));

        let dangling = Workflow::new("w")
            .with_node(Node::input("a"))
            .with_edge("a", "ghost");
        assert!(execution_order(&dangling).unwrap_err().to_string().contains("ghost"));

        let no_model = Workflow::new("w").with_node(Node::llm("l", "openai", ""));
        assert!(matches!(execution_order(&no_model), Err(WeftError::Shape(_))));

        let no_package = Workflow::new("w").with_node(Node::npm("p", " "));
        assert!(matches!(execution_order(&no_package), Err(WeftError::Shape(_))));
    }

    #[test]
    fn test_levels() {
        let wf = Workflow::new("diamond")
            .with_node(Node::input("in"))
            .with_node(Node::npm("left", "lodash"))
            .with_node(Node::npm("right", "uuid"))
            .with_node(Node::output("out"))
            .with_edge("in", "left")
            .with_edge("in", "right")
            .with_edge("left", "out")
            .with_edge("right", "out");
        let levels = levels(&wf.nodes, &wf.edges).unwrap();
        let levels: Vec<Vec<String>> = levels.iter().map(|l| ids(l)).collect();
        assert_eq!(levels, vec![vec!["in"], vec!["left", "right"], vec!["out"]]);
    }

    /// Random DAG: edges only go from a lower to a higher rank, nodes shuffled.
    fn random_dag(rng: &mut StdRng, n: usize) -> Workflow {
        let mut ranks: Vec<usize> = (0..n).collect();
        for i in (1..n).rev() {
            ranks.swap(i, rng.gen_range(0..=i));
        }
        let mut wf = Workflow::new("random");
        for i in 0..n {
            wf = wf.with_node(Node::npm(format!("n{}", i), "lodash"));
        }
        for a in 0..n {
            for b in 0..n {
                if ranks[a] < ranks[b] && rng.gen_bool(0.3) {
                    wf = wf.with_edge(format!("n{}", a), format!("n{}", b));
                }
            }
        }
        wf
    }

    #[test]
    fn test_random_dags_respect_dependencies() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let n = rng.gen_range(1..12);
            let wf = random_dag(&mut rng, n);
            let order = execution_order(&wf).unwrap();
            assert_eq!(order.len(), n);

            let position: HashMap<&str, usize> = order
                .iter()
                .enumerate()
                .map(|(i, node)| (node.id.as_str(), i))
                .collect();
            for edge in &wf.edges {
                assert!(position[edge.source.as_str()] < position[edge.target.as_str()]);
            }
        }
    }

    #[test]
    fn test_random_cycles_always_fail() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let n = rng.gen_range(2..10);
            let mut wf = random_dag(&mut rng, n);
            // Close a loop through a fresh chain of existing nodes
            let a = rng.gen_range(0..n);
            let mut b = rng.gen_range(0..n);
            if a == b {
                b = (b + 1) % n;
            }
            wf = wf
                .with_edge(format!("n{}", a), format!("n{}", b))
                .with_edge(format!("n{}", b), format!("n{}", a));
            assert!(matches!(execution_order(&wf), Err(WeftError::Cycle(_))));
        }
    }
}
