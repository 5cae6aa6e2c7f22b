use std::collections::HashMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use soma_domain::ElementId;

use crate::error::TreeError;
use crate::tree::Tree;

/// Structural integrity check, run at Treekeeper boot before the tree is
/// marked ready.
///
/// Verifies:
/// 1. Exactly one root (the repository element)
/// 2. Every parent pointer resolves and its child list agrees
/// 3. Every edge is of a legal kind
/// 4. The parent graph is acyclic
pub fn verify(tree: &Tree) -> Result<(), TreeError> {
    let mut graph: DiGraph<ElementId, ()> = DiGraph::new();
    let mut nodes: HashMap<ElementId, NodeIndex> = HashMap::new();

    let mut roots = 0usize;
    for id in tree.element_ids() {
        nodes.insert(id, graph.add_node(id));
    }
    for id in tree.element_ids() {
        let el = tree
            .element(id)
            .ok_or_else(|| TreeError::Corrupt(format!("element {} vanished mid-walk", id)))?;
        match el.parent {
            None => {
                roots += 1;
                if id != tree.root_id() {
                    return Err(TreeError::Corrupt(format!(
                        "parentless element {} is not the repository root",
                        id
                    )));
                }
            }
            Some(parent_id) => {
                let parent = tree.element(parent_id).ok_or_else(|| {
                    TreeError::Corrupt(format!("element {} points at missing parent {}", id, parent_id))
                })?;
                if !parent.children.contains(&id) {
                    return Err(TreeError::Corrupt(format!(
                        "parent {} does not list child {}",
                        parent_id, id
                    )));
                }
                if !parent.kind.may_parent(&el.kind) {
                    return Err(TreeError::Corrupt(format!(
                        "illegal edge {} -> {}",
                        parent.kind.kind_name(),
                        el.kind.kind_name()
                    )));
                }
                graph.add_edge(nodes[&parent_id], nodes[&id], ());
            }
        }
    }

    if roots != 1 {
        return Err(TreeError::Corrupt(format!("expected one root, found {}", roots)));
    }
    if is_cyclic_directed(&graph) {
        return Err(TreeError::Corrupt("cycle in parent graph".into()));
    }
    Ok(())
}
