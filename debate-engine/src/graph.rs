//! Decision tree arena: nodes keyed by id with explicit option links.
//!
//! Building a [`TreeGraph`] only requires a unique root; everything else is
//! reported by [`TreeGraph::validate`] so that traversal can proceed on
//! partially broken content and stop at the first bad link.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::topic::{TreeNode, TreeOption};

/// Flat table of tree nodes.
#[derive(Debug, Clone)]
pub struct TreeGraph {
    nodes: HashMap<String, TreeNode>,
    root_id: String,
}

/// A structural problem found by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphIssue {
    /// `leads_to_node_id` does not resolve.
    DanglingLink {
        node_id: String,
        option_id: String,
        target: String,
    },
    /// Option is neither terminal nor linked, or is both.
    DeadEndOption { node_id: String, option_id: String },
    /// `level` is not one more than the parent's.
    LevelMismatch {
        node_id: String,
        expected: u32,
        found: u32,
    },
    /// `parent_node_id` does not resolve.
    MissingParent { node_id: String, parent: String },
    /// No option path leads here from the root.
    Unreachable { node_id: String },
}

impl std::fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingLink {
                node_id,
                option_id,
                target,
            } => write!(f, "{node_id}/{option_id} leads to missing node {target}"),
            Self::DeadEndOption { node_id, option_id } => {
                write!(f, "{node_id}/{option_id} is a dead end")
            }
            Self::LevelMismatch {
                node_id,
                expected,
                found,
            } => write!(f, "{node_id} has level {found}, expected {expected}"),
            Self::MissingParent { node_id, parent } => {
                write!(f, "{node_id} names missing parent {parent}")
            }
            Self::Unreachable { node_id } => write!(f, "{node_id} is unreachable from the root"),
        }
    }
}

/// Result of validating a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphReport {
    pub root_id: String,
    pub node_count: usize,
    pub terminal_options: usize,
    pub issues: Vec<GraphIssue>,
    /// Authored content is expected acyclic; a cycle is only a warning.
    pub has_cycle: bool,
}

impl GraphReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

impl TreeGraph {
    /// Index nodes and locate the unique root.
    pub fn build(nodes: Vec<TreeNode>) -> EngineResult<Self> {
        let mut table = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if table.contains_key(&node.id) {
                return Err(EngineError::broken_graph(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
            table.insert(node.id.clone(), node);
        }

        let roots: Vec<&String> = table
            .values()
            .filter(|n| n.is_root())
            .map(|n| &n.id)
            .collect();

        let root_id = match roots.as_slice() {
            [root] => (*root).clone(),
            [] => return Err(EngineError::broken_graph("tree has no root node")),
            many => {
                let mut ids: Vec<&str> = many.iter().map(|s| s.as_str()).collect();
                ids.sort_unstable();
                return Err(EngineError::broken_graph(format!(
                    "tree has {} root nodes: {}",
                    ids.len(),
                    ids.join(", ")
                )));
            }
        };

        Ok(Self {
            nodes: table,
            root_id,
        })
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn root(&self) -> &TreeNode {
        // build() guarantees the root is present
        &self.nodes[&self.root_id]
    }

    pub fn node(&self, node_id: &str) -> Option<&TreeNode> {
        self.nodes.get(node_id)
    }

    /// Resolve a node or fail with `BrokenGraph`.
    pub fn require_node(&self, node_id: &str) -> EngineResult<&TreeNode> {
        self.node(node_id)
            .ok_or_else(|| EngineError::broken_graph(format!("node {node_id} not found")))
    }

    pub fn option(&self, node_id: &str, option_id: &str) -> Option<&TreeOption> {
        self.node(node_id).and_then(|n| n.option(option_id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check every structural rule the traversal relies on.
    pub fn validate(&self) -> GraphReport {
        let mut issues = Vec::new();
        let mut terminal_options = 0;

        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let index: HashMap<&str, NodeIndex> = ids
            .iter()
            .map(|id| (id.as_str(), graph.add_node(id.as_str())))
            .collect();

        for id in &ids {
            let node = &self.nodes[*id];

            if let Some(parent_id) = &node.parent_node_id {
                match self.nodes.get(parent_id) {
                    Some(parent) if node.level != parent.level + 1 => {
                        issues.push(GraphIssue::LevelMismatch {
                            node_id: node.id.clone(),
                            expected: parent.level + 1,
                            found: node.level,
                        });
                    }
                    Some(_) => {}
                    None => issues.push(GraphIssue::MissingParent {
                        node_id: node.id.clone(),
                        parent: parent_id.clone(),
                    }),
                }
            }

            for option in &node.options {
                if option.is_dead_end() {
                    issues.push(GraphIssue::DeadEndOption {
                        node_id: node.id.clone(),
                        option_id: option.id.clone(),
                    });
                }
                if option.is_terminal {
                    terminal_options += 1;
                }
                if let Some(target) = &option.leads_to_node_id {
                    match index.get(target.as_str()) {
                        Some(&to) => {
                            graph.add_edge(index[node.id.as_str()], to, ());
                        }
                        None => issues.push(GraphIssue::DanglingLink {
                            node_id: node.id.clone(),
                            option_id: option.id.clone(),
                            target: target.clone(),
                        }),
                    }
                }
            }
        }

        let mut reachable: HashSet<NodeIndex> = HashSet::new();
        let mut dfs = Dfs::new(&graph, index[self.root_id.as_str()]);
        while let Some(ix) = dfs.next(&graph) {
            reachable.insert(ix);
        }
        for id in &ids {
            if !reachable.contains(&index[id.as_str()]) {
                issues.push(GraphIssue::Unreachable {
                    node_id: (*id).clone(),
                });
            }
        }

        GraphReport {
            root_id: self.root_id.clone(),
            node_count: self.nodes.len(),
            terminal_options,
            issues,
            has_cycle: is_cyclic_directed(&graph),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::fixtures::{node, option, small_tree};
    use crate::topic::OptionStance;

    #[test]
    fn test_build_finds_root() {
        let graph = TreeGraph::build(small_tree()).unwrap();
        assert_eq!(graph.root_id(), "root");
        assert_eq!(graph.root().level, 1);
        assert_eq!(graph.len(), 3);
        assert!(graph.option("node2", "D").is_some());
        assert!(graph.option("node2", "A").is_none());
    }

    #[test]
    fn test_build_rejects_missing_or_multiple_roots() {
        let err = TreeGraph::build(vec![node("n2", Some("x"), 2, vec![])]).unwrap_err();
        assert!(err.to_string().contains("no root"));

        let err = TreeGraph::build(vec![node("a", None, 1, vec![]), node("b", None, 1, vec![])])
            .unwrap_err();
        assert!(err.to_string().contains("2 root nodes: a, b"));

        let err = TreeGraph::build(vec![node("a", None, 1, vec![]), node("a", None, 1, vec![])])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_clean_tree() {
        let report = TreeGraph::build(small_tree()).unwrap().validate();
        assert!(report.is_valid(), "{:?}", report.issues);
        assert!(!report.has_cycle);
        assert_eq!(report.terminal_options, 3);
        assert_eq!(report.node_count, 3);
    }

    #[test]
    fn test_validate_reports_issues() {
        let mut dead = option("X", OptionStance::For, None);
        dead.is_terminal = false;
        let nodes = vec![
            node(
                "root",
                None,
                1,
                vec![option("A", OptionStance::For, Some("ghost")), dead],
            ),
            node("orphan", Some("root"), 3, vec![]),
        ];
        let report = TreeGraph::build(nodes).unwrap().validate();

        assert!(!report.is_valid());
        assert!(report.issues.contains(&GraphIssue::DanglingLink {
            node_id: "root".into(),
            option_id: "A".into(),
            target: "ghost".into(),
        }));
        assert!(report.issues.contains(&GraphIssue::DeadEndOption {
            node_id: "root".into(),
            option_id: "X".into(),
        }));
        assert!(report.issues.contains(&GraphIssue::LevelMismatch {
            node_id: "orphan".into(),
            expected: 2,
            found: 3,
        }));
        assert!(report.issues.contains(&GraphIssue::Unreachable {
            node_id: "orphan".into(),
        }));
    }

    #[test]
    fn test_validate_detects_cycle() {
        let nodes = vec![
            node("root", None, 1, vec![option("A", OptionStance::For, Some("n2"))]),
            node(
                "n2",
                Some("root"),
                2,
                vec![option("B", OptionStance::Against, Some("root"))],
            ),
        ];
        let report = TreeGraph::build(nodes).unwrap().validate();
        assert!(report.has_cycle);
        assert!(report.is_valid());
    }

    #[test]
    fn test_issue_display() {
        let issue = GraphIssue::Unreachable {
            node_id: "n9".into(),
        };
        assert_eq!(issue.to_string(), "n9 is unreachable from the root");
    }
}
