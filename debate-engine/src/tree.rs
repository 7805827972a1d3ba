//! Decision-tree traversal with backtracking.
//!
//! Selecting a terminal option completes the current path and stores a
//! report. A completed path can still be backtracked, which reopens the
//! session; explored edges are never forgotten by backtracking.

use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::events::SessionEvent;
use crate::graph::TreeGraph;
use crate::report::{tree_report, Report, TreeReport};
use crate::session::{
    DebateMode, ExploredEdge, HistoryEntry, ModeState, Session, SessionKey, TreeState,
};
use crate::topic::{TreeNode, TreeOption};

/// Result of [`TreeController::select_option`].
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    /// Moved to a child node.
    Advanced { node: TreeNode },
    /// Reached a terminal option; the path is complete.
    Completed { report: TreeReport },
}

struct TreeInner {
    session: Session,
    graph: TreeGraph,
}

impl TreeInner {
    fn state(&self) -> EngineResult<&TreeState> {
        self.session.tree().ok_or_else(|| {
            EngineError::invalid_state(format!("session {} holds no tree state", self.session.id))
        })
    }
}

pub(crate) struct TreeShared {
    ctx: EngineContext,
    key: SessionKey,
    inner: Mutex<TreeInner>,
}

/// Handle to one user's exploration of one topic's decision tree.
#[derive(Clone)]
pub struct TreeController {
    shared: Arc<TreeShared>,
}

impl TreeController {
    /// Resume the stored traversal for `(user, topic)` or start at the root.
    pub async fn open(ctx: EngineContext, user_id: &str, topic_id: &str) -> EngineResult<Self> {
        let nodes = ctx.catalog.get_tree_nodes(topic_id).await?;
        if nodes.is_empty() {
            return Err(EngineError::not_found("decision tree", topic_id));
        }
        let graph = TreeGraph::build(nodes)?;
        let report = graph.validate();
        for issue in &report.issues {
            warn!(topic_id, issue = %issue, "Decision tree issue");
        }
        if report.has_cycle {
            warn!(topic_id, "Decision tree contains a cycle");
        }

        let key = SessionKey::new(user_id, topic_id, DebateMode::Tree);
        let session = match ctx.store.load(&key).await? {
            Some(mut existing) => {
                let current = existing
                    .tree()
                    .map(|s| s.current_node_id.clone())
                    .ok_or_else(|| {
                        EngineError::invalid_state(format!(
                            "session {} does not hold tree state",
                            key
                        ))
                    })?;
                graph.require_node(&current)?;
                existing.begin();
                ctx.publish(SessionEvent::Resumed {
                    session_id: existing.id.clone(),
                    mode: DebateMode::Tree,
                    status: existing.status,
                    timestamp: Utc::now(),
                });
                info!(session_id = %existing.id, node_id = %current, "Resumed tree session");
                existing
            }
            None => {
                let mut session = Session::new(
                    user_id,
                    topic_id,
                    ModeState::Tree(TreeState::at_root(graph.root_id())),
                );
                session.begin();
                ctx.persist(&mut session).await?;
                ctx.publish(SessionEvent::Started {
                    session_id: session.id.clone(),
                    mode: DebateMode::Tree,
                    timestamp: Utc::now(),
                });
                info!(session_id = %session.id, nodes = graph.len(), "Started tree session");
                session
            }
        };

        Ok(Self {
            shared: Arc::new(TreeShared {
                ctx,
                key,
                inner: Mutex::new(TreeInner { session, graph }),
            }),
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.shared.key
    }

    pub(crate) fn downgrade(&self) -> Weak<TreeShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn upgrade(weak: &Weak<TreeShared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub async fn snapshot(&self) -> Session {
        self.shared.inner.lock().await.session.clone()
    }

    /// The node the user is currently at.
    pub async fn current_node(&self) -> EngineResult<TreeNode> {
        let inner = self.shared.inner.lock().await;
        let state = inner.state()?;
        inner.graph.require_node(&state.current_node_id).cloned()
    }

    /// Options at the current node the user has never selected.
    pub async fn untried_options(&self) -> EngineResult<Vec<TreeOption>> {
        let inner = self.shared.inner.lock().await;
        let state = inner.state()?;
        let node = inner.graph.require_node(&state.current_node_id)?;
        Ok(node
            .options
            .iter()
            .filter(|o| {
                !state.explored_edges.contains(&ExploredEdge {
                    node_id: node.id.clone(),
                    option_id: o.id.clone(),
                })
            })
            .cloned()
            .collect())
    }

    /// Choose an option at the current node.
    pub async fn select_option(&self, option_id: &str) -> EngineResult<SelectionOutcome> {
        let shared = &self.shared;
        let mut inner = shared.ctx.lock(&shared.inner, &shared.key).await?;
        if inner.session.is_completed() {
            return Err(EngineError::ReadOnly {
                session_id: inner.session.id.clone(),
            });
        }

        let current_id = inner.state()?.current_node_id.clone();
        let node = inner.graph.require_node(&current_id)?;
        let option = node
            .option(option_id)
            .ok_or_else(|| EngineError::invalid_selection(&current_id, option_id))?
            .clone();
        if option.is_dead_end() {
            return Err(EngineError::broken_graph(format!(
                "option {}/{} neither leads anywhere nor ends the path",
                current_id, option_id
            )));
        }
        let target = match &option.leads_to_node_id {
            Some(target_id) if !option.is_terminal => {
                let target = inner.graph.node(target_id).cloned().ok_or_else(|| {
                    EngineError::broken_graph(format!(
                        "option {}/{} leads to missing node {}",
                        current_id, option_id, target_id
                    ))
                })?;
                Some(target)
            }
            _ => None,
        };

        let mut next = inner.session.clone();
        let state = next.tree_mut().ok_or_else(|| {
            EngineError::invalid_state(format!("session {} holds no tree state", shared.key))
        })?;
        state.history.push(HistoryEntry {
            node_id: current_id.clone(),
            chosen_option_id: option.id.clone(),
        });
        state.explored_edges.insert(ExploredEdge {
            node_id: current_id.clone(),
            option_id: option.id.clone(),
        });

        let outcome = match target {
            Some(node) => {
                state.current_node_id = node.id.clone();
                SelectionOutcome::Advanced { node }
            }
            None => {
                let report = tree_report(state, &inner.graph)?;
                next.complete(Some(Report::Tree(report.clone())));
                SelectionOutcome::Completed { report }
            }
        };

        shared.ctx.persist(&mut next).await?;
        inner.session = next;

        let session_id = inner.session.id.clone();
        shared.ctx.publish(SessionEvent::OptionSelected {
            session_id: session_id.clone(),
            node_id: current_id.clone(),
            option_id: option.id.clone(),
            timestamp: Utc::now(),
        });
        match &outcome {
            SelectionOutcome::Advanced { node } => {
                debug!(session_id = %session_id, from = %current_id, to = %node.id, "Entered node");
                shared.ctx.publish(SessionEvent::NodeEntered {
                    session_id,
                    node_id: node.id.clone(),
                    timestamp: Utc::now(),
                });
            }
            SelectionOutcome::Completed { report } => {
                info!(
                    session_id = %session_id,
                    decisions = report.decisions_count,
                    paths = report.paths_explored,
                    "Tree path completed"
                );
                shared.ctx.publish(SessionEvent::Completed {
                    session_id,
                    report: inner.session.report.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(outcome)
    }

    /// Rewind to just after history entry `index`, or to the root when
    /// `None`. A terminal entry is dropped too. Reopens a completed path.
    pub async fn backtrack_to(&self, index: Option<usize>) -> EngineResult<TreeNode> {
        let shared = &self.shared;
        let mut inner = shared.ctx.lock(&shared.inner, &shared.key).await?;
        let state = inner.state()?;

        let keep = match index {
            Some(i) if i >= state.history.len() => {
                return Err(EngineError::invalid_state(format!(
                    "history index {} out of range ({} decisions)",
                    i,
                    state.history.len()
                )));
            }
            Some(i) => i + 1,
            None => 0,
        };

        // A terminal entry ended its path, so it is dropped and the user is
        // back at the node where it was chosen.
        let (keep, destination) = if keep == 0 {
            (0, inner.graph.root_id().to_string())
        } else {
            let entry = &state.history[keep - 1];
            let option = inner
                .graph
                .option(&entry.node_id, &entry.chosen_option_id)
                .ok_or_else(|| {
                    EngineError::broken_graph(format!(
                        "history references unknown option {}/{}",
                        entry.node_id, entry.chosen_option_id
                    ))
                })?;
            match &option.leads_to_node_id {
                Some(target) if !option.is_terminal => (keep, target.clone()),
                _ => (keep - 1, entry.node_id.clone()),
            }
        };
        let node = inner.graph.require_node(&destination)?.clone();

        let mut next = inner.session.clone();
        if let Some(state) = next.tree_mut() {
            state.history.truncate(keep);
            state.current_node_id = destination;
        }
        if next.is_completed() {
            next.reopen();
        }
        shared.ctx.persist(&mut next).await?;
        inner.session = next;

        debug!(session_id = %inner.session.id, history_len = keep, node_id = %node.id, "Backtracked");
        shared.ctx.publish(SessionEvent::Backtracked {
            session_id: inner.session.id.clone(),
            history_len: keep,
            node_id: node.id.clone(),
            timestamp: Utc::now(),
        });
        Ok(node)
    }

    /// Clear history and explored edges and return to the root.
    ///
    /// A completed session stays on record; exploration restarts in a new one.
    pub async fn reset_all(&self) -> EngineResult<TreeNode> {
        let shared = &self.shared;
        let mut inner = shared.ctx.lock(&shared.inner, &shared.key).await?;
        let root = inner.graph.root().clone();

        let mut next = if inner.session.is_completed() {
            Session::new(
                &shared.key.user_id,
                &shared.key.topic_id,
                ModeState::Tree(TreeState::at_root(&root.id)),
            )
        } else {
            let mut same = inner.session.clone();
            same.mode_state = ModeState::Tree(TreeState::at_root(&root.id));
            same
        };
        next.begin();
        shared.ctx.persist(&mut next).await?;
        info!(previous = %inner.session.id, session_id = %next.id, "Tree exploration reset");
        inner.session = next;

        shared.ctx.publish(SessionEvent::Reset {
            session_id: inner.session.id.clone(),
            timestamp: Utc::now(),
        });
        Ok(root)
    }
}
