//! Scoring & report engine: pure functions from a finished path or
//! transcript to a structured report.
//!
//! Tree reports summarize exploration breadth and stance balance; live
//! reports aggregate the collaborator's per-round ratings. Scripted playback
//! only records a completion summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::graph::TreeGraph;
use crate::session::{LiveState, RoundScore, Speaker, TreeState};
use crate::topic::OptionStance;

/// Lowest and highest possible live score.
pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

/// Per-stance counts over a tree history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StanceTally {
    pub for_count: usize,
    pub against_count: usize,
    pub neutral_count: usize,
}

impl StanceTally {
    pub fn record(&mut self, stance: OptionStance) {
        match stance {
            OptionStance::For => self.for_count += 1,
            OptionStance::Against => self.against_count += 1,
            OptionStance::Neutral => self.neutral_count += 1,
        }
    }

    pub fn get(&self, stance: OptionStance) -> usize {
        match stance {
            OptionStance::For => self.for_count,
            OptionStance::Against => self.against_count,
            OptionStance::Neutral => self.neutral_count,
        }
    }

    pub fn total(&self) -> usize {
        self.for_count + self.against_count + self.neutral_count
    }
}

/// Report for a decision-tree path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeReport {
    pub paths_explored: usize,
    pub decisions_count: usize,
    pub dominant_stance: Option<OptionStance>,
    pub stance_tally: StanceTally,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Report for a finished live debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveReport {
    pub score: f64,
    pub arguments_made: usize,
    pub rounds_completed: u32,
    pub timed_out_rounds: usize,
    pub feedback_log: Vec<String>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Completion record for scripted playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedSummary {
    pub total_rounds: usize,
    pub completed_at: DateTime<Utc>,
}

/// Any persisted report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    Scripted(ScriptedSummary),
    Tree(TreeReport),
    Live(LiveReport),
}

impl Report {
    /// Numeric score, live reports only.
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Live(r) => Some(r.score),
            _ => None,
        }
    }
}

// ============================================================================
// Tree
// ============================================================================

/// Majority stance; ties go to the stance encountered first.
pub fn dominant_stance(stances: &[OptionStance]) -> Option<OptionStance> {
    let mut tally = StanceTally::default();
    let mut order: Vec<OptionStance> = Vec::with_capacity(3);
    for &stance in stances {
        tally.record(stance);
        if !order.contains(&stance) {
            order.push(stance);
        }
    }

    let mut best: Option<OptionStance> = None;
    for stance in order {
        match best {
            Some(current) if tally.get(current) >= tally.get(stance) => {}
            _ => best = Some(stance),
        }
    }
    best
}

/// Resolve the stance of each chosen option in order.
pub fn chosen_stances(state: &TreeState, graph: &TreeGraph) -> EngineResult<Vec<OptionStance>> {
    state
        .history
        .iter()
        .map(|entry| {
            graph
                .option(&entry.node_id, &entry.chosen_option_id)
                .map(|o| o.stance)
                .ok_or_else(|| {
                    EngineError::broken_graph(format!(
                        "history references unknown option {}/{}",
                        entry.node_id, entry.chosen_option_id
                    ))
                })
        })
        .collect()
}

/// Build the report for a tree traversal.
pub fn tree_report(state: &TreeState, graph: &TreeGraph) -> EngineResult<TreeReport> {
    let stances = chosen_stances(state, graph)?;
    let mut tally = StanceTally::default();
    for &stance in &stances {
        tally.record(stance);
    }
    let dominant = dominant_stance(&stances);
    let paths_explored = state.explored_edges.len();
    let decisions_count = state.history.len();

    let (insights, recommendations) = tree_commentary(paths_explored, decisions_count, dominant);

    Ok(TreeReport {
        paths_explored,
        decisions_count,
        dominant_stance: dominant,
        stance_tally: tally,
        insights,
        recommendations,
        generated_at: Utc::now(),
    })
}

fn tree_commentary(
    paths_explored: usize,
    decisions_count: usize,
    dominant: Option<OptionStance>,
) -> (Vec<String>, Vec<String>) {
    let mut insights = Vec::new();
    let mut recommendations = Vec::new();

    insights.push(match paths_explored {
        0 | 1 => "You followed a single line of argument.".to_string(),
        2..=4 => "You explored several lines of argument.".to_string(),
        _ => "You explored the debate widely.".to_string(),
    });

    if decisions_count <= 2 {
        insights.push("You reached a conclusion quickly.".to_string());
        recommendations.push("Follow a branch deeper before concluding.".to_string());
    } else {
        insights.push(format!(
            "You sustained the exchange over {} decisions.",
            decisions_count
        ));
    }

    match dominant {
        Some(OptionStance::For) => {
            insights.push("Your responses mostly supported the motion.".to_string());
            recommendations
                .push("Practice arguing against the motion to test your reasoning.".to_string());
        }
        Some(OptionStance::Against) => {
            insights.push("Your responses mostly challenged the motion.".to_string());
            recommendations.push("Try building the strongest case for the motion.".to_string());
        }
        Some(OptionStance::Neutral) => {
            insights.push("Your responses stayed balanced between both sides.".to_string());
            recommendations.push("Commit to a side and defend it.".to_string());
        }
        None => {}
    }

    if paths_explored < 3 {
        recommendations.push("Backtrack and try the options you skipped.".to_string());
    }

    (insights, recommendations)
}

// ============================================================================
// Live
// ============================================================================

/// Mean of recorded round scores, clamped to [0, 100].
///
/// Timed-out rounds count as 0; answered rounds the collaborator did not
/// rate are left out. No rated rounds yields 0.
pub fn aggregate_score(round_scores: &[RoundScore]) -> f64 {
    let rated: Vec<f64> = round_scores
        .iter()
        .filter_map(|r| {
            if r.timed_out {
                Some(SCORE_MIN)
            } else {
                r.score.map(clamp_score)
            }
        })
        .collect();

    if rated.is_empty() {
        return SCORE_MIN;
    }
    clamp_score(rated.iter().sum::<f64>() / rated.len() as f64)
}

/// Clamp a collaborator score into range; NaN maps to the minimum.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        SCORE_MIN
    } else {
        score.clamp(SCORE_MIN, SCORE_MAX)
    }
}

/// Build the report for a finalized live debate.
pub fn live_report(state: &LiveState) -> LiveReport {
    let score = aggregate_score(&state.round_scores);
    let arguments_made = state.count_by(Speaker::User);
    let timed_out_rounds = state.round_scores.iter().filter(|r| r.timed_out).count();

    let mut insights = Vec::new();
    let mut recommendations = Vec::new();

    if score >= 80.0 {
        insights.push("Your arguments were consistently strong.".to_string());
    } else if score >= 50.0 {
        insights.push("Your arguments were solid with room to sharpen.".to_string());
        recommendations.push("Back each claim with a concrete example.".to_string());
    } else {
        insights.push("Your arguments are still developing.".to_string());
        recommendations.push("Address the opponent's last point before adding new ones.".to_string());
    }

    if timed_out_rounds > 0 {
        insights.push(format!(
            "You lost {} round(s) to the clock.",
            timed_out_rounds
        ));
        recommendations.push("Outline your reply before the timer runs low.".to_string());
    }

    LiveReport {
        score,
        arguments_made,
        rounds_completed: state.round.saturating_sub(1),
        timed_out_rounds,
        feedback_log: state.feedback_log.clone(),
        insights,
        recommendations,
        generated_at: Utc::now(),
    }
}
