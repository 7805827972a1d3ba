//! End-to-end session scenarios through the `Engine` facade.
//!
//! Tests verify:
//! - Scripted auto-play completes at the last round after one tick per round
//! - Tree paths complete on a terminal option and reopen on backtrack
//! - Live debates produce one user and one AI message per round plus the opening
//! - An unanswered live turn forfeits exactly one round with a zero score
//! - Stance counts always sum to the number of decisions

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use debate_engine::{
    AiTurn, AiTurnGenerator, DebateMode, Engine, EngineConfig, EngineError, EngineResult,
    GenerationRequest, InMemoryCatalog, MemorySessionStore, OptionStance, PlanTier, Position,
    Report, ScriptedRound, SelectionOutcome, SessionStatus, Speaker, Stance, TierAccessPolicy,
    Topic, TreeNode, TreeOption, TurnOutcome,
};

// ── Fixtures ───────────────────────────────────────────────────────

const TOPIC: &str = "uniforms";

fn topic() -> Topic {
    Topic {
        id: TOPIC.into(),
        title: "School uniforms".into(),
        description: "Should schools require uniforms?".into(),
        positions: [
            Position {
                id: "pro".into(),
                stance: Stance::For,
                title: "Require them".into(),
                description: "Uniforms keep focus on learning".into(),
                ai_persona: "Principal Park".into(),
            },
            Position {
                id: "con".into(),
                stance: Stance::Against,
                title: "Drop them".into(),
                description: "Uniforms stifle expression".into(),
                ai_persona: "Student Kim".into(),
            },
        ],
    }
}

fn rounds(count: usize) -> Vec<ScriptedRound> {
    (0..count)
        .rev()
        .map(|index| ScriptedRound {
            topic_id: TOPIC.into(),
            index,
            for_message: format!("Uniforms help, reason {index}"),
            for_persona: "Principal Park".into(),
            against_message: format!("Uniforms hurt, reason {index}"),
            against_persona: "Student Kim".into(),
        })
        .collect()
}

fn option(id: &str, stance: OptionStance, leads_to: Option<&str>) -> TreeOption {
    TreeOption {
        id: id.into(),
        text: format!("Option {id}"),
        stance,
        leads_to_node_id: leads_to.map(str::to_string),
        is_terminal: leads_to.is_none(),
    }
}

fn node(id: &str, parent: Option<&str>, level: u32, options: Vec<TreeOption>) -> TreeNode {
    TreeNode {
        id: id.into(),
        topic_id: TOPIC.into(),
        parent_node_id: parent.map(str::to_string),
        level,
        ai_persona: "Moderator".into(),
        ai_message: format!("Prompt at {id}"),
        options,
    }
}

fn tree() -> Vec<TreeNode> {
    vec![
        node(
            "root",
            None,
            1,
            vec![
                option("A", OptionStance::For, None),
                option("B", OptionStance::Against, Some("node2")),
            ],
        ),
        node(
            "node2",
            Some("root"),
            2,
            vec![
                option("C", OptionStance::Neutral, None),
                option("D", OptionStance::Against, None),
            ],
        ),
    ]
}

/// Rates round `n` as `50 + 10 * n`; the opening turn carries no rating.
struct RoundRatedGenerator;

#[async_trait]
impl AiTurnGenerator for RoundRatedGenerator {
    async fn generate_ai_turn(&self, request: &GenerationRequest) -> EngineResult<AiTurn> {
        if request.is_opening() {
            return Ok(AiTurn {
                message: format!("{} opens the debate", request.opponent_persona),
                feedback: None,
                score: None,
            });
        }
        Ok(AiTurn {
            message: format!("Rebuttal {}", request.round),
            feedback: Some(format!("Round {} feedback", request.round)),
            score: Some(50.0 + 10.0 * f64::from(request.round)),
        })
    }
}

fn engine(config: EngineConfig) -> Engine {
    let catalog = InMemoryCatalog::new()
        .with_topic(topic())
        .with_rounds(TOPIC, rounds(5))
        .with_tree(TOPIC, tree())
        .shared();
    let access = TierAccessPolicy::new()
        .with_user("premium-user", PlanTier::Premium)
        .shared();
    Engine::new(
        config,
        MemorySessionStore::new().shared(),
        catalog,
        access,
        Arc::new(RoundRatedGenerator),
    )
}

// ── Scripted ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn scripted_five_ticks_complete_at_last_round() {
    let engine = engine(EngineConfig::default());
    let playback = engine.scripted("u1", TOPIC).await.unwrap();
    assert_eq!(playback.total_rounds().await, 5);

    playback.play().await.unwrap();
    // Check between ticks, not on them
    tokio::time::sleep(Duration::from_millis(100)).await;
    for tick in 1..=4 {
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        let session = playback.snapshot().await;
        assert_eq!(session.scripted().unwrap().current_round_index, tick);
        assert_eq!(session.status, SessionStatus::InProgress);
    }
    tokio::time::sleep(Duration::from_millis(3_000)).await;

    let session = playback.snapshot().await;
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.scripted().unwrap().current_round_index, 4);

    let report = engine.get_report(&session.id).await.unwrap();
    assert!(matches!(report, Report::Scripted(ref s) if s.total_rounds == 5));
}

#[tokio::test]
async fn scripted_advance_is_capped_at_last_round() {
    let engine = engine(EngineConfig::default());
    let playback = engine.scripted("u1", TOPIC).await.unwrap();
    for n in 1..=7usize {
        playback.advance().await.unwrap();
        let session = playback.snapshot().await;
        assert_eq!(session.scripted().unwrap().current_round_index, n.min(4));
        assert_eq!(session.is_completed(), n >= 5);
    }
}

// ── Tree ───────────────────────────────────────────────────────────

#[tokio::test]
async fn tree_terminal_then_backtrack_and_branch() {
    let engine = engine(EngineConfig::default());
    let tree = engine.tree("u1", TOPIC).await.unwrap();

    let outcome = tree.select_option("A").await.unwrap();
    let SelectionOutcome::Completed { report } = outcome else {
        panic!("A is terminal");
    };
    assert_eq!(report.paths_explored, 1);

    let session = tree.snapshot().await;
    assert_eq!(session.status, SessionStatus::Completed);
    let state = session.tree().unwrap();
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].node_id, "root");
    assert_eq!(state.history[0].chosen_option_id, "A");

    tree.backtrack_to(None).await.unwrap();
    tree.select_option("B").await.unwrap();

    let session = tree.snapshot().await;
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.tree().unwrap().current_node_id, "node2");
}

#[tokio::test]
async fn tree_explored_edges_never_shrink() {
    let engine = engine(EngineConfig::default());
    let tree = engine.tree("u1", TOPIC).await.unwrap();

    let mut last = 0;
    let mut check = |len: usize| {
        assert!(len >= last, "explored edges shrank from {last} to {len}");
        last = len;
    };

    tree.select_option("B").await.unwrap();
    check(tree.snapshot().await.tree().unwrap().explored_edges.len());
    tree.select_option("C").await.unwrap();
    check(tree.snapshot().await.tree().unwrap().explored_edges.len());
    tree.backtrack_to(Some(0)).await.unwrap();
    check(tree.snapshot().await.tree().unwrap().explored_edges.len());
    tree.select_option("D").await.unwrap();
    check(tree.snapshot().await.tree().unwrap().explored_edges.len());

    let session = tree.snapshot().await;
    let Some(Report::Tree(report)) = session.report else {
        panic!("a completed path stores its report");
    };
    assert_eq!(report.stance_tally.total(), report.decisions_count);
    assert_eq!(report.decisions_count, 2);
    assert_eq!(report.dominant_stance, Some(OptionStance::Against));

    tree.backtrack_to(None).await.unwrap();
    check(tree.snapshot().await.tree().unwrap().explored_edges.len());
    assert_eq!(last, 3);

    let reopened = tree.snapshot().await;
    assert_eq!(reopened.status, SessionStatus::InProgress);
    assert!(reopened.report.is_none());
    let err = engine.get_report(&reopened.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

#[tokio::test]
async fn tree_unknown_option_is_invalid_selection() {
    let engine = engine(EngineConfig::default());
    let tree = engine.tree("u1", TOPIC).await.unwrap();
    let err = tree.select_option("Z").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSelection { .. }));
    assert_eq!(err.code(), "INVALID_SELECTION");
}

// ── Live ───────────────────────────────────────────────────────────

#[tokio::test]
async fn live_five_rounds_complete_with_score() {
    let engine = engine(EngineConfig::default());
    let live = engine.live("premium-user", TOPIC).await.unwrap();
    let started = live.start_with_position("con").await.unwrap();
    assert_eq!(started.mode, DebateMode::Live);
    assert_eq!(started.live().unwrap().opponent_persona, "Principal Park");

    for round in 1..=5u32 {
        let outcome = live
            .submit_user_message(&format!("Argument {round}"))
            .await
            .unwrap();
        let session = live.snapshot().await.unwrap();
        assert_eq!(session.live().unwrap().round, round + 1);
        if round < 5 {
            assert!(matches!(outcome, TurnOutcome::NextRound { .. }));
            assert_eq!(session.status, SessionStatus::InProgress);
        } else {
            assert!(matches!(outcome, TurnOutcome::Finished { .. }));
        }
    }

    let session = live.snapshot().await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    let state = session.live().unwrap();
    assert_eq!(state.messages.len(), 11);
    assert_eq!(state.count_by(Speaker::User), 5);
    assert_eq!(state.count_by(Speaker::Ai), 6);

    // mean of 60, 70, 80, 90, 100
    let score = session.score.unwrap();
    assert_eq!(score, 80.0);
    assert!((0.0..=100.0).contains(&score));

    let Report::Live(report) = engine.get_report(&session.id).await.unwrap() else {
        panic!("live session stores a live report");
    };
    assert_eq!(report.score, score);
    assert_eq!(report.feedback_log.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn live_unanswered_turn_forfeits_one_round() {
    let engine = engine(EngineConfig::default());
    let live = engine.live("premium-user", TOPIC).await.unwrap();
    live.start_with_position("pro").await.unwrap();

    tokio::time::sleep(Duration::from_secs(119)).await;
    assert_eq!(live.snapshot().await.unwrap().live().unwrap().round, 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let session = live.snapshot().await.unwrap();
    let state = session.live().unwrap();
    assert_eq!(state.round, 2);
    assert_eq!(state.count_by(Speaker::System), 1);
    assert_eq!(state.round_scores.len(), 1);
    assert!(state.round_scores[0].timed_out);
    assert_eq!(state.round_scores[0].score, Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn live_timeouts_alone_finish_the_debate() {
    let config = EngineConfig {
        max_rounds: 3,
        turn_time_limit_secs: 10,
        ..EngineConfig::default()
    };
    let engine = engine(config);
    let live = engine.live("premium-user", TOPIC).await.unwrap();
    live.start_with_position("pro").await.unwrap();

    for k in 1..=3u32 {
        tokio::time::sleep(Duration::from_secs(10) + Duration::from_millis(1)).await;
        let session = live.snapshot().await.unwrap();
        assert_eq!(session.live().unwrap().round, 1 + k);
        assert_eq!(session.is_completed(), k == 3);
    }

    // No further rounds are forfeited once finalized
    tokio::time::sleep(Duration::from_secs(60)).await;
    let session = live.snapshot().await.unwrap();
    assert_eq!(session.live().unwrap().count_by(Speaker::System), 3);
    assert_eq!(session.score, Some(0.0));
}

#[tokio::test]
async fn live_requires_entitlement() {
    let engine = engine(EngineConfig::default());
    let live = engine.live("free-user", TOPIC).await.unwrap();
    let err = live.start_with_position("pro").await.unwrap_err();
    assert!(matches!(err, EngineError::AccessDenied { .. }));
    assert!(live.snapshot().await.is_none());
}
