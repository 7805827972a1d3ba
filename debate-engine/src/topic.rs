//! Topic content model: topics, positions, scripted rounds and tree nodes.
//!
//! All of these are authored outside the engine and treated as immutable.

use serde::{Deserialize, Serialize};

/// Side of a topic a position argues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    For,
    Against,
}

impl Stance {
    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Self::For => Self::Against,
            Self::Against => Self::For,
        }
    }
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::For => write!(f, "for"),
            Self::Against => write!(f, "against"),
        }
    }
}

/// Stance carried by a tree response option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionStance {
    For,
    Against,
    Neutral,
}

impl std::fmt::Display for OptionStance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::For => write!(f, "for"),
            Self::Against => write!(f, "against"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// One side of a topic with its AI persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub stance: Stance,
    pub title: String,
    pub description: String,
    pub ai_persona: String,
}

/// A debate subject with exactly two opposing positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub description: String,
    pub positions: [Position; 2],
}

impl Topic {
    /// Look up a position by id.
    pub fn position(&self, position_id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == position_id)
    }

    /// The position arguing the other side of `position_id`.
    pub fn opposing(&self, position_id: &str) -> Option<&Position> {
        let chosen = self.position(position_id)?;
        self.positions
            .iter()
            .find(|p| p.stance == chosen.stance.opposite())
    }

    /// Whether the two positions take opposite stances.
    pub fn is_well_formed(&self) -> bool {
        self.positions[0].stance != self.positions[1].stance
    }
}

/// One pre-authored AI-vs-AI exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedRound {
    pub topic_id: String,
    /// 0-based position in the script.
    pub index: usize,
    pub for_message: String,
    pub for_persona: String,
    pub against_message: String,
    pub against_persona: String,
}

/// A response choice attached to a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeOption {
    pub id: String,
    pub text: String,
    pub stance: OptionStance,
    #[serde(default)]
    pub leads_to_node_id: Option<String>,
    #[serde(default)]
    pub is_terminal: bool,
}

impl TreeOption {
    /// Exactly one of `leads_to_node_id` / `is_terminal` must hold.
    pub fn is_dead_end(&self) -> bool {
        self.leads_to_node_id.is_some() == self.is_terminal
    }
}

/// One AI turn in the branching graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub topic_id: String,
    #[serde(default)]
    pub parent_node_id: Option<String>,
    pub level: u32,
    pub ai_persona: String,
    pub ai_message: String,
    #[serde(default)]
    pub options: Vec<TreeOption>,
}

impl TreeNode {
    /// Root nodes have no parent and sit at level 1.
    pub fn is_root(&self) -> bool {
        self.parent_node_id.is_none() && self.level == 1
    }

    pub fn option(&self, option_id: &str) -> Option<&TreeOption> {
        self.options.iter().find(|o| o.id == option_id)
    }
}
