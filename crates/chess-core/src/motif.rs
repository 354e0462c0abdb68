//! Game phase and SAN-derived motif flags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Last ply counted as opening.
pub const OPENING_PLY: u32 = 14;
/// Last ply counted as middlegame.
pub const MIDDLEGAME_PLY: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Opening,
    Middlegame,
    Endgame,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Opening => "opening",
            Phase::Middlegame => "middlegame",
            Phase::Endgame => "endgame",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase as a pure function of the 1-based ply.
pub fn phase_from_ply(ply: u32) -> Phase {
    if ply <= OPENING_PLY {
        Phase::Opening
    } else if ply <= MIDDLEGAME_PLY {
        Phase::Middlegame
    } else {
        Phase::Endgame
    }
}

/// Flags read straight off the SAN text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotifFlags {
    pub is_check: bool,
    pub is_mate: bool,
    pub is_capture: bool,
    pub is_pawn_push: bool,
    pub is_promotion: bool,
    pub is_castle: bool,
}

impl MotifFlags {
    pub fn from_san(san: &str) -> Self {
        Self {
            is_check: san.contains('+'),
            is_mate: san.contains('#'),
            is_capture: san.contains('x'),
            is_pawn_push: san.starts_with(|c: char| ('a'..='h').contains(&c)),
            is_promotion: san.contains('='),
            is_castle: matches!(san, "O-O" | "O-O-O"),
        }
    }
}
