//! Blunder and drill classification: pure functions only
//! (No Engine/Database dependencies)

use chess_core::MotifFlags;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::Chess;

use crate::config::Thresholds;

/// Loss below this (and non-zero) marks a drill as easy
const EASY_LOSS_CP: i32 = 250;

/// Hex characters kept from the SHA-1 digest
const DRILL_ID_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tag {
    Blunder,
    LongThink,
    Check,
    Capture,
    PawnPush,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Blunder => "blunder",
            Tag::LongThink => "long-think",
            Tag::Check => "check",
            Tag::Capture => "capture",
            Tag::PawnPush => "pawn-push",
        }
    }
}

/// Tags stored as a comma-joined list in canonical order
pub fn join_tags(tags: &[Tag]) -> String {
    tags.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
        }
    }
}

/// Independent of severity: only small, known, non-zero losses are easy.
pub fn difficulty(cp_loss: Option<i32>) -> Difficulty {
    match cp_loss {
        Some(loss) if loss != 0 && loss < EASY_LOSS_CP => Difficulty::Easy,
        _ => Difficulty::Medium,
    }
}

/// Loss for the mover, given White-perspective evaluations around the move.
pub fn compute_loss(eval_before: Option<i32>, eval_after: Option<i32>, mover_is_white: bool) -> Option<i32> {
    let white_loss = eval_before? - eval_after?;
    Some(if mover_is_white { white_loss } else { -white_loss })
}

/// Why a move became a drill, with its ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// 0 (long think only) to 3 (severe blunder)
    pub severity: u8,
    pub tags: Vec<Tag>,
    pub difficulty: Difficulty,
}

/// Classify a move. `None` when it is neither a blunder nor a long think.
pub fn classify(
    cp_loss: Option<i32>,
    time_spent: Option<u32>,
    flags: &MotifFlags,
    thresholds: &Thresholds,
) -> Option<Classification> {
    let is_blunder = cp_loss.is_some_and(|loss| loss >= thresholds.blunder_cp);
    let is_long = time_spent.is_some_and(|t| t > thresholds.long_think_secs);

    if !is_blunder && !is_long {
        return None;
    }

    let severity = if cp_loss.is_some_and(|loss| loss >= thresholds.severe_blunder_cp) {
        3
    } else if is_blunder && is_long {
        2
    } else if is_blunder {
        1
    } else {
        0
    };

    let tags = [
        (is_blunder, Tag::Blunder),
        (is_long, Tag::LongThink),
        (flags.is_check, Tag::Check),
        (flags.is_capture, Tag::Capture),
        (flags.is_pawn_push, Tag::PawnPush),
    ]
    .into_iter()
    .filter_map(|(set, tag)| set.then_some(tag))
    .collect();

    Some(Classification {
        severity,
        tags,
        difficulty: difficulty(cp_loss),
    })
}

/// Deterministic drill identity: first 16 hex chars of
/// SHA-1(`"{game_id}|{ply}|{fen_before}|{best_san}"`).
pub fn drill_id(game_id: &str, ply: u32, fen_before: &str, best_san: Option<&str>) -> String {
    let src = format!("{game_id}|{ply}|{fen_before}|{}", best_san.unwrap_or(""));
    let mut digest = hex::encode(Sha1::digest(src.as_bytes()));
    digest.truncate(DRILL_ID_LEN);
    digest
}

/// Convert a UCI principal line to SAN by replaying it from `pos`.
///
/// Stops at the first move that does not parse or is illegal. Returns the
/// first SAN (the engine's best move) and the converted line.
pub fn pv_to_san(pos: &Chess, pv: &[String]) -> (Option<String>, Vec<String>) {
    let mut board = pos.clone();
    let mut line = Vec::with_capacity(pv.len());

    for uci in pv {
        let Ok(uci) = uci.parse::<UciMove>() else {
            break;
        };
        let Ok(m) = uci.to_move(&board) else {
            break;
        };
        line.push(SanPlus::from_move_and_play_unchecked(&mut board, m).to_string());
    }

    (line.first().cloned(), line)
}

/// Principal line as stored in `drills.pv_best`.
pub fn pv_json(line: &[String]) -> String {
    serde_json::to_string(line).unwrap_or_else(|_| "[]".to_string())
}
