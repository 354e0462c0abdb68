//! Main-line game walker: board state, per-ply evaluation under the run-wide
//! budget, clock deltas, and drill extraction.

use chess_core::{phase_from_ply, ClockTracker, MotifFlags, ParsedGame, Phase};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::{Chess, Color, EnPassantMode, Move, Position};
use tracing::{debug, info, warn};

use crate::classify::{self, Difficulty, Tag};
use crate::config::Thresholds;
use crate::engine::{Engine, Evaluation, SearchLimit};

/// Engine evaluations allowed for a whole run.
#[derive(Debug, Clone, Copy)]
pub struct EvalBudget {
    limit: u32,
    used: u32,
}

impl EvalBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    pub fn has_remaining(&self) -> bool {
        self.used < self.limit
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    fn consume(&mut self) {
        self.used += 1;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WalkSettings {
    pub limit: SearchLimit,
    /// Evaluate only plies divisible by this stride (1 = every ply)
    pub sample_every: u32,
    pub thresholds: Thresholds,
}

impl WalkSettings {
    fn is_sampled(&self, ply: u32) -> bool {
        self.sample_every <= 1 || ply % self.sample_every == 0
    }
}

/// `W` or `B` as stored in the ledger
pub fn side_code(color: Color) -> &'static str {
    match color {
        Color::White => "W",
        Color::Black => "B",
    }
}

/// One walked ply
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRecord {
    pub ply: u32,
    pub side: Color,
    pub phase: Phase,
    pub san: String,
    pub fen_before: String,
    pub clock_after_sec: Option<u32>,
    pub time_spent_sec: Option<u32>,
    pub eval_before_cp: Option<i32>,
    pub eval_after_cp: Option<i32>,
    pub cp_loss: Option<i32>,
    pub flags: MotifFlags,
}

/// A move worth practising
#[derive(Debug, Clone, PartialEq)]
pub struct DrillRecord {
    pub drill_id: String,
    pub ply: u32,
    pub side: Color,
    pub phase: Phase,
    pub san_played: String,
    pub fen_before: String,
    pub time_spent_sec: Option<u32>,
    pub clock_after_sec: Option<u32>,
    pub cp_loss: Option<i32>,
    pub engine_best_san: Option<String>,
    pub eval_before_cp: Option<i32>,
    pub eval_after_cp: Option<i32>,
    /// Principal line in SAN
    pub pv_best: Vec<String>,
    pub severity: u8,
    pub tags: Vec<Tag>,
    pub difficulty: Difficulty,
}

/// Everything the walker produced for one game
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameAnalysis {
    pub game_id: String,
    pub moves: Vec<MoveRecord>,
    pub drills: Vec<DrillRecord>,
    /// Ply whose move could not be played; the walk stopped before it
    pub truncated_at: Option<u32>,
}

/// Parse SAN text (check suffixes and annotations tolerated) against `pos`.
pub fn parse_san(pos: &Chess, text: &str) -> Option<Move> {
    let clean = text
        .trim()
        .trim_end_matches(|c: char| c == '!' || c == '?');
    let san_plus: SanPlus = clean.parse().ok()?;
    san_plus.san.to_move(pos).ok()
}

pub fn fen_of(pos: &Chess) -> String {
    Fen::from_position(pos, EnPassantMode::Legal).to_string()
}

/// Ask the engine if the budget allows; a scored result consumes one unit.
async fn evaluate_within_budget<E: Engine>(
    engine: &mut E,
    budget: &mut EvalBudget,
    fen: &str,
    limit: SearchLimit,
) -> Evaluation {
    if !budget.has_remaining() {
        return Evaluation::Unavailable;
    }
    let eval = engine.evaluate(fen, limit).await;
    if eval.is_scored() {
        budget.consume();
    }
    eval
}

/// Walk the main line of `game`, evaluating before and after every sampled ply.
///
/// An unplayable move ends the walk; plies before it are kept. Moves without
/// both evaluations are stored but never classified.
pub async fn walk_game<E: Engine>(
    engine: &mut E,
    game: &ParsedGame,
    budget: &mut EvalBudget,
    settings: &WalkSettings,
) -> GameAnalysis {
    let game_id = game.game_id();
    let mut analysis = GameAnalysis {
        game_id: game_id.clone(),
        ..GameAnalysis::default()
    };

    let mut pos = Chess::default();
    let mut clocks = ClockTracker::new();

    for (ply, played) in (1u32..).zip(&game.moves) {
        let Some(mv) = parse_san(&pos, &played.san) else {
            warn!(game_id = %game_id, ply, san = %played.san, "Unplayable move, truncating game");
            analysis.truncated_at = Some(ply);
            break;
        };

        let side = pos.turn();
        let mover_is_white = side == Color::White;
        let sampled = settings.is_sampled(ply);

        let fen_before = fen_of(&pos);
        let before = if sampled {
            evaluate_within_budget(engine, budget, &fen_before, settings.limit).await
        } else {
            Evaluation::Unavailable
        };

        let clock_after_sec = played.comment.as_deref().and_then(chess_core::parse_clock);
        let time_spent_sec = clocks.observe(mover_is_white, clock_after_sec);

        let pos_before = pos.clone();
        let san = SanPlus::from_move_and_play_unchecked(&mut pos, mv).to_string();

        let after = if sampled {
            let fen_after = fen_of(&pos);
            evaluate_within_budget(engine, budget, &fen_after, settings.limit).await
        } else {
            Evaluation::Unavailable
        };

        let eval_before_cp = before.white_cp(mover_is_white);
        let eval_after_cp = after.white_cp(!mover_is_white);
        let cp_loss = classify::compute_loss(eval_before_cp, eval_after_cp, mover_is_white);
        let flags = MotifFlags::from_san(&san);
        let phase = phase_from_ply(ply);

        // A move is only classified once both sides of it were scored
        let classification = match cp_loss {
            Some(_) => classify::classify(cp_loss, time_spent_sec, &flags, &settings.thresholds),
            None => None,
        };

        if let Some(c) = classification {
            let (engine_best_san, pv_best) = classify::pv_to_san(&pos_before, before.pv());
            let drill_id =
                classify::drill_id(&game_id, ply, &fen_before, engine_best_san.as_deref());
            debug!(game_id = %game_id, ply, severity = c.severity, %drill_id, "Drill candidate");

            analysis.drills.push(DrillRecord {
                drill_id,
                ply,
                side,
                phase,
                san_played: san.clone(),
                fen_before: fen_before.clone(),
                time_spent_sec,
                clock_after_sec,
                cp_loss,
                engine_best_san,
                eval_before_cp,
                eval_after_cp,
                pv_best,
                severity: c.severity,
                tags: c.tags,
                difficulty: c.difficulty,
            });
        }

        analysis.moves.push(MoveRecord {
            ply,
            side,
            phase,
            san,
            fen_before,
            clock_after_sec,
            time_spent_sec,
            eval_before_cp,
            eval_after_cp,
            cp_loss,
            flags,
        });
    }

    info!(
        game_id = %game_id,
        plies = analysis.moves.len(),
        drills = analysis.drills.len(),
        evals_used = budget.used(),
        "Walked game"
    );

    analysis
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use chess_core::PlayedMove;

    use super::*;
    use crate::engine::Score;

    /// Replies with scripted White-to-move-relative scores in call order.
    struct ScriptedEngine {
        replies: VecDeque<Evaluation>,
        calls: u32,
    }

    impl ScriptedEngine {
        fn new(replies: Vec<Evaluation>) -> Self {
            Self {
                replies: replies.into(),
                calls: 0,
            }
        }
    }

    impl Engine for ScriptedEngine {
        fn name(&self) -> Option<&str> {
            Some("scripted")
        }

        async fn evaluate(&mut self, _fen: &str, _limit: SearchLimit) -> Evaluation {
            self.calls += 1;
            self.replies.pop_front().unwrap_or(Evaluation::Unavailable)
        }
    }

    fn cp(score: i32, pv: &[&str]) -> Evaluation {
        Evaluation::Scored {
            score: Score::Cp(score),
            pv: pv.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn game(moves: &[(&str, Option<&str>)]) -> ParsedGame {
        let mut g = ParsedGame::default();
        g.headers.white = "alice".into();
        g.headers.black = "bob".into();
        g.headers.date = "2024.03.01".into();
        g.moves = moves
            .iter()
            .map(|(san, comment)| PlayedMove {
                san: san.to_string(),
                comment: comment.map(str::to_string),
            })
            .collect();
        g
    }

    fn settings() -> WalkSettings {
        WalkSettings {
            limit: SearchLimit::Depth(4),
            sample_every: 1,
            thresholds: Thresholds::default(),
        }
    }

    #[tokio::test]
    async fn test_plies_contiguous_and_phases() {
        let g = game(&[("e4", None), ("e5", None), ("Nf3", None)]);
        let mut engine = ScriptedEngine::new(vec![]);
        let mut budget = EvalBudget::new(100);

        let a = walk_game(&mut engine, &g, &mut budget, &settings()).await;
        let plies: Vec<u32> = a.moves.iter().map(|m| m.ply).collect();
        assert_eq!(plies, vec![1, 2, 3]);
        assert!(a.moves.iter().all(|m| m.phase == Phase::Opening));
        assert_eq!(a.moves[1].side, Color::Black);
        assert_eq!(
            a.moves[0].fen_before,
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
        assert!(a.drills.is_empty());
        assert_eq!(a.truncated_at, None);
    }

    #[tokio::test]
    async fn test_loss_normalised_to_mover() {
        // after 1. e4 the engine reports +100 for Black to move, -100 for White
        let g = game(&[("e4", None)]);
        let mut engine = ScriptedEngine::new(vec![cp(50, &["d2d4", "d7d5"]), cp(100, &[])]);
        let mut budget = EvalBudget::new(100);

        let a = walk_game(&mut engine, &g, &mut budget, &settings()).await;
        let m = &a.moves[0];
        assert_eq!(m.eval_before_cp, Some(50));
        assert_eq!(m.eval_after_cp, Some(-100));
        assert_eq!(m.cp_loss, Some(150));

        let d = &a.drills[0];
        assert_eq!(d.severity, 1);
        assert_eq!(d.engine_best_san.as_deref(), Some("d4"));
        assert_eq!(d.pv_best, vec!["d4", "d5"]);
        assert_eq!(d.tags, vec![Tag::Blunder, Tag::PawnPush]);
        assert_eq!(d.difficulty, Difficulty::Easy);
        assert_eq!(budget.used(), 2);
    }

    #[tokio::test]
    async fn test_black_mover_gain_is_negative_loss() {
        // 1... e5: Black to move scores -50 (White +50), then White to move scores -100
        let g = game(&[("e4", None), ("e5", None)]);
        let mut engine = ScriptedEngine::new(vec![
            Evaluation::Unavailable,
            Evaluation::Unavailable,
            cp(-50, &[]),
            cp(-100, &[]),
        ]);
        let mut budget = EvalBudget::new(100);

        let a = walk_game(&mut engine, &g, &mut budget, &settings()).await;
        let m = &a.moves[1];
        assert_eq!(m.eval_before_cp, Some(50));
        assert_eq!(m.eval_after_cp, Some(-100));
        assert_eq!(m.cp_loss, Some(-150));
        assert!(a.drills.is_empty());
    }

    #[tokio::test]
    async fn test_long_think_without_engine_is_not_a_drill() {
        let g = game(&[
            ("e4", Some("[%clk 0:05:00]")),
            ("e5", Some("[%clk 0:05:00]")),
            ("Nf3", Some("[%clk 0:04:35]")),
        ]);
        let mut engine = ScriptedEngine::new(vec![]);
        let mut budget = EvalBudget::new(100);

        let a = walk_game(&mut engine, &g, &mut budget, &settings()).await;
        assert_eq!(a.moves[0].time_spent_sec, None);
        assert_eq!(a.moves[2].clock_after_sec, Some(275));
        assert_eq!(a.moves[2].time_spent_sec, Some(25));
        assert_eq!(a.moves[2].cp_loss, None);
        assert!(a.drills.is_empty());
    }

    #[tokio::test]
    async fn test_long_think_with_known_zero_loss_drills() {
        let g = game(&[
            ("e4", Some("[%clk 0:05:00]")),
            ("e5", Some("[%clk 0:05:00]")),
            ("Nf3", Some("[%clk 0:04:35]")),
        ]);
        let mut engine = ScriptedEngine::new(vec![
            cp(20, &[]),
            cp(-20, &[]),
            cp(-20, &[]),
            cp(20, &[]),
            cp(20, &[]),
            cp(-20, &[]),
        ]);
        let mut budget = EvalBudget::new(100);

        let a = walk_game(&mut engine, &g, &mut budget, &settings()).await;
        assert_eq!(a.drills.len(), 1);
        let d = &a.drills[0];
        assert_eq!(d.ply, 3);
        assert_eq!(d.cp_loss, Some(0));
        assert_eq!(d.severity, 0);
        assert_eq!(d.engine_best_san, None);
        assert!(d.pv_best.is_empty());
        assert_eq!(d.tags, vec![Tag::LongThink]);
    }

    #[tokio::test]
    async fn test_long_think_after_budget_exhaustion_is_not_a_drill() {
        let g = game(&[
            ("d4", Some("[%clk 0:04:58]")),
            ("d5", Some("[%clk 0:04:59]")),
            ("c4", Some("[%clk 0:04:30]")),
            ("e6", Some("[%clk 0:04:57]")),
        ]);
        let mut engine = ScriptedEngine::new(vec![cp(20, &[]), cp(-20, &[]), cp(-20, &[])]);
        let mut budget = EvalBudget::new(2);

        let a = walk_game(&mut engine, &g, &mut budget, &settings()).await;
        assert_eq!(a.moves[2].time_spent_sec, Some(28));
        assert_eq!(a.moves[2].eval_before_cp, None);
        assert_eq!(engine.calls, 2);
        assert!(a.drills.is_empty());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_leaves_null_evals() {
        let g = game(&[("e4", None), ("e5", None), ("Nf3", None)]);
        let mut engine = ScriptedEngine::new(vec![
            cp(20, &[]),
            cp(-20, &[]),
            cp(-20, &[]),
            cp(30, &[]),
        ]);
        let mut budget = EvalBudget::new(2);

        let a = walk_game(&mut engine, &g, &mut budget, &settings()).await;
        assert_eq!(a.moves[0].eval_before_cp, Some(20));
        assert_eq!(a.moves[0].eval_after_cp, Some(20));
        assert_eq!(a.moves[1].eval_before_cp, None);
        assert_eq!(a.moves[2].eval_after_cp, None);
        assert_eq!(a.moves.len(), 3);
        assert_eq!(engine.calls, 2);
        assert!(!budget.has_remaining());
    }

    #[tokio::test]
    async fn test_sampling_skips_odd_plies() {
        let g = game(&[("e4", None), ("e5", None)]);
        let mut engine = ScriptedEngine::new(vec![cp(10, &[]), cp(10, &[])]);
        let mut budget = EvalBudget::new(100);
        let s = WalkSettings {
            sample_every: 2,
            ..settings()
        };

        let a = walk_game(&mut engine, &g, &mut budget, &s).await;
        assert_eq!(a.moves[0].eval_before_cp, None);
        assert_eq!(a.moves[1].eval_before_cp, Some(-10));
        assert_eq!(engine.calls, 2);
    }

    #[tokio::test]
    async fn test_illegal_move_truncates() {
        let g = game(&[("e4", None), ("e5", None), ("Ke3", None), ("Nc6", None)]);
        let mut engine = ScriptedEngine::new(vec![]);
        let mut budget = EvalBudget::new(100);

        let a = walk_game(&mut engine, &g, &mut budget, &settings()).await;
        assert_eq!(a.moves.len(), 2);
        assert_eq!(a.truncated_at, Some(3));
    }

    #[tokio::test]
    async fn test_mate_score_has_no_centipawns() {
        let g = game(&[("e4", None)]);
        let mut engine = ScriptedEngine::new(vec![
            Evaluation::Scored {
                score: Score::Mate(5),
                pv: vec![],
            },
            cp(0, &[]),
        ]);
        let mut budget = EvalBudget::new(100);

        let a = walk_game(&mut engine, &g, &mut budget, &settings()).await;
        assert_eq!(a.moves[0].eval_before_cp, None);
        assert_eq!(a.moves[0].cp_loss, None);
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn test_parse_san_tolerates_suffixes() {
        let pos = Chess::default();
        assert!(parse_san(&pos, "e4!?").is_some());
        assert!(parse_san(&pos, " Nf3 ").is_some());
        assert!(parse_san(&pos, "Ke2").is_none());
        assert!(parse_san(&pos, "hello").is_none());
    }
}
