#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use drill_worker::archive::ArchiveSource;
use drill_worker::engine::{Engine, Evaluation, Score, SearchLimit};
use drill_worker::{Store, WorkerConfig, WorkerError};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Deterministic engine: every position scores 0 for White unless it has an
/// override. The principal line is the first legal move; a side with no legal
/// moves is reported as mated.
pub struct FakeEngine {
    /// White-perspective scores keyed by FEN
    overrides: HashMap<String, i32>,
    pub calls: u32,
}

impl FakeEngine {
    pub fn flat() -> Self {
        Self {
            overrides: HashMap::new(),
            calls: 0,
        }
    }

    /// Score the position reached by `moves` from the start as `white_cp`.
    pub fn with_score_after(mut self, moves: &[&str], white_cp: i32) -> Self {
        self.overrides.insert(fen_after(moves), white_cp);
        self
    }
}

impl Engine for FakeEngine {
    fn name(&self) -> Option<&str> {
        Some("FakeFish 1")
    }

    async fn evaluate(&mut self, fen: &str, _limit: SearchLimit) -> Evaluation {
        self.calls += 1;
        let pos = position(fen);

        let legal = pos.legal_moves();
        let Some(first) = legal.first() else {
            return Evaluation::Scored {
                score: Score::Mate(0),
                pv: vec![],
            };
        };

        let white_cp = self.overrides.get(fen).copied().unwrap_or(0);
        let cp = if pos.turn() == Color::White {
            white_cp
        } else {
            -white_cp
        };

        Evaluation::Scored {
            score: Score::Cp(cp),
            pv: vec![UciMove::from_move(*first, CastlingMode::Standard).to_string()],
        }
    }
}

/// Engine that never answers, like a run without Stockfish.
pub struct NoEngine;

impl Engine for NoEngine {
    fn name(&self) -> Option<&str> {
        None
    }

    async fn evaluate(&mut self, _fen: &str, _limit: SearchLimit) -> Evaluation {
        Evaluation::Unavailable
    }
}

pub fn position(fen: &str) -> Chess {
    fen.parse::<Fen>()
        .expect("valid FEN")
        .into_position(CastlingMode::Standard)
        .expect("legal position")
}

/// FEN after playing `moves` from the initial position.
pub fn fen_after(moves: &[&str]) -> String {
    let mut pos = Chess::default();
    for san in moves {
        let mv = san
            .parse::<SanPlus>()
            .expect("valid SAN")
            .san
            .to_move(&pos)
            .expect("legal move");
        pos.play_unchecked(mv);
    }
    Fen::from_position(&pos, EnPassantMode::Legal).to_string()
}

// ---------------------------------------------------------------------------
// Archives
// ---------------------------------------------------------------------------

/// In-memory archive source keyed by archive name.
pub struct FakeArchive {
    archives: BTreeMap<String, String>,
    fetches: AtomicU32,
}

impl FakeArchive {
    pub fn new(archives: &[(&str, String)]) -> Self {
        Self {
            archives: archives
                .iter()
                .map(|(name, pgn)| (name.to_string(), pgn.clone()))
                .collect(),
            fetches: AtomicU32::new(0),
        }
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ArchiveSource for FakeArchive {
    fn from_api(&self) -> bool {
        true
    }

    async fn list_archives(&self, _user: &str) -> Result<Vec<String>, WorkerError> {
        // reversed so callers must sort
        Ok(self.archives.keys().rev().cloned().collect())
    }

    async fn fetch_games(&self, archive: &str) -> Result<String, WorkerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.archives
            .get(archive)
            .cloned()
            .ok_or_else(|| WorkerError::Fetch(format!("no archive {archive}")))
    }
}

// ---------------------------------------------------------------------------
// PGN
// ---------------------------------------------------------------------------

/// PGN text for one game; each move may carry a remaining-clock annotation.
pub fn pgn(date: &str, white: &str, black: &str, time_control: &str, moves: &[(&str, Option<u32>)]) -> String {
    let mut text = format!(
        "[Event \"Live Chess\"]\n[Site \"Chess.com\"]\n[Date \"{date}\"]\n[White \"{white}\"]\n[Black \"{black}\"]\n[Result \"*\"]\n[UTCDate \"{date}\"]\n[TimeControl \"{time_control}\"]\n[Termination \"test\"]\n\n"
    );

    for (i, (san, clock)) in moves.iter().enumerate() {
        let number = i / 2 + 1;
        if i % 2 == 0 {
            text.push_str(&format!("{number}. {san} "));
        } else {
            text.push_str(&format!("{number}... {san} "));
        }
        if let Some(secs) = clock {
            text.push_str(&format!("{{[%clk {}:{:02}:{:02}]}} ", secs / 3600, secs / 60 % 60, secs % 60));
        }
    }
    text.push_str("*\n\n");
    text
}

/// Moves without clocks.
pub fn plain(moves: &[&'static str]) -> Vec<(&'static str, Option<u32>)> {
    moves.iter().map(|m| (*m, None)).collect()
}

/// 1. e4 e5 2. Bc4 Nc6 3. Qh5 Nf6?? 4. Qxf7#
pub const SCHOLARS_MATE: [&str; 7] = ["e4", "e5", "Bc4", "Nc6", "Qh5", "Nf6", "Qxf7#"];

/// 1. d4 d5 2. c4 e6 3. Nc3 Nf6 4. Bg5 Be7
pub const QUEENS_GAMBIT: [&str; 8] = ["d4", "d5", "c4", "e6", "Nc3", "Nf6", "Bg5", "Be7"];

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub async fn store() -> Store {
    Store::open_in_memory().await.expect("in-memory store")
}

pub fn config() -> WorkerConfig {
    WorkerConfig::default()
}

pub async fn count(store: &Store, sql: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(sql)
        .fetch_one(store.pool())
        .await
        .expect("count query");
    n
}
