//! Trainer context: serves drills to users and grades their answers.

use std::collections::{HashMap, VecDeque};

use rand::seq::SliceRandom;
use rand::Rng;
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, Position};
use tracing::{debug, info};

use crate::archive::ArchiveSource;
use crate::config::WorkerConfig;
use crate::db::{DrillRow, DrillTier, Store, DEFAULT_DRILL_LIMIT};
use crate::engine::{Engine, Evaluation, SearchLimit};
use crate::error::WorkerError;
use crate::pipeline::{run_update, ProgressSink, UpdateRequest, UpdateSummary};
use crate::walker::{fen_of, parse_san};

/// Search depth used to grade answers
pub const GRADE_DEPTH: u32 = 15;
/// Loss up to this is a good answer
const GOOD_CP_LOSS: i32 = 50;
/// Loss up to this is still acceptable
const ACCEPTABLE_CP_LOSS: i32 = 100;
/// Users with an open drill before the oldest is evicted
pub const DEFAULT_PENDING_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerVerdict {
    /// Matched the engine's best move
    Best,
    Good { cp_loss: i32 },
    Acceptable { cp_loss: i32 },
    Poor { cp_loss: i32 },
    /// Legal, but the engine gave no score
    Unknown,
    /// Not gradable; nothing is recorded
    Invalid(String),
}

impl AnswerVerdict {
    pub fn is_valid(&self) -> bool {
        !matches!(self, AnswerVerdict::Invalid(_))
    }

    pub fn cp_loss(&self) -> Option<i32> {
        match self {
            AnswerVerdict::Best => Some(0),
            AnswerVerdict::Good { cp_loss }
            | AnswerVerdict::Acceptable { cp_loss }
            | AnswerVerdict::Poor { cp_loss } => Some(*cp_loss),
            AnswerVerdict::Unknown | AnswerVerdict::Invalid(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnswerVerdict::Best => "best",
            AnswerVerdict::Good { .. } => "good",
            AnswerVerdict::Acceptable { .. } => "acceptable",
            AnswerVerdict::Poor { .. } => "poor",
            AnswerVerdict::Unknown => "unknown",
            AnswerVerdict::Invalid(_) => "invalid",
        }
    }

    fn from_loss(cp_loss: i32) -> Self {
        if cp_loss <= GOOD_CP_LOSS {
            AnswerVerdict::Good { cp_loss }
        } else if cp_loss <= ACCEPTABLE_CP_LOSS {
            AnswerVerdict::Acceptable { cp_loss }
        } else {
            AnswerVerdict::Poor { cp_loss }
        }
    }
}

/// Open drill per user, bounded; the least recently assigned is evicted first.
#[derive(Debug)]
pub struct PendingDrills {
    capacity: usize,
    drills: HashMap<String, DrillRow>,
    order: VecDeque<String>,
}

impl PendingDrills {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            drills: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, user: &str, drill: DrillRow) {
        if self.drills.insert(user.to_string(), drill).is_some() {
            self.order.retain(|u| u != user);
        }
        self.order.push_back(user.to_string());

        while self.drills.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.drills.remove(&oldest);
            debug!(user = %oldest, "Evicted pending drill");
        }
    }

    pub fn get(&self, user: &str) -> Option<&DrillRow> {
        self.drills.get(user)
    }

    pub fn remove(&mut self, user: &str) -> Option<DrillRow> {
        let drill = self.drills.remove(user)?;
        self.order.retain(|u| u != user);
        Some(drill)
    }

    pub fn len(&self) -> usize {
        self.drills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drills.is_empty()
    }
}

/// Uniform pick from a page of drills.
pub fn pick_drill<'a, R: Rng + ?Sized>(drills: &'a [DrillRow], rng: &mut R) -> Option<&'a DrillRow> {
    drills.choose(rng)
}

/// Owns the engine handle, the store and the per-user drill sessions.
pub struct TrainerContext<E: Engine> {
    engine: E,
    store: Store,
    config: WorkerConfig,
    pending: PendingDrills,
}

impl<E: Engine> TrainerContext<E> {
    pub fn new(engine: E, store: Store, config: WorkerConfig) -> Self {
        Self {
            engine,
            store,
            config,
            pending: PendingDrills::new(DEFAULT_PENDING_CAPACITY),
        }
    }

    pub fn with_pending_capacity(mut self, capacity: usize) -> Self {
        self.pending = PendingDrills::new(capacity);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn pending(&self) -> &PendingDrills {
        &self.pending
    }

    /// Hand back the engine so the caller can shut it down.
    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Run an update with this context's engine and store.
    pub async fn update<S: ArchiveSource>(
        &mut self,
        source: &S,
        request: &UpdateRequest,
        progress: &mut dyn ProgressSink,
    ) -> Result<UpdateSummary, WorkerError> {
        run_update(&self.store, &mut self.engine, source, &self.config, request, progress).await
    }

    /// Pick a drill of the tier for `user` and remember it as their open drill.
    pub async fn next_drill<R: Rng + ?Sized>(
        &mut self,
        user: &str,
        tier: DrillTier,
        rng: &mut R,
    ) -> Result<Option<DrillRow>, WorkerError> {
        let drills = self.store.fetch_drills(tier, DEFAULT_DRILL_LIMIT).await?;
        let Some(drill) = pick_drill(&drills, rng).cloned() else {
            return Ok(None);
        };

        info!(user, drill_id = %drill.drill_id, severity = drill.severity, "Drill assigned");
        self.pending.insert(user, drill.clone());
        Ok(Some(drill))
    }

    /// Grade `move_text` against the user's open drill.
    ///
    /// `None` when the user has no open drill. The drill is closed only when
    /// the answer was gradable.
    pub async fn answer(&mut self, user: &str, move_text: &str) -> Option<AnswerVerdict> {
        let drill = self.pending.get(user)?.clone();
        let best = drill.engine_best_san.as_deref().unwrap_or("");

        let verdict = self.grade_answer(&drill.fen_before, move_text, best).await;
        if verdict.is_valid() {
            self.pending.remove(user);
        }
        info!(user, drill_id = %drill.drill_id, verdict = verdict.label(), "Answer graded");
        Some(verdict)
    }

    /// Grade a move played from `fen`. Loss is the absolute White-perspective
    /// swing; mate scores count as zero.
    pub async fn grade_answer(&mut self, fen: &str, move_text: &str, best_san: &str) -> AnswerVerdict {
        if !self.engine.is_available() {
            return AnswerVerdict::Invalid("engine not available".into());
        }

        let Some(pos) = position_from_fen(fen) else {
            return AnswerVerdict::Invalid(format!("invalid position: {fen}"));
        };

        let answer = move_text.trim();
        if !best_san.trim().is_empty() && answer == best_san.trim() {
            return AnswerVerdict::Best;
        }

        let Some(mv) = parse_san(&pos, answer) else {
            return AnswerVerdict::Invalid(format!("invalid move: {answer}"));
        };

        let limit = SearchLimit::Depth(GRADE_DEPTH);
        let white_to_move = pos.turn() == Color::White;

        let before = self.engine.evaluate(fen, limit).await;
        let mut after_pos = pos.clone();
        after_pos.play_unchecked(mv);
        let after = self.engine.evaluate(&fen_of(&after_pos), limit).await;

        match (&before, &after) {
            (Evaluation::Scored { .. }, Evaluation::Scored { .. }) => {
                let cp_before = before.white_cp(white_to_move).unwrap_or(0);
                let cp_after = after.white_cp(!white_to_move).unwrap_or(0);
                AnswerVerdict::from_loss((cp_before - cp_after).abs())
            }
            _ => AnswerVerdict::Unknown,
        }
    }
}

fn position_from_fen(fen: &str) -> Option<Chess> {
    fen.trim()
        .parse::<Fen>()
        .ok()?
        .into_position(CastlingMode::Standard)
        .ok()
}
