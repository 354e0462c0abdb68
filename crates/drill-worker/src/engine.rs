//! Engine seam: the `Engine` trait, its result types, and the Stockfish-backed
//! adapter used by real runs.
//!
//! Callers hold the engine by `&mut`, so at most one request is in flight.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::stockfish::StockfishEngine;

/// Locations tried when the configured binary does not exist.
pub const FALLBACK_ENGINE_PATHS: [&str; 3] = [
    "/usr/bin/stockfish",
    "/usr/games/stockfish",
    "/usr/local/bin/stockfish",
];

/// How long the engine may search one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchLimit {
    Depth(u32),
    MoveTime(Duration),
}

impl SearchLimit {
    /// Depth stored on the run, when the limit is depth-based.
    pub fn depth(self) -> Option<u32> {
        match self {
            SearchLimit::Depth(d) => Some(d),
            SearchLimit::MoveTime(_) => None,
        }
    }
}

/// Engine score from the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

impl Score {
    /// Centipawns from White's perspective. Mate scores have no centipawn value.
    pub fn white_cp(self, white_to_move: bool) -> Option<i32> {
        match self {
            Score::Cp(cp) if white_to_move => Some(cp),
            Score::Cp(cp) => Some(-cp),
            Score::Mate(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Score plus principal line in UCI notation
    Scored { score: Score, pv: Vec<String> },
    Unavailable,
}

impl Evaluation {
    pub fn is_scored(&self) -> bool {
        matches!(self, Evaluation::Scored { .. })
    }

    pub fn white_cp(&self, white_to_move: bool) -> Option<i32> {
        match self {
            Evaluation::Scored { score, .. } => score.white_cp(white_to_move),
            Evaluation::Unavailable => None,
        }
    }

    pub fn pv(&self) -> &[String] {
        match self {
            Evaluation::Scored { pv, .. } => pv,
            Evaluation::Unavailable => &[],
        }
    }
}

/// Position evaluator. Implementations never fail; problems degrade to
/// [`Evaluation::Unavailable`].
pub trait Engine: Send {
    /// Name recorded on the run, `None` when no engine is running.
    fn name(&self) -> Option<&str>;

    fn is_available(&self) -> bool {
        self.name().is_some()
    }

    fn evaluate(
        &mut self,
        fen: &str,
        limit: SearchLimit,
    ) -> impl Future<Output = Evaluation> + Send;
}

/// Configured path if it exists, else the first existing fallback.
pub fn resolve_engine_path(configured: &str) -> Option<String> {
    std::iter::once(configured)
        .chain(FALLBACK_ENGINE_PATHS)
        .find(|p| !p.is_empty() && Path::new(p).exists())
        .map(str::to_string)
}

/// One Stockfish process for the lifetime of a run.
///
/// Once the process fails to start or breaks mid-request the adapter stays
/// unavailable; the UCI stream cannot be resynchronised.
#[derive(Default)]
pub struct EngineAdapter {
    engine: Option<StockfishEngine>,
}

impl EngineAdapter {
    /// Start the engine, or return an unavailable adapter if that fails.
    pub async fn start(configured_path: &str) -> Self {
        let Some(path) = resolve_engine_path(configured_path) else {
            warn!(path = configured_path, "Stockfish binary not found, running without engine");
            return Self::unavailable();
        };

        match StockfishEngine::new(&path).await {
            Ok(engine) => {
                info!(path = %path, name = engine.name(), "Stockfish ready");
                Self {
                    engine: Some(engine),
                }
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Stockfish failed to start, running without engine");
                Self::unavailable()
            }
        }
    }

    pub fn unavailable() -> Self {
        Self { engine: None }
    }

    /// Quit the engine process. Dropping the adapter also kills it.
    pub async fn stop(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.quit().await;
        }
    }
}

impl Engine for EngineAdapter {
    fn name(&self) -> Option<&str> {
        self.engine.as_ref().map(StockfishEngine::name)
    }

    async fn evaluate(&mut self, fen: &str, limit: SearchLimit) -> Evaluation {
        let Some(engine) = self.engine.as_mut() else {
            return Evaluation::Unavailable;
        };

        match engine.evaluate(fen, limit).await {
            Ok(result) => match result.score {
                Some(score) => Evaluation::Scored {
                    score,
                    pv: result.pv,
                },
                None => Evaluation::Unavailable,
            },
            Err(e) => {
                warn!(error = %e, fen, "Stockfish request failed, disabling engine for this run");
                self.engine = None;
                Evaluation::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_white_cp_normalisation() {
        assert_eq!(Score::Cp(50).white_cp(true), Some(50));
        assert_eq!(Score::Cp(50).white_cp(false), Some(-50));
        assert_eq!(Score::Mate(2).white_cp(true), None);
        assert_eq!(Score::Mate(-1).white_cp(false), None);
    }

    #[test]
    fn test_evaluation_accessors() {
        let eval = Evaluation::Scored {
            score: Score::Cp(-30),
            pv: vec!["e7e5".into()],
        };
        assert!(eval.is_scored());
        assert_eq!(eval.white_cp(false), Some(30));
        assert_eq!(eval.pv(), ["e7e5".to_string()]);

        assert!(!Evaluation::Unavailable.is_scored());
        assert_eq!(Evaluation::Unavailable.white_cp(true), None);
        assert!(Evaluation::Unavailable.pv().is_empty());
    }

    #[test]
    fn test_resolve_engine_path_missing() {
        let resolved = resolve_engine_path("/definitely/not/here/stockfish");
        // only a fallback that actually exists may be returned
        if let Some(path) = resolved {
            assert!(FALLBACK_ENGINE_PATHS.contains(&path.as_str()));
        }
    }

    #[tokio::test]
    async fn test_unavailable_adapter() {
        let mut adapter = EngineAdapter::unavailable();
        assert!(!adapter.is_available());
        assert_eq!(adapter.name(), None);
        let eval = adapter
            .evaluate("8/8/8/8/8/8/8/K6k w - - 0 1", SearchLimit::Depth(1))
            .await;
        assert_eq!(eval, Evaluation::Unavailable);
        adapter.stop().await;
    }
}
