//! Worker configuration from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::SearchLimit;

/// Default location of the trainer database.
pub const DEFAULT_DB_PATH: &str = "trainer_output.sqlite";

/// Classification thresholds shared by the walker and the classifier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Loss at or above this is a blunder
    pub blunder_cp: i32,
    /// Loss at or above this is a severe blunder
    pub severe_blunder_cp: i32,
    /// Time spent strictly above this is a long think
    pub long_think_secs: u32,
    /// Time spent strictly below this counts as a fast move in run stats
    pub fast_move_secs: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            blunder_cp: 150,
            severe_blunder_cp: 300,
            long_think_secs: 20,
            fast_move_secs: 5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// SQLite database file
    pub db_path: String,

    /// Path to Stockfish binary
    pub stockfish_path: String,

    /// Search depth used when no movetime is configured
    pub engine_depth: u32,

    /// Seconds per position; > 0 overrides depth
    pub engine_movetime: f64,

    /// Engine evaluations allowed per run
    pub max_eval_positions: u32,

    /// Evaluate every Nth ply only
    pub sample_every: u32,

    pub thresholds: Thresholds,

    /// Retries per archive request after the first attempt
    pub http_max_retries: u32,

    /// Base backoff between attempts, doubled each retry
    pub http_backoff_secs: f64,

    pub http_user_agent: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            stockfish_path: "/usr/local/bin/stockfish".to_string(),
            engine_depth: 10,
            engine_movetime: 0.0,
            max_eval_positions: 2500,
            sample_every: 1,
            thresholds: Thresholds::default(),
            http_max_retries: 5,
            http_backoff_secs: 1.0,
            http_user_agent: "chess-drill-trainer/0.1 (+https://www.chess.com/)".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn load() -> Self {
        let defaults = Self::default();

        let thresholds = Thresholds {
            blunder_cp: env_or("BLUNDER_CP", defaults.thresholds.blunder_cp),
            severe_blunder_cp: env_or("SEVERE_BLUNDER_CP", defaults.thresholds.severe_blunder_cp),
            long_think_secs: env_or("LONG_THINK_SEC", defaults.thresholds.long_think_secs),
            fast_move_secs: env_or("FAST_MOVE_SEC", defaults.thresholds.fast_move_secs),
        };

        Self {
            db_path: env::var("CHESS_DB_PATH").unwrap_or(defaults.db_path),
            stockfish_path: env::var("STOCKFISH_PATH").unwrap_or(defaults.stockfish_path),
            engine_depth: env_or("ENGINE_DEPTH", defaults.engine_depth),
            engine_movetime: env_or("ENGINE_MOVETIME", defaults.engine_movetime),
            max_eval_positions: env_or("MAX_EVAL_POSITIONS", defaults.max_eval_positions),
            sample_every: env_or("SAMPLE_EVERY", defaults.sample_every).max(1),
            thresholds,
            http_max_retries: env_or("HTTP_MAX_RETRIES", defaults.http_max_retries).max(1),
            http_backoff_secs: env_or("HTTP_BACKOFF_SECS", defaults.http_backoff_secs),
            http_user_agent: env::var("HTTP_USER_AGENT").unwrap_or(defaults.http_user_agent),
        }
    }

    /// Search limit for a given depth: movetime wins when configured.
    pub fn search_limit(&self, depth: u32) -> SearchLimit {
        if self.engine_movetime > 0.0 {
            SearchLimit::MoveTime(Duration::from_secs_f64(self.engine_movetime))
        } else {
            SearchLimit::Depth(depth)
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
