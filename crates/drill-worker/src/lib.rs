//! Game analysis and drill extraction for chess training.

pub mod archive;
pub mod classify;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod stockfish;
pub mod trainer;
pub mod walker;

pub use config::{Thresholds, WorkerConfig};
pub use db::{DrillRow, DrillTier, Store};
pub use engine::{Engine, EngineAdapter, Evaluation, Score, SearchLimit};
pub use error::WorkerError;
pub use pipeline::{run_update, ProgressSink, UpdateMode, UpdateRequest, UpdateSummary};
pub use trainer::{AnswerVerdict, TrainerContext};
