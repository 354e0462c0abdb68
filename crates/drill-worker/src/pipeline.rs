//! Update pipeline: one run over a player's recent archives.
//!
//! Every invocation starts by recording a run. Games already in the move
//! ledger are skipped in incremental mode; forced mode re-walks everything
//! under the new run id and leaves older rows alone.

use chess_core::{parse_games, ParsedGame};
use tracing::{info, warn};

use crate::archive::ArchiveSource;
use crate::config::WorkerConfig;
use crate::db::{RunMeta, Store};
use crate::engine::Engine;
use crate::error::WorkerError;
use crate::walker::{walk_game, EvalBudget, WalkSettings};

/// Most recent months a single update may cover
pub const MAX_MONTHS: u32 = 6;
/// Deepest search an update may request
pub const MAX_DEPTH: u32 = 15;
/// Games between progress messages
const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Skip games that already have moves stored by any run
    Incremental,
    /// Re-walk every fetched game
    Forced,
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub user: String,
    pub months: u32,
    pub depth: u32,
    pub max_positions: u32,
    pub mode: UpdateMode,
    pub only_5plus0: bool,
}

impl UpdateRequest {
    /// Incremental, 5+0 only, last two months, depth and budget from config.
    pub fn new(user: impl Into<String>, config: &WorkerConfig) -> Self {
        Self {
            user: user.into(),
            months: 2,
            depth: config.engine_depth,
            max_positions: config.max_eval_positions,
            mode: UpdateMode::Incremental,
            only_5plus0: true,
        }
    }

    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.user.trim().is_empty() {
            return Err(WorkerError::InvalidRequest("user must not be empty".into()));
        }
        if !(1..=MAX_MONTHS).contains(&self.months) {
            return Err(WorkerError::InvalidRequest(format!(
                "months must be between 1 and {MAX_MONTHS}, got {}",
                self.months
            )));
        }
        if !(1..=MAX_DEPTH).contains(&self.depth) {
            return Err(WorkerError::InvalidRequest(format!(
                "depth must be between 1 and {MAX_DEPTH}, got {}",
                self.depth
            )));
        }
        Ok(())
    }
}

/// One-way progress notifications for a running update.
pub trait ProgressSink: Send {
    fn report(&mut self, message: &str);
}

/// Discards progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _message: &str) {}
}

/// Forwards progress to the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, message: &str) {
        info!(progress = message);
    }
}

impl ProgressSink for Vec<String> {
    fn report(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub run_id: i64,
    pub games_total: usize,
    pub games_analyzed: usize,
    pub games_skipped: usize,
    /// Games whose walk stopped at an unplayable move
    pub games_truncated: usize,
    pub moves: usize,
    pub drills: usize,
    pub evals_used: u32,
}

/// Fetch, walk and persist a player's recent games under a new run.
pub async fn run_update<E, S>(
    store: &Store,
    engine: &mut E,
    source: &S,
    config: &WorkerConfig,
    request: &UpdateRequest,
    progress: &mut dyn ProgressSink,
) -> Result<UpdateSummary, WorkerError>
where
    E: Engine,
    S: ArchiveSource,
{
    request.validate()?;

    let settings = WalkSettings {
        limit: config.search_limit(request.depth),
        sample_every: config.sample_every,
        thresholds: config.thresholds,
    };

    let run_id = store
        .create_run(&RunMeta {
            user: request.user.clone(),
            engine_name: engine.name().map(str::to_string),
            depth: settings.limit.depth(),
            max_positions: request.max_positions,
            from_api: source.from_api(),
            months: request.months,
            only_5plus0: request.only_5plus0,
        })
        .await?;

    info!(run_id, user = %request.user, mode = ?request.mode, "Update started");
    let mut summary = UpdateSummary {
        run_id,
        ..UpdateSummary::default()
    };

    let games = collect_games(source, request, progress).await?;
    summary.games_total = games.len();
    if games.is_empty() {
        info!(run_id, "No games to analyze");
        progress.report("No games found for the requested period");
        return Ok(summary);
    }

    progress.report(&format!("Analyzing {} games...", games.len()));
    let mut budget = EvalBudget::new(request.max_positions);

    for (idx, game) in games.iter().enumerate() {
        if idx % PROGRESS_EVERY == 0 {
            progress.report(&format!(
                "Game {}/{} (new: {}, skipped: {})",
                idx + 1,
                games.len(),
                summary.games_analyzed,
                summary.games_skipped
            ));
        }

        let game_id = game.game_id();

        if request.mode == UpdateMode::Incremental && store.has_moves_for_game(&game_id).await? {
            store.upsert_game(&game_id, &game.headers).await?;
            summary.games_skipped += 1;
            continue;
        }

        let analysis = walk_game(engine, game, &mut budget, &settings).await;
        if let Some(ply) = analysis.truncated_at {
            warn!(run_id, game_id = %game_id, ply, "Game truncated at unplayable move");
            summary.games_truncated += 1;
        }

        store.save_game_analysis(run_id, &game.headers, &analysis).await?;

        summary.games_analyzed += 1;
        summary.moves += analysis.moves.len();
        summary.drills += analysis.drills.len();
    }

    summary.evals_used = budget.used();
    info!(
        run_id,
        games = summary.games_total,
        analyzed = summary.games_analyzed,
        skipped = summary.games_skipped,
        drills = summary.drills,
        evals_used = summary.evals_used,
        "Update complete"
    );
    progress.report(&format!(
        "Done: {} analyzed, {} skipped, {} drills",
        summary.games_analyzed, summary.games_skipped, summary.drills
    ));

    Ok(summary)
}

/// Latest `months` archives, parsed and filtered.
async fn collect_games<S: ArchiveSource>(
    source: &S,
    request: &UpdateRequest,
    progress: &mut dyn ProgressSink,
) -> Result<Vec<ParsedGame>, WorkerError> {
    progress.report("Fetching archive list...");
    let mut archives = source.list_archives(&request.user).await?;
    archives.sort();
    let keep_from = archives.len().saturating_sub(request.months as usize);
    let archives = &archives[keep_from..];

    let mut games = Vec::new();
    for (i, archive) in archives.iter().enumerate() {
        progress.report(&format!("Downloading archive {}/{}...", i + 1, archives.len()));
        let pgn = source.fetch_games(archive).await?;
        let parsed = parse_games(&pgn);
        let before = parsed.len();

        games.extend(
            parsed
                .into_iter()
                .filter(|g| !request.only_5plus0 || g.headers.is_five_plus_zero()),
        );
        info!(archive = %archive, parsed = before, total = games.len(), "Archive loaded");
    }

    Ok(games)
}
