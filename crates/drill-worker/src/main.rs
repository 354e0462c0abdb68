//! Drill worker CLI
//!
//! Analyzes a player's recent games with a local Stockfish and serves the
//! resulting drills from the trainer database.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use drill_worker::archive::{ChessComClient, LocalPgnSource};
use drill_worker::db::DEFAULT_DRILL_LIMIT;
use drill_worker::pipeline::LogProgress;
use drill_worker::{
    AnswerVerdict, DrillTier, Engine, EngineAdapter, Store, TrainerContext, UpdateMode, UpdateRequest, WorkerConfig,
};

#[derive(Parser)]
#[command(name = "drill-worker", about = "Turn your own blunders into chess drills")]
struct Cli {
    /// SQLite database path (overrides CHESS_DB_PATH)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, analyze and store a player's recent games
    Update {
        user: String,

        /// Most recent monthly archives to cover (1-6)
        #[arg(long, default_value_t = 2)]
        months: u32,

        /// Search depth (1-15), defaults to ENGINE_DEPTH
        #[arg(long)]
        depth: Option<u32>,

        /// Engine evaluation budget for the run
        #[arg(long)]
        max_positions: Option<u32>,

        /// Re-analyze games that already have stored moves
        #[arg(long)]
        force: bool,

        /// Keep every time control instead of 5+0 only
        #[arg(long)]
        all_time_controls: bool,

        /// Read *.pgn files from this directory instead of Chess.com
        #[arg(long)]
        pgn_dir: Option<PathBuf>,
    },
    /// List drills from the latest run
    Drills {
        /// easy, medium or hard
        #[arg(default_value = "medium")]
        tier: String,

        #[arg(long, default_value_t = DEFAULT_DRILL_LIMIT)]
        limit: u32,
    },
    /// Drill summary and time statistics for the latest run
    Stats,
    /// Solve one random drill from the terminal
    Train {
        #[arg(default_value = "medium")]
        tier: String,

        /// RNG seed for drill selection
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = WorkerConfig::load();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    info!(db_path = %config.db_path, stockfish_path = %config.stockfish_path, "Config loaded");

    let store = Store::open(&config.db_path).await?;

    match cli.command {
        Command::Update {
            user,
            months,
            depth,
            max_positions,
            force,
            all_time_controls,
            pgn_dir,
        } => {
            let mut request = UpdateRequest::new(user, &config);
            request.months = months;
            request.depth = depth.unwrap_or(config.engine_depth);
            request.max_positions = max_positions.unwrap_or(config.max_eval_positions);
            request.mode = if force {
                UpdateMode::Forced
            } else {
                UpdateMode::Incremental
            };
            request.only_5plus0 = !all_time_controls;
            request.validate()?;

            let engine = EngineAdapter::start(&config.stockfish_path).await;
            let mut ctx = TrainerContext::new(engine, store.clone(), config.clone());

            let summary = match pgn_dir {
                Some(dir) => {
                    ctx.update(&LocalPgnSource::new(dir), &request, &mut LogProgress)
                        .await
                }
                None => {
                    let client = ChessComClient::new(&config)?;
                    ctx.update(&client, &request, &mut LogProgress).await
                }
            };

            ctx.into_engine().stop().await;
            let summary = summary?;

            println!(
                "run {}: {} games, {} analyzed, {} skipped, {} truncated, {} moves, {} drills, {} evals",
                summary.run_id,
                summary.games_total,
                summary.games_analyzed,
                summary.games_skipped,
                summary.games_truncated,
                summary.moves,
                summary.drills,
                summary.evals_used
            );
        }
        Command::Drills { tier, limit } => {
            let drills = store.fetch_drills(DrillTier::parse(&tier), limit).await?;
            if drills.is_empty() {
                println!("No '{tier}' drills in the latest run");
            }
            for d in drills {
                println!(
                    "{} sev={} loss={} {} played {} best {} [{}] {}",
                    d.drill_id,
                    d.severity,
                    d.cp_loss.map_or("-".to_string(), |c| c.to_string()),
                    d.phase,
                    d.san_played,
                    d.engine_best_san.as_deref().unwrap_or("-"),
                    d.tags.join(","),
                    d.fen_before
                );
            }
        }
        Command::Stats => {
            let drills = store.drill_stats().await?;
            println!("drills: {}", drills.total);
            println!("avg_cp_loss: {}", fmt_opt(drills.avg_cp_loss, 1.0));
            println!(
                "severe: {}  medium: {}  light: {}",
                drills.severe, drills.medium, drills.light
            );

            if let Some(run_id) = store.latest_run_id().await? {
                let t = config.thresholds;
                let run = store.run_stats(run_id, &t).await?;
                println!("run {run_id}");
                println!("avg_time_per_move: {} sec", fmt_opt(run.avg_time_per_move, 1.0));
                println!("share_long(>{}s): {}%", t.long_think_secs, fmt_opt(run.share_long, 100.0));
                println!("share_fast(<{}s): {}%", t.fast_move_secs, fmt_opt(run.share_fast, 100.0));
                println!("blunder_rate(>={}cp): {}%", t.blunder_cp, fmt_opt(run.blunder_rate, 100.0));
            }
        }
        Command::Train { tier, seed } => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };

            let engine = EngineAdapter::start(&config.stockfish_path).await;
            let mut ctx = TrainerContext::new(engine, store.clone(), config.clone());

            let session = run_drill_session(
                &mut ctx,
                DrillTier::parse(&tier),
                &mut rng,
                &mut io::stdin().lock(),
                &mut io::stdout(),
            )
            .await;

            ctx.into_engine().stop().await;
            session?;
        }
    }

    store.close().await;
    Ok(())
}

/// Serve one drill, read the answer from `input` and report the verdict.
async fn run_drill_session<E, R, W>(
    ctx: &mut TrainerContext<E>,
    tier: DrillTier,
    rng: &mut StdRng,
    input: &mut R,
    out: &mut W,
) -> anyhow::Result<()>
where
    E: Engine,
    R: BufRead,
    W: Write,
{
    let Some(drill) = ctx.next_drill("cli", tier, rng).await? else {
        writeln!(out, "No '{}' drills in the latest run", tier.as_str())?;
        return Ok(());
    };

    writeln!(out, "{}", drill.fen_before)?;
    writeln!(out, "phase: {}  tags: {}", drill.phase, drill.tags.join(", "))?;
    write!(out, "your move: ")?;
    out.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;

    if let Some(verdict) = ctx.answer("cli", &answer).await {
        match (&verdict, verdict.cp_loss()) {
            (AnswerVerdict::Invalid(reason), _) => writeln!(out, "invalid: {reason}")?,
            (_, Some(loss)) => writeln!(out, "{} (loss {loss} cp)", verdict.label())?,
            (_, None) => writeln!(out, "{}", verdict.label())?,
        }
        if verdict.is_valid() && drill.pv_best.len() > 1 {
            let line: Vec<&str> = drill.pv_best.iter().take(5).map(String::as_str).collect();
            writeln!(out, "line: {}", line.join(" "))?;
        }
    }

    Ok(())
}

fn fmt_opt(value: Option<f64>, scale: f64) -> String {
    value.map_or("n/a".to_string(), |v| format!("{:.1}", v * scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that refuses every write.
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    async fn context() -> TrainerContext<EngineAdapter> {
        let store = Store::open_in_memory().await.unwrap();
        TrainerContext::new(EngineAdapter::unavailable(), store, WorkerConfig::default())
    }

    #[tokio::test]
    async fn test_session_without_drills() {
        let mut ctx = context().await;
        let mut rng = StdRng::seed_from_u64(3);
        let mut out = Vec::new();

        run_drill_session(&mut ctx, DrillTier::Hard, &mut rng, &mut io::empty(), &mut out)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "No 'hard' drills in the latest run\n");
    }

    #[tokio::test]
    async fn test_session_error_returns_context_to_caller() {
        let mut ctx = context().await;
        let mut rng = StdRng::seed_from_u64(3);

        let result =
            run_drill_session(&mut ctx, DrillTier::Easy, &mut rng, &mut io::empty(), &mut BrokenPipe).await;
        assert!(result.is_err());

        // the caller still owns the engine and can shut it down
        let mut engine = ctx.into_engine();
        engine.stop().await;
        assert!(!engine.is_available());
    }
}
