//! SQLite store for runs, games, the move ledger and drills

use std::str::FromStr;
use std::time::Duration;

use chess_core::GameHeaders;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use tracing::debug;

use crate::classify;
use crate::config::Thresholds;
use crate::error::WorkerError;
use crate::walker::{side_code, DrillRecord, GameAnalysis, MoveRecord};

/// Page size for drill queries
pub const DEFAULT_DRILL_LIMIT: u32 = 20;

/// Metadata recorded once per pipeline invocation
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub user: String,
    pub engine_name: Option<String>,
    pub depth: Option<u32>,
    pub max_positions: u32,
    /// true for the network archive source, false for local PGN files
    pub from_api: bool,
    pub months: u32,
    pub only_5plus0: bool,
}

/// Drill difficulty tier requested by a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrillTier {
    Easy,
    Medium,
    Hard,
}

impl DrillTier {
    /// Unknown names fall back to `Medium`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "easy" => DrillTier::Easy,
            "hard" => DrillTier::Hard,
            _ => DrillTier::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DrillTier::Easy => "easy",
            DrillTier::Medium => "medium",
            DrillTier::Hard => "hard",
        }
    }

    pub fn min_severity(self) -> i64 {
        match self {
            DrillTier::Easy => 1,
            DrillTier::Medium => 2,
            DrillTier::Hard => 3,
        }
    }
}

/// A drill as served to the trainer
#[derive(Debug, Clone, PartialEq)]
pub struct DrillRow {
    pub drill_id: String,
    pub fen_before: String,
    pub engine_best_san: Option<String>,
    pub pv_best: Vec<String>,
    pub san_played: String,
    pub tags: Vec<String>,
    pub difficulty: String,
    pub cp_loss: Option<i64>,
    pub severity: i64,
    pub phase: String,
}

/// Drill summary for the latest run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrillStats {
    pub total: i64,
    pub avg_cp_loss: Option<f64>,
    pub severe: i64,
    pub medium: i64,
    pub light: i64,
}

/// Time and accuracy summary over one run's move ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub avg_time_per_move: Option<f64>,
    pub share_long: Option<f64>,
    pub share_fast: Option<f64>,
    pub blunder_rate: Option<f64>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database file and apply the schema.
    pub async fn open(path: &str) -> Result<Self, WorkerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database; one connection kept alive for its lifetime.
    pub async fn open_in_memory() -> Result<Self, WorkerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), WorkerError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert the run row and return its id.
    pub async fn create_run(&self, meta: &RunMeta) -> Result<i64, WorkerError> {
        let result = sqlx::query(
            "INSERT INTO run_meta(generated_at, user, engine_name, depth, max_positions, from_api, months, only_5plus0)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(utc_timestamp())
        .bind(&meta.user)
        .bind(&meta.engine_name)
        .bind(meta.depth)
        .bind(meta.max_positions)
        .bind(meta.from_api)
        .bind(meta.months)
        .bind(meta.only_5plus0)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn latest_run_id(&self) -> Result<Option<i64>, WorkerError> {
        let (id,): (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM run_meta")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Insert the game if absent; existing rows are left untouched.
    pub async fn upsert_game(&self, game_id: &str, headers: &GameHeaders) -> Result<(), WorkerError> {
        let mut conn = self.pool.acquire().await?;
        insert_game(&mut conn, game_id, headers).await
    }

    /// True when any run has stored moves for this game.
    pub async fn has_moves_for_game(&self, game_id: &str) -> Result<bool, WorkerError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM moves WHERE game_id = ?")
            .bind(game_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Persist one walked game atomically: game row, its moves, its drills.
    pub async fn save_game_analysis(
        &self,
        run_id: i64,
        headers: &GameHeaders,
        analysis: &GameAnalysis,
    ) -> Result<(), WorkerError> {
        let mut tx = self.pool.begin().await?;

        insert_game(&mut tx, &analysis.game_id, headers).await?;
        for record in &analysis.moves {
            insert_move(&mut tx, run_id, &analysis.game_id, record).await?;
        }
        for drill in &analysis.drills {
            upsert_drill(&mut tx, run_id, &analysis.game_id, drill).await?;
        }

        tx.commit().await?;

        debug!(
            run_id,
            game_id = %analysis.game_id,
            moves = analysis.moves.len(),
            drills = analysis.drills.len(),
            "Saved game analysis"
        );
        Ok(())
    }

    /// Insert or replace a single drill by identity.
    pub async fn upsert_drill(&self, run_id: i64, game_id: &str, drill: &DrillRecord) -> Result<(), WorkerError> {
        let mut conn = self.pool.acquire().await?;
        upsert_drill(&mut conn, run_id, game_id, drill).await
    }

    /// Drills of the latest run at or above the tier's severity, worst first.
    pub async fn fetch_drills(&self, tier: DrillTier, limit: u32) -> Result<Vec<DrillRow>, WorkerError> {
        type Row = (
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<i64>,
            Option<i64>,
            Option<String>,
        );

        let rows: Vec<Row> = sqlx::query_as(
            "SELECT drill_id, fen_before, engine_best_san, pv_best, san_played,
                    tags, difficulty, cp_loss, severity, phase
             FROM drills
             WHERE run_id = (SELECT MAX(id) FROM run_meta)
               AND severity >= ?
               AND engine_best_san IS NOT NULL
             ORDER BY severity DESC, cp_loss DESC
             LIMIT ?",
        )
        .bind(tier.min_severity())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(drill_id, fen, best, pv, played, tags, difficulty, cp_loss, severity, phase)| DrillRow {
                    drill_id,
                    fen_before: fen.unwrap_or_default(),
                    engine_best_san: best,
                    pv_best: pv
                        .and_then(|p| serde_json::from_str(&p).ok())
                        .unwrap_or_default(),
                    san_played: played.unwrap_or_default(),
                    tags: tags
                        .unwrap_or_default()
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from)
                        .collect(),
                    difficulty: difficulty.unwrap_or_default(),
                    cp_loss,
                    severity: severity.unwrap_or_default(),
                    phase: phase.unwrap_or_default(),
                },
            )
            .collect())
    }

    pub async fn drill_stats(&self) -> Result<DrillStats, WorkerError> {
        let (total, avg_cp_loss, severe, medium, light): (i64, Option<f64>, i64, i64, i64) =
            sqlx::query_as(
                "SELECT COUNT(*),
                        AVG(cp_loss),
                        COUNT(CASE WHEN severity >= 3 THEN 1 END),
                        COUNT(CASE WHEN severity = 2 THEN 1 END),
                        COUNT(CASE WHEN severity = 1 THEN 1 END)
                 FROM drills
                 WHERE run_id = (SELECT MAX(id) FROM run_meta)",
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(DrillStats {
            total,
            avg_cp_loss,
            severe,
            medium,
            light,
        })
    }

    pub async fn run_stats(&self, run_id: i64, thresholds: &Thresholds) -> Result<RunStats, WorkerError> {
        let (avg_time_per_move, share_long, share_fast): (Option<f64>, Option<f64>, Option<f64>) =
            sqlx::query_as(
                "SELECT AVG(time_spent_sec),
                        AVG(CASE WHEN time_spent_sec > ? THEN 1.0 ELSE 0.0 END),
                        AVG(CASE WHEN time_spent_sec < ? THEN 1.0 ELSE 0.0 END)
                 FROM moves
                 WHERE run_id = ? AND time_spent_sec IS NOT NULL",
            )
            .bind(thresholds.long_think_secs)
            .bind(thresholds.fast_move_secs)
            .bind(run_id)
            .fetch_one(&self.pool)
            .await?;

        let (blunder_rate,): (Option<f64>,) = sqlx::query_as(
            "SELECT AVG(CASE WHEN cp_loss >= ? THEN 1.0 ELSE 0.0 END)
             FROM moves
             WHERE run_id = ? AND cp_loss IS NOT NULL",
        )
        .bind(thresholds.blunder_cp)
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(RunStats {
            avg_time_per_move,
            share_long,
            share_fast,
            blunder_rate,
        })
    }

    pub async fn count_moves(&self, run_id: i64) -> Result<i64, WorkerError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM moves WHERE run_id = ?")
            .bind(run_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_drills(&self, run_id: i64) -> Result<i64, WorkerError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM drills WHERE run_id = ?")
            .bind(run_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_games(&self) -> Result<i64, WorkerError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM games")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn insert_game(
    conn: &mut SqliteConnection,
    game_id: &str,
    headers: &GameHeaders,
) -> Result<(), WorkerError> {
    sqlx::query(
        "INSERT OR IGNORE INTO games(game_id, date_utc, white, black, time_control, result, termination)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(game_id)
    .bind(headers.identity_date())
    .bind(&headers.white)
    .bind(&headers.black)
    .bind(&headers.time_control)
    .bind(&headers.result)
    .bind(&headers.termination)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_move(
    conn: &mut SqliteConnection,
    run_id: i64,
    game_id: &str,
    m: &MoveRecord,
) -> Result<(), WorkerError> {
    sqlx::query(
        "INSERT INTO moves(run_id, game_id, ply, side, phase, san, fen_before,
                           clock_after_sec, time_spent_sec, eval_before_cp, eval_after_cp, cp_loss,
                           is_check, is_capture, is_pawn_push, is_promotion, is_castle)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(run_id)
    .bind(game_id)
    .bind(m.ply)
    .bind(side_code(m.side))
    .bind(m.phase.as_str())
    .bind(&m.san)
    .bind(&m.fen_before)
    .bind(m.clock_after_sec)
    .bind(m.time_spent_sec)
    .bind(m.eval_before_cp)
    .bind(m.eval_after_cp)
    .bind(m.cp_loss)
    .bind(m.flags.is_check)
    .bind(m.flags.is_capture)
    .bind(m.flags.is_pawn_push)
    .bind(m.flags.is_promotion)
    .bind(m.flags.is_castle)
    .execute(conn)
    .await?;
    Ok(())
}

async fn upsert_drill(
    conn: &mut SqliteConnection,
    run_id: i64,
    game_id: &str,
    d: &DrillRecord,
) -> Result<(), WorkerError> {
    sqlx::query(
        "INSERT OR REPLACE INTO drills(
             drill_id, run_id, game_id, ply, side, phase, san_played, fen_before,
             time_spent_sec, clock_after_sec, cp_loss, engine_best_san,
             eval_before_cp, eval_after_cp, pv_best, severity, tags, difficulty, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&d.drill_id)
    .bind(run_id)
    .bind(game_id)
    .bind(d.ply)
    .bind(side_code(d.side))
    .bind(d.phase.as_str())
    .bind(&d.san_played)
    .bind(&d.fen_before)
    .bind(d.time_spent_sec)
    .bind(d.clock_after_sec)
    .bind(d.cp_loss)
    .bind(&d.engine_best_san)
    .bind(d.eval_before_cp)
    .bind(d.eval_after_cp)
    .bind(classify::pv_json(&d.pv_best))
    .bind(d.severity)
    .bind(classify::join_tags(&d.tags))
    .bind(d.difficulty.as_str())
    .bind(utc_timestamp())
    .execute(conn)
    .await?;
    Ok(())
}

fn utc_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS run_meta (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  generated_at TEXT NOT NULL,
  user TEXT NOT NULL,
  engine_name TEXT,
  depth INTEGER,
  max_positions INTEGER,
  from_api INTEGER,
  months INTEGER,
  only_5plus0 INTEGER
);

CREATE TABLE IF NOT EXISTS games (
  game_id TEXT PRIMARY KEY,
  date_utc TEXT,
  white TEXT,
  black TEXT,
  time_control TEXT,
  result TEXT,
  termination TEXT
);

CREATE TABLE IF NOT EXISTS moves (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL,
  game_id TEXT NOT NULL,
  ply INTEGER,
  side TEXT,
  phase TEXT,
  san TEXT,
  fen_before TEXT,
  clock_after_sec INTEGER,
  time_spent_sec INTEGER,
  eval_before_cp INTEGER,
  eval_after_cp INTEGER,
  cp_loss INTEGER,
  is_check INTEGER,
  is_capture INTEGER,
  is_pawn_push INTEGER,
  is_promotion INTEGER,
  is_castle INTEGER,
  FOREIGN KEY (run_id) REFERENCES run_meta(id),
  FOREIGN KEY (game_id) REFERENCES games(game_id)
);

CREATE TABLE IF NOT EXISTS drills (
  drill_id TEXT PRIMARY KEY,
  run_id INTEGER NOT NULL,
  game_id TEXT NOT NULL,
  ply INTEGER,
  side TEXT,
  phase TEXT,
  san_played TEXT,
  fen_before TEXT,
  time_spent_sec INTEGER,
  clock_after_sec INTEGER,
  cp_loss INTEGER,
  engine_best_san TEXT,
  eval_before_cp INTEGER,
  eval_after_cp INTEGER,
  pv_best TEXT,
  severity INTEGER,
  tags TEXT,
  difficulty TEXT,
  created_at TEXT NOT NULL,
  FOREIGN KEY (run_id) REFERENCES run_meta(id),
  FOREIGN KEY (game_id) REFERENCES games(game_id)
);

CREATE INDEX IF NOT EXISTS idx_moves_run_game ON moves(run_id, game_id);
CREATE INDEX IF NOT EXISTS idx_drills_run_severity ON drills(run_id, severity DESC);
CREATE INDEX IF NOT EXISTS idx_drills_game_ply ON drills(game_id, ply);
"#;
