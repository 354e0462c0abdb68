//! Stockfish engine wrapper using UCI protocol (async I/O)

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use tracing::debug;

use crate::engine::{Score, SearchLimit};
use crate::error::WorkerError;

/// Result of a single position search
#[derive(Debug, Clone, Default)]
pub struct EvalResult {
    /// Score from the side to move, taken from the deepest info line
    pub score: Option<Score>,
    /// Principal variation in UCI notation
    pub pv: Vec<String>,
    /// Best move in UCI notation, empty when the engine had none
    pub best_move: String,
}

/// Stockfish engine instance
pub struct StockfishEngine {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    name: String,
}

impl StockfishEngine {
    /// Spawn a new Stockfish process and initialize UCI
    pub async fn new(path: &str) -> Result<Self, WorkerError> {
        let mut process = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Stockfish(format!("Failed to spawn Stockfish: {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Stockfish("Stockfish stdin not captured".into()))?;
        let stdout = process
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| WorkerError::Stockfish("Stockfish stdout not captured".into()))?;

        let mut engine = Self {
            process,
            stdin,
            stdout,
            name: "stockfish".to_string(),
        };

        engine.send("uci").await?;
        engine.read_handshake().await?;

        engine.send("setoption name Threads value 1").await?;
        engine.send("setoption name Hash value 64").await?;
        engine.send("isready").await?;
        engine.wait_for("readyok").await?;

        Ok(engine)
    }

    /// Engine name as announced by `id name`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a command to Stockfish
    async fn send(&mut self, cmd: &str) -> Result<(), WorkerError> {
        debug!(cmd, "SF <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| WorkerError::Stockfish(format!("Failed to write to Stockfish: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| WorkerError::Stockfish(format!("Failed to flush stdin: {e}")))?;
        Ok(())
    }

    /// Read one line, trimmed. EOF means the process is gone.
    async fn read_line(&mut self) -> Result<String, WorkerError> {
        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| WorkerError::Stockfish(format!("Failed to read from Stockfish: {e}")))?;
        if n == 0 {
            return Err(WorkerError::Stockfish("Stockfish closed its output".into()));
        }
        let trimmed = line.trim().to_string();
        debug!(line = %trimmed, "SF >");
        Ok(trimmed)
    }

    /// Consume the `uci` reply up to `uciok`, keeping the engine name
    async fn read_handshake(&mut self) -> Result<(), WorkerError> {
        loop {
            let line = self.read_line().await?;
            if let Some(name) = line.strip_prefix("id name ") {
                self.name = name.trim().to_string();
            } else if line == "uciok" {
                return Ok(());
            }
        }
    }

    /// Wait for a specific response line
    async fn wait_for(&mut self, expected: &str) -> Result<(), WorkerError> {
        loop {
            if self.read_line().await? == expected {
                return Ok(());
            }
        }
    }

    /// Search a position under the given limit
    pub async fn evaluate(&mut self, fen: &str, limit: SearchLimit) -> Result<EvalResult, WorkerError> {
        self.send(&format!("position fen {fen}")).await?;
        self.send(&go_command(limit)).await?;

        let mut result = EvalResult::default();
        loop {
            let line = self.read_line().await?;

            if line.starts_with("info") {
                if let Some(score) = parse_score(&line) {
                    result.score = Some(score);
                }
                if line.contains(" pv ") {
                    result.pv = parse_pv(&line);
                }
            } else if line.starts_with("bestmove") {
                if let Some(mv) = line.split_whitespace().nth(1) {
                    if mv != "(none)" {
                        result.best_move = mv.to_string();
                    }
                }
                break;
            }
        }

        if result.pv.is_empty() && !result.best_move.is_empty() {
            result.pv.push(result.best_move.clone());
        }

        Ok(result)
    }

    /// Send quit command and wait for process to exit
    pub async fn quit(&mut self) {
        let _ = self.send("quit").await;
        let _ = self.process.wait().await;
    }
}

impl Drop for StockfishEngine {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.process.start_kill();
    }
}

fn go_command(limit: SearchLimit) -> String {
    match limit {
        SearchLimit::Depth(depth) => format!("go depth {depth}"),
        SearchLimit::MoveTime(t) => format!("go movetime {}", t.as_millis().max(1)),
    }
}

/// Value following a keyword on an info line
fn parse_after<T: std::str::FromStr>(line: &str, keyword: &str) -> Option<T> {
    let mut parts = line.split_whitespace();
    parts.find(|p| *p == keyword)?;
    parts.next()?.parse().ok()
}

/// Parse `score cp N` or `score mate N` from an info line
fn parse_score(line: &str) -> Option<Score> {
    if !line.contains(" score ") {
        return None;
    }
    if let Some(cp) = parse_after(line, "cp") {
        return Some(Score::Cp(cp));
    }
    parse_after(line, "mate").map(Score::Mate)
}

/// Parse PV moves from info line
fn parse_pv(line: &str) -> Vec<String> {
    let mut in_pv = false;
    let mut moves = Vec::new();

    for part in line.split_whitespace() {
        if part == "pv" {
            in_pv = true;
            continue;
        }
        if in_pv {
            // PV ends at next keyword or end of line
            if part.starts_with("bmc") || part == "string" {
                break;
            }
            moves.push(part.to_string());
        }
    }

    moves
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_parse_cp() {
        let line = "info depth 20 seldepth 25 multipv 1 score cp 35 nodes 100000 pv e2e4";
        assert_eq!(parse_score(line), Some(Score::Cp(35)));
    }

    #[test]
    fn test_parse_negative_cp_with_bound() {
        let line = "info depth 9 score cp -112 upperbound nodes 4000 pv d7d5";
        assert_eq!(parse_score(line), Some(Score::Cp(-112)));
    }

    #[test]
    fn test_parse_mate() {
        let line = "info depth 20 score mate 3 nodes 100000 pv e2e4";
        assert_eq!(parse_score(line), Some(Score::Mate(3)));
        assert_eq!(parse_score("info depth 0 score mate 0"), Some(Score::Mate(0)));
    }

    #[test]
    fn test_parse_score_absent() {
        assert_eq!(parse_score("info string NNUE evaluation enabled"), None);
        assert_eq!(parse_score("info depth 3 currmove e2e4 currmovenumber 1"), None);
    }

    #[test]
    fn test_parse_pv() {
        let line = "info depth 20 score cp 35 pv e2e4 e7e5 g1f3";
        let pv = parse_pv(line);
        assert_eq!(pv, vec!["e2e4", "e7e5", "g1f3"]);
    }

    #[test]
    fn test_go_command() {
        assert_eq!(go_command(SearchLimit::Depth(10)), "go depth 10");
        assert_eq!(
            go_command(SearchLimit::MoveTime(Duration::from_millis(250))),
            "go movetime 250"
        );
    }
}
