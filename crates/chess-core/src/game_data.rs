use serde::{Deserialize, Serialize};

/// Header fields the trainer keeps for each game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameHeaders {
    pub white: String,
    pub black: String,
    pub result: String, // "1-0", "0-1", "1/2-1/2"
    pub date: String,
    pub utc_date: Option<String>,
    pub time_control: String,
    pub termination: String,
}

impl GameHeaders {
    /// Date used for identity: `UTCDate` when present, `Date` otherwise.
    pub fn identity_date(&self) -> &str {
        self.utc_date.as_deref().unwrap_or(&self.date)
    }

    /// Deterministic game key `"{date}_{white}_vs_{black}"`.
    ///
    /// Two different games played on the same day between the same players
    /// collide; that is accepted.
    pub fn game_id(&self) -> String {
        format!("{}_{}_vs_{}", self.identity_date(), self.white, self.black)
            .trim_matches('_')
            .to_string()
    }

    /// True for 5+0 blitz (`TimeControl` "300" or "300+0").
    pub fn is_five_plus_zero(&self) -> bool {
        matches!(self.time_control.as_str(), "300" | "300+0")
    }
}

/// One main-line move as it appeared in the PGN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedMove {
    /// Move text as written (SAN, possibly with check suffix).
    pub san: String,
    /// Comment following the move, e.g. `[%clk 0:04:55]`.
    pub comment: Option<String>,
}

/// A parsed game: headers plus its main line in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedGame {
    pub headers: GameHeaders,
    pub moves: Vec<PlayedMove>,
}

impl ParsedGame {
    pub fn game_id(&self) -> String {
        self.headers.game_id()
    }
}
