pub mod clock;
pub mod game_data;
pub mod motif;
pub mod pgn;

pub use clock::{parse_clock, ClockTracker};
pub use game_data::{GameHeaders, ParsedGame, PlayedMove};
pub use motif::{phase_from_ply, MotifFlags, Phase};
pub use pgn::parse_games;
