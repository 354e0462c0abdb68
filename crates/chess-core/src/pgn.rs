//! PGN batch reader built on `pgn-reader`.
//!
//! Only the main line is kept; variations are skipped. Each move carries the
//! comment that follows it so clock annotations can be recovered later.

use std::ops::ControlFlow;

use pgn_reader::{RawComment, RawTag, Reader, SanPlus, Skip, Visitor};

use crate::game_data::{GameHeaders, ParsedGame, PlayedMove};

/// Visitor that turns each PGN game into a [`ParsedGame`].
struct GameCollector;

impl Visitor for GameCollector {
    type Tags = GameHeaders;
    type Movetext = ParsedGame;
    type Output = ParsedGame;

    fn begin_tags(&mut self) -> ControlFlow<ParsedGame, GameHeaders> {
        ControlFlow::Continue(GameHeaders::default())
    }

    fn tag(
        &mut self,
        tags: &mut GameHeaders,
        name: &[u8],
        value: RawTag<'_>,
    ) -> ControlFlow<ParsedGame> {
        let value = value.decode_utf8_lossy().into_owned();
        match name {
            b"White" => tags.white = value,
            b"Black" => tags.black = value,
            b"Result" => tags.result = value,
            b"Date" => tags.date = value,
            b"UTCDate" => tags.utc_date = Some(value),
            b"TimeControl" => tags.time_control = value,
            b"Termination" => tags.termination = value,
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, tags: GameHeaders) -> ControlFlow<ParsedGame, ParsedGame> {
        ControlFlow::Continue(ParsedGame {
            headers: tags,
            moves: Vec::new(),
        })
    }

    fn san(&mut self, game: &mut ParsedGame, san_plus: SanPlus) -> ControlFlow<ParsedGame> {
        game.moves.push(PlayedMove {
            san: san_plus.to_string(),
            comment: None,
        });
        ControlFlow::Continue(())
    }

    fn comment(&mut self, game: &mut ParsedGame, comment: RawComment<'_>) -> ControlFlow<ParsedGame> {
        // Comments before the first move have nothing to annotate
        if let Some(last) = game.moves.last_mut() {
            let text = String::from_utf8_lossy(comment.as_bytes());
            last.comment
                .get_or_insert_with(String::new)
                .push_str(&text);
        }
        ControlFlow::Continue(())
    }

    fn begin_variation(&mut self, _game: &mut ParsedGame) -> ControlFlow<ParsedGame, Skip> {
        ControlFlow::Continue(Skip(true))
    }

    fn end_game(&mut self, game: ParsedGame) -> ParsedGame {
        game
    }
}

/// Parse a batch of PGN text into games.
///
/// Entries with neither players nor moves are dropped. A read error stops the
/// batch but keeps the games read so far.
pub fn parse_games(pgn_text: &str) -> Vec<ParsedGame> {
    let mut reader = Reader::new(pgn_text.as_bytes());
    let mut collector = GameCollector;
    let mut games = Vec::new();

    loop {
        match reader.read_game(&mut collector) {
            Ok(Some(game)) => {
                if is_blank(&game) {
                    continue;
                }
                games.push(game);
            }
            Ok(None) | Err(_) => break,
        }
    }

    games
}

fn is_blank(game: &ParsedGame) -> bool {
    game.moves.is_empty() && game.headers.white.is_empty() && game.headers.black.is_empty()
}
