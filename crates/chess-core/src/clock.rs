//! Clock annotations embedded in move comments (`[%clk H:MM:SS]`).

use regex::Regex;

/// Parse the remaining clock, in seconds, from a move comment.
///
/// Accepts `M:SS` and `H:MM:SS`; anything else yields `None`.
pub fn parse_clock(comment: &str) -> Option<u32> {
    let clock_re = Regex::new(r"\[%clk\s+([0-9:]+)\]").ok()?;
    let caps = clock_re.captures(comment)?;
    let parts: Vec<u32> = caps[1]
        .trim()
        .split(':')
        .map(|p| p.parse().ok())
        .collect::<Option<Vec<_>>>()?;

    match parts.as_slice() {
        [mm, ss] => Some(mm * 60 + ss),
        [hh, mm, ss] => Some(hh * 3600 + mm * 60 + ss),
        _ => None,
    }
}

/// Last known remaining clock per side, used to derive time spent per move.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockTracker {
    white: Option<u32>,
    black: Option<u32>,
}

impl ClockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the mover's clock after the move and return the time it spent.
    ///
    /// Negative deltas (increments, clock resets, bad data) are dropped.
    pub fn observe(&mut self, white_to_move: bool, clock_after: Option<u32>) -> Option<u32> {
        let last = if white_to_move {
            &mut self.white
        } else {
            &mut self.black
        };

        let spent = match (*last, clock_after) {
            (Some(prev), Some(now)) if prev >= now => Some(prev - now),
            _ => None,
        };

        if clock_after.is_some() {
            *last = clock_after;
        }

        spent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("[%clk 0:04:55]"), Some(295));
        assert_eq!(parse_clock("[%clk 4:55]"), Some(295));
        assert_eq!(parse_clock("[%clk 1:00:00]"), Some(3600));
        assert_eq!(parse_clock(" [%timestamp 12] [%clk 0:00:07] "), Some(7));
    }

    #[test]
    fn test_parse_clock_missing_or_malformed() {
        assert_eq!(parse_clock(""), None);
        assert_eq!(parse_clock("good move"), None);
        assert_eq!(parse_clock("[%clk 1:2:3:4]"), None);
    }

    #[test]
    fn test_tracker_time_spent_per_side() {
        let mut clocks = ClockTracker::new();
        assert_eq!(clocks.observe(true, Some(300)), None);
        assert_eq!(clocks.observe(false, Some(298)), None);
        assert_eq!(clocks.observe(true, Some(275)), Some(25));
        assert_eq!(clocks.observe(false, Some(297)), Some(1));
    }

    #[test]
    fn test_tracker_drops_negative_delta() {
        let mut clocks = ClockTracker::new();
        clocks.observe(true, Some(100));
        // increment pushed the clock up
        assert_eq!(clocks.observe(true, Some(102)), None);
        // the new reading still becomes the baseline
        assert_eq!(clocks.observe(true, Some(90)), Some(12));
    }

    #[test]
    fn test_tracker_missing_annotation_keeps_baseline() {
        let mut clocks = ClockTracker::new();
        clocks.observe(true, Some(100));
        assert_eq!(clocks.observe(true, None), None);
        assert_eq!(clocks.observe(true, Some(80)), Some(20));
    }
}
