// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parse a level name (`trace` .. `error`, case-insensitive), defaulting to INFO.
pub fn parse_level(log_level: Option<&str>) -> Level {
    log_level
        .and_then(|s| s.trim().parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

/// Install the global fmt subscriber writing to stderr.
///
/// Stdout stays free for machine-readable event lines. Calling this more
/// than once is harmless; later calls leave the first subscriber in place.
pub fn init_logging(log_level: Option<&str>) {
    let _ = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_names(true)
        .with_max_level(parse_level(log_level))
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_parse() {
        assert_eq!(parse_level(Some("debug")), Level::DEBUG);
        assert_eq!(parse_level(Some("WARN")), Level::WARN);
        assert_eq!(parse_level(Some(" trace ")), Level::TRACE);
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(parse_level(None), Level::INFO);
        assert_eq!(parse_level(Some("chatty")), Level::INFO);
    }

    #[test]
    fn repeated_init_does_not_panic() {
        init_logging(Some("error"));
        init_logging(Some("debug"));
    }
}
