//! Logging setup
//!
//! The library only uses the `log` macros; binaries call [`init`] once.

use log::LevelFilter;

/// Parse a level name, defaulting to `info`
pub fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Initialize `env_logger`. `RUST_LOG` wins over `level`; repeated calls are ignored.
pub fn init(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(parse_level(level));
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    let _ = builder.format_timestamp_millis().try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level(" WARN "), LevelFilter::Warn);
        assert_eq!(parse_level("verbose"), LevelFilter::Info);
    }
}
