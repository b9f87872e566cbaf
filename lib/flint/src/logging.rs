//! Logging setup shared by the workspace. Loggers are plain `slog` loggers, the root one being built
//! from a `sloggers` configuration that is usually embedded in the client's TOML config file.
pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};
pub use sloggers::LoggerConfig;

use sloggers::terminal::TerminalLoggerConfig;
use sloggers::Config;

/// Terminal logger writing `info` and above to stderr.
#[inline]
pub fn default_config() -> LoggerConfig {
    LoggerConfig::Terminal(TerminalLoggerConfig::default())
}

/// Parses a logger configuration from a TOML snippet, e.g.
///
/// ```toml
/// type = "terminal"
/// level = "debug"
/// destination = "stderr"
/// ```
#[inline]
pub fn parse_config(toml: &str) -> Result<LoggerConfig, serdeconv::Error> {
    serdeconv::from_toml_str(toml)
}

/// Builds the root logger described by the configuration.
#[inline]
pub fn init(config: &LoggerConfig) -> Result<Logger, sloggers::Error> {
    config.build_logger()
}

/// Logger that swallows every record.
#[inline]
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
