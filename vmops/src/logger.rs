//! `env_logger` setup for the command-line tool
//!
//! Every line reads `+VMOPS <LEVEL> message`. `VMOPS_LOG` takes the usual
//! `env_logger` filter syntax; `-v`, `-q` and `--log-level` override it.

use std::io::{self, Write};

use env_logger::fmt::Formatter;
use env_logger::Builder;
use log::{LevelFilter, Record, SetLoggerError};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "VMOPS_LOG";

fn format_record(buf: &mut Formatter, record: &Record<'_>) -> io::Result<()> {
    let style = buf.default_level_style(record.level());
    writeln!(buf, "+VMOPS {style}{}{style:#} {}", record.level(), record.args())
}

/// Logger builder at `Info`, then `VMOPS_LOG`, then `level` if given
pub fn builder(level: Option<LevelFilter>) -> Builder {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info).parse_env(LOG_ENV).format(format_record);
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder
}

/// Installs the logger.
///
/// # Errors
///
/// An error is returned if a logger has already been set.
pub fn init(level: Option<LevelFilter>) -> Result<(), SetLoggerError> {
    builder(level).try_init()
}
