//! Console and verbose-file logging.
//!
//! Info events print as bare lines so command output reads naturally; other
//! levels carry a bracketed prefix.

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

struct LineFormat;

fn prefix(level: &Level) -> Option<&'static str> {
    match *level {
        Level::INFO => None,
        Level::WARN => Some("[Warning] "),
        Level::ERROR => Some("[Error] "),
        Level::DEBUG => Some("[Debug] "),
        Level::TRACE => Some("[Trace] "),
    }
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        if let Some(p) = prefix(event.metadata().level()) {
            writer.write_str(p)?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// A usable `RUST_LOG` wins over the level picked by `-v`.
fn env_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| {
            let level = if verbose { Level::DEBUG } else { Level::INFO };
            EnvFilter::default().add_directive(level.into())
        })
}

/// Install the global subscriber. With `log_file`, every event is also
/// written there; failing to create it only costs the file copy.
pub fn init(verbose: bool, log_file: Option<&Path>) {
    let filter = env_filter(verbose, std::env::var("RUST_LOG").ok().as_deref());

    let file = log_file.and_then(|path| {
        let opened = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| File::create(path));
        match opened {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("error: could not create log file {}: {e}", path.display());
                None
            }
        }
    });
    let file_layer = file.map(|f| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(f))
            .event_format(LineFormat)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().event_format(LineFormat))
        .with(file_layer)
        .init();

    if let Some(path) = log_file {
        tracing::debug!("Logging to file {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_has_no_prefix() {
        assert_eq!(prefix(&Level::INFO), None);
        assert_eq!(prefix(&Level::WARN), Some("[Warning] "));
        assert_eq!(prefix(&Level::DEBUG), Some("[Debug] "));
    }

    #[test]
    fn rust_log_takes_precedence_over_verbose() {
        assert_eq!(env_filter(true, Some("warn")).to_string(), "warn");
        assert_eq!(env_filter(true, None).to_string(), "debug");
        assert_eq!(env_filter(false, Some("")).to_string(), "info");
    }
}
