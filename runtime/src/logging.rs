//! Tracing subscriber setup.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "crawl_ingest=info";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Log output options chosen on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// One JSON object per event instead of human-readable lines.
    pub json: bool,
    pub verbose: bool,
    pub quiet: bool,
}

impl LogOptions {
    fn directive(self) -> &'static str {
        if self.verbose {
            "crawl_ingest=debug"
        } else if self.quiet {
            "crawl_ingest=warn"
        } else {
            DEFAULT_DIRECTIVE
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the flags; later
/// calls are ignored.
pub fn init(options: LogOptions) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(options.directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = if options.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    let _ = TRACING_INIT.set(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_follows_flags() {
        assert_eq!(LogOptions::default().directive(), DEFAULT_DIRECTIVE);
        let verbose = LogOptions {
            verbose: true,
            ..LogOptions::default()
        };
        assert_eq!(verbose.directive(), "crawl_ingest=debug");
        let quiet = LogOptions {
            quiet: true,
            ..LogOptions::default()
        };
        assert_eq!(quiet.directive(), "crawl_ingest=warn");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(LogOptions::default());
        init(LogOptions {
            json: true,
            ..LogOptions::default()
        });
    }
}
