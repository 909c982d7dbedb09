//! Shared CLI output: colors, status symbols, and the global output modes.

use std::io::IsTerminal;

pub const ENV_QUIET: &str = "CRAWL_INGEST_QUIET";
pub const ENV_VERBOSE: &str = "CRAWL_INGEST_VERBOSE";
pub const ENV_JSON: &str = "CRAWL_INGEST_JSON";

/// Check if color output is enabled.
pub fn color_enabled() -> bool {
    // https://no-color.org/
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }
    std::io::stderr().is_terminal()
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Colored string builder.
pub struct Styled {
    use_color: bool,
}

impl Default for Styled {
    fn default() -> Self {
        Self::new()
    }
}

impl Styled {
    pub fn new() -> Self {
        Self {
            use_color: color_enabled(),
        }
    }

    pub fn plain() -> Self {
        Self { use_color: false }
    }

    pub fn ok_sym(&self) -> &str {
        if self.use_color {
            "\x1b[32m\u{2713}\x1b[0m"
        } else {
            "OK"
        }
    }

    pub fn fail_sym(&self) -> &str {
        if self.use_color {
            "\x1b[31m\u{2717}\x1b[0m"
        } else {
            "!!"
        }
    }

    pub fn warn_sym(&self) -> &str {
        if self.use_color {
            "\x1b[33m\u{26a0}\x1b[0m"
        } else {
            "??"
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color {
            format!("{code}{s}{RESET}")
        } else {
            s.to_string()
        }
    }

    pub fn green(&self, s: &str) -> String {
        self.paint(GREEN, s)
    }

    pub fn red(&self, s: &str) -> String {
        self.paint(RED, s)
    }

    pub fn yellow(&self, s: &str) -> String {
        self.paint(YELLOW, s)
    }

    pub fn dim(&self, s: &str) -> String {
        self.paint(DIM, s)
    }
}

/// Print a label/value line.
pub fn print_field(label: &str, value: &str) {
    eprintln!("    {label:<16} {value}");
}

/// Format a duration in seconds (e.g., "2h 14m").
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let m = secs / 60;
        let s = secs % 60;
        format!("{m}m {s}s")
    } else {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        format!("{h}h {m}m")
    }
}

/// Check if --quiet mode is active.
pub fn is_quiet() -> bool {
    std::env::var(ENV_QUIET).is_ok()
}

/// Check if --verbose mode is active.
pub fn is_verbose() -> bool {
    std::env::var(ENV_VERBOSE).is_ok()
}

/// Check if --json mode is active.
pub fn is_json() -> bool {
    std::env::var(ENV_JSON).is_ok()
}

/// Print JSON output to stdout.
pub fn print_json(value: &serde_json::Value) {
    if let Ok(s) = serde_json::to_string_pretty(value) {
        println!("{s}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(8040), "2h 14m");
    }

    #[test]
    fn test_plain_styling_has_no_escapes() {
        let s = Styled::plain();
        assert_eq!(s.green("done"), "done");
        assert_eq!(s.red("failed"), "failed");
        assert_eq!(s.yellow("running"), "running");
        assert_eq!(s.dim("3m ago"), "3m ago");
        assert_eq!(s.ok_sym(), "OK");
        assert_eq!(s.fail_sym(), "!!");
    }
}
