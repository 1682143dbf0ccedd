//! Terminal color output.

use std::io::IsTerminal;

/// Wraps strings in ANSI color codes when the target stream is a terminal
/// and `NO_COLOR` is unset.
pub(crate) struct Colorizer {
    enabled: bool,
}

impl Colorizer {
    /// A colorizer for stdout.
    pub(crate) fn stdout() -> Self {
        Self::new(std::io::stdout().is_terminal())
    }

    /// A colorizer for stderr.
    pub(crate) fn stderr() -> Self {
        Self::new(std::io::stderr().is_terminal())
    }

    fn new(is_terminal: bool) -> Self {
        Self {
            enabled: is_terminal && std::env::var_os("NO_COLOR").is_none(),
        }
    }

    fn wrap(&self, code: &str, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    pub(crate) fn green(&self, s: &str) -> String {
        self.wrap("32", s)
    }

    pub(crate) fn red(&self, s: &str) -> String {
        self.wrap("31", s)
    }

    pub(crate) fn yellow(&self, s: &str) -> String {
        self.wrap("33", s)
    }

    pub(crate) fn bold(&self, s: &str) -> String {
        self.wrap("1", s)
    }

    pub(crate) fn dim(&self, s: &str) -> String {
        self.wrap("2", s)
    }

    pub(crate) fn cyan(&self, s: &str) -> String {
        self.wrap("36", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_colorizer_passes_through() {
        let c = Colorizer { enabled: false };
        assert_eq!(c.green("text"), "text");
        assert_eq!(c.bold("text"), "text");
    }

    #[test]
    fn test_enabled_colorizer_wraps() {
        let c = Colorizer { enabled: true };
        assert_eq!(c.red("x"), "\x1b[31mx\x1b[0m");
        assert_eq!(c.dim("x"), "\x1b[2mx\x1b[0m");
    }
}
