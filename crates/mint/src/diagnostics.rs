//! Diagnostics: severity ladder, counters, gated recovery, and message
//! rendering.
//!
//! Messages are formatted as `path:line:col: severity: message`, followed by
//! the source line and a caret underline of the offending span. The sink is
//! an explicit service threaded through the components that need it rather
//! than a process global; tests capture output with
//! [`Diagnostics::captured`].

use std::io::{IsTerminal, Write};

use strum::Display;

use crate::source::{Location, SourceMap};

/// Message severities, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Debug,
    Status,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    fn index(self) -> usize {
        self as usize
    }

    fn color(self) -> &'static str {
        match self {
            Self::Debug | Self::Status => "\x1b[2m",
            Self::Info => "\x1b[36m",
            Self::Warning => "\x1b[33m",
            Self::Error | Self::Fatal => "\x1b[31m",
        }
    }
}

/// Error-cascade gate.
///
/// After the first error the gate closes; further errors are counted but not
/// printed until [`Diagnostics::recovered`] reopens it at the next top-level
/// statement or phase boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryState {
    Open,
    Gated,
}

/// Where rendered messages go.
enum Sink {
    Stderr,
    Captured(Vec<u8>),
}

/// The diagnostics service.
pub struct Diagnostics {
    counts: [u32; 6],
    gate: RecoveryState,
    use_color: bool,
    /// Print `Debug`-severity messages (set by `--verbose` / trace flags).
    pub verbose: bool,
    sink: Sink,
}

impl Diagnostics {
    /// A diagnostics sink writing to stderr, with color when it is a TTY.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: [0; 6],
            gate: RecoveryState::Open,
            use_color: std::io::stderr().is_terminal(),
            verbose: false,
            sink: Sink::Stderr,
        }
    }

    /// A sink that captures rendered messages for assertions in tests.
    #[must_use]
    pub fn captured() -> Self {
        Self {
            counts: [0; 6],
            gate: RecoveryState::Open,
            use_color: false,
            verbose: true,
            sink: Sink::Captured(Vec::new()),
        }
    }

    /// The captured output, when constructed with [`Diagnostics::captured`].
    pub fn output(&self) -> &str {
        match &self.sink {
            Sink::Captured(buf) => std::str::from_utf8(buf).unwrap_or(""),
            Sink::Stderr => "",
        }
    }

    pub fn count(&self, severity: Severity) -> u32 {
        self.counts[severity.index()]
    }

    /// Errors plus fatals; non-zero means the process must exit non-zero.
    pub fn error_count(&self) -> u32 {
        self.count(Severity::Error) + self.count(Severity::Fatal)
    }

    /// True while the gate is closed after an error.
    pub fn in_recovery(&self) -> bool {
        self.gate == RecoveryState::Gated
    }

    /// Reopens the gate; called at top-level statement and phase boundaries.
    pub fn recovered(&mut self) {
        self.gate = RecoveryState::Open;
    }

    /// Resets counters and the gate, for tests.
    pub fn reset(&mut self) {
        self.counts = [0; 6];
        self.gate = RecoveryState::Open;
    }

    pub fn report(
        &mut self,
        severity: Severity,
        loc: Location,
        sources: &SourceMap,
        message: &str,
    ) {
        self.counts[severity.index()] += 1;

        let suppressed = match severity {
            Severity::Error => {
                let was_gated = self.gate == RecoveryState::Gated;
                self.gate = RecoveryState::Gated;
                was_gated
            }
            Severity::Debug => !self.verbose,
            _ => false,
        };
        if !suppressed {
            let rendered = self.render(severity, loc, sources, message);
            match &mut self.sink {
                Sink::Stderr => {
                    let mut err = std::io::stderr().lock();
                    let _ = err.write_all(rendered.as_bytes());
                }
                Sink::Captured(buf) => buf.extend_from_slice(rendered.as_bytes()),
            }
        }

        if severity == Severity::Fatal && matches!(self.sink, Sink::Stderr) {
            // A fatal diagnostic terminates the process once the message is
            // out. Captured sinks (tests) record it and continue.
            std::process::exit(130);
        }
    }

    fn render(
        &self,
        severity: Severity,
        loc: Location,
        sources: &SourceMap,
        message: &str,
    ) -> String {
        let (color, reset) = if self.use_color {
            (severity.color(), "\x1b[0m")
        } else {
            ("", "")
        };
        let mut out = String::new();
        match loc.buffer {
            Some(buffer) => {
                let buf = sources.get(buffer);
                let pos = buf.line_col(loc.begin);
                out.push_str(&format!(
                    "{}:{}:{}: {color}{severity}{reset}: {message}\n",
                    buf.path(),
                    pos.line,
                    pos.column
                ));
                let line = buf.line_text(loc.begin);
                out.push_str(line);
                out.push('\n');
                let span = (loc.end.saturating_sub(loc.begin)).max(1) as usize;
                let caret_col = (pos.column as usize).saturating_sub(1);
                out.push_str(&" ".repeat(caret_col));
                out.push_str(&"^".repeat(span.min(line.len().saturating_sub(caret_col).max(1))));
                out.push('\n');
            }
            None => {
                out.push_str(&format!("{color}{severity}{reset}: {message}\n"));
            }
        }
        out
    }

    // Convenience wrappers, mirroring the severity ladder.

    pub fn debug(&mut self, loc: Location, sources: &SourceMap, message: &str) {
        self.report(Severity::Debug, loc, sources, message);
    }

    pub fn status(&mut self, loc: Location, sources: &SourceMap, message: &str) {
        self.report(Severity::Status, loc, sources, message);
    }

    pub fn info(&mut self, loc: Location, sources: &SourceMap, message: &str) {
        self.report(Severity::Info, loc, sources, message);
    }

    pub fn warn(&mut self, loc: Location, sources: &SourceMap, message: &str) {
        self.report(Severity::Warning, loc, sources, message);
    }

    pub fn error(&mut self, loc: Location, sources: &SourceMap, message: &str) {
        self.report(Severity::Error, loc, sources, message);
    }

    pub fn fatal(&mut self, loc: Location, sources: &SourceMap, message: &str) {
        self.report(Severity::Fatal, loc, sources, message);
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TextBuffer;

    #[test]
    fn message_format_includes_position_and_caret() {
        let mut sources = SourceMap::new();
        let id = sources.add(TextBuffer::new("mod.mint", b"x = yy + 1".to_vec()));
        let mut diags = Diagnostics::captured();
        diags.error(
            Location::new(id, 4, 6),
            &sources,
            "Undefined symbol: 'yy'",
        );
        let out = diags.output();
        assert!(
            out.starts_with("mod.mint:1:5: error: Undefined symbol: 'yy'\n"),
            "got: {out}"
        );
        assert!(out.contains("x = yy + 1\n"), "got: {out}");
        assert!(out.contains("    ^^"), "caret should underline span, got: {out}");
    }

    #[test]
    fn errors_gate_until_recovered() {
        let sources = SourceMap::new();
        let mut diags = Diagnostics::captured();
        diags.error(Location::NONE, &sources, "first");
        diags.error(Location::NONE, &sources, "second");
        assert_eq!(diags.error_count(), 2, "suppressed errors still count");
        assert!(diags.output().contains("first"));
        assert!(
            !diags.output().contains("second"),
            "gated error should not print"
        );
        diags.recovered();
        diags.error(Location::NONE, &sources, "third");
        assert!(diags.output().contains("third"));
    }

    #[test]
    fn non_error_severities_do_not_gate() {
        let sources = SourceMap::new();
        let mut diags = Diagnostics::captured();
        diags.error(Location::NONE, &sources, "first");
        diags.warn(Location::NONE, &sources, "a warning");
        assert!(diags.output().contains("a warning"));
        assert_eq!(diags.count(Severity::Warning), 1);
    }
}
