//! Diagnostic reporting for every stage of the interpreter.
//!
//! All user-facing errors and warnings flow through the [`Reporter`] trait:
//! the lexer and parser report as they recover, the resolver reports and
//! continues with sibling statements, and the interpreter reports runtime
//! errors caught at the top level. The driver inspects the sticky flags to
//! pick an exit code.

use std::cell::{Cell, RefCell};
use std::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record};
use owo_colors::OwoColorize;

use crate::token::{Token, TokenType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
        }
    }
}

/// Sticky error state shared by every reporter implementation.
#[derive(Debug, Default)]
pub struct ReportFlags {
    error: Cell<bool>,
    runtime_error: Cell<bool>,
}

fn location_of(token: &Token) -> String {
    if token.kind == TokenType::Eof {
        " at end".to_string()
    } else {
        format!(" at '{}'", token.lexeme)
    }
}

pub trait Reporter {
    /// Render one diagnostic line. `location` is either empty or a
    /// ` at '<lexeme>'` suffix placed after the severity word.
    fn emit(&self, line: usize, location: &str, message: &str, severity: Severity);

    fn flags(&self) -> &ReportFlags;

    fn error(&self, line: usize, message: &str) {
        self.emit(line, "", message, Severity::Error);
        self.flags().error.set(true);
    }

    fn error_at(&self, token: &Token, message: &str) {
        self.emit(token.line, &location_of(token), message, Severity::Error);
        self.flags().error.set(true);
    }

    fn warn(&self, line: usize, message: &str) {
        self.emit(line, "", message, Severity::Warning);
    }

    fn warn_at(&self, token: &Token, message: &str) {
        self.emit(token.line, &location_of(token), message, Severity::Warning);
    }

    fn runtime_error(&self, token: &Token, message: &str) {
        self.emit(token.line, "", message, Severity::Error);
        self.flags().runtime_error.set(true);
    }

    fn had_error(&self) -> bool {
        self.flags().error.get()
    }

    fn had_runtime_error(&self) -> bool {
        self.flags().runtime_error.get()
    }

    /// Clears the static-error flag between REPL lines. The runtime-error
    /// flag stays set; only file mode reads it, once.
    fn reset(&self) {
        self.flags().error.set(false);
    }
}

/// Writes diagnostics to stderr, coloring the severity word.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    color: bool,
    flags: ReportFlags,
}

impl ConsoleReporter {
    pub fn new(color: bool) -> Self {
        Self {
            color,
            flags: ReportFlags::default(),
        }
    }
}

impl Reporter for ConsoleReporter {
    fn emit(&self, line: usize, location: &str, message: &str, severity: Severity) {
        if self.color {
            let severity = match severity {
                Severity::Error => severity.red().bold().to_string(),
                Severity::Warning => severity.yellow().bold().to_string(),
            };
            eprintln!("[line {}] {}{}: {}", line, severity, location, message);
        } else {
            eprintln!("[line {}] {}{}: {}", line, severity, location, message);
        }
    }

    fn flags(&self) -> &ReportFlags {
        &self.flags
    }
}

/// Collects plain-text diagnostics in memory. Used by tests and anywhere a
/// colorless transcript is wanted.
#[derive(Debug, Default)]
pub struct BufferReporter {
    messages: RefCell<Vec<String>>,
    flags: ReportFlags,
}

impl BufferReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

impl Reporter for BufferReporter {
    fn emit(&self, line: usize, location: &str, message: &str, severity: Severity) {
        self.messages
            .borrow_mut()
            .push(format!("[line {}] {}{}: {}", line, severity, location, message));
    }

    fn flags(&self) -> &ReportFlags {
        &self.flags
    }
}

/// Minimal stderr backend for the `log` facade. The maximum level is
/// adjusted at runtime by the `setLogLevel` built-in.
struct StderrLogger {
    color: bool,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let label = match record.level() {
            Level::Error => "error",
            Level::Warn => "warning",
            Level::Info => "info",
            _ => "debug",
        };
        if self.color {
            eprintln!("[{}] {}", label.dimmed(), record.args());
        } else {
            eprintln!("[{}] {}", label, record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs the stderr logger. Safe to call more than once; later calls only
/// adjust the level.
pub fn init_logging(color: bool, verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let _ = log::set_boxed_logger(Box::new(StderrLogger { color }));
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    #[test]
    fn test_buffer_reporter_formats_lines() {
        let reporter = BufferReporter::new();
        reporter.error(3, "something broke");
        reporter.warn(4, "something odd");
        assert_eq!(
            reporter.messages(),
            vec![
                "[line 3] Error: something broke".to_string(),
                "[line 4] Warning: something odd".to_string(),
            ]
        );
    }

    #[test]
    fn test_error_at_includes_lexeme() {
        let reporter = BufferReporter::new();
        let token = Token::new(TokenType::Identifier, "count", None, 7);
        reporter.error_at(&token, "unexpected identifier");
        assert_eq!(
            reporter.messages(),
            vec!["[line 7] Error at 'count': unexpected identifier".to_string()]
        );
    }

    #[test]
    fn test_flags_track_error_kinds() {
        let reporter = BufferReporter::new();
        assert!(!reporter.had_error());
        assert!(!reporter.had_runtime_error());

        reporter.error(1, "parse");
        assert!(reporter.had_error());
        assert!(!reporter.had_runtime_error());

        reporter.runtime_error(&Token::native("assert"), "boom");
        assert!(reporter.had_runtime_error());

        reporter.reset();
        assert!(!reporter.had_error());
        assert!(reporter.had_runtime_error());
    }

    #[test]
    fn test_warnings_do_not_set_error_flag() {
        let reporter = BufferReporter::new();
        reporter.warn(1, "meh");
        assert!(!reporter.had_error());
    }
}
