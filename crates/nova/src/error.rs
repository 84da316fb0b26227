//! Runtime error kinds and the public error type.
//!
//! Every failure an evaluation can produce is an [`Error`] carrying a kind,
//! a human-readable message, and (when known) a source position. Errors thrown
//! by Nova code (`throw expr`) keep the thrown value as a payload so `catch`
//! clauses can rebind it.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, Error>;

/// Error kinds raised by the Nova runtime.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `TypeError` -> "TypeError"), which is also the name `catch (e: Kind)`
/// clauses match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Lexing or parsing failure.
    SyntaxError,
    /// Reference to an unbound name.
    NameError,
    /// Operation applied to a value of the wrong type.
    TypeError,
    /// Integer division by zero and friends.
    ArithmeticError,
    /// Sequence index out of bounds.
    IndexError,
    /// Missing map key.
    KeyError,
    /// Member access on `null` without a safe-call.
    NullDereferenceError,
    /// Failed `as` cast.
    CastError,
    /// Module or symbol could not be imported.
    ImportError,
    /// Operation denied by the active [`SecurityPolicy`](crate::security::SecurityPolicy).
    SecurityError,
    /// Task observed cancellation at a suspension point or checkpoint.
    CancellationError,
    /// `withTimeout` / `receiveTimeout` deadline elapsed.
    TimeoutError,
    /// Send on a closed channel, or receive on a closed and drained channel.
    ChannelClosedError,
    /// Failed `assert` family call.
    AssertionError,
    /// Error raised by Nova code via `throw`.
    UserError,
    /// Recursion depth limit exceeded.
    StackOverflowError,
    /// Loop-iteration or execution-time quota exceeded.
    QuotaExceededError,
}

impl ErrorKind {
    /// Returns true if an error of this kind is caught by a handler declared
    /// for `handler` (`catch (e: handler)`).
    ///
    /// Nova's kinds form a flat hierarchy: every kind matches itself, and a
    /// bare `catch (e)` (no declared kind) matches everything.
    #[must_use]
    pub fn matches(self, handler: Self) -> bool {
        self == handler
    }
}

/// A source position attached to errors: file, 1-based line and column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLoc {
    /// Origin name the source was evaluated under (file path or `<repl>`).
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

impl CodeLoc {
    /// Creates a location from its parts.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A runtime error: kind, message, optional position, suppressed follow-ups.
///
/// `payload` holds the thrown Value for [`ErrorKind::UserError`] so that
/// `catch (e)` rebinds exactly what was thrown.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    pos: Option<CodeLoc>,
    suppressed: Vec<Error>,
    payload: Option<Value>,
}

impl Error {
    /// Creates a new error with the given kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            pos: None,
            suppressed: Vec::new(),
            payload: None,
        }
    }

    /// Creates a `UserError` wrapping a thrown Value.
    #[must_use]
    pub fn thrown(value: Value) -> Self {
        let message = value.display_string();
        Self {
            kind: ErrorKind::UserError,
            message,
            pos: None,
            suppressed: Vec::new(),
            payload: Some(value),
        }
    }

    /// Attaches a source position if none is set yet.
    ///
    /// The innermost position wins: re-attaching while unwinding outer frames
    /// does not overwrite the original raise site.
    #[must_use]
    pub fn with_pos(mut self, pos: CodeLoc) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos);
        }
        self
    }

    /// Attaches a suppressed error (e.g. a `close()` failure while unwinding,
    /// or a sibling task failure after the first).
    pub fn suppress(&mut self, other: Error) {
        self.suppressed.push(other);
    }

    /// The error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message, without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The source position, when known.
    #[must_use]
    pub fn pos(&self) -> Option<&CodeLoc> {
        self.pos.as_ref()
    }

    /// Errors attached as suppressed notes while this one propagated.
    #[must_use]
    pub fn suppressed(&self) -> &[Error] {
        &self.suppressed
    }

    /// The Value a `catch` clause binds for this error.
    ///
    /// For `UserError` this is the thrown value itself; for engine-raised
    /// errors it is a string of the form `"Kind: message"`.
    #[must_use]
    pub fn catch_value(&self) -> Value {
        match &self.payload {
            Some(v) => v.clone(),
            None => Value::from_string(format!("{}: {}", self.kind, self.message)),
        }
    }

    // --- constructors for the common kinds ---

    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message)
    }

    pub(crate) fn name(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NameError, message)
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub(crate) fn arithmetic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArithmeticError, message)
    }

    pub(crate) fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexError, message)
    }

    pub(crate) fn key(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KeyError, message)
    }

    pub(crate) fn null_deref(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NullDereferenceError, message)
    }

    pub(crate) fn cast(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CastError, message)
    }

    pub(crate) fn import(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ImportError, message)
    }

    /// Security denial for a named action. The message shape is part of the
    /// observable contract: it always contains `Security policy denied`.
    pub(crate) fn security(action: &str) -> Self {
        Self::new(ErrorKind::SecurityError, format!("Security policy denied {action}"))
    }

    pub(crate) fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CancellationError, message)
    }

    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutError, message)
    }

    pub(crate) fn channel_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChannelClosedError, message)
    }

    pub(crate) fn assertion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AssertionError, message)
    }

    pub(crate) fn stack_overflow(depth: usize) -> Self {
        Self::new(
            ErrorKind::StackOverflowError,
            format!("maximum recursion depth exceeded ({depth})"),
        )
    }

    pub(crate) fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceededError, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(pos) = &self.pos {
            write!(f, " ({pos})")?;
        }
        for sup in &self.suppressed {
            write!(f, "\n  suppressed: {}: {}", sup.kind, sup.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(ErrorKind::TypeError.to_string(), "TypeError");
        assert_eq!(ErrorKind::from_str("KeyError").unwrap(), ErrorKind::KeyError);
        assert!(ErrorKind::from_str("NoSuchError").is_err());
    }

    #[test]
    fn security_message_contains_denied_marker() {
        let err = Error::security("file read");
        assert_eq!(err.kind(), ErrorKind::SecurityError);
        assert!(err.message().contains("Security policy denied"));
        assert!(err.message().contains("file read"));
    }

    #[test]
    fn innermost_position_wins() {
        let err = Error::type_error("bad operand")
            .with_pos(CodeLoc::new("a.nova", 3, 7))
            .with_pos(CodeLoc::new("a.nova", 9, 1));
        assert_eq!(err.pos().unwrap().line, 3);
    }
}
