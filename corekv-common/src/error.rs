//! # Core Error Taxonomy
//!
//! Purpose: Give every layer (arena, containers, store, dispatcher) one
//! shared vocabulary of failure kinds so the RESP front-end can translate
//! them to reply frames without re-deriving meaning from strings.
//!
//! ## Design Principles
//! 1. **Kind, Not Message**: Variants name a failure category; the
//!    dispatcher owns the exact wire text.
//! 2. **No Panics on the Hot Path**: Every fallible container operation
//!    returns `CoreResult<T>` instead of unwrapping.
//! 3. **Cheap to Construct**: No heap allocation in the common variants.

/// Result type used throughout the core crates.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failure categories surfaced by the arena, containers, store, and
/// dispatcher. Each maps to one of the RESP error kinds in spec §7.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed RESP framing; the connection is closed after this reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Wrong argument count or a non-numeric argument where one was required.
    #[error("wrong number of arguments for '{0}'")]
    WrongArity(String),

    /// A non-numeric argument was supplied where an integer was required.
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    /// A non-numeric argument was supplied where a float was required.
    #[error("value is not a valid float")]
    NotAFloat,

    /// The key holds a value of a different type than the command expects.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// An index or rank fell outside the container's normalized range.
    #[error("index out of range")]
    OutOfRange,

    /// A named element (pivot, member) required by the operation is absent.
    #[error("no such element")]
    NoSuchElement,

    /// A hash field does not hold an integer, for `HINCRBY`-style ops.
    #[error("hash value is not an integer")]
    FieldNotInteger,

    /// A hash field does not hold a float, for `HINCRBYFLOAT`-style ops.
    #[error("hash value is not a float")]
    FieldNotFloat,

    /// The command-specific syntax was not recognized (bad flag combination).
    #[error("syntax error")]
    Syntax,

    /// `ZADD` received both `NX` and `XX`, or another mutually exclusive pair.
    #[error("NX and XX options at the same time are not compatible")]
    ConflictingFlags,

    /// Source and destination of a move/rename operation are identical.
    #[error("source and destination objects are the same")]
    SameObject,

    /// The named key does not exist.
    #[error("no such key")]
    NoSuchKey,

    /// Arena allocation failed; the shard remains usable.
    #[error("out of memory")]
    OutOfMemory,

    /// A cross-shard request could not be delivered or answered in time.
    #[error("shard unreachable")]
    ShardUnreachable,

    /// Catch-all for conditions that do not fit another kind.
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Returns the RESP error-reply text for this error, without the `-`
    /// prefix or trailing `\r\n` (the codec adds framing).
    pub fn reply_text(&self) -> String {
        match self {
            CoreError::WrongType => self.to_string(),
            CoreError::NotAnInteger | CoreError::NotAFloat => format!("ERR {}", self),
            CoreError::Protocol(_) => format!("ERR Protocol error: {}", self.inner_message()),
            CoreError::WrongArity(cmd) => format!("ERR wrong number of arguments for '{}' command", cmd),
            _ => format!("ERR {}", self),
        }
    }

    fn inner_message(&self) -> &str {
        match self {
            CoreError::Protocol(message) => message,
            _ => "",
        }
    }
}
