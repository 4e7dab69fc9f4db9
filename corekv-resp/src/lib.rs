//! # RESP2 Wire Codec
//!
//! Request parsing and reply encoding for the RESP2 protocol (spec
//! §4.7), independent of any particular command set or storage engine.

pub mod parser;
pub mod reply;

pub use parser::{ParseError, RequestParser};
pub use reply::Reply;
