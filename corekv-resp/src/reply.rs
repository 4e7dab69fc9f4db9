//! # RESP Reply Encoding
//!
//! Builders for the five RESP2 reply frame kinds: simple
//! strings, errors, integers, bulk strings (including the null bulk),
//! and arrays (including the null array and nested arrays, needed by
//! replies like `HGETALL` and `GEOPOS`). Grounded in the same frame set
//! the synchronous client already encodes/decodes in `corekv-client`.

use corekv_common::error::CoreError;

/// One RESP2 reply value, ready to be serialized with [`Reply::write_to`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    NullBulk,
    Array(Vec<Reply>),
    NullArray,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Reply::Bulk(data.into())
    }

    pub fn integer(value: i64) -> Self {
        Reply::Integer(value)
    }

    pub fn array(items: Vec<Reply>) -> Self {
        Reply::Array(items)
    }

    /// Flattens `(field, value)` pairs into a flat array reply, the shape
    /// `HGETALL` and `CONFIG GET` use.
    pub fn flat_pairs(pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        let mut items = Vec::with_capacity(pairs.len() * 2);
        for (k, v) in pairs {
            items.push(Reply::bulk(k));
            items.push(Reply::bulk(v));
        }
        Reply::Array(items)
    }

    pub fn bulk_array(items: Vec<Vec<u8>>) -> Self {
        Reply::Array(items.into_iter().map(Reply::Bulk).collect())
    }

    /// Serializes this reply, appending to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(v) => {
                out.push(b':');
                out.extend_from_slice(v.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(data) => {
                out.push(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Reply::NullBulk => out.extend_from_slice(b"$-1\r\n"),
            Reply::NullArray => out.extend_from_slice(b"*-1\r\n"),
            Reply::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.write_to(out);
                }
            }
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }
}

impl From<CoreError> for Reply {
    fn from(err: CoreError) -> Self {
        Reply::Error(err.reply_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_simple_and_bulk() {
        assert_eq!(Reply::ok().into_bytes(), b"+OK\r\n".to_vec());
        assert_eq!(Reply::bulk(b"hi".to_vec()).into_bytes(), b"$2\r\nhi\r\n".to_vec());
    }

    #[test]
    fn encodes_null_bulk_and_array() {
        assert_eq!(Reply::NullBulk.into_bytes(), b"$-1\r\n".to_vec());
        assert_eq!(Reply::NullArray.into_bytes(), b"*-1\r\n".to_vec());
    }

    #[test]
    fn encodes_nested_array() {
        let reply = Reply::array(vec![Reply::integer(1), Reply::array(vec![Reply::bulk(b"a".to_vec())])]);
        assert_eq!(reply.into_bytes(), b"*2\r\n:1\r\n*1\r\n$1\r\na\r\n".to_vec());
    }

    #[test]
    fn core_error_becomes_error_reply() {
        let reply: Reply = CoreError::NoSuchKey.into();
        assert_eq!(reply.into_bytes(), b"-ERR no such key\r\n".to_vec());
    }
}
