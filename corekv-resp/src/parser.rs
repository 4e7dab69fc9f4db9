//! # Incremental RESP Request Parser
//!
//! Parses client requests off a growable `BytesMut` read buffer (spec
//! §4.7): multibulk arrays (`*N\r\n$len\r\n...`) for normal commands, and
//! the inline form (a bare CRLF-terminated line) that `redis-cli`-style
//! tools and health checks use. Grounded in the synchronous parser the
//! client crate carries in `resp.rs`, reshaped here to be restartable: a
//! partial frame is never consumed from the buffer, so the caller can
//! read more bytes and call `parse` again without losing progress.

use bytes::{Buf, BytesMut};

/// Largest inline command line accepted before the connection is
/// considered abusive and closed.
pub const MAX_INLINE_LEN: usize = 64 * 1024;

/// Largest bulk string length accepted in a multibulk request.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Largest multibulk argument count accepted.
pub const MAX_MULTIBULK_LEN: i64 = 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Framing violated the protocol; the connection should be closed
    /// after the error reply is flushed.
    Protocol(String),
    /// An inline command exceeded `MAX_INLINE_LEN` without a terminator.
    InlineTooLong,
}

/// A parsed client request: the command name and its arguments, as raw
/// bytes (the dispatcher owns case-folding and type conversion).
pub type Request = Vec<Vec<u8>>;

/// Stateless incremental parser. Holds no buffered partial state itself;
/// all partial-frame handling lives in the caller's `BytesMut`, which is
/// only advanced once a complete request has been read.
#[derive(Default)]
pub struct RequestParser;

impl RequestParser {
    pub fn new() -> Self {
        RequestParser
    }

    /// Attempts to parse one request from the front of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` holds an incomplete frame (the caller
    /// should read more bytes and retry); `Ok(Some(request))` and
    /// advances `buf` past the consumed bytes on success.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, ParseError> {
        if buf.is_empty() {
            return Ok(None);
        }

        if buf[0] == b'*' {
            parse_multibulk(buf)
        } else {
            parse_inline(buf)
        }
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn parse_inline(buf: &mut BytesMut) -> Result<Option<Request>, ParseError> {
    let Some(line_end) = find_crlf(&buf[..]) else {
        if buf.len() > MAX_INLINE_LEN {
            return Err(ParseError::InlineTooLong);
        }
        return Ok(None);
    };
    if line_end > MAX_INLINE_LEN {
        return Err(ParseError::InlineTooLong);
    }

    let line = buf[..line_end].to_vec();
    buf.advance(line_end + 2);
    let args = line
        .split(|&b| b == b' ' || b == b'\t')
        .filter(|piece| !piece.is_empty())
        .map(|piece| piece.to_vec())
        .collect();
    Ok(Some(args))
}

/// Reads one `\r\n`-terminated line from the front of `data` without
/// consuming it from the caller's buffer; returns the line bytes (sans
/// CRLF) and the total byte length including the terminator.
fn peek_line(data: &[u8]) -> Option<(&[u8], usize)> {
    let end = find_crlf(data)?;
    Some((&data[..end], end + 2))
}

fn parse_i64(data: &[u8]) -> Result<i64, ParseError> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::Protocol("invalid multibulk length".into()))
}

fn parse_multibulk(buf: &mut BytesMut) -> Result<Option<Request>, ParseError> {
    let mut cursor = 0usize;

    let Some((len_line, consumed)) = peek_line(&buf[cursor..]) else { return Ok(None) };
    let count = parse_i64(&len_line[1..])?;
    cursor += consumed;

    if count > MAX_MULTIBULK_LEN {
        return Err(ParseError::Protocol("invalid multibulk length".into()));
    }
    if count <= 0 {
        buf.advance(cursor);
        return Ok(Some(Vec::new()));
    }

    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let Some((header, header_len)) = peek_line(&buf[cursor..]) else { return Ok(None) };
        if header.first() != Some(&b'$') {
            return Err(ParseError::Protocol("expected '$', got something else".into()));
        }
        let bulk_len = parse_i64(&header[1..])?;
        if !(0..=MAX_BULK_LEN).contains(&bulk_len) {
            return Err(ParseError::Protocol("invalid bulk length".into()));
        }
        cursor += header_len;

        let bulk_len = bulk_len as usize;
        if buf.len() < cursor + bulk_len + 2 {
            return Ok(None);
        }
        let data = buf[cursor..cursor + bulk_len].to_vec();
        if &buf[cursor + bulk_len..cursor + bulk_len + 2] != b"\r\n" {
            return Err(ParseError::Protocol("expected CRLF after bulk data".into()));
        }
        cursor += bulk_len + 2;
        args.push(data);
    }

    buf.advance(cursor);
    Ok(Some(args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_multibulk_in_one_call() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"[..]);
        let mut parser = RequestParser::new();
        let request = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(request, vec![b"GET".to_vec(), b"k".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn restarts_cleanly_across_partial_reads() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
        // Buffer is untouched; more bytes arrive and the same call completes it.
        buf.extend_from_slice(b"$1\r\nk\r\n");
        let request = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(request, vec![b"GET".to_vec(), b"k".to_vec()]);
    }

    #[test]
    fn parses_inline_command() {
        let mut buf = BytesMut::from(&b"PING\r\n"[..]);
        let mut parser = RequestParser::new();
        let request = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(request, vec![b"PING".to_vec()]);
    }

    #[test]
    fn rejects_oversized_inline_command() {
        let mut buf = BytesMut::from(vec![b'a'; MAX_INLINE_LEN + 1].as_slice());
        let mut parser = RequestParser::new();
        assert_eq!(parser.parse(&mut buf), Err(ParseError::InlineTooLong));
    }

    #[test]
    fn rejects_malformed_bulk_header() {
        let mut buf = BytesMut::from(&b"*1\r\n:3\r\n"[..]);
        let mut parser = RequestParser::new();
        assert!(parser.parse(&mut buf).is_err());
    }

    #[test]
    fn empty_multibulk_is_a_no_op_request() {
        let mut buf = BytesMut::from(&b"*0\r\n"[..]);
        let mut parser = RequestParser::new();
        let request = parser.parse(&mut buf).unwrap().unwrap();
        assert!(request.is_empty());
    }
}
