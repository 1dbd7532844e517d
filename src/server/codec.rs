use bytes::Bytes;
use std::fmt;

use super::value::RedisValue;

/// Malformed RESP input. Never raised for a frame that is merely incomplete
/// — that case is `Ok(None)` from [`parse`], not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError(pub String);

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ProtocolError {}

type ParseResult<T> = Result<Option<T>, ProtocolError>;

/// Parses a single RESP value from the front of `buf`.
///
/// Returns `Ok(Some((value, consumed)))` once a full frame is buffered,
/// `Ok(None)` if `buf` ends mid-frame (the caller should read more and
/// retry — zero bytes are consumed on this path), or `Err` on malformed
/// input.
pub fn parse(buf: &[u8]) -> ParseResult<(RedisValue, usize)> {
    match parse_at(buf, 0)? {
        Some((value, next)) => Ok(Some((value, next))),
        None => Ok(None),
    }
}

fn parse_at(buf: &[u8], pos: usize) -> ParseResult<(RedisValue, usize)> {
    if pos >= buf.len() {
        return Ok(None);
    }

    match buf[pos] {
        b'+' => parse_line(buf, pos + 1).map(|opt| {
            opt.map(|(line, next)| (RedisValue::SimpleString(Bytes::copy_from_slice(line)), next))
        }),
        b'-' => parse_line(buf, pos + 1).map(|opt| {
            opt.map(|(line, next)| (RedisValue::SimpleError(Bytes::copy_from_slice(line)), next))
        }),
        b':' => parse_integer(buf, pos + 1),
        b'$' => parse_bulk_string(buf, pos + 1),
        b'*' => parse_array(buf, pos + 1),
        other => Err(ProtocolError(format!(
            "unknown RESP type byte '{}' (0x{:02x})",
            other as char, other
        ))),
    }
}

/// Returns the bytes up to (not including) the next `\r\n`, and the position
/// just past it. `None` if no `\r\n` is buffered yet.
fn parse_line(buf: &[u8], pos: usize) -> ParseResult<(&[u8], usize)> {
    if pos > buf.len() {
        return Ok(None);
    }

    match buf[pos..].windows(2).position(|w| w == b"\r\n") {
        Some(rel) => Ok(Some((&buf[pos..pos + rel], pos + rel + 2))),
        None => Ok(None),
    }
}

fn parse_integer(buf: &[u8], pos: usize) -> ParseResult<(RedisValue, usize)> {
    match parse_line(buf, pos)? {
        None => Ok(None),
        Some((line, next)) => {
            let text = std::str::from_utf8(line)
                .map_err(|_| ProtocolError("integer frame is not valid UTF-8".into()))?;
            let n: i64 = text
                .parse()
                .map_err(|_| ProtocolError(format!("invalid integer '{}'", text)))?;
            Ok(Some((RedisValue::Integer(n), next)))
        }
    }
}

fn parse_bulk_string(buf: &[u8], pos: usize) -> ParseResult<(RedisValue, usize)> {
    let (len_line, payload_start) = match parse_line(buf, pos)? {
        None => return Ok(None),
        Some(v) => v,
    };

    let len_text = std::str::from_utf8(len_line)
        .map_err(|_| ProtocolError("bulk string length is not valid UTF-8".into()))?;
    let len: i64 = len_text
        .parse()
        .map_err(|_| ProtocolError(format!("invalid bulk string length '{}'", len_text)))?;

    if len == -1 {
        return Ok(Some((RedisValue::NullBulkString, payload_start)));
    }
    if len < -1 {
        return Err(ProtocolError(format!("negative bulk string length {}", len)));
    }

    let len = len as usize;
    let payload_end = payload_start + len;
    if buf.len() < payload_end + 2 {
        return Ok(None);
    }
    if &buf[payload_end..payload_end + 2] != b"\r\n" {
        return Err(ProtocolError(
            "bulk string payload not terminated by CRLF".into(),
        ));
    }

    Ok(Some((
        RedisValue::BulkString(Bytes::copy_from_slice(&buf[payload_start..payload_end])),
        payload_end + 2,
    )))
}

fn parse_array(buf: &[u8], pos: usize) -> ParseResult<(RedisValue, usize)> {
    let (len_line, mut cur) = match parse_line(buf, pos)? {
        None => return Ok(None),
        Some(v) => v,
    };

    let len_text = std::str::from_utf8(len_line)
        .map_err(|_| ProtocolError("array length is not valid UTF-8".into()))?;
    let len: i64 = len_text
        .parse()
        .map_err(|_| ProtocolError(format!("invalid array length '{}'", len_text)))?;

    if len == -1 {
        return Ok(Some((RedisValue::NullArray, cur)));
    }
    if len < -1 {
        return Err(ProtocolError(format!("negative array length {}", len)));
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        match parse_at(buf, cur)? {
            None => return Ok(None),
            Some((value, next)) => {
                items.push(value);
                cur = next;
            }
        }
    }

    Ok(Some((RedisValue::Array(items), cur)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_string() {
        let (v, n) = parse(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(v, RedisValue::SimpleString(Bytes::from_static(b"OK")));
        assert_eq!(n, 5);
    }

    #[test]
    fn parses_integer() {
        let (v, n) = parse(b":1000\r\n").unwrap().unwrap();
        assert_eq!(v, RedisValue::Integer(1000));
        assert_eq!(n, 7);
    }

    #[test]
    fn parses_null_bulk_string() {
        let (v, n) = parse(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(v, RedisValue::NullBulkString);
        assert_eq!(n, 5);
    }

    #[test]
    fn parses_null_array() {
        let (v, n) = parse(b"*-1\r\n").unwrap().unwrap();
        assert_eq!(v, RedisValue::NullArray);
        assert_eq!(n, 5);
    }

    #[test]
    fn rejects_unknown_type_byte() {
        assert!(parse(b"^weird\r\n").is_err());
    }

    #[test]
    fn round_trip_echo_array() {
        let frame = b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n";
        let (v, n) = parse(frame).unwrap().unwrap();
        assert_eq!(n, frame.len());
        let (cmd, args) = v.into_command().unwrap();
        assert_eq!(&cmd[..], b"ECHO");
        assert_eq!(args, vec![RedisValue::bulk(Bytes::from_static(b"hi"))]);
    }

    // Testable property: for every frame F and split F = A ++ B with
    // 0 <= |A| < |F|, parse(A) = NeedMore and parse(A ++ B) succeeds.
    #[test]
    fn streaming_split_always_needs_more_then_succeeds() {
        let frame = b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n".to_vec();
        for split in 0..frame.len() {
            let (a, _b) = frame.split_at(split);
            assert_eq!(
                parse(a).unwrap(),
                None,
                "expected NeedMore at split {}",
                split
            );
        }
        assert!(parse(&frame).unwrap().is_some());
    }

    #[test]
    fn two_chunk_echo_parses_across_reads() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"*2\r\n$4\r\nECHO");
        assert_eq!(parse(&buf).unwrap(), None);
        buf.extend_from_slice(b"\r\n$2\r\nhi\r\n");
        let (value, consumed) = parse(&buf).unwrap().unwrap();
        assert_eq!(consumed, 20);
        let (cmd, args) = value.into_command().unwrap();
        assert_eq!(&cmd[..], b"ECHO");
        assert_eq!(args[0].as_bulk().unwrap(), &Bytes::from_static(b"hi"));
    }
}
