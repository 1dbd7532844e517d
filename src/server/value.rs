use bytes::{BufMut, Bytes, BytesMut};

/// A parsed RESP value, shared by the wire codec, the command engine and the
/// replication stream.
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
pub enum RedisValue {
    SimpleString(Bytes),
    SimpleError(Bytes),
    Integer(i64),
    BulkString(Bytes),
    NullBulkString,
    Array(Vec<RedisValue>),
    NullArray,
}

impl RedisValue {
    pub fn ok() -> Self {
        Self::SimpleString(Bytes::from_static(b"OK"))
    }

    pub fn error(msg: impl Into<Bytes>) -> Self {
        Self::SimpleError(msg.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::BulkString(data.into())
    }

    pub fn array(items: Vec<RedisValue>) -> Self {
        Self::Array(items)
    }

    /// Unpacks a command array into its command name and the remaining
    /// arguments. `None` if `self` isn't an array, or its first element
    /// isn't a string — the connection loop turns that into a protocol
    /// error reply rather than closing the socket.
    pub fn into_command(self) -> Option<(Bytes, Vec<RedisValue>)> {
        let items = match self {
            RedisValue::Array(items) => items,
            _ => return None,
        };

        let mut iter = items.into_iter();
        let cmd = match iter.next()? {
            RedisValue::BulkString(b) => b,
            RedisValue::SimpleString(b) => b,
            _ => return None,
        };

        Some((cmd, iter.collect()))
    }

    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            RedisValue::BulkString(b) => Some(b),
            RedisValue::SimpleString(b) => Some(b),
            _ => None,
        }
    }

    /// Serializes this value into RESP wire format, appending to `out`.
    pub fn encode_into(&self, out: &mut BytesMut) {
        match self {
            RedisValue::SimpleString(s) => {
                out.put_u8(b'+');
                out.extend_from_slice(s);
                out.extend_from_slice(b"\r\n");
            }
            RedisValue::SimpleError(e) => {
                out.put_u8(b'-');
                out.extend_from_slice(e);
                out.extend_from_slice(b"\r\n");
            }
            RedisValue::Integer(n) => {
                out.put_u8(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RedisValue::BulkString(b) => {
                out.put_u8(b'$');
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(b);
                out.extend_from_slice(b"\r\n");
            }
            RedisValue::NullBulkString => out.extend_from_slice(b"$-1\r\n"),
            RedisValue::NullArray => out.extend_from_slice(b"*-1\r\n"),
            RedisValue::Array(items) => {
                out.put_u8(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Builds the RESP array a command invocation is framed as, e.g. for the
    /// replica handshake or the master's `REPLCONF GETACK *` broadcast.
    pub fn command(parts: &[&[u8]]) -> Self {
        Self::Array(
            parts
                .iter()
                .map(|p| Self::BulkString(Bytes::copy_from_slice(p)))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_simple_string() {
        let v = RedisValue::SimpleString(Bytes::from_static(b"OK"));
        assert_eq!(&v.encode()[..], b"+OK\r\n");
    }

    #[test]
    fn round_trip_bulk_string() {
        let v = RedisValue::bulk(Bytes::from_static(b"bar"));
        assert_eq!(&v.encode()[..], b"$3\r\nbar\r\n");
    }

    #[test]
    fn encodes_null_bulk_string() {
        assert_eq!(&RedisValue::NullBulkString.encode()[..], b"$-1\r\n");
    }

    #[test]
    fn encodes_nested_array() {
        let v = RedisValue::array(vec![
            RedisValue::bulk(Bytes::from_static(b"a")),
            RedisValue::bulk(Bytes::from_static(b"b")),
        ]);
        assert_eq!(&v.encode()[..], b"*2\r\n$1\r\na\r\n$1\r\nb\r\n");
    }

    #[test]
    fn command_array_matches_getack_wire_form() {
        let v = RedisValue::command(&[b"REPLCONF", b"GETACK", b"*"]);
        assert_eq!(
            &v.encode()[..],
            b"*3\r\n$8\r\nREPLCONF\r\n$6\r\nGETACK\r\n$1\r\n*\r\n"
        );
    }
}
