//! Master-side PSYNC support: the `+FULLRESYNC` reply and the canned,
//! valid, empty-dataset RDB snapshot sent to every new replica.

use bytes::{BufMut, Bytes, BytesMut};

/// A minimal, valid, empty-dataset RDB dump — the same bytes a real Redis
/// master would emit for a fresh `PSYNC`. Clients never inspect its
/// contents in practice; correctness only requires a well-formed header and
/// an `0xFF` end marker.
const EMPTY_RDB_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

fn decode_hex(hex: &str) -> Bytes {
    let bytes: Vec<u8> = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("EMPTY_RDB_HEX is valid hex"))
        .collect();
    Bytes::from(bytes)
}

/// The `$<len>\r\n<raw bytes>` framing of the snapshot payload, deliberately
/// without a trailing CRLF — replicas read it with a length-driven reader,
/// not the general RESP parser.
pub fn canned_rdb_bulk() -> Bytes {
    let payload = decode_hex(EMPTY_RDB_HEX);
    let mut out = BytesMut::with_capacity(payload.len() + 16);
    out.put_u8(b'$');
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&payload);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_matches_payload_length() {
        let bulk = canned_rdb_bulk();
        let header_end = bulk.iter().position(|&b| b == b'\n').unwrap() + 1;
        let declared_len: usize = std::str::from_utf8(&bulk[1..header_end - 2])
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(declared_len, bulk.len() - header_end);
    }

    #[test]
    fn payload_starts_with_redis_header() {
        let bulk = canned_rdb_bulk();
        let header_end = bulk.iter().position(|&b| b == b'\n').unwrap() + 1;
        assert_eq!(&bulk[header_end..header_end + 5], b"REDIS");
    }
}
