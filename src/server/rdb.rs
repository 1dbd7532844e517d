//! Decoder for the subset of the Redis RDB dump format this server
//! recognizes: the `REDIS` header, the `0xFA`/`0xFE`/`0xFB`/`0xFC`/`0xFD`/`0xFF`
//! markers, and the special top-two-bit integer length encoding.

use bytes::Bytes;

use super::store::{system_time_from_unix_millis, system_time_from_unix_secs, Keyspace};

const MARKER_METADATA: u8 = 0xFA;
const MARKER_DB_SELECT: u8 = 0xFE;
const MARKER_HASH_SIZES: u8 = 0xFB;
const MARKER_EXPIRE_MS: u8 = 0xFC;
const MARKER_EXPIRE_SECS: u8 = 0xFD;
const MARKER_EOF: u8 = 0xFF;

const STRING_VALUE_TYPE: u8 = 0x00;

const LEN_ENCODING_MASK: u8 = 0b1100_0000;
const LEN_VALUE_MASK: u8 = 0b0011_1111;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdbError(pub String);

impl std::fmt::Display for RdbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for RdbError {}

type RdbResult<T> = Result<T, RdbError>;

/// Validates the 9-byte `REDIS` + 4-digit-version header and returns the
/// remaining body.
pub fn split_header(buf: &[u8]) -> RdbResult<&[u8]> {
    if buf.len() < 9 {
        return Err(RdbError("buffer too small for REDIS header".into()));
    }
    let (magic, version) = (&buf[0..5], &buf[5..9]);
    if magic != b"REDIS" {
        return Err(RdbError("missing REDIS magic".into()));
    }
    if !version.iter().all(|b| b.is_ascii_digit()) {
        return Err(RdbError("RDB version is not numeric ASCII".into()));
    }
    Ok(&buf[9..])
}

/// Decodes the header-stripped body into `keyspace`, returning the number
/// of bytes of `body` actually consumed (everything up to and including a
/// seen `0xFF` + checksum, or the whole buffer if no `0xFF` was reached).
///
/// Already-loaded entries are retained even if a later marker is malformed
/// or unrecognized; decoding simply stops at that point.
pub fn load_body(body: &[u8], keyspace: &mut Keyspace) -> RdbResult<usize> {
    let mut pos = 0usize;

    while pos < body.len() {
        let marker = body[pos];
        pos += 1;

        match marker {
            MARKER_METADATA => {
                let (name, next) = read_u8_len_prefixed_string(body, pos)?;
                let (value, next) = read_fa_value(body, next)?;
                keyspace
                    .meta
                    .insert(String::from_utf8_lossy(&name).into_owned(), String::from_utf8_lossy(&value).into_owned());
                pos = next;
            }
            MARKER_DB_SELECT => {
                let _db_index = read_u8(body, pos)?;
                pos += 1;
            }
            MARKER_HASH_SIZES => {
                let main_size = read_u8(body, pos)? as usize;
                pos += 1;
                let expiry_size = read_u8(body, pos)? as usize;
                pos += 1;

                let plain_entries = main_size
                    .checked_sub(expiry_size)
                    .ok_or_else(|| RdbError("expiry hash size exceeds main hash size".into()))?;

                for _ in 0..plain_entries {
                    let value_type = read_u8(body, pos)?;
                    pos += 1;
                    if value_type != STRING_VALUE_TYPE {
                        return Err(RdbError(format!(
                            "unsupported value type 0x{:02x} in hash-table entry",
                            value_type
                        )));
                    }
                    let (key, next) = read_u8_len_prefixed_string(body, pos)?;
                    let (val, next) = read_u8_len_prefixed_string(body, next)?;
                    keyspace.load_entry(key, val, None);
                    pos = next;
                }
            }
            MARKER_EXPIRE_MS => {
                let ms = read_u64_le(body, pos)?;
                pos += 8;
                let expires_at = system_time_from_unix_millis(ms);
                pos = read_expiring_entry(body, pos, keyspace, expires_at)?;
            }
            MARKER_EXPIRE_SECS => {
                let secs = read_u32_le(body, pos)? as u64;
                pos += 4;
                let expires_at = system_time_from_unix_secs(secs);
                pos = read_expiring_entry(body, pos, keyspace, expires_at)?;
            }
            MARKER_EOF => {
                // 8-byte checksum follows; not verified.
                let end = (pos + 8).min(body.len());
                return Ok(end);
            }
            other => {
                return Err(RdbError(format!("unknown RDB marker 0x{:02x}", other)));
            }
        }
    }

    Ok(pos)
}

fn read_expiring_entry(
    body: &[u8],
    mut pos: usize,
    keyspace: &mut Keyspace,
    expires_at: std::time::SystemTime,
) -> RdbResult<usize> {
    let value_type = read_u8(body, pos)?;
    pos += 1;
    if value_type != STRING_VALUE_TYPE {
        return Err(RdbError(format!(
            "unsupported value type 0x{:02x} in expiring entry",
            value_type
        )));
    }
    let (key, next) = read_u8_len_prefixed_string(body, pos)?;
    let (val, next) = read_u8_len_prefixed_string(body, next)?;
    keyspace.load_entry(key, val, Some(expires_at));
    Ok(next)
}

fn read_u8(buf: &[u8], pos: usize) -> RdbResult<u8> {
    buf.get(pos)
        .copied()
        .ok_or_else(|| RdbError("unexpected end of RDB buffer".into()))
}

fn read_u32_le(buf: &[u8], pos: usize) -> RdbResult<u32> {
    let slice = buf
        .get(pos..pos + 4)
        .ok_or_else(|| RdbError("unexpected end of RDB buffer reading u32".into()))?;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u64_le(buf: &[u8], pos: usize) -> RdbResult<u64> {
    let slice = buf
        .get(pos..pos + 8)
        .ok_or_else(|| RdbError("unexpected end of RDB buffer reading u64".into()))?;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

/// Reads a plain length-prefixed string: a single unsigned byte count
/// followed by that many bytes, with no interpretation of the length byte's
/// high bits. Every name/key/value length in this format is read this way
/// *except* the `0xFA` value length, which is the one field the special
/// integer encoding below applies to.
fn read_u8_len_prefixed_string(buf: &[u8], pos: usize) -> RdbResult<(Bytes, usize)> {
    let len = read_u8(buf, pos)? as usize;
    let start = pos + 1;
    let end = start + len;
    let bytes = buf
        .get(start..end)
        .ok_or_else(|| RdbError("unexpected end of RDB buffer reading string payload".into()))?;
    Ok((Bytes::copy_from_slice(bytes), end))
}

/// Reads a `0xFA` metadata value, the one field the top-two-bit special
/// integer encoding applies to: when the length byte's top two bits are
/// `0b11`, the low 6 bits select an integer width (`0`=u8, `1`=u16 LE,
/// `2`=u32 LE) and the value is that integer's decimal string; otherwise the
/// length byte is a plain unsigned byte count as in
/// [`read_u8_len_prefixed_string`].
fn read_fa_value(buf: &[u8], pos: usize) -> RdbResult<(Bytes, usize)> {
    let len_byte = read_u8(buf, pos)?;
    if len_byte & LEN_ENCODING_MASK == LEN_ENCODING_MASK {
        let encoding = len_byte & LEN_VALUE_MASK;
        let (text, next) = match encoding {
            0 => {
                let v = read_u8(buf, pos + 1)?;
                (v.to_string(), pos + 2)
            }
            1 => {
                let slice = buf
                    .get(pos + 1..pos + 3)
                    .ok_or_else(|| RdbError("unexpected end of RDB buffer reading u16".into()))?;
                let v = u16::from_le_bytes(slice.try_into().unwrap());
                (v.to_string(), pos + 3)
            }
            2 => {
                let v = read_u32_le(buf, pos + 1)?;
                (v.to_string(), pos + 5)
            }
            other => return Err(RdbError(format!("unsupported special length encoding {}", other))),
        };
        Ok((Bytes::from(text.into_bytes()), next))
    } else {
        let len = (len_byte & !LEN_ENCODING_MASK) as usize;
        let start = pos + 1;
        let end = start + len;
        let bytes = buf
            .get(start..end)
            .ok_or_else(|| RdbError("unexpected end of RDB buffer reading string payload".into()))?;
        Ok((Bytes::copy_from_slice(bytes), end))
    }
}

/// Convenience entry point: validates the header and loads the body in one
/// call, used when the caller already has the whole file in memory (startup
/// load from disk).
pub fn load(buf: &[u8], keyspace: &mut Keyspace) -> RdbResult<()> {
    let body = split_header(buf)?;
    load_body(body, keyspace)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        b"REDIS0011".to_vec()
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(split_header(b"NOTRDB011").is_err());
    }

    #[test]
    fn decodes_plain_hash_table_entry() {
        let mut body = header();
        body.push(0xFB);
        body.push(1); // main size
        body.push(0); // expiry size
        body.push(0x00); // string type
        body.push(3);
        body.extend_from_slice(b"foo");
        body.push(3);
        body.extend_from_slice(b"bar");
        body.push(0xFF);
        body.extend_from_slice(&[0u8; 8]);

        let mut ks = Keyspace::new();
        load(&body, &mut ks).unwrap();
        assert_eq!(ks.get(b"foo"), Some(Bytes::from_static(b"bar")));
    }

    #[test]
    fn decodes_millisecond_expiry_entry() {
        let mut body = header();
        body.push(0xFC);
        let far_future_ms: u64 = 9_999_999_999_000;
        body.extend_from_slice(&far_future_ms.to_le_bytes());
        body.push(0x00);
        body.push(3);
        body.extend_from_slice(b"foo");
        body.push(3);
        body.extend_from_slice(b"bar");
        body.push(0xFF);
        body.extend_from_slice(&[0u8; 8]);

        let mut ks = Keyspace::new();
        load(&body, &mut ks).unwrap();
        assert_eq!(ks.get(b"foo"), Some(Bytes::from_static(b"bar")));
        assert!(ks.contains_expiry(b"foo"));
    }

    #[test]
    fn decodes_second_expiry_entry() {
        let mut body = header();
        body.push(0xFD);
        let far_future_secs: u32 = 4_000_000_000;
        body.extend_from_slice(&far_future_secs.to_le_bytes());
        body.push(0x00);
        body.push(3);
        body.extend_from_slice(b"foo");
        body.push(3);
        body.extend_from_slice(b"bar");
        body.push(0xFF);
        body.extend_from_slice(&[0u8; 8]);

        let mut ks = Keyspace::new();
        load(&body, &mut ks).unwrap();
        assert_eq!(ks.get(b"foo"), Some(Bytes::from_static(b"bar")));
        assert!(ks.contains_expiry(b"foo"));
    }

    #[test]
    fn db_select_marker_is_skipped_and_loading_continues() {
        let mut body = header();
        body.push(0xFE);
        body.push(0); // db index 0
        body.push(0xFB);
        body.push(1);
        body.push(0);
        body.push(0x00);
        body.push(3);
        body.extend_from_slice(b"foo");
        body.push(3);
        body.extend_from_slice(b"bar");
        body.push(0xFF);
        body.extend_from_slice(&[0u8; 8]);

        let mut ks = Keyspace::new();
        load(&body, &mut ks).unwrap();
        assert_eq!(ks.get(b"foo"), Some(Bytes::from_static(b"bar")));
    }

    #[test]
    fn key_or_value_length_at_or_above_0xc0_is_read_as_a_plain_byte_count_not_a_special_integer() {
        let mut body = header();
        body.push(0xFB);
        body.push(1);
        body.push(0);
        body.push(0x00);
        // A key length of 0xC1 (>= 0xC0, i.e. top two bits 0b11) must still
        // be read as a plain 193-byte count for key/value fields — the
        // special integer encoding is scoped to the 0xFA value length only.
        let key = vec![b'k'; 0xC1];
        body.push(0xC1);
        body.extend_from_slice(&key);
        body.push(3);
        body.extend_from_slice(b"bar");
        body.push(0xFF);
        body.extend_from_slice(&[0u8; 8]);

        let mut ks = Keyspace::new();
        load(&body, &mut ks).unwrap();
        assert_eq!(ks.get(&key[..]), Some(Bytes::from_static(b"bar")));
    }

    #[test]
    fn decodes_metadata_attribute_with_special_integer_encoding() {
        let mut body = header();
        body.push(0xFA);
        body.push(4);
        body.extend_from_slice(b"bits");
        body.push(0b1100_0000); // 8-bit special encoding
        body.push(64);
        body.push(0xFF);
        body.extend_from_slice(&[0u8; 8]);

        let mut ks = Keyspace::new();
        load(&body, &mut ks).unwrap();
        assert_eq!(ks.meta.get("bits"), Some(&"64".to_string()));
    }

    #[test]
    fn already_loaded_entries_survive_a_later_unknown_marker() {
        let mut body = header();
        body.push(0xFB);
        body.push(1);
        body.push(0);
        body.push(0x00);
        body.push(3);
        body.extend_from_slice(b"foo");
        body.push(3);
        body.extend_from_slice(b"bar");
        body.push(0x77); // unknown marker, aborts decoding

        let mut ks = Keyspace::new();
        let err = load(&body, &mut ks);
        assert!(err.is_err());
        assert_eq!(ks.get(b"foo"), Some(Bytes::from_static(b"bar")));
    }
}
