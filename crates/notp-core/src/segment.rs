//! Segment framing primitives.
//!
//! Byte layout (little-endian):
//!
//! ```text
//! DataSegment     := length:u32 | 0x01 | payload[length]
//! StreamSegment   := type:u32 | counter:u32 | length:u32 | 0x01 | payload[length]
//! ProtocolSegment := (size:u16 = 2 | value:i16){N} | 0x01
//! ```
//!
//! Length fields may contain the delimiter byte, so readers never scan for it.
//! The header is read at a fixed width and the delimiter must sit right after
//! it.

use bytes::{BufMut, BytesMut};

use crate::error::PacketError;

/// Sentinel byte terminating every segment header.
pub const DELIMITER: u8 = 0x01;

/// Header width of a data segment (length).
pub const DATA_HEADER_LEN: usize = 4;

/// Header width of a stream segment (type, counter, length).
pub const STREAM_HEADER_LEN: usize = 12;

/// Width of one protocol field (size prefix + value).
pub const PROTOCOL_FIELD_LEN: usize = 4;

const PROTOCOL_VALUE_SIZE: u16 = 2;

type Result<T> = std::result::Result<T, PacketError>;

/// A decoded stream segment header and its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSegment<'a> {
    pub stream_type: u32,
    pub counter: u32,
    pub payload: &'a [u8],
    pub next_offset: usize,
}

fn payload_len(payload: &[u8]) -> Result<u32> {
    u32::try_from(payload.len()).map_err(|_| PacketError::PayloadTooLarge(payload.len()))
}

/// Append `len | delimiter | payload`.
pub fn write_data_segment(buf: &mut BytesMut, payload: &[u8]) -> Result<()> {
    let len = payload_len(payload)?;
    buf.reserve(DATA_HEADER_LEN + 1 + payload.len());
    buf.put_u32_le(len);
    buf.put_u8(DELIMITER);
    buf.put_slice(payload);
    Ok(())
}

/// Append `type | counter | len | delimiter | payload`.
///
/// Returns the offset of the segment header, which is what
/// [`increment_stream_counter`] expects.
pub fn write_stream_segment(
    buf: &mut BytesMut,
    stream_type: u32,
    counter: u32,
    payload: &[u8],
) -> Result<usize> {
    let len = payload_len(payload)?;
    let header_offset = buf.len();
    buf.reserve(STREAM_HEADER_LEN + 1 + payload.len());
    buf.put_u32_le(stream_type);
    buf.put_u32_le(counter);
    buf.put_u32_le(len);
    buf.put_u8(DELIMITER);
    buf.put_slice(payload);
    Ok(header_offset)
}

/// Append a protocol segment carrying `fields`.
pub fn write_protocol_segment(buf: &mut BytesMut, fields: &[i16]) {
    buf.reserve(fields.len() * PROTOCOL_FIELD_LEN + 1);
    for field in fields {
        buf.put_u16_le(PROTOCOL_VALUE_SIZE);
        buf.put_i16_le(*field);
    }
    buf.put_u8(DELIMITER);
}

/// Check the fixed-width header at `offset` and the delimiter after it.
///
/// Returns the header bytes and the offset of the first payload byte.
fn read_header(buf: &[u8], offset: usize, width: usize) -> Result<(&[u8], usize)> {
    let available = buf.len().saturating_sub(offset);
    if available < width {
        return Err(PacketError::MalformedHeader {
            offset,
            expected: width,
            actual: available,
        });
    }
    let delimiter_at = offset + width;
    if buf.get(delimiter_at) != Some(&DELIMITER) {
        return Err(PacketError::DelimiterNotFound {
            offset: delimiter_at,
        });
    }
    Ok((&buf[offset..delimiter_at], delimiter_at + 1))
}

fn read_payload(buf: &[u8], start: usize, declared: u32) -> Result<(&[u8], usize)> {
    let declared = declared as usize;
    let available = buf.len() - start;
    if available < declared {
        return Err(PacketError::TruncatedPayload {
            offset: start,
            declared,
            available,
        });
    }
    let end = start + declared;
    Ok((&buf[start..end], end))
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(arr)
}

/// Read a data segment at `offset`, returning its payload and the next offset.
pub fn read_data_segment(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let (header, start) = read_header(buf, offset, DATA_HEADER_LEN)?;
    read_payload(buf, start, le_u32(header))
}

/// Read a stream segment at `offset`.
pub fn read_stream_segment(buf: &[u8], offset: usize) -> Result<StreamSegment<'_>> {
    let (header, start) = read_header(buf, offset, STREAM_HEADER_LEN)?;
    let stream_type = le_u32(&header[0..4]);
    let counter = le_u32(&header[4..8]);
    let (payload, next_offset) = read_payload(buf, start, le_u32(&header[8..12]))?;
    Ok(StreamSegment {
        stream_type,
        counter,
        payload,
        next_offset,
    })
}

/// Read a protocol segment of exactly `N` fields at `offset`.
pub fn read_protocol_segment<const N: usize>(
    buf: &[u8],
    offset: usize,
) -> Result<([i16; N], usize)> {
    let (header, next) = read_header(buf, offset, N * PROTOCOL_FIELD_LEN)?;
    let mut fields = [0i16; N];
    for (i, chunk) in header.chunks_exact(PROTOCOL_FIELD_LEN).enumerate() {
        let size = u16::from_le_bytes([chunk[0], chunk[1]]);
        if size != PROTOCOL_VALUE_SIZE {
            return Err(PacketError::InvalidFieldSize {
                offset: offset + i * PROTOCOL_FIELD_LEN,
                size,
            });
        }
        fields[i] = i16::from_le_bytes([chunk[2], chunk[3]]);
    }
    Ok((fields, next))
}

/// Bump the counter of the stream segment whose header starts at
/// `header_offset`, in place. Returns the new counter.
pub fn increment_stream_counter(buf: &mut [u8], header_offset: usize) -> Result<u32> {
    let available = buf.len().saturating_sub(header_offset);
    if available < STREAM_HEADER_LEN {
        return Err(PacketError::MalformedHeader {
            offset: header_offset,
            expected: STREAM_HEADER_LEN,
            actual: available,
        });
    }
    let field = &mut buf[header_offset + 4..header_offset + 8];
    let next = le_u32(field)
        .checked_add(1)
        .ok_or(PacketError::CounterOverflow(header_offset))?;
    field.copy_from_slice(&next.to_le_bytes());
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_data_segment_layout() {
        let mut buf = BytesMut::new();
        write_data_segment(&mut buf, b"abc").unwrap();
        assert_eq!(&buf[..], &[3, 0, 0, 0, DELIMITER, b'a', b'b', b'c']);

        let (payload, next) = read_data_segment(&buf, 0).unwrap();
        assert_eq!(payload, b"abc");
        assert_eq!(next, buf.len());
    }

    #[test]
    fn test_payload_may_contain_delimiter() {
        // A length of 1 puts the delimiter byte inside the length field.
        let mut buf = BytesMut::new();
        write_data_segment(&mut buf, &[DELIMITER]).unwrap();
        write_data_segment(&mut buf, &[DELIMITER; 257]).unwrap();

        let (first, next) = read_data_segment(&buf, 0).unwrap();
        assert_eq!(first, &[DELIMITER]);
        let (second, end) = read_data_segment(&buf, next).unwrap();
        assert_eq!(second.len(), 257);
        assert_eq!(end, buf.len());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        write_data_segment(&mut buf, b"").unwrap();
        let (payload, next) = read_data_segment(&buf, 0).unwrap();
        assert!(payload.is_empty());
        assert_eq!(next, DATA_HEADER_LEN + 1);
    }

    #[test]
    fn test_short_header_is_malformed() {
        let err = read_data_segment(&[3, 0], 0).unwrap_err();
        assert_eq!(
            err,
            PacketError::MalformedHeader {
                offset: 0,
                expected: 4,
                actual: 2
            }
        );

        let err = read_data_segment(&[], 7).unwrap_err();
        assert!(matches!(err, PacketError::MalformedHeader { actual: 0, .. }));
    }

    #[test]
    fn test_missing_delimiter() {
        let err = read_data_segment(&[3, 0, 0, 0, 0xff, b'a'], 0).unwrap_err();
        assert_eq!(err, PacketError::DelimiterNotFound { offset: 4 });

        let err = read_data_segment(&[3, 0, 0, 0], 0).unwrap_err();
        assert_eq!(err, PacketError::DelimiterNotFound { offset: 4 });
    }

    #[test]
    fn test_truncated_payload() {
        let err = read_data_segment(&[5, 0, 0, 0, DELIMITER, b'a', b'b'], 0).unwrap_err();
        assert_eq!(
            err,
            PacketError::TruncatedPayload {
                offset: 5,
                declared: 5,
                available: 2
            }
        );
    }

    #[test]
    fn test_stream_segment_roundtrip() {
        let mut buf = BytesMut::new();
        write_data_segment(&mut buf, b"lead").unwrap();
        let header = write_stream_segment(&mut buf, 7, 1, b"item").unwrap();
        assert_eq!(header, 9);

        let seg = read_stream_segment(&buf, header).unwrap();
        assert_eq!(seg.stream_type, 7);
        assert_eq!(seg.counter, 1);
        assert_eq!(seg.payload, b"item");
        assert_eq!(seg.next_offset, buf.len());
    }

    #[test]
    fn test_increment_stream_counter_in_place() {
        let mut buf = BytesMut::new();
        let header = write_stream_segment(&mut buf, 2, 1, b"x").unwrap();
        let before = buf.len();

        assert_eq!(increment_stream_counter(&mut buf, header).unwrap(), 2);
        assert_eq!(increment_stream_counter(&mut buf, header).unwrap(), 3);
        assert_eq!(buf.len(), before);
        assert_eq!(read_stream_segment(&buf, header).unwrap().counter, 3);
    }

    #[test]
    fn test_increment_rejects_short_buffer() {
        let mut buf = [0u8; 6];
        assert!(matches!(
            increment_stream_counter(&mut buf, 0),
            Err(PacketError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_increment_overflow() {
        let mut buf = BytesMut::new();
        let header = write_stream_segment(&mut buf, 1, u32::MAX, b"").unwrap();
        assert_eq!(
            increment_stream_counter(&mut buf, header),
            Err(PacketError::CounterOverflow(0))
        );
    }

    #[test]
    fn test_protocol_segment_roundtrip() {
        let mut buf = BytesMut::new();
        write_protocol_segment(&mut buf, &[1, 2, -3]);
        assert_eq!(buf.len(), 3 * PROTOCOL_FIELD_LEN + 1);

        let (fields, next) = read_protocol_segment::<3>(&buf, 0).unwrap();
        assert_eq!(fields, [1, 2, -3]);
        assert_eq!(next, buf.len());
    }

    #[test]
    fn test_protocol_segment_bad_field_size() {
        let buf = [4, 0, 1, 0, DELIMITER];
        assert_eq!(
            read_protocol_segment::<1>(&buf, 0),
            Err(PacketError::InvalidFieldSize { offset: 0, size: 4 })
        );
    }

    proptest! {
        #[test]
        fn prop_stream_counter_counts_items(
            items in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..20)
        ) {
            let mut buf = BytesMut::new();
            let header = write_stream_segment(&mut buf, 4, 1, &items[0]).unwrap();
            for item in &items[1..] {
                write_data_segment(&mut buf, item).unwrap();
                increment_stream_counter(&mut buf, header).unwrap();
            }

            let seg = read_stream_segment(&buf, header).unwrap();
            prop_assert_eq!(seg.counter as usize, items.len());
            prop_assert_eq!(seg.payload, &items[0][..]);

            let mut offset = seg.next_offset;
            for item in &items[1..] {
                let (payload, next) = read_data_segment(&buf, offset).unwrap();
                prop_assert_eq!(payload, &item[..]);
                offset = next;
            }
            prop_assert_eq!(offset, buf.len());
        }

        #[test]
        fn prop_truncation_never_panics(
            payload in prop::collection::vec(any::<u8>(), 0..64),
            cut in 0usize..80,
        ) {
            let mut buf = BytesMut::new();
            write_stream_segment(&mut buf, 1, 1, &payload).unwrap();
            let cut = cut.min(buf.len());
            let result = read_stream_segment(&buf[..cut], 0);
            if cut < buf.len() {
                prop_assert!(result.is_err());
            } else {
                prop_assert!(result.is_ok());
            }
        }
    }
}
