//! Packets: a protocol segment optionally followed by one stream.
//!
//! ```text
//! Packet := ProtocolSegment [ StreamSegment DataSegment{counter - 1} ]
//! ```
//!
//! The first item of a stream travels in a stream segment carrying the stream
//! type and item counter. Later items are plain data segments, and the writer
//! bumps the counter of the opening segment in place as it appends them.

use bytes::{Bytes, BytesMut};
use std::fmt;

use crate::error::PacketError;
use crate::segment::{
    increment_stream_counter, read_data_segment, read_protocol_segment, read_stream_segment,
    write_data_segment, write_protocol_segment, write_stream_segment,
};

type Result<T> = std::result::Result<T, PacketError>;

const PROTOCOL_FIELDS: usize = 3;

/// An opaque framed byte buffer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Packet {
    data: Bytes,
}

impl Packet {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet({} bytes)", self.data.len())
    }
}

/// The three fields carried by every protocol segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolHeader {
    pub version: i16,
    pub operation: i16,
    pub phase: i16,
}

impl ProtocolHeader {
    pub fn new(version: i16, operation: i16, phase: i16) -> Self {
        Self {
            version,
            operation,
            phase,
        }
    }

    fn to_fields(self) -> [i16; PROTOCOL_FIELDS] {
        [self.version, self.operation, self.phase]
    }

    fn from_fields([version, operation, phase]: [i16; PROTOCOL_FIELDS]) -> Self {
        Self {
            version,
            operation,
            phase,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenStream {
    stream_type: u32,
    header_offset: usize,
}

/// Incremental packet builder.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
    protocol_written: bool,
    stream: Option<OpenStream>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the protocol segment. Must be called exactly once, first.
    pub fn write_protocol(&mut self, header: ProtocolHeader) -> Result<()> {
        if self.protocol_written {
            return Err(PacketError::ProtocolAlreadyWritten);
        }
        write_protocol_segment(&mut self.buf, &header.to_fields());
        self.protocol_written = true;
        Ok(())
    }

    /// Append one item to the packet's stream, opening it on the first call.
    ///
    /// Returns the stream counter after the append.
    pub fn append_stream_item(&mut self, stream_type: u32, payload: &[u8]) -> Result<u32> {
        if !self.protocol_written {
            return Err(PacketError::MissingProtocol);
        }
        match self.stream {
            None => {
                let header_offset = write_stream_segment(&mut self.buf, stream_type, 1, payload)?;
                self.stream = Some(OpenStream {
                    stream_type,
                    header_offset,
                });
                Ok(1)
            }
            Some(open) if open.stream_type != stream_type => Err(PacketError::StreamTypeMismatch {
                expected: open.stream_type,
                got: stream_type,
            }),
            Some(open) => {
                write_data_segment(&mut self.buf, payload)?;
                increment_stream_counter(&mut self.buf, open.header_offset)
            }
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Result<Packet> {
        if !self.protocol_written {
            return Err(PacketError::MissingProtocol);
        }
        Ok(Packet {
            data: self.buf.freeze(),
        })
    }
}

/// All items of a packet's stream, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketStream {
    pub stream_type: u32,
    pub items: Vec<Bytes>,
}

/// Sequential packet decoder. Items are zero-copy slices of the packet.
#[derive(Debug)]
pub struct PacketReader {
    data: Bytes,
    offset: usize,
    protocol_read: bool,
}

impl PacketReader {
    pub fn new(packet: &Packet) -> Self {
        Self {
            data: packet.data.clone(),
            offset: 0,
            protocol_read: false,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn read_protocol(&mut self) -> Result<ProtocolHeader> {
        if self.protocol_read {
            return Err(PacketError::ProtocolAlreadyWritten);
        }
        let (fields, next) = read_protocol_segment::<PROTOCOL_FIELDS>(&self.data, self.offset)?;
        self.offset = next;
        self.protocol_read = true;
        Ok(ProtocolHeader::from_fields(fields))
    }

    /// Read the stream following the protocol segment, if there is one.
    pub fn read_stream(&mut self) -> Result<Option<PacketStream>> {
        if !self.protocol_read {
            return Err(PacketError::MissingProtocol);
        }
        if self.offset == self.data.len() {
            return Ok(None);
        }

        let seg = read_stream_segment(&self.data, self.offset)?;
        if seg.counter == 0 {
            return Err(PacketError::InvalidStreamCounter(0));
        }
        let stream_type = seg.stream_type;
        let counter = seg.counter;
        let mut items = Vec::with_capacity((counter as usize).min(1024));
        items.push(self.data.slice_ref(seg.payload));
        let mut offset = seg.next_offset;

        for _ in 1..counter {
            let (payload, next) = read_data_segment(&self.data, offset)?;
            items.push(self.data.slice_ref(payload));
            offset = next;
        }

        self.offset = offset;
        Ok(Some(PacketStream { stream_type, items }))
    }

    /// Require that the whole packet was consumed.
    pub fn finish(self) -> Result<()> {
        match self.data.len() - self.offset {
            0 => Ok(()),
            n => Err(PacketError::TrailingBytes(n)),
        }
    }
}
