//! NOTP protocol messages and their packet encoding.
//!
//! Every packet starts with a protocol segment `(version, operation, phase)`.
//! The phase selects the message kind, and the payload travels as one stream
//! whose type id is fixed per message kind:
//!
//! | Message               | Phase                                   | Stream    | Items                    |
//! |-----------------------|-----------------------------------------|-----------|--------------------------|
//! | `Advertise`           | AdvertiseRequired / AdvertiseLatest     | `REFS`    | `"<oid> <ref>"`          |
//! | `NegotiationRequest`  | Negotiation                             | `WANTS`   | `"have <oid>"`, `"want <oid>"` |
//! | `NegotiationResponse` | Negotiation                             | `COMMITS` | `"<oid>"`                |
//! | `Objects`             | ObjectExchange / ObjectExchangeEnd      | `OBJECTS` | object content           |
//! | `Ack`                 | Ack                                     | `REFS`    | `"<oid> <ref>"`          |
//! | `Reject`              | Reject                                  | `REASON`  | utf-8 text               |
//!
//! An empty list is sent as a packet with no stream.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use notp_core::{Object, Oid, Packet, PacketReader, PacketWriter, ProtocolHeader};

use crate::error::{Result, SyncError};

/// Current protocol version.
pub const PROTOCOL_VERSION: i16 = 1;

/// Stream type ids.
pub mod stream_types {
    pub const REFS: u32 = 1;
    pub const WANTS: u32 = 2;
    pub const COMMITS: u32 = 3;
    pub const OBJECTS: u32 = 4;
    pub const REASON: u32 = 5;
}

/// Protocol limits to prevent resource exhaustion.
pub mod limits {
    /// Max refs in one advertisement.
    pub const MAX_REFS: usize = 1024;
    /// Max commits planned in one negotiation.
    pub const MAX_COMMITS: usize = 100_000;
    /// Max objects in one exchange packet.
    pub const MAX_OBJECTS_PER_PACKET: usize = 4096;
    /// Max ref name length.
    pub const MAX_REF_NAME_LEN: usize = 256;
    /// Max reject reason length.
    pub const MAX_REASON_LEN: usize = 1024;
}

/// Direction of a sync session, from the follower's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationType {
    /// Follower sends its history to the leader.
    #[default]
    Push,
    /// Follower fetches the leader's history.
    Pull,
}

impl OperationType {
    pub fn as_i16(self) -> i16 {
        match self {
            OperationType::Push => 1,
            OperationType::Pull => 2,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(OperationType::Push),
            2 => Some(OperationType::Pull),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Push => "push",
            OperationType::Pull => "pull",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = SyncError;

    /// An empty string selects the default operation.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(OperationType::default()),
            "push" => Ok(OperationType::Push),
            "pull" => Ok(OperationType::Pull),
            other => Err(SyncError::InvalidOperation(other.to_string())),
        }
    }
}

/// Phase carried in the protocol segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolPhase {
    AdvertiseRequiredObjects,
    AdvertiseLatestObjects,
    Negotiation,
    ObjectExchange,
    ObjectExchangeEnd,
    Ack,
    Reject,
}

impl ProtocolPhase {
    pub fn as_i16(self) -> i16 {
        match self {
            ProtocolPhase::AdvertiseRequiredObjects => 1,
            ProtocolPhase::AdvertiseLatestObjects => 2,
            ProtocolPhase::Negotiation => 3,
            ProtocolPhase::ObjectExchange => 4,
            ProtocolPhase::ObjectExchangeEnd => 5,
            ProtocolPhase::Ack => 6,
            ProtocolPhase::Reject => 7,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        Some(match value {
            1 => ProtocolPhase::AdvertiseRequiredObjects,
            2 => ProtocolPhase::AdvertiseLatestObjects,
            3 => ProtocolPhase::Negotiation,
            4 => ProtocolPhase::ObjectExchange,
            5 => ProtocolPhase::ObjectExchangeEnd,
            6 => ProtocolPhase::Ack,
            7 => ProtocolPhase::Reject,
            _ => return None,
        })
    }

    /// Advertisement phase used by `op`.
    pub fn advertise_for(op: OperationType) -> Self {
        match op {
            OperationType::Push => ProtocolPhase::AdvertiseRequiredObjects,
            OperationType::Pull => ProtocolPhase::AdvertiseLatestObjects,
        }
    }
}

impl fmt::Display for ProtocolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One advertised ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefAdvertisement {
    pub name: String,
    pub oid: Oid,
}

impl RefAdvertisement {
    pub fn new(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            name: name.into(),
            oid,
        }
    }

    fn encode(&self) -> String {
        format!("{} {}", self.oid, self.name)
    }

    fn decode(item: &[u8]) -> Result<Self> {
        let text = utf8(item)?;
        let (oid, name) = text
            .split_once(' ')
            .ok_or_else(|| SyncError::InvalidMessage(format!("bad ref line: {:?}", text)))?;
        if name.is_empty() {
            return Err(SyncError::InvalidMessage("empty ref name".into()));
        }
        Ok(Self {
            name: name.to_string(),
            oid: parse_oid(oid)?,
        })
    }
}

/// A decoded NOTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotpMessage {
    /// Refs known to the sender of the message.
    Advertise { refs: Vec<RefAdvertisement> },
    /// Receiver of objects tells the sender its base and the head it wants.
    NegotiationRequest { have: Oid, want: Oid },
    /// Sender of objects lists the commits it will transfer, oldest first.
    NegotiationResponse { commits: Vec<Oid> },
    /// A batch of objects. `last` marks the final batch.
    Objects { objects: Vec<Object>, last: bool },
    /// Receiver confirms the ref it advanced.
    Ack { head: RefAdvertisement },
    /// Either side aborts the exchange.
    Reject { reason: String },
}

impl NotpMessage {
    /// Phase this message travels in for operation `op`.
    pub fn phase(&self, op: OperationType) -> ProtocolPhase {
        match self {
            NotpMessage::Advertise { .. } => ProtocolPhase::advertise_for(op),
            NotpMessage::NegotiationRequest { .. } | NotpMessage::NegotiationResponse { .. } => {
                ProtocolPhase::Negotiation
            }
            NotpMessage::Objects { last: false, .. } => ProtocolPhase::ObjectExchange,
            NotpMessage::Objects { last: true, .. } => ProtocolPhase::ObjectExchangeEnd,
            NotpMessage::Ack { .. } => ProtocolPhase::Ack,
            NotpMessage::Reject { .. } => ProtocolPhase::Reject,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NotpMessage::Advertise { .. } => "advertise",
            NotpMessage::NegotiationRequest { .. } => "negotiation-request",
            NotpMessage::NegotiationResponse { .. } => "negotiation-response",
            NotpMessage::Objects { .. } => "objects",
            NotpMessage::Ack { .. } => "ack",
            NotpMessage::Reject { .. } => "reject",
        }
    }

    /// Validate message limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        match self {
            NotpMessage::Advertise { refs } => {
                if refs.len() > limits::MAX_REFS {
                    return Err("too many refs");
                }
                if refs.iter().any(|r| r.name.len() > limits::MAX_REF_NAME_LEN) {
                    return Err("ref name too long");
                }
            }
            NotpMessage::NegotiationResponse { commits } => {
                if commits.len() > limits::MAX_COMMITS {
                    return Err("too many commits");
                }
            }
            NotpMessage::Objects { objects, .. } => {
                if objects.len() > limits::MAX_OBJECTS_PER_PACKET {
                    return Err("too many objects");
                }
            }
            NotpMessage::Ack { head } => {
                if head.name.len() > limits::MAX_REF_NAME_LEN {
                    return Err("ref name too long");
                }
            }
            NotpMessage::Reject { reason } => {
                if reason.len() > limits::MAX_REASON_LEN {
                    return Err("reject reason too long");
                }
            }
            NotpMessage::NegotiationRequest { .. } => {}
        }
        Ok(())
    }

    /// Encode into a packet for `op` at protocol `version`.
    pub fn encode(&self, version: i16, op: OperationType) -> Result<Packet> {
        self.validate_limits()
            .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;

        let mut writer = PacketWriter::new();
        writer.write_protocol(ProtocolHeader::new(
            version,
            op.as_i16(),
            self.phase(op).as_i16(),
        ))?;

        match self {
            NotpMessage::Advertise { refs } => {
                for r in refs {
                    writer.append_stream_item(stream_types::REFS, r.encode().as_bytes())?;
                }
            }
            NotpMessage::NegotiationRequest { have, want } => {
                let have = format!("have {}", have);
                let want = format!("want {}", want);
                writer.append_stream_item(stream_types::WANTS, have.as_bytes())?;
                writer.append_stream_item(stream_types::WANTS, want.as_bytes())?;
            }
            NotpMessage::NegotiationResponse { commits } => {
                for oid in commits {
                    writer.append_stream_item(stream_types::COMMITS, oid.to_hex().as_bytes())?;
                }
            }
            NotpMessage::Objects { objects, .. } => {
                for object in objects {
                    writer.append_stream_item(stream_types::OBJECTS, object.content())?;
                }
            }
            NotpMessage::Ack { head } => {
                writer.append_stream_item(stream_types::REFS, head.encode().as_bytes())?;
            }
            NotpMessage::Reject { reason } => {
                writer.append_stream_item(stream_types::REASON, reason.as_bytes())?;
            }
        }

        Ok(writer.finish()?)
    }

    /// Decode a packet. The header is returned as-is so the caller can check
    /// version and operation against its own session.
    pub fn decode(packet: &Packet) -> Result<(ProtocolHeader, Self)> {
        let mut reader = PacketReader::new(packet);
        let header = reader.read_protocol()?;
        let stream = reader.read_stream()?;
        reader.finish()?;

        let phase = ProtocolPhase::from_i16(header.phase)
            .ok_or_else(|| SyncError::InvalidMessage(format!("unknown phase {}", header.phase)))?;

        let (stream_type, items) = match stream {
            Some(stream) => (Some(stream.stream_type), stream.items),
            None => (None, Vec::new()),
        };
        let expect = |expected: u32| -> Result<()> {
            match stream_type {
                Some(got) if got != expected => Err(SyncError::InvalidMessage(format!(
                    "stream type {} in {} packet",
                    got, phase
                ))),
                _ => Ok(()),
            }
        };

        let message = match phase {
            ProtocolPhase::AdvertiseRequiredObjects | ProtocolPhase::AdvertiseLatestObjects => {
                expect(stream_types::REFS)?;
                let refs = items
                    .iter()
                    .map(|item| RefAdvertisement::decode(item))
                    .collect::<Result<Vec<_>>>()?;
                NotpMessage::Advertise { refs }
            }
            ProtocolPhase::Negotiation if stream_type == Some(stream_types::WANTS) => {
                decode_wants(&items)?
            }
            ProtocolPhase::Negotiation => {
                expect(stream_types::COMMITS)?;
                let commits = items
                    .iter()
                    .map(|item| utf8(item).and_then(parse_oid))
                    .collect::<Result<Vec<_>>>()?;
                NotpMessage::NegotiationResponse { commits }
            }
            ProtocolPhase::ObjectExchange | ProtocolPhase::ObjectExchangeEnd => {
                expect(stream_types::OBJECTS)?;
                let objects = items
                    .into_iter()
                    .map(Object::from_content)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                NotpMessage::Objects {
                    objects,
                    last: phase == ProtocolPhase::ObjectExchangeEnd,
                }
            }
            ProtocolPhase::Ack => {
                expect(stream_types::REFS)?;
                let [item] = items.as_slice() else {
                    return Err(SyncError::InvalidMessage("ack must carry one ref".into()));
                };
                NotpMessage::Ack {
                    head: RefAdvertisement::decode(item)?,
                }
            }
            ProtocolPhase::Reject => {
                expect(stream_types::REASON)?;
                let reason = match items.first() {
                    Some(item) => utf8(item)?.to_string(),
                    None => String::new(),
                };
                NotpMessage::Reject { reason }
            }
        };

        message
            .validate_limits()
            .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        Ok((header, message))
    }
}

fn decode_wants(items: &[Bytes]) -> Result<NotpMessage> {
    let mut have = None;
    let mut want = None;
    for item in items {
        let text = utf8(item)?;
        let (key, value) = text
            .split_once(' ')
            .ok_or_else(|| SyncError::InvalidMessage(format!("bad negotiation line: {:?}", text)))?;
        let slot = match key {
            "have" => &mut have,
            "want" => &mut want,
            _ => {
                return Err(SyncError::InvalidMessage(format!(
                    "bad negotiation line: {:?}",
                    text
                )))
            }
        };
        if slot.replace(parse_oid(value)?).is_some() {
            return Err(SyncError::InvalidMessage(format!("duplicate {} line", key)));
        }
    }
    match (have, want) {
        (Some(have), Some(want)) => Ok(NotpMessage::NegotiationRequest { have, want }),
        _ => Err(SyncError::InvalidMessage(
            "negotiation request needs have and want".into(),
        )),
    }
}

fn utf8(item: &[u8]) -> Result<&str> {
    std::str::from_utf8(item).map_err(|_| SyncError::InvalidMessage("item is not utf-8".into()))
}

fn parse_oid(s: &str) -> Result<Oid> {
    Oid::from_hex(s).map_err(|_| SyncError::InvalidMessage(format!("bad oid: {:?}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notp_core::create_blob_object;

    fn roundtrip(message: NotpMessage, op: OperationType) -> NotpMessage {
        let packet = message.encode(PROTOCOL_VERSION, op).unwrap();
        let (header, decoded) = NotpMessage::decode(&packet).unwrap();
        assert_eq!(header.version, PROTOCOL_VERSION);
        assert_eq!(header.operation, op.as_i16());
        assert_eq!(header.phase, message.phase(op).as_i16());
        decoded
    }

    #[test]
    fn test_operation_parsing() {
        assert_eq!("".parse::<OperationType>().unwrap(), OperationType::Push);
        assert_eq!("push".parse::<OperationType>().unwrap(), OperationType::Push);
        assert_eq!("pull".parse::<OperationType>().unwrap(), OperationType::Pull);
        assert!(matches!(
            "merge".parse::<OperationType>(),
            Err(SyncError::InvalidOperation(op)) if op == "merge"
        ));
        assert_eq!(OperationType::default(), OperationType::Push);
        assert_eq!(OperationType::from_i16(2), Some(OperationType::Pull));
        assert_eq!(OperationType::from_i16(0), None);
    }

    #[test]
    fn test_phase_codes_roundtrip() {
        for code in 1..=7 {
            assert_eq!(ProtocolPhase::from_i16(code).unwrap().as_i16(), code);
        }
        assert_eq!(ProtocolPhase::from_i16(8), None);
    }

    #[test]
    fn test_advertise_phase_follows_operation() {
        let message = NotpMessage::Advertise { refs: vec![] };
        assert_eq!(
            message.phase(OperationType::Push),
            ProtocolPhase::AdvertiseRequiredObjects
        );
        assert_eq!(
            message.phase(OperationType::Pull),
            ProtocolPhase::AdvertiseLatestObjects
        );
    }

    #[test]
    fn test_message_roundtrips() {
        let blob = create_blob_object(b"payload").unwrap();
        let messages = [
            NotpMessage::Advertise { refs: vec![] },
            NotpMessage::Advertise {
                refs: vec![
                    RefAdvertisement::new("refs/heads/main", Oid::digest(b"a")),
                    RefAdvertisement::new("refs/heads/with space", Oid::ZERO),
                ],
            },
            NotpMessage::NegotiationRequest {
                have: Oid::ZERO,
                want: Oid::digest(b"w"),
            },
            NotpMessage::NegotiationResponse { commits: vec![] },
            NotpMessage::NegotiationResponse {
                commits: vec![Oid::digest(b"1"), Oid::digest(b"2")],
            },
            NotpMessage::Objects {
                objects: vec![blob.clone()],
                last: false,
            },
            NotpMessage::Objects {
                objects: vec![],
                last: true,
            },
            NotpMessage::Ack {
                head: RefAdvertisement::new("refs/heads/main", blob.oid()),
            },
            NotpMessage::Reject {
                reason: "non-fast-forward".into(),
            },
        ];
        for message in messages {
            for op in [OperationType::Push, OperationType::Pull] {
                assert_eq!(roundtrip(message.clone(), op), message);
            }
        }
    }

    #[test]
    fn test_unknown_phase_rejected() {
        let mut writer = PacketWriter::new();
        writer
            .write_protocol(ProtocolHeader::new(PROTOCOL_VERSION, 1, 42))
            .unwrap();
        let packet = writer.finish().unwrap();
        assert!(matches!(
            NotpMessage::decode(&packet),
            Err(SyncError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_wrong_stream_type_rejected() {
        let mut writer = PacketWriter::new();
        writer
            .write_protocol(ProtocolHeader::new(
                PROTOCOL_VERSION,
                1,
                ProtocolPhase::Ack.as_i16(),
            ))
            .unwrap();
        writer
            .append_stream_item(stream_types::OBJECTS, b"x")
            .unwrap();
        assert!(matches!(
            NotpMessage::decode(&writer.finish().unwrap()),
            Err(SyncError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_negotiation_request_needs_both_lines() {
        let mut writer = PacketWriter::new();
        writer
            .write_protocol(ProtocolHeader::new(
                PROTOCOL_VERSION,
                1,
                ProtocolPhase::Negotiation.as_i16(),
            ))
            .unwrap();
        writer
            .append_stream_item(stream_types::WANTS, format!("want {}", Oid::ZERO).as_bytes())
            .unwrap();
        assert!(matches!(
            NotpMessage::decode(&writer.finish().unwrap()),
            Err(SyncError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_corrupted_object_rejected() {
        let mut writer = PacketWriter::new();
        writer
            .write_protocol(ProtocolHeader::new(
                PROTOCOL_VERSION,
                1,
                ProtocolPhase::ObjectExchange.as_i16(),
            ))
            .unwrap();
        writer
            .append_stream_item(stream_types::OBJECTS, b"blob 9\0short")
            .unwrap();
        assert!(matches!(
            NotpMessage::decode(&writer.finish().unwrap()),
            Err(SyncError::Object(_))
        ));
    }

    #[test]
    fn test_limits_enforced_on_encode() {
        let refs = (0..=limits::MAX_REFS)
            .map(|i| RefAdvertisement::new(format!("refs/heads/{i}"), Oid::ZERO))
            .collect();
        assert!(matches!(
            NotpMessage::Advertise { refs }.encode(PROTOCOL_VERSION, OperationType::Push),
            Err(SyncError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_truncated_packet_is_packet_error() {
        let packet = NotpMessage::Reject {
            reason: "stop".into(),
        }
        .encode(PROTOCOL_VERSION, OperationType::Push)
        .unwrap();
        let cut = Packet::from_bytes(packet.data().slice(..packet.len() - 1));
        assert!(matches!(
            NotpMessage::decode(&cut),
            Err(SyncError::Packet(_))
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn oid() -> impl Strategy<Value = Oid> {
            any::<[u8; 32]>().prop_map(Oid::from_bytes)
        }

        proptest! {
            #[test]
            fn decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
                let _ = NotpMessage::decode(&Packet::from_bytes(data));
            }

            #[test]
            fn negotiation_response_keeps_order(commits in prop::collection::vec(oid(), 0..64)) {
                let message = NotpMessage::NegotiationResponse { commits };
                prop_assert_eq!(roundtrip(message.clone(), OperationType::Pull), message);
            }

            #[test]
            fn request_roundtrips(have in oid(), want in oid(), push in any::<bool>()) {
                let op = if push { OperationType::Push } else { OperationType::Pull };
                let message = NotpMessage::NegotiationRequest { have, want };
                prop_assert_eq!(roundtrip(message.clone(), op), message);
            }
        }
    }
}
