//! Proptest generators for property-based testing.

use proptest::prelude::*;

use notp_core::{
    create_blob_object, create_commit_object, CommitBuilder, Identity, Object, Oid, Packet,
    PacketError, PacketWriter, ProtocolHeader, Tree, TreeEntry,
};

/// Generate a random Oid.
pub fn oid() -> impl Strategy<Value = Oid> {
    any::<[u8; 32]>().prop_map(Oid::from_bytes)
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=4_102_444_800
}

/// Generate a UTC offset within real-world bounds.
pub fn tz_offset() -> impl Strategy<Value = i32> {
    -720i32..=840
}

pub fn identity() -> impl Strategy<Value = Identity> {
    ("[A-Za-z][A-Za-z .-]{0,23}", timestamp(), tz_offset())
        .prop_map(|(name, ts, offset)| Identity::new(name, ts, offset))
}

/// Generate a tree entry name.
pub fn entry_name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.][A-Za-z0-9_. -]{0,31}".prop_map(String::from)
}

pub fn tree_entry() -> impl Strategy<Value = TreeEntry> {
    (entry_name(), oid(), 0u8..3).prop_map(|(name, oid, kind)| match kind {
        0 => TreeEntry::blob(name, oid),
        1 => TreeEntry::executable(name, oid),
        _ => TreeEntry::tree(name, oid),
    })
}

/// Generate a tree with unique entry names.
pub fn tree(max_entries: usize) -> impl Strategy<Value = Tree> {
    prop::collection::btree_map(entry_name(), tree_entry(), 0..=max_entries).prop_filter_map(
        "tree entries rejected",
        |entries| {
            Tree::from_entries(
                entries
                    .into_iter()
                    .map(|(name, entry)| TreeEntry { name, ..entry }),
            )
            .ok()
        },
    )
}

/// Generate a non-empty blob payload of specified max length.
pub fn blob_payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=max_len.max(1))
}

pub fn blob(max_len: usize) -> impl Strategy<Value = Object> {
    blob_payload(max_len).prop_filter_map("blob creation failed", |data| {
        create_blob_object(&data).ok()
    })
}

/// Generate a commit message, possibly multi-line.
pub fn message() -> impl Strategy<Value = String> {
    "[ -~\n]{0,120}".prop_map(String::from)
}

/// Parameters for generating a commit.
#[derive(Debug, Clone)]
pub struct CommitParams {
    pub tree: Oid,
    pub parent: Oid,
    pub author: Identity,
    pub committer: Identity,
    pub message: String,
}

impl Arbitrary for CommitParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            oid(),
            prop_oneof![Just(Oid::ZERO), oid()],
            identity(),
            identity(),
            message(),
        )
            .prop_map(|(tree, parent, author, committer, message)| CommitParams {
                tree,
                parent,
                author,
                committer,
                message,
            })
            .boxed()
    }
}

/// Build a commit object from parameters.
pub fn commit_from_params(params: &CommitParams) -> Object {
    create_commit_object(
        &CommitBuilder::new(params.tree)
            .parent(params.parent)
            .author(params.author.clone())
            .committer(params.committer.clone())
            .message(params.message.clone())
            .build(),
    )
}

/// Parameters for generating a single-stream packet.
#[derive(Debug, Clone)]
pub struct PacketParams {
    pub header: ProtocolHeader,
    pub stream_type: u32,
    /// Empty means a packet with only the protocol segment.
    pub items: Vec<Vec<u8>>,
}

impl Arbitrary for PacketParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<i16>(),
            any::<i16>(),
            any::<i16>(),
            1u32..=8,
            prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16),
        )
            .prop_map(|(version, operation, phase, stream_type, items)| PacketParams {
                header: ProtocolHeader::new(version, operation, phase),
                stream_type,
                items,
            })
            .boxed()
    }
}

/// Encode a packet from parameters.
pub fn packet_from_params(params: &PacketParams) -> Result<Packet, PacketError> {
    let mut writer = PacketWriter::new();
    writer.write_protocol(params.header)?;
    for item in &params.items {
        writer.append_stream_item(params.stream_type, item)?;
    }
    writer.finish()
}
