//! Golden test vectors for deterministic verification.
//!
//! These vectors pin object ids and packet bytes so that every NOTP
//! implementation can check itself against the same expected outputs.

use notp_core::{
    create_blob_object, create_commit_object, create_tree_object, CommitBuilder, Identity,
    Object, ObjectError, Oid, Tree, TreeEntry,
};
use notp_sync::{NotpMessage, OperationType, RefAdvertisement, SyncError, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};

const HELLO_BLOB: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
const SCRIPT: &[u8] = b"#!/bin/sh\necho notp\n";
const SCRIPT_BLOB: &str = "2284beed201aa4fb4531d4e274a756f4c11d36709eb701f714500d6638039376";
const EMPTY_TREE: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
const NESTED_TREE: &str = "bfb9064dc5565860995b42e1a307fa1872fe8b1d6272f83a3d3a8242bf0025f7";
const HELLO_TREE: &str = "235002183f25c8cd19335f820754cbf9810e8227a430425529aff20ac501d91a";

/// Input for a golden object.
#[derive(Debug, Clone)]
pub enum VectorInput {
    Blob(&'static [u8]),
    /// `(mode, name, oid hex)`; mode is one of `100644`, `100755`, `040000`.
    Tree(Vec<(u32, &'static str, &'static str)>),
    Commit {
        tree: &'static str,
        parent: &'static str,
        author: (&'static str, i64, i32),
        committer: (&'static str, i64, i32),
        message: &'static str,
    },
}

/// A golden object vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub input: VectorInput,
    /// Expected object id (hex).
    pub expected_oid: &'static str,
}

/// Get all golden object vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "blob with hello payload",
            input: VectorInput::Blob(b"hello"),
            expected_oid: HELLO_BLOB,
        },
        GoldenVector {
            name: "blob with world payload",
            input: VectorInput::Blob(b"world"),
            expected_oid: "486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7",
        },
        GoldenVector {
            name: "binary blob",
            input: VectorInput::Blob(&[0x00, 0x01, 0xff]),
            expected_oid: "26a66b061e8f48f39927c312f25293959729eee95978e2892d49d3512a5cc092",
        },
        GoldenVector {
            name: "executable script blob",
            input: VectorInput::Blob(SCRIPT),
            expected_oid: SCRIPT_BLOB,
        },
        GoldenVector {
            name: "empty tree",
            input: VectorInput::Tree(vec![]),
            expected_oid: EMPTY_TREE,
        },
        GoldenVector {
            name: "tree with one file",
            input: VectorInput::Tree(vec![(0o100644, "hello.txt", HELLO_BLOB)]),
            expected_oid: HELLO_TREE,
        },
        GoldenVector {
            // Entries are listed out of order; encoding sorts them by oid.
            name: "tree with executable and subtree",
            input: VectorInput::Tree(vec![
                (0o040000, "sub", EMPTY_TREE),
                (0o100755, "run.sh", SCRIPT_BLOB),
            ]),
            expected_oid: NESTED_TREE,
        },
        GoldenVector {
            name: "root commit",
            input: VectorInput::Commit {
                tree: HELLO_TREE,
                parent: "",
                author: ("Alice", 1_700_000_000, 0),
                committer: ("Alice", 1_700_000_000, 0),
                message: "init",
            },
            expected_oid: "1eccd2a3badc4ac1ac9a8aa51abb57931410b863dd02bb288ca9e8cde29e0d67",
        },
        GoldenVector {
            name: "commit with offsets and multi-line message",
            input: VectorInput::Commit {
                tree: NESTED_TREE,
                parent: "",
                author: ("Bob", 1_700_000_000, -90),
                committer: ("Carol", 1_700_000_060, 330),
                message: "multi\nline message\n",
            },
            expected_oid: "45bbebd2835cfb892b9e794b6ead9e34da76ffd8d2b7a330dcce071e11caf3ec",
        },
    ]
}

fn oid(hex: &str) -> Result<Oid, ObjectError> {
    if hex.is_empty() {
        return Ok(Oid::ZERO);
    }
    Oid::from_hex(hex).map_err(|_| ObjectError::InvalidOid(hex.to_string()))
}

/// Build the object a vector describes.
pub fn object_from_vector(vector: &GoldenVector) -> Result<Object, ObjectError> {
    match &vector.input {
        VectorInput::Blob(data) => create_blob_object(data),
        VectorInput::Tree(entries) => {
            let mut tree = Tree::new();
            for (mode, name, hex) in entries {
                let oid = oid(hex)?;
                tree.add_entry(match *mode {
                    0o040000 => TreeEntry::tree(*name, oid),
                    0o100755 => TreeEntry::executable(*name, oid),
                    _ => TreeEntry::blob(*name, oid),
                })?;
            }
            Ok(create_tree_object(&tree))
        }
        VectorInput::Commit {
            tree,
            parent,
            author,
            committer,
            message,
        } => {
            let commit = CommitBuilder::new(oid(tree)?)
                .parent(oid(parent)?)
                .author(Identity::new(author.0, author.1, author.2))
                .committer(Identity::new(committer.0, committer.1, committer.2))
                .message(*message)
                .build();
            Ok(create_commit_object(&commit))
        }
    }
}

/// Verify all vectors, returning `(name, matches, actual oid or error)`.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| match object_from_vector(v) {
            Ok(object) => {
                let hex = object.oid().to_hex();
                (v.name.to_string(), hex == v.expected_oid, hex)
            }
            Err(e) => (v.name.to_string(), false, e.to_string()),
        })
        .collect()
}

/// A golden packet vector.
#[derive(Debug, Clone)]
pub struct PacketVector {
    pub name: &'static str,
    pub operation: OperationType,
    pub message: NotpMessage,
    /// Expected packet bytes (hex).
    pub expected_hex: &'static str,
}

pub fn packet_vectors() -> Vec<PacketVector> {
    let main = |hex: &str| RefAdvertisement {
        name: "refs/heads/main".to_string(),
        oid: Oid::from_hex(hex).unwrap_or(Oid::ZERO),
    };
    vec![
        PacketVector {
            name: "push advertise of main",
            operation: OperationType::Push,
            message: NotpMessage::Advertise {
                refs: vec![main(HELLO_BLOB)],
            },
            expected_hex: "02000100020001000200010001010000000100000050000000013263663234646261\
                           356662306133306532366538336232616335623965323965316231363165356331\
                           666137343235653733303433333632393338623938323420726566732f68656164\
                           732f6d61696e",
        },
        PacketVector {
            name: "pull ack of main",
            operation: OperationType::Pull,
            message: NotpMessage::Ack {
                head: main(HELLO_BLOB),
            },
            expected_hex: "02000100020002000200060001010000000100000050000000013263663234646261\
                           356662306133306532366538336232616335623965323965316231363165356331\
                           666137343235653733303433333632393338623938323420726566732f68656164\
                           732f6d61696e",
        },
        PacketVector {
            name: "push reject",
            operation: OperationType::Push,
            message: NotpMessage::Reject {
                reason: "stop".to_string(),
            },
            expected_hex: "020001000200010002000700010500000001000000040000000173746f70",
        },
    ]
}

/// Encode a packet vector with the current protocol version.
pub fn encode_packet_vector(vector: &PacketVector) -> Result<String, SyncError> {
    let packet = vector.message.encode(PROTOCOL_VERSION, vector.operation)?;
    Ok(hex::encode(packet.data()))
}

/// Serializable form of an object vector, for export to other implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedVector {
    pub name: String,
    pub object_type: String,
    /// Full object content (hex).
    pub content: String,
    pub oid: String,
}

/// Every object vector in exportable form; serialize with `serde_json`.
pub fn exported_vectors() -> Result<Vec<ExportedVector>, ObjectError> {
    let mut exported = Vec::new();
    for vector in all_vectors() {
        let object = object_from_vector(&vector)?;
        exported.push(ExportedVector {
            name: vector.name.to_string(),
            object_type: object.object_type()?.to_string(),
            content: hex::encode(object.content()),
            oid: object.oid().to_hex(),
        });
    }
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_match() {
        for (name, matches, actual) in verify_all_vectors() {
            assert!(matches, "vector {:?} produced {}", name, actual);
        }
    }

    #[test]
    fn test_vectors_are_deterministic() {
        for vector in all_vectors() {
            let a = object_from_vector(&vector).unwrap();
            let b = object_from_vector(&vector).unwrap();
            assert_eq!(a, b, "vector {:?} is not deterministic", vector.name);
        }
    }

    #[test]
    fn test_vector_names_are_unique() {
        let vectors = all_vectors();
        let mut names: Vec<_> = vectors.iter().map(|v| v.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), vectors.len());
    }

    #[test]
    fn test_nested_tree_encoding() {
        let vector = all_vectors()
            .into_iter()
            .find(|v| v.name == "tree with executable and subtree")
            .unwrap();
        let object = object_from_vector(&vector).unwrap();
        let expected = format!(
            "100755 blob {} run.sh\n040000 tree {} sub\n",
            SCRIPT_BLOB, EMPTY_TREE
        );
        assert_eq!(object.payload().unwrap(), expected.as_bytes());
    }

    #[test]
    fn test_packet_vectors_match() {
        for vector in packet_vectors() {
            assert_eq!(
                encode_packet_vector(&vector).unwrap(),
                vector.expected_hex,
                "packet vector {:?}",
                vector.name
            );
        }
    }

    #[test]
    fn test_packet_vectors_decode() {
        for vector in packet_vectors() {
            let bytes = hex::decode(vector.expected_hex).unwrap();
            let packet = notp_core::Packet::from_bytes(bytes);
            let (header, message) = NotpMessage::decode(&packet).unwrap();
            assert_eq!(header.version, PROTOCOL_VERSION);
            assert_eq!(header.operation, vector.operation.as_i16());
            assert_eq!(message, vector.message);
        }
    }

    #[test]
    fn test_exported_json_rebuilds_objects() {
        let json = serde_json::to_string_pretty(&exported_vectors().unwrap()).unwrap();
        let exported: Vec<ExportedVector> = serde_json::from_str(&json).unwrap();
        assert_eq!(exported.len(), all_vectors().len());

        for vector in exported {
            let object = Object::from_content(hex::decode(&vector.content).unwrap()).unwrap();
            assert_eq!(object.oid().to_hex(), vector.oid);
            assert_eq!(object.object_type().unwrap().to_string(), vector.object_type);
        }
    }
}
