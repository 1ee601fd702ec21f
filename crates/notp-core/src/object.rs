//! Content-addressed objects.
//!
//! ```text
//! Object.Content := "<type> <decimal-length>" | 0x00 | payload[length]
//! OID            := SHA-256(payload)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::commit::{deserialize_commit, serialize_commit, Commit};
use crate::error::ObjectError;
use crate::oid::Oid;
use crate::tree::{deserialize_tree, serialize_tree, Tree};

type Result<T> = std::result::Result<T, ObjectError>;

/// Separates the header from the payload.
pub const HEADER_SEPARATOR: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "commit" => Ok(ObjectType::Commit),
            "tree" => Ok(ObjectType::Tree),
            "blob" => Ok(ObjectType::Blob),
            other => Err(ObjectError::UnsupportedObjectType(other.to_string())),
        }
    }
}

/// An immutable stored object.
///
/// Fields are private so that an `Object` always carries the OID of its own
/// payload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Object {
    oid: Oid,
    content: Bytes,
}

impl Object {
    /// Frame `payload` under `object_type`.
    pub fn create(object_type: ObjectType, payload: &[u8]) -> Self {
        let header = format!("{} {}", object_type, payload.len());
        let mut content = BytesMut::with_capacity(header.len() + 1 + payload.len());
        content.put_slice(header.as_bytes());
        content.put_u8(HEADER_SEPARATOR);
        content.put_slice(payload);
        Self {
            oid: Oid::digest(payload),
            content: content.freeze(),
        }
    }

    /// Rebuild an object from raw content, deriving its OID.
    ///
    /// Used on everything that arrives over the wire or out of storage.
    pub fn from_content(content: impl Into<Bytes>) -> Result<Self> {
        let content = content.into();
        let (_, payload) = split_content(&content)?;
        Ok(Self {
            oid: Oid::digest(payload),
            content,
        })
    }

    /// Rebuild an object and check it against an expected OID.
    pub fn from_parts(oid: Oid, content: impl Into<Bytes>) -> Result<Self> {
        let object = Self::from_content(content)?;
        if object.oid != oid {
            return Err(ObjectError::OidMismatch {
                oid,
                computed: object.oid,
            });
        }
        Ok(object)
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn into_content(self) -> Bytes {
        self.content
    }

    pub fn object_type(&self) -> Result<ObjectType> {
        split_content(&self.content).map(|(t, _)| t)
    }

    pub fn payload(&self) -> Result<&[u8]> {
        split_content(&self.content).map(|(_, p)| p)
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("oid", &self.oid)
            .field("size", &self.content.len())
            .finish()
    }
}

fn split_content(content: &[u8]) -> Result<(ObjectType, &[u8])> {
    let sep = content
        .iter()
        .position(|b| *b == HEADER_SEPARATOR)
        .ok_or(ObjectError::MissingSeparator)?;
    let header = std::str::from_utf8(&content[..sep])
        .map_err(|_| {
            ObjectError::InvalidHeader(String::from_utf8_lossy(&content[..sep]).into_owned())
        })?;
    let (kind, len) = header
        .split_once(' ')
        .ok_or_else(|| ObjectError::InvalidHeader(header.to_string()))?;
    let declared: usize = len
        .parse()
        .map_err(|_| ObjectError::InvalidHeader(header.to_string()))?;
    let object_type = kind.parse::<ObjectType>()?;

    let payload = &content[sep + 1..];
    if declared != payload.len() {
        return Err(ObjectError::ContentLengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    Ok((object_type, payload))
}

pub fn create_commit_object(commit: &Commit) -> Object {
    Object::create(ObjectType::Commit, &serialize_commit(commit))
}

pub fn create_tree_object(tree: &Tree) -> Object {
    Object::create(ObjectType::Tree, &serialize_tree(tree))
}

/// Blobs must carry content.
pub fn create_blob_object(data: &[u8]) -> Result<Object> {
    if data.is_empty() {
        return Err(ObjectError::EmptyBlobData);
    }
    Ok(Object::create(ObjectType::Blob, data))
}

/// Typed payload of a decoded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectInstance {
    Commit(Commit),
    Tree(Tree),
    Blob(Bytes),
}

impl ObjectInstance {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectInstance::Commit(_) => ObjectType::Commit,
            ObjectInstance::Tree(_) => ObjectType::Tree,
            ObjectInstance::Blob(_) => ObjectType::Blob,
        }
    }
}

/// Decoded view of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub oid: Oid,
    pub instance: ObjectInstance,
}

impl ObjectInfo {
    pub fn object_type(&self) -> ObjectType {
        self.instance.object_type()
    }

    pub fn into_commit(self) -> Result<Commit> {
        match self.instance {
            ObjectInstance::Commit(commit) => Ok(commit),
            other => Err(ObjectError::UnexpectedObjectType {
                oid: self.oid,
                expected: "commit",
                actual: other.object_type().as_str(),
            }),
        }
    }

    pub fn into_tree(self) -> Result<Tree> {
        match self.instance {
            ObjectInstance::Tree(tree) => Ok(tree),
            other => Err(ObjectError::UnexpectedObjectType {
                oid: self.oid,
                expected: "tree",
                actual: other.object_type().as_str(),
            }),
        }
    }
}

pub fn get_object_info(object: &Object) -> Result<ObjectInfo> {
    let (object_type, payload) = split_content(&object.content)?;
    let instance = match object_type {
        ObjectType::Commit => ObjectInstance::Commit(deserialize_commit(payload)?),
        ObjectType::Tree => ObjectInstance::Tree(deserialize_tree(payload)?),
        ObjectType::Blob => {
            if payload.is_empty() {
                return Err(ObjectError::EmptyBlobData);
            }
            ObjectInstance::Blob(object.content.slice_ref(payload))
        }
    };
    Ok(ObjectInfo {
        oid: object.oid,
        instance,
    })
}
