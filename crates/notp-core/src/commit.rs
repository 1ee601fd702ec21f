//! Commit payload codec.
//!
//! ```text
//! tree <oid>
//! parent <oid>
//! author <unix-ts> <+HHMM> <name>
//! committer <unix-ts> <+HHMM> <name>
//! <message>
//! ```
//!
//! History is a chain: a commit has exactly one parent, the zero OID marking
//! the root. The `parent` line is always written. A `parent` line naming more
//! than one OID is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ObjectError;
use crate::oid::Oid;

type Result<T> = std::result::Result<T, ObjectError>;

const DEFAULT_NAME: &str = "unknown";

/// Widest offset the `±HHMM` field can carry.
pub const MAX_OFFSET_MINUTES: i32 = 99 * 60 + 59;

/// Who made a change and when.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Offset from UTC in minutes.
    pub offset_minutes: i32,
}

impl Identity {
    pub fn new(name: impl Into<String>, timestamp: i64, offset_minutes: i32) -> Self {
        let name = name.into();
        Self {
            name: if name.is_empty() {
                DEFAULT_NAME.to_string()
            } else {
                name
            },
            timestamp,
            offset_minutes,
        }
    }

    /// Like [`Identity::new`], but refuses identities that would not survive
    /// a commit encode and decode.
    pub fn try_new(name: impl Into<String>, timestamp: i64, offset_minutes: i32) -> Result<Self> {
        let identity = Self::new(name, timestamp, offset_minutes);
        identity.validate()?;
        Ok(identity)
    }

    /// Names end at the line break and offsets must fit four digits.
    pub fn validate(&self) -> Result<()> {
        if self.name.contains('\n') || self.name.contains('\0') {
            return Err(ObjectError::InvalidIdentity(format!(
                "name {:?} contains a line break or NUL",
                self.name
            )));
        }
        if self.offset_minutes.unsigned_abs() > MAX_OFFSET_MINUTES as u32 {
            return Err(ObjectError::InvalidIdentity(format!(
                "offset of {} minutes does not fit ±HHMM",
                self.offset_minutes
            )));
        }
        Ok(())
    }

    fn format_offset(&self) -> String {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let abs = self.offset_minutes.unsigned_abs();
        format!("{}{:02}{:02}", sign, abs / 60, abs % 60)
    }

    fn parse(field: &str, line: &str) -> Result<Self> {
        let invalid = || ObjectError::InvalidCommit(format!("bad {} line: {:?}", field, line));

        let mut parts = line.splitn(3, ' ');
        let timestamp = parts
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(invalid)?;
        let offset = parts.next().ok_or_else(invalid)?;
        let name = parts.next().ok_or_else(invalid)?;
        let offset_minutes = parse_offset(offset).ok_or_else(invalid)?;

        Ok(Self {
            name: name.to_string(),
            timestamp,
            offset_minutes,
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.timestamp, self.format_offset(), self.name)
    }
}

fn parse_offset(s: &str) -> Option<i32> {
    let (sign, digits) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    Some(sign * (hours * 60 + minutes))
}

/// A snapshot of a tree plus its place in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree: Oid,
    /// Zero for the root commit.
    pub parent: Oid,
    pub author: Identity,
    pub committer: Identity,
    pub message: String,
}

impl Commit {
    pub fn is_root(&self) -> bool {
        self.parent.is_zero()
    }

    /// Check that the text form decodes back to this commit.
    pub fn validate(&self) -> Result<()> {
        self.author.validate()?;
        self.committer.validate()
    }

    pub fn serialize(&self) -> Vec<u8> {
        serialize_commit(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        deserialize_commit(data)
    }
}

/// Builder for commits.
#[derive(Debug, Clone)]
pub struct CommitBuilder {
    tree: Oid,
    parent: Oid,
    author: Option<Identity>,
    committer: Option<Identity>,
    message: String,
}

impl CommitBuilder {
    pub fn new(tree: Oid) -> Self {
        Self {
            tree,
            parent: Oid::ZERO,
            author: None,
            committer: None,
            message: String::new(),
        }
    }

    pub fn parent(mut self, parent: Oid) -> Self {
        self.parent = parent;
        self
    }

    pub fn author(mut self, author: Identity) -> Self {
        self.author = Some(author);
        self
    }

    /// Defaults to the author when unset.
    pub fn committer(mut self, committer: Identity) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn build(self) -> Commit {
        let author = self
            .author
            .unwrap_or_else(|| Identity::new(DEFAULT_NAME, 0, 0));
        let committer = self.committer.unwrap_or_else(|| author.clone());
        Commit {
            tree: self.tree,
            parent: self.parent,
            author,
            committer,
            message: self.message,
        }
    }
}

pub fn serialize_commit(commit: &Commit) -> Vec<u8> {
    format!(
        "tree {}\nparent {}\nauthor {}\ncommitter {}\n{}",
        commit.tree, commit.parent, commit.author, commit.committer, commit.message
    )
    .into_bytes()
}

/// Splits off one header line, returning the value after `key `.
fn take_header<'a>(rest: &mut &'a str, key: &str) -> Option<&'a str> {
    let text: &'a str = *rest;
    let line_end = text.find('\n').unwrap_or(text.len());
    let value = text[..line_end].strip_prefix(key)?.strip_prefix(' ')?;
    *rest = text.get(line_end + 1..).unwrap_or("");
    Some(value)
}

fn parse_oid(field: &str, value: &str) -> Result<Oid> {
    Oid::from_hex(value)
        .map_err(|_| ObjectError::InvalidCommit(format!("bad {} oid: {:?}", field, value)))
}

pub fn deserialize_commit(data: &[u8]) -> Result<Commit> {
    if data.is_empty() {
        return Err(ObjectError::EmptyData);
    }
    let text = std::str::from_utf8(data)
        .map_err(|_| ObjectError::InvalidCommit("not valid utf-8".to_string()))?;
    let mut rest = text;

    let tree = take_header(&mut rest, "tree")
        .ok_or_else(|| ObjectError::InvalidCommit("missing tree line".to_string()))?;
    let tree = parse_oid("tree", tree)?;

    let parent = match take_header(&mut rest, "parent") {
        None => Oid::ZERO,
        Some(value) if value.contains(' ') => {
            return Err(ObjectError::InvalidCommit(format!(
                "merge commits are not supported: {:?}",
                value
            )))
        }
        Some(value) => parse_oid("parent", value)?,
    };

    let author = take_header(&mut rest, "author")
        .ok_or_else(|| ObjectError::InvalidCommit("missing author line".to_string()))?;
    let author = Identity::parse("author", author)?;

    let committer = take_header(&mut rest, "committer")
        .ok_or_else(|| ObjectError::InvalidCommit("missing committer line".to_string()))?;
    let committer = Identity::parse("committer", committer)?;

    Ok(Commit {
        tree,
        parent,
        author,
        committer,
        message: rest.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn oid(byte: u8) -> Oid {
        Oid::from_bytes([byte; 32])
    }

    #[test]
    fn test_commit_text_form() {
        let alice = Identity::new("Alice", 1_700_000_000, 0);
        let commit = CommitBuilder::new(oid(0xaa))
            .parent(oid(0xbb))
            .author(alice)
            .message("init")
            .build();

        let text = String::from_utf8(serialize_commit(&commit)).unwrap();
        let expected = format!(
            "tree {}\nparent {}\nauthor 1700000000 +0000 Alice\ncommitter 1700000000 +0000 Alice\ninit",
            "aa".repeat(32),
            "bb".repeat(32)
        );
        assert_eq!(text, expected);
        assert_eq!(deserialize_commit(text.as_bytes()).unwrap(), commit);
    }

    #[test]
    fn test_offsets_and_multiline_message() {
        let commit = CommitBuilder::new(oid(1))
            .author(Identity::new("Dana Reyes", 1_628_704_800, 120))
            .committer(Identity::new("Ops Bot", 1_628_704_900, -330))
            .message("Initial commit\n\nwith body\n")
            .build();
        let bytes = commit.serialize();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("author 1628704800 +0200 Dana Reyes\n"));
        assert!(text.contains("committer 1628704900 -0530 Ops Bot\n"));
        assert_eq!(Commit::deserialize(&bytes).unwrap(), commit);
    }

    #[test]
    fn test_root_commit() {
        let commit = CommitBuilder::new(oid(1)).build();
        assert!(commit.is_root());
        assert_eq!(commit.author.name, "unknown");
        assert_eq!(commit.committer, commit.author);
        assert_eq!(Commit::deserialize(&commit.serialize()).unwrap(), commit);
    }

    #[test]
    fn test_commit_json_roundtrip() {
        let commit = CommitBuilder::new(oid(7))
            .parent(oid(8))
            .author(Identity::new("Dana Reyes", 1_700_000_000, -60))
            .message("json")
            .build();
        let json = serde_json::to_string(&commit).unwrap();
        assert_eq!(serde_json::from_str::<Commit>(&json).unwrap(), commit);
    }

    #[test]
    fn test_missing_parent_line_is_root() {
        let text = format!(
            "tree {}\nauthor 1 +0000 a\ncommitter 1 +0000 a\nmsg",
            oid(3)
        );
        let commit = deserialize_commit(text.as_bytes()).unwrap();
        assert!(commit.is_root());
        assert_eq!(commit.message, "msg");
    }

    #[test]
    fn test_identity_line_break_rejected() {
        let err = Identity::try_new("Eve\nparent x", 1, 0).unwrap_err();
        assert!(matches!(err, ObjectError::InvalidIdentity(_)));
        assert!(Identity::try_new("Eve\0", 1, 0).is_err());

        let commit = CommitBuilder::new(oid(1))
            .author(Identity::new("Alice", 1, 0))
            .committer(Identity::new("Eve\nMallory", 1, 0))
            .build();
        assert!(matches!(commit.validate(), Err(ObjectError::InvalidIdentity(_))));
    }

    #[test]
    fn test_identity_offset_range() {
        assert!(matches!(
            Identity::try_new("Al", 1, 6000),
            Err(ObjectError::InvalidIdentity(_))
        ));
        assert!(Identity::try_new("Al", 1, -(MAX_OFFSET_MINUTES + 1)).is_err());

        for offset in [MAX_OFFSET_MINUTES, -MAX_OFFSET_MINUTES] {
            let commit = CommitBuilder::new(oid(1))
                .author(Identity::try_new("Al", 1, offset).unwrap())
                .build();
            commit.validate().unwrap();
            assert_eq!(Commit::deserialize(&commit.serialize()).unwrap(), commit);
        }
    }

    #[test]
    fn test_empty_data() {
        assert_eq!(deserialize_commit(b""), Err(ObjectError::EmptyData));
    }

    #[test]
    fn test_merge_parent_rejected() {
        let text = format!(
            "tree {}\nparent {} {}\nauthor 1 +0000 a\ncommitter 1 +0000 a\n",
            oid(1),
            oid(2),
            oid(3)
        );
        assert!(matches!(
            deserialize_commit(text.as_bytes()),
            Err(ObjectError::InvalidCommit(_))
        ));
    }

    #[test]
    fn test_malformed_lines() {
        let cases = [
            "parent 00\n".to_string(),
            format!("tree {}\nauthor x +0000 a\ncommitter 1 +0000 a\n", oid(1)),
            format!("tree {}\nauthor 1 0000 a\ncommitter 1 +0000 a\n", oid(1)),
            format!("tree {}\nauthor 1 +0000 a\n", oid(1)),
            "tree nothex\n".to_string(),
        ];
        for case in cases {
            assert!(
                matches!(
                    deserialize_commit(case.as_bytes()),
                    Err(ObjectError::InvalidCommit(_))
                ),
                "accepted {:?}",
                case
            );
        }
    }

    proptest! {
        #[test]
        fn prop_commit_roundtrip(
            tree in any::<[u8; 32]>(),
            parent in any::<[u8; 32]>(),
            name in "[A-Za-z][A-Za-z ]{0,20}",
            ts in any::<i64>(),
            offset in -720i32..=840,
            message in ".*",
        ) {
            let commit = CommitBuilder::new(Oid::from_bytes(tree))
                .parent(Oid::from_bytes(parent))
                .author(Identity::new(name, ts, offset))
                .message(message)
                .build();
            prop_assert_eq!(deserialize_commit(&commit.serialize()).unwrap(), commit);
        }
    }
}
