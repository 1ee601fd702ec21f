//! Tree payload codec.
//!
//! One line per entry: `"<mode:06o> <type> <oid> <name>\n"`. Entries are
//! kept sorted by `(oid, name)` so that the tree OID does not depend on
//! insertion order and a decoded tree compares equal to the one encoded.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ObjectError;
use crate::oid::Oid;

type Result<T> = std::result::Result<T, ObjectError>;

/// Regular file.
pub const MODE_FILE: u32 = 0o100644;
/// Executable file.
pub const MODE_EXECUTABLE: u32 = 0o100755;
/// Sub-tree.
pub const MODE_TREE: u32 = 0o040000;

/// Largest mode that fits the six-digit octal field.
const MODE_MAX: u32 = 0o777777;

/// Kind of object a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryType {
    Blob,
    Tree,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Blob => "blob",
            EntryType::Tree => "tree",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(EntryType::Blob),
            "tree" => Ok(EntryType::Tree),
            other => Err(ObjectError::UnsupportedObjectType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEntry {
    pub mode: u32,
    pub entry_type: EntryType,
    pub oid: Oid,
    pub name: String,
}

impl TreeEntry {
    pub fn blob(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            mode: MODE_FILE,
            entry_type: EntryType::Blob,
            oid,
            name: name.into(),
        }
    }

    pub fn executable(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            mode: MODE_EXECUTABLE,
            ..Self::blob(name, oid)
        }
    }

    pub fn tree(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            mode: MODE_TREE,
            entry_type: EntryType::Tree,
            oid,
            name: name.into(),
        }
    }

    fn sort_key(&self) -> (&Oid, &str) {
        (&self.oid, &self.name)
    }

    fn parse(line: &str) -> Result<Self> {
        let invalid = || ObjectError::InvalidEntryFormat(line.to_string());

        let fields: Vec<&str> = line.splitn(4, ' ').collect();
        let [mode, entry_type, oid, name] = fields[..] else {
            return Err(invalid());
        };
        if mode.len() != 6 || name.is_empty() {
            return Err(invalid());
        }
        let mode = u32::from_str_radix(mode, 8).map_err(|_| invalid())?;
        let entry_type = entry_type.parse::<EntryType>().map_err(|_| invalid())?;
        let oid = Oid::from_hex(oid).map_err(|_| invalid())?;

        Ok(Self {
            mode,
            entry_type,
            oid,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for TreeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:06o} {} {} {}",
            self.mode, self.entry_type, self.oid, self.name
        )
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\n') || name.contains('\0') {
        return Err(ObjectError::InvalidEntryName(name.to_string()));
    }
    Ok(())
}

/// A flat manifest of named entries, held in `(oid, name)` order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TreeEntry>", into = "Vec<TreeEntry>")]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree, rejecting duplicate or unusable names.
    pub fn from_entries(entries: impl IntoIterator<Item = TreeEntry>) -> Result<Self> {
        let mut tree = Self::new();
        for entry in entries {
            tree.add_entry(entry)?;
        }
        Ok(tree)
    }

    /// Insert an entry at its serialization position.
    pub fn add_entry(&mut self, entry: TreeEntry) -> Result<()> {
        validate_name(&entry.name)?;
        if entry.mode > MODE_MAX {
            return Err(ObjectError::InvalidEntryMode(entry.mode));
        }
        if self.entries.iter().any(|e| e.name == entry.name) {
            return Err(ObjectError::DuplicateEntry(entry.name));
        }
        let at = self
            .entries
            .partition_point(|e| e.sort_key() < entry.sort_key());
        self.entries.insert(at, entry);
        Ok(())
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn serialize(&self) -> Vec<u8> {
        serialize_tree(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        deserialize_tree(data)
    }
}

impl TryFrom<Vec<TreeEntry>> for Tree {
    type Error = ObjectError;

    fn try_from(entries: Vec<TreeEntry>) -> Result<Self> {
        Self::from_entries(entries)
    }
}

impl From<Tree> for Vec<TreeEntry> {
    fn from(tree: Tree) -> Self {
        tree.entries
    }
}

pub fn serialize_tree(tree: &Tree) -> Vec<u8> {
    let mut out = String::new();
    for entry in &tree.entries {
        out.push_str(&entry.to_string());
        out.push('\n');
    }
    out.into_bytes()
}

/// Decode a tree payload. Entries are re-sorted, so a payload written in any
/// order decodes to the same tree.
pub fn deserialize_tree(data: &[u8]) -> Result<Tree> {
    let text = std::str::from_utf8(data).map_err(|_| {
        ObjectError::InvalidEntryFormat(String::from_utf8_lossy(data).into_owned())
    })?;

    let body = match text.strip_suffix('\n') {
        Some(body) => body,
        None if text.is_empty() => return Ok(Tree::new()),
        None => return Err(ObjectError::InvalidEntryFormat(text.to_string())),
    };

    let mut tree = Tree::new();
    for line in body.split('\n') {
        tree.add_entry(TreeEntry::parse(line)?)?;
    }
    Ok(tree)
}
