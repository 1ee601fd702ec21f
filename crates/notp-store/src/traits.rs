//! Store traits: the abstract interface for object and ref persistence.

use std::collections::HashSet;

use async_trait::async_trait;
use notp_core::{
    get_object_info, Commit, CommitHistory, EntryType, HistoryWalk, Object, ObjectInfo, Oid,
};

use crate::error::{Result, StoreError};

/// Result of inserting an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Object was inserted.
    Inserted,
    /// Object already exists (idempotent, not an error).
    AlreadyExists,
}

/// Async interface for object and ref persistence.
///
/// Objects are immutable and keyed by OID. Refs are named pointers to commit
/// OIDs and only move through [`compare_and_set_ref`](Self::compare_and_set_ref).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Object Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert an object. Inserting an existing OID is a no-op.
    async fn insert_object(&self, object: &Object) -> Result<InsertResult>;

    async fn get_object(&self, oid: &Oid) -> Result<Option<Object>>;

    async fn has_object(&self, oid: &Oid) -> Result<bool>;

    /// All stored OIDs, sorted.
    async fn list_objects(&self) -> Result<Vec<Oid>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Ref Operations
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_ref(&self, name: &str) -> Result<Option<Oid>>;

    /// Point `name` at `new` if it currently points at `expected`.
    ///
    /// A missing ref counts as [`Oid::ZERO`]. Setting a ref to the zero OID
    /// deletes it. Returns whether the update was applied.
    async fn compare_and_set_ref(&self, name: &str, expected: Oid, new: Oid) -> Result<bool>;

    /// All refs, sorted by name.
    async fn list_refs(&self) -> Result<Vec<(String, Oid)>>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: ObjectStore {
    /// Like `get_object`, but a missing object is an error.
    fn fetch_object(
        &self,
        oid: &Oid,
    ) -> impl std::future::Future<Output = Result<Object>> + Send;

    fn object_info(
        &self,
        oid: &Oid,
    ) -> impl std::future::Future<Output = Result<ObjectInfo>> + Send;

    fn fetch_commit(&self, oid: &Oid)
        -> impl std::future::Future<Output = Result<Commit>> + Send;

    /// Current value of a ref, zero when absent.
    fn head(&self, name: &str) -> impl std::future::Future<Output = Result<Oid>> + Send;

    /// Walk commit history from `from` towards `to`.
    fn commit_history(
        &self,
        from: Oid,
        to: Oid,
        reverse: bool,
    ) -> impl std::future::Future<Output = Result<CommitHistory>> + Send;

    /// Every object needed to materialize `commits`, without duplicates.
    ///
    /// Each commit contributes its blobs and sub-trees before the trees that
    /// reference them, then its root tree, then the commit itself.
    fn reachable_objects(
        &self,
        commits: &[Oid],
    ) -> impl std::future::Future<Output = Result<Vec<Object>>> + Send;
}

enum Frame {
    Visit(Oid, EntryType),
    Emit(Object),
}

impl<S: ObjectStore + ?Sized> StoreExt for S {
    async fn fetch_object(&self, oid: &Oid) -> Result<Object> {
        self.get_object(oid)
            .await?
            .ok_or(StoreError::NotFound(*oid))
    }

    async fn object_info(&self, oid: &Oid) -> Result<ObjectInfo> {
        let object = self.fetch_object(oid).await?;
        Ok(get_object_info(&object)?)
    }

    async fn fetch_commit(&self, oid: &Oid) -> Result<Commit> {
        Ok(self.object_info(oid).await?.into_commit()?)
    }

    async fn head(&self, name: &str) -> Result<Oid> {
        Ok(self.get_ref(name).await?.unwrap_or(Oid::ZERO))
    }

    async fn commit_history(&self, from: Oid, to: Oid, reverse: bool) -> Result<CommitHistory> {
        let mut walk = HistoryWalk::new(from, to, reverse)?;
        while let Some(oid) = walk.next_oid() {
            let object = self.fetch_object(&oid).await?;
            walk.push(&object)?;
        }
        Ok(walk.finish())
    }

    async fn reachable_objects(&self, commits: &[Oid]) -> Result<Vec<Object>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for commit_oid in commits {
            if !seen.insert(*commit_oid) {
                continue;
            }
            let commit_object = self.fetch_object(commit_oid).await?;
            let commit = get_object_info(&commit_object)?.into_commit()?;

            let mut stack = vec![Frame::Visit(commit.tree, EntryType::Tree)];
            while let Some(frame) = stack.pop() {
                match frame {
                    Frame::Emit(object) => out.push(object),
                    Frame::Visit(oid, _) if !seen.insert(oid) => {}
                    Frame::Visit(oid, EntryType::Blob) => {
                        out.push(self.fetch_object(&oid).await?);
                    }
                    Frame::Visit(oid, EntryType::Tree) => {
                        let object = self.fetch_object(&oid).await?;
                        let tree = get_object_info(&object)?.into_tree()?;
                        stack.push(Frame::Emit(object));
                        for entry in tree.entries().iter().rev() {
                            stack.push(Frame::Visit(entry.oid, entry.entry_type));
                        }
                    }
                }
            }

            out.push(commit_object);
        }

        Ok(out)
    }
}
