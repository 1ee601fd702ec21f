//! The Repository: commit authoring, history and sync over one store.

use std::sync::Arc;

use bytes::Bytes;
use notp_core::{
    create_blob_object, create_commit_object, create_tree_object, Commit, CommitBuilder,
    Identity, ObjectInfo, ObjectInstance, Oid, Tree, TreeEntry,
};
use notp_store::{ObjectStore, StoreExt};
use notp_sync::{
    new_follower_state_machine, new_leader_state_machine, state_machine_for, stores_converged,
    ConvergenceResult, OperationType, Role, SyncConfig, SyncReport, SyncStateMachine, Transport,
};

use crate::error::{NotpError, Result};

/// Configuration for a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Ref advanced by commits and sync.
    pub ref_name: String,
    /// Name recorded as author and committer.
    pub author: String,
    /// Offset from UTC recorded on new commits.
    pub tz_offset_minutes: i32,
    /// Sync configuration. Its `ref_name` follows the repository's.
    pub sync: SyncConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            ref_name: sync.ref_name.clone(),
            author: "unknown".to_string(),
            tz_offset_minutes: 0,
            sync,
        }
    }
}

impl RepositoryConfig {
    pub fn with_ref_name(mut self, ref_name: impl Into<String>) -> Self {
        self.ref_name = ref_name.into();
        self.sync.ref_name = self.ref_name.clone();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_tz_offset_minutes(mut self, offset: i32) -> Self {
        self.tz_offset_minutes = offset;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync.with_ref_name(self.ref_name.clone());
        self
    }
}

/// A content-addressed repository backed by an [`ObjectStore`].
///
/// Provides a unified API for:
/// - Writing blobs, trees and commits
/// - Reading objects and history
/// - Building leader/follower state machines and running sync sessions
pub struct Repository<S: ?Sized> {
    store: Arc<S>,
    config: RepositoryConfig,
}

impl<S: ?Sized> Clone for Repository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: ObjectStore + 'static> Repository<S> {
    pub fn new(store: S, config: RepositoryConfig) -> Self {
        Self::from_arc(Arc::new(store), config)
    }
}

impl<S> Repository<S>
where
    S: ObjectStore + ?Sized + 'static,
{
    /// Wrap a store that is shared with other owners.
    pub fn from_arc(store: Arc<S>, config: RepositoryConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Write Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Store `data` as a blob. Empty blobs are rejected.
    pub async fn write_blob(&self, data: &[u8]) -> Result<Oid> {
        let object = create_blob_object(data)?;
        self.store.insert_object(&object).await?;
        Ok(object.oid())
    }

    /// Store a tree whose entries are all present.
    pub async fn write_tree(&self, tree: &Tree) -> Result<Oid> {
        for entry in tree.entries() {
            if !self.store.has_object(&entry.oid).await? {
                return Err(NotpError::MissingObject(entry.oid));
            }
        }
        let object = create_tree_object(tree);
        self.store.insert_object(&object).await?;
        Ok(object.oid())
    }

    /// Commit `tree` on top of the current head and advance the ref.
    ///
    /// An author that cannot be written into a commit line is rejected
    /// before anything is stored.
    pub async fn commit_tree(&self, tree: Oid, author: Identity, message: &str) -> Result<Oid> {
        author.validate()?;
        if !self.store.has_object(&tree).await? {
            return Err(NotpError::MissingObject(tree));
        }
        let parent = self.head().await?;
        let commit = CommitBuilder::new(tree)
            .parent(parent)
            .author(author)
            .message(message)
            .build();
        let object = create_commit_object(&commit);
        self.store.insert_object(&object).await?;

        if !self
            .store
            .compare_and_set_ref(&self.config.ref_name, parent, object.oid())
            .await?
        {
            return Err(NotpError::RefMoved {
                name: self.config.ref_name.clone(),
                expected: parent,
            });
        }
        tracing::debug!(commit = %object.oid(), %parent, "commit created");
        Ok(object.oid())
    }

    /// Commit a flat set of files, stamped with the current time.
    pub async fn commit<I, N, D>(&self, files: I, message: &str) -> Result<Oid>
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: AsRef<[u8]>,
    {
        let author = Identity::try_new(
            self.config.author.clone(),
            now_secs(),
            self.config.tz_offset_minutes,
        )?;
        let mut tree = Tree::new();
        for (name, data) in files {
            let oid = self.write_blob(data.as_ref()).await?;
            tree.add_entry(TreeEntry::blob(name, oid))?;
        }
        let tree = self.write_tree(&tree).await?;
        self.commit_tree(tree, author, message).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Query Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Current head, zero when nothing was committed.
    pub async fn head(&self) -> Result<Oid> {
        Ok(self.store.head(&self.config.ref_name).await?)
    }

    /// History from the head to the root, newest first.
    pub async fn log(&self) -> Result<Vec<(Oid, Commit)>> {
        let head = self.head().await?;
        let history = self.store.commit_history(head, Oid::ZERO, false).await?;
        Ok(history.entries)
    }

    /// Decode a stored object.
    pub async fn read_object(&self, oid: &Oid) -> Result<ObjectInfo> {
        Ok(self.store.object_info(oid).await?)
    }

    /// Contents of `name` in the root tree of `commit`.
    pub async fn read_file(&self, commit: &Oid, name: &str) -> Result<Option<Bytes>> {
        let commit = self.store.fetch_commit(commit).await?;
        let tree = self.store.object_info(&commit.tree).await?.into_tree()?;
        let Some(entry) = tree.get(name) else {
            return Ok(None);
        };
        match self.store.object_info(&entry.oid).await?.instance {
            ObjectInstance::Blob(data) => Ok(Some(data)),
            _ => Ok(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Build the leader side of a session. `operation` is `push`, `pull`
    /// or empty for the default.
    pub fn leader(&self, operation: &str, transport: Transport) -> Result<SyncStateMachine<S>> {
        Ok(state_machine_for(
            Role::Leader,
            operation,
            Arc::clone(&self.store),
            transport,
            self.sync_config(),
        )?)
    }

    /// Build the follower side of a session.
    pub fn follower(&self, operation: &str, transport: Transport) -> Result<SyncStateMachine<S>> {
        Ok(state_machine_for(
            Role::Follower,
            operation,
            Arc::clone(&self.store),
            transport,
            self.sync_config(),
        )?)
    }

    /// Run a full session as leader.
    pub async fn sync_as_leader(
        &self,
        op: OperationType,
        transport: Transport,
    ) -> Result<SyncReport> {
        let machine =
            new_leader_state_machine(op, Arc::clone(&self.store), transport, self.sync_config())?;
        Ok(machine.run().await?.into_report())
    }

    /// Run a full session as follower.
    pub async fn sync_as_follower(
        &self,
        op: OperationType,
        transport: Transport,
    ) -> Result<SyncReport> {
        let machine =
            new_follower_state_machine(op, Arc::clone(&self.store), transport, self.sync_config())?;
        Ok(machine.run().await?.into_report())
    }

    /// Compare this repository's ref with another's.
    pub async fn converged_with<T>(&self, other: &Repository<T>) -> Result<ConvergenceResult>
    where
        T: ObjectStore + ?Sized + 'static,
    {
        Ok(stores_converged(&*self.store, &*other.store, &self.config.ref_name).await?)
    }

    fn sync_config(&self) -> SyncConfig {
        self.config.sync.clone().with_ref_name(self.config.ref_name.clone())
    }
}

fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notp_core::{ObjectError, ObjectType};
    use notp_store::{MemoryStore, SqliteStore};
    use notp_sync::SyncError;

    fn repo() -> Repository<MemoryStore> {
        Repository::new(
            MemoryStore::new(),
            RepositoryConfig::default().with_author("tester"),
        )
    }

    #[tokio::test]
    async fn test_commit_advances_head() {
        let repo = repo();
        assert_eq!(repo.head().await.unwrap(), Oid::ZERO);

        let first = repo.commit([("a.txt", "one")], "first").await.unwrap();
        assert_eq!(repo.head().await.unwrap(), first);

        let second = repo.commit([("a.txt", "two")], "second").await.unwrap();
        let log = repo.log().await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].0, second);
        assert_eq!(log[0].1.parent, first);
        assert_eq!(log[0].1.author.name, "tester");
        assert!(log[1].1.is_root());
    }

    #[tokio::test]
    async fn test_unwritable_author_rejected_before_writes() {
        for config in [
            RepositoryConfig::default().with_author("Eve\nMallory"),
            RepositoryConfig::default().with_tz_offset_minutes(6000),
        ] {
            let repo = Repository::new(MemoryStore::new(), config);
            let err = repo.commit([("a.txt", "one")], "bad").await.unwrap_err();
            assert!(matches!(err, NotpError::Object(ObjectError::InvalidIdentity(_))));
            assert_eq!(repo.head().await.unwrap(), Oid::ZERO);
            assert_eq!(repo.store().object_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_commit_tree_validates_author() {
        let repo = repo();
        let blob = repo.write_blob(b"one").await.unwrap();
        let tree = Tree::from_entries([TreeEntry::blob("a.txt", blob)]).unwrap();
        let tree = repo.write_tree(&tree).await.unwrap();

        let author = Identity::new("Eve\nparent x", 1, 0);
        assert!(matches!(
            repo.commit_tree(tree, author, "bad").await,
            Err(NotpError::Object(ObjectError::InvalidIdentity(_)))
        ));
        assert_eq!(repo.head().await.unwrap(), Oid::ZERO);
        assert!(repo.log().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_file() {
        let repo = repo();
        let head = repo
            .commit([("a.txt", "alpha"), ("b.txt", "beta")], "files")
            .await
            .unwrap();
        assert_eq!(
            repo.read_file(&head, "b.txt").await.unwrap(),
            Some(Bytes::from_static(b"beta"))
        );
        assert_eq!(repo.read_file(&head, "c.txt").await.unwrap(), None);

        let info = repo.read_object(&head).await.unwrap();
        assert_eq!(info.object_type(), ObjectType::Commit);
    }

    #[tokio::test]
    async fn test_write_tree_requires_entries() {
        let repo = repo();
        let missing = Oid::digest(b"absent");
        let tree = Tree::from_entries([TreeEntry::blob("x", missing)]).unwrap();
        assert!(matches!(
            repo.write_tree(&tree).await,
            Err(NotpError::MissingObject(oid)) if oid == missing
        ));
    }

    #[tokio::test]
    async fn test_empty_file_rejected() {
        let repo = repo();
        assert!(matches!(
            repo.commit([("empty", "")], "nothing").await,
            Err(NotpError::Object(_))
        ));
        assert_eq!(repo.head().await.unwrap(), Oid::ZERO);
    }

    /// Store whose ref always looks moved.
    struct RacingStore(MemoryStore);

    #[async_trait::async_trait]
    impl ObjectStore for RacingStore {
        async fn insert_object(
            &self,
            object: &notp_core::Object,
        ) -> notp_store::Result<notp_store::InsertResult> {
            self.0.insert_object(object).await
        }

        async fn get_object(&self, oid: &Oid) -> notp_store::Result<Option<notp_core::Object>> {
            self.0.get_object(oid).await
        }

        async fn has_object(&self, oid: &Oid) -> notp_store::Result<bool> {
            self.0.has_object(oid).await
        }

        async fn list_objects(&self) -> notp_store::Result<Vec<Oid>> {
            self.0.list_objects().await
        }

        async fn get_ref(&self, name: &str) -> notp_store::Result<Option<Oid>> {
            self.0.get_ref(name).await
        }

        async fn compare_and_set_ref(
            &self,
            _name: &str,
            _expected: Oid,
            _new: Oid,
        ) -> notp_store::Result<bool> {
            Ok(false)
        }

        async fn list_refs(&self) -> notp_store::Result<Vec<(String, Oid)>> {
            self.0.list_refs().await
        }
    }

    #[tokio::test]
    async fn test_commit_detects_moved_ref() {
        let repo = Repository::new(RacingStore(MemoryStore::new()), RepositoryConfig::default());
        assert!(matches!(
            repo.commit([("f", "data")], "lost race").await,
            Err(NotpError::RefMoved { expected, .. }) if expected == Oid::ZERO
        ));
        assert_eq!(repo.head().await.unwrap(), Oid::ZERO);
    }

    #[tokio::test]
    async fn test_custom_ref_name() {
        let repo = Repository::new(
            MemoryStore::new(),
            RepositoryConfig::default().with_ref_name("refs/heads/dev"),
        );
        let head = repo.commit([("f", "1")], "dev").await.unwrap();
        assert_eq!(repo.store().head("refs/heads/dev").await.unwrap(), head);
        assert_eq!(repo.store().head("refs/heads/main").await.unwrap(), Oid::ZERO);
        assert_eq!(repo.sync_config().ref_name, "refs/heads/dev");
    }

    #[tokio::test]
    async fn test_unknown_operation_fails_fast() {
        let repo = repo();
        let (a, _b) = notp_sync::duplex(notp_sync::ReceivePolicy::Immediate);
        assert!(matches!(
            repo.leader("rebase", a.build().unwrap()),
            Err(NotpError::Sync(SyncError::InvalidOperation(_)))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_backed_repository() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repo.db");
        let head = {
            let store = SqliteStore::open(&path).unwrap();
            let repo = Repository::new(store, RepositoryConfig::default());
            repo.commit([("persist", "me")], "durable").await.unwrap()
        };
        let repo = Repository::new(SqliteStore::open(&path).unwrap(), RepositoryConfig::default());
        assert_eq!(repo.head().await.unwrap(), head);
        assert_eq!(repo.log().await.unwrap()[0].1.message, "durable");
    }
}
