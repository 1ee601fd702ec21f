//! Convergence verification after a sync.
//!
//! Two stores have converged on a ref when the ref points at the same commit
//! and both hold the same chain below it. The chain is summarized by a
//! rolling digest so peers can compare without exchanging history.
//!
//! Every commit names its parent, so equal heads already imply equal chains
//! on stores that verify what they hold. The digest check covers the other
//! case: a store with missing or corrupted history behind a matching head,
//! or a peer digest computed over different data. Either one shows up as
//! [`ConvergenceResult::Diverged`] or a walk error instead of `Converged`.

use notp_core::Oid;
use notp_store::{ObjectStore, StoreExt};
use sha2::{Digest, Sha256};

use crate::error::Result;

const DIGEST_DOMAIN: &[u8] = b"notp-ref-digest-v1:";

/// Deterministic digest of the commit chain behind `ref_name`.
///
/// Algorithm:
/// 1. Walk from the ref head to the root, oldest commit first
/// 2. H = SHA-256(domain || ref name || oid_1 || ... || oid_n)
///
/// Returns `None` when the ref does not exist.
pub async fn compute_ref_digest<S>(store: &S, ref_name: &str) -> Result<Option<Oid>>
where
    S: ObjectStore + ?Sized,
{
    let head = store.head(ref_name).await?;
    if head.is_zero() {
        return Ok(None);
    }

    let history = store.commit_history(head, Oid::ZERO, true).await?;

    let mut hasher = Sha256::new();
    hasher.update(DIGEST_DOMAIN);
    hasher.update(ref_name.as_bytes());
    for oid in history.oids() {
        hasher.update(oid.as_bytes());
    }

    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Ok(Some(Oid(out)))
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both sides have identical history for the ref.
    Converged,
    /// One side is behind (may need another sync).
    NotConverged { reason: String },
    /// Same head, different history digest. Only reachable when one side
    /// holds history that does not match its head.
    Diverged { local_digest: Oid, remote_digest: Oid },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }

    pub fn is_diverged(&self) -> bool {
        matches!(self, ConvergenceResult::Diverged { .. })
    }
}

/// Compare the local ref with a peer's head and optional digest.
///
/// The digest is only computed once the heads match. It walks the local
/// chain, so damaged local history fails here rather than passing silently.
pub async fn verify_convergence<S>(
    local_store: &S,
    ref_name: &str,
    remote_head: Oid,
    remote_digest: Option<Oid>,
) -> Result<ConvergenceResult>
where
    S: ObjectStore + ?Sized,
{
    let local_head = local_store.head(ref_name).await?;
    if local_head != remote_head {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!("head mismatch: local={}, remote={}", local_head, remote_head),
        });
    }

    if let Some(remote_digest) = remote_digest {
        match compute_ref_digest(local_store, ref_name).await? {
            Some(local_digest) if local_digest != remote_digest => {
                return Ok(ConvergenceResult::Diverged {
                    local_digest,
                    remote_digest,
                });
            }
            Some(_) => {}
            None => {
                return Ok(ConvergenceResult::NotConverged {
                    reason: format!("ref {} not found locally", ref_name),
                });
            }
        }
    }

    Ok(ConvergenceResult::Converged)
}

/// Check convergence of two local stores directly.
pub async fn stores_converged<A, B>(a: &A, b: &B, ref_name: &str) -> Result<ConvergenceResult>
where
    A: ObjectStore + ?Sized,
    B: ObjectStore + ?Sized,
{
    let remote_head = b.head(ref_name).await?;
    let remote_digest = compute_ref_digest(b, ref_name).await?;
    verify_convergence(a, ref_name, remote_head, remote_digest).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use notp_core::{
        create_blob_object, create_commit_object, create_tree_object, CommitBuilder, Tree,
        TreeEntry,
    };
    use notp_store::MemoryStore;

    const MAIN: &str = "refs/heads/main";

    async fn commit(store: &MemoryStore, data: &str) -> Oid {
        let parent = store.head(MAIN).await.unwrap();
        let blob = create_blob_object(data.as_bytes()).unwrap();
        let tree = Tree::from_entries([TreeEntry::blob("f", blob.oid())]).unwrap();
        let tree = create_tree_object(&tree);
        let commit = CommitBuilder::new(tree.oid()).parent(parent).message(data).build();
        let commit = create_commit_object(&commit);
        for object in [&blob, &tree, &commit] {
            store.insert_object(object).await.unwrap();
        }
        store.compare_and_set_ref(MAIN, parent, commit.oid()).await.unwrap();
        commit.oid()
    }

    async fn copy(from: &MemoryStore, to: &MemoryStore) {
        for oid in from.list_objects().await.unwrap() {
            to.insert_object(&from.fetch_object(&oid).await.unwrap()).await.unwrap();
        }
        let head = from.head(MAIN).await.unwrap();
        let current = to.head(MAIN).await.unwrap();
        to.compare_and_set_ref(MAIN, current, head).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_ref_has_no_digest() {
        let store = MemoryStore::new();
        assert_eq!(compute_ref_digest(&store, MAIN).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_digest_is_deterministic() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        commit(&a, "one").await;
        commit(&a, "two").await;
        copy(&a, &b).await;

        let da = compute_ref_digest(&a, MAIN).await.unwrap();
        assert!(da.is_some());
        assert_eq!(da, compute_ref_digest(&b, MAIN).await.unwrap());
        assert!(stores_converged(&a, &b, MAIN).await.unwrap().is_converged());
    }

    #[tokio::test]
    async fn test_digest_depends_on_ref_name() {
        let store = MemoryStore::new();
        let head = commit(&store, "x").await;
        store.compare_and_set_ref("refs/heads/other", Oid::ZERO, head).await.unwrap();
        assert_ne!(
            compute_ref_digest(&store, MAIN).await.unwrap(),
            compute_ref_digest(&store, "refs/heads/other").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_behind_is_not_converged() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        commit(&a, "one").await;
        copy(&a, &b).await;
        commit(&a, "two").await;

        let result = stores_converged(&b, &a, MAIN).await.unwrap();
        assert!(matches!(result, ConvergenceResult::NotConverged { .. }));
        assert!(!result.is_diverged());
    }

    #[tokio::test]
    async fn test_digest_mismatch_is_diverged() {
        let store = MemoryStore::new();
        let head = commit(&store, "one").await;
        let result = verify_convergence(&store, MAIN, head, Some(Oid::digest(b"other")))
            .await
            .unwrap();
        assert!(result.is_diverged());
    }

    #[tokio::test]
    async fn test_missing_history_behind_matching_head_fails() {
        let full = MemoryStore::new();
        commit(&full, "one").await;
        let head = commit(&full, "two").await;

        let partial = MemoryStore::new();
        let object = full.fetch_object(&head).await.unwrap();
        partial.insert_object(&object).await.unwrap();
        partial.compare_and_set_ref(MAIN, Oid::ZERO, head).await.unwrap();

        assert!(stores_converged(&partial, &full, MAIN).await.is_err());
        let unchecked = verify_convergence(&partial, MAIN, head, None).await.unwrap();
        assert!(unchecked.is_converged());
    }
}
