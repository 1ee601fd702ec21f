//! Commit history traversal.
//!
//! A walk follows `parent` links from a starting commit until it reaches the
//! target OID or the root. The object source is injected, so the same walk
//! drives both synchronous closures ([`build_commit_history`]) and async
//! stores (by stepping a [`HistoryWalk`] by hand).
//!
//! The target commit is part of the history when it is reached. Walking to
//! the zero OID collects the whole chain and counts as matched once the root
//! is reached.

use std::collections::HashSet;

use crate::commit::Commit;
use crate::error::ObjectError;
use crate::object::{get_object_info, Object};
use crate::oid::Oid;

/// Result of a history walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitHistory {
    /// Whether the walk reached its target.
    pub matched: bool,
    pub entries: Vec<(Oid, Commit)>,
}

impl CommitHistory {
    pub fn oids(&self) -> impl Iterator<Item = Oid> + '_ {
        self.entries.iter().map(|(oid, _)| *oid)
    }

    pub fn commits(&self) -> impl Iterator<Item = &Commit> {
        self.entries.iter().map(|(_, commit)| commit)
    }

    pub fn into_commits(self) -> Vec<Commit> {
        self.entries.into_iter().map(|(_, commit)| commit).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Step-wise history walk.
///
/// ```ignore
/// let mut walk = HistoryWalk::new(head, base, true)?;
/// while let Some(oid) = walk.next_oid() {
///     walk.push(&store.fetch(oid).await?)?;
/// }
/// let history = walk.finish();
/// ```
#[derive(Debug)]
pub struct HistoryWalk {
    next: Option<Oid>,
    to: Oid,
    reverse: bool,
    visited: HashSet<Oid>,
    history: CommitHistory,
}

impl HistoryWalk {
    pub fn new(from: Oid, to: Oid, reverse: bool) -> Result<Self, ObjectError> {
        if from.is_zero() && !to.is_zero() {
            return Err(ObjectError::InvalidRange { to });
        }
        let mut walk = Self {
            next: Some(from),
            to,
            reverse,
            visited: HashSet::new(),
            history: CommitHistory::default(),
        };
        if from.is_zero() {
            walk.next = None;
            walk.history.matched = true;
        }
        Ok(walk)
    }

    /// OID the walk needs next, or `None` when it is done.
    pub fn next_oid(&self) -> Option<Oid> {
        self.next
    }

    /// Feed the object for [`next_oid`](Self::next_oid).
    pub fn push(&mut self, object: &Object) -> Result<(), ObjectError> {
        let Some(expected) = self.next else {
            return Ok(());
        };
        if object.oid() != expected {
            return Err(ObjectError::OidMismatch {
                oid: expected,
                computed: object.oid(),
            });
        }
        if !self.visited.insert(expected) {
            return Err(ObjectError::HistoryCycle(expected));
        }

        let commit = get_object_info(object)?.into_commit()?;
        let parent = commit.parent;
        self.history.entries.push((expected, commit));

        if expected == self.to {
            self.history.matched = true;
            self.next = None;
        } else if parent.is_zero() {
            self.history.matched = self.to.is_zero();
            self.next = None;
        } else {
            self.next = Some(parent);
        }
        Ok(())
    }

    pub fn finish(mut self) -> CommitHistory {
        if self.reverse {
            self.history.entries.reverse();
        }
        self.history
    }
}

/// Walk from `from` towards `to`, fetching commits through `fetch`.
pub fn walk_commit_history<F, E>(
    from: Oid,
    to: Oid,
    reverse: bool,
    mut fetch: F,
) -> Result<CommitHistory, E>
where
    F: FnMut(&Oid) -> Result<Object, E>,
    E: From<ObjectError>,
{
    let mut walk = HistoryWalk::new(from, to, reverse)?;
    while let Some(oid) = walk.next_oid() {
        let object = fetch(&oid)?;
        walk.push(&object)?;
    }
    Ok(walk.finish())
}

/// Returns whether `to` was reached and the commits walked.
///
/// The commit equal to `to` is part of the result, so `(x, x)` yields
/// `(true, [x])`. Walking to the zero OID reports `true` once the root is
/// reached.
pub fn build_commit_history<F, E>(
    from: Oid,
    to: Oid,
    reverse: bool,
    fetch: F,
) -> Result<(bool, Vec<Commit>), E>
where
    F: FnMut(&Oid) -> Result<Object, E>,
    E: From<ObjectError>,
{
    let history = walk_commit_history(from, to, reverse, fetch)?;
    Ok((history.matched, history.into_commits()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{CommitBuilder, Identity};
    use crate::object::{create_blob_object, create_commit_object};
    use std::collections::HashMap;

    struct Chain {
        objects: HashMap<Oid, Object>,
        oids: Vec<Oid>,
    }

    fn chain(len: usize) -> Chain {
        let mut objects = HashMap::new();
        let mut oids = Vec::new();
        let mut parent = Oid::ZERO;
        for i in 0..len {
            let commit = CommitBuilder::new(Oid::digest(format!("tree {i}").as_bytes()))
                .parent(parent)
                .author(Identity::new("dev", 1_700_000_000 + i as i64, 0))
                .message(format!("commit {i}"))
                .build();
            let object = create_commit_object(&commit);
            parent = object.oid();
            oids.push(parent);
            objects.insert(parent, object);
        }
        Chain { objects, oids }
    }

    impl Chain {
        fn fetch(&self) -> impl FnMut(&Oid) -> Result<Object, ObjectError> + '_ {
            |oid| {
                self.objects
                    .get(oid)
                    .cloned()
                    .ok_or(ObjectError::InvalidOid(oid.to_hex()))
            }
        }
    }

    fn messages(commits: &[Commit]) -> Vec<&str> {
        commits.iter().map(|c| c.message.as_str()).collect()
    }

    #[test]
    fn test_zero_to_zero_is_empty_match() {
        let (matched, history) =
            build_commit_history(Oid::ZERO, Oid::ZERO, false, |_| -> Result<Object, ObjectError> {
                unreachable!()
            })
            .unwrap();
        assert!(matched);
        assert!(history.is_empty());
    }

    #[test]
    fn test_zero_to_nonzero_is_invalid_range() {
        let target = Oid::digest(b"x");
        let fetch = |_: &Oid| -> Result<Object, ObjectError> { unreachable!() };
        let err = build_commit_history(Oid::ZERO, target, false, fetch).unwrap_err();
        assert_eq!(err, ObjectError::InvalidRange { to: target });
    }

    #[test]
    fn test_walk_to_ancestor_includes_target() {
        let chain = chain(4);
        let (matched, history) =
            build_commit_history(chain.oids[3], chain.oids[1], false, chain.fetch()).unwrap();
        assert!(matched);
        assert_eq!(messages(&history), ["commit 3", "commit 2", "commit 1"]);
    }

    #[test]
    fn test_reverse_order() {
        let chain = chain(3);
        let (matched, history) =
            build_commit_history(chain.oids[2], Oid::ZERO, true, chain.fetch()).unwrap();
        assert!(matched);
        assert_eq!(messages(&history), ["commit 0", "commit 1", "commit 2"]);
    }

    #[test]
    fn test_same_commit() {
        let chain = chain(2);
        let history =
            walk_commit_history(chain.oids[1], chain.oids[1], false, chain.fetch()).unwrap();
        assert!(history.matched);
        assert_eq!(history.oids().collect::<Vec<_>>(), [chain.oids[1]]);
    }

    #[test]
    fn test_same_commit_includes_target() {
        let chain = chain(2);
        let x = chain.oids[1];
        let (matched, commits) = build_commit_history(x, x, false, chain.fetch()).unwrap();
        assert!(matched);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].parent, chain.oids[0]);

        let (matched, commits) =
            build_commit_history(chain.oids[1], Oid::ZERO, false, chain.fetch()).unwrap();
        assert!(matched);
        assert_eq!(commits.len(), 2);
    }

    #[test]
    fn test_unrelated_target_exhausts_history() {
        let chain = chain(3);
        let (matched, history) = build_commit_history(
            chain.oids[2],
            Oid::digest(b"elsewhere"),
            false,
            chain.fetch(),
        )
        .unwrap();
        assert!(!matched);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_fetch_error_propagates() {
        let chain = chain(3);
        let missing = chain.oids[1];
        let err = build_commit_history(chain.oids[2], Oid::ZERO, false, |oid| {
            if *oid == missing {
                Err(ObjectError::InvalidOid("gone".into()))
            } else {
                chain.fetch()(oid)
            }
        })
        .unwrap_err();
        assert_eq!(err, ObjectError::InvalidOid("gone".into()));
    }

    #[test]
    fn test_non_commit_object_rejected() {
        let blob = create_blob_object(b"not a commit").unwrap();
        let oid = blob.oid();
        let fetch = |_: &Oid| Ok::<_, ObjectError>(blob.clone());
        let err = build_commit_history(oid, Oid::ZERO, false, fetch).unwrap_err();
        assert!(matches!(err, ObjectError::UnexpectedObjectType { .. }));
    }

    #[test]
    fn test_wrong_object_rejected() {
        let chain = chain(2);
        let other = chain.objects[&chain.oids[0]].clone();
        let err = build_commit_history(chain.oids[1], Oid::ZERO, false, |_| {
            Ok::<_, ObjectError>(other.clone())
        })
        .unwrap_err();
        assert!(matches!(err, ObjectError::OidMismatch { .. }));
    }

    #[test]
    fn test_stepwise_walk() {
        let chain = chain(3);
        let mut walk = HistoryWalk::new(chain.oids[2], chain.oids[0], true).unwrap();
        let mut fetched = Vec::new();
        while let Some(oid) = walk.next_oid() {
            fetched.push(oid);
            walk.push(&chain.objects[&oid]).unwrap();
        }
        assert_eq!(fetched, [chain.oids[2], chain.oids[1], chain.oids[0]]);
        let history = walk.finish();
        assert!(history.matched);
        assert_eq!(history.oids().collect::<Vec<_>>(), chain.oids);
    }
}
