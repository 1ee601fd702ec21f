//! Test fixtures and helpers.
//!
//! Common setup code for sync integration tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use notp::core::{Identity, Oid, Packet, PacketReader, Tree, TreeEntry};
use notp::sync::{duplex, PacketInspector, ReceivePolicy, TracingInspector};
use notp::{OperationType, Repository, RepositoryConfig, SyncReport, Transport};
use notp_store::MemoryStore;

/// First commit timestamp handed out by a fixture (2023-11-14T22:13:20Z).
pub const EPOCH: i64 = 1_700_000_000;

/// Seconds between consecutive fixture commits.
pub const TICK: i64 = 60;

/// A repository over a memory store with a deterministic clock.
///
/// Commits made through the fixture get timestamps `EPOCH`, `EPOCH + TICK`,
/// ... so two fixtures with the same author and inputs produce the same OIDs.
pub struct RepoFixture {
    pub repo: Repository<MemoryStore>,
    clock: AtomicI64,
}

impl RepoFixture {
    pub fn new(author: &str) -> Self {
        Self::with_config(RepositoryConfig::default().with_author(author))
    }

    pub fn with_config(config: RepositoryConfig) -> Self {
        Self {
            repo: Repository::new(MemoryStore::new(), config),
            clock: AtomicI64::new(EPOCH),
        }
    }

    /// Commit a flat set of files with the next fixture timestamp.
    pub async fn commit_files(&self, files: &[(&str, &str)], message: &str) -> notp::Result<Oid> {
        let mut tree = Tree::new();
        for (name, data) in files {
            let oid = self.repo.write_blob(data.as_bytes()).await?;
            tree.add_entry(TreeEntry::blob(*name, oid))?;
        }
        let tree = self.repo.write_tree(&tree).await?;
        let author = Identity::new(
            self.repo.config().author.clone(),
            self.clock.fetch_add(TICK, Ordering::SeqCst),
            self.repo.config().tz_offset_minutes,
        );
        self.repo.commit_tree(tree, author, message).await
    }

    /// Make `count` commits, each rewriting one file. Returns the OIDs in order.
    pub async fn commit_chain(&self, prefix: &str, count: usize) -> notp::Result<Vec<Oid>> {
        let mut oids = Vec::with_capacity(count);
        for i in 0..count {
            let body = format!("{prefix} revision {i}");
            oids.push(self.commit_files(&[("data", &body)], &body).await?);
        }
        Ok(oids)
    }

    pub async fn head(&self) -> notp::Result<Oid> {
        self.repo.head().await
    }

    pub fn object_count(&self) -> usize {
        self.repo.store().object_count()
    }
}

impl Default for RepoFixture {
    fn default() -> Self {
        Self::new("fixture")
    }
}

/// Create multiple fixtures, authors `peer-0`, `peer-1`, ...
pub fn repo_fixtures(count: usize) -> Vec<RepoFixture> {
    (0..count)
        .map(|i| RepoFixture::new(&format!("peer-{i}")))
        .collect()
}

/// Records every packet a transport sends and receives.
#[derive(Default)]
pub struct PacketCapture {
    sent: Mutex<Vec<Packet>>,
    received: Mutex<Vec<Packet>>,
}

impl PacketCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn received(&self) -> Vec<Packet> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Phase codes of sent packets; -1 for packets without a protocol header.
    pub fn sent_phases(&self) -> Vec<i16> {
        self.sent().iter().map(phase_of).collect()
    }

    pub fn received_phases(&self) -> Vec<i16> {
        self.received().iter().map(phase_of).collect()
    }
}

fn phase_of(packet: &Packet) -> i16 {
    PacketReader::new(packet)
        .read_protocol()
        .map(|h| h.phase)
        .unwrap_or(-1)
}

impl PacketInspector for PacketCapture {
    fn on_sent(&self, packet: &Packet) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(packet.clone());
    }

    fn on_received(&self, packet: &Packet) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(packet.clone());
    }
}

/// Two blocking, cross-wired transports that log through `tracing`.
pub fn connected_transports(a: &str, b: &str) -> notp::sync::Result<(Transport, Transport)> {
    let (left, right) = duplex(ReceivePolicy::Forever);
    Ok((
        left.inspector(TracingInspector::new(a)).build()?,
        right.inspector(TracingInspector::new(b)).build()?,
    ))
}

/// Outcome of a session: the leader's result, then the follower's.
pub type SessionResults = (notp::Result<SyncReport>, notp::Result<SyncReport>);

/// Run one sync session between two fixtures and return both reports.
pub async fn run_session(
    op: OperationType,
    leader: &RepoFixture,
    follower: &RepoFixture,
) -> notp::Result<SessionResults> {
    let (l, f) = connected_transports("leader", "follower")?;
    Ok(tokio::join!(
        leader.repo.sync_as_leader(op, l),
        follower.repo.sync_as_follower(op, f)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_commits_are_deterministic() {
        let a = RepoFixture::new("same");
        let b = RepoFixture::new("same");

        let ha = a.commit_chain("x", 3).await.unwrap();
        let hb = b.commit_chain("x", 3).await.unwrap();
        assert_eq!(ha, hb);
        assert_eq!(a.head().await.unwrap(), ha[2]);
    }

    #[tokio::test]
    async fn test_fixture_chain_links_parents() {
        let fixture = RepoFixture::default();
        let oids = fixture.commit_chain("c", 3).await.unwrap();

        let log = fixture.repo.log().await.unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].0, oids[2]);
        assert_eq!(log[0].1.parent, oids[1]);
        assert_eq!(log[2].1.parent, Oid::ZERO);
        assert_eq!(log[1].1.author.timestamp, EPOCH + TICK);
    }

    #[tokio::test]
    async fn test_multi_party_authors_differ() {
        let parties = repo_fixtures(3);
        let mut heads = Vec::new();
        for p in &parties {
            heads.push(p.commit_files(&[("f", "same")], "same").await.unwrap());
        }
        assert_ne!(heads[0], heads[1]);
        assert_ne!(heads[1], heads[2]);
    }

    #[tokio::test]
    async fn test_run_session_push() {
        let leader = RepoFixture::new("leader");
        let follower = RepoFixture::new("follower");
        let oids = follower.commit_chain("push", 2).await.unwrap();

        let (l, f) = run_session(OperationType::Push, &leader, &follower)
            .await
            .unwrap();
        let (l, f) = (l.unwrap(), f.unwrap());
        assert_eq!(leader.head().await.unwrap(), oids[1]);
        assert_eq!(l.objects_received, f.objects_sent);
        assert_eq!(leader.object_count(), follower.object_count());
    }

    #[tokio::test]
    async fn test_packet_capture_records_phases() {
        let leader = RepoFixture::new("leader");
        let follower = RepoFixture::new("follower");
        leader.commit_files(&[("a", "1")], "one").await.unwrap();

        let capture = std::sync::Arc::new(PacketCapture::new());
        let (l, f) = duplex(ReceivePolicy::Forever);
        let l = l.shared_inspector(capture.clone()).build().unwrap();
        let f = f.build().unwrap();

        let (lr, fr) = tokio::join!(
            leader.repo.sync_as_leader(OperationType::Pull, l),
            follower.repo.sync_as_follower(OperationType::Pull, f)
        );
        lr.unwrap();
        fr.unwrap();

        // Leader: advertise, negotiation response, final object batch.
        assert_eq!(capture.sent_phases(), vec![2, 3, 5]);
        // Follower: advertise, negotiation request, ack.
        assert_eq!(capture.received_phases(), vec![2, 3, 6]);
    }
}
