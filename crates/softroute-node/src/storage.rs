//! State persistence for softroute nodes.
//!
//! Persists the lease table (line-oriented text), the NAT table
//! (postcard snapshot), and the route table (postcard snapshot plus an
//! append-only write-ahead log) across restarts. Uses atomic writes
//! (write to `.tmp`, then rename) to prevent corruption.
//!
//! The WAL is the durability point for route changes: the engine emits
//! a persist action before any send action, the node appends the line,
//! and every `wal_snapshot_every` appends the table is compacted into a
//! fresh snapshot and the log truncated. Loading replays the snapshot
//! and then the WAL tail.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use softroute_core::packet::RouteUpdate;
use softroute_core::types::Addr;
use softroute_engine::lease::LeaseManager;
use softroute_engine::nat::NatTable;
use softroute_engine::route::RouteTable;

use crate::storage_codec;

/// File name for the line-oriented lease table.
const LEASE_FILE: &str = "leases";

/// File name for the NAT table snapshot.
const NAT_FILE: &str = "nat_table";

/// File name for the route table snapshot.
const ROUTE_SNAPSHOT_FILE: &str = "route_table";

/// File name for the route write-ahead log.
const ROUTE_WAL_FILE: &str = "route_wal";

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] storage_codec::StorageCodecError),
}

/// Persistent storage for node state.
pub struct Storage {
    base_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance, creating the directory if needed.
    ///
    /// # Note
    /// This performs blocking I/O (`create_dir_all`). Call at startup
    /// before the async runtime is under load.
    pub fn new(base_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Save the lease table.
    pub async fn save_leases(&self, leases: &LeaseManager) -> Result<(), StorageError> {
        let text = storage_codec::leases_to_lines(leases.iter());
        self.atomic_write(&self.base_dir.join(LEASE_FILE), text.as_bytes())
            .await
    }

    /// Load the lease table. Returns an empty table if the file doesn't exist.
    pub async fn load_leases(
        &self,
        pool_first: Addr,
        pool_last: Addr,
        duration: u64,
    ) -> Result<LeaseManager, StorageError> {
        let path = self.base_dir.join(LEASE_FILE);
        match fs::read_to_string(&path).await {
            Ok(text) => {
                let entries = storage_codec::leases_from_lines(&text)?;
                Ok(LeaseManager::from_entries(
                    pool_first, pool_last, duration, entries,
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(LeaseManager::new(pool_first, pool_last, duration))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Save the NAT table.
    pub async fn save_nat(&self, nat: &NatTable) -> Result<(), StorageError> {
        let bytes = storage_codec::serialize_nat(nat.iter())?;
        self.atomic_write(&self.base_dir.join(NAT_FILE), &bytes)
            .await
    }

    /// Load the NAT table. Returns an empty table if the file doesn't exist.
    pub async fn load_nat(
        &self,
        range_start: u16,
        range_end: u16,
    ) -> Result<NatTable, StorageError> {
        let path = self.base_dir.join(NAT_FILE);
        match fs::read(&path).await {
            Ok(bytes) => {
                let entries = storage_codec::deserialize_nat(&bytes)?;
                Ok(NatTable::from_entries(range_start, range_end, entries))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(NatTable::new(range_start, range_end))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Append one route change to the write-ahead log.
    pub async fn append_route_wal(&self, update: &RouteUpdate) -> Result<(), StorageError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.base_dir.join(ROUTE_WAL_FILE))
            .await?;
        let line = format!("{}\n", storage_codec::wal_line(update));
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Compact the route table into a snapshot and truncate the WAL.
    pub async fn snapshot_routes(&self, routes: &RouteTable) -> Result<(), StorageError> {
        let bytes = storage_codec::serialize_routes(routes.iter())?;
        self.atomic_write(&self.base_dir.join(ROUTE_SNAPSHOT_FILE), &bytes)
            .await?;
        self.atomic_write(&self.base_dir.join(ROUTE_WAL_FILE), b"")
            .await
    }

    /// Load the route table: snapshot first, then replay the WAL tail.
    ///
    /// Replayed entries are stamped with `now`. Unparseable WAL lines
    /// are skipped with a warning rather than failing the load.
    pub async fn load_routes(&self, now: u64) -> Result<RouteTable, StorageError> {
        let snapshot_path = self.base_dir.join(ROUTE_SNAPSHOT_FILE);
        let mut table = match fs::read(&snapshot_path).await {
            Ok(bytes) => RouteTable::from_entries(storage_codec::deserialize_routes(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RouteTable::new(),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let wal_path = self.base_dir.join(ROUTE_WAL_FILE);
        match fs::read_to_string(&wal_path).await {
            Ok(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    match storage_codec::parse_wal_line(line) {
                        Ok(update) => {
                            table.apply(&update, now);
                        }
                        Err(e) => warn!(%e, "skipping unreadable WAL line"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
        Ok(table)
    }

    /// Atomically write data to a file using a temporary file + rename.
    async fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use softroute_core::packet::RouteOp;
    use softroute_core::types::HardwareId;
    use softroute_engine::lease::Lease;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf()).unwrap();
        (dir, storage)
    }

    fn announce(sequence: u64) -> RouteUpdate {
        RouteUpdate {
            op: RouteOp::Announce,
            prefix: "44.0.0.0/8".parse().unwrap(),
            origin: "isp-b".to_string(),
            next_hop: Some(Addr::new(80, 0, 0, 9)),
            metric: 1,
            sequence,
        }
    }

    #[tokio::test]
    async fn test_missing_files_load_empty() {
        let (_dir, storage) = storage();
        let leases = storage
            .load_leases(Addr::new(10, 0, 0, 10), Addr::new(10, 0, 0, 20), 60)
            .await
            .unwrap();
        assert!(leases.is_empty());
        assert!(storage.load_nat(20_000, 20_100).await.unwrap().is_empty());
        assert!(storage.load_routes(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lease_roundtrip() {
        let (_dir, storage) = storage();
        let mut leases = LeaseManager::new(Addr::new(10, 0, 0, 10), Addr::new(10, 0, 0, 20), 60);
        leases.allocate(&HardwareId::new("host-a"), 100).unwrap();
        storage.save_leases(&leases).await.unwrap();

        let loaded = storage
            .load_leases(Addr::new(10, 0, 0, 10), Addr::new(10, 0, 0, 20), 60)
            .await
            .unwrap();
        assert_eq!(
            loaded.get(&HardwareId::new("host-a")),
            Some(&Lease {
                address: Addr::new(10, 0, 0, 10),
                issued_at: 100,
                duration: 60,
            })
        );
    }

    #[tokio::test]
    async fn test_nat_roundtrip() {
        let (_dir, storage) = storage();
        let mut nat = NatTable::new(20_000, 20_100);
        let port = nat
            .map_outbound(Addr::new(10, 0, 0, 10), 40_000, &HardwareId::new("host-a"), 5)
            .unwrap();
        storage.save_nat(&nat).await.unwrap();

        let mut loaded = storage.load_nat(20_000, 20_100).await.unwrap();
        assert_eq!(
            loaded.map_inbound(port, 6),
            Some((Addr::new(10, 0, 0, 10), 40_000))
        );
    }

    #[tokio::test]
    async fn test_wal_replay_without_snapshot() {
        let (_dir, storage) = storage();
        storage.append_route_wal(&announce(1)).await.unwrap();

        let table = storage.load_routes(50).await.unwrap();
        let entry = table.lookup(Addr::new(44, 1, 2, 3)).unwrap();
        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.timestamp, 50);
    }

    #[tokio::test]
    async fn test_snapshot_truncates_wal() {
        let (_dir, storage) = storage();
        storage.append_route_wal(&announce(1)).await.unwrap();

        let table = storage.load_routes(0).await.unwrap();
        storage.snapshot_routes(&table).await.unwrap();

        // A later withdraw lands in the fresh WAL only.
        let withdraw = RouteUpdate {
            op: RouteOp::Withdraw,
            prefix: "44.0.0.0/8".parse().unwrap(),
            origin: "isp-b".to_string(),
            next_hop: None,
            metric: 0,
            sequence: 2,
        };
        storage.append_route_wal(&withdraw).await.unwrap();

        let reloaded = storage.load_routes(10).await.unwrap();
        assert!(reloaded.lookup(Addr::new(44, 1, 2, 3)).is_none());
    }

    #[tokio::test]
    async fn test_unreadable_wal_line_skipped() {
        let (dir, storage) = storage();
        storage.append_route_wal(&announce(1)).await.unwrap();
        tokio::fs::write(
            dir.path().join("route_wal"),
            "garbage line\nannounce 44.0.0.0/8 80.0.0.9 isp-b 1 3\n",
        )
        .await
        .unwrap();

        let table = storage.load_routes(0).await.unwrap();
        assert_eq!(table.lookup(Addr::new(44, 1, 2, 3)).unwrap().sequence, 3);
    }
}
