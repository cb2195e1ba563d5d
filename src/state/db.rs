//! Transactional key-value store shared by all column families.
//!
//! Every column family lives in one ordered keyspace; a full key is the
//! two-byte big-endian column family id followed by the encoded key. A
//! [`Transaction`] buffers writes in an overlay on top of the committed store
//! and reads through it. Committing hands the overlay to the store as one
//! [`WriteBatch`]; dropping the transaction discards it.

use crate::core::error::BraidResult;
use std::collections::BTreeMap;

/// Logical collections within the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnFamilyId {
    ProcessingPositions,
    KeyGenerator,
    Deployments,
    DeploymentVersions,
    MessageSubscriptionByKey,
    MessageSubscriptionByName,
    DistributionCommand,
    PendingDistribution,
    QueuedDistribution,
}

impl ColumnFamilyId {
    pub fn code(self) -> u16 {
        match self {
            Self::ProcessingPositions => 1,
            Self::KeyGenerator => 2,
            Self::Deployments => 10,
            Self::DeploymentVersions => 11,
            Self::MessageSubscriptionByKey => 20,
            Self::MessageSubscriptionByName => 21,
            Self::DistributionCommand => 30,
            Self::PendingDistribution => 31,
            Self::QueuedDistribution => 32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ProcessingPositions => "PROCESSING_POSITIONS",
            Self::KeyGenerator => "KEY_GENERATOR",
            Self::Deployments => "DEPLOYMENTS",
            Self::DeploymentVersions => "DEPLOYMENT_VERSIONS",
            Self::MessageSubscriptionByKey => "MESSAGE_SUBSCRIPTION_BY_KEY",
            Self::MessageSubscriptionByName => "MESSAGE_SUBSCRIPTION_BY_NAME",
            Self::DistributionCommand => "DISTRIBUTION_COMMAND",
            Self::PendingDistribution => "PENDING_DISTRIBUTION",
            Self::QueuedDistribution => "QUEUED_DISTRIBUTION",
        }
    }

    /// Prefix shared by every key of this column family.
    pub fn prefix(self) -> [u8; 2] {
        self.code().to_be_bytes()
    }

    /// Full key for an encoded column-family key.
    pub fn full_key(self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(2 + key.len());
        full.extend_from_slice(&self.prefix());
        full.extend_from_slice(key);
        full
    }
}

/// Ordered set of puts and deletes applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.insert(key, None);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Add every operation of `other`, which takes precedence.
    pub fn merge(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    fn lookup(&self, key: &[u8]) -> Option<&Option<Vec<u8>>> {
        self.ops.get(key)
    }

    pub fn into_ops(self) -> impl Iterator<Item = (Vec<u8>, Option<Vec<u8>>)> {
        self.ops.into_iter()
    }
}

/// Backing store of a [`StateDb`].
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    /// Apply a batch atomically.
    fn write(&mut self, batch: WriteBatch) -> BraidResult<()>;

    /// Every entry in key order.
    fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)>;

    fn len(&self) -> usize;
}

/// Ordered in-memory store. Durability comes from snapshots plus log replay.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn write(&mut self, batch: WriteBatch) -> BraidResult<()> {
        for (key, value) in batch.into_ops() {
            match value {
                Some(value) => {
                    self.data.insert(key, value);
                }
                None => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// Read access shared by the store and open transactions.
pub trait ReadContext {
    fn get_raw(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn scan_raw(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}

impl<T: ReadContext + ?Sized> ReadContext for &T {
    fn get_raw(&self, key: &[u8]) -> Option<Vec<u8>> {
        (**self).get_raw(key)
    }

    fn scan_raw(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        (**self).scan_raw(prefix)
    }
}

impl<T: ReadContext + ?Sized> ReadContext for &mut T {
    fn get_raw(&self, key: &[u8]) -> Option<Vec<u8>> {
        (**self).get_raw(key)
    }

    fn scan_raw(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        (**self).scan_raw(prefix)
    }
}

/// The state store of one partition.
pub struct StateDb {
    store: Box<dyn KeyValueStore>,
}

impl Default for StateDb {
    fn default() -> Self {
        Self::new()
    }
}

impl StateDb {
    /// Empty in-memory state.
    pub fn new() -> Self {
        Self::with_store(Box::new(MemoryStore::default()))
    }

    pub fn with_store(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Rebuild state from exported entries.
    pub fn restore(entries: Vec<(Vec<u8>, Vec<u8>)>) -> BraidResult<Self> {
        let mut db = Self::new();
        let mut batch = WriteBatch::new();
        for (key, value) in entries {
            batch.put(key, value);
        }
        db.store.write(batch)?;
        Ok(db)
    }

    /// Open a transaction reading through to this store.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction {
            db: self,
            batch: WriteBatch::new(),
        }
    }

    /// Apply a committed transaction's writes.
    pub fn apply(&mut self, batch: WriteBatch) -> BraidResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.store.write(batch)
    }

    /// Every entry, for snapshots and comparisons.
    pub fn export(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.store.entries()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }
}

impl ReadContext for StateDb {
    fn get_raw(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.store.get(key)
    }

    fn scan_raw(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.store.scan_prefix(prefix)
    }
}

/// Buffered writes over a [`StateDb`].
pub struct Transaction<'db> {
    db: &'db StateDb,
    batch: WriteBatch,
}

impl<'db> Transaction<'db> {
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.batch.put(key, value);
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.batch.delete(key);
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Finish the transaction, yielding its writes for [`StateDb::apply`].
    pub fn into_batch(self) -> WriteBatch {
        self.batch
    }
}

impl<'db> ReadContext for Transaction<'db> {
    fn get_raw(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.batch.lookup(key) {
            Some(value) => value.clone(),
            None => self.db.get_raw(key),
        }
    }

    fn scan_raw(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.db.scan_raw(prefix).into_iter().collect();
        for (key, value) in self
            .batch
            .ops
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }
}
