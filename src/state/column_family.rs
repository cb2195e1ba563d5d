//! Typed column families.
//!
//! A [`ColumnFamily`] is a zero-sized handle pairing a column family id with
//! a key type and a value type. Keys go through [`DbKey`], values through
//! bincode; every call encodes into a fresh buffer.

use super::db::{ColumnFamilyId, ReadContext, Transaction};
use super::key::DbKey;
use crate::core::error::{BraidError, BraidResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Typed view of one column family.
pub struct ColumnFamily<K, V> {
    id: ColumnFamilyId,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for ColumnFamily<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for ColumnFamily<K, V> {}

impl<K: DbKey, V: Serialize + DeserializeOwned> ColumnFamily<K, V> {
    pub const fn new(id: ColumnFamilyId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> ColumnFamilyId {
        self.id
    }

    fn full_key(&self, key: &K) -> Vec<u8> {
        self.id.full_key(&key.to_bytes())
    }

    fn decode_value(&self, bytes: &[u8]) -> BraidResult<V> {
        bincode::deserialize(bytes).map_err(|e| {
            BraidError::codec(format!("column family {}: {}", self.id.name(), e))
        })
    }

    pub fn get<C: ReadContext>(&self, ctx: &C, key: &K) -> BraidResult<Option<V>> {
        match ctx.get_raw(&self.full_key(key)) {
            Some(bytes) => Ok(Some(self.decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn exists<C: ReadContext>(&self, ctx: &C, key: &K) -> bool {
        ctx.get_raw(&self.full_key(key)).is_some()
    }

    /// Insert a value that must not be present yet.
    pub fn insert(&self, tx: &mut Transaction<'_>, key: &K, value: &V) -> BraidResult<()> {
        let full = self.full_key(key);
        if tx.get_raw(&full).is_some() {
            return Err(BraidError::AlreadyExists {
                column_family: self.id.name(),
            });
        }
        tx.put(full, bincode::serialize(value)?);
        Ok(())
    }

    /// Replace a value that must already be present.
    pub fn update(&self, tx: &mut Transaction<'_>, key: &K, value: &V) -> BraidResult<()> {
        let full = self.full_key(key);
        if tx.get_raw(&full).is_none() {
            return Err(BraidError::NotFound {
                column_family: self.id.name(),
            });
        }
        tx.put(full, bincode::serialize(value)?);
        Ok(())
    }

    pub fn upsert(&self, tx: &mut Transaction<'_>, key: &K, value: &V) -> BraidResult<()> {
        tx.put(self.full_key(key), bincode::serialize(value)?);
        Ok(())
    }

    /// Delete a value that must be present.
    pub fn delete_existing(&self, tx: &mut Transaction<'_>, key: &K) -> BraidResult<()> {
        let full = self.full_key(key);
        if tx.get_raw(&full).is_none() {
            return Err(BraidError::NotFound {
                column_family: self.id.name(),
            });
        }
        tx.delete(full);
        Ok(())
    }

    /// Delete a value if present. Returns whether it was.
    pub fn delete_if_exists(&self, tx: &mut Transaction<'_>, key: &K) -> bool {
        let full = self.full_key(key);
        if tx.get_raw(&full).is_none() {
            return false;
        }
        tx.delete(full);
        true
    }

    /// Visit, in key order, every entry whose key starts with `prefix`.
    /// The visitor returns `false` to stop early.
    pub fn while_equal_prefix<C, P, F>(&self, ctx: &C, prefix: &P, mut visitor: F) -> BraidResult<()>
    where
        C: ReadContext,
        P: DbKey,
        F: FnMut(K, V) -> BraidResult<bool>,
    {
        let prefix = self.full_key_prefix(&prefix.to_bytes());
        for (key, value) in ctx.scan_raw(&prefix) {
            let key = K::from_bytes(&key[2..])?;
            let value = self.decode_value(&value)?;
            if !visitor(key, value)? {
                break;
            }
        }
        Ok(())
    }

    /// Visit every entry in key order.
    pub fn for_each<C, F>(&self, ctx: &C, visitor: F) -> BraidResult<()>
    where
        C: ReadContext,
        F: FnMut(K, V) -> BraidResult<bool>,
    {
        self.while_equal_prefix(ctx, &(), visitor)
    }

    /// Every entry in key order.
    pub fn collect<C: ReadContext>(&self, ctx: &C) -> BraidResult<Vec<(K, V)>> {
        let mut entries = Vec::new();
        self.for_each(ctx, |k, v| {
            entries.push((k, v));
            Ok(true)
        })?;
        Ok(entries)
    }

    pub fn is_empty<C: ReadContext>(&self, ctx: &C) -> bool {
        ctx.scan_raw(&self.id.prefix()).is_empty()
    }

    fn full_key_prefix(&self, prefix: &[u8]) -> Vec<u8> {
        self.id.full_key(prefix)
    }
}
