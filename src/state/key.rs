//! Column-family key encoding.
//!
//! Keys encode to bytes whose lexicographic order matches the logical order
//! of the key: integers are big-endian with the sign bit flipped, strings are
//! length-prefixed, and composite keys concatenate their components in
//! declaration order. A prefix scan over the encoding of the leading
//! components therefore yields exactly the keys sharing those components.

use crate::core::error::{BraidError, BraidResult};
use bytes::{Buf, BufMut};

const SIGN_BIT_64: u64 = 1 << 63;
const SIGN_BIT_32: u32 = 1 << 31;

/// A key that can be stored in a column family.
pub trait DbKey: Sized {
    /// Append the encoding of this key.
    fn write(&self, buf: &mut Vec<u8>);

    /// Decode a key from the front of `buf`, advancing it.
    fn read(buf: &mut &[u8]) -> BraidResult<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf);
        buf
    }

    /// Decode a key occupying all of `bytes`.
    fn from_bytes(bytes: &[u8]) -> BraidResult<Self> {
        let mut buf = bytes;
        let key = Self::read(&mut buf)?;
        if !buf.is_empty() {
            return Err(BraidError::codec(format!(
                "{} trailing bytes after key",
                buf.len()
            )));
        }
        Ok(key)
    }
}

fn ensure(buf: &[u8], needed: usize) -> BraidResult<()> {
    if buf.remaining() < needed {
        return Err(BraidError::codec(format!(
            "key truncated: need {} bytes, have {}",
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

impl DbKey for i64 {
    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u64((*self as u64) ^ SIGN_BIT_64);
    }

    fn read(buf: &mut &[u8]) -> BraidResult<Self> {
        ensure(buf, 8)?;
        Ok((buf.get_u64() ^ SIGN_BIT_64) as i64)
    }
}

impl DbKey for i32 {
    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u32((*self as u32) ^ SIGN_BIT_32);
    }

    fn read(buf: &mut &[u8]) -> BraidResult<Self> {
        ensure(buf, 4)?;
        Ok((buf.get_u32() ^ SIGN_BIT_32) as i32)
    }
}

impl DbKey for String {
    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u32(self.len() as u32);
        buf.put_slice(self.as_bytes());
    }

    fn read(buf: &mut &[u8]) -> BraidResult<Self> {
        ensure(buf, 4)?;
        let len = buf.get_u32() as usize;
        ensure(buf, len)?;
        let (bytes, rest) = buf.split_at(len);
        *buf = rest;
        String::from_utf8(bytes.to_vec()).map_err(|e| BraidError::codec(e.to_string()))
    }
}

/// Singleton key for column families holding a single value.
impl DbKey for () {
    fn write(&self, _buf: &mut Vec<u8>) {}

    fn read(_buf: &mut &[u8]) -> BraidResult<Self> {
        Ok(())
    }
}

impl<A: DbKey, B: DbKey> DbKey for (A, B) {
    fn write(&self, buf: &mut Vec<u8>) {
        self.0.write(buf);
        self.1.write(buf);
    }

    fn read(buf: &mut &[u8]) -> BraidResult<Self> {
        Ok((A::read(buf)?, B::read(buf)?))
    }
}

impl<A: DbKey, B: DbKey, C: DbKey> DbKey for (A, B, C) {
    fn write(&self, buf: &mut Vec<u8>) {
        self.0.write(buf);
        self.1.write(buf);
        self.2.write(buf);
    }

    fn read(buf: &mut &[u8]) -> BraidResult<Self> {
        Ok((A::read(buf)?, B::read(buf)?, C::read(buf)?))
    }
}

/// A key scoped to a tenant. The tenant is encoded first so that a scan over
/// one tenant never sees another tenant's entries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TenantKey<K> {
    pub tenant_id: String,
    pub key: K,
}

impl<K> TenantKey<K> {
    pub fn new(tenant_id: impl Into<String>, key: K) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            key,
        }
    }
}

impl<K: DbKey> DbKey for TenantKey<K> {
    fn write(&self, buf: &mut Vec<u8>) {
        self.tenant_id.write(buf);
        self.key.write(buf);
    }

    fn read(buf: &mut &[u8]) -> BraidResult<Self> {
        let tenant_id = String::read(buf)?;
        let key = K::read(buf)?;
        Ok(Self { tenant_id, key })
    }
}
