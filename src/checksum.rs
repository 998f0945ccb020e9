//! Block checksums
//!
//! The weak checksum is Adler-32 style:
//! - a = sum of all bytes
//! - b = sum of running sums = n*byte[0] + (n-1)*byte[1] + ... + 1*byte[n-1]
//! - result = (b << 16) | (a & 0xffff)
//!
//! Both halves only depend on the bytes entering and leaving the window, so
//! [`RollingChecksum::roll`] slides it by one byte in O(1).
//!
//! The strong hash is BLAKE3 over the block bytes. Whole files are identified
//! by MD5, which is what the BD header carries.

use md5::{Digest, Md5};

/// Length of a strong block hash
pub const STRONG_HASH_LEN: usize = 32;

/// Strong per-block digest
pub type StrongHash = [u8; STRONG_HASH_LEN];

/// MD5 digest of a complete file
pub type FileDigest = [u8; 16];

/// Compute the weak checksum of a block from scratch
#[inline]
pub fn rolling_checksum(data: &[u8]) -> u32 {
    let mut a: u32 = 0;
    let mut b: u32 = 0;

    for &byte in data {
        a = a.wrapping_add(byte as u32);
        b = b.wrapping_add(a);
    }

    (b << 16) | (a & 0xffff)
}

/// Compute the strong hash of a block
#[inline]
pub fn strong_hash(data: &[u8]) -> StrongHash {
    *blake3::hash(data).as_bytes()
}

/// Rolling checksum state for O(1) window updates
#[derive(Debug, Clone)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    window_size: usize,
}

impl RollingChecksum {
    /// Create a new rolling checksum over a window
    pub fn new(data: &[u8]) -> Self {
        let mut a: u32 = 0;
        let mut b: u32 = 0;

        for &byte in data {
            a = a.wrapping_add(byte as u32);
            b = b.wrapping_add(a);
        }

        Self {
            a,
            b,
            window_size: data.len(),
        }
    }

    /// Get the current checksum value
    #[inline]
    pub fn value(&self) -> u32 {
        (self.b << 16) | (self.a & 0xffff)
    }

    /// Number of bytes covered by the window
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Roll the window by one byte: remove old_byte, add new_byte
    #[inline]
    pub fn roll(&mut self, old_byte: u8, new_byte: u8) {
        let old = old_byte as u32;
        let new = new_byte as u32;

        self.a = self.a.wrapping_sub(old).wrapping_add(new);
        // b loses (window_size * old) and gains the new a
        self.b = self
            .b
            .wrapping_sub((self.window_size as u32).wrapping_mul(old))
            .wrapping_add(self.a);
    }
}

/// Incremental MD5 over a whole file
#[derive(Clone, Default)]
pub struct FileHasher {
    inner: Md5,
    len: u64,
}

impl FileHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.len += data.len() as u64;
    }

    /// Bytes hashed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(self) -> FileDigest {
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&self.inner.finalize());
        digest
    }
}

/// MD5 of a byte slice
pub fn md5_bytes(data: &[u8]) -> FileDigest {
    let mut hasher = FileHasher::new();
    hasher.update(data);
    hasher.finalize()
}
