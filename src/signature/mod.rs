//! Block signature index of a base file

pub mod file;
pub mod generate;

pub use file::{read_signature, read_signature_from_bytes, write_signature, write_signature_to_bytes};
pub use generate::{build, build_from_bytes, build_from_path};

use crate::checksum::{strong_hash, StrongHash};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Smallest block size picked by [`block_size_for`]
pub const MIN_BLOCK_SIZE: usize = 2 * 1024;

/// Largest block size picked by [`block_size_for`]
pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Number of blocks [`block_size_for`] aims for
pub const TARGET_BLOCK_COUNT: u64 = 8192;

/// Pick a block size for a base file of `file_size` bytes.
///
/// Grows in powers of two so the table stays near [`TARGET_BLOCK_COUNT`]
/// entries, clamped to `[MIN_BLOCK_SIZE, MAX_BLOCK_SIZE]`.
pub fn block_size_for(file_size: u64) -> usize {
    block_size_within(file_size, TARGET_BLOCK_COUNT, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
}

/// Same policy as [`block_size_for`] with explicit bounds
pub fn block_size_within(file_size: u64, target_blocks: u64, min: usize, max: usize) -> usize {
    let wanted = file_size.div_ceil(target_blocks.max(1));
    let size = wanted.max(1).next_power_of_two();
    (size.min(usize::MAX as u64) as usize).clamp(min, max)
}

/// A contiguous region of the base file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block index (0-based)
    pub index: u64,

    /// Offset in the base file
    pub offset: u64,

    /// Actual size of this block (may be less than block_size for the last block)
    pub length: u32,

    /// Rolling checksum (fast, weak hash for candidate lookup)
    pub weak: u32,

    /// Strong hash confirming a candidate
    #[serde(with = "hex_hash")]
    pub strong: StrongHash,
}

impl Block {
    pub fn new(index: u64, offset: u64, length: u32, weak: u32, strong: StrongHash) -> Self {
        Self {
            index,
            offset,
            length,
            weak,
            strong,
        }
    }
}

/// Lookup table from weak checksum to the blocks sharing it.
///
/// Built once per base file and read-only afterwards. Memory is proportional
/// to the number of blocks, never to the file size.
#[derive(Debug, Clone)]
pub struct SignatureTable {
    block_size: usize,
    file_size: u64,
    file_md5: Option<[u8; 16]>,
    blocks: Vec<Block>,
    index: HashMap<u32, Vec<usize>>,
}

impl SignatureTable {
    /// Assemble a table from already computed blocks
    pub(crate) fn from_blocks(
        block_size: usize,
        file_size: u64,
        file_md5: Option<[u8; 16]>,
        blocks: Vec<Block>,
    ) -> Self {
        let mut index: HashMap<u32, Vec<usize>> = HashMap::with_capacity(blocks.len());
        for (pos, block) in blocks.iter().enumerate() {
            index.entry(block.weak).or_default().push(pos);
        }

        Self {
            block_size,
            file_size,
            file_md5,
            blocks,
            index,
        }
    }

    /// Block size used for chunking
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Size of the base file
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// MD5 of the base file, when the table was built from its bytes
    pub fn file_md5(&self) -> Option<[u8; 16]> {
        self.file_md5
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of distinct weak checksums
    pub fn distinct_checksums(&self) -> usize {
        self.index.len()
    }

    /// The short final block, if the base size is not a multiple of the block size
    pub fn tail_block(&self) -> Option<&Block> {
        self.blocks
            .last()
            .filter(|block| (block.length as usize) < self.block_size)
    }

    /// Find the block whose bytes equal `window`, given the window's weak checksum.
    ///
    /// The strong hash is computed lazily, only when a weak candidate of the
    /// right length exists.
    pub fn find(&self, weak: u32, window: &[u8]) -> Option<&Block> {
        let candidates = self.index.get(&weak)?;
        let mut strong: Option<StrongHash> = None;

        for &pos in candidates {
            let block = &self.blocks[pos];
            if block.length as usize != window.len() {
                continue;
            }
            let digest = strong.get_or_insert_with(|| strong_hash(window));
            if block.strong == *digest {
                return Some(block);
            }
        }

        None
    }
}

mod hex_hash {
    use crate::checksum::StrongHash;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &StrongHash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StrongHash, D::Error> {
        let text = String::deserialize(deserializer)?;
        let mut hash = [0u8; 32];
        hex::decode_to_slice(&text, &mut hash).map_err(serde::de::Error::custom)?;
        Ok(hash)
    }
}
