//! Signature generation using rolling checksums and BLAKE3

use super::{block_size_for, Block, SignatureTable};
use crate::checksum::{rolling_checksum, strong_hash, FileHasher};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// Build the signature table of a base file read from `reader`.
///
/// The base is consumed block by block, so memory stays proportional to the
/// number of blocks. Any read failure aborts the build.
pub fn build<R: Read>(mut reader: R, block_size: usize) -> Result<SignatureTable> {
    check_block_size(block_size)?;

    let mut buffer = vec![0u8; block_size];
    let mut blocks = Vec::new();
    let mut offset = 0u64;
    let mut file_hasher = FileHasher::new();

    loop {
        let bytes_read = read_full(&mut reader, &mut buffer)
            .map_err(|e| Error::io("reading base file", e))?;

        if bytes_read == 0 {
            break;
        }

        let chunk = &buffer[..bytes_read];
        file_hasher.update(chunk);

        blocks.push(Block::new(
            blocks.len() as u64,
            offset,
            bytes_read as u32,
            rolling_checksum(chunk),
            strong_hash(chunk),
        ));

        offset += bytes_read as u64;

        if bytes_read < block_size {
            break;
        }
    }

    let table = SignatureTable::from_blocks(block_size, offset, Some(file_hasher.finalize()), blocks);

    tracing::debug!(
        block_size = block_size,
        file_size = table.file_size(),
        blocks = table.block_count(),
        distinct = table.distinct_checksums(),
        "Built signature table"
    );

    Ok(table)
}

/// Build the signature table of a file on disk.
///
/// With `block_size` of `None` the size is picked by [`block_size_for`].
pub fn build_from_path(path: &Path, block_size: Option<usize>) -> Result<SignatureTable> {
    let file = File::open(path).map_err(|e| Error::io("opening base file", e))?;
    let file_size = file
        .metadata()
        .map_err(|e| Error::io("reading base file metadata", e))?
        .len();

    let block_size = block_size.unwrap_or_else(|| block_size_for(file_size));
    build(BufReader::new(file), block_size)
}

/// Build a signature table from a byte slice (for testing)
pub fn build_from_bytes(data: &[u8], block_size: usize) -> Result<SignatureTable> {
    build(data, block_size)
}

/// Reject block sizes the wire format cannot express
pub(crate) fn check_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 || block_size > u32::MAX as usize {
        return Err(Error::config(format!("invalid block size {}", block_size)));
    }
    Ok(())
}

/// Fill `buf` as far as the reader allows, returning the number of bytes read.
///
/// Only returns less than `buf.len()` at end of input.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
