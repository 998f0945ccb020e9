//! Signature (.sign) file reading and writing
//!
//! A signature file lets a client compute a delta against a base file it
//! does not hold. Layout: magic, version byte, little-endian body length,
//! JSON body. The weak-checksum index is rebuilt on load.

use super::{generate::check_block_size, Block, SignatureTable};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Magic bytes for signature files
pub const SIGNATURE_MAGIC: &[u8; 6] = b"BKSIG\x01";

/// Current signature format version
pub const SIGNATURE_VERSION: u8 = 1;

const PREAMBLE_LEN: usize = 6 + 1 + 8;

#[derive(Serialize, Deserialize)]
struct SignatureBody {
    block_size: usize,
    file_size: u64,
    file_md5: Option<String>,
    blocks: Vec<Block>,
}

impl SignatureBody {
    fn from_table(table: &SignatureTable) -> Self {
        Self {
            block_size: table.block_size(),
            file_size: table.file_size(),
            file_md5: table.file_md5().map(hex::encode),
            blocks: table.blocks().to_vec(),
        }
    }

    fn into_table(self) -> Result<SignatureTable> {
        check_block_size(self.block_size)
            .map_err(|_| Error::signature(format!("invalid block size {}", self.block_size)))?;

        let file_md5 = match self.file_md5 {
            Some(text) => {
                let mut digest = [0u8; 16];
                hex::decode_to_slice(&text, &mut digest)
                    .map_err(|e| Error::signature(format!("invalid file md5: {}", e)))?;
                Some(digest)
            }
            None => None,
        };

        let mut expected_offset = 0u64;
        for (pos, block) in self.blocks.iter().enumerate() {
            if block.index != pos as u64
                || block.offset != expected_offset
                || block.length as usize > self.block_size
            {
                return Err(Error::signature(format!("inconsistent block {}", pos)));
            }
            expected_offset += block.length as u64;
        }
        if expected_offset != self.file_size {
            return Err(Error::signature(format!(
                "blocks cover {} bytes, file size is {}",
                expected_offset, self.file_size
            )));
        }

        Ok(SignatureTable::from_blocks(
            self.block_size,
            self.file_size,
            file_md5,
            self.blocks,
        ))
    }
}

/// Write a signature to a file
pub fn write_signature(table: &SignatureTable, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io("creating signature file", e))?;
    let mut writer = BufWriter::new(file);

    let data = write_signature_to_bytes(table)?;
    writer
        .write_all(&data)
        .map_err(|e| Error::io("writing signature", e))?;
    writer.flush().map_err(|e| Error::io("flushing", e))?;

    Ok(())
}

/// Read a signature from a file
pub fn read_signature(path: &Path) -> Result<SignatureTable> {
    let file = File::open(path).map_err(|e| Error::io("opening signature file", e))?;
    let mut reader = BufReader::new(file);

    let mut preamble = [0u8; PREAMBLE_LEN];
    reader
        .read_exact(&mut preamble)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::signature("signature data too short"),
            _ => Error::io("reading signature preamble", e),
        })?;
    let len = parse_preamble(&preamble)?;

    let mut body = Vec::new();
    reader
        .take(len)
        .read_to_end(&mut body)
        .map_err(|e| Error::io("reading signature body", e))?;
    if body.len() as u64 != len {
        return Err(Error::signature("signature data truncated"));
    }

    parse_body(&body)
}

/// Read a signature from bytes
pub fn read_signature_from_bytes(data: &[u8]) -> Result<SignatureTable> {
    if data.len() < PREAMBLE_LEN {
        return Err(Error::signature("signature data too short"));
    }

    let len = parse_preamble(&data[..PREAMBLE_LEN])?;
    let body = &data[PREAMBLE_LEN..];
    if (body.len() as u64) < len {
        return Err(Error::signature("signature data truncated"));
    }

    parse_body(&body[..len as usize])
}

/// Write a signature to bytes
pub fn write_signature_to_bytes(table: &SignatureTable) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(&SignatureBody::from_table(table))
        .map_err(|e| Error::signature(format!("serializing signature: {}", e)))?;

    let len = json.len() as u64;
    let mut data = Vec::with_capacity(PREAMBLE_LEN + json.len());
    data.extend_from_slice(SIGNATURE_MAGIC);
    data.push(SIGNATURE_VERSION);
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&json);

    Ok(data)
}

fn parse_preamble(preamble: &[u8]) -> Result<u64> {
    if &preamble[0..6] != SIGNATURE_MAGIC {
        return Err(Error::signature("invalid signature (bad magic)"));
    }

    if preamble[6] != SIGNATURE_VERSION {
        return Err(Error::signature(format!(
            "unsupported signature version {} (expected {})",
            preamble[6], SIGNATURE_VERSION
        )));
    }

    let mut len = [0u8; 8];
    len.copy_from_slice(&preamble[7..15]);
    Ok(u64::from_le_bytes(len))
}

fn parse_body(body: &[u8]) -> Result<SignatureTable> {
    let body: SignatureBody = serde_json::from_slice(body)
        .map_err(|e| Error::signature(format!("deserializing signature: {}", e)))?;
    body.into_table()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::generate::build_from_bytes;
    use tempfile::NamedTempFile;

    #[test]
    fn test_roundtrip_file() {
        let table = build_from_bytes(b"hello world test data", 8).unwrap();

        let file = NamedTempFile::new().unwrap();
        write_signature(&table, file.path()).unwrap();

        let loaded = read_signature(file.path()).unwrap();
        assert_eq!(loaded.file_size(), table.file_size());
        assert_eq!(loaded.blocks(), table.blocks());
        assert_eq!(loaded.file_md5(), table.file_md5());
        assert_eq!(loaded.distinct_checksums(), table.distinct_checksums());
    }

    #[test]
    fn test_roundtrip_bytes() {
        let table = build_from_bytes(b"test content", 4).unwrap();

        let bytes = write_signature_to_bytes(&table).unwrap();
        let loaded = read_signature_from_bytes(&bytes).unwrap();

        assert_eq!(loaded.block_size(), table.block_size());
        assert_eq!(loaded.blocks(), table.blocks());
    }

    #[test]
    fn test_invalid_magic() {
        let result = read_signature_from_bytes(b"BADMAG\x01\0\0\0\0\0\0\0\0");
        assert!(matches!(result, Err(Error::Signature { .. })));
    }

    #[test]
    fn test_truncated_body() {
        let table = build_from_bytes(b"abcdefgh", 4).unwrap();
        let bytes = write_signature_to_bytes(&table).unwrap();
        let result = read_signature_from_bytes(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(Error::Signature { .. })));
    }

    #[test]
    fn test_inconsistent_blocks_rejected() {
        let table = build_from_bytes(b"abcdefgh", 4).unwrap();
        let mut body = SignatureBody::from_table(&table);
        body.blocks[1].offset = 5;
        assert!(body.into_table().is_err());
    }
}
