//! BD binary delta format
//!
//! A BD file is a header naming the source and destination keys and the MD5
//! of the new file, an operation-stream payload, and a CRC-32 trailer over
//! the payload.

pub mod header;
pub mod ops;

pub use header::{decode_from_bytes, encode, encode_to_bytes, CrcReader, DeltaHeader, BD_MAGIC};
pub use ops::{decode_operations, encode_operations, OpReader, OpWriter, Record};

use crate::error::{Error, Result};
use serde::Serialize;
use std::io::{self, Read};

/// Counts gathered by walking an operation stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PayloadSummary {
    pub block_size: u32,
    pub copy_ops: u64,
    pub literal_ops: u64,
    pub copy_bytes: u64,
    pub literal_bytes: u64,
}

impl PayloadSummary {
    /// Length of the file the payload rebuilds
    pub fn target_len(&self) -> u64 {
        self.copy_bytes + self.literal_bytes
    }

    /// Walk every record of a payload
    pub fn from_reader<R: Read>(payload: R) -> Result<Self> {
        let mut reader = OpReader::new(payload)?;
        let mut summary = PayloadSummary {
            block_size: reader.block_size(),
            ..Default::default()
        };

        while let Some(record) = reader.next_record()? {
            match record {
                Record::Copy { length, .. } => {
                    summary.copy_ops += 1;
                    summary.copy_bytes += length as u64;
                }
                Record::Literal { length } => {
                    summary.literal_ops += 1;
                    summary.literal_bytes += length;
                }
            }
        }

        Ok(summary)
    }
}

/// Validate a whole BD file read from `reader`: header, CRC trailer, the
/// structure of every record, and that nothing follows the trailer.
///
/// The trailer is checked before structural errors in the payload are
/// reported, so a corrupted delta surfaces as a checksum mismatch.
pub fn verify<R: Read>(reader: &mut R) -> Result<(DeltaHeader, PayloadSummary)> {
    let header = DeltaHeader::read_from(reader)?;

    let mut payload = CrcReader::new(reader.by_ref().take(header.payload_len));
    let structure = PayloadSummary::from_reader(&mut payload);

    // The CRC covers every payload byte, even past a malformed record
    io::copy(&mut payload, &mut io::sink()).map_err(|e| Error::io("reading delta payload", e))?;
    if payload.count() != header.payload_len {
        return Err(Error::format(format!(
            "truncated delta payload: {} of {} bytes",
            payload.count(),
            header.payload_len
        )));
    }
    let actual = payload.crc();
    header::check_trailer(reader, actual)?;

    let trailing = io::copy(reader, &mut io::sink()).map_err(|e| Error::io("reading delta file", e))?;
    if trailing != 0 {
        return Err(Error::format(format!(
            "{} unexpected bytes after delta trailer",
            trailing
        )));
    }

    let summary = structure?;

    tracing::debug!(
        src = %header.src,
        dest = %header.dest,
        payload_len = header.payload_len,
        copy_ops = summary.copy_ops,
        literal_ops = summary.literal_ops,
        "Verified delta container"
    );

    Ok((header, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Operation;

    fn sample_file() -> Vec<u8> {
        let payload = encode_operations(
            4,
            &[
                Operation::Copy {
                    block_index: 1,
                    length: 4,
                },
                Operation::Literal {
                    bytes: b"xyz".to_vec(),
                },
            ],
        )
        .unwrap();
        encode_to_bytes("src", "dest", [1; 16], &payload).unwrap()
    }

    #[test]
    fn test_verify_summary() {
        let data = sample_file();
        let (header, summary) = verify(&mut &data[..]).unwrap();
        assert_eq!(header.src, "src");
        assert_eq!(summary.block_size, 4);
        assert_eq!(summary.copy_ops, 1);
        assert_eq!(summary.literal_ops, 1);
        assert_eq!(summary.target_len(), 7);
    }

    #[test]
    fn test_corruption_reported_as_checksum_mismatch() {
        let mut data = sample_file();
        let header_len = DeltaHeader::read_from(&mut &data[..]).unwrap().encoded_len() as usize;
        // Turn the Copy tag into an unknown tag
        data[header_len + 4] = 0x55;
        assert!(matches!(
            verify(&mut &data[..]),
            Err(Error::TrailerChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_bytes_after_trailer_rejected() {
        let mut data = sample_file();
        data.extend_from_slice(b"junk");
        let err = verify(&mut &data[..]).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
        assert!(err.to_string().contains("4 unexpected bytes"));
        assert!(decode_from_bytes(&data).is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let data = sample_file();
        let cut = &data[..data.len() - 10];
        assert!(matches!(verify(&mut &cut[..]), Err(Error::Format { .. })));
    }
}
