//! Operation-stream codec for the BD payload
//!
//! The payload starts with the block size (`u32`) followed by records:
//!
//! - `0x01` Copy: `block_index: u64`, `length: u32`
//! - `0x02` Literal: `length: u64`, then `length` bytes
//!
//! Literal lengths are back-patched when the run ends, so the writer never
//! holds a literal run in memory.

use super::header::{read_u32, read_u64};
use crate::delta::{Operation, OperationList, OperationSink};
use crate::error::{Error, Result};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Record tag for Copy
pub const TAG_COPY: u8 = 0x01;

/// Record tag for Literal
pub const TAG_LITERAL: u8 = 0x02;

/// Streaming payload writer
pub struct OpWriter<W: Write + Seek> {
    writer: W,
    /// Stream position of the first payload byte
    start: u64,
    /// Position of the length field of the open literal record
    open_literal: Option<u64>,
    literal_len: u64,
    written: u64,
}

impl<W: Write + Seek> OpWriter<W> {
    /// Start a payload at the writer's current position
    pub fn new(mut writer: W, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::config("block size must be non-zero"));
        }
        let start = writer
            .stream_position()
            .map_err(|e| Error::io("seeking operation stream", e))?;
        writer
            .write_all(&block_size.to_be_bytes())
            .map_err(|e| Error::io("writing operation stream", e))?;

        Ok(Self {
            writer,
            start,
            open_literal: None,
            literal_len: 0,
            written: 4,
        })
    }

    /// Bytes of payload written so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .map_err(|e| Error::io("writing operation stream", e))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn close_literal(&mut self) -> Result<()> {
        let Some(len_pos) = self.open_literal.take() else {
            return Ok(());
        };

        let end = self.start + self.written;
        patch_at(&mut self.writer, len_pos, &self.literal_len.to_be_bytes(), end)
            .map_err(|e| Error::io("patching literal length", e))?;

        self.literal_len = 0;
        Ok(())
    }
}

fn patch_at<W: Write + Seek>(writer: &mut W, pos: u64, bytes: &[u8], resume: u64) -> io::Result<()> {
    writer.seek(SeekFrom::Start(pos))?;
    writer.write_all(bytes)?;
    writer.seek(SeekFrom::Start(resume))?;
    Ok(())
}

impl<W: Write + Seek> OperationSink for OpWriter<W> {
    fn copy(&mut self, block_index: u64, length: u32) -> Result<()> {
        self.close_literal()?;

        let mut record = [0u8; 13];
        record[0] = TAG_COPY;
        record[1..9].copy_from_slice(&block_index.to_be_bytes());
        record[9..13].copy_from_slice(&length.to_be_bytes());
        self.write(&record)
    }

    fn literal(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        if self.open_literal.is_none() {
            let pos = self.start + self.written;
            self.write(&[TAG_LITERAL])?;
            self.write(&0u64.to_be_bytes())?;
            self.open_literal = Some(pos + 1);
        }

        self.write(bytes)?;
        self.literal_len += bytes.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.close_literal()?;
        self.writer
            .flush()
            .map_err(|e| Error::io("flushing operation stream", e))
    }
}

/// One decoded record. Literal bytes stay in the stream until
/// [`OpReader::copy_literal`] or the next [`OpReader::next_record`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    Copy { block_index: u64, length: u32 },
    Literal { length: u64 },
}

/// Streaming payload reader
pub struct OpReader<R: Read> {
    reader: R,
    block_size: u32,
    pending: u64,
}

impl<R: Read> OpReader<R> {
    /// Read the payload preamble. `reader` must end where the payload ends.
    pub fn new(mut reader: R) -> Result<Self> {
        let block_size = read_u32(&mut reader, "operation stream")?;
        if block_size == 0 {
            return Err(Error::format("operation stream declares a zero block size"));
        }

        Ok(Self {
            reader,
            block_size,
            pending: 0,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Decode the next record, or `None` at the end of the payload
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.pending > 0 {
            self.copy_literal(&mut io::sink())?;
        }

        let mut tag = [0u8; 1];
        loop {
            match self.reader.read(&mut tag) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io("reading operation stream", e)),
            }
        }

        match tag[0] {
            TAG_COPY => {
                let block_index = read_u64(&mut self.reader, "copy record")?;
                let length = read_u32(&mut self.reader, "copy record")?;
                if length > self.block_size {
                    return Err(Error::format(format!(
                        "copy of {} bytes exceeds the {} byte block size",
                        length, self.block_size
                    )));
                }
                Ok(Some(Record::Copy {
                    block_index,
                    length,
                }))
            }
            TAG_LITERAL => {
                let length = read_u64(&mut self.reader, "literal record")?;
                self.pending = length;
                Ok(Some(Record::Literal { length }))
            }
            other => Err(Error::format(format!("unknown operation tag {:#04x}", other))),
        }
    }

    /// Copy the bytes of the current literal record to `out`
    pub fn copy_literal<W: Write>(&mut self, out: &mut W) -> Result<u64> {
        let expected = self.pending;
        let copied = io::copy(&mut (&mut self.reader).take(expected), out)
            .map_err(|e| Error::io("copying literal bytes", e))?;
        self.pending = 0;

        if copied != expected {
            return Err(Error::format(format!(
                "truncated literal record: {} of {} bytes",
                copied, expected
            )));
        }
        Ok(copied)
    }

    /// Decode the whole stream into memory
    pub fn read_operations(mut self) -> Result<OperationList> {
        let mut ops = OperationList::new();
        while let Some(record) = self.next_record()? {
            match record {
                Record::Copy {
                    block_index,
                    length,
                } => ops.push(Operation::Copy {
                    block_index,
                    length,
                }),
                Record::Literal { .. } => {
                    let mut bytes = Vec::new();
                    self.copy_literal(&mut bytes)?;
                    ops.push(Operation::Literal { bytes });
                }
            }
        }
        Ok(ops)
    }
}

/// Encode a block size and operation list into payload bytes
pub fn encode_operations(block_size: u32, ops: &[Operation]) -> Result<Vec<u8>> {
    let mut writer = OpWriter::new(io::Cursor::new(Vec::new()), block_size)?;
    for op in ops {
        match op {
            Operation::Copy {
                block_index,
                length,
            } => writer.copy(*block_index, *length)?,
            Operation::Literal { bytes } => writer.literal(bytes)?,
        }
    }
    writer.finish()?;
    Ok(writer.into_inner().into_inner())
}

/// Decode payload bytes into a block size and operation list
pub fn decode_operations(payload: &[u8]) -> Result<(u32, OperationList)> {
    let reader = OpReader::new(payload)?;
    let block_size = reader.block_size();
    Ok((block_size, reader.read_operations()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ops() -> Vec<Operation> {
        vec![
            Operation::Literal {
                bytes: b"head".to_vec(),
            },
            Operation::Copy {
                block_index: 2,
                length: 16,
            },
            Operation::Copy {
                block_index: 0,
                length: 5,
            },
            Operation::Literal {
                bytes: b"tail".to_vec(),
            },
        ]
    }

    #[test]
    fn test_record_layout() {
        let payload = encode_operations(16, &sample_ops()[..2]).unwrap();

        let mut expected = 16u32.to_be_bytes().to_vec();
        expected.push(TAG_LITERAL);
        expected.extend_from_slice(&4u64.to_be_bytes());
        expected.extend_from_slice(b"head");
        expected.push(TAG_COPY);
        expected.extend_from_slice(&2u64.to_be_bytes());
        expected.extend_from_slice(&16u32.to_be_bytes());
        assert_eq!(payload, expected);
    }

    #[test]
    fn test_decode_operations() {
        let payload = encode_operations(16, &sample_ops()).unwrap();
        let (block_size, ops) = decode_operations(&payload).unwrap();
        assert_eq!(block_size, 16);
        assert_eq!(ops.operations(), &sample_ops()[..]);
    }

    #[test]
    fn test_streamed_literal_chunks_form_one_record() {
        let mut writer = OpWriter::new(io::Cursor::new(Vec::new()), 8).unwrap();
        writer.literal(b"ab").unwrap();
        writer.literal(b"cd").unwrap();
        writer.literal(b"").unwrap();
        writer.literal(b"e").unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.bytes_written(), 4 + 9 + 5);

        let payload = writer.into_inner().into_inner();
        let (_, ops) = decode_operations(&payload).unwrap();
        assert_eq!(
            ops.operations(),
            &[Operation::Literal {
                bytes: b"abcde".to_vec()
            }]
        );
    }

    #[test]
    fn test_records_skip_unread_literals() {
        let payload = encode_operations(16, &sample_ops()).unwrap();
        let mut reader = OpReader::new(&payload[..]).unwrap();

        let mut records = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            records.push(record);
        }
        assert_eq!(
            records,
            vec![
                Record::Literal { length: 4 },
                Record::Copy {
                    block_index: 2,
                    length: 16
                },
                Record::Copy {
                    block_index: 0,
                    length: 5
                },
                Record::Literal { length: 4 },
            ]
        );
    }

    #[test]
    fn test_empty_stream() {
        let payload = encode_operations(4096, &[]).unwrap();
        assert_eq!(payload.len(), 4);
        let (_, ops) = decode_operations(&payload).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        assert!(matches!(
            decode_operations(&[0, 0, 0, 0]),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_unknown_tag() {
        let mut payload = encode_operations(16, &[]).unwrap();
        payload.push(0x7f);
        assert!(matches!(decode_operations(&payload), Err(Error::Format { .. })));
    }

    #[test]
    fn test_truncated_records() {
        let payload = encode_operations(16, &sample_ops()).unwrap();
        // Cut inside the final literal bytes, then inside the copy record
        for len in [payload.len() - 2, 4 + 13 + 5] {
            assert!(
                matches!(decode_operations(&payload[..len]), Err(Error::Format { .. })),
                "length {}",
                len
            );
        }
    }

    #[test]
    fn test_oversized_copy_rejected() {
        let payload = encode_operations(
            8,
            &[Operation::Copy {
                block_index: 0,
                length: 9,
            }],
        )
        .unwrap();
        assert!(matches!(decode_operations(&payload), Err(Error::Format { .. })));
    }
}
