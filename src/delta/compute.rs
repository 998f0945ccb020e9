//! Delta computation with an O(1) rolling checksum
//!
//! The candidate file is streamed through a bounded buffer holding the
//! current window, one read chunk and at most [`LITERAL_FLUSH`] bytes of
//! pending literal data. A matched block is consumed whole; on a miss the
//! window slides by one byte.

use super::{MatchStats, OperationList, OperationSink};
use crate::checksum::{rolling_checksum, FileDigest, FileHasher, RollingChecksum};
use crate::error::{Error, Result};
use crate::signature::SignatureTable;
use std::io::{ErrorKind, Read};
use std::time::Instant;

/// Bytes requested from the reader per refill
const READ_CHUNK: usize = 64 * 1024;

/// Pending literal bytes handed to the sink once this many accumulate
const LITERAL_FLUSH: usize = 64 * 1024;

/// Scan progress is traced every this many bytes
const PROGRESS_INTERVAL: u64 = 10 * 1024 * 1024;

/// Result of a matcher pass
#[derive(Debug, Clone, Copy)]
pub struct MatchOutcome {
    pub stats: MatchStats,

    /// MD5 of the complete new file
    pub md5: FileDigest,
}

/// Matches a new file against the signature table of its base
pub struct DeltaMatcher<'t> {
    table: &'t SignatureTable,
}

impl<'t> DeltaMatcher<'t> {
    pub fn new(table: &'t SignatureTable) -> Self {
        Self { table }
    }

    /// Scan `reader` and feed the resulting operations to `sink`
    pub fn scan<R: Read, S: OperationSink>(&self, reader: R, sink: &mut S) -> Result<MatchOutcome> {
        let started = Instant::now();

        tracing::debug!(
            block_size = self.table.block_size(),
            num_blocks = self.table.block_count(),
            "Starting delta computation"
        );

        let mut scan = Scan {
            table: self.table,
            reader,
            sink,
            buf: Vec::with_capacity(self.table.block_size() + READ_CHUNK + LITERAL_FLUSH),
            pos: 0,
            lit: 0,
            buf_offset: 0,
            eof: false,
            rolling: None,
            hasher: FileHasher::new(),
            in_literal: false,
            matched_bytes: 0,
            copy_ops: 0,
            literal_ops: 0,
            last_progress: 0,
        };

        if self.table.is_empty() {
            scan.drain_literal()?;
        } else {
            scan.run()?;
        }
        scan.sink.finish()?;

        let total_bytes = scan.hasher.len();
        let stats = MatchStats {
            matched_bytes: scan.matched_bytes,
            total_bytes,
            copy_ops: scan.copy_ops,
            literal_ops: scan.literal_ops,
            block_size: self.table.block_size(),
            elapsed: started.elapsed(),
        };

        tracing::debug!(
            copy_ops = stats.copy_ops,
            literal_ops = stats.literal_ops,
            matched_bytes = stats.matched_bytes,
            total_bytes = stats.total_bytes,
            "Delta computation complete"
        );

        Ok(MatchOutcome {
            stats,
            md5: scan.hasher.finalize(),
        })
    }
}

struct Scan<'t, 's, R, S> {
    table: &'t SignatureTable,
    reader: R,
    sink: &'s mut S,
    buf: Vec<u8>,
    /// Window start within `buf`
    pos: usize,
    /// Start of the pending literal run within `buf`
    lit: usize,
    /// Offset of `buf[0]` in the new file
    buf_offset: u64,
    eof: bool,
    rolling: Option<RollingChecksum>,
    hasher: FileHasher,
    in_literal: bool,
    matched_bytes: u64,
    copy_ops: u64,
    literal_ops: u64,
    last_progress: u64,
}

impl<R: Read, S: OperationSink> Scan<'_, '_, R, S> {
    fn run(&mut self) -> Result<()> {
        let table = self.table;
        let block_size = table.block_size();

        while self.fill(block_size)? {
            let window = &self.buf[self.pos..self.pos + block_size];
            let weak = self
                .rolling
                .get_or_insert_with(|| RollingChecksum::new(window))
                .value();

            if let Some(block) = table.find(weak, window) {
                self.flush_literal()?;
                self.emit_copy(block.index, block.length)?;
                self.pos += block_size;
                self.lit = self.pos;
                self.rolling = None;
                continue;
            }

            // No match - the first byte of the window becomes literal
            if !self.fill(block_size + 1)? {
                self.pos += 1;
                break;
            }
            let old_byte = self.buf[self.pos];
            let new_byte = self.buf[self.pos + block_size];
            if let Some(rolling) = self.rolling.as_mut() {
                rolling.roll(old_byte, new_byte);
            }
            self.pos += 1;

            if self.pos - self.lit >= LITERAL_FLUSH {
                self.flush_literal()?;
            }
        }

        // Fewer than block_size bytes remain; only the base's short tail can
        // still match, and only at the very end of the new file
        if let Some(tail) = table.tail_block() {
            let tail_len = tail.length as usize;
            if self.buf.len() - self.pos >= tail_len {
                let start = self.buf.len() - tail_len;
                let rest = &self.buf[start..];
                if let Some(block) = table.find(rolling_checksum(rest), rest) {
                    self.pos = start;
                    self.flush_literal()?;
                    self.emit_copy(block.index, block.length)?;
                    self.pos = self.buf.len();
                    self.lit = self.pos;
                }
            }
        }

        self.pos = self.buf.len();
        self.flush_literal()
    }

    /// Stream the whole input as literal data (no base blocks to match)
    fn drain_literal(&mut self) -> Result<()> {
        while self.fill(1)? {
            self.pos = self.buf.len();
            self.flush_literal()?;
        }
        Ok(())
    }

    /// Ensure `ahead` bytes are buffered from the window start.
    ///
    /// Returns false when the input ends first. May compact the buffer, so
    /// indices into it must be recomputed from `pos`/`lit` afterwards.
    fn fill(&mut self, ahead: usize) -> Result<bool> {
        while self.buf.len() < self.pos + ahead && !self.eof {
            self.compact();

            let start = self.buf.len();
            self.buf.resize(start + READ_CHUNK, 0);
            let read = loop {
                match self.reader.read(&mut self.buf[start..]) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.buf.truncate(start);
                        return Err(Error::io("reading new file", e));
                    }
                }
            };
            self.buf.truncate(start + read);

            if read == 0 {
                self.eof = true;
            } else {
                self.hasher.update(&self.buf[start..]);
            }
        }
        Ok(self.buf.len() >= self.pos + ahead)
    }

    /// Drop bytes already handed to the sink
    fn compact(&mut self) {
        if self.lit == 0 {
            return;
        }
        self.buf.drain(..self.lit);
        self.buf_offset += self.lit as u64;
        self.pos -= self.lit;
        self.lit = 0;

        let progress = self.buf_offset / PROGRESS_INTERVAL;
        if progress > self.last_progress {
            self.last_progress = progress;
            tracing::trace!(
                pos_mb = self.buf_offset / (1024 * 1024),
                copies = self.copy_ops,
                "Delta scan progress"
            );
        }
    }

    fn flush_literal(&mut self) -> Result<()> {
        if self.pos > self.lit {
            self.sink.literal(&self.buf[self.lit..self.pos])?;
            if !self.in_literal {
                self.in_literal = true;
                self.literal_ops += 1;
            }
            self.lit = self.pos;
        }
        Ok(())
    }

    fn emit_copy(&mut self, block_index: u64, length: u32) -> Result<()> {
        self.sink.copy(block_index, length)?;
        self.in_literal = false;
        self.copy_ops += 1;
        self.matched_bytes += length as u64;
        Ok(())
    }
}

/// Match `reader` against `table`, collecting the operations in memory
pub fn compute_delta<R: Read>(reader: R, table: &SignatureTable) -> Result<(OperationList, MatchOutcome)> {
    let mut ops = OperationList::new();
    let outcome = DeltaMatcher::new(table).scan(reader, &mut ops)?;
    Ok((ops, outcome))
}

/// Compute delta from byte slices (for testing)
pub fn compute_delta_from_bytes(local: &[u8], table: &SignatureTable) -> Result<(OperationList, MatchOutcome)> {
    compute_delta(local, table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::md5_bytes;
    use crate::delta::Operation;
    use crate::signature::build_from_bytes;

    /// Replay operations against the base in memory
    fn replay(ops: &OperationList, base: &[u8], block_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for op in ops.operations() {
            match op {
                Operation::Copy {
                    block_index,
                    length,
                } => {
                    let start = *block_index as usize * block_size;
                    out.extend_from_slice(&base[start..start + *length as usize]);
                }
                Operation::Literal { bytes } => out.extend_from_slice(bytes),
            }
        }
        out
    }

    fn pseudo_random(len: usize, mut seed: u64) -> Vec<u8> {
        (0..len)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (seed >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn test_identical_files_all_copy() {
        let data = b"hello world, this is test data for delta computation";
        let table = build_from_bytes(data, 10).unwrap();
        let (ops, outcome) = compute_delta_from_bytes(data, &table).unwrap();

        assert!(ops.operations().iter().all(Operation::is_copy));
        assert_eq!(ops.len(), table.block_count());
        assert_eq!(outcome.stats.matched_bytes, data.len() as u64);
        assert_eq!(outcome.stats.match_ratio(), 1.0);
        assert_eq!(outcome.md5, md5_bytes(data));
    }

    #[test]
    fn test_completely_different() {
        let old_data = b"old content here";
        let new_data = b"completely different new content";
        let table = build_from_bytes(old_data, 8).unwrap();
        let (ops, outcome) = compute_delta_from_bytes(new_data, &table).unwrap();

        assert_eq!(ops.len(), 1);
        assert_eq!(ops.literal_bytes(), new_data);
        assert_eq!(outcome.stats.matched_bytes, 0);
        assert_eq!(outcome.stats.literal_ops, 1);
    }

    #[test]
    fn test_partial_match() {
        let block_size = 8;
        let mut old_data = Vec::new();
        old_data.extend_from_slice(b"ABCDEFGH");
        old_data.extend_from_slice(b"IJKLMNOP");

        let mut new_data = Vec::new();
        new_data.extend_from_slice(b"ABCDEFGH");
        new_data.extend_from_slice(b"12345678");

        let table = build_from_bytes(&old_data, block_size).unwrap();
        let (ops, outcome) = compute_delta_from_bytes(&new_data, &table).unwrap();

        assert_eq!(outcome.stats.matched_bytes, 8);
        assert_eq!(replay(&ops, &old_data, block_size), new_data);
    }

    #[test]
    fn test_empty_base_single_literal() {
        let table = build_from_bytes(b"", 16).unwrap();
        let data = pseudo_random(200_000, 3);
        let (ops, outcome) = compute_delta_from_bytes(&data, &table).unwrap();

        assert_eq!(ops.len(), 1);
        assert_eq!(ops.literal_bytes(), data);
        assert_eq!(outcome.stats.total_bytes, 200_000);
        assert_eq!(outcome.stats.literal_ops, 1);
    }

    #[test]
    fn test_empty_new_file() {
        let table = build_from_bytes(b"some base bytes", 4).unwrap();
        let (ops, outcome) = compute_delta_from_bytes(b"", &table).unwrap();

        assert!(ops.is_empty());
        assert_eq!(outcome.stats.total_bytes, 0);
        assert_eq!(outcome.md5, md5_bytes(b""));
    }

    #[test]
    fn test_suffix_base_prefix_literal() {
        // New file = K extra bytes + base
        let new_data = pseudo_random(10_000, 11);
        let base = &new_data[7..];
        let table = build_from_bytes(base, 512).unwrap();
        let (ops, outcome) = compute_delta_from_bytes(&new_data, &table).unwrap();

        assert_eq!(
            ops.operations()[0],
            Operation::Literal {
                bytes: new_data[..7].to_vec()
            }
        );
        assert!(ops.operations()[1..].iter().all(Operation::is_copy));
        assert_eq!(outcome.stats.matched_bytes, base.len() as u64);
        assert_eq!(replay(&ops, base, 512), new_data);
    }

    #[test]
    fn test_tail_matches_after_literal() {
        let base = b"0123456789abc".to_vec();
        let mut new_data = b"0123456789".to_vec();
        new_data.extend_from_slice(b"XYZ");
        new_data.extend_from_slice(b"abc");

        let table = build_from_bytes(&base, 5).unwrap();
        let (ops, outcome) = compute_delta_from_bytes(&new_data, &table).unwrap();

        assert_eq!(
            ops.operations().last(),
            Some(&Operation::Copy {
                block_index: 2,
                length: 3
            })
        );
        assert_eq!(outcome.stats.matched_bytes, 13);
        assert_eq!(replay(&ops, &base, 5), new_data);
    }

    #[test]
    fn test_insertion_in_the_middle() {
        let base = pseudo_random(50_000, 5);
        let mut new_data = base[..20_000].to_vec();
        new_data.extend_from_slice(b"inserted bytes that are not in the base");
        new_data.extend_from_slice(&base[20_000..]);

        let table = build_from_bytes(&base, 1024).unwrap();
        let (ops, outcome) = compute_delta_from_bytes(&new_data, &table).unwrap();

        assert!(outcome.stats.match_ratio() > 0.9);
        assert_eq!(replay(&ops, &base, 1024), new_data);
        assert_eq!(ops.target_len(), new_data.len() as u64);
    }

    #[test]
    fn test_long_literal_run_spans_flushes() {
        // Literal run much longer than LITERAL_FLUSH between two matching blocks
        let base = pseudo_random(4096, 21);
        let mut new_data = base[..2048].to_vec();
        new_data.extend(pseudo_random(300_000, 99));
        new_data.extend_from_slice(&base[2048..]);

        let table = build_from_bytes(&base, 2048).unwrap();
        let (ops, outcome) = compute_delta_from_bytes(&new_data, &table).unwrap();

        assert_eq!(ops.len(), 3);
        assert_eq!(outcome.stats.literal_ops, 1);
        assert_eq!(outcome.stats.copy_ops, 2);
        assert_eq!(replay(&ops, &base, 2048), new_data);
    }

    #[test]
    fn test_repetitive_data_pattern() {
        let block_size = 1024;
        let total_size = block_size * 100;

        let pattern: Vec<u8> = (0u8..=255).collect();
        let mut old_data = Vec::with_capacity(total_size);
        while old_data.len() < total_size {
            old_data.extend_from_slice(&pattern);
        }
        old_data.truncate(total_size);

        let mut new_data = old_data.clone();
        for byte in &mut new_data[total_size / 3..2 * total_size / 3] {
            *byte = byte.wrapping_add(1);
        }

        let table = build_from_bytes(&old_data, block_size).unwrap();
        let (ops, outcome) = compute_delta_from_bytes(&new_data, &table).unwrap();

        assert!(outcome.stats.matched_bytes > 0, "Expected some bytes reused");
        assert!(outcome.stats.literal_bytes() > 0, "Expected some new bytes");
        assert_eq!(replay(&ops, &old_data, block_size), new_data);
    }

    #[test]
    fn test_all_zeros_data() {
        let block_size = 512;
        let total_size = block_size * 20;
        let old_data = vec![0u8; total_size];

        let mut new_data = old_data.clone();
        for byte in &mut new_data[total_size - block_size..] {
            *byte = 1;
        }

        let table = build_from_bytes(&old_data, block_size).unwrap();
        let (ops, outcome) = compute_delta_from_bytes(&new_data, &table).unwrap();

        // Every zero block matches block 0
        assert_eq!(outcome.stats.matched_bytes, (total_size - block_size) as u64);
        assert_eq!(replay(&ops, &old_data, block_size), new_data);
    }

    #[test]
    fn test_read_error_propagates() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(ErrorKind::Other, "broken pipe"))
            }
        }

        let table = build_from_bytes(b"abcdefgh", 4).unwrap();
        let mut ops = OperationList::new();
        let err = DeltaMatcher::new(&table).scan(Broken, &mut ops).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
