//! File-in/file-out delta and patch pipelines
//!
//! `delta` produces a BD file from a new file and its base; `patch` rebuilds
//! the new file from a BD file and the same base. Both run on the calling
//! thread and write their result as a temporary file inside the caller's
//! work directory. The result owns that file: dropping it without calling
//! `persist` deletes it, and every error path deletes whatever was written.

use crate::bd::{self, header::check_keys, DeltaHeader, OpReader, OpWriter, PayloadSummary, Record};
use crate::checksum::{FileDigest, FileHasher};
use crate::config::{Config, DEFAULT_MIN_MATCH_RATIO};
use crate::delta::{DeltaMatcher, MatchStats};
use crate::error::{Error, Result};
use crate::signature::{self, SignatureTable, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, TARGET_BLOCK_COUNT};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;
use tempfile::{Builder, TempPath};

/// Tuning for [`delta_with_options`]
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaOptions {
    /// Fixed block size (None = derive from the base file size)
    pub block_size: Option<usize>,
    pub min_block_size: usize,
    pub max_block_size: usize,
    pub target_block_count: u64,

    /// Advisory threshold reported through [`DeltaFile::meets_ratio`]
    pub min_match_ratio: f64,
}

impl Default for DeltaOptions {
    fn default() -> Self {
        Self {
            block_size: None,
            min_block_size: MIN_BLOCK_SIZE,
            max_block_size: MAX_BLOCK_SIZE,
            target_block_count: TARGET_BLOCK_COUNT,
            min_match_ratio: DEFAULT_MIN_MATCH_RATIO,
        }
    }
}

impl DeltaOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            block_size: config.block_size,
            min_block_size: config.min_block_size,
            max_block_size: config.max_block_size,
            target_block_count: config.target_block_count,
            min_match_ratio: config.min_match_ratio,
        }
    }

    /// Block size for a base file of `file_size` bytes
    pub fn block_size_for(&self, file_size: u64) -> usize {
        self.block_size.unwrap_or_else(|| {
            signature::block_size_within(
                file_size,
                self.target_block_count,
                self.min_block_size,
                self.max_block_size,
            )
        })
    }
}

/// A BD file produced by [`delta`]
#[derive(Debug)]
pub struct DeltaFile {
    header: DeltaHeader,
    path: TempPath,
    stats: MatchStats,
    min_match_ratio: f64,
}

impl DeltaFile {
    /// Key of the new file
    pub fn src(&self) -> &str {
        &self.header.src
    }

    /// Key of the base file
    pub fn dest(&self) -> &str {
        &self.header.dest
    }

    /// MD5 of the complete new file
    pub fn md5(&self) -> FileDigest {
        self.header.md5
    }

    pub fn md5_hex(&self) -> String {
        self.header.md5_hex()
    }

    pub fn header(&self) -> &DeltaHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the BD file in bytes
    pub fn len(&self) -> u64 {
        self.header.total_len()
    }

    pub fn stats(&self) -> &MatchStats {
        &self.stats
    }

    pub fn min_match_ratio(&self) -> f64 {
        self.min_match_ratio
    }

    /// Whether enough of the new file was reused from the base
    pub fn meets_ratio(&self) -> bool {
        self.stats.match_ratio() >= self.min_match_ratio
    }

    /// Move the BD file to `path`, which must be on the same filesystem as
    /// the work directory
    pub fn persist(self, path: &Path) -> Result<()> {
        self.path
            .persist(path)
            .map_err(|e| Error::io("persisting delta file", e.error))
    }

    /// Give up ownership tracking; the caller becomes responsible for cleanup
    pub fn into_temp_path(self) -> TempPath {
        self.path
    }
}

/// A file rebuilt and verified by [`patch`]
#[derive(Debug)]
pub struct ReconstructedFile {
    path: TempPath,
    len: u64,
    md5: FileDigest,
}

impl ReconstructedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// MD5 of the reconstructed bytes, equal to the one in the BD header
    pub fn md5(&self) -> FileDigest {
        self.md5
    }

    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    /// Move the file to `path`, which must be on the same filesystem as the
    /// work directory
    pub fn persist(self, path: &Path) -> Result<()> {
        self.path
            .persist(path)
            .map_err(|e| Error::io("persisting reconstructed file", e.error))
    }

    pub fn into_temp_path(self) -> TempPath {
        self.path
    }
}

/// Description of a BD file, as reported by [`inspect`]
#[derive(Debug, Clone, Serialize)]
pub struct DeltaSummary {
    pub src: String,
    pub dest: String,
    pub md5: String,
    pub header_len: u64,
    pub payload_len: u64,
    pub total_len: u64,
    pub payload: PayloadSummary,
}

/// Compute the delta of `new_file` against `base_file`.
///
/// `min_match_ratio` is advisory: the delta is produced regardless and the
/// outcome is available through [`DeltaFile::meets_ratio`].
pub fn delta(
    new_file: &Path,
    base_file: &Path,
    src_key: &str,
    dest_key: &str,
    work_dir: &Path,
    min_match_ratio: f64,
) -> Result<DeltaFile> {
    let options = DeltaOptions {
        min_match_ratio,
        ..Default::default()
    };
    delta_with_options(new_file, base_file, src_key, dest_key, work_dir, &options)
}

/// [`delta`] with explicit block size policy
pub fn delta_with_options(
    new_file: &Path,
    base_file: &Path,
    src_key: &str,
    dest_key: &str,
    work_dir: &Path,
    options: &DeltaOptions,
) -> Result<DeltaFile> {
    check_keys(src_key, dest_key)?;

    let base = File::open(base_file).map_err(|e| Error::io("opening base file", e))?;
    let base_len = base
        .metadata()
        .map_err(|e| Error::io("reading base file metadata", e))?
        .len();
    let block_size = options.block_size_for(base_len);

    let table = signature::build(BufReader::new(base), block_size)?;
    delta_with_signature(
        new_file,
        &table,
        src_key,
        dest_key,
        work_dir,
        options.min_match_ratio,
    )
}

/// Compute a delta against a signature table instead of the base file itself
pub fn delta_with_signature(
    new_file: &Path,
    table: &SignatureTable,
    src_key: &str,
    dest_key: &str,
    work_dir: &Path,
    min_match_ratio: f64,
) -> Result<DeltaFile> {
    check_keys(src_key, dest_key)?;
    let started = Instant::now();

    let block_size = u32::try_from(table.block_size())
        .map_err(|_| Error::config(format!("invalid block size {}", table.block_size())))?;
    prepare_work_dir(work_dir)?;

    let new = File::open(new_file).map_err(|e| Error::io("opening new file", e))?;

    // Pass 1: operations go to an unnamed scratch file, since the header
    // needs the payload length and the MD5 before the payload itself
    let scratch = tempfile::tempfile_in(work_dir).map_err(|e| Error::io("creating scratch file", e))?;
    let mut ops = OpWriter::new(BufWriter::new(scratch), block_size)?;
    let outcome = DeltaMatcher::new(table).scan(BufReader::new(new), &mut ops)?;
    let payload_len = ops.bytes_written();

    let mut scratch = ops
        .into_inner()
        .into_inner()
        .map_err(|e| Error::io("flushing scratch file", e.into_error()))?;
    scratch
        .seek(SeekFrom::Start(0))
        .map_err(|e| Error::io("rewinding scratch file", e))?;

    // Pass 2: header, payload, trailer
    let header = DeltaHeader::new(src_key, dest_key, outcome.md5, payload_len)?;
    let (file, path) = Builder::new()
        .prefix("bksync-")
        .suffix(".bd")
        .tempfile_in(work_dir)
        .map_err(|e| Error::io("creating delta file", e))?
        .into_parts();

    let mut writer = BufWriter::new(file);
    bd::encode(&mut writer, &header, BufReader::new(scratch))?;
    writer
        .into_inner()
        .map_err(|e| Error::io("flushing delta file", e.into_error()))?
        .sync_all()
        .map_err(|e| Error::io("syncing delta file", e))?;

    let delta = DeltaFile {
        header,
        path,
        stats: outcome.stats,
        min_match_ratio,
    };

    tracing::info!(
        src = %delta.src(),
        dest = %delta.dest(),
        delta_size = delta.len(),
        match_ratio = format!("{:.3}", delta.stats.match_ratio()),
        meets_ratio = delta.meets_ratio(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Delta computed"
    );

    Ok(delta)
}

/// Rebuild the new file from `delta_file` and `base_file`.
///
/// The container is fully verified before the base is touched. The result
/// is only returned when its MD5 equals the one recorded in the delta.
pub fn patch(delta_file: &Path, base_file: &Path, work_dir: &Path) -> Result<ReconstructedFile> {
    let started = Instant::now();

    let file = File::open(delta_file).map_err(|e| Error::io("opening delta file", e))?;
    let mut reader = BufReader::new(file);
    let (header, summary) = bd::verify(&mut reader)?;

    reader
        .seek(SeekFrom::Start(header.encoded_len()))
        .map_err(|e| Error::io("seeking delta payload", e))?;

    let mut base = File::open(base_file).map_err(|e| Error::io("opening base file", e))?;
    let base_len = base
        .metadata()
        .map_err(|e| Error::io("reading base file metadata", e))?
        .len();

    prepare_work_dir(work_dir)?;
    let (file, path) = Builder::new()
        .prefix("bksync-")
        .suffix(".out")
        .tempfile_in(work_dir)
        .map_err(|e| Error::io("creating output file", e))?
        .into_parts();

    let mut out = HashingWriter::new(BufWriter::new(file));
    let mut ops = OpReader::new(reader.take(header.payload_len))?;
    let block_size = ops.block_size() as u64;
    let mut base_pos = 0u64;

    while let Some(record) = ops.next_record()? {
        match record {
            Record::Copy {
                block_index,
                length,
            } => {
                let offset = block_index
                    .checked_mul(block_size)
                    .filter(|offset| offset.saturating_add(length as u64) <= base_len)
                    .ok_or(Error::CopyOutOfRange {
                        block_index,
                        length,
                        base_len,
                    })?;

                if offset != base_pos {
                    base.seek(SeekFrom::Start(offset))
                        .map_err(|e| Error::io("seeking base file", e))?;
                }
                let copied = io::copy(&mut (&mut base).take(length as u64), &mut out)
                    .map_err(|e| Error::io("copying from base file", e))?;
                if copied != length as u64 {
                    return Err(Error::io(
                        "reading base file",
                        io::Error::from(io::ErrorKind::UnexpectedEof),
                    ));
                }
                base_pos = offset + copied;
            }
            Record::Literal { .. } => {
                ops.copy_literal(&mut out)?;
            }
        }
    }

    let (writer, hasher) = out.into_parts();
    writer
        .into_inner()
        .map_err(|e| Error::io("flushing output file", e.into_error()))?
        .sync_all()
        .map_err(|e| Error::io("syncing output file", e))?;

    let len = hasher.len();
    let md5 = hasher.finalize();
    if md5 != header.md5 {
        tracing::warn!(
            expected = %header.md5_hex(),
            actual = %hex::encode(md5),
            base = %base_file.display(),
            "Reconstructed file does not match the delta"
        );
        // Dropping `path` deletes the unverified output
        return Err(Error::IntegrityMismatch {
            expected: header.md5_hex(),
            actual: hex::encode(md5),
        });
    }
    debug_assert_eq!(len, summary.target_len());

    tracing::info!(
        src = %header.src,
        dest = %header.dest,
        size = len,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Patch applied"
    );

    Ok(ReconstructedFile { path, len, md5 })
}

/// Verify a BD file and summarize its contents without a base file
pub fn inspect(delta_file: &Path) -> Result<DeltaSummary> {
    let file = File::open(delta_file).map_err(|e| Error::io("opening delta file", e))?;
    let (header, payload) = bd::verify(&mut BufReader::new(file))?;

    Ok(DeltaSummary {
        md5: header.md5_hex(),
        header_len: header.encoded_len(),
        payload_len: header.payload_len,
        total_len: header.total_len(),
        src: header.src,
        dest: header.dest,
        payload,
    })
}

fn prepare_work_dir(work_dir: &Path) -> Result<()> {
    fs::create_dir_all(work_dir).map_err(|e| Error::io("creating work directory", e))
}

/// Writer that hashes everything written through it
struct HashingWriter<W> {
    inner: W,
    hasher: FileHasher,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: FileHasher::new(),
        }
    }

    fn into_parts(self) -> (W, FileHasher) {
        (self.inner, self.hasher)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
