//! BD container header and CRC trailer
//!
//! All integers are big-endian:
//!
//! ```text
//! magic        u32
//! name_len     u32   (src_len << 16) | dest_len
//! src          src_len bytes, UTF-8
//! dest         dest_len bytes, UTF-8
//! md5          16 bytes, digest of the complete new file
//! payload_len  u64
//! extra        u8, always 0
//! payload      payload_len bytes
//! crc          u64, CRC-32 of the payload bytes
//! ```

use crate::checksum::FileDigest;
use crate::error::{Error, Result};
use std::io::{self, Read, Write};

/// Magic number opening every BD file ("BKSD")
pub const BD_MAGIC: u32 = 0x424B_5344;

/// Longest src/dest key the 16-bit length fields can describe
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Length of the CRC trailer
pub const TRAILER_LEN: u64 = 8;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Everything in a BD file that precedes the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaHeader {
    pub src: String,
    pub dest: String,
    pub md5: FileDigest,
    pub payload_len: u64,
}

impl DeltaHeader {
    /// Create a header, rejecting keys that do not fit the 16-bit length fields
    pub fn new(
        src: impl Into<String>,
        dest: impl Into<String>,
        md5: FileDigest,
        payload_len: u64,
    ) -> Result<Self> {
        let src = src.into();
        let dest = dest.into();
        check_key("src", &src)?;
        check_key("dest", &dest)?;

        Ok(Self {
            src,
            dest,
            md5,
            payload_len,
        })
    }

    /// Size of the encoded header in bytes
    pub fn encoded_len(&self) -> u64 {
        (4 + 4 + self.src.len() + self.dest.len() + 16 + 8 + 1) as u64
    }

    /// Size of the whole BD file this header describes
    pub fn total_len(&self) -> u64 {
        self.encoded_len() + self.payload_len + TRAILER_LEN
    }

    /// The packed `(src_len << 16) | dest_len` field
    pub fn name_len(&self) -> u32 {
        ((self.src.len() as u32) << 16) | self.dest.len() as u32
    }

    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    /// Write the header
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        check_key("src", &self.src)?;
        check_key("dest", &self.dest)?;

        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        buf.extend_from_slice(&BD_MAGIC.to_be_bytes());
        buf.extend_from_slice(&self.name_len().to_be_bytes());
        buf.extend_from_slice(self.src.as_bytes());
        buf.extend_from_slice(self.dest.as_bytes());
        buf.extend_from_slice(&self.md5);
        buf.extend_from_slice(&self.payload_len.to_be_bytes());
        buf.push(0);

        writer
            .write_all(&buf)
            .map_err(|e| Error::io("writing delta header", e))
    }

    /// Read and validate a header, leaving `reader` at the first payload byte
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = read_u32(reader, "delta header")?;
        if magic != BD_MAGIC {
            return Err(Error::format(format!(
                "bad magic {:#010x} (expected {:#010x})",
                magic, BD_MAGIC
            )));
        }

        let name_len = read_u32(reader, "delta header")?;
        let src = read_key(reader, (name_len >> 16) as usize, "src")?;
        let dest = read_key(reader, (name_len & 0xffff) as usize, "dest")?;

        let mut md5 = [0u8; 16];
        reader
            .read_exact(&mut md5)
            .map_err(|e| Error::truncated("delta header", e))?;

        let payload_len = read_u64(reader, "delta header")?;

        let mut extra = [0u8; 1];
        reader
            .read_exact(&mut extra)
            .map_err(|e| Error::truncated("delta header", e))?;
        if extra[0] != 0 {
            return Err(Error::format(format!(
                "unsupported flags byte {:#04x}",
                extra[0]
            )));
        }

        Ok(Self {
            src,
            dest,
            md5,
            payload_len,
        })
    }
}

/// Fail early when either key cannot be encoded
pub(crate) fn check_keys(src: &str, dest: &str) -> Result<()> {
    check_key("src", src)?;
    check_key("dest", dest)
}

fn check_key(which: &'static str, key: &str) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(Error::KeyTooLong {
            which,
            len: key.len(),
        });
    }
    Ok(())
}

fn read_key<R: Read>(reader: &mut R, len: usize, which: &str) -> Result<String> {
    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::truncated("delta header", e))?;
    String::from_utf8(bytes).map_err(|_| Error::format(format!("{} key is not valid UTF-8", which)))
}

pub(crate) fn read_u32<R: Read>(reader: &mut R, context: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::truncated(context, e))?;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(reader: &mut R, context: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::truncated(context, e))?;
    Ok(u64::from_be_bytes(buf))
}

/// Reader adapter computing the CRC-32 of everything read through it
pub struct CrcReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    count: u64,
}

impl<R: Read> CrcReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            count: 0,
        }
    }

    /// Bytes read so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// CRC of the bytes read so far, widened to the trailer width
    pub fn crc(&self) -> u64 {
        self.hasher.clone().finalize() as u64
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// Read the trailer and compare it with the CRC computed over the payload
pub fn check_trailer<R: Read>(reader: &mut R, actual: u64) -> Result<()> {
    let expected = read_u64(reader, "delta trailer")?;
    if expected != actual {
        return Err(Error::TrailerChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Write a complete BD file: header, exactly `header.payload_len` bytes from
/// `payload`, and the CRC trailer. Returns the number of bytes written.
pub fn encode<W: Write, R: Read>(writer: &mut W, header: &DeltaHeader, payload: R) -> Result<u64> {
    header.write_to(writer)?;

    let mut payload = CrcReader::new(payload.take(header.payload_len));
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match payload.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io("reading delta payload", e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| Error::io("writing delta payload", e))?;
    }

    if payload.count() != header.payload_len {
        return Err(Error::format(format!(
            "payload is {} bytes, header declares {}",
            payload.count(),
            header.payload_len
        )));
    }

    writer
        .write_all(&payload.crc().to_be_bytes())
        .map_err(|e| Error::io("writing delta trailer", e))?;

    Ok(header.total_len())
}

/// Encode a BD file into memory
pub fn encode_to_bytes(src: &str, dest: &str, md5: FileDigest, payload: &[u8]) -> Result<Vec<u8>> {
    let header = DeltaHeader::new(src, dest, md5, payload.len() as u64)?;
    let mut out = Vec::with_capacity(header.total_len() as usize);
    encode(&mut out, &header, payload)?;
    Ok(out)
}

/// Decode an in-memory BD file, verifying the trailer
pub fn decode_from_bytes(data: &[u8]) -> Result<(DeltaHeader, &[u8])> {
    let mut reader = data;
    let header = DeltaHeader::read_from(&mut reader)?;

    let start = header.encoded_len() as usize;
    let available = (data.len() - start) as u64;
    if available < header.payload_len {
        return Err(Error::format("truncated delta payload"));
    }
    let end = start + header.payload_len as usize;
    let payload = &data[start..end];

    let mut trailer = &data[end..];
    check_trailer(&mut trailer, crc32fast::hash(payload) as u64)?;
    if !trailer.is_empty() {
        return Err(Error::format(format!(
            "{} unexpected bytes after delta trailer",
            trailer.len()
        )));
    }

    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        encode_to_bytes("new.bin", "base.bin", [7u8; 16], b"payload bytes").unwrap()
    }

    #[test]
    fn test_layout() {
        let data = sample();
        assert_eq!(&data[0..4], &BD_MAGIC.to_be_bytes());
        assert_eq!(&data[4..8], &((7u32 << 16) | 8).to_be_bytes());
        assert_eq!(&data[8..23], b"new.binbase.bin");
        assert_eq!(&data[23..39], &[7u8; 16]);
        assert_eq!(&data[39..47], &13u64.to_be_bytes());
        assert_eq!(data[47], 0);
        assert_eq!(&data[48..61], b"payload bytes");
        assert_eq!(
            &data[61..],
            &(crc32fast::hash(b"payload bytes") as u64).to_be_bytes()
        );
    }

    #[test]
    fn test_decode() {
        let data = sample();
        let (header, payload) = decode_from_bytes(&data).unwrap();
        assert_eq!(header.src, "new.bin");
        assert_eq!(header.dest, "base.bin");
        assert_eq!(header.total_len(), data.len() as u64);
        assert_eq!(payload, b"payload bytes");
    }

    #[test]
    fn test_bad_magic() {
        let mut data = sample();
        data[0] ^= 0xff;
        assert!(matches!(decode_from_bytes(&data), Err(Error::Format { .. })));
    }

    #[test]
    fn test_nonzero_extra_byte() {
        let mut data = sample();
        data[47] = 1;
        assert!(matches!(decode_from_bytes(&data), Err(Error::Format { .. })));
    }

    #[test]
    fn test_truncated_header() {
        let data = sample();
        for len in [0, 3, 10, 30, 45] {
            assert!(
                matches!(decode_from_bytes(&data[..len]), Err(Error::Format { .. })),
                "length {}",
                len
            );
        }
    }

    #[test]
    fn test_truncated_payload_and_trailer() {
        let data = sample();
        assert!(matches!(decode_from_bytes(&data[..55]), Err(Error::Format { .. })));
        assert!(matches!(decode_from_bytes(&data[..65]), Err(Error::Format { .. })));
    }

    #[test]
    fn test_corrupt_payload_fails_crc() {
        let mut data = sample();
        data[50] ^= 0x01;
        assert!(matches!(
            decode_from_bytes(&data),
            Err(Error::TrailerChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_key_too_long() {
        let long = "k".repeat(MAX_KEY_LEN + 1);
        let err = DeltaHeader::new(long, "dest", [0; 16], 0).unwrap_err();
        assert!(matches!(err, Error::KeyTooLong { which: "src", .. }));

        let longest = "k".repeat(MAX_KEY_LEN);
        let header = DeltaHeader::new("", longest, [0; 16], 0).unwrap();
        assert_eq!(header.name_len(), 0xffff);
    }

    #[test]
    fn test_short_payload_source_rejected() {
        let header = DeltaHeader::new("a", "b", [0; 16], 10).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            encode(&mut out, &header, &b"short"[..]),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_crc_reader_counts() {
        let mut reader = CrcReader::new(&b"hello"[..]);
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        assert_eq!(reader.count(), 5);
        assert_eq!(reader.crc(), crc32fast::hash(b"hello") as u64);
    }
}
