//! Delta operations and match statistics

pub mod compute;

pub use compute::{compute_delta, compute_delta_from_bytes, DeltaMatcher};

use crate::error::Result;
use serde::Serialize;
use std::time::Duration;

/// A single reconstruction step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Reuse `length` bytes of the base file starting at block `block_index`
    Copy { block_index: u64, length: u32 },

    /// Bytes not found in the base file
    Literal { bytes: Vec<u8> },
}

impl Operation {
    /// Get the number of output bytes this operation produces
    pub fn length(&self) -> u64 {
        match self {
            Operation::Copy { length, .. } => *length as u64,
            Operation::Literal { bytes } => bytes.len() as u64,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, Operation::Copy { .. })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Operation::Literal { .. })
    }
}

/// Receiver of the operations produced by the matcher.
///
/// Literal bytes may arrive in several consecutive calls; the sink is
/// responsible for coalescing them into one Literal op.
pub trait OperationSink {
    fn copy(&mut self, block_index: u64, length: u32) -> Result<()>;

    fn literal(&mut self, bytes: &[u8]) -> Result<()>;

    /// Called once after the last operation
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory operation list, coalescing consecutive literal bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationList {
    ops: Vec<Operation>,
}

impl OperationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Total length of the file these operations rebuild
    pub fn target_len(&self) -> u64 {
        self.ops.iter().map(Operation::length).sum()
    }

    /// Concatenation of all literal bytes
    pub fn literal_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for op in &self.ops {
            if let Operation::Literal { bytes } = op {
                out.extend_from_slice(bytes);
            }
        }
        out
    }

    /// Append an operation, merging it into a trailing literal run when possible
    pub fn push(&mut self, op: Operation) {
        match op {
            Operation::Literal { bytes } if bytes.is_empty() => {}
            Operation::Literal { bytes } => {
                if let Some(Operation::Literal { bytes: current }) = self.ops.last_mut() {
                    current.extend_from_slice(&bytes);
                } else {
                    self.ops.push(Operation::Literal { bytes });
                }
            }
            copy => self.ops.push(copy),
        }
    }
}

impl OperationSink for OperationList {
    fn copy(&mut self, block_index: u64, length: u32) -> Result<()> {
        self.push(Operation::Copy {
            block_index,
            length,
        });
        Ok(())
    }

    fn literal(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(Operation::Literal { bytes: current }) = self.ops.last_mut() {
            current.extend_from_slice(bytes);
        } else if !bytes.is_empty() {
            self.ops.push(Operation::Literal {
                bytes: bytes.to_vec(),
            });
        }
        Ok(())
    }
}

impl FromIterator<Operation> for OperationList {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        let mut list = OperationList::new();
        for op in iter {
            list.push(op);
        }
        list
    }
}

/// Outcome of one matcher pass, computed once when the pass ends
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchStats {
    /// Bytes of the new file covered by Copy operations
    pub matched_bytes: u64,

    /// Length of the new file
    pub total_bytes: u64,

    /// Number of Copy operations
    pub copy_ops: u64,

    /// Number of Literal operations after coalescing
    pub literal_ops: u64,

    /// Block size of the signature table used
    pub block_size: usize,

    /// Wall time spent scanning
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl MatchStats {
    /// Bytes that had to be sent as literals
    pub fn literal_bytes(&self) -> u64 {
        self.total_bytes - self.matched_bytes
    }

    /// Fraction of the new file satisfied by Copy operations.
    ///
    /// An empty new file needs nothing from the wire and counts as fully matched.
    pub fn match_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.matched_bytes as f64 / self.total_bytes as f64
        }
    }

    /// Calculate savings percentage
    pub fn savings_percent(&self) -> f64 {
        self.match_ratio() * 100.0
    }

    /// Check if delta transfer sends less than the whole file
    pub fn is_beneficial(&self) -> bool {
        self.literal_bytes() < self.total_bytes
    }

    pub fn operation_count(&self) -> u64 {
        self.copy_ops + self.literal_ops
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(matched: u64, total: u64) -> MatchStats {
        MatchStats {
            matched_bytes: matched,
            total_bytes: total,
            copy_ops: 0,
            literal_ops: 0,
            block_size: 16,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_list_coalesces_literals() {
        let mut list = OperationList::new();
        list.literal(b"abc").unwrap();
        list.literal(b"def").unwrap();
        list.copy(3, 16).unwrap();
        list.literal(b"").unwrap();
        list.literal(b"g").unwrap();

        assert_eq!(
            list.operations(),
            &[
                Operation::Literal {
                    bytes: b"abcdef".to_vec()
                },
                Operation::Copy {
                    block_index: 3,
                    length: 16
                },
                Operation::Literal { bytes: b"g".to_vec() },
            ]
        );
        assert_eq!(list.target_len(), 23);
        assert_eq!(list.literal_bytes(), b"abcdefg");
    }

    #[test]
    fn test_from_iter_coalesces() {
        let list: OperationList = vec![
            Operation::Literal { bytes: vec![1] },
            Operation::Literal { bytes: vec![2] },
        ]
        .into_iter()
        .collect();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_match_ratio() {
        let s = stats(80, 100);
        assert!((s.match_ratio() - 0.8).abs() < 1e-9);
        assert!((s.savings_percent() - 80.0).abs() < 0.1);
        assert_eq!(s.literal_bytes(), 20);
        assert!(s.is_beneficial());
    }

    #[test]
    fn test_all_literal_not_beneficial() {
        let s = stats(0, 100);
        assert_eq!(s.match_ratio(), 0.0);
        assert!(!s.is_beneficial());
    }

    #[test]
    fn test_empty_file_ratio() {
        assert_eq!(stats(0, 0).match_ratio(), 1.0);
    }
}
