use serde::{Deserialize, Serialize};
use std::fmt;

const NODE_BITS: u32 = 16;
const SEQUENCE_MASK: u64 = (1 << (64 - NODE_BITS)) - 1;

/// Globally unique transaction identifier. The originating node's id lives
/// in the top 16 bits and a per-node sequence in the rest, so allocation
/// never needs cluster coordination. Immutable once assigned.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn from_parts(node_id: u16, sequence: u64) -> Self {
        TransactionId(((node_id as u64) << (64 - NODE_BITS)) | (sequence & SEQUENCE_MASK))
    }

    pub fn from_raw(raw: u64) -> Self {
        TransactionId(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Node the transaction was created on.
    pub fn node_id(&self) -> u16 {
        (self.0 >> (64 - NODE_BITS)) as u16
    }

    pub fn sequence(&self) -> u64 {
        self.0 & SEQUENCE_MASK
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_node_and_sequence() {
        let id = TransactionId::from_parts(42, 1234);
        assert_eq!(id.node_id(), 42);
        assert_eq!(id.sequence(), 1234);
    }

    #[test]
    fn ids_from_different_nodes_never_collide() {
        let a = TransactionId::from_parts(1, 7);
        let b = TransactionId::from_parts(2, 7);
        assert_ne!(a, b);
    }

    #[test]
    fn sequence_is_masked_into_range() {
        let id = TransactionId::from_parts(1, u64::MAX);
        assert_eq!(id.node_id(), 1);
    }
}
