//! Read outcomes and completion delivery types

use std::fmt;

use crate::address::Address;
use crate::status::Status;

/// Where a pending read is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    /// Created, not yet admitted
    Issued,
    /// Waiting for the primary record read
    AwaitingPrimary,
    /// Waiting for the out-of-line key/value payload
    ResolvingObjectPayload,
    /// Moving to the previous record in the chain
    ChainWalk,
    /// Matching record (or error) delivered
    Delivered,
    /// Chain ended without a match
    Exhausted,
}

impl ReadPhase {
    /// Stable name for logs
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReadPhase::Issued => "issued",
            ReadPhase::AwaitingPrimary => "awaiting-primary",
            ReadPhase::ResolvingObjectPayload => "resolving-object-payload",
            ReadPhase::ChainWalk => "chain-walk",
            ReadPhase::Delivered => "delivered",
            ReadPhase::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for ReadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of resolving a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome<V> {
    /// Live record found
    Found {
        /// Decoded value
        value: V,
        /// Address of the matching record
        address: Address,
    },
    /// The newest matching record is a delete marker
    Tombstone {
        /// Address of the tombstone
        address: Address,
    },
    /// No record for the key at or after the begin address
    NotFound,
    /// Resolution failed
    Failed(Status),
}

impl<V> ReadOutcome<V> {
    /// Status code for this outcome
    pub fn status(&self) -> Status {
        match self {
            ReadOutcome::Found { .. } => Status::Ok,
            ReadOutcome::Tombstone { .. } | ReadOutcome::NotFound => Status::NotFound,
            ReadOutcome::Failed(status) => *status,
        }
    }

    /// Whether a live value was found
    pub fn is_found(&self) -> bool {
        matches!(self, ReadOutcome::Found { .. })
    }

    /// The value, if found
    pub fn value(&self) -> Option<&V> {
        match self {
            ReadOutcome::Found { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Consume into the value, if found
    pub fn into_value(self) -> Option<V> {
        match self {
            ReadOutcome::Found { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// A delivered read
#[derive(Debug, Clone)]
pub struct Completion<K, V> {
    /// Caller-chosen id passed to `resolve_with`
    pub ctx_id: u64,
    /// The requested key
    pub key: K,
    /// What was found
    pub outcome: ReadOutcome<V>,
    /// Chain hops taken past the start address
    pub hops: u32,
}

/// Queue receiving completions from `resolve_with`
pub type CompletionSink<K, V> = crossbeam::channel::Sender<Completion<K, V>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_status() {
        let found: ReadOutcome<u64> = ReadOutcome::Found {
            value: 7,
            address: Address::from_control(64),
        };
        assert!(found.is_found());
        assert_eq!(found.status(), Status::Ok);
        assert_eq!(found.value(), Some(&7));

        let tomb: ReadOutcome<u64> = ReadOutcome::Tombstone {
            address: Address::from_control(64),
        };
        assert_eq!(tomb.status(), Status::NotFound);
        assert_eq!(tomb.into_value(), None);
        assert_eq!(
            ReadOutcome::<u64>::Failed(Status::Corruption).status(),
            Status::Corruption
        );
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(ReadPhase::ChainWalk.to_string(), "chain-walk");
        assert_eq!(ReadPhase::Exhausted.as_str(), "exhausted");
    }
}
