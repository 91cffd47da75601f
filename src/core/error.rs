use crate::core::bucket::BucketKey;
use crate::core::trade::ClearingId;
use thiserror::Error;

/// Errors raised while building a trade set or generating proposals.
///
/// [`CompressionError::MirrorMismatch`], [`CompressionError::DuplicateClearingId`],
/// [`CompressionError::InvalidConfig`] and [`CompressionError::NotionalOverflow`]
/// describe bad input. Every other
/// variant is an internal invariant violation: the run is aborted and no
/// partial output is returned.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("legs of clearing id {clearing_id} do not mirror each other: {reason}")]
    MirrorMismatch {
        clearing_id: ClearingId,
        reason: String,
    },
    #[error("clearing id {0} appears in more than one trade pair")]
    DuplicateClearingId(ClearingId),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("bucket {bucket} needs {amount} settled in one trade, beyond the notional range")]
    NotionalOverflow { bucket: BucketKey, amount: i128 },
    #[error("clearing id {0} is not indexed")]
    UnknownClearingId(ClearingId),
    #[error("proposal {0} does not exist")]
    UnknownProposal(usize),
    #[error("legs of clearing id {clearing_id} diverged: {reason}")]
    AsymmetricPair {
        clearing_id: ClearingId,
        reason: String,
    },
    #[error("bucket {0} is not indexed")]
    UnknownBucket(BucketKey),
    #[error("hub rebalancing ran out of candidates with {remaining} left to allocate")]
    RebalanceExhausted { remaining: u64 },
    #[error("bucket {bucket} holds {actual} after compression, expected {expected}")]
    TargetMismatch {
        bucket: BucketKey,
        expected: i128,
        actual: i128,
    },
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl CompressionError {
    /// True for failures caused by the engine itself rather than its input.
    pub fn is_internal(&self) -> bool {
        !matches!(
            self,
            Self::MirrorMismatch { .. }
                | Self::DuplicateClearingId(_)
                | Self::InvalidConfig(_)
                | Self::NotionalOverflow { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CompressionError>;
