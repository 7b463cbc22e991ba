//! Chunk planning for multipart uploads
//!
//! Splits a byte range into contiguous parts no larger than the configured
//! chunk size. A final part shorter than the store's minimum part size is
//! never emitted: the last two parts are re-split, or merged when the tail is
//! too short to halve.

use crate::error::ConfigError;
use crate::types::PartPlan;
use serde::{Deserialize, Serialize};

/// Default maximum part size (4 GiB)
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Smallest non-final part most S3 implementations accept (5 MiB)
pub const DEFAULT_MIN_TRAILING_SIZE: u64 = 5 * 1024 * 1024;

/// Most parts one S3 multipart upload may have
pub const DEFAULT_MAX_PARTS: u32 = 10_000;

fn default_max_parts() -> u32 {
    DEFAULT_MAX_PARTS
}

/// Chunking policy for one store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    /// Maximum part size (bytes)
    pub max_chunk_size: u64,
    /// Minimum size of any part but a lone one (bytes)
    pub min_trailing_size: u64,
    /// Sources at least this large use multipart upload (bytes)
    pub multipart_threshold: u64,
    /// Upper bound on the number of parts in a plan
    #[serde(default = "default_max_parts")]
    pub max_parts: u32,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            min_trailing_size: DEFAULT_MIN_TRAILING_SIZE,
            multipart_threshold: DEFAULT_MAX_CHUNK_SIZE,
            max_parts: DEFAULT_MAX_PARTS,
        }
    }
}

impl ChunkPolicy {
    /// Create a validated policy; the threshold defaults to the chunk size
    pub fn new(max_chunk_size: u64, min_trailing_size: u64) -> Result<Self, ConfigError> {
        let policy = Self {
            max_chunk_size,
            min_trailing_size,
            multipart_threshold: max_chunk_size,
            max_parts: DEFAULT_MAX_PARTS,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Set the multipart threshold
    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.multipart_threshold = threshold;
        self
    }

    pub fn with_max_parts(mut self, max_parts: u32) -> Self {
        self.max_parts = max_parts;
        self
    }

    /// Check the size knobs
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_sizes(self.max_chunk_size, self.min_trailing_size)?;
        if self.multipart_threshold == 0 {
            return Err(ConfigError::ZeroSize("multipart threshold"));
        }
        if self.max_parts == 0 {
            return Err(ConfigError::ZeroSize("max parts"));
        }
        Ok(())
    }

    /// Whether a source of this size goes through a multipart session
    pub fn use_multipart(&self, total_size: u64) -> bool {
        total_size > 0 && total_size >= self.multipart_threshold
    }

    /// Plan the parts for a source of `total_size` bytes
    pub fn plan(&self, total_size: u64) -> Result<Vec<PartPlan>, ConfigError> {
        plan_limited(
            total_size,
            self.max_chunk_size,
            self.min_trailing_size,
            self.max_parts,
        )
    }
}

fn validate_sizes(max_chunk_size: u64, min_trailing_size: u64) -> Result<(), ConfigError> {
    if max_chunk_size == 0 {
        return Err(ConfigError::ZeroSize("max chunk size"));
    }
    if min_trailing_size == 0 {
        return Err(ConfigError::ZeroSize("min trailing size"));
    }
    if max_chunk_size <= min_trailing_size {
        return Err(ConfigError::ChunkSizes {
            max_chunk_size,
            min_trailing_size,
        });
    }
    Ok(())
}

/// Partition `[0, total_size)` into ordered, 1-indexed parts.
///
/// An empty source yields an empty plan; callers upload it with a single PUT.
/// Plans longer than [`DEFAULT_MAX_PARTS`] are rejected.
pub fn plan_parts(
    total_size: u64,
    max_chunk_size: u64,
    min_trailing_size: u64,
) -> Result<Vec<PartPlan>, ConfigError> {
    plan_limited(total_size, max_chunk_size, min_trailing_size, DEFAULT_MAX_PARTS)
}

fn plan_limited(
    total_size: u64,
    max_chunk_size: u64,
    min_trailing_size: u64,
    max_parts: u32,
) -> Result<Vec<PartPlan>, ConfigError> {
    validate_sizes(max_chunk_size, min_trailing_size)?;
    if total_size == 0 {
        return Ok(Vec::new());
    }

    let num_chunks = total_size.div_ceil(max_chunk_size);
    let full = num_chunks - 1;
    let last = total_size - full * max_chunk_size;

    // Lengths of the final one or two parts.
    let resplit = full > 0 && last < min_trailing_size;
    let tail: Vec<u64> = if resplit {
        // Fold the short tail into the previous part and split the sum.
        let merged = max_chunk_size + last;
        let head = merged / 2;
        if head >= min_trailing_size {
            vec![head, merged - head]
        } else {
            vec![merged]
        }
    } else {
        vec![last]
    };
    let body = if resplit { full - 1 } else { full };

    let parts = body + tail.len() as u64;
    if parts > u64::from(max_parts) {
        return Err(ConfigError::TooManyParts { parts, max_parts });
    }

    let mut lengths = vec![max_chunk_size; body as usize];
    lengths.extend(tail);

    let mut offset = 0;
    Ok(lengths
        .into_iter()
        .zip(1u32..)
        .map(|(length, index)| {
            let part = PartPlan {
                index,
                offset,
                length,
            };
            offset += length;
            part
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;

    fn lengths(plan: &[PartPlan]) -> Vec<u64> {
        plan.iter().map(|p| p.length).collect()
    }

    #[test]
    fn test_empty_source_has_no_parts() {
        assert!(plan_parts(0, 4 * GIB, 5 * MIB).unwrap().is_empty());
    }

    #[rstest]
    #[case(1)]
    #[case(5 * MIB)]
    #[case(4 * GIB)]
    fn test_single_part(#[case] total: u64) {
        let plan = plan_parts(total, 4 * GIB, 5 * MIB).unwrap();
        assert_eq!(
            plan,
            vec![PartPlan {
                index: 1,
                offset: 0,
                length: total
            }]
        );
    }

    #[test]
    fn test_large_remainder_is_kept() {
        let plan = plan_parts(5_000_000_000, 4 * GIB, 5 * MIB).unwrap();
        assert_eq!(lengths(&plan), vec![4 * GIB, 705_032_704]);
        assert_eq!(plan[1].offset, 4 * GIB);
    }

    #[test]
    fn test_small_tail_is_resplit() {
        let total = 4 * GIB + 1_000_000;
        let plan = plan_parts(total, 4 * GIB, 5 * MIB).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|p| p.length >= 5 * MIB));
        assert!(plan.iter().all(|p| p.length <= 4 * GIB));
        assert_eq!(plan[0].length + plan[1].length, total);
        assert_eq!(plan[1].offset, plan[0].length);
    }

    #[test]
    fn test_resplit_only_touches_last_two_parts() {
        let plan = plan_parts(30 * MIB + 1, 10 * MIB, 5 * MIB).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(lengths(&plan)[..2], [10 * MIB, 10 * MIB]);
        assert_eq!(plan[2].length + plan[3].length, 10 * MIB + 1);
        assert_eq!(plan[2].length, 5 * MIB);
        assert_eq!(plan[3].length, 5 * MIB + 1);
    }

    #[test]
    fn test_tail_merged_when_halves_too_small() {
        let plan = plan_parts(8 * MIB, 6 * MIB, 5 * MIB).unwrap();
        assert_eq!(lengths(&plan), vec![8 * MIB]);
    }

    #[test]
    fn test_indices_are_one_based_and_sequential() {
        let plan = plan_parts(100 * MIB, 10 * MIB, 5 * MIB).unwrap();
        let indices: Vec<u32> = plan.iter().map(|p| p.index).collect();
        assert_eq!(indices, (1..=10).collect::<Vec<_>>());
    }

    #[rstest]
    #[case(5 * MIB, 5 * MIB)]
    #[case(MIB, 5 * MIB)]
    #[case(0, 5 * MIB)]
    #[case(10 * MIB, 0)]
    fn test_invalid_sizes_rejected(#[case] max: u64, #[case] min: u64) {
        assert!(plan_parts(10, max, min).is_err());
    }

    #[test]
    fn test_part_count_is_capped() {
        // A 4 GiB source in 2-byte parts must fail fast, not allocate.
        let err = plan_parts(4 * GIB, 2, 1).unwrap_err();
        assert_eq!(
            err,
            ConfigError::TooManyParts {
                parts: 2 * GIB,
                max_parts: DEFAULT_MAX_PARTS
            }
        );

        assert_eq!(plan_parts(10_000 * 10, 10, 3).unwrap().len(), 10_000);
        assert!(plan_parts(10_000 * 10 + 5, 10, 3).is_err());

        let policy = ChunkPolicy::new(10, 3).unwrap().with_max_parts(3);
        assert_eq!(policy.plan(30).unwrap().len(), 3);
        assert!(matches!(
            policy.plan(31),
            Err(ConfigError::TooManyParts { parts: 4, max_parts: 3 })
        ));
        // Merging the short tail keeps the plan within the limit.
        let policy = ChunkPolicy::new(10, 6).unwrap().with_max_parts(3);
        assert_eq!(policy.plan(31).unwrap().len(), 3);
        assert!(policy.with_max_parts(0).validate().is_err());
    }

    #[test]
    fn test_policy_threshold() {
        let policy = ChunkPolicy::default();
        assert!(!policy.use_multipart(0));
        assert!(!policy.use_multipart(4 * GIB - 1));
        assert!(policy.use_multipart(4 * GIB));

        let policy = ChunkPolicy::new(10 * MIB, 5 * MIB).unwrap().with_threshold(1);
        assert!(policy.use_multipart(1));
        assert!(ChunkPolicy::new(5 * MIB, 5 * MIB).is_err());
    }
}
