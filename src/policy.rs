//! Reward policy
//!
//! Pure scoring of a merged pull request from its diff stats. Conversion to
//! lamports is a configuration constant, not part of the policy.

use serde::{Deserialize, Serialize};

/// Flat points for any qualifying merge
pub const BASE_POINTS: u64 = 100;
/// Points per added line, capped
pub const POINTS_PER_ADDITION: u64 = 2;
pub const ADDITION_POINTS_CAP: u64 = 500;
/// Points per changed file, capped
pub const POINTS_PER_FILE: u64 = 10;
pub const FILE_POINTS_CAP: u64 = 200;

/// Eligibility thresholds: a merge must touch at least this many added lines
/// and files to qualify
pub const MIN_ADDITIONS: u64 = 20;
pub const MIN_CHANGED_FILES: u64 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RewardDecision {
    pub qualifies: bool,
    pub points: u64,
    pub meets_additions: bool,
    pub meets_files: bool,
}

/// Score a merged pull request.
///
/// Deterministic over its inputs; points are computed even for
/// non-qualifying merges so callers can log near-misses.
pub fn evaluate(additions: u64, files_changed: u64) -> RewardDecision {
    let meets_additions = additions >= MIN_ADDITIONS;
    let meets_files = files_changed >= MIN_CHANGED_FILES;

    let addition_bonus = (additions * POINTS_PER_ADDITION).min(ADDITION_POINTS_CAP);
    let file_bonus = (files_changed * POINTS_PER_FILE).min(FILE_POINTS_CAP);

    RewardDecision {
        qualifies: meets_additions && meets_files,
        points: BASE_POINTS + addition_bonus + file_bonus,
        meets_additions,
        meets_files,
    }
}

/// Convert points to lamports at the configured rate.
pub fn points_to_lamports(points: u64, lamports_per_point: u64) -> u64 {
    points * lamports_per_point
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligibility_thresholds() {
        assert!(!evaluate(19, 2).qualifies);
        assert!(evaluate(20, 2).qualifies);
        assert!(!evaluate(20, 1).qualifies);
        assert!(!evaluate(0, 0).qualifies);
        assert!(evaluate(1000, 100).qualifies);
    }

    #[test]
    fn test_threshold_flags() {
        let decision = evaluate(25, 1);
        assert!(decision.meets_additions);
        assert!(!decision.meets_files);
        assert!(!decision.qualifies);
    }

    #[test]
    fn test_scoring_formula() {
        // 100 + 50*2 + 5*10
        assert_eq!(evaluate(50, 5).points, 250);
        // both bonuses saturated
        assert_eq!(evaluate(10_000, 10_000).points, 800);
        // zero diff still earns the base
        assert_eq!(evaluate(0, 0).points, 100);
    }

    #[test]
    fn test_points_bounded() {
        for additions in [0u64, 1, 19, 20, 250, 251, 100_000] {
            for files in [0u64, 1, 2, 19, 20, 21, 5_000] {
                let points = evaluate(additions, files).points;
                assert!(points >= BASE_POINTS);
                assert!(points <= BASE_POINTS + ADDITION_POINTS_CAP + FILE_POINTS_CAP);
            }
        }
    }

    #[test]
    fn test_points_monotonic() {
        let samples = [0u64, 1, 5, 20, 100, 250, 300, 1_000];
        for window in samples.windows(2) {
            let (lo, hi) = (window[0], window[1]);
            assert!(evaluate(hi, 10).points >= evaluate(lo, 10).points);
            assert!(evaluate(100, hi).points >= evaluate(100, lo).points);
        }
    }

    #[test]
    fn test_lamports_conversion() {
        // 250 points at the default rate is 0.025 SOL
        assert_eq!(points_to_lamports(250, 100_000), 25_000_000);
        assert_eq!(points_to_lamports(0, 100_000), 0);
    }
}
