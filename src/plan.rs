//! Pass schedule for the hierarchical scan.
//!
//! The schedule is computed up front from the array length and block
//! size so that the hierarchy depth and the pass order can be inspected
//! and tested without a device.  The host then walks it in order,
//! waiting for each pass to retire before issuing the next.
//!
//! For a padded length `n` and block size `b`:
//!
//! * up-sweep passes run at levels `1, b, b², …, b^(J-1)` where `J` is
//!   the number of ceiling divisions by `b` needed to bring `n` down to
//!   a single block total;
//! * merge passes then run at levels `b^(J-2), …, b, 1`.
//!
//! The up-sweep pass at level `L` leaves the last element of every
//! tier-`L·b` window holding the sum of that window.  A merge at level
//! `L` then adds the total of everything before a tier-`L·b` window to
//! the tier-`L` block ends inside it, reading the carry from the end of
//! the preceding window, which the merge one level up (or the topmost
//! up-sweep pass) has already made global.

use crate::padding::padded_extent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    UpSweep,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPass {
    pub phase: Phase,
    pub level: usize,
}

impl ScanPass {
    pub fn up(level: usize) -> Self {
        Self {
            phase: Phase::UpSweep,
            level,
        }
    }

    pub fn merge(level: usize) -> Self {
        Self {
            phase: Phase::Merge,
            level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    len: usize,
    padded_len: usize,
    block: usize,
    passes: Vec<ScanPass>,
}

impl ScanPlan {
    /// Build the schedule for `len` logical elements.  `block` must be at
    /// least 2.  A length of 0 or 1 needs no passes at all.
    pub fn new(len: usize, block: usize) -> Self {
        assert!(block >= 2, "scan block size must be at least 2");
        let padded_len = padded_extent(len, block);
        let mut passes = Vec::new();
        if len > 1 {
            let mut remaining = padded_len;
            let mut level = 1;
            while remaining > 1 {
                passes.push(ScanPass::up(level));
                remaining = remaining.div_ceil(block);
                level *= block;
            }
            // `level` is now b^J; merges start two tiers below it.
            let mut level = level / (block * block);
            while level > 0 {
                passes.push(ScanPass::merge(level));
                level /= block;
            }
        }
        Self {
            len,
            padded_len,
            block,
            passes,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn padded_len(&self) -> usize {
        self.padded_len
    }

    pub fn block(&self) -> usize {
        self.block
    }

    pub fn passes(&self) -> &[ScanPass] {
        &self.passes
    }

    /// Number of tiers in the hierarchy, i.e. up-sweep passes.
    pub fn depth(&self) -> usize {
        self.passes
            .iter()
            .filter(|p| p.phase == Phase::UpSweep)
            .count()
    }

    /// Largest level the schedule touches.  The host checks that
    /// `max_level * block` still fits the device's index type.
    pub fn max_level(&self) -> usize {
        self.passes.iter().map(|p| p.level).max().unwrap_or(1)
    }

    /// Work-groups needed for a pass at `level`: one lane per tier-`level`
    /// block end, `block` lanes per group.
    pub fn groups_for(&self, level: usize) -> usize {
        self.padded_len.div_ceil(level).div_ceil(self.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(plan: &ScanPlan) -> Vec<(Phase, usize)> {
        plan.passes().iter().map(|p| (p.phase, p.level)).collect()
    }

    #[test]
    fn trivial_lengths_need_no_passes() {
        assert!(ScanPlan::new(0, 4).passes().is_empty());
        assert!(ScanPlan::new(1, 4).passes().is_empty());
    }

    #[test]
    fn exactly_one_block_is_a_single_upsweep() {
        let plan = ScanPlan::new(4, 4);
        assert_eq!(levels(&plan), vec![(Phase::UpSweep, 1)]);
        assert_eq!(plan.depth(), 1);
    }

    #[test]
    fn two_blocks_merge_at_the_finest_level() {
        let plan = ScanPlan::new(5, 4);
        assert_eq!(plan.padded_len(), 8);
        assert_eq!(
            levels(&plan),
            vec![(Phase::UpSweep, 1), (Phase::UpSweep, 4), (Phase::Merge, 1)]
        );
    }

    #[test]
    fn three_tiers_merge_every_level_below_the_top() {
        let plan = ScanPlan::new(64, 4);
        assert_eq!(
            levels(&plan),
            vec![
                (Phase::UpSweep, 1),
                (Phase::UpSweep, 4),
                (Phase::UpSweep, 16),
                (Phase::Merge, 4),
                (Phase::Merge, 1),
            ]
        );
        assert_eq!(plan.max_level(), 16);
    }

    #[test]
    fn one_past_a_full_hierarchy_adds_a_tier() {
        let plan = ScanPlan::new(65, 4);
        assert_eq!(plan.padded_len(), 68);
        assert_eq!(plan.depth(), 4);
        let merges: Vec<usize> = plan
            .passes()
            .iter()
            .filter(|p| p.phase == Phase::Merge)
            .map(|p| p.level)
            .collect();
        assert_eq!(merges, vec![16, 4, 1]);
    }

    #[test]
    fn group_counts_shrink_with_level() {
        let plan = ScanPlan::new(1000, 16);
        assert_eq!(plan.padded_len(), 1008);
        assert_eq!(plan.groups_for(1), 63);
        assert_eq!(plan.groups_for(16), 4);
        assert_eq!(plan.groups_for(256), 1);
    }

    proptest::proptest! {
        #[test]
        fn every_upsweep_has_a_matching_merge_below_the_top(len in 2usize..200_000, shift in 1u32..6) {
            let block = 1usize << shift;
            let plan = ScanPlan::new(len, block);
            let depth = plan.depth();
            let merges = plan.passes().len() - depth;
            proptest::prop_assert_eq!(merges, depth - 1);
            proptest::prop_assert!(block.pow(depth as u32) >= plan.padded_len());
        }
    }
}
