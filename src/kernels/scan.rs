//! Lane-level bodies of `block_scan` and `level_merge`.
//!
//! A call runs one work-group.  Lanes advance in lockstep: every loop
//! over `0..block` below is one barrier-delimited phase, and no lane
//! observes a value written by another lane in the same phase.

use super::ScanParams;

/// Element owned by global lane `slot` at `level`, if it exists.
fn block_end(slot: usize, level: usize, len: usize) -> Option<usize> {
    slot.checked_add(1)
        .and_then(|n| n.checked_mul(level))
        .map(|end| end - 1)
        .filter(|&idx| idx < len)
}

/// Hillis–Steele inclusive scan over the `block` strided elements owned
/// by work-group `group`.
pub fn block_scan_group(values: &mut [f32], params: &ScanParams, group: usize, block: usize) {
    let level = params.level as usize;
    let len = params.len as usize;
    let owned: Vec<Option<usize>> = (0..block)
        .map(|lane| block_end(group * block + lane, level, len))
        .collect();

    // Out-of-range lanes hold 0 and never write back.
    let mut stages = [vec![0.0f32; block], vec![0.0f32; block]];
    for (lane, idx) in owned.iter().enumerate() {
        if let Some(idx) = *idx {
            stages[0][lane] = values[idx];
        }
    }

    let mut parity = 0;
    let mut stride = 1;
    while stride < block {
        let (front, back) = stages.split_at_mut(1);
        let (src, dst) = if parity == 0 {
            (&front[0], &mut back[0])
        } else {
            (&back[0], &mut front[0])
        };
        for lane in 0..block {
            let mut sum = src[lane];
            if lane >= stride {
                sum += src[lane - stride];
            }
            dst[lane] = sum;
        }
        parity = 1 - parity;
        stride *= 2;
    }

    for (lane, idx) in owned.iter().enumerate() {
        if let Some(idx) = *idx {
            values[idx] = stages[parity][lane];
        }
    }
}

/// Add the preceding windows' total to every tier-`level` block end of
/// work-group `group` that is not itself the end of a window.
pub fn level_merge_group(values: &mut [f32], params: &ScanParams, group: usize, block: usize) {
    let level = params.level as usize;
    let len = params.len as usize;
    let window_len = level * block;
    for lane in 0..block {
        let Some(idx) = block_end(group * block + lane, level, len) else {
            continue;
        };
        let window = idx / window_len;
        if window == 0 || (idx + 1) % window_len == 0 {
            continue;
        }
        values[idx] += values[window * window_len - 1];
    }
}
