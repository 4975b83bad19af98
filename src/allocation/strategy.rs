//! Space-placement strategies.
//!
//! Every strategy sees candidates whose `free` already has this run's committed
//! bytes subtracted, so "enough space" is simply `free >= size + floor`.

use std::sync::Arc;

use crate::storage::{AllocatorKind, Storage};

#[derive(Debug, Clone)]
pub struct Candidate {
    pub disk: Arc<Storage>,
    pub total: u64,
    /// Probed free space minus bytes committed in this run.
    pub free: u64,
}

impl Candidate {
    pub fn has_room(&self, size: u64, floor: u64) -> bool {
        self.free >= size.saturating_add(floor)
    }
}

pub fn choose(kind: AllocatorKind, candidates: &[Candidate], size: u64, floor: u64) -> Option<&Candidate> {
    match kind {
        AllocatorKind::HighWater => high_water(candidates, size, floor),
        AllocatorKind::MostFree => most_free(candidates, size, floor),
        AllocatorKind::FillUp => fill_up(candidates, size, floor),
    }
}

fn ascending(candidates: &[Candidate]) -> Vec<&Candidate> {
    let mut sorted: Vec<&Candidate> = candidates.iter().collect();
    sorted.sort_by_key(|c| c.free);
    sorted
}

/// Marks start at half the largest disk and halve each pass; the first disk (by
/// ascending free space) that has room and sits at or above the mark wins.
pub fn high_water(candidates: &[Candidate], size: u64, floor: u64) -> Option<&Candidate> {
    let sorted = ascending(candidates);
    let mut mark = candidates.iter().map(|c| c.total).max()? / 2;
    while mark > 0 {
        if let Some(c) = sorted.iter().copied().find(|c| c.has_room(size, floor) && c.free >= mark) {
            return Some(c);
        }
        mark /= 2;
    }
    None
}

pub fn most_free(candidates: &[Candidate], size: u64, floor: u64) -> Option<&Candidate> {
    let mut sorted: Vec<&Candidate> = candidates.iter().collect();
    sorted.sort_by_key(|c| std::cmp::Reverse(c.free));
    sorted.into_iter().find(|c| c.has_room(size, floor))
}

pub fn fill_up(candidates: &[Candidate], size: u64, floor: u64) -> Option<&Candidate> {
    ascending(candidates)
        .into_iter()
        .find(|c| c.free > floor && c.has_room(size, floor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cands(free: &[u64], total: u64) -> Vec<Candidate> {
        free.iter()
            .enumerate()
            .map(|(i, f)| Candidate {
                disk: Arc::new(Storage::disk(format!("disk{}", i + 1), format!("/mnt/disk{}", i + 1))),
                total,
                free: *f,
            })
            .collect()
    }

    fn pick(kind: AllocatorKind, c: &[Candidate], size: u64, floor: u64) -> Option<String> {
        choose(kind, c, size, floor).map(|c| c.disk.name().to_string())
    }

    #[test]
    fn high_water_halves_mark_until_a_disk_qualifies() {
        // Mark 50: nobody has 50 free. Mark 25: the 40 disk is the lowest qualifying.
        let c = cands(&[10, 40, 45], 100);
        assert_eq!(pick(AllocatorKind::HighWater, &c, 1, 0).as_deref(), Some("disk2"));
    }

    #[test]
    fn high_water_prefers_disk_above_first_mark() {
        let c = cands(&[10, 40, 90], 100);
        assert_eq!(pick(AllocatorKind::HighWater, &c, 1, 0).as_deref(), Some("disk3"));
    }

    #[test]
    fn high_water_respects_room_for_size_and_floor() {
        let c = cands(&[10, 40, 45], 100);
        // 45 disk cannot take 40 + floor 6; 40 disk cannot either.
        assert_eq!(pick(AllocatorKind::HighWater, &c, 40, 6), None);
        assert_eq!(pick(AllocatorKind::HighWater, &c, 40, 5).as_deref(), Some("disk3"));
    }

    #[test]
    fn fill_up_skips_disks_at_floor() {
        let c = cands(&[5, 20, 50], 100);
        assert_eq!(pick(AllocatorKind::FillUp, &c, 1, 10).as_deref(), Some("disk2"));
        assert_eq!(pick(AllocatorKind::FillUp, &c, 15, 10).as_deref(), Some("disk3"));
    }

    #[test]
    fn most_free_takes_largest_with_room() {
        let c = cands(&[5, 20, 50], 100);
        assert_eq!(pick(AllocatorKind::MostFree, &c, 1, 0).as_deref(), Some("disk3"));
        assert_eq!(pick(AllocatorKind::MostFree, &c, 60, 0), None);
    }

    #[test]
    fn empty_candidate_set_allocates_nothing() {
        for kind in [AllocatorKind::HighWater, AllocatorKind::MostFree, AllocatorKind::FillUp] {
            assert!(choose(kind, &[], 1, 0).is_none());
        }
    }
}
