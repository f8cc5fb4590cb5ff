// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Quadratic split ("Pick seeds"/"Distribute"): partitions an
//! overflowing node's entries into two halves, reused for both leaf splits
//! and internal-node splits since both only need each entry's MBB and
//! label-count contribution, never its concrete payload type.

use std::collections::HashMap;

use crate::cost::{self, Beta};
use crate::geo::BBox;
use crate::value::LabelId;

/// One entry's shape, as far as quadratic split cares: its bounding box and
/// its per-label unit counts.
#[derive(Debug, Clone)]
pub struct SplitItem {
    /// The entry's bounding box.
    pub mbb: BBox,
    /// Total units this entry contributes (for the textual-cost denominator).
    pub total_count: u64,
    /// Per-label unit counts this entry contributes.
    pub label_counts: HashMap<LabelId, u64>,
}

/// Running state of one side during distribution.
struct Side {
    mbb: BBox,
    total_count: u64,
    label_counts: HashMap<LabelId, u64>,
    indices: Vec<usize>,
}

impl Side {
    fn seed(item: &SplitItem) -> Self {
        Self {
            mbb: item.mbb,
            total_count: item.total_count,
            label_counts: item.label_counts.clone(),
            indices: Vec::new(),
        }
    }

    fn cost_to_add(&self, item: &SplitItem, beta: Beta, nu: f32) -> f32 {
        let spatial = cost::spatial_cost(&self.mbb, &item.mbb, nu);
        let textual = cost::textual_cost_for_value(
            self.total_count,
            self.label_counts.iter().map(|(&l, &c)| (l, c)),
            &item.label_counts.iter().map(|(&l, &c)| (l, c)).collect::<Vec<_>>(),
            item.total_count,
        );
        cost::combine(beta, spatial, textual)
    }

    fn add(&mut self, idx: usize, item: &SplitItem) {
        self.mbb = self.mbb.extend(&item.mbb);
        self.total_count += item.total_count;
        for (&label, &count) in &item.label_counts {
            *self.label_counts.entry(label).or_insert(0) += count;
        }
        self.indices.push(idx);
    }
}

/// Picks the seed pair maximizing the combined (spatial-waste, textual-
/// distance) cost across every unordered pair of items -- the two items a
/// good split should keep furthest apart.
fn pick_seeds(items: &[SplitItem], beta: Beta) -> (usize, usize) {
    let mut wastes = Vec::new();
    let mut pairs = Vec::new();
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            wastes.push(cost::waste(&items[i].mbb, &items[j].mbb));
            pairs.push((i, j));
        }
    }
    let nu = cost::normalizer(&wastes);

    let mut best_pair = pairs[0];
    let mut best_cost = f32::NEG_INFINITY;
    for (&(i, j), &w) in pairs.iter().zip(wastes.iter()) {
        let spatial = nu * w;
        let textual = cost::textual_cost_between_subtrees(
            items[i].total_count,
            &items[i].label_counts,
            items[j].total_count,
            &items[j].label_counts,
        );
        let combined = cost::combine(beta, spatial, textual);
        if combined > best_cost {
            best_cost = combined;
            best_pair = (i, j);
        }
    }
    best_pair
}

/// Partitions `items` (indexed `0..items.len()`) into two sides, each
/// respecting `min_entries <= side.len() <= fanout - min_entries` is not
/// required of either side individually, but the union covers every index
/// exactly once and each side ends up with at least `min_entries` once
/// forced completion kicks in.
///
/// # Panics
/// Asserts `items.len() >= 2` (a split only ever runs on an overflowing
/// node, which always has at least `fanout + 1 >= 2` entries).
#[must_use]
pub fn quadratic_split(
    items: &[SplitItem],
    fanout: usize,
    min_entries: usize,
    beta: Beta,
) -> (Vec<usize>, Vec<usize>) {
    assert!(items.len() >= 2, "quadratic split needs at least two items");

    let (seed_a, seed_b) = pick_seeds(items, beta);
    let mut left = Side::seed(&items[seed_a]);
    let mut right = Side::seed(&items[seed_b]);
    left.indices.push(seed_a);
    right.indices.push(seed_b);

    let mut remaining: Vec<usize> = (0..items.len())
        .filter(|&i| i != seed_a && i != seed_b)
        .collect();

    while !remaining.is_empty() {
        // Forced completion (R-tree quadratic-split QS3): once a side has
        // grown so large that the other side could not reach `min_entries`
        // from what's left, every remaining item goes to whichever side
        // still needs them.
        if left.indices.len() + remaining.len() <= min_entries {
            for idx in remaining.drain(..) {
                let item = &items[idx];
                left.add(idx, item);
            }
            break;
        }
        if right.indices.len() + remaining.len() <= min_entries {
            for idx in remaining.drain(..) {
                let item = &items[idx];
                right.add(idx, item);
            }
            break;
        }
        if left.indices.len() >= items.len().saturating_sub(min_entries).min(fanout) {
            for idx in remaining.drain(..) {
                let item = &items[idx];
                right.add(idx, item);
            }
            break;
        }
        if right.indices.len() >= items.len().saturating_sub(min_entries).min(fanout) {
            for idx in remaining.drain(..) {
                let item = &items[idx];
                left.add(idx, item);
            }
            break;
        }

        let enlargements_left: Vec<f32> = remaining.iter().map(|&i| left.mbb.enlargement(&items[i].mbb)).collect();
        let enlargements_right: Vec<f32> = remaining.iter().map(|&i| right.mbb.enlargement(&items[i].mbb)).collect();
        let nu_left = cost::normalizer(&enlargements_left);
        let nu_right = cost::normalizer(&enlargements_right);

        let mut best_pos = 0;
        let mut best_diff = f32::NEG_INFINITY;
        let mut best_side_is_left = true;
        let mut best_cost_left = 0.0;
        let mut best_cost_right = 0.0;

        for (pos, &idx) in remaining.iter().enumerate() {
            let item = &items[idx];
            let cl = left.cost_to_add(item, beta, nu_left);
            let cr = right.cost_to_add(item, beta, nu_right);
            let diff = (cl - cr).abs();
            if diff > best_diff {
                best_diff = diff;
                best_pos = pos;
                best_side_is_left = cl <= cr;
                best_cost_left = cl;
                best_cost_right = cr;
            }
        }
        let _ = (best_cost_left, best_cost_right);

        let idx = remaining.remove(best_pos);
        let item = &items[idx];
        if best_side_is_left {
            left.add(idx, item);
        } else {
            right.add(idx, item);
        }
    }

    (left.indices, right.indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Point3;

    fn item(x: f32, label: LabelId) -> SplitItem {
        let mut label_counts = HashMap::new();
        label_counts.insert(label, 1);
        SplitItem {
            mbb: BBox::point(Point3::new(x, 0.0, 0.0)),
            total_count: 1,
            label_counts,
        }
    }

    #[test]
    fn splits_spatially_separated_clusters() {
        let items = vec![
            item(0.0, 1),
            item(1.0, 1),
            item(2.0, 1),
            item(100.0, 1),
            item(101.0, 1),
            item(102.0, 1),
        ];
        let (left, right) = quadratic_split(&items, 6, 2, Beta::new(1.0));
        assert_eq!(left.len() + right.len(), items.len());

        let all_low = left.iter().all(|&i| i < 3) || left.iter().all(|&i| i >= 3);
        assert!(all_low, "left side should be a spatially coherent cluster");
    }

    #[test]
    fn respects_min_entries_on_forced_completion() {
        let items: Vec<SplitItem> = (0..5).map(|i| item(i as f32, 1)).collect();
        let (left, right) = quadratic_split(&items, 5, 2, Beta::new(0.5));
        assert!(left.len() >= 2);
        assert!(right.len() >= 2);
        assert_eq!(left.len() + right.len(), 5);
    }

    #[test]
    fn every_index_assigned_exactly_once() {
        let items: Vec<SplitItem> = (0..9).map(|i| item(i as f32, (i % 3) as u32)).collect();
        let (left, right) = quadratic_split(&items, 9, 3, Beta::new(0.5));
        let mut seen = left.clone();
        seen.extend(right.iter().copied());
        seen.sort_unstable();
        assert_eq!(seen, (0..9).collect::<Vec<_>>());
    }
}
