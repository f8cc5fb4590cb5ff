// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The sequenced-query evaluator (C8): multi-root descent
//! pruned by MBBs, label postings, trajectory-id-set intersection and
//! temporal-window trimming, followed by a per-leaf filter and the
//! temporal-ordering check that finally accepts or rejects each
//! surviving trajectory id.

use std::collections::{HashMap, HashSet};

use crate::binary_search::partition_point;
use crate::block_store::BlockHandle;
use crate::config::TreeHeader;
use crate::fs::FileSystem;
use crate::geo::BBox;
use crate::id_set::IdSet;
use crate::insertion::TreeCounters;
use crate::node::NodeStorage;
use crate::value::{LabelId, TrajectoryId, TrajectoryUnit, UnitIndex};

/// One stage of a sequenced query: a rectangle and a (possibly empty, in
/// which case "any label" applies) label set.
#[derive(Debug, Clone)]
pub struct SimpleQuery {
    /// The query rectangle.
    pub rect: BBox,
    /// Labels a matching unit may carry; empty means "any label".
    pub labels: HashSet<LabelId>,
}

impl SimpleQuery {
    /// Builds a simple query over `rect` restricted to `labels` (empty =
    /// any label).
    #[must_use]
    pub fn new(rect: BBox, labels: HashSet<LabelId>) -> Self {
        Self { rect, labels }
    }
}

/// An ordered list of [`SimpleQuery`] stages a trajectory must satisfy in
/// sequence order. Must contain at least one stage.
pub type SequencedQuery = Vec<SimpleQuery>;

/// One trajectory's accepted result: its id plus the `(unit_index, unit)`
/// pairs that satisfied the query, in query order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryMatch {
    /// The trajectory id.
    pub id: TrajectoryId,
    /// Surviving units, concatenated in query-stage order.
    pub units: Vec<(UnitIndex, TrajectoryUnit)>,
}

/// A candidate child (or leaf) surviving a level's inverted-index lookup:
/// its handle, bounding box, and the union of matching id sets.
#[derive(Debug, Clone)]
struct Candidate {
    handle: BlockHandle,
    mbb: BBox,
    ids: IdSet,
}

#[derive(Debug, Clone, Copy)]
struct TimeWindow {
    begin: f32,
    end: f32,
}

impl TimeWindow {
    fn from_candidates(candidates: &[Candidate]) -> Option<Self> {
        candidates.iter().fold(None, |acc, c| {
            let (begin, end) = (c.mbb.min.t, c.mbb.max.t);
            Some(match acc {
                None => Self { begin, end },
                Some(w) => Self {
                    begin: w.begin.min(begin),
                    end: w.end.max(end),
                },
            })
        })
    }

    fn overlaps(&self, min_t: f32, max_t: f32) -> bool {
        self.begin <= max_t && min_t <= self.end
    }

    fn valid(&self) -> bool {
        self.begin <= self.end
    }
}

/// Runs one sequenced query against the tree rooted by `header`.
///
/// Returns an empty list (not an error) if the tree is empty, if any
/// stage's frontier collapses during descent, or if the global
/// trajectory-id-set intersection is empty -- "no results" is a normal
/// outcome here, always represented as `Ok(vec![])` rather than a
/// dedicated error variant.
///
/// # Panics
/// Asserts `query` is non-empty: a `SequencedQuery` needs at least one
/// stage.
pub fn run_query<F: FileSystem>(
    storage: &mut NodeStorage<F>,
    header: &TreeHeader,
    query: &SequencedQuery,
) -> crate::Result<Vec<TrajectoryMatch>> {
    assert!(!query.is_empty(), "a sequenced query needs at least one stage");

    let _scope = crate::io_stats::scope("query");

    let Some(root) = TreeCounters::root(header) else {
        return Ok(Vec::new());
    };
    let height = TreeCounters::height(header);
    let lambda = storage.lambda();

    let mut frontiers: Vec<Vec<BlockHandle>> = vec![vec![root]; query.len()];

    for _level in 0..height.saturating_sub(1) {
        let mut per_query_candidates: Vec<Vec<Candidate>> = Vec::with_capacity(query.len());

        for (q, frontier) in query.iter().zip(frontiers.iter()) {
            let mut candidates = Vec::new();
            for &node_handle in frontier {
                let node = storage.read_internal(node_handle)?;
                let index = storage.read_index(node.index_ref)?;

                if q.labels.is_empty() {
                    for posting in index.total().iter() {
                        let Some(entry) = node.entries.get(posting.child_index as usize) else {
                            continue;
                        };
                        candidates.push(Candidate {
                            handle: entry.child,
                            mbb: entry.mbb,
                            ids: posting.ids.clone(),
                        });
                    }
                } else {
                    let matches = index.matching_children(&q.labels, lambda);
                    for (child_index, ids) in matches {
                        let Some(entry) = node.entries.get(child_index as usize) else {
                            continue;
                        };
                        if !entry.mbb.intersects(&q.rect) {
                            continue;
                        }
                        candidates.push(Candidate {
                            handle: entry.child,
                            mbb: entry.mbb,
                            ids,
                        });
                    }
                }
            }
            per_query_candidates.push(candidates);
        }

        let windows: Vec<Option<TimeWindow>> =
            per_query_candidates.iter().map(|c| TimeWindow::from_candidates(c)).collect();

        let id_unions: Vec<IdSet> = per_query_candidates
            .iter()
            .map(|c| IdSet::union(lambda, c.iter().map(|cand| &cand.ids)))
            .collect();

        let global_shared = IdSet::intersection(lambda, id_unions.iter());
        if global_shared.is_empty() {
            return Ok(Vec::new());
        }

        let mut windows: Vec<TimeWindow> = match windows.into_iter().collect::<Option<Vec<_>>>() {
            Some(w) => w,
            None => return Ok(Vec::new()),
        };
        for i in 0..windows.len().saturating_sub(1) {
            let (left, right) = (windows[i], windows[i + 1]);
            let new_left_end = left.end.min(right.end);
            let new_right_begin = left.begin.max(right.begin);
            windows[i].end = new_left_end;
            windows[i + 1].begin = new_right_begin;
        }
        if windows.iter().any(|w| !w.valid()) {
            return Ok(Vec::new());
        }

        let mut next_frontiers = Vec::with_capacity(query.len());
        for (candidates, window) in per_query_candidates.into_iter().zip(windows.iter()) {
            let next: Vec<BlockHandle> = candidates
                .into_iter()
                .filter(|c| window.overlaps(c.mbb.min.t, c.mbb.max.t))
                .filter(|c| !IdSet::intersection(lambda, [&c.ids, &global_shared]).is_empty())
                .map(|c| c.handle)
                .collect();
            if next.is_empty() {
                return Ok(Vec::new());
            }
            next_frontiers.push(next);
        }
        frontiers = next_frontiers;
    }

    // Leaf phase: filter entries, group by trajectory id, sort by unit_index.
    let mut per_query_groups: Vec<HashMap<TrajectoryId, Vec<(UnitIndex, TrajectoryUnit)>>> =
        Vec::with_capacity(query.len());

    for (q, frontier) in query.iter().zip(frontiers.iter()) {
        let mut groups: HashMap<TrajectoryId, Vec<(UnitIndex, TrajectoryUnit)>> = HashMap::new();
        for &leaf_handle in frontier {
            let leaf = storage.read_leaf(leaf_handle)?;
            for entry in leaf.entries {
                if !entry.unit.intersects(&q.rect) {
                    continue;
                }
                if !q.labels.is_empty() && !q.labels.contains(&entry.unit.label) {
                    continue;
                }
                groups
                    .entry(entry.trajectory_id)
                    .or_default()
                    .push((entry.unit_index, entry.unit));
            }
        }
        for group in groups.values_mut() {
            group.sort_by_key(|(idx, _)| *idx);
        }
        per_query_groups.push(groups);
    }

    let mut shared_ids: Option<HashSet<TrajectoryId>> = None;
    for groups in &per_query_groups {
        let ids: HashSet<TrajectoryId> = groups.keys().copied().collect();
        shared_ids = Some(match shared_ids {
            None => ids,
            Some(acc) => acc.intersection(&ids).copied().collect(),
        });
    }
    let Some(shared_ids) = shared_ids else {
        return Ok(Vec::new());
    };

    let mut results = Vec::new();
    let mut ordered_ids: Vec<TrajectoryId> = shared_ids.into_iter().collect();
    ordered_ids.sort_unstable();

    for id in ordered_ids {
        let groups: Vec<&Vec<(UnitIndex, TrajectoryUnit)>> = per_query_groups
            .iter()
            .map(|g| g.get(&id).expect("id is shared across every query's group"))
            .collect();
        if let Some(units) = check_order(&groups) {
            results.push(TrajectoryMatch { id, units });
        }
    }

    Ok(results)
}

/// The per-trajectory temporal-ordering check: walks adjacent query-stage
/// groups left to right, truncating each group at the first boundary the
/// next stage's matching units reach, so a unit satisfying two adjacent
/// stages counts toward the later one.
fn check_order(groups: &[&Vec<(UnitIndex, TrajectoryUnit)>]) -> Option<Vec<(UnitIndex, TrajectoryUnit)>> {
    let k = groups.len();
    if k == 0 {
        return None;
    }
    if k == 1 {
        return Some(groups[0].clone());
    }

    let mut out = Vec::new();
    let mut cursor = groups[0].first()?.0;

    for i in 0..k - 1 {
        let g_i = groups[i];
        let p = partition_point(g_i, |e| e.0 < cursor);
        if p >= g_i.len() {
            return None;
        }
        let p_unit_index = g_i[p].0;

        let g_next = groups[i + 1];
        let boundary_pos = partition_point(g_next, |e| e.0 < p_unit_index);
        let boundary = if boundary_pos < g_next.len() {
            g_next[boundary_pos].0
        } else {
            u32::MAX
        };

        let end_pos = partition_point(g_i, |e| e.0 < boundary);
        out.extend(g_i[p..end_pos].iter().copied());

        cursor = boundary;
    }

    let g_last = groups[k - 1];
    let p_last = partition_point(g_last, |e| e.0 < cursor);
    out.extend(g_last[p_last..].iter().copied());

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::BlockStore;
    use crate::bulk_load;
    use crate::cost::Beta;
    use crate::fs::StdFileSystem;
    use crate::geo::Point3;
    use crate::insertion::insert_entry;
    use crate::value::{TreeEntry, TrajectoryUnit};

    fn storage(block_size: u64, lambda: usize) -> NodeStorage<StdFileSystem> {
        let dir = Box::leak(Box::new(tempfile::tempdir().unwrap()));
        let store = BlockStore::<StdFileSystem>::create(dir.path(), block_size, 32).unwrap();
        NodeStorage::new(
            store,
            crate::node::fanout_internal(block_size),
            crate::node::fanout_leaf(block_size),
            lambda,
        )
    }

    fn unit(sx: f32, sy: f32, st: f32, ex: f32, ey: f32, et: f32, label: u32) -> TrajectoryUnit {
        TrajectoryUnit::new(Point3::new(sx, sy, st), Point3::new(ex, ey, et), label)
    }

    fn rect(xmin: f32, xmax: f32, ymin: f32, ymax: f32, tmin: f32, tmax: f32) -> BBox {
        BBox::new(Point3::new(xmin, ymin, tmin), Point3::new(xmax, ymax, tmax))
    }

    fn labels(ls: &[u32]) -> HashSet<LabelId> {
        ls.iter().copied().collect()
    }

    #[test]
    fn single_trajectory_single_rectangle() {
        let mut storage = storage(4096, 8);
        let mut header = TreeHeader::fresh(4096, 8, storage.fanout_internal(), storage.fanout_leaf());

        let units = [
            unit(55.0, 33.0, 100.0, 66.0, 44.0, 105.0, 1),
            unit(66.0, 44.0, 106.0, 62.0, 48.0, 115.0, 2),
            unit(62.0, 48.0, 116.0, 62.0, 48.0, 130.0, 1),
            unit(62.0, 48.0, 131.0, 55.0, 33.0, 140.0, 3),
        ];
        for (i, u) in units.iter().enumerate() {
            insert_entry(
                &mut storage,
                &mut header,
                Beta::default(),
                TreeEntry {
                    trajectory_id: 123,
                    unit_index: i as u32,
                    unit: *u,
                },
            )
            .unwrap();
        }

        let q = vec![SimpleQuery::new(rect(0.0, 100.0, 0.0, 100.0, 105.0, 110.0), labels(&[2]))];
        let results = run_query(&mut storage, &header, &q).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 123);
        assert_eq!(results[0].units, vec![(1, units[1])]);
    }

    #[test]
    fn no_temporal_overlap_returns_empty() {
        let mut storage = storage(4096, 8);
        let mut header = TreeHeader::fresh(4096, 8, storage.fanout_internal(), storage.fanout_leaf());

        let units = [
            unit(55.0, 33.0, 100.0, 66.0, 44.0, 105.0, 1),
            unit(66.0, 44.0, 106.0, 62.0, 48.0, 115.0, 2),
            unit(62.0, 48.0, 116.0, 62.0, 48.0, 130.0, 1),
            unit(62.0, 48.0, 131.0, 55.0, 33.0, 140.0, 3),
        ];
        for (i, u) in units.iter().enumerate() {
            insert_entry(
                &mut storage,
                &mut header,
                Beta::default(),
                TreeEntry {
                    trajectory_id: 123,
                    unit_index: i as u32,
                    unit: *u,
                },
            )
            .unwrap();
        }

        let q = vec![SimpleQuery::new(rect(67.0, 68.0, 45.0, 46.0, 0.0, 200.0), labels(&[2]))];
        let results = run_query(&mut storage, &header, &q).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn sequenced_two_stage_query() {
        let mut storage = storage(4096, 8);
        let mut header = TreeHeader::fresh(4096, 8, storage.fanout_internal(), storage.fanout_leaf());

        let u0 = unit(10.0, 10.0, 0.0, 20.0, 20.0, 10.0, 11);
        let u1 = unit(410.0, 410.0, 100.0, 420.0, 420.0, 200.0, 1);
        let u2 = unit(410.0, 410.0, 200.0, 420.0, 420.0, 300.0, 2);
        let u3 = unit(410.0, 410.0, 300.0, 420.0, 420.0, 400.0, 1);

        for (i, u) in [u0, u1, u2, u3].into_iter().enumerate() {
            insert_entry(
                &mut storage,
                &mut header,
                Beta::default(),
                TreeEntry {
                    trajectory_id: 5000,
                    unit_index: i as u32,
                    unit: u,
                },
            )
            .unwrap();
        }

        let area1 = rect(0.0, 50.0, 0.0, 50.0, 0.0, 50.0);
        let area3 = rect(400.0, 500.0, 400.0, 500.0, 100.0, 1100.0);
        let q = vec![
            SimpleQuery::new(area1, labels(&[11, 1, 2, 3, 4, 5])),
            SimpleQuery::new(area3, labels(&[2, 3])),
        ];
        let results = run_query(&mut storage, &header, &q).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 5000);
        assert_eq!(results[0].units, vec![(0, u0), (2, u2)]);
    }

    #[test]
    fn label_only_broad_query_matches_ten_trajectories() {
        let mut storage = storage(4096, 8);
        let mut header = TreeHeader::fresh(4096, 8, storage.fanout_internal(), storage.fanout_leaf());

        for tid in 0..10u32 {
            for idx in 0..25u32 {
                let label = idx % 10;
                let u = unit(
                    10.0 + idx as f32,
                    10.0,
                    idx as f32,
                    11.0 + idx as f32,
                    11.0,
                    idx as f32 + 1.0,
                    label,
                );
                insert_entry(
                    &mut storage,
                    &mut header,
                    Beta::default(),
                    TreeEntry {
                        trajectory_id: tid,
                        unit_index: idx,
                        unit: u,
                    },
                )
                .unwrap();
            }
        }

        let area1 = rect(0.0, 50.0, 0.0, 50.0, 0.0, 50.0);
        let q = vec![SimpleQuery::new(area1, labels(&[0]))];
        let results = run_query(&mut storage, &header, &q).unwrap();
        assert_eq!(results.len(), 10);
        for m in &results {
            let indices: Vec<u32> = m.units.iter().map(|(idx, _)| *idx).collect();
            assert_eq!(indices, vec![100 % 25, 110 % 25, 120 % 25]);
        }
    }

    #[test]
    fn empty_tree_returns_no_results() {
        let mut storage = storage(4096, 8);
        let header = TreeHeader::fresh(4096, 8, storage.fanout_internal(), storage.fanout_leaf());
        let q = vec![SimpleQuery::new(rect(0.0, 1.0, 0.0, 1.0, 0.0, 1.0), HashSet::new())];
        let results = run_query(&mut storage, &header, &q).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn bulk_load_query_results_are_a_superset_of_incremental_insertion() {
        let mut bulk_storage = storage(512, 8);
        let mut bulk_header = TreeHeader::fresh(512, 8, bulk_storage.fanout_internal(), bulk_storage.fanout_leaf());
        let mut inc_storage = storage(512, 8);
        let mut inc_header = TreeHeader::fresh(512, 8, inc_storage.fanout_internal(), inc_storage.fanout_leaf());

        let entries: Vec<TreeEntry> = (0..60u32)
            .map(|i| TreeEntry {
                trajectory_id: i % 7,
                unit_index: i / 7,
                unit: unit(i as f32, i as f32, i as f32, i as f32 + 1.0, i as f32 + 1.0, i as f32 + 1.0, i % 3),
            })
            .collect();

        bulk_load::bulk_load(&mut bulk_storage, &mut bulk_header, Beta::default(), 4, entries.clone()).unwrap();
        for e in entries {
            insert_entry(&mut inc_storage, &mut inc_header, Beta::default(), e).unwrap();
        }

        let q = vec![SimpleQuery::new(rect(0.0, 61.0, 0.0, 61.0, 0.0, 61.0), labels(&[0]))];
        let bulk_results = run_query(&mut bulk_storage, &bulk_header, &q).unwrap();
        let inc_results = run_query(&mut inc_storage, &inc_header, &q).unwrap();

        let bulk_ids: HashSet<_> = bulk_results.iter().map(|m| m.id).collect();
        let inc_ids: HashSet<_> = inc_results.iter().map(|m| m.id).collect();
        assert!(inc_ids.is_subset(&bulk_ids));
    }
}
