//! Source-to-target cell correspondences used by the hierarchy builders.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use netgeom::bbox::Bbox;
use slotmap::SecondaryMap;

use crate::layout::{CellKey, Layout};

/// A mapping from internal (source) cells to cells of a target layout.
#[derive(Debug, Clone, Default)]
pub struct CellMapping {
    map: BTreeMap<CellKey, CellKey>,
}

impl CellMapping {
    /// Whether the given source cell is mapped.
    pub fn has_mapping(&self, cell: CellKey) -> bool {
        self.map.contains_key(&cell)
    }

    /// The target cell the given source cell maps to, if any.
    pub fn mapping_for(&self, cell: CellKey) -> Option<CellKey> {
        self.map.get(&cell).copied()
    }

    /// Iterates over (source, target) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (CellKey, CellKey)> + '_ {
        self.map.iter().map(|(&s, &t)| (s, t))
    }

    /// Identifies the source top cell with the single cell of the target.
    pub(crate) fn single(source_top: CellKey, target_cell: CellKey) -> Self {
        let mut map = BTreeMap::new();
        map.insert(source_top, target_cell);
        Self { map }
    }

    /// Matches source cells against target cells by geometry: the tops are
    /// identified with each other; any other cell maps iff exactly one
    /// target cell shares its signature (bbox dimensions, instance count,
    /// shape count). Ambiguous cells stay unmapped.
    pub(crate) fn by_geometry(
        source: &Layout,
        source_top: CellKey,
        target: &Layout,
        target_cell: CellKey,
        exclude: &BTreeSet<CellKey>,
    ) -> Self {
        let source_boxes = source.cell_bboxes();
        let target_boxes = target.cell_bboxes();

        let mut candidates: HashMap<(i64, i64, usize, usize), Vec<CellKey>> = HashMap::new();
        for (key, _) in target.cells() {
            candidates
                .entry(signature(target, &target_boxes, key))
                .or_default()
                .push(key);
        }

        let mut map = BTreeMap::new();
        map.insert(source_top, target_cell);
        for key in reachable(source, source_top) {
            if key == source_top || exclude.contains(&key) {
                continue;
            }
            let sig = signature(source, &source_boxes, key);
            if let Some([only]) = candidates.get(&sig).map(Vec::as_slice) {
                map.insert(key, *only);
            }
        }
        Self { map }
    }

    /// Maps every source cell into the target, creating missing target
    /// cells: the top maps to `target_cell`; any other cell maps to the
    /// like-named target cell, or to a newly created one.
    pub(crate) fn into_target(
        source: &Layout,
        source_top: CellKey,
        target: &mut Layout,
        target_cell: CellKey,
        exclude: &BTreeSet<CellKey>,
    ) -> Self {
        let mut map = BTreeMap::new();
        map.insert(source_top, target_cell);
        for key in reachable(source, source_top) {
            if key == source_top || exclude.contains(&key) {
                continue;
            }
            let name = source.cell(key).name().clone();
            let tkey = match target.cell_by_name(&name) {
                Some(existing) => existing,
                None => target.add_cell(name),
            };
            map.insert(key, tkey);
        }
        Self { map }
    }
}

/// The geometry signature a cell is matched by.
fn signature(
    layout: &Layout,
    bboxes: &SecondaryMap<CellKey, Bbox>,
    cell: CellKey,
) -> (i64, i64, usize, usize) {
    let bbox = bboxes[cell];
    let (w, h) = if bbox.is_empty() {
        (0, 0)
    } else {
        (bbox.width(), bbox.height())
    };
    let c = layout.cell(cell);
    let shape_count = c.shapes().map(|(_, shapes)| shapes.len()).sum();
    (w, h, c.insts().len(), shape_count)
}

/// The cells reachable from `top`, in deterministic order.
fn reachable(layout: &Layout, top: CellKey) -> Vec<CellKey> {
    let mut order = Vec::new();
    let mut seen: SecondaryMap<CellKey, ()> = SecondaryMap::new();
    let mut stack = vec![top];
    while let Some(key) = stack.pop() {
        if seen.insert(key, ()).is_some() {
            continue;
        }
        order.push(key);
        for inst in layout.cell(key).insts().iter().rev() {
            stack.push(inst.cell);
        }
    }
    order
}
