//! The hierarchical clusterer.
//!
//! Visits cells bottom-up. Within each cell, a union-find runs over the
//! cell's shapes on connectivity layers plus one pseudo-element per
//! (child instance, child cluster) pair; elements are unioned when the
//! geometry they stand for touches under the connectivity relation.
//! The collapsed components become the cell's local clusters; the
//! pseudo-elements a cluster absorbed become its connections.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;

use arcstr::ArcStr;
use itertools::Itertools;
use netgeom::bbox::Bbox;
use netgeom::transform::{Transform, Transformation};
use netgeom::{Rect, Shape};
use petgraph::unionfind::UnionFind;
use slotmap::SecondaryMap;

use super::{ClusterId, ClusterInstance, ConnectedClusters, HierClusters, LocalCluster};
use crate::connectivity::{Connectivity, GlobalNetId};
use crate::layout::{CellKey, LayerId, Layout};
use crate::log;

/// Computes hier-clusters for every cell of `layout` not already present
/// in `out`. Pre-registered cells (device abstracts) are kept as-is and
/// participate as child candidates.
pub(crate) fn build_hier_clusters(
    layout: &Layout,
    conn: &Connectivity,
    join_nets_by_label: bool,
    out: &mut HierClusters,
) {
    let order = layout.cells_bottom_up();
    log::debug!("clustering {} cells", order.len());

    let mut builder = ClusterBuilder {
        layout,
        conn,
        full_bboxes: SecondaryMap::new(),
    };
    for ck in order {
        if !out.contains(ck) {
            let cc = builder.build_cell(ck, join_nets_by_label, out);
            out.insert(ck, cc);
        }
        builder.record_full_bboxes(out, ck);
    }
}

/// A shape of the current cell on a connectivity layer.
struct ShapeElem {
    layer: LayerId,
    idx: usize,
    bbox: Bbox,
    shape: Shape,
}

/// A pseudo-element standing for a cluster reached through a child instance.
struct InstElem {
    inst: usize,
    cluster: ClusterId,
    /// The child cluster's full extent, in parent coordinates.
    bbox: Bbox,
}

struct ClusterBuilder<'a> {
    layout: &'a Layout,
    conn: &'a Connectivity,
    /// Per cell, per cluster (id order): the cluster's extent including
    /// everything reachable through its connections.
    full_bboxes: SecondaryMap<CellKey, Vec<Bbox>>,
}

impl<'a> ClusterBuilder<'a> {
    fn full_bbox(&self, cell: CellKey, id: ClusterId) -> Bbox {
        self.full_bboxes[cell][(id.0 - 1) as usize]
    }

    /// Caches the full extents of a finished cell's clusters.
    fn record_full_bboxes(&mut self, done: &HierClusters, ck: CellKey) {
        if self.full_bboxes.contains_key(ck) {
            return;
        }
        let cc = done.clusters_per_cell(ck).unwrap();
        let mut extents = Vec::with_capacity(cc.locals().len());
        for cl in cc.locals().iter() {
            let mut bbox = cl.bbox();
            for c in cc.connections_for(cl.id()) {
                bbox = bbox.union(self.full_bbox(c.cell, c.cluster).transform(c.trans));
            }
            extents.push(bbox);
        }
        self.full_bboxes.insert(ck, extents);
    }

    /// Computes the connected clusters of one cell.
    fn build_cell(
        &self,
        ck: CellKey,
        join_nets_by_label: bool,
        done: &HierClusters,
    ) -> ConnectedClusters {
        let cell = self.layout.cell(ck);

        // Shape elements on connectivity layers, grouped per layer.
        let mut shape_elems: Vec<ShapeElem> = Vec::new();
        let mut ranges: BTreeMap<LayerId, Range<usize>> = BTreeMap::new();
        for layer in self.conn.layers() {
            let list = cell.shapes_on(layer);
            if list.is_empty() {
                continue;
            }
            let start = shape_elems.len();
            for (idx, pr) in list.iter().enumerate() {
                shape_elems.push(ShapeElem {
                    layer,
                    idx,
                    bbox: cell.resolve_bbox(pr),
                    shape: cell.resolve(pr),
                });
            }
            ranges.insert(layer, start..shape_elems.len());
        }

        // One pseudo-element per (instance, child cluster).
        let mut inst_elems: Vec<InstElem> = Vec::new();
        for (i, inst) in cell.insts().iter().enumerate() {
            if let Some(cc) = done.clusters_per_cell(inst.cell) {
                for cl in cc.locals().iter() {
                    inst_elems.push(InstElem {
                        inst: i,
                        cluster: cl.id(),
                        bbox: self.full_bbox(inst.cell, cl.id()).transform(inst.trans),
                    });
                }
            }
        }

        let num_shapes = shape_elems.len();
        let total = num_shapes + inst_elems.len();
        let mut result = ConnectedClusters::new();
        if total == 0 {
            return result;
        }

        let mut djs = UnionFind::<usize>::new(total);

        // Shape pairs on connected layers within the cell.
        for (&la, ra) in ranges.iter() {
            for lb in self.conn.connected_layers(la) {
                if lb < la {
                    continue;
                }
                let Some(rb) = ranges.get(&lb) else { continue };
                for ea in ra.clone() {
                    let from = if la == lb { ea + 1 } else { rb.start };
                    for eb in from..rb.end {
                        if shape_elems[ea].bbox.touches(&shape_elems[eb].bbox)
                            && shape_elems[ea].shape.interacts(&shape_elems[eb].shape)
                        {
                            djs.union(ea, eb);
                        }
                    }
                }
            }
        }

        // Pseudo-elements against the cell's own shapes.
        for (k, ie) in inst_elems.iter().enumerate() {
            let inst = &cell.insts()[ie.inst];
            for (&lp, rp) in ranges.iter() {
                for e in rp.clone() {
                    if shape_elems[e].bbox.touches(&ie.bbox)
                        && self.shape_interacts_cluster(
                            done,
                            &shape_elems[e].shape,
                            shape_elems[e].bbox,
                            lp,
                            inst.cell,
                            ie.cluster,
                            inst.trans,
                        )
                    {
                        djs.union(e, num_shapes + k);
                    }
                }
            }
        }

        // Pseudo-elements of different instances against each other.
        for (k1, k2) in (0..inst_elems.len()).tuple_combinations() {
            let (a, b) = (&inst_elems[k1], &inst_elems[k2]);
            if a.inst == b.inst || !a.bbox.touches(&b.bbox) {
                continue;
            }
            let (ia, ib) = (&cell.insts()[a.inst], &cell.insts()[b.inst]);
            if self.clusters_interact(
                done, ia.cell, a.cluster, ia.trans, ib.cell, b.cluster, ib.trans,
            ) {
                djs.union(num_shapes + k1, num_shapes + k2);
            }
        }

        // Collapse into groups, ordered by first-seen root.
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut elem_group: Vec<usize> = Vec::with_capacity(total);
        let mut root_to_group: HashMap<usize, usize> = HashMap::new();
        for e in 0..total {
            let root = djs.find(e);
            let g = *root_to_group.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[g].push(e);
            elem_group.push(g);
        }

        // Group globals: own layers plus absorbed child clusters.
        let mut group_globals: Vec<BTreeSet<GlobalNetId>> = vec![BTreeSet::new(); groups.len()];
        for (g, members) in groups.iter().enumerate() {
            for &e in members {
                if e < num_shapes {
                    group_globals[g].extend(self.conn.global_nets_of(shape_elems[e].layer));
                } else {
                    let ie = &inst_elems[e - num_shapes];
                    let child = cell.insts()[ie.inst].cell;
                    let cl = done.clusters_per_cell(child).unwrap().locals().get(ie.cluster);
                    group_globals[g].extend(cl.globals().iter().copied());
                }
            }
        }

        // Group labels: a label belongs to the group owning its text box.
        let mut group_labels: Vec<Vec<ArcStr>> = vec![Vec::new(); groups.len()];
        for (ll, labels) in cell.labels() {
            let Some(rl) = ranges.get(&ll) else { continue };
            for label in labels {
                let text_box = Shape::Rect(Rect::from_point(label.at).expand(1));
                if let Some(e) = rl.clone().find(|&e| shape_elems[e].shape == text_box) {
                    let bucket = &mut group_labels[elem_group[e]];
                    if !bucket.contains(&label.text) {
                        bucket.push(label.text.clone());
                    }
                }
            }
        }

        // Fold groups sharing a global net (and, if requested, a label).
        let mut fold = UnionFind::<usize>::new(groups.len());
        let mut seen_global: BTreeMap<GlobalNetId, usize> = BTreeMap::new();
        for (g, globals) in group_globals.iter().enumerate() {
            for &gl in globals {
                match seen_global.get(&gl) {
                    Some(&first) => {
                        fold.union(first, g);
                    }
                    None => {
                        seen_global.insert(gl, g);
                    }
                }
            }
        }
        if join_nets_by_label {
            let mut seen_label: BTreeMap<ArcStr, usize> = BTreeMap::new();
            for (g, labels) in group_labels.iter().enumerate() {
                for label in labels {
                    match seen_label.get(label) {
                        Some(&first) => {
                            fold.union(first, g);
                        }
                        None => {
                            seen_label.insert(label.clone(), g);
                        }
                    }
                }
            }
        }

        // Merge folded groups, keeping first-seen order.
        let mut final_members: Vec<Vec<usize>> = Vec::new();
        let mut final_globals: Vec<BTreeSet<GlobalNetId>> = Vec::new();
        let mut final_labels: Vec<Vec<ArcStr>> = Vec::new();
        let mut froot_to_idx: HashMap<usize, usize> = HashMap::new();
        for g in 0..groups.len() {
            let root = fold.find(g);
            let fi = *froot_to_idx.entry(root).or_insert_with(|| {
                final_members.push(Vec::new());
                final_globals.push(BTreeSet::new());
                final_labels.push(Vec::new());
                final_members.len() - 1
            });
            final_members[fi].extend(groups[g].iter().copied());
            final_globals[fi].extend(group_globals[g].iter().copied());
            for label in &group_labels[g] {
                if !final_labels[fi].contains(label) {
                    final_labels[fi].push(label.clone());
                }
            }
        }

        // Emit dense clusters and their connections.
        for (fi, members) in final_members.iter_mut().enumerate() {
            members.sort_unstable();
            let mut cluster = LocalCluster::new();
            for &e in members.iter() {
                if e < num_shapes {
                    let se = &shape_elems[e];
                    cluster.add_shape(se.layer, cell.shapes_on(se.layer)[se.idx], se.bbox);
                }
            }
            for &gl in &final_globals[fi] {
                cluster.add_global(gl);
            }
            for label in &final_labels[fi] {
                cluster.add_label(label.clone());
            }
            let id = result.insert_cluster(cluster);

            // Absorbed pseudo-elements become connections; duplicates
            // (self-loops) are silently dropped.
            let mut seen: BTreeSet<(usize, ClusterId)> = BTreeSet::new();
            for &e in members.iter() {
                if e >= num_shapes {
                    let ie = &inst_elems[e - num_shapes];
                    if seen.insert((ie.inst, ie.cluster)) {
                        let inst = &cell.insts()[ie.inst];
                        result.add_connection(
                            id,
                            ClusterInstance {
                                inst: ie.inst,
                                cell: inst.cell,
                                trans: inst.trans,
                                cluster: ie.cluster,
                            },
                        );
                    }
                }
            }
        }

        result
    }

    /// Tests whether a parent-cell shape on layer `lp` touches anything of
    /// the cluster `(b_cell, b_id)` placed at `tb`, descending through the
    /// cluster's connections.
    #[allow(clippy::too_many_arguments)]
    fn shape_interacts_cluster(
        &self,
        done: &HierClusters,
        shape: &Shape,
        shape_bbox: Bbox,
        lp: LayerId,
        b_cell: CellKey,
        b_id: ClusterId,
        tb: Transformation,
    ) -> bool {
        if !shape_bbox.touches(&self.full_bbox(b_cell, b_id).transform(tb)) {
            return false;
        }
        let cc = done.clusters_per_cell(b_cell).unwrap();
        let cl = cc.locals().get(b_id);
        let repo = self.layout.cell(b_cell).repo();
        for (lc, prs) in cl.shapes() {
            if !self.conn.connects(lc, lp) {
                continue;
            }
            for pr in prs {
                if !shape_bbox.touches(&repo.resolve_bbox(pr).transform(tb)) {
                    continue;
                }
                if shape.interacts(&repo.resolve(pr).transform(tb)) {
                    return true;
                }
            }
        }
        for c in cc.connections_for(b_id) {
            if self.shape_interacts_cluster(
                done,
                shape,
                shape_bbox,
                lp,
                c.cell,
                c.cluster,
                Transformation::cascade(tb, c.trans),
            ) {
                return true;
            }
        }
        false
    }

    /// Tests whether the clusters `(a_cell, a_id)` at `ta` and
    /// `(b_cell, b_id)` at `tb` touch under the connectivity relation,
    /// descending through the connections of both.
    #[allow(clippy::too_many_arguments)]
    fn clusters_interact(
        &self,
        done: &HierClusters,
        a_cell: CellKey,
        a_id: ClusterId,
        ta: Transformation,
        b_cell: CellKey,
        b_id: ClusterId,
        tb: Transformation,
    ) -> bool {
        let ba = self.full_bbox(a_cell, a_id).transform(ta);
        let bb = self.full_bbox(b_cell, b_id).transform(tb);
        if !ba.touches(&bb) {
            return false;
        }

        let ca = done.clusters_per_cell(a_cell).unwrap();
        let cb = done.clusters_per_cell(b_cell).unwrap();
        let a = ca.locals().get(a_id);
        let b = cb.locals().get(b_id);

        // Own shapes against own shapes, in a's coordinate space.
        let rel = Transformation::cascade(ta.inverted(), tb);
        if a.interacts(
            self.layout.cell(a_cell).repo(),
            b,
            self.layout.cell(b_cell).repo(),
            rel,
            self.conn,
        ) {
            return true;
        }

        // Descend into b's connections, then into a's.
        for c in cb.connections_for(b_id) {
            if self.clusters_interact(
                done,
                a_cell,
                a_id,
                ta,
                c.cell,
                c.cluster,
                Transformation::cascade(tb, c.trans),
            ) {
                return true;
            }
        }
        for c in ca.connections_for(a_id) {
            if self.clusters_interact(
                done,
                c.cell,
                c.cluster,
                Transformation::cascade(ta, c.trans),
                b_cell,
                b_id,
                tb,
            ) {
                return true;
            }
        }
        false
    }
}
