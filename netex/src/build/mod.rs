//! Net-shape delivery and hierarchy rebuilding.
//!
//! Two traversals share the cluster graph: *recursive* delivery yields
//! every shape of a net anywhere in the hierarchy, pre-multiplied by the
//! composed transform; *non-recursive* delivery yields the shapes of the
//! net's own cell, flattening only purged subcells (cells that no longer
//! exist in the post-extraction netlist) and skipping preserved ones.

use std::collections::BTreeMap;

use netgeom::transform::{Transform, Transformation};
use netgeom::Shape;

use crate::clusters::{ClusterId, HierClusters};
use crate::layout::{CellKey, Instance, LayerId, Layout, PolygonRef};
use crate::log;
use crate::netlist::{NetRef, Netlist};
use crate::store::Region;

mod mapping;

pub use mapping::CellMapping;

/// A consumer of delivered net shapes. Returning `false` stops delivery.
pub trait ShapeSink {
    fn push(&mut self, shape: Shape) -> bool;
}

impl ShapeSink for Vec<Shape> {
    fn push(&mut self, shape: Shape) -> bool {
        self.push(shape);
        true
    }
}

impl ShapeSink for Region {
    fn push(&mut self, shape: Shape) -> bool {
        Region::push(self, shape);
        true
    }
}

/// Stops at the first delivered shape; used to detect empty nets.
#[derive(Default)]
pub(crate) struct StopOnFirst {
    pub(crate) found: bool,
}

impl ShapeSink for StopOnFirst {
    fn push(&mut self, _shape: Shape) -> bool {
        self.found = true;
        false
    }
}

/// Inserts delivered shapes into a layer of a target cell.
struct CellShapeSink<'a> {
    layout: &'a mut Layout,
    cell: CellKey,
    layer: LayerId,
}

impl ShapeSink for CellShapeSink<'_> {
    fn push(&mut self, shape: Shape) -> bool {
        self.layout.cell_mut(self.cell).insert_shape(self.layer, shape);
        true
    }
}

/// One level of the depth-first cluster-graph traversal.
struct Frame {
    cell: CellKey,
    cluster: ClusterId,
    trans: Transformation,
    shape_pos: usize,
    conn_pos: usize,
}

/// A depth-first iterator over all shapes of a net on one layer,
/// everywhere below the net's cell, carrying the composed transform.
pub struct RecursiveClusterShapeIterator<'a> {
    layout: &'a Layout,
    clusters: &'a HierClusters,
    layer: LayerId,
    stack: Vec<Frame>,
}

impl<'a> RecursiveClusterShapeIterator<'a> {
    /// Creates an iterator rooted at cluster `cluster` of cell `cell`.
    pub fn new(
        layout: &'a Layout,
        clusters: &'a HierClusters,
        layer: LayerId,
        cell: CellKey,
        cluster: ClusterId,
    ) -> Self {
        let mut iter = Self {
            layout,
            clusters,
            layer,
            stack: vec![Frame {
                cell,
                cluster,
                trans: Transformation::identity(),
                shape_pos: 0,
                conn_pos: 0,
            }],
        };
        iter.normalize();
        iter
    }

    fn frame_shapes(&self, frame: &Frame) -> &'a [PolygonRef] {
        match self.clusters.clusters_per_cell(frame.cell) {
            Some(cc) => cc.locals().get(frame.cluster).shapes_on(self.layer),
            None => &[],
        }
    }

    /// Whether the traversal is exhausted.
    pub fn at_end(&self) -> bool {
        self.stack.is_empty()
    }

    /// The cell owning the current shape.
    pub fn cell(&self) -> CellKey {
        self.stack.last().unwrap().cell
    }

    /// The transform from the current cell into the root cell.
    pub fn trans(&self) -> Transformation {
        self.stack.last().unwrap().trans
    }

    /// The current shape reference, valid within the current cell.
    pub fn current(&self) -> PolygonRef {
        let frame = self.stack.last().unwrap();
        self.frame_shapes(frame)[frame.shape_pos]
    }

    /// Advances to the next shape.
    pub fn advance(&mut self) {
        self.stack.last_mut().unwrap().shape_pos += 1;
        self.normalize();
    }

    /// Skips past all remaining entries under the current cell.
    pub fn skip_cell(&mut self) {
        self.stack.pop();
        self.normalize();
    }

    /// Restores the invariant: the top frame points at a deliverable
    /// shape, descending through connections and popping finished frames.
    fn normalize(&mut self) {
        loop {
            let Some(top) = self.stack.last() else { return };
            if top.shape_pos < self.frame_shapes(top).len() {
                return;
            }
            let connections = match self.clusters.clusters_per_cell(top.cell) {
                Some(cc) => cc.connections_for(top.cluster),
                None => &[],
            };
            if top.conn_pos < connections.len() {
                let c = &connections[top.conn_pos];
                let trans = Transformation::cascade(top.trans, c.trans);
                let frame = Frame {
                    cell: c.cell,
                    cluster: c.cluster,
                    trans,
                    shape_pos: 0,
                    conn_pos: 0,
                };
                self.stack.last_mut().unwrap().conn_pos += 1;
                self.stack.push(frame);
            } else {
                self.stack.pop();
            }
        }
    }
}

/// Delivers every shape of the net `(ci, cid)` on `layer`, recursively
/// through the hierarchy, each pre-multiplied by `tr` and the composed
/// instance transform. Returns `false` if the sink stopped delivery.
pub(crate) fn deliver_shapes_of_net_recursive(
    layout: &Layout,
    clusters: &HierClusters,
    ci: CellKey,
    cid: ClusterId,
    layer: LayerId,
    tr: Transformation,
    to: &mut dyn ShapeSink,
) -> bool {
    let mut rci = RecursiveClusterShapeIterator::new(layout, clusters, layer, ci, cid);
    while !rci.at_end() {
        let shape = layout
            .cell(rci.cell())
            .resolve(&rci.current())
            .transform(Transformation::cascade(tr, rci.trans()));
        if !to.push(shape) {
            return false;
        }
        rci.advance();
    }
    true
}

/// Delivers the shapes of the net `(ci, cid)` on `layer` within its own
/// cell, including (!) the flattened shapes of purged subcells, while
/// skipping subtrees owned by preserved circuits or device abstracts.
/// Returns `false` if the sink stopped delivery.
pub(crate) fn deliver_shapes_of_net_nonrecursive(
    netlist: Option<&Netlist>,
    layout: &Layout,
    clusters: &HierClusters,
    ci: CellKey,
    cid: ClusterId,
    layer: LayerId,
    tr: Transformation,
    to: &mut dyn ShapeSink,
) -> bool {
    let mut prev_ci = ci;
    let mut rci = RecursiveClusterShapeIterator::new(layout, clusters, layer, ci, cid);
    while !rci.at_end() {
        let cci = rci.cell();
        let preserved = cci != prev_ci
            && cci != ci
            && netlist.is_some_and(|nl| {
                nl.circuit_by_cell(cci).is_some() || nl.device_abstract_by_cell(cci).is_some()
            });
        if preserved {
            rci.skip_cell();
        } else {
            let shape = layout
                .cell(cci)
                .resolve(&rci.current())
                .transform(Transformation::cascade(tr, rci.trans()));
            if !to.push(shape) {
                return false;
            }
            prev_ci = cci;
            rci.advance();
        }
    }
    true
}

/// Rebuilds net geometry into a target layout, preserving only the cells
/// that touch each net.
pub(crate) struct NetBuilder<'a> {
    pub(crate) layout: &'a Layout,
    pub(crate) clusters: &'a HierClusters,
    pub(crate) netlist: &'a Netlist,
}

impl NetBuilder<'_> {
    /// Rebuilds a single net into `target_cell` of `target`.
    ///
    /// `lmap` maps internal layer ids to target layer ids. With a
    /// `circuit_cell_name_prefix`, subtrees of preserved circuits recurse
    /// into dedicated cells named `prefix + cell_name`; likewise for
    /// devices with `device_cell_name_prefix`.
    pub(crate) fn build_net(
        &self,
        net: NetRef,
        target: &mut Layout,
        target_cell: CellKey,
        lmap: &BTreeMap<LayerId, LayerId>,
        circuit_cell_name_prefix: Option<&str>,
        device_cell_name_prefix: Option<&str>,
    ) {
        let circuit = self.netlist.circuit(net.circuit);
        let cid = circuit.net(net.net).cluster();
        let mag = self.layout.dbu() / target.dbu();
        let mut cmap = BTreeMap::new();
        self.build_net_rec(
            circuit.cell(),
            cid,
            target,
            target_cell,
            lmap,
            Some(net),
            None,
            circuit_cell_name_prefix,
            device_cell_name_prefix,
            &mut cmap,
            Transformation::magnification(mag),
        );
    }

    /// Rebuilds all nets into the target cells given by `cmap`.
    ///
    /// With a `circuit_cell_name_prefix` (recursive mode), nets of child
    /// circuits that carry pins are rendered at the topmost circuit that
    /// owns them; child nets reachable only through dangling subcircuit
    /// pins are rendered in the calling circuit under a
    /// `prefix + subcircuit + ":" + net` cell name.
    pub(crate) fn build_all_nets(
        &self,
        cmap: &CellMapping,
        target: &mut Layout,
        lmap: &BTreeMap<LayerId, LayerId>,
        net_cell_name_prefix: Option<&str>,
        circuit_cell_name_prefix: Option<&str>,
        device_cell_name_prefix: Option<&str>,
    ) {
        let mut cell_map = BTreeMap::new();
        let mag = self.layout.dbu() / target.dbu();

        for (ckey, circuit) in self.netlist.circuits() {
            let Some(target_ci) = cmap.mapping_for(circuit.cell()) else {
                continue;
            };
            let is_top_circuit = circuit.refs().is_empty();

            for (nk, net) in circuit.nets() {
                // Local nets of child circuits render at the topmost
                // circuit owning them in recursive mode.
                if circuit_cell_name_prefix.is_some() && !is_top_circuit && net.pin_count() > 0 {
                    continue;
                }
                self.build_net_rec(
                    circuit.cell(),
                    net.cluster(),
                    target,
                    target_ci,
                    lmap,
                    Some(NetRef {
                        circuit: ckey,
                        net: nk,
                    }),
                    net_cell_name_prefix,
                    circuit_cell_name_prefix,
                    device_cell_name_prefix,
                    &mut cell_map,
                    Transformation::magnification(mag),
                );
            }

            if circuit_cell_name_prefix.is_none() {
                continue;
            }

            // In recursive mode, child nets connected upward are skipped
            // above; a child net whose pin dangles (no parent-side net)
            // would get lost, so it is delivered as part of the calling
            // circuit under a "subcircuit:net" cell name.
            for subcircuit in circuit.subcircuits() {
                let child = self.netlist.circuit(subcircuit.circuit());
                for (pin_id, pin) in child.pins().iter().enumerate() {
                    if subcircuit.net_for_pin(pin_id).is_some() {
                        continue;
                    }
                    let child_net = NetRef {
                        circuit: subcircuit.circuit(),
                        net: pin.net(),
                    };
                    let tr = Transformation::cascade(
                        Transformation::magnification(mag),
                        subcircuit.trans(),
                    );
                    let ncn = net_cell_name_prefix
                        .map(|prefix| format!("{}{}:", prefix, subcircuit.expanded_name()));
                    self.build_net_rec(
                        child.cell(),
                        child.net(pin.net()).cluster(),
                        target,
                        target_ci,
                        lmap,
                        Some(child_net),
                        ncn.as_deref(),
                        circuit_cell_name_prefix,
                        device_cell_name_prefix,
                        &mut cell_map,
                        tr,
                    );
                }
            }
        }
        log::debug!("rebuilt nets into layout {}", target.name());
    }

    #[allow(clippy::too_many_arguments)]
    fn build_net_rec(
        &self,
        ci: CellKey,
        cid: ClusterId,
        target: &mut Layout,
        tc: CellKey,
        lmap: &BTreeMap<LayerId, LayerId>,
        net: Option<NetRef>,
        net_cell_name_prefix: Option<&str>,
        circuit_cell_name_prefix: Option<&str>,
        device_cell_name_prefix: Option<&str>,
        cmap: &mut BTreeMap<(CellKey, ClusterId), Option<CellKey>>,
        tr: Transformation,
    ) {
        let mut target_cell = tc;

        if let Some(prefix) = net_cell_name_prefix {
            let connections = match self.clusters.clusters_per_cell(ci) {
                Some(cc) => cc.connections_for(cid),
                None => &[],
            };
            let any_connections = circuit_cell_name_prefix.is_some() && !connections.is_empty();
            if !any_connections {
                // Shortcut if the net is empty: no net cell is produced.
                let mut consider_cell = false;
                for &source_layer in lmap.keys() {
                    let mut sof = StopOnFirst::default();
                    deliver_shapes_of_net_nonrecursive(
                        Some(self.netlist),
                        self.layout,
                        self.clusters,
                        ci,
                        cid,
                        source_layer,
                        tr,
                        &mut sof,
                    );
                    if sof.found {
                        consider_cell = true;
                        break;
                    }
                }
                if !consider_cell {
                    return;
                }
            }

            // A dedicated cell for the net, instanced once into the caller.
            let name = self.netlist.net(net.expect("net cells need a net")).expanded_name();
            let net_cell = target.add_cell(arcstr::format!("{}{}", prefix, name));
            target
                .cell_mut(tc)
                .add_instance(Instance::new(net_cell, Transformation::identity()));
            target_cell = net_cell;
        }

        for (&source_layer, &target_layer) in lmap.iter() {
            let mut sink = CellShapeSink {
                layout: target,
                cell: target_cell,
                layer: target_layer,
            };
            deliver_shapes_of_net_nonrecursive(
                Some(self.netlist),
                self.layout,
                self.clusters,
                ci,
                cid,
                source_layer,
                tr,
                &mut sink,
            );
        }

        if circuit_cell_name_prefix.is_none() && device_cell_name_prefix.is_none() {
            return;
        }

        // Propagate only the magnification part of `tr` down through the
        // recursion; the rotation/translation part stays in the instance
        // placements so no magnified instances are created.
        let tr_wo_mag = Transformation::cascade(tr, Transformation::magnification(1.0 / tr.mag()));
        let tr_mag = Transformation::magnification(tr.mag());

        let connections = match self.clusters.clusters_per_cell(ci) {
            Some(cc) => cc.connections_for(cid).to_vec(),
            None => Vec::new(),
        };
        for c in &connections {
            let key = (c.cell, c.cluster);
            if !cmap.contains_key(&key) {
                let name_prefix = if self.netlist.device_abstract_by_cell(c.cell).is_some() {
                    device_cell_name_prefix
                } else {
                    circuit_cell_name_prefix
                };
                match name_prefix {
                    Some(prefix) => {
                        let cell_name = self.layout.cell(c.cell).name();
                        let target_ci =
                            target.add_cell(arcstr::format!("{}{}", prefix, cell_name));
                        cmap.insert(key, Some(target_ci));
                        self.build_net_rec(
                            c.cell,
                            c.cluster,
                            target,
                            target_ci,
                            lmap,
                            None,
                            None,
                            circuit_cell_name_prefix,
                            device_cell_name_prefix,
                            cmap,
                            tr_mag,
                        );
                    }
                    None => {
                        cmap.insert(key, None);
                    }
                }
            }

            if let Some(target_ci) = cmap[&key] {
                let placed = Transformation::cascade(tr_wo_mag, c.trans);
                let inst_trans = Transformation::cascade(
                    Transformation::cascade(tr_mag, placed),
                    tr_mag.inverted(),
                );
                target
                    .cell_mut(target_cell)
                    .add_instance(Instance::new(target_ci, inst_trans));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusters::{ConnectedClusters, LocalCluster};
    use netgeom::Rect;

    #[test]
    fn iterator_walks_connections_depth_first() {
        let mut layout = Layout::new("test", 0.001);
        let top = layout.add_cell("top");
        let child = layout.add_cell("child");
        let layer = layout.allocate_layer();
        let top_pr = layout.insert_rect(top, layer, Rect::from_sides(0, 0, 10, 10));
        let child_pr = layout.insert_rect(child, layer, Rect::from_sides(0, 0, 4, 4));
        let inst_trans = Transformation::translate(netgeom::Point::new(10, 0));
        layout
            .cell_mut(top)
            .add_instance(Instance::new(child, inst_trans));

        let mut clusters = HierClusters::new();
        let mut child_cc = ConnectedClusters::new();
        let mut ccl = LocalCluster::new();
        ccl.add_shape(layer, child_pr, layout.cell(child).resolve_bbox(&child_pr));
        let child_id = child_cc.insert_cluster(ccl);
        clusters.insert(child, child_cc);

        let mut top_cc = ConnectedClusters::new();
        let mut tcl = LocalCluster::new();
        tcl.add_shape(layer, top_pr, layout.cell(top).resolve_bbox(&top_pr));
        let top_id = top_cc.insert_cluster(tcl);
        top_cc.add_connection(
            top_id,
            crate::clusters::ClusterInstance {
                inst: 0,
                cell: child,
                trans: inst_trans,
                cluster: child_id,
            },
        );
        clusters.insert(top, top_cc);

        let mut shapes: Vec<Shape> = Vec::new();
        assert!(deliver_shapes_of_net_recursive(
            &layout,
            &clusters,
            top,
            top_id,
            layer,
            Transformation::identity(),
            &mut shapes,
        ));
        assert_eq!(
            shapes,
            vec![
                Shape::Rect(Rect::from_sides(0, 0, 10, 10)),
                Shape::Rect(Rect::from_sides(10, 0, 14, 4)),
            ]
        );
    }
}
