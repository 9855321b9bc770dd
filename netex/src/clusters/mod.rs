//! Hierarchical cluster computation.
//!
//! A *local cluster* is a connected component of shapes within a single
//! cell under the active connectivity relation. A *connection* declares
//! that a local cluster is electrically the same as a cluster inside a
//! child-cell instance. Together they form a hierarchical equivalence
//! relation over shapes across the entire cell tree, without flattening
//! the layout.

use std::collections::{BTreeMap, BTreeSet};

use arcstr::ArcStr;
use netgeom::bbox::Bbox;
use netgeom::transform::{Transform, Transformation};
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;

use crate::connectivity::{Connectivity, GlobalNetId};
use crate::layout::{CellKey, LayerId, PolygonRef, ShapeRepository};

mod build;

pub(crate) use build::build_hier_clusters;

/// A dense cluster identifier, unique within its cell. Ids start at 1.
#[derive(
    Debug, Default, Copy, Clone, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct ClusterId(pub u32);

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// A connected component of shapes within a single cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalCluster {
    id: ClusterId,
    shapes: BTreeMap<LayerId, Vec<PolygonRef>>,
    bbox: Bbox,
    globals: BTreeSet<GlobalNetId>,
    labels: Vec<ArcStr>,
}

impl LocalCluster {
    /// Creates an empty cluster with a yet-unassigned id.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cluster id, unique within its cell.
    #[inline]
    pub fn id(&self) -> ClusterId {
        self.id
    }

    /// The bounding box of the cluster's shapes.
    #[inline]
    pub fn bbox(&self) -> Bbox {
        self.bbox
    }

    /// The cluster's shapes on the given layer.
    pub fn shapes_on(&self, layer: LayerId) -> &[PolygonRef] {
        self.shapes.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates over (layer, shapes) pairs in layer order.
    pub fn shapes(&self) -> impl Iterator<Item = (LayerId, &[PolygonRef])> {
        self.shapes.iter().map(|(&l, v)| (l, v.as_slice()))
    }

    /// The layers the cluster owns shapes on, in layer order.
    pub fn layers(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.shapes.keys().copied()
    }

    /// The global nets the cluster is tied to.
    #[inline]
    pub fn globals(&self) -> &BTreeSet<GlobalNetId> {
        &self.globals
    }

    /// The text labels attached to the cluster.
    #[inline]
    pub fn labels(&self) -> &[ArcStr] {
        &self.labels
    }

    /// Adds a shape to the cluster. `bbox` is the shape's bounding box in
    /// cell coordinates.
    pub fn add_shape(&mut self, layer: LayerId, pr: PolygonRef, bbox: Bbox) {
        self.shapes.entry(layer).or_default().push(pr);
        self.bbox = self.bbox.union(bbox);
    }

    pub(crate) fn add_global(&mut self, global: GlobalNetId) {
        self.globals.insert(global);
    }

    pub(crate) fn add_label(&mut self, label: ArcStr) {
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    /// Tests whether this cluster touches `other` under the connectivity
    /// relation, with `trans` mapping `other` into this cluster's
    /// coordinate space. Touching is inclusive of edge-only contact.
    pub fn interacts(
        &self,
        repo: &ShapeRepository,
        other: &LocalCluster,
        other_repo: &ShapeRepository,
        trans: Transformation,
        conn: &Connectivity,
    ) -> bool {
        if !self.bbox.touches(&other.bbox.transform(trans)) {
            return false;
        }
        for (la, sa) in self.shapes.iter() {
            for (lb, sb) in other.shapes.iter() {
                if !conn.connects(*la, *lb) {
                    continue;
                }
                for pa in sa {
                    let ba = repo.resolve_bbox(pa);
                    let mut shape_a = None;
                    for pb in sb {
                        let bb = other_repo.resolve_bbox(pb).transform(trans);
                        if !ba.touches(&bb) {
                            continue;
                        }
                        let shape_a = shape_a.get_or_insert_with(|| repo.resolve(pa));
                        let shape_b = other_repo.resolve(pb).transform(trans);
                        if shape_a.interacts(&shape_b) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }
}

/// The local clusters of one cell, addressable by dense id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalClusters {
    clusters: Vec<LocalCluster>,
}

impl LocalClusters {
    /// The number of clusters.
    #[inline]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether the cell has no clusters.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Iterates over the clusters in id order.
    pub fn iter(&self) -> impl Iterator<Item = &LocalCluster> {
        self.clusters.iter()
    }

    /// The cluster with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the id is not a cluster of this cell.
    pub fn get(&self, id: ClusterId) -> &LocalCluster {
        &self.clusters[(id.0 - 1) as usize]
    }

    /// The clusters whose bounding box touches `bbox`, in id order.
    pub fn touching<'a>(&'a self, bbox: Bbox) -> impl Iterator<Item = &'a LocalCluster> {
        self.clusters.iter().filter(move |c| c.bbox().touches(&bbox))
    }

    fn insert(&mut self, mut cluster: LocalCluster) -> ClusterId {
        let id = ClusterId(self.clusters.len() as u32 + 1);
        cluster.id = id;
        self.clusters.push(cluster);
        id
    }
}

/// A connection: within a cell, the equivalence of a local cluster with a
/// cluster reached through a child-cell instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterInstance {
    /// The index of the child instance within the parent cell.
    pub inst: usize,
    /// The instantiated child cell.
    pub cell: CellKey,
    /// The instance placement transformation.
    pub trans: Transformation,
    /// The cluster id within the child cell.
    pub cluster: ClusterId,
}

/// A cell's local clusters plus the connections of each cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectedClusters {
    locals: LocalClusters,
    connections: BTreeMap<ClusterId, Vec<ClusterInstance>>,
}

impl ConnectedClusters {
    /// Creates an empty cluster set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The local clusters.
    #[inline]
    pub fn locals(&self) -> &LocalClusters {
        &self.locals
    }

    /// The connections of the given cluster (empty if it has none).
    pub fn connections_for(&self, id: ClusterId) -> &[ClusterInstance] {
        self.connections.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Adds a cluster, assigning the next dense id.
    pub fn insert_cluster(&mut self, cluster: LocalCluster) -> ClusterId {
        self.locals.insert(cluster)
    }

    pub(crate) fn add_connection(&mut self, id: ClusterId, conn: ClusterInstance) {
        self.connections.entry(id).or_default().push(conn);
    }
}

/// The output of hierarchical clustering: per-cell connected clusters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierClusters {
    per_cell: SecondaryMap<CellKey, ConnectedClusters>,
}

impl HierClusters {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The connected clusters of the given cell.
    pub fn clusters_per_cell(&self, cell: CellKey) -> Option<&ConnectedClusters> {
        self.per_cell.get(cell)
    }

    /// Whether the cell has a registered cluster set.
    pub fn contains(&self, cell: CellKey) -> bool {
        self.per_cell.contains_key(cell)
    }

    /// Registers the cluster set of a cell, replacing any previous one.
    ///
    /// Device extractors use this to install the terminal clusters of the
    /// device-abstract cells they synthesize.
    pub fn insert(&mut self, cell: CellKey, clusters: ConnectedClusters) {
        self.per_cell.insert(cell, clusters);
    }
}
