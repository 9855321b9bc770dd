//! The extraction façade: the user-facing controller owning the shape
//! source, the named layers, the connectivity declarations, the cluster
//! output and the produced netlist.
//!
//! The façade is a one-way state machine: while *building*, layers are
//! created and connectivity accumulates; `extract_netlist` freezes the
//! state, after which only queries (shape delivery, hierarchy rebuild,
//! probing, mapping) are permitted.

use std::collections::{BTreeMap, BTreeSet};

use arcstr::ArcStr;
use netgeom::bbox::BoundBox;
use netgeom::transform::{Transform, Transformation};
use netgeom::{Point, Rect, Shape};
use slotmap::SecondaryMap;

use crate::build::{
    deliver_shapes_of_net_nonrecursive, deliver_shapes_of_net_recursive, CellMapping, NetBuilder,
    ShapeSink,
};
use crate::clusters::{build_hier_clusters, ClusterId, HierClusters, LocalCluster};
use crate::connectivity::{Connectivity, GlobalNetId};
use crate::error::{with_err_context, ErrorContext, ErrorSource, Result};
use crate::layout::source::{RecursiveShapeIterator, ShapeFlags};
use crate::layout::{CellKey, LayerId, Layout, ShapeRepository};
use crate::log;
use crate::netlist::{NetRef, Netlist};
use crate::store::{DeepLayer, DeepStore, Region};

/// An injected device-recognition capability.
///
/// An extractor synthesizes device-abstract cells inside the store,
/// registers their terminal clusters in the hier-clusters, and appends
/// device abstracts to the netlist. It may be invoked repeatedly, with
/// different layer maps, before net extraction.
pub trait DeviceExtractor {
    fn extract(
        &mut self,
        store: &DeepStore,
        layers: &BTreeMap<ArcStr, Region>,
        netlist: &mut Netlist,
        clusters: &mut HierClusters,
    ) -> Result<()>;
}

/// The layout-to-netlist extraction controller.
#[derive(Debug)]
pub struct LayoutExtractor {
    iter: RecursiveShapeIterator,
    store: DeepStore,
    conn: Connectivity,
    named_regions: BTreeMap<ArcStr, DeepLayer>,
    name_of_layer: BTreeMap<LayerId, ArcStr>,
    /// Keeps every connected layer alive for the façade's lifetime.
    dlrefs: BTreeMap<LayerId, DeepLayer>,
    /// A blank layer holding the internal layout alive before any
    /// user-visible layer exists.
    anchor: Option<DeepLayer>,
    netlist: Option<Netlist>,
    clusters: HierClusters,
    extracted: bool,
}

impl LayoutExtractor {
    /// Creates an extractor over the given shape source.
    ///
    /// The whole layout must be visible: a clipped iterator is rejected.
    pub fn new(iter: RecursiveShapeIterator) -> Result<Self> {
        if iter.has_clip() {
            return Err(ErrorSource::ClippedSource.into());
        }
        let store = DeepStore::new(iter.layout().name().clone(), iter.layout().dbu());
        Ok(Self {
            iter,
            store,
            conn: Connectivity::new(),
            named_regions: BTreeMap::new(),
            name_of_layer: BTreeMap::new(),
            dlrefs: BTreeMap::new(),
            anchor: None,
            netlist: None,
            clusters: HierClusters::new(),
            extracted: false,
        })
    }

    fn ensure_internal_layout(&mut self) -> Result<()> {
        if self.anchor.is_none() {
            // The blank layer acts as a reference holder for the layout.
            let blank = self.iter.clone().with_flags(ShapeFlags::Nothing);
            self.anchor = Some(self.store.create_polygon_layer(&blank)?);
        }
        Ok(())
    }

    fn check_building(&self) -> Result<()> {
        if self.extracted {
            Err(ErrorSource::AlreadyExtracted.into())
        } else {
            Ok(())
        }
    }

    fn check_extracted(&self) -> Result<()> {
        if !self.extracted {
            Err(ErrorSource::NotExtracted.into())
        } else {
            Ok(())
        }
    }

    /// Checks that a region may participate in connectivity: it must be
    /// hierarchical and persisted under a name.
    fn check_connectable(&self, region: &Region) -> Result<DeepLayer> {
        let dl = region.deep().ok_or(ErrorSource::NotHierarchical)?;
        if !self.name_of_layer.contains_key(&dl.layer()) {
            return Err(ErrorSource::NotPersisted.into());
        }
        Ok(dl.clone())
    }

    /// The deep-layer store.
    #[inline]
    pub fn store(&self) -> &DeepStore {
        &self.store
    }

    /// The worker-pool size for per-cell computations (1 = sequential).
    pub fn threads(&self) -> usize {
        self.store.threads()
    }

    /// Sets the worker-pool size for per-cell computations.
    pub fn set_threads(&mut self, n: usize) {
        self.store.set_threads(n);
    }

    /// The polygon complexity ratio threshold of the store.
    pub fn area_ratio(&self) -> f64 {
        self.store.area_ratio()
    }

    /// Sets the polygon complexity ratio threshold of the store.
    pub fn set_area_ratio(&mut self, ar: f64) {
        self.store.set_area_ratio(ar);
    }

    /// The maximum vertex count of stored polygons.
    pub fn max_vertex_count(&self) -> usize {
        self.store.max_vertex_count()
    }

    /// Sets the maximum vertex count of stored polygons.
    pub fn set_max_vertex_count(&mut self, n: usize) {
        self.store.set_max_vertex_count(n);
    }

    /// Creates a blank hierarchical layer, registering it if named.
    pub fn make_layer(&mut self, name: Option<&str>) -> Result<Region> {
        self.ensure_internal_layout()?;
        let si = self.iter.clone().with_flags(ShapeFlags::Nothing);
        let region = Region::Deep(self.store.create_polygon_layer(&si)?);
        if let Some(name) = name {
            self.register_layer(&region, name)?;
        }
        Ok(region)
    }

    /// Creates a hierarchical layer from all shapes of a source layer,
    /// registering it if named.
    pub fn make_layer_from(&mut self, layer: LayerId, name: Option<&str>) -> Result<Region> {
        self.make_layer_with_flags(layer, ShapeFlags::All, name)
    }

    /// Creates a hierarchical layer from the texts of a source layer,
    /// registering it if named.
    pub fn make_text_layer(&mut self, layer: LayerId, name: Option<&str>) -> Result<Region> {
        self.make_layer_with_flags(layer, ShapeFlags::Texts, name)
    }

    /// Creates a hierarchical layer from the polygonal geometry of a
    /// source layer, registering it if named.
    pub fn make_polygon_layer(&mut self, layer: LayerId, name: Option<&str>) -> Result<Region> {
        self.make_layer_with_flags(layer, ShapeFlags::Polygons, name)
    }

    fn make_layer_with_flags(
        &mut self,
        layer: LayerId,
        flags: ShapeFlags,
        name: Option<&str>,
    ) -> Result<Region> {
        self.ensure_internal_layout()?;
        let si = self.iter.clone().with_layer(layer).with_flags(flags);
        let region = Region::Deep(self.store.create_polygon_layer(&si).map_err(|e| {
            e.with_context(ErrorContext::MakeLayer(ArcStr::from(
                name.unwrap_or_default(),
            )))
        })?);
        if let Some(name) = name {
            self.register_layer(&region, name)?;
        }
        Ok(region)
    }

    /// Persists a region under a name.
    ///
    /// Registering a new name for an already-persisted region drops the
    /// old name; a collision with a different region fails.
    pub fn register_layer(&mut self, region: &Region, name: &str) -> Result<()> {
        if self.named_regions.contains_key(name) {
            return Err(ErrorSource::DuplicateLayerName(ArcStr::from(name)).into());
        }
        let dl = region
            .deep()
            .ok_or(ErrorSource::NotHierarchical)
            .map_err(|e| {
                crate::error::ExtractError::new(e)
                    .with_context(ErrorContext::RegisterLayer(ArcStr::from(name)))
            })?;
        if let Some(prev) = self.name_of_layer.get(&dl.layer()).cloned() {
            self.named_regions.remove(&prev);
        }
        self.named_regions.insert(ArcStr::from(name), dl.clone());
        self.name_of_layer.insert(dl.layer(), ArcStr::from(name));
        Ok(())
    }

    /// The name the given region is persisted under, if any.
    pub fn name_of(&self, region: &Region) -> Option<&ArcStr> {
        let dl = region.deep()?;
        self.name_of_layer.get(&dl.layer())
    }

    /// The name of a layer id, if persisted.
    pub fn layer_name(&self, layer: LayerId) -> Option<&ArcStr> {
        self.name_of_layer.get(&layer)
    }

    /// Whether the region is persisted under a name.
    pub fn is_persisted(&self, region: &Region) -> bool {
        region
            .deep()
            .is_some_and(|dl| self.name_of_layer.contains_key(&dl.layer()))
    }

    /// A fresh handle to the layer persisted under `name`.
    pub fn layer_by_name(&self, name: &str) -> Option<Region> {
        self.named_regions
            .get(name)
            .map(|dl| Region::Deep(dl.clone()))
    }

    /// A fresh handle to the persisted layer with the given id.
    pub fn layer_by_index(&self, layer: LayerId) -> Option<Region> {
        let name = self.name_of_layer.get(&layer)?;
        self.layer_by_name(name)
    }

    /// The internal layer id of a region.
    pub fn layer_of(&self, region: &Region) -> Result<LayerId> {
        region
            .deep()
            .map(DeepLayer::layer)
            .ok_or_else(|| ErrorSource::NotHierarchical.into())
    }

    /// Marks a layer as internally connected.
    pub fn connect(&mut self, l: &Region) -> Result<()> {
        self.check_building()
            .map_err(|e| e.with_context(ErrorContext::Connect))?;
        let dl = self
            .check_connectable(l)
            .map_err(|e| e.with_context(ErrorContext::Connect))?;
        self.dlrefs.insert(dl.layer(), dl.clone());
        self.conn.connect(dl.layer());
        Ok(())
    }

    /// Marks two layers as mutually connected.
    pub fn connect_regions(&mut self, a: &Region, b: &Region) -> Result<()> {
        self.check_building()
            .map_err(|e| e.with_context(ErrorContext::Connect))?;
        let dla = self
            .check_connectable(a)
            .map_err(|e| e.with_context(ErrorContext::Connect))?;
        let dlb = self
            .check_connectable(b)
            .map_err(|e| e.with_context(ErrorContext::Connect))?;
        self.dlrefs.insert(dla.layer(), dla.clone());
        self.dlrefs.insert(dlb.layer(), dlb.clone());
        self.conn.connect_layers(dla.layer(), dlb.layer());
        Ok(())
    }

    /// Ties a layer to a named global net, returning the net's dense id.
    pub fn connect_global(&mut self, l: &Region, name: &str) -> Result<GlobalNetId> {
        self.check_building()
            .map_err(|e| e.with_context(ErrorContext::ConnectGlobal(ArcStr::from(name))))?;
        let dl = self
            .check_connectable(l)
            .map_err(|e| e.with_context(ErrorContext::ConnectGlobal(ArcStr::from(name))))?;
        self.dlrefs.insert(dl.layer(), dl.clone());
        Ok(self.conn.connect_global(dl.layer(), name))
    }

    /// The name of a global net.
    pub fn global_net_name(&self, id: GlobalNetId) -> &ArcStr {
        self.conn.global_net_name(id)
    }

    /// The id of a global net by name, allocating one if new.
    pub fn global_net_id(&mut self, name: &str) -> GlobalNetId {
        self.conn.global_net_id(name)
    }

    /// The accumulated connectivity declarations.
    #[inline]
    pub fn connectivity(&self) -> &Connectivity {
        &self.conn
    }

    /// Runs an injected device extractor over the named layers.
    pub fn extract_devices(
        &mut self,
        extractor: &mut dyn DeviceExtractor,
        layers: &BTreeMap<ArcStr, Region>,
    ) -> Result<()> {
        self.check_building()
            .map_err(|e| e.with_context(ErrorContext::ExtractDevices))?;
        self.ensure_internal_layout()?;
        let netlist = self.netlist.get_or_insert_with(Netlist::new);
        with_err_context(
            extractor.extract(&self.store, layers, netlist, &mut self.clusters),
            || ErrorContext::ExtractDevices,
        )
    }

    /// Runs net extraction: computes hier-clusters under the declared
    /// connectivity and assembles the netlist. Freezes the state.
    pub fn extract_netlist(&mut self, join_nets_by_label: bool) -> Result<()> {
        self.check_building()
            .map_err(|e| e.with_context(ErrorContext::ExtractNetlist))?;
        self.ensure_internal_layout()?;
        log::info!("extracting nets (threads = {})", self.threads());
        let netlist = self.netlist.get_or_insert_with(Netlist::new);
        let data = self.store.data();
        build_hier_clusters(&data.layout, &self.conn, join_nets_by_label, &mut self.clusters);
        crate::netlist::extract::extract_nets(&data.layout, &self.conn, &self.clusters, netlist);
        drop(data);
        self.extracted = true;
        Ok(())
    }

    /// The extracted netlist, if any.
    pub fn netlist(&self) -> Option<&Netlist> {
        self.netlist.as_ref()
    }

    /// The netlist, created empty on first use.
    pub fn make_netlist(&mut self) -> &mut Netlist {
        self.netlist.get_or_insert_with(Netlist::new)
    }

    /// The computed hier-clusters.
    #[inline]
    pub fn hier_clusters(&self) -> &HierClusters {
        &self.clusters
    }

    /// Read access to the shared internal layout.
    pub fn internal_layout<R>(&self, f: impl FnOnce(&Layout) -> R) -> R {
        self.store.with_layout(f)
    }

    /// The top cell of the internal layout, once it exists.
    pub fn internal_top_cell(&self) -> Option<CellKey> {
        self.store.with_layout(|l| l.top_cell())
    }

    /// The database unit of the internal layout.
    pub fn dbu(&self) -> f64 {
        self.store.with_layout(|l| l.dbu())
    }

    /// Delivers the shapes of a net on a layer into a fresh flat region.
    pub fn shapes_of_net(&self, net: NetRef, of_layer: &Region, recursive: bool) -> Result<Region> {
        let mut region = Region::empty();
        self.shapes_of_net_into(net, of_layer, recursive, &mut region)?;
        Ok(region)
    }

    /// Delivers the shapes of a net on a layer into a caller sink.
    pub fn shapes_of_net_into(
        &self,
        net: NetRef,
        of_layer: &Region,
        recursive: bool,
        to: &mut dyn ShapeSink,
    ) -> Result<()> {
        self.check_extracted()
            .map_err(|e| e.with_context(ErrorContext::ShapesOfNet))?;
        let lid = self.layer_of(of_layer)?;
        let netlist = self.netlist.as_ref().expect("extracted implies a netlist");
        let circuit = netlist.circuit(net.circuit);
        let cid = circuit.net(net.net).cluster();
        let data = self.store.data();
        if recursive {
            deliver_shapes_of_net_recursive(
                &data.layout,
                &self.clusters,
                circuit.cell(),
                cid,
                lid,
                Transformation::identity(),
                to,
            );
        } else {
            deliver_shapes_of_net_nonrecursive(
                Some(netlist),
                &data.layout,
                &self.clusters,
                circuit.cell(),
                cid,
                lid,
                Transformation::identity(),
                to,
            );
        }
        Ok(())
    }

    /// Rebuilds a single net into a cell of a target layout.
    ///
    /// `lmap` maps internal layer ids (see [`Self::layer_of`]) to target
    /// layer ids.
    pub fn build_net(
        &self,
        net: NetRef,
        target: &mut Layout,
        target_cell: CellKey,
        lmap: &BTreeMap<LayerId, LayerId>,
        circuit_cell_name_prefix: Option<&str>,
        device_cell_name_prefix: Option<&str>,
    ) -> Result<()> {
        self.check_extracted()
            .map_err(|e| e.with_context(ErrorContext::BuildNet))?;
        let netlist = self.netlist.as_ref().expect("extracted implies a netlist");
        let data = self.store.data();
        NetBuilder {
            layout: &data.layout,
            clusters: &self.clusters,
            netlist,
        }
        .build_net(
            net,
            target,
            target_cell,
            lmap,
            circuit_cell_name_prefix,
            device_cell_name_prefix,
        );
        Ok(())
    }

    /// Rebuilds all nets into the target cells given by `cmap`.
    pub fn build_all_nets(
        &self,
        cmap: &CellMapping,
        target: &mut Layout,
        lmap: &BTreeMap<LayerId, LayerId>,
        net_cell_name_prefix: Option<&str>,
        circuit_cell_name_prefix: Option<&str>,
        device_cell_name_prefix: Option<&str>,
    ) -> Result<()> {
        self.check_extracted()
            .map_err(|e| e.with_context(ErrorContext::BuildNet))?;
        let netlist = self.netlist.as_ref().expect("extracted implies a netlist");
        let data = self.store.data();
        NetBuilder {
            layout: &data.layout,
            clusters: &self.clusters,
            netlist,
        }
        .build_all_nets(
            cmap,
            target,
            lmap,
            net_cell_name_prefix,
            circuit_cell_name_prefix,
            device_cell_name_prefix,
        );
        Ok(())
    }

    /// Produces a source-to-target cell mapping, creating missing target
    /// cells. Device-abstract cells are excluded unless requested.
    pub fn cell_mapping_into(
        &self,
        target: &mut Layout,
        target_cell: CellKey,
        with_device_cells: bool,
    ) -> Result<CellMapping> {
        let mut exclude: BTreeSet<CellKey> = BTreeSet::new();
        if !with_device_cells {
            if let Some(netlist) = self.netlist.as_ref() {
                exclude.extend(netlist.device_abstracts().iter().map(|da| da.cell()));
            }
        }
        let data = self.store.data();
        let top = data
            .layout
            .top_cell()
            .ok_or_else(|| ErrorSource::Internal("internal layout has no top cell".into()))?;
        Ok(CellMapping::into_target(
            &data.layout,
            top,
            target,
            target_cell,
            &exclude,
        ))
    }

    /// Produces a source-to-target cell mapping without touching the
    /// target: a single-cell target is identified with the source top,
    /// otherwise cells are matched by geometry.
    pub fn const_cell_mapping_into(
        &self,
        target: &Layout,
        target_cell: CellKey,
    ) -> Result<CellMapping> {
        let data = self.store.data();
        let top = data
            .layout
            .top_cell()
            .ok_or_else(|| ErrorSource::Internal("internal layout has no top cell".into()))?;
        if target.num_cells() == 1 {
            Ok(CellMapping::single(top, target_cell))
        } else {
            Ok(CellMapping::by_geometry(
                &data.layout,
                top,
                target,
                target_cell,
                &BTreeSet::new(),
            ))
        }
    }

    /// Locates the net containing `point` (in µm) on the given layer.
    pub fn probe_net_micron(&self, of_region: &Region, point: (f64, f64)) -> Result<Option<NetRef>> {
        let dbu = self.dbu();
        let point = Point::new(
            (point.0 / dbu).round() as i64,
            (point.1 / dbu).round() as i64,
        );
        self.probe_net(of_region, point)
    }

    /// Locates the net containing `point` (in DBU) on the given layer and
    /// returns it as seen at the most outward circuit where it is still
    /// electrically distinct. An out-of-layout point returns `None`.
    pub fn probe_net(&self, of_region: &Region, point: Point) -> Result<Option<NetRef>> {
        self.check_extracted()
            .map_err(|e| e.with_context(ErrorContext::ProbeNet))?;
        let dl = self
            .check_connectable(of_region)
            .map_err(|e| e.with_context(ErrorContext::ProbeNet))?;
        let layer = dl.layer();
        let netlist = self.netlist.as_ref().expect("extracted implies a netlist");

        // A tiny square around the probe point, in a scratch repository.
        let mut test_repo = ShapeRepository::new();
        let mut test_cluster = LocalCluster::new();
        let shape = Shape::Rect(Rect::from_point(point).expand(1));
        let bbox = shape.bbox();
        let pr = test_repo.insert(shape);
        test_cluster.add_shape(layer, pr, bbox);

        let data = self.store.data();
        let layout = &data.layout;
        let Some(top) = layout.top_cell() else {
            return Ok(None);
        };
        let bboxes = layout.cell_bboxes();

        let mut rev_path: Vec<(CellKey, Transformation)> = Vec::new();
        let Some(cluster_id) = self.search_net(
            layout,
            &bboxes,
            Transformation::identity(),
            top,
            &test_cluster,
            &test_repo,
            &mut rev_path,
        ) else {
            return Ok(None);
        };

        // The search delivers the instance path in reverse order.
        rev_path.reverse();
        let mut cell_indexes: Vec<CellKey> = Vec::with_capacity(rev_path.len() + 1);
        cell_indexes.push(top);
        cell_indexes.extend(rev_path.iter().map(|&(cell, _)| cell));

        // The cluster is owned by the leaf cell; its circuit may have
        // been optimized away.
        let Some(mut circuit_key) = netlist.circuit_by_cell(*cell_indexes.last().unwrap()) else {
            return Ok(None);
        };
        let Some(mut net_key) = netlist.circuit(circuit_key).net_by_cluster(cluster_id) else {
            return Ok(None);
        };

        // Climb as long as the net is visible at the circuit boundary,
        // following the pin into the parent circuit whose subcircuit
        // placement matches the instance path.
        let mut path = rev_path;
        while !path.is_empty() && netlist.circuit(circuit_key).net(net_key).pin_count() > 0 {
            cell_indexes.pop();
            let circuit = netlist.circuit(circuit_key);
            let net = circuit.net(net_key);
            let pin_id = net.pins()[0];
            let (_, last_trans) = *path.last().unwrap();

            let mut upper: Option<(crate::netlist::CircuitKey, crate::netlist::NetKey)> = None;
            for r in circuit.refs() {
                let parent = netlist.circuit(r.circuit);
                let sc = &parent.subcircuits()[r.index];
                if sc.trans().approx_eq(&last_trans)
                    && parent.cell() == *cell_indexes.last().unwrap()
                {
                    if let Some(upper_net) = sc.net_for_pin(pin_id) {
                        upper = Some((r.circuit, upper_net));
                        break;
                    }
                }
            }

            match upper {
                Some((upper_circuit, upper_net)) => {
                    circuit_key = upper_circuit;
                    net_key = upper_net;
                    path.pop();
                }
                None => break,
            }
        }

        Ok(Some(NetRef {
            circuit: circuit_key,
            net: net_key,
        }))
    }

    /// Descends through the cell tree looking for a local cluster that
    /// touches the test cluster, building the instance path in reverse
    /// during unwind.
    #[allow(clippy::too_many_arguments)]
    fn search_net(
        &self,
        layout: &Layout,
        bboxes: &SecondaryMap<CellKey, netgeom::bbox::Bbox>,
        trans: Transformation,
        cell: CellKey,
        test_cluster: &LocalCluster,
        test_repo: &ShapeRepository,
        rev_path: &mut Vec<(CellKey, Transformation)>,
    ) -> Option<ClusterId> {
        let local_box = test_cluster.bbox().transform(trans);

        if let Some(cc) = self.clusters.clusters_per_cell(cell) {
            for lc in cc.locals().touching(local_box) {
                if lc.interacts(
                    layout.cell(cell).repo(),
                    test_cluster,
                    test_repo,
                    trans,
                    &self.conn,
                ) {
                    return Some(lc.id());
                }
            }
        }

        for inst in layout.cell(cell).insts() {
            if !bboxes[inst.cell].transform(inst.trans).touches(&local_box) {
                continue;
            }
            let t = Transformation::cascade(inst.trans.inverted(), trans);
            if let Some(cluster_id) = self.search_net(
                layout,
                bboxes,
                t,
                inst.cell,
                test_cluster,
                test_repo,
                rev_path,
            ) {
                rev_path.push((inst.cell, inst.trans));
                return Some(cluster_id);
            }
        }

        None
    }
}
