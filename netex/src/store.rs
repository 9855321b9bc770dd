//! The deep-layer store: refcounted, per-cell-per-layer storage of
//! polygon sets inside a shared internal layout.
//!
//! Layers pulled from a shape source are copied into the internal layout
//! once, preserving the cell hierarchy; every stored layer is surfaced
//! through a [`DeepLayer`] handle carrying its dense layer id. The
//! underlying storage persists while at least one handle is alive.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use netgeom::{Rect, Shape};

use crate::error::{ErrorSource, Result};
use crate::layout::source::RecursiveShapeIterator;
use crate::layout::{CellKey, LayerId, Layout};

/// The store contents behind the shared handle.
#[derive(Debug)]
pub(crate) struct StoreData {
    pub(crate) layout: Layout,
    refcounts: BTreeMap<LayerId, usize>,
    src_to_internal: HashMap<CellKey, CellKey>,
    threads: usize,
    area_ratio: f64,
    max_vertex_count: usize,
}

impl StoreData {
    fn internal_cell(&mut self, src: &Layout, src_cell: CellKey) -> CellKey {
        if let Some(&cell) = self.src_to_internal.get(&src_cell) {
            return cell;
        }
        let children: Vec<_> = src.cell(src_cell).insts().to_vec();
        let cell = self.layout.add_cell(src.cell(src_cell).name().clone());
        for inst in children {
            let child = self.internal_cell(src, inst.cell);
            self.layout
                .cell_mut(cell)
                .add_instance(crate::layout::Instance::new(child, inst.trans));
        }
        self.src_to_internal.insert(src_cell, cell);
        cell
    }
}

/// A cheaply clonable handle to the deep-layer store.
#[derive(Debug, Clone)]
pub struct DeepStore {
    inner: Arc<RwLock<StoreData>>,
}

impl DeepStore {
    /// Creates a store with an empty internal layout.
    pub fn new(name: impl Into<arcstr::ArcStr>, dbu: f64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreData {
                layout: Layout::new(name, dbu),
                refcounts: BTreeMap::new(),
                src_to_internal: HashMap::new(),
                threads: 1,
                area_ratio: 3.0,
                max_vertex_count: 16,
            })),
        }
    }

    pub(crate) fn data(&self) -> RwLockReadGuard<'_, StoreData> {
        self.inner.read().unwrap()
    }

    pub(crate) fn data_mut(&self) -> RwLockWriteGuard<'_, StoreData> {
        self.inner.write().unwrap()
    }

    /// Read access to the internal layout.
    pub fn with_layout<R>(&self, f: impl FnOnce(&Layout) -> R) -> R {
        f(&self.data().layout)
    }

    /// Write access to the internal layout.
    ///
    /// Reserved for layer creation and device extraction; the layout is
    /// read-only outside those operations.
    pub fn with_layout_mut<R>(&self, f: impl FnOnce(&mut Layout) -> R) -> R {
        f(&mut self.data_mut().layout)
    }

    /// The worker-pool size used for per-cell computations (1 = sequential).
    pub fn threads(&self) -> usize {
        self.data().threads
    }

    /// Sets the worker-pool size used for per-cell computations.
    pub fn set_threads(&self, n: usize) {
        self.data_mut().threads = n.max(1);
    }

    /// The maximum bbox-to-area ratio before polygons are considered complex.
    pub fn area_ratio(&self) -> f64 {
        self.data().area_ratio
    }

    /// Sets the maximum bbox-to-area ratio before polygons are considered complex.
    pub fn set_area_ratio(&self, ar: f64) {
        self.data_mut().area_ratio = ar;
    }

    /// The maximum vertex count of stored polygons.
    pub fn max_vertex_count(&self) -> usize {
        self.data().max_vertex_count
    }

    /// Sets the maximum vertex count of stored polygons.
    pub fn set_max_vertex_count(&self, n: usize) {
        self.data_mut().max_vertex_count = n;
    }

    /// Creates a deep layer from the shapes selected by `iter`.
    ///
    /// The source cell hierarchy is mirrored into the internal layout
    /// (memoized across calls, so repeated layers land in the same
    /// internal cells). Empty iterators are legal and yield blank anchor
    /// layers. Fails if the iterator declares a clip region.
    pub fn create_polygon_layer(&self, iter: &RecursiveShapeIterator) -> Result<DeepLayer> {
        if iter.has_clip() {
            return Err(ErrorSource::ClippedSource.into());
        }

        let mut data = self.data_mut();
        let layer = data.layout.allocate_layer();
        data.refcounts.insert(layer, 0);

        let src = iter.layout();
        let internal_top = data.internal_cell(src, iter.top());
        if data.layout.top_cell().is_none() {
            data.layout.set_top_cell(internal_top);
        }

        if let Some(src_layer) = iter.layer() {
            // Walk the reachable hierarchy and copy the selected shapes.
            let mut stack = vec![iter.top()];
            let mut seen: HashMap<CellKey, ()> = HashMap::new();
            while let Some(src_cell) = stack.pop() {
                if seen.insert(src_cell, ()).is_some() {
                    continue;
                }
                let internal = data.src_to_internal[&src_cell];
                if iter.flags().polygons() {
                    for pr in src.cell(src_cell).shapes_on(src_layer).to_vec() {
                        let shape = src.cell(src_cell).resolve(&pr);
                        data.layout.cell_mut(internal).insert_shape(layer, shape);
                    }
                }
                if iter.flags().texts() {
                    for label in src.cell(src_cell).labels_on(src_layer).to_vec() {
                        // Texts enter the layer as 1-DBU enlarged boxes so
                        // they participate in connectivity like any shape.
                        let cell = data.layout.cell_mut(internal);
                        cell.insert_shape(
                            layer,
                            Shape::Rect(Rect::from_point(label.at).expand(1)),
                        );
                        cell.insert_label(layer, label);
                    }
                }
                for inst in src.cell(src_cell).insts() {
                    stack.push(inst.cell);
                }
            }
        }

        drop(data);
        Ok(DeepLayer::new(self.clone(), layer))
    }
}

/// A refcounted handle to one stored layer of the internal layout.
///
/// Two handles refer to the same layer iff their layer ids are equal.
#[derive(Debug)]
pub struct DeepLayer {
    store: DeepStore,
    layer: LayerId,
}

impl DeepLayer {
    fn new(store: DeepStore, layer: LayerId) -> Self {
        *store.data_mut().refcounts.entry(layer).or_insert(0) += 1;
        Self { store, layer }
    }

    /// The dense layer id within the internal layout.
    #[inline]
    pub fn layer(&self) -> LayerId {
        self.layer
    }

    /// The store holding this layer.
    #[inline]
    pub fn store(&self) -> &DeepStore {
        &self.store
    }
}

impl Clone for DeepLayer {
    fn clone(&self) -> Self {
        Self::new(self.store.clone(), self.layer)
    }
}

impl Drop for DeepLayer {
    fn drop(&mut self) {
        // Never panic in drop; a poisoned store just leaks the layer.
        if let Ok(mut data) = self.store.inner.write() {
            let remove = match data.refcounts.get_mut(&self.layer) {
                Some(count) => {
                    *count -= 1;
                    *count == 0
                }
                None => false,
            };
            if remove {
                data.refcounts.remove(&self.layer);
                let cells: Vec<_> = data.layout.cells().map(|(k, _)| k).collect();
                for cell in cells {
                    data.layout.cell_mut(cell).clear_layer(self.layer);
                }
            }
        }
    }
}

impl PartialEq for DeepLayer {
    fn eq(&self, other: &Self) -> bool {
        self.layer == other.layer && Arc::ptr_eq(&self.store.inner, &other.store.inner)
    }
}

impl Eq for DeepLayer {}

/// A user-visible polygon layer.
///
/// Regions are either flat shape bags or backed by deep storage; only
/// deep regions can participate in connectivity and extraction.
#[derive(Debug, Clone)]
pub enum Region {
    /// A flat collection of shapes with no hierarchy behind it.
    Flat(Vec<Shape>),
    /// A hierarchical layer backed by the deep store.
    Deep(DeepLayer),
}

impl Region {
    /// Creates an empty flat region.
    pub fn empty() -> Self {
        Self::Flat(Vec::new())
    }

    /// Whether the region is backed by deep storage.
    #[inline]
    pub fn is_deep(&self) -> bool {
        matches!(self, Self::Deep(_))
    }

    /// The deep-layer handle, if hierarchical.
    pub fn deep(&self) -> Option<&DeepLayer> {
        match self {
            Self::Deep(dl) => Some(dl),
            Self::Flat(_) => None,
        }
    }

    /// The shapes of a flat region.
    pub fn flat_shapes(&self) -> Option<&[Shape]> {
        match self {
            Self::Flat(shapes) => Some(shapes),
            Self::Deep(_) => None,
        }
    }

    pub(crate) fn push(&mut self, shape: Shape) {
        match self {
            Self::Flat(shapes) => shapes.push(shape),
            Self::Deep(_) => unreachable!("cannot insert shapes into a deep region"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use netgeom::Rect;

    use super::*;
    use crate::layout::source::{RecursiveShapeIterator, ShapeFlags};

    fn source_with_rect() -> (Arc<Layout>, CellKey, LayerId) {
        let mut layout = Layout::new("src", 0.001);
        let top = layout.add_cell("top");
        let layer = layout.allocate_layer();
        layout.insert_rect(top, layer, Rect::from_sides(0, 0, 100, 100));
        (Arc::new(layout), top, layer)
    }

    #[test]
    fn layer_storage_is_refcounted() {
        let (src, top, src_layer) = source_with_rect();
        let store = DeepStore::new("dss", 0.001);
        let iter = RecursiveShapeIterator::new(src, top).with_layer(src_layer);
        let dl = store.create_polygon_layer(&iter).unwrap();
        let layer = dl.layer();
        let internal_top = store.with_layout(|l| l.top_cell().unwrap());

        let second = dl.clone();
        drop(dl);
        assert_eq!(
            store.with_layout(|l| l.cell(internal_top).shapes_on(layer).len()),
            1
        );
        drop(second);
        assert_eq!(
            store.with_layout(|l| l.cell(internal_top).shapes_on(layer).len()),
            0
        );
    }

    #[test]
    fn repeated_layers_share_internal_cells() {
        let (src, top, src_layer) = source_with_rect();
        let store = DeepStore::new("dss", 0.001);
        let a = store
            .create_polygon_layer(&RecursiveShapeIterator::new(src.clone(), top).with_layer(src_layer))
            .unwrap();
        let b = store
            .create_polygon_layer(&RecursiveShapeIterator::new(src, top).with_layer(src_layer))
            .unwrap();
        assert_ne!(a.layer(), b.layer());
        assert_eq!(store.with_layout(|l| l.num_cells()), 1);
    }

    #[test]
    fn clipped_sources_are_rejected() {
        let (src, top, _) = source_with_rect();
        let store = DeepStore::new("dss", 0.001);
        let iter = RecursiveShapeIterator::new(src, top)
            .with_flags(ShapeFlags::Nothing)
            .with_clip(Rect::from_sides(0, 0, 10, 10));
        assert!(matches!(
            store.create_polygon_layer(&iter).unwrap_err().source(),
            ErrorSource::ClippedSource
        ));
    }
}
