//! The hierarchical layout database.
//!
//! Holds cells, child-cell instances and per-layer shape collections.
//! Shapes are interned in a per-cell repository and referenced through
//! compact [`PolygonRef`]s; box-backed shapes are recognized and stay
//! boxes throughout.

use std::collections::{BTreeMap, HashMap};

use arcstr::ArcStr;
use netgeom::bbox::{Bbox, BoundBox};
use netgeom::transform::{Transform, Transformation, Translate};
use netgeom::{Point, Rect, Shape};
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SecondaryMap, SlotMap};

pub mod source;

new_key_type! {
    /// A unique identifier for a [`Cell`] within a [`Layout`].
    pub struct CellKey;
    /// A unique identifier for an interned [`Shape`] within a [`ShapeRepository`].
    pub struct ShapeKey;
}

/// A dense identifier for a layer within a [`Layout`].
#[derive(
    Debug, Default, Copy, Clone, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct LayerId(pub u32);

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "layer{}", self.0)
    }
}

/// A reference to an interned shape, displaced to its position in the cell.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Hash, PartialEq, Eq)]
pub struct PolygonRef {
    pub(crate) shape: ShapeKey,
    pub(crate) disp: Point,
}

impl PolygonRef {
    /// The displacement of the referenced shape within its cell.
    #[inline]
    pub fn disp(&self) -> Point {
        self.disp
    }
}

/// A text label attached to a layer of a cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Label {
    pub text: ArcStr,
    pub at: Point,
}

/// A content-deduplicating store of [`Shape`]s.
///
/// Shapes are normalized so their bounding box is anchored at the origin;
/// the anchor returns as the [`PolygonRef`] displacement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShapeRepository {
    slots: SlotMap<ShapeKey, Shape>,
    #[serde(skip)]
    index: HashMap<Shape, ShapeKey>,
}

impl ShapeRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `shape`, returning a reference that resolves back to it.
    pub fn insert(&mut self, shape: Shape) -> PolygonRef {
        let anchor = shape.bbox().p0;
        let mut normalized = shape;
        normalized.translate(-anchor);
        let key = match self.index.get(&normalized) {
            Some(&key) => key,
            None => {
                let key = self.slots.insert(normalized.clone());
                self.index.insert(normalized, key);
                key
            }
        };
        PolygonRef {
            shape: key,
            disp: anchor,
        }
    }

    /// Resolves a reference to the shape it denotes, at its cell position.
    pub fn resolve(&self, pr: &PolygonRef) -> Shape {
        let mut shape = self.slots[pr.shape].clone();
        shape.translate(pr.disp);
        shape
    }

    /// The bounding box of the referenced shape, at its cell position.
    pub fn resolve_bbox(&self, pr: &PolygonRef) -> Bbox {
        let b = self.slots[pr.shape].bbox();
        Bbox::new(b.p0 + pr.disp, b.p1 + pr.disp)
    }
}

/// A placement of a child cell within a parent cell.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    /// The instantiated cell.
    pub cell: CellKey,
    /// The placement transformation.
    pub trans: Transformation,
}

impl Instance {
    /// Creates a new [`Instance`].
    pub fn new(cell: CellKey, trans: Transformation) -> Self {
        Self { cell, trans }
    }
}

/// A cell: a named node of the layout hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    name: ArcStr,
    repo: ShapeRepository,
    shapes: BTreeMap<LayerId, Vec<PolygonRef>>,
    labels: BTreeMap<LayerId, Vec<Label>>,
    insts: Vec<Instance>,
}

impl Cell {
    fn new(name: ArcStr) -> Self {
        Self {
            name,
            repo: ShapeRepository::new(),
            shapes: BTreeMap::new(),
            labels: BTreeMap::new(),
            insts: Vec::new(),
        }
    }

    /// The cell's name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The cell's shape repository.
    #[inline]
    pub fn repo(&self) -> &ShapeRepository {
        &self.repo
    }

    /// The shapes of the cell on the given layer.
    pub fn shapes_on(&self, layer: LayerId) -> &[PolygonRef] {
        self.shapes.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates over (layer, shapes) pairs in layer order.
    pub fn shapes(&self) -> impl Iterator<Item = (LayerId, &[PolygonRef])> {
        self.shapes.iter().map(|(&l, v)| (l, v.as_slice()))
    }

    /// The labels of the cell on the given layer.
    pub fn labels_on(&self, layer: LayerId) -> &[Label] {
        self.labels.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates over (layer, labels) pairs in layer order.
    pub fn labels(&self) -> impl Iterator<Item = (LayerId, &[Label])> {
        self.labels.iter().map(|(&l, v)| (l, v.as_slice()))
    }

    /// Interns `shape` and records it on `layer`.
    pub fn insert_shape(&mut self, layer: LayerId, shape: Shape) -> PolygonRef {
        let pr = self.repo.insert(shape);
        self.shapes.entry(layer).or_default().push(pr);
        pr
    }

    /// Records a text label on `layer`.
    pub fn insert_label(&mut self, layer: LayerId, label: Label) {
        self.labels.entry(layer).or_default().push(label);
    }

    /// Removes all shapes and labels on `layer`.
    pub(crate) fn clear_layer(&mut self, layer: LayerId) {
        self.shapes.remove(&layer);
        self.labels.remove(&layer);
    }

    /// Resolves a shape reference of this cell.
    #[inline]
    pub fn resolve(&self, pr: &PolygonRef) -> Shape {
        self.repo.resolve(pr)
    }

    /// The bounding box of a shape reference of this cell.
    #[inline]
    pub fn resolve_bbox(&self, pr: &PolygonRef) -> Bbox {
        self.repo.resolve_bbox(pr)
    }

    /// The child instances of the cell.
    #[inline]
    pub fn insts(&self) -> &[Instance] {
        &self.insts
    }

    /// Places an instance of a child cell.
    pub fn add_instance(&mut self, inst: Instance) {
        self.insts.push(inst);
    }

    /// The bounding box of the cell's own shapes, ignoring child instances.
    pub fn local_bbox(&self) -> Bbox {
        let mut bbox = Bbox::empty();
        for shapes in self.shapes.values() {
            for pr in shapes {
                bbox = bbox.union(self.repo.resolve_bbox(pr));
            }
        }
        bbox
    }
}

/// A hierarchical layout: a collection of cells with a database unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layout {
    name: ArcStr,
    dbu: f64,
    cells: SlotMap<CellKey, Cell>,
    names: BTreeMap<ArcStr, CellKey>,
    top: Option<CellKey>,
    next_layer: u32,
}

impl Layout {
    /// Creates an empty layout with the given database unit (in µm).
    pub fn new(name: impl Into<ArcStr>, dbu: f64) -> Self {
        Self {
            name: name.into(),
            dbu,
            cells: SlotMap::with_key(),
            names: BTreeMap::new(),
            top: None,
            next_layer: 0,
        }
    }

    /// The layout's name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The database unit, in µm per integer coordinate step.
    #[inline]
    pub fn dbu(&self) -> f64 {
        self.dbu
    }

    /// Allocates a fresh layer id.
    pub fn allocate_layer(&mut self) -> LayerId {
        let id = LayerId(self.next_layer);
        self.next_layer += 1;
        id
    }

    /// Creates a new cell, uniquifying the requested name if it is taken.
    pub fn add_cell(&mut self, name: impl Into<ArcStr>) -> CellKey {
        let base: ArcStr = name.into();
        let mut candidate = base.clone();
        let mut n = 0usize;
        while self.names.contains_key(&candidate) {
            n += 1;
            candidate = arcstr::format!("{}${}", base, n);
        }
        let key = self.cells.insert(Cell::new(candidate.clone()));
        self.names.insert(candidate, key);
        if self.top.is_none() {
            self.top = Some(key);
        }
        key
    }

    /// Gets a reference to the cell with the given key.
    ///
    /// # Panics
    ///
    /// Panics if the key does not name a cell of this layout.
    #[inline]
    pub fn cell(&self, key: CellKey) -> &Cell {
        &self.cells[key]
    }

    /// Gets a mutable reference to the cell with the given key.
    #[inline]
    pub fn cell_mut(&mut self, key: CellKey) -> &mut Cell {
        &mut self.cells[key]
    }

    /// Looks up a cell by name.
    pub fn cell_by_name(&self, name: &str) -> Option<CellKey> {
        self.names.get(name).copied()
    }

    /// The number of cells in the layout.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Iterates over all cells in creation order.
    pub fn cells(&self) -> impl Iterator<Item = (CellKey, &Cell)> {
        self.cells.iter()
    }

    /// The designated top cell.
    #[inline]
    pub fn top_cell(&self) -> Option<CellKey> {
        self.top
    }

    /// Designates the top cell.
    pub fn set_top_cell(&mut self, key: CellKey) {
        self.top = Some(key);
    }

    /// All cells in bottom-up dependency order: every cell appears after
    /// all cells it instantiates. The order is deterministic for a given
    /// creation sequence.
    pub fn cells_bottom_up(&self) -> Vec<CellKey> {
        let mut order = Vec::with_capacity(self.cells.len());
        let mut visited: SecondaryMap<CellKey, ()> = SecondaryMap::new();
        for (key, _) in self.cells.iter() {
            self.post_order(key, &mut visited, &mut order);
        }
        order
    }

    fn post_order(
        &self,
        key: CellKey,
        visited: &mut SecondaryMap<CellKey, ()>,
        order: &mut Vec<CellKey>,
    ) {
        if visited.insert(key, ()).is_some() {
            return;
        }
        for inst in self.cells[key].insts() {
            self.post_order(inst.cell, visited, order);
        }
        order.push(key);
    }

    /// Computes the full (hierarchical) bounding box of every cell.
    pub fn cell_bboxes(&self) -> SecondaryMap<CellKey, Bbox> {
        let mut bboxes: SecondaryMap<CellKey, Bbox> = SecondaryMap::new();
        for key in self.cells_bottom_up() {
            let cell = &self.cells[key];
            let mut bbox = cell.local_bbox();
            for inst in cell.insts() {
                bbox = bbox.union(bboxes[inst.cell].transform(inst.trans));
            }
            bboxes.insert(key, bbox);
        }
        bboxes
    }

    /// Inserts a rectangle in a cell, a convenience for tests and sources.
    pub fn insert_rect(&mut self, cell: CellKey, layer: LayerId, rect: Rect) -> PolygonRef {
        self.cells[cell].insert_shape(layer, Shape::Rect(rect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_interning_deduplicates() {
        let mut repo = ShapeRepository::new();
        let a = repo.insert(Shape::Rect(Rect::from_sides(0, 0, 10, 10)));
        let b = repo.insert(Shape::Rect(Rect::from_sides(100, 100, 110, 110)));
        assert_eq!(a.shape, b.shape);
        assert_ne!(a.disp, b.disp);
        assert_eq!(
            repo.resolve(&b),
            Shape::Rect(Rect::from_sides(100, 100, 110, 110))
        );
    }

    #[test]
    fn bottom_up_order_places_children_first() {
        let mut layout = Layout::new("test", 0.001);
        let top = layout.add_cell("top");
        let mid = layout.add_cell("mid");
        let leaf = layout.add_cell("leaf");
        layout
            .cell_mut(mid)
            .add_instance(Instance::new(leaf, Transformation::identity()));
        layout
            .cell_mut(top)
            .add_instance(Instance::new(mid, Transformation::identity()));
        let order = layout.cells_bottom_up();
        let pos =
            |k: CellKey| order.iter().position(|&c| c == k).unwrap();
        assert!(pos(leaf) < pos(mid));
        assert!(pos(mid) < pos(top));
    }

    #[test]
    fn cell_names_are_uniquified() {
        let mut layout = Layout::new("test", 0.001);
        let a = layout.add_cell("x");
        let b = layout.add_cell("x");
        assert_eq!(layout.cell(a).name().as_str(), "x");
        assert_eq!(layout.cell(b).name().as_str(), "x$1");
    }

    #[test]
    fn cell_bboxes_include_transformed_children() {
        let mut layout = Layout::new("test", 0.001);
        let top = layout.add_cell("top");
        let leaf = layout.add_cell("leaf");
        let layer = layout.allocate_layer();
        layout.insert_rect(leaf, layer, Rect::from_sides(0, 0, 10, 10));
        layout.cell_mut(top).add_instance(Instance::new(
            leaf,
            Transformation::translate(Point::new(100, 0)),
        ));
        let bboxes = layout.cell_bboxes();
        assert_eq!(
            bboxes[top],
            Bbox::new(Point::new(100, 0), Point::new(110, 10))
        );
    }
}
