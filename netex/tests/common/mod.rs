#![allow(dead_code)]

use std::sync::Arc;

use netex::layout::source::RecursiveShapeIterator;
use netex::layout::{CellKey, Instance, LayerId, Layout};
use netex::LayoutExtractor;
use netgeom::transform::{Transform, Transformation};
use netgeom::{Point, Rect, Shape};

/// Database unit used by the test layouts: 1 nm.
pub const DBU: f64 = 0.001;

/// Wraps a finished source layout into an extractor.
pub fn extractor(layout: Layout, top: CellKey) -> LayoutExtractor {
    LayoutExtractor::new(RecursiveShapeIterator::new(Arc::new(layout), top))
        .expect("source should not be clipped")
}

/// A single top cell with two overlapping rectangles on one layer.
pub fn single_cell_layout() -> (Layout, CellKey, LayerId) {
    let mut layout = Layout::new("chip", DBU);
    let top = layout.add_cell("top");
    let m1 = layout.allocate_layer();
    layout.insert_rect(top, m1, Rect::from_sides(0, 0, 100, 20));
    layout.insert_rect(top, m1, Rect::from_sides(80, 0, 200, 20));
    (layout, top, m1)
}

/// A child cell with one rectangle on `m1`, instantiated twice in the top
/// cell at displacements `d1` and `d2`.
pub fn two_instance_layout(d1: Point, d2: Point) -> (Layout, CellKey, LayerId) {
    let mut layout = Layout::new("chip", DBU);
    let top = layout.add_cell("top");
    let child = layout.add_cell("x");
    let m1 = layout.allocate_layer();
    layout.insert_rect(child, m1, Rect::from_sides(0, 0, 100, 20));
    layout
        .cell_mut(top)
        .add_instance(Instance::new(child, Transformation::translate(d1)));
    layout
        .cell_mut(top)
        .add_instance(Instance::new(child, Transformation::translate(d2)));
    layout.set_top_cell(top);
    (layout, top, m1)
}

/// Recursively collects all shapes of `cell` on `layer`, transformed into
/// the coordinate space of the caller.
pub fn flatten_into(
    layout: &Layout,
    cell: CellKey,
    layer: LayerId,
    trans: Transformation,
    out: &mut Vec<Shape>,
) {
    let c = layout.cell(cell);
    for pr in c.shapes_on(layer) {
        out.push(c.resolve(pr).transform(trans));
    }
    for inst in c.insts() {
        flatten_into(
            layout,
            inst.cell,
            layer,
            Transformation::cascade(trans, inst.trans),
            out,
        );
    }
}

/// All shapes of `cell` on `layer`, flattened.
pub fn flatten(layout: &Layout, cell: CellKey, layer: LayerId) -> Vec<Shape> {
    let mut out = Vec::new();
    flatten_into(layout, cell, layer, Transformation::identity(), &mut out);
    out
}

/// Sorts shapes into a canonical order for multiset comparison.
pub fn sorted(mut shapes: Vec<Shape>) -> Vec<Shape> {
    shapes.sort_by_key(|s| format!("{s:?}"));
    shapes
}
