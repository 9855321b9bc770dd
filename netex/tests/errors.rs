use std::sync::Arc;

use netex::layout::source::RecursiveShapeIterator;
use netex::store::Region;
use netex::{ErrorSource, LayoutExtractor};
use netgeom::{Point, Rect};

mod common;
use common::{extractor, single_cell_layout};

#[test]
fn clipped_sources_are_rejected_at_construction() {
    let (layout, top, _) = single_cell_layout();
    let iter = RecursiveShapeIterator::new(Arc::new(layout), top)
        .with_clip(Rect::from_sides(0, 0, 50, 50));
    let err = LayoutExtractor::new(iter).unwrap_err();
    assert!(matches!(err.source(), ErrorSource::ClippedSource));
}

#[test]
fn connectivity_requires_named_layers() {
    let (layout, top, m1) = single_cell_layout();
    let mut ex = extractor(layout, top);
    let unnamed = ex.make_polygon_layer(m1, None).unwrap();
    let err = ex.connect(&unnamed).unwrap_err();
    assert!(matches!(err.source(), ErrorSource::NotPersisted));
}

#[test]
fn connectivity_rejects_flat_regions() {
    let (layout, top, _) = single_cell_layout();
    let mut ex = extractor(layout, top);
    let flat = Region::empty();
    let err = ex.connect(&flat).unwrap_err();
    assert!(matches!(err.source(), ErrorSource::NotHierarchical));
    let err = ex.register_layer(&flat, "FLAT").unwrap_err();
    assert!(matches!(err.source(), ErrorSource::NotHierarchical));
}

#[test]
fn duplicate_layer_names_collide() {
    let (layout, top, m1) = single_cell_layout();
    let mut ex = extractor(layout, top);
    let _a = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    let b = ex.make_layer(None).unwrap();
    let err = ex.register_layer(&b, "M1").unwrap_err();
    assert!(matches!(err.source(), ErrorSource::DuplicateLayerName(_)));
}

#[test]
fn registering_a_new_name_renames() {
    let (layout, top, m1) = single_cell_layout();
    let mut ex = extractor(layout, top);
    let a = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.register_layer(&a, "METAL1").unwrap();
    assert_eq!(ex.name_of(&a).unwrap().as_str(), "METAL1");
    assert!(ex.layer_by_name("M1").is_none(), "the old name is dropped");
    assert!(ex.layer_by_name("METAL1").is_some());
}

#[test]
fn mutators_fail_after_extraction() {
    let (layout, top, m1) = single_cell_layout();
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    ex.extract_netlist(false).unwrap();

    let err = ex.connect(&m1).unwrap_err();
    assert!(matches!(err.source(), ErrorSource::AlreadyExtracted));
    let err = ex.connect_global(&m1, "GND").unwrap_err();
    assert!(matches!(err.source(), ErrorSource::AlreadyExtracted));
    let err = ex.extract_netlist(false).unwrap_err();
    assert!(matches!(err.source(), ErrorSource::AlreadyExtracted));
}

#[test]
fn queries_fail_before_extraction() {
    let (layout, top, m1) = single_cell_layout();
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();

    let err = ex.probe_net(&m1, Point::new(10, 10)).unwrap_err();
    assert!(matches!(err.source(), ErrorSource::NotExtracted));

    let mut target = netex::layout::Layout::new("target", common::DBU);
    let target_top = target.add_cell("top");
    let err = ex
        .build_all_nets(
            &ex.const_cell_mapping_into(&target, target_top).unwrap(),
            &mut target,
            &std::collections::BTreeMap::new(),
            Some("N$"),
            Some("C$"),
            Some("D$"),
        )
        .unwrap_err();
    assert!(matches!(err.source(), ErrorSource::NotExtracted));
}
