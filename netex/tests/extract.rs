use netgeom::{Point, Rect};

mod common;
use common::{extractor, single_cell_layout, two_instance_layout};

#[test]
fn overlapping_shapes_in_one_cell_form_one_net() {
    let (layout, top, m1) = single_cell_layout();
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    ex.extract_netlist(false).unwrap();

    let netlist = ex.netlist().unwrap();
    assert_eq!(netlist.circuit_count(), 1);
    let (ckey, circuit) = netlist.circuits().next().unwrap();
    assert_eq!(circuit.name().as_str(), "top");
    assert_eq!(circuit.net_count(), 1);

    let (nkey, net) = circuit.nets().next().unwrap();
    assert_eq!(net.pin_count(), 0, "a top-level net has no pins");

    let shapes = ex
        .shapes_of_net(
            netex::netlist::NetRef {
                circuit: ckey,
                net: nkey,
            },
            &m1,
            true,
        )
        .unwrap();
    assert_eq!(shapes.flat_shapes().unwrap().len(), 2);
}

#[test]
fn touching_instances_share_one_net_at_top() {
    // The two placements of the child rectangle abut at x = 100.
    let (layout, top, m1) = two_instance_layout(Point::new(0, 0), Point::new(100, 0));
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    ex.extract_netlist(false).unwrap();

    let netlist = ex.netlist().unwrap();
    assert_eq!(netlist.circuit_count(), 2);

    let child_key = netlist.circuit_by_name("x").unwrap();
    let child = netlist.circuit(child_key);
    assert_eq!(child.net_count(), 1);
    let (_, child_net) = child.nets().next().unwrap();
    assert_eq!(child_net.pin_count(), 1, "the child net escapes upward");

    let top_key = netlist.circuit_by_name("top").unwrap();
    let top_circuit = netlist.circuit(top_key);
    assert_eq!(top_circuit.subcircuits().len(), 2);
    assert_eq!(
        top_circuit.net_count(),
        1,
        "both instances resolve to the same electrical net"
    );
    let (top_net_key, _) = top_circuit.nets().next().unwrap();
    for sc in top_circuit.subcircuits() {
        assert_eq!(sc.circuit(), child_key);
        assert_eq!(sc.net_for_pin(0), Some(top_net_key));
    }
}

#[test]
fn disjoint_instances_produce_distinct_nets() {
    let (layout, top, m1) = two_instance_layout(Point::new(0, 0), Point::new(500, 0));
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    ex.extract_netlist(false).unwrap();

    let netlist = ex.netlist().unwrap();
    let top_key = netlist.circuit_by_name("top").unwrap();
    let top_circuit = netlist.circuit(top_key);
    assert_eq!(top_circuit.net_count(), 2);
    assert_eq!(top_circuit.subcircuits().len(), 2);

    // Each top net connects exactly one subcircuit pin.
    let mut seen = Vec::new();
    for sc in top_circuit.subcircuits() {
        let net = sc.net_for_pin(0).unwrap();
        assert!(!seen.contains(&net));
        seen.push(net);
    }
}

#[test]
fn inter_layer_connection_spans_layers_but_delivery_is_per_layer() {
    let mut layout = netex::layout::Layout::new("chip", common::DBU);
    let top = layout.add_cell("top");
    let m1 = layout.allocate_layer();
    let m2 = layout.allocate_layer();
    let via = layout.allocate_layer();
    layout.insert_rect(top, m1, Rect::from_sides(0, 0, 100, 20));
    layout.insert_rect(top, m2, Rect::from_sides(200, 0, 300, 20));
    layout.insert_rect(top, via, Rect::from_sides(90, 4, 210, 16));

    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    let m2 = ex.make_polygon_layer(m2, Some("M2")).unwrap();
    let via = ex.make_polygon_layer(via, Some("VIA")).unwrap();
    ex.connect(&m1).unwrap();
    ex.connect(&m2).unwrap();
    ex.connect_regions(&m1, &via).unwrap();
    ex.connect_regions(&m2, &via).unwrap();
    ex.extract_netlist(false).unwrap();

    let netlist = ex.netlist().unwrap();
    let (ckey, circuit) = netlist.circuits().next().unwrap();
    assert_eq!(circuit.net_count(), 1, "the via couples both metal layers");
    let (nkey, _) = circuit.nets().next().unwrap();
    let net = netex::netlist::NetRef {
        circuit: ckey,
        net: nkey,
    };

    let on_m1 = ex.shapes_of_net(net, &m1, true).unwrap();
    assert_eq!(
        on_m1.flat_shapes().unwrap().to_vec(),
        vec![netgeom::Shape::Rect(Rect::from_sides(0, 0, 100, 20))]
    );
    let on_m2 = ex.shapes_of_net(net, &m2, true).unwrap();
    assert_eq!(on_m2.flat_shapes().unwrap().len(), 1);
    let on_via = ex.shapes_of_net(net, &via, true).unwrap();
    assert_eq!(on_via.flat_shapes().unwrap().len(), 1);
}

#[test]
fn pin_count_reflects_boundary_visibility() {
    let (layout, top, m1) = two_instance_layout(Point::new(0, 0), Point::new(100, 0));
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    ex.extract_netlist(false).unwrap();

    let netlist = ex.netlist().unwrap();
    for (_, circuit) in netlist.circuits() {
        let referenced = !circuit.refs().is_empty();
        for (_, net) in circuit.nets() {
            assert_eq!(
                net.pin_count() > 0,
                referenced,
                "pins exist exactly on nets referenced across a cell boundary"
            );
        }
    }
}
