use netgeom::Point;

mod common;
use common::{extractor, two_instance_layout};

#[test]
fn probe_finds_the_most_outward_net() {
    let (layout, top, m1) = two_instance_layout(Point::new(0, 0), Point::new(100, 0));
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    ex.extract_netlist(false).unwrap();

    // Points inside either instance resolve to the same top-level net.
    let a = ex.probe_net(&m1, Point::new(50, 10)).unwrap().unwrap();
    let b = ex.probe_net(&m1, Point::new(150, 10)).unwrap().unwrap();
    assert_eq!(a, b);

    let netlist = ex.netlist().unwrap();
    let top_key = netlist.circuit_by_name("top").unwrap();
    assert_eq!(a.circuit, top_key, "the net is reported at the top circuit");
}

#[test]
fn probe_distinguishes_disconnected_nets() {
    let (layout, top, m1) = two_instance_layout(Point::new(0, 0), Point::new(500, 0));
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    ex.extract_netlist(false).unwrap();

    let a = ex.probe_net(&m1, Point::new(50, 10)).unwrap().unwrap();
    let b = ex.probe_net(&m1, Point::new(550, 10)).unwrap().unwrap();
    assert_ne!(a, b);
}

#[test]
fn probe_misses_outside_the_layout() {
    let (layout, top, m1) = two_instance_layout(Point::new(0, 0), Point::new(100, 0));
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    ex.extract_netlist(false).unwrap();

    assert!(ex.probe_net(&m1, Point::new(5000, 5000)).unwrap().is_none());
}

#[test]
fn probe_round_trips_through_delivered_shapes() {
    let (layout, top, m1) = two_instance_layout(Point::new(0, 0), Point::new(100, 0));
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    ex.extract_netlist(false).unwrap();

    let netlist = ex.netlist().unwrap();
    let top_key = netlist.circuit_by_name("top").unwrap();
    let (net_key, _) = netlist.circuit(top_key).nets().next().unwrap();
    let net = netex::netlist::NetRef {
        circuit: top_key,
        net: net_key,
    };

    let shapes = ex.shapes_of_net(net, &m1, true).unwrap();
    for shape in shapes.flat_shapes().unwrap() {
        let inside = match shape {
            netgeom::Shape::Rect(r) => r.center(),
            netgeom::Shape::Polygon(_) => unreachable!("test uses rectangles only"),
        };
        assert_eq!(ex.probe_net(&m1, inside).unwrap(), Some(net));
    }
}

#[test]
fn probe_in_micron_space_matches_dbu_probe() {
    let (layout, top, m1) = two_instance_layout(Point::new(0, 0), Point::new(100, 0));
    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    ex.extract_netlist(false).unwrap();

    let dbu = common::DBU;
    let via_dbu = ex.probe_net(&m1, Point::new(50, 10)).unwrap();
    let via_um = ex
        .probe_net_micron(&m1, (50.0 * dbu, 10.0 * dbu))
        .unwrap();
    assert_eq!(via_dbu, via_um);
}
