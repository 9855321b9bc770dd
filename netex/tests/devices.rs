use std::collections::BTreeMap;

use arcstr::ArcStr;
use netex::clusters::{ConnectedClusters, HierClusters, LocalCluster};
use netex::extract::DeviceExtractor;
use netex::layout::{Instance, Layout};
use netex::netlist::{DeviceAbstract, Netlist, Terminal};
use netex::store::{DeepStore, Region};
use netgeom::bbox::BoundBox;
use netgeom::transform::Transformation;
use netgeom::{Point, Rect, Shape};

mod common;
use common::{extractor, DBU};

/// A toy recognizer: synthesizes one two-terminal resistor abstract and
/// places it into the top cell between the two supply rails.
struct ResistorExtractor;

impl DeviceExtractor for ResistorExtractor {
    fn extract(
        &mut self,
        store: &DeepStore,
        layers: &BTreeMap<ArcStr, Region>,
        netlist: &mut Netlist,
        clusters: &mut HierClusters,
    ) -> netex::Result<()> {
        let m1 = layers["M1"].deep().expect("M1 must be hierarchical").layer();

        let (abstract_cell, terminals) = store.with_layout_mut(|layout| {
            let top = layout.top_cell().expect("layer creation ran first");
            let cell = layout.add_cell("RES2");

            // Two terminal patches at the abstract's local origin.
            let t1 = layout.insert_rect(cell, m1, Rect::from_sides(0, 0, 10, 10));
            let t2 = layout.insert_rect(cell, m1, Rect::from_sides(40, 0, 50, 10));

            let mut cc = ConnectedClusters::new();
            let mut c1 = LocalCluster::new();
            c1.add_shape(m1, t1, layout.cell(cell).resolve_bbox(&t1));
            let k1 = cc.insert_cluster(c1);
            let mut c2 = LocalCluster::new();
            c2.add_shape(m1, t2, layout.cell(cell).resolve_bbox(&t2));
            let k2 = cc.insert_cluster(c2);
            clusters.insert(cell, cc);

            layout.cell_mut(top).add_instance(Instance::new(
                cell,
                Transformation::translate(Point::new(100, 0)),
            ));

            (cell, vec![(k1, "A"), (k2, "B")])
        });

        netlist.add_device_abstract(DeviceAbstract::new(
            abstract_cell,
            "RES2",
            "RES",
            terminals
                .into_iter()
                .map(|(cluster, name)| Terminal {
                    name: ArcStr::from(name),
                    cluster,
                })
                .collect(),
        ));
        Ok(())
    }
}

#[test]
fn device_abstracts_become_devices_not_subcircuits() {
    let mut layout = Layout::new("chip", DBU);
    let top = layout.add_cell("top");
    let m1 = layout.allocate_layer();
    // Two rails; the resistor placed at x = 100 bridges the gap:
    // terminal A lands on 100..110, terminal B on 140..150.
    layout.insert_rect(top, m1, Rect::from_sides(0, 0, 105, 10));
    layout.insert_rect(top, m1, Rect::from_sides(145, 0, 250, 10));
    layout.set_top_cell(top);

    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();

    let mut layers = BTreeMap::new();
    layers.insert(ArcStr::from("M1"), m1.clone());
    ex.extract_devices(&mut ResistorExtractor, &layers).unwrap();
    ex.extract_netlist(false).unwrap();

    let netlist = ex.netlist().unwrap();
    assert_eq!(netlist.device_abstracts().len(), 1);
    assert_eq!(netlist.circuit_count(), 1, "the abstract is not a circuit");

    let top_key = netlist.circuit_by_name("top").unwrap();
    let top_circuit = netlist.circuit(top_key);
    assert!(top_circuit.subcircuits().is_empty());
    assert_eq!(top_circuit.devices().len(), 1);
    assert_eq!(top_circuit.net_count(), 2);

    let device = &top_circuit.devices()[0];
    let abs = &netlist.device_abstracts()[device.device_abstract()];
    assert_eq!(abs.class().as_str(), "RES");

    let nets: Vec<_> = top_circuit.nets().map(|(k, _)| k).collect();
    let a = device.terminal_net(0).unwrap();
    let b = device.terminal_net(1).unwrap();
    assert_ne!(a, b, "the rails stay electrically distinct");
    assert!(nets.contains(&a) && nets.contains(&b));
}

#[test]
fn device_shapes_are_skipped_by_nonrecursive_delivery() {
    let mut layout = Layout::new("chip", DBU);
    let top = layout.add_cell("top");
    let m1 = layout.allocate_layer();
    layout.insert_rect(top, m1, Rect::from_sides(0, 0, 105, 10));
    layout.insert_rect(top, m1, Rect::from_sides(145, 0, 250, 10));
    layout.set_top_cell(top);

    let mut ex = extractor(layout, top);
    let m1 = ex.make_polygon_layer(m1, Some("M1")).unwrap();
    ex.connect(&m1).unwrap();
    let mut layers = BTreeMap::new();
    layers.insert(ArcStr::from("M1"), m1.clone());
    ex.extract_devices(&mut ResistorExtractor, &layers).unwrap();
    ex.extract_netlist(false).unwrap();

    let netlist = ex.netlist().unwrap();
    let top_key = netlist.circuit_by_name("top").unwrap();
    let (net_key, _) = netlist.circuit(top_key).nets().next().unwrap();
    let net = netex::netlist::NetRef {
        circuit: top_key,
        net: net_key,
    };

    // Recursive delivery includes the terminal patch inside the device
    // abstract; non-recursive delivery stops at the device boundary.
    let recursive = ex.shapes_of_net(net, &m1, true).unwrap();
    let local = ex.shapes_of_net(net, &m1, false).unwrap();
    assert_eq!(recursive.flat_shapes().unwrap().len(), 2);
    assert_eq!(local.flat_shapes().unwrap().len(), 1);

    // The delivered terminal patch is placed at the device's location.
    assert!(recursive
        .flat_shapes()
        .unwrap()
        .iter()
        .any(|s| s.bbox() == Shape::Rect(Rect::from_sides(100, 0, 110, 10)).bbox()));
}
