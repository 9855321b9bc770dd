//! Netlist assembly: folds the hier-clusters into circuits, nets, pins,
//! subcircuits and devices.

use std::collections::BTreeMap;

use super::{Circuit, Device, Net, Netlist, SubCircuit, SubCircuitRef};
use crate::clusters::HierClusters;
use crate::connectivity::Connectivity;
use crate::layout::Layout;
use crate::log;

/// Builds the netlist from the computed hier-clusters.
///
/// Visits cells bottom-up: one circuit per non-device cell that retains
/// at least one cluster, one net per cluster, one subcircuit per child
/// instance whose cell yielded a circuit, one device per device-abstract
/// instance. Pins are created on a child net the first time a parent
/// connection references it.
pub(crate) fn extract_nets(
    layout: &Layout,
    conn: &Connectivity,
    clusters: &HierClusters,
    netlist: &mut Netlist,
) {
    for ck in layout.cells_bottom_up() {
        if netlist.abstract_by_cell.contains_key(ck) {
            continue;
        }
        let Some(cc) = clusters.clusters_per_cell(ck) else {
            continue;
        };
        if cc.locals().is_empty() {
            continue;
        }

        let circuit_key = netlist.add_circuit(Circuit::new(ck, layout.cell(ck).name().clone()));

        for cl in cc.locals().iter() {
            let mut net = Net::new(cl.id());
            if let Some(label) = cl.labels().first() {
                net.set_name(label.clone());
            } else if let Some(&global) = cl.globals().iter().next() {
                net.set_name(conn.global_net_name(global).clone());
            }
            netlist.circuits[circuit_key].add_net(net);
        }

        let mut subckt_by_inst: BTreeMap<usize, usize> = BTreeMap::new();
        let mut device_by_inst: BTreeMap<usize, usize> = BTreeMap::new();

        for cl in cc.locals().iter() {
            let parent_net = netlist.circuits[circuit_key]
                .net_by_cluster(cl.id())
                .expect("every cluster has a net");

            for c in cc.connections_for(cl.id()) {
                if let Some(&ai) = netlist.abstract_by_cell.get(c.cell) {
                    let di = match device_by_inst.get(&c.inst) {
                        Some(&di) => di,
                        None => {
                            let circuit = &mut netlist.circuits[circuit_key];
                            let name = arcstr::format!("$D{}", circuit.devices.len() + 1);
                            let di = circuit.add_device(Device::new(ai, name, c.trans));
                            device_by_inst.insert(c.inst, di);
                            di
                        }
                    };
                    match netlist.device_abstracts[ai].terminal_by_cluster(c.cluster) {
                        Some(terminal) => {
                            netlist.circuits[circuit_key].devices[di]
                                .connect_terminal(terminal, parent_net);
                        }
                        None => log::warn!(
                            "connection to unknown terminal cluster {} of device abstract {}",
                            c.cluster,
                            netlist.device_abstracts[ai].name()
                        ),
                    }
                } else if let Some(&child_key) = netlist.by_cell.get(c.cell) {
                    let si = match subckt_by_inst.get(&c.inst) {
                        Some(&si) => si,
                        None => {
                            let circuit = &mut netlist.circuits[circuit_key];
                            let name = arcstr::format!("${}", circuit.subcircuits.len() + 1);
                            let si = circuit.add_subcircuit(SubCircuit::new(child_key, c.trans, name));
                            netlist.circuits[child_key].refs.push(SubCircuitRef {
                                circuit: circuit_key,
                                index: si,
                            });
                            subckt_by_inst.insert(c.inst, si);
                            si
                        }
                    };

                    let child = &mut netlist.circuits[child_key];
                    let child_net = child
                        .net_by_cluster(c.cluster)
                        .expect("connection references a missing child net");
                    let pin = match child.nets[child_net].pins.first().copied() {
                        Some(pin) => pin,
                        None => {
                            let name = child.nets[child_net].expanded_name();
                            child.add_pin(name, child_net)
                        }
                    };
                    netlist.circuits[circuit_key].subcircuits[si].connect_pin(pin, parent_net);
                }
                // Otherwise the child cell was purged; its shapes are
                // flattened into parents during delivery.
            }
        }
    }

    log::debug!("extracted {} circuits", netlist.circuit_count());
}
