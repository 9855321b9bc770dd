//! The netlist data model: circuits, nets, pins, subcircuit instances,
//! devices and device abstracts.
//!
//! All objects live in arenas owned by the [`Netlist`] and refer to each
//! other by id, never by owning handles; cross-arena references
//! (circuit → cluster, pin → net) are stored as plain ids.

use std::collections::BTreeMap;

use arcstr::ArcStr;
use netgeom::transform::Transformation;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SecondaryMap, SlotMap};

use crate::clusters::ClusterId;
use crate::layout::CellKey;

pub(crate) mod extract;

new_key_type! {
    /// A unique identifier for a [`Circuit`] within a [`Netlist`].
    pub struct CircuitKey;
    /// A unique identifier for a [`Net`] within a [`Circuit`].
    pub struct NetKey;
}

/// A pin id: an index into its circuit's pin list.
pub type PinId = usize;

/// The netlist-level identity of a net: `(circuit, net)`.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Hash, PartialEq, Eq)]
pub struct NetRef {
    pub circuit: CircuitKey,
    pub net: NetKey,
}

/// A net: a maximal set of electrically connected shapes, represented by
/// the cluster that backs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Net {
    cluster: ClusterId,
    name: Option<ArcStr>,
    pins: Vec<PinId>,
}

impl Net {
    /// Creates an unnamed net backed by the given cluster.
    pub fn new(cluster: ClusterId) -> Self {
        Self {
            cluster,
            name: None,
            pins: Vec::new(),
        }
    }

    /// The backing cluster id within the circuit's cell.
    #[inline]
    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    /// The explicit name, if any.
    #[inline]
    pub fn name(&self) -> Option<&ArcStr> {
        self.name.as_ref()
    }

    /// Names the net.
    pub fn set_name(&mut self, name: impl Into<ArcStr>) {
        self.name = Some(name.into());
    }

    /// The net's name, or `$<cluster>` if unnamed.
    pub fn expanded_name(&self) -> ArcStr {
        match &self.name {
            Some(name) => name.clone(),
            None => arcstr::format!("{}", self.cluster),
        }
    }

    /// The pins through which the net is visible at the circuit boundary.
    #[inline]
    pub fn pins(&self) -> &[PinId] {
        &self.pins
    }

    /// The number of pins; nonzero iff the net escapes upward.
    #[inline]
    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }
}

/// A named port of a circuit, bound to one of its nets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    name: ArcStr,
    net: NetKey,
}

impl Pin {
    /// The pin's name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The circuit-side net the pin exposes.
    #[inline]
    pub fn net(&self) -> NetKey {
        self.net
    }
}

/// A netlist-level instance of a child circuit inside a parent circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCircuit {
    circuit: CircuitKey,
    trans: Transformation,
    name: ArcStr,
    /// Parent-side nets by child pin id.
    connections: BTreeMap<PinId, NetKey>,
}

impl SubCircuit {
    pub(crate) fn new(circuit: CircuitKey, trans: Transformation, name: ArcStr) -> Self {
        Self {
            circuit,
            trans,
            name,
            connections: BTreeMap::new(),
        }
    }

    /// The instantiated circuit.
    #[inline]
    pub fn circuit(&self) -> CircuitKey {
        self.circuit
    }

    /// The placement of the instance, in database units.
    #[inline]
    pub fn trans(&self) -> Transformation {
        self.trans
    }

    /// The instance name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The instance name as rendered in hierarchical net names.
    #[inline]
    pub fn expanded_name(&self) -> &ArcStr {
        &self.name
    }

    /// The parent-side net connected to the given child pin, if any.
    pub fn net_for_pin(&self, pin: PinId) -> Option<NetKey> {
        self.connections.get(&pin).copied()
    }

    pub(crate) fn connect_pin(&mut self, pin: PinId, net: NetKey) {
        self.connections.insert(pin, net);
    }
}

/// A back-reference from a circuit to a subcircuit instantiating it.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubCircuitRef {
    /// The parent circuit.
    pub circuit: CircuitKey,
    /// The index of the subcircuit within the parent.
    pub index: usize,
}

/// A device terminal: a named terminal backed by a cluster of the
/// device-abstract cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Terminal {
    pub name: ArcStr,
    pub cluster: ClusterId,
}

/// A pseudo-cell synthesized by a device extractor, standing for a
/// recognized device. Participates in clustering like any cell but maps
/// to a [`Device`] in the netlist rather than a subcircuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAbstract {
    cell: CellKey,
    name: ArcStr,
    class: ArcStr,
    terminals: Vec<Terminal>,
}

impl DeviceAbstract {
    /// Creates a device abstract for the given cell.
    pub fn new(
        cell: CellKey,
        name: impl Into<ArcStr>,
        class: impl Into<ArcStr>,
        terminals: Vec<Terminal>,
    ) -> Self {
        Self {
            cell,
            name: name.into(),
            class: class.into(),
            terminals,
        }
    }

    /// The backing cell in the internal layout.
    #[inline]
    pub fn cell(&self) -> CellKey {
        self.cell
    }

    /// The abstract's name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The device class (e.g. `NMOS`, `RES`).
    #[inline]
    pub fn class(&self) -> &ArcStr {
        &self.class
    }

    /// The terminal definitions.
    #[inline]
    pub fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    /// The terminal backed by the given cluster, if any.
    pub fn terminal_by_cluster(&self, cluster: ClusterId) -> Option<usize> {
        self.terminals.iter().position(|t| t.cluster == cluster)
    }
}

/// A device instance inside a circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    abstract_index: usize,
    name: ArcStr,
    trans: Transformation,
    /// Nets by terminal index.
    connections: BTreeMap<usize, NetKey>,
}

impl Device {
    pub(crate) fn new(abstract_index: usize, name: ArcStr, trans: Transformation) -> Self {
        Self {
            abstract_index,
            name,
            trans,
            connections: BTreeMap::new(),
        }
    }

    /// The index of the device abstract in the netlist.
    #[inline]
    pub fn device_abstract(&self) -> usize {
        self.abstract_index
    }

    /// The device instance name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The placement of the device, in database units.
    #[inline]
    pub fn trans(&self) -> Transformation {
        self.trans
    }

    /// The net wired to the given terminal, if any.
    pub fn terminal_net(&self, terminal: usize) -> Option<NetKey> {
        self.connections.get(&terminal).copied()
    }

    pub(crate) fn connect_terminal(&mut self, terminal: usize, net: NetKey) {
        self.connections.insert(terminal, net);
    }
}

/// The netlist-level counterpart of a cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circuit {
    cell: CellKey,
    name: ArcStr,
    nets: SlotMap<NetKey, Net>,
    net_order: Vec<NetKey>,
    net_by_cluster: BTreeMap<ClusterId, NetKey>,
    pins: Vec<Pin>,
    subcircuits: Vec<SubCircuit>,
    devices: Vec<Device>,
    refs: Vec<SubCircuitRef>,
}

impl Circuit {
    /// Creates an empty circuit for the given cell.
    pub fn new(cell: CellKey, name: impl Into<ArcStr>) -> Self {
        Self {
            cell,
            name: name.into(),
            nets: SlotMap::with_key(),
            net_order: Vec::new(),
            net_by_cluster: BTreeMap::new(),
            pins: Vec::new(),
            subcircuits: Vec::new(),
            devices: Vec::new(),
            refs: Vec::new(),
        }
    }

    /// The backing cell in the internal layout.
    #[inline]
    pub fn cell(&self) -> CellKey {
        self.cell
    }

    /// The circuit's name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// Adds a net, indexing it by its backing cluster.
    pub fn add_net(&mut self, net: Net) -> NetKey {
        let cluster = net.cluster();
        let key = self.nets.insert(net);
        self.net_order.push(key);
        self.net_by_cluster.insert(cluster, key);
        key
    }

    /// The net with the given key.
    ///
    /// # Panics
    ///
    /// Panics if the key does not name a net of this circuit.
    #[inline]
    pub fn net(&self, key: NetKey) -> &Net {
        &self.nets[key]
    }

    /// Mutable access to the net with the given key.
    #[inline]
    pub fn net_mut(&mut self, key: NetKey) -> &mut Net {
        &mut self.nets[key]
    }

    /// Iterates over nets in creation order.
    pub fn nets(&self) -> impl Iterator<Item = (NetKey, &Net)> {
        self.net_order.iter().map(move |&k| (k, &self.nets[k]))
    }

    /// The number of nets.
    #[inline]
    pub fn net_count(&self) -> usize {
        self.net_order.len()
    }

    /// The net backed by the given cluster, if any.
    pub fn net_by_cluster(&self, cluster: ClusterId) -> Option<NetKey> {
        self.net_by_cluster.get(&cluster).copied()
    }

    /// Adds a pin exposing `net`, wiring the back-reference into the net.
    pub fn add_pin(&mut self, name: impl Into<ArcStr>, net: NetKey) -> PinId {
        let id = self.pins.len();
        self.pins.push(Pin {
            name: name.into(),
            net,
        });
        self.nets[net].pins.push(id);
        id
    }

    /// The circuit's pins; the pin id is the index.
    #[inline]
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// The pin with the given id.
    #[inline]
    pub fn pin(&self, id: PinId) -> &Pin {
        &self.pins[id]
    }

    /// Adds a subcircuit instance.
    pub(crate) fn add_subcircuit(&mut self, sc: SubCircuit) -> usize {
        self.subcircuits.push(sc);
        self.subcircuits.len() - 1
    }

    /// The subcircuit instances.
    #[inline]
    pub fn subcircuits(&self) -> &[SubCircuit] {
        &self.subcircuits
    }

    /// Adds a device instance.
    pub(crate) fn add_device(&mut self, device: Device) -> usize {
        self.devices.push(device);
        self.devices.len() - 1
    }

    /// The device instances.
    #[inline]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Back-references to the subcircuits instantiating this circuit.
    #[inline]
    pub fn refs(&self) -> &[SubCircuitRef] {
        &self.refs
    }
}

/// The netlist: the full circuit/net/device view of an extracted layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Netlist {
    circuits: SlotMap<CircuitKey, Circuit>,
    order: Vec<CircuitKey>,
    by_cell: SecondaryMap<CellKey, CircuitKey>,
    device_abstracts: Vec<DeviceAbstract>,
    abstract_by_cell: SecondaryMap<CellKey, usize>,
}

impl Netlist {
    /// Creates an empty netlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a circuit, indexing it by its backing cell.
    pub fn add_circuit(&mut self, circuit: Circuit) -> CircuitKey {
        let cell = circuit.cell();
        let key = self.circuits.insert(circuit);
        self.order.push(key);
        self.by_cell.insert(cell, key);
        key
    }

    /// The circuit with the given key.
    ///
    /// # Panics
    ///
    /// Panics if the key does not name a circuit of this netlist.
    #[inline]
    pub fn circuit(&self, key: CircuitKey) -> &Circuit {
        &self.circuits[key]
    }

    /// Mutable access to the circuit with the given key.
    #[inline]
    pub fn circuit_mut(&mut self, key: CircuitKey) -> &mut Circuit {
        &mut self.circuits[key]
    }

    /// Iterates over circuits in creation (bottom-up) order.
    pub fn circuits(&self) -> impl Iterator<Item = (CircuitKey, &Circuit)> {
        self.order.iter().map(move |&k| (k, &self.circuits[k]))
    }

    /// The number of circuits.
    #[inline]
    pub fn circuit_count(&self) -> usize {
        self.order.len()
    }

    /// The circuit of the given cell, if it survived extraction.
    pub fn circuit_by_cell(&self, cell: CellKey) -> Option<CircuitKey> {
        self.by_cell.get(cell).copied()
    }

    /// Looks up a circuit by name.
    pub fn circuit_by_name(&self, name: &str) -> Option<CircuitKey> {
        self.circuits()
            .find(|(_, c)| c.name() == name)
            .map(|(k, _)| k)
    }

    /// Registers a device abstract, indexing it by its backing cell.
    pub fn add_device_abstract(&mut self, da: DeviceAbstract) -> usize {
        let cell = da.cell();
        self.device_abstracts.push(da);
        let index = self.device_abstracts.len() - 1;
        self.abstract_by_cell.insert(cell, index);
        index
    }

    /// The registered device abstracts.
    #[inline]
    pub fn device_abstracts(&self) -> &[DeviceAbstract] {
        &self.device_abstracts
    }

    /// The device abstract backed by the given cell, if any.
    pub fn device_abstract_by_cell(&self, cell: CellKey) -> Option<&DeviceAbstract> {
        self.abstract_by_cell
            .get(cell)
            .map(|&i| &self.device_abstracts[i])
    }

    /// The index of the device abstract backed by the given cell, if any.
    pub fn device_abstract_index_by_cell(&self, cell: CellKey) -> Option<usize> {
        self.abstract_by_cell.get(cell).copied()
    }

    /// The circuits no subcircuit instantiates, in creation order.
    pub fn top_circuits(&self) -> Vec<CircuitKey> {
        self.circuits()
            .filter(|(_, c)| c.refs().is_empty())
            .map(|(k, _)| k)
            .collect()
    }

    /// Resolves a [`NetRef`] to its net.
    pub fn net(&self, net: NetRef) -> &Net {
        self.circuit(net.circuit).net(net.net)
    }
}
