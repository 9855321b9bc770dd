//! The connectivity registry: the declarative input of intra-layer,
//! inter-layer and global connections.

use std::collections::{BTreeMap, BTreeSet};

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::layout::LayerId;

/// A small dense identifier for a named global net (e.g. `GND`, `VDD`).
#[derive(
    Debug, Default, Copy, Clone, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct GlobalNetId(pub u32);

/// The set of declared layer connections.
///
/// All collections are ordered so the downstream cluster computation is
/// deterministic. Duplicate declarations are idempotent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connectivity {
    edges: BTreeMap<LayerId, BTreeSet<LayerId>>,
    globals: BTreeMap<LayerId, BTreeSet<GlobalNetId>>,
    global_names: Vec<ArcStr>,
}

impl Connectivity {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks layer `l` as internally connected: shapes on `l` within the
    /// same cell that touch belong to one cluster.
    pub fn connect(&mut self, l: LayerId) {
        self.connect_layers(l, l);
    }

    /// Marks layers `a` and `b` as mutually connected.
    ///
    /// The relation is symmetric; declaring `(a, b)` and `(b, a)` is
    /// equivalent.
    pub fn connect_layers(&mut self, a: LayerId, b: LayerId) {
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    /// Ties layer `l` to the global net named `name`, allocating an id for
    /// the name if it is new. Multiple layers may share a global net.
    pub fn connect_global(&mut self, l: LayerId, name: &str) -> GlobalNetId {
        let id = self.global_net_id(name);
        self.globals.entry(l).or_default().insert(id);
        id
    }

    /// The name of a global net.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not allocated by this registry.
    pub fn global_net_name(&self, id: GlobalNetId) -> &ArcStr {
        &self.global_names[id.0 as usize]
    }

    /// The id of the global net named `name`, allocating one if new.
    pub fn global_net_id(&mut self, name: &str) -> GlobalNetId {
        if let Some(pos) = self.global_names.iter().position(|n| n == name) {
            return GlobalNetId(pos as u32);
        }
        self.global_names.push(ArcStr::from(name));
        GlobalNetId((self.global_names.len() - 1) as u32)
    }

    /// The number of allocated global nets.
    pub fn global_net_count(&self) -> usize {
        self.global_names.len()
    }

    /// Whether layers `a` and `b` are declared connected.
    pub fn connects(&self, a: LayerId, b: LayerId) -> bool {
        self.edges.get(&a).is_some_and(|s| s.contains(&b))
    }

    /// The layers connected to `l`, in layer order.
    pub fn connected_layers(&self, l: LayerId) -> impl Iterator<Item = LayerId> + '_ {
        self.edges.get(&l).into_iter().flatten().copied()
    }

    /// The global nets layer `l` is tied to.
    pub fn global_nets_of(&self, l: LayerId) -> impl Iterator<Item = GlobalNetId> + '_ {
        self.globals.get(&l).into_iter().flatten().copied()
    }

    /// All layers participating in connectivity (via edges or globals),
    /// in layer order.
    pub fn layers(&self) -> impl Iterator<Item = LayerId> + '_ {
        let mut all: BTreeSet<LayerId> = self.edges.keys().copied().collect();
        all.extend(self.globals.keys().copied());
        all.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_is_symmetric_and_idempotent() {
        let (a, b) = (LayerId(0), LayerId(1));
        let mut conn = Connectivity::new();
        conn.connect_layers(a, b);
        conn.connect_layers(b, a);
        conn.connect_layers(a, b);
        assert!(conn.connects(a, b));
        assert!(conn.connects(b, a));
        assert!(!conn.connects(a, a));
        assert_eq!(conn.connected_layers(a).collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn global_net_ids_are_dense_and_shared() {
        let (a, b) = (LayerId(0), LayerId(1));
        let mut conn = Connectivity::new();
        let gnd = conn.connect_global(a, "GND");
        let vdd = conn.connect_global(b, "VDD");
        assert_eq!(conn.connect_global(b, "GND"), gnd);
        assert_ne!(gnd, vdd);
        assert_eq!(conn.global_net_name(gnd).as_str(), "GND");
        assert_eq!(conn.global_net_count(), 2);
        assert_eq!(conn.layers().collect::<Vec<_>>(), vec![a, b]);
    }
}
