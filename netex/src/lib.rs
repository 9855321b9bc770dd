//! Hierarchical layout-to-netlist extraction.
//!
//! Given a hierarchy of cells containing polygonal shapes on named layers,
//! plus a declaration of which layers connect to each other (and which are
//! tied to named global signals), this crate computes the electrical nets
//! of the layout without flattening it, and exposes them as a netlist of
//! circuits, subcircuit instances, devices, pins and nets that preserves
//! the original hierarchy.
//!
//! The user-facing entry point is [`extract::LayoutExtractor`].

pub mod build;
pub mod clusters;
pub mod connectivity;
pub mod error;
pub mod extract;
pub mod layout;
pub mod netlist;
pub mod store;

pub(crate) mod log;

pub use error::{ErrorSource, ExtractError, Result};
pub use extract::LayoutExtractor;
