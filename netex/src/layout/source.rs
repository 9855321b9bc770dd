//! The shape source: a recursive, hierarchy-preserving cursor over a
//! source layout, with a shape-class filter and a layer selector.

use std::sync::Arc;

use netgeom::Rect;

use super::{CellKey, LayerId, Layout};

/// Selects which classes of shapes a [`RecursiveShapeIterator`] exposes.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ShapeFlags {
    /// Expose nothing; used for blank anchor layers.
    Nothing,
    /// Expose text labels only.
    Texts,
    /// Expose polygonal geometry only (boxes, polygons, paths).
    Polygons,
    /// Expose everything.
    #[default]
    All,
}

impl ShapeFlags {
    /// Whether polygonal geometry passes the filter.
    #[inline]
    pub fn polygons(&self) -> bool {
        matches!(self, Self::Polygons | Self::All)
    }

    /// Whether text labels pass the filter.
    #[inline]
    pub fn texts(&self) -> bool {
        matches!(self, Self::Texts | Self::All)
    }
}

/// A recursive shape iterator over a source layout.
///
/// Carries the source layout, its top cell, the shape-class filter and an
/// optional layer selector. The whole layout must be visible: a clip
/// region is rejected by the extractor at construction.
#[derive(Debug, Clone)]
pub struct RecursiveShapeIterator {
    layout: Arc<Layout>,
    top: CellKey,
    flags: ShapeFlags,
    layer: Option<LayerId>,
    clip: Option<Rect>,
}

impl RecursiveShapeIterator {
    /// Creates an iterator over the whole of `layout`, rooted at `top`.
    pub fn new(layout: Arc<Layout>, top: CellKey) -> Self {
        Self {
            layout,
            top,
            flags: ShapeFlags::All,
            layer: None,
            clip: None,
        }
    }

    /// Restricts the iterator to a single source layer.
    pub fn with_layer(mut self, layer: LayerId) -> Self {
        self.layer = Some(layer);
        self
    }

    /// Sets the shape-class filter.
    pub fn with_flags(mut self, flags: ShapeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Restricts the iterator to a clip region.
    ///
    /// Clipped iterators are not usable for netlist extraction.
    pub fn with_clip(mut self, clip: Rect) -> Self {
        self.clip = Some(clip);
        self
    }

    /// The source layout.
    #[inline]
    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// The top cell of the traversal.
    #[inline]
    pub fn top(&self) -> CellKey {
        self.top
    }

    /// The shape-class filter.
    #[inline]
    pub fn flags(&self) -> ShapeFlags {
        self.flags
    }

    /// The layer selector, if any.
    #[inline]
    pub fn layer(&self) -> Option<LayerId> {
        self.layer
    }

    /// Whether a clip region is set.
    #[inline]
    pub fn has_clip(&self) -> bool {
        self.clip.is_some()
    }
}
