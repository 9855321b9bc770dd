//! Extraction result and error types.

use std::fmt::{Debug, Display};

use arcstr::ArcStr;
use thiserror::Error;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// An extraction error: a source plus the trail of operations that led to it.
pub struct ExtractError {
    pub(crate) source: ErrorSource,
    pub(crate) context: Vec<ErrorContext>,
}

impl ExtractError {
    pub fn new(source: impl Into<ErrorSource>) -> Self {
        Self {
            source: source.into(),
            context: Vec::new(),
        }
    }

    pub fn source(&self) -> &ErrorSource {
        &self.source
    }

    pub fn with_context(mut self, ctx: impl Into<ErrorContext>) -> Self {
        self.context.push(ctx.into());
        self
    }

    #[inline]
    pub fn into_inner(self) -> ErrorSource {
        self.source
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Error:\n{}", self.source)?;
        if !self.context.is_empty() {
            writeln!(f, "\nError occurred:")?;
            for item in self.context.iter() {
                writeln!(f, "\twhile {}", item)?;
            }
        }
        Ok(())
    }
}

impl Debug for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.source)?;
        if !self.context.is_empty() {
            writeln!(f, "\nError occurred:")?;
            for (i, item) in self.context.iter().enumerate() {
                writeln!(f, "\t{}: {:?}", i, item)?;
            }
        }
        Ok(())
    }
}

impl<T> From<T> for ExtractError
where
    T: Into<ErrorSource>,
{
    fn from(value: T) -> Self {
        Self {
            source: value.into(),
            context: Vec::new(),
        }
    }
}

/// Attaches context to the error variant of `result`, if any.
#[inline]
pub fn with_err_context<T, E, C>(result: std::result::Result<T, E>, ctx: C) -> Result<T>
where
    C: FnOnce() -> ErrorContext,
    E: Into<ExtractError>,
{
    result.map_err(|err| err.into().with_context(ctx()))
}

/// The operation during which an error occurred.
#[derive(Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorContext {
    MakeLayer(ArcStr),
    RegisterLayer(ArcStr),
    Connect,
    ConnectGlobal(ArcStr),
    ExtractDevices,
    ExtractNetlist,
    ShapesOfNet,
    BuildNet,
    ProbeNet,
    Task(ArcStr),
}

impl Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ErrorContext::*;
        match self {
            MakeLayer(name) => write!(f, "creating layer {name}"),
            RegisterLayer(name) => write!(f, "registering layer {name}"),
            Connect => write!(f, "declaring connectivity"),
            ConnectGlobal(name) => write!(f, "declaring global connectivity to {name}"),
            ExtractDevices => write!(f, "extracting devices"),
            ExtractNetlist => write!(f, "extracting the netlist"),
            ShapesOfNet => write!(f, "delivering net shapes"),
            BuildNet => write!(f, "rebuilding net hierarchy"),
            ProbeNet => write!(f, "probing a net"),
            Task(task) => write!(f, "{task}"),
        }
    }
}

/// The root cause of an [`ExtractError`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorSource {
    /// The netlist has already been extracted; the state is frozen.
    #[error("the netlist has already been extracted")]
    AlreadyExtracted,

    /// A query that requires an extracted netlist was made too early.
    #[error("the netlist has not been extracted yet")]
    NotExtracted,

    /// A flat (non-hierarchical) layer was used where deep backing is required.
    #[error("flat layers cannot be used in netlist extraction")]
    NotHierarchical,

    /// An unnamed layer was used where persisted (named) layers are required.
    #[error("only named layers can be used in netlist extraction")]
    NotPersisted,

    /// A layer name collision.
    #[error("layer name is already used: {0}")]
    DuplicateLayerName(ArcStr),

    /// The shape source declares a clip region.
    #[error("the netlist extractor cannot work on clipped layouts")]
    ClippedSource,

    /// An internal inconsistency.
    #[error("internal error: {0}")]
    Internal(String),

    /// Boxed external errors (e.g. from an injected device extractor).
    #[error("unexpected error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
