//! skilldeck-core: shared data model for the schema resolution pipeline.
//!
//! Holds the renderable specification types (forms, tables, composed fields),
//! the error taxonomy, the injected TTL cache primitive, and gateway config.
//! Nothing in this crate touches the network or the filesystem.

mod cache;
mod config;
mod error;
mod spec;
mod ui;

pub use cache::TtlCache;
pub use config::CoreConfig;
pub use error::{InferenceError, ResolveError};
pub use spec::{
    ColumnSpec, CompositionResult, Constraints, FieldKind, FieldSpec, FormSpec, InferredType,
    LookupRef, ParamType, Provenance, ResolvedField, SectionSpec, SelectOption, TableSchema,
    CONFIDENCE_THRESHOLD,
};
pub use ui::UiDirectives;
