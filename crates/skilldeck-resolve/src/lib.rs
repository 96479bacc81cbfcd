//! skilldeck-resolve: the schema resolution and field composition pipeline.
//!
//! Given a skill's action manifest, an optional declarative UI document, and
//! the live shape of list responses, these components deterministically
//! produce renderable form and table specifications, and merge conversational
//! intents into confidence-scored parameter sets.

mod childtab;
mod client;
mod compose;
mod declarative;
mod infer;
mod introspect;
mod live;
mod manifest;
mod registry;
mod resolver;

pub use childtab::{ChildTableDef, ChildTableDetector, RowFieldDef};
pub use client::{ActionClient, CallOutcome, HttpActionClient};
pub use compose::{
    ActionIntent, ClientEntityMatcher, ClientIntentExtractor, CompositionDelta,
    CompositionResolver, EntityMatch, EntityMatcher, IntentExtractor, IntentHint, OverrideMap,
    PageContext, SessionState,
};
pub use declarative::{
    ActionBinding, ComponentKind, DeclarativeUiProvider, EntityDef, FormGroup, ListView,
    LoadState, UiDocument, UiField,
};
pub use infer::{hidden_by_convention, infer_type, TypeInferenceEngine};
pub use introspect::{schema_from_record, ResponseIntrospector};
pub use live::{Backoff, ChannelState, EventFrame, EventTransport, LiveUpdateChannel, SseTransport};
pub use manifest::{ActionKind, ActionManifest, ActionParams, ManifestParamSchemaProvider, ParamSpec};
pub use registry::EntityLookupRegistry;
pub use resolver::{Resolution, SchemaResolver};
