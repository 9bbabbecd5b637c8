//! Schema layer - declarative entity and relationship definitions
//!
//! Declarations are TOML documents:
//! - `entities/<Type>.toml`: the type name, its table and an ordered `[[properties]]` list
//! - `relationships/<Name>.toml`: kind, junction table and the two endpoints
//!
//! Definitions are validated once when they are loaded, so the rest of the
//! engine can rely on the invariants documented on each type.

pub mod definition;
pub mod source;
pub mod store;

pub use definition::{
    Datatype, Endpoint, EntityDefinition, FieldKind, PropertyDefinition, RelationshipDefinition,
    RelationshipKind, Role, Source, DEFAULT_KEY_WIDTH, DEFAULT_STRING_LEN,
};
pub use source::{DeclarationSource, DirectorySource, StaticManifest};
pub use store::SchemaStore;
