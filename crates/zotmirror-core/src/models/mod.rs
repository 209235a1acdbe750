//! Domain models shared across the sync engine

mod library;
mod schema;

pub use library::{Library, LibraryKind};
pub use schema::{CacheValidators, ColumnType, FieldDef, ItemTypeDef, SchemaDefinition};
