//! Schema engine: loading, normalization, resolution, caching, context views.

pub mod cache;
pub mod context;
pub mod normalize;
pub mod registry;
pub mod resolved;
pub mod store;
pub mod types;

pub use cache::{CacheBackend, CacheBackendError, SchemaCache};
pub use context::{view, Context};
pub use normalize::normalize;
pub use registry::SchemaRegistry;
pub use resolved::{resolve, Field, Relationship, Schema};
pub use store::{SchemaSource, SchemaStore};
pub use types::*;
