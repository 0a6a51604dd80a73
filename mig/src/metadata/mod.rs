//! Metadata models and the metadata-source collaborator surface.

pub mod model;
pub mod source;
pub mod transform;

pub use model::*;
pub use source::MetaSource;
pub use transform::{SchemaTransform, staging_meta};
