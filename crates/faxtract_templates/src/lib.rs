//! Template registry.
//!
//! Tenants upload tabular field schemas; the registry parses them into
//! canonical fields with aliases, persists the upload in the object store
//! and the metadata in the record store, and reconciles arbitrary
//! extracted keys onto canonical fields.

mod apply;
mod model;
mod parse;
mod registry;

pub use apply::apply_template;
pub use model::{normalize_key, Template, TemplateField};
pub use parse::parse_template_fields;
pub use registry::{TemplateError, TemplateRegistry};
