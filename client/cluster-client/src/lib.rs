//! Shared entities, manifest parsing and template resolution for the
//! cluster launcher. Depended on by `bin/launcher` and by `lib/collective`
//! for the types that cross the wire (`NodeDescriptor`, `Plan`).

pub mod entities;
pub mod error;
pub mod parsers;
pub mod template;

pub use error::{ManifestError, TemplateError};
pub use template::{TemplateResolver, TemplateValue};
