//! Built-in plugins that registry configs can refer to by kind.

mod hooks;
mod mirror;
mod validators;

pub use hooks::{DefaultFieldsHook, ProvenanceStampHook};
pub use mirror::MirrorAspectSideEffect;
pub use validators::{ImmutableFieldValidator, RequiredFieldsValidator};
