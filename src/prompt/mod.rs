//! Model-family prompt construction

pub mod assembler;
pub mod format;
pub mod persona;

pub use assembler::{PromptAssembler, TurnContent};
pub use format::{FormatTokens, ModelFamily};
pub use persona::{substitute_placeholders, PersonaCard, PersonaContext};
