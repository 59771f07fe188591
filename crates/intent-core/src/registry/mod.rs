//! Registro de handlers por tipo de intent.

pub mod handler;
#[allow(clippy::module_inception)]
pub mod registry;

pub use handler::{FnHandler, HandlerContext, HandlerError, HandlerOutput, IntentHandler};
pub use registry::{HandlerRegistry, RegistryError};
