//! Purpose: Define the stable public Rust API boundary for procbridge.
//! Exports: Caller and callee bridge types, results, and errors.
//! Role: Public, additive-only surface used by the CLI, the callee binary, and embedders.
//! Invariants: Wire field names and result shapes here are stable once published.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::aggregate::{AggregateResult, aggregate};
pub use crate::core::caller::{CallOptions, Caller};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::launch::{Language, LanguageKind, LaunchSpec, resolve};
pub use crate::core::responder::{ProtocolChannel, Responder, ResponderState, StdoutChannel};
pub use crate::core::wire::{Request, ResponseLine};
