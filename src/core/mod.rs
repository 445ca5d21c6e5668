// Core modules implementing launch resolution, the wire codec, both bridges, and errors.
pub mod aggregate;
pub mod caller;
pub mod error;
pub mod launch;
pub mod responder;
pub mod wire;
