//! Purpose: Library crate behind the `procbridge` CLI and callee programs.
//! Exports: `api` (stable surface), `core` (resolver, wire codec, bridges, errors).
//! Role: Call a program written for another runtime as a subroutine over stdio JSON lines.
//! Invariants: One child process per call; no state is shared between calls.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod logging;
