//! Purpose: Install the stderr tracing subscriber shared by the binaries.
//! Exports: `init`.
//! Role: Ambient diagnostics; callee programs must never log to stdout.
//! Invariants: Output goes to stderr only; stdout is reserved for protocol or result JSON.
//! Invariants: `RUST_LOG` overrides the default `warn` filter; repeat calls are no-ops.
use tracing_subscriber::EnvFilter;

pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
