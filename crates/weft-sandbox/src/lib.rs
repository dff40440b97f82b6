//! Sandboxed execution of package snippets.
//!
//! A snippet is the body of a function invoked as `function(input, pkg, ...)`
//! where `pkg` (and the package's conventional global names, e.g. `_` for
//! lodash) is bound to the resolved package implementation. Execution happens
//! behind an [`Isolation`](isolation::Isolation) strategy that exchanges exactly
//! one [`StartMessage`] and one [`ResultMessage`].

pub mod executor;
pub mod isolation;
pub mod packages;
pub mod protocol;
pub mod script;
pub mod worker;

pub use executor::{SandboxExecutor, SandboxOutcome, TIMEOUT_MESSAGE};
pub use isolation::{
    InlineIsolation, Isolation, IsolationError, ProcessIsolation, INLINE_THREAD_NAME, WORKER_BIN,
    WORKER_ENV,
};
pub use packages::{default_snippet, PackageBinding, PackageRegistry, IDENTITY_SNIPPET};
pub use protocol::{Limits, ResultMessage, StartMessage};
