// Sandboxed execution
//
// Routines run inside a private DataFusion session over the in-memory
// snapshot. Only the stage lowerings in `plan` are reachable.

pub mod converter; // ResultTableConverter
pub mod executor; // SandboxedExecutor
pub mod plan; // Stage lowering
pub mod session; // SandboxSessionManager

pub use converter::ResultTableConverter;
pub use executor::{ExecutionLimits, SandboxedExecutor};
pub use session::{SandboxSessionManager, SessionSettings};
