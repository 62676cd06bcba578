//! C5/C6: profile-guided just-in-time compilation.

pub mod codegen;
pub mod executor;
pub mod executor_ffi;
pub mod profiler;
pub mod scheduler;

pub use executor::CompiledExecutor;
pub use profiler::Profiler;
pub use scheduler::{JitConfig, Scheduler};
