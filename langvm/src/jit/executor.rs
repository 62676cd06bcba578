//! The boundary a compiled function is invoked across.
//!
//! `Vm::call_function` checks the publish map before falling back to the
//! interpreter; a published entry is any `Arc<dyn CompiledExecutor>`. The
//! cranelift-backed implementation lives in `codegen.rs` — this trait is
//! deliberately codegen-agnostic so `vm/mod.rs` never has to know cranelift
//! exists.

use crate::value::Value;
use crate::vm::error::VMResult;
use crate::vm::Vm;

/// A function specialized to native code by the JIT.
///
/// `execute` receives `&mut Vm` so that a cooperative call (spec.md §4.6:
/// a compiled function calling one that is not itself compiled) can re-enter
/// `Vm::call_function` directly instead of crossing an FFI boundary back
/// into pure-Rust interpretation.
pub trait CompiledExecutor: Send + Sync + std::fmt::Debug {
    fn execute(&self, vm: &mut Vm, args: &[Value]) -> Result<Value, VMResult>;

    /// Name of the function this executor specializes, for logging.
    fn function_name(&self) -> &str;
}
