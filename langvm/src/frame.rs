//! One activation record on the interpreter's call stack.

use crate::bytecode::CompiledFunction;
use crate::stack::LocalSlots;
use std::sync::Arc;

#[derive(Debug)]
pub struct CallFrame {
    pub function: Arc<CompiledFunction>,
    pub locals: LocalSlots,
    pub pc: u32,
    /// Byte offset in the caller's code to resume at after `RETURN`/
    /// `RETURN_VOID`. `None` for a frame pushed directly by `Vm::call_function`
    /// (the top-level run, or a cooperative call from compiled code) — there
    /// is no caller bytecode to resume, so the interpreter's run loop hands
    /// the value straight back to its Rust caller instead.
    pub return_address: Option<u32>,
    /// Whether finishing this frame should push its return value onto the
    /// caller's operand stack, mirroring the `CALL` site's
    /// `callee.has_return_value` check. Only consulted when
    /// `return_address` is `Some`.
    pub push_result: bool,
}

impl CallFrame {
    pub fn new(function: Arc<CompiledFunction>, return_address: Option<u32>, push_result: bool) -> Self {
        let locals = LocalSlots::new(function.locals_count as usize);
        Self {
            function,
            locals,
            pc: 0,
            return_address,
            push_result,
        }
    }
}
