//! C4: the fetch-decode-execute interpreter.
//!
//! One `match` over `Opcode`, one method per opcode group — the teacher's
//! `vm/exec/{arithmetic,call,jump}.rs` split, collapsed here into
//! `exec_*` methods on `Vm` rather than separate files, since this
//! language's opcode set is far smaller than the teacher's.

pub mod error;

use crate::bytecode::{BytecodeModule, CompiledFunction, Instr, Opcode};
use crate::frame::CallFrame;
use crate::jit::{JitConfig, Profiler, Scheduler};
use crate::memory::Heap;
use crate::stack::OperandStack;
use crate::value::Value;
use error::VMResult;
use std::sync::Arc;

enum StepResult {
    Continue,
    Returned(Value),
}

#[derive(Debug)]
pub struct Vm {
    module: Arc<BytecodeModule>,
    heap: Heap,
    stack: OperandStack,
    frames: Vec<CallFrame>,
    profiler: Arc<Profiler>,
    scheduler: Scheduler,
    config: JitConfig,
}

impl Vm {
    pub fn new(module: Arc<BytecodeModule>) -> Self {
        Self::with_config(module, JitConfig::from_env())
    }

    pub fn with_config(module: Arc<BytecodeModule>, config: JitConfig) -> Self {
        let profiler = Arc::new(Profiler::new(module.functions.len(), config.threshold));
        let scheduler = Scheduler::new(Arc::clone(&module), config);
        Self {
            module,
            heap: Heap::new(),
            stack: OperandStack::new(),
            frames: Vec::new(),
            profiler,
            scheduler,
            config,
        }
    }

    /// Test/embedder hook: number of live heap objects after a run.
    pub fn heap_object_count(&self) -> usize {
        self.heap.live_object_count()
    }

    /// Test/embedder hook: read one element out of an `ArrayRef` a call
    /// returned, without going through bytecode.
    pub fn array_element_int(&self, array: Value, index: i64) -> Result<i64, VMResult> {
        self.heap.array_load_int(array, index)
    }

    /// Test/embedder hook: an `ArrayRef`'s length, without going through
    /// bytecode.
    pub fn array_len(&self, array: Value) -> Result<u32, VMResult> {
        self.heap.array_size(array)
    }

    /// Test/embedder hook: release an `ArrayRef` a caller is done with, so
    /// `heap_object_count` reflects true liveness after inspecting a result.
    pub fn release_array(&mut self, array: Value) -> Result<(), VMResult> {
        self.heap.release(array)
    }

    /// Test/embedder hook: has the background scheduler published a native
    /// executor for `func_index` yet?
    pub fn is_compiled(&self, func_index: u32) -> bool {
        self.scheduler.lookup(func_index).is_some()
    }

    /// Back door for the JIT's FFI trampolines (`jit/executor_ffi.rs`),
    /// which only hold the `Vm` as an opaque `i64` pointer and need the
    /// heap and the function table to marshal array values and cooperative
    /// calls correctly.
    pub(crate) fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub(crate) fn module(&self) -> &BytecodeModule {
        &self.module
    }

    /// Run the module's entry point to completion.
    pub fn run(&mut self) -> VMResult {
        match self.call_function(self.module.entry_point, Vec::new()) {
            Ok(_) => VMResult::Success,
            Err(e) => e,
        }
    }

    /// Call `func_index` with `args` and return its result (`Value::Void`
    /// for a void function). The single call surface shared by top-level
    /// `run`, the interpreter's own `CALL` handling, and a compiled
    /// function's cooperative call back into the VM (spec.md §4.4, §4.6).
    ///
    /// Drives a flat `Vec<CallFrame>` through one iterative dispatch loop
    /// (`run_frames`) rather than recursing at the Rust level for nested
    /// interpreted calls — a guest program's call depth is bounded only by
    /// `frames`' heap allocation, not the host stack (spec.md §4.4).
    pub fn call_function(&mut self, func_index: u32, args: Vec<Value>) -> Result<Value, VMResult> {
        let base_depth = self.frames.len();
        match self.dispatch_call(func_index, args, None, false)? {
            Some(v) => Ok(v),
            None => self.run_frames().map_err(|e| {
                self.unwind_to(base_depth);
                e
            }),
        }
    }

    /// Resolve `func_index` against the profiler/scheduler and either run it
    /// natively to completion (already compiled: `Some(value)`) or push a
    /// new interpreted frame for a `run_frames` loop to pick up next
    /// (`None`). Shared by `call_function` (`return_address: None`) and
    /// `exec_call` (`return_address: Some(pc_after_call)`).
    fn dispatch_call(
        &mut self,
        func_index: u32,
        args: Vec<Value>,
        return_address: Option<u32>,
        push_result: bool,
    ) -> Result<Option<Value>, VMResult> {
        let function = self
            .module
            .function(func_index)
            .ok_or(VMResult::InvalidFunctionIndex)?;
        if function.arity as usize != args.len() {
            return Err(VMResult::InvalidValueType);
        }

        let count = self.profiler.record_call(func_index);
        if self.config.enabled && self.profiler.is_hot(count) {
            self.scheduler.request_compile(func_index);
        }

        if let Some(executor) = self.scheduler.lookup(func_index) {
            return executor.execute(self, &args).map(Some);
        }

        let mut frame = CallFrame::new(function, return_address, push_result);
        for (i, v) in args.into_iter().enumerate() {
            frame.locals.set_move(&mut self.heap, i as u32, v)?;
        }
        self.frames.push(frame);
        Ok(None)
    }

    /// Step until the frame `call_function` just pushed (`return_address:
    /// None`) finishes. Every nested interpreted `CALL` pushes its own
    /// `return_address: Some(..)` frame onto the same `frames` stack and is
    /// unwound by `finish_frame` restoring the caller's `pc`, so this loop
    /// never recurses for guest-level recursion.
    fn run_frames(&mut self) -> Result<Value, VMResult> {
        loop {
            match self.step()? {
                StepResult::Continue => continue,
                StepResult::Returned(v) => return Ok(v),
            }
        }
    }

    /// After an error aborts a call chain partway through, release the
    /// locals of every frame this `call_function` invocation is responsible
    /// for (everything above `base_depth`) so a trap never leaks the heap
    /// references still held by in-flight locals.
    fn unwind_to(&mut self, base_depth: usize) {
        while self.frames.len() > base_depth {
            let Some(mut frame) = self.frames.pop() else {
                break;
            };
            let _ = frame.locals.clear_and_release_all(&mut self.heap);
        }
    }

    /// Pop the finishing frame, release its locals, and either restore the
    /// caller's `pc` and continue (`return_address: Some`) or hand the
    /// value back to whichever Rust caller is running this loop
    /// (`return_address: None`) (spec.md §4.4: "RETURN restores caller PC
    /// from `return_address`").
    fn finish_frame(&mut self, value: Value) -> Result<StepResult, VMResult> {
        let mut frame = self.frames.pop().ok_or(VMResult::InternalError)?;
        frame.locals.clear_and_release_all(&mut self.heap)?;
        match frame.return_address {
            Some(addr) => {
                let caller = self.frames.last_mut().ok_or(VMResult::InternalError)?;
                caller.pc = addr;
                if frame.push_result {
                    self.stack.push_move(value);
                }
                Ok(StepResult::Continue)
            }
            None => Ok(StepResult::Returned(value)),
        }
    }

    fn fetch(&mut self) -> Result<(Instr, u32), VMResult> {
        let frame = self.frames.last_mut().ok_or(VMResult::InternalError)?;
        let pc = frame.pc;
        let idx = (pc / 4) as usize;
        let instr = match frame.function.code.get(idx) {
            Some(&instr) => instr,
            // spec.md §4.4: falling off the end of a function's code is an
            // implicit RETURN_VOID for any frame, regardless of its
            // declared return type. `codegen_ast.rs` already appends one
            // explicitly, so this only fires for a hand-built or malformed
            // module whose code ends one instruction short.
            None if idx == frame.function.code.len() => Instr::new(Opcode::ReturnVoid, 0),
            None => return Err(VMResult::InvalidOpcode),
        };
        frame.pc = pc + 4;
        Ok((instr, pc))
    }

    fn step(&mut self) -> Result<StepResult, VMResult> {
        let (instr, pc) = self.fetch()?;
        use Opcode::*;
        match instr.opcode {
            LoadIntConst | LoadFloatConst | LoadTrue | LoadFalse => self.exec_const(instr),
            LoadLocal | StoreLocal => self.exec_local(instr),
            AddInt | SubInt | MulInt | DivInt | ModInt | NegInt => self.exec_int_arith(instr),
            AddFloat | SubFloat | MulFloat | DivFloat | NegFloat => self.exec_float_arith(instr),
            EqInt | NeInt | LtInt | LeInt | GtInt | GeInt => self.exec_int_cmp(instr),
            EqFloat | NeFloat | LtFloat | LeFloat | GtFloat | GeFloat => self.exec_float_cmp(instr),
            And | Or | Not => self.exec_logical(instr),
            Jump | JumpIfFalse | JumpIfTrue => self.exec_jump(instr, pc),
            Call => self.exec_call(instr),
            Return => {
                let v = self.stack.pop_move()?;
                self.finish_frame(v)
            }
            ReturnVoid => self.finish_frame(Value::Void),
            Pop => {
                self.stack.pop_drop(&mut self.heap)?;
                Ok(StepResult::Continue)
            }
            NewIntArray | NewFloatArray | NewBoolArray => self.exec_new_array(instr),
            ArrayLen => self.exec_array_len(),
            IntArrayLoad | FloatArrayLoad | BoolArrayLoad => self.exec_array_load(instr),
            IntArrayStore | FloatArrayStore | BoolArrayStore => self.exec_array_store(instr),
            Print => self.exec_print(),
            PrintArray => self.exec_print_array(),
        }
    }

    fn exec_const(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        let value = match instr.opcode {
            Opcode::LoadIntConst => {
                let v = *self
                    .module
                    .int_constants
                    .get(instr.operand as usize)
                    .ok_or(VMResult::InvalidConstantIndex)?;
                Value::Int(v)
            }
            Opcode::LoadFloatConst => {
                let v = *self
                    .module
                    .float_constants
                    .get(instr.operand as usize)
                    .ok_or(VMResult::InvalidConstantIndex)?;
                Value::Float(v)
            }
            Opcode::LoadTrue => Value::Bool(true),
            Opcode::LoadFalse => Value::Bool(false),
            _ => return Err(VMResult::InternalError),
        };
        self.stack.push_move(value);
        Ok(StepResult::Continue)
    }

    fn exec_local(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        match instr.opcode {
            Opcode::LoadLocal => {
                let frame = self.frames.last_mut().ok_or(VMResult::InternalError)?;
                let v = frame.locals.get_copy(&mut self.heap, instr.operand as u32)?;
                self.stack.push_move(v);
            }
            Opcode::StoreLocal => {
                let v = self.stack.pop_move()?;
                self.frames
                    .last_mut()
                    .ok_or(VMResult::InternalError)?
                    .locals
                    .set_move(&mut self.heap, instr.operand as u32, v)?;
            }
            _ => return Err(VMResult::InternalError),
        }
        Ok(StepResult::Continue)
    }

    fn pop_int(&mut self) -> Result<i64, VMResult> {
        self.stack.pop_move()?.as_int().ok_or(VMResult::InvalidValueType)
    }

    fn pop_float(&mut self) -> Result<f64, VMResult> {
        self.stack.pop_move()?.as_float().ok_or(VMResult::InvalidValueType)
    }

    fn pop_bool(&mut self) -> Result<bool, VMResult> {
        self.stack.pop_move()?.as_bool().ok_or(VMResult::InvalidValueType)
    }

    fn exec_int_arith(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        if instr.opcode == Opcode::NegInt {
            let a = self.pop_int()?;
            self.stack.push_move(Value::Int(-a));
            return Ok(StepResult::Continue);
        }
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        let result = match instr.opcode {
            Opcode::AddInt => a.wrapping_add(b),
            Opcode::SubInt => a.wrapping_sub(b),
            Opcode::MulInt => a.wrapping_mul(b),
            Opcode::DivInt => {
                if b == 0 {
                    return Err(VMResult::DivisionByZero);
                }
                a.wrapping_div(b)
            }
            Opcode::ModInt => {
                if b == 0 {
                    return Err(VMResult::DivisionByZero);
                }
                a.wrapping_rem(b)
            }
            _ => return Err(VMResult::InternalError),
        };
        self.stack.push_move(Value::Int(result));
        Ok(StepResult::Continue)
    }

    fn exec_float_arith(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        if instr.opcode == Opcode::NegFloat {
            let a = self.pop_float()?;
            self.stack.push_move(Value::Float(-a));
            return Ok(StepResult::Continue);
        }
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        let result = match instr.opcode {
            Opcode::AddFloat => a + b,
            Opcode::SubFloat => a - b,
            Opcode::MulFloat => a * b,
            Opcode::DivFloat => a / b,
            _ => return Err(VMResult::InternalError),
        };
        self.stack.push_move(Value::Float(result));
        Ok(StepResult::Continue)
    }

    fn exec_int_cmp(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        let result = match instr.opcode {
            Opcode::EqInt => a == b,
            Opcode::NeInt => a != b,
            Opcode::LtInt => a < b,
            Opcode::LeInt => a <= b,
            Opcode::GtInt => a > b,
            Opcode::GeInt => a >= b,
            _ => return Err(VMResult::InternalError),
        };
        self.stack.push_move(Value::Bool(result));
        Ok(StepResult::Continue)
    }

    fn exec_float_cmp(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        let result = match instr.opcode {
            Opcode::EqFloat => a == b,
            Opcode::NeFloat => a != b,
            Opcode::LtFloat => a < b,
            Opcode::LeFloat => a <= b,
            Opcode::GtFloat => a > b,
            Opcode::GeFloat => a >= b,
            _ => return Err(VMResult::InternalError),
        };
        self.stack.push_move(Value::Bool(result));
        Ok(StepResult::Continue)
    }

    fn exec_logical(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        if instr.opcode == Opcode::Not {
            let a = self.pop_bool()?;
            self.stack.push_move(Value::Bool(!a));
            return Ok(StepResult::Continue);
        }
        let b = self.pop_bool()?;
        let a = self.pop_bool()?;
        let result = match instr.opcode {
            Opcode::And => a && b,
            Opcode::Or => a || b,
            _ => return Err(VMResult::InternalError),
        };
        self.stack.push_move(Value::Bool(result));
        Ok(StepResult::Continue)
    }

    fn exec_jump(&mut self, instr: Instr, pc: u32) -> Result<StepResult, VMResult> {
        let take = match instr.opcode {
            Opcode::Jump => true,
            Opcode::JumpIfFalse => !self.pop_bool()?,
            Opcode::JumpIfTrue => self.pop_bool()?,
            _ => return Err(VMResult::InternalError),
        };
        if take {
            let target = instr.jump_target(pc);
            let frame = self.frames.last_mut().ok_or(VMResult::InternalError)?;
            if target < 0 || target % 4 != 0 || (target as u32) as usize / 4 > frame.function.code.len() {
                return Err(VMResult::InvalidOpcode);
            }
            frame.pc = target as u32;
        }
        Ok(StepResult::Continue)
    }

    fn exec_call(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        let func_index = instr.operand as u32;
        let callee = self
            .module
            .function(func_index)
            .ok_or(VMResult::InvalidFunctionIndex)?;
        let mut args = Vec::with_capacity(callee.arity as usize);
        for _ in 0..callee.arity {
            args.push(self.stack.pop_move()?);
        }
        args.reverse();

        // `fetch` already advanced the caller's `pc` past this `CALL`, so
        // it already holds the byte offset to resume at (spec.md §4.4:
        // `return_address = caller.pc + 4`).
        let return_address = self.frames.last().ok_or(VMResult::InternalError)?.pc;
        if let Some(v) =
            self.dispatch_call(func_index, args, Some(return_address), callee.has_return_value)?
        {
            if callee.has_return_value {
                self.stack.push_move(v);
            }
        }
        Ok(StepResult::Continue)
    }

    fn exec_new_array(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        let size = self.pop_int()?;
        let value = match instr.opcode {
            Opcode::NewIntArray => self.heap.new_int_array(size)?,
            Opcode::NewFloatArray => self.heap.new_float_array(size)?,
            Opcode::NewBoolArray => self.heap.new_bool_array(size)?,
            _ => return Err(VMResult::InternalError),
        };
        self.stack.push_move(value);
        Ok(StepResult::Continue)
    }

    fn exec_array_len(&mut self) -> Result<StepResult, VMResult> {
        let arr = self.stack.pop_move()?;
        let len = self.heap.array_size(arr)?;
        self.heap.release(arr)?;
        self.stack.push_move(Value::Int(len as i64));
        Ok(StepResult::Continue)
    }

    fn exec_array_load(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        let index = self.pop_int()?;
        let arr = self.stack.pop_move()?;
        let value = match instr.opcode {
            Opcode::IntArrayLoad => Value::Int(self.heap.array_load_int(arr, index)?),
            Opcode::FloatArrayLoad => Value::Float(self.heap.array_load_float(arr, index)?),
            Opcode::BoolArrayLoad => Value::Bool(self.heap.array_load_bool(arr, index)?),
            _ => return Err(VMResult::InternalError),
        };
        self.heap.release(arr)?;
        self.stack.push_move(value);
        Ok(StepResult::Continue)
    }

    fn exec_array_store(&mut self, instr: Instr) -> Result<StepResult, VMResult> {
        let value = self.stack.pop_move()?;
        let index = self.pop_int()?;
        let arr = self.stack.pop_move()?;
        match instr.opcode {
            Opcode::IntArrayStore => {
                let v = value.as_int().ok_or(VMResult::InvalidValueType)?;
                self.heap.array_store_int(arr, index, v)?;
            }
            Opcode::FloatArrayStore => {
                let v = value.as_float().ok_or(VMResult::InvalidValueType)?;
                self.heap.array_store_float(arr, index, v)?;
            }
            Opcode::BoolArrayStore => {
                let v = value.as_bool().ok_or(VMResult::InvalidValueType)?;
                self.heap.array_store_bool(arr, index, v)?;
            }
            _ => return Err(VMResult::InternalError),
        }
        self.heap.release(arr)?;
        Ok(StepResult::Continue)
    }

    fn exec_print(&mut self) -> Result<StepResult, VMResult> {
        let v = self.stack.pop_move()?;
        print!("{v}");
        self.heap.release(v)?;
        Ok(StepResult::Continue)
    }

    fn exec_print_array(&mut self) -> Result<StepResult, VMResult> {
        let v = self.stack.pop_move()?;
        print!("{}", self.heap.array_display(v)?);
        self.heap.release(v)?;
        Ok(StepResult::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ConstantPoolBuilder;

    fn module_with(code: Vec<Instr>, int_consts: Vec<i64>) -> Arc<BytecodeModule> {
        let mut pool = ConstantPoolBuilder::new();
        for c in &int_consts {
            pool.intern_int(*c);
        }
        let (ints, floats) = pool.into_pools();
        Arc::new(BytecodeModule {
            int_constants: ints,
            float_constants: floats,
            functions: vec![Arc::new(CompiledFunction {
                name: "main".into(),
                arity: 0,
                locals_count: 0,
                has_return_value: false,
                return_is_array: false,
                local_is_array: Vec::new(),
                code,
            })],
            entry_point: 0,
        })
    }

    fn disabled_config() -> JitConfig {
        JitConfig {
            enabled: false,
            threshold: u64::MAX,
            worker_count: 0,
        }
    }

    #[test]
    fn runs_int_addition_to_completion() {
        let module = module_with(
            vec![
                Instr::new(Opcode::LoadIntConst, 0),
                Instr::new(Opcode::LoadIntConst, 1),
                Instr::new(Opcode::AddInt, 0),
                Instr::new(Opcode::Pop, 0),
                Instr::new(Opcode::ReturnVoid, 0),
            ],
            vec![2, 3],
        );
        let mut vm = Vm::with_config(module, disabled_config());
        assert_eq!(vm.run(), VMResult::Success);
    }

    #[test]
    fn division_by_zero_propagates() {
        let module = module_with(
            vec![
                Instr::new(Opcode::LoadIntConst, 0),
                Instr::new(Opcode::LoadIntConst, 1),
                Instr::new(Opcode::DivInt, 0),
                Instr::new(Opcode::Pop, 0),
                Instr::new(Opcode::ReturnVoid, 0),
            ],
            vec![1, 0],
        );
        let mut vm = Vm::with_config(module, disabled_config());
        assert_eq!(vm.run(), VMResult::DivisionByZero);
    }

    #[test]
    fn backward_jump_executes_loop_body_a_bounded_number_of_times() {
        // locals[0] = 2; while (locals[0] != 0) { locals[0] = locals[0] - 1 }
        let mut pool = ConstantPoolBuilder::new();
        let two = pool.intern_int(2);
        let one = pool.intern_int(1);
        let zero = pool.intern_int(0);
        let (ints, floats) = pool.into_pools();
        let code = vec![
            Instr::new(Opcode::LoadIntConst, two as i32), // 0
            Instr::new(Opcode::StoreLocal, 0),             // 4
            Instr::new(Opcode::LoadLocal, 0),              // 8: loop head
            Instr::new(Opcode::LoadIntConst, zero as i32), // 12
            Instr::new(Opcode::EqInt, 0),                  // 16
            Instr::new(Opcode::JumpIfTrue, 5),             // 20 -> target 20+5*4+4=44 (exit)
            Instr::new(Opcode::LoadLocal, 0),              // 24
            Instr::new(Opcode::LoadIntConst, one as i32),  // 28
            Instr::new(Opcode::SubInt, 0),                 // 32
            Instr::new(Opcode::StoreLocal, 0),             // 36
        ];
        // Instruction at byte 36 must jump back to the loop head (byte 8):
        // target = pc + disp*4 + 4 = 8  =>  disp = (8 - pc - 4) / 4, pc = 36.
        let mut code = code;
        code.push(Instr::new(Opcode::Jump, (8i32 - 40 - 4) / 4)); // pc=40
        code.push(Instr::new(Opcode::ReturnVoid, 0));

        let module = Arc::new(BytecodeModule {
            int_constants: ints,
            float_constants: floats,
            functions: vec![Arc::new(CompiledFunction {
                name: "main".into(),
                arity: 0,
                locals_count: 1,
                has_return_value: false,
                return_is_array: false,
                local_is_array: vec![false],
                code,
            })],
            entry_point: 0,
        });
        let mut vm = Vm::with_config(module, disabled_config());
        assert_eq!(vm.run(), VMResult::Success);
    }

    #[test]
    fn array_round_trip_through_interpreter() {
        let mut pool = ConstantPoolBuilder::new();
        pool.intern_int(3); // size
        pool.intern_int(0); // index
        pool.intern_int(42); // value
        let (ints, floats) = pool.into_pools();
        let code = vec![
            Instr::new(Opcode::LoadIntConst, 0),     // size=3
            Instr::new(Opcode::NewIntArray, 0),
            Instr::new(Opcode::LoadIntConst, 1),     // index=0
            Instr::new(Opcode::LoadIntConst, 2),     // value=42
            Instr::new(Opcode::IntArrayStore, 0),
            Instr::new(Opcode::ReturnVoid, 0),
        ];
        let module = Arc::new(BytecodeModule {
            int_constants: ints,
            float_constants: floats,
            functions: vec![Arc::new(CompiledFunction {
                name: "main".into(),
                arity: 0,
                locals_count: 0,
                has_return_value: false,
                return_is_array: false,
                local_is_array: Vec::new(),
                code,
            })],
            entry_point: 0,
        });
        let mut vm = Vm::with_config(module, disabled_config());
        assert_eq!(vm.run(), VMResult::Success);
        assert_eq!(vm.heap_object_count(), 0);
    }

    #[test]
    fn stack_underflow_on_malformed_program() {
        let module = module_with(vec![Instr::new(Opcode::AddInt, 0)], vec![]);
        let mut vm = Vm::with_config(module, disabled_config());
        assert_eq!(vm.run(), VMResult::StackUnderflow);
    }
}
