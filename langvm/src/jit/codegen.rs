//! C6: cranelift-backed native code generation.
//!
//! Translation is two-pass, mirroring the teacher's
//! `aot/codegen/cranelift/mod.rs`: a label pass walks the bytecode once to
//! find every jump target and pre-create a cranelift `Block` for it, then an
//! emit pass walks it again building cranelift IR, switching blocks at each
//! previously-discovered target.
//!
//! Only a function whose entire body stays within the int-only-plus-int-array
//! whitelist (spec.md §4.6) is eligible. A compiled function's `CALL` either
//! becomes a direct native call (callee already compiled) or a cooperative
//! call back into `Vm::call_function` through the `langvm_cooperative_call`
//! trampoline — the same "generated code calls an extern symbol for anything
//! it can't inline" shape the teacher uses for `pow`/`fmod`. Int-array
//! `NEW`/`LEN`/`LOAD`/`STORE` follow the same trampoline shape rather than
//! duplicating `Heap`'s bounds/refcount logic in cranelift IR.

use crate::bytecode::{BytecodeModule, CompiledFunction, Opcode};
use crate::jit::executor::CompiledExecutor;
use crate::value::Value;
use crate::vm::error::VMResult;
use crate::vm::Vm;
use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{
    types, AbiParam, Block, FuncRef, InstBuilder, MemFlags, StackSlot, StackSlotData,
    StackSlotKind, Value as ClifValue,
};
use cranelift_codegen::isa::{CallConv, TargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// The host ISA and its flags are identical for every compile this process
/// ever does; building them is the expensive, one-time part of setting up
/// cranelift, so it happens once and is shared (mirrors the teacher's
/// `Lazy`-cached base-library setup in `base_loader.rs`).
static SHARED_ISA: Lazy<Arc<dyn TargetIsa>> = Lazy::new(|| {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("use_colocated_libcalls", "false")
        .expect("valid cranelift flag name/value");
    flag_builder
        .set("is_pic", "false")
        .expect("valid cranelift flag name/value");
    let isa_builder = cranelift_native::builder().expect("host architecture supported by cranelift-native");
    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .expect("isa construction for the host target")
});

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("function `{0}` uses an operation outside the JIT's int-only whitelist")]
    NotWhitelisted(String),
    #[error("cranelift codegen error: {0}")]
    Codegen(String),
    #[error("cranelift module error: {0}")]
    Module(String),
    #[error("internal codegen invariant violated: {0}")]
    Internal(String),
}

/// True iff every instruction in `f` is translatable by this backend: int
/// arithmetic/comparison, locals, jumps, calls, returns, `POP`, and int-only
/// array operations. Any float, bool, or non-int-array opcode disqualifies
/// the whole function — it stays interpreted forever (spec.md §4.6:
/// non-fatal, permanent fallback).
pub fn is_whitelisted(f: &CompiledFunction) -> bool {
    f.code.iter().all(|instr| {
        matches!(
            instr.opcode,
            Opcode::LoadIntConst
                | Opcode::LoadLocal
                | Opcode::StoreLocal
                | Opcode::AddInt
                | Opcode::SubInt
                | Opcode::MulInt
                | Opcode::DivInt
                | Opcode::ModInt
                | Opcode::NegInt
                | Opcode::EqInt
                | Opcode::NeInt
                | Opcode::LtInt
                | Opcode::LeInt
                | Opcode::GtInt
                | Opcode::GeInt
                | Opcode::Jump
                | Opcode::JumpIfFalse
                | Opcode::JumpIfTrue
                | Opcode::Call
                | Opcode::Return
                | Opcode::ReturnVoid
                | Opcode::Pop
                | Opcode::NewIntArray
                | Opcode::ArrayLen
                | Opcode::IntArrayLoad
                | Opcode::IntArrayStore
        )
    })
}

/// Pop one value off the shadow operand stack. A malformed module could
/// reach this with an empty stack; codegen can't trust the same semantic
/// analysis the interpreter does, so this is a `CompileError`, not a panic.
fn pop1(stack: &mut Vec<ClifValue>) -> Result<ClifValue, CompileError> {
    stack
        .pop()
        .ok_or_else(|| CompileError::Internal("shadow operand stack underflow".into()))
}

/// Pop the right then left operand off the shadow operand stack, in the
/// order cranelift's two-operand instructions expect.
fn pop2(stack: &mut Vec<ClifValue>) -> Result<(ClifValue, ClifValue), CompileError> {
    let b = pop1(stack)?;
    let a = pop1(stack)?;
    Ok((a, b))
}

/// Emit an `icmp` and widen its boolean result to `I64` so every shadow
/// stack slot stays uniformly typed.
fn push_cmp(
    builder: &mut FunctionBuilder,
    stack: &mut Vec<ClifValue>,
    cc: IntCC,
) -> Result<(), CompileError> {
    let (a, b) = pop2(stack)?;
    let cmp = builder.ins().icmp(cc, a, b);
    stack.push(builder.ins().uextend(types::I64, cmp));
    Ok(())
}

/// Check an FFI trampoline's `status` out-param in `status_slot`: nonzero
/// releases every array-typed local still live (mirroring the interpreter's
/// `unwind_to` on an aborted call chain, so a trap partway through a
/// function doesn't leak the heap references its locals hold), writes the
/// status through `var_status_ptr`, and returns — the only way any opcode in
/// a compiled function fails. Leaves the builder positioned in the
/// success-path block. `status_slot` is reused as the scratch slot for the
/// release calls; safe since `status` is already captured into an SSA value
/// before the branch.
#[allow(clippy::too_many_arguments)]
fn check_ffi_status(
    builder: &mut FunctionBuilder,
    status_slot: StackSlot,
    var_status_ptr: Variable,
    release_callee: FuncRef,
    vmctx: ClifValue,
    local_is_array: &[bool],
) {
    let status = builder.ins().stack_load(types::I32, status_slot, 0);
    let failed = builder.ins().icmp_imm(IntCC::NotEqual, status, 0);
    let err_block = builder.create_block();
    let ok_block = builder.create_block();
    builder.ins().brif(failed, err_block, &[], ok_block, &[]);
    builder.switch_to_block(err_block);
    release_array_locals(builder, release_callee, vmctx, status_slot, local_is_array);
    let status_ptr = builder.use_var(var_status_ptr);
    builder
        .ins()
        .store(MemFlags::trusted(), status, status_ptr, 0);
    builder.ins().return_(&[]);
    builder.switch_to_block(ok_block);
}

/// Release every array-typed local's heap reference before a return,
/// mirroring the interpreter's `LocalSlots::clear_and_release_all`. Each
/// call's own status is discarded into `scratch_status_slot`: array locals
/// never held an invalid id here short of an internal bug, and unconditional
/// release-at-exit is what keeps this branch-free (spec.md §4.6 expansion).
fn release_array_locals(
    builder: &mut FunctionBuilder,
    release_callee: FuncRef,
    vmctx: ClifValue,
    scratch_status_slot: StackSlot,
    local_is_array: &[bool],
) {
    for (i, &is_array) in local_is_array.iter().enumerate() {
        if !is_array {
            continue;
        }
        let v = builder.use_var(Variable::new(i));
        let status_addr = builder
            .ins()
            .stack_addr(types::I64, scratch_status_slot, 0);
        builder.ins().call(release_callee, &[vmctx, v, status_addr]);
    }
}

/// Scan a whitelisted function's code once, collecting every byte offset a
/// jump instruction targets. Each becomes a cranelift `Block` boundary in
/// the emit pass.
fn collect_jump_targets(f: &CompiledFunction) -> BTreeSet<u32> {
    let mut targets = BTreeSet::new();
    for (i, instr) in f.code.iter().enumerate() {
        if matches!(
            instr.opcode,
            Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue
        ) {
            let pc = (i as u32) * 4;
            let target = instr.jump_target(pc);
            if target >= 0 {
                targets.insert(target as u32);
            }
        }
    }
    targets
}

/// Compiles whitelisted functions to native code via `cranelift-jit`,
/// registering the `langvm_runtime` intrinsics and the cooperative-call /
/// array trampolines as callable symbols.
pub struct CraneliftCompiler {
    module: Arc<BytecodeModule>,
}

impl std::fmt::Debug for CraneliftCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CraneliftCompiler").finish_non_exhaustive()
    }
}

impl CraneliftCompiler {
    pub fn new(module: Arc<BytecodeModule>) -> Self {
        Self { module }
    }

    pub fn compile(&self, func_index: u32) -> Result<Arc<dyn CompiledExecutor>, CompileError> {
        let func = self.module.function(func_index).ok_or_else(|| {
            CompileError::Internal(format!("function index {func_index} not found in module"))
        })?;

        if !is_whitelisted(&func) {
            return Err(CompileError::NotWhitelisted(func.name.clone()));
        }

        let isa = Arc::clone(&SHARED_ISA);
        let mut jit_builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        jit_builder.symbol(
            "langvm_checked_div_i64",
            langvm_runtime::intrinsics::langvm_checked_div_i64 as *const u8,
        );
        jit_builder.symbol(
            "langvm_checked_mod_i64",
            langvm_runtime::intrinsics::langvm_checked_mod_i64 as *const u8,
        );
        jit_builder.symbol(
            "langvm_cooperative_call",
            super::executor_ffi::langvm_cooperative_call as *const u8,
        );
        jit_builder.symbol(
            "langvm_array_new_int",
            super::executor_ffi::langvm_array_new_int as *const u8,
        );
        jit_builder.symbol(
            "langvm_array_len",
            super::executor_ffi::langvm_array_len as *const u8,
        );
        jit_builder.symbol(
            "langvm_array_load_int",
            super::executor_ffi::langvm_array_load_int as *const u8,
        );
        jit_builder.symbol(
            "langvm_array_store_int",
            super::executor_ffi::langvm_array_store_int as *const u8,
        );
        jit_builder.symbol(
            "langvm_array_retain",
            super::executor_ffi::langvm_array_retain as *const u8,
        );
        jit_builder.symbol(
            "langvm_array_release",
            super::executor_ffi::langvm_array_release as *const u8,
        );
        let mut jit_module = JITModule::new(jit_builder);

        let mut sig = jit_module.make_signature();
        // (vm_ctx: i64, args_ptr: i64, status_out: *mut i32, result_out: *mut i64) -> ().
        sig.params.push(AbiParam::new(types::I64)); // vm_ctx
        sig.params.push(AbiParam::new(types::I64)); // args ptr
        sig.params.push(AbiParam::new(types::I64)); // *mut i32 status out
        sig.params.push(AbiParam::new(types::I64)); // *mut i64 result out
        sig.call_conv = CallConv::SystemV;

        let func_id = jit_module
            .declare_function(&func.name, Linkage::Export, &sig)
            .map_err(|e| CompileError::Module(e.to_string()))?;

        let mut coop_sig = jit_module.make_signature();
        coop_sig.params.push(AbiParam::new(types::I64)); // vm_ctx
        coop_sig.params.push(AbiParam::new(types::I32)); // func_index
        coop_sig.params.push(AbiParam::new(types::I64)); // args_ptr
        coop_sig.params.push(AbiParam::new(types::I32)); // args_len
        coop_sig.params.push(AbiParam::new(types::I64)); // status out
        coop_sig.params.push(AbiParam::new(types::I64)); // result out
        coop_sig.call_conv = CallConv::SystemV;
        let coop_func_id = jit_module
            .declare_function("langvm_cooperative_call", Linkage::Import, &coop_sig)
            .map_err(|e| CompileError::Module(e.to_string()))?;

        let mut checked_sig = jit_module.make_signature();
        checked_sig.params.push(AbiParam::new(types::I64));
        checked_sig.params.push(AbiParam::new(types::I64));
        checked_sig.params.push(AbiParam::new(types::I64)); // status ptr
        checked_sig.returns.push(AbiParam::new(types::I64));
        checked_sig.call_conv = CallConv::SystemV;
        let div_func_id = jit_module
            .declare_function("langvm_checked_div_i64", Linkage::Import, &checked_sig)
            .map_err(|e| CompileError::Module(e.to_string()))?;
        let mod_func_id = jit_module
            .declare_function("langvm_checked_mod_i64", Linkage::Import, &checked_sig)
            .map_err(|e| CompileError::Module(e.to_string()))?;

        // langvm_array_new_int / langvm_array_len(vm_ctx, value, status_ptr) -> i64
        let mut array_unary_sig = jit_module.make_signature();
        array_unary_sig.params.push(AbiParam::new(types::I64));
        array_unary_sig.params.push(AbiParam::new(types::I64));
        array_unary_sig.params.push(AbiParam::new(types::I64));
        array_unary_sig.returns.push(AbiParam::new(types::I64));
        array_unary_sig.call_conv = CallConv::SystemV;
        let array_new_func_id = jit_module
            .declare_function("langvm_array_new_int", Linkage::Import, &array_unary_sig)
            .map_err(|e| CompileError::Module(e.to_string()))?;
        let array_len_func_id = jit_module
            .declare_function("langvm_array_len", Linkage::Import, &array_unary_sig)
            .map_err(|e| CompileError::Module(e.to_string()))?;

        // langvm_array_load_int(vm_ctx, array_ref, index, status_ptr) -> i64
        let mut array_load_sig = jit_module.make_signature();
        array_load_sig.params.push(AbiParam::new(types::I64));
        array_load_sig.params.push(AbiParam::new(types::I64));
        array_load_sig.params.push(AbiParam::new(types::I64));
        array_load_sig.params.push(AbiParam::new(types::I64));
        array_load_sig.returns.push(AbiParam::new(types::I64));
        array_load_sig.call_conv = CallConv::SystemV;
        let array_load_func_id = jit_module
            .declare_function("langvm_array_load_int", Linkage::Import, &array_load_sig)
            .map_err(|e| CompileError::Module(e.to_string()))?;

        // langvm_array_store_int(vm_ctx, array_ref, index, value, status_ptr) -> ()
        let mut array_store_sig = jit_module.make_signature();
        array_store_sig.params.push(AbiParam::new(types::I64));
        array_store_sig.params.push(AbiParam::new(types::I64));
        array_store_sig.params.push(AbiParam::new(types::I64));
        array_store_sig.params.push(AbiParam::new(types::I64));
        array_store_sig.params.push(AbiParam::new(types::I64));
        array_store_sig.call_conv = CallConv::SystemV;
        let array_store_func_id = jit_module
            .declare_function("langvm_array_store_int", Linkage::Import, &array_store_sig)
            .map_err(|e| CompileError::Module(e.to_string()))?;

        // langvm_array_retain / langvm_array_release(vm_ctx, array_ref, status_ptr) -> ()
        let mut array_rc_sig = jit_module.make_signature();
        array_rc_sig.params.push(AbiParam::new(types::I64));
        array_rc_sig.params.push(AbiParam::new(types::I64));
        array_rc_sig.params.push(AbiParam::new(types::I64));
        array_rc_sig.call_conv = CallConv::SystemV;
        let array_retain_func_id = jit_module
            .declare_function("langvm_array_retain", Linkage::Import, &array_rc_sig)
            .map_err(|e| CompileError::Module(e.to_string()))?;
        let array_release_func_id = jit_module
            .declare_function("langvm_array_release", Linkage::Import, &array_rc_sig)
            .map_err(|e| CompileError::Module(e.to_string()))?;

        let mut ctx = Context::new();
        ctx.func.signature = sig;
        let mut fb_ctx = FunctionBuilderContext::new();

        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
            let jump_targets = collect_jump_targets(&func);
            let mut blocks: HashMap<u32, Block> = HashMap::new();
            let entry_block = builder.create_block();
            for &pc in &jump_targets {
                blocks.insert(pc, builder.create_block());
            }
            builder.append_block_params_for_function_params(entry_block);
            builder.switch_to_block(entry_block);

            let locals_count = func.locals_count;
            let var_vmctx = Variable::new(locals_count as usize);
            let var_status_ptr = Variable::new(locals_count as usize + 1);
            let var_result_ptr = Variable::new(locals_count as usize + 2);
            builder.declare_var(var_vmctx, types::I64);
            builder.declare_var(var_status_ptr, types::I64);
            builder.declare_var(var_result_ptr, types::I64);
            for i in 0..locals_count {
                builder.declare_var(Variable::new(i as usize), types::I64);
            }

            let entry_params = builder.block_params(entry_block).to_vec();
            let (vmctx_val, args_ptr_val, status_ptr_val, result_ptr_val) = (
                entry_params[0],
                entry_params[1],
                entry_params[2],
                entry_params[3],
            );
            builder.def_var(var_vmctx, vmctx_val);
            builder.def_var(var_status_ptr, status_ptr_val);
            builder.def_var(var_result_ptr, result_ptr_val);
            for i in 0..func.arity {
                let v = builder.ins().load(
                    types::I64,
                    MemFlags::trusted(),
                    args_ptr_val,
                    (i * 8) as i32,
                );
                builder.def_var(Variable::new(i as usize), v);
            }
            for i in func.arity..locals_count {
                let zero = builder.ins().iconst(types::I64, 0);
                builder.def_var(Variable::new(i as usize), zero);
            }

            let coop_callee = jit_module.declare_func_in_func(coop_func_id, builder.func);
            let div_callee = jit_module.declare_func_in_func(div_func_id, builder.func);
            let mod_callee = jit_module.declare_func_in_func(mod_func_id, builder.func);
            let array_new_callee = jit_module.declare_func_in_func(array_new_func_id, builder.func);
            let array_len_callee = jit_module.declare_func_in_func(array_len_func_id, builder.func);
            let array_load_callee =
                jit_module.declare_func_in_func(array_load_func_id, builder.func);
            let array_store_callee =
                jit_module.declare_func_in_func(array_store_func_id, builder.func);
            let retain_callee = jit_module.declare_func_in_func(array_retain_func_id, builder.func);
            let release_callee =
                jit_module.declare_func_in_func(array_release_func_id, builder.func);

            let max_call_args = func
                .code
                .iter()
                .filter(|i| i.opcode == Opcode::Call)
                .map(|i| {
                    self.module
                        .function(i.operand as u32)
                        .map(|f| f.arity)
                        .unwrap_or(0)
                })
                .max()
                .unwrap_or(0);
            let ffi_status_slot = builder
                .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, 4, 0));
            let call_status_slot = builder
                .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, 4, 0));
            let call_result_slot = builder
                .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, 8, 0));
            let call_args_slot = (max_call_args > 0).then(|| {
                builder.create_sized_stack_slot(StackSlotData::new(
                    StackSlotKind::ExplicitSlot,
                    max_call_args * 8,
                    0,
                ))
            });

            let mut stack: Vec<ClifValue> = Vec::new();
            let mut block_open = true;

            for (i, instr) in func.code.iter().enumerate() {
                let pc = (i as u32) * 4;
                if pc != 0 {
                    if let Some(&block) = blocks.get(&pc) {
                        if block_open {
                            builder.ins().jump(block, &[]);
                        }
                        builder.switch_to_block(block);
                        block_open = true;
                        stack.clear();
                    }
                }
                if !block_open {
                    continue;
                }

                match instr.opcode {
                    Opcode::LoadIntConst => {
                        let v = self.module.int_constants[instr.operand as usize];
                        stack.push(builder.ins().iconst(types::I64, v));
                    }
                    Opcode::LoadLocal => {
                        let slot = instr.operand as usize;
                        let v = builder.use_var(Variable::new(slot));
                        if func.local_is_array.get(slot).copied().unwrap_or(false) {
                            let vmctx = builder.use_var(var_vmctx);
                            let status_addr =
                                builder.ins().stack_addr(types::I64, ffi_status_slot, 0);
                            builder
                                .ins()
                                .call(retain_callee, &[vmctx, v, status_addr]);
                        }
                        stack.push(v);
                    }
                    Opcode::StoreLocal => {
                        let v = pop1(&mut stack)?;
                        let slot = instr.operand as usize;
                        if func.local_is_array.get(slot).copied().unwrap_or(false) {
                            let old = builder.use_var(Variable::new(slot));
                            let vmctx = builder.use_var(var_vmctx);
                            let status_addr =
                                builder.ins().stack_addr(types::I64, ffi_status_slot, 0);
                            builder
                                .ins()
                                .call(release_callee, &[vmctx, old, status_addr]);
                        }
                        builder.def_var(Variable::new(slot), v);
                    }
                    Opcode::AddInt => {
                        let (a, b) = pop2(&mut stack)?;
                        stack.push(builder.ins().iadd(a, b));
                    }
                    Opcode::SubInt => {
                        let (a, b) = pop2(&mut stack)?;
                        stack.push(builder.ins().isub(a, b));
                    }
                    Opcode::MulInt => {
                        let (a, b) = pop2(&mut stack)?;
                        stack.push(builder.ins().imul(a, b));
                    }
                    Opcode::NegInt => {
                        let a = pop1(&mut stack)?;
                        stack.push(builder.ins().ineg(a));
                    }
                    Opcode::DivInt | Opcode::ModInt => {
                        let (a, b) = pop2(&mut stack)?;
                        let status_addr =
                            builder.ins().stack_addr(types::I64, ffi_status_slot, 0);
                        let callee = if instr.opcode == Opcode::DivInt {
                            div_callee
                        } else {
                            mod_callee
                        };
                        let call = builder.ins().call(callee, &[a, b, status_addr]);
                        let result = builder.inst_results(call)[0];
                        let vmctx = builder.use_var(var_vmctx);
                        check_ffi_status(
                            &mut builder,
                            ffi_status_slot,
                            var_status_ptr,
                            release_callee,
                            vmctx,
                            &func.local_is_array,
                        );
                        stack.push(result);
                    }
                    Opcode::EqInt => push_cmp(&mut builder, &mut stack, IntCC::Equal)?,
                    Opcode::NeInt => push_cmp(&mut builder, &mut stack, IntCC::NotEqual)?,
                    Opcode::LtInt => push_cmp(&mut builder, &mut stack, IntCC::SignedLessThan)?,
                    Opcode::LeInt => {
                        push_cmp(&mut builder, &mut stack, IntCC::SignedLessThanOrEqual)?
                    }
                    Opcode::GtInt => push_cmp(&mut builder, &mut stack, IntCC::SignedGreaterThan)?,
                    Opcode::GeInt => {
                        push_cmp(&mut builder, &mut stack, IntCC::SignedGreaterThanOrEqual)?
                    }
                    Opcode::Jump => {
                        let target = instr.jump_target(pc) as u32;
                        let target_block = blocks[&target];
                        builder.ins().jump(target_block, &[]);
                        block_open = false;
                    }
                    Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                        let cond = pop1(&mut stack)?;
                        let truthy = builder.ins().icmp_imm(IntCC::NotEqual, cond, 0);
                        let target = instr.jump_target(pc) as u32;
                        let target_block = blocks[&target];
                        let continue_block = builder.create_block();
                        if instr.opcode == Opcode::JumpIfFalse {
                            builder
                                .ins()
                                .brif(truthy, continue_block, &[], target_block, &[]);
                        } else {
                            builder
                                .ins()
                                .brif(truthy, target_block, &[], continue_block, &[]);
                        }
                        builder.switch_to_block(continue_block);
                        stack.clear();
                    }
                    Opcode::Call => {
                        let callee_idx = instr.operand as u32;
                        let callee = self.module.function(callee_idx).ok_or_else(|| {
                            CompileError::Internal(format!(
                                "call target {callee_idx} not resolved at codegen time"
                            ))
                        })?;
                        let arity = callee.arity as usize;
                        let mut args = Vec::with_capacity(arity);
                        for _ in 0..arity {
                            args.push(pop1(&mut stack)?);
                        }
                        args.reverse();
                        let args_ptr = if arity > 0 {
                            let slot = call_args_slot.ok_or_else(|| {
                                CompileError::Internal(
                                    "max_call_args stack slot missing for a non-nullary call".into(),
                                )
                            })?;
                            for (j, &v) in args.iter().enumerate() {
                                builder.ins().stack_store(v, slot, (j * 8) as i32);
                            }
                            builder.ins().stack_addr(types::I64, slot, 0)
                        } else {
                            builder.ins().iconst(types::I64, 0)
                        };
                        let vmctx = builder.use_var(var_vmctx);
                        let func_index_val = builder.ins().iconst(types::I32, callee_idx as i64);
                        let args_len_val = builder.ins().iconst(types::I32, arity as i64);
                        let status_addr =
                            builder.ins().stack_addr(types::I64, call_status_slot, 0);
                        let result_addr =
                            builder.ins().stack_addr(types::I64, call_result_slot, 0);
                        builder.ins().call(
                            coop_callee,
                            &[
                                vmctx,
                                func_index_val,
                                args_ptr,
                                args_len_val,
                                status_addr,
                                result_addr,
                            ],
                        );
                        check_ffi_status(
                            &mut builder,
                            call_status_slot,
                            var_status_ptr,
                            release_callee,
                            vmctx,
                            &func.local_is_array,
                        );
                        if callee.has_return_value {
                            let result =
                                builder.ins().stack_load(types::I64, call_result_slot, 0);
                            stack.push(result);
                        }
                    }
                    Opcode::NewIntArray => {
                        let size = pop1(&mut stack)?;
                        let vmctx = builder.use_var(var_vmctx);
                        let status_addr =
                            builder.ins().stack_addr(types::I64, ffi_status_slot, 0);
                        let call = builder
                            .ins()
                            .call(array_new_callee, &[vmctx, size, status_addr]);
                        let result = builder.inst_results(call)[0];
                        check_ffi_status(
                            &mut builder,
                            ffi_status_slot,
                            var_status_ptr,
                            release_callee,
                            vmctx,
                            &func.local_is_array,
                        );
                        stack.push(result);
                    }
                    Opcode::ArrayLen => {
                        let arr = pop1(&mut stack)?;
                        let vmctx = builder.use_var(var_vmctx);
                        let status_addr =
                            builder.ins().stack_addr(types::I64, ffi_status_slot, 0);
                        let call = builder
                            .ins()
                            .call(array_len_callee, &[vmctx, arr, status_addr]);
                        let len = builder.inst_results(call)[0];
                        check_ffi_status(
                            &mut builder,
                            ffi_status_slot,
                            var_status_ptr,
                            release_callee,
                            vmctx,
                            &func.local_is_array,
                        );
                        let release_status_addr =
                            builder.ins().stack_addr(types::I64, ffi_status_slot, 0);
                        builder
                            .ins()
                            .call(release_callee, &[vmctx, arr, release_status_addr]);
                        stack.push(len);
                    }
                    Opcode::IntArrayLoad => {
                        let index = pop1(&mut stack)?;
                        let arr = pop1(&mut stack)?;
                        let vmctx = builder.use_var(var_vmctx);
                        let status_addr =
                            builder.ins().stack_addr(types::I64, ffi_status_slot, 0);
                        let call = builder
                            .ins()
                            .call(array_load_callee, &[vmctx, arr, index, status_addr]);
                        let value = builder.inst_results(call)[0];
                        check_ffi_status(
                            &mut builder,
                            ffi_status_slot,
                            var_status_ptr,
                            release_callee,
                            vmctx,
                            &func.local_is_array,
                        );
                        let release_status_addr =
                            builder.ins().stack_addr(types::I64, ffi_status_slot, 0);
                        builder
                            .ins()
                            .call(release_callee, &[vmctx, arr, release_status_addr]);
                        stack.push(value);
                    }
                    Opcode::IntArrayStore => {
                        let value = pop1(&mut stack)?;
                        let index = pop1(&mut stack)?;
                        let arr = pop1(&mut stack)?;
                        let vmctx = builder.use_var(var_vmctx);
                        let status_addr =
                            builder.ins().stack_addr(types::I64, ffi_status_slot, 0);
                        builder.ins().call(
                            array_store_callee,
                            &[vmctx, arr, index, value, status_addr],
                        );
                        check_ffi_status(
                            &mut builder,
                            ffi_status_slot,
                            var_status_ptr,
                            release_callee,
                            vmctx,
                            &func.local_is_array,
                        );
                        let release_status_addr =
                            builder.ins().stack_addr(types::I64, ffi_status_slot, 0);
                        builder
                            .ins()
                            .call(release_callee, &[vmctx, arr, release_status_addr]);
                    }
                    Opcode::Return => {
                        let v = pop1(&mut stack)?;
                        let vmctx = builder.use_var(var_vmctx);
                        release_array_locals(
                            &mut builder,
                            release_callee,
                            vmctx,
                            ffi_status_slot,
                            &func.local_is_array,
                        );
                        let status_ptr = builder.use_var(var_status_ptr);
                        let zero = builder.ins().iconst(types::I32, 0);
                        builder
                            .ins()
                            .store(MemFlags::trusted(), zero, status_ptr, 0);
                        let result_ptr = builder.use_var(var_result_ptr);
                        builder.ins().store(MemFlags::trusted(), v, result_ptr, 0);
                        builder.ins().return_(&[]);
                        block_open = false;
                    }
                    Opcode::ReturnVoid => {
                        let vmctx = builder.use_var(var_vmctx);
                        release_array_locals(
                            &mut builder,
                            release_callee,
                            vmctx,
                            ffi_status_slot,
                            &func.local_is_array,
                        );
                        let status_ptr = builder.use_var(var_status_ptr);
                        let zero = builder.ins().iconst(types::I32, 0);
                        builder
                            .ins()
                            .store(MemFlags::trusted(), zero, status_ptr, 0);
                        builder.ins().return_(&[]);
                        block_open = false;
                    }
                    Opcode::Pop => {
                        pop1(&mut stack)?;
                    }
                    other => {
                        return Err(CompileError::Internal(format!(
                            "opcode {other:?} is not in the int-only whitelist, caller checked"
                        )))
                    }
                }
            }

            if block_open {
                // Every function codegen_ast emits ends in an explicit
                // RETURN/RETURN_VOID; this is just a defensive terminator so
                // a malformed module can't leave a cranelift block open.
                let vmctx = builder.use_var(var_vmctx);
                release_array_locals(
                    &mut builder,
                    release_callee,
                    vmctx,
                    ffi_status_slot,
                    &func.local_is_array,
                );
                let status_ptr = builder.use_var(var_status_ptr);
                let zero = builder.ins().iconst(types::I32, 0);
                builder
                    .ins()
                    .store(MemFlags::trusted(), zero, status_ptr, 0);
                builder.ins().return_(&[]);
            }

            builder.seal_all_blocks();
            builder.finalize();
        }

        jit_module
            .define_function(func_id, &mut ctx)
            .map_err(|e| CompileError::Module(e.to_string()))?;
        jit_module
            .finalize_definitions()
            .map_err(|e| CompileError::Module(e.to_string()))?;

        let code_ptr = jit_module.get_finalized_function(func_id);

        Ok(Arc::new(NativeExecutor {
            name: func.name.clone(),
            arity: func.arity,
            return_is_array: func.return_is_array,
            code_ptr,
            _module: jit_module,
            _func_id: func_id,
        }))
    }
}

/// A single compiled function's native entry point, kept alive alongside
/// the `JITModule` that owns its code pages.
struct NativeExecutor {
    name: String,
    arity: u32,
    /// Whether the return value is an `ArrayRef` rather than a primitive —
    /// the raw `i64` `code_ptr` hands back can't tell the two apart on its
    /// own (spec.md §4.6 expansion).
    return_is_array: bool,
    code_ptr: *const u8,
    _module: JITModule,
    _func_id: FuncId,
}

// SAFETY: `code_ptr` points into `_module`'s finalized, read-only,
// executable pages for the lifetime of `_module`; both fields are dropped
// together since they live in the same struct.
unsafe impl Send for NativeExecutor {}
unsafe impl Sync for NativeExecutor {}

impl std::fmt::Debug for NativeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeExecutor")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl CompiledExecutor for NativeExecutor {
    fn execute(&self, vm: &mut Vm, args: &[Value]) -> Result<Value, VMResult> {
        let int_args: Vec<i64> = args
            .iter()
            .map(|v| match v {
                Value::Int(i) => Ok(*i),
                Value::ArrayRef(id) => Ok(*id as i64),
                _ => Err(VMResult::InvalidValueType),
            })
            .collect::<Result<_, _>>()?;

        let mut status: i32 = 0;
        let mut result: i64 = 0;
        let vm_ctx = vm as *mut Vm as i64;

        type Entry = unsafe extern "C" fn(i64, *const i64, *mut i32, *mut i64);
        let entry: Entry = unsafe { std::mem::transmute(self.code_ptr) };
        unsafe {
            entry(vm_ctx, int_args.as_ptr(), &mut status, &mut result);
        }

        if status != 0 {
            return Err(status_to_vm_result(status));
        }
        if self.return_is_array {
            Ok(Value::ArrayRef(result as u32))
        } else {
            Ok(Value::Int(result))
        }
    }

    fn function_name(&self) -> &str {
        &self.name
    }
}

fn status_to_vm_result(status: i32) -> VMResult {
    match status {
        s if s == langvm_runtime::RuntimeError::DivisionByZero.code() => VMResult::DivisionByZero,
        s if s == langvm_runtime::RuntimeError::ArrayIndexOutOfBounds.code() => {
            VMResult::ArrayIndexOutOfBounds
        }
        s if s == langvm_runtime::RuntimeError::InvalidHeapId.code() => VMResult::InvalidHeapId,
        _ => VMResult::InvalidOpcode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instr;

    fn func(code: Vec<Instr>) -> CompiledFunction {
        CompiledFunction {
            name: "f".into(),
            arity: 0,
            locals_count: 0,
            has_return_value: true,
            return_is_array: false,
            local_is_array: Vec::new(),
            code,
        }
    }

    #[test]
    fn int_only_body_is_whitelisted() {
        let f = func(vec![
            Instr::new(Opcode::LoadIntConst, 0),
            Instr::new(Opcode::Return, 0),
        ]);
        assert!(is_whitelisted(&f));
    }

    #[test]
    fn float_opcode_disqualifies() {
        let f = func(vec![Instr::new(Opcode::LoadFloatConst, 0)]);
        assert!(!is_whitelisted(&f));
    }

    #[test]
    fn float_array_opcode_disqualifies() {
        let f = func(vec![Instr::new(Opcode::FloatArrayLoad, 0)]);
        assert!(!is_whitelisted(&f));
    }

    #[test]
    fn bool_array_opcode_disqualifies() {
        let f = func(vec![Instr::new(Opcode::BoolArrayStore, 0)]);
        assert!(!is_whitelisted(&f));
    }

    #[test]
    fn int_array_opcodes_are_whitelisted() {
        let f = func(vec![
            Instr::new(Opcode::LoadIntConst, 0),
            Instr::new(Opcode::NewIntArray, 0),
            Instr::new(Opcode::ArrayLen, 0),
            Instr::new(Opcode::Pop, 0),
            Instr::new(Opcode::ReturnVoid, 0),
        ]);
        assert!(is_whitelisted(&f));
    }

    #[test]
    fn jump_targets_are_collected() {
        let f = func(vec![
            Instr::new(Opcode::Jump, 0), // pc=0 -> target 4
            Instr::new(Opcode::ReturnVoid, 0),
        ]);
        let targets = collect_jump_targets(&f);
        assert!(targets.contains(&4));
    }
}
