//! The trampolines JIT-compiled code calls for anything it can't do with
//! plain cranelift IR (spec.md §4.6): a cooperative call back into
//! `Vm::call_function` for an uncompiled callee, and the int-array
//! operations, which go through `Heap` rather than duplicating its
//! bounds/refcount logic in generated code.

use crate::value::Value;
use crate::vm::error::VMResult;
use crate::vm::Vm;

/// # Safety
/// `vm_ctx` must be a live `*mut Vm` for the duration of the call (the
/// cranelift-compiled caller passes its own `vm_ctx` parameter through
/// unchanged). `args_ptr` must point to `args_len` valid `i64`s. `status`
/// and `result` must point to valid, writable locations.
#[no_mangle]
pub unsafe extern "C" fn langvm_cooperative_call(
    vm_ctx: i64,
    func_index: u32,
    args_ptr: *const i64,
    args_len: u32,
    status: *mut i32,
    result: *mut i64,
) {
    let vm = &mut *(vm_ctx as *mut Vm);
    let raw_args = std::slice::from_raw_parts(args_ptr, args_len as usize);
    // Untyped native code can't tell an `ArrayRef` id apart from a plain int
    // in the raw `i64`, so the callee's own parameter typing decides.
    let local_is_array = vm
        .module()
        .function(func_index)
        .map(|f| f.local_is_array.clone())
        .unwrap_or_default();
    let args: Vec<Value> = raw_args
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if local_is_array.get(i).copied().unwrap_or(false) {
                Value::ArrayRef(v as u32)
            } else {
                Value::Int(v)
            }
        })
        .collect();

    match vm.call_function(func_index, args) {
        Ok(v) => {
            *status = 0;
            *result = match v {
                Value::ArrayRef(id) => id as i64,
                _ => v.as_int().unwrap_or(0),
            };
        }
        Err(e) => {
            *status = vm_result_to_status(e);
            *result = 0;
        }
    }
}

/// # Safety
/// `vm_ctx` must be a live `*mut Vm`; `status` must be a valid, writable
/// location.
#[no_mangle]
pub unsafe extern "C" fn langvm_array_new_int(vm_ctx: i64, size: i64, status: *mut i32) -> i64 {
    let vm = &mut *(vm_ctx as *mut Vm);
    match vm.heap_mut().new_int_array(size) {
        Ok(v) => {
            *status = 0;
            v.as_array_ref().unwrap_or(0) as i64
        }
        Err(e) => {
            *status = vm_result_to_status(e);
            0
        }
    }
}

/// # Safety
/// Same as `langvm_array_new_int`.
#[no_mangle]
pub unsafe extern "C" fn langvm_array_len(vm_ctx: i64, array_ref: i64, status: *mut i32) -> i64 {
    let vm = &mut *(vm_ctx as *mut Vm);
    match vm.heap_mut().array_size(Value::ArrayRef(array_ref as u32)) {
        Ok(n) => {
            *status = 0;
            n as i64
        }
        Err(e) => {
            *status = vm_result_to_status(e);
            0
        }
    }
}

/// # Safety
/// Same as `langvm_array_new_int`.
#[no_mangle]
pub unsafe extern "C" fn langvm_array_load_int(
    vm_ctx: i64,
    array_ref: i64,
    index: i64,
    status: *mut i32,
) -> i64 {
    let vm = &mut *(vm_ctx as *mut Vm);
    match vm
        .heap_mut()
        .array_load_int(Value::ArrayRef(array_ref as u32), index)
    {
        Ok(v) => {
            *status = 0;
            v
        }
        Err(e) => {
            *status = vm_result_to_status(e);
            0
        }
    }
}

/// # Safety
/// Same as `langvm_array_new_int`.
#[no_mangle]
pub unsafe extern "C" fn langvm_array_store_int(
    vm_ctx: i64,
    array_ref: i64,
    index: i64,
    value: i64,
    status: *mut i32,
) {
    let vm = &mut *(vm_ctx as *mut Vm);
    *status = match vm
        .heap_mut()
        .array_store_int(Value::ArrayRef(array_ref as u32), index, value)
    {
        Ok(()) => 0,
        Err(e) => vm_result_to_status(e),
    };
}

/// Retain an array-typed local's heap reference on copy (mirrors
/// `LocalSlots::get_copy`'s call into `Heap::retain`). `array_ref == 0` is
/// the "local never assigned" sentinel — `Heap` never allocates id 0 — and
/// is a guaranteed no-op, so generated code never has to branch on it.
///
/// # Safety
/// Same as `langvm_array_new_int`.
#[no_mangle]
pub unsafe extern "C" fn langvm_array_retain(vm_ctx: i64, array_ref: i64, status: *mut i32) {
    if array_ref == 0 {
        *status = 0;
        return;
    }
    let vm = &mut *(vm_ctx as *mut Vm);
    *status = match vm.heap_mut().retain(Value::ArrayRef(array_ref as u32)) {
        Ok(()) => 0,
        Err(e) => vm_result_to_status(e),
    };
}

/// Release an array-typed local's or a popped array operand's heap
/// reference (mirrors `LocalSlots::set_move`'s release-if-overwritten and
/// `clear_and_release_all`). Same `array_ref == 0` no-op sentinel as
/// `langvm_array_retain`.
///
/// # Safety
/// Same as `langvm_array_new_int`.
#[no_mangle]
pub unsafe extern "C" fn langvm_array_release(vm_ctx: i64, array_ref: i64, status: *mut i32) {
    if array_ref == 0 {
        *status = 0;
        return;
    }
    let vm = &mut *(vm_ctx as *mut Vm);
    *status = match vm.heap_mut().release(Value::ArrayRef(array_ref as u32)) {
        Ok(()) => 0,
        Err(e) => vm_result_to_status(e),
    };
}

fn vm_result_to_status(e: VMResult) -> i32 {
    match e {
        VMResult::DivisionByZero => langvm_runtime::RuntimeError::DivisionByZero.code(),
        VMResult::ArrayIndexOutOfBounds => {
            langvm_runtime::RuntimeError::ArrayIndexOutOfBounds.code()
        }
        VMResult::InvalidHeapId => langvm_runtime::RuntimeError::InvalidHeapId.code(),
        // Any other VMResult has no dedicated runtime status code; surface it
        // as a generic nonzero failure so the caller still aborts instead of
        // reading garbage out of `result`.
        _ => -1,
    }
}
