//! Free functions registered as symbols in the JIT module.
//!
//! Cranelift-generated native code cannot inline every operation the whitelist
//! allows (integer division needs a zero check, array access needs a bounds
//! check) without bloating every specialized function with the same few
//! branches. Instead the generated code calls these extern "C" functions
//! directly, the same way the teacher's cranelift backend calls into libm for
//! `pow`/`fmod`.
//!
//! Every function here returns a sentinel via an out-parameter so the calling
//! convention stays `extern "C"`-friendly (no `Result` across the FFI
//! boundary). A zero return means success; the `RuntimeError` code is written
//! to `*status` otherwise.

use crate::error::RuntimeError;

/// Checked integer division. Returns the quotient on success.
///
/// # Safety
/// `status` must point to a valid, writable `i32`.
#[no_mangle]
pub unsafe extern "C" fn langvm_checked_div_i64(a: i64, b: i64, status: *mut i32) -> i64 {
    if b == 0 {
        *status = RuntimeError::DivisionByZero.code();
        return 0;
    }
    *status = 0;
    a.wrapping_div(b)
}

/// Checked integer remainder. Returns the remainder on success.
///
/// # Safety
/// `status` must point to a valid, writable `i32`.
#[no_mangle]
pub unsafe extern "C" fn langvm_checked_mod_i64(a: i64, b: i64, status: *mut i32) -> i64 {
    if b == 0 {
        *status = RuntimeError::DivisionByZero.code();
        return 0;
    }
    *status = 0;
    a.wrapping_rem(b)
}

/// Bounds-check an index against a length. Returns 1 if `0 <= index < len`.
#[no_mangle]
pub extern "C" fn langvm_check_bounds(index: i64, len: i64) -> i32 {
    (index >= 0 && index < len) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_by_zero_sets_status() {
        let mut status = 0i32;
        let result = unsafe { langvm_checked_div_i64(10, 0, &mut status) };
        assert_eq!(result, 0);
        assert_eq!(status, RuntimeError::DivisionByZero.code());
    }

    #[test]
    fn div_happy_path() {
        let mut status = 0i32;
        let result = unsafe { langvm_checked_div_i64(10, 3, &mut status) };
        assert_eq!(result, 3);
        assert_eq!(status, 0);
    }

    #[test]
    fn mod_happy_path() {
        let mut status = 0i32;
        let result = unsafe { langvm_checked_mod_i64(10, 3, &mut status) };
        assert_eq!(result, 1);
        assert_eq!(status, 0);
    }

    #[test]
    fn bounds_check() {
        assert_eq!(langvm_check_bounds(0, 5), 1);
        assert_eq!(langvm_check_bounds(4, 5), 1);
        assert_eq!(langvm_check_bounds(5, 5), 0);
        assert_eq!(langvm_check_bounds(-1, 5), 0);
    }
}
