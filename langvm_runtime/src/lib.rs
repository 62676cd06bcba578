//! Runtime helpers linked into `langvm`'s JIT-compiled native code.
//!
//! This crate has no dependency on `langvm` itself: everything here is a
//! small, free, `extern "C"` function that cranelift-generated machine code
//! calls directly, plus the shared error-code enum both sides agree on.

pub mod error;
pub mod intrinsics;

pub use error::{RuntimeError, RuntimeResult};
