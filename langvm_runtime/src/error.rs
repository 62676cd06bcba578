use thiserror::Error;

/// Status codes a JIT-compiled executor communicates back to the scheduler.
///
/// These mirror [`crate::VMResult`](https://docs.rs/langvm) in the host crate but are
/// duplicated here (as a stable `#[repr(i32)]`) because generated native code only
/// ever hands back a plain integer -- it cannot construct an enum defined in a crate
/// it does not link against.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivisionByZero = 1,
    #[error("array index out of bounds")]
    ArrayIndexOutOfBounds = 2,
    #[error("invalid heap id")]
    InvalidHeapId = 3,
}

impl RuntimeError {
    pub fn code(self) -> i32 {
        self as i32
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
