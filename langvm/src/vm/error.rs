//! Runtime result taxonomy (spec.md §7).

/// Outcome of one VM run or one opcode step. `Success` is the only
/// non-error variant; every other variant is terminal for the run that
/// produced it (spec.md §7: "all runtime errors are non-recoverable at the
/// program level").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VMResult {
    Success,
    DivisionByZero,
    ArrayIndexOutOfBounds,
    StackUnderflow,
    InvalidOpcode,
    InvalidHeapId,
    InvalidConstantIndex,
    InvalidLocalIndex,
    InvalidFunctionIndex,
    InvalidValueType,
    InvalidArrayType,
    /// An internal invariant the compiler/codegen is supposed to guarantee
    /// didn't hold at runtime (e.g. no active call frame where one must
    /// exist). Never expected on a program that passed semantic analysis;
    /// exists so these sites propagate a `VMResult` instead of panicking.
    InternalError,
}

impl VMResult {
    pub fn is_success(self) -> bool {
        matches!(self, VMResult::Success)
    }

    /// The `<KIND>` the CLI prints after `VM Error: ` (spec.md §6).
    pub fn kind_name(self) -> &'static str {
        match self {
            VMResult::Success => "SUCCESS",
            VMResult::DivisionByZero => "DIVISION_BY_ZERO",
            VMResult::ArrayIndexOutOfBounds => "ARRAY_INDEX_OUT_OF_BOUNDS",
            VMResult::StackUnderflow => "STACK_UNDERFLOW",
            VMResult::InvalidOpcode => "INVALID_OPCODE",
            VMResult::InvalidHeapId => "INVALID_HEAP_ID",
            VMResult::InvalidConstantIndex => "INVALID_CONSTANT_INDEX",
            VMResult::InvalidLocalIndex => "INVALID_LOCAL_INDEX",
            VMResult::InvalidFunctionIndex => "INVALID_FUNCTION_INDEX",
            VMResult::InvalidValueType => "INVALID_VALUE_TYPE",
            VMResult::InvalidArrayType => "INVALID_ARRAY_TYPE",
            VMResult::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for VMResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind_name())
    }
}

impl std::error::Error for VMResult {}

/// Convert a `langvm_runtime` status code (written by JIT-called helpers)
/// back into a `VMResult`. Only the codes those helpers can produce appear
/// here; anything else is a bug in the codegen and is treated as an
/// internal invariant violation surfaced as `InvalidOpcode`.
impl From<langvm_runtime::RuntimeError> for VMResult {
    fn from(e: langvm_runtime::RuntimeError) -> Self {
        match e {
            langvm_runtime::RuntimeError::DivisionByZero => VMResult::DivisionByZero,
            langvm_runtime::RuntimeError::ArrayIndexOutOfBounds => {
                VMResult::ArrayIndexOutOfBounds
            }
            langvm_runtime::RuntimeError::InvalidHeapId => VMResult::InvalidHeapId,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_spec_taxonomy() {
        assert_eq!(VMResult::DivisionByZero.kind_name(), "DIVISION_BY_ZERO");
        assert_eq!(
            VMResult::ArrayIndexOutOfBounds.kind_name(),
            "ARRAY_INDEX_OUT_OF_BOUNDS"
        );
        assert_eq!(VMResult::Success.kind_name(), "SUCCESS");
    }

    #[test]
    fn success_is_the_only_non_error_variant() {
        assert!(VMResult::Success.is_success());
        assert!(!VMResult::StackUnderflow.is_success());
    }

    #[test]
    fn runtime_error_conversion() {
        assert_eq!(
            VMResult::from(langvm_runtime::RuntimeError::DivisionByZero),
            VMResult::DivisionByZero
        );
    }
}
