//! AST-to-AST optimization passes (spec.md §8 expansion).

pub mod constant_fold;
pub mod dce;
