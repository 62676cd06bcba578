//! `langvm`: lexer, parser, semantic analyzer, AST optimizers, bytecode
//! generator, bytecode interpreter, and profile-guided JIT for a small
//! statically-typed imperative language.
//!
//! The front end (`front`) turns source text into a checked `Program`. The
//! optimizers (`opt`) simplify that tree. `codegen_ast` lowers it to a
//! `BytecodeModule` (`bytecode`), which `vm::Vm` runs — interpreting by
//! default, handing hot functions to the `jit` subsystem once their call
//! count crosses a threshold.

pub mod bytecode;
pub mod codegen_ast;
pub mod frame;
pub mod front;
pub mod jit;
pub mod memory;
pub mod opt;
pub mod span;
pub mod stack;
pub mod value;
pub mod vm;

pub use bytecode::BytecodeModule;
pub use front::ast::Program;
pub use value::Value;
pub use vm::error::VMResult;
pub use vm::Vm;

/// Run the full pipeline — lex, parse, check, fold, eliminate dead code,
/// generate bytecode — stopping at the first stage that fails.
pub mod pipeline {
    use crate::bytecode::BytecodeModule;
    use crate::codegen_ast::{self, CodegenError};
    use crate::front::lexer::{self, LexError};
    use crate::front::parser::{self, ParseError};
    use crate::front::semantic::{self, SemanticError};
    use crate::opt::{constant_fold, dce};
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum CompileError {
        #[error("lex error: {0}")]
        Lex(#[from] LexError),
        #[error("parse error: {0}")]
        Parse(#[from] ParseError),
        #[error("semantic error: {0}")]
        Semantic(#[from] SemanticError),
        #[error("codegen error: {0}")]
        Codegen(#[from] CodegenError),
    }

    pub fn compile(source: &str) -> Result<BytecodeModule, CompileError> {
        let tokens = lexer::lex(source)?;
        let program = parser::parse(&tokens)?;
        semantic::analyze(&program)?;
        let program = dce::eliminate_dead_code(constant_fold::fold_program(program));
        Ok(codegen_ast::generate(&program)?)
    }
}
