//! `AST -> BytecodeModule`: the bytecode generator.
//!
//! A pure mapping pass, run after semantic analysis and the optimizers
//! have already validated and simplified the tree. Emits 4-byte-aligned
//! instructions only, keeps the operand stack balanced at every
//! `RETURN`/`RETURN_VOID` (exactly the return value, or nothing), and
//! deduplicates constants through `ConstantPoolBuilder` (spec.md §4.1
//! expansion).

use crate::bytecode::{BytecodeModule, CompiledFunction, ConstantPoolBuilder, Instr, Opcode};
use crate::front::ast::*;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("program has no `main` function")]
    MissingMain,
    #[error("undefined variable `{0}` survived semantic analysis")]
    UndefinedVariable(String),
    #[error("undefined function `{0}` survived semantic analysis")]
    UndefinedFunction(String),
}

pub fn generate(program: &Program) -> Result<BytecodeModule, CodegenError> {
    let function_index: HashMap<&str, u32> = program
        .functions
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.as_str(), i as u32))
        .collect();
    let function_sigs: HashMap<&str, &FunctionDecl> =
        program.functions.iter().map(|f| (f.name.as_str(), f)).collect();

    let mut pool = ConstantPoolBuilder::new();
    let mut functions = Vec::with_capacity(program.functions.len());
    for f in &program.functions {
        functions.push(Arc::new(FunctionCodegen::generate(
            f,
            &function_index,
            &function_sigs,
            &mut pool,
        )?));
    }

    let entry_point = *function_index.get("main").ok_or(CodegenError::MissingMain)?;
    let (int_constants, float_constants) = pool.into_pools();
    Ok(BytecodeModule {
        int_constants,
        float_constants,
        functions,
        entry_point,
    })
}

struct FunctionCodegen<'a> {
    function_index: &'a HashMap<&'a str, u32>,
    function_sigs: &'a HashMap<&'a str, &'a FunctionDecl>,
    pool: &'a mut ConstantPoolBuilder,
    scopes: Vec<HashMap<String, (u32, TypeNode)>>,
    locals_count: u32,
    local_is_array: Vec<bool>,
    code: Vec<Instr>,
}

impl<'a> FunctionCodegen<'a> {
    fn generate(
        f: &FunctionDecl,
        function_index: &'a HashMap<&'a str, u32>,
        function_sigs: &'a HashMap<&'a str, &'a FunctionDecl>,
        pool: &'a mut ConstantPoolBuilder,
    ) -> Result<CompiledFunction, CodegenError> {
        let mut gen = FunctionCodegen {
            function_index,
            function_sigs,
            pool,
            scopes: vec![HashMap::new()],
            locals_count: 0,
            local_is_array: Vec::new(),
            code: Vec::new(),
        };
        for p in &f.params {
            gen.declare_local(&p.name, p.ty);
        }
        gen.emit_block(&f.body)?;
        // Implicit RETURN_VOID at end-of-function fall-through (spec.md §4.4):
        // every body, regardless of return type, may fall off its last
        // statement (e.g. an `if` with no `else`, both taken on non-returning
        // paths), so the trailing instruction is unconditional.
        gen.code.push(Instr::new(Opcode::ReturnVoid, 0));
        Ok(CompiledFunction {
            name: f.name.clone(),
            arity: f.params.len() as u32,
            locals_count: gen.locals_count,
            has_return_value: f.return_ty != TypeNode::Void,
            return_is_array: f.return_ty.is_array(),
            local_is_array: gen.local_is_array,
            code: gen.code,
        })
    }

    fn declare_local(&mut self, name: &str, ty: TypeNode) -> u32 {
        let slot = self.locals_count;
        self.locals_count += 1;
        self.local_is_array.push(ty.is_array());
        self.scopes
            .last_mut()
            .expect("at least one scope")
            .insert(name.to_string(), (slot, ty));
        slot
    }

    fn lookup_local(&self, name: &str) -> Option<(u32, TypeNode)> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn here(&self) -> u32 {
        self.code.len() as u32 * 4
    }

    /// Emit a jump with a placeholder displacement, returning its index for
    /// later patching once the target is known.
    fn emit_jump_placeholder(&mut self, opcode: Opcode) -> usize {
        let idx = self.code.len();
        self.code.push(Instr::new(opcode, 0));
        idx
    }

    fn patch_jump(&mut self, idx: usize, target: u32) {
        let pc = idx as u32 * 4;
        let disp = (target as i64 - pc as i64 - 4) / 4;
        let opcode = self.code[idx].opcode;
        self.code[idx] = Instr::new(opcode, disp as i32);
    }

    fn emit_block(&mut self, block: &BlockStmt) -> Result<(), CodegenError> {
        self.push_scope();
        for stmt in &block.statements {
            self.emit_stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::VarDecl(decl) => {
                if let Some(init) = &decl.init {
                    self.emit_expr(init, Some(decl.ty))?;
                    let slot = self.declare_local(&decl.name, decl.ty);
                    self.code.push(Instr::new(Opcode::StoreLocal, slot as i32));
                } else {
                    self.declare_local(&decl.name, decl.ty);
                }
                Ok(())
            }
            Stmt::Block(b) => self.emit_block(b),
            Stmt::If(s) => {
                self.emit_expr(&s.condition, None)?;
                let else_jump = self.emit_jump_placeholder(Opcode::JumpIfFalse);
                self.emit_stmt(&s.then_branch)?;
                if let Some(else_branch) = &s.else_branch {
                    let end_jump = self.emit_jump_placeholder(Opcode::Jump);
                    self.patch_jump(else_jump, self.here());
                    self.emit_stmt(else_branch)?;
                    let end_target = self.here();
                    self.patch_jump(end_jump, end_target);
                } else {
                    let end_target = self.here();
                    self.patch_jump(else_jump, end_target);
                }
                Ok(())
            }
            Stmt::For(s) => {
                self.push_scope();
                if let Some(init) = &s.init {
                    self.emit_stmt(init)?;
                }
                let loop_head = self.here();
                let exit_jump = if let Some(cond) = &s.condition {
                    self.emit_expr(cond, None)?;
                    Some(self.emit_jump_placeholder(Opcode::JumpIfFalse))
                } else {
                    None
                };
                self.emit_stmt(&s.body)?;
                if let Some(update) = &s.update {
                    self.emit_expr(update, None)?;
                    self.code.push(Instr::new(Opcode::Pop, 0));
                }
                let back_jump = self.emit_jump_placeholder(Opcode::Jump);
                self.patch_jump(back_jump, loop_head);
                let exit_target = self.here();
                if let Some(idx) = exit_jump {
                    self.patch_jump(idx, exit_target);
                }
                self.pop_scope();
                Ok(())
            }
            Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    self.emit_expr(value, None)?;
                    self.code.push(Instr::new(Opcode::Return, 0));
                } else {
                    self.code.push(Instr::new(Opcode::ReturnVoid, 0));
                }
                Ok(())
            }
            Stmt::Expr(s) => {
                let produces_value = !matches!(&s.expr, Expr::Call(c) if is_void_call(c, self.function_sigs));
                self.emit_expr(&s.expr, None)?;
                if produces_value {
                    self.code.push(Instr::new(Opcode::Pop, 0));
                }
                Ok(())
            }
        }
    }

    /// `expected` is `Some(ty)` only in contexts where `ArrayInitExpr` may
    /// appear (the one node that needs a surrounding type to emit anything).
    fn emit_expr(&mut self, expr: &Expr, expected: Option<TypeNode>) -> Result<(), CodegenError> {
        match expr {
            Expr::Literal(lit) => {
                match lit.value {
                    LiteralValue::Int(v) => {
                        let idx = self.pool.intern_int(v);
                        self.code.push(Instr::new(Opcode::LoadIntConst, idx as i32));
                    }
                    LiteralValue::Float(v) => {
                        let idx = self.pool.intern_float(v);
                        self.code.push(Instr::new(Opcode::LoadFloatConst, idx as i32));
                    }
                    LiteralValue::Bool(true) => self.code.push(Instr::new(Opcode::LoadTrue, 0)),
                    LiteralValue::Bool(false) => self.code.push(Instr::new(Opcode::LoadFalse, 0)),
                }
                Ok(())
            }
            Expr::Variable(v) => {
                let (slot, _) = self
                    .lookup_local(&v.name)
                    .ok_or_else(|| CodegenError::UndefinedVariable(v.name.clone()))?;
                self.code.push(Instr::new(Opcode::LoadLocal, slot as i32));
                Ok(())
            }
            Expr::Grouping(g) => self.emit_expr(&g.inner, expected),
            Expr::Unary(u) => {
                self.emit_expr(&u.operand, None)?;
                let ty = self.expr_type(&u.operand);
                match u.op {
                    UnaryOp::Neg if ty == TypeNode::Float => {
                        self.code.push(Instr::new(Opcode::NegFloat, 0))
                    }
                    UnaryOp::Neg => self.code.push(Instr::new(Opcode::NegInt, 0)),
                    UnaryOp::Not => self.code.push(Instr::new(Opcode::Not, 0)),
                }
                Ok(())
            }
            Expr::Binary(b) => self.emit_binary(b),
            Expr::Assign(a) => self.emit_assign(a),
            Expr::Call(c) => self.emit_call(c),
            Expr::ArrayAccess(a) => self.emit_array_access(a),
            Expr::ArrayInit(a) => {
                self.emit_expr(&a.size, None)?;
                let elem_ty = expected.and_then(TypeNode::element_type);
                let opcode = match elem_ty {
                    Some(TypeNode::Float) => Opcode::NewFloatArray,
                    Some(TypeNode::Bool) => Opcode::NewBoolArray,
                    _ => Opcode::NewIntArray,
                };
                self.code.push(Instr::new(opcode, 0));
                Ok(())
            }
        }
    }

    fn emit_binary(&mut self, b: &BinaryExpr) -> Result<(), CodegenError> {
        self.emit_expr(&b.left, None)?;
        self.emit_expr(&b.right, None)?;
        let operand_ty = self.expr_type(&b.left);
        let opcode = match (b.op, operand_ty) {
            (BinaryOp::Add, TypeNode::Float) => Opcode::AddFloat,
            (BinaryOp::Add, _) => Opcode::AddInt,
            (BinaryOp::Sub, TypeNode::Float) => Opcode::SubFloat,
            (BinaryOp::Sub, _) => Opcode::SubInt,
            (BinaryOp::Mul, TypeNode::Float) => Opcode::MulFloat,
            (BinaryOp::Mul, _) => Opcode::MulInt,
            (BinaryOp::Div, TypeNode::Float) => Opcode::DivFloat,
            (BinaryOp::Div, _) => Opcode::DivInt,
            (BinaryOp::Mod, _) => Opcode::ModInt,
            (BinaryOp::Eq, TypeNode::Float) => Opcode::EqFloat,
            (BinaryOp::Eq, _) => Opcode::EqInt,
            (BinaryOp::Ne, TypeNode::Float) => Opcode::NeFloat,
            (BinaryOp::Ne, _) => Opcode::NeInt,
            (BinaryOp::Lt, TypeNode::Float) => Opcode::LtFloat,
            (BinaryOp::Lt, _) => Opcode::LtInt,
            (BinaryOp::Le, TypeNode::Float) => Opcode::LeFloat,
            (BinaryOp::Le, _) => Opcode::LeInt,
            (BinaryOp::Gt, TypeNode::Float) => Opcode::GtFloat,
            (BinaryOp::Gt, _) => Opcode::GtInt,
            (BinaryOp::Ge, TypeNode::Float) => Opcode::GeFloat,
            (BinaryOp::Ge, _) => Opcode::GeInt,
            (BinaryOp::And, _) => Opcode::And,
            (BinaryOp::Or, _) => Opcode::Or,
        };
        self.code.push(Instr::new(opcode, 0));
        Ok(())
    }

    fn emit_assign(&mut self, a: &AssignExpr) -> Result<(), CodegenError> {
        match a.target.as_ref() {
            Expr::Variable(v) => {
                let (slot, ty) = self
                    .lookup_local(&v.name)
                    .ok_or_else(|| CodegenError::UndefinedVariable(v.name.clone()))?;
                self.emit_expr(&a.value, Some(ty))?;
                self.code.push(Instr::new(Opcode::StoreLocal, slot as i32));
                // leave a copy on the stack: assignment is an expression
                self.code.push(Instr::new(Opcode::LoadLocal, slot as i32));
                Ok(())
            }
            Expr::ArrayAccess(access) => {
                self.emit_expr(&access.array, None)?;
                self.emit_expr(&access.index, None)?;
                self.emit_expr(&a.value, None)?;
                let elem_ty = self.expr_type(&access.array).element_type().unwrap_or(TypeNode::Int);
                let opcode = match elem_ty {
                    TypeNode::Float => Opcode::FloatArrayStore,
                    TypeNode::Bool => Opcode::BoolArrayStore,
                    _ => Opcode::IntArrayStore,
                };
                self.code.push(Instr::new(opcode, 0));
                // ARRAY_STORE consumes all three operands and pushes nothing;
                // re-read the stored element so assignment still yields a value.
                self.emit_expr(&access.array, None)?;
                self.emit_expr(&access.index, None)?;
                let load_opcode = match elem_ty {
                    TypeNode::Float => Opcode::FloatArrayLoad,
                    TypeNode::Bool => Opcode::BoolArrayLoad,
                    _ => Opcode::IntArrayLoad,
                };
                self.code.push(Instr::new(load_opcode, 0));
                Ok(())
            }
            _ => unreachable!("semantic analysis rejects other assignment targets"),
        }
    }

    fn emit_array_access(&mut self, a: &ArrayAccessExpr) -> Result<(), CodegenError> {
        self.emit_expr(&a.array, None)?;
        self.emit_expr(&a.index, None)?;
        let elem_ty = self.expr_type(&a.array).element_type().unwrap_or(TypeNode::Int);
        let opcode = match elem_ty {
            TypeNode::Float => Opcode::FloatArrayLoad,
            TypeNode::Bool => Opcode::BoolArrayLoad,
            _ => Opcode::IntArrayLoad,
        };
        self.code.push(Instr::new(opcode, 0));
        Ok(())
    }

    fn emit_call(&mut self, c: &CallExpr) -> Result<(), CodegenError> {
        if c.callee == "print" {
            self.emit_expr(&c.args[0], None)?;
            self.code.push(Instr::new(Opcode::Print, 0));
            return Ok(());
        }
        if c.callee == "printArray" {
            self.emit_expr(&c.args[0], None)?;
            self.code.push(Instr::new(Opcode::PrintArray, 0));
            return Ok(());
        }
        if c.callee == "length" {
            self.emit_expr(&c.args[0], None)?;
            self.code.push(Instr::new(Opcode::ArrayLen, 0));
            return Ok(());
        }
        let callee_sig = self
            .function_sigs
            .get(c.callee.as_str())
            .ok_or_else(|| CodegenError::UndefinedFunction(c.callee.clone()))?;
        for (arg, param) in c.args.iter().zip(&callee_sig.params) {
            self.emit_expr(arg, Some(param.ty))?;
        }
        let index = *self
            .function_index
            .get(c.callee.as_str())
            .ok_or_else(|| CodegenError::UndefinedFunction(c.callee.clone()))?;
        self.code.push(Instr::new(Opcode::Call, index as i32));
        Ok(())
    }

    /// Re-derive an already-checked expression's type. Semantic analysis
    /// guarantees this never encounters a genuinely malformed tree; this is
    /// just cheaper than threading a type-annotated AST through codegen.
    fn expr_type(&self, expr: &Expr) -> TypeNode {
        match expr {
            Expr::Literal(lit) => match lit.value {
                LiteralValue::Int(_) => TypeNode::Int,
                LiteralValue::Float(_) => TypeNode::Float,
                LiteralValue::Bool(_) => TypeNode::Bool,
            },
            Expr::Variable(v) => self.lookup_local(&v.name).map(|(_, ty)| ty).unwrap_or(TypeNode::Int),
            Expr::Grouping(g) => self.expr_type(&g.inner),
            Expr::Unary(u) => self.expr_type(&u.operand),
            Expr::Binary(b) => match b.op {
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::And
                | BinaryOp::Or => TypeNode::Bool,
                _ => self.expr_type(&b.left),
            },
            Expr::Assign(a) => self.expr_type(&a.target),
            Expr::Call(c) if c.callee == "length" => TypeNode::Int,
            Expr::Call(c) => self
                .function_sigs
                .get(c.callee.as_str())
                .map(|f| f.return_ty)
                .unwrap_or(TypeNode::Void),
            Expr::ArrayAccess(a) => self.expr_type(&a.array).element_type().unwrap_or(TypeNode::Int),
            Expr::ArrayInit(_) => TypeNode::IntArray,
        }
    }
}

fn is_void_call(c: &CallExpr, sigs: &HashMap<&str, &FunctionDecl>) -> bool {
    if c.callee == "print" || c.callee == "printArray" {
        return true;
    }
    sigs.get(c.callee.as_str())
        .map(|f| f.return_ty == TypeNode::Void)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lexer::lex;
    use crate::front::parser::parse;
    use crate::opt::{constant_fold::fold_program, dce::eliminate_dead_code};

    fn compile(src: &str) -> BytecodeModule {
        let program = parse(&lex(src).unwrap()).unwrap();
        crate::front::semantic::analyze(&program).unwrap();
        let program = eliminate_dead_code(fold_program(program));
        generate(&program).unwrap()
    }

    #[test]
    fn every_instruction_is_four_byte_aligned() {
        let module = compile("fn main() void { let int a = 1 + 2; print(a); }");
        for f in &module.functions {
            assert_eq!(f.code_len_bytes() % 4, 0);
        }
    }

    #[test]
    fn missing_main_is_an_error() {
        let program = parse(&lex("fn helper() void { }").unwrap()).unwrap();
        assert!(matches!(generate(&program), Err(CodegenError::MissingMain)));
    }

    #[test]
    fn recursive_call_references_its_own_function_index() {
        let module = compile(
            "fn fact(int n) int { if (n == 0) { return 1; } return n * fact(n - 1); } \
             fn main() void { print(fact(5)); }",
        );
        let fact_index = module.function_index_by_name("fact").unwrap();
        let fact = module.function(fact_index).unwrap();
        assert!(fact.code.iter().any(|i| i.opcode == Opcode::Call && i.operand as u32 == fact_index));
    }

    #[test]
    fn if_without_else_jumps_past_then_branch() {
        let module = compile("fn main() void { if (true) { print(1); } }");
        let main = module.function(module.entry_point).unwrap();
        assert!(main.code.iter().any(|i| i.opcode == Opcode::JumpIfFalse));
    }

    #[test]
    fn for_loop_emits_a_backward_jump() {
        let module = compile("fn main() void { for (let int i = 0; i < 10; i = i + 1) { print(i); } }");
        let main = module.function(module.entry_point).unwrap();
        let has_backward_jump = main
            .code
            .iter()
            .enumerate()
            .any(|(i, instr)| instr.opcode == Opcode::Jump && instr.jump_target(i as u32 * 4) < (i as i64 * 4));
        assert!(has_backward_jump);
    }

    #[test]
    fn constant_pool_is_shared_and_deduplicated() {
        let module = compile("fn main() void { let int a = 7; let int b = 7; print(a); print(b); }");
        assert_eq!(module.int_constants.iter().filter(|&&c| c == 7).count(), 1);
    }
}
