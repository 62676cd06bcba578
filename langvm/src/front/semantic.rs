//! Single-pass, fail-fast type checker.
//!
//! Strict typing, no implicit conversions: every binary operand, call
//! argument, assignment, and return value must match its context exactly.
//! `ArrayInitExpr` is the one node with no type of its own — its element
//! type is resolved from the surrounding `TypeNode` (the declaration,
//! parameter, or return type it initializes), per the open question this
//! analyzer settles by always requiring an expected-type context for it.

use crate::front::ast::*;
use crate::span::Span;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SemanticError {
    #[error("{span}: undefined variable `{name}`")]
    UndefinedVariable { name: String, span: Span },
    #[error("{span}: undefined function `{name}`")]
    UndefinedFunction { name: String, span: Span },
    #[error("{span}: `{name}` is already declared in this scope")]
    DuplicateDeclaration { name: String, span: Span },
    #[error("{span}: function `{name}` is already declared")]
    DuplicateFunction { name: String, span: Span },
    #[error("{span}: expected type {expected:?}, found {found:?}")]
    TypeMismatch {
        expected: TypeNode,
        found: TypeNode,
        span: Span,
    },
    #[error("{span}: `{name}` expects {expected} argument(s), found {found}")]
    ArgumentCountMismatch {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("{span}: array index must be `int`, found {found:?}")]
    InvalidIndexType { found: TypeNode, span: Span },
    #[error("{span}: cannot index into non-array type {found:?}")]
    NotAnArray { found: TypeNode, span: Span },
    #[error("{span}: `%` is only defined for `int`, found {found:?}")]
    ModOnNonInt { found: TypeNode, span: Span },
    #[error("{span}: `&&`/`||`/`!` are only defined for `bool`, found {found:?}")]
    LogicalOnNonBool { found: TypeNode, span: Span },
    #[error("{span}: `new [..]` requires an array-typed context, found {found:?}")]
    ArrayInitNeedsArrayContext { found: TypeNode, span: Span },
    #[error("{span}: array size must be `int`, found {found:?}")]
    InvalidArraySizeType { found: TypeNode, span: Span },
    #[error("{span}: function `{name}` must return {expected:?}, found {found:?}")]
    ReturnTypeMismatch {
        name: String,
        expected: TypeNode,
        found: TypeNode,
        span: Span,
    },
    #[error("{span}: `return;` is invalid in a function declared to return {expected:?}")]
    MissingReturnValue { expected: TypeNode, span: Span },
    #[error("{span}: cannot assign to this expression")]
    InvalidAssignmentTarget { span: Span },
}

const BUILTINS: &[(&str, usize)] = &[("print", 1), ("printArray", 1), ("length", 1)];

struct FunctionSig {
    params: Vec<TypeNode>,
    return_ty: TypeNode,
}

struct Scope {
    stack: Vec<HashMap<String, TypeNode>>,
}

impl Scope {
    fn new() -> Self {
        Self {
            stack: vec![HashMap::new()],
        }
    }

    fn push(&mut self) {
        self.stack.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    fn declare(&mut self, name: &str, ty: TypeNode, span: Span) -> Result<(), SemanticError> {
        let top = self.stack.last_mut().expect("at least one scope");
        if top.contains_key(name) {
            return Err(SemanticError::DuplicateDeclaration {
                name: name.to_string(),
                span,
            });
        }
        top.insert(name.to_string(), ty);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<TypeNode> {
        self.stack.iter().rev().find_map(|s| s.get(name).copied())
    }
}

pub struct Analyzer<'a> {
    functions: HashMap<&'a str, FunctionSig>,
}

pub fn analyze(program: &Program) -> Result<(), SemanticError> {
    let mut functions = HashMap::new();
    for f in &program.functions {
        if functions.contains_key(f.name.as_str()) {
            return Err(SemanticError::DuplicateFunction {
                name: f.name.clone(),
                span: f.span,
            });
        }
        functions.insert(
            f.name.as_str(),
            FunctionSig {
                params: f.params.iter().map(|p| p.ty).collect(),
                return_ty: f.return_ty,
            },
        );
    }

    let analyzer = Analyzer { functions };
    for f in &program.functions {
        analyzer.check_function(f)?;
    }
    Ok(())
}

impl<'a> Analyzer<'a> {
    fn check_function(&self, f: &'a FunctionDecl) -> Result<(), SemanticError> {
        let mut scope = Scope::new();
        for p in &f.params {
            scope.declare(&p.name, p.ty, p.span)?;
        }
        self.check_block(&f.body, &mut scope, f)?;
        Ok(())
    }

    fn check_block(
        &self,
        block: &'a BlockStmt,
        scope: &mut Scope,
        func: &'a FunctionDecl,
    ) -> Result<(), SemanticError> {
        scope.push();
        for stmt in &block.statements {
            self.check_stmt(stmt, scope, func)?;
        }
        scope.pop();
        Ok(())
    }

    fn check_stmt(
        &self,
        stmt: &'a Stmt,
        scope: &mut Scope,
        func: &'a FunctionDecl,
    ) -> Result<(), SemanticError> {
        match stmt {
            Stmt::VarDecl(decl) => {
                if let Some(init) = &decl.init {
                    self.check_expr_expected(init, decl.ty, scope)?;
                }
                scope.declare(&decl.name, decl.ty, decl.span)?;
                Ok(())
            }
            Stmt::Block(b) => self.check_block(b, scope, func),
            Stmt::If(s) => {
                let cond_ty = self.infer_expr(&s.condition, scope)?;
                expect_type(TypeNode::Bool, cond_ty, s.condition.span())?;
                self.check_stmt(&s.then_branch, scope, func)?;
                if let Some(else_branch) = &s.else_branch {
                    self.check_stmt(else_branch, scope, func)?;
                }
                Ok(())
            }
            Stmt::For(s) => {
                scope.push();
                if let Some(init) = &s.init {
                    self.check_stmt(init, scope, func)?;
                }
                if let Some(cond) = &s.condition {
                    let ty = self.infer_expr(cond, scope)?;
                    expect_type(TypeNode::Bool, ty, cond.span())?;
                }
                if let Some(update) = &s.update {
                    self.infer_expr(update, scope)?;
                }
                self.check_stmt(&s.body, scope, func)?;
                scope.pop();
                Ok(())
            }
            Stmt::Return(s) => match (&s.value, func.return_ty) {
                (None, TypeNode::Void) => Ok(()),
                (None, expected) => Err(SemanticError::MissingReturnValue {
                    expected,
                    span: s.span,
                }),
                (Some(expr), expected) => {
                    let found = self.infer_expr(expr, scope)?;
                    if found != expected {
                        return Err(SemanticError::ReturnTypeMismatch {
                            name: func.name.clone(),
                            expected,
                            found,
                            span: s.span,
                        });
                    }
                    Ok(())
                }
            },
            Stmt::Expr(s) => {
                self.infer_expr(&s.expr, scope)?;
                Ok(())
            }
        }
    }

    /// Type-check `expr` against a known expected type. The only node that
    /// needs this (rather than `infer_expr`) is `ArrayInitExpr`, which has
    /// no type of its own.
    fn check_expr_expected(
        &self,
        expr: &Expr,
        expected: TypeNode,
        scope: &mut Scope,
    ) -> Result<(), SemanticError> {
        if let Expr::ArrayInit(init) = expr {
            if !expected.is_array() {
                return Err(SemanticError::ArrayInitNeedsArrayContext {
                    found: expected,
                    span: init.span,
                });
            }
            let size_ty = self.infer_expr(&init.size, scope)?;
            if size_ty != TypeNode::Int {
                return Err(SemanticError::InvalidArraySizeType {
                    found: size_ty,
                    span: init.size.span(),
                });
            }
            return Ok(());
        }
        let found = self.infer_expr(expr, scope)?;
        expect_type(expected, found, expr.span())
    }

    fn infer_expr(&self, expr: &Expr, scope: &mut Scope) -> Result<TypeNode, SemanticError> {
        match expr {
            Expr::Literal(lit) => Ok(match lit.value {
                LiteralValue::Int(_) => TypeNode::Int,
                LiteralValue::Float(_) => TypeNode::Float,
                LiteralValue::Bool(_) => TypeNode::Bool,
            }),
            Expr::Variable(v) => scope.lookup(&v.name).ok_or_else(|| SemanticError::UndefinedVariable {
                name: v.name.clone(),
                span: v.span,
            }),
            Expr::Grouping(g) => self.infer_expr(&g.inner, scope),
            Expr::Unary(u) => {
                let operand_ty = self.infer_expr(&u.operand, scope)?;
                match u.op {
                    UnaryOp::Neg => {
                        if operand_ty != TypeNode::Int && operand_ty != TypeNode::Float {
                            return Err(SemanticError::TypeMismatch {
                                expected: TypeNode::Int,
                                found: operand_ty,
                                span: u.span,
                            });
                        }
                        Ok(operand_ty)
                    }
                    UnaryOp::Not => {
                        if operand_ty != TypeNode::Bool {
                            return Err(SemanticError::LogicalOnNonBool {
                                found: operand_ty,
                                span: u.span,
                            });
                        }
                        Ok(TypeNode::Bool)
                    }
                }
            }
            Expr::Binary(b) => self.infer_binary(b, scope),
            Expr::Assign(a) => {
                let target_ty = match a.target.as_ref() {
                    Expr::Variable(v) => scope.lookup(&v.name).ok_or_else(|| {
                        SemanticError::UndefinedVariable {
                            name: v.name.clone(),
                            span: v.span,
                        }
                    })?,
                    Expr::ArrayAccess(_) => self.infer_expr(&a.target, scope)?,
                    _ => return Err(SemanticError::InvalidAssignmentTarget { span: a.span }),
                };
                self.check_expr_expected(&a.value, target_ty, scope)?;
                Ok(target_ty)
            }
            Expr::Call(call) => self.infer_call(call, scope),
            Expr::ArrayAccess(access) => {
                let array_ty = self.infer_expr(&access.array, scope)?;
                let elem_ty = array_ty
                    .element_type()
                    .ok_or(SemanticError::NotAnArray {
                        found: array_ty,
                        span: access.span,
                    })?;
                let index_ty = self.infer_expr(&access.index, scope)?;
                if index_ty != TypeNode::Int {
                    return Err(SemanticError::InvalidIndexType {
                        found: index_ty,
                        span: access.index.span(),
                    });
                }
                Ok(elem_ty)
            }
            Expr::ArrayInit(init) => Err(SemanticError::ArrayInitNeedsArrayContext {
                found: TypeNode::Void,
                span: init.span,
            }),
        }
    }

    fn infer_binary(&self, b: &BinaryExpr, scope: &mut Scope) -> Result<TypeNode, SemanticError> {
        let left = self.infer_expr(&b.left, scope)?;
        let right = self.infer_expr(&b.right, scope)?;

        match b.op {
            BinaryOp::And | BinaryOp::Or => {
                if left != TypeNode::Bool {
                    return Err(SemanticError::LogicalOnNonBool { found: left, span: b.span });
                }
                if right != TypeNode::Bool {
                    return Err(SemanticError::LogicalOnNonBool { found: right, span: b.span });
                }
                Ok(TypeNode::Bool)
            }
            BinaryOp::Mod => {
                if left != TypeNode::Int {
                    return Err(SemanticError::ModOnNonInt { found: left, span: b.span });
                }
                expect_type(TypeNode::Int, right, b.span)?;
                Ok(TypeNode::Int)
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                expect_type(left, right, b.span)?;
                if left != TypeNode::Int && left != TypeNode::Float {
                    return Err(SemanticError::TypeMismatch {
                        expected: TypeNode::Int,
                        found: left,
                        span: b.span,
                    });
                }
                Ok(TypeNode::Bool)
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                expect_type(left, right, b.span)?;
                if left != TypeNode::Int && left != TypeNode::Float {
                    return Err(SemanticError::TypeMismatch {
                        expected: TypeNode::Int,
                        found: left,
                        span: b.span,
                    });
                }
                Ok(left)
            }
        }
    }

    fn infer_call(&self, call: &CallExpr, scope: &mut Scope) -> Result<TypeNode, SemanticError> {
        if let Some(&(_, arity)) = BUILTINS.iter().find(|(name, _)| *name == call.callee) {
            if call.args.len() != arity {
                return Err(SemanticError::ArgumentCountMismatch {
                    name: call.callee.clone(),
                    expected: arity,
                    found: call.args.len(),
                    span: call.span,
                });
            }
            let arg_ty = self.infer_expr(&call.args[0], scope)?;
            if (call.callee == "printArray" || call.callee == "length") && !arg_ty.is_array() {
                return Err(SemanticError::NotAnArray {
                    found: arg_ty,
                    span: call.span,
                });
            }
            return Ok(if call.callee == "length" {
                TypeNode::Int
            } else {
                TypeNode::Void
            });
        }

        let sig = self
            .functions
            .get(call.callee.as_str())
            .ok_or_else(|| SemanticError::UndefinedFunction {
                name: call.callee.clone(),
                span: call.span,
            })?;
        if sig.params.len() != call.args.len() {
            return Err(SemanticError::ArgumentCountMismatch {
                name: call.callee.clone(),
                expected: sig.params.len(),
                found: call.args.len(),
                span: call.span,
            });
        }
        for (arg, &expected) in call.args.iter().zip(&sig.params) {
            self.check_expr_expected(arg, expected, scope)?;
        }
        Ok(sig.return_ty)
    }
}

fn expect_type(expected: TypeNode, found: TypeNode, span: Span) -> Result<(), SemanticError> {
    if expected == found {
        Ok(())
    } else {
        Err(SemanticError::TypeMismatch {
            expected,
            found,
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lexer::lex;
    use crate::front::parser::parse;

    fn check(src: &str) -> Result<(), SemanticError> {
        let program = parse(&lex(src).unwrap()).unwrap();
        analyze(&program)
    }

    #[test]
    fn accepts_well_typed_function() {
        assert!(check("fn add(int a, int b) int { return a + b; }").is_ok());
    }

    #[test]
    fn rejects_int_plus_float() {
        assert!(matches!(
            check("fn f() void { let int a = 1; let float b = 1.0; a = 0; print(a + b); }"),
            Err(SemanticError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_mod_on_float() {
        assert!(matches!(
            check("fn f() void { let float a = 1.0; let float b = 1.0; print(a % b); }"),
            Err(SemanticError::ModOnNonInt { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_declaration_in_same_scope() {
        assert!(matches!(
            check("fn f() void { let int a = 1; let int a = 2; }"),
            Err(SemanticError::DuplicateDeclaration { .. })
        ));
    }

    #[test]
    fn resolves_array_init_type_from_var_decl() {
        assert!(check("fn f() void { let int[] a = new int[10]; }").is_ok());
    }

    #[test]
    fn rejects_array_init_without_array_context() {
        // `new` assigned to a non-array-typed local is a type mismatch.
        assert!(matches!(
            check("fn f() void { let int a = new int[10]; }"),
            Err(SemanticError::ArrayInitNeedsArrayContext { .. })
        ));
    }

    #[test]
    fn rejects_non_int_array_index() {
        assert!(matches!(
            check("fn f() void { let int[] a = new int[10]; let float i = 1.0; let int x = a[i]; }"),
            Err(SemanticError::InvalidIndexType { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_function_names() {
        assert!(matches!(
            check("fn f() void { } fn f() void { }"),
            Err(SemanticError::DuplicateFunction { .. })
        ));
    }

    #[test]
    fn rejects_wrong_argument_count() {
        assert!(matches!(
            check("fn g(int a) void { } fn f() void { g(); }"),
            Err(SemanticError::ArgumentCountMismatch { .. })
        ));
    }

    #[test]
    fn length_of_an_array_is_int() {
        assert!(check("fn f() void { let int[] a = new int[10]; let int n = length(a); }").is_ok());
    }

    #[test]
    fn length_of_a_non_array_is_rejected() {
        assert!(matches!(
            check("fn f() void { let int a = 1; let int n = length(a); }"),
            Err(SemanticError::NotAnArray { .. })
        ));
    }
}
