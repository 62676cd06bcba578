//! Pure `AST -> AST` constant folding. Evaluates literal-only arithmetic,
//! comparison, and logical subtrees at compile time. Idempotent:
//! `fold(fold(p)) == fold(p)`, since a fully folded tree has no
//! literal-only subtree left to fold further.

use crate::front::ast::*;

pub fn fold_program(program: Program) -> Program {
    Program {
        functions: program.functions.into_iter().map(fold_function).collect(),
    }
}

fn fold_function(f: FunctionDecl) -> FunctionDecl {
    FunctionDecl {
        body: fold_block(f.body),
        ..f
    }
}

fn fold_block(block: BlockStmt) -> BlockStmt {
    BlockStmt {
        statements: block.statements.into_iter().map(fold_stmt).collect(),
        ..block
    }
}

fn fold_stmt(stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::VarDecl(d) => Stmt::VarDecl(VarDecl {
            init: d.init.map(fold_expr),
            ..d
        }),
        Stmt::Block(b) => Stmt::Block(fold_block(b)),
        Stmt::If(s) => Stmt::If(IfStmt {
            condition: fold_expr(s.condition),
            then_branch: Box::new(fold_stmt(*s.then_branch)),
            else_branch: s.else_branch.map(|b| Box::new(fold_stmt(*b))),
            ..s
        }),
        Stmt::For(s) => Stmt::For(ForStmt {
            init: s.init.map(|i| Box::new(fold_stmt(*i))),
            condition: s.condition.map(fold_expr),
            update: s.update.map(fold_expr),
            body: Box::new(fold_stmt(*s.body)),
            ..s
        }),
        Stmt::Return(s) => Stmt::Return(ReturnStmt {
            value: s.value.map(fold_expr),
            ..s
        }),
        Stmt::Expr(s) => Stmt::Expr(ExprStmt {
            expr: fold_expr(s.expr),
            ..s
        }),
    }
}

fn fold_expr(expr: Expr) -> Expr {
    match expr {
        Expr::Grouping(g) => {
            let inner = fold_expr(*g.inner);
            if let Expr::Literal(_) = &inner {
                inner
            } else {
                Expr::Grouping(GroupingExpr {
                    inner: Box::new(inner),
                    span: g.span,
                })
            }
        }
        Expr::Unary(u) => {
            let operand = fold_expr(*u.operand);
            if let Expr::Literal(lit) = &operand {
                if let Some(folded) = fold_unary(u.op, lit.value) {
                    return Expr::Literal(LiteralExpr {
                        value: folded,
                        span: u.span,
                    });
                }
            }
            Expr::Unary(UnaryExpr {
                op: u.op,
                operand: Box::new(operand),
                span: u.span,
            })
        }
        Expr::Binary(b) => {
            let left = fold_expr(*b.left);
            let right = fold_expr(*b.right);
            if let (Expr::Literal(l), Expr::Literal(r)) = (&left, &right) {
                if let Some(folded) = fold_binary(b.op, l.value, r.value) {
                    return Expr::Literal(LiteralExpr {
                        value: folded,
                        span: b.span,
                    });
                }
            }
            Expr::Binary(BinaryExpr {
                op: b.op,
                left: Box::new(left),
                right: Box::new(right),
                span: b.span,
            })
        }
        Expr::Assign(a) => Expr::Assign(AssignExpr {
            target: Box::new(fold_expr(*a.target)),
            value: Box::new(fold_expr(*a.value)),
            span: a.span,
        }),
        Expr::Call(c) => Expr::Call(CallExpr {
            args: c.args.into_iter().map(fold_expr).collect(),
            ..c
        }),
        Expr::ArrayAccess(a) => Expr::ArrayAccess(ArrayAccessExpr {
            array: Box::new(fold_expr(*a.array)),
            index: Box::new(fold_expr(*a.index)),
            span: a.span,
        }),
        Expr::ArrayInit(a) => Expr::ArrayInit(ArrayInitExpr {
            size: Box::new(fold_expr(*a.size)),
            span: a.span,
        }),
        literal_or_variable => literal_or_variable,
    }
}

fn fold_unary(op: UnaryOp, operand: LiteralValue) -> Option<LiteralValue> {
    match (op, operand) {
        (UnaryOp::Neg, LiteralValue::Int(v)) => Some(LiteralValue::Int(v.wrapping_neg())),
        (UnaryOp::Neg, LiteralValue::Float(v)) => Some(LiteralValue::Float(-v)),
        (UnaryOp::Not, LiteralValue::Bool(v)) => Some(LiteralValue::Bool(!v)),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, left: LiteralValue, right: LiteralValue) -> Option<LiteralValue> {
    use LiteralValue::*;
    match (left, right) {
        (Int(a), Int(b)) => fold_int_binary(op, a, b),
        (Float(a), Float(b)) => fold_float_binary(op, a, b),
        (Bool(a), Bool(b)) => fold_bool_binary(op, a, b),
        _ => None,
    }
}

fn fold_int_binary(op: BinaryOp, a: i64, b: i64) -> Option<LiteralValue> {
    use BinaryOp::*;
    Some(match op {
        Add => LiteralValue::Int(a.wrapping_add(b)),
        Sub => LiteralValue::Int(a.wrapping_sub(b)),
        Mul => LiteralValue::Int(a.wrapping_mul(b)),
        Div if b != 0 => LiteralValue::Int(a.wrapping_div(b)),
        Mod if b != 0 => LiteralValue::Int(a.wrapping_rem(b)),
        Eq => LiteralValue::Bool(a == b),
        Ne => LiteralValue::Bool(a != b),
        Lt => LiteralValue::Bool(a < b),
        Le => LiteralValue::Bool(a <= b),
        Gt => LiteralValue::Bool(a > b),
        Ge => LiteralValue::Bool(a >= b),
        // Division/modulo by a literal zero is left unfolded: it is a
        // runtime DIVISION_BY_ZERO, not a compile-time constant.
        Div | Mod => return None,
        And | Or => return None,
    })
}

fn fold_float_binary(op: BinaryOp, a: f64, b: f64) -> Option<LiteralValue> {
    use BinaryOp::*;
    Some(match op {
        Add => LiteralValue::Float(a + b),
        Sub => LiteralValue::Float(a - b),
        Mul => LiteralValue::Float(a * b),
        Div => LiteralValue::Float(a / b),
        Eq => LiteralValue::Bool(a == b),
        Ne => LiteralValue::Bool(a != b),
        Lt => LiteralValue::Bool(a < b),
        Le => LiteralValue::Bool(a <= b),
        Gt => LiteralValue::Bool(a > b),
        Ge => LiteralValue::Bool(a >= b),
        Mod | And | Or => return None,
    })
}

fn fold_bool_binary(op: BinaryOp, a: bool, b: bool) -> Option<LiteralValue> {
    match op {
        BinaryOp::And => Some(LiteralValue::Bool(a && b)),
        BinaryOp::Or => Some(LiteralValue::Bool(a || b)),
        BinaryOp::Eq => Some(LiteralValue::Bool(a == b)),
        BinaryOp::Ne => Some(LiteralValue::Bool(a != b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lexer::lex;
    use crate::front::parser::parse;

    fn fold_src(src: &str) -> Program {
        fold_program(parse(&lex(src).unwrap()).unwrap())
    }

    #[test]
    fn folds_int_arithmetic() {
        let program = fold_src("fn f() int { return 1 + 2 * 3; }");
        let Stmt::Return(r) = &program.functions[0].body.statements[0] else {
            panic!()
        };
        assert_eq!(
            r.value,
            Some(Expr::Literal(LiteralExpr {
                value: LiteralValue::Int(7),
                span: r.value.as_ref().unwrap().span(),
            }))
        );
    }

    #[test]
    fn does_not_fold_division_by_literal_zero() {
        let program = fold_src("fn f() int { return 1 / 0; }");
        let Stmt::Return(r) = &program.functions[0].body.statements[0] else {
            panic!()
        };
        assert!(matches!(r.value, Some(Expr::Binary(_))));
    }

    #[test]
    fn folding_is_idempotent() {
        let once = fold_src("fn f() int { return (1 + 2) * (3 + 4); }");
        let twice = fold_program(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn does_not_fold_expressions_with_variables() {
        let program = fold_src("fn f(int x) int { return x + 1; }");
        let Stmt::Return(r) = &program.functions[0].body.statements[0] else {
            panic!()
        };
        assert!(matches!(r.value, Some(Expr::Binary(_))));
    }
}
