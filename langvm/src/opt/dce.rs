//! Pure `AST -> AST` dead-code elimination. Runs after constant folding, so
//! that `if` conditions folded down to a literal bool can be resolved here.
//! Drops statements following an unconditional `return` within the same
//! block, and collapses `if` branches whose condition constant-folded to a
//! literal. Idempotent under stable ordering: a second pass finds no
//! trailing-after-return statements and no literal-condition `if`s left.

use crate::front::ast::*;

pub fn eliminate_dead_code(program: Program) -> Program {
    Program {
        functions: program.functions.into_iter().map(dce_function).collect(),
    }
}

fn dce_function(f: FunctionDecl) -> FunctionDecl {
    FunctionDecl {
        body: dce_block(f.body),
        ..f
    }
}

fn dce_block(block: BlockStmt) -> BlockStmt {
    let mut statements = Vec::with_capacity(block.statements.len());
    for stmt in block.statements {
        if matches!(statements.last(), Some(Stmt::Return(_))) {
            break;
        }
        if let Some(stmt) = dce_stmt(stmt) {
            statements.push(stmt);
        }
    }
    BlockStmt { statements, ..block }
}

fn dce_stmt(stmt: Stmt) -> Option<Stmt> {
    match stmt {
        Stmt::If(s) => dce_if(s),
        Stmt::Block(b) => Some(Stmt::Block(dce_block(b))),
        Stmt::For(s) => Some(Stmt::For(ForStmt {
            body: Box::new(dce_stmt(*s.body).unwrap_or_else(|| empty_block(s.span))),
            ..s
        })),
        other => Some(other),
    }
}

fn dce_if(s: IfStmt) -> Option<Stmt> {
    if let Expr::Literal(LiteralExpr {
        value: LiteralValue::Bool(cond),
        ..
    }) = &s.condition
    {
        return if *cond {
            dce_stmt(*s.then_branch)
        } else {
            s.else_branch.and_then(|b| dce_stmt(*b))
        };
    }
    let span = s.span;
    Some(Stmt::If(IfStmt {
        condition: s.condition,
        then_branch: Box::new(dce_stmt(*s.then_branch).unwrap_or_else(|| empty_block(span))),
        else_branch: s.else_branch.and_then(|b| dce_stmt(*b)).map(Box::new),
        span,
    }))
}

fn empty_block(span: crate::span::Span) -> Stmt {
    Stmt::Block(BlockStmt {
        statements: Vec::new(),
        span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lexer::lex;
    use crate::front::parser::parse;
    use crate::opt::constant_fold::fold_program;

    fn dce_src(src: &str) -> Program {
        eliminate_dead_code(fold_program(parse(&lex(src).unwrap()).unwrap()))
    }

    #[test]
    fn drops_statements_after_return() {
        let program = dce_src("fn f() int { return 1; let int a = 2; }");
        assert_eq!(program.functions[0].body.statements.len(), 1);
    }

    #[test]
    fn collapses_constant_true_if() {
        let program = dce_src("fn f() void { if (true) { let int a = 1; } else { let int b = 2; } }");
        let Stmt::Block(b) = &program.functions[0].body.statements[0] else {
            panic!("expected then-branch to survive as a block");
        };
        assert_eq!(b.statements.len(), 1);
    }

    #[test]
    fn collapses_constant_false_if_with_no_else() {
        let program = dce_src("fn f() void { if (false) { let int a = 1; } }");
        assert!(program.functions[0].body.statements.is_empty());
    }

    #[test]
    fn dce_is_idempotent() {
        let once = dce_src("fn f() int { if (1 == 1) { return 1; } return 2; }");
        let twice = eliminate_dead_code(once.clone());
        assert_eq!(once, twice);
    }
}
