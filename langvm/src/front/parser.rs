//! Hand-written recursive-descent / Pratt parser over the token stream
//! produced by `lexer.rs`.

use crate::front::ast::*;
use crate::front::lexer::{SpannedToken, Token};
use crate::span::Span;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("parse error at {span}: {message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

pub struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
}

type PResult<T> = Result<T, ParseError>;

pub fn parse(tokens: &[SpannedToken]) -> PResult<Program> {
    Parser::new(tokens).parse_program()
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [SpannedToken]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .or_else(|| self.tokens.last().map(|t| t.span))
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn check(&self, tok: &Token) -> bool {
        self.peek() == Some(tok)
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.check(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token, what: &str) -> PResult<()> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            span: self.peek_span(),
        }
    }

    fn expect_identifier(&mut self) -> PResult<(String, Span)> {
        let span = self.peek_span();
        match self.advance() {
            Some(SpannedToken {
                token: Token::Identifier(name),
                ..
            }) => Ok((name, span)),
            _ => Err(ParseError {
                message: "expected identifier".into(),
                span,
            }),
        }
    }

    fn parse_program(&mut self) -> PResult<Program> {
        let mut functions = Vec::new();
        while self.peek().is_some() {
            functions.push(self.parse_function()?);
        }
        Ok(Program { functions })
    }

    fn parse_type(&mut self) -> PResult<TypeNode> {
        let span = self.peek_span();
        let base = match self.advance().map(|t| t.token) {
            Some(Token::IntType) => TypeNode::Int,
            Some(Token::FloatType) => TypeNode::Float,
            Some(Token::BoolType) => TypeNode::Bool,
            Some(Token::VoidType) => TypeNode::Void,
            _ => {
                return Err(ParseError {
                    message: "expected a type".into(),
                    span,
                })
            }
        };
        if self.eat(&Token::LBracket) {
            self.expect(Token::RBracket, "`]` after `[` in array type")?;
            return match base {
                TypeNode::Int => Ok(TypeNode::IntArray),
                TypeNode::Float => Ok(TypeNode::FloatArray),
                TypeNode::Bool => Ok(TypeNode::BoolArray),
                _ => Err(ParseError {
                    message: "only int, float, bool may form array types".into(),
                    span,
                }),
            };
        }
        Ok(base)
    }

    fn parse_function(&mut self) -> PResult<FunctionDecl> {
        let span = self.peek_span();
        self.expect(Token::Fn, "`fn`")?;
        let (name, _) = self.expect_identifier()?;
        self.expect(Token::LParen, "`(`")?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let pspan = self.peek_span();
                let ty = self.parse_type()?;
                let (pname, _) = self.expect_identifier()?;
                params.push(Param {
                    name: pname,
                    ty,
                    span: pspan,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "`)`")?;
        let return_ty = self.parse_type()?;
        let body = self.parse_block()?;
        Ok(FunctionDecl {
            name,
            params,
            return_ty,
            body,
            span,
        })
    }

    fn parse_block(&mut self) -> PResult<BlockStmt> {
        let span = self.peek_span();
        self.expect(Token::LBrace, "`{`")?;
        let mut statements = Vec::new();
        while !self.check(&Token::RBrace) {
            statements.push(self.parse_stmt()?);
        }
        self.expect(Token::RBrace, "`}`")?;
        Ok(BlockStmt { statements, span })
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        match self.peek() {
            Some(Token::LBrace) => Ok(Stmt::Block(self.parse_block()?)),
            Some(Token::Let) => self.parse_var_decl(),
            Some(Token::If) => self.parse_if(),
            Some(Token::For) => self.parse_for(),
            Some(Token::Return) => self.parse_return(),
            _ => {
                let span = self.peek_span();
                let expr = self.parse_expr()?;
                self.expect(Token::Semicolon, "`;` after expression")?;
                Ok(Stmt::Expr(ExprStmt { expr, span }))
            }
        }
    }

    fn parse_var_decl(&mut self) -> PResult<Stmt> {
        let span = self.peek_span();
        self.expect(Token::Let, "`let`")?;
        let ty = self.parse_type()?;
        let (name, _) = self.expect_identifier()?;
        let init = if self.eat(&Token::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(Token::Semicolon, "`;` after variable declaration")?;
        Ok(Stmt::VarDecl(VarDecl {
            name,
            ty,
            init,
            span,
        }))
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let span = self.peek_span();
        self.expect(Token::If, "`if`")?;
        self.expect(Token::LParen, "`(`")?;
        let condition = self.parse_expr()?;
        self.expect(Token::RParen, "`)`")?;
        let then_branch = Box::new(self.parse_stmt()?);
        let else_branch = if self.eat(&Token::Else) {
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };
        Ok(Stmt::If(IfStmt {
            condition,
            then_branch,
            else_branch,
            span,
        }))
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        let span = self.peek_span();
        self.expect(Token::For, "`for`")?;
        self.expect(Token::LParen, "`(`")?;
        let init = if self.check(&Token::Semicolon) {
            None
        } else if self.check(&Token::Let) {
            Some(Box::new(self.parse_var_decl()?))
        } else {
            let espan = self.peek_span();
            let expr = self.parse_expr()?;
            self.expect(Token::Semicolon, "`;` after for-init")?;
            Some(Box::new(Stmt::Expr(ExprStmt { expr, span: espan })))
        };
        if init.is_none() {
            self.expect(Token::Semicolon, "`;` after empty for-init")?;
        }
        let condition = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(Token::Semicolon, "`;` after for-condition")?;
        let update = if self.check(&Token::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(Token::RParen, "`)`")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For(ForStmt {
            init,
            condition,
            update,
            body,
            span,
        }))
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        let span = self.peek_span();
        self.expect(Token::Return, "`return`")?;
        let value = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(Token::Semicolon, "`;` after return")?;
        Ok(Stmt::Return(ReturnStmt { value, span }))
    }

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let span = self.peek_span();
        let expr = self.parse_or()?;
        if self.eat(&Token::Assign) {
            let value = self.parse_assignment()?;
            return Ok(Expr::Assign(AssignExpr {
                target: Box::new(expr),
                value: Box::new(value),
                span,
            }));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let span = expr.span();
            let right = self.parse_and()?;
            expr = Expr::Binary(BinaryExpr {
                op: BinaryOp::Or,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            });
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_equality()?;
        while self.eat(&Token::AndAnd) {
            let span = expr.span();
            let right = self.parse_equality()?;
            expr = Expr::Binary(BinaryExpr {
                op: BinaryOp::And,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            });
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let span = expr.span();
            let right = self.parse_relational()?;
            expr = Expr::Binary(BinaryExpr {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            });
        }
        Ok(expr)
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let span = expr.span();
            let right = self.parse_additive()?;
            expr = Expr::Binary(BinaryExpr {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            });
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let span = expr.span();
            let right = self.parse_multiplicative()?;
            expr = Expr::Binary(BinaryExpr {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            });
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let span = expr.span();
            let right = self.parse_unary()?;
            expr = Expr::Binary(BinaryExpr {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            });
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let span = self.peek_span();
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryExpr {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                span,
            }));
        }
        if self.eat(&Token::Bang) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryExpr {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            }));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::LBracket) {
                let span = expr.span();
                let index = self.parse_expr()?;
                self.expect(Token::RBracket, "`]` after array index")?;
                expr = Expr::ArrayAccess(ArrayAccessExpr {
                    array: Box::new(expr),
                    index: Box::new(index),
                    span,
                });
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let span = self.peek_span();
        match self.advance().map(|t| t.token) {
            Some(Token::IntLiteral(v)) => Ok(Expr::Literal(LiteralExpr {
                value: LiteralValue::Int(v),
                span,
            })),
            Some(Token::FloatLiteral(v)) => Ok(Expr::Literal(LiteralExpr {
                value: LiteralValue::Float(v),
                span,
            })),
            Some(Token::True) => Ok(Expr::Literal(LiteralExpr {
                value: LiteralValue::Bool(true),
                span,
            })),
            Some(Token::False) => Ok(Expr::Literal(LiteralExpr {
                value: LiteralValue::Bool(false),
                span,
            })),
            Some(Token::New) => {
                let _ty = self.parse_type()?;
                self.expect(Token::LBracket, "`[` after array element type in `new`")?;
                let size = self.parse_expr()?;
                self.expect(Token::RBracket, "`]` after array size")?;
                Ok(Expr::ArrayInit(ArrayInitExpr {
                    size: Box::new(size),
                    span,
                }))
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(Expr::Grouping(GroupingExpr {
                    inner: Box::new(inner),
                    span,
                }))
            }
            Some(Token::Identifier(name)) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen, "`)` after call arguments")?;
                    Ok(Expr::Call(CallExpr {
                        callee: name,
                        args,
                        span,
                    }))
                } else {
                    Ok(Expr::Variable(VariableExpr { name, span }))
                }
            }
            _ => Err(ParseError {
                message: "expected an expression".into(),
                span,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lexer::lex;

    fn parse_src(src: &str) -> PResult<Program> {
        parse(&lex(src).unwrap())
    }

    #[test]
    fn parses_empty_function() {
        let program = parse_src("fn main() void { }").unwrap();
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].name, "main");
    }

    #[test]
    fn parses_arithmetic_with_precedence() {
        let program = parse_src("fn f() int { return 1 + 2 * 3; }").unwrap();
        let Stmt::Return(ret) = &program.functions[0].body.statements[0] else {
            panic!("expected return");
        };
        let Expr::Binary(b) = ret.value.as_ref().unwrap() else {
            panic!("expected binary");
        };
        assert_eq!(b.op, BinaryOp::Add);
    }

    #[test]
    fn parses_array_type_and_new_expr() {
        let program =
            parse_src("fn f() void { let int[] a = new int[5]; }").unwrap();
        let Stmt::VarDecl(decl) = &program.functions[0].body.statements[0] else {
            panic!("expected var decl");
        };
        assert_eq!(decl.ty, TypeNode::IntArray);
        assert!(matches!(decl.init, Some(Expr::ArrayInit(_))));
    }

    #[test]
    fn parses_if_else_and_for() {
        let program = parse_src(
            "fn f() void { if (true) { } else { } for (let int i = 0; i < 1; i = i + 1) { } }",
        )
        .unwrap();
        assert_eq!(program.functions[0].body.statements.len(), 2);
    }

    #[test]
    fn missing_semicolon_is_a_parse_error() {
        assert!(parse_src("fn f() void { let int a = 1 }").is_err());
    }

    #[test]
    fn parses_call_with_args() {
        let program = parse_src("fn f() void { g(1, 2); }").unwrap();
        let Stmt::Expr(stmt) = &program.functions[0].body.statements[0] else {
            panic!("expected expr stmt");
        };
        let Expr::Call(call) = &stmt.expr else {
            panic!("expected call");
        };
        assert_eq!(call.args.len(), 2);
    }
}
