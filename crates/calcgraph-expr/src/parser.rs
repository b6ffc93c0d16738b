//! Recursive-descent parser over the token stream produced by [`crate::lexer`].

use crate::lexer::{tokenize, Token};
use crate::ExprError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Str(String),
    List(Vec<Expr>),
    Ident(String),
    Call(String, Vec<Expr>),
    BinOp(Box<Expr>, BinOpKind, Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub ident: String,
    pub expr: Expr,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Token::Newline | Token::Semicolon) {
            self.advance();
        }
    }

    fn expect(&mut self, tok: &Token, what: &str) -> Result<(), ExprError> {
        if self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(ExprError::Parse(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, ExprError> {
        let mut stmts = Vec::new();
        self.skip_separators();
        while *self.peek() != Token::Eof {
            stmts.push(self.parse_stmt()?);
            self.skip_separators();
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ExprError> {
        let ident = match self.advance() {
            Token::Ident(name) => name,
            other => return Err(ExprError::Parse(format!("expected identifier, found {other:?}"))),
        };
        self.expect(&Token::Equals, "'='")?;
        let expr = self.parse_expr()?;
        Ok(Stmt { ident, expr })
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOpKind::Add,
                Token::Minus => BinOpKind::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOpKind::Mul,
                Token::Slash => BinOpKind::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr, ExprError> {
        let base = self.parse_primary()?;
        if *self.peek() == Token::Pow {
            self.advance();
            let exp = self.parse_factor()?;
            Ok(Expr::BinOp(Box::new(base), BinOpKind::Pow, Box::new(exp)))
        } else {
            Ok(base)
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::LParen => {
                let e = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(e)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if *self.peek() != Token::RBracket {
                    items.push(self.parse_expr()?);
                    while *self.peek() == Token::Comma {
                        self.advance();
                        items.push(self.parse_expr()?);
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if *self.peek() != Token::RParen {
                        args.push(self.parse_expr()?);
                        while *self.peek() == Token::Comma {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Token::RParen, "')'")?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(ExprError::Parse(format!("unexpected token {other:?}"))),
        }
    }
}

pub fn parse_program(source: &str) -> Result<Vec<Stmt>, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_precedence() {
        let stmts = parse_program("z = a + b * c").unwrap();
        assert_eq!(stmts.len(), 1);
        match &stmts[0].expr {
            Expr::BinOp(_, BinOpKind::Add, rhs) => {
                assert!(matches!(**rhs, Expr::BinOp(_, BinOpKind::Mul, _)));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn parses_call_with_list_argument() {
        let stmts = parse_program(r#"z = sum(x, ["a", "b"])"#).unwrap();
        match &stmts[0].expr {
            Expr::Call(name, args) => {
                assert_eq!(name, "sum");
                assert_eq!(args.len(), 2);
                assert!(matches!(&args[1], Expr::List(items) if items.len() == 2));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn trailing_operator_is_a_parse_error() {
        assert!(parse_program("z = 1 +").is_err());
    }
}
