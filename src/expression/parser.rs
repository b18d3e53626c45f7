//! Pratt parser producing an [`Expr`] tree.

use serde_json::Value;

use super::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::lexer::{tokenize, Token};
use super::{number_value, EvalError, MAX_EXPRESSION_LENGTH, MAX_NESTING_DEPTH};

/// Parse a single expression (the text between `{{` and `}}`).
pub fn parse_expression(source: &str) -> Result<Expr, EvalError> {
    if source.len() > MAX_EXPRESSION_LENGTH {
        return Err(EvalError::new(format!(
            "Expression exceeds the maximum length of {} characters",
            MAX_EXPRESSION_LENGTH
        )));
    }
    let tokens = tokenize(source)?;
    if tokens.len() == 1 {
        return Err(EvalError::new("Empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(EvalError::new(format!("Unexpected {}", other.describe()))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn infix(token: &Token) -> Option<(u8, Infix)> {
    let Token::Punct(p) = token else {
        return None;
    };
    let info = match *p {
        "??" => (1, Infix::Logical(LogicalOp::Coalesce)),
        "||" => (2, Infix::Logical(LogicalOp::Or)),
        "&&" => (3, Infix::Logical(LogicalOp::And)),
        "==" => (4, Infix::Binary(BinaryOp::LooseEq)),
        "!=" => (4, Infix::Binary(BinaryOp::LooseNe)),
        "===" => (4, Infix::Binary(BinaryOp::StrictEq)),
        "!==" => (4, Infix::Binary(BinaryOp::StrictNe)),
        "<" => (5, Infix::Binary(BinaryOp::Lt)),
        "<=" => (5, Infix::Binary(BinaryOp::Le)),
        ">" => (5, Infix::Binary(BinaryOp::Gt)),
        ">=" => (5, Infix::Binary(BinaryOp::Ge)),
        "+" => (6, Infix::Binary(BinaryOp::Add)),
        "-" => (6, Infix::Binary(BinaryOp::Sub)),
        "*" => (7, Infix::Binary(BinaryOp::Mul)),
        "/" => (7, Infix::Binary(BinaryOp::Div)),
        "%" => (7, Infix::Binary(BinaryOp::Mod)),
        _ => return None,
    };
    Some(info)
}

impl Parser {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Token::Punct(p) if *p == punct)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), EvalError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(EvalError::new(format!(
                "Expected '{}' but found {}",
                punct,
                self.peek().describe()
            )))
        }
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(EvalError::new("Expression is nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let result = self.conditional();
        self.depth -= 1;
        result
    }

    fn conditional(&mut self) -> Result<Expr, EvalError> {
        let test = self.binary(0)?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.expression()?;
        self.expect(":")?;
        let alternate = self.expression()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut left = self.unary()?;
        while let Some((prec, op)) = infix(self.peek()) {
            if prec < min_prec {
                break;
            }
            self.advance();
            self.enter()?;
            let right = self.binary(prec + 1);
            self.depth -= 1;
            let right = Box::new(right?);
            let lhs = Box::new(left);
            left = match op {
                Infix::Binary(op) => Expr::Binary {
                    op,
                    left: lhs,
                    right,
                },
                Infix::Logical(op) => Expr::Logical {
                    op,
                    left: lhs,
                    right,
                },
            };
            // Each link of a left-associative chain adds a tree level.
            self.enter()?;
        }
        self.depth = base;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            Token::Punct("!") => UnaryOp::Not,
            Token::Punct("-") => UnaryOp::Negate,
            Token::Punct("+") => UnaryOp::Plus,
            _ => return self.postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary();
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn property_name(&mut self) -> Result<String, EvalError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(EvalError::new(format!(
                "Expected property name but found {}",
                other.describe()
            ))),
        }
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                let property = self.property_name()?;
                expr = self.member_or_method(expr, property, false)?;
            } else if self.eat("?.") {
                if self.eat("[") {
                    let index = self.expression()?;
                    self.expect("]")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    };
                } else {
                    let property = self.property_name()?;
                    expr = self.member_or_method(expr, property, true)?;
                }
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                self.depth = base;
                return Ok(expr);
            }
            self.enter()?;
        }
    }

    fn member_or_method(
        &mut self,
        object: Expr,
        property: String,
        optional: bool,
    ) -> Result<Expr, EvalError> {
        if self.is_punct("(") {
            let args = self.arguments()?;
            Ok(Expr::MethodCall {
                receiver: Box::new(object),
                method: property,
                args,
                optional,
            })
        } else {
            Ok(Expr::Member {
                object: Box::new(object),
                property,
                optional,
            })
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, EvalError> {
        self.expect("(")?;
        let mut args = Vec::new();
        while !self.is_punct(")") {
            args.push(self.expression()?);
            if !self.eat(",") {
                break;
            }
        }
        self.expect(")")?;
        Ok(args)
    }

    /// Parameter list of a parenthesized lambda, if the tokens form one.
    fn lambda_params(&self) -> Option<(Vec<String>, usize)> {
        let mut offset = 1;
        let mut params = Vec::new();
        loop {
            match self.peek_at(offset) {
                Token::Punct(")") if params.is_empty() => break,
                Token::Ident(name) => {
                    params.push(name.clone());
                    offset += 1;
                    match self.peek_at(offset) {
                        Token::Punct(",") => offset += 1,
                        Token::Punct(")") => break,
                        _ => return None,
                    }
                }
                _ => return None,
            }
        }
        // offset points at ')'
        match self.peek_at(offset + 1) {
            Token::Punct("=>") => Some((params, offset + 2)),
            _ => None,
        }
    }

    fn lambda_body(&mut self, params: Vec<String>) -> Result<Expr, EvalError> {
        let body = self.expression()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(number_value(n)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Ident(name) => {
                self.advance();
                match name.as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                    _ if self.eat("=>") => self.lambda_body(vec![name]),
                    _ => Ok(Expr::Ident(name)),
                }
            }
            Token::Punct("(") => {
                if let Some((params, next)) = self.lambda_params() {
                    self.pos += next;
                    return self.lambda_body(params);
                }
                self.advance();
                let inner = self.expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                self.advance();
                let mut elements = Vec::new();
                while !self.is_punct("]") {
                    elements.push(self.expression()?);
                    if !self.eat(",") {
                        break;
                    }
                }
                self.expect("]")?;
                Ok(Expr::Array(elements))
            }
            Token::Punct("{") => {
                self.advance();
                let mut entries = Vec::new();
                while !self.is_punct("}") {
                    let key = match self.advance() {
                        Token::Ident(name) => name,
                        Token::Str(s) => s,
                        Token::Number(n) => number_value(n).to_string(),
                        other => {
                            return Err(EvalError::new(format!(
                                "Expected object key but found {}",
                                other.describe()
                            )))
                        }
                    };
                    self.expect(":")?;
                    entries.push((key, self.expression()?));
                    if !self.eat(",") {
                        break;
                    }
                }
                self.expect("}")?;
                Ok(Expr::Object(entries))
            }
            other => Err(EvalError::new(format!("Unexpected {}", other.describe()))),
        }
    }
}
