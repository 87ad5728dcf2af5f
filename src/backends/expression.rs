//! Shared expression engine for the Direct and KnownHosts backends
//!
//! Grammar:
//!   expr ::= term (("and not" | "and" | "or" | "xor") term)*
//!   term ::= atom | "(" expr ")"
//!
//! Atoms are node patterns in compact range syntax; what an atom resolves
//! to is up to the caller. Operators are left-associative with a single
//! precedence level, matching the global grammar.

use crate::core::error::{Error, Result};
use crate::nodeset::NodeSet;
use crate::query::ast::Operator;

const MAX_DEPTH: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Atom(String),
    Op(Operator, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate bottom-up, resolving each atom through the supplied closure
    pub fn evaluate(&self, resolve_atom: &dyn Fn(&str) -> Result<NodeSet>) -> Result<NodeSet> {
        match self {
            Expr::Atom(atom) => resolve_atom(atom),
            Expr::Op(op, left, right) => {
                let l = left.evaluate(resolve_atom)?;
                let r = right.evaluate(resolve_atom)?;
                Ok(match op {
                    Operator::Union => &l | &r,
                    Operator::Intersection => &l & &r,
                    Operator::Difference => &l - &r,
                    Operator::SymmetricDifference => &l ^ &r,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Xor,
    Not,
    Atom(String),
}

/// Parse a NodeSet expression
pub fn parse(text: &str) -> Result<Expr> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(Error::Parse {
            position: 0,
            message: "empty expression".to_string(),
        });
    }
    let mut parser = Parser { tokens, index: 0 };
    let expr = parser.parse_expr(0)?;
    if parser.index < parser.tokens.len() {
        return Err(Error::Parse {
            position: parser.tokens[parser.index].1,
            message: "trailing input after expression".to_string(),
        });
    }
    Ok(expr)
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '(' && chars[i] != ')' {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "xor" => Token::Xor,
                    "not" => Token::Not,
                    _ => Token::Atom(word),
                };
                tokens.push((token, start));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    index: usize,
}

impl Parser {
    fn parse_expr(&mut self, depth: usize) -> Result<Expr> {
        if depth > MAX_DEPTH {
            return Err(Error::Parse {
                position: self.position(),
                message: "expression nesting too deep".to_string(),
            });
        }

        let mut expr = self.parse_term(depth)?;
        while let Some(op) = self.try_operator()? {
            let rhs = self.parse_term(depth)?;
            expr = Expr::Op(op, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_term(&mut self, depth: usize) -> Result<Expr> {
        let position = self.position();
        match self.next() {
            Some(Token::Atom(atom)) => Ok(Expr::Atom(atom)),
            Some(Token::LParen) => {
                let inner = self.parse_expr(depth + 1)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::Parse {
                        position: self.position(),
                        message: "expected ')'".to_string(),
                    }),
                }
            }
            _ => Err(Error::Parse {
                position,
                message: "expected node pattern or '('".to_string(),
            }),
        }
    }

    fn try_operator(&mut self) -> Result<Option<Operator>> {
        let op = match self.peek() {
            Some(Token::Or) => Operator::Union,
            Some(Token::Xor) => Operator::SymmetricDifference,
            Some(Token::And) => {
                self.index += 1;
                if matches!(self.peek(), Some(Token::Not)) {
                    self.index += 1;
                    return Ok(Some(Operator::Difference));
                }
                return Ok(Some(Operator::Intersection));
            }
            Some(Token::Not) => {
                return Err(Error::Parse {
                    position: self.position(),
                    message: "'not' is only valid after 'and'".to_string(),
                })
            }
            _ => return Ok(None),
        };
        self.index += 1;
        Ok(Some(op))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(t, _)| t.clone());
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.index)
            .or_else(|| self.tokens.last())
            .map(|(_, p)| *p)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str) -> NodeSet {
        parse(text)
            .unwrap()
            .evaluate(&|atom| NodeSet::parse(atom))
            .unwrap()
    }

    #[test]
    fn test_single_atom() {
        assert_eq!(eval("host[1-3]"), NodeSet::parse("host[1-3]").unwrap());
    }

    #[test]
    fn test_operators() {
        assert_eq!(eval("host[1-3] and host[2-4]"), NodeSet::parse("host[2-3]").unwrap());
        assert_eq!(eval("host1 or host2"), NodeSet::parse("host[1-2]").unwrap());
        assert_eq!(eval("host[1-3] and not host2"), NodeSet::parse("host1,host3").unwrap());
        assert_eq!(eval("host[1-3] xor host[2-4]"), NodeSet::parse("host1,host4").unwrap());
    }

    #[test]
    fn test_parentheses() {
        // left-associative without parens: (a or b) and c
        assert_eq!(eval("host1 or host2 and host2"), NodeSet::parse("host2").unwrap());
        assert_eq!(
            eval("host1 or (host2 and host3)"),
            NodeSet::parse("host1").unwrap()
        );
    }

    #[test]
    fn test_errors() {
        assert!(parse("").is_err());
        assert!(parse("host1 and").is_err());
        assert!(parse("(host1").is_err());
        assert!(parse("not host1").is_err());
        assert!(parse("host1 host2").is_err());
    }
}
