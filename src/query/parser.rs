//! Recursive descent parser for the global query grammar
//!
//! Grammar:
//!   query         ::= item (bool item)*
//!   item          ::= backend_query | alias | "(" query ")"
//!   backend_query ::= prefix "{" payload "}"
//!   alias         ::= "A:" identifier
//!   bool          ::= "and not" | "and" | "or" | "xor"
//!
//! Operators are left-associative with a single precedence level; explicit
//! parentheses are the only grouping. Payloads are opaque to this parser.

use crate::core::error::{Error, Result};
use crate::query::ast::{Item, Operator, Query};

// Nested groups deeper than this are rejected rather than risking the stack
const MAX_DEPTH: usize = 50;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Xor,
    Not,
    Backend { prefix: char, payload: String },
    Alias(String),
}

/// Parse a composite query string into its tree form
pub fn parse(text: &str) -> Result<Query> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(Error::Parse {
            position: 0,
            message: "empty query".to_string(),
        });
    }
    let mut parser = Parser { tokens, index: 0 };
    let query = parser.parse_query(0)?;
    if parser.index < parser.tokens.len() {
        return Err(Error::Parse {
            position: parser.tokens[parser.index].1,
            message: "trailing input after query".to_string(),
        });
    }
    Ok(query)
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
            c if is_word_char(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();

                // Backend query: single-char prefix immediately followed by {payload}
                if i < chars.len() && chars[i] == '{' {
                    if word.chars().count() != 1 {
                        return Err(Error::Parse {
                            position: start,
                            message: format!("backend prefix '{word}' must be a single character"),
                        });
                    }
                    let close = chars[i + 1..]
                        .iter()
                        .position(|&c| c == '}')
                        .ok_or(Error::Parse {
                            position: i,
                            message: "unterminated backend payload".to_string(),
                        })?;
                    let payload: String = chars[i + 1..i + 1 + close].iter().collect();
                    i += close + 2;
                    tokens.push((
                        Token::Backend {
                            prefix: word.chars().next().unwrap(),
                            payload,
                        },
                        start,
                    ));
                    continue;
                }

                // Alias: A:name
                if word == "A" && i < chars.len() && chars[i] == ':' {
                    i += 1;
                    let name_start = i;
                    while i < chars.len() && is_word_char(chars[i]) {
                        i += 1;
                    }
                    if i == name_start {
                        return Err(Error::Parse {
                            position: name_start,
                            message: "missing alias name after 'A:'".to_string(),
                        });
                    }
                    let name: String = chars[name_start..i].iter().collect();
                    tokens.push((Token::Alias(name), start));
                    continue;
                }

                let token = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "xor" => Token::Xor,
                    "not" => Token::Not,
                    _ => {
                        return Err(Error::Parse {
                            position: start,
                            message: format!("unexpected token '{word}'"),
                        })
                    }
                };
                tokens.push((token, start));
            }
            _ => {
                return Err(Error::Parse {
                    position: i,
                    message: format!("unexpected character '{c}'"),
                })
            }
        }
    }
    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    index: usize,
}

impl Parser {
    fn parse_query(&mut self, depth: usize) -> Result<Query> {
        if depth > MAX_DEPTH {
            return Err(Error::Parse {
                position: self.position(),
                message: "query nesting too deep".to_string(),
            });
        }

        let first = self.parse_item(depth)?;
        let mut rest = Vec::new();
        while let Some(op) = self.try_operator()? {
            let item = self.parse_item(depth)?;
            rest.push((op, item));
        }
        Ok(Query { first, rest })
    }

    fn parse_item(&mut self, depth: usize) -> Result<Item> {
        let position = self.position();
        match self.next() {
            Some(Token::Backend { prefix, payload }) => Ok(Item::Backend { prefix, payload }),
            Some(Token::Alias(name)) => Ok(Item::Alias(name)),
            Some(Token::LParen) => {
                let inner = self.parse_query(depth + 1)?;
                match self.next() {
                    Some(Token::RParen) => Ok(Item::Group(Box::new(inner))),
                    _ => Err(Error::Parse {
                        position: self.position(),
                        message: "expected ')'".to_string(),
                    }),
                }
            }
            _ => Err(Error::Parse {
                position,
                message: "expected backend query, alias or '('".to_string(),
            }),
        }
    }

    /// Consume an operator if the next token is one; `and not` is a single
    /// difference operator
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
