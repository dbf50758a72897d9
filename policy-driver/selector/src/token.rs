use crate::ParseError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Label(String),
    StringLiteral(String),
    Has(String),
    All,
    Eq,
    Ne,
    In,
    NotIn,
    Not,
    And,
    Or,
    LParen,
    RParen,
    Eof,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '_' | '.' | '/' | '-')
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.bump();
        }
        self.input[start..self.pos].to_string()
    }

    /// Reads the parenthesised argument of `has(...)`, tolerating interior
    /// whitespace.
    fn paren_arg(&mut self) -> Result<String, ParseError> {
        self.skip_whitespace();
        if !matches!(self.peek(), Some(c) if is_ident_start(c)) {
            return Err(ParseError::UnexpectedToken(self.pos));
        }
        let name = self.ident();
        self.skip_whitespace();
        if !self.eat(')') {
            return Err(ParseError::UnbalancedParens(self.pos));
        }
        Ok(name)
    }

    fn string_literal(&mut self, quote: char, start: usize) -> Result<String, ParseError> {
        let lit_start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let lit = self.input[lit_start..self.pos].to_string();
                self.bump();
                return Ok(lit);
            }
            self.bump();
        }
        Err(ParseError::UnterminatedString(start))
    }
}

/// Splits a selector expression into tokens. The set-membership operator
/// words `in` and `not in` are recognised here even though the parser does
/// not accept them yet.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut scanner = Scanner { input, pos: 0 };
    let mut tokens = Vec::new();
    loop {
        scanner.skip_whitespace();
        let pos = scanner.pos;
        let Some(c) = scanner.bump() else {
            tokens.push(Token {
                kind: TokenKind::Eof,
                pos,
            });
            return Ok(tokens);
        };
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '!' => {
                if scanner.eat('=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Not
                }
            }
            '=' => {
                if scanner.eat('=') {
                    TokenKind::Eq
                } else {
                    return Err(ParseError::UnexpectedChar(pos, '='));
                }
            }
            '&' => {
                if scanner.eat('&') {
                    TokenKind::And
                } else {
                    return Err(ParseError::UnexpectedChar(pos, '&'));
                }
            }
            '|' => {
                if scanner.eat('|') {
                    TokenKind::Or
                } else {
                    return Err(ParseError::UnexpectedChar(pos, '|'));
                }
            }
            '"' | '\'' => TokenKind::StringLiteral(scanner.string_literal(c, pos)?),
            c if is_ident_start(c) => {
                scanner.pos = pos;
                let word = scanner.ident();
                match word.as_str() {
                    "has" => {
                        scanner.skip_whitespace();
                        if scanner.eat('(') {
                            TokenKind::Has(scanner.paren_arg()?)
                        } else {
                            TokenKind::Label(word)
                        }
                    }
                    "all" => {
                        scanner.skip_whitespace();
                        if scanner.eat('(') {
                            scanner.skip_whitespace();
                            if !scanner.eat(')') {
                                return Err(ParseError::UnbalancedParens(scanner.pos));
                            }
                            TokenKind::All
                        } else {
                            TokenKind::Label(word)
                        }
                    }
                    "in" => TokenKind::In,
                    "notin" => TokenKind::NotIn,
                    "not" => {
                        let mark = scanner.pos;
                        scanner.skip_whitespace();
                        if matches!(scanner.peek(), Some(c) if is_ident_start(c)) {
                            let next = scanner.ident();
                            if next == "in" {
                                TokenKind::NotIn
                            } else {
                                scanner.pos = mark;
                                TokenKind::Label(word)
                            }
                        } else {
                            scanner.pos = mark;
                            TokenKind::Label(word)
                        }
                    }
                    _ => TokenKind::Label(word),
                }
            }
            other => return Err(ParseError::UnexpectedChar(pos, other)),
        };
        tokens.push(Token { kind, pos });
    }
}
