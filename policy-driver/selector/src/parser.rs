use crate::{
    ast::Expr,
    token::{tokenize, Token, TokenKind},
    ParseError,
};

/// Parses a selector expression into its AST. An empty (or all-whitespace)
/// input is the match-everything selector.
pub(crate) fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    if tokens[0].kind == TokenKind::Eof {
        return Ok(Expr::All);
    }
    let mut parser = Parser { tokens, idx: 0 };
    // `||` binds loosest, so the grammar starts there.
    let expr = parser.or_expr()?;
    match parser.peek().kind {
        TokenKind::Eof => Ok(expr),
        _ => Err(ParseError::TrailingContent(parser.peek().pos)),
    }
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.idx]
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.idx].clone();
        if self.idx + 1 < self.tokens.len() {
            self.idx += 1;
        }
        token
    }

    /// One or more `&&` terms separated by `||`.
    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut operands = vec![self.and_expr()?];
        while self.peek().kind == TokenKind::Or {
            self.bump();
            operands.push(self.and_expr()?);
        }
        if operands.len() == 1 {
            Ok(operands.pop().unwrap())
        } else {
            Ok(Expr::Or(operands))
        }
    }

    /// One or more operations separated by `&&`.
    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut operands = vec![self.operation()?];
        while self.peek().kind == TokenKind::And {
            self.bump();
            operands.push(self.operation()?);
        }
        if operands.len() == 1 {
            Ok(operands.pop().unwrap())
        } else {
            Ok(Expr::And(operands))
        }
    }

    /// A single, possibly negated operation, recursing for parenthesised
    /// sub-expressions.
    fn operation(&mut self) -> Result<Expr, ParseError> {
        let mut negated = false;
        while self.peek().kind == TokenKind::Not {
            negated = !negated;
            self.bump();
        }

        let token = self.bump();
        let expr = match token.kind {
            TokenKind::Has(name) => Expr::Has(name),
            TokenKind::All => Expr::All,
            TokenKind::Label(name) => {
                let op = self.bump();
                let eq = match op.kind {
                    TokenKind::Eq => true,
                    TokenKind::Ne => false,
                    _ => return Err(ParseError::ExpectedComparison(op.pos)),
                };
                let literal = self.bump();
                let TokenKind::StringLiteral(value) = literal.kind else {
                    return Err(ParseError::ExpectedString(literal.pos));
                };
                if eq {
                    Expr::Eq(name, value)
                } else {
                    Expr::Ne(name, value)
                }
            }
            TokenKind::StringLiteral(_) => return Err(ParseError::LiteralOnLeft(token.pos)),
            TokenKind::LParen => {
                let inner = self.or_expr()?;
                let close = self.bump();
                if close.kind != TokenKind::RParen {
                    return Err(ParseError::UnbalancedParens(close.pos));
                }
                inner
            }
            TokenKind::Eof => return Err(ParseError::UnexpectedEnd),
            _ => return Err(ParseError::UnexpectedToken(token.pos)),
        };

        if negated {
            Ok(Expr::Not(Box::new(expr)))
        } else {
            Ok(expr)
        }
    }
}
