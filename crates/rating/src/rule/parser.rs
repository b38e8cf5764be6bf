use quota_core::{QuotaError, QuotaResult};
use rust_decimal::Decimal;

use super::lexer::{tokenize, Spanned, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(Decimal),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Parsed activation rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Variable(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// Limits applied while parsing untrusted rules.
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_length: usize,
    pub max_depth: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_length: 4096,
            max_depth: 64,
        }
    }
}

pub fn parse(source: &str, limits: ParseLimits) -> QuotaResult<Expr> {
    if source.len() > limits.max_length {
        return Err(QuotaError::RuleEvaluation(format!(
            "rule is {} bytes long; the limit is {}",
            source.len(),
            limits.max_length
        )));
    }
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth: limits.max_depth,
        end: source.len(),
    };

    let expr = parser.conditional()?;
    parser.eat(&Token::Semicolon);
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(QuotaError::RuleEvaluation(format!(
            "unexpected {:?} at position {}",
            extra.token, extra.offset
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |s| s.offset)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> QuotaResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("{:?}", token)))
        }
    }

    fn unexpected(&self, wanted: &str) -> QuotaError {
        match self.peek() {
            Some(found) => QuotaError::RuleEvaluation(format!(
                "expected {} but found {:?} at position {}",
                wanted,
                found,
                self.offset()
            )),
            None => QuotaError::RuleEvaluation(format!("expected {} but the rule ended", wanted)),
        }
    }

    fn enter(&mut self) -> QuotaResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(QuotaError::RuleEvaluation(format!(
                "rule nesting exceeds the maximum depth of {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn conditional(&mut self) -> QuotaResult<Expr> {
        self.enter()?;
        let condition = self.logical_or()?;
        let expr = if self.eat(&Token::Question) {
            let then = self.conditional()?;
            self.expect(Token::Colon)?;
            let otherwise = self.conditional()?;
            Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise))
        } else {
            condition
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn logical_or(&mut self) -> QuotaResult<Expr> {
        let mut left = self.logical_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.logical_and()?;
            left = Expr::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> QuotaResult<Expr> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.equality()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> QuotaResult<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                Some(Token::EqEqEq) => BinaryOp::StrictEq,
                Some(Token::NotEqEq) => BinaryOp::StrictNotEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn comparison(&mut self) -> QuotaResult<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> QuotaResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> QuotaResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> QuotaResult<Expr> {
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> QuotaResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.peek().cloned() {
                    Some(Token::Ident(name)) => {
                        self.pos += 1;
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    _ => return Err(self.unexpected("a property name")),
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.conditional()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.peek() == Some(&Token::LParen) {
                return Err(QuotaError::RuleEvaluation(format!(
                    "function calls are not allowed (position {})",
                    self.offset()
                )));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> QuotaResult<Expr> {
        let token = self.peek().cloned().ok_or_else(|| self.unexpected("an expression"))?;
        let expr = match token {
            Token::Number(n) => Expr::Literal(Literal::Number(n)),
            Token::Str(s) => Expr::Literal(Literal::Str(s)),
            Token::True => Expr::Literal(Literal::Bool(true)),
            Token::False => Expr::Literal(Literal::Bool(false)),
            Token::Null => Expr::Literal(Literal::Null),
            Token::Ident(name) => Expr::Variable(name),
            Token::LParen => {
                self.pos += 1;
                let inner = self.conditional()?;
                self.expect(Token::RParen)?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.pos += 1;
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn p(source: &str) -> Expr {
        parse(source, ParseLimits::default()).unwrap()
    }

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Variable(name.into()))
    }

    fn num(n: Decimal) -> Box<Expr> {
        Box::new(Expr::Literal(Literal::Number(n)))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            p("a + b * 2"),
            Expr::Binary(
                BinaryOp::Add,
                var("a"),
                Box::new(Expr::Binary(BinaryOp::Mul, var("b"), num(dec!(2))))
            )
        );
        assert_eq!(
            p("a || b && c"),
            Expr::Logical(
                LogicalOp::Or,
                var("a"),
                Box::new(Expr::Logical(LogicalOp::And, var("b"), var("c")))
            )
        );
    }

    #[test]
    fn test_member_index_and_ternary() {
        let expr = p("x.tariffs[0].value > 1 ? 2 : 3;");
        let Expr::Conditional(condition, _, _) = expr else {
            panic!("expected a conditional");
        };
        let Expr::Binary(BinaryOp::Gt, left, _) = *condition else {
            panic!("expected a comparison");
        };
        assert_eq!(
            *left,
            Expr::Member(
                Box::new(Expr::Index(
                    Box::new(Expr::Member(var("x"), "tariffs".into())),
                    num(dec!(0))
                )),
                "value".into()
            )
        );
    }

    #[test]
    fn test_rejects_calls_and_trailing_input() {
        assert!(parse("print(1)", ParseLimits::default()).is_err());
        assert!(parse("1 2", ParseLimits::default()).is_err());
        assert!(parse("(1", ParseLimits::default()).is_err());
        assert!(parse("", ParseLimits::default()).is_err());
        assert!(parse("a ? 1", ParseLimits::default()).is_err());
    }

    #[test]
    fn test_limits() {
        let limits = ParseLimits {
            max_length: 16,
            max_depth: 8,
        };
        assert!(parse("account.name == 'a-very-long-name'", limits).is_err());
        let deep = ParseLimits {
            max_length: 64,
            max_depth: 8,
        };
        assert!(parse("((((((((((1))))))))))", deep).is_err());
        assert!(parse("(((((1)))))", deep).is_ok());
        assert!(parse("!!!!!!!!!!true", limits).is_err());
        assert!(parse("((1))", limits).is_ok());
    }
}
