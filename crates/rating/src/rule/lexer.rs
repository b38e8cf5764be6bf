use quota_core::{QuotaError, QuotaResult};
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(Decimal),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Question,
    Colon,
    Semicolon,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    AndAnd,
    OrOr,
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn error(offset: usize, message: impl std::fmt::Display) -> QuotaError {
    QuotaError::RuleEvaluation(format!("{} at position {}", message, offset))
}

pub fn tokenize(source: &str) -> QuotaResult<Vec<Spanned>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|&(_, c)| c);

    while let Some(&(offset, c)) = chars.get(i) {
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let starts_number = c.is_ascii_digit() || (c == '.' && peek(i + 1).is_some_and(|n| n.is_ascii_digit()));
        if starts_number {
            let start = i;
            while peek(i).is_some_and(|n| n.is_ascii_digit() || n == '.') {
                i += 1;
            }
            if peek(i).is_some_and(|n| n == 'e' || n == 'E') {
                i += 1;
                if peek(i).is_some_and(|n| n == '+' || n == '-') {
                    i += 1;
                }
                while peek(i).is_some_and(|n| n.is_ascii_digit()) {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            let number = if text.contains(['e', 'E']) {
                Decimal::from_scientific(&text)
            } else {
                Decimal::from_str(&text)
            }
            .map_err(|_| error(offset, format!("invalid number [{}]", text)))?;
            tokens.push(Spanned { token: Token::Number(number), offset });
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            loop {
                match peek(i) {
                    None => return Err(error(offset, "unterminated string")),
                    Some(ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = peek(i + 1).ok_or_else(|| error(offset, "unterminated string"))?;
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                        i += 2;
                    }
                    Some(ch) => {
                        value.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Spanned { token: Token::Str(value), offset });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while peek(i).is_some_and(|n| n.is_alphanumeric() || n == '_' || n == '$') {
                i += 1;
            }
            let word: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            let token = match word.as_str() {
                "true" => Token::True,
                "false" => Token::False,
                "null" | "undefined" => Token::Null,
                _ => Token::Ident(word),
            };
            tokens.push(Spanned { token, offset });
            continue;
        }

        let next = peek(i + 1);
        let after = peek(i + 2);
        let (token, width) = match (c, next, after) {
            ('=', Some('='), Some('=')) => (Token::EqEqEq, 3),
            ('!', Some('='), Some('=')) => (Token::NotEqEq, 3),
            ('=', Some('='), _) => (Token::EqEq, 2),
            ('!', Some('='), _) => (Token::NotEq, 2),
            ('<', Some('='), _) => (Token::Le, 2),
            ('>', Some('='), _) => (Token::Ge, 2),
            ('&', Some('&'), _) => (Token::AndAnd, 2),
            ('|', Some('|'), _) => (Token::OrOr, 2),
            ('=', _, _) => return Err(error(offset, "assignments are not allowed")),
            ('(', _, _) => (Token::LParen, 1),
            (')', _, _) => (Token::RParen, 1),
            ('[', _, _) => (Token::LBracket, 1),
            (']', _, _) => (Token::RBracket, 1),
            ('.', _, _) => (Token::Dot, 1),
            ('?', _, _) => (Token::Question, 1),
            (':', _, _) => (Token::Colon, 1),
            (';', _, _) => (Token::Semicolon, 1),
            ('!', _, _) => (Token::Bang, 1),
            ('+', _, _) => (Token::Plus, 1),
            ('-', _, _) => (Token::Minus, 1),
            ('*', _, _) => (Token::Star, 1),
            ('/', _, _) => (Token::Slash, 1),
            ('%', _, _) => (Token::Percent, 1),
            ('<', _, _) => (Token::Lt, 1),
            ('>', _, _) => (Token::Gt, 1),
            (other, _, _) => return Err(error(offset, format!("unexpected character [{}]", other))),
        };
        tokens.push(Spanned { token, offset });
        i += width;
    }

    Ok(tokens)
}
