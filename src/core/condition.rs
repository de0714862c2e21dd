//! Stage run conditions
//!
//! A condition is a small boolean expression over the trigger context:
//!
//! ```text
//! branch == 'main' && event != pull_request
//! ref =~ 'refs/tags/v*' || matrix.os == linux
//! ```
//!
//! `==`/`!=` compare exactly, `=~`/`!~` match a glob pattern. Keys the
//! context does not carry fail closed: the whole condition is false.

use crate::core::context::TriggerContext;
use crate::error::ConditionError;
use glob::Pattern;
use tracing::{debug, warn};

/// A parsed condition expression
#[derive(Debug, Clone)]
pub enum Condition {
    Literal(bool),
    Compare {
        key: String,
        op: CompareOp,
        value: String,
    },
    Matches {
        key: String,
        pattern: Pattern,
        negated: bool,
    },
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
}

/// Evaluate a condition expression against a trigger context
///
/// Malformed expressions and unknown keys both yield `false`.
pub fn evaluate(expression: &str, context: &TriggerContext) -> bool {
    match Condition::parse(expression).and_then(|c| c.check(context)) {
        Ok(result) => result,
        Err(e) => {
            warn!("Condition '{}' evaluated false: {}", expression, e);
            false
        }
    }
}

impl Condition {
    /// Parse an expression. An empty expression is always true.
    pub fn parse(expression: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Ok(Condition::Literal(true));
        }

        let mut parser = Parser { tokens, pos: 0 };
        let condition = parser.parse_or()?;
        if let Some((token, position)) = parser.tokens.get(parser.pos) {
            return Err(ConditionError::UnexpectedToken {
                token: token.to_string(),
                position: *position,
            });
        }
        Ok(condition)
    }

    /// Evaluate against a context; unknown keys are reported as errors
    pub fn check(&self, context: &TriggerContext) -> Result<bool, ConditionError> {
        // Resolve every key first so an unknown key can't be masked by
        // short-circuiting or negation.
        self.ensure_keys(context)?;
        Ok(self.eval(context))
    }

    fn ensure_keys(&self, context: &TriggerContext) -> Result<(), ConditionError> {
        match self {
            Condition::Literal(_) => Ok(()),
            Condition::Compare { key, .. } | Condition::Matches { key, .. } => {
                if context.lookup(key).is_some() {
                    Ok(())
                } else {
                    Err(ConditionError::UnknownKey(key.clone()))
                }
            }
            Condition::Not(inner) => inner.ensure_keys(context),
            Condition::And(a, b) | Condition::Or(a, b) => {
                a.ensure_keys(context)?;
                b.ensure_keys(context)
            }
        }
    }

    fn eval(&self, context: &TriggerContext) -> bool {
        match self {
            Condition::Literal(b) => *b,
            Condition::Compare { key, op, value } => {
                let actual = context.lookup(key).unwrap_or_default();
                let equal = actual == value;
                debug!("condition {} {:?} {} -> {}", key, op, value, equal);
                match op {
                    CompareOp::Eq => equal,
                    CompareOp::Ne => !equal,
                }
            }
            Condition::Matches {
                key,
                pattern,
                negated,
            } => {
                let matched = pattern.matches(context.lookup(key).unwrap_or_default());
                matched != *negated
            }
            Condition::Not(inner) => !inner.eval(context),
            Condition::And(a, b) => a.eval(context) && b.eval(context),
            Condition::Or(a, b) => a.eval(context) || b.eval(context),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Str(String),
    Eq,
    Ne,
    Match,
    NotMatch,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{}", w),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Match => write!(f, "=~"),
            Token::NotMatch => write!(f, "!~"),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '*' | '?' | '[' | ']' | ':' | '+' | '@')
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ConditionError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two_char = match (c, next) {
            ('=', Some('=')) => Some(Token::Eq),
            ('!', Some('=')) => Some(Token::Ne),
            ('=', Some('~')) => Some(Token::Match),
            ('!', Some('~')) => Some(Token::NotMatch),
            ('&', Some('&')) => Some(Token::And),
            ('|', Some('|')) => Some(Token::Or),
            _ => None,
        };
        if let Some(token) = two_char {
            tokens.push((token, pos));
            i += 2;
            continue;
        }

        match c {
            '!' => {
                tokens.push((Token::Not, pos));
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, pos));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, pos));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        Some((_, ch)) if *ch == quote => break,
                        Some((_, ch)) => value.push(*ch),
                        None => return Err(ConditionError::UnterminatedString(pos)),
                    }
                    j += 1;
                }
                tokens.push((Token::Str(value), pos));
                i = j + 1;
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some((_, ch)) = chars.get(i) {
                    if !is_word_char(*ch) {
                        break;
                    }
                    word.push(*ch);
                    i += 1;
                }
                tokens.push((Token::Word(word), pos));
            }
            other => {
                return Err(ConditionError::UnexpectedToken {
                    token: other.to_string(),
                    position: pos,
                })
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Result<(Token, usize), ConditionError> {
        let item = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ConditionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(item)
    }

    fn parse_or(&mut self) -> Result<Condition, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Condition, ConditionError> {
        let (token, position) = self.next()?;
        match token {
            Token::Not => Ok(Condition::Not(Box::new(self.parse_unary()?))),
            Token::LParen => {
                let inner = self.parse_or()?;
                match self.next()? {
                    (Token::RParen, _) => Ok(inner),
                    (other, position) => Err(ConditionError::UnexpectedToken {
                        token: other.to_string(),
                        position,
                    }),
                }
            }
            Token::Word(word) => {
                let is_operator = matches!(
                    self.peek(),
                    Some(Token::Eq | Token::Ne | Token::Match | Token::NotMatch)
                );
                match word.as_str() {
                    "true" if !is_operator => Ok(Condition::Literal(true)),
                    "false" if !is_operator => Ok(Condition::Literal(false)),
                    _ => self.parse_predicate(word),
                }
            }
            other => Err(ConditionError::UnexpectedToken {
                token: other.to_string(),
                position,
            }),
        }
    }

    fn parse_predicate(&mut self, key: String) -> Result<Condition, ConditionError> {
        let op = match self.next()? {
            (Token::Eq, _) => Some(CompareOp::Eq),
            (Token::Ne, _) => Some(CompareOp::Ne),
            (Token::Match, _) => None,
            (Token::NotMatch, _) => None,
            (other, position) => {
                return Err(ConditionError::UnexpectedToken {
                    token: other.to_string(),
                    position,
                })
            }
        };
        let negated = self.tokens[self.pos - 1].0 == Token::NotMatch;

        let value = match self.next()? {
            (Token::Word(v), _) | (Token::Str(v), _) => v,
            (other, position) => {
                return Err(ConditionError::UnexpectedToken {
                    token: other.to_string(),
                    position,
                })
            }
        };

        match op {
            Some(op) => Ok(Condition::Compare { key, op, value }),
            None => {
                let pattern = Pattern::new(&value).map_err(|e| ConditionError::InvalidPattern {
                    pattern: value.clone(),
                    message: e.to_string(),
                })?;
                Ok(Condition::Matches {
                    key,
                    pattern,
                    negated,
                })
            }
        }
    }
}
