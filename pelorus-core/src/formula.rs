//! Restricted Arithmetic Formula Evaluation for Derived Thresholds
//!
//! ## Overview
//!
//! Some alarm thresholds are not fixed numbers but small formulas over the
//! sensor's own configuration fields: a lead-acid low-voltage alarm scales
//! with `nominalVoltage`, an engine overspeed alarm with `maxRpm`, a
//! capacity alarm with `capacity` times a user-adjustable ratio. The
//! formulas come from static schema data and (for user overrides) from
//! persisted configuration, so they are parsed with an explicit grammar
//! rather than handed to any kind of dynamic evaluation.
//!
//! ## Grammar
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := NUMBER | IDENT | '-' factor | '(' expr ')'
//! ```
//!
//! Numeric literals, named variable lookup, the four arithmetic operators
//! and parentheses. Nothing else - no calls, no comparisons, no assignment.
//!
//! ## Variables
//!
//! Identifiers resolve against a caller-supplied lookup (the sensor's own
//! configuration fields). Two special cases:
//!
//! - [`RATIO_VAR`] (`indirectThreshold`) is the user-adjustable ratio,
//!   injected by the threshold resolver under this fixed name.
//! - [`fallback`] supplies documented defaults for commonly-missing base
//!   parameters, so a battery that has not reported its nominal voltage
//!   yet still gets a sane alarm line.
//!
//! A variable that is missing and has no fallback makes evaluation fail
//! with [`FormulaError::UnknownVariable`]; the resolver treats that as
//! "cannot evaluate this threshold right now", never as zero.

use thiserror_no_std::Error;

/// Fixed name of the injected user-ratio variable
pub const RATIO_VAR: &str = "indirectThreshold";

/// Documented defaults for commonly-missing base parameters
pub const FALLBACK_DEFAULTS: &[(&str, f64)] = &[
    ("nominalVoltage", 12.0),
    ("capacity", 100.0),
    ("maxRpm", 6000.0),
    ("referenceTemperature", 293.15),
];

/// Default for a base parameter the sensor has not reported
pub fn fallback(name: &str) -> Option<f64> {
    FALLBACK_DEFAULTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
}

/// Formula parse/evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    /// Character outside the grammar
    #[error("unexpected character `{0}` in formula")]
    UnexpectedChar(char),

    /// Formula ended mid-expression
    #[error("unexpected end of formula")]
    UnexpectedEnd,

    /// Token in a position the grammar does not allow
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),

    /// Variable not in the evaluation context and without a fallback
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    /// Formula divided by zero at evaluation time
    #[error("division by zero")]
    DivisionByZero,
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Parsed formula AST
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Number(f64),
    /// Named variable lookup
    Variable(String),
    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Unary negation
    Negate(Box<Expr>),
}

impl Expr {
    /// Parse a formula source string
    pub fn parse(source: &str) -> Result<Expr, FormulaError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(FormulaError::UnexpectedToken(parser.describe_current()));
        }
        Ok(expr)
    }

    /// Evaluate against a variable lookup
    pub fn eval(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, FormulaError> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Variable(name) => lookup(name)
                .ok_or_else(|| FormulaError::UnknownVariable(name.clone())),
            Expr::Negate(inner) => Ok(-inner.eval(lookup)?),
            Expr::Binary { op, lhs, rhs } => {
                let l = lhs.eval(lookup)?;
                let r = rhs.eval(lookup)?;
                match op {
                    BinaryOp::Add => Ok(l + r),
                    BinaryOp::Sub => Ok(l - r),
                    BinaryOp::Mul => Ok(l * r),
                    BinaryOp::Div => {
                        if r == 0.0 {
                            Err(FormulaError::DivisionByZero)
                        } else {
                            Ok(l / r)
                        }
                    }
                }
            }
        }
    }

    /// All variable names referenced, for startup schema validation
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => out.push(name),
            Expr::Negate(inner) => inner.collect_variables(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| FormulaError::UnexpectedToken(literal.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(FormulaError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Some(t) => format!("{:?}", t),
            None => "end of input".to_string(),
        }
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some(BinaryOp::Add),
            Some(Token::Minus) => Some(BinaryOp::Sub),
            _ => None,
        } {
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.factor()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some(BinaryOp::Mul),
            Some(Token::Slash) => Some(BinaryOp::Div),
            _ => None,
        } {
            self.advance();
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, FormulaError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => Ok(Expr::Variable(name)),
            Some(Token::Minus) => Ok(Expr::Negate(Box::new(self.factor()?))),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(t) => Err(FormulaError::UnexpectedToken(format!("{:?}", t))),
                    None => Err(FormulaError::UnexpectedEnd),
                }
            }
            Some(t) => Err(FormulaError::UnexpectedToken(format!("{:?}", t))),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, vars: &[(&str, f64)]) -> Result<f64, FormulaError> {
        let expr = Expr::parse(source)?;
        expr.eval(&|name| {
            vars.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
        })
    }

    #[test]
    fn literals_and_precedence() {
        assert_eq!(eval("2 + 3 * 4", &[]).unwrap(), 14.0);
        assert_eq!(eval("(2 + 3) * 4", &[]).unwrap(), 20.0);
        assert_eq!(eval("10 / 4", &[]).unwrap(), 2.5);
        assert_eq!(eval("-3 + 5", &[]).unwrap(), 2.0);
        assert_eq!(eval("1.5 * 2", &[]).unwrap(), 3.0);
    }

    #[test]
    fn variable_lookup() {
        let vars = [("nominalVoltage", 24.0)];
        assert_eq!(eval("nominalVoltage * 0.5", &vars).unwrap(), 12.0);
    }

    #[test]
    fn ratio_formula() {
        // Capacity scaled by the user-adjustable ratio
        let vars = [("capacity", 100.0), (RATIO_VAR, 1.5)];
        assert_eq!(eval("capacity * indirectThreshold", &vars).unwrap(), 150.0);
    }

    #[test]
    fn unknown_variable() {
        assert_eq!(
            eval("bilgeDepth * 2", &[]),
            Err(FormulaError::UnknownVariable("bilgeDepth".into()))
        );
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(eval("1 / 0", &[]), Err(FormulaError::DivisionByZero));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Expr::parse("1 +").is_err());
        assert!(Expr::parse("foo(2)").is_err());
        assert!(Expr::parse("a ^ b").is_err());
        assert!(Expr::parse("(1 + 2").is_err());
        assert!(Expr::parse("1 2").is_err());
    }

    #[test]
    fn collects_variables() {
        let expr = Expr::parse("capacity * indirectThreshold + capacity").unwrap();
        assert_eq!(expr.variables(), vec!["capacity", "indirectThreshold"]);
    }

    #[test]
    fn fallback_defaults() {
        assert_eq!(fallback("nominalVoltage"), Some(12.0));
        assert_eq!(fallback("maxRpm"), Some(6000.0));
        assert_eq!(fallback("unheardOf"), None);
    }
}
