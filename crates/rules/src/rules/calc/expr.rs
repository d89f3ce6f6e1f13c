//! Calc expression language.
//!
//! ### Grammar (informal)
//! - Literals: `2`, `0.5`, `1e-3`; constants `pi`, `e`
//! - Variables: `pv[0]`, `pv[1]`, ... or the aliases `A`..`L` for `pv[0]`..`pv[11]`
//! - Arithmetic: `+ - * / %`, power `^` or `**` (right associative, binds
//!   tighter than unary minus so `-2**2 == -4`)
//! - Comparisons: `< <= > >= == !=`, yielding `1` or `0`
//! - Functions: `sin cos tan asin acos atan sqrt abs exp log log10 floor ceil
//!   min max pow`, optionally written with an `m.` prefix (`m.sin(pv[0])`)

use std::fmt;

use thiserror::Error;

/// Deepest permitted parenthesis / unary nesting.
const MAX_NESTING: usize = 64;

/// Single-letter variable aliases, in `pv[]` order.
const ALIASES: &[u8] = b"ABCDEFGHIJKL";

// ── Errors ────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalcError {
    #[error("expression is empty")]
    Empty,

    #[error("unexpected `{found}` at {position}, expected {expected}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        position: usize,
    },

    #[error("invalid number `{raw}` at {position}")]
    InvalidNumber { raw: String, position: usize },

    #[error("unknown identifier `{name}` at {position}")]
    UnknownIdentifier { name: String, position: usize },

    #[error("{function} takes {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("pv[{index}] is out of range: only {available} variable(s) configured")]
    VariableOutOfRange { index: usize, available: usize },

    #[error("expression nesting exceeds {0}")]
    TooDeep(usize),

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,
}

// ── AST ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sqrt,
    Abs,
    Exp,
    Log,
    Log10,
    Floor,
    Ceil,
    Min,
    Max,
    Pow,
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        let f = match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "sqrt" => Func::Sqrt,
            "abs" | "fabs" => Func::Abs,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "min" => Func::Min,
            "max" => Func::Max,
            "pow" => Func::Pow,
            _ => return None,
        };
        Some(f)
    }

    fn name(self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Asin => "asin",
            Func::Acos => "acos",
            Func::Atan => "atan",
            Func::Sqrt => "sqrt",
            Func::Abs => "abs",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Log10 => "log10",
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Min => "min",
            Func::Max => "max",
            Func::Pow => "pow",
        }
    }

    fn check_arity(self, found: usize) -> Result<(), CalcError> {
        let (ok, expected) = match self {
            Func::Min | Func::Max => (found >= 1, "at least 1"),
            Func::Pow => (found == 2, "2"),
            _ => (found == 1, "1"),
        };
        if ok {
            Ok(())
        } else {
            Err(CalcError::Arity {
                function: self.name(),
                expected,
                found,
            })
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        let x = args.first().copied().unwrap_or(f64::NAN);
        match self {
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Asin => x.asin(),
            Func::Acos => x.acos(),
            Func::Atan => x.atan(),
            Func::Sqrt => x.sqrt(),
            Func::Abs => x.abs(),
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Log10 => x.log10(),
            Func::Floor => x.floor(),
            Func::Ceil => x.ceil(),
            Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Func::Pow => x.powf(args.get(1).copied().unwrap_or(f64::NAN)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Var(usize),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

impl Expr {
    fn eval(&self, vars: &[f64]) -> Result<f64, CalcError> {
        match self {
            Expr::Num(n) => Ok(*n),
            Expr::Var(i) => vars.get(*i).copied().ok_or(CalcError::VariableOutOfRange {
                index: *i,
                available: vars.len(),
            }),
            Expr::Neg(inner) => Ok(-inner.eval(vars)?),
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.eval(vars)?;
                let b = rhs.eval(vars)?;
                binary(*op, a, b)
            }
            Expr::Call(func, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(vars))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(func.apply(&values))
            }
        }
    }
}

fn binary(op: BinOp, a: f64, b: f64) -> Result<f64, CalcError> {
    let truth = |c: bool| if c { 1.0 } else { 0.0 };
    let r = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(CalcError::DivisionByZero);
            }
            a / b
        }
        // Floored modulo: the result takes the sign of the divisor.
        BinOp::Rem => {
            if b == 0.0 {
                return Err(CalcError::DivisionByZero);
            }
            a - b * (a / b).floor()
        }
        BinOp::Pow => a.powf(b),
        BinOp::Lt => truth(a < b),
        BinOp::Le => truth(a <= b),
        BinOp::Gt => truth(a > b),
        BinOp::Ge => truth(a >= b),
        BinOp::Eq => truth(a == b),
        BinOp::Ne => truth(a != b),
    };
    Ok(r)
}

// ── Public handle ─────────────────────────────────────────────

/// A parsed calc expression bound to a fixed number of variables.
#[derive(Debug, Clone, PartialEq)]
pub struct CalcExpr {
    source: String,
    variables: usize,
    root: Expr,
}

impl CalcExpr {
    /// Parse `source`, rejecting references beyond `variables` inputs.
    pub fn parse(source: &str, variables: usize) -> Result<Self, CalcError> {
        let tokens = Lexer::new(source).lex()?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            variables,
        };
        let root = parser.parse_expression()?;
        parser.expect_eof()?;
        Ok(Self {
            source: source.to_string(),
            variables,
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> usize {
        self.variables
    }

    /// Evaluate with `vars[i]` bound to `pv[i]`.
    pub fn eval(&self, vars: &[f64]) -> Result<f64, CalcError> {
        let result = self.root.eval(vars)?;
        if result.is_finite() {
            Ok(result)
        } else {
            Err(CalcError::NonFinite)
        }
    }
}

impl fmt::Display for CalcExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

// ── Lexer ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Ident(&'a str),
    Number(f64),
    Op(BinOp),
    Minus,
    Plus,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Eof,
}

impl Token<'_> {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => (*s).to_string(),
            Token::Number(n) => n.to_string(),
            Token::Op(op) => format!("{:?}", op),
            Token::Minus => "-".to_string(),
            Token::Plus => "+".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::LBracket => "[".to_string(),
            Token::RBracket => "]".to_string(),
            Token::Comma => ",".to_string(),
            Token::Dot => ".".to_string(),
            Token::Eof => "end of input".to_string(),
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    offset: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, offset: 0 }
    }

    fn lex(mut self) -> Result<Vec<(Token<'a>, usize)>, CalcError> {
        let bytes = self.input.as_bytes();
        let mut tokens = Vec::new();

        while self.offset < bytes.len() {
            let start = self.offset;
            let ch = bytes[start];
            let next = bytes.get(start + 1).copied();
            let (token, width) = match ch {
                b' ' | b'\t' | b'\n' | b'\r' => {
                    self.offset += 1;
                    continue;
                }
                b'(' => (Token::LParen, 1),
                b')' => (Token::RParen, 1),
                b'[' => (Token::LBracket, 1),
                b']' => (Token::RBracket, 1),
                b',' => (Token::Comma, 1),
                b'+' => (Token::Plus, 1),
                b'-' => (Token::Minus, 1),
                b'/' => (Token::Op(BinOp::Div), 1),
                b'%' => (Token::Op(BinOp::Rem), 1),
                b'^' => (Token::Op(BinOp::Pow), 1),
                b'*' if next == Some(b'*') => (Token::Op(BinOp::Pow), 2),
                b'*' => (Token::Op(BinOp::Mul), 1),
                b'<' if next == Some(b'=') => (Token::Op(BinOp::Le), 2),
                b'<' => (Token::Op(BinOp::Lt), 1),
                b'>' if next == Some(b'=') => (Token::Op(BinOp::Ge), 2),
                b'>' => (Token::Op(BinOp::Gt), 1),
                b'=' if next == Some(b'=') => (Token::Op(BinOp::Eq), 2),
                b'!' if next == Some(b'=') => (Token::Op(BinOp::Ne), 2),
                b'.' if !next.is_some_and(|b| b.is_ascii_digit()) => (Token::Dot, 1),
                b'0'..=b'9' | b'.' => {
                    let raw = self.number_slice(bytes);
                    let n = raw.parse::<f64>().map_err(|_| CalcError::InvalidNumber {
                        raw: raw.to_string(),
                        position: start,
                    })?;
                    tokens.push((Token::Number(n), start));
                    continue;
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    while bytes
                        .get(self.offset)
                        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
                    {
                        self.offset += 1;
                    }
                    tokens.push((Token::Ident(&self.input[start..self.offset]), start));
                    continue;
                }
                _ => {
                    return Err(CalcError::UnexpectedToken {
                        expected: "number, identifier or operator",
                        found: char::from(ch).to_string(),
                        position: start,
                    })
                }
            };
            tokens.push((token, start));
            self.offset += width;
        }

        if tokens.is_empty() {
            return Err(CalcError::Empty);
        }
        tokens.push((Token::Eof, self.offset));
        Ok(tokens)
    }

    /// Consume `digits [. digits] [(e|E) [+|-] digits]` and return the slice.
    fn number_slice(&mut self, bytes: &[u8]) -> &'a str {
        let start = self.offset;
        let digits = |lexer: &mut Self| {
            while bytes.get(lexer.offset).is_some_and(u8::is_ascii_digit) {
                lexer.offset += 1;
            }
        };
        digits(self);
        if bytes.get(self.offset) == Some(&b'.') {
            self.offset += 1;
            digits(self);
        }
        if matches!(bytes.get(self.offset), Some(b'e' | b'E')) {
            let mut probe = self.offset + 1;
            if matches!(bytes.get(probe), Some(b'+' | b'-')) {
                probe += 1;
            }
            if bytes.get(probe).is_some_and(u8::is_ascii_digit) {
                self.offset = probe;
                digits(self);
            }
        }
        &self.input[start..self.offset]
    }
}

// ── Parser ────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: Vec<(Token<'a>, usize)>,
    pos: usize,
    depth: usize,
    variables: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token<'a> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn advance(&mut self) -> Token<'a> {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, want: Token<'a>, expected: &'static str) -> Result<(), CalcError> {
        if *self.peek() == want {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &'static str) -> CalcError {
        CalcError::UnexpectedToken {
            expected,
            found: self.peek().describe(),
            position: self.position(),
        }
    }

    fn expect_eof(&self) -> Result<(), CalcError> {
        if *self.peek() == Token::Eof {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    fn enter(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CalcError::TooDeep(MAX_NESTING));
        }
        Ok(())
    }

    fn parse_expression(&mut self) -> Result<Expr, CalcError> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, CalcError> {
        let mut lhs = self.parse_additive()?;
        while let Token::Op(op @ (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne)) =
            *self.peek()
        {
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, CalcError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, CalcError> {
        let mut lhs = self.parse_unary()?;
        while let Token::Op(op @ (BinOp::Mul | BinOp::Div | BinOp::Rem)) = *self.peek() {
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CalcError> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                self.enter()?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(Expr::Neg(Box::new(inner)))
            }
            Token::Plus => {
                self.advance();
                self.enter()?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(inner)
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, CalcError> {
        let base = self.parse_primary()?;
        if let Token::Op(BinOp::Pow) = self.peek() {
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, CalcError> {
        let position = self.position();
        match self.advance() {
            Token::Number(n) => Ok(Expr::Num(n)),
            Token::LParen => {
                self.enter()?;
                let inner = self.parse_expression()?;
                self.depth -= 1;
                self.expect(Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::Ident("pv") => {
                self.expect(Token::LBracket, "`[` after pv")?;
                let index = match self.advance() {
                    Token::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                    other => {
                        return Err(CalcError::UnexpectedToken {
                            expected: "variable index",
                            found: other.describe(),
                            position: self.position(),
                        })
                    }
                };
                self.expect(Token::RBracket, "`]`")?;
                self.variable(index)
            }
            Token::Ident("m") if *self.peek() == Token::Dot => {
                self.advance();
                let fpos = self.position();
                match self.advance() {
                    Token::Ident(name) => self.ident(name, fpos),
                    _ => Err(CalcError::UnexpectedToken {
                        expected: "function or constant after `m.`",
                        found: self.tokens[self.pos.saturating_sub(1)].0.describe(),
                        position: fpos,
                    }),
                }
            }
            Token::Ident(name) => self.ident(name, position),
            other => Err(CalcError::UnexpectedToken {
                expected: "number, variable, function or `(`",
                found: other.describe(),
                position,
            }),
        }
    }

    fn ident(&mut self, name: &str, position: usize) -> Result<Expr, CalcError> {
        if *self.peek() == Token::LParen {
            let func = Func::lookup(name).ok_or_else(|| CalcError::UnknownIdentifier {
                name: name.to_string(),
                position,
            })?;
            self.advance();
            let args = self.parse_args()?;
            func.check_arity(args.len())?;
            return Ok(Expr::Call(func, args));
        }
        match name {
            "pi" => Ok(Expr::Num(std::f64::consts::PI)),
            "e" => Ok(Expr::Num(std::f64::consts::E)),
            alias if alias.len() == 1 => match ALIASES.iter().position(|&c| c == alias.as_bytes()[0]) {
                Some(index) => self.variable(index),
                None => Err(CalcError::UnknownIdentifier {
                    name: name.to_string(),
                    position,
                }),
            },
            _ => Err(CalcError::UnknownIdentifier {
                name: name.to_string(),
                position,
            }),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, CalcError> {
        self.enter()?;
        let mut args = Vec::new();
        if *self.peek() != Token::RParen {
            loop {
                args.push(self.parse_expression()?);
                if *self.peek() == Token::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen, "`,` or `)`")?;
        self.depth -= 1;
        Ok(args)
    }

    fn variable(&self, index: usize) -> Result<Expr, CalcError> {
        if index >= self.variables {
            return Err(CalcError::VariableOutOfRange {
                index,
                available: self.variables,
            });
        }
        Ok(Expr::Var(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, vars: &[f64]) -> f64 {
        CalcExpr::parse(src, vars.len()).unwrap().eval(vars).unwrap()
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3", &[]), 7.0);
        assert_eq!(eval("(1 + 2) * 3", &[]), 9.0);
        assert_eq!(eval("2 ** 3 ** 2", &[]), 512.0);
        assert_eq!(eval("-2 ^ 2", &[]), -4.0);
        assert_eq!(eval("2 ^ -1", &[]), 0.5);
        assert_eq!(eval("-7 % 3", &[]), 2.0);
    }

    #[test]
    fn variables_and_aliases() {
        assert!((eval("pv[0] + 2.12 * pv[1]", &[1.0, 10.0]) - 22.2).abs() < 1e-9);
        assert_eq!(eval("A - B", &[5.0, 3.0]), 2.0);
    }

    #[test]
    fn math_prefix_and_constants() {
        let v = eval("m.sin(pv[0]) + cos(0)", &[std::f64::consts::FRAC_PI_2]);
        assert!((v - 2.0).abs() < 1e-12);
        assert_eq!(eval("max(1, pv[0], 3)", &[7.0]), 7.0);
        assert_eq!(eval("m.floor(m.pi)", &[]), 3.0);
        assert_eq!(eval("pow(2, 10)", &[]), 1024.0);
    }

    #[test]
    fn comparisons_yield_truth_values() {
        assert_eq!(eval("pv[0] > 3", &[4.0]), 1.0);
        assert_eq!(eval("pv[0] <= 3", &[4.0]), 0.0);
        assert_eq!(eval("1 != 2", &[]), 1.0);
    }

    #[test]
    fn scientific_literals() {
        assert_eq!(eval("1e3 + .5", &[]), 1000.5);
        assert_eq!(eval("2.5E-1", &[]), 0.25);
    }

    #[test]
    fn out_of_range_variable_rejected_at_parse() {
        let err = CalcExpr::parse("pv[0] + pv[2]", 2).unwrap_err();
        assert_eq!(err, CalcError::VariableOutOfRange { index: 2, available: 2 });
        let err = CalcExpr::parse("C", 2).unwrap_err();
        assert!(matches!(err, CalcError::VariableOutOfRange { index: 2, .. }));
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(CalcExpr::parse("   ", 0).unwrap_err(), CalcError::Empty);
        assert!(matches!(
            CalcExpr::parse("1 +", 0).unwrap_err(),
            CalcError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            CalcExpr::parse("1 2", 0).unwrap_err(),
            CalcError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            CalcExpr::parse("frob(1)", 0).unwrap_err(),
            CalcError::UnknownIdentifier { .. }
        ));
        assert!(matches!(
            CalcExpr::parse("sqrt(1, 2)", 0).unwrap_err(),
            CalcError::Arity { function: "sqrt", .. }
        ));
    }

    #[test]
    fn runtime_failures() {
        let expr = CalcExpr::parse("pv[0] / pv[1]", 2).unwrap();
        assert_eq!(expr.eval(&[1.0, 0.0]).unwrap_err(), CalcError::DivisionByZero);
        let expr = CalcExpr::parse("log(pv[0])", 1).unwrap();
        assert_eq!(expr.eval(&[-1.0]).unwrap_err(), CalcError::NonFinite);
    }

    #[test]
    fn nesting_is_bounded() {
        let src = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(CalcExpr::parse(&src, 0).unwrap_err(), CalcError::TooDeep(MAX_NESTING));
    }
}
