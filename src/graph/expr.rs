// src/graph/expr.rs
//! Expression language for the block-graph variant. Entry/exit strings are
//! parsed once at graph-load time into a small AST and evaluated against an
//! explicit, immutable per-candle context. Only a whitelisted function set
//! is callable; this is never general-purpose evaluation.
//!
//! Grammar (precedence low to high):
//!   or     := and ( "||" and )*
//!   and    := cmp ( "&&" cmp )*
//!   cmp    := sum ( ("<" | "<=" | ">" | ">=" | "==" | "!=") sum )?
//!   sum    := term ( ("+" | "-") term )*
//!   term   := unary ( ("*" | "/") unary )*
//!   unary  := ("!" | "-") unary | primary
//!   primary:= NUMBER | "(" or ")" | IDENT
//!           | "candle" "." FIELD | IDENT "." BLOCK_FIELD
//!           | "ma" "(" NUMBER ")" | "vol_ma" "(" NUMBER ")"
//!           | "candles_between" "(" IDENT ")"
//!
//! A bare IDENT is a named indicator lookup (`rate`, `ma_20`,
//! `volume_high_5`, ...); `IDENT.field` reads a named block's entry/peak
//! values; `candles_between(b)` counts candles from block `b`'s start date.

use crate::blocks::detection::EntrySnapshot;
use crate::error::ScanError;
use crate::indicators::{AnnotatedCandle, IndicatorSpec};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleField {
    Open,
    High,
    Low,
    Close,
    Volume,
    TradingValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockField {
    PeakPrice,
    PeakVolume,
    EntryOpen,
    EntryHigh,
    EntryLow,
    EntryClose,
    EntryVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Bare identifier: name-keyed indicator lookup on the current candle.
    Indicator(String),
    Candle(CandleField),
    Block { node: String, field: BlockField },
    Ma(u32),
    VolMa(u32),
    CandlesBetween(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// The two value kinds expressions produce. Indicator leaves are numeric;
/// booleans only arise from comparisons and logic, which keeps the static
/// type check trivial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ty {
    Num,
    Bool,
}

/// Read-only view of a named block's state for expression evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSnapshot {
    pub started_at: NaiveDate,
    pub entry: EntrySnapshot,
    pub peak_price: f64,
    pub peak_volume: i64,
}

/// Immutable evaluation context for one candle.
pub struct ExprContext<'a> {
    pub idx: usize,
    pub series: &'a [AnnotatedCandle],
    pub blocks: &'a HashMap<String, BlockSnapshot>,
}

impl Expr {
    /// Parse and fully validate a boolean expression. `location` names the
    /// node/field for error context; `known_blocks` are the graph's node ids.
    pub fn parse_predicate(
        location: &str,
        src: &str,
        known_blocks: &HashSet<String>,
    ) -> Result<Expr, ScanError> {
        let wrap = |reason: String| ScanError::expression(location, reason);
        let tokens = tokenize(src).map_err(wrap)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or().map_err(wrap)?;
        if parser.pos != parser.tokens.len() {
            return Err(wrap(format!("unexpected trailing input at token {}", parser.pos)));
        }
        expr.check_blocks(known_blocks).map_err(wrap)?;
        match expr.ty().map_err(wrap)? {
            Ty::Bool => Ok(expr),
            Ty::Num => Err(ScanError::expression(
                location,
                "expression must be a condition, not a number",
            )),
        }
    }

    fn check_blocks(&self, known: &HashSet<String>) -> Result<(), String> {
        match self {
            Expr::Block { node, .. } | Expr::CandlesBetween(node) => {
                if known.contains(node) {
                    Ok(())
                } else {
                    Err(format!("unknown block '{node}'"))
                }
            }
            Expr::Not(e) | Expr::Neg(e) => e.check_blocks(known),
            Expr::Binary(_, l, r) => {
                l.check_blocks(known)?;
                r.check_blocks(known)
            }
            _ => Ok(()),
        }
    }

    fn ty(&self) -> Result<Ty, String> {
        match self {
            Expr::Number(_)
            | Expr::Indicator(_)
            | Expr::Candle(_)
            | Expr::Block { .. }
            | Expr::Ma(_)
            | Expr::VolMa(_)
            | Expr::CandlesBetween(_) => Ok(Ty::Num),
            Expr::Not(e) => match e.ty()? {
                Ty::Bool => Ok(Ty::Bool),
                Ty::Num => Err("'!' needs a condition operand".into()),
            },
            Expr::Neg(e) => match e.ty()? {
                Ty::Num => Ok(Ty::Num),
                Ty::Bool => Err("'-' needs a numeric operand".into()),
            },
            Expr::Binary(op, l, r) => {
                let (lt, rt) = (l.ty()?, r.ty()?);
                match op {
                    BinOp::And | BinOp::Or => {
                        if lt == Ty::Bool && rt == Ty::Bool {
                            Ok(Ty::Bool)
                        } else {
                            Err("'&&'/'||' need condition operands".into())
                        }
                    }
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
                        if lt == Ty::Num && rt == Ty::Num {
                            Ok(Ty::Bool)
                        } else {
                            Err("comparison needs numeric operands".into())
                        }
                    }
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                        if lt == Ty::Num && rt == Ty::Num {
                            Ok(Ty::Num)
                        } else {
                            Err("arithmetic needs numeric operands".into())
                        }
                    }
                }
            }
        }
    }

    /// Record every annotated indicator this expression reads, so the
    /// calculator can be primed before a scan.
    pub fn collect_spec(&self, spec: &mut IndicatorSpec) {
        match self {
            Expr::Ma(period) => {
                spec.ma_periods.insert(*period);
            }
            Expr::Indicator(name) => {
                if let Some(p) = parse_suffix(name, "ma_") {
                    spec.ma_periods.insert(p);
                } else if let Some(p) = parse_suffix(name, "deviation_") {
                    spec.ma_periods.insert(p);
                } else if let Some(w) = parse_suffix(name, "volume_high_") {
                    spec.volume_high_windows.insert(w);
                } else if let Some(w) = parse_suffix(name, "price_high_") {
                    spec.price_high_windows.insert(w);
                }
            }
            Expr::Not(e) | Expr::Neg(e) => e.collect_spec(spec),
            Expr::Binary(_, l, r) => {
                l.collect_spec(spec);
                r.collect_spec(spec);
            }
            _ => {}
        }
    }

    /// Evaluate against one candle. `None` means required data is missing
    /// (an uncomputed indicator, an unborn block, division by zero); callers
    /// treat that as entry-false / exit-none, never as an error.
    pub fn eval(&self, cx: &ExprContext<'_>) -> Option<Value> {
        match self {
            Expr::Number(n) => Some(Value::Num(*n)),
            Expr::Indicator(name) => cx.series[cx.idx].value_of(name).map(Value::Num),
            Expr::Candle(field) => {
                let c = &cx.series[cx.idx].candle;
                Some(Value::Num(match field {
                    CandleField::Open => c.open,
                    CandleField::High => c.high,
                    CandleField::Low => c.low,
                    CandleField::Close => c.close,
                    CandleField::Volume => c.volume as f64,
                    CandleField::TradingValue => cx.series[cx.idx].indicators.trading_value,
                }))
            }
            Expr::Block { node, field } => {
                let b = cx.blocks.get(node)?;
                Some(Value::Num(match field {
                    BlockField::PeakPrice => b.peak_price,
                    BlockField::PeakVolume => b.peak_volume as f64,
                    BlockField::EntryOpen => b.entry.open,
                    BlockField::EntryHigh => b.entry.high,
                    BlockField::EntryLow => b.entry.low,
                    BlockField::EntryClose => b.entry.close,
                    BlockField::EntryVolume => b.entry.volume as f64,
                }))
            }
            Expr::Ma(period) => cx.series[cx.idx].ma(*period).map(Value::Num),
            Expr::VolMa(period) => {
                let start = (cx.idx + 1).saturating_sub(*period as usize);
                let window = &cx.series[start..=cx.idx];
                let sum: f64 = window.iter().map(|a| a.candle.volume as f64).sum();
                Some(Value::Num(sum / window.len() as f64))
            }
            Expr::CandlesBetween(node) => {
                let b = cx.blocks.get(node)?;
                let n = crate::blocks::checker::candles_since(
                    cx.series,
                    cx.idx,
                    b.started_at,
                )?;
                Some(Value::Num(n as f64))
            }
            Expr::Not(e) => match e.eval(cx)? {
                Value::Bool(b) => Some(Value::Bool(!b)),
                Value::Num(_) => None,
            },
            Expr::Neg(e) => match e.eval(cx)? {
                Value::Num(n) => Some(Value::Num(-n)),
                Value::Bool(_) => None,
            },
            Expr::Binary(op, l, r) => eval_binary(*op, l, r, cx),
        }
    }

    /// Fail-closed boolean evaluation.
    pub fn eval_bool(&self, cx: &ExprContext<'_>) -> bool {
        matches!(self.eval(cx), Some(Value::Bool(true)))
    }
}

fn parse_suffix(name: &str, prefix: &str) -> Option<u32> {
    name.strip_prefix(prefix)?.parse().ok()
}

fn eval_binary(op: BinOp, l: &Expr, r: &Expr, cx: &ExprContext<'_>) -> Option<Value> {
    // Short-circuit logic first: a decided left side wins even when the
    // right side would be missing data.
    match op {
        BinOp::And => {
            return match l.eval(cx)? {
                Value::Bool(false) => Some(Value::Bool(false)),
                Value::Bool(true) => r.eval(cx),
                Value::Num(_) => None,
            };
        }
        BinOp::Or => {
            return match l.eval(cx)? {
                Value::Bool(true) => Some(Value::Bool(true)),
                Value::Bool(false) => r.eval(cx),
                Value::Num(_) => None,
            };
        }
        _ => {}
    }
    let (Value::Num(a), Value::Num(b)) = (l.eval(cx)?, r.eval(cx)?) else {
        return None;
    };
    Some(match op {
        BinOp::Add => Value::Num(a + b),
        BinOp::Sub => Value::Num(a - b),
        BinOp::Mul => Value::Num(a * b),
        BinOp::Div => {
            if b == 0.0 {
                return None;
            }
            Value::Num(a / b)
        }
        BinOp::Lt => Value::Bool(a < b),
        BinOp::Le => Value::Bool(a <= b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::Ge => Value::Bool(a >= b),
        BinOp::Eq => Value::Bool(a == b),
        BinOp::Ne => Value::Bool(a != b),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Dot,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
    Bang,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err("single '=' is not an operator, use '=='".into());
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err("single '&' is not an operator, use '&&'".into());
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err("single '|' is not an operator, use '||'".into());
                }
            }
            '0'..='9' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_digit()
                        || bytes[i] == b'.'
                        || bytes[i] == b'_')
                {
                    i += 1;
                }
                let text: String = src[start..i].chars().filter(|&ch| ch != '_').collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| format!("bad number literal '{}'", &src[start..i]))?;
                tokens.push(Token::Num(n));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(src[start..i].to_string()));
            }
            other => return Err(format!("unexpected character '{other}'")),
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

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), String> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            _ => Err(format!("expected {what}")),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_cmp()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.next();
            let right = self.parse_cmp()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, String> {
        let left = self.parse_sum()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            _ => return Ok(left),
        };
        self.next();
        let right = self.parse_sum()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_sum(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Bang) => {
                self.next();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Minus) => {
                self.next();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.parse_ident(name),
            _ => Err("expected a value".into()),
        }
    }

    fn parse_ident(&mut self, name: String) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Dot) {
            self.next();
            let field = match self.next() {
                Some(Token::Ident(f)) => f,
                _ => return Err(format!("expected field after '{name}.'")),
            };
            if name == "candle" {
                let field = match field.as_str() {
                    "open" => CandleField::Open,
                    "high" => CandleField::High,
                    "low" => CandleField::Low,
                    "close" => CandleField::Close,
                    "volume" => CandleField::Volume,
                    "trading_value" => CandleField::TradingValue,
                    other => return Err(format!("unknown candle field '{other}'")),
                };
                return Ok(Expr::Candle(field));
            }
            let field = match field.as_str() {
                "peak_price" => BlockField::PeakPrice,
                "peak_volume" => BlockField::PeakVolume,
                "entry_open" => BlockField::EntryOpen,
                "entry_high" => BlockField::EntryHigh,
                "entry_low" => BlockField::EntryLow,
                "entry_close" => BlockField::EntryClose,
                "entry_volume" => BlockField::EntryVolume,
                other => return Err(format!("unknown block field '{other}'")),
            };
            return Ok(Expr::Block { node: name, field });
        }

        if self.peek() == Some(&Token::LParen) {
            self.next();
            let expr = match name.as_str() {
                "ma" => Expr::Ma(self.parse_period()?),
                "vol_ma" => Expr::VolMa(self.parse_period()?),
                "candles_between" => match self.next() {
                    Some(Token::Ident(block)) => Expr::CandlesBetween(block),
                    _ => return Err("candles_between needs a block name".into()),
                },
                other => return Err(format!("unknown function '{other}'")),
            };
            self.expect(Token::RParen, "')'")?;
            return Ok(expr);
        }

        Ok(Expr::Indicator(name))
    }

    fn parse_period(&mut self) -> Result<u32, String> {
        match self.next() {
            Some(Token::Num(n)) if n.fract() == 0.0 && n >= 1.0 => Ok(n as u32),
            _ => Err("expected a positive integer period".into()),
        }
    }
}
