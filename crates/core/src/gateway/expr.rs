//! The `{{ expr }}` expression engine (SPEC_FULL §4.A).
//!
//! A template string is text interspersed with `{{ ... }}` spans. A template
//! containing only a single `{{ ... }}` span and no surrounding text evaluates
//! to the raw JSON value the expression produces; otherwise every span is
//! stringified and concatenated with the surrounding text.
//!
//! No crate in this codebase's dependency stack supplies a ready-made
//! expression evaluator for this shape of mini-language, so this is a small
//! hand-written tokenizer and recursive-descent parser, in the style of the
//! other hand-rolled parsers already in this crate (the glob matcher, the SSE
//! line framer).

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ExprError(pub String);

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ExprError {}

/// Evaluation context: the allowed identifier set (SPEC_FULL §4.A).
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub env: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub url: UrlContext,
    pub method: String,
    pub stream_chunk_index: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct UrlContext {
    pub pathname: String,
    pub search: String,
    pub host: String,
    pub protocol: String,
}

impl Context {
    fn root(&self, name: &str) -> Result<Value, ExprError> {
        match name {
            "env" => Ok(map_to_value(&self.env)),
            "headers" => Ok(map_to_value(&self.headers)),
            "body" => Ok(self.body.clone()),
            "url" => Ok(serde_json::json!({
                "pathname": self.url.pathname,
                "search": self.url.search,
                "host": self.url.host,
                "protocol": self.url.protocol,
            })),
            "method" => Ok(Value::String(self.method.clone())),
            "stream" => Ok(serde_json::json!({
                "chunkIndex": self.stream_chunk_index,
            })),
            other => Err(ExprError(format!("unknown identifier: {other}"))),
        }
    }
}

fn map_to_value(m: &HashMap<String, String>) -> Value {
    let mut obj = serde_json::Map::new();
    for (k, v) in m {
        obj.insert(k.clone(), Value::String(v.clone()));
    }
    Value::Object(obj)
}

// ─── Tokenizer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(f64),
    Str(String),
    Template(Vec<TemplatePiece>),
    Dot,
    Comma,
    LParen,
    RParen,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
enum TemplatePiece {
    Text(String),
    Expr(Box<Expr>),
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    _src: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            _src: src,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Result<Tok, ExprError> {
        self.skip_ws();
        let Some(c) = self.peek() else {
            return Ok(Tok::Eof);
        };
        match c {
            '.' => {
                self.bump();
                Ok(Tok::Dot)
            }
            ',' => {
                self.bump();
                Ok(Tok::Comma)
            }
            '(' => {
                self.bump();
                Ok(Tok::LParen)
            }
            ')' => {
                self.bump();
                Ok(Tok::RParen)
            }
            '?' => {
                self.bump();
                Ok(Tok::Question)
            }
            ':' => {
                self.bump();
                Ok(Tok::Colon)
            }
            '+' => {
                self.bump();
                Ok(Tok::Plus)
            }
            '-' => {
                self.bump();
                Ok(Tok::Minus)
            }
            '*' => {
                self.bump();
                Ok(Tok::Star)
            }
            '/' => {
                self.bump();
                Ok(Tok::Slash)
            }
            '%' => {
                self.bump();
                Ok(Tok::Percent)
            }
            '!' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Tok::NotEq)
                } else {
                    Ok(Tok::Bang)
                }
            }
            '=' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Tok::EqEq)
                } else {
                    Err(ExprError("unexpected '='".into()))
                }
            }
            '<' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Tok::Le)
                } else {
                    Ok(Tok::Lt)
                }
            }
            '>' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Tok::Ge)
                } else {
                    Ok(Tok::Gt)
                }
            }
            '&' if self.peek_at(1) == Some('&') => {
                self.bump();
                self.bump();
                Ok(Tok::AndAnd)
            }
            '|' if self.peek_at(1) == Some('|') => {
                self.bump();
                self.bump();
                Ok(Tok::OrOr)
            }
            '\'' | '"' => self.read_string(c),
            '`' => self.read_template(),
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_alphabetic() || c == '_' => self.read_ident(),
            other => Err(ExprError(format!("unexpected character: {other}"))),
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Tok, ExprError> {
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(ExprError("unterminated string literal".into())),
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(other) => s.push(other),
                    None => return Err(ExprError("unterminated escape".into())),
                },
                Some(c) => s.push(c),
            }
        }
        Ok(Tok::Str(s))
    }

    fn read_template(&mut self) -> Result<Tok, ExprError> {
        self.bump();
        let mut pieces = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(ExprError("unterminated template literal".into())),
                Some('`') => break,
                Some('$') if self.peek() == Some('{') => {
                    if !text.is_empty() {
                        pieces.push(TemplatePiece::Text(std::mem::take(&mut text)));
                    }
                    self.bump();
                    let mut depth = 1usize;
                    let mut inner = String::new();
                    loop {
                        match self.bump() {
                            None => return Err(ExprError("unterminated ${} in template".into())),
                            Some('{') => {
                                depth += 1;
                                inner.push('{');
                            }
                            Some('}') => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                inner.push('}');
                            }
                            Some(c) => inner.push(c),
                        }
                    }
                    let expr = parse(&inner)?;
                    pieces.push(TemplatePiece::Expr(Box::new(expr)));
                }
                Some(c) => text.push(c),
            }
        }
        if !text.is_empty() {
            pieces.push(TemplatePiece::Text(text));
        }
        Ok(Tok::Template(pieces))
    }

    fn read_number(&mut self) -> Result<Tok, ExprError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.bump();
        }
        let s: String = self.chars[start..self.pos].iter().collect();
        s.parse::<f64>()
            .map(Tok::Number)
            .map_err(|_| ExprError(format!("invalid number literal: {s}")))
    }

    fn read_ident(&mut self) -> Result<Tok, ExprError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        let s: String = self.chars[start..self.pos].iter().collect();
        Ok(Tok::Ident(s))
    }
}

// ─── AST ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Template(Vec<TemplatePiece>),
    Root(String),
    Member(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).unwrap_or(&Tok::Eof)
    }

    fn bump(&mut self) -> Tok {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Tok::Eof);
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), ExprError> {
        if self.peek() == tok {
            self.bump();
            Ok(())
        } else {
            Err(ExprError(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, ExprError> {
        let cond = self.parse_or()?;
        if self.peek() == &Tok::Question {
            self.bump();
            let then = self.parse_ternary()?;
            self.expect(&Tok::Colon)?;
            let else_ = self.parse_ternary()?;
            Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(else_)))
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == &Tok::OrOr {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_equality()?;
        while self.peek() == &Tok::AndAnd {
            self.bump();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinOp::Eq,
                Tok::NotEq => BinOp::NotEq,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => BinOp::Lt,
                Tok::Gt => BinOp::Gt,
                Tok::Le => BinOp::Le,
                Tok::Ge => BinOp::Ge,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Tok::Minus => {
                self.bump();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            Tok::Bang => {
                self.bump();
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.bump();
                    let name = match self.bump() {
                        Tok::Ident(s) => s,
                        other => return Err(ExprError(format!("expected identifier after '.', found {other:?}"))),
                    };
                    expr = Expr::Member(Box::new(expr), name);
                }
                Tok::LParen => {
                    self.bump();
                    let mut args = Vec::new();
                    if self.peek() != &Tok::RParen {
                        args.push(self.parse_expr()?);
                        while self.peek() == &Tok::Comma {
                            self.bump();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Tok::RParen)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.bump() {
            Tok::Number(n) => Ok(Expr::Literal(serde_json::json!(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Template(pieces) => Ok(Expr::Template(pieces)),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => Ok(Expr::Root(name)),
            },
            Tok::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            other => Err(ExprError(format!("unexpected token: {other:?}"))),
        }
    }
}

/// Parse a bare expression (the contents of one `{{ ... }}` span, or the inner
/// body of a `${...}` template interpolation).
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token()?;
        let done = tok == Tok::Eof;
        tokens.push(tok);
        if done {
            break;
        }
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.peek() != &Tok::Eof {
        return Err(ExprError(format!("trailing tokens after expression: {:?}", parser.peek())));
    }
    Ok(expr)
}

/// Evaluate a parsed expression against a context, producing a JSON value.
pub fn eval(expr: &Expr, ctx: &Context) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Template(pieces) => {
            let mut out = String::new();
            for piece in pieces {
                match piece {
                    TemplatePiece::Text(t) => out.push_str(t),
                    TemplatePiece::Expr(e) => out.push_str(&stringify(&eval(e, ctx)?)),
                }
            }
            Ok(Value::String(out))
        }
        Expr::Root(name) => ctx.root(name),
        Expr::Member(base, field) => {
            let base_v = eval(base, ctx)?;
            Ok(base_v.get(field).cloned().unwrap_or(Value::Null))
        }
        Expr::Call(callee, args) => eval_call(callee, args, ctx),
        Expr::Unary(op, inner) => {
            let v = eval(inner, ctx)?;
            match op {
                UnOp::Neg => Ok(serde_json::json!(-as_f64(&v))),
                UnOp::Not => Ok(Value::Bool(!is_truthy(&v))),
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),
        Expr::Ternary(cond, then, else_) => {
            if is_truthy(&eval(cond, ctx)?) {
                eval(then, ctx)
            } else {
                eval(else_, ctx)
            }
        }
    }
}

fn eval_call(callee: &Expr, args: &[Expr], ctx: &Context) -> Result<Value, ExprError> {
    if let Expr::Member(base, method) = callee
        && let Expr::Root(root) = base.as_ref()
        && root == "crypto"
        && method == "randomUUID"
        && args.is_empty()
    {
        return Ok(Value::String(uuid::Uuid::new_v4().to_string()));
    }
    Err(ExprError("unsupported function call".into()))
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &Context) -> Result<Value, ExprError> {
    // Short-circuit logical operators.
    if op == BinOp::And {
        let l = eval(lhs, ctx)?;
        if !is_truthy(&l) {
            return Ok(l);
        }
        return eval(rhs, ctx);
    }
    if op == BinOp::Or {
        let l = eval(lhs, ctx)?;
        if is_truthy(&l) {
            return Ok(l);
        }
        return eval(rhs, ctx);
    }

    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;

    match op {
        BinOp::Add => {
            if let (Value::String(_), _) | (_, Value::String(_)) = (&l, &r) {
                Ok(Value::String(format!("{}{}", stringify(&l), stringify(&r))))
            } else {
                Ok(serde_json::json!(as_f64(&l) + as_f64(&r)))
            }
        }
        BinOp::Sub => Ok(serde_json::json!(as_f64(&l) - as_f64(&r))),
        BinOp::Mul => Ok(serde_json::json!(as_f64(&l) * as_f64(&r))),
        BinOp::Div => Ok(serde_json::json!(as_f64(&l) / as_f64(&r))),
        BinOp::Mod => Ok(serde_json::json!(as_f64(&l) % as_f64(&r))),
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::NotEq => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Lt => Ok(Value::Bool(as_f64(&l) < as_f64(&r))),
        BinOp::Gt => Ok(Value::Bool(as_f64(&l) > as_f64(&r))),
        BinOp::Le => Ok(Value::Bool(as_f64(&l) <= as_f64(&r))),
        BinOp::Ge => Ok(Value::Bool(as_f64(&l) >= as_f64(&r))),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Value::String(sa), Value::String(sb)) = (a, b) {
        return sa == sb;
    }
    if a.is_number() || b.is_number() {
        return as_f64(a) == as_f64(b);
    }
    a == b
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.parse().unwrap_or(f64::NAN),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => f64::NAN,
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

pub fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Outer mustache-style template evaluation: scans `text` for `{{ ... }}`
/// spans. If the whole string is exactly one span, returns the raw evaluated
/// value; otherwise every span is stringified and spliced back into the
/// surrounding text, and the whole thing is returned as a JSON string.
pub fn render_template(text: &str, ctx: &Context) -> Result<Value, ExprError> {
    let spans = find_mustache_spans(text)?;
    if spans.len() == 1 && spans[0].0 == 0 && spans[0].1 == text.len() {
        let expr = parse(&text[spans[0].2..spans[0].3])?;
        return eval(&expr, ctx);
    }
    if spans.is_empty() {
        return Ok(Value::String(text.to_string()));
    }
    let mut out = String::new();
    let mut cursor = 0usize;
    for (start, end, inner_start, inner_end) in spans {
        out.push_str(&text[cursor..start]);
        let expr = parse(&text[inner_start..inner_end])?;
        out.push_str(&stringify(&eval(&expr, ctx)?));
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    Ok(Value::String(out))
}

/// Returns `(span_start, span_end, inner_start, inner_end)` for each `{{ ... }}`.
fn find_mustache_spans(text: &str) -> Result<Vec<(usize, usize, usize, usize)>, ExprError> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            let inner_start = i + 2;
            let mut j = inner_start;
            let mut found = None;
            while j + 1 < bytes.len() {
                if bytes[j] == b'}' && bytes[j + 1] == b'}' {
                    found = Some(j);
                    break;
                }
                j += 1;
            }
            match found {
                Some(close) => {
                    spans.push((i, close + 2, inner_start, close));
                    i = close + 2;
                }
                None => return Err(ExprError("unterminated {{ }} span".into())),
            }
        } else {
            i += 1;
        }
    }
    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        let mut headers = HashMap::new();
        headers.insert("x-request-id".to_string(), "abc-123".to_string());
        Context {
            env: HashMap::new(),
            headers,
            body: serde_json::json!({"model": "gpt-4", "finishReason": "STOP", "temperature": 0.5}),
            url: UrlContext {
                pathname: "/v1/chat".into(),
                search: "".into(),
                host: "example.com".into(),
                protocol: "https".into(),
            },
            method: "POST".into(),
            stream_chunk_index: Some(3),
        }
    }

    #[test]
    fn raw_value_for_single_span() {
        let v = render_template("{{ body.model }}", &ctx()).unwrap();
        assert_eq!(v, Value::String("gpt-4".into()));
    }

    #[test]
    fn number_stays_number_for_single_span() {
        let v = render_template("{{ body.temperature }}", &ctx()).unwrap();
        assert_eq!(v, serde_json::json!(0.5));
    }

    #[test]
    fn string_concat_with_surrounding_text() {
        let v = render_template("model={{ body.model }}", &ctx()).unwrap();
        assert_eq!(v, Value::String("model=gpt-4".into()));
    }

    #[test]
    fn arithmetic() {
        let v = render_template("{{ 1 + 2 * 3 }}", &ctx()).unwrap();
        assert_eq!(v, serde_json::json!(7.0));
    }

    #[test]
    fn ternary() {
        let v = render_template("{{ body.finishReason == 'STOP' ? 'done' : 'more' }}", &ctx()).unwrap();
        assert_eq!(v, Value::String("done".into()));
    }

    #[test]
    fn headers_and_method_and_stream() {
        assert_eq!(
            render_template("{{ headers.x-request-id }}", &ctx()).unwrap(),
            Value::String("abc-123".into())
        );
        assert_eq!(render_template("{{ method }}", &ctx()).unwrap(), Value::String("POST".into()));
        assert_eq!(render_template("{{ stream.chunkIndex }}", &ctx()).unwrap(), serde_json::json!(3));
    }

    #[test]
    fn template_literal_interpolation() {
        let v = render_template("{{ `chunk-${stream.chunkIndex}` }}", &ctx()).unwrap();
        assert_eq!(v, Value::String("chunk-3".into()));
    }

    #[test]
    fn crypto_random_uuid_is_a_uuid() {
        let v = render_template("{{ crypto.randomUUID() }}", &ctx()).unwrap();
        let s = v.as_str().unwrap();
        assert!(uuid::Uuid::parse_str(s).is_ok());
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        assert!(render_template("{{ nope.foo }}", &ctx()).is_err());
    }

    #[test]
    fn plain_text_with_no_spans_passes_through() {
        let v = render_template("no templates here", &ctx()).unwrap();
        assert_eq!(v, Value::String("no templates here".into()));
    }

    #[test]
    fn member_access_on_missing_field_is_null_not_error() {
        let v = render_template("{{ body.missing }}", &ctx()).unwrap();
        assert_eq!(v, Value::Null);
    }
}
