//! Recursive-descent parser for the interpreter's Ruby subset.
//!
//! Local variables are resolved at parse time: an identifier is a local read
//! only if an assignment to it (or a parameter of the same name) was seen
//! earlier in the same scope. `def` and `class` bodies open fresh scopes. The
//! top-level scope is seeded from the compile context so locals persist across
//! separate loads.

use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::ast::{DStrPart, Node, Rescue, ScriptMethod};
use crate::error::VmError;
use crate::lexer::{Keyword, StrPart, Token, TokenKind, tokenize};
use crate::stack::ensure_sufficient_stack;
use crate::symbol::{Sym, SymbolTable};

type Result<T> = std::result::Result<T, VmError>;

/// Deepest expression nesting accepted before the source is rejected.
pub(crate) const MAX_NESTING: usize = 128;

/// A parsed compilation unit.
#[derive(Debug)]
pub struct Program {
    pub body: Vec<Node>,
    /// Every local declared at the top level, including seeded ones.
    pub locals: Vec<Sym>,
}

/// Parse `source` into a program, treating `locals` as already declared.
pub fn parse(
    source: &str,
    first_line: u32,
    symbols: &mut SymbolTable,
    locals: impl IntoIterator<Item = Sym>,
) -> Result<Program> {
    let tokens = tokenize(source, first_line)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        symbols,
        scopes: vec![locals.into_iter().collect()],
        depth: 0,
    };
    let body = parser.parse_stmts(|k| matches!(k, TokenKind::Eof))?;
    parser.expect(&TokenKind::Eof, "end-of-input")?;
    let locals = parser
        .scopes
        .pop()
        .map(|scope| scope.into_iter().collect())
        .unwrap_or_default();
    Ok(Program { body, locals })
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    symbols: &'a mut SymbolTable,
    scopes: Vec<FxHashSet<Sym>>,
    depth: usize,
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Int(v) => format!("integer literal {v}"),
        TokenKind::Float(v) => format!("float literal {v}"),
        TokenKind::Str(_) => "string literal".into(),
        TokenKind::Symbol(s) => format!("symbol literal :{s}"),
        TokenKind::Label(s) => format!("label '{s}:'"),
        TokenKind::Ident(s) | TokenKind::Const(s) | TokenKind::IVar(s) => format!("'{s}'"),
        TokenKind::Keyword(k) => format!("'{}'", k.as_str()),
        TokenKind::Newline => "end-of-line".into(),
        TokenKind::Eof => "end-of-input".into(),
        other => format!("{other:?}"),
    }
}

fn is_block_end(k: &TokenKind) -> bool {
    matches!(k, TokenKind::Keyword(Keyword::End))
}

fn is_body_end(k: &TokenKind) -> bool {
    matches!(
        k,
        TokenKind::Keyword(Keyword::End | Keyword::Rescue | Keyword::Else | Keyword::Ensure)
    )
}

fn is_if_body_end(k: &TokenKind) -> bool {
    matches!(
        k,
        TokenKind::Keyword(Keyword::End | Keyword::Elsif | Keyword::Else)
    )
}

impl<'a> Parser<'a> {
    // ------------------------------------------------------------------
    // token plumbing
    // ------------------------------------------------------------------

    fn token(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &TokenKind {
        &self.token().kind
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)].kind
    }

    fn line(&self) -> u32 {
        self.token().line
    }

    fn advance(&mut self) -> Token {
        let token = self.token().clone();
        self.pos += 1;
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(kw))
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expecting: &str) -> VmError {
        VmError::Syntax {
            line: self.line(),
            message: format!(
                "syntax error, unexpected {}, expecting {expecting}",
                describe(self.peek())
            ),
        }
    }

    fn error(&self, message: impl Into<String>) -> VmError {
        VmError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_terms(&mut self) {
        while matches!(self.peek(), TokenKind::Newline | TokenKind::Semi) {
            self.advance();
        }
    }

    fn intern(&mut self, name: &str) -> Sym {
        self.symbols.intern(name)
    }

    // ------------------------------------------------------------------
    // scopes
    // ------------------------------------------------------------------

    fn is_local(&self, sym: Sym) -> bool {
        self.scopes.last().is_some_and(|s| s.contains(&sym))
    }

    fn declare(&mut self, sym: Sym) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(sym);
        }
    }

    fn with_scope<T>(
        &mut self,
        params: &[Sym],
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.scopes.push(params.iter().copied().collect());
        let result = f(self);
        self.scopes.pop();
        result
    }

    /// Run one level of recursive descent, rejecting runaway nesting.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("syntax error, nesting too deep"));
        }
        self.depth += 1;
        let result = ensure_sufficient_stack(|| parse(self));
        self.depth -= 1;
        result
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn parse_stmts(&mut self, end: fn(&TokenKind) -> bool) -> Result<Vec<Node>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_terms();
            if end(self.peek()) || self.check(&TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_stmt()?);
            if !matches!(self.peek(), TokenKind::Newline | TokenKind::Semi) && !end(self.peek()) {
                return Err(self.unexpected("end-of-line"));
            }
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Node> {
        let mut node = self.parse_expr_stmt()?;
        loop {
            let kw = match self.peek() {
                TokenKind::Keyword(kw @ (Keyword::If | Keyword::Unless | Keyword::While | Keyword::Until)) => *kw,
                _ => break,
            };
            self.advance();
            let cond = Box::new(self.parse_expr_stmt()?);
            node = match kw {
                Keyword::If => Node::If {
                    cond,
                    then_body: vec![node],
                    else_body: Vec::new(),
                },
                Keyword::Unless => Node::If {
                    cond,
                    then_body: Vec::new(),
                    else_body: vec![node],
                },
                _ => Node::While {
                    cond,
                    body: vec![node],
                    negate: kw == Keyword::Until,
                },
            };
        }
        Ok(node)
    }

    fn parse_expr_stmt(&mut self) -> Result<Node> {
        let mut lhs = self.parse_not_expr()?;
        loop {
            if self.eat_kw(Keyword::And) {
                self.skip_newlines();
                let rhs = self.parse_not_expr()?;
                lhs = Node::And(Box::new(lhs), Box::new(rhs));
            } else if self.eat_kw(Keyword::Or) {
                self.skip_newlines();
                let rhs = self.parse_not_expr()?;
                lhs = Node::Or(Box::new(lhs), Box::new(rhs));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_not_expr(&mut self) -> Result<Node> {
        if self.eat_kw(Keyword::Not) {
            let operand = self.nested(Self::parse_not_expr)?;
            return Ok(Node::Not(Box::new(operand)));
        }
        self.parse_expr()
    }

    // ------------------------------------------------------------------
    // assignment
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Node> {
        self.nested(Self::parse_assignment)
    }

    fn parse_assignment(&mut self) -> Result<Node> {
        let lhs = self.parse_ternary()?;
        let line = self.line();
        match self.peek().clone() {
            TokenKind::Assign => {
                self.advance();
                self.skip_newlines();
                let rhs = self.parse_expr()?;
                self.write_target(lhs, rhs, line)
            }
            TokenKind::OpAssign(op) => {
                self.advance();
                self.skip_newlines();
                let rhs = self.parse_expr()?;
                let current = self.read_target(&lhs)?;
                let mid = self.intern(op);
                let value = Node::Call {
                    recv: Some(Box::new(current)),
                    mid,
                    args: vec![rhs],
                    line,
                };
                self.write_target(lhs, value, line)
            }
            TokenKind::OrAssign | TokenKind::AndAssign => {
                let is_or = self.check(&TokenKind::OrAssign);
                self.advance();
                self.skip_newlines();
                let rhs = self.parse_expr()?;
                let current = self.read_target(&lhs)?;
                let write = self.write_target(lhs, rhs, line)?;
                Ok(if is_or {
                    Node::Or(Box::new(current), Box::new(write))
                } else {
                    Node::And(Box::new(current), Box::new(write))
                })
            }
            _ => Ok(lhs),
        }
    }

    /// Expression that reads the current value of an assignment target.
    fn read_target(&mut self, target: &Node) -> Result<Node> {
        Ok(match target {
            Node::VCall { mid, .. } => {
                self.declare(*mid);
                Node::LVar(*mid)
            }
            Node::LVar(_) | Node::IVar(_) | Node::Const(_) => target.clone(),
            Node::Call { recv: Some(_), .. } => target.clone(),
            _ => return Err(self.error("syntax error, cannot assign to this expression")),
        })
    }

    fn write_target(&mut self, target: Node, value: Node, line: u32) -> Result<Node> {
        let value = Box::new(value);
        Ok(match target {
            Node::VCall { mid, .. } | Node::LVar(mid) => {
                self.declare(mid);
                Node::LAsgn(mid, value)
            }
            Node::IVar(name) => Node::IAsgn(name, value),
            Node::Const(name) => Node::CDecl(name, value),
            Node::Call {
                recv: Some(recv),
                mid,
                mut args,
                ..
            } => {
                let name = self.symbols.name(mid);
                let setter = if &*name == "[]" {
                    "[]=".to_string()
                } else if args.is_empty() && !name.ends_with(['?', '!']) {
                    format!("{name}=")
                } else {
                    return Err(self.error("syntax error, cannot assign to a method call with arguments"));
                };
                args.push(*value);
                Node::AttrAsgn {
                    recv,
                    mid: self.intern(&setter),
                    args,
                    line,
                }
            }
            _ => return Err(self.error("syntax error, cannot assign to this expression")),
        })
    }

    // ------------------------------------------------------------------
    // operators
    // ------------------------------------------------------------------

    fn parse_ternary(&mut self) -> Result<Node> {
        let cond = self.parse_oror()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(cond);
        }
        self.skip_newlines();
        let then_node = self.nested(Self::parse_ternary)?;
        self.skip_newlines();
        self.expect(&TokenKind::Colon, "':'")?;
        self.skip_newlines();
        let else_node = self.nested(Self::parse_ternary)?;
        Ok(Node::If {
            cond: Box::new(cond),
            then_body: vec![then_node],
            else_body: vec![else_node],
        })
    }

    fn parse_oror(&mut self) -> Result<Node> {
        let mut lhs = self.parse_andand()?;
        while self.eat(&TokenKind::OrOr) {
            self.skip_newlines();
            let rhs = self.parse_andand()?;
            lhs = Node::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_andand(&mut self) -> Result<Node> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&TokenKind::AndAnd) {
            self.skip_newlines();
            let rhs = self.parse_equality()?;
            lhs = Node::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn binary(&mut self, lhs: Node, op: &str, rhs: Node, line: u32) -> Node {
        Node::Call {
            recv: Some(Box::new(lhs)),
            mid: self.intern(op),
            args: vec![rhs],
            line,
        }
    }

    /// Left-associative binary level over `ops`, with `next` as the operand
    /// parser.
    fn parse_binary_level(
        &mut self,
        ops: &[(TokenKind, &str)],
        next: fn(&mut Self) -> Result<Node>,
    ) -> Result<Node> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (kind, op) in ops {
                if self.check(kind) {
                    let line = self.line();
                    self.advance();
                    self.skip_newlines();
                    let rhs = next(self)?;
                    lhs = self.binary(lhs, op, rhs, line);
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_equality(&mut self) -> Result<Node> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let line = self.line();
            let (op, negate) = match self.peek() {
                TokenKind::EqEq => ("==", false),
                TokenKind::NotEq => ("==", true),
                TokenKind::Cmp => ("<=>", false),
                _ => return Ok(lhs),
            };
            self.advance();
            self.skip_newlines();
            let rhs = self.parse_comparison()?;
            lhs = self.binary(lhs, op, rhs, line);
            if negate {
                lhs = Node::Not(Box::new(lhs));
            }
        }
    }

    fn parse_comparison(&mut self) -> Result<Node> {
        self.parse_binary_level(
            &[
                (TokenKind::Lt, "<"),
                (TokenKind::Gt, ">"),
                (TokenKind::Le, "<="),
                (TokenKind::Ge, ">="),
            ],
            Self::parse_bitor,
        )
    }

    fn parse_bitor(&mut self) -> Result<Node> {
        self.parse_binary_level(
            &[(TokenKind::Pipe, "|"), (TokenKind::Caret, "^")],
            Self::parse_bitand,
        )
    }

    fn parse_bitand(&mut self) -> Result<Node> {
        self.parse_binary_level(&[(TokenKind::Amp, "&")], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> Result<Node> {
        self.parse_binary_level(
            &[(TokenKind::Shl, "<<"), (TokenKind::Shr, ">>")],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Node> {
        self.parse_binary_level(
            &[(TokenKind::Plus, "+"), (TokenKind::Minus, "-")],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Node> {
        self.parse_binary_level(
            &[
                (TokenKind::Star, "*"),
                (TokenKind::Slash, "/"),
                (TokenKind::Percent, "%"),
            ],
            Self::parse_unary_minus,
        )
    }

    fn parse_unary_minus(&mut self) -> Result<Node> {
        if self.check(&TokenKind::Minus) {
            let line = self.line();
            self.advance();
            let operand = self.nested(Self::parse_unary_minus)?;
            return Ok(match operand {
                Node::Int(v) => Node::Int(v.wrapping_neg()),
                Node::Float(v) => Node::Float(-v),
                other => Node::Call {
                    recv: Some(Box::new(other)),
                    mid: self.intern("-@"),
                    args: Vec::new(),
                    line,
                },
            });
        }
        self.parse_pow()
    }

    fn parse_pow(&mut self) -> Result<Node> {
        let base = self.parse_unary()?;
        if self.check(&TokenKind::Pow) {
            let line = self.line();
            self.advance();
            self.skip_newlines();
            let exponent = self.nested(Self::parse_unary_minus)?;
            return Ok(self.binary(base, "**", exponent, line));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Node> {
        if self.eat(&TokenKind::Bang) {
            let operand = self.nested(Self::parse_unary)?;
            return Ok(Node::Not(Box::new(operand)));
        }
        if self.eat(&TokenKind::Plus) {
            return self.nested(Self::parse_unary);
        }
        self.parse_postfix()
    }

    // ------------------------------------------------------------------
    // calls
    // ------------------------------------------------------------------

    fn parse_postfix(&mut self) -> Result<Node> {
        let mut node = self.parse_primary()?;
        loop {
            // leading-dot method chains across lines
            if self.check(&TokenKind::Newline) {
                let mut n = 0;
                while self.peek_nth(n) == &TokenKind::Newline {
                    n += 1;
                }
                if self.peek_nth(n) == &TokenKind::Dot {
                    self.skip_newlines();
                }
            }
            if self.eat(&TokenKind::Dot) {
                let line = self.line();
                let name = match self.advance().kind {
                    TokenKind::Ident(name) | TokenKind::Const(name) => name,
                    TokenKind::Keyword(kw) => kw.as_str().to_string(),
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected("method name"));
                    }
                };
                let mid = self.intern(&name);
                let args = self.parse_call_args()?;
                node = Node::Call {
                    recv: Some(Box::new(node)),
                    mid,
                    args,
                    line,
                };
            } else if self.check(&TokenKind::LBracket) && !self.token().spaced {
                let line = self.line();
                self.advance();
                let args = self.parse_arg_list(Some(TokenKind::RBracket))?;
                node = Node::Call {
                    recv: Some(Box::new(node)),
                    mid: self.intern("[]"),
                    args,
                    line,
                };
            } else {
                return Ok(node);
            }
        }
    }

    /// Arguments following a method name: parenthesized, command style, or
    /// none.
    fn parse_call_args(&mut self) -> Result<Vec<Node>> {
        if self.check(&TokenKind::LParen) && !self.token().spaced {
            self.advance();
            self.parse_arg_list(Some(TokenKind::RParen))
        } else if self.starts_command_arg() {
            self.parse_arg_list(None)
        } else {
            Ok(Vec::new())
        }
    }

    /// Whether the current token begins an argument of a parenthesis-free
    /// call such as `puts x` or `attr_accessor :name`.
    fn starts_command_arg(&self) -> bool {
        let token = self.token();
        if !token.spaced {
            return false;
        }
        match &token.kind {
            TokenKind::Int(_)
            | TokenKind::Float(_)
            | TokenKind::Str(_)
            | TokenKind::Symbol(_)
            | TokenKind::Label(_)
            | TokenKind::Ident(_)
            | TokenKind::Const(_)
            | TokenKind::IVar(_)
            | TokenKind::LBracket
            | TokenKind::LParen
            | TokenKind::Keyword(
                Keyword::Nil | Keyword::True | Keyword::False | Keyword::SelfKw | Keyword::Not,
            ) => true,
            TokenKind::Minus | TokenKind::Bang => {
                let next = &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)];
                !next.spaced && next.kind != TokenKind::Newline
            }
            _ => false,
        }
    }

    /// Comma-separated arguments. With `close`, the list is delimited and may
    /// span lines. Trailing `key: value` / `k => v` pairs collect into a hash.
    fn parse_arg_list(&mut self, close: Option<TokenKind>) -> Result<Vec<Node>> {
        let mut args = Vec::new();
        let mut pairs = Vec::new();
        loop {
            if let Some(close) = &close {
                self.skip_newlines();
                if self.check(close) {
                    break;
                }
            }
            if let TokenKind::Label(name) = self.peek().clone() {
                self.advance();
                self.skip_newlines();
                let key = Node::Symbol(self.intern(&name));
                let value = self.parse_expr()?;
                pairs.push((key, value));
            } else {
                let arg = self.parse_expr()?;
                if self.eat(&TokenKind::Arrow) {
                    self.skip_newlines();
                    let value = self.parse_expr()?;
                    pairs.push((arg, value));
                } else if pairs.is_empty() {
                    args.push(arg);
                } else {
                    return Err(self.error("syntax error, positional argument after keyword pairs"));
                }
            }
            if close.is_some() {
                self.skip_newlines();
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        if !pairs.is_empty() {
            args.push(Node::Hash(pairs));
        }
        if let Some(close) = close {
            self.skip_newlines();
            self.expect(&close, "')' or ']'")?;
        }
        Ok(args)
    }

    // ------------------------------------------------------------------
    // primaries
    // ------------------------------------------------------------------

    fn parse_primary(&mut self) -> Result<Node> {
        let line = self.line();
        let token = self.advance();
        match token.kind {
            TokenKind::Int(v) => Ok(Node::Int(v)),
            TokenKind::Float(v) => Ok(Node::Float(v)),
            TokenKind::Str(parts) => self.string_node(parts),
            TokenKind::Symbol(name) => Ok(Node::Symbol(self.intern(&name))),
            TokenKind::IVar(name) => Ok(Node::IVar(self.intern(&name))),
            TokenKind::Ident(name) => {
                let mid = self.intern(&name);
                let paren = self.check(&TokenKind::LParen) && !self.token().spaced;
                if self.is_local(mid) && !paren {
                    return Ok(Node::LVar(mid));
                }
                if !paren && !self.starts_command_arg() {
                    return Ok(Node::VCall { mid, line });
                }
                let args = self.parse_call_args()?;
                Ok(Node::Call {
                    recv: None,
                    mid,
                    args,
                    line,
                })
            }
            TokenKind::Const(name) => {
                let sym = self.intern(&name);
                if self.check(&TokenKind::LParen) && !self.token().spaced {
                    let args = self.parse_call_args()?;
                    return Ok(Node::Call {
                        recv: None,
                        mid: sym,
                        args,
                        line,
                    });
                }
                Ok(Node::Const(sym))
            }
            TokenKind::Keyword(kw) => self.parse_keyword(kw, line),
            TokenKind::LBracket => {
                let items = self.parse_arg_list(Some(TokenKind::RBracket))?;
                Ok(Node::Array(items))
            }
            TokenKind::LBrace => self.parse_hash_literal(),
            TokenKind::LParen => {
                let mut body = self.parse_stmts(|k| matches!(k, TokenKind::RParen))?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(match body.len() {
                    0 => Node::Nil,
                    1 => body.remove(0),
                    _ => Node::Seq(body),
                })
            }
            _ => {
                self.pos -= 1;
                Err(self.error(format!("syntax error, unexpected {}", describe(self.peek()))))
            }
        }
    }

    fn string_node(&mut self, parts: Vec<StrPart>) -> Result<Node> {
        if parts.iter().all(|p| matches!(p, StrPart::Lit(_))) {
            let s = parts
                .into_iter()
                .filter_map(|p| match p {
                    StrPart::Lit(s) => Some(s),
                    StrPart::Code(..) => None,
                })
                .collect();
            return Ok(Node::Str(s));
        }
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                StrPart::Lit(s) => out.push(DStrPart::Lit(s)),
                StrPart::Code(code, line) => out.push(DStrPart::Code(self.parse_fragment(&code, line)?)),
            }
        }
        Ok(Node::DStr(out))
    }

    /// Parse an interpolated fragment in the current scope.
    fn parse_fragment(&mut self, code: &str, line: u32) -> Result<Vec<Node>> {
        let tokens = tokenize(code, line)?;
        let mut sub = Parser {
            tokens,
            pos: 0,
            symbols: &mut *self.symbols,
            scopes: std::mem::take(&mut self.scopes),
            depth: self.depth,
        };
        let result = sub
            .parse_stmts(|k| matches!(k, TokenKind::Eof))
            .and_then(|body| sub.expect(&TokenKind::Eof, "'}'").map(|_| body));
        self.scopes = std::mem::take(&mut sub.scopes);
        result
    }

    fn parse_hash_literal(&mut self) -> Result<Node> {
        let mut pairs = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if let TokenKind::Label(name) = self.peek().clone() {
                self.advance();
                self.skip_newlines();
                let key = Node::Symbol(self.intern(&name));
                pairs.push((key, self.parse_expr()?));
            } else {
                let key = self.parse_expr()?;
                self.skip_newlines();
                self.expect(&TokenKind::Arrow, "'=>'")?;
                self.skip_newlines();
                pairs.push((key, self.parse_expr()?));
            }
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                self.skip_newlines();
                self.expect(&TokenKind::RBrace, "'}'")?;
                break;
            }
        }
        Ok(Node::Hash(pairs))
    }

    fn parse_keyword(&mut self, kw: Keyword, line: u32) -> Result<Node> {
        match kw {
            Keyword::Nil => Ok(Node::Nil),
            Keyword::True => Ok(Node::True),
            Keyword::False => Ok(Node::False),
            Keyword::SelfKw => Ok(Node::SelfRef),
            Keyword::Not => {
                let operand = self.parse_expr()?;
                Ok(Node::Not(Box::new(operand)))
            }
            Keyword::Def => self.parse_def(line),
            Keyword::Class => self.parse_class(line),
            Keyword::If => self.parse_if_rest(),
            Keyword::Unless => {
                let cond = Box::new(self.parse_expr_stmt()?);
                self.eat_then();
                let else_body = self.parse_stmts(is_if_body_end)?;
                let then_body = if self.eat_kw(Keyword::Else) {
                    self.parse_stmts(is_block_end)?
                } else {
                    Vec::new()
                };
                self.expect(&TokenKind::Keyword(Keyword::End), "'end'")?;
                Ok(Node::If {
                    cond,
                    then_body,
                    else_body,
                })
            }
            Keyword::While | Keyword::Until => {
                let cond = Box::new(self.parse_expr_stmt()?);
                self.eat_kw(Keyword::Do);
                let body = self.parse_stmts(is_block_end)?;
                self.expect(&TokenKind::Keyword(Keyword::End), "'end'")?;
                Ok(Node::While {
                    cond,
                    body,
                    negate: kw == Keyword::Until,
                })
            }
            Keyword::Begin => {
                let body = self.parse_bodystmt()?;
                self.expect(&TokenKind::Keyword(Keyword::End), "'end'")?;
                Ok(match <[Node; 1]>::try_from(body) {
                    Ok([single]) => single,
                    Err(body) => Node::Seq(body),
                })
            }
            Keyword::Return | Keyword::Break | Keyword::Next => {
                let value = if self.starts_jump_value() {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                Ok(match kw {
                    Keyword::Return => Node::Return(value),
                    Keyword::Break => Node::Break(value),
                    _ => Node::Next(value),
                })
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("syntax error, unexpected '{}'", other.as_str())))
            }
        }
    }

    fn starts_jump_value(&self) -> bool {
        !matches!(
            self.peek(),
            TokenKind::Newline
                | TokenKind::Semi
                | TokenKind::Eof
                | TokenKind::RParen
                | TokenKind::RBrace
                | TokenKind::Keyword(
                    Keyword::End | Keyword::If | Keyword::Unless | Keyword::While | Keyword::Until
                )
        )
    }

    fn eat_then(&mut self) {
        self.skip_terms();
        self.eat_kw(Keyword::Then);
    }

    /// Parses after `if` or `elsif`, consuming the closing `end`.
    fn parse_if_rest(&mut self) -> Result<Node> {
        let cond = Box::new(self.parse_expr_stmt()?);
        self.eat_then();
        let then_body = self.parse_stmts(is_if_body_end)?;
        let else_body = if self.eat_kw(Keyword::Elsif) {
            vec![self.parse_if_rest()?]
        } else if self.eat_kw(Keyword::Else) {
            let body = self.parse_stmts(is_block_end)?;
            self.expect(&TokenKind::Keyword(Keyword::End), "'end'")?;
            body
        } else {
            self.expect(&TokenKind::Keyword(Keyword::End), "'end'")?;
            Vec::new()
        };
        Ok(Node::If {
            cond,
            then_body,
            else_body,
        })
    }

    /// Statements followed by optional `rescue`/`else`/`ensure` clauses. The
    /// closing `end` is left for the caller.
    fn parse_bodystmt(&mut self) -> Result<Vec<Node>> {
        let body = self.parse_stmts(is_body_end)?;
        let mut rescues = Vec::new();
        while self.eat_kw(Keyword::Rescue) {
            let mut classes = Vec::new();
            while !matches!(
                self.peek(),
                TokenKind::Newline | TokenKind::Semi | TokenKind::Arrow | TokenKind::Keyword(Keyword::Then)
            ) {
                classes.push(self.parse_ternary()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
            let var = if self.eat(&TokenKind::Arrow) {
                match self.advance().kind {
                    TokenKind::Ident(name) => {
                        let sym = self.intern(&name);
                        self.declare(sym);
                        Some(sym)
                    }
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected("local variable name"));
                    }
                }
            } else {
                None
            };
            self.eat_then();
            let body = self.parse_stmts(is_body_end)?;
            rescues.push(Rescue { classes, var, body });
        }
        let else_body = if self.eat_kw(Keyword::Else) {
            self.parse_stmts(|k| matches!(k, TokenKind::Keyword(Keyword::End | Keyword::Ensure)))?
        } else {
            Vec::new()
        };
        let ensure = if self.eat_kw(Keyword::Ensure) {
            self.parse_stmts(is_block_end)?
        } else {
            Vec::new()
        };
        if rescues.is_empty() && else_body.is_empty() && ensure.is_empty() {
            return Ok(body);
        }
        Ok(vec![Node::Begin {
            body,
            rescues,
            else_body,
            ensure,
        }])
    }

    fn parse_def(&mut self, line: u32) -> Result<Node> {
        let token = self.advance();
        let name = match token.kind {
            TokenKind::Ident(name) | TokenKind::Const(name) => {
                if self.check(&TokenKind::Dot) && name == "self" {
                    return Err(self.error("singleton method definitions are not supported"));
                }
                if self.check(&TokenKind::Assign)
                    && !self.token().spaced
                    && self.peek_nth(1) == &TokenKind::LParen
                {
                    self.advance();
                    format!("{name}=")
                } else {
                    name
                }
            }
            TokenKind::Keyword(Keyword::SelfKw) => {
                return Err(self.error("singleton method definitions are not supported"));
            }
            TokenKind::Plus => "+".into(),
            TokenKind::Minus => "-".into(),
            TokenKind::Star => "*".into(),
            TokenKind::Pow => "**".into(),
            TokenKind::Slash => "/".into(),
            TokenKind::Percent => "%".into(),
            TokenKind::EqEq => "==".into(),
            TokenKind::Lt => "<".into(),
            TokenKind::Gt => ">".into(),
            TokenKind::Le => "<=".into(),
            TokenKind::Ge => ">=".into(),
            TokenKind::Cmp => "<=>".into(),
            TokenKind::Shl => "<<".into(),
            TokenKind::LBracket => {
                self.expect(&TokenKind::RBracket, "']'")?;
                if self.check(&TokenKind::Assign) && !self.token().spaced {
                    self.advance();
                    "[]=".into()
                } else {
                    "[]".into()
                }
            }
            other => {
                self.pos -= 1;
                return Err(self.unexpected(&format!("method name, got {}", describe(&other))));
            }
        };
        let name = self.intern(&name);

        let mut params = Vec::new();
        let parenthesized = self.eat(&TokenKind::LParen);
        if parenthesized || matches!(self.peek(), TokenKind::Ident(_)) {
            loop {
                if parenthesized {
                    self.skip_newlines();
                }
                match self.peek().clone() {
                    TokenKind::Ident(param) => {
                        self.advance();
                        let sym = self.intern(&param);
                        if params.contains(&sym) {
                            return Err(self.error(format!("duplicated argument name '{param}'")));
                        }
                        params.push(sym);
                    }
                    TokenKind::RParen if parenthesized => break,
                    _ => return Err(self.unexpected("parameter name")),
                }
                if parenthesized {
                    self.skip_newlines();
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            if parenthesized {
                self.expect(&TokenKind::RParen, "')'")?;
            }
        }

        let body = self.with_scope(&params, |p| p.parse_bodystmt())?;
        self.expect(&TokenKind::Keyword(Keyword::End), "'end'")?;
        Ok(Node::Def(Rc::new(ScriptMethod {
            name,
            params,
            body,
            line,
        })))
    }

    fn parse_class(&mut self, line: u32) -> Result<Node> {
        let name = match self.advance().kind {
            TokenKind::Const(name) => self.intern(&name),
            TokenKind::Shl => return Err(self.error("singleton class definitions are not supported")),
            _ => {
                self.pos -= 1;
                return Err(self.error("class/module name must be CONSTANT"));
            }
        };
        let superclass = if self.eat(&TokenKind::Lt) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        let body = self.with_scope(&[], |p| p.parse_stmts(is_block_end))?;
        self.expect(&TokenKind::Keyword(Keyword::End), "'end'")?;
        Ok(Node::ClassDef {
            name,
            superclass,
            body,
            line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_src(src: &str) -> (Program, SymbolTable) {
        let mut symbols = SymbolTable::new();
        let program = parse(src, 1, &mut symbols, []).expect("parses");
        (program, symbols)
    }

    fn parse_err(src: &str) -> VmError {
        let mut symbols = SymbolTable::new();
        parse(src, 1, &mut symbols, []).unwrap_err()
    }

    #[test]
    fn def_with_params_and_body() {
        let (program, symbols) = parse_src("def mul(a, b)\n  a * b\nend\n");
        let [Node::Def(method)] = program.body.as_slice() else {
            panic!("expected def, got {:?}", program.body);
        };
        assert_eq!(&*symbols.name(method.name), "mul");
        assert_eq!(method.arity(), 2);
        assert!(matches!(
            method.body.as_slice(),
            [Node::Call { recv: Some(_), args, .. }] if args.len() == 1
        ));
    }

    #[test]
    fn assignment_declares_local() {
        let (program, _) = parse_src("x = 1\nx + 2");
        assert!(matches!(program.body[0], Node::LAsgn(..)));
        let Node::Call { recv: Some(recv), .. } = &program.body[1] else {
            panic!("expected call");
        };
        assert!(matches!(**recv, Node::LVar(_)));
        assert_eq!(program.locals.len(), 1);
    }

    #[test]
    fn seeded_locals_are_reads() {
        let mut symbols = SymbolTable::new();
        let x = symbols.intern("x");
        let program = parse("x", 1, &mut symbols, [x]).expect("parses");
        assert!(matches!(program.body[0], Node::LVar(_)));
    }

    #[test]
    fn unknown_identifier_is_vcall() {
        let (program, _) = parse_src("foo");
        assert!(matches!(program.body[0], Node::VCall { .. }));
    }

    #[test]
    fn command_call_without_parens() {
        let (program, _) = parse_src("puts 1, \"two\"");
        assert!(matches!(
            &program.body[0],
            Node::Call { recv: None, args, .. } if args.len() == 2
        ));
    }

    #[test]
    fn index_assignment_becomes_attr_asgn() {
        let (program, symbols) = parse_src("h = {}\nh[1] = 2");
        let Node::AttrAsgn { mid, args, .. } = &program.body[1] else {
            panic!("expected index assignment");
        };
        assert_eq!(&*symbols.name(*mid), "[]=");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn setter_call_on_receiver() {
        let (program, symbols) = parse_src("p = Person.new\np.name = 'x'");
        let Node::AttrAsgn { mid, .. } = &program.body[1] else {
            panic!("expected setter");
        };
        assert_eq!(&*symbols.name(*mid), "name=");
    }

    #[test]
    fn compound_assignment_desugars() {
        let (program, _) = parse_src("a = 1\na += 2");
        let Node::LAsgn(_, value) = &program.body[1] else {
            panic!("expected assignment");
        };
        assert!(matches!(**value, Node::Call { .. }));
    }

    #[test]
    fn not_equal_negates_equality() {
        let (program, _) = parse_src("1 != 2");
        assert!(matches!(program.body[0], Node::Not(_)));
    }

    #[test]
    fn modifier_if() {
        let (program, _) = parse_src("x = 1 if true");
        assert!(matches!(program.body[0], Node::If { .. }));
    }

    #[test]
    fn class_with_superclass() {
        let (program, _) = parse_src("class Student < Person\n  def study\n  end\nend");
        let Node::ClassDef { superclass, body, .. } = &program.body[0] else {
            panic!("expected class");
        };
        assert!(superclass.is_some());
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn begin_rescue_ensure() {
        let (program, _) = parse_src(
            "begin\n  raise 'x'\nrescue TypeError, ArgumentError => e\n  1\nrescue => e\n  2\nensure\n  3\nend",
        );
        let Node::Begin { rescues, ensure, .. } = &program.body[0] else {
            panic!("expected begin");
        };
        assert_eq!(rescues.len(), 2);
        assert_eq!(rescues[0].classes.len(), 2);
        assert!(rescues[1].classes.is_empty());
        assert_eq!(ensure.len(), 1);
    }

    #[test]
    fn interpolation_sees_locals() {
        let (program, _) = parse_src("name = 'bob'\n\"hi #{name}\"");
        let Node::DStr(parts) = &program.body[1] else {
            panic!("expected interpolated string");
        };
        assert!(matches!(&parts[1], DStrPart::Code(code) if matches!(code[0], Node::LVar(_))));
    }

    #[test]
    fn ternary_and_unary_minus() {
        let (program, _) = parse_src("x = 3\nx > 0 ? -x : x");
        assert!(matches!(program.body[1], Node::If { .. }));
    }

    #[test]
    fn operator_method_definitions() {
        let (program, symbols) = parse_src("class V\n  def ==(o)\n    true\n  end\n  def [](i)\n    i\n  end\nend");
        let Node::ClassDef { body, .. } = &program.body[0] else {
            panic!("expected class");
        };
        let names: Vec<String> = body
            .iter()
            .filter_map(|n| match n {
                Node::Def(m) => Some(symbols.name(m.name).to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["==", "[]"]);
    }

    #[test]
    fn missing_end_reports_line() {
        let err = parse_err("def broken\n  1 +\n");
        assert!(matches!(err, VmError::Syntax { .. }));
    }

    #[test]
    fn stray_end_is_an_error() {
        let err = parse_err("1\nend");
        let VmError::Syntax { line, message } = err else {
            panic!("expected syntax error");
        };
        assert_eq!(line, 2);
        assert!(message.contains("end"), "{message}");
    }

    #[test]
    fn runaway_nesting_is_a_syntax_error() {
        for src in [
            format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000)),
            format!("{}1{}", "[".repeat(10_000), "]".repeat(10_000)),
            format!("{}1", "!".repeat(10_000)),
            format!("{}1", "-".repeat(10_000)),
            "if true\n".repeat(1_000),
        ] {
            let VmError::Syntax { message, .. } = parse_err(&src) else {
                panic!("expected syntax error");
            };
            assert!(message.contains("nesting too deep"), "{message}");
        }
    }

    #[test]
    fn nesting_below_the_limit_parses() {
        let depth = MAX_NESTING / 2;
        let src = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        let (program, _) = parse_src(&src);
        assert!(matches!(program.body.as_slice(), [Node::Int(1)]));

        let src = format!("{}[1]{}", "[".repeat(depth), "]".repeat(depth));
        parse_src(&src);
    }
}
