//! Lexer for the interpreter's Ruby subset.
//!
//! Produces a flat token vector. Newlines are significant (statement
//! terminators) and are emitted as [`TokenKind::Newline`]; the parser skips
//! them wherever an expression obviously continues.

use crate::error::VmError;

/// One piece of a double-quoted string literal.
#[derive(Clone, Debug, PartialEq)]
pub enum StrPart {
    Lit(String),
    /// Raw source of a `#{...}` segment and the line it starts on.
    Code(String, u32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(Vec<StrPart>),
    Symbol(String),
    /// `name:` inside hash literals and argument lists.
    Label(String),
    Ident(String),
    Const(String),
    IVar(String),
    Keyword(Keyword),

    Plus,
    Minus,
    Star,
    Pow,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    Cmp,
    Shl,
    Shr,
    Amp,
    Pipe,
    Caret,
    AndAnd,
    OrOr,
    Bang,
    Assign,
    /// Compound assignment such as `+=`; carries the operator method name.
    OpAssign(&'static str),
    OrAssign,
    AndAssign,
    Arrow,
    Question,
    Colon,
    Dot,
    Comma,
    Semi,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Newline,
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    Def,
    End,
    Class,
    If,
    Elsif,
    Else,
    Unless,
    While,
    Until,
    Do,
    Then,
    Return,
    Break,
    Next,
    And,
    Or,
    Not,
    Nil,
    True,
    False,
    SelfKw,
    Begin,
    Rescue,
    Ensure,
}

impl Keyword {
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Def => "def",
            Keyword::End => "end",
            Keyword::Class => "class",
            Keyword::If => "if",
            Keyword::Elsif => "elsif",
            Keyword::Else => "else",
            Keyword::Unless => "unless",
            Keyword::While => "while",
            Keyword::Until => "until",
            Keyword::Do => "do",
            Keyword::Then => "then",
            Keyword::Return => "return",
            Keyword::Break => "break",
            Keyword::Next => "next",
            Keyword::And => "and",
            Keyword::Or => "or",
            Keyword::Not => "not",
            Keyword::Nil => "nil",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::SelfKw => "self",
            Keyword::Begin => "begin",
            Keyword::Rescue => "rescue",
            Keyword::Ensure => "ensure",
        }
    }
}

fn keyword(ident: &str) -> Option<Keyword> {
    Some(match ident {
        "def" => Keyword::Def,
        "end" => Keyword::End,
        "class" => Keyword::Class,
        "if" => Keyword::If,
        "elsif" => Keyword::Elsif,
        "else" => Keyword::Else,
        "unless" => Keyword::Unless,
        "while" => Keyword::While,
        "until" => Keyword::Until,
        "do" => Keyword::Do,
        "then" => Keyword::Then,
        "return" => Keyword::Return,
        "break" => Keyword::Break,
        "next" => Keyword::Next,
        "and" => Keyword::And,
        "or" => Keyword::Or,
        "not" => Keyword::Not,
        "nil" => Keyword::Nil,
        "true" => Keyword::True,
        "false" => Keyword::False,
        "self" => Keyword::SelfKw,
        "begin" => Keyword::Begin,
        "rescue" => Keyword::Rescue,
        "ensure" => Keyword::Ensure,
        _ => return None,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    /// Whitespace separates this token from the previous one.
    pub spaced: bool,
}

/// Tokenize `source`, numbering lines from `first_line`.
pub fn tokenize(source: &str, first_line: u32) -> Result<Vec<Token>, VmError> {
    Lexer::new(source, first_line).run()
}

struct Lexer<'src> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    tokens: Vec<Token>,
    spaced: bool,
    _source: &'src str,
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

impl<'src> Lexer<'src> {
    fn new(source: &'src str, first_line: u32) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: first_line,
            tokens: Vec::new(),
            spaced: false,
            _source: source,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> VmError {
        VmError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn push(&mut self, kind: TokenKind, line: u32) {
        self.tokens.push(Token {
            kind,
            line,
            spaced: self.spaced,
        });
        self.spaced = false;
    }

    fn last_kind(&self) -> Option<&TokenKind> {
        self.tokens.last().map(|t| &t.kind)
    }

    /// Whether the previous token ends an operand, which decides how an
    /// ambiguous `:` or `[` is read.
    fn after_operand(&self) -> bool {
        matches!(
            self.last_kind(),
            Some(
                TokenKind::Int(_)
                    | TokenKind::Float(_)
                    | TokenKind::Str(_)
                    | TokenKind::Symbol(_)
                    | TokenKind::Ident(_)
                    | TokenKind::Const(_)
                    | TokenKind::IVar(_)
                    | TokenKind::RParen
                    | TokenKind::RBracket
                    | TokenKind::RBrace
                    | TokenKind::Keyword(Keyword::End | Keyword::SelfKw | Keyword::Nil | Keyword::True | Keyword::False)
            )
        )
    }

    fn run(mut self) -> Result<Vec<Token>, VmError> {
        while let Some(c) = self.peek() {
            let line = self.line;
            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                    self.spaced = true;
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                    self.spaced = true;
                }
                '\n' => {
                    self.bump();
                    if !matches!(self.last_kind(), Some(TokenKind::Newline) | None) {
                        self.push(TokenKind::Newline, line);
                    }
                    self.spaced = true;
                    if self.at_line_start_marker("=begin") {
                        self.skip_block_comment()?;
                    }
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '0'..='9' => self.number()?,
                '"' => {
                    self.bump();
                    let parts = self.string_body('"', true)?;
                    self.push(TokenKind::Str(parts), line);
                }
                '\'' => {
                    self.bump();
                    let parts = self.string_body('\'', false)?;
                    self.push(TokenKind::Str(parts), line);
                }
                '@' => {
                    self.bump();
                    if !self.peek().is_some_and(is_ident_start) {
                        return Err(self.error("'@' without identifiers is not allowed as an instance variable name"));
                    }
                    let name = self.ident_chars();
                    self.push(TokenKind::IVar(format!("@{name}")), line);
                }
                ':' => self.colon(line)?,
                c if is_ident_start(c) => self.identifier(line),
                _ => self.operator(line)?,
            }
        }
        if !matches!(self.last_kind(), Some(TokenKind::Newline) | None) {
            let line = self.line;
            self.push(TokenKind::Newline, line);
        }
        let line = self.line;
        self.push(TokenKind::Eof, line);
        Ok(self.tokens)
    }

    fn at_line_start_marker(&self, marker: &str) -> bool {
        marker
            .chars()
            .enumerate()
            .all(|(i, m)| self.peek_at(i) == Some(m))
    }

    fn skip_block_comment(&mut self) -> Result<(), VmError> {
        loop {
            // consume the current line
            loop {
                match self.bump() {
                    Some('\n') => break,
                    Some(_) => {}
                    None => return Err(self.error("embedded document meets end of file")),
                }
            }
            if self.at_line_start_marker("=end") {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
                return Ok(());
            }
        }
    }

    fn ident_chars(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if !is_ident_continue(c) {
                break;
            }
            name.push(c);
            self.bump();
        }
        name
    }

    fn identifier(&mut self, line: u32) {
        let mut name = self.ident_chars();
        let after_dot = matches!(self.last_kind(), Some(TokenKind::Dot));

        // `nil?`, `include?`, `save!`, but not `a!=b` or `a?b:c`
        if let Some(suffix @ ('?' | '!')) = self.peek() {
            let next = self.peek_at(1);
            if next != Some('=') || self.peek_at(2) == Some('=') {
                let takes_suffix = suffix == '!' || !next.is_some_and(|n| is_ident_continue(n) || n == ':');
                if takes_suffix {
                    name.push(suffix);
                    self.bump();
                }
            }
        }

        // `key: value` labels; `a ? b : c` keeps a space before the colon
        if self.peek() == Some(':')
            && self.peek_at(1) != Some(':')
            && !name.ends_with('?')
            && self.peek_at(1).is_none_or(|c| c == ' ' || c == '\n' || c == '\t')
            && !after_dot
        {
            self.bump();
            self.push(TokenKind::Label(name), line);
            return;
        }

        if !after_dot {
            if let Some(kw) = keyword(&name) {
                self.push(TokenKind::Keyword(kw), line);
                return;
            }
        }

        let kind = if name.starts_with(|c: char| c.is_uppercase()) {
            TokenKind::Const(name)
        } else {
            TokenKind::Ident(name)
        };
        self.push(kind, line);
    }

    fn number(&mut self) -> Result<(), VmError> {
        let line = self.line;
        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => text.push(c),
                '_' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {}
                '.' if !is_float && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                    is_float = true;
                    text.push(c);
                }
                'e' | 'E'
                    if self.peek_at(1).is_some_and(|n| n.is_ascii_digit())
                        || (matches!(self.peek_at(1), Some('+' | '-'))
                            && self.peek_at(2).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    is_float = true;
                    text.push('e');
                    self.bump();
                    if let Some(sign @ ('+' | '-')) = self.peek() {
                        text.push(sign);
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| self.error(format!("invalid float literal '{text}'")))?;
            self.push(TokenKind::Float(value), line);
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| self.error(format!("integer too big: {text}")))?;
            self.push(TokenKind::Int(value), line);
        }
        Ok(())
    }

    fn string_body(&mut self, quote: char, interpolate: bool) -> Result<Vec<StrPart>, VmError> {
        let start_line = self.line;
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(VmError::Syntax {
                    line: start_line,
                    message: "unterminated string meets end of file".into(),
                });
            };
            match c {
                c if c == quote => break,
                '\\' => {
                    let Some(e) = self.bump() else { continue };
                    if interpolate {
                        match e {
                            'n' => lit.push('\n'),
                            't' => lit.push('\t'),
                            'r' => lit.push('\r'),
                            'e' => lit.push('\u{1b}'),
                            's' => lit.push(' '),
                            '0' => lit.push('\0'),
                            '\n' => {}
                            other => lit.push(other),
                        }
                    } else if e == quote || e == '\\' {
                        lit.push(e);
                    } else {
                        lit.push('\\');
                        lit.push(e);
                    }
                }
                '#' if interpolate && self.peek() == Some('{') => {
                    self.bump();
                    let code_line = self.line;
                    let mut depth = 1usize;
                    let mut code = String::new();
                    loop {
                        let Some(c) = self.bump() else {
                            return Err(self.error("unterminated string interpolation"));
                        };
                        match c {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        code.push(c);
                    }
                    if !lit.is_empty() {
                        parts.push(StrPart::Lit(std::mem::take(&mut lit)));
                    }
                    parts.push(StrPart::Code(code, code_line));
                }
                other => lit.push(other),
            }
        }
        if !lit.is_empty() || parts.is_empty() {
            parts.push(StrPart::Lit(lit));
        }
        Ok(parts)
    }

    fn colon(&mut self, line: u32) -> Result<(), VmError> {
        self.bump();
        match self.peek() {
            Some(':') => Err(self.error("scoped constant lookup ('::') is not supported")),
            Some('"') if !self.after_operand() || self.spaced => {
                self.bump();
                let parts = self.string_body('"', false)?;
                let name = parts
                    .into_iter()
                    .map(|p| match p {
                        StrPart::Lit(s) => s,
                        StrPart::Code(s, _) => s,
                    })
                    .collect();
                self.push(TokenKind::Symbol(name), line);
                Ok(())
            }
            Some(c) if is_ident_start(c) && (!self.after_operand() || self.spaced) => {
                let mut name = self.ident_chars();
                if let Some(suffix @ ('?' | '!' | '=')) = self.peek() {
                    if self.peek_at(1) != Some('=') && self.peek_at(1) != Some('>') {
                        name.push(suffix);
                        self.bump();
                    }
                }
                self.push(TokenKind::Symbol(name), line);
                Ok(())
            }
            Some('@') if !self.after_operand() || self.spaced => {
                self.bump();
                let name = self.ident_chars();
                self.push(TokenKind::Symbol(format!("@{name}")), line);
                Ok(())
            }
            Some(_) if !self.after_operand() || self.spaced => {
                const OPERATOR_SYMBOLS: [&str; 20] = [
                    "[]=", "<=>", "===", "==", "!=", "<=", ">=", "<<", ">>", "**", "[]", "+@", "-@",
                    "+", "-", "*", "/", "%", "<", ">",
                ];
                for op in OPERATOR_SYMBOLS {
                    if op.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c)) {
                        for _ in 0..op.chars().count() {
                            self.bump();
                        }
                        self.push(TokenKind::Symbol(op.to_string()), line);
                        return Ok(());
                    }
                }
                self.push(TokenKind::Colon, line);
                Ok(())
            }
            _ => {
                self.push(TokenKind::Colon, line);
                Ok(())
            }
        }
    }

    fn operator(&mut self, line: u32) -> Result<(), VmError> {
        let c = self.bump().unwrap_or('\0');
        let next = self.peek();
        let (kind, extra) = match (c, next) {
            ('*', Some('*')) if self.peek_at(1) == Some('=') => (TokenKind::OpAssign("**"), 2),
            ('*', Some('*')) => (TokenKind::Pow, 1),
            ('*', Some('=')) => (TokenKind::OpAssign("*"), 1),
            ('*', _) => (TokenKind::Star, 0),
            ('+', Some('=')) => (TokenKind::OpAssign("+"), 1),
            ('+', _) => (TokenKind::Plus, 0),
            ('-', Some('=')) => (TokenKind::OpAssign("-"), 1),
            ('-', _) => (TokenKind::Minus, 0),
            ('/', Some('=')) => (TokenKind::OpAssign("/"), 1),
            ('/', _) => (TokenKind::Slash, 0),
            ('%', Some('=')) => (TokenKind::OpAssign("%"), 1),
            ('%', _) => (TokenKind::Percent, 0),
            ('=', Some('=')) if self.peek_at(1) == Some('=') => (TokenKind::EqEq, 2),
            ('=', Some('=')) => (TokenKind::EqEq, 1),
            ('=', Some('>')) => (TokenKind::Arrow, 1),
            ('=', Some('~')) => return Err(self.error("regular expressions are not supported")),
            ('=', _) => (TokenKind::Assign, 0),
            ('!', Some('=')) => (TokenKind::NotEq, 1),
            ('!', _) => (TokenKind::Bang, 0),
            ('<', Some('=')) if self.peek_at(1) == Some('>') => (TokenKind::Cmp, 2),
            ('<', Some('=')) => (TokenKind::Le, 1),
            ('<', Some('<')) if self.peek_at(1) == Some('=') => (TokenKind::OpAssign("<<"), 2),
            ('<', Some('<')) => (TokenKind::Shl, 1),
            ('<', _) => (TokenKind::Lt, 0),
            ('>', Some('=')) => (TokenKind::Ge, 1),
            ('>', Some('>')) => (TokenKind::Shr, 1),
            ('>', _) => (TokenKind::Gt, 0),
            ('&', Some('&')) if self.peek_at(1) == Some('=') => (TokenKind::AndAssign, 2),
            ('&', Some('&')) => (TokenKind::AndAnd, 1),
            ('&', _) => (TokenKind::Amp, 0),
            ('|', Some('|')) if self.peek_at(1) == Some('=') => (TokenKind::OrAssign, 2),
            ('|', Some('|')) => (TokenKind::OrOr, 1),
            ('|', _) => (TokenKind::Pipe, 0),
            ('^', _) => (TokenKind::Caret, 0),
            ('?', _) => (TokenKind::Question, 0),
            ('.', Some('.')) => return Err(self.error("ranges are not supported")),
            ('.', _) => (TokenKind::Dot, 0),
            (',', _) => (TokenKind::Comma, 0),
            (';', _) => (TokenKind::Semi, 0),
            ('(', _) => (TokenKind::LParen, 0),
            (')', _) => (TokenKind::RParen, 0),
            ('[', _) => (TokenKind::LBracket, 0),
            (']', _) => (TokenKind::RBracket, 0),
            ('{', _) => (TokenKind::LBrace, 0),
            ('}', _) => (TokenKind::RBrace, 0),
            (other, _) => return Err(self.error(format!("unexpected character '{other}'"))),
        };
        for _ in 0..extra {
            self.bump();
        }
        self.push(kind, line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src, 1)
            .expect("lexes")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn method_definition() {
        assert_eq!(
            kinds("def mul(a, b)\n  return a * b\nend\n"),
            vec![
                TokenKind::Keyword(Keyword::Def),
                TokenKind::Ident("mul".into()),
                TokenKind::LParen,
                TokenKind::Ident("a".into()),
                TokenKind::Comma,
                TokenKind::Ident("b".into()),
                TokenKind::RParen,
                TokenKind::Newline,
                TokenKind::Keyword(Keyword::Return),
                TokenKind::Ident("a".into()),
                TokenKind::Star,
                TokenKind::Ident("b".into()),
                TokenKind::Newline,
                TokenKind::Keyword(Keyword::End),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn hash_with_arrows_and_labels() {
        assert_eq!(
            kinds("{10 => 'a', key: :sym}"),
            vec![
                TokenKind::LBrace,
                TokenKind::Int(10),
                TokenKind::Arrow,
                TokenKind::Str(vec![StrPart::Lit("a".into())]),
                TokenKind::Comma,
                TokenKind::Label("key".into()),
                TokenKind::Symbol("sym".into()),
                TokenKind::RBrace,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn predicate_method_names() {
        assert_eq!(
            kinds("x.nil? != y"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Dot,
                TokenKind::Ident("nil?".into()),
                TokenKind::NotEq,
                TokenKind::Ident("y".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn interpolation_is_captured_raw() {
        assert_eq!(
            kinds("\"a#{1 + 2}b\""),
            vec![
                TokenKind::Str(vec![
                    StrPart::Lit("a".into()),
                    StrPart::Code("1 + 2".into(), 1),
                    StrPart::Lit("b".into()),
                ]),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("1_000_000 2.5 1e3 3.times"),
            vec![
                TokenKind::Int(1_000_000),
                TokenKind::Float(2.5),
                TokenKind::Float(1000.0),
                TokenKind::Int(3),
                TokenKind::Dot,
                TokenKind::Ident("times".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn ternary_colon_is_not_a_symbol() {
        let k = kinds("a ? b : c");
        assert!(k.contains(&TokenKind::Question));
        assert!(k.contains(&TokenKind::Colon));
    }

    #[test]
    fn operator_symbols() {
        assert_eq!(kinds(":<<")[0], TokenKind::Symbol("<<".into()));
        assert_eq!(kinds(":name=")[0], TokenKind::Symbol("name=".into()));
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let err = tokenize("'abc", 3).unwrap_err();
        assert!(matches!(err, VmError::Syntax { line: 3, .. }));
    }
}
