//! Token definitions shared by the lexer and the parser

use std::fmt;

/// 1-based source position; columns count characters, not bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Contract,
    Mapping,
    Function,
    Returns,
    Require,
    Circuit,
    Mpc,
    Private,
    Public,
    Witness,
    Input,
    Output,
    Constraint,
    Proof,
    View,
    Pure,
    Event,
    Emit,
    If,
    Else,
    For,
    Return,
    Secret,
    Reveal,
    True,
    False,
    /// `uint<bits>`; bare `uint` is `Uint(256)`
    Uint(u16),
    Bool,
    Address,
    /// `bytes<len>` with 1 <= len <= 32
    Bytes(u8),
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Self> {
        let keyword = match ident {
            "contract" => Self::Contract,
            "mapping" => Self::Mapping,
            "function" => Self::Function,
            "returns" => Self::Returns,
            "require" => Self::Require,
            "circuit" => Self::Circuit,
            "mpc" => Self::Mpc,
            "private" => Self::Private,
            "public" => Self::Public,
            "witness" => Self::Witness,
            "input" => Self::Input,
            "output" => Self::Output,
            "constraint" => Self::Constraint,
            "proof" => Self::Proof,
            "view" => Self::View,
            "pure" => Self::Pure,
            "event" => Self::Event,
            "emit" => Self::Emit,
            "if" => Self::If,
            "else" => Self::Else,
            "for" => Self::For,
            "return" => Self::Return,
            "secret" => Self::Secret,
            "reveal" => Self::Reveal,
            "true" => Self::True,
            "false" => Self::False,
            "bool" => Self::Bool,
            "address" => Self::Address,
            "uint" => Self::Uint(256),
            _ => return Self::sized_type(ident),
        };
        Some(keyword)
    }

    fn sized_type(ident: &str) -> Option<Self> {
        if let Some(bits) = ident.strip_prefix("uint") {
            let bits: u16 = parse_size(bits)?;
            return (bits % 8 == 0 && (8..=256).contains(&bits)).then_some(Self::Uint(bits));
        }
        if let Some(len) = ident.strip_prefix("bytes") {
            let len: u8 = parse_size(len)?;
            return (1..=32).contains(&len).then_some(Self::Bytes(len));
        }
        None
    }

    /// Keywords that start a type
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Self::Uint(_) | Self::Bool | Self::Address | Self::Bytes(_) | Self::Mapping | Self::Secret | Self::Proof
        )
    }
}

// Rejects leading zeros and signs so `uint08` stays an identifier
fn parse_size<T: std::str::FromStr>(digits: &str) -> Option<T> {
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    FatArrow,
    Arrow,
    Dot,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Bang => "!",
            Self::Assign => "=",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            Self::StarAssign => "*=",
            Self::FatArrow => "=>",
            Self::Arrow => "->",
            Self::Dot => ".",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
}

impl Punct {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '(' => Some(Self::LParen),
            ')' => Some(Self::RParen),
            '{' => Some(Self::LBrace),
            '}' => Some(Self::RBrace),
            '[' => Some(Self::LBracket),
            ']' => Some(Self::RBracket),
            ',' => Some(Self::Comma),
            ';' => Some(Self::Semicolon),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::LParen => '(',
            Self::RParen => ')',
            Self::LBrace => '{',
            Self::RBrace => '}',
            Self::LBracket => '[',
            Self::RBracket => ']',
            Self::Comma => ',',
            Self::Semicolon => ';',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Keyword(Keyword),
    Identifier(String),
    /// Decimal digits with separators removed, or `0x`-prefixed hex digits
    Number(String),
    /// String contents with escapes resolved
    Str(String),
    /// `0x` followed by exactly 40 hex digits
    Address(String),
    /// Hex digits of a `hex"..."` literal
    HexBytes(String),
    Operator(Operator),
    Punct(Punct),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text of the token
    pub lexeme: String,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, position: Position) -> Self {
        Self { kind, lexeme: lexeme.into(), position }
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }

    pub fn is_operator(&self, op: Operator) -> bool {
        self.kind == TokenKind::Operator(op)
    }

    pub fn is_punct(&self, punct: Punct) -> bool {
        self.kind == TokenKind::Punct(punct)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.lexeme)
    }
}
