//! Lexical analysis
//!
//! Produces a flat token stream with comments and whitespace removed. The
//! first character that matches no rule aborts tokenization.

use tracing::{instrument, trace};

use crate::error::LexError;
use crate::token::{Keyword, Operator, Position, Punct, Token, TokenKind};

#[instrument(level = "debug", skip_all, fields(len = source.len()))]
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let tokens = Lexer::new(source).run()?;
    trace!(tokens = tokens.len(), "tokenized");
    Ok(tokens)
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self { chars: source.chars().collect(), index: 0, line: 1, column: 1 }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            let start = self.position();
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' if self.peek_at(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('*') => self.skip_block_comment(start)?,
                '"' => tokens.push(self.string(start)?),
                c if c.is_ascii_digit() => tokens.push(self.number(start)?),
                c if is_ident_start(c) => tokens.push(self.word(start)?),
                _ => tokens.push(self.symbol(start)?),
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn error_here(&self, found: char) -> LexError {
        LexError { position: self.position(), found }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self, start: Position) -> Result<(), LexError> {
        self.bump();
        self.bump();
        loop {
            match self.bump() {
                Some('*') if self.peek() == Some('/') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(LexError { position: start, found: '/' }),
            }
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek().filter(|&c| pred(c)) {
            text.push(c);
            self.bump();
        }
        text
    }

    fn word(&mut self, start: Position) -> Result<Token, LexError> {
        let ident = self.take_while(is_ident_continue);
        if ident == "hex" && self.peek() == Some('"') {
            return self.hex_bytes(start);
        }
        let kind = match Keyword::from_ident(&ident) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Identifier(ident.clone()),
        };
        Ok(Token::new(kind, ident, start))
    }

    fn hex_bytes(&mut self, start: Position) -> Result<Token, LexError> {
        self.bump();
        let mut digits = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.bump();
                    break;
                }
                Some(c) if c.is_ascii_hexdigit() => {
                    digits.push(c);
                    self.bump();
                }
                Some(c) if c != '\n' => return Err(self.error_here(c)),
                _ => return Err(LexError { position: start, found: 'h' }),
            }
        }
        let lexeme = format!("hex\"{digits}\"");
        Ok(Token::new(TokenKind::HexBytes(digits), lexeme, start))
    }

    fn number(&mut self, start: Position) -> Result<Token, LexError> {
        let token = if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let digits = self.take_while(|c| c.is_ascii_hexdigit());
            if digits.is_empty() {
                let found = self.peek().unwrap_or('x');
                return Err(self.error_here(found));
            }
            let lexeme = format!("0x{digits}");
            let kind = if digits.len() == 40 {
                TokenKind::Address(lexeme.clone())
            } else {
                TokenKind::Number(lexeme.clone())
            };
            Token::new(kind, lexeme, start)
        } else {
            let lexeme = self.take_while(|c| c.is_ascii_digit() || c == '_');
            let digits: String = lexeme.chars().filter(|&c| c != '_').collect();
            Token::new(TokenKind::Number(digits), lexeme, start)
        };

        // `12abc` is not two tokens
        if let Some(c) = self.peek().filter(|&c| is_ident_continue(c)) {
            return Err(self.error_here(c));
        }
        Ok(token)
    }

    fn string(&mut self, start: Position) -> Result<Token, LexError> {
        self.bump();
        let mut value = String::new();
        let mut lexeme = String::from('"');
        loop {
            match self.peek() {
                Some('"') => {
                    self.bump();
                    lexeme.push('"');
                    break;
                }
                Some('\\') => {
                    self.bump();
                    let escaped = match self.peek() {
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some(c) if c != '\n' => return Err(self.error_here(c)),
                        _ => return Err(LexError { position: start, found: '"' }),
                    };
                    lexeme.push('\\');
                    lexeme.extend(self.bump());
                    value.push(escaped);
                }
                Some(c) if c != '\n' => {
                    self.bump();
                    lexeme.push(c);
                    value.push(c);
                }
                _ => return Err(LexError { position: start, found: '"' }),
            }
        }
        Ok(Token::new(TokenKind::Str(value), lexeme, start))
    }

    fn symbol(&mut self, start: Position) -> Result<Token, LexError> {
        let Some(c) = self.peek() else {
            return Err(self.error_here('\0'));
        };

        if let Some(punct) = Punct::from_char(c) {
            self.bump();
            return Ok(Token::new(TokenKind::Punct(punct), c.to_string(), start));
        }

        let next = self.peek_at(1);
        let two = match (c, next) {
            ('=', Some('=')) => Some(Operator::EqEq),
            ('!', Some('=')) => Some(Operator::NotEq),
            ('<', Some('=')) => Some(Operator::Le),
            ('>', Some('=')) => Some(Operator::Ge),
            ('&', Some('&')) => Some(Operator::AndAnd),
            ('|', Some('|')) => Some(Operator::OrOr),
            ('=', Some('>')) => Some(Operator::FatArrow),
            ('-', Some('>')) => Some(Operator::Arrow),
            ('+', Some('=')) => Some(Operator::PlusAssign),
            ('-', Some('=')) => Some(Operator::MinusAssign),
            ('*', Some('=')) => Some(Operator::StarAssign),
            _ => None,
        };
        if let Some(op) = two {
            self.bump();
            self.bump();
            return Ok(Token::new(TokenKind::Operator(op), op.as_str(), start));
        }

        let one = match c {
            '+' => Operator::Plus,
            '-' => Operator::Minus,
            '*' => Operator::Star,
            '/' => Operator::Slash,
            '%' => Operator::Percent,
            '<' => Operator::Lt,
            '>' => Operator::Gt,
            '!' => Operator::Bang,
            '=' => Operator::Assign,
            '.' => Operator::Dot,
            // Includes lone `|` and `&`, so ket literals like `|0>` stop here
            _ => return Err(self.error_here(c)),
        };
        self.bump();
        Ok(Token::new(TokenKind::Operator(one), one.as_str(), start))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_comments_are_discarded() {
        let source = "// line\n/* block\n comment */ contract";
        assert_eq!(kinds(source), vec![TokenKind::Keyword(Keyword::Contract)]);
    }

    #[test]
    fn test_positions_are_one_based() {
        let tokens = tokenize("contract\n  C").unwrap();
        assert_eq!(tokens[0].position, Position::new(1, 1));
        assert_eq!(tokens[1].position, Position::new(2, 3));
    }

    #[test]
    fn test_underscore_separators() {
        assert_eq!(kinds("1_000_000"), vec![TokenKind::Number("1000000".into())]);
    }

    #[test]
    fn test_address_needs_forty_digits() {
        let address = format!("0x{}", "ab".repeat(20));
        assert_eq!(kinds(&address), vec![TokenKind::Address(address.clone())]);
        assert_eq!(kinds("0xff"), vec![TokenKind::Number("0xff".into())]);
    }

    #[test]
    fn test_unterminated_block_comment_reports_start() {
        let err = tokenize("contract /* never closed").unwrap_err();
        assert_eq!(err.position, Position::new(1, 10));
        assert_eq!(err.found, '/');
    }

    #[test]
    fn test_number_followed_by_letters_fails() {
        let err = tokenize("12abc").unwrap_err();
        assert_eq!(err.found, 'a');
        assert_eq!(err.position, Position::new(1, 3));
    }
}
