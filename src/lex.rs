use std::fmt::Display;

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("expression is required")]
    #[diagnostic(
        code(exprtree::lex::missing_expression),
        help("pass a non-empty expression")
    )]
    MissingExpression,

    #[error("unterminated string literal")]
    #[diagnostic(
        code(exprtree::lex::unterminated_string),
        help("close the literal with the quote character it was opened with")
    )]
    UnterminatedString {
        quote: char,
        #[label("this literal is never closed")]
        span: SourceSpan,
    },

    #[error("text position {position}: digit expected, found {found}")]
    #[diagnostic(code(exprtree::lex::digit_expected))]
    DigitExpected {
        position: usize,
        found: String,
        #[label("digit expected here")]
        span: SourceSpan,
    },

    #[error("unexpected character '{ch}' at position {position}")]
    #[diagnostic(
        code(exprtree::lex::unexpected_character),
        help("remove or correct the character: `{ch}`")
    )]
    UnexpectedCharacter {
        ch: char,
        position: usize,
        #[label("this character")]
        span: SourceSpan,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Exclamation,
    ExclamationEqual,
    Percent,
    Ampersand,
    DoubleAmpersand,
    OpenParen,
    CloseParen,
    Asterisk,
    Plus,
    Minus,
    Slash,
    LessThan,
    LessThanEqual,
    Equal,
    DoubleEqual,
    GreaterThan,
    GreaterThanEqual,
    Bar,
    DoubleBar,
    Comma,
    Dot,
    Colon,
    Question,
    OpenBracket,
    CloseBracket,
    Identifier,
    IntegerLiteral,
    RealLiteral,
    StringLiteral,
    End,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Exclamation => write!(f, "EXCLAMATION"),
            TokenKind::ExclamationEqual => write!(f, "EXCLAMATION_EQUAL"),
            TokenKind::Percent => write!(f, "PERCENT"),
            TokenKind::Ampersand => write!(f, "AMPERSAND"),
            TokenKind::DoubleAmpersand => write!(f, "DOUBLE_AMPERSAND"),
            TokenKind::OpenParen => write!(f, "OPEN_PAREN"),
            TokenKind::CloseParen => write!(f, "CLOSE_PAREN"),
            TokenKind::Asterisk => write!(f, "ASTERISK"),
            TokenKind::Plus => write!(f, "PLUS"),
            TokenKind::Minus => write!(f, "MINUS"),
            TokenKind::Slash => write!(f, "SLASH"),
            TokenKind::LessThan => write!(f, "LESS_THAN"),
            TokenKind::LessThanEqual => write!(f, "LESS_THAN_EQUAL"),
            TokenKind::Equal => write!(f, "EQUAL"),
            TokenKind::DoubleEqual => write!(f, "DOUBLE_EQUAL"),
            TokenKind::GreaterThan => write!(f, "GREATER_THAN"),
            TokenKind::GreaterThanEqual => write!(f, "GREATER_THAN_EQUAL"),
            TokenKind::Bar => write!(f, "BAR"),
            TokenKind::DoubleBar => write!(f, "DOUBLE_BAR"),
            TokenKind::Comma => write!(f, "COMMA"),
            TokenKind::Dot => write!(f, "DOT"),
            TokenKind::Colon => write!(f, "COLON"),
            TokenKind::Question => write!(f, "QUESTION"),
            TokenKind::OpenBracket => write!(f, "OPEN_BRACKET"),
            TokenKind::CloseBracket => write!(f, "CLOSE_BRACKET"),
            TokenKind::Identifier => write!(f, "IDENTIFIER"),
            TokenKind::IntegerLiteral => write!(f, "INTEGER_LITERAL"),
            TokenKind::RealLiteral => write!(f, "REAL_LITERAL"),
            TokenKind::StringLiteral => write!(f, "STRING_LITERAL"),
            TokenKind::End => write!(f, "END"),
        }
    }
}

/// A classified slice of the source. `position` is the byte offset of the
/// first character.
#[derive(Debug, Clone, Copy)]
pub struct Token<'de> {
    pub kind: TokenKind,
    pub text: &'de str,
    pub position: usize,
}

impl<'de> Token<'de> {
    pub fn new(kind: TokenKind, text: &'de str) -> Self {
        Token {
            kind,
            text,
            position: 0,
        }
    }

    pub fn span(&self) -> SourceSpan {
        SourceSpan::from(self.position..self.position + self.text.len())
    }

    /// `and`, `or` and `mod` are plain identifiers that act as operators
    /// in operator position.
    pub fn is_identifier(&self, name: &str) -> bool {
        self.kind == TokenKind::Identifier && self.text == name
    }
}

// Position does not take part in equality.
impl PartialEq for Token<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.text == other.text
    }
}

impl Eq for Token<'_> {}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.text)
    }
}

/// Pull-based scanner. Every call to [`Scanner::next_token`] yields exactly
/// one token and moves the cursor past it; once the input is exhausted it
/// keeps returning [`TokenKind::End`].
pub struct Scanner<'de> {
    whole: &'de str,
    rest: &'de str,
    byte: usize,
    done: bool,
}

impl<'de> Scanner<'de> {
    pub fn new(input: &'de str) -> Result<Self, LexError> {
        if input.is_empty() {
            return Err(LexError::MissingExpression);
        }
        Ok(Scanner {
            whole: input,
            rest: input,
            byte: 0,
            done: false,
        })
    }

    pub fn source(&self) -> &'de str {
        self.whole
    }

    pub fn next_token(&mut self) -> Result<Token<'de>, LexError> {
        let token = self.scan()?;
        tracing::trace!(
            kind = %token.kind,
            text = token.text,
            position = token.position,
            "scanned token"
        );
        Ok(token)
    }

    fn scan(&mut self) -> Result<Token<'de>, LexError> {
        loop {
            let start = self.byte;
            let cur = self.rest;
            let mut chars = cur.chars();
            let Some(c) = chars.next() else {
                return Ok(Token {
                    kind: TokenKind::End,
                    text: &self.whole[self.whole.len()..],
                    position: self.whole.len(),
                });
            };
            let literal = &cur[..c.len_utf8()];
            self.rest = chars.as_str();
            self.byte += c.len_utf8();

            enum Start {
                String(char),
                Ident,
                Number,
                IfNextElse(char, TokenKind, TokenKind),
            }

            let process = |kind: TokenKind| {
                Ok(Token {
                    kind,
                    text: literal,
                    position: start,
                })
            };

            let started = match c {
                '%' => return process(TokenKind::Percent),
                '(' => return process(TokenKind::OpenParen),
                ')' => return process(TokenKind::CloseParen),
                '*' => return process(TokenKind::Asterisk),
                '+' => return process(TokenKind::Plus),
                '-' => return process(TokenKind::Minus),
                '/' => return process(TokenKind::Slash),
                ',' => return process(TokenKind::Comma),
                '.' => return process(TokenKind::Dot),
                ':' => return process(TokenKind::Colon),
                '?' => return process(TokenKind::Question),
                '[' => return process(TokenKind::OpenBracket),
                ']' => return process(TokenKind::CloseBracket),
                '!' => Start::IfNextElse('=', TokenKind::ExclamationEqual, TokenKind::Exclamation),
                '&' => Start::IfNextElse('&', TokenKind::DoubleAmpersand, TokenKind::Ampersand),
                '<' => Start::IfNextElse('=', TokenKind::LessThanEqual, TokenKind::LessThan),
                '=' => Start::IfNextElse('=', TokenKind::DoubleEqual, TokenKind::Equal),
                '>' => Start::IfNextElse('=', TokenKind::GreaterThanEqual, TokenKind::GreaterThan),
                '|' => Start::IfNextElse('|', TokenKind::DoubleBar, TokenKind::Bar),
                '\'' | '"' => Start::String(c),
                c if c.is_alphabetic() || c == '@' || c == '_' => Start::Ident,
                '0'..='9' => Start::Number,
                c if c.is_whitespace() => continue,
                c => {
                    return Err(LexError::UnexpectedCharacter {
                        ch: c,
                        position: start,
                        span: SourceSpan::from(start..self.byte),
                    });
                }
            };

            let (kind, len) = match started {
                Start::IfNextElse(next, yes, no) => {
                    if self.rest.starts_with(next) {
                        let text = self.consume(cur, start, c.len_utf8() + next.len_utf8());
                        return Ok(Token {
                            kind: yes,
                            text,
                            position: start,
                        });
                    }
                    return process(no);
                }
                Start::Ident => {
                    let end = cur
                        .char_indices()
                        .skip(1)
                        .find(|&(_, c)| !(c.is_alphanumeric() || c == '_'))
                        .map_or(cur.len(), |(i, _)| i);
                    (TokenKind::Identifier, end)
                }
                Start::Number => self.number(cur, start)?,
                Start::String(quote) => {
                    // a doubled quote continues the literal: 'it''s'
                    let mut end = c.len_utf8();
                    loop {
                        let Some(close) = cur[end..].find(quote) else {
                            return Err(LexError::UnterminatedString {
                                quote,
                                span: SourceSpan::from(start..start + cur.len()),
                            });
                        };
                        end += close + quote.len_utf8();
                        if !cur[end..].starts_with(quote) {
                            break;
                        }
                        end += quote.len_utf8();
                    }
                    (TokenKind::StringLiteral, end)
                }
            };

            let text = self.consume(cur, start, len);
            return Ok(Token {
                kind,
                text,
                position: start,
            });
        }
    }

    /// Integer or real literal starting at the beginning of `cur`:
    /// `digits ('.' digits)? ([eE] digits [fF]?)?`
    fn number(&self, cur: &'de str, start: usize) -> Result<(TokenKind, usize), LexError> {
        let mut kind = TokenKind::IntegerLiteral;
        let mut end = digits_from(cur, 0);

        if cur[end..].starts_with('.') {
            kind = TokenKind::RealLiteral;
            let fraction = end + 1;
            end = digits_from(cur, fraction);
            if end == fraction {
                return Err(digit_expected(cur, start, fraction));
            }
        }

        if cur[end..].starts_with(['E', 'e']) {
            kind = TokenKind::RealLiteral;
            let exponent = end + 1;
            end = digits_from(cur, exponent);
            if end == exponent {
                return Err(digit_expected(cur, start, exponent));
            }
            if cur[end..].starts_with(['F', 'f']) {
                end += 1;
            }
        }

        Ok((kind, end))
    }

    /// Move the cursor to `len` bytes past `start`, returning the consumed text.
    fn consume(&mut self, cur: &'de str, start: usize, len: usize) -> &'de str {
        self.rest = &cur[len..];
        self.byte = start + len;
        &cur[..len]
    }
}

fn digits_from(s: &str, from: usize) -> usize {
    s[from..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(s.len(), |i| from + i)
}

fn digit_expected(cur: &str, start: usize, at: usize) -> LexError {
    let found = cur[at..].chars().next();
    LexError::DigitExpected {
        position: start + at,
        found: found.map_or_else(|| "end of input".to_string(), |c| format!("'{c}'")),
        span: SourceSpan::from(start + at..start + at + found.map_or(0, char::len_utf8)),
    }
}

impl<'de> Iterator for Scanner<'de> {
    type Item = Result<Token<'de>, LexError>;

    /// Yields tokens up to, but not including, `End`. Stops after the first
    /// error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_token() {
            Ok(Token {
                kind: TokenKind::End,
                ..
            }) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
            token => Some(token),
        }
    }
}

/// Scan the whole input into an ordered token sequence, without the
/// trailing `End`.
pub fn scan(input: &str) -> Result<Vec<Token<'_>>, LexError> {
    Scanner::new(input)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        scan(input)
            .expect("input should scan")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn scans_a_comparison() {
        assert_eq!(
            scan("1 > 0").unwrap(),
            vec![
                Token::new(TokenKind::IntegerLiteral, "1"),
                Token::new(TokenKind::GreaterThan, ">"),
                Token::new(TokenKind::IntegerLiteral, "0"),
            ]
        );
    }

    #[test]
    fn prefers_two_character_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("! != % & && ( ) * + - / < <= = == > >="),
            vec![
                Exclamation,
                ExclamationEqual,
                Percent,
                Ampersand,
                DoubleAmpersand,
                OpenParen,
                CloseParen,
                Asterisk,
                Plus,
                Minus,
                Slash,
                LessThan,
                LessThanEqual,
                Equal,
                DoubleEqual,
                GreaterThan,
                GreaterThanEqual,
            ]
        );
    }

    #[test]
    fn scans_punctuation_identifiers_and_literals() {
        let tokens = scan(r#"| || , . : ? [ ] new 3 4.532 'apple' "double""#).unwrap();
        use TokenKind::*;
        assert_eq!(
            tokens,
            vec![
                Token::new(Bar, "|"),
                Token::new(DoubleBar, "||"),
                Token::new(Comma, ","),
                Token::new(Dot, "."),
                Token::new(Colon, ":"),
                Token::new(Question, "?"),
                Token::new(OpenBracket, "["),
                Token::new(CloseBracket, "]"),
                Token::new(Identifier, "new"),
                Token::new(IntegerLiteral, "3"),
                Token::new(RealLiteral, "4.532"),
                Token::new(StringLiteral, "'apple'"),
                Token::new(StringLiteral, "\"double\""),
            ]
        );
    }

    #[test]
    fn records_byte_positions() {
        let tokens = scan("ab  + 12").unwrap();
        let positions: Vec<_> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 4, 6]);
    }

    #[test]
    fn equality_ignores_position() {
        let mut moved = Token::new(TokenKind::Plus, "+");
        moved.position = 12;
        assert_eq!(moved, Token::new(TokenKind::Plus, "+"));
        assert_ne!(Token::new(TokenKind::Plus, "+"), Token::new(TokenKind::Minus, "+"));
    }

    #[test]
    fn identifiers_accept_at_underscore_and_digits() {
        let tokens = scan("@param _x1 café").unwrap();
        let texts: Vec<_> = tokens.iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["@param", "_x1", "café"]);
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Identifier));
    }

    #[test]
    fn real_literal_forms() {
        let tokens = scan("1.5 2e10 3.25E4f 7").unwrap();
        let texts: Vec<_> = tokens.iter().map(|t| (t.kind, t.text)).collect();
        assert_eq!(
            texts,
            vec![
                (TokenKind::RealLiteral, "1.5"),
                (TokenKind::RealLiteral, "2e10"),
                (TokenKind::RealLiteral, "3.25E4f"),
                (TokenKind::IntegerLiteral, "7"),
            ]
        );
    }

    #[test]
    fn dot_without_digit_is_an_error() {
        let err = scan("12.x").unwrap_err();
        assert!(matches!(
            err,
            LexError::DigitExpected { position: 3, ref found, .. } if found == "'x'"
        ));
    }

    #[test]
    fn exponent_without_digit_is_an_error() {
        assert!(matches!(
            scan("3e").unwrap_err(),
            LexError::DigitExpected { position: 2, ref found, .. } if found == "end of input"
        ));
    }

    #[test]
    fn doubled_quotes_stay_in_one_literal() {
        let tokens = scan("'it''s' \"\"").unwrap();
        assert_eq!(tokens[0], Token::new(TokenKind::StringLiteral, "'it''s'"));
        assert_eq!(tokens[1], Token::new(TokenKind::StringLiteral, "\"\""));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(matches!(
            scan("1 + 'abc").unwrap_err(),
            LexError::UnterminatedString { quote: '\'', .. }
        ));
        assert!(matches!(
            scan("\"abc'").unwrap_err(),
            LexError::UnterminatedString { quote: '"', .. }
        ));
    }

    #[test]
    fn unknown_character_reports_position() {
        assert_eq!(
            scan("1 + #").unwrap_err(),
            LexError::UnexpectedCharacter {
                ch: '#',
                position: 4,
                span: SourceSpan::from(4..5),
            }
        );
    }

    #[test]
    fn empty_input_is_rejected_up_front() {
        assert!(matches!(Scanner::new(""), Err(LexError::MissingExpression)));
    }

    #[test]
    fn end_is_idempotent() {
        let mut scanner = Scanner::new("x").unwrap();
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Identifier);
        for _ in 0..3 {
            let end = scanner.next_token().unwrap();
            assert_eq!(end.kind, TokenKind::End);
            assert_eq!(end.position, 1);
            assert_eq!(end.text, "");
        }
    }

    #[test]
    fn whitespace_only_input_is_just_end() {
        let mut scanner = Scanner::new(" \t\n").unwrap();
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::End);
        assert!(scan(" \t\n").unwrap().is_empty());
    }
}
