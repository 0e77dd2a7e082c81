use crate::error::CompiletimeError;
use crate::token::{Token, TokenKind};

/// Turns source text into a token sequence terminated by an eof token.
///
/// Lexemes are slices of the borrowed source.
pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    token_line: usize,
    token_column: usize,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Scanner {
            source,
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            token_line: 1,
            token_column: 1,
        }
    }

    /// Scan the whole source
    pub fn scan(mut self) -> Result<Vec<Token<'src>>, CompiletimeError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            self.start = self.current;
            self.token_line = self.line;
            self.token_column = self.column;

            let c = match self.advance() {
                None => break,
                Some(c) => c,
            };

            let token = match c {
                b'(' => self.make_token(TokenKind::LParen),
                b')' => self.make_token(TokenKind::RParen),
                b'{' => self.make_token(TokenKind::LBrace),
                b'}' => self.make_token(TokenKind::RBrace),
                b',' => self.make_token(TokenKind::Comma),
                b'.' => self.make_token(TokenKind::Dot),
                b';' => self.make_token(TokenKind::Semicolon),
                b'+' => self.make_token(TokenKind::Plus),
                b'*' => self.make_token(TokenKind::Star),
                b'/' => self.make_token(TokenKind::Slash),
                b'%' => self.make_token(TokenKind::Percent),
                b'-' => {
                    let kind = if self.matches(b'>') {
                        TokenKind::Arrow
                    } else {
                        TokenKind::Minus
                    };
                    self.make_token(kind)
                }
                b'!' => {
                    let kind = if self.matches(b'=') {
                        TokenKind::BangEqual
                    } else {
                        TokenKind::Bang
                    };
                    self.make_token(kind)
                }
                b'=' => {
                    let kind = if self.matches(b'=') {
                        TokenKind::EqualEqual
                    } else {
                        TokenKind::Equal
                    };
                    self.make_token(kind)
                }
                b'<' => {
                    let kind = if self.matches(b'=') {
                        TokenKind::LessEqual
                    } else {
                        TokenKind::Less
                    };
                    self.make_token(kind)
                }
                b'>' => {
                    let kind = if self.matches(b'=') {
                        TokenKind::GreaterEqual
                    } else {
                        TokenKind::Greater
                    };
                    self.make_token(kind)
                }
                b'"' => self.make_string()?,
                c if c.is_ascii_digit() => self.make_number(),
                c if is_ident_head(c) => self.make_ident_or_kw(),
                c => {
                    return Err(self.error(format!("invalid character '{}'", c as char)));
                }
            };

            tokens.push(token);
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: self.token_line,
            column: self.token_column,
        });

        Ok(tokens)
    }

    fn error(&self, message: impl Into<String>) -> CompiletimeError {
        CompiletimeError::new(self.token_line, self.token_column, message)
    }

    fn matches(&mut self, c: u8) -> bool {
        match self.peek() {
            Some(c_) if c == c_ => {
                self.advance();
                true
            }
            _ => false,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.peek_offset(0)
    }

    fn peek_offset(&self, offset: usize) -> Option<u8> {
        self.source.as_bytes().get(self.current + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.current += 1;
            if c == Some(b'\n') {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        c
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        self.make_token_with(kind, &self.source[self.start..self.current])
    }

    fn make_token_with(&self, kind: TokenKind, lexeme: &'src str) -> Token<'src> {
        Token {
            kind,
            lexeme,
            line: self.token_line,
            column: self.token_column,
        }
    }

    fn make_string(&mut self) -> Result<Token<'src>, CompiletimeError> {
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => break,
                Some(_) => {}
            }
        }

        // trim the delimiting quotes off the lexeme
        let lexeme = &self.source[self.start + 1..self.current - 1];
        Ok(self.make_token_with(TokenKind::String, lexeme))
    }

    fn make_number(&mut self) -> Token<'src> {
        self.advance_while(|c| c.is_ascii_digit());

        if self.peek() == Some(b'.')
            && matches!(self.peek_offset(1), Some(c) if c.is_ascii_digit())
        {
            self.advance();
            self.advance_while(|c| c.is_ascii_digit());
        }

        self.make_token(TokenKind::Number)
    }

    fn make_ident_or_kw(&mut self) -> Token<'src> {
        self.advance_while(is_ident_tail);
        self.make_token(self.identifier_kind())
    }

    /// Keyword lookup switching on the first letter or two, falling back to
    /// an exact comparison of the remainder
    fn identifier_kind(&self) -> TokenKind {
        let lexeme = &self.source.as_bytes()[self.start..self.current];

        match lexeme[0] {
            b'a' => self.check_keyword(1, "nd", TokenKind::And),
            b'b' => self.check_keyword(1, "reak", TokenKind::Break),
            b'c' => match lexeme.get(1) {
                Some(b'l') => self.check_keyword(2, "ass", TokenKind::Class),
                Some(b'o') => self.check_keyword(2, "ntinue", TokenKind::Continue),
                _ => TokenKind::Identifier,
            },
            b'e' => self.check_keyword(1, "lse", TokenKind::Else),
            b'f' => match lexeme.get(1) {
                Some(b'a') => self.check_keyword(2, "lse", TokenKind::False),
                Some(b'n') => self.check_keyword(2, "", TokenKind::Fn),
                Some(b'o') => self.check_keyword(2, "r", TokenKind::For),
                _ => TokenKind::Identifier,
            },
            b'i' => self.check_keyword(1, "f", TokenKind::If),
            b'l' => match lexeme.get(1) {
                Some(b'e') => self.check_keyword(2, "t", TokenKind::Let),
                Some(b'o') => self.check_keyword(2, "op", TokenKind::Loop),
                _ => TokenKind::Identifier,
            },
            b'm' => self.check_keyword(1, "atch", TokenKind::Match),
            b'n' => self.check_keyword(1, "il", TokenKind::Nil),
            b'o' => self.check_keyword(1, "r", TokenKind::Or),
            b'p' => self.check_keyword(1, "rint", TokenKind::Print),
            b'r' => self.check_keyword(1, "eturn", TokenKind::Return),
            b't' => self.check_keyword(1, "rue", TokenKind::True),
            b'w' => self.check_keyword(1, "hile", TokenKind::While),
            _ => TokenKind::Identifier,
        }
    }

    fn check_keyword(&self, offset: usize, rest: &str, kind: TokenKind) -> TokenKind {
        let lexeme = &self.source[self.start..self.current];
        if lexeme.len() == offset + rest.len() && &lexeme[offset..] == rest {
            kind
        } else {
            TokenKind::Identifier
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\r') | Some(b'\t') | Some(b'\n') => {
                    self.advance();
                }
                Some(b'#') => {
                    self.advance_while(|c| c != b'\n');
                }
                _ => break,
            }
        }
    }

    fn advance_while<F>(&mut self, pred: F)
    where
        F: Fn(u8) -> bool,
    {
        while let Some(c) = self.peek() {
            if pred(c) {
                self.advance();
            } else {
                break;
            }
        }
    }
}

fn is_ident_head(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'@'
}

fn is_ident_tail(c: u8) -> bool {
    is_ident_head(c) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::token::{Token, TokenKind};

    use super::Scanner;

    fn scan(src: &str) -> Vec<Token<'_>> {
        Scanner::new(src).scan().unwrap()
    }

    fn kinds(v: Vec<Token<'_>>) -> Vec<TokenKind> {
        v.iter().map(|t| t.kind).collect()
    }

    fn expect(src: &'static str, mut res: Vec<TokenKind>) {
        res.push(TokenKind::Eof);
        assert_eq!(kinds(scan(src)), res);
    }

    #[test]
    fn scans_every_token_kind() {
        use TokenKind::*;

        expect(
            "( ) { } , . - + ; / * % -> ! != = == > >= < <= asd _lasd @tmp \"bajs\" 1 1.2 \
             and break class continue else false fn for if let loop match nil or print return true while",
            vec![
                LParen, RParen, LBrace, RBrace, Comma, Dot, Minus, Plus, Semicolon, Slash, Star,
                Percent, Arrow, Bang, BangEqual, Equal, EqualEqual, Greater, GreaterEqual, Less,
                LessEqual, Identifier, Identifier, Identifier, String, Number, Number, And, Break,
                Class, Continue, Else, False, Fn, For, If, Let, Loop, Match, Nil, Or, Print,
                Return, True, While,
            ],
        );
    }

    #[test]
    fn keyword_prefixes_are_identifiers() {
        use TokenKind::*;

        expect(
            "lets fnord loopy classic whiles p q",
            vec![
                Identifier, Identifier, Identifier, Identifier, Identifier, Identifier, Identifier,
            ],
        );
    }

    #[test]
    fn number_does_not_eat_a_trailing_dot() {
        use TokenKind::*;

        expect("1. 2.5 3", vec![Number, Dot, Number, Number]);
    }

    #[test]
    fn string_lexeme_excludes_the_quotes() {
        let tokens = scan("\"hello world\"");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, "hello world");
    }

    #[test]
    fn strings_may_span_lines() {
        let tokens = scan("\"one\ntwo\" x");
        assert_eq!(tokens[0].lexeme, "one\ntwo");
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn comments_run_to_end_of_line() {
        use TokenKind::*;

        expect("1 # everything here is skipped ;;;\n2", vec![Number, Number]);
    }

    #[test]
    fn positions_point_at_the_first_character() {
        let tokens = scan("let x;\n  x = 1;");

        assert_eq!((tokens[0].line, tokens[0].column), (1, 1)); // let
        assert_eq!((tokens[1].line, tokens[1].column), (1, 5)); // x
        assert_eq!((tokens[2].line, tokens[2].column), (1, 6)); // ;
        assert_eq!((tokens[3].line, tokens[3].column), (2, 3)); // x
        assert_eq!((tokens[4].line, tokens[4].column), (2, 5)); // =
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Scanner::new("print \"oops").scan().unwrap_err();
        assert_eq!(err.message, "unterminated string");
        assert_eq!((err.line, err.column), (1, 7));
    }

    #[test]
    fn invalid_character_is_an_error() {
        let err = Scanner::new("let a = 1 & 2;").scan().unwrap_err();
        assert_eq!(err.message, "invalid character '&'");
        assert_eq!((err.line, err.column), (1, 11));
    }

    #[test]
    fn eof_token_terminates_the_stream() {
        let tokens = scan("");
        assert_eq!(kinds(tokens), vec![TokenKind::Eof]);
    }
}
