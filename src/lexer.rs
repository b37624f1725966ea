use crate::error::LoxError;
use crate::token::{Token, TokenType};

use log::debug;
use phf::phf_map;

static KEYWORDS: phf::Map<&'static str, TokenType> = phf_map! {
    "and" => TokenType::And,
    "class" => TokenType::Class,
    "else" => TokenType::Else,
    "false" => TokenType::False,
    "for" => TokenType::For,
    "fun" => TokenType::Fun,
    "if" => TokenType::If,
    "nil" => TokenType::Nil,
    "or" => TokenType::Or,
    "print" => TokenType::Print,
    "return" => TokenType::Return,
    "super" => TokenType::Super,
    "this" => TokenType::This,
    "true" => TokenType::True,
    "var" => TokenType::Var,
    "while" => TokenType::While,
};

struct Lexer<'a> {
    source: &'a [u8],
    tokens: Vec<Token>,
    errors: Vec<LoxError>,
    start: usize,
    current: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source: source.as_bytes(),
            tokens: Vec::new(),
            errors: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    fn scan(mut self) -> (Vec<Token>, Vec<LoxError>) {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token();
        }
        self.tokens.push(Token::new(TokenType::Eof, "", self.line));
        (self.tokens, self.errors)
    }

    fn scan_token(&mut self) {
        let byte = self.advance();
        match byte {
            b'(' => self.add_token(TokenType::LeftParen),
            b')' => self.add_token(TokenType::RightParen),
            b'{' => self.add_token(TokenType::LeftBrace),
            b'}' => self.add_token(TokenType::RightBrace),
            b',' => self.add_token(TokenType::Comma),
            b'.' => self.add_token(TokenType::Dot),
            b'-' => self.add_token(TokenType::Minus),
            b'+' => self.add_token(TokenType::Plus),
            b';' => self.add_token(TokenType::Semicolon),
            b'*' => self.add_token(TokenType::Star),
            b'!' => {
                let token_type = if self.matches(b'=') {
                    TokenType::BangEqual
                } else {
                    TokenType::Bang
                };
                self.add_token(token_type);
            }
            b'=' => {
                let token_type = if self.matches(b'=') {
                    TokenType::EqualEqual
                } else {
                    TokenType::Equal
                };
                self.add_token(token_type);
            }
            b'<' => {
                let token_type = if self.matches(b'=') {
                    TokenType::LessEqual
                } else {
                    TokenType::Less
                };
                self.add_token(token_type);
            }
            b'>' => {
                let token_type = if self.matches(b'=') {
                    TokenType::GreaterEqual
                } else {
                    TokenType::Greater
                };
                self.add_token(token_type);
            }
            b'/' => {
                if self.matches(b'/') {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else {
                    self.add_token(TokenType::Slash);
                }
            }
            b' ' | b'\r' | b'\t' => {}
            b'\n' => self.line += 1,
            b'"' => self.string(),
            b'0'..=b'9' => self.number(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.identifier(),
            _ => {
                self.errors.push(LoxError::lex(
                    self.line,
                    format!("Unexpected character: {}", byte as char),
                ));
            }
        }
    }

    fn string(&mut self) {
        let opening_line = self.line;
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            self.errors
                .push(LoxError::lex(opening_line, "Unterminated string."));
            return;
        }

        // closing quote
        self.advance();

        // no escape processing; the literal drops the surrounding quotes
        let literal = self.lexeme_range(self.start + 1, self.current - 1);
        self.add_token(TokenType::String(literal));
    }

    fn number(&mut self) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        // a trailing `.` without digits is not part of the number
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let literal = self.lexeme_range(self.start, self.current);
        let number: f64 = literal.parse().unwrap_or(0.0);
        self.add_token(TokenType::Number(number));
    }

    fn identifier(&mut self) {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }

        let text = self.lexeme_range(self.start, self.current);
        match KEYWORDS.get(text.as_str()) {
            Some(token_type) => self.add_token(token_type.clone()),
            None => self.add_token(TokenType::Identifier),
        }
    }

    fn add_token(&mut self, token_type: TokenType) {
        let lexeme = self.lexeme_range(self.start, self.current);
        self.tokens.push(Token::new(token_type, lexeme, self.line));
    }

    fn lexeme_range(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.source[start..end]).into_owned()
    }

    fn advance(&mut self) -> u8 {
        let byte = self.source[self.current];
        self.current += 1;
        byte
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            false
        } else {
            self.current += 1;
            true
        }
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.source[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.source.len() {
            0
        } else {
            self.source[self.current + 1]
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
}

/// Scan the whole source. Lexical errors are collected, not thrown; the
/// token stream is returned either way and always ends with `Eof`.
pub fn lex(source: &str) -> (Vec<Token>, Vec<LoxError>) {
    debug!("lexing {} bytes", source.len());
    Lexer::new(source).scan()
}

#[cfg(test)]
mod tests {

    use super::lex;
    use crate::token::{Token, TokenType};

    #[test]
    fn scans_a_var_declaration() {
        let source = "var implemented = \"In Rust!\";";
        let (tokens, errors) = lex(source);
        assert_eq!(errors.len(), 0);
        let expected_tokens = vec![
            Token::new(TokenType::Var, "var", 1),
            Token::new(TokenType::Identifier, "implemented", 1),
            Token::new(TokenType::Equal, "=", 1),
            Token::new(
                TokenType::String("In Rust!".to_string()),
                "\"In Rust!\"",
                1,
            ),
            Token::new(TokenType::Semicolon, ";", 1),
            Token::new(TokenType::Eof, "", 1),
        ];
        assert_eq!(tokens, expected_tokens);
    }

    #[test]
    fn two_character_operators() {
        let (tokens, errors) = lex("!= == <= >= ! = < >");
        assert_eq!(errors.len(), 0);
        let types: Vec<_> = tokens.into_iter().map(|t| t.token_type).collect();
        assert_eq!(
            types,
            vec![
                TokenType::BangEqual,
                TokenType::EqualEqual,
                TokenType::LessEqual,
                TokenType::GreaterEqual,
                TokenType::Bang,
                TokenType::Equal,
                TokenType::Less,
                TokenType::Greater,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn number_literals() {
        let (tokens, errors) = lex("42 3.5 1.");
        assert_eq!(errors.len(), 0);
        assert_eq!(tokens[0].token_type, TokenType::Number(42.0));
        assert_eq!(tokens[1].token_type, TokenType::Number(3.5));
        // `1.` is a number followed by a dot
        assert_eq!(tokens[2].token_type, TokenType::Number(1.0));
        assert_eq!(tokens[3].token_type, TokenType::Dot);
    }

    #[test]
    fn keywords_and_identifiers() {
        let (tokens, errors) = lex("class classy _under score9");
        assert_eq!(errors.len(), 0);
        assert_eq!(tokens[0].token_type, TokenType::Class);
        assert_eq!(tokens[1].token_type, TokenType::Identifier);
        assert_eq!(tokens[1].lexeme, "classy");
        assert_eq!(tokens[2].lexeme, "_under");
        assert_eq!(tokens[3].lexeme, "score9");
    }

    #[test]
    fn comments_and_newlines() {
        let (tokens, errors) = lex("// nothing here\nprint 1;");
        assert_eq!(errors.len(), 0);
        assert_eq!(tokens[0].token_type, TokenType::Print);
        assert_eq!(tokens[0].line, 2);
    }

    #[test]
    fn multiline_string_counts_lines() {
        let (tokens, errors) = lex("\"a\nb\" x");
        assert_eq!(errors.len(), 0);
        assert_eq!(tokens[0].token_type, TokenType::String("a\nb".to_string()));
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn unterminated_string_reports_opening_line() {
        let (tokens, errors) = lex("\"abc");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            format!("{}", errors[0]),
            "[Line 1] Error: Unterminated string."
        );
        // the stream is still terminated
        assert_eq!(tokens.last().unwrap().token_type, TokenType::Eof);
    }

    #[test]
    fn unexpected_character_continues_lexing() {
        let (tokens, errors) = lex("var a = 1; #");
        assert_eq!(errors.len(), 1);
        assert!(format!("{}", errors[0]).contains("Unexpected character"));
        assert_eq!(tokens.len(), 6); // var a = 1 ; EOF
    }

    #[test]
    fn lexemes_match_source_slices() {
        let source = "fun add(a, b) { return a + b; } // trailing";
        let (tokens, errors) = lex(source);
        assert_eq!(errors.len(), 0);
        for token in &tokens {
            if token.token_type == TokenType::Eof {
                continue;
            }
            assert!(
                source.contains(&token.lexeme),
                "lexeme {:?} not found in source",
                token.lexeme
            );
        }
    }
}
