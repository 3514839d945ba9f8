//! 词法分析
//!
//! 紧跟在数值或右括号之后（中间没有空白）的标识符、`[..]`、`%`、`°X` 被识别为单位后缀，
//! 例如 `10h`、`5[in.wc]`、`10%`、`5°C`、`(5+5)h`。

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    Identifier(String),
    /// `[name]` 或 `[name;version]`
    Bracketed(String),
    /// 紧贴数值或右括号的单位后缀
    Unit(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Bang,
    And,
    Or,
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

pub fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub fn is_identifier_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// 可以不加方括号直接书写的名称
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_identifier_start(c) => {}
        _ => return false,
    }
    chars.all(is_identifier_continue) && !is_reserved_word(name)
}

/// 保留字（大小写不敏感）
pub fn is_reserved_word(name: &str) -> bool {
    ["and", "or", "not", "true", "false", "pi"]
        .iter()
        .any(|w| name.eq_ignore_ascii_case(w))
}

fn is_keyword_operator(word: &str) -> bool {
    ["and", "or", "not"]
        .iter()
        .any(|w| word.eq_ignore_ascii_case(w))
}

pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
                continue;
            }

            let start = self.pos;
            if self.unit_suffix_allowed(start) {
                if let Some(unit) = self.lex_unit()? {
                    self.push(TokenKind::Unit(unit), start);
                    continue;
                }
            }

            let kind = match c {
                '0'..='9' => self.lex_number()?,
                '.' if self.peek_nth(1).is_some_and(|n| n.is_ascii_digit())
                    && !self.previous_is_operand() =>
                {
                    self.lex_number()?
                }
                '"' | '\'' => self.lex_string(c)?,
                '[' => TokenKind::Bracketed(self.lex_bracketed()?),
                c if is_identifier_start(c) => self.lex_identifier(),
                _ => self.lex_symbol(c)?,
            };
            self.push(kind, start);
        }

        let end = self.source.len();
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            start: end,
            end,
        });
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            start,
            end: self.pos,
        });
    }

    fn error(&self, message: impl Into<String>, start: usize) -> ParseError {
        ParseError::new(message, start, self.pos.max(start + 1))
    }

    fn previous_is_operand(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.kind),
            Some(
                TokenKind::Identifier(_)
                    | TokenKind::Bracketed(_)
                    | TokenKind::RParen
                    | TokenKind::Number(_)
                    | TokenKind::Unit(_)
            )
        )
    }

    /// 上一个符号是数值或右括号，且紧贴当前位置
    fn unit_suffix_allowed(&self, start: usize) -> bool {
        match self.tokens.last() {
            Some(token) => {
                token.end == start && matches!(token.kind, TokenKind::Number(_) | TokenKind::RParen)
            }
            None => false,
        }
    }

    fn lex_unit(&mut self) -> Result<Option<String>, ParseError> {
        match self.peek() {
            Some('[') => self.lex_bracketed().map(Some),
            Some('%') => {
                self.bump();
                Ok(Some("%".to_string()))
            }
            Some('°') => {
                let start = self.pos;
                self.bump();
                self.take_while(is_identifier_continue);
                Ok(Some(self.source[start..self.pos].to_string()))
            }
            Some(c) if is_identifier_start(c) => {
                let start = self.pos;
                self.take_while(is_identifier_continue);
                let word = &self.source[start..self.pos];
                // `(a)or(b)` 中的 or 是运算符
                if is_keyword_operator(word) {
                    self.pos = start;
                    return Ok(None);
                }
                Ok(Some(word.to_string()))
            }
            _ => Ok(None),
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.bump();
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        self.take_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            self.take_while(|c| c.is_ascii_digit());
        }
        // 科学计数法：e 后必须跟数字或带符号的数字，否则 e 视为单位
        if matches!(self.peek(), Some('e' | 'E')) {
            let exponent_follows = match self.peek_nth(1) {
                Some(c) if c.is_ascii_digit() => true,
                Some('+' | '-') => self.peek_nth(2).is_some_and(|c| c.is_ascii_digit()),
                _ => false,
            };
            if exponent_follows {
                self.bump();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.bump();
                }
                self.take_while(|c| c.is_ascii_digit());
            }
        }

        let text = &self.source[start..self.pos];
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("无效的数值: {}", text), start))
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("字符串缺少结束引号", start)),
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escape_start = self.pos - 1;
                    match self.bump() {
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        Some('\'') => value.push('\''),
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(other) => {
                            return Err(self.error(
                                format!("无效的转义序列: \\{}", other),
                                escape_start,
                            ));
                        }
                        None => return Err(self.error("字符串缺少结束引号", start)),
                    }
                }
                Some(c) => value.push(c),
            }
        }
        Ok(TokenKind::String(value))
    }

    fn lex_bracketed(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.bump();
        let content_start = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.error("方括号缺少结束符 ]", start)),
                Some('[') => return Err(self.error("方括号不能嵌套", start)),
                Some(']') => break,
                Some(_) => {
                    self.bump();
                }
            }
        }
        let content = self.source[content_start..self.pos].trim().to_string();
        self.bump();
        if content.is_empty() {
            return Err(self.error("方括号内名称为空", start));
        }
        Ok(content)
    }

    fn lex_identifier(&mut self) -> TokenKind {
        let start = self.pos;
        self.take_while(is_identifier_continue);
        let word = &self.source[start..self.pos];
        if word.eq_ignore_ascii_case("and") {
            TokenKind::And
        } else if word.eq_ignore_ascii_case("or") {
            TokenKind::Or
        } else if word.eq_ignore_ascii_case("not") {
            TokenKind::Bang
        } else {
            TokenKind::Identifier(word.to_string())
        }
    }

    fn lex_symbol(&mut self, c: char) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        self.bump();
        let next = self.peek();
        let (kind, consume_next) = match (c, next) {
            ('(', _) => (TokenKind::LParen, false),
            (')', _) => (TokenKind::RParen, false),
            ('{', _) => (TokenKind::LBrace, false),
            ('}', _) => (TokenKind::RBrace, false),
            (',', _) => (TokenKind::Comma, false),
            ('.', _) => (TokenKind::Dot, false),
            ('+', _) => (TokenKind::Plus, false),
            ('-', _) => (TokenKind::Minus, false),
            ('*', _) => (TokenKind::Star, false),
            ('/', _) => (TokenKind::Slash, false),
            ('^', _) => (TokenKind::Caret, false),
            ('!', Some('=')) => (TokenKind::NotEqual, true),
            ('!', _) => (TokenKind::Bang, false),
            ('&', Some('&')) => (TokenKind::And, true),
            ('&', _) => (TokenKind::And, false),
            ('|', Some('|')) => (TokenKind::Or, true),
            ('|', _) => (TokenKind::Or, false),
            ('=', Some('=')) => (TokenKind::Equal, true),
            ('=', _) => (TokenKind::Equal, false),
            ('<', Some('=')) => (TokenKind::LessOrEqual, true),
            ('<', Some('>')) => (TokenKind::NotEqual, true),
            ('<', _) => (TokenKind::Less, false),
            ('>', Some('=')) => (TokenKind::GreaterOrEqual, true),
            ('>', _) => (TokenKind::Greater, false),
            (other, _) => return Err(self.error(format!("无法识别的字符: '{}'", other), start)),
        };
        if consume_next {
            self.bump();
        }
        Ok(kind)
    }
}

/// 词法分析入口
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_numbers_and_units() {
        assert_eq!(
            kinds("10h + 5[in.wc]"),
            vec![
                TokenKind::Number(10.0),
                TokenKind::Unit("h".to_string()),
                TokenKind::Plus,
                TokenKind::Number(5.0),
                TokenKind::Unit("in.wc".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_percent_and_degree_units() {
        assert_eq!(
            kinds("10% 5°C"),
            vec![
                TokenKind::Number(10.0),
                TokenKind::Unit("%".to_string()),
                TokenKind::Number(5.0),
                TokenKind::Unit("°C".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unit_requires_adjacency() {
        assert_eq!(
            kinds("5 h"),
            vec![
                TokenKind::Number(5.0),
                TokenKind::Identifier("h".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unit_after_paren() {
        let tokens = kinds("(5+5)h");
        assert_eq!(tokens[5], TokenKind::Unit("h".to_string()));
    }

    #[test]
    fn test_scientific_notation() {
        assert_eq!(kinds("1e3")[0], TokenKind::Number(1000.0));
        assert_eq!(kinds("2.5E-2")[0], TokenKind::Number(0.025));
        assert_eq!(kinds("5e")[1], TokenKind::Unit("e".to_string()));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\\c""#)[0],
            TokenKind::String("a\"b\\c".to_string())
        );
        assert_eq!(kinds("'B'")[0], TokenKind::String("B".to_string()));
    }

    #[test]
    fn test_invalid_escape() {
        let err = tokenize(r#""bad \q escape""#).unwrap_err();
        assert!(err.message.contains("转义"));
        assert_eq!(err.start, 5);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("\"abc").is_err());
        assert!(tokenize("[abc").is_err());
    }

    #[test]
    fn test_keywords_and_symbols() {
        assert_eq!(
            kinds("a AND b or NOT c && d || e <> f"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::And,
                TokenKind::Identifier("b".to_string()),
                TokenKind::Or,
                TokenKind::Bang,
                TokenKind::Identifier("c".to_string()),
                TokenKind::And,
                TokenKind::Identifier("d".to_string()),
                TokenKind::Or,
                TokenKind::Identifier("e".to_string()),
                TokenKind::NotEqual,
                TokenKind::Identifier("f".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_after_closing_paren() {
        assert_eq!(
            kinds("(a)or(b)"),
            vec![
                TokenKind::LParen,
                TokenKind::Identifier("a".to_string()),
                TokenKind::RParen,
                TokenKind::Or,
                TokenKind::LParen,
                TokenKind::Identifier("b".to_string()),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
        assert_eq!(kinds("(a)AND b")[3], TokenKind::And);
        assert_eq!(kinds("(x)h")[3], TokenKind::Unit("h".to_string()));
        assert_eq!(kinds("5order")[1], TokenKind::Unit("order".to_string()));
    }

    #[test]
    fn test_bracketed_names() {
        assert_eq!(
            kinds("[foo bar] + [dtmi:com:x;1]")[..3],
            [
                TokenKind::Bracketed("foo bar".to_string()),
                TokenKind::Plus,
                TokenKind::Bracketed("dtmi:com:x;1".to_string()),
            ]
        );
    }

    #[test]
    fn test_unicode_identifier() {
        assert_eq!(kinds("温度_1")[0], TokenKind::Identifier("温度_1".to_string()));
    }

    #[test]
    fn test_unknown_character() {
        let err = tokenize("a # b").unwrap_err();
        assert_eq!(err.start, 2);
    }

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("fan_speed"));
        assert!(!is_plain_identifier("foo bar"));
        assert!(!is_plain_identifier("1abc"));
        assert!(!is_plain_identifier("AND"));
    }
}
