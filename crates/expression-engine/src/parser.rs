//! 语法分析
//!
//! 优先级由低到高：逻辑或、逻辑与、相等、关系比较、加减、乘除、乘方、一元（`!` `-`）、
//! 后缀属性访问、基本项。所有二元操作符左结合，`^` 也按从左到右结合。

use chrono::{DateTime, Utc};
use expression_shared::config::EngineConfig;
use tracing::debug;

use crate::env::DeclarationEnv;
use crate::error::{ParseError, Result};
use crate::expr::{Expr, ExprKind, Variable};
use crate::lexer::{Token, TokenKind, tokenize};
use crate::operators::BinaryOperator;
use crate::units::UnitRegistry;
use crate::value::parse_datetime;

/// 解析选项
#[derive(Debug, Clone)]
pub struct ParserOptions {
    pub max_length: usize,
    pub max_depth: usize,
    pub validate_bracketed_names: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ParserOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_length: config.max_expression_length,
            max_depth: config.max_depth,
            validate_bracketed_names: config.validate_bracketed_names,
        }
    }
}

pub struct Parser<'a> {
    source: &'a str,
    registry: &'a UnitRegistry,
    declarations: Option<&'a DeclarationEnv>,
    options: ParserOptions,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            registry: UnitRegistry::global(),
            declarations: None,
            options: ParserOptions::default(),
            tokens: Vec::new(),
            pos: 0,
            depth: 0,
        }
    }

    /// 提供声明环境后，方括号变量必须已声明
    pub fn with_declarations(mut self, declarations: &'a DeclarationEnv) -> Self {
        self.declarations = Some(declarations);
        self
    }

    pub fn with_registry(mut self, registry: &'a UnitRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_options(mut self, options: ParserOptions) -> Self {
        self.options = options;
        self
    }

    pub fn parse(mut self) -> Result<Expr> {
        if self.source.len() > self.options.max_length {
            return Err(ParseError::new(
                format!("表达式过长: {} > {}", self.source.len(), self.options.max_length),
                0,
                self.source.len(),
            )
            .into());
        }

        self.tokens = tokenize(self.source)?;
        let expr = self.parse_expression()?;
        if !matches!(self.peek(), TokenKind::Eof) {
            return Err(self.error_here("表达式结尾存在多余的符号").into());
        }

        debug!(source = %self.source, "表达式解析完成");
        Ok(expr)
    }

    // ==================== 符号流 ====================

    fn current(&self) -> &Token {
        // 末尾总有 Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let token = self.current();
        ParseError::new(message, token.start, token.end.max(token.start + 1))
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> std::result::Result<Token, ParseError> {
        if *self.peek() == kind {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("缺少 {}", what)))
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.depth += 1;
        if self.depth > self.options.max_depth {
            return Err(self
                .error_here(format!("表达式嵌套过深: 超过 {}", self.options.max_depth))
                .into());
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    // ==================== 二元操作符 ====================

    fn parse_expression(&mut self) -> Result<Expr> {
        self.nested(|p| p.parse_or())
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOperator::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while matches!(self.peek(), TokenKind::And) {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::binary(BinaryOperator::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                TokenKind::Equal => BinaryOperator::Equal,
                TokenKind::NotEqual => BinaryOperator::NotEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Greater => BinaryOperator::Greater,
                TokenKind::GreaterOrEqual => BinaryOperator::GreaterOrEqual,
                TokenKind::Less => BinaryOperator::Less,
                TokenKind::LessOrEqual => BinaryOperator::LessOrEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOperator::Multiply,
                TokenKind::Slash => BinaryOperator::Divide,
                _ => break,
            };
            self.advance();
            let right = self.parse_power()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), TokenKind::Caret) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::pow(left, right);
        }
        Ok(left)
    }

    // ==================== 一元与后缀 ====================

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            TokenKind::Minus => {
                self.advance();
                let operand = self.nested(|p| p.parse_unary())?;
                Ok(Expr::negate(operand))
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.nested(|p| p.parse_unary())?;
                Ok(Expr::not(operand))
            }
            TokenKind::Plus => {
                self.advance();
                self.nested(|p| p.parse_unary())
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        while matches!(self.peek(), TokenKind::Dot) {
            self.advance();
            let name = match self.advance().kind {
                TokenKind::Identifier(name) | TokenKind::Bracketed(name) => name,
                _ => return Err(self.previous_error("属性访问缺少属性名").into()),
            };
            expr = Expr::property(expr, name);
            if let TokenKind::Unit(_) = self.peek() {
                return Err(self.error_here("单位只能跟在数值或括号之后").into());
            }
        }
        Ok(expr)
    }

    fn previous_error(&self, message: &str) -> ParseError {
        let token = &self.tokens[self.pos.saturating_sub(1)];
        ParseError::new(message, token.start, token.end.max(token.start + 1))
    }

    /// 紧随其后的单位后缀
    fn take_unit_suffix(&mut self, expr: Expr) -> Expr {
        if let TokenKind::Unit(name) = self.peek() {
            let unit = self.registry.get(name);
            self.advance();
            expr.with_unit(unit)
        } else {
            expr
        }
    }

    // ==================== 基本项 ====================

    fn parse_primary(&mut self) -> Result<Expr> {
        let Token { kind, start, end } = self.advance();
        let span = (start, end);
        match kind {
            TokenKind::Number(value) => Ok(self.take_unit_suffix(Expr::number(value))),
            TokenKind::String(value) => Ok(Expr::string(value)),
            TokenKind::Bracketed(raw) => self.bracketed_variable(&raw, span),
            TokenKind::Identifier(name) => {
                if matches!(self.peek(), TokenKind::LParen) {
                    self.parse_call(name, span)
                } else {
                    Ok(special_or_variable(name))
                }
            }
            TokenKind::LParen => {
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "右括号 )")?;
                Ok(self.take_unit_suffix(inner))
            }
            TokenKind::LBrace => {
                let items = self.parse_list(TokenKind::RBrace, "右花括号 }")?;
                Ok(Expr::set(items))
            }
            TokenKind::Eof => Err(self.previous_error("表达式意外结束").into()),
            TokenKind::RParen => Err(self.previous_error("多余的右括号 )").into()),
            TokenKind::Unit(_) => Err(self.previous_error("单位只能跟在数值或括号之后").into()),
            other => Err(self.previous_error(&format!("意外的符号: {:?}", other)).into()),
        }
    }

    fn parse_list(&mut self, close: TokenKind, what: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if *self.peek() == close {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_expression()?);
            match self.peek() {
                TokenKind::Comma => {
                    self.advance();
                }
                kind if *kind == close => {
                    self.advance();
                    return Ok(items);
                }
                _ => return Err(self.error_here(format!("缺少 {}", what)).into()),
            }
        }
    }

    fn parse_call(&mut self, name: String, (start, end): (usize, usize)) -> Result<Expr> {
        self.expect(TokenKind::LParen, "左括号 (")?;
        let mut args = self.parse_list(TokenKind::RParen, "右括号 )")?;
        let arity_error = |expected: &str, actual: usize| -> ParseError {
            ParseError::new(
                format!("{} 需要 {} 个参数，实际 {} 个", name, expected, actual),
                start,
                end,
            )
        };

        if name.eq_ignore_ascii_case("IF") {
            if args.len() != 3 {
                return Err(arity_error("3", args.len()).into());
            }
            let otherwise = args.pop();
            let then = args.pop();
            let condition = args.pop();
            return match (condition, then, otherwise) {
                (Some(c), Some(t), Some(o)) => Ok(Expr::if_then_else(c, t, o)),
                _ => Err(arity_error("3", 0).into()),
            };
        }

        if name.eq_ignore_ascii_case("DATETIME") || name.eq_ignore_ascii_case("FAILED") {
            let text = match args.as_slice() {
                [arg] => match &arg.kind {
                    ExprKind::String(text) => text.clone(),
                    _ => {
                        return Err(ParseError::new(
                            format!("{} 的参数必须是字符串", name),
                            start,
                            end,
                        )
                        .into());
                    }
                },
                _ => return Err(arity_error("1", args.len()).into()),
            };
            if name.eq_ignore_ascii_case("FAILED") {
                return Ok(Expr::failed(text, ""));
            }
            let date: DateTime<Utc> = parse_datetime(&text).ok_or_else(|| {
                ParseError::new(format!("无效的日期: {}", text), start, end)
            })?;
            return Ok(Expr::date(date));
        }

        Ok(Expr::call(name, args))
    }

    fn bracketed_variable(&self, raw: &str, (start, end): (usize, usize)) -> Result<Expr> {
        let variable = match raw.rsplit_once(';') {
            Some((name, version)) if !name.trim().is_empty() && !version.trim().is_empty() => {
                Variable::versioned(name.trim(), version.trim())
            }
            _ => Variable::new(raw),
        };

        if self.options.validate_bracketed_names {
            if let Some(declarations) = self.declarations {
                let full_name = variable.full_name();
                if !declarations.contains(&full_name) && !declarations.contains(&variable.name) {
                    return Err(ParseError::new(
                        format!("未声明的变量: [{}]", full_name),
                        start,
                        end,
                    )
                    .into());
                }
            }
        }

        Ok(Expr::new(ExprKind::Variable(variable)))
    }
}

/// true/false/pi 以外的裸标识符都是变量
fn special_or_variable(name: String) -> Expr {
    if name.eq_ignore_ascii_case("true") {
        Expr::boolean(true)
    } else if name.eq_ignore_ascii_case("false") {
        Expr::boolean(false)
    } else if name.eq_ignore_ascii_case("pi") {
        Expr::number(std::f64::consts::PI)
    } else {
        Expr::variable(name)
    }
}

/// 解析表达式
pub fn parse(text: &str) -> Result<Expr> {
    Parser::new(text).parse()
}

/// 解析表达式，方括号变量按声明环境校验
pub fn parse_declared(text: &str, declarations: &DeclarationEnv) -> Result<Expr> {
    Parser::new(text).with_declarations(declarations).parse()
}
