use crate::error::{LoxError, Result};
use crate::statement::{next_expr_id, Expr, FunctionDecl, Stmt};
use crate::token::{Token, TokenType};

use log::debug;
use std::rc::Rc;

const MAX_ARITY: usize = 255;

struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
    errors: Vec<LoxError>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
        }
    }

    fn parse(mut self) -> (Vec<Stmt>, Vec<LoxError>) {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            if let Some(statement) = self.declaration() {
                statements.push(statement);
            }
        }
        (statements, self.errors)
    }

    /// Declaration boundary: parse errors thrown anywhere below are
    /// caught here, recorded, and followed by synchronization, so one
    /// malformed declaration never takes the rest of the program with it.
    fn declaration(&mut self) -> Option<Stmt> {
        let result = if self.matches(&[TokenType::Class]) {
            self.class_declaration()
        } else if self.matches(&[TokenType::Fun]) {
            self.function("function").map(Stmt::Function)
        } else if self.matches(&[TokenType::Var]) {
            self.var_declaration()
        } else {
            self.statement()
        };

        match result {
            Ok(statement) => Some(statement),
            Err(error) => {
                self.errors.push(error);
                self.synchronize();
                None
            }
        }
    }

    fn class_declaration(&mut self) -> Result<Stmt> {
        let name = self
            .consume(TokenType::Identifier, "Expect class name.")?
            .clone();

        let superclass = if self.matches(&[TokenType::Less]) {
            let superclass_name = self
                .consume(TokenType::Identifier, "Expect superclass name.")?
                .clone();
            Some(Expr::Variable {
                id: next_expr_id(),
                name: superclass_name,
            })
        } else {
            None
        };

        self.consume(TokenType::LeftBrace, "Expect '{' before class body.")?;

        let mut methods = Vec::new();
        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            methods.push(self.function("method")?);
        }

        self.consume(TokenType::RightBrace, "Expect '}' after class body.")?;

        Ok(Stmt::Class {
            name,
            superclass,
            methods,
        })
    }

    fn function(&mut self, kind: &str) -> Result<Rc<FunctionDecl>> {
        let name = self
            .consume(TokenType::Identifier, format!("Expect {} name.", kind))?
            .clone();
        self.consume(
            TokenType::LeftParen,
            format!("Expect '(' after {} name.", kind),
        )?;

        let mut parameters = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                if parameters.len() >= MAX_ARITY {
                    let token = self.peek().clone();
                    self.errors.push(LoxError::parse(
                        &token,
                        "Can't have more than 255 parameters.",
                    ));
                }
                let parameter = self
                    .consume(TokenType::Identifier, "Expect parameter name.")?
                    .clone();
                parameters.push(parameter);
                if !self.matches(&[TokenType::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.")?;

        self.consume(
            TokenType::LeftBrace,
            format!("Expect '{{' before {} body.", kind),
        )?;
        let body = self.block_statements()?;

        Ok(Rc::new(FunctionDecl {
            name,
            parameters,
            body,
        }))
    }

    fn var_declaration(&mut self) -> Result<Stmt> {
        let name = self
            .consume(TokenType::Identifier, "Expect variable name.")?
            .clone();
        // Deliberately stricter than canonical Lox: every variable
        // declaration carries an initializer.
        self.consume(TokenType::Equal, "Expect '=' after variable name.")?;
        let initializer = self.expression()?;
        self.consume(
            TokenType::Semicolon,
            "Expect ';' after variable declaration.",
        )?;
        Ok(Stmt::Var { name, initializer })
    }

    fn statement(&mut self) -> Result<Stmt> {
        if self.matches(&[TokenType::For]) {
            self.for_statement()
        } else if self.matches(&[TokenType::If]) {
            self.if_statement()
        } else if self.matches(&[TokenType::Print]) {
            self.print_statement()
        } else if self.matches(&[TokenType::Return]) {
            self.return_statement()
        } else if self.matches(&[TokenType::While]) {
            self.while_statement()
        } else if self.matches(&[TokenType::LeftBrace]) {
            Ok(Stmt::Block {
                statements: self.block_statements()?,
            })
        } else {
            self.expression_statement()
        }
    }

    /// `for` desugars to a while loop: the initializer and the loop live
    /// in an outer block, the increment is appended to the body.
    fn for_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.")?;

        let initializer = if self.matches(&[TokenType::Semicolon]) {
            None
        } else if self.matches(&[TokenType::Var]) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if !self.check(&TokenType::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::Semicolon, "Expect ';' after loop condition.")?;

        let increment = if !self.check(&TokenType::RightParen) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;

        if let Some(increment) = increment {
            body = Stmt::Block {
                statements: vec![
                    body,
                    Stmt::Expression {
                        expression: increment,
                    },
                ],
            };
        }

        body = Stmt::While {
            condition: condition.unwrap_or(Expr::Boolean(true)),
            body: Box::new(body),
        };

        if let Some(initializer) = initializer {
            body = Stmt::Block {
                statements: vec![initializer, body],
            };
        }

        Ok(body)
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after if condition.")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.matches(&[TokenType::Else]) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn print_statement(&mut self) -> Result<Stmt> {
        let expression = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after value.")?;
        Ok(Stmt::Print { expression })
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        let keyword = self.previous().clone();
        let value = if !self.check(&TokenType::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::Semicolon, "Expect ';' after return value.")?;
        Ok(Stmt::Return { keyword, value })
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after while condition.")?;
        let body = self.statement()?;

        Ok(Stmt::While {
            condition,
            body: Box::new(body),
        })
    }

    fn block_statements(&mut self) -> Result<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            if let Some(statement) = self.declaration() {
                statements.push(statement);
            }
        }
        self.consume(TokenType::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }

    fn expression_statement(&mut self) -> Result<Stmt> {
        let expression = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after expression.")?;
        Ok(Stmt::Expression { expression })
    }

    fn expression(&mut self) -> Result<Expr> {
        self.assignment()
    }

    /// Parse the left side as an ordinary expression, then rewrite it
    /// into an assignment target if an `=` follows. An invalid target is
    /// reported but does not abort the statement.
    fn assignment(&mut self) -> Result<Expr> {
        let expr = self.or()?;

        if self.matches(&[TokenType::Equal]) {
            let equals = self.previous().clone();
            let value = self.assignment()?;

            match expr {
                Expr::Variable { name, .. } => {
                    return Ok(Expr::Assign {
                        id: next_expr_id(),
                        name,
                        value: Box::new(value),
                    });
                }
                Expr::Get { object, name } => {
                    return Ok(Expr::Set {
                        object,
                        name,
                        value: Box::new(value),
                    });
                }
                _ => {
                    self.errors
                        .push(LoxError::parse(&equals, "Invalid assignment target."));
                }
            }
        }

        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut expr = self.and()?;

        while self.matches(&[TokenType::Or]) {
            let operator = self.previous().clone();
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut expr = self.equality()?;

        while self.matches(&[TokenType::And]) {
            let operator = self.previous().clone();
            let right = self.equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut expr = self.comparison()?;

        while self.matches(&[TokenType::BangEqual, TokenType::EqualEqual]) {
            let operator = self.previous().clone();
            let right = self.comparison()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut expr = self.term()?;

        while self.matches(&[
            TokenType::Greater,
            TokenType::GreaterEqual,
            TokenType::Less,
            TokenType::LessEqual,
        ]) {
            let operator = self.previous().clone();
            let right = self.term()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut expr = self.factor()?;

        while self.matches(&[TokenType::Minus, TokenType::Plus]) {
            let operator = self.previous().clone();
            let right = self.factor()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr> {
        let mut expr = self.unary()?;

        while self.matches(&[TokenType::Slash, TokenType::Star]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.matches(&[TokenType::Bang, TokenType::Minus]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            return Ok(Expr::Unary {
                operator,
                right: Box::new(right),
            });
        }

        self.call()
    }

    fn call(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.matches(&[TokenType::LeftParen]) {
                expr = self.finish_call(expr)?;
            } else if self.matches(&[TokenType::Dot]) {
                let name = self
                    .consume(TokenType::Identifier, "Expect property name after '.'.")?
                    .clone();
                expr = Expr::Get {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr> {
        let mut arguments = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                if arguments.len() >= MAX_ARITY {
                    let token = self.peek().clone();
                    self.errors.push(LoxError::parse(
                        &token,
                        "Can't have more than 255 arguments.",
                    ));
                }
                arguments.push(self.expression()?);
                if !self.matches(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        let paren = self
            .consume(TokenType::RightParen, "Expect ')' after arguments.")?
            .clone();

        Ok(Expr::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        match token.token_type.clone() {
            TokenType::False => {
                self.advance();
                Ok(Expr::Boolean(false))
            }
            TokenType::True => {
                self.advance();
                Ok(Expr::Boolean(true))
            }
            TokenType::Nil => {
                self.advance();
                Ok(Expr::Nil)
            }
            TokenType::Number(number) => {
                self.advance();
                Ok(Expr::Number(number))
            }
            TokenType::String(string) => {
                self.advance();
                Ok(Expr::String(string))
            }
            TokenType::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume(TokenType::RightParen, "Expect ')' after expression.")?;
                Ok(Expr::Grouping {
                    expression: Box::new(expr),
                })
            }
            TokenType::This => {
                self.advance();
                Ok(Expr::This {
                    id: next_expr_id(),
                    keyword: token,
                })
            }
            TokenType::Super => {
                self.advance();
                self.consume(TokenType::Dot, "Expect '.' after 'super'.")?;
                let method = self
                    .consume(TokenType::Identifier, "Expect superclass method name.")?
                    .clone();
                Ok(Expr::Super {
                    id: next_expr_id(),
                    keyword: token,
                    method,
                })
            }
            TokenType::Identifier => {
                self.advance();
                Ok(Expr::Variable {
                    id: next_expr_id(),
                    name: token,
                })
            }
            _ => Err(LoxError::parse(&token, "Expect expression.")),
        }
    }

    /// Discard tokens until a statement boundary: just past a `;`, or
    /// just before a token that can begin a declaration. Consumes at
    /// least one token so recovery always makes progress.
    fn synchronize(&mut self) {
        self.advance();

        while !self.is_at_end() {
            if self.previous().token_type == TokenType::Semicolon {
                return;
            }

            match self.peek().token_type {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => {}
            }

            self.advance();
        }
    }

    fn matches(&mut self, token_types: &[TokenType]) -> bool {
        for token_type in token_types {
            if self.check(token_type) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn check(&self, token_type: &TokenType) -> bool {
        &self.peek().token_type == token_type
    }

    fn consume(&mut self, token_type: TokenType, message: impl Into<String>) -> Result<&Token> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(LoxError::parse(self.peek(), message))
        }
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }
}

/// Parse a token stream into statements. Always returns the list of
/// successfully parsed declarations; errors accumulate alongside and the
/// caller decides whether later phases run.
pub fn parse(tokens: &[Token]) -> (Vec<Stmt>, Vec<LoxError>) {
    debug!("parsing {} tokens", tokens.len());
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {

    use super::parse;
    use crate::lexer;
    use crate::statement::{Expr, Stmt};
    use crate::token::TokenType;

    fn parse_source(source: &str) -> (Vec<Stmt>, Vec<crate::error::LoxError>) {
        let (tokens, lexer_errors) = lexer::lex(source);
        assert_eq!(lexer_errors.len(), 0);
        parse(&tokens)
    }

    #[test]
    fn simple_mathematical_expression() {
        let (statements, errors) = parse_source("(3 + 4) * 6;");
        assert_eq!(errors.len(), 0);
        assert_eq!(statements.len(), 1);

        match &statements[0] {
            Stmt::Expression { expression } => match expression {
                Expr::Binary { left, operator, .. } => {
                    assert_eq!(operator.token_type, TokenType::Star);
                    assert!(matches!(left.as_ref(), Expr::Grouping { .. }));
                }
                other => panic!("expected binary expression, got {:?}", other),
            },
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn var_declaration() {
        let (mut statements, errors) = parse_source("var answer = 42;");
        assert_eq!(errors.len(), 0);
        assert_eq!(statements.len(), 1);

        match statements.remove(0) {
            Stmt::Var { name, initializer } => {
                assert_eq!(name.lexeme, "answer");
                assert_eq!(initializer, Expr::Number(42.0));
            }
            other => panic!("expected var statement, got {:?}", other),
        }
    }

    #[test]
    fn var_requires_initializer() {
        let (statements, errors) = parse_source("var x;");
        assert_eq!(statements.len(), 0);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            format!("{}", errors[0]),
            "[Line 1] Error at ';': Expect '=' after variable name."
        );
    }

    #[test]
    fn synchronization_keeps_later_declarations() {
        let (statements, errors) = parse_source("var = 1;\nprint 2;");
        assert_eq!(errors.len(), 1);
        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0], Stmt::Print { .. }));
    }

    #[test]
    fn invalid_assignment_target_does_not_abort() {
        let (statements, errors) = parse_source("1 = 2;");
        assert_eq!(errors.len(), 1);
        assert!(format!("{}", errors[0]).contains("Invalid assignment target."));
        // the statement is still produced from the parsed left side
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn for_desugars_to_while_in_block() {
        let (statements, errors) = parse_source("for (var i = 0; i < 3; i = i + 1) print i;");
        assert_eq!(errors.len(), 0);
        assert_eq!(statements.len(), 1);

        match &statements[0] {
            Stmt::Block { statements } => {
                assert_eq!(statements.len(), 2);
                assert!(matches!(statements[0], Stmt::Var { .. }));
                match &statements[1] {
                    Stmt::While { body, .. } => match body.as_ref() {
                        Stmt::Block { statements } => {
                            assert_eq!(statements.len(), 2);
                            assert!(matches!(statements[1], Stmt::Expression { .. }));
                        }
                        other => panic!("expected block body, got {:?}", other),
                    },
                    other => panic!("expected while, got {:?}", other),
                }
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn class_with_superclass_and_methods() {
        let (statements, errors) = parse_source("class B < A { greet() { print 1; } }");
        assert_eq!(errors.len(), 0);

        match &statements[0] {
            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                assert_eq!(name.lexeme, "B");
                assert!(matches!(superclass, Some(Expr::Variable { .. })));
                assert_eq!(methods.len(), 1);
                assert_eq!(methods[0].name.lexeme, "greet");
            }
            other => panic!("expected class, got {:?}", other),
        }
    }

    #[test]
    fn property_chain_and_call() {
        let (statements, errors) = parse_source("a.b.c(1, 2);");
        assert_eq!(errors.len(), 0);
        match &statements[0] {
            Stmt::Expression { expression } => match expression {
                Expr::Call {
                    callee, arguments, ..
                } => {
                    assert_eq!(arguments.len(), 2);
                    assert!(matches!(callee.as_ref(), Expr::Get { .. }));
                }
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn totality_on_garbage_input() {
        let (statements, errors) = parse_source(") ) fun ( } ;");
        assert!(!errors.is_empty());
        // never panics, always returns a (possibly empty) list
        assert_eq!(statements.len(), 0);
    }
}
