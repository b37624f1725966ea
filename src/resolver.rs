use crate::error::LoxError;
use crate::statement::{Expr, ExprId, FunctionDecl, Stmt};
use crate::token::Token;

use log::debug;
use std::collections::HashMap;

#[derive(Copy, Clone, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum ClassType {
    None,
    Class,
    SubClass,
}

pub type Depth = u64;

/// Lexical resolution pass. Walks the whole program, accumulating scope
/// errors, and records for every local `Variable`/`Assign`/`This`/`Super`
/// expression how many scopes out its binding lives. Expressions absent
/// from the resulting table resolve against globals.
struct Resolver {
    scopes: Vec<HashMap<String, bool>>, // false = declared, true = defined
    depths: HashMap<ExprId, Depth>,
    errors: Vec<LoxError>,
    current_function: FunctionType,
    current_class: ClassType,
}

impl Resolver {
    fn new() -> Self {
        Self {
            scopes: Vec::new(),
            depths: HashMap::new(),
            errors: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
        }
    }

    fn resolve(mut self, statements: &[Stmt]) -> (HashMap<ExprId, Depth>, Vec<LoxError>) {
        self.resolve_statements(statements);
        (self.depths, self.errors)
    }

    fn resolve_statements(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.resolve_statement(statement);
        }
    }

    fn resolve_statement(&mut self, statement: &Stmt) {
        match statement {
            Stmt::Block { statements } => {
                self.begin_scope();
                self.resolve_statements(statements);
                self.end_scope();
            }
            Stmt::Var { name, initializer } => {
                self.declare(name);
                self.resolve_expression(initializer);
                self.define(name);
            }
            Stmt::Function(declaration) => {
                self.declare(&declaration.name);
                self.define(&declaration.name);
                self.resolve_function(declaration, FunctionType::Function);
            }
            Stmt::Expression { expression } => self.resolve_expression(expression),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expression(condition);
                self.resolve_statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_statement(else_branch);
                }
            }
            Stmt::Print { expression } => self.resolve_expression(expression),
            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.error(keyword, "Can't return from top-level code.");
                }
                if let Some(value) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(keyword, "Can't return a value from an initializer.");
                    }
                    self.resolve_expression(value);
                }
            }
            Stmt::While { condition, body } => {
                self.resolve_expression(condition);
                self.resolve_statement(body);
            }
            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                let enclosing_class = self.current_class;
                self.current_class = ClassType::Class;

                self.declare(name);
                self.define(name);

                if let Some(superclass) = superclass {
                    if let Expr::Variable {
                        name: superclass_name,
                        ..
                    } = superclass
                    {
                        if superclass_name.lexeme == name.lexeme {
                            self.error(superclass_name, "A class can't inherit from itself.");
                        }
                    }

                    self.current_class = ClassType::SubClass;
                    self.resolve_expression(superclass);

                    self.begin_scope();
                    self.scope_insert("super");
                }

                self.begin_scope();
                self.scope_insert("this");

                for method in methods {
                    let function_type = if method.name.lexeme == "init" {
                        FunctionType::Initializer
                    } else {
                        FunctionType::Method
                    };
                    // methods do not bind their name in the enclosing scope
                    self.resolve_function(method, function_type);
                }

                self.end_scope();

                if superclass.is_some() {
                    self.end_scope();
                }

                self.current_class = enclosing_class;
            }
        }
    }

    fn resolve_function(&mut self, declaration: &FunctionDecl, function_type: FunctionType) {
        let enclosing_function = self.current_function;
        self.current_function = function_type;

        self.begin_scope();
        for parameter in &declaration.parameters {
            self.declare(parameter);
            self.define(parameter);
        }
        self.resolve_statements(&declaration.body);
        self.end_scope();

        self.current_function = enclosing_function;
    }

    fn resolve_expression(&mut self, expression: &Expr) {
        match expression {
            Expr::Variable { id, name } => {
                let declared_only = self
                    .scopes
                    .last()
                    .map(|scope| scope.get(&name.lexeme) == Some(&false))
                    .unwrap_or(false);
                if declared_only {
                    self.error(name, "Can't read local variable in its own initializer.");
                }
                self.resolve_local(*id, &name.lexeme);
            }
            Expr::Assign { id, name, value } => {
                self.resolve_expression(value);
                self.resolve_local(*id, &name.lexeme);
            }
            Expr::This { id, keyword } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Can't use 'this' outside of a class.");
                    return;
                }
                self.resolve_local(*id, &keyword.lexeme);
            }
            Expr::Super { id, keyword, .. } => {
                match self.current_class {
                    ClassType::None => {
                        self.error(keyword, "Can't use 'super' outside of a class.");
                        return;
                    }
                    ClassType::Class => {
                        self.error(keyword, "Can't use 'super' in a class with no superclass.");
                        return;
                    }
                    ClassType::SubClass => {}
                }
                self.resolve_local(*id, &keyword.lexeme);
            }
            Expr::Binary { left, right, .. } => {
                self.resolve_expression(left);
                self.resolve_expression(right);
            }
            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expression(callee);
                for argument in arguments {
                    self.resolve_expression(argument);
                }
            }
            Expr::Get { object, .. } => self.resolve_expression(object),
            Expr::Set { object, value, .. } => {
                self.resolve_expression(object);
                self.resolve_expression(value);
            }
            Expr::Grouping { expression } => self.resolve_expression(expression),
            Expr::Logical { left, right, .. } => {
                self.resolve_expression(left);
                self.resolve_expression(right);
            }
            Expr::Unary { right, .. } => self.resolve_expression(right),
            Expr::Nil | Expr::Boolean(_) | Expr::Number(_) | Expr::String(_) => {}
        }
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &Token) {
        let duplicate = self
            .scopes
            .last()
            .map(|scope| scope.contains_key(&name.lexeme))
            .unwrap_or(false);
        if duplicate {
            self.error(name, "Already a variable with this name in this scope.");
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), false);
        }
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), true);
        }
    }

    /// Insert a synthetic binding (`this`, `super`) into the innermost
    /// scope, already defined.
    fn scope_insert(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    fn resolve_local(&mut self, id: ExprId, name: &str) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(name) {
                self.depths.insert(id, depth as Depth);
                return;
            }
        }
        // not found in any scope: left for the global environment
    }

    fn error(&mut self, token: &Token, message: &str) {
        self.errors.push(LoxError::resolve(token, message));
    }
}

/// Resolve a program. Returns the side table mapping expression ids to
/// scope depths and every scope error found; like the lexer and parser,
/// the pass covers the whole input instead of stopping at the first
/// problem.
pub fn resolve(statements: &[Stmt]) -> (HashMap<ExprId, Depth>, Vec<LoxError>) {
    debug!("resolving {} top-level statement(s)", statements.len());
    Resolver::new().resolve(statements)
}

#[cfg(test)]
mod tests {

    use super::{resolve, Depth};
    use crate::error::LoxError;
    use crate::lexer;
    use crate::parser;
    use crate::statement::{ExprId, Stmt};

    use std::collections::HashMap;

    fn resolve_source(source: &str) -> (HashMap<ExprId, Depth>, Vec<LoxError>) {
        let (tokens, lexer_errors) = lexer::lex(source);
        assert_eq!(lexer_errors.len(), 0);
        let (statements, parser_errors) = parser::parse(&tokens);
        assert_eq!(parser_errors.len(), 0);
        resolve(&statements)
    }

    fn first_message(errors: &[LoxError]) -> String {
        format!("{}", errors[0])
    }

    #[test]
    fn invalid_return_statement() {
        let (_, errors) = resolve_source("return 42;");
        assert_eq!(errors.len(), 1);
        assert!(first_message(&errors).contains("Can't return from top-level code."));
    }

    #[test]
    fn valid_return_statement() {
        let (_, errors) = resolve_source("fun test() { return 42; }");
        assert_eq!(errors.len(), 0);
    }

    #[test]
    fn invalid_this() {
        let (_, errors) = resolve_source("this;");
        assert_eq!(errors.len(), 1);
        assert!(first_message(&errors).contains("Can't use 'this' outside of a class."));
    }

    #[test]
    fn cannot_return_value_from_initializer() {
        let (_, errors) = resolve_source("class Foo { init() { return \"invalid\"; } }");
        assert_eq!(errors.len(), 1);
        assert!(first_message(&errors).contains("Can't return a value from an initializer."));
    }

    #[test]
    fn bare_return_from_initializer_is_fine() {
        let (_, errors) = resolve_source("class Foo { init() { return; } }");
        assert_eq!(errors.len(), 0);
    }

    #[test]
    fn cannot_use_super_outside_of_class() {
        let (_, errors) = resolve_source("fun f() { super.foo(); }");
        assert_eq!(errors.len(), 1);
        assert!(first_message(&errors).contains("Can't use 'super' outside of a class."));
    }

    #[test]
    fn cannot_use_super_in_non_subclass() {
        let (_, errors) = resolve_source("class Foo { foo() { super.foo(); } }");
        assert_eq!(errors.len(), 1);
        assert!(first_message(&errors).contains("Can't use 'super' in a class with no superclass."));
    }

    #[test]
    fn class_cannot_inherit_from_itself() {
        let (_, errors) = resolve_source("class A < A {}");
        assert_eq!(errors.len(), 1);
        assert!(first_message(&errors).contains("A class can't inherit from itself."));
    }

    #[test]
    fn cannot_read_local_in_its_own_initializer() {
        let (_, errors) = resolve_source("var a = 1; { var a = a; }");
        assert_eq!(errors.len(), 1);
        assert!(first_message(&errors).contains("Can't read local variable in its own initializer."));
    }

    #[test]
    fn duplicate_declaration_in_same_scope() {
        let (_, errors) = resolve_source("fun f() { var a = 1; var a = 2; }");
        assert_eq!(errors.len(), 1);
        assert!(first_message(&errors).contains("Already a variable with this name in this scope."));
    }

    #[test]
    fn globals_stay_out_of_the_side_table() {
        let (depths, errors) = resolve_source("var a = 1; print a;");
        assert_eq!(errors.len(), 0);
        assert!(depths.is_empty());
    }

    #[test]
    fn local_depths_count_hops_outward() {
        // `a` read from two blocks in: depth 1 to its defining frame.
        let source = "{ var a = 1; { print a; } }";
        let (depths, errors) = resolve_source(source);
        assert_eq!(errors.len(), 0);
        assert_eq!(depths.len(), 1);
        assert_eq!(depths.values().next(), Some(&1));
    }

    #[test]
    fn resolution_is_deterministic() {
        let source = r#"
            fun make(n) {
                fun inc() {
                    n = n + 1;
                    return n;
                }
                return inc;
            }
        "#;
        let (tokens, _) = lexer::lex(source);
        let (statements, _) = parser::parse(&tokens);
        let (first, first_errors) = resolve(&statements);
        let (second, second_errors) = resolve(&statements);
        assert_eq!(first, second);
        assert_eq!(first_errors.len(), second_errors.len());
    }

    #[test]
    fn errors_accumulate_across_the_program() {
        let (_, errors) = resolve_source("return 1; this;");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn methods_resolve_this_and_super() {
        let source = r#"
            class A { greet() { print "hi"; } }
            class B < A {
                greet() {
                    super.greet();
                    print this;
                }
            }
        "#;
        let (depths, errors) = resolve_source(source);
        assert_eq!(errors.len(), 0);
        // super at depth 2 (params -> this -> super), this at depth 1
        assert!(depths.values().any(|d| *d == 2));
        assert!(depths.values().any(|d| *d == 1));
    }

    // The parser's statement list survives malformed declarations; the
    // resolver only ever sees what parsed.
    #[test]
    fn resolves_partial_programs() {
        let (tokens, _) = lexer::lex("var = 1; print 2;");
        let (statements, parser_errors) = parser::parse(&tokens);
        assert_eq!(parser_errors.len(), 1);
        assert!(matches!(statements[0], Stmt::Print { .. }));
        let (_, errors) = resolve(&statements);
        assert_eq!(errors.len(), 0);
    }
}
