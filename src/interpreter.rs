use crate::callable::{Callable, Clock};
use crate::classes::{LoxClass, LoxInstance};
use crate::environment::Environment;
use crate::error::{LoxError, Result};
use crate::functions::LoxFunction;
use crate::resolver::Depth;
use crate::statement::{Expr, ExprId, FunctionDecl, Stmt};
use crate::token::{Token, TokenType};
use crate::value::Value;

use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

/// Tree-walk evaluator. Owns the global frame, the current frame, and
/// the resolver's side table (merged across REPL inputs). Everything the
/// program prints goes through `output`, so tests can hand in a buffer.
pub struct Interpreter<'out> {
    output: &'out mut dyn Write,
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    locals: HashMap<ExprId, Depth>,
}

impl<'out> Interpreter<'out> {
    pub fn new(output: &'out mut dyn Write) -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));
        globals
            .borrow_mut()
            .define("clock", Value::Native(Rc::new(Clock)));

        Interpreter {
            output,
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
        }
    }

    /// Merge a resolver side table in. REPL inputs are resolved one at a
    /// time; expression ids never collide, so plain extension is enough.
    pub fn add_resolutions(&mut self, depths: HashMap<ExprId, Depth>) {
        self.locals.extend(depths);
    }

    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<()> {
        debug!("interpreting {} statement(s)", statements.len());
        for statement in statements {
            self.execute(statement)?;
        }
        Ok(())
    }

    fn execute(&mut self, statement: &Stmt) -> Result<()> {
        match statement {
            Stmt::Expression { expression } => {
                self.evaluate(expression)?;
                Ok(())
            }

            Stmt::Print { expression } => {
                let value = self.evaluate(expression)?;
                writeln!(self.output, "{}", value)?;
                Ok(())
            }

            Stmt::Var { name, initializer } => {
                let value = self.evaluate(initializer)?;
                self.environment.borrow_mut().define(&name.lexeme, value);
                Ok(())
            }

            Stmt::Block { statements } => {
                let environment = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
                    &self.environment,
                ))));
                self.execute_block(statements, environment)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(())
                }
            }

            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    self.execute(body)?;
                }
                Ok(())
            }

            Stmt::Function(declaration) => {
                let function = LoxFunction::new(
                    Rc::clone(declaration),
                    Rc::clone(&self.environment),
                    false,
                );
                self.environment
                    .borrow_mut()
                    .define(&declaration.name.lexeme, Value::Function(Rc::new(function)));
                Ok(())
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expression) => self.evaluate(expression)?,
                    None => Value::Nil,
                };
                // unwound by the innermost LoxFunction::call
                Err(LoxError::Return(value))
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_ref(), methods),
        }
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<()> {
        let superclass_value = match superclass {
            Some(expression) => {
                let value = self.evaluate(expression)?;
                match value {
                    Value::Class(class) => Some(class),
                    _ => {
                        let line = match expression {
                            Expr::Variable { name, .. } => name.line,
                            _ => name.line,
                        };
                        return Err(LoxError::runtime(line, "Superclass must be a class."));
                    }
                }
            }
            None => None,
        };

        self.environment
            .borrow_mut()
            .define(&name.lexeme, Value::Nil);

        // the frame holding `super` encloses every method's closure
        let enclosing = Rc::clone(&self.environment);
        if let Some(superclass) = &superclass_value {
            let mut environment = Environment::with_enclosing(Rc::clone(&self.environment));
            environment.define("super", Value::Class(Rc::clone(superclass)));
            self.environment = Rc::new(RefCell::new(environment));
        }

        let mut method_map = HashMap::new();
        for method in methods {
            let is_initializer = method.name.lexeme == "init";
            let function = LoxFunction::new(
                Rc::clone(method),
                Rc::clone(&self.environment),
                is_initializer,
            );
            method_map.insert(method.name.lexeme.clone(), Rc::new(function));
        }

        if superclass_value.is_some() {
            self.environment = enclosing;
        }

        let class = LoxClass::new(name.lexeme.clone(), superclass_value, method_map);
        self.environment
            .borrow_mut()
            .assign(name, Value::Class(Rc::new(class)))?;
        Ok(())
    }

    /// Run statements in the given frame, restoring the previous frame
    /// on every exit path — including the `Return` unwind.
    pub fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: Rc<RefCell<Environment>>,
    ) -> Result<()> {
        let previous = Rc::clone(&self.environment);
        self.environment = environment;

        let mut result = Ok(());
        for statement in statements {
            result = self.execute(statement);
            if result.is_err() {
                break;
            }
        }

        self.environment = previous;
        result
    }

    fn evaluate(&mut self, expression: &Expr) -> Result<Value> {
        match expression {
            Expr::Nil => Ok(Value::Nil),
            Expr::Boolean(b) => Ok(Value::Boolean(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),

            Expr::Grouping { expression } => self.evaluate(expression),

            Expr::Unary { operator, right } => self.evaluate_unary(operator, right),

            Expr::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, operator, right),

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left_value = self.evaluate(left)?;
                match operator.token_type {
                    TokenType::Or if left_value.is_truthy() => Ok(left_value),
                    TokenType::And if !left_value.is_truthy() => Ok(left_value),
                    _ => self.evaluate(right),
                }
            }

            Expr::Variable { id, name } => self.look_up_variable(name, *id),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                match self.locals.get(id) {
                    Some(depth) => {
                        let assigned = self.environment.borrow_mut().assign_at(
                            *depth,
                            name,
                            value.clone(),
                        );
                        if !assigned {
                            return Err(LoxError::runtime(
                                name.line,
                                format!("Undefined variable '{}'.", name.lexeme),
                            ));
                        }
                    }
                    None => self.globals.borrow_mut().assign(name, value.clone())?,
                }
                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => self.evaluate_call(callee, paren, arguments),

            Expr::Get { object, name } => {
                let object = self.evaluate(object)?;
                match object {
                    Value::Instance(instance) => LoxInstance::get(&instance, name),
                    _ => Err(LoxError::runtime(
                        name.line,
                        "Only instances have properties.",
                    )),
                }
            }

            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;
                match object {
                    Value::Instance(instance) => {
                        let value = self.evaluate(value)?;
                        instance.borrow_mut().set(name, value.clone());
                        Ok(value)
                    }
                    _ => Err(LoxError::runtime(name.line, "Only instances have fields.")),
                }
            }

            Expr::This { id, keyword } => self.look_up_variable(keyword, *id),

            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),
        }
    }

    fn evaluate_unary(&mut self, operator: &Token, right: &Expr) -> Result<Value> {
        let value = self.evaluate(right)?;
        match operator.token_type {
            TokenType::Minus => match value {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(LoxError::runtime(
                    operator.line,
                    "Operand must be a number.",
                )),
            },
            TokenType::Bang => Ok(Value::Boolean(!value.is_truthy())),
            _ => Err(LoxError::runtime(operator.line, "Invalid unary operator.")),
        }
    }

    fn evaluate_binary(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Value> {
        let left_value = self.evaluate(left)?;
        let right_value = self.evaluate(right)?;

        match operator.token_type {
            TokenType::Plus => match (left_value, right_value) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
                _ => Err(LoxError::runtime(
                    operator.line,
                    "Operands must be two numbers or two strings.",
                )),
            },

            TokenType::Minus => {
                let (a, b) = number_operands(operator, &left_value, &right_value)?;
                Ok(Value::Number(a - b))
            }

            TokenType::Star => {
                let (a, b) = number_operands(operator, &left_value, &right_value)?;
                Ok(Value::Number(a * b))
            }

            TokenType::Slash => {
                let (a, b) = number_operands(operator, &left_value, &right_value)?;
                if b == 0.0 {
                    Err(LoxError::runtime(operator.line, "Division by zero."))
                } else {
                    Ok(Value::Number(a / b))
                }
            }

            TokenType::Greater => {
                let (a, b) = number_operands(operator, &left_value, &right_value)?;
                Ok(Value::Boolean(a > b))
            }

            TokenType::GreaterEqual => {
                let (a, b) = number_operands(operator, &left_value, &right_value)?;
                Ok(Value::Boolean(a >= b))
            }

            TokenType::Less => {
                let (a, b) = number_operands(operator, &left_value, &right_value)?;
                Ok(Value::Boolean(a < b))
            }

            TokenType::LessEqual => {
                let (a, b) = number_operands(operator, &left_value, &right_value)?;
                Ok(Value::Boolean(a <= b))
            }

            TokenType::EqualEqual => Ok(Value::Boolean(left_value == right_value)),
            TokenType::BangEqual => Ok(Value::Boolean(left_value != right_value)),

            _ => Err(LoxError::runtime(
                operator.line,
                "Invalid binary operator.",
            )),
        }
    }

    fn evaluate_call(&mut self, callee: &Expr, paren: &Token, arguments: &[Expr]) -> Result<Value> {
        let callee_value = self.evaluate(callee)?;

        // callability is checked before any argument evaluates, so a bad
        // callee never lets argument side effects through
        let arity = callee_value.arity().ok_or_else(|| {
            LoxError::runtime(paren.line, "Can only call functions and classes.")
        })?;

        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments {
            args.push(self.evaluate(argument)?);
        }

        if args.len() != arity {
            return Err(LoxError::runtime(
                paren.line,
                format!("Expected {} arguments but got {}.", arity, args.len()),
            ));
        }

        match callee_value {
            Value::Native(function) => function.call(self, &args),
            Value::Function(function) => function.call(self, &args),
            Value::Class(class) => LoxClass::instantiate(&class, self, &args),
            _ => Err(LoxError::runtime(
                paren.line,
                "Can only call functions and classes.",
            )),
        }
    }

    fn evaluate_super(&mut self, id: ExprId, keyword: &Token, method: &Token) -> Result<Value> {
        let depth = self.locals.get(&id).copied().ok_or_else(|| {
            LoxError::runtime(keyword.line, "Can't use 'super' outside of a class.")
        })?;

        let superclass = self.environment.borrow().get_at(depth, "super");
        let instance = self.environment.borrow().get_at(depth - 1, "this");

        match (superclass, instance) {
            (Some(Value::Class(superclass)), Some(instance)) => {
                let found = superclass.find_method(&method.lexeme).ok_or_else(|| {
                    LoxError::runtime(
                        method.line,
                        format!("Undefined property '{}'.", method.lexeme),
                    )
                })?;
                Ok(Value::Function(Rc::new(found.bind(instance))))
            }
            _ => Err(LoxError::runtime(
                keyword.line,
                "Can't use 'super' outside of a class.",
            )),
        }
    }

    fn look_up_variable(&self, name: &Token, id: ExprId) -> Result<Value> {
        match self.locals.get(&id) {
            Some(depth) => self
                .environment
                .borrow()
                .get_at(*depth, &name.lexeme)
                .ok_or_else(|| {
                    LoxError::runtime(
                        name.line,
                        format!("Undefined variable '{}'.", name.lexeme),
                    )
                }),
            None => self.globals.borrow().get(name),
        }
    }
}

fn number_operands(operator: &Token, left: &Value, right: &Value) -> Result<(f64, f64)> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(LoxError::runtime(
            operator.line,
            "Operands must be numbers.",
        )),
    }
}

#[cfg(test)]
mod tests {

    use super::Interpreter;
    use crate::error::{LoxError, Result};
    use crate::lexer;
    use crate::parser;
    use crate::resolver;

    fn run(source: &str) -> Result<String> {
        let (tokens, lexer_errors) = lexer::lex(source);
        assert_eq!(lexer_errors.len(), 0, "lexer errors: {:?}", lexer_errors);
        let (statements, parser_errors) = parser::parse(&tokens);
        assert_eq!(parser_errors.len(), 0, "parser errors: {:?}", parser_errors);
        let (depths, resolver_errors) = resolver::resolve(&statements);
        assert_eq!(
            resolver_errors.len(),
            0,
            "resolver errors: {:?}",
            resolver_errors
        );

        let mut out: Vec<u8> = Vec::new();
        let mut interpreter = Interpreter::new(&mut out);
        interpreter.add_resolutions(depths);
        interpreter.interpret(&statements)?;
        Ok(String::from_utf8(out).expect("interpreter output is UTF-8"))
    }

    fn runtime_message(result: Result<String>) -> String {
        match result {
            Err(error @ LoxError::Runtime { .. }) => format!("{}", error),
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run("print 1 + 2 * 3;").unwrap(), "7\n");
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            run("var a = \"hi\"; var b = \"!\"; print a + b;").unwrap(),
            "hi!\n"
        );
    }

    #[test]
    fn while_loop() {
        assert_eq!(
            run("var i = 0; while (i < 3) { print i; i = i + 1; }").unwrap(),
            "0\n1\n2\n"
        );
    }

    #[test]
    fn for_loop() {
        assert_eq!(
            run("for (var i = 0; i < 3; i = i + 1) print i;").unwrap(),
            "0\n1\n2\n"
        );
    }

    #[test]
    fn closures_share_their_defining_frame() {
        let source = r#"
            fun make(n) {
                fun inc() {
                    n = n + 1;
                    return n;
                }
                return inc;
            }
            var c = make(10);
            print c();
            print c();
        "#;
        assert_eq!(run(source).unwrap(), "11\n12\n");
    }

    #[test]
    fn inheritance_and_super() {
        let source = r#"
            class A { greet() { print "hi"; } }
            class B < A {
                greet() {
                    super.greet();
                    print "!";
                }
            }
            B().greet();
        "#;
        assert_eq!(run(source).unwrap(), "hi\n!\n");
    }

    #[test]
    fn initializer_stores_fields() {
        assert_eq!(
            run("class P { init(x) { this.x = x; } } print P(7).x;").unwrap(),
            "7\n"
        );
    }

    #[test]
    fn initializer_returns_the_instance() {
        let source = r#"
            class P { init(x) { this.x = x; } }
            var p = P(7);
            print p.init(9) == p;
            print p.x;
        "#;
        assert_eq!(run(source).unwrap(), "true\n9\n");
    }

    #[test]
    fn bound_methods_remember_their_instance() {
        let source = r#"
            class Greeter {
                init(name) { this.name = name; }
                greet() { print this.name; }
            }
            var m = Greeter("klox").greet;
            m();
        "#;
        assert_eq!(run(source).unwrap(), "klox\n");
    }

    #[test]
    fn fields_shadow_methods() {
        let source = r#"
            class C { f() { return 1; } }
            var c = C();
            fun other() { return 2; }
            c.f = other;
            print c.f();
        "#;
        assert_eq!(run(source).unwrap(), "2\n");
    }

    #[test]
    fn inherited_methods_are_found() {
        let source = r#"
            class A { f() { return "a"; } }
            class B < A {}
            print B().f();
        "#;
        assert_eq!(run(source).unwrap(), "a\n");
    }

    #[test]
    fn shadowing_resolves_to_the_right_frame() {
        let source = r#"
            var a = "global";
            {
                fun show() { print a; }
                show();
                var a = "local";
                show();
            }
        "#;
        // the closure captured the global binding; the later local
        // declaration must not change what it sees
        assert_eq!(run(source).unwrap(), "global\nglobal\n");
    }

    #[test]
    fn non_local_return_unwinds_nested_blocks() {
        let source = r#"
            fun find() {
                var i = 0;
                while (true) {
                    if (i > 2) { return i; }
                    i = i + 1;
                }
            }
            print find();
        "#;
        assert_eq!(run(source).unwrap(), "3\n");
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_eq!(
            run("print nil or \"fallback\"; print false and missing;").unwrap(),
            "fallback\nfalse\n"
        );
    }

    #[test]
    fn equality_rules() {
        let source = r#"
            print 1 == 1;
            print "a" == "a";
            print nil == nil;
            print 1 == "1";
            print nil == false;
        "#;
        assert_eq!(run(source).unwrap(), "true\ntrue\ntrue\nfalse\nfalse\n");
    }

    #[test]
    fn instances_compare_by_identity() {
        let source = r#"
            class C {}
            var a = C();
            var b = C();
            print a == a;
            print a == b;
        "#;
        assert_eq!(run(source).unwrap(), "true\nfalse\n");
    }

    #[test]
    fn division_by_zero_fails() {
        assert_eq!(
            runtime_message(run("print 1 / 0;")),
            "[line 1] Runtime Error: Division by zero."
        );
    }

    #[test]
    fn calling_a_non_callable_fails() {
        assert_eq!(
            runtime_message(run("\"not a function\"();")),
            "[line 1] Runtime Error: Can only call functions and classes."
        );
    }

    #[test]
    fn arity_mismatch_reports_expected_and_got() {
        assert_eq!(
            runtime_message(run("fun f(a, b) { return a; } f(1);")),
            "[line 1] Runtime Error: Expected 2 arguments but got 1."
        );
    }

    #[test]
    fn class_arity_is_the_initializer_arity() {
        assert_eq!(
            runtime_message(run("class P { init(x) {} } P();")),
            "[line 1] Runtime Error: Expected 1 arguments but got 0."
        );
    }

    #[test]
    fn property_access_on_non_instance_fails() {
        assert_eq!(
            runtime_message(run("var x = 1; print x.field;")),
            "[line 1] Runtime Error: Only instances have properties."
        );
    }

    #[test]
    fn undefined_variable_fails() {
        assert_eq!(
            runtime_message(run("print missing;")),
            "[line 1] Runtime Error: Undefined variable 'missing'."
        );
    }

    #[test]
    fn undefined_property_fails() {
        assert_eq!(
            runtime_message(run("class C {} C().missing;")),
            "[line 1] Runtime Error: Undefined property 'missing'."
        );
    }

    #[test]
    fn mixed_operand_addition_fails() {
        assert_eq!(
            runtime_message(run("print 1 + \"one\";")),
            "[line 1] Runtime Error: Operands must be two numbers or two strings."
        );
    }

    #[test]
    fn clock_is_predefined() {
        assert_eq!(run("print clock() >= 0;").unwrap(), "true\n");
    }

    #[test]
    fn evaluation_is_deterministic() {
        let source = r#"
            fun fib(n) {
                if (n < 2) { return n; }
                return fib(n - 1) + fib(n - 2);
            }
            print fib(12);
        "#;
        let first = run(source).unwrap();
        let second = run(source).unwrap();
        assert_eq!(first, "144\n");
        assert_eq!(first, second);
    }

    #[test]
    fn call_check_precedes_argument_evaluation() {
        let mut out: Vec<u8> = Vec::new();
        let mut interpreter = Interpreter::new(&mut out);

        for (source, should_fail) in [("var y = 0;", false), ("y(y = 1);", true), ("print y;", false)]
        {
            let (tokens, _) = lexer::lex(source);
            let (statements, _) = parser::parse(&tokens);
            let (depths, _) = resolver::resolve(&statements);
            interpreter.add_resolutions(depths);
            let result = interpreter.interpret(&statements);
            assert_eq!(result.is_err(), should_fail, "source: {}", source);
        }

        // the argument of the failed call never ran, so y is unchanged
        assert_eq!(String::from_utf8(out).unwrap(), "0\n");
    }

    #[test]
    fn repl_style_reuse_keeps_global_bindings() {
        let mut out: Vec<u8> = Vec::new();
        let mut interpreter = Interpreter::new(&mut out);

        for source in ["var a = 1;", "a = a + 1;", "print a;"] {
            let (tokens, _) = lexer::lex(source);
            let (statements, _) = parser::parse(&tokens);
            let (depths, _) = resolver::resolve(&statements);
            interpreter.add_resolutions(depths);
            interpreter.interpret(&statements).unwrap();
        }

        assert_eq!(String::from_utf8(out).unwrap(), "2\n");
    }
}
