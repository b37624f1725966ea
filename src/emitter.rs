use crate::statement::{Expr, FunctionDecl, Stmt};
use crate::token::{Token, TokenType};

use log::debug;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Copy, Clone, PartialEq)]
enum ClassContext {
    None,
    Class,
    Subclass,
}

#[derive(Copy, Clone, PartialEq)]
enum FunctionKind {
    Function,
    Method,
    Initializer,
}

/// What a source-level name maps to in the generated program. `ident` is
/// the mangled `Value` binding; `inst_alias` is the
/// `std::shared_ptr<LoxInstance>` alias the INSTANCE macro introduces;
/// `class_ident` is the typed `std::shared_ptr<LoxClass>` handle a class
/// declaration leaves behind.
#[derive(Clone)]
struct Binding {
    ident: String,
    inst_alias: Option<String>,
    class_ident: Option<String>,
}

impl Binding {
    fn value(ident: String) -> Self {
        Binding {
            ident,
            inst_alias: None,
            class_ident: None,
        }
    }
}

/// Statement visitor that writes C++ into an indented buffer. Expression
/// emission returns the final C++ expression text and may push prelude
/// statements first (temporaries for short-circuiting, instance lifting,
/// assignments), so evaluation order stays left-to-right even where C++
/// argument order is unspecified.
struct Emitter {
    out: String,
    indent: usize,
    scopes: Vec<HashMap<String, Binding>>,
    // one monotonic counter for every mangled name and temporary, so
    // sibling scopes can never collide
    counter: u64,
    class_context: ClassContext,
    superclass_ident: Option<String>,
    in_initializer: bool,
}

impl Emitter {
    fn new() -> Self {
        Emitter {
            out: String::new(),
            indent: 0,
            scopes: vec![HashMap::new()],
            counter: 0,
            class_context: ClassContext::None,
            superclass_ident: None,
            in_initializer: false,
        }
    }

    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn fresh(&mut self, name: &str) -> String {
        let ident = format!("{}_{}", name, self.counter);
        self.counter += 1;
        ident
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    /// After an assignment the binding may hold any value; stale typed
    /// aliases must not survive it.
    fn invalidate_aliases(&mut self, name: &str) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(binding) = scope.get_mut(name) {
                binding.inst_alias = None;
                binding.class_ident = None;
                return;
            }
        }
    }

    // ---- statements ----

    fn emit_statement(&mut self, statement: &Stmt) {
        // keep the runtime's line tracker current so thrown errors carry
        // the [line N] prefix; dropped statements emit nothing at all
        let emits_code = match statement {
            Stmt::Expression { expression } => has_effect(expression),
            _ => true,
        };
        if emits_code {
            if let Some(line) = stmt_line(statement) {
                self.line(format!("klox_line = {};", line));
            }
        }

        match statement {
            Stmt::Expression { expression } => self.emit_expression_statement(expression),

            Stmt::Print { expression } => {
                let rendered = self.emit_expr(expression);
                self.line(format!("PRINT({});", rendered));
            }

            Stmt::Var { name, initializer } => self.emit_var(name, initializer),

            Stmt::Block { statements } => {
                self.line("{");
                self.indent += 1;
                self.scopes.push(HashMap::new());
                for statement in statements {
                    self.emit_statement(statement);
                }
                self.scopes.pop();
                self.indent -= 1;
                self.line("}");
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let rendered = self.emit_expr(condition);
                self.line(format!("if (isTruthy({})) {{", rendered));
                self.indent += 1;
                self.emit_statement(then_branch);
                self.indent -= 1;
                match else_branch {
                    Some(else_branch) => {
                        self.line("} else {");
                        self.indent += 1;
                        self.emit_statement(else_branch);
                        self.indent -= 1;
                        self.line("}");
                    }
                    None => self.line("}"),
                }
            }

            Stmt::While { condition, body } => {
                // condition preludes must re-run every iteration
                self.line("while (true) {");
                self.indent += 1;
                if let Some(line) = expr_line(condition) {
                    self.line(format!("klox_line = {};", line));
                }
                let rendered = self.emit_expr(condition);
                self.line(format!("if (!isTruthy({})) break;", rendered));
                self.emit_statement(body);
                self.indent -= 1;
                self.line("}");
            }

            Stmt::Function(declaration) => {
                self.emit_function(declaration, FunctionKind::Function);
            }

            Stmt::Return { value, .. } => {
                if self.in_initializer {
                    // the resolver already rejected value-carrying returns
                    self.line("return args[0];");
                } else {
                    match value {
                        Some(value) => {
                            let rendered = self.emit_expr(value);
                            self.line(format!("return Value({});", rendered));
                        }
                        None => self.line("return nullptr;"),
                    }
                }
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.emit_class(name, superclass.as_ref(), methods),
        }
    }

    fn emit_expression_statement(&mut self, expression: &Expr) {
        // bare literals, variable reads and pure operator trees compile
        // to nothing
        if !has_effect(expression) {
            return;
        }

        // statement-position method calls go through the macro
        if let Expr::Call {
            callee, arguments, ..
        } = expression
        {
            if let Expr::Get { object, name } = callee.as_ref() {
                let instance = self.emit_instance_ptr(object);
                let args = self.emit_arguments(arguments);
                if args.is_empty() {
                    self.line(format!("CALL_METHOD({}, {});", instance, name.lexeme));
                } else {
                    self.line(format!(
                        "CALL_METHOD({}, {}, {});",
                        instance,
                        name.lexeme,
                        args.join(", ")
                    ));
                }
                return;
            }
        }

        match expression {
            // these do their work in prelude statements and leave only a
            // pure residual behind
            Expr::Assign { .. } | Expr::Set { .. } | Expr::Logical { .. } => {
                self.emit_expr(expression);
            }
            _ => {
                let rendered = self.emit_expr(expression);
                self.line(format!("{};", rendered));
            }
        }
    }

    fn emit_var(&mut self, name: &Token, initializer: &Expr) {
        // `var x = SomeClass(...)` routes through INSTANCE, which also
        // leaves a typed instance pointer for later property access
        if let Expr::Call {
            callee, arguments, ..
        } = initializer
        {
            if let Expr::Variable {
                name: callee_name, ..
            } = callee.as_ref()
            {
                let class_ident = self
                    .lookup(&callee_name.lexeme)
                    .and_then(|binding| binding.class_ident);
                if let Some(class_ident) = class_ident {
                    let args = self.emit_arguments(arguments);
                    let ident = self.fresh(&name.lexeme);
                    if args.is_empty() {
                        self.line(format!("INSTANCE({}, {});", ident, class_ident));
                    } else {
                        self.line(format!(
                            "INSTANCE({}, {}, {});",
                            ident,
                            class_ident,
                            args.join(", ")
                        ));
                    }
                    let alias = format!("{}_inst", ident);
                    self.bind(
                        &name.lexeme,
                        Binding {
                            ident,
                            inst_alias: Some(alias),
                            class_ident: None,
                        },
                    );
                    return;
                }
            }
        }

        let rendered = self.emit_expr(initializer);
        let ident = self.fresh(&name.lexeme);
        self.line(format!("Value {} = {};", ident, rendered));
        self.bind(&name.lexeme, Binding::value(ident));
    }

    /// Emit a function or method and return its mangled base identifier;
    /// the `std::shared_ptr<LoxFunction>` handle is `<ident>_fn`. The
    /// body is assigned after the `Value` binding exists so the function
    /// can capture itself for recursion.
    fn emit_function(&mut self, declaration: &FunctionDecl, kind: FunctionKind) -> String {
        let ident = self.fresh(&declaration.name.lexeme);
        let offset = if kind == FunctionKind::Function { 0 } else { 1 };
        let arity = declaration.parameters.len() + offset;

        self.line(format!(
            "auto {}_fn = std::make_shared<LoxFunction>({});",
            ident, arity
        ));
        if kind == FunctionKind::Function {
            self.line(format!(
                "Value {} = std::static_pointer_cast<LoxCallable>({}_fn);",
                ident, ident
            ));
            self.bind(&declaration.name.lexeme, Binding::value(ident.clone()));
        }

        self.line(format!(
            "{}_fn->body = [=](const std::vector<Value> &args) mutable -> Value {{",
            ident
        ));
        self.indent += 1;
        self.line(format!("CHECK_ARITY({});", arity));

        self.scopes.push(HashMap::new());
        let was_initializer = self.in_initializer;
        self.in_initializer = kind == FunctionKind::Initializer;

        if kind != FunctionKind::Function {
            // slot 0 holds the receiver
            let this_ident = self.fresh("this");
            self.line(format!("Value {} = args[0];", this_ident));
            self.line(format!("auto {}_inst = SELF;", this_ident));
            let alias = format!("{}_inst", this_ident);
            self.bind(
                "this",
                Binding {
                    ident: this_ident,
                    inst_alias: Some(alias),
                    class_ident: None,
                },
            );
        }

        for (index, parameter) in declaration.parameters.iter().enumerate() {
            let parameter_ident = self.fresh(&parameter.lexeme);
            self.line(format!(
                "Value {} = args[{}];",
                parameter_ident,
                index + offset
            ));
            self.bind(&parameter.lexeme, Binding::value(parameter_ident));
        }

        for statement in &declaration.body {
            self.emit_statement(statement);
        }

        if self.in_initializer {
            self.line("return args[0];");
        } else {
            self.line("return nullptr;");
        }

        self.in_initializer = was_initializer;
        self.scopes.pop();
        self.indent -= 1;
        self.line("};");

        ident
    }

    fn emit_class(&mut self, name: &Token, superclass: Option<&Expr>, methods: &[Rc<FunctionDecl>]) {
        let class_ident = self.fresh(&name.lexeme);

        let superclass_class = superclass.and_then(|superclass| {
            if let Expr::Variable {
                name: superclass_name,
                ..
            } = superclass
            {
                self.lookup(&superclass_name.lexeme)
                    .and_then(|binding| binding.class_ident)
            } else {
                None
            }
        });

        self.line(format!(
            "std::unordered_map<std::string, std::shared_ptr<LoxCallable>> {}_methods;",
            class_ident
        ));

        let enclosing_context = self.class_context;
        let enclosing_superclass = self.superclass_ident.clone();
        self.class_context = if superclass_class.is_some() {
            ClassContext::Subclass
        } else {
            ClassContext::Class
        };
        self.superclass_ident = superclass_class.clone();

        for method in methods {
            let kind = if method.name.lexeme == "init" {
                FunctionKind::Initializer
            } else {
                FunctionKind::Method
            };
            let method_ident = self.emit_function(method, kind);
            self.line(format!(
                "METHOD({}, \"{}\", {}_fn);",
                class_ident, method.name.lexeme, method_ident
            ));
        }

        self.class_context = enclosing_context;
        self.superclass_ident = enclosing_superclass;

        let superclass_arg = superclass_class.unwrap_or_else(|| "nullptr".to_string());
        self.line(format!(
            "auto {}_class = std::make_shared<LoxClass>(\"{}\", {}, {}_methods);",
            class_ident, name.lexeme, superclass_arg, class_ident
        ));
        self.line(format!("Value {} = {}_class;", class_ident, class_ident));

        let class_handle = format!("{}_class", class_ident);
        self.bind(
            &name.lexeme,
            Binding {
                ident: class_ident,
                inst_alias: None,
                class_ident: Some(class_handle),
            },
        );
    }

    // ---- expressions ----

    fn emit_expr(&mut self, expression: &Expr) -> String {
        match expression {
            Expr::Number(n) => format!("{:?}", n),
            Expr::String(s) => cpp_string_literal(s),
            Expr::Boolean(b) => format!("{}", b),
            Expr::Nil => "nullptr".to_string(),

            Expr::Grouping { expression } => {
                let rendered = self.emit_expr(expression);
                format!("({})", rendered)
            }

            Expr::Unary { operator, right } => {
                let rendered = self.emit_expr(right);
                match operator.token_type {
                    TokenType::Minus => format!("negate({})", rendered),
                    _ => format!("notOp({})", rendered),
                }
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let lhs = self.emit_operand(left);
                let rhs = self.emit_operand(right);
                match operator.token_type {
                    TokenType::Plus => format!("add({}, {})", lhs, rhs),
                    TokenType::Minus => format!("subtract({}, {})", lhs, rhs),
                    TokenType::Star => format!("multiply({}, {})", lhs, rhs),
                    TokenType::Slash => format!("divide({}, {})", lhs, rhs),
                    TokenType::Greater => format!("Value(greater({}, {}))", lhs, rhs),
                    TokenType::GreaterEqual => format!("Value(greater_equal({}, {}))", lhs, rhs),
                    TokenType::Less => format!("Value(less({}, {}))", lhs, rhs),
                    TokenType::LessEqual => format!("Value(less_equal({}, {}))", lhs, rhs),
                    TokenType::BangEqual => format!("Value(not_equal({}, {}))", lhs, rhs),
                    _ => format!("Value(equal({}, {}))", lhs, rhs),
                }
            }

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let lhs = self.emit_expr(left);
                let tmp = self.fresh("tmp");
                self.line(format!("Value {} = {};", tmp, lhs));
                let guard = match operator.token_type {
                    TokenType::Or => format!("!isTruthy({})", tmp),
                    _ => format!("isTruthy({})", tmp),
                };
                self.line(format!("if ({}) {{", guard));
                self.indent += 1;
                let rhs = self.emit_expr(right);
                self.line(format!("{} = {};", tmp, rhs));
                self.indent -= 1;
                self.line("}");
                tmp
            }

            Expr::Variable { name, .. } => match self.lookup(&name.lexeme) {
                Some(binding) => binding.ident,
                None => name.lexeme.clone(),
            },

            Expr::Assign { name, value, .. } => {
                let rendered = self.emit_expr(value);
                let ident = match self.lookup(&name.lexeme) {
                    Some(binding) => binding.ident,
                    None => name.lexeme.clone(),
                };
                self.line(format!("{} = {};", ident, rendered));
                self.invalidate_aliases(&name.lexeme);
                ident
            }

            Expr::Call {
                callee, arguments, ..
            } => self.emit_call(callee, arguments),

            Expr::Get { object, name } => {
                let instance = self.emit_instance_ptr(object);
                format!("{}->get(\"{}\")", instance, name.lexeme)
            }

            Expr::Set {
                object,
                name,
                value,
            } => {
                let instance = self.emit_instance_ptr(object);
                let rendered = self.emit_operand(value);
                self.line(format!("{}->set(\"{}\", {});", instance, name.lexeme, rendered));
                rendered
            }

            Expr::This { .. } => match self.lookup("this") {
                Some(binding) => binding.ident,
                None => "args[0]".to_string(),
            },

            Expr::Super { method, .. } => self.emit_super(method),
        }
    }

    fn emit_call(&mut self, callee: &Expr, arguments: &[Expr]) -> String {
        match callee {
            Expr::Get { object, name } => {
                let instance = self.emit_instance_ptr(object);
                let args = self.emit_arguments(arguments);
                format!(
                    "call_method({}, \"{}\", {{{}}})",
                    instance,
                    name.lexeme,
                    args.join(", ")
                )
            }
            Expr::Super { method, .. } => {
                let bound = self.emit_super(method);
                let args = self.emit_arguments(arguments);
                format!("call_value({}, {{{}}})", bound, args.join(", "))
            }
            Expr::Variable { name, .. } => {
                // a known class constructs directly through its handle
                let class_ident = self
                    .lookup(&name.lexeme)
                    .and_then(|binding| binding.class_ident);
                if let Some(class_ident) = class_ident {
                    let args = self.emit_arguments(arguments);
                    return format!("{}->call({{{}}})", class_ident, args.join(", "));
                }
                let rendered = self.emit_operand(callee);
                let args = self.emit_arguments(arguments);
                format!("call_value({}, {{{}}})", rendered, args.join(", "))
            }
            _ => {
                let rendered = self.emit_operand(callee);
                let args = self.emit_arguments(arguments);
                format!("call_value({}, {{{}}})", rendered, args.join(", "))
            }
        }
    }

    fn emit_super(&mut self, method: &Token) -> String {
        debug_assert!(self.class_context == ClassContext::Subclass);
        let superclass = self
            .superclass_ident
            .clone()
            .unwrap_or_else(|| "nullptr".to_string());
        let this_ident = match self.lookup("this") {
            Some(binding) => binding.ident,
            None => "args[0]".to_string(),
        };
        format!(
            "super_method({}, {}, \"{}\")",
            superclass, this_ident, method.lexeme
        )
    }

    /// Arguments are lifted one by one, so their side effects happen
    /// left to right before the call itself.
    fn emit_arguments(&mut self, arguments: &[Expr]) -> Vec<String> {
        arguments
            .iter()
            .map(|argument| self.emit_operand(argument))
            .collect()
    }

    /// Render a subexpression, lifting it into a named temporary when it
    /// carries side effects, so surrounding C++ cannot reorder it.
    fn emit_operand(&mut self, expression: &Expr) -> String {
        let rendered = self.emit_expr(expression);
        if has_effect(expression) && !is_bare_identifier(&rendered) {
            let tmp = self.fresh("tmp");
            self.line(format!("Value {} = {};", tmp, rendered));
            tmp
        } else {
            rendered
        }
    }

    /// Lift an arbitrary object expression to an instance pointer,
    /// reusing the INSTANCE alias when the object is a variable that has
    /// one.
    fn emit_instance_ptr(&mut self, object: &Expr) -> String {
        let alias = match object {
            Expr::Variable { name, .. } => self
                .lookup(&name.lexeme)
                .and_then(|binding| binding.inst_alias),
            Expr::This { .. } => self.lookup("this").and_then(|binding| binding.inst_alias),
            _ => None,
        };
        if let Some(alias) = alias {
            return alias;
        }

        let rendered = self.emit_expr(object);
        let tmp = self.fresh("tmp");
        self.line(format!("auto {} = instance_of({});", tmp, rendered));
        tmp
    }
}

/// The source line a statement's diagnostics should report, taken from
/// the nearest token the statement carries.
fn stmt_line(statement: &Stmt) -> Option<usize> {
    match statement {
        Stmt::Expression { expression } | Stmt::Print { expression } => expr_line(expression),
        Stmt::Var { name, .. } => Some(name.line),
        Stmt::If { condition, .. } | Stmt::While { condition, .. } => expr_line(condition),
        Stmt::Function(declaration) => Some(declaration.name.line),
        Stmt::Return { keyword, .. } => Some(keyword.line),
        Stmt::Class { name, .. } => Some(name.line),
        // a block's children carry their own lines
        Stmt::Block { .. } => None,
    }
}

fn expr_line(expression: &Expr) -> Option<usize> {
    match expression {
        Expr::Binary { operator, .. }
        | Expr::Logical { operator, .. }
        | Expr::Unary { operator, .. } => Some(operator.line),
        Expr::Call { paren, .. } => Some(paren.line),
        Expr::Get { name, .. }
        | Expr::Set { name, .. }
        | Expr::Variable { name, .. }
        | Expr::Assign { name, .. } => Some(name.line),
        Expr::This { keyword, .. } | Expr::Super { keyword, .. } => Some(keyword.line),
        Expr::Grouping { expression } => expr_line(expression),
        Expr::Number(_) | Expr::String(_) | Expr::Boolean(_) | Expr::Nil => None,
    }
}

fn has_effect(expression: &Expr) -> bool {
    match expression {
        Expr::Call { .. }
        | Expr::Assign { .. }
        | Expr::Set { .. }
        | Expr::Get { .. }
        | Expr::Super { .. } => true,
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            has_effect(left) || has_effect(right)
        }
        Expr::Unary { right, .. } => has_effect(right),
        Expr::Grouping { expression } => has_effect(expression),
        _ => false,
    }
}

fn is_bare_identifier(rendered: &str) -> bool {
    !rendered.is_empty()
        && rendered
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '[' || ch == ']')
}

fn cpp_string_literal(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(ch),
        }
    }
    format!("std::string(\"{}\")", escaped)
}

/// Translate a resolved program into a C++ translation unit against the
/// runtime in `runtime/`. The caller is responsible for gating on
/// front-end errors first.
pub fn emit(statements: &[Stmt]) -> String {
    debug!("emitting {} top-level statement(s)", statements.len());

    let mut emitter = Emitter::new();
    emitter.line("#include \"klox_runtime.h\"");
    emitter.line("");
    emitter.line("#include <iostream>");
    emitter.line("");
    emitter.line("int main() {");
    emitter.indent += 1;
    emitter.line("try {");
    emitter.indent += 1;

    let clock = emitter.fresh("clock");
    emitter.line(format!("Value {} = make_clock();", clock));
    emitter.bind("clock", Binding::value(clock));

    for statement in statements {
        emitter.emit_statement(statement);
    }

    emitter.indent -= 1;
    emitter.line("} catch (const std::runtime_error &err) {");
    emitter.indent += 1;
    emitter.line(
        "std::cerr << \"[line \" << klox_line << \"] Runtime Error: \" << err.what() << std::endl;",
    );
    emitter.line("return 70;");
    emitter.indent -= 1;
    emitter.line("}");
    emitter.line("return 0;");
    emitter.indent -= 1;
    emitter.line("}");
    emitter.out
}
