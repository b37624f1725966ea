use crate::statement::{Expr, FunctionDecl, Stmt};

/// Parenthesized, Lisp-flavored rendering of the AST, used by the
/// driver's `--print-ast` flag.
pub struct AstPrinter;

impl AstPrinter {
    pub fn print_program(&self, statements: &[Stmt]) -> String {
        statements
            .iter()
            .map(|statement| self.print_statement(statement))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn print_statement(&self, statement: &Stmt) -> String {
        match statement {
            Stmt::Expression { expression } => format!("(expr {})", self.print(expression)),
            Stmt::Print { expression } => format!("(print {})", self.print(expression)),
            Stmt::Var { name, initializer } => {
                format!("(var {} {})", name.lexeme, self.print(initializer))
            }
            Stmt::Block { statements } => format!("(block {})", self.print_program(statements)),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => match else_branch {
                Some(else_branch) => format!(
                    "(if {} {} {})",
                    self.print(condition),
                    self.print_statement(then_branch),
                    self.print_statement(else_branch)
                ),
                None => format!(
                    "(if {} {})",
                    self.print(condition),
                    self.print_statement(then_branch)
                ),
            },
            Stmt::While { condition, body } => format!(
                "(while {} {})",
                self.print(condition),
                self.print_statement(body)
            ),
            Stmt::Function(declaration) => self.print_function("fun", declaration),
            Stmt::Return { value, .. } => match value {
                Some(value) => format!("(return {})", self.print(value)),
                None => "(return)".to_string(),
            },
            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                let mut rendered = format!("(class {}", name.lexeme);
                if let Some(superclass) = superclass {
                    rendered.push_str(&format!(" < {}", self.print(superclass)));
                }
                for method in methods {
                    rendered.push(' ');
                    rendered.push_str(&self.print_function("method", method));
                }
                rendered.push(')');
                rendered
            }
        }
    }

    fn print_function(&self, kind: &str, declaration: &FunctionDecl) -> String {
        let parameters = declaration
            .parameters
            .iter()
            .map(|parameter| parameter.lexeme.clone())
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "({} {} ({}) {})",
            kind,
            declaration.name.lexeme,
            parameters,
            self.print_program(&declaration.body)
        )
    }

    pub fn print(&self, expression: &Expr) -> String {
        match expression {
            Expr::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{:.1}", n)
                } else {
                    format!("{}", n)
                }
            }
            Expr::String(s) => format!("\"{}\"", s),
            Expr::Boolean(b) => format!("{}", b),
            Expr::Nil => "nil".to_string(),
            Expr::Binary {
                left,
                operator,
                right,
            } => format!(
                "({} {} {})",
                operator.lexeme,
                self.print(left),
                self.print(right)
            ),
            Expr::Call {
                callee, arguments, ..
            } => {
                let mut rendered = format!("(call {}", self.print(callee));
                for argument in arguments {
                    rendered.push(' ');
                    rendered.push_str(&self.print(argument));
                }
                rendered.push(')');
                rendered
            }
            Expr::Get { object, name } => format!("(get {} {})", self.print(object), name.lexeme),
            Expr::Set {
                object,
                name,
                value,
            } => format!(
                "(set {} {} {})",
                self.print(object),
                name.lexeme,
                self.print(value)
            ),
            Expr::Grouping { expression } => format!("(group {})", self.print(expression)),
            Expr::Logical {
                left,
                operator,
                right,
            } => format!(
                "({} {} {})",
                operator.lexeme,
                self.print(left),
                self.print(right)
            ),
            Expr::Unary { operator, right } => {
                format!("({} {})", operator.lexeme, self.print(right))
            }
            Expr::Variable { name, .. } => name.lexeme.clone(),
            Expr::Assign { name, value, .. } => {
                format!("(= {} {})", name.lexeme, self.print(value))
            }
            Expr::This { .. } => "this".to_string(),
            Expr::Super { method, .. } => format!("(super {})", method.lexeme),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::AstPrinter;
    use crate::lexer;
    use crate::parser;

    #[test]
    fn renders_expressions_prefix_style() {
        let (tokens, _) = lexer::lex("print 1 + 2 * 3;");
        let (statements, errors) = parser::parse(&tokens);
        assert_eq!(errors.len(), 0);
        assert_eq!(
            AstPrinter.print_program(&statements),
            "(print (+ 1.0 (* 2.0 3.0)))"
        );
    }

    #[test]
    fn renders_classes_and_methods() {
        let (tokens, _) = lexer::lex("class B < A { greet(name) { print name; } }");
        let (statements, errors) = parser::parse(&tokens);
        assert_eq!(errors.len(), 0);
        assert_eq!(
            AstPrinter.print_program(&statements),
            "(class B < A (method greet (name) (print name)))"
        );
    }
}
