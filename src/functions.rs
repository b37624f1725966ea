use crate::callable::Callable;
use crate::environment::Environment;
use crate::error::{LoxError, Result};
use crate::interpreter::Interpreter;
use crate::statement::FunctionDecl;
use crate::value::Value;

use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

/// A user function: the shared declaration plus the environment it
/// closed over. Bound methods are ordinary `LoxFunction`s whose closure
/// starts with a frame holding `this`.
pub struct LoxFunction {
    declaration: Rc<FunctionDecl>,
    closure: Rc<RefCell<Environment>>,
    is_initializer: bool,
}

impl LoxFunction {
    pub fn new(
        declaration: Rc<FunctionDecl>,
        closure: Rc<RefCell<Environment>>,
        is_initializer: bool,
    ) -> Self {
        LoxFunction {
            declaration,
            closure,
            is_initializer,
        }
    }

    /// Produce the bound-method form: same declaration, closure wrapped
    /// in a frame that defines `this`.
    pub fn bind(&self, instance: Value) -> Self {
        let mut environment = Environment::with_enclosing(self.closure.clone());
        environment.define("this", instance);
        Self {
            declaration: self.declaration.clone(),
            closure: Rc::new(RefCell::new(environment)),
            is_initializer: self.is_initializer,
        }
    }

    fn bound_this(&self) -> Result<Value> {
        self.closure.borrow().get_at(0, "this").ok_or_else(|| {
            LoxError::runtime(self.declaration.name.line, "Initializer lost its instance.")
        })
    }
}

impl Callable for LoxFunction {
    fn arity(&self) -> usize {
        self.declaration.parameters.len()
    }

    fn call(&self, interpreter: &mut Interpreter<'_>, arguments: &[Value]) -> Result<Value> {
        let mut environment = Environment::with_enclosing(self.closure.clone());
        for (parameter, argument) in self.declaration.parameters.iter().zip(arguments.iter()) {
            environment.define(&parameter.lexeme, argument.clone());
        }

        let result =
            interpreter.execute_block(&self.declaration.body, Rc::new(RefCell::new(environment)));

        match result {
            Ok(()) => {
                if self.is_initializer {
                    self.bound_this()
                } else {
                    Ok(Value::Nil)
                }
            }
            // a `return` anywhere in the body unwinds to exactly here
            Err(LoxError::Return(value)) => {
                if self.is_initializer {
                    self.bound_this()
                } else {
                    Ok(value)
                }
            }
            Err(error) => Err(error),
        }
    }

    fn display(&self) -> String {
        format!("<fn {}>", self.declaration.name.lexeme)
    }
}

impl Debug for LoxFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LoxFunction {{ name: {:?}, arity: {} }}",
            self.declaration.name.lexeme,
            self.arity()
        )
    }
}
