use crate::error::{LoxError, Result};
use crate::token::Token;
use crate::value::Value;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A single binding frame. Frames chain outward through `enclosing`; a
/// frame may be shared by several closures and live activations, so the
/// chain is reference counted.
pub struct Environment {
    enclosing: Option<Rc<RefCell<Environment>>>,
    values: HashMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(environment: Rc<RefCell<Environment>>) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(environment),
        }
    }

    /// Unconditionally bind in this frame. Redefinition is allowed so a
    /// REPL session can shadow earlier inputs.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_owned(), value);
    }

    pub fn get(&self, name: &Token) -> Result<Value> {
        if let Some(value) = self.values.get(&name.lexeme) {
            Ok(value.clone())
        } else if let Some(enclosing) = self.enclosing.as_ref() {
            enclosing.borrow().get(name)
        } else {
            Err(undefined_variable(name))
        }
    }

    pub fn assign(&mut self, name: &Token, value: Value) -> Result<()> {
        if self.values.contains_key(&name.lexeme) {
            self.values.insert(name.lexeme.clone(), value);
            Ok(())
        } else if let Some(enclosing) = self.enclosing.as_ref() {
            enclosing.borrow_mut().assign(name, value)
        } else {
            Err(undefined_variable(name))
        }
    }

    /// Read from exactly the frame `depth` hops out. Never falls through
    /// to an enclosing frame: the resolver already proved where the
    /// binding lives.
    pub fn get_at(&self, depth: u64, name: &str) -> Option<Value> {
        if depth == 0 {
            self.values.get(name).cloned()
        } else {
            self.enclosing
                .as_ref()
                .and_then(|enclosing| enclosing.borrow().get_at(depth - 1, name))
        }
    }

    /// Write to exactly the frame `depth` hops out. Returns whether the
    /// binding existed there.
    pub fn assign_at(&mut self, depth: u64, name: &Token, value: Value) -> bool {
        if depth == 0 {
            if self.values.contains_key(&name.lexeme) {
                self.values.insert(name.lexeme.clone(), value);
                true
            } else {
                false
            }
        } else {
            match self.enclosing.as_ref() {
                Some(enclosing) => enclosing.borrow_mut().assign_at(depth - 1, name, value),
                None => false,
            }
        }
    }
}

fn undefined_variable(name: &Token) -> LoxError {
    LoxError::runtime(name.line, format!("Undefined variable '{}'.", name.lexeme))
}
