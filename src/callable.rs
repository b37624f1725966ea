use crate::error::Result;
use crate::interpreter::Interpreter;
use crate::value::Value;

use std::time::{SystemTime, UNIX_EPOCH};

/// Uniform call interface for function-like values. Classes act as
/// constructors and are dispatched by variant instead (see
/// `LoxClass::instantiate`).
pub trait Callable {
    fn arity(&self) -> usize;
    fn call(&self, interpreter: &mut Interpreter<'_>, arguments: &[Value]) -> Result<Value>;
    fn display(&self) -> String;
}

impl std::fmt::Debug for dyn Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// The single builtin: seconds since the Unix epoch.
pub struct Clock;

impl Callable for Clock {
    fn arity(&self) -> usize {
        0
    }

    fn call(&self, _: &mut Interpreter<'_>, _: &[Value]) -> Result<Value> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(Value::Number(now.as_secs_f64()))
    }

    fn display(&self) -> String {
        "<native fn>".to_string()
    }
}
