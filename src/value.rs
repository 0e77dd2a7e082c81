//! The values in the skiff VM
//!
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::func::{Function, NativeFunction};

#[derive(Clone, Debug)]
/// A basic value
pub enum Value {
    /// The nil value
    Nil,
    /// A boolean value
    Bool(bool),
    /// A number value
    Number(f64),
    /// An owned immutable string
    String(String),
    /// A script or native function (reference counted)
    Function(Rc<Function>),
    /// An opaque instruction or stack marker used during calls
    Address(usize),
}

impl Value {
    /// The type name of the value
    pub fn type_desc(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            Value::Address(_) => "address",
        }
    }

    /// Wrap a host callable as a function value
    pub fn native(
        name: impl Into<String>,
        arity: usize,
        callable: impl Fn(Vec<Value>) -> Result<Value, RuntimeError> + 'static,
    ) -> Self {
        Value::Function(NativeFunction::new(name, arity, callable))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Rc<Function>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Everything is truthy except `nil` and `false`
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// The `!` operation
    pub fn not(&self) -> Value {
        Value::Bool(!self.truthy())
    }

    /// The unary `-` operation
    pub fn negate(&self) -> Result<Value, RuntimeError> {
        match self {
            Value::Number(n) => Ok(Value::Number(-n)),
            v => Err(RuntimeError::new(format!(
                "cannot negate a {}",
                v.type_desc()
            ))),
        }
    }

    /// The `+` operation
    ///
    /// Numbers add; when either side is a string the other side is rendered
    /// and the two concatenate.
    pub fn add(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            (a, b) => Err(RuntimeError::new(format!(
                "cannot add a {} and a {}",
                a.type_desc(),
                b.type_desc()
            ))),
        }
    }

    /// The binary `-` operation
    pub fn sub(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
            (a, b) => Err(RuntimeError::new(format!(
                "cannot subtract a {} from a {}",
                b.type_desc(),
                a.type_desc()
            ))),
        }
    }

    /// The `*` operation
    pub fn mul(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
            (a, b) => Err(RuntimeError::new(format!(
                "cannot multiply a {} and a {}",
                a.type_desc(),
                b.type_desc()
            ))),
        }
    }

    /// The `/` operation
    pub fn div(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Number(_), Value::Number(b)) if *b == 0. => {
                Err(RuntimeError::new("division by zero"))
            }
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),
            (a, b) => Err(RuntimeError::new(format!(
                "cannot divide a {} by a {}",
                a.type_desc(),
                b.type_desc()
            ))),
        }
    }

    /// The `%` operation
    pub fn rem(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Number(_), Value::Number(b)) if *b == 0. => {
                Err(RuntimeError::new("division by zero"))
            }
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a % b)),
            (a, b) => Err(RuntimeError::new(format!(
                "cannot take the remainder of a {} and a {}",
                a.type_desc(),
                b.type_desc()
            ))),
        }
    }

    /// The `>` comparison, defined on two numbers or two strings
    ///
    /// Number comparisons follow IEEE-754, so anything involving NaN is
    /// false rather than an error.
    pub fn gt(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a > b)),
            (Value::String(a), Value::String(b)) => Ok(Value::Bool(a > b)),
            (a, b) => Err(compare_error(a, b)),
        }
    }

    /// The `>=` comparison
    pub fn ge(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a >= b)),
            (Value::String(a), Value::String(b)) => Ok(Value::Bool(a >= b)),
            (a, b) => Err(compare_error(a, b)),
        }
    }

    /// The `<` comparison
    pub fn lt(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a < b)),
            (Value::String(a), Value::String(b)) => Ok(Value::Bool(a < b)),
            (a, b) => Err(compare_error(a, b)),
        }
    }

    /// The `<=` comparison
    pub fn le(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a <= b)),
            (Value::String(a), Value::String(b)) => Ok(Value::Bool(a <= b)),
            (a, b) => Err(compare_error(a, b)),
        }
    }
}

fn compare_error(a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::new(format!(
        "cannot compare a {} and a {}",
        a.type_desc(),
        b.type_desc()
    ))
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Address(a), Value::Address(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Rc<Function>> for Value {
    fn from(f: Rc<Function>) -> Self {
        Value::Function(f)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => {
                if *b {
                    write!(f, "true")
                } else {
                    write!(f, "false")
                }
            }
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Function(func) => write!(f, "{}", func),
            Value::Address(a) => write!(f, "<address {}>", a),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Value;

    #[test]
    fn to_string() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Number(1.2345).to_string(), "1.2345");
        assert_eq!(Value::Number(5.).to_string(), "5");
        assert_eq!(Value::from("string").to_string(), "string");
    }

    #[test]
    fn negate() {
        assert_eq!(Value::Number(1.).negate().unwrap(), Value::Number(-1.));
        assert!(Value::Nil.negate().is_err());
        assert!(Value::from("string").negate().is_err());
    }

    #[test]
    fn not_inverts_truthiness() {
        assert_eq!(Value::Nil.not(), Value::Bool(true));
        assert_eq!(Value::Bool(false).not(), Value::Bool(true));
        assert_eq!(Value::Number(0.).not(), Value::Bool(false));
        assert_eq!(Value::from("").not(), Value::Bool(false));
    }

    #[test]
    fn add_numbers() {
        let res = Value::Number(1.).add(&Value::Number(2.)).unwrap();
        assert_eq!(res, Value::Number(3.));
    }

    #[test]
    fn add_coerces_around_strings() {
        let a = Value::Number(1.2).add(&Value::from(" 2.3")).unwrap();
        assert_eq!(a, Value::from("1.2 2.3"));

        let b = Value::from("1.2 ").add(&Value::Number(2.3)).unwrap();
        assert_eq!(b, Value::from("1.2 2.3"));

        let c = Value::from("hello")
            .add(&Value::from(" "))
            .and_then(|v| v.add(&Value::from("world")))
            .unwrap();
        assert_eq!(c, Value::from("hello world"));
    }

    #[test]
    fn add_rejects_nil_and_numbers() {
        assert!(Value::Number(1.).add(&Value::Nil).is_err());
        assert!(Value::Nil.add(&Value::Number(1.)).is_err());
        assert!(Value::Bool(true).add(&Value::Number(1.)).is_err());
    }

    #[test]
    fn sub_is_numbers_only() {
        let res = Value::Number(1.).sub(&Value::Number(2.)).unwrap();
        assert_eq!(res, Value::Number(-1.));

        assert!(Value::Number(1.).sub(&Value::Nil).is_err());
        assert!(Value::Number(1.).sub(&Value::from("x")).is_err());
        assert!(Value::from("x").sub(&Value::Number(1.)).is_err());
    }

    #[test]
    fn div_and_mod_guard_against_zero() {
        assert_eq!(
            Value::Number(7.).div(&Value::Number(2.)).unwrap(),
            Value::Number(3.5)
        );
        assert_eq!(
            Value::Number(7.).rem(&Value::Number(2.)).unwrap(),
            Value::Number(1.)
        );

        let div = Value::Number(1.).div(&Value::Number(0.)).unwrap_err();
        assert_eq!(div.message, "division by zero");
        let rem = Value::Number(1.).rem(&Value::Number(0.)).unwrap_err();
        assert_eq!(rem.message, "division by zero");
    }

    #[test]
    fn equality_never_coerces() {
        assert_eq!(Value::Nil, Value::Nil);
        assert_ne!(Value::Nil, Value::Bool(false));
        assert_ne!(Value::Number(0.), Value::Bool(false));
        assert_ne!(Value::Number(1.), Value::from("1"));
        assert_eq!(Value::from("a"), Value::from("a"));
    }

    #[test]
    fn nan_is_not_equal_to_itself() {
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn ordering_on_numbers_and_strings() {
        assert_eq!(
            Value::Number(1.).lt(&Value::Number(2.)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::from("abc").lt(&Value::from("abd")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::from("b").ge(&Value::from("b")).unwrap(),
            Value::Bool(true)
        );

        assert!(Value::Number(1.).lt(&Value::from("2")).is_err());
        assert!(Value::Nil.gt(&Value::Nil).is_err());
    }

    #[test]
    fn ordering_against_nan_is_false_not_an_error() {
        let nan = Value::Number(f64::NAN);
        let one = Value::Number(1.);

        assert_eq!(nan.lt(&one).unwrap(), Value::Bool(false));
        assert_eq!(nan.le(&one).unwrap(), Value::Bool(false));
        assert_eq!(nan.gt(&one).unwrap(), Value::Bool(false));
        assert_eq!(nan.ge(&one).unwrap(), Value::Bool(false));
        assert_eq!(one.lt(&nan).unwrap(), Value::Bool(false));
        assert_eq!(nan.ge(&nan).unwrap(), Value::Bool(false));
    }
}
