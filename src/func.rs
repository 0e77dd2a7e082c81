use std::rc::Rc;

use crate::error::RuntimeError;
use crate::value::Value;

/// A callable value, shared between the constant pool and the stack
#[derive(Debug)]
pub enum Function {
    Script(ScriptFunction),
    Native(NativeFunction),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Script(f) => &f.name,
            Function::Native(f) => &f.name,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Function::Script(f) => f.arity,
            Function::Native(f) => f.arity,
        }
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Function::Script(func) => write!(f, "<fn {}>", func.name),
            Function::Native(func) => write!(f, "<native fn {}>", func.name),
        }
    }
}

/// A function compiled from script source
///
/// The body lives inline in the chunk; calling it jumps to the recorded
/// entry instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFunction {
    pub name: String,
    pub arity: usize,
    /// Index of the first instruction of the body
    pub instruction_ptr: usize,
}

impl ScriptFunction {
    pub fn new(name: impl Into<String>, arity: usize, instruction_ptr: usize) -> Rc<Function> {
        Rc::new(Function::Script(ScriptFunction {
            name: name.into(),
            arity,
            instruction_ptr,
        }))
    }
}

/// A callable installed by the host
pub struct NativeFunction {
    pub name: String,
    pub arity: usize,
    callable: Box<dyn Fn(Vec<Value>) -> Result<Value, RuntimeError>>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        arity: usize,
        callable: impl Fn(Vec<Value>) -> Result<Value, RuntimeError> + 'static,
    ) -> Rc<Function> {
        Rc::new(Function::Native(NativeFunction {
            name: name.into(),
            arity,
            callable: Box::new(callable),
        }))
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Value, RuntimeError> {
        (self.callable)(args)
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}
