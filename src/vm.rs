use std::io::{BufRead, Write};
use std::rc::Rc;

use crate::chunk::BytecodeChunk;
use crate::compiler::Compiler;
use crate::error::{Error, RuntimeError};
use crate::func::Function;
use crate::op::Op;
use crate::value::Value;

/// Host I/O handed to the VM at construction
pub struct VMConfig {
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}

impl VMConfig {
    pub fn new(input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        Self { input, output }
    }

    /// Stdin and stdout
    pub fn basic() -> Self {
        Self::new(
            Box::new(std::io::BufReader::new(std::io::stdin())),
            Box::new(std::io::stdout()),
        )
    }

    /// Read one line from the configured input, without the newline
    pub fn read_line(&mut self) -> std::io::Result<String> {
        let mut line = String::new();
        self.input.read_line(&mut line)?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Write a newline-terminated line to the configured output
    pub fn write_line(&mut self, s: &str) -> std::io::Result<()> {
        writeln!(self.output, "{}", s)?;
        self.output.flush()
    }
}

impl Default for VMConfig {
    fn default() -> Self {
        Self::basic()
    }
}

/// An active function invocation
struct CallFrame {
    /// Where to resume once the function returns
    return_ip: usize,
    /// Stack index of the function's first argument; local slots are
    /// addressed relative to this
    base: usize,
    #[allow(dead_code)]
    function: Rc<Function>,
}

pub struct VM {
    config: VMConfig,
    chunk: BytecodeChunk,
    ip: usize,
    frames: Vec<CallFrame>,
}

impl VM {
    pub fn new(config: VMConfig) -> Self {
        Self {
            config,
            chunk: BytecodeChunk::new(),
            ip: 0,
            frames: Vec::new(),
        }
    }

    /// Compile and execute a script
    ///
    /// The chunk is reset first, so scripts run back to back on one VM share
    /// nothing but their globals. After a runtime error the operand stack,
    /// frames and instruction pointer are reset; globals are preserved.
    pub fn run_script(&mut self, source: &str) -> Result<(), Error> {
        self.chunk.prepare();
        self.frames.clear();
        self.ip = 0;

        Compiler::compile(source, &mut self.chunk)?;

        #[cfg(feature = "debug_trace")]
        println!("{}", self.chunk);

        self.run().map_err(|e| {
            self.chunk.clear_stack();
            self.frames.clear();
            self.ip = 0;
            Error::Runtime(e)
        })
    }

    /// Set a global, visible to scripts as a variable
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.chunk.set_global(name, value);
    }

    /// Read a global back out of the VM
    pub fn get_var(&self, name: &str) -> Option<Value> {
        self.chunk.find_global(name).cloned()
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        while let Some(op) = self.chunk.op_at(self.ip) {
            #[cfg(feature = "debug_trace")]
            {
                println!("        | {}", self.chunk.render_stack());
                println!("{:04} {}", self.ip, op);
            }

            let index = self.ip;
            match self.step(op) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return Err(e.with_line(self.chunk.line_at(index))),
            }
        }

        Ok(())
    }

    /// Execute one instruction, leaving `ip` on the next one
    ///
    /// Returns false when the chunk has ended. Jump operands are relative to
    /// the jump instruction's own index.
    fn step(&mut self, op: Op) -> Result<bool, RuntimeError> {
        match op {
            Op::NoOp => {}
            Op::Constant(index) => {
                let v = self.constant_at(index)?;
                self.chunk.push_stack(v);
            }
            Op::Nil => self.chunk.push_stack(Value::Nil),
            Op::True => self.chunk.push_stack(Value::Bool(true)),
            Op::False => self.chunk.push_stack(Value::Bool(false)),
            Op::Pop => {
                self.chunk.pop_stack();
            }
            Op::PopN(n) => self.chunk.pop_stack_n(n),
            Op::LookupLocal(slot) => {
                let v = self.chunk.index_stack(self.frame_base() + slot).clone();
                self.chunk.push_stack(v);
            }
            Op::AssignLocal(slot) => {
                let v = self.chunk.peek_stack(0).clone();
                let index = self.frame_base() + slot;
                *self.chunk.index_stack_mut(index) = v;
            }
            Op::LookupGlobal(index) => {
                let name = self.constant_name(index)?;
                let v = self
                    .chunk
                    .find_global(&name)
                    .cloned()
                    .ok_or_else(|| undefined_variable(&name))?;
                self.chunk.push_stack(v);
            }
            Op::DefineGlobal(index) => {
                let name = self.constant_name(index)?;
                let v = self.chunk.pop_stack();
                self.chunk.set_global(name, v);
            }
            Op::AssignGlobal(index) => {
                let name = self.constant_name(index)?;
                let v = self.chunk.peek_stack(0).clone();
                if !self.chunk.assign_global(&name, v) {
                    return Err(undefined_variable(&name));
                }
            }
            Op::Equal => {
                let b = self.chunk.pop_stack();
                let a = self.chunk.pop_stack();
                self.chunk.push_stack(Value::Bool(a == b));
            }
            Op::NotEqual => {
                let b = self.chunk.pop_stack();
                let a = self.chunk.pop_stack();
                self.chunk.push_stack(Value::Bool(a != b));
            }
            Op::Greater => self.binary_op(Value::gt)?,
            Op::GreaterEqual => self.binary_op(Value::ge)?,
            Op::Less => self.binary_op(Value::lt)?,
            Op::LessEqual => self.binary_op(Value::le)?,
            Op::Check => {
                let guard = self.chunk.pop_stack();
                let matched = *self.chunk.peek_stack(0) == guard;
                self.chunk.push_stack(Value::Bool(matched));
            }
            Op::Add => self.binary_op(Value::add)?,
            Op::Sub => self.binary_op(Value::sub)?,
            Op::Mul => self.binary_op(Value::mul)?,
            Op::Div => self.binary_op(Value::div)?,
            Op::Mod => self.binary_op(Value::rem)?,
            Op::Not => {
                let v = self.chunk.pop_stack();
                self.chunk.push_stack(v.not());
            }
            Op::Negate => {
                let v = self.chunk.pop_stack();
                self.chunk.push_stack(v.negate()?);
            }
            Op::Print => {
                let v = self.chunk.pop_stack();
                self.config
                    .write_line(&v.to_string())
                    .map_err(|e| RuntimeError::new(format!("could not write output: {}", e)))?;
            }
            Op::Swap => {
                let a = self.chunk.pop_stack();
                let b = self.chunk.pop_stack();
                self.chunk.push_stack(a);
                self.chunk.push_stack(b);
            }
            Op::Move(n) => self.chunk.move_down(n),
            Op::Jump(distance) => {
                self.ip += distance;
                return Ok(true);
            }
            Op::JumpIfFalse(distance) => {
                if !self.chunk.peek_stack(0).truthy() {
                    self.ip += distance;
                    return Ok(true);
                }
            }
            Op::Loop(distance) => {
                self.ip -= distance;
                return Ok(true);
            }
            Op::And(distance) => {
                if !self.chunk.peek_stack(0).truthy() {
                    self.ip += distance;
                    return Ok(true);
                }
                self.chunk.pop_stack();
            }
            Op::Or(distance) => {
                if self.chunk.peek_stack(0).truthy() {
                    self.ip += distance;
                    return Ok(true);
                }
                self.chunk.pop_stack();
            }
            Op::Call(arg_count) => {
                self.call_value(arg_count)?;
                return Ok(true);
            }
            Op::Return => {
                let frame = self
                    .frames
                    .pop()
                    .ok_or_else(|| RuntimeError::new("return outside of a function"))?;
                let result = self.chunk.pop_stack();
                self.chunk.truncate_stack(frame.base);
                // the callee still sits under the arguments
                self.chunk.pop_stack();
                self.chunk.push_stack(result);
                self.ip = frame.return_ip;
                return Ok(true);
            }
            Op::End => return Ok(false),
        }

        self.ip += 1;
        Ok(true)
    }

    /// Invoke the callable sitting under `arg_count` arguments
    ///
    /// Native calls complete here; script calls push a frame and leave `ip`
    /// at the function's entry.
    fn call_value(&mut self, arg_count: usize) -> Result<(), RuntimeError> {
        let callee = self.chunk.peek_stack(arg_count).clone();
        let function = callee.as_function().ok_or_else(|| {
            RuntimeError::new(format!(
                "can only call functions, not a {}",
                callee.type_desc()
            ))
        })?;

        if function.arity() != arg_count {
            return Err(RuntimeError::new(format!(
                "{} expects {} arguments but got {}",
                function.name(),
                function.arity(),
                arg_count
            )));
        }

        match &**function {
            Function::Native(native) => {
                let args = self.chunk.drain_top(arg_count);
                self.chunk.pop_stack();
                let result = native.call(args)?;
                self.chunk.push_stack(result);
                self.ip += 1;
            }
            Function::Script(script) => {
                self.frames.push(CallFrame {
                    return_ip: self.ip + 1,
                    base: self.chunk.stack_size() - arg_count,
                    function: Rc::clone(function),
                });
                self.ip = script.instruction_ptr;
            }
        }
        Ok(())
    }

    fn binary_op(
        &mut self,
        op: fn(&Value, &Value) -> Result<Value, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let rhs = self.chunk.pop_stack();
        let lhs = self.chunk.pop_stack();
        let result = op(&lhs, &rhs)?;
        self.chunk.push_stack(result);
        Ok(())
    }

    fn frame_base(&self) -> usize {
        self.frames.last().map(|f| f.base).unwrap_or(0)
    }

    fn constant_at(&self, index: usize) -> Result<Value, RuntimeError> {
        self.chunk
            .constant_at(index)
            .cloned()
            .ok_or_else(|| RuntimeError::new(format!("no constant at index {}", index)))
    }

    fn constant_name(&self, index: usize) -> Result<String, RuntimeError> {
        let v = self.constant_at(index)?;
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| RuntimeError::new(format!("constant {} is not an identifier", index)))
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new(VMConfig::basic())
    }
}

fn undefined_variable(name: &str) -> RuntimeError {
    RuntimeError::new(format!("undefined variable '{}'", name))
}
