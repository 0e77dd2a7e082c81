//! The two error kinds of the language
//!
//! Compile-time errors come out of the scanner and the parser and point at a
//! source position. Runtime errors come out of the VM and the value
//! operations; they carry the source line when the VM can recover it from the
//! chunk's line table.

/// An error raised while scanning or parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiletimeError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl CompiletimeError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CompiletimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} -> {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for CompiletimeError {}

/// An error raised while interpreting a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub line: Option<usize>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    /// Attach the source line, keeping an earlier one if already set
    pub fn with_line(mut self, line: usize) -> Self {
        self.line.get_or_insert(line);
        self
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "[line {}] {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Either error kind, as surfaced by [`crate::vm::VM::run_script`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Compile(CompiletimeError),
    Runtime(RuntimeError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Compile(e) => write!(f, "{}", e),
            Error::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<CompiletimeError> for Error {
    fn from(e: CompiletimeError) -> Self {
        Error::Compile(e)
    }
}

impl From<RuntimeError> for Error {
    fn from(e: RuntimeError) -> Self {
        Error::Runtime(e)
    }
}
