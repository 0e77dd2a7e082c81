//! A small dynamically typed scripting language
//!
//! Source text goes through a hand-written scanner and a single-pass Pratt
//! compiler that emits bytecode straight into a [`chunk::BytecodeChunk`],
//! which a stack-based VM then executes against host-provided I/O.

pub mod chunk;
pub mod compiler;
pub mod error;
pub mod func;
pub mod op;
pub mod scanner;
pub mod shell;
pub mod token;
pub mod value;
pub mod vm;
