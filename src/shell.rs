use std::{io::Write, process::exit};

use clap::Parser;

use crate::error::Error;
use crate::vm::VM;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct CliArgs {
    /// Script file to run; without one a REPL starts
    file: Option<String>,
}

pub fn cli() {
    let args = CliArgs::parse();

    if let Some(f) = args.file {
        run_file(f.as_str());
    } else {
        repl();
    }
}

fn report(e: &Error) -> i32 {
    eprintln!("{}", e);
    match e {
        Error::Compile(_) => 65,
        Error::Runtime(_) => 70,
    }
}

pub fn repl() {
    let mut vm = VM::default();
    loop {
        let mut line = String::new();
        print!("> ");
        std::io::stdout().flush().expect("Could not flush");

        std::io::stdin()
            .read_line(&mut line)
            .expect("Could not read line from stdin");

        // Exit when pressing <C-d>
        if line.is_empty() {
            println!();
            return;
        }

        // the REPL keeps going after errors; globals survive
        if let Err(e) = vm.run_script(line.as_str()) {
            report(&e);
        }
    }
}

pub fn run_file(path: &str) {
    let mut vm = VM::default();
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("could not read {}: {}", path, e);
            exit(74);
        }
    };

    if let Err(e) = vm.run_script(&source) {
        exit(report(&e));
    }
}
