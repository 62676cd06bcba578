//! The `langvm` CLI: lex, parse, type-check, or run a source file.
//!
//! Hand-rolled argument parsing, no `clap` — a single positional source
//! path plus one optional stage flag, following the teacher's preference
//! for a minimal CLI surface over a flag-parsing dependency for a handful
//! of flags.

use langvm::front::lexer;
use langvm::front::parser;
use langvm::front::semantic;
use langvm::opt::{constant_fold, dce};
use langvm::vm::Vm;
use std::env;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Lex,
    Parse,
    Semantic,
    Run,
}

const USAGE: &str = "usage: langvm [--lex|--parse|--semantic|--run] <source.lang>";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut stage = Stage::Run;
    let mut path = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                println!("{USAGE}");
                return ExitCode::SUCCESS;
            }
            "--lex" => stage = Stage::Lex,
            "--parse" => stage = Stage::Parse,
            "--semantic" => stage = Stage::Semantic,
            "--run" => stage = Stage::Run,
            other if path.is_none() => path = Some(other.to_string()),
            other => {
                eprintln!("unrecognized argument: {other}\n{USAGE}");
                return ExitCode::FAILURE;
            }
        }
    }

    let Some(path) = path else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let source = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot read {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    run_stage(stage, &source)
}

fn run_stage(stage: Stage, source: &str) -> ExitCode {
    let tokens = match lexer::lex(source) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Lexer Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if stage == Stage::Lex {
        for t in &tokens {
            println!("{:?}", t.token);
        }
        return ExitCode::SUCCESS;
    }

    let program = match parser::parse(&tokens) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Parse Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if stage == Stage::Parse {
        println!("{program:#?}");
        return ExitCode::SUCCESS;
    }

    if let Err(e) = semantic::analyze(&program) {
        eprintln!("Semantic Error: {e}");
        return ExitCode::FAILURE;
    }
    if stage == Stage::Semantic {
        println!("ok");
        return ExitCode::SUCCESS;
    }

    let program = dce::eliminate_dead_code(constant_fold::fold_program(program));
    let module = match langvm::codegen_ast::generate(&program) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Codegen Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::new(Arc::new(module));
    let result = vm.run();
    if result.is_success() {
        ExitCode::SUCCESS
    } else {
        eprintln!("VM Error: {}", result.kind_name());
        ExitCode::FAILURE
    }
}
