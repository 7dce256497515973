//! Script runner for the chainvm virtual machine.
//!
//! Loads a script, registers any extra contexts, runs it and prints the
//! evaluation stack left behind.
//!
//! # Usage
//! ```text
//! chainvm <script> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `script`: assembly source, or a `.bin` file written by `assembler`
//!
//! # Options
//! - `--trace`: log every dispatched instruction
//! - `--registers <n>`: registers per frame (defaults to 32; scripts with
//!   public methods need at least 32 for their dispatcher)
//! - `--ctx <name=path>`: register another script as a context (repeatable)
//! - `--method <name>`: enter the script at a public method instead of offset 0
//! - `--push <literal>`: push an argument before running (repeatable, in order)
//!
//! Set `CHAINVM_LOG_TIMESTAMPS=0` to drop timestamps from log lines.

use chainvm::utils::log::{SHOW_DEBUG, SHOW_TIMESTAMP};
use chainvm::virtual_machine::assembler::{assemble_file, parse_literal};
use chainvm::virtual_machine::context::ContextRegistry;
use chainvm::virtual_machine::errors::VMError;
use chainvm::virtual_machine::interop::InteropTable;
use chainvm::virtual_machine::script::Script;
use chainvm::virtual_machine::value::Value;
use chainvm::virtual_machine::vm::{ExecutionState, VM, VmConfig};
use chainvm::{error, info};
use std::env;
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    if env::var("CHAINVM_LOG_TIMESTAMPS").is_ok_and(|v| v == "0") {
        SHOW_TIMESTAMP.store(false, Ordering::Relaxed);
    }

    let script_path = &args[1];
    let mut config = VmConfig::default();
    let mut extra_contexts: Vec<(String, String)> = Vec::new();
    let mut method: Option<String> = None;
    let mut arguments: Vec<Value> = Vec::new();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--trace" => {
                config.trace = true;
                SHOW_DEBUG.store(true, Ordering::Relaxed);
                i += 1;
            }
            k @ ("--registers" | "--ctx" | "--method" | "--push") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                let value = &args[i];
                match k {
                    "--registers" => match value.parse::<usize>() {
                        Ok(n) if (1..=256).contains(&n) => config.register_count = n,
                        _ => {
                            error!("Invalid register count: '{value}' (expected 1..=256)");
                            process::exit(1);
                        }
                    },
                    "--ctx" => match value.split_once('=') {
                        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
                            extra_contexts.push((name.to_string(), path.to_string()));
                        }
                        _ => {
                            error!("Invalid context: '{value}' (expected name=path)");
                            process::exit(1);
                        }
                    },
                    "--method" => method = Some(value.clone()),
                    _ => match parse_literal(value) {
                        Ok(literal) => arguments.push(literal.into_value()),
                        Err(e) => {
                            error!("Invalid argument literal: {e}");
                            process::exit(1);
                        }
                    },
                }
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let mut contexts = ContextRegistry::new();
    for (name, path) in &extra_contexts {
        let script = load_script(path).unwrap_or_else(|e| {
            error!("Failed to load context '{name}' from {path}: {e}");
            process::exit(1);
        });
        if let Err(e) = contexts.register(name.as_str(), script) {
            error!("{e}");
            process::exit(1);
        }
    }

    let script = load_script(script_path).unwrap_or_else(|e| {
        error!("Failed to load {script_path}: {e}");
        process::exit(1);
    });
    let entry_name = Path::new(script_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string());
    let entry = contexts.register(entry_name, script).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(1);
    });

    let interops = runtime_interops().unwrap_or_else(|e| {
        error!("{e}");
        process::exit(1);
    });

    let mut vm = VM::new(entry, Arc::new(contexts), Arc::new(interops), config);
    for argument in arguments {
        if let Err(e) = vm.push(argument) {
            error!("{e}");
            process::exit(1);
        }
    }

    let result = match &method {
        Some(name) => vm.invoke(name),
        None => vm.execute(),
    };

    if let Err(e) = result {
        match e.user_message() {
            Some(message) => error!("Script threw: {message}"),
            None => error!("Execution failed: {e}"),
        }
        if let Some(site) = vm.fault_site() {
            error!("  at {site}");
        }
        process::exit(1);
    }

    info!(
        "{} halted with {} value(s) on the stack",
        vm.current_context().name(),
        vm.stack().len()
    );
    for (depth, value) in vm.stack().iter().rev().enumerate() {
        println!("{depth:>3}: {value} ({})", value.type_name());
    }
}

/// Reads a serialized script or assembles a source file.
fn load_script(path: &str) -> Result<Script, VMError> {
    if Path::new(path).extension().is_some_and(|ext| ext == "bin") {
        let bytes = fs::read(path).map_err(|e| VMError::IoError {
            message: format!("{path}: {e}"),
        })?;
        Script::from_bytes(&bytes)
    } else {
        assemble_file(path)
    }
}

/// Host functions available to scripts run from the command line.
fn runtime_interops() -> Result<InteropTable, VMError> {
    let mut interops = InteropTable::new();
    interops.register("Runtime.Log", |vm: &mut VM| {
        let value = vm.pop()?;
        info!("{} says: {value}", vm.current_context().name());
        Ok(ExecutionState::Running)
    })?;
    interops.register("Runtime.Abort", |_: &mut VM| Ok(ExecutionState::Fault))?;
    Ok(interops)
}

const USAGE: &str = "\
Smart Contract VM

USAGE:
    {program} <script> [OPTIONS]

ARGS:
    <script>    Assembly source, or a .bin script written by the assembler

OPTIONS:
    --trace                Log every dispatched instruction
    --registers <n>        Registers per frame (defaults to 32)
                           Scripts with public methods need at least 32
    --ctx <name=path>      Register another script as a context (repeatable)
    --method <name>        Enter the script at a public method
    --push <literal>       Push an argument before running (repeatable)
    -h, --help             Print this help message

ENVIRONMENT:
    CHAINVM_LOG_TIMESTAMPS=0    Omit timestamps from log lines

EXAMPLES:
    # Run a script from offset 0
    {program} token.asm

    # Call a public method with two arguments
    {program} token.asm --method transfer --push \"\\\"alice\\\"\" --push 10

    # Switch into another context from the entry script
    {program} wallet.asm --ctx token=token.bin --trace
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
