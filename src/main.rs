//! dvm CLI: compile syntax trees, run and disassemble bytecode modules.

use std::env;
use std::path::{Path, PathBuf};
use std::process;

use colored::Colorize;
use tracing_subscriber::EnvFilter;

use dialectvm::error::DialectError;
use dialectvm::vm::VmConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION", "0.4.0");

const EXIT_USAGE: i32 = 64;
const EXIT_DATA: i32 = 65;
const EXIT_SOFTWARE: i32 = 70;
const EXIT_IO: i32 = 74;

/// CLI command to execute.
enum Command {
    /// Compile a JSON syntax tree into a binary module
    Compile {
        input: String,
        output: Option<String>,
        name: Option<String>,
    },
    /// Run a binary module or a JSON syntax tree
    Run { file: String, config: VmConfig },
    /// Print a listing of every chunk
    Disasm { file: String },
    Help,
    Version,
}

fn print_usage() {
    eprintln!("dvm {} - Dialect bytecode VM", VERSION);
    eprintln!();
    eprintln!("Usage: dvm compile <tree.json> [-o out.mdbc] [--name NAME]");
    eprintln!("       dvm run <file.mdbc|tree.json> [--debug] [--max-depth N] [--max-stack N]");
    eprintln!("       dvm disasm <file.mdbc|tree.json>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  compile          Compile a syntax tree into a binary module");
    eprintln!("  run              Execute a module and print its result");
    eprintln!("  disasm           Print a bytecode listing");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -o, --output F   Output path for compile (default: input with .mdbc)");
    eprintln!("  --name NAME      Module name (default: input file stem)");
    eprintln!("  --debug          Trace VM state to stderr before each instruction");
    eprintln!("  --max-depth N    Maximum call depth (default: 1024)");
    eprintln!("  --max-stack N    Maximum operand stack size (default: 2048)");
    eprintln!("  --help, -h       Show this help message");
    eprintln!("  --version, -V    Show the version");
    eprintln!();
    eprintln!("Set RUST_LOG (e.g. RUST_LOG=debug) for library logs.");
}

fn usage_error(message: &str) -> ! {
    eprintln!("{} {}", "error:".red().bold(), message);
    eprintln!();
    print_usage();
    process::exit(EXIT_USAGE);
}

fn parse_args(args: &[String]) -> Command {
    let Some(first) = args.first() else {
        usage_error("missing command");
    };

    match first.as_str() {
        "-h" | "--help" | "help" => Command::Help,
        "-V" | "--version" => Command::Version,
        "compile" => {
            let mut input = None;
            let mut output = None;
            let mut name = None;
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "-o" | "--output" => {
                        i += 1;
                        output = Some(option_value(args, i, "-o"));
                    }
                    "--name" => {
                        i += 1;
                        name = Some(option_value(args, i, "--name"));
                    }
                    arg if arg.starts_with('-') => {
                        usage_error(&format!("unknown option for compile: {}", arg))
                    }
                    arg => set_once(&mut input, arg),
                }
                i += 1;
            }
            let Some(input) = input else {
                usage_error("compile requires an input file");
            };
            Command::Compile {
                input,
                output,
                name,
            }
        }
        "run" => {
            let mut file = None;
            let mut config = VmConfig::default();
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--debug" => config = config.with_debug(true),
                    "--max-depth" => {
                        i += 1;
                        config = config.with_max_call_depth(numeric_value(args, i, "--max-depth"));
                    }
                    "--max-stack" => {
                        i += 1;
                        config = config.with_max_stack_size(numeric_value(args, i, "--max-stack"));
                    }
                    arg if arg.starts_with('-') => {
                        usage_error(&format!("unknown option for run: {}", arg))
                    }
                    arg => set_once(&mut file, arg),
                }
                i += 1;
            }
            let Some(file) = file else {
                usage_error("run requires a module or tree file");
            };
            Command::Run { file, config }
        }
        "disasm" => match &args[1..] {
            [file] if !file.starts_with('-') => Command::Disasm { file: file.clone() },
            _ => usage_error("disasm takes exactly one file"),
        },
        other => usage_error(&format!("unknown command: {}", other)),
    }
}

fn option_value(args: &[String], i: usize, option: &str) -> String {
    match args.get(i) {
        Some(value) => value.clone(),
        None => usage_error(&format!("{} requires a value", option)),
    }
}

fn numeric_value(args: &[String], i: usize, option: &str) -> usize {
    let value = option_value(args, i, option);
    match value.parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => usage_error(&format!("{} expects a positive number, got '{}'", option, value)),
    }
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_some() {
        usage_error(&format!("unexpected argument: {}", value));
    }
    *slot = Some(value.to_string());
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_logging();
    let args: Vec<String> = env::args().skip(1).collect();

    let result = match parse_args(&args) {
        Command::Help => {
            print_usage();
            Ok(())
        }
        Command::Version => {
            println!("dvm {}", VERSION);
            Ok(())
        }
        Command::Compile {
            input,
            output,
            name,
        } => run_compile(&input, output.as_deref(), name.as_deref()),
        Command::Run { file, config } => run_module(&file, config),
        Command::Disasm { file } => run_disasm(&file),
    };

    if let Err(error) = result {
        eprintln!("{} {}", "error:".red().bold(), error);
        process::exit(exit_code(&error));
    }
}

fn exit_code(error: &DialectError) -> i32 {
    match error {
        DialectError::Compile(_) | DialectError::Serialization(_) | DialectError::Tree(_) => {
            EXIT_DATA
        }
        DialectError::Runtime(_) => EXIT_SOFTWARE,
        DialectError::Io(_) => EXIT_IO,
    }
}

fn run_compile(input: &str, output: Option<&str>, name: Option<&str>) -> Result<(), DialectError> {
    let input_path = Path::new(input);
    let json = std::fs::read_to_string(input_path)?;
    let name = match name {
        Some(name) => name.to_string(),
        None => input_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string()),
    };

    let module = dialectvm::compile_json(&json, &name)?;
    let output = output
        .map(PathBuf::from)
        .unwrap_or_else(|| input_path.with_extension("mdbc"));
    dialectvm::save(&module, &output)?;

    println!(
        "{} {} -> {} ({} bytes of code, {} function(s))",
        "compiled".green().bold(),
        input,
        output.display(),
        module.total_size(),
        module.functions.len()
    );
    Ok(())
}

fn run_module(file: &str, config: VmConfig) -> Result<(), DialectError> {
    let module = dialectvm::load(file)?;
    let value = dialectvm::run_with_config(&module, config)?;
    if !value.is_empty() {
        println!("{}", value);
    }
    Ok(())
}

fn run_disasm(file: &str) -> Result<(), DialectError> {
    let module = dialectvm::load(file)?;
    print!("{}", dialectvm::disassemble(&module));
    Ok(())
}
