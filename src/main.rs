use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser as ClapParser, Subcommand};

use klox::ast_printer::AstPrinter;
use klox::emitter;
use klox::interpreter::Interpreter;
use klox::resolver::Depth;
use klox::statement::{ExprId, Stmt};
use klox::{lexer, parser, resolver, runtime};

use std::collections::HashMap;

const EXIT_USAGE: u8 = 64;
const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;

#[derive(ClapParser, Debug)]
#[command(version, about = "Interpreter and C++ transpiler for the Lox language", long_about = None, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Script to run (shorthand for `run` when the path ends in .lx)
    script: Option<PathBuf>,

    /// Pretty-print the resolved AST before running
    #[arg(long, global = true)]
    print_ast: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a script with the tree-walk evaluator
    Run { file: PathBuf },

    /// Start an interactive session
    Repl,

    /// Translate a script to C++ against the bundled runtime
    Compile {
        file: PathBuf,

        /// Target backend (only "cpp" is supported)
        #[arg(long, default_value = "cpp")]
        target: String,

        /// Where to write the generated C++ (defaults to the script name
        /// with a .cpp extension)
        #[arg(long)]
        cpp_file: Option<PathBuf>,

        /// Reserved: compiling the generated C++ is left to the caller
        #[arg(long)]
        exe_file: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Run { file }) => run_file(&file, cli.print_ast),
        Some(Commands::Repl) => run_prompt(cli.print_ast),
        Some(Commands::Compile {
            file,
            target,
            cpp_file,
            exe_file,
        }) => compile_file(&file, &target, cpp_file, exe_file, cli.print_ast),
        None => match cli.script {
            Some(script) if script.extension().map(|e| e == "lx").unwrap_or(false) => {
                run_file(&script, cli.print_ast)
            }
            Some(script) => {
                eprintln!(
                    "Usage: pass a .lx script or one of run/repl/compile (got {:?})",
                    script
                );
                Ok(ExitCode::from(EXIT_USAGE))
            }
            None => run_prompt(cli.print_ast),
        },
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{:#}", error);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

/// Lex, parse and resolve. Every static diagnostic goes to stderr; the
/// statements and side table come back only when the input is clean.
fn front_end(
    source: &str,
    print_ast: bool,
) -> Option<(Vec<Stmt>, HashMap<ExprId, Depth>)> {
    let (tokens, lexer_errors) = lexer::lex(source);
    let (statements, parser_errors) = parser::parse(&tokens);
    let (depths, resolver_errors) = resolver::resolve(&statements);

    let mut had_error = false;
    for error in lexer_errors
        .iter()
        .chain(parser_errors.iter())
        .chain(resolver_errors.iter())
    {
        eprintln!("{}", error);
        had_error = true;
    }
    if had_error {
        return None;
    }

    if print_ast {
        println!("{}", AstPrinter.print_program(&statements));
    }

    Some((statements, depths))
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    // strip a UTF-8 BOM if present
    Ok(source.strip_prefix('\u{feff}').unwrap_or(&source).to_string())
}

fn run_file(path: &Path, print_ast: bool) -> anyhow::Result<ExitCode> {
    let source = read_source(path)?;

    let Some((statements, depths)) = front_end(&source, print_ast) else {
        return Ok(ExitCode::from(EXIT_COMPILE_ERROR));
    };

    let mut stdout = io::stdout();
    let mut interpreter = Interpreter::new(&mut stdout);
    interpreter.add_resolutions(depths);
    match interpreter.interpret(&statements) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(error) => {
            eprintln!("{}", error);
            Ok(ExitCode::from(EXIT_RUNTIME_ERROR))
        }
    }
}

fn run_prompt(print_ast: bool) -> anyhow::Result<ExitCode> {
    let mut stdout = io::stdout();
    let mut interpreter = Interpreter::new(&mut stdout);
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF ends the session
            return Ok(ExitCode::SUCCESS);
        }

        // error state resets with every input
        let Some((statements, depths)) = front_end(&line, print_ast) else {
            continue;
        };

        interpreter.add_resolutions(depths);
        if let Err(error) = interpreter.interpret(&statements) {
            eprintln!("{}", error);
        }
    }
}

fn compile_file(
    path: &Path,
    target: &str,
    cpp_file: Option<PathBuf>,
    exe_file: Option<PathBuf>,
    print_ast: bool,
) -> anyhow::Result<ExitCode> {
    if target != "cpp" {
        eprintln!("Unsupported target '{}'; only \"cpp\" is available.", target);
        return Ok(ExitCode::from(EXIT_USAGE));
    }

    let source = read_source(path)?;

    let Some((statements, _)) = front_end(&source, print_ast) else {
        return Ok(ExitCode::from(EXIT_COMPILE_ERROR));
    };

    let generated = emitter::emit(&statements);

    let cpp_path = cpp_file.unwrap_or_else(|| path.with_extension("cpp"));
    std::fs::write(&cpp_path, generated)
        .with_context(|| format!("could not write {}", cpp_path.display()))?;

    let runtime_dir = cpp_path.parent().unwrap_or_else(|| Path::new("."));
    runtime::write_runtime(runtime_dir)
        .with_context(|| format!("could not write runtime into {}", runtime_dir.display()))?;

    println!("Wrote {}", cpp_path.display());
    println!(
        "Runtime sources: {} and {}",
        runtime_dir.join(runtime::RUNTIME_HEADER_NAME).display(),
        runtime_dir.join(runtime::RUNTIME_SOURCE_NAME).display()
    );
    if let Some(exe_file) = exe_file {
        println!(
            "Link it yourself, e.g.: c++ -std=c++17 {} {} -o {}",
            cpp_path.display(),
            runtime_dir.join(runtime::RUNTIME_SOURCE_NAME).display(),
            exe_file.display()
        );
    }

    Ok(ExitCode::SUCCESS)
}
