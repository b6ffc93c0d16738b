use clap::Parser;
use std::path::PathBuf;

use calcgraph::{Computer, EnvConfig, Key};

#[derive(Parser)]
#[command(name = "calcgraph", version, about = "A computation graph engine for labeled, unit-aware quantities")]
struct Args {
    /// A single expression-language statement to evaluate, e.g. `z = x + y`
    expr: Option<String>,
    /// YAML configuration file to load before anything else (spec.md §6.2)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Execute expression-language statements from a file, one per line
    #[arg(short, long)]
    file: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut computer = Computer::new(EnvConfig::default());
    if let Some(path) = &args.config {
        if let Err(e) = calcgraph_config::configure(&mut computer, path) {
            eprintln!("Error loading {}: {e}", path.display());
            std::process::exit(1);
        }
    }

    if let Some(expr) = &args.expr {
        run_statements(&mut computer, expr);
        return;
    }
    if let Some(path) = &args.file {
        let contents = std::fs::read_to_string(path).unwrap_or_else(|e| {
            eprintln!("Error reading {}: {e}", path.display());
            std::process::exit(1);
        });
        run_statements(&mut computer, &contents);
        return;
    }

    run_repl(computer);
}

/// Evaluate `source` as one or more expression-language statements and print
/// the resulting value of every key they assign, in order.
fn run_statements(computer: &mut Computer, source: &str) {
    match calcgraph_expr::eval(computer, source) {
        Ok(keys) => {
            for key in keys {
                print_get(computer, &key);
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn print_get(computer: &Computer, key: &Key) {
    match computer.get(key) {
        Ok(value) => println!("{key} = {value:?}"),
        Err(e) => eprintln!("Error computing {key}: {e}"),
    }
}

fn run_repl(mut computer: Computer) {
    println!("calcgraph v{} -- computation graph REPL", env!("CARGO_PKG_VERSION"));
    println!("Type .help for commands, or enter `key = expr` statements.");
    println!();

    let config = rustyline::Config::builder()
        .max_history_size(1000)
        .unwrap()
        .completion_type(rustyline::config::CompletionType::List)
        .edit_mode(rustyline::config::EditMode::Emacs)
        .build();
    let mut editor: rustyline::Editor<(), rustyline::history::DefaultHistory> =
        rustyline::Editor::with_config(config).expect("failed to create editor");

    let history_path = history_path();
    let _ = editor.load_history(&history_path);

    loop {
        match editor.readline("calcgraph> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                editor.add_history_entry(trimmed).ok();

                if let Some(rest) = trimmed.strip_prefix('.') {
                    if !handle_dot_command(rest, &mut computer) {
                        break;
                    }
                    continue;
                }

                match calcgraph_expr::eval(&mut computer, trimmed) {
                    Ok(keys) => {
                        for key in keys {
                            print_get(&computer, &key);
                        }
                    }
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(rustyline::error::ReadlineError::Interrupted) => continue,
            Err(e) => {
                eprintln!("Readline error: {e}");
                break;
            }
        }
    }

    let _ = editor.save_history(&history_path);
}

/// Handle a `.`-prefixed REPL command. Returns `false` to end the REPL loop.
fn handle_dot_command(cmd: &str, computer: &mut Computer) -> bool {
    let mut parts = cmd.split_whitespace();
    match parts.next().unwrap_or("") {
        "get" => {
            let Some(arg) = parts.next() else {
                println!("Usage: .get <key>");
                return true;
            };
            match Key::parse(arg) {
                Ok(key) => print_get(computer, &key),
                Err(e) => eprintln!("Error: {e}"),
            }
        }
        "describe" => {
            let Some(arg) = parts.next() else {
                println!("Usage: .describe <key>");
                return true;
            };
            match Key::parse(arg).and_then(|key| computer.describe(&key)) {
                Ok(text) => print!("{text}"),
                Err(e) => eprintln!("Error: {e}"),
            }
        }
        "config" => {
            let Some(arg) = parts.next() else {
                println!("Usage: .config <path>");
                return true;
            };
            if let Err(e) = calcgraph_config::configure(computer, &PathBuf::from(arg)) {
                eprintln!("Error: {e}");
            }
        }
        "help" => print_help(),
        "quit" | "exit" => return false,
        other => println!("Unknown command: .{other}. Type .help for commands."),
    }
    true
}

fn print_help() {
    println!("Commands:");
    println!("  .get <key>        Evaluate and print <key>");
    println!("  .describe <key>   Print <key>'s dependency tree");
    println!("  .config <path>    Load a YAML configuration file");
    println!("  .help             Show this help");
    println!("  .quit             Exit");
    println!();
    println!("Expressions:");
    println!("  z = x + y");
    println!("  total = sum(x, \"region\")");
}

fn history_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".calcgraph_history")
}
