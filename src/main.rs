use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::error::ErrorKind;
use clap::Parser;
use owo_colors::OwoColorize;

use lox::cli::{generate_completions, Args};
use lox::config::AppConfig;
use lox::diagnostic::{init_logging, ConsoleReporter, Reporter};
use lox::interpreter::{run_source, Interpreter};

const EXIT_UNREADABLE_SCRIPT: i32 = 42;
const EXIT_BAD_USAGE: i32 = 64;
const EXIT_STATIC_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => std::process::exit(0),
                _ => std::process::exit(EXIT_BAD_USAGE),
            }
        }
    };

    if let Some(shell) = args.completions {
        generate_completions(shell);
        return;
    }

    let config = AppConfig::from_args(&args);
    init_logging(config.color_enabled, config.verbose);

    let reporter: Rc<dyn Reporter> = Rc::new(ConsoleReporter::new(config.color_enabled));
    let out: Rc<RefCell<dyn Write>> = Rc::new(RefCell::new(io::stdout()));

    let code = match &args.script {
        Some(script) => run_file(script, reporter, out, &config),
        None => run_prompt(reporter, out),
    };
    std::process::exit(code);
}

fn run_file(
    script: &Path,
    reporter: Rc<dyn Reporter>,
    out: Rc<RefCell<dyn Write>>,
    config: &AppConfig,
) -> i32 {
    let source = match std::fs::read_to_string(script) {
        Ok(source) => source,
        Err(error) => {
            error_message(
                config,
                &format!("Could not open {}: {}", script.display(), error),
            );
            return EXIT_UNREADABLE_SCRIPT;
        }
    };

    let base_dir = script
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut interpreter = Interpreter::new(Rc::clone(&reporter), out).with_base_dir(base_dir);

    if run_source(&source, &mut interpreter).is_err() {
        // exit() unwound to here; that is a clean termination
        return 0;
    }
    if reporter.had_error() {
        return EXIT_STATIC_ERROR;
    }
    if reporter.had_runtime_error() {
        return EXIT_RUNTIME_ERROR;
    }
    0
}

fn run_prompt(reporter: Rc<dyn Reporter>, out: Rc<RefCell<dyn Write>>) -> i32 {
    let mut interpreter = Interpreter::new(Rc::clone(&reporter), out);
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush().ok();

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return 0, // EOF
            Ok(_) => {}
            Err(error) => {
                eprintln!("Error reading input: {}", error);
                return 0;
            }
        }

        if run_source(&line, &mut interpreter).is_err() {
            return 0;
        }

        // A bad line must not poison the next one
        reporter.reset();
    }
}

fn error_message(config: &AppConfig, message: &str) {
    if config.color_enabled {
        eprintln!("{}", message.red().bold());
    } else {
        eprintln!("{}", message);
    }
}
