//! runpane - run a script and stream its output to the terminal
//!
//! The script is copied to a scratch file and run with its language's
//! command. Output is shown line by line with ANSI colors preserved.
//! Lines typed while the script runs are sent to its stdin.
//!
//! # Quick Start
//!
//! ```text
//! runpane hello.kts           # Language from the file extension
//! runpane -l python prog.txt  # Explicit language
//! runpane -r "node {file}" app.js
//! ```
//!
//! # Commands while running
//!
//! | Line | Action |
//! |------|--------|
//! | :stop | Terminate the script |
//! | :clear | Clear the output history |
//! | :replay | Redraw the output history |
//! | :quit | Terminate and exit without further output |

use std::env;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use runpane::config::{data_dir, ColorScheme, Config};
use runpane::controller::SessionController;
use runpane::core::buffer::OutputBuffer;
use runpane::core::record::ExecutionOutcome;
use runpane::core::session::{ProcessSession, SessionEvent};
use runpane::language::{Language, LanguageRegistry};
use runpane::ui::Renderer;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding a tracing filter
const LOG_ENV: &str = "RUNPANE_LOG";

/// How long the event loop waits for output before checking input
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    script: Option<PathBuf>,
    language: Option<String>,
    /// Ad-hoc command template, bypasses the registry
    run_command: Option<String>,
    scheme: Option<String>,
    max_lines: Option<usize>,
    list_languages: bool,
    list_schemes: bool,
}

/// Lines typed by the user that are not forwarded to the script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostCommand {
    Stop,
    Clear,
    Replay,
    Quit,
}

fn parse_host_command(line: &str) -> Option<HostCommand> {
    match line.trim() {
        ":stop" => Some(HostCommand::Stop),
        ":clear" => Some(HostCommand::Clear),
        ":replay" => Some(HostCommand::Replay),
        ":quit" | ":q" => Some(HostCommand::Quit),
        _ => None,
    }
}

fn print_version() {
    eprintln!("runpane {}", VERSION);
}

fn print_help() {
    eprintln!("runpane {} - Run a script and stream its output", VERSION);
    eprintln!();
    eprintln!("Usage: runpane [OPTIONS] <SCRIPT>");
    eprintln!();
    eprintln!("Language options:");
    eprintln!("  (default)               Detect from the script extension");
    eprintln!("  -l, --language <NAME>   Run with a registered language");
    eprintln!("  -r, --run <TEMPLATE>    Run with a custom command, {{file}} is the script");
    eprintln!("  --list-languages        Show registered languages");
    eprintln!();
    eprintln!("Display options:");
    eprintln!("  -s, --scheme <NAME>     Color scheme");
    eprintln!("  -m, --max-lines <N>     Output history size");
    eprintln!("  --list-schemes          Show color schemes");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -v, --version           Show version");
    eprintln!("  -h, --help              Show this help");
    eprintln!();
    eprintln!("While running, each input line is sent to the script's stdin.");
    eprintln!("These lines are handled by runpane instead:");
    eprintln!("  :stop                   Terminate the script");
    eprintln!("  :clear                  Clear the output history");
    eprintln!("  :replay                 Redraw the output history");
    eprintln!("  :quit                   Terminate and exit");
    eprintln!();
    eprintln!("Configuration: ~/.runpane/config.toml");
    eprintln!("User languages: ~/.runpane/languages.toml");
    eprintln!("Log: ~/.runpane/runpane.log (filter with {})", LOG_ENV);
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut i = 1;

    let value = |i: usize, name: &str| -> Result<String, String> {
        args.get(i)
            .cloned()
            .ok_or_else(|| format!("Missing {} argument", name))
    };

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-l" | "--language" => {
                i += 1;
                cli.language = Some(value(i, "language")?);
            }
            "-r" | "--run" => {
                i += 1;
                cli.run_command = Some(value(i, "command")?);
            }
            "-s" | "--scheme" => {
                i += 1;
                cli.scheme = Some(value(i, "scheme")?);
            }
            "-m" | "--max-lines" => {
                i += 1;
                let raw = value(i, "max-lines")?;
                let lines = raw
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid max-lines value: {}", raw))?;
                cli.max_lines = Some(lines);
            }
            "--list-languages" => {
                cli.list_languages = true;
            }
            "--list-schemes" => {
                cli.list_schemes = true;
            }
            arg if arg.starts_with('-') && arg.len() > 1 => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            arg => {
                if cli.script.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                cli.script = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    Ok(cli)
}

/// Log to `~/.runpane/runpane.log`; `RUNPANE_LOG` overrides the config level
fn init_logging(level: &str) {
    let log_path = data_dir()
        .map(|dir| dir.join("runpane.log"))
        .unwrap_or_else(|| PathBuf::from("runpane.log"));

    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn build_registry(config: &Config) -> LanguageRegistry {
    let mut registry = LanguageRegistry::with_builtins();

    // Saved languages first: their ids were handed out by this registry
    if let Some(dir) = data_dir() {
        match registry.load_user_languages(&dir.join("languages.toml")) {
            Ok(0) => {}
            Ok(count) => info!("Loaded {} user languages", count),
            Err(e) => warn!("Ignoring user languages: {}", e),
        }
    }
    registry.extend_from_specs(&config.languages);
    registry
}

/// Pick the language: custom template, then `-l`, then the extension
fn resolve_language(cli: &CliArgs, registry: &LanguageRegistry, script: &Path) -> Result<Language, String> {
    let extension = script
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    if let Some(template) = &cli.run_command {
        return Ok(Language {
            id: 0,
            name: "Custom".to_string(),
            extension: if extension.is_empty() { "txt".to_string() } else { extension },
            run_command: template.clone(),
            built_in: false,
        });
    }

    if let Some(name) = &cli.language {
        return registry
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| format!("Unknown language: {}. Use --list-languages.", name));
    }

    registry
        .find_by_extension(&extension)
        .cloned()
        .ok_or_else(|| format!("Cannot detect language of {}. Use -l or -r.", script.display()))
}

fn print_languages(registry: &LanguageRegistry) {
    for language in registry.all() {
        let origin = if language.built_in { "" } else { " (user)" };
        println!(
            "  {:<10} .{:<7} {}{}",
            language.name, language.extension, language.run_command, origin
        );
    }
}

fn spawn_input_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Input disabled: {}", e);
    }
    rx
}

/// Render records and forward input until the run's outcome arrives
fn event_loop(
    controller: &SessionController,
    renderer: &Renderer,
    events: &Receiver<SessionEvent>,
    input: &Receiver<String>,
) -> anyhow::Result<ExecutionOutcome> {
    let mut stdout = io::stdout();
    let mut input_open = true;
    let mut quitting = false;

    loop {
        while input_open {
            match input.try_recv() {
                Ok(line) => match parse_host_command(&line) {
                    Some(HostCommand::Stop) => controller.stop(),
                    Some(HostCommand::Clear) => controller.clear(),
                    Some(HostCommand::Replay) => renderer.replay(&mut stdout, controller.buffer())?,
                    Some(HostCommand::Quit) => {
                        quitting = true;
                        controller.stop();
                    }
                    None => controller.send_input(&line),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => input_open = false,
            }
        }

        match events.recv_timeout(POLL_INTERVAL) {
            Ok(SessionEvent::Record(record)) => {
                if !quitting {
                    renderer.render_record(&mut stdout, &record)?;
                }
            }
            Ok(SessionEvent::Finished(outcome)) => return Ok(outcome),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("Session ended without an outcome"),
        }
    }
}

/// Process exit status for an outcome; failures to start map to 1
fn exit_status(outcome: &ExecutionOutcome) -> i32 {
    if outcome.exit_code < 0 {
        1
    } else {
        outcome.exit_code
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let cli = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(2);
        }
    };

    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    init_logging(&config.log_level);
    info!("runpane {} starting...", VERSION);
    if let Some(e) = config_error {
        warn!("Using default config: {}", e);
        eprintln!("Warning: {}", e);
    }

    let registry = build_registry(&config);

    if cli.list_schemes {
        for name in ColorScheme::list() {
            println!("  {}", name);
        }
        return Ok(());
    }
    if cli.list_languages {
        print_languages(&registry);
        return Ok(());
    }

    let Some(script) = cli.script.as_deref() else {
        print_help();
        std::process::exit(2);
    };
    let language = match resolve_language(&cli, &registry, script) {
        Ok(language) => language,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };
    let code = fs::read_to_string(script)
        .with_context(|| format!("Failed to read {}", script.display()))?;

    let scheme = cli
        .scheme
        .as_deref()
        .map(ColorScheme::by_name)
        .unwrap_or_else(|| config.get_color_scheme());
    let renderer = Renderer::new(scheme);
    let buffer = Arc::new(OutputBuffer::new(
        cli.max_lines.unwrap_or(config.buffer.max_lines),
    ));

    let mut controller = SessionController::new(
        ProcessSession::new(config.session.options()),
        buffer,
        config.scratch.dir(),
    );
    if let Some(stem) = script.file_stem() {
        controller.set_script_stem(&stem.to_string_lossy());
    }

    let (event_tx, event_rx) = mpsc::channel();
    if let Err(e) = controller.run(&language, &code, Arc::new(event_tx)) {
        error!("Run failed: {}", e);
        renderer.replay(&mut io::stdout(), controller.buffer())?;
        std::process::exit(1);
    }

    let input_rx = spawn_input_reader();
    let outcome = event_loop(&controller, &renderer, &event_rx, &input_rx)?;
    info!("{} run ended: {:?}, exit code {}", language.name, outcome.ending, outcome.exit_code);

    std::process::exit(exit_status(&outcome));
}

#[cfg(test)]
mod tests {
    use super::*;
    use runpane::core::record::RunEnding;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("runpane")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args() {
        let cli = parse_args(&args(&["-l", "kotlin", "-m", "50", "hello.kts"])).unwrap();
        assert_eq!(cli.language.as_deref(), Some("kotlin"));
        assert_eq!(cli.max_lines, Some(50));
        assert_eq!(cli.script, Some(PathBuf::from("hello.kts")));

        assert!(parse_args(&args(&["-m", "many"])).is_err());
        assert!(parse_args(&args(&["-l"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
        assert!(parse_args(&args(&["a.py", "b.py"])).is_err());
    }

    #[test]
    fn test_host_commands() {
        assert_eq!(parse_host_command(":stop"), Some(HostCommand::Stop));
        assert_eq!(parse_host_command(" :replay "), Some(HostCommand::Replay));
        assert_eq!(parse_host_command(":q"), Some(HostCommand::Quit));
        assert_eq!(parse_host_command("stop"), None);
        assert_eq!(parse_host_command(""), None);
    }

    #[test]
    fn test_resolve_language() {
        let registry = LanguageRegistry::with_builtins();
        let script = Path::new("demo.swift");

        let by_extension = resolve_language(&CliArgs::default(), &registry, script).unwrap();
        assert_eq!(by_extension.name, "Swift");

        let cli = CliArgs {
            language: Some("PYTHON".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_language(&cli, &registry, script).unwrap().name, "Python");

        let cli = CliArgs {
            run_command: Some("node {file}".to_string()),
            ..Default::default()
        };
        let custom = resolve_language(&cli, &registry, Path::new("app.js")).unwrap();
        assert_eq!(custom.run_command, "node {file}");
        assert_eq!(custom.extension, "js");

        assert!(resolve_language(&CliArgs::default(), &registry, Path::new("notes")).is_err());
    }

    #[test]
    fn test_exit_status() {
        let outcome = |exit_code, ending| ExecutionOutcome {
            exit_code,
            ending,
            records: Vec::new(),
        };
        assert_eq!(exit_status(&outcome(3, RunEnding::Completed)), 3);
        assert_eq!(exit_status(&outcome(-1, RunEnding::StartFailed)), 1);
        assert_eq!(exit_status(&outcome(137, RunEnding::Terminated)), 137);
    }
}
