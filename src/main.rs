//! wfbridge CLI Entry Point
//!
//! Runs the pass pipeline over a serialized workflow tree and writes the
//! translated tree back out as JSON for a code generator.
//!
//! # Usage
//!
//! ```bash
//! # Prepare a tree for CWL output (the default dialect)
//! wfbridge ingested.json
//!
//! # Prepare for WDL, pruning unused tool inputs
//! wfbridge ingested.json --to wdl --simplify on --output prepared.json
//!
//! # Keep going when reconciliation or pruning fails
//! wfbridge ingested.yaml --to nextflow --safe-mode
//!
//! # Read settings from a file (flags still win)
//! wfbridge ingested.json --config translate.yaml
//! ```

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use wfbridge::config::{load_config, Dialect, SimplificationMode, TranslationConfig};
use wfbridge::passes::{PipelineReport, Translator};
use wfbridge::workflow::parser::to_json;
use wfbridge::{load_workflow, APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    workflow_path: Option<String>,
    config_path: Option<String>,
    output_path: Option<PathBuf>,
    dialect: Option<Dialect>,
    simplification: Option<SimplificationMode>,
    safe_mode: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner. Goes to stderr so stdout stays clean
/// for the translated tree.
fn print_banner() {
    eprintln!();
    eprintln!("{} v{}", APP_NAME.bold(), VERSION);
    eprintln!("Workflow IR translation passes");
    eprintln!();
}

fn print_usage() {
    println!("Usage: wfbridge [OPTIONS] <IR_FILE>");
    println!();
    println!("Arguments:");
    println!("  <IR_FILE>             Workflow tree as JSON or YAML");
    println!();
    println!("Options:");
    println!("  --to DIALECT          Target dialect: cwl, wdl, nextflow (default: cwl)");
    println!("  --simplify MODE       Pruning: off, on, aggressive (default: off)");
    println!("  --safe-mode           Roll back failing passes instead of aborting");
    println!("  --config PATH         YAML file with translation settings");
    println!("  --output PATH         Write the translated tree here (default: stdout)");
    println!("  --verbose             Enable debug logging");
    println!("  --help                Show this help message");
    println!("  --version             Show version information");
    println!();
    println!("Examples:");
    println!("  wfbridge ingested.json --to wdl");
    println!("  wfbridge ingested.json --to nextflow --simplify on --output prepared.json");
}

/// Returns the value following option `name`, advancing the cursor.
fn option_value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", name))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--safe-mode" => {
                config.safe_mode = true;
            }
            "--to" => {
                let value = option_value(args, &mut i, "--to")?;
                config.dialect = Some(value.parse().map_err(|e| format!("{}", e))?);
            }
            "--simplify" => {
                let value = option_value(args, &mut i, "--simplify")?;
                config.simplification = Some(value.parse().map_err(|e| format!("{}", e))?);
            }
            "--config" => {
                config.config_path = Some(option_value(args, &mut i, "--config")?.to_string());
            }
            "--output" | "-o" => {
                config.output_path = Some(PathBuf::from(option_value(args, &mut i, "--output")?));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.workflow_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.workflow_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.workflow_path.is_none() {
        return Err("Missing workflow file".to_string());
    }
    Ok(config)
}

/// Settings file first, then command-line overrides.
fn translation_config(config: &Config) -> Result<TranslationConfig, Box<dyn std::error::Error>> {
    let mut settings = match &config.config_path {
        Some(path) => load_config(path)?,
        None => TranslationConfig::default(),
    };

    if let Some(dialect) = config.dialect {
        settings.dialect = dialect;
    }
    if let Some(mode) = config.simplification {
        settings.simplification = mode;
    }
    if config.safe_mode {
        settings.safe_mode = true;
    }
    Ok(settings)
}

fn print_summary(report: &PipelineReport) {
    eprintln!();
    eprintln!("{}", report.get_summary());
    eprintln!();
    if report.is_clean() {
        eprintln!("{}", "Translation completed successfully".green().bold());
    } else {
        for failure in &report.failures {
            eprintln!("{} {}", "Rolled back:".yellow().bold(), failure.pass);
        }
        eprintln!("{}", "Translation completed with rolled-back passes".yellow());
    }
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let settings = translation_config(&config)?;
    info!(
        "Target: {} (simplification: {}, safe mode: {})",
        settings.dialect, settings.simplification, settings.safe_mode
    );

    let workflow_path = config.workflow_path.unwrap_or_default();
    let workflow = load_workflow(&workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!("Could not load workflow from '{}': {}", workflow_path, e)
    })?;

    let mut translator = Translator::new(workflow).with_config(settings);
    let report = translator.run()?;

    let json = to_json(translator.workflow())?;
    match &config.output_path {
        Some(path) => {
            fs::write(path, json)?;
            info!("Translated workflow written to {}", path.display());
        }
        None => println!("{}", json),
    }

    print_summary(&report);
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
