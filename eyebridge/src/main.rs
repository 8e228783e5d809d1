//! Command-line front end for the EYE invocation layer.
//!
//! Runs the engine over input documents and prints the normalized result on
//! stdout. Failures go to stderr with an exit code from [`exit_codes`].

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eyebridge::core::normalize::normalize;
use eyebridge::exit_codes;
use eyebridge::io::config::load_config;
use eyebridge::{EngineFlag, Eye, InvocationRequest, ProcessOutcome, Source, logging};

#[derive(Parser)]
#[command(
    name = "eyebridge",
    version,
    about = "Run the EYE reasoner and normalize its output"
)]
struct Cli {
    /// Engine configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "eyebridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine over input documents and print the normalized result.
    Run {
        /// Input documents (paths or http(s) URIs), passed to the engine in order.
        inputs: Vec<String>,
        /// Inline document text, added after the positional inputs.
        #[arg(long = "inline", value_name = "TEXT")]
        inline: Vec<String>,
        /// Query document (path or http(s) URI).
        #[arg(long)]
        query: Option<String>,
        /// Engine flag by camelCase name, e.g. `--flag ignoreSyntaxError`. Repeatable.
        #[arg(long = "flag", value_name = "NAME")]
        flags: Vec<String>,
        /// Do not force pass-only mode when no query is given.
        #[arg(long)]
        no_pass: bool,
        /// Print the classified outcome as JSON instead of the bare document.
        #[arg(long)]
        json: bool,
    },
    /// Normalize a result document read from a file or stdin.
    Normalize {
        /// Document to normalize. Reads stdin when omitted.
        file: Option<PathBuf>,
    },
    /// List recognized engine flags and their switches.
    Flags,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            inputs,
            inline,
            query,
            flags,
            no_pass,
            json,
        } => {
            let request = build_request(&inputs, &inline, query.as_deref(), &flags, no_pass)?;
            cmd_run(&cli.config, &request, json)
        }
        Command::Normalize { file } => cmd_normalize(file),
        Command::Flags => cmd_flags(),
    }
}

fn build_request(
    inputs: &[String],
    inline: &[String],
    query: Option<&str>,
    flags: &[String],
    no_pass: bool,
) -> Result<InvocationRequest> {
    let mut request = InvocationRequest::new()
        .inputs(inputs.iter().map(|arg| Source::from_arg(arg)))
        .inputs(inline.iter().map(|text| Source::inline(text.as_str())))
        .flag_names(flags)?;
    if let Some(query) = query {
        request = request.query(Source::from_arg(query));
    }
    if no_pass {
        request = request.pass_only(false);
    }
    Ok(request)
}

fn cmd_run(config_path: &std::path::Path, request: &InvocationRequest, json: bool) -> Result<i32> {
    let config = load_config(config_path)?;
    let eye = Eye::new(config)?;
    let outcome = match eye.run(request) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("{err}");
            return Ok(exit_codes::for_error(&err));
        }
    };

    if json {
        let payload = serde_json::to_string_pretty(&outcome).context("serialize outcome")?;
        println!("{payload}");
    }
    let code = match outcome {
        ProcessOutcome::Success(document) => {
            if !json {
                println!("{document}");
            }
            exit_codes::OK
        }
        ProcessOutcome::EngineError(message) => {
            eprintln!("engine error: {message}");
            exit_codes::ENGINE_ERROR
        }
        ProcessOutcome::LaunchFailure(cause) => {
            eprintln!("engine did not run: {cause}");
            exit_codes::LAUNCH_FAILURE
        }
    };
    Ok(code)
}

fn cmd_normalize(file: Option<PathBuf>) -> Result<i32> {
    let raw = match file {
        Some(path) => {
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            buf
        }
    };
    println!("{}", normalize(&raw));
    Ok(exit_codes::OK)
}

fn cmd_flags() -> Result<i32> {
    for flag in EngineFlag::all() {
        println!("{:<20} {}", flag.name(), flag.switch());
    }
    Ok(exit_codes::OK)
}
