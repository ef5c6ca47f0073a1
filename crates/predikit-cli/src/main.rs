//! `predikit` command line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use predikit::{connect, Acceleration, Prediction, Value};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Setup(#[from] predikit::SetupError),
    #[error(transparent)]
    Dispatch(#[from] predikit::DispatchError),
    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),
}

#[derive(Parser)]
#[command(name = "predikit", about = "Run prediction functions", version)]
struct Cli {
    /// Prediction API endpoint.
    #[arg(
        long,
        global = true,
        env = "PREDIKIT_API_URL",
        default_value = "https://api.fxn.ai/v1/"
    )]
    api_url: String,
    /// Access key for private predictors.
    #[arg(long, global = true, env = "PREDIKIT_ACCESS_KEY")]
    access_key: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a prediction and print the result.
    Predict {
        /// Predictor tag, e.g. `@fxn/greeting`.
        tag: String,
        /// Input as NAME=VALUE. The value is parsed as JSON when possible,
        /// `@path` attaches a file, anything else is a plain string.
        #[arg(short = 'i', long = "input", value_name = "NAME=VALUE")]
        inputs: Vec<String>,
        /// Hardware to run on.
        #[arg(long, default_value = "auto", value_parser = parse_acceleration)]
        acceleration: Acceleration,
        /// Print only the result values.
        #[arg(long)]
        quiet: bool,
    },
    /// Show a predictor's metadata and signature.
    Retrieve {
        /// Predictor tag.
        tag: String,
    },
}

fn parse_acceleration(raw: &str) -> Result<Acceleration, String> {
    raw.parse()
        .map_err(|_| format!("unknown acceleration: {raw} (expected auto, cpu, gpu or npu)"))
}

/// Parse one `NAME=VALUE` input argument.
fn parse_input(arg: &str) -> Result<(String, Value), String> {
    let (name, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got: {arg}"))?;
    if name.is_empty() {
        return Err(format!("input has no name: {arg}"));
    }
    let value = if let Some(path) = raw.strip_prefix('@') {
        Value::File {
            path: PathBuf::from(path),
            mime: None,
        }
    } else {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(json) => Value::from_json(&json).map_err(|e| e.to_string())?,
            Err(_) => Value::String(raw.to_string()),
        }
    };
    Ok((name.to_string(), value))
}

fn print_prediction(prediction: &Prediction, quiet: bool) -> Result<(), CliError> {
    if quiet {
        for result in prediction.results.iter().flatten() {
            println!("{}", serde_json::to_string(result)?);
        }
    } else {
        println!("{}", serde_json::to_string_pretty(prediction)?);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let dispatcher = connect(&cli.api_url, cli.access_key.as_deref())?;
    match cli.command {
        Command::Predict {
            tag,
            inputs,
            acceleration,
            quiet,
        } => {
            let inputs = inputs
                .iter()
                .map(|arg| parse_input(arg))
                .collect::<Result<Vec<_>, _>>()
                .map_err(predikit::DispatchError::InvalidInput)?;
            let prediction = dispatcher.create(&tag, inputs, acceleration);
            print_prediction(&prediction, quiet)?;
            if let Some(error) = &prediction.error {
                tracing::error!(kind = %error.kind, "{}", error.message);
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Retrieve { tag } => {
            let predictor = dispatcher.predictor(&tag)?;
            println!("{}", serde_json::to_string_pretty(&predictor)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    // Progress events go to stderr; --quiet keeps only errors.
    let default_filter = match cli.command {
        Command::Predict { quiet: true, .. } => "error",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_parse_json_first() {
        assert_eq!(
            parse_input("count=42").unwrap(),
            ("count".into(), Value::Int32(42))
        );
        assert_eq!(
            parse_input("flag=true").unwrap(),
            ("flag".into(), Value::Bool(true))
        );
        assert_eq!(
            parse_input("name=\"Peter\"").unwrap(),
            ("name".into(), Value::String("Peter".into()))
        );
    }

    #[test]
    fn bare_strings_fall_back_to_string_values() {
        assert_eq!(
            parse_input("name=Peter").unwrap(),
            ("name".into(), Value::String("Peter".into()))
        );
    }

    #[test]
    fn at_prefix_attaches_a_file() {
        assert_eq!(
            parse_input("image=@photo.png").unwrap(),
            (
                "image".into(),
                Value::File {
                    path: PathBuf::from("photo.png"),
                    mime: None,
                }
            )
        );
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(parse_input("no-separator").is_err());
        assert!(parse_input("=value").is_err());
    }

    #[test]
    fn acceleration_values_parse() {
        assert_eq!(parse_acceleration("gpu").unwrap(), Acceleration::Gpu);
        assert!(parse_acceleration("quantum").is_err());
    }
}
