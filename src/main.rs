//! Purpose: `procbridge` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, performs one call or resolve, emits JSON on stdout.
//! Invariants: `call` prints exactly one AggregateResult JSON document on stdout.
//! Invariants: CLI-level errors are emitted as JSON on stderr (plain text on a TTY).
//! Invariants: Process exit code is derived from `api::to_exit_code` for CLI errors.
use std::io::{self, IsTerminal};
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

use procbridge::api::{AggregateResult, Caller, Error, ErrorKind, resolve, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    procbridge::logging::init();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `procbridge --help`."));
            }
        },
    };

    dispatch_command(cli.command)
}

#[derive(Parser)]
#[command(
    name = "procbridge",
    version,
    about = "Call a program written for another runtime as a subroutine",
    long_about = None,
    before_help = r#"The target is spawned as a child process. It receives one JSON request on
stdin and answers with JSON lines on stdout; the lines are folded into one result.
"#,
    after_help = r#"EXAMPLES
  $ procbridge call --lang python --file double.py --data '{"n": 2}'
  $ procbridge call --lang exe --file ./worker --many --data '[1, 2, 3]'
  $ procbridge resolve --lang go --file main.go

Set RUST_LOG=debug to trace spawn and decode decisions on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run the target once and print the aggregate result")]
    Call {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long, help = "Request payload as JSON (default: null)")]
        data: Option<String>,
        #[arg(long, help = "Accept any number of outputs and collect them into an array")]
        many: bool,
        #[arg(long, help = "Treat zero outputs as a failure")]
        require_output: bool,
        #[arg(long, help = "Kill the target after this many milliseconds")]
        timeout_ms: Option<u64>,
        #[arg(long, help = "Pretty-print the result (default on a TTY)")]
        pretty: bool,
    },
    #[command(about = "Print the command that would launch the target")]
    Resolve {
        #[command(flatten)]
        target: TargetArgs,
    },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct TargetArgs {
    #[arg(long = "lang", help = "Target language (python, js, ruby, c, cs, cpp, java, rust, go, exe, ...)")]
    language: String,
    #[arg(long, help = "Path to the target file", value_hint = ValueHint::FilePath)]
    file: String,
}

fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "procbridge", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Resolve { target } => {
            let spec = resolve(&target.language, &target.file)?;
            emit_json(&json!({ "argv": spec.argv }), false)?;
            Ok(RunOutcome::ok())
        }
        Command::Call {
            target,
            data,
            many,
            require_output,
            timeout_ms,
            pretty,
        } => {
            let payload = parse_data(data.as_deref())?;
            let mut caller = Caller::new()
                .with_unique(!many)
                .with_optional_output(!require_output);
            if let Some(ms) = timeout_ms {
                caller = caller.with_timeout(Duration::from_millis(ms));
            }
            let result = caller.call(&target.language, &target.file, &payload);
            emit_result(&result, pretty)?;
            let exit_code = if result.is_failure() { 1 } else { 0 };
            Ok(RunOutcome::with_code(exit_code))
        }
    }
}

fn parse_data(data: Option<&str>) -> Result<Value, Error> {
    let Some(text) = data else {
        return Ok(Value::Null);
    };
    serde_json::from_str(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("--data is not valid JSON")
            .with_hint("Quote the payload, e.g. --data '{\"n\": 2}'.")
            .with_source(err)
    })
}

fn emit_result(result: &AggregateResult, pretty: bool) -> Result<(), Error> {
    let value = serde_json::to_value(result).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode result")
            .with_source(err)
    })?;
    emit_json(&value, pretty)
}

fn emit_json(value: &Value, pretty: bool) -> Result<(), Error> {
    let pretty = pretty || io::stdout().is_terminal();
    let encoded = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    let encoded = encoded.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode JSON output")
            .with_source(err)
    })?;
    println!("{encoded}");
    Ok(())
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(err.to_string()));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {err}")];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, error_json, error_text, parse_data};
    use clap::CommandFactory;
    use procbridge::api::{Error, ErrorKind};
    use serde_json::{Value, json};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn data_defaults_to_null_and_rejects_bad_json() {
        assert_eq!(parse_data(None).expect("null"), Value::Null);
        assert_eq!(parse_data(Some("{\"n\":2}")).expect("obj"), json!({"n": 2}));
        let err = parse_data(Some("{n:2}")).expect_err("bad json");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn error_json_carries_kind_hint_and_causes() {
        let err = Error::new(ErrorKind::FileNotFound)
            .with_message("File not found: x.py")
            .with_hint("check the path")
            .with_path("x.py")
            .with_source(std::io::Error::other("enoent"));
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], json!("FileNotFound"));
        assert_eq!(value["error"]["message"], json!("File not found: x.py"));
        assert_eq!(value["error"]["hint"], json!("check the path"));
        assert_eq!(value["error"]["path"], json!("x.py"));
        assert_eq!(value["error"]["causes"], json!(["enoent"]));

        let text = error_text(&err);
        assert!(text.starts_with("error: File not found: x.py"));
        assert!(text.contains("hint: check the path"));
    }
}
