use std::fs;
use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use exprtree::BindMode;
use exprtree::Bindings;
use exprtree::Evaluator;
use exprtree::Value;
use miette::Diagnostic;
use miette::IntoDiagnostic;
use miette::NamedSource;
use miette::WrapErr;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "exprtree", version, about)]
struct Cli {
    /// Raise log verbosity: -v info, -vv debug, -vvv trace.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the token stream of an expression.
    Tokenize {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Parse an expression and print its tree and element kind.
    Parse {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        bindings: BindingArgs,
    },
    /// Parse an expression and print the value it evaluates to.
    Eval {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        bindings: BindingArgs,
    },
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Expression text.
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    expression: Option<String>,

    /// Read the expression from a file.
    #[arg(short, long)]
    file: Option<PathBuf>,
}

impl SourceArgs {
    /// Source name for diagnostics, and the expression text.
    fn load(&self) -> miette::Result<(String, String)> {
        match (&self.expression, &self.file) {
            (Some(expression), _) => Ok(("<input>".to_string(), expression.clone())),
            (None, Some(filename)) => {
                let file_contents = fs::read_to_string(filename)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("reading `{}` failed", filename.display()))?;
                Ok((
                    filename.display().to_string(),
                    file_contents.trim_end().to_string(),
                ))
            }
            (None, None) => Err(miette::miette!("no expression given")),
        }
    }
}

#[derive(Args, Debug)]
struct BindingArgs {
    /// Bind a parameter. Repeatable.
    #[arg(short, long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    params: Vec<(String, Value)>,

    /// Keep identifiers as parameter nodes, resolved again at evaluation.
    #[arg(long)]
    deferred: bool,
}

impl BindingArgs {
    fn bindings(&self) -> Bindings {
        let bindings: Bindings = self.params.iter().cloned().collect();
        if bindings.is_empty() {
            tracing::debug!("no parameters bound");
        }
        for (name, value) in bindings.iter() {
            tracing::debug!(name, %value, kind = %value.kind(), "bound parameter");
        }
        bindings
    }

    fn mode(&self) -> BindMode {
        if self.deferred {
            BindMode::Deferred
        } else {
            BindMode::Inline
        }
    }
}

fn parse_param(param: &str) -> Result<(String, Value), String> {
    let Some((name, value)) = param.split_once('=') else {
        return Err(format!("invalid NAME=VALUE: no `=` found in `{param}`"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid NAME=VALUE: empty name in `{param}`"));
    }
    Ok((name.to_string(), Value::infer(value.trim())))
}

fn report(
    error: impl Diagnostic + Send + Sync + 'static,
    name: &str,
    source: &str,
) -> miette::Report {
    miette::Report::new(error).with_source_code(NamedSource::new(name, source.to_string()))
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Tokenize { source } => {
            let (name, text) = source.load()?;
            let tokens = exprtree::tokenize(&text).map_err(|e| report(e, &name, &text))?;
            for token in &tokens {
                println!("{token}");
            }
            println!("END");
        }
        Commands::Parse { source, bindings } => {
            let (name, text) = source.load()?;
            let bound = bindings.bindings();
            let expr = exprtree::compile(&text, &bound, bindings.mode())
                .map_err(|e| report(e, &name, &text))?;
            println!("{expr} : {}", expr.kind());
        }
        Commands::Eval { source, bindings } => {
            let (name, text) = source.load()?;
            let bound = bindings.bindings();
            let expr = exprtree::compile(&text, &bound, bindings.mode())
                .map_err(|e| report(e, &name, &text))?;
            tracing::info!(tree = %expr, "compiled");
            let value = Evaluator::with_bindings(&bound)
                .evaluate(&expr)
                .map_err(|e| report(e, &name, &text))?;
            println!("{value}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_split_on_the_first_equals() {
        assert_eq!(
            parse_param("a=10").unwrap(),
            ("a".to_string(), Value::I64(10))
        );
        assert_eq!(
            parse_param("s='x=y'").unwrap(),
            ("s".to_string(), Value::from("x=y"))
        );
        assert!(parse_param("a").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn cli_accepts_repeated_params() {
        let cli = Cli::try_parse_from(["exprtree", "eval", "a + b", "-p", "a=1", "-p", "b=2.5"])
            .unwrap();
        let Commands::Eval { source, bindings } = cli.command else {
            panic!("expected the eval subcommand");
        };
        assert_eq!(source.expression.as_deref(), Some("a + b"));
        let bound = bindings.bindings();
        assert_eq!(bound.get("b"), Some(&Value::F64(2.5)));
        assert_eq!(bindings.mode(), BindMode::Inline);
    }

    #[test]
    fn later_params_override_earlier_ones() {
        let cli = Cli::try_parse_from(["exprtree", "parse", "a", "-p", "a=1", "-p", "a=true"])
            .unwrap();
        let Commands::Parse { bindings, .. } = cli.command else {
            panic!("expected the parse subcommand");
        };
        let bound = bindings.bindings();
        assert_eq!(bound.iter().collect::<Vec<_>>(), [("a", &Value::Bool(true))]);

        let cli = Cli::try_parse_from(["exprtree", "parse", "1", "--deferred"]).unwrap();
        let Commands::Parse { bindings, .. } = cli.command else {
            panic!("expected the parse subcommand");
        };
        assert!(bindings.bindings().is_empty());
        assert_eq!(bindings.mode(), BindMode::Deferred);
    }

    #[test]
    fn cli_rejects_text_and_file_together() {
        assert!(Cli::try_parse_from(["exprtree", "parse", "1", "--file", "x.expr"]).is_err());
        assert!(Cli::try_parse_from(["exprtree", "tokenize"]).is_err());
    }
}
