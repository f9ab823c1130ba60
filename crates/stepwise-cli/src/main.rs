#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use std::fs::File;
use std::path::PathBuf;

use miette::IntoDiagnostic;

use stepwise_cli::{CliAction, CliOpts};

use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("STEPWISE_LOG")
                .from_env_lossy(),
        )
        .init();

    let res = match cli.action {
        CliAction::Run {
            config,
            output,
            script,
        } => evaluate_run(config, output, script),
    };

    if let Err(e) = res {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

fn evaluate_run(config: String, output: Option<PathBuf>, script: PathBuf) -> miette::Result<()> {
    if let Some(output) = output {
        let file = File::create(output).into_diagnostic()?;
        stepwise_cli::evaluate_run(config, &script, file)
    } else {
        stepwise_cli::evaluate_run(config, &script, std::io::stdout())
    }
}
