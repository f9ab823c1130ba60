use std::ffi::OsStr;
use std::io::Write;
use std::path::Path;

use kdl::KdlDocument;
use miette::IntoDiagnostic;
use stepwise_engine::DebugContext;

use crate::script::Script;
use crate::{EventLog, Interpreter, SessionConfig, SessionRecorder};

/// Runs the subcommand for running an execution script.
pub fn evaluate_run(config: String, script: &Path, mut output: impl Write) -> miette::Result<()> {
    let config = parse_session_config(config)?;

    let content = std::fs::read_to_string(script).into_diagnostic()?;
    let filename = script
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or("<script>");

    let kdl = run_script(&config, filename, &content)?;

    output
        .write_all(kdl.to_string().as_bytes())
        .into_diagnostic()?;

    Ok(())
}

/// Parses a session configuration, given inline or as a `.kdl` path.
pub fn parse_session_config(config: String) -> miette::Result<SessionConfig> {
    let path = Path::new(&config);

    let config = if let Some((filename, "kdl")) = path
        .file_name()
        .and_then(OsStr::to_str)
        .zip(path.extension().and_then(OsStr::to_str))
    {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        knus::parse(filename, &content)?
    } else {
        knus::parse("<content>", &config)?
    };

    Ok(config)
}

/// Runs an execution script in a fresh debug session, returning the event
/// log.
#[tracing::instrument(skip(config, content))]
pub fn run_script(
    config: &SessionConfig,
    filename: &str,
    content: &str,
) -> miette::Result<KdlDocument> {
    let script = knus::parse::<Script>(filename, content)?;

    let log = EventLog::default();

    let context = DebugContext::builder()
        .with_subscriber(SessionRecorder::new(log.clone(), config.backtrace_depth))
        .debug_mode(config.debug_mode.into())
        .build();

    for file_mode in &config.file_modes {
        context
            .source_file(&file_mode.file)
            .set_mode(file_mode.mode.into());
    }

    let mut interpreter = Interpreter::new(context);
    for breakpoint in &config.breakpoints {
        interpreter.add_breakpoint(breakpoint.span());
    }

    interpreter
        .execute(script.items, &log)
        .into_diagnostic()?;

    Ok(log.to_document())
}
