use std::io;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use panicdb::{options::Options, rsp::RspServer, target::Target};
use strum::VariantNames;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

fn main() -> Result<()> {
    let options = Options::parse();
    let _log_guard = init_logging(options.log.as_deref())?;

    let target = Target::from_str(&options.target).map_err(|_| {
        anyhow!(
            "unknown target {:?} (supported: {})",
            options.target,
            Target::VARIANTS.join(", ")
        )
    })?;
    let spec = target.spec();

    let text = std::fs::read_to_string(&options.input)
        .with_context(|| format!("reading fault dump {:?}", options.input))?;
    let fault = (spec.parse)(&text)
        .with_context(|| format!("parsing fault dump {:?} for {target}", options.input))?;

    // stdout carries the protocol; diagnostics go to stderr and the log file
    let mut server = RspServer::new(
        fault,
        spec.gdb_registers,
        io::stdin().lock(),
        io::stdout().lock(),
    );
    let end = server.run()?;
    tracing::info!(?end, "session finished");

    Ok(())
}

/// Stderr gets whatever RUST_LOG asks for (warnings by default); `--log`
/// additionally captures the full command/reply exchange, timestamped, at
/// debug level.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .from_env_lossy(),
    );

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating log file {path:?}"))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG);
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(stderr_layer).init();
            Ok(None)
        }
    }
}
