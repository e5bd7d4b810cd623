use std::path::PathBuf;

use clap::Parser;

#[derive(Clone, Debug, Parser)]
#[command(version, about = "panicdb (post-mortem panic debugger bridge)")]
pub struct Options {
    /// Captured fault dump to serve (the panic handler's console output).
    pub input: PathBuf,

    /// Chip that produced the dump.
    #[arg(short = 't', long = "target")]
    pub target: String,

    /// Write a timestamped record of every RSP command and reply to this file.
    #[arg(long = "log")]
    pub log: Option<PathBuf>,
}
