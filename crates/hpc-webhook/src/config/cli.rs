use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::serve::ScanArgs;
use crate::config::serve::ServeArgs;

#[derive(Parser, Debug)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to a daily rotated file, e.g. /logs/hpc-webhook.log"
    )]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the admission webhook and the capacity poller
    Serve(Box<ServeArgs>),
    /// Scan the cluster once and print the free capacity as JSON
    Scan(ScanArgs),
}
