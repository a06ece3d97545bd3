mod request;

use crate::ProgramArgs;
use clap::{Args, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub(crate) struct StartOptions {
    /// Path of the configuration directory
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    pub config: Option<PathBuf>,
    /// Path of the application data directory
    #[arg(short = 'd', long, value_hint = ValueHint::DirPath)]
    pub app_data: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum SubCommand {
    /// Run the tunnel manager
    Start(StartOptions),
    /// Toggle the tunnel from another process
    Switch,
    /// Query the current connection state
    Status,
    /// Regenerate the engine artifacts without touching the tunnel
    Generate(StartOptions),
    /// Create the configuration directory with a default profile
    Init(StartOptions),
}

pub(crate) async fn controller_main(args: ProgramArgs) -> ! {
    let result = match args.cmd {
        SubCommand::Switch => request::send_switch(&args.app_data).await,
        SubCommand::Status => request::send_status(&args.app_data).await,
        _ => unreachable!(),
    };
    match result {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1)
        }
    }
}
