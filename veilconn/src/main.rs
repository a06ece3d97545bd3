#![allow(dead_code)]

use crate::app::App;
use crate::cli::SubCommand;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

mod app;
mod artifact;
mod cli;
mod config;
mod external;
mod manager;
mod rules;

#[derive(Debug, Parser)]
#[command(name = "veilconn", about = "Rule-driven tunnel manager")]
struct ProgramArgs {
    /// Application data directory; defaults to ~/.local/share/veilconn.
    #[arg(short = 'd', long)]
    pub app_data: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: SubCommand,
}

fn main() -> ExitCode {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    let _guard = rt.enter();
    let args: ProgramArgs = ProgramArgs::parse();
    let cmds = match args.cmd {
        SubCommand::Start(sub) => sub,
        SubCommand::Init(sub) => return init_dirs(sub),
        SubCommand::Generate(sub) => return rt.block_on(generate_only(sub)),
        _ => rt.block_on(cli::controller_main(args)),
    };
    let (config_path, data_path) = match config::parse_paths(&cmds.config, &cmds.app_data) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to resolve config and app data paths: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if !config_path.try_exists().is_ok_and(|x| x) {
        eprintln!(
            "Config path {} not found.\nDo you forget to run `veilconn init` first?",
            config_path.to_string_lossy()
        );
        return ExitCode::FAILURE;
    }
    let app = match rt.block_on(App::create(config_path, data_path)) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = rt.block_on(app.serve_command()) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    tracing::info!("Exiting...");
    rt.shutdown_timeout(Duration::from_millis(300));
    ExitCode::SUCCESS
}

fn init_dirs(cmds: cli::StartOptions) -> ExitCode {
    let (config_path, data_path) = match config::parse_paths(&cmds.config, &cmds.app_data) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to resolve config and app data paths: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let created = match config::test_or_create_profile(&config_path) {
        Ok(created) => created,
        Err(e) => {
            eprintln!("Failed to create default profile: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config::ArtifactPaths::new(&data_path).ensure_layout() {
        eprintln!("Failed to create data directories: {}", e);
        return ExitCode::FAILURE;
    }
    if created {
        println!("Created {}", config_path.to_string_lossy());
    } else {
        println!("Profile already present; nothing to do");
    }
    ExitCode::SUCCESS
}

/// Rebuild the artifacts from the profile without contacting the tunnel
/// subsystem, for inspecting what the engine would consume.
async fn generate_only(cmds: cli::StartOptions) -> ExitCode {
    let (config_path, data_path) = match config::parse_paths(&cmds.config, &cmds.app_data) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to resolve config and app data paths: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let run = || -> anyhow::Result<()> {
        let profile = config::Profile::load(&config_path.join("profile.yml"))?;
        let store = std::sync::Arc::new(external::FilePreferenceStore::load(
            data_path.join("preferences.json"),
        )?);
        let group = manager::init_default_group(&profile, store.as_ref());
        let writer = artifact::ArtifactWriter::new(config::ArtifactPaths::new(&data_path));
        let manager = manager::Manager::new(
            external::LoopbackBackend::default(),
            store,
            writer,
            app::APP_NAME,
        );
        manager.set_default_group(group)?;
        Ok(())
    };
    match run() {
        Ok(()) => {
            println!("Artifacts written to {}", data_path.to_string_lossy());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
