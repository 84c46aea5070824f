use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use envdeck_core::{default_app_home, AppLayout};
use tracing::debug;

use crate::completion::write_completions_script;
use crate::config::{load_config, EnvdeckConfig};
use crate::env_flows::{
    run_env_backup, run_env_create, run_env_import, run_env_list, run_env_remove, run_python,
};
use crate::package_flows::{open_package_service, run_package_command};
use crate::render::TerminalRenderer;
use crate::self_update::{run_self_check, run_self_update};

#[derive(Parser, Debug)]
#[command(name = "envdeck")]
#[command(version, about = "Manage Python virtual environments and their packages", long_about = None)]
pub struct Cli {
    /// State directory; defaults to $ENVDECK_HOME or ~/.envdeck.
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Registered environments.
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },
    /// Packages of one registered environment.
    Pkg {
        /// Registered environment path or name.
        #[arg(long)]
        env: String,
        #[command(subcommand)]
        command: PkgCommands,
    },
    /// Version of the default system interpreter.
    Python,
    #[command(name = "self")]
    SelfCmd {
        #[command(subcommand)]
        command: SelfCommands,
    },
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Subcommand, Debug)]
pub enum EnvCommands {
    List,
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        location: PathBuf,
        /// Interpreter used to create the environment.
        #[arg(long)]
        python: Option<PathBuf>,
    },
    Import {
        path: PathBuf,
    },
    /// Forget an environment. Its files stay on disk.
    Remove {
        path: String,
    },
    Backup {
        path: String,
        #[arg(long)]
        dest: PathBuf,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum PkgCommands {
    List {
        #[arg(long)]
        skip_outdated: bool,
    },
    Outdated,
    Install {
        name: String,
        #[arg(long)]
        version: Option<String>,
    },
    Uninstall {
        name: String,
        #[arg(long)]
        yes: bool,
    },
    Upgrade {
        name: String,
    },
    UpgradeAll,
    InstallLocal {
        file: PathBuf,
    },
    Deps {
        name: String,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfCommands {
    Check,
    Update {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliCompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

/// Everything a command needs besides its own arguments.
pub struct AppContext {
    pub layout: AppLayout,
    pub config: EnvdeckConfig,
    pub renderer: TerminalRenderer,
}

impl AppContext {
    pub fn load(home: Option<PathBuf>) -> Result<Self> {
        let home = match home {
            Some(home) => home,
            None => default_app_home().context(
                "cannot determine the envdeck home directory; set ENVDECK_HOME or pass --home",
            )?,
        };
        let layout = AppLayout::new(home);
        layout.ensure_base_dirs().with_context(|| {
            format!(
                "failed to create envdeck home directory: {}",
                layout.home().display()
            )
        })?;
        let config = load_config(&layout.config_path())?;
        debug!(home = %layout.home().display(), ?config, "loaded configuration");

        Ok(Self {
            layout,
            config,
            renderer: TerminalRenderer::current(),
        })
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        let mut stdout = std::io::stdout();
        return write_completions_script(shell, &mut stdout);
    }

    let ctx = AppContext::load(cli.home)?;
    match cli.command {
        Commands::Env { command } => match command {
            EnvCommands::List => run_env_list(&ctx)?,
            EnvCommands::Create {
                name,
                location,
                python,
            } => run_env_create(&ctx, &name, &location, python)?,
            EnvCommands::Import { path } => run_env_import(&ctx, &path)?,
            EnvCommands::Remove { path } => run_env_remove(&ctx, &path)?,
            EnvCommands::Backup { path, dest } => run_env_backup(&ctx, &path, &dest)?,
        },
        Commands::Pkg { env, command } => {
            let service = open_package_service(&ctx, &env)?;
            run_package_command(&ctx, service, command)?;
        }
        Commands::Python => run_python(&ctx),
        Commands::SelfCmd { command } => match command {
            SelfCommands::Check => run_self_check(&ctx)?,
            SelfCommands::Update { yes } => run_self_update(&ctx, yes)?,
        },
        Commands::Completions { .. } => unreachable!("handled before loading state"),
    }

    Ok(())
}
