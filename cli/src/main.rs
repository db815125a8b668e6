use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::commands::mapping::command_mapping;
use crate::commands::rules::command_rules;

mod commands;

#[derive(Parser)]
#[command(version, about, arg_required_else_help(true))]
struct Cli {
    #[command(subcommand)]
    commands: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate keep-rule files
    Rules {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Emit a machine-readable summary
        #[arg(long)]
        json: bool,
    },
    /// Parse and normalize a proguard-compatible map
    Mapping {
        #[arg(required = true)]
        path: PathBuf,

        /// Re-emit the normalized map instead of a summary
        #[arg(long)]
        normalize: bool,

        /// Emit a machine-readable summary
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match &cli.commands {
        Some(Commands::Rules { paths, json }) => command_rules(paths, *json),
        Some(Commands::Mapping {
            path,
            normalize,
            json,
        }) => command_mapping(path, *normalize, *json),
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "dexshrink",
                &mut std::io::stdout(),
            );
            Ok(())
        }
        None => Ok(()),
    };

    if let Err(err) = result {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}
