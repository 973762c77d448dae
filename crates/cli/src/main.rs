use clap::Parser;
use pathcache::{BackendKind, CacheConfigLoader, CacheService};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod logging;

use commands::{Commands, Outcome};

#[derive(Parser, Debug)]
#[command(name = "pathcache")]
#[command(about = "Inspect and modify a path-keyed content cache", long_about = None)]
#[command(version)]
struct Cli {
    /// Cache root directory (overrides PATHCACHE_ROOT and the config file)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Storage backend (disk, memory)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Log more detail to stderr (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("warning: logging disabled: {e}");
    }

    match run(cli) {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Missing) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> eyre::Result<Outcome> {
    let config = CacheConfigLoader::load()?;
    let config = CacheConfigLoader::apply_cli_args(config, cli.root, cli.backend)?;
    tracing::debug!(?config, "resolved cache configuration");

    let cache = CacheService::open(&config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    cli.command.execute(&cache, &mut out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pathcache", "get", "a/b", "--root", "/tmp/c", "--backend", "memory", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/c")));
        assert_eq!(cli.backend, Some(BackendKind::Memory));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Get { .. }));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Cli::try_parse_from(["pathcache", "--backend", "tape", "reclaim"]).is_err());
    }
}
