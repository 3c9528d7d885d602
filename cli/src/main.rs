//! tdeploy — build and deploy `wave` and `tray` to the tablet.
//!
//! # Usage
//!
//! ```text
//! tdeploy deploy
//! tdeploy deploy --skip-build --json
//! tdeploy --host 10.11.99.1 deploy --dry-run
//! tdeploy plan
//! tdeploy config
//! ```

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tablet_deploy_core::config::{CONFIG_ENV, DEFAULT_CONFIG_FILE};
use tablet_deploy_core::{
    CommandRunner, DeployConfig, DeployError, DryRunRunner, Orchestrator, ProcessRunner,
    RunOptions,
};

/// Exit status for a failed deployment step.
const EXIT_STEP_FAILED: i32 = 1;
/// Exit status for argument or configuration problems.
const EXIT_CONFIG: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "tdeploy")]
#[command(about = "Build, push and restart wave/tray on the tablet")]
#[command(version)]
struct Cli {
    /// Config file (YAML); defaults to ./tdeploy.yaml when present
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Device hostname or address (overrides the config file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Account on the device (overrides the config file)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build, stop running instances, transfer and launch
    Deploy {
        /// Reuse existing build output
        #[arg(long)]
        skip_build: bool,

        /// Log the commands instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the steps and commands a deploy would run
    Plan {
        /// Leave out the build command
        #[arg(long)]
        skip_build: bool,
    },

    /// Print the effective configuration as YAML
    Config,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("tdeploy: {:#}", e);
            process::exit(exit_code_for(&e));
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli)?;
    debug!(target_host = %config.user_at_host(), "configuration loaded");

    match cli.command {
        Commands::Deploy {
            skip_build,
            dry_run,
            json,
        } => {
            let options = RunOptions {
                skip_build,
                dry_run,
            };
            let runner: Box<dyn CommandRunner> = if dry_run {
                Box::new(DryRunRunner)
            } else {
                Box::new(ProcessRunner)
            };
            let report = Orchestrator::new(&config, runner.as_ref())
                .with_options(options)
                .run();

            if json {
                println!("{}", report.to_json().context("serialising run report")?);
            } else {
                println!("{}", report.summary());
            }
            Ok(if report.succeeded() { 0 } else { EXIT_STEP_FAILED })
        }
        Commands::Plan { skip_build } => {
            let options = RunOptions {
                skip_build,
                dry_run: true,
            };
            let runner = DryRunRunner;
            let orchestrator = Orchestrator::new(&config, &runner).with_options(options);
            print!("{}", render_plan(&orchestrator));
            Ok(0)
        }
        Commands::Config => {
            print!("{}", config.to_yaml()?);
            Ok(0)
        }
    }
}

/// Config precedence: `--config` / `TDEPLOY_CONFIG`, then `./tdeploy.yaml`,
/// then built-in defaults. `--host` and `--user` win over all of them.
fn load_config(cli: &Cli) -> Result<DeployConfig, DeployError> {
    let mut config = match resolve_config_path(cli.config.clone(), Path::new(".")) {
        Some(path) => {
            debug!(path = %path.display(), "reading config");
            DeployConfig::load(&path)?
        }
        None => DeployConfig::default(),
    };
    if let Some(ref host) = cli.host {
        config.host = host.clone();
    }
    if let Some(ref user) = cli.user {
        config.user = user.clone();
    }
    config.validate()?;
    Ok(config)
}

fn resolve_config_path(explicit: Option<PathBuf>, cwd: &Path) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    let local = cwd.join(DEFAULT_CONFIG_FILE);
    if local.is_file() {
        Some(local)
    } else {
        None
    }
}

fn render_plan(orchestrator: &Orchestrator<'_>) -> String {
    let mut out = String::new();
    for (i, (step, invocations)) in orchestrator.commands().iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
        for invocation in invocations {
            out.push_str(&format!("     {}\n", invocation));
        }
    }
    out
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<DeployError>() {
        Some(e) if e.is_config() => EXIT_CONFIG,
        _ => EXIT_STEP_FAILED,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tdeploy").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn deploy_flags_parse() {
        let cli = parse(&["deploy", "--skip-build", "--json"]);
        match cli.command {
            Commands::Deploy {
                skip_build,
                dry_run,
                json,
            } => {
                assert!(skip_build);
                assert!(!dry_run);
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn global_overrides_after_subcommand() {
        let cli = parse(&["plan", "--host", "10.11.99.1", "-vv"]);
        assert_eq!(cli.host.as_deref(), Some("10.11.99.1"));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["tdeploy"]).is_err());
    }

    #[test]
    fn resolve_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "").unwrap();
        let explicit = PathBuf::from("/etc/tdeploy.yaml");
        assert_eq!(
            resolve_config_path(Some(explicit.clone()), dir.path()),
            Some(explicit)
        );
    }

    #[test]
    fn resolve_falls_back_to_local_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_config_path(None, dir.path()), None);
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "").unwrap();
        assert_eq!(
            resolve_config_path(None, dir.path()),
            Some(dir.path().join(DEFAULT_CONFIG_FILE))
        );
    }

    #[test]
    fn overrides_apply_on_top_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.yaml");
        std::fs::write(&path, "host: tablet.lan\nport: 2222\n").unwrap();
        let path_str = path.to_string_lossy().to_string();
        let cli = parse(&["--config", path_str.as_str(), "--user", "admin", "config"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.user_at_host(), "admin@tablet.lan");
        assert_eq!(config.port, 2222);
    }

    #[test]
    fn empty_host_override_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.yaml");
        std::fs::write(&path, "").unwrap();
        let path_str = path.to_string_lossy().to_string();
        let cli = parse(&["--config", path_str.as_str(), "--host", "", "config"]);
        let err = anyhow::Error::from(load_config(&cli).unwrap_err());
        assert_eq!(exit_code_for(&err), EXIT_CONFIG);
    }

    #[test]
    fn option_like_user_override_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.yaml");
        std::fs::write(&path, "").unwrap();
        let path_str = path.to_string_lossy().to_string();
        let cli = parse(&[
            "--config",
            path_str.as_str(),
            "--user=-oProxyCommand=reboot",
            "config",
        ]);
        let err = anyhow::Error::from(load_config(&cli).unwrap_err());
        assert_eq!(exit_code_for(&err), EXIT_CONFIG);
    }

    #[test]
    fn step_errors_exit_one() {
        let err = anyhow::Error::from(DeployError::Build("boom".into()));
        assert_eq!(exit_code_for(&err), EXIT_STEP_FAILED);
    }

    #[test]
    fn plan_lists_numbered_steps_and_commands() {
        let config = DeployConfig::default();
        let runner = DryRunRunner;
        let orchestrator = Orchestrator::new(&config, &runner);
        let plan = render_plan(&orchestrator);
        let lines: Vec<&str> = plan.lines().collect();
        assert_eq!(lines[0], "1. build");
        assert!(lines[1].trim().starts_with("cross build --release"));
        assert_eq!(lines[2], "2. teardown");
        assert!(lines[3].trim().ends_with("root@remarkable 'killall -9 tray'"));
        assert!(plan.contains("5. launch(wave)"));
        assert!(plan.contains("root@remarkable ./wave"));
    }
}
