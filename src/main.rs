use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use vmin::errors::EXIT_FATAL;

mod cmd;

#[derive(Parser)]
#[command(name = "vmin")]
#[command(version, about = "Resumable minimum-voltage characterization runner")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding the checkpoint, vmin.toml, results and logs (default: ./.vmin)
    #[arg(long, global = true, env = "VMIN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new session or resume the checkpointed one
    Run(RunArgs),
    /// Show the checkpointed session and configuration warnings
    Status,
    /// Delete the checkpoint and the autostart entry
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// List the rows of the task source
    Tasks {
        #[arg(long, env = "VMIN_TASK_CSV")]
        task_csv: Option<PathBuf>,
    },
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Manual start: discard any checkpoint and begin at the first task
    #[arg(long)]
    pub start: bool,

    /// Watchdog server address
    #[arg(long, env = "VMIN_SERVER_IP")]
    pub server_ip: Option<String>,

    /// Peer that power-cycles this host when heartbeats stop
    #[arg(long, alias = "peer-ip", env = "VMIN_WOMBAT_IP")]
    pub wombat_ip: Option<String>,

    /// Address of this host as seen by the watchdog server
    #[arg(long, env = "VMIN_CLIENT_IP")]
    pub client_ip: Option<String>,

    #[arg(long, env = "VMIN_TASK_CSV")]
    pub task_csv: Option<PathBuf>,

    /// Working directory of the diagnostic harness
    #[arg(long, env = "VMIN_DIAG_FOLDER")]
    pub diag_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Run(_)) {
        vmin::logging::init_stderr(cli.verbose);
    }

    let result = match &cli.command {
        Commands::Run(args) => cmd::cmd_run(&cli, args).await,
        Commands::Status => cmd::cmd_status(&cli).map(|_| 0),
        Commands::Reset { force } => cmd::cmd_reset(&cli, *force).map(|_| 0),
        Commands::Tasks { task_csv } => cmd::cmd_tasks(&cli, task_csv.clone()).map(|_| 0),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}
