use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = scopetrail_cli::Cli::parse();
    scopetrail_cli::run_cli(cli)
}
