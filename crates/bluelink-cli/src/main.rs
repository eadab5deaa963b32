use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod console;
mod format;
mod style;

use cli::{Cli, Commands};
use commands::{
    Context, cmd_cases, cmd_config, cmd_explore, cmd_logs, cmd_read, cmd_run, cmd_scan, cmd_watch,
    cmd_write,
};
use config::{Config, resolve_log_dir};
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config_file.clone().unwrap_or_else(Config::path);
    let config = Config::load(&config_path);
    let ctx = Context {
        log_dir: resolve_log_dir(cli.log_dir.clone(), &config),
        config,
        config_path,
        demo: cli.demo,
        quiet: cli.quiet,
        opts: FormatOptions {
            no_color: cli.no_color,
        },
    };

    match cli.command {
        Commands::Scan { timeout, format } => cmd_scan(&ctx, timeout, format).await,
        Commands::Cases { format } => cmd_cases(format),
        Commands::Run {
            dut,
            ids,
            all,
            format,
        } => cmd_run(&ctx, dut, ids, all, format).await,
        Commands::Explore { dut, timeout } => cmd_explore(&ctx, dut, timeout).await,
        Commands::Read { target } => cmd_read(&ctx, &target).await,
        Commands::Write {
            target,
            value,
            no_response,
        } => cmd_write(&ctx, &target, &value, no_response).await,
        Commands::Watch {
            target,
            count,
            duration,
        } => cmd_watch(&ctx, &target, count, duration).await,
        Commands::Logs { tag, tail } => cmd_logs(&ctx, &tag, tail),
        Commands::Config { action } => cmd_config(&ctx, action),
    }
}
