//! Config command implementation.

use anyhow::{Context as _, Result};

use super::Context;
use crate::cli::ConfigAction;

pub fn cmd_config(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => println!("{}", ctx.config_path.display()),
        ConfigAction::Show => {
            let content =
                toml::to_string_pretty(&ctx.config).context("Failed to serialize config")?;
            println!("# {}", ctx.config_path.display());
            println!("# log directory: {}", ctx.log_dir.display());
            print!("{content}");
        }
        ConfigAction::SetDut { name } => {
            let mut config = ctx.config.clone();
            config.dut = Some(name.trim().to_string());
            config.save(&ctx.config_path)?;
            if !ctx.quiet {
                println!("Default device under test set to {}", name.trim());
            }
        }
        ConfigAction::UnsetDut => {
            let mut config = ctx.config.clone();
            config.dut = None;
            config.save(&ctx.config_path)?;
            if !ctx.quiet {
                println!("Default device under test cleared");
            }
        }
    }
    Ok(())
}
