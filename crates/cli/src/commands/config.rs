use eyre::Result;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::cli::ConfigCommands;
use crate::config::Config;

pub async fn handle_config_command(
    cmd: ConfigCommands,
    config: Config,
    path: Option<PathBuf>,
) -> Result<()> {
    let path = path.unwrap_or_else(Config::get_config_path);
    match cmd {
        ConfigCommands::Set { key, value } => handle_set_config(key, value, config, &path).await,
        ConfigCommands::Get { key } => {
            println!("{}: {}", key, config.get_value(&key)?);
            Ok(())
        }
        ConfigCommands::Show => {
            println!("{}", config.show_all());
            println!("\nFile: {}", path.display());
            Ok(())
        }
        ConfigCommands::Reset { force } => handle_reset_config(force, &path).await,
    }
}

async fn handle_set_config(
    key: String,
    value: String,
    mut config: Config,
    path: &std::path::Path,
) -> Result<()> {
    match config.set_value(&key, &value) {
        Ok(_) => {
            config.save_to(path).await?;
            println!("✅ Configuration updated: {} = {}", key, value);
        }
        Err(e) => {
            println!("❌ Failed to set configuration: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

async fn handle_reset_config(force: bool, path: &std::path::Path) -> Result<()> {
    if !force {
        print!("Are you sure you want to reset all configuration? (y/N): ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().to_lowercase().starts_with('y') {
            println!("❌ Cancelled");
            return Ok(());
        }
    }

    Config::default().save_to(path).await?;
    println!("✅ Configuration reset to defaults");
    Ok(())
}
