//! `backpacker init`: first-time setup.

use backpacker_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    let guides_dir = AppConfig::default().retrieval.docs_dir;

    println!("Backpacker setup");
    println!("================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("  Created config directory: {}", config_dir.display());
    }

    if !guides_dir.exists() {
        std::fs::create_dir_all(&guides_dir)?;
        println!("  Created guides directory: {}", guides_dir.display());
    }

    if config_path.exists() {
        println!("\n  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete it and re-run init.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("  Created config.toml at: {}", config_path.display());
        println!("\n  Next steps:");
        println!("   1. Add your API key to {}", config_path.display());
        println!("   2. Drop .md or .txt travel guides into {}", guides_dir.display());
        println!("   3. Run: backpacker chat\n");
    }

    Ok(())
}
