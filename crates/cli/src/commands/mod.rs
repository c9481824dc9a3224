pub mod ask;
pub mod capabilities;
pub mod chat;
pub mod doctor;
pub mod init;

use backpacker_agent::Assistant;
use backpacker_config::AppConfig;
use backpacker_core::answer::FinalAnswer;

/// Load config and build the assistant, with a readable error when no LLM
/// key is available.
pub fn load_assistant() -> Result<(AppConfig, Assistant), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    BACKPACKER_API_KEY, OPENROUTER_API_KEY, OPENAI_API_KEY, GOOGLE_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let assistant =
        Assistant::from_config(&config).map_err(|e| format!("Failed to start assistant: {e}"))?;
    Ok((config, assistant))
}

/// Print an answer line by line after `prefix`.
pub fn print_answer(answer: &FinalAnswer, prefix: &str) {
    for line in answer.to_string().lines() {
        println!("{prefix}{line}");
    }
}
