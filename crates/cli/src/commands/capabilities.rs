//! `backpacker capabilities`: list the registered capabilities.

use backpacker_config::AppConfig;
use backpacker_tools::default_toolbox;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toolbox = default_toolbox(&config)?;

    println!("Capabilities ({}):\n", toolbox.registry.len());
    for descriptor in toolbox.registry.describe_all() {
        println!(
            "  {}({})  [timeout {}s]",
            descriptor.name,
            descriptor.input_schema.signature(),
            descriptor.timeout.as_secs()
        );
        println!("      {}", descriptor.description);
    }
    Ok(())
}
