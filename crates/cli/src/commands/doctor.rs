//! `backpacker doctor`: check config, the guides directory and the LLM endpoint.

use backpacker_config::AppConfig;
use backpacker_providers::build_from_config;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Backpacker doctor");
    println!("=================\n");

    let mut issues = 0;

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ok    Config loaded");
            config
        }
        Err(e) => {
            println!("  FAIL  Config invalid: {e}");
            return Err("Fix the config file and run doctor again.".into());
        }
    };

    if config.retrieval.index_url.is_some() || config.retrieval.docs_dir.is_dir() {
        println!("  ok    Guide source available");
    } else {
        println!(
            "  warn  No guides at {}, run `backpacker init`",
            config.retrieval.docs_dir.display()
        );
        issues += 1;
    }

    if !config.has_api_key() && config.default_provider != "ollama" {
        println!("  warn  No LLM API key configured");
        issues += 1;
    }

    let router = build_from_config(&config)?;
    match router.resolve(&config.default_model) {
        Some((provider, model)) => match provider.health_check().await {
            Ok(true) => {
                println!("  ok    {} reachable", provider.name());
                let models = provider.list_models().await.unwrap_or_default();
                if models.is_empty() || models.iter().any(|m| *m == model) {
                    println!("  ok    Model {model}");
                } else {
                    println!("  warn  {} does not list model {model}", provider.name());
                    issues += 1;
                }
            }
            Ok(false) => {
                println!("  FAIL  {} rejected the request (check the API key)", provider.name());
                issues += 1;
            }
            Err(e) => {
                println!("  FAIL  {} unreachable: {e}", provider.name());
                issues += 1;
            }
        },
        None => {
            println!("  FAIL  No provider for model {}", config.default_model);
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}
