//! `convoke doctor`: check configuration and stored state.

use convoke_config::AppConfig;
use convoke_core::provider::Provider;
use convoke_providers::OpenAiCompatProvider;

use super::local;

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Convoke Doctor");
    println!("==============\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ok    Config file {}", config_path.display());
    } else {
        println!("  info  No config file, using defaults");
    }

    if config.api_key.is_some() {
        println!("  ok    API key configured");
    } else {
        println!("  warn  No API key configured");
        issues += 1;
    }

    let db_path = config.storage.resolved_path();
    if db_path.exists() {
        println!("  ok    DB file {}", db_path.display());
    } else {
        println!("  info  No DB file yet at {}", db_path.display());
    }

    let assistant = match local::bootstrap(&config).await {
        Ok(assistant) => assistant,
        Err(e) => {
            println!("  fail  DB could not be loaded: {e}");
            return Err(e);
        }
    };

    let scopes = assistant.db().scope_ids().await;
    let mut memories = 0;
    for scope in &scopes {
        memories += assistant.list_memories(*scope).await.len();
    }
    println!("  ok    {} scope(s), {} memories", scopes.len(), memories);

    let report = assistant.collect_garbage().await;
    println!("  ok    State health: {}", report.health());
    if report.changed() {
        println!(
            "        removed {} scope(s), {} role override(s), {} blacklist id(s), {} conversation(s)",
            report.scopes_removed,
            report.role_overrides_removed,
            report.blacklist_removed,
            report.conversations_expired
        );
    }

    if config.api_key.is_some() {
        let provider =
            OpenAiCompatProvider::new("openai", config.api_url.clone(), config.api_key.clone());
        match provider.health_check().await {
            Ok(true) => println!("  ok    Endpoint {} reachable", config.api_url),
            Ok(false) => {
                println!("  warn  Endpoint {} answered but is unhealthy", config.api_url);
                issues += 1;
            }
            Err(e) => {
                println!("  fail  Endpoint {}: {e}", config.api_url);
                issues += 1;
            }
        }
    }

    if report.changed() {
        assistant.shutdown().await;
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}
