//! `convoke memory`: inspect and edit a scope's memories.

use convoke_config::AppConfig;
use convoke_core::host::ScopeId;

use super::local;

pub async fn list(config: AppConfig, scope: ScopeId) -> Result<(), Box<dyn std::error::Error>> {
    let assistant = local::bootstrap(&config).await?;
    let memories = assistant.list_memories(scope).await;
    if memories.is_empty() {
        println!("No memories stored for scope {scope}");
        return Ok(());
    }

    println!("Memories for scope {scope}");
    for (name, memory) in memories {
        let marker = if memory.ai_created { " (ai)" } else { "" };
        println!("  {name}{marker}: {}", preview(&memory.text, 80));
    }
    Ok(())
}

pub async fn add(
    config: AppConfig,
    scope: ScopeId,
    name: &str,
    text: &str,
    overwrite: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let assistant = local::bootstrap(&config).await?;
    local::prepare_scope(&assistant, scope, &config).await;

    let result = assistant.add_embedding(scope, name, text, overwrite).await;
    assistant.shutdown().await;

    match result? {
        Some(embedding) => {
            println!("Stored '{name}' ({} dimensions)", embedding.len());
            Ok(())
        }
        None => Err("The embedder returned nothing, memory not stored".into()),
    }
}

pub async fn search(
    config: AppConfig,
    scope: ScopeId,
    query: &str,
    k: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let assistant = local::bootstrap(&config).await?;
    local::prepare_scope(&assistant, scope, &config).await;

    let hits = assistant.search_memories(scope, query, k).await?;
    if hits.is_empty() {
        println!("No memories found");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "  {:>2}. [{:.3}] {}: {}",
            i + 1,
            hit.score,
            hit.name,
            preview(&hit.text, 80)
        );
    }
    Ok(())
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}
