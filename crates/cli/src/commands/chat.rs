//! `convoke chat`: send one message and print the reply.

use convoke_agent::ChatRequest;
use convoke_config::AppConfig;
use convoke_core::host::{ActorId, ChannelId, ScopeId};

use super::local;

pub async fn run(
    config: AppConfig,
    message: String,
    scope: ScopeId,
    actor: ActorId,
    channel: ChannelId,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.api_key.is_none() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set CONVOKE_API_KEY or OPENAI_API_KEY, or add api_key to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found".into());
    }

    let assistant = local::bootstrap(&config).await?;
    local::prepare_scope(&assistant, scope, &config).await;

    let result = assistant
        .chat_with_report(ChatRequest::new(scope, actor, channel, message))
        .await;
    assistant.shutdown().await;

    match result {
        Ok(report) => {
            println!("{}", report.reply);
            if report.hit_ceiling {
                eprintln!("(stopped after {} model calls)", report.iterations);
            }
            Ok(())
        }
        Err(e) => {
            tracing::debug!(error = %e, "Chat failed");
            Err(e.user_message().into())
        }
    }
}
