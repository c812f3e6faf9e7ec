use companion_memory::{AgentMemory, MemoryConfig, Turn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Line-oriented driver: `user_id<TAB>input<TAB>keywords` per line on stdin
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = MemoryConfig::from_env()?;
    info!("🧠 Companion Memory");
    info!("📁 Preferences file: {}", config.data_path.display());

    let memory = AgentMemory::from_config(&config);
    if let Err(e) = memory.init().await {
        warn!("Long-term memory degraded, continuing with an empty table: {}", e);
    }

    let session_id = Uuid::new_v4().to_string();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        let mut fields = line.splitn(3, '\t');
        let (Some(user_id), Some(input)) = (fields.next(), fields.next()) else {
            warn!("Skipping malformed line: {:?}", line);
            continue;
        };
        let keywords = fields.next().unwrap_or("");
        let user_id = user_id.trim();
        if user_id.is_empty() {
            warn!("Skipping line without a user id");
            continue;
        }

        let context = memory.build_context(user_id).await;
        println!("[{}] history:\n{}", user_id, context.history);
        println!("[{}] preferences: {}", user_id, context.preferences);

        let reply = format!("(noted: {})", input.trim());
        let turn = Turn::new(user_id, session_id.as_str(), input.trim(), reply);
        let merged = memory.record_exchange(turn, keywords).await;
        println!("[{}] preferences now: {}", user_id, merged);
    }

    memory.shutdown().await;
    info!("✅ Preferences flushed, exiting");
    Ok(())
}
