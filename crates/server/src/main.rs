use lexrag::AppConfig;
use server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ServerConfig::load()?;
    let app_config = AppConfig::load().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    server::start_server(config, app_config).await
}
