mod app;
mod channel;
mod config;
mod conversation;
mod error;
mod flow;
mod normalizer;
mod pagination;
mod password;
mod store;
mod telegram;
mod types;
mod validator;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env()?;
    app::run(config).await
}
