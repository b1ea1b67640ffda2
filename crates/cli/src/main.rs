use anyhow::Error;
use env_logger::Env;
use fehler::throws;

#[throws]
#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();
    solkit_cli::start().await?
}
