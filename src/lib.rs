pub mod auth;
pub mod cli;
pub mod history;
pub mod llm;
pub mod models;
pub mod relay;
pub mod server;

use auth::{ AccessGate, PasswordHasher };
use cli::Args;
use history::initialize_stores;
use llm::chat::ChatUpstream;
use log::{ info, warn };
use relay::StreamRelay;
use server::{ AppState, Server };
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Upstream API: {}", args.upstream_api);
    info!("Upstream Base URL: {}", args.upstream_base_url);
    info!("Chat Model: {}", args.chat_model);
    info!("Relay Timeout: {}s (0 = none)", args.relay_timeout_secs);
    info!("Chat Rate Limit: {}/s (0 = off)", args.chat_rate_limit);
    info!("Store Type: {}", args.store_type);
    info!("Store Host: {}", args.store_host);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let upstream = ChatUpstream::from_config(&args.llm_config())?;
    let relay = StreamRelay::new(upstream, args.relay_timeout());
    let stores = initialize_stores(&args)?;

    let gate = AccessGate::new(args.access_secret());
    if gate.is_open() {
        warn!("ACCESS_SECRET is not set; transcript endpoints are open to everyone");
    }

    let state = AppState::new(
        relay,
        stores,
        PasswordHasher::new(args.password_hash_rounds),
        gate
    ).with_chat_rate_limit(args.chat_rate_limit);

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    Server::new(addr, state, args).run().await
}
