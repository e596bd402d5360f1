pub mod api;
pub mod chat;

use crate::cli::Args;
use axum::Router;
use log::{ info, warn };
use std::error::Error;
use std::net::SocketAddr;

pub use self::api::{ build_router, AppState };

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: AppState, args: Args) -> Self {
        Self { addr, state, args }
    }

    pub async fn run(self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let tls = self.tls_paths();
        let app = build_router(self.state);

        match tls {
            Some((cert_path, key_path)) => serve_tls(addr, app, &cert_path, &key_path).await,
            None => {
                if self.args.enable_tls {
                    warn!("ENABLE_TLS is set but the certificate or key path is missing; serving plain HTTP");
                }
                let listener = tokio::net::TcpListener::bind(addr).await?;
                info!("HTTP server listening on http://{}", addr);
                axum::serve(listener, app.into_make_service()).await?;
                Ok(())
            }
        }
    }

    fn tls_paths(&self) -> Option<(String, String)> {
        if !self.args.enable_tls {
            return None;
        }
        match (&self.args.tls_cert_path, &self.args.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }
}

async fn serve_tls(
    addr: SocketAddr,
    app: Router,
    cert_path: &str,
    key_path: &str
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
    info!("HTTPS server listening on https://{}", addr);
    axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
    Ok(())
}
