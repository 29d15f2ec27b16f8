//! Sampledepot HTTP server entry point.
//!
//! Run with: cargo run --release --features server --bin sampledepot-server

use std::net::SocketAddr;
use std::sync::Arc;

use sampledepot::config::Config;
use sampledepot::mail::{NullNotifier, Notifier, SmtpNotifier};
use sampledepot::server::{router, AppState};
use sampledepot::{bootstrap, db, token};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load().expect("load configuration");
    db::init(&config.data_dir).expect("open storage environment");

    let admin_password = config.admin_password.clone().unwrap_or_else(|| {
        let generated = token::random_id();
        tracing::warn!(login = %config.admin_login, password = %generated, "generated admin password; set admin_password to pin it");
        generated
    });
    bootstrap::bootstrap(&config.admin_login, &config.admin_email, &admin_password).expect("bootstrap admin account");

    let notifier: Arc<dyn Notifier> = if config.mail_smtp.is_empty() {
        Arc::new(NullNotifier)
    } else {
        let (host, port) = config.mail_smtp_host_port();
        match SmtpNotifier::new(&host, port, &config.mail_from) {
            Ok(n) => Arc::new(n),
            Err(e) => {
                tracing::error!(error = %e, "failed to configure smtp notifier, falling back to null notifier");
                Arc::new(NullNotifier)
            }
        }
    };

    let state = AppState::new(config, notifier);
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind listener");
    axum::serve(listener, app).await.expect("server error");
}
