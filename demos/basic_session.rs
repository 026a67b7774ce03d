//! Basic session example
//!
//! Usage:
//!   CADENCE_EMAIL=fan@cadence.fm CADENCE_PASSWORD=... cargo run --example basic_session

use cadence_client::storage::FileStorage;
use cadence_client::{ClientConfig, Credentials, Session, SessionEvent};
use reqwest::Method;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("CADENCE_CONFIG").ok();
    let config = ClientConfig::load(config_path.as_deref())?;

    let session_file = std::env::var("CADENCE_SESSION_FILE")
        .unwrap_or_else(|_| "cadence-session.json".to_string());

    println!("=== Cadence Session Example ===");
    println!("API: {}", config.base_url);
    println!("Session file: {}", session_file);
    println!();

    let session = Session::new(config, Arc::new(FileStorage::new(&session_file)))?;

    // Play the router: react to session events
    let mut events = session.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Expired { reason } => println!("! Session expired ({reason:?}), back to the login page"),
                other => println!("  event: {other:?}"),
            }
        }
    });

    if session.resume().await {
        println!("✓ Resumed previous session");
    } else {
        let email = std::env::var("CADENCE_EMAIL")?;
        let password = std::env::var("CADENCE_PASSWORD")?;
        let persistence = session.login(&Credentials { email, password }).await?;
        println!("✓ Logged in (persisted: {})", persistence.is_durable());
    }
    println!("Guard for /reviews: {:?}", session.guards().requires_auth());
    println!();

    println!("Fetching my reviews...");
    match session.send(session.request(Method::GET, "/me/reviews")).await {
        Ok(response) => println!("✓ {} {}", response.status(), response.text().await?),
        Err(e) => println!("! Request failed: {e}"),
    }
    println!();

    if std::env::var("CADENCE_LOGOUT").is_ok() {
        session.logout().await;
        println!("✓ Logged out");
    }

    Ok(())
}
