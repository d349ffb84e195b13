//! pingwatch - website uptime monitor
//!
//! Probes the registered sites on demand, records every result and keeps
//! per-site uptime and response time stats up to date.

mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::{PingOrigin, Store};
use probe::HttpProber;
use scheduler::{DueMode, Scheduler, SchedulerOptions};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting pingwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path, cfg.db_busy_timeout)?);
    tracing::info!("Database initialized successfully");

    // Add sample site if none exist
    if store.count_sites()? == 0 {
        tracing::info!("Adding sample site: Example");
        let mut site = db::Site {
            name: "Example".to_string(),
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        store.add_site(&mut site)?;
    }

    let prober = HttpProber::new(cfg.probe_timeout, &cfg.user_agent)?;
    tracing::info!(
        "Probing with a {:?} timeout, at most {} at once",
        prober.timeout(),
        cfg.max_concurrent_probes
    );

    let due_mode = if cfg.always_due {
        DueMode::Always
    } else {
        DueMode::Interval
    };
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        Arc::new(prober),
        SchedulerOptions {
            max_concurrent_probes: cfg.max_concurrent_probes,
            origin: PingOrigin {
                location: cfg.location.clone(),
                region_code: cfg.region_code.clone(),
            },
            due_mode,
        },
    ));

    // Start web server
    let server = Server::new(cfg, store, scheduler);
    server.start().await?;

    Ok(())
}
