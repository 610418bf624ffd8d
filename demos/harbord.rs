// Demos are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Harbord Daemon Demo
//!
//! Boots the daemon over a root directory, restores persisted containers,
//! optionally creates and starts one, and shuts everything down on Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Restore whatever lives under ./harbord-root
//! cargo run --example harbord -- --root ./harbord-root
//!
//! # Load a TOML config instead
//! cargo run --example harbord -- --config harbord.toml
//!
//! # Create and start a container before waiting
//! cargo run --example harbord -- --root ./harbord-root --run /bin/sleep 600
//! ```

use harbord::prelude::*;
use tokio::signal;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }

    let config = match flag_value(&args, "--config") {
        Some(path) => DaemonConfig::load(path).expect("failed to load config"),
        None => DaemonConfig::new(flag_value(&args, "--root").unwrap_or("./harbord-root")),
    };

    let daemon = Daemon::init(config).await.expect("daemon init failed");
    println!("[INIT] root: {}", daemon.config().root.display());
    println!("[INIT] graph driver: {}", daemon.graph_driver_name());
    for container in daemon.list() {
        println!(
            "[INIT] {} {:<24} {}",
            container.id().truncate(),
            container.name(),
            container.state().status()
        );
    }

    if let Some(pos) = args.iter().position(|a| a == "--run") {
        let cmd = args[pos + 1..].to_vec();
        let container = daemon
            .create_container(CreateOptions::new(cmd))
            .await
            .expect("create failed");
        daemon
            .start_container(&container)
            .await
            .expect("start failed");
        println!("[RUN] started {} as {}", container.id().truncate(), container.name());
    }

    println!("[RUN] Press Ctrl+C to stop");
    signal::ctrl_c().await.expect("failed to listen for Ctrl+C");

    println!("[SHUTDOWN] stopping containers...");
    daemon.shutdown().await.expect("shutdown failed");
    println!("[SHUTDOWN] done");
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn print_help() {
    println!("Harbord daemon demo");
    println!();
    println!("USAGE:");
    println!("    harbord [--root DIR | --config FILE] [--run CMD [ARGS...]]");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG    tracing filter (e.g. harbord_core=debug)");
}
