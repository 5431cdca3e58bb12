//! Terraform Provider for OVH
//!
//! This provider implements the Terraform Plugin Protocol for the OVH
//! managed Kubernetes API: the `ovh_kube` data source and the
//! `ovh_kube_node` resource.

mod client;
mod config;
mod data_sources;
mod provider;
mod resources;
mod schema;

use anyhow::Context;
use clap::Parser;
use provider::OvhProvider;
use std::io::{self, BufRead, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Terraform Provider for OVH
#[derive(Parser, Debug)]
#[command(name = "terraform-provider-ovh")]
#[command(about = "Terraform provider for OVH managed Kubernetes")]
struct Args {
    /// Enable debug mode; any non-falsey TF_LOG value turns it on
    #[arg(long, env = "TF_LOG", value_parser = clap::builder::FalseyValueParser::new())]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries the protocol, logs go to stderr
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    tracing::info!("Starting Terraform Provider for OVH");

    let provider = OvhProvider::new().context("Failed to create Tokio runtime")?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdout_lock = stdout.lock();

    for line in stdin.lock().lines() {
        let input = line.context("Failed to read input")?;
        if input.trim().is_empty() {
            continue;
        }

        let response = provider.handle_request(&input);
        writeln!(stdout_lock, "{}", response).context("Failed to write response")?;
        stdout_lock.flush().context("Failed to flush stdout")?;
    }

    tracing::info!("Terraform Provider shutting down");
    Ok(())
}
