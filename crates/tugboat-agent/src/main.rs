//! Agent binary: binds the HTTP surface and serves it until killed.

mod adapter;
mod server;

use std::sync::Arc;

use clap::Parser;

use adapter::UnconfiguredEngine;
use server::AgentServer;

/// HTTP agent exposing container-engine operations to the fleet controller.
#[derive(Parser, Debug)]
#[command(name = "tugboat-agent", version, about)]
struct Cli {
    /// Address to bind, e.g. "0.0.0.0:9443".
    #[arg(long, default_value = "0.0.0.0:9443", env = "TUGBOAT_AGENT_BIND")]
    bind: String,

    /// Shared secret used to verify signed requests. Unset accepts any
    /// signature (or none) as long as the timestamp is within the TTL.
    #[arg(long, env = "TUGBOAT_AGENT_SECRET")]
    secret: Option<String>,

    /// Maximum age, in seconds, of a request's `X-Timestamp` header.
    #[arg(long, default_value_t = 30, env = "TUGBOAT_AGENT_SIGNATURE_TTL")]
    signature_ttl: i64,

    /// Number of worker threads accepting connections concurrently.
    #[arg(long, default_value_t = 8, env = "TUGBOAT_AGENT_WORKERS")]
    workers: usize,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let engine = Arc::new(UnconfiguredEngine);
    let agent = AgentServer::bind(&cli.bind, engine, cli.secret, cli.signature_ttl, cli.workers)?;

    eprintln!("tugboat-agent listening on {}", cli.bind);
    agent.run();

    Ok(())
}
