//! `toolwire-server` — serve the built-in tool registry over stdio.
//!
//! Stdout is the protocol channel; all logging goes to stderr.

use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use tw_mcp_server::{default_registry, serve};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let registry = match default_registry() {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!(error = %e, "invalid tool registration");
            std::process::exit(1);
        }
    };

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    if let Err(e) = serve(stdin, stdout, registry).await {
        tracing::error!(error = %e, "server terminated");
        std::process::exit(1);
    }
}
