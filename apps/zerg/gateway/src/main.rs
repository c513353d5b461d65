//! Vector Search Gateway - Entry Point
//!
//! Minimal entry point that delegates to the server module.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    zerg_gateway::run().await
}
