//! korium-daemon: a Korium DHT node with an interactive demo console.
//!
//! Single OS process running a Tokio async runtime. The daemon starts a
//! QUIC transport, joins the network through the configured seed nodes,
//! and then reads demo commands from stdin until `exit`.

mod commands;
mod config;

use std::sync::Arc;

use tracing::{error, info};

use korium_crypto::ed25519::KeyPair;
use korium_crypto::Ed25519Securifier;
use korium_kad::node::Node;
use korium_transport::quic::{QuicConfig, QuicTransport};
use korium_types::{Contact, NodeId};

use crate::commands::Commands;
use crate::config::DaemonConfig;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("korium=info".parse()?),
        )
        .init();

    info!("Korium daemon starting");

    let config = DaemonConfig::load()?;
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let keypair = load_or_generate_identity(&config)?;
    let node_id = NodeId::from_bytes(korium_crypto::ed25519::derive_node_id(
        &keypair.verifying_key,
    ));
    let securifier = Arc::new(Ed25519Securifier::new(keypair));

    let transport = Arc::new(QuicTransport::start_listening(QuicConfig {
        bind_addr: std::net::SocketAddr::from(([0, 0, 0, 0], config.network.listen_port)),
        ..QuicConfig::default()
    })?);
    let own_contact = Contact::new(node_id, transport.local_addr());
    info!(id = %node_id, addr = %transport.local_addr(), "node identity ready");

    let node = Node::new(
        own_contact,
        Arc::clone(&transport) as Arc<dyn korium_transport::RpcTransport>,
        securifier,
        None,
    );
    let server = transport.serve(node.service());

    let seeds = config
        .network
        .bootstrap_nodes
        .iter()
        .map(|seed| seed.to_contact())
        .collect::<anyhow::Result<Vec<_>>>()?;
    node.join(seeds).await?;

    Commands::new(node.clone()).run().await?;

    node.leave().await;
    transport.stop_listening();
    server.abort();
    info!("Korium daemon stopped");
    Ok(())
}

/// Load the identity key from disk, generating and persisting a fresh one
/// on first run.
fn load_or_generate_identity(config: &DaemonConfig) -> anyhow::Result<KeyPair> {
    let path = config.key_file();
    if path.exists() {
        let encoded = std::fs::read_to_string(&path)?;
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("corrupt identity key file {path:?}: {e}"))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("identity key file {path:?} is not 32 bytes"))?;
        Ok(KeyPair::from_bytes(&secret))
    } else {
        let keypair = KeyPair::generate();
        std::fs::write(&path, hex::encode(keypair.signing_key.to_bytes()))?;
        info!(?path, "generated new identity key");
        Ok(keypair)
    }
}
