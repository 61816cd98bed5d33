//! Command-line entry point for inspecting and watching a vault
//!
//! `vaultgraph stats` loads a vault and prints summary numbers, `tree`
//! renders the spanning tree around a node, and `watch` runs the full sync
//! engine against the live filesystem with logging sinks standing in for a
//! renderer.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use vaultgraph::{
    ascii_tree, graph_to_spanning_tree, init_logging, load_graph_from_disk, EditorHost,
    EngineConfig, GraphBroadcast, NodeId, RendererSink, SyncEngine, VaultWatcher,
};

#[derive(Parser)]
#[command(name = "vaultgraph", about = "Markdown-vault graph synchronization engine")]
struct Cli {
    /// Vault root directory
    #[arg(long, default_value = ".")]
    vault: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the vault and print node/edge counts
    Stats,
    /// Render the spanning tree around a node
    Tree {
        /// Absolute path of the root node
        root: PathBuf,
    },
    /// Run the sync engine against filesystem events until interrupted
    Watch,
}

/// Renderer sink that logs each broadcast instead of drawing it.
struct LoggingRenderer;

#[async_trait::async_trait]
impl RendererSink for LoggingRenderer {
    async fn broadcast(&self, update: GraphBroadcast) -> Result<()> {
        info!(deltas = update.delta.len(), "graph update");
        Ok(())
    }
}

/// Editor host with no editors attached.
struct NoEditors;

#[async_trait::async_trait]
impl EditorHost for NoEditors {
    async fn push_content(&self, _node_id: &NodeId, _content: &str) -> Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let root = cli.vault.canonicalize()?;
    let config = EngineConfig::for_root(root);

    match cli.command {
        Command::Stats => {
            let graph = load_graph_from_disk(&config, &Default::default()).await?;
            let edges: usize = graph.nodes.values().map(|n| n.outgoing_edges.len()).sum();
            let dangling: usize = graph
                .nodes
                .values()
                .flat_map(|n| &n.outgoing_edges)
                .filter(|e| !graph.contains(&e.target))
                .count();
            println!("nodes: {}", graph.len());
            println!("edges: {edges} ({dangling} dangling)");
        }
        Command::Tree { root } => {
            let graph = load_graph_from_disk(&config, &Default::default()).await?;
            let root = NodeId::from(root);
            let tree = graph_to_spanning_tree(&graph, &root);
            if tree.is_empty() {
                anyhow::bail!("unknown node: {root}");
            }
            print!("{}", ascii_tree(&tree, &root));
        }
        Command::Watch => {
            let mut watcher =
                VaultWatcher::new(&config.vault_paths, config.event_high_water_mark)?;
            let mut engine =
                SyncEngine::initialize(config, Arc::new(LoggingRenderer), Arc::new(NoEditors))
                    .await?;
            info!(nodes = engine.graph().len(), "watching for changes");
            loop {
                tokio::select! {
                    event = watcher.next_event() => {
                        let Some(event) = event else { break };
                        engine.handle_fs_event(event).await?;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        engine.shutdown().await;
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}
