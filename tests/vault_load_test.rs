//! Vault loader integration tests
//!
//! Loading must be order-independent (healing promotes link-form edges
//! whenever their target appears), enforce the file ceiling as a whole-load
//! failure, skip denied directories, and leave every node positioned.

use anyhow::Result;
use proptest::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use vaultgraph::vault_loader::upsert_with_healing;
use vaultgraph::{
    load_additional_vault, load_graph_from_disk, scan_vault_files, Edge, EngineConfig, Graph,
    GraphNode, NodeId, VaultError,
};

fn write_note(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).unwrap();
}

fn vault_config(root: &Path) -> EngineConfig {
    EngineConfig::for_root(root.to_path_buf())
}

#[tokio::test]
async fn load_resolves_links_regardless_of_file_names() -> Result<()> {
    let dir = TempDir::new()?;
    write_note(dir.path(), "a.md", "points [[b]]\n");
    write_note(dir.path(), "b.md", "points [[c]]\n");
    write_note(dir.path(), "c.md", "leaf\n");

    let graph = load_graph_from_disk(&vault_config(dir.path()), &HashMap::new()).await?;
    assert_eq!(graph.len(), 3);

    let a = NodeId::from(dir.path().join("a.md"));
    let b = NodeId::from(dir.path().join("b.md"));
    let c = NodeId::from(dir.path().join("c.md"));
    assert!(graph.nodes[&a].has_edge_to(&b));
    assert!(graph.nodes[&b].has_edge_to(&c));
    assert!(graph.nodes.values().all(|n| n.metadata.position.is_some()));
    Ok(())
}

#[tokio::test]
async fn dangling_links_survive_the_load() -> Result<()> {
    let dir = TempDir::new()?;
    write_note(dir.path(), "a.md", "see [[nowhere]]\n");

    let graph = load_graph_from_disk(&vault_config(dir.path()), &HashMap::new()).await?;
    let a = NodeId::from(dir.path().join("a.md"));
    assert_eq!(graph.nodes[&a].outgoing_edges, vec![Edge::new("nowhere")]);
    Ok(())
}

#[tokio::test]
async fn file_ceiling_aborts_the_whole_load() -> Result<()> {
    let dir = TempDir::new()?;
    for i in 0..5 {
        write_note(dir.path(), &format!("n{i}.md"), "x\n");
    }
    let mut config = vault_config(dir.path());
    config.file_count_ceiling = 3;

    let err = load_graph_from_disk(&config, &HashMap::new())
        .await
        .unwrap_err();
    let limit = err.downcast_ref::<VaultError>().unwrap();
    assert!(matches!(
        limit,
        VaultError::FileLimitExceeded {
            count: 5,
            ceiling: 3
        }
    ));
    Ok(())
}

#[tokio::test]
async fn denied_directories_are_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    write_note(dir.path(), "keep.md", "x\n");
    fs::create_dir_all(dir.path().join("node_modules"))?;
    write_note(&dir.path().join("node_modules"), "skip.md", "x\n");

    let config = vault_config(dir.path());
    let files = scan_vault_files(&config.vault_paths, &config)?;
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("keep.md"));
    Ok(())
}

#[tokio::test]
async fn unparseable_files_become_sentinels_not_holes() -> Result<()> {
    let dir = TempDir::new()?;
    write_note(dir.path(), "bad.md", "---\nkey: [unclosed\n---\nbody\n");
    write_note(dir.path(), "good.md", "fine\n");

    let graph = load_graph_from_disk(&vault_config(dir.path()), &HashMap::new()).await?;
    assert_eq!(graph.len(), 2);
    let bad = &graph.nodes[&NodeId::from(dir.path().join("bad.md"))];
    assert_eq!(bad.metadata.color.as_deref(), Some("#cc3333"));
    assert!(bad.content.contains("unclosed"));
    Ok(())
}

#[tokio::test]
async fn additive_load_reports_new_and_healed_nodes() -> Result<()> {
    let dir = TempDir::new()?;
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    fs::create_dir_all(&first)?;
    fs::create_dir_all(&second)?;
    write_note(&first, "a.md", "waiting for [[extra]]\n");
    write_note(&second, "extra.md", "arrived\n");

    let mut config = vault_config(dir.path());
    config.vault_paths = vec![first.clone()];
    let base = load_graph_from_disk(&config, &HashMap::new()).await?;

    let (merged, delta) =
        load_additional_vault(&base, &second, &config, &HashMap::new()).await?;

    let a = NodeId::from(first.join("a.md"));
    let extra = NodeId::from(second.join("extra.md"));
    assert!(merged.nodes[&a].has_edge_to(&extra));
    // One upsert for the new node, one for the healed incomer.
    assert_eq!(delta.len(), 2);
    let touched: Vec<&NodeId> = delta.iter().map(|d| d.node_id()).collect();
    assert!(touched.contains(&&a));
    assert!(touched.contains(&&extra));
    Ok(())
}

proptest! {
    // Folding the same files in any order yields the same graph.
    #[test]
    fn fold_order_does_not_change_the_graph(
        link_targets in proptest::collection::vec(
            proptest::collection::vec(0usize..5, 0..3),
            5,
        ),
        order in Just((0usize..5).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let make_node = |i: usize, targets: &[usize]| {
            let mut node = GraphNode::new(format!("/vault/n{i}.md"));
            for t in targets {
                node.push_edge_deduped(Edge::new(format!("n{t}")));
            }
            node
        };

        let mut sequential = Graph::new();
        for i in 0..5 {
            upsert_with_healing(&mut sequential, make_node(i, &link_targets[i]));
        }

        let mut shuffled = Graph::new();
        for &i in &order {
            upsert_with_healing(&mut shuffled, make_node(i, &link_targets[i]));
        }

        prop_assert_eq!(sequential, shuffled);
    }
}
