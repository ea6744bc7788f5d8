//! Watches cluster membership through an in-memory service.
//!
//! Run with: cargo run -p clm-watch [config.json]
//!
//! A simulated cluster boots three nodes, then one node leaves and rejoins.
//! Each tracking update is printed as JSON. Press Ctrl-C to stop early.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clm_core::{
    AddressFamily, AisStatus, ClmConfig, ClusterChange, ClusterNode, ClusterNotification,
    ClusterNotificationBuffer, Invocation, NodeAddress,
};
use clm_session::{Callbacks, ClmHandle, DispatchPump, Dispatcher, MemoryMembershipService};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const NODES: u32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_config()?;
    tracing::info!(version = %config.version, timeout = ?config.dispatch_timeout(), "Starting");

    let service = Arc::new(MemoryMembershipService::new());
    let dispatcher = Dispatcher::new(service.clone());

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let lookup_tx = updates_tx.clone();
    let callbacks = Callbacks::new()
        .on_track_cluster(move |buffer, members, status| {
            let _ = updates_tx.send(Update::View {
                buffer: buffer.clone(),
                members,
                status,
            });
        })
        .on_get_cluster_node(move |invocation, node, status| {
            let _ = lookup_tx.send(Update::Lookup {
                invocation,
                node: node.cloned(),
                status,
            });
        });

    let handle = Arc::new(
        ClmHandle::initialize(&dispatcher, callbacks, config.version)
            .context("Failed to initialize membership handle")?,
    );
    tracing::info!(handle = %handle.handle(), version = %handle.version(), "Handle initialized");

    let pump = DispatchPump::spawn(Arc::clone(&handle), config.dispatch_timeout());
    let script = tokio::spawn(simulate_cluster(Arc::clone(&service), Arc::clone(&handle)));

    let mut remaining = 5_usize;
    while remaining > 0 {
        tokio::select! {
            update = updates_rx.recv() => {
                let Some(update) = update else { break };
                report(&update)?;
                remaining -= 1;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    script.abort();
    pump.shutdown().await.context("Dispatch pump failed")?;
    handle.finalize().context("Failed to finalize membership handle")?;
    tracing::info!("Finalized");
    Ok(())
}

enum Update {
    View {
        buffer: ClusterNotificationBuffer,
        members: u32,
        status: AisStatus,
    },
    Lookup {
        invocation: Invocation,
        node: Option<ClusterNode>,
        status: AisStatus,
    },
}

fn load_config() -> anyhow::Result<ClmConfig> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => ClmConfig::from_file(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ClmConfig::default(),
    };
    Ok(config.apply_env()?)
}

fn report(update: &Update) -> anyhow::Result<()> {
    match update {
        Update::View {
            buffer,
            members,
            status,
        } => {
            tracing::info!(view = buffer.view_number, members, ?status, "Membership changed");
            println!("{}", serde_json::to_string_pretty(buffer)?);
        }
        Update::Lookup {
            invocation,
            node,
            status,
        } => {
            tracing::info!(?invocation, ?status, "Node lookup completed");
            if let Some(node) = node {
                println!("{}", serde_json::to_string_pretty(node)?);
            }
        }
    }
    Ok(())
}

fn node(node_id: u32, member: bool) -> ClusterNode {
    ClusterNode {
        node_id,
        node_address: NodeAddress {
            family: AddressFamily::Inet,
            value: format!("192.168.0.{node_id}"),
        },
        node_name: format!("safNode=PL-{node_id},safCluster=myClmCluster"),
        execution_environment: None,
        member,
        boot_timestamp: 0,
        initial_view_number: 1,
    }
}

fn view(view_number: u64, changed: u32, change: ClusterChange) -> ClusterNotificationBuffer {
    ClusterNotificationBuffer {
        view_number,
        notifications: (1..=NODES)
            .map(|id| ClusterNotification {
                cluster_node: node(id, !(id == changed && change == ClusterChange::Left)),
                cluster_change: if id == changed {
                    change
                } else {
                    ClusterChange::NoChange
                },
            })
            .collect(),
    }
}

async fn simulate_cluster(service: Arc<MemoryMembershipService>, handle: Arc<ClmHandle>) {
    let id = handle.handle();
    let steps = [
        Step::Track(view(1, 0, ClusterChange::NoChange), NODES),
        Step::Lookup(Invocation(1), 2),
        Step::Track(view(2, 2, ClusterChange::Left), NODES - 1),
        Step::Track(view(3, 2, ClusterChange::Joined), NODES),
        Step::Lookup(Invocation(2), 9),
    ];

    for step in steps {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let pushed = match step {
            Step::Track(buffer, members) => {
                service.push_track_cluster(id, buffer, members, AisStatus::Ok)
            }
            Step::Lookup(invocation, node_id) if node_id <= NODES => {
                service.push_cluster_node(id, invocation, Some(node(node_id, true)), AisStatus::Ok)
            }
            Step::Lookup(invocation, _) => {
                service.push_cluster_node(id, invocation, None, AisStatus::NotExist)
            }
        };
        if let Err(e) = pushed {
            tracing::warn!(error = %e, "Simulated cluster stopped");
            return;
        }
    }
}

enum Step {
    Track(ClusterNotificationBuffer, u32),
    Lookup(Invocation, u32),
}
