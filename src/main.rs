use cluster_jobs::cluster::topology::ClusterTopology;
use cluster_jobs::cluster::transport::HttpMessageSender;
use cluster_jobs::cluster::ClusterContext;
use cluster_jobs::manager::builders::JobBuilderRegistry;
use cluster_jobs::manager::JobManager;
use cluster_jobs::server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 7 {
        eprintln!(
            "Usage: {} --bind <addr:port> --node-name <name> --topology <file.json>",
            args[0]
        );
        eprintln!(
            "Example: {} --bind 127.0.0.1:6000 --node-name alpha --topology cluster.json",
            args[0]
        );
        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut node_name: Option<String> = None;
    let mut topology_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--node-name" => {
                node_name = Some(args[i + 1].clone());
                i += 2;
            }
            "--topology" => {
                topology_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.ok_or_else(|| anyhow::anyhow!("--bind is required"))?;
    let node_name = node_name.ok_or_else(|| anyhow::anyhow!("--node-name is required"))?;
    let topology_path =
        topology_path.ok_or_else(|| anyhow::anyhow!("--topology is required"))?;

    tracing::info!("Starting node '{}' on {}", node_name, bind_addr);

    // 1. Cluster collaborators:
    let topology = Arc::new(ClusterTopology::load(&topology_path)?);
    if topology.node(&node_name).is_none() {
        anyhow::bail!("node '{}' is not in the topology file", node_name);
    }
    tracing::info!("Topology: {} node(s)", topology.len());

    let transport = Arc::new(HttpMessageSender::new(topology.clone()));
    let context = ClusterContext::new(node_name.clone(), topology, transport);

    // 2. Job registry and builders:
    let manager = JobManager::new(node_name);
    let builders = Arc::new(JobBuilderRegistry::with_defaults());

    // 3. HTTP control surface:
    let app = server::router(manager.clone(), builders, context);

    // 4. Spawn the maintenance loop: retire finished jobs and report.
    let report_manager = manager.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let retired = report_manager.retire_finished();
            if retired > 0 {
                tracing::info!("Retired {} finished job(s)", retired);
            }
            tracing::info!(
                "Node stats: {} live, {} bad, {} finished",
                report_manager.live_count(),
                report_manager.bad_count(),
                report_manager.old_count()
            );
        }
    });

    // 5. Start HTTP server:
    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
