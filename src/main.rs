mod cli;

use clap::Parser;
use cli::{Cli, Commands, exit_code};
use serde::Serialize;
use slicecast::config::OrchestratorConfig;
use slicecast::placement::{Capacity, Location, NetworkFunction, NetworkProfile, NfType, Site, SiteType};
use slicecast::monitoring::TracingConfig;
use slicecast::reconciler::SimulatedClusterClient;
use slicecast::{Orchestrator, intent};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Serialize)]
struct PlannedEntry {
    intent_text: String,
    qos: intent::QosProfile,
    site_id: Option<String>,
    score: Option<f64>,
    expected_latency_ms: Option<f64>,
    expected_throughput_mbps: Option<f64>,
    error: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let tracing_config = TracingConfig {
        log_level: if cli.verbose { "debug".to_string() } else { "info".to_string() },
        ..TracingConfig::default()
    };
    let _ = tracing_config.init_tracing();

    let config = match OrchestratorConfig::load(cli.config, cli.verbose) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load configuration: {e}");
            std::process::exit(exit_code::BAD_USAGE);
        }
    };

    let code = run(cli.command, config).await;
    std::process::exit(code);
}

async fn run(command: Commands, config: OrchestratorConfig) -> i32 {
    let orchestrator = Orchestrator::new(config);
    bootstrap_demo_sites(&orchestrator);

    match command {
        Commands::Plan {
            intents,
            out,
            dry_run,
        } => run_plan(&orchestrator, &intents, out.as_deref(), dry_run).await,
        Commands::Apply {
            intents,
            out,
            dry_run,
        } => run_apply(&orchestrator, &intents, out.as_deref(), dry_run).await,
        Commands::Server { port, metrics_port } => run_server(&orchestrator, port, metrics_port).await,
    }
}

/// Demo site/cluster topology used when no clusters/sites are declared in
/// config. A real deployment populates the placement engine from discovered
/// inventory and the reconciler from real cluster endpoints; this keeps
/// `--plan`/`--apply` usable out of the box.
fn bootstrap_demo_sites(orchestrator: &Orchestrator) {
    if orchestrator.config.file.clusters.is_empty() {
        orchestrator
            .reconciler
            .register_cluster("edge-01", Arc::new(SimulatedClusterClient::healthy()));
    }

    if !orchestrator.placement.site_ids().is_empty() {
        return;
    }
    orchestrator.placement.add_site(Site::new(
        "edge-01",
        SiteType::Edge,
        Location {
            lat: 37.77,
            lon: -122.41,
            region: "us-west".into(),
            zone: "z1".into(),
        },
        Capacity {
            cpu_cores: 32,
            memory_gb: 128,
            storage_gb: 2000,
            bandwidth_mbps: 1000.0,
        },
        NetworkProfile {
            base_latency_ms: 2.0,
            max_throughput_mbps: 1000.0,
            packet_loss_rate: 0.01,
            jitter_ms: 0.5,
        },
    ));
    orchestrator.placement.add_site(Site::new(
        "regional-01",
        SiteType::Regional,
        Location {
            lat: 36.11,
            lon: -115.17,
            region: "us-west".into(),
            zone: "z2".into(),
        },
        Capacity {
            cpu_cores: 128,
            memory_gb: 512,
            storage_gb: 8000,
            bandwidth_mbps: 5000.0,
        },
        NetworkProfile {
            base_latency_ms: 8.0,
            max_throughput_mbps: 5000.0,
            packet_loss_rate: 0.01,
            jitter_ms: 1.0,
        },
    ));
    orchestrator.placement.add_site(Site::new(
        "central-01",
        SiteType::Central,
        Location {
            lat: 39.83,
            lon: -98.58,
            region: "us-central".into(),
            zone: "z1".into(),
        },
        Capacity {
            cpu_cores: 512,
            memory_gb: 2048,
            storage_gb: 40000,
            bandwidth_mbps: 20000.0,
        },
        NetworkProfile {
            base_latency_ms: 18.0,
            max_throughput_mbps: 20000.0,
            packet_loss_rate: 0.02,
            jitter_ms: 2.0,
        },
    ));
}

fn read_intents(path: &Path) -> std::io::Result<String> {
    std::fs::read_to_string(path)
}

/// Translate + place every intent line, without touching clusters.
/// Deterministic: running `--plan` twice on the same intents and site
/// snapshot yields byte-identical output.
async fn run_plan(
    orchestrator: &Orchestrator,
    intents_path: &Path,
    out: Option<&Path>,
    dry_run: bool,
) -> i32 {
    let content = match read_intents(intents_path) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to read intents file: {e}");
            return exit_code::BAD_USAGE;
        }
    };

    let mut entries = Vec::new();
    for (i, line) in intent::parse_intents_file(&content).into_iter().enumerate() {
        match intent::translate(line) {
            Ok(qos) => {
                let nf = NetworkFunction {
                    id: format!("nf-{i}"),
                    nf_type: NfType::Ran,
                    requirements: default_requirements(NfType::Ran, &qos),
                    qos: qos.clone(),
                    target_clusters: vec![],
                };
                match orchestrator.placement.place(&nf) {
                    Ok(decision) => entries.push(PlannedEntry {
                        intent_text: line.to_string(),
                        qos,
                        site_id: Some(decision.site_id),
                        score: Some(decision.score),
                        expected_latency_ms: Some(decision.expected_latency_ms),
                        expected_throughput_mbps: Some(decision.expected_throughput_mbps),
                        error: None,
                    }),
                    Err(e) => entries.push(PlannedEntry {
                        intent_text: line.to_string(),
                        qos,
                        site_id: None,
                        score: None,
                        expected_latency_ms: None,
                        expected_throughput_mbps: None,
                        error: Some(e.to_string()),
                    }),
                }
            }
            Err(e) => {
                error!("intent translation failed: {e}");
                return exit_code::VALIDATION_FAILURE;
            }
        }
    }

    let rendered = entries
        .iter()
        .map(|e| serde_json::to_string(e).unwrap())
        .collect::<Vec<_>>()
        .join("\n");

    if dry_run {
        info!("dry-run: plan computed, not written");
        println!("{rendered}");
        return exit_code::SUCCESS;
    }

    if let Some(out_path) = out {
        if let Err(e) = std::fs::write(out_path, &rendered) {
            error!("failed to write plan: {e}");
            return exit_code::BAD_USAGE;
        }
    } else {
        println!("{rendered}");
    }

    exit_code::SUCCESS
}

/// Plan then drive reconciliation for every intent line.
async fn run_apply(
    orchestrator: &Orchestrator,
    intents_path: &Path,
    out: Option<&Path>,
    dry_run: bool,
) -> i32 {
    let content = match read_intents(intents_path) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to read intents file: {e}");
            return exit_code::BAD_USAGE;
        }
    };

    let output_root = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| orchestrator.config.file.package.output_root.clone());

    for (i, line) in intent::parse_intents_file(&content).into_iter().enumerate() {
        let qos = match intent::translate(line) {
            Ok(q) => q,
            Err(e) => {
                error!("intent translation failed: {e}");
                return exit_code::VALIDATION_FAILURE;
            }
        };

        let nf = NetworkFunction {
            id: format!("nf-{i}"),
            nf_type: NfType::Ran,
            requirements: default_requirements(NfType::Ran, &qos),
            qos,
            target_clusters: vec!["edge-01".to_string()],
        };

        let decision = match orchestrator.placement.place(&nf) {
            Ok(d) => d,
            Err(e) => {
                error!("placement failed for {}: {e}", nf.id);
                return exit_code::APPLY_FAILURE;
            }
        };

        if orchestrator
            .placement
            .reserve(&decision.site_id, &nf.requirements)
            .is_err()
        {
            error!("capacity reservation failed for {}", nf.id);
            return exit_code::APPLY_FAILURE;
        }

        if dry_run {
            info!("dry-run: would reconcile {} onto {}", nf.id, decision.site_id);
            continue;
        }

        let package = match slicecast::package::generate(
            &nf,
            &decision,
            "vnf-deployment",
            slicecast::package::TemplateStyle::Pipelined,
        ) {
            Ok(p) => p,
            Err(e) => {
                error!("package generation failed: {e}");
                return exit_code::APPLY_FAILURE;
            }
        };

        let writer = slicecast::package::PackageWriter::new(&package);
        if let Err(e) = writer.write_to(&output_root) {
            error!("failed to write package: {e}");
            return exit_code::APPLY_FAILURE;
        }

        let resource = slicecast::reconciler::VnfResource::new(
            nf,
            decision,
            slicecast::reconciler::Quorum::All,
        );
        let vnf_id = resource.id.clone();
        orchestrator.reconciler.submit(resource).await;

        for _ in 0..4 {
            match orchestrator.reconciler.reconcile(&vnf_id).await {
                Ok(slicecast::reconciler::VnfPhase::Running) => break,
                Ok(slicecast::reconciler::VnfPhase::Failed) => {
                    error!("vnf {vnf_id} reconciliation failed");
                    return exit_code::APPLY_FAILURE;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("reconcile error: {e}");
                    return exit_code::APPLY_FAILURE;
                }
            }
        }
    }

    exit_code::SUCCESS
}

/// Long-running DMS HTTP façade plus metrics/health endpoints.
async fn run_server(orchestrator: &Orchestrator, port: u16, metrics_port: u16) -> i32 {
    use slicecast::dms::{DmsState, RateLimiter, routes};
    use std::net::SocketAddr;

    let settings = &orchestrator.config.file.dms;
    let state = DmsState {
        placement: orchestrator.placement.clone(),
        reconciler: orchestrator.reconciler.clone(),
        tn_slices: orchestrator.tn_slices.clone(),
        limiter: std::sync::Arc::new(RateLimiter::new(settings.sustained_rps, settings.burst_rps)),
    };

    let dms_addr: SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
    let metrics_addr: SocketAddr = format!("0.0.0.0:{metrics_port}").parse().unwrap();

    info!("DMS façade listening on {dms_addr}");
    info!("metrics/health listening on {metrics_addr}");

    let dms_server = warp::serve(routes(state)).run(dms_addr);
    let metrics_server = warp::serve(slicecast::monitoring::routes()).run(metrics_addr);

    tokio::select! {
        _ = dms_server => {}
        _ = metrics_server => {}
    }

    exit_code::SUCCESS
}

/// Seeds a requirements value from the NF type's capability table
/// (`defaultResources`), then folds in the QoS-derived bandwidth —
/// extending `placement::capability` covers a new NF type, not a
/// bespoke per-type branch here.
fn default_requirements(nf_type: NfType, qos: &intent::QosProfile) -> slicecast::placement::Requirements {
    let cap = slicecast::placement::capability(nf_type);
    slicecast::placement::Requirements {
        bandwidth_mbps: qos.bandwidth,
        ..cap.default_resources
    }
}
