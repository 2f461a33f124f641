//! Assembles C1-C9 out of a loaded [`VigilConfig`] and drives the daemon
//! from startup through orderly shutdown (§4.10).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vigil_checks::{AuthorityOracle, Scheduler};
use vigil_cluster::{snapshot_authority_patterns, Authority, Router};
use vigil_config::VigilConfig;
use vigil_events::Bus;
use vigil_mesh::{ConnectionConfig, Mesh};
use vigil_registry::Registry;
use vigil_replay::ReplayLog;
use vigil_runner::WorkerPool;
use vigil_types::{Endpoint, EndpointName, Host, HostName, Service, ServiceName, Zone, ZoneName};

/// Builds the registry's Config-attribute objects (hosts, services,
/// endpoints, zones) from the declared topology. Run once, before
/// anything else starts.
fn build_registry(config: &VigilConfig, bus: Bus) -> Result<Registry> {
    let registry = Registry::new(bus);

    for host in &config.hosts {
        let name = HostName(host.name.clone());
        let mut entity = Host::new(name.clone());
        entity.reachability_services = host
            .reachability_services
            .iter()
            .cloned()
            .map(ServiceName)
            .collect();
        entity.depends_on = host.depends_on.iter().cloned().map(HostName).collect();
        registry
            .register_host(entity)
            .with_context(|| format!("duplicate host {:?} in config", host.name))?;

        for service in &host.services {
            let entity = Service::new(
                name.clone(),
                ServiceName(service.name.clone()),
                service.check_command.clone(),
                service.check_interval,
                service.retry_interval,
                service.max_check_attempts,
                service.authority.clone(),
            );
            registry.register_service(entity).with_context(|| {
                format!("duplicate service {:?} on host {:?}", service.name, host.name)
            })?;
        }
    }

    for endpoint in &config.endpoints {
        let name = EndpointName(endpoint.name.clone());
        let mut entity = Endpoint::new(name);
        if let (Some(host), Some(port)) = (&endpoint.host, endpoint.port) {
            entity = entity.dialing(host.clone(), port);
        }
        registry
            .register_endpoint(entity)
            .with_context(|| format!("duplicate endpoint {:?} in config", endpoint.name))?;
    }

    for zone in &config.zones {
        let mut entity = Zone::new(ZoneName(zone.name.clone()));
        entity.endpoints = zone.endpoints.iter().cloned().map(EndpointName).collect();
        entity.parent = zone.parent.clone().map(ZoneName);
        registry
            .register_zone(entity)
            .with_context(|| format!("duplicate zone {:?} in config", zone.name))?;
    }

    Ok(registry)
}

fn parse_bind_address(address: &str) -> Result<SocketAddr> {
    address
        .parse()
        .with_context(|| format!("invalid mesh bind address {address:?}"))
}

/// Runs the daemon to completion: wires up every component, runs until
/// `shutdown` is cancelled (Ctrl-C/SIGTERM, installed by the caller),
/// then unwinds in the opposite order it started (§4.10).
pub async fn run(config: VigilConfig, shutdown: CancellationToken) -> Result<()> {
    let bus = Bus::new();
    let registry = Arc::new(build_registry(&config, bus)?);

    let restored = vigil_persist::restore(&registry, &config.state_dir)
        .await
        .context("failed to restore persisted state")?;
    info!(records = restored, "restored persisted state");

    let self_name = EndpointName(
        vigil_mesh::own_common_name(&config.mesh.cert_dir.join("endpoint.crt"))
            .context("failed to read this endpoint's identity from its certificate")?,
    );
    info!(name = %self_name, "starting as endpoint");

    let replay_dir = config.state_dir.join("cluster").join("log");
    let replay = Arc::new(
        ReplayLog::open(&replay_dir, config.replay.max_records_per_file)
            .context("failed to open replay log")?,
    );

    let conn_cfg = ConnectionConfig {
        heartbeat_interval: Duration::from_secs_f64(config.mesh.heartbeat_interval),
        heartbeat_timeout: Duration::from_secs_f64(config.mesh.heartbeat_timeout),
        max_frame_bytes: config.mesh.max_frame_bytes,
    };
    let bind_address = parse_bind_address(&config.mesh.bind_address)?;
    let mesh = Mesh::new(
        self_name.clone(),
        bind_address,
        &config.mesh.cert_dir,
        Arc::clone(&registry),
        registry.bus().clone(),
        conn_cfg,
        Duration::from_secs_f64(config.mesh.reconnect_interval),
    )
    .context("failed to initialize mesh (certificate load)")?;

    let patterns = snapshot_authority_patterns(&registry).await;
    let authority = Arc::new(Authority::new(Arc::clone(&registry), Arc::clone(&mesh) as _, self_name.clone(), patterns));

    let pool = Arc::new(WorkerPool::new(config.checks.worker_pool_size as usize));
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&registry),
        pool,
        Arc::clone(&authority) as Arc<dyn AuthorityOracle>,
        Duration::from_secs_f64(config.checks.default_timeout),
    ));

    let router = Arc::new(Router::new(Arc::clone(&registry), Arc::clone(&mesh), Arc::clone(&replay), authority));

    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run(shutdown.clone()));
    let router_task = tokio::spawn(Arc::clone(&router).run(shutdown.clone()));
    let mesh_task = tokio::spawn(Arc::clone(&mesh).serve(shutdown.clone()));

    shutdown.cancelled().await;
    info!("shutdown requested, stopping");

    if let Err(err) = scheduler_task.await {
        warn!(%err, "scheduler task panicked");
    }
    if let Err(err) = router_task.await {
        warn!(%err, "cluster router task panicked");
    }
    match mesh_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(%err, "mesh shut down with an error"),
        Err(err) => warn!(%err, "mesh task panicked"),
    }

    vigil_persist::dump(&registry, &config.state_dir)
        .await
        .context("failed to persist state on shutdown")?;
    info!("state persisted, exiting");

    Ok(())
}
