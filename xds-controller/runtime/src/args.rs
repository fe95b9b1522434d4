use crate::{
    lease::StatusLease,
    metrics::{ProxySyncerMetrics, StatusMetrics},
    proxy_syncer::{Event, ProxySyncer},
    status,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use gateway_xds_controller_core::{
    plugin::PluginRegistry, DnsLookupFamily, TranslatorSettings, GATEWAY_CONTROLLER_NAME,
};
use gateway_xds_controller_reports::ReportMap;
use gateway_xds_controller_snapshot::InMemorySnapshotCache;
use gateway_xds_controller_translator::{BackendTranslator, GatewayTranslator};
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    time::Duration,
};
use tracing::{info_span, Instrument};

// Events are applied in batches, so a modest buffer absorbs bursts from the collection layer.
const EVENT_QUEUE_SIZE: usize = 1024;

#[derive(Debug, Parser)]
#[clap(name = "gateway-xds-controller", about = "Translates Gateway API resources to xDS")]
pub struct Args {
    #[clap(
        long,
        default_value = "gateway_xds_controller=info,warn",
        env = "GATEWAY_XDS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The controller name written on route and policy status entries.
    #[clap(long, default_value = GATEWAY_CONTROLLER_NAME)]
    controller_name: String,

    /// The address Envoy listeners bind to.
    #[clap(long, default_value = "::")]
    bind_address: String,

    /// DNS lookup family for DNS-discovered clusters.
    #[clap(long, default_value = "V4_PREFERRED")]
    dns_lookup_family: DnsLookupFamily,

    /// Additionally validates generated routes with Envoy.
    #[clap(long)]
    strict_validation: bool,

    #[clap(long, default_value = "/usr/local/bin/envoy")]
    envoy_binary: PathBuf,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    #[clap(long, default_value = "5")]
    status_max_retries: u32,

    #[clap(long, default_value = "gateway-xds-controller")]
    controller_deployment_name: String,

    /// The Lease electing the replica that writes status.
    #[clap(long, default_value = "gateway-xds-controller-status")]
    status_lease_name: String,

    #[clap(long, default_value = "30")]
    status_lease_duration_secs: u64,

    #[clap(long, default_value = "gateway-system", env = "POD_NAMESPACE")]
    controller_namespace: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run(PluginRegistry::default(), |_| {}).await
    }

    /// Runs the controller with `plugins`. `inputs` receives the sender through which the
    /// collection layer feeds gateways, backends and client connections.
    pub async fn run(
        self,
        plugins: PluginRegistry,
        inputs: impl FnOnce(mpsc::Sender<Event>),
    ) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            controller_name,
            bind_address,
            dns_lookup_family,
            strict_validation,
            envoy_binary,
            patch_timeout_ms,
            status_max_retries,
            controller_deployment_name,
            status_lease_name,
            status_lease_duration_secs,
            controller_namespace,
        } = self;

        let settings = TranslatorSettings {
            bind_address,
            dns_lookup_family,
            envoy_validation_binary: strict_validation.then_some(envoy_binary),
        };

        let mut prom = <Registry>::default();
        let syncer_metrics = ProxySyncerMetrics::register(prom.sub_registry_with_prefix("proxy_syncer"));
        let status_metrics = StatusMetrics::register(prom.sub_registry_with_prefix("status"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("failed to fetch `HOSTNAME` environment variable")?;

        let lease = StatusLease {
            name: status_lease_name,
            namespace: controller_namespace,
            deployment: controller_deployment_name,
            controller_name: controller_name.clone(),
            duration: Duration::from_secs(status_lease_duration_secs),
        };
        let claims = lease.claim(runtime.client(), &hostname).await?;

        let (reports_tx, reports_rx) = watch::channel(Arc::new(ReportMap::default()));
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);

        let syncer = ProxySyncer::new(
            GatewayTranslator::new(plugins.clone(), settings.clone()),
            BackendTranslator::new(plugins, settings),
            InMemorySnapshotCache::default(),
            syncer_metrics,
            reports_tx,
        );
        tokio::spawn(syncer.run(events_rx).instrument(info_span!("proxy_syncer")));

        let status = status::Controller::new(
            runtime.client(),
            hostname,
            controller_name,
            claims,
            reports_rx,
            Duration::from_millis(patch_timeout_ms),
            status_max_retries,
            status_metrics,
        );
        tokio::spawn(status.run().instrument(info_span!("status_controller")));

        inputs(events_tx.clone());

        // Block the main thread on the shutdown signal.
        let res = runtime.run().await;
        drop(events_tx);
        if res.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
