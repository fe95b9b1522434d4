//! Writes translation reports onto the status of the objects they describe.
//!
//! Only the lease holder writes status. Each report update renders every object's status from the
//! latest report map and the object's current status, and patches objects whose status changed.

use crate::metrics::StatusMetrics;
use ahash::AHashMap as HashMap;
use anyhow::{anyhow, Context, Result};
use chrono::{offset::Utc, DateTime};
use gateway_xds_controller_core::{GroupKind, ObjectSource};
use gateway_xds_controller_reports::{
    build_gw_status, build_listener_set_status, build_policy_status, build_route_status,
    ReportMap,
};
use kube::api::{Api, ApiResource, DynamicObject, Patch, PatchParams};
use kubert::lease::Claim;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::{sync::watch, time};

const FIELD_MANAGER: &str = "gateway-xds-controller";
const BACKOFF_BASE: time::Duration = time::Duration::from_millis(200);
const BACKOFF_MAX: time::Duration = time::Duration::from_secs(5);

pub struct Controller {
    client: kube::Client,
    hostname: String,
    controller_name: String,
    claims: watch::Receiver<Arc<Claim>>,
    reports: watch::Receiver<Arc<ReportMap>>,
    patch_timeout: time::Duration,
    max_retries: u32,
    metrics: StatusMetrics,
    api_resources: HashMap<GroupKind, ApiResource>,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Patched,
    Unchanged,
}

// === impl Controller ===

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: kube::Client,
        hostname: String,
        controller_name: String,
        claims: watch::Receiver<Arc<Claim>>,
        reports: watch::Receiver<Arc<ReportMap>>,
        patch_timeout: time::Duration,
        max_retries: u32,
        metrics: StatusMetrics,
    ) -> Self {
        Self {
            client,
            hostname,
            controller_name,
            claims,
            reports,
            patch_timeout,
            max_retries,
            metrics,
            api_resources: HashMap::default(),
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                res = self.reports.changed() => {
                    if res.is_err() {
                        tracing::debug!("Report channel closed");
                        return;
                    }
                }
                res = self.claims.changed() => {
                    if res.is_err() {
                        tracing::debug!("Lease channel closed");
                        return;
                    }
                }
            }

            let now = Utc::now();
            if !is_leader(&self.claims.borrow_and_update(), &self.hostname, now) {
                tracing::trace!("Not the leader; skipping status update");
                continue;
            }
            let reports = self.reports.borrow_and_update().clone();
            self.sync(&reports, now).await;
        }
    }

    async fn sync(&mut self, reports: &ReportMap, now: DateTime<Utc>) {
        for gateway in reports.gateways.keys() {
            self.patch(gateway, |existing| {
                build_gw_status(reports, gateway, existing, now)
            })
            .await;
        }
        for listener_set in reports.listener_sets.keys() {
            self.patch(listener_set, |existing| {
                build_listener_set_status(reports, listener_set, existing, now)
            })
            .await;
        }

        let controller_name = self.controller_name.clone();
        for route in reports.routes.keys() {
            self.patch(route, |existing| {
                build_route_status(reports, route, existing, &controller_name, now)
            })
            .await;
        }
        for policy in reports.policies.keys() {
            self.patch(policy, |existing| {
                build_policy_status(reports, policy, existing, &controller_name, now)
            })
            .await;
        }
    }

    async fn patch<S>(&mut self, object: &ObjectSource, render: impl Fn(Option<&S>) -> Option<S>)
    where
        S: Serialize + DeserializeOwned + PartialEq,
    {
        let kind = object.group_kind.kind.to_string();
        let mut attempt = 0;
        loop {
            match self.try_patch(object, &render).await {
                Ok(outcome) => {
                    if outcome == Outcome::Patched {
                        tracing::debug!(%kind, %object, "Patched status");
                        self.metrics.patched(&kind, "patched");
                    }
                    return;
                }
                Err(error) if attempt < self.max_retries => {
                    let delay = backoff(attempt);
                    tracing::debug!(%kind, %object, %error, ?delay, "Retrying status patch");
                    time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::warn!(%kind, %object, %error, "Failed to patch status");
                    self.metrics.patched(&kind, "failed");
                    return;
                }
            }
        }
    }

    async fn try_patch<S>(
        &mut self,
        object: &ObjectSource,
        render: &impl Fn(Option<&S>) -> Option<S>,
    ) -> Result<Outcome>
    where
        S: Serialize + DeserializeOwned + PartialEq,
    {
        let resource = self.api_resource(&object.group_kind).await?;
        let api = Api::<DynamicObject>::namespaced_with(
            self.client.clone(),
            &object.namespace,
            &resource,
        );

        let current = time::timeout(self.patch_timeout, api.get_status(&object.name))
            .await
            .context("timed out reading status")??;
        let existing = current_status::<S>(&current);
        let Some(status) = render(existing.as_ref()) else {
            return Ok(Outcome::Unchanged);
        };
        if existing.as_ref() == Some(&status) {
            return Ok(Outcome::Unchanged);
        }

        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        time::timeout(
            self.patch_timeout,
            api.patch_status(&object.name, &params, &status_patch(&status)?),
        )
        .await
        .context("timed out patching status")??;
        Ok(Outcome::Patched)
    }

    async fn api_resource(&mut self, gk: &GroupKind) -> Result<ApiResource> {
        if let Some(resource) = self.api_resources.get(gk) {
            return Ok(resource.clone());
        }
        let group = kube::discovery::group(&self.client, &gk.group).await?;
        let (resource, _) = group
            .recommended_kind(&gk.kind)
            .ok_or_else(|| anyhow!("{gk} is not served by the API server"))?;
        self.api_resources.insert(gk.clone(), resource.clone());
        Ok(resource)
    }
}

fn is_leader(claim: &Claim, hostname: &str, now: DateTime<Utc>) -> bool {
    claim.holder == hostname && claim.expiry > now
}

/// The object's current status, if it parses as `S`.
fn current_status<S: DeserializeOwned>(object: &DynamicObject) -> Option<S> {
    let status = object.data.get("status")?;
    match serde_json::from_value(status.clone()) {
        Ok(status) => Some(status),
        Err(error) => {
            tracing::debug!(%error, "Ignoring unparseable status");
            None
        }
    }
}

fn status_patch<S: Serialize>(status: &S) -> Result<Patch<serde_json::Value>> {
    let status = serde_json::to_value(status)?;
    Ok(Patch::Merge(serde_json::json!({ "status": status })))
}

fn backoff(attempt: u32) -> time::Duration {
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(BACKOFF_MAX)
}
