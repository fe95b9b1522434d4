//! Election of the replica that writes status.
//!
//! All replicas translate, but only the holder of the status Lease patches status. The Lease is
//! owned by the controller's Deployment so that it goes away with it.

use anyhow::{Context, Result};
use k8s_openapi::{
    api::{apps::v1::Deployment, coordination::v1::Lease},
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference},
};
use kube::{
    api::{Api, PostParams},
    Client, Resource,
};
use kubert::lease::{Claim, ClaimParams, LeaseManager};
use std::{collections::BTreeMap, sync::Arc};
use tokio::{sync::watch, time::Duration};

const RENEW_GRACE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StatusLease {
    pub name: String,
    pub namespace: String,

    /// The Deployment that owns the Lease.
    pub deployment: String,

    /// Written into the Lease's labels.
    pub controller_name: String,

    pub duration: Duration,
}

// === impl StatusLease ===

impl StatusLease {
    /// Creates the Lease if needed and starts claiming it as `hostname`.
    pub(crate) async fn claim(
        &self,
        client: Client,
        hostname: &str,
    ) -> Result<watch::Receiver<Arc<Claim>>> {
        let api = Api::<Lease>::namespaced(client.clone(), &self.namespace);
        self.ensure(client, &api).await?;

        let params = ClaimParams {
            lease_duration: self.duration,
            renew_grace_period: RENEW_GRACE_PERIOD,
        };
        let (claims, _task) = LeaseManager::init(api, &self.name)
            .await?
            .spawn(hostname, params)
            .await?;
        tracing::info!(lease = %self.name, %hostname, "Claiming status lease");
        Ok(claims)
    }

    async fn ensure(&self, client: Client, api: &Api<Lease>) -> Result<()> {
        let deployment = Api::<Deployment>::namespaced(client, &self.namespace)
            .get(&self.deployment)
            .await
            .with_context(|| format!("failed to fetch Deployment {}", self.deployment))?;

        match api
            .create(&PostParams::default(), &self.resource(deployment.controller_owner_ref(&())))
            .await
        {
            Ok(_) => tracing::info!(lease = %self.name, "Created status lease"),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                tracing::debug!(lease = %self.name, "Status lease already exists")
            }
            Err(error) => return Err(error.into()),
        }
        Ok(())
    }

    /// The Lease as first created. Its spec is left to the lease manager.
    fn resource(&self, owner: Option<OwnerReference>) -> Lease {
        let domain = self
            .controller_name
            .split_once('/')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.controller_name);
        Lease {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                owner_references: owner.map(|r| vec![r]),
                labels: Some(BTreeMap::from([
                    ("app.kubernetes.io/component".to_string(), "status-writer".to_string()),
                    ("app.kubernetes.io/managed-by".to_string(), domain.to_string()),
                ])),
                ..Default::default()
            },
            spec: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lease() -> StatusLease {
        StatusLease {
            name: "gateway-xds-controller-status".to_string(),
            namespace: "gateway-system".to_string(),
            deployment: "gateway-xds-controller".to_string(),
            controller_name: "xds.gateway.dev/gateway-controller".to_string(),
            duration: Duration::from_secs(30),
        }
    }

    #[test]
    fn resource_is_owned_by_the_deployment() {
        let owner = OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: "gateway-xds-controller".to_string(),
            uid: "1234".to_string(),
            controller: Some(true),
            ..Default::default()
        };
        let resource = lease().resource(Some(owner.clone()));

        assert_eq!(resource.metadata.name.as_deref(), Some("gateway-xds-controller-status"));
        assert_eq!(resource.metadata.namespace.as_deref(), Some("gateway-system"));
        assert_eq!(resource.metadata.owner_references, Some(vec![owner]));
        assert_eq!(
            resource
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("app.kubernetes.io/managed-by"))
                .map(String::as_str),
            Some("xds.gateway.dev")
        );
        assert_eq!(resource.spec, None);
    }

    #[test]
    fn resource_without_owner() {
        assert_eq!(lease().resource(None).metadata.owner_references, None);
    }
}
