use crate::{endpoints::EndpointsIr, policy::AttachedPolicies, Error, GroupKind, ObjectSource};
use chrono::{offset::Utc, DateTime};
use std::sync::Arc;

/// The application protocol a backend port speaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AppProtocol {
    #[default]
    Unknown,
    Http,
    Http2,
    Grpc,
}

/// A resolved backend object (a Service port or a custom backend kind).
#[derive(Clone, Debug, PartialEq)]
pub struct BackendObjectIr {
    pub source: ObjectSource,
    pub port: u16,
    pub app_protocol: AppProtocol,
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// A DNS name to resolve instead of discovered endpoints.
    pub hostname: Option<String>,

    /// Discovered endpoints, if the backend kind uses them.
    pub endpoints: Option<Arc<EndpointsIr>>,

    pub attached_policies: AttachedPolicies,

    /// Errors hit while resolving the backend. A backend with errors is translated to a blackhole
    /// cluster.
    pub errors: Vec<Error>,
}

/// A route's reference to a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendRefIr {
    pub backend: Result<Arc<BackendObjectIr>, Error>,
    pub weight: u32,
    pub attached_policies: AttachedPolicies,
}

// === impl AppProtocol ===

impl AppProtocol {
    pub fn parse(app_protocol: Option<&str>) -> Self {
        match app_protocol.map(str::to_ascii_lowercase).as_deref() {
            Some("http" | "http/1.1") => Self::Http,
            Some("http2" | "h2c" | "kubernetes.io/h2c") => Self::Http2,
            Some("grpc" | "grpc-web") => Self::Grpc,
            _ => Self::Unknown,
        }
    }

    pub fn is_http2(&self) -> bool {
        matches!(self, Self::Http2 | Self::Grpc)
    }
}

// === impl BackendObjectIr ===

impl BackendObjectIr {
    pub fn new(source: ObjectSource, port: u16) -> Self {
        Self {
            source,
            port,
            app_protocol: AppProtocol::Unknown,
            creation_timestamp: None,
            hostname: None,
            endpoints: None,
            attached_policies: AttachedPolicies::default(),
            errors: vec![],
        }
    }

    pub fn group_kind(&self) -> &GroupKind {
        &self.source.group_kind
    }

    /// The Envoy cluster name for this backend. Stable across translations.
    pub fn cluster_name(&self) -> String {
        let prefix = if self.source.group_kind == GroupKind::SERVICE {
            "kube".to_string()
        } else {
            self.source.group_kind.kind.to_lowercase()
        };
        format!(
            "{}_{}_{}_{}",
            prefix, self.source.namespace, self.source.name, self.port
        )
    }
}

// === impl BackendRefIr ===

impl BackendRefIr {
    pub fn new(backend: Arc<BackendObjectIr>) -> Self {
        Self {
            backend: Ok(backend),
            weight: 1,
            attached_policies: AttachedPolicies::default(),
        }
    }

    pub fn invalid(error: Error) -> Self {
        Self {
            backend: Err(error),
            weight: 1,
            attached_policies: AttachedPolicies::default(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn cluster_name(&self) -> Option<String> {
        self.backend.as_ref().ok().map(|b| b.cluster_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("kubernetes.io/h2c"), AppProtocol::Http2)]
    #[case(Some("GRPC"), AppProtocol::Grpc)]
    #[case(Some("http"), AppProtocol::Http)]
    #[case(Some("tcp"), AppProtocol::Unknown)]
    #[case(None, AppProtocol::Unknown)]
    fn parses_app_protocol(#[case] input: Option<&str>, #[case] expected: AppProtocol) {
        assert_eq!(AppProtocol::parse(input), expected);
    }

    #[test]
    fn cluster_names_are_kind_prefixed() {
        let svc = BackendObjectIr::new(ObjectSource::new(GroupKind::SERVICE, "ns", "web"), 8080);
        assert_eq!(svc.cluster_name(), "kube_ns_web_8080");

        let custom = BackendObjectIr::new(
            ObjectSource::new(GroupKind::new("example.com", "Backend"), "ns", "ext"),
            443,
        );
        assert_eq!(custom.cluster_name(), "backend_ns_ext_443");
    }
}
