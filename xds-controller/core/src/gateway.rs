use crate::{
    http_route::HttpRouteIr, policy::AttachedPolicies, tcp_route::TcpRouteIr, Error, GroupKind,
    ObjectSource, ParentRef,
};
use ahash::AHashMap as HashMap;
use std::{fmt, str::FromStr, sync::Arc};

/// A Gateway with the listeners of every ListenerSet attached to it.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayIr {
    pub source: ObjectSource,
    pub generation: i64,
    pub listeners: Vec<Listener>,
    pub attached_policies: AttachedPolicies,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    pub name: String,

    /// The Gateway or ListenerSet that declares this listener.
    pub parent: ObjectSource,
    pub parent_generation: i64,

    pub protocol: Protocol,
    pub port: u16,
    pub hostname: Option<String>,
    pub tls: Option<ListenerTls>,

    /// Route kinds the listener allows. Empty means the protocol's defaults.
    pub allowed_kinds: Vec<GroupKind>,

    /// Ordered highest priority first.
    pub attached_policies: AttachedPolicies,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Tls,
    Unsupported(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ListenerTls {
    /// Terminates TLS with the resolved certificate, or records why it could not be resolved.
    Terminate(Result<TlsCertificate, Error>),
    Passthrough,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsCertificate {
    pub secret: ObjectSource,
    pub certificate_chain: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// A route bound to a listener through one of its parent references.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteAttachment<R> {
    pub route: Arc<R>,
    pub parent_ref: ParentRef,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListenerRoutes {
    pub http: Vec<RouteAttachment<HttpRouteIr>>,
    pub tcp: Vec<RouteAttachment<TcpRouteIr>>,
}

/// Routes for each listener, keyed by the listener's parent reference.
pub type RoutesByListener = HashMap<ParentRef, ListenerRoutes>;

// === impl Listener ===

impl Listener {
    pub fn new(parent: ObjectSource, name: impl ToString, protocol: Protocol, port: u16) -> Self {
        Self {
            name: name.to_string(),
            parent,
            parent_generation: 0,
            protocol,
            port,
            hostname: None,
            tls: None,
            allowed_kinds: vec![],
            attached_policies: AttachedPolicies::default(),
        }
    }

    /// The listener as a section of its parent.
    pub fn parent_ref(&self) -> ParentRef {
        ParentRef::new(&self.parent).with_section_name(&self.name)
    }

    pub fn is_from_listener_set(&self) -> bool {
        self.parent.group_kind == GroupKind::LISTENER_SET
    }

    /// The listener's hostname; `None` and `""` both mean "any".
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref().filter(|h| !h.is_empty())
    }
}

// === impl Protocol ===

impl Protocol {
    /// Route kinds a listener of this protocol may bind.
    pub fn supported_kinds(&self) -> &'static [GroupKind] {
        const HTTP: &[GroupKind] = &[GroupKind::HTTP_ROUTE, GroupKind::GRPC_ROUTE];
        const TCP: &[GroupKind] = &[GroupKind::TCP_ROUTE];
        const TLS: &[GroupKind] = &[GroupKind::TLS_ROUTE, GroupKind::TCP_ROUTE];
        match self {
            Self::Http | Self::Https => HTTP,
            Self::Tcp => TCP,
            Self::Tls => TLS,
            Self::Unsupported(_) => &[],
        }
    }
}

impl FromStr for Protocol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "HTTP" => Self::Http,
            "HTTPS" => Self::Https,
            "TCP" => Self::Tcp,
            "TLS" => Self::Tls,
            other => Self::Unsupported(other.to_string()),
        })
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Tcp => "TCP",
            Self::Tls => "TLS",
            Self::Unsupported(p) => p,
        })
    }
}
