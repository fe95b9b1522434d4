use std::{borrow::Cow, fmt};

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
pub const GATEWAY_API_X_GROUP: &str = "gateway.networking.x-k8s.io";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKind {
    pub group: Cow<'static, str>,
    pub kind: Cow<'static, str>,
}

/// Identifies a single namespaced object by kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectSource {
    pub group_kind: GroupKind,
    pub namespace: String,
    pub name: String,
}

/// A reference from a route to a parent, or from a policy to an ancestor.
///
/// Listener-scoped references carry the listener name as the section name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParentRef {
    pub group_kind: GroupKind,
    pub namespace: String,
    pub name: String,
    pub section_name: Option<String>,
    pub port: Option<u16>,
}

// === impl GroupKind ===

impl GroupKind {
    pub const GATEWAY: Self = Self::from_static(GATEWAY_API_GROUP, "Gateway");
    pub const LISTENER_SET: Self = Self::from_static(GATEWAY_API_X_GROUP, "XListenerSet");
    pub const HTTP_ROUTE: Self = Self::from_static(GATEWAY_API_GROUP, "HTTPRoute");
    pub const GRPC_ROUTE: Self = Self::from_static(GATEWAY_API_GROUP, "GRPCRoute");
    pub const TCP_ROUTE: Self = Self::from_static(GATEWAY_API_GROUP, "TCPRoute");
    pub const TLS_ROUTE: Self = Self::from_static(GATEWAY_API_GROUP, "TLSRoute");
    pub const SERVICE: Self = Self::from_static("", "Service");
    pub const SECRET: Self = Self::from_static("", "Secret");

    pub const fn from_static(group: &'static str, kind: &'static str) -> Self {
        Self {
            group: Cow::Borrowed(group),
            kind: Cow::Borrowed(kind),
        }
    }

    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: Cow::Owned(group.into()),
            kind: Cow::Owned(kind.into()),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            return f.write_str(&self.kind);
        }
        write!(f, "{}.{}", self.kind, self.group)
    }
}

// === impl ObjectSource ===

impl ObjectSource {
    pub fn new(group_kind: GroupKind, namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            group_kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn gateway(namespace: impl ToString, name: impl ToString) -> Self {
        Self::new(GroupKind::GATEWAY, namespace, name)
    }

    /// A stable, globally unique name for the object.
    pub fn resource_name(&self) -> String {
        format!("{}/{}/{}", self.group_kind, self.namespace, self.name)
    }
}

impl fmt::Display for ObjectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl ParentRef ===

impl ParentRef {
    pub fn new(source: &ObjectSource) -> Self {
        Self {
            group_kind: source.group_kind.clone(),
            namespace: source.namespace.clone(),
            name: source.name.clone(),
            section_name: None,
            port: None,
        }
    }

    pub fn gateway(namespace: impl ToString, name: impl ToString) -> Self {
        Self::new(&ObjectSource::gateway(namespace, name))
    }

    pub fn with_section_name(mut self, section: impl ToString) -> Self {
        self.section_name = Some(section.to_string());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn object(&self) -> ObjectSource {
        ObjectSource {
            group_kind: self.group_kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.group_kind, self.namespace, self.name)?;
        if let Some(section) = &self.section_name {
            write!(f, "#{section}")?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}
