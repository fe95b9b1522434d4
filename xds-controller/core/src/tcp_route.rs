use crate::{backend::BackendRefIr, policy::AttachedPolicies, ObjectSource};
use chrono::{offset::Utc, DateTime};

/// A TCPRoute or TLSRoute after reference resolution.
///
/// TLSRoutes carry the SNI hostnames they match on; TCPRoutes have none.
#[derive(Clone, Debug, PartialEq)]
pub struct TcpRouteIr {
    pub source: ObjectSource,
    pub generation: i64,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub hostnames: Vec<String>,
    pub backends: Vec<BackendRefIr>,
    pub attached_policies: AttachedPolicies,
}
