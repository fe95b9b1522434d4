use crate::{backend::BackendRefIr, policy::AttachedPolicies, ObjectSource};
use anyhow::Result;
use chrono::{offset::Utc, DateTime};
pub use http::{
    header::{HeaderName, HeaderValue},
    uri::Scheme,
    Method, StatusCode,
};
use regex::Regex;
use std::{num::NonZeroU16, sync::Arc};

/// An HTTPRoute or GRPCRoute after reference resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRouteIr {
    pub source: ObjectSource,
    pub generation: i64,

    /// This is required for ordering rules by their route's creation timestamp.
    pub creation_timestamp: Option<DateTime<Utc>>,

    pub hostnames: Vec<String>,
    pub rules: Vec<HttpRouteRule>,
    pub attached_policies: AttachedPolicies,

    /// Routes that delegated to this route, root first. Empty unless this route was selected
    /// through delegation.
    pub delegation_parents: Vec<Arc<HttpRouteIr>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HttpRouteRule {
    pub name: Option<String>,
    pub matches: Vec<HttpRouteMatch>,
    pub backends: Vec<BackendRefIr>,
    pub filters: Vec<Filter>,
    pub attached_policies: AttachedPolicies,

    /// Overrides the computed match ordering when set. Higher weights sort first.
    pub precedence_weight: Option<i32>,

    /// The rule hands off to child routes, so it carries no action of its own.
    pub delegates: bool,
}

/// A single match of a single rule, flattened so that matches can be ordered across routes.
#[derive(Clone, Debug)]
pub struct HttpRouteRuleMatchIr {
    pub route: Arc<HttpRouteIr>,
    pub rule_index: usize,
    pub match_index: usize,
    pub route_match: HttpRouteMatch,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    RequestHeaderModifier(HeaderModifierFilter),
    ResponseHeaderModifier(HeaderModifierFilter),
    RequestRedirect(RequestRedirectFilter),
    UrlRewrite(UrlRewriteFilter),
    DirectResponse(DirectResponseFilter),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderModifierFilter {
    pub add: Vec<(HeaderName, HeaderValue)>,
    pub set: Vec<(HeaderName, HeaderValue)>,
    pub remove: Vec<HeaderName>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRedirectFilter {
    pub scheme: Option<Scheme>,
    pub host: Option<String>,
    pub path: Option<PathModifier>,
    pub port: Option<NonZeroU16>,
    pub status: Option<StatusCode>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UrlRewriteFilter {
    pub hostname: Option<String>,
    pub path: Option<PathModifier>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectResponseFilter {
    pub status: StatusCode,
    pub body: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathModifier {
    Full(String),
    Prefix(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRouteMatch {
    pub path: Option<PathMatch>,
    pub headers: Vec<HeaderMatch>,
    pub query_params: Vec<QueryParamMatch>,
    pub method: Option<Method>,
}

#[derive(Clone, Debug)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

#[derive(Clone, Debug)]
pub enum HeaderMatch {
    Exact(HeaderName, HeaderValue),
    Regex(HeaderName, Regex),
}

#[derive(Clone, Debug)]
pub enum QueryParamMatch {
    Exact(String, String),
    Regex(String, Regex),
}

// === impl HttpRouteIr ===

impl HttpRouteIr {
    /// Flattens every rule's matches. A rule without matches matches every request.
    pub fn rule_matches(self: &Arc<Self>) -> impl Iterator<Item = HttpRouteRuleMatchIr> + '_ {
        self.rules.iter().enumerate().flat_map(move |(rule_index, rule)| {
            let matches = if rule.matches.is_empty() {
                vec![HttpRouteMatch::default()]
            } else {
                rule.matches.clone()
            };
            matches
                .into_iter()
                .enumerate()
                .map(move |(match_index, route_match)| HttpRouteRuleMatchIr {
                    route: self.clone(),
                    rule_index,
                    match_index,
                    route_match,
                })
        })
    }
}

// === impl HttpRouteRuleMatchIr ===

impl HttpRouteRuleMatchIr {
    pub fn rule(&self) -> &HttpRouteRule {
        &self.route.rules[self.rule_index]
    }

    /// The Envoy route name: unique per match and stable across translations.
    pub fn name(&self) -> String {
        let source = &self.route.source;
        match &self.rule().name {
            Some(rule) => format!(
                "{}-{}-{}-{}-matcher-{}",
                source.group_kind.kind.to_lowercase(),
                source.namespace,
                source.name,
                rule,
                self.match_index
            ),
            None => format!(
                "{}-{}-{}-rule-{}-matcher-{}",
                source.group_kind.kind.to_lowercase(),
                source.namespace,
                source.name,
                self.rule_index,
                self.match_index
            ),
        }
    }
}

// === impl HttpRouteMatch ===

/// The default match used for rules that do not specify any.
impl Default for HttpRouteMatch {
    fn default() -> Self {
        Self {
            path: Some(PathMatch::Prefix("/".to_string())),
            headers: vec![],
            query_params: vec![],
            method: None,
        }
    }
}

// === impl PathMatch ===

impl PartialEq for PathMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(l0), Self::Exact(r0)) => l0 == r0,
            (Self::Prefix(l0), Self::Prefix(r0)) => l0 == r0,
            (Self::Regex(l0), Self::Regex(r0)) => l0.as_str() == r0.as_str(),
            _ => false,
        }
    }
}

impl Eq for PathMatch {}

impl PathMatch {
    pub fn regex(s: &str) -> Result<Self> {
        Ok(Self::Regex(Regex::new(s)?))
    }
}

// === impl HeaderMatch ===

impl PartialEq for HeaderMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(n0, v0), Self::Exact(n1, v1)) => n0 == n1 && v0 == v1,
            (Self::Regex(n0, r0), Self::Regex(n1, r1)) => n0 == n1 && r0.as_str() == r1.as_str(),
            _ => false,
        }
    }
}

impl Eq for HeaderMatch {}

// === impl QueryParamMatch ===

impl PartialEq for QueryParamMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(n0, v0), Self::Exact(n1, v1)) => n0 == n1 && v0 == v1,
            (Self::Regex(n0, r0), Self::Regex(n1, r1)) => n0 == n1 && r0.as_str() == r1.as_str(),
            _ => false,
        }
    }
}

impl Eq for QueryParamMatch {}
