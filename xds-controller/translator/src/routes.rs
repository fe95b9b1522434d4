//! Translation of virtual host rules into Envoy routes.
//!
//! Each rule match becomes one Envoy route. A route that fails validation is dropped on its own
//! and reported on its HTTPRoute as partially invalid; its siblings are unaffected.

use crate::{
    envoy_validator::{EnvoyValidator, StrictOutcome},
    listener::VirtualHostRule,
    policies::PolicyReporter,
    validate::{validate_route, ValidationError},
};
use envoy_types::pb::{
    envoy::{
        config::{
            core::v3::{
                data_source, header_value_option::HeaderAppendAction, DataSource,
                HeaderValue as EnvoyHeaderValue, HeaderValueOption,
            },
            route::v3::{
                header_matcher::HeaderMatchSpecifier,
                query_parameter_matcher::QueryParameterMatchSpecifier,
                redirect_action::{PathRewriteSpecifier, RedirectResponseCode, SchemeRewriteSpecifier},
                route,
                route_action::{ClusterNotFoundResponseCode, ClusterSpecifier, HostRewriteSpecifier},
                route_match::PathSpecifier,
                weighted_cluster::ClusterWeight,
                DirectResponseAction, HeaderMatcher, QueryParameterMatcher, RedirectAction, Route,
                RouteAction, RouteMatch, WeightedCluster,
            },
        },
        r#type::matcher::v3::{
            string_matcher::MatchPattern, RegexMatchAndSubstitute, RegexMatcher, StringMatcher,
        },
    },
    google::protobuf::UInt32Value,
};
use gateway_xds_controller_core::{
    backend::BackendRefIr,
    http_route::{
        DirectResponseFilter, Filter, HeaderMatch, HeaderModifierFilter, HttpRouteMatch,
        HttpRouteRuleMatchIr, PathMatch, PathModifier, QueryParamMatch, RequestRedirectFilter,
        StatusCode, UrlRewriteFilter,
    },
    plugin::{
        PluginRegistry, ProxyTranslationPass, RouteBackendContext, RouteContext,
        TypedFilterConfigMap,
    },
    policy::AttachedPolicies,
    GroupKind, ObjectSource, ParentRef,
};
use gateway_xds_controller_reports::{
    conditions::{self, dropped_rule_message, reason},
    ConditionReport, ReportMap,
};
use std::collections::BTreeMap;

/// Weighted cluster standing in for invalid backend references. It is never defined, so requests
/// routed to it get a 500.
pub const INVALID_BACKEND_CLUSTER: &str = "invalid-backend-ref";

pub(crate) type Passes = Vec<(GroupKind, Box<dyn ProxyTranslationPass>)>;

/// Translates the rules of one gateway's virtual hosts.
pub(crate) struct RouteTranslator<'a> {
    pub(crate) plugins: &'a PluginRegistry,
    pub(crate) validator: Option<&'a EnvoyValidator>,
    pub(crate) passes: &'a mut Passes,
    pub(crate) policies: &'a mut PolicyReporter,
    pub(crate) reports: &'a mut ReportMap,

    /// Dropped rule messages per route parent.
    dropped: BTreeMap<(ObjectSource, ParentRef), (i64, Vec<String>)>,
}

/// Why a rule produced no route.
enum Skip {
    /// Nothing to report: the rule delegates or its matcher is unusable.
    Silent,
    Dropped(ValidationError),
}

impl<'a> RouteTranslator<'a> {
    pub(crate) fn new(
        plugins: &'a PluginRegistry,
        validator: Option<&'a EnvoyValidator>,
        passes: &'a mut Passes,
        policies: &'a mut PolicyReporter,
        reports: &'a mut ReportMap,
    ) -> Self {
        Self {
            plugins,
            validator,
            passes,
            policies,
            reports,
            dropped: BTreeMap::new(),
        }
    }

    pub(crate) fn translate(&mut self, rules: &[VirtualHostRule]) -> Vec<Route> {
        let mut routes = Vec::with_capacity(rules.len());
        for vr in rules {
            match self.translate_rule(vr) {
                Ok(route) => routes.push(route),
                Err(Skip::Silent) => {}
                Err(Skip::Dropped(error)) => {
                    let m = &vr.rule;
                    tracing::info!(route = %m.route.source, rule = m.rule_index, %error, "Dropping rule");
                    let message = dropped_rule_message(m.rule_index, &error);
                    for parent in &vr.parent_refs {
                        let (_, messages) = self
                            .dropped
                            .entry((m.route.source.clone(), parent.clone()))
                            .or_insert_with(|| (m.route.generation, vec![]));
                        if !messages.contains(&message) {
                            messages.push(message.clone());
                        }
                    }
                }
            }
        }
        routes
    }

    /// Records the accumulated dropped rules on their routes.
    pub(crate) fn finish(self) {
        for ((route, parent), (generation, messages)) in self.dropped {
            self.reports
                .route_parent(&route, generation, &parent)
                .set(
                    ConditionReport::new(conditions::PARTIALLY_INVALID, true, reason::UNSUPPORTED_VALUE)
                        .with_message(messages.join("; ")),
                );
        }
    }

    fn translate_rule(&mut self, vr: &VirtualHostRule) -> Result<Route, Skip> {
        let m = &vr.rule;
        let rule = m.rule();
        for parent in &vr.parent_refs {
            self.policies.observe(route_policies(m).all(), parent);
            for b in &rule.backends {
                self.policies.observe(b.attached_policies.all(), parent);
            }
        }

        let mut out = Route {
            name: m.name(),
            r#match: Some(route_match(&m.route_match)),
            ..Default::default()
        };

        let mut backends = vec![];
        out.action = match self.action(vr, &mut backends)? {
            Some(action) => Some(action),
            None if rule.delegates => return Err(Skip::Silent),
            None => Some(direct_response(StatusCode::INTERNAL_SERVER_ERROR, None)),
        };

        for filter in &rule.filters {
            match filter {
                Filter::RequestHeaderModifier(f) => {
                    out.request_headers_to_add.extend(header_options(f));
                    out.request_headers_to_remove
                        .extend(f.remove.iter().map(|h| h.to_string()));
                }
                Filter::ResponseHeaderModifier(f) => {
                    out.response_headers_to_add.extend(header_options(f));
                    out.response_headers_to_remove
                        .extend(f.remove.iter().map(|h| h.to_string()));
                }
                Filter::UrlRewrite(f) => {
                    if let Some(route::Action::Route(action)) = &mut out.action {
                        url_rewrite(f, &m.route_match, action);
                    }
                }
                Filter::RequestRedirect(_) | Filter::DirectResponse(_) => {}
            }
        }

        self.apply_backend_plugins(vr, &backends, &mut out);
        self.apply_route_plugins(vr, &mut out);

        validate_route(&out).map_err(Skip::Dropped)?;

        if let Some(validator) = self.validator {
            match validator.check(&out) {
                Ok(StrictOutcome::Valid) => {}
                Ok(StrictOutcome::InvalidMatcher(error)) => {
                    tracing::debug!(route = %out.name, %error, "Dropping route with invalid matcher");
                    return Err(Skip::Silent);
                }
                Ok(StrictOutcome::InvalidRoute(error)) => return Err(Skip::Dropped(error)),
                Err(error) => {
                    tracing::warn!(route = %out.name, %error, "Envoy validation unavailable");
                }
            }
        }

        Ok(out)
    }

    /// Builds the route action. Usable backends are collected into `backends`, in the order of
    /// their weighted clusters.
    fn action<'r>(
        &mut self,
        vr: &'r VirtualHostRule,
        backends: &mut Vec<&'r BackendRefIr>,
    ) -> Result<Option<route::Action>, Skip> {
        let m = &vr.rule;
        let rule = m.rule();

        for filter in &rule.filters {
            match filter {
                Filter::RequestRedirect(r) => return Ok(Some(redirect(r))),
                Filter::DirectResponse(DirectResponseFilter { status, body }) => {
                    return Ok(Some(direct_response(*status, body.as_deref())))
                }
                _ => {}
            }
        }

        if rule.backends.is_empty() {
            return Ok(None);
        }

        let mut invalid_weight = 0;
        for b in &rule.backends {
            match &b.backend {
                Ok(_) => backends.push(b),
                Err(error) => {
                    tracing::info!(route = %m.route.source, %error, "Invalid backend reference");
                    invalid_weight += b.weight;
                    for parent in &vr.parent_refs {
                        self.reports
                            .route_parent(&m.route.source, m.route.generation, parent)
                            .set(
                                ConditionReport::new(conditions::RESOLVED_REFS, false, error.reason())
                                    .with_message(error.to_string()),
                            );
                    }
                }
            }
        }

        if backends.is_empty() {
            return Ok(Some(direct_response(StatusCode::INTERNAL_SERVER_ERROR, None)));
        }
        if invalid_weight == 0 && backends.iter().all(|b| b.weight == 0) {
            return Err(Skip::Dropped(ValidationError::ZeroWeights));
        }
        backends.retain(|b| b.weight > 0);
        if backends.is_empty() {
            return Ok(Some(direct_response(StatusCode::INTERNAL_SERVER_ERROR, None)));
        }

        // Invalid refs keep their share of traffic, pointed at a cluster that never exists so
        // Envoy answers it with a 500.
        let cluster_specifier = match backends.as_slice() {
            [single] if invalid_weight == 0 => {
                ClusterSpecifier::Cluster(single.cluster_name().unwrap_or_default())
            }
            many => {
                let mut clusters = many
                    .iter()
                    .map(|b| ClusterWeight {
                        name: b.cluster_name().unwrap_or_default(),
                        weight: Some(UInt32Value { value: b.weight }),
                        ..Default::default()
                    })
                    .collect::<Vec<_>>();
                if invalid_weight > 0 {
                    clusters.push(ClusterWeight {
                        name: INVALID_BACKEND_CLUSTER.to_string(),
                        weight: Some(UInt32Value {
                            value: invalid_weight,
                        }),
                        ..Default::default()
                    });
                }
                ClusterSpecifier::WeightedClusters(WeightedCluster {
                    clusters,
                    ..Default::default()
                })
            }
        };
        let cluster_not_found_response_code = if invalid_weight > 0 {
            ClusterNotFoundResponseCode::InternalServerError as i32
        } else {
            ClusterNotFoundResponseCode::ServiceUnavailable as i32
        };
        Ok(Some(route::Action::Route(RouteAction {
            cluster_specifier: Some(cluster_specifier),
            cluster_not_found_response_code,
            ..Default::default()
        })))
    }

    fn apply_backend_plugins(&mut self, vr: &VirtualHostRule, backends: &[&BackendRefIr], out: &mut Route) {
        let m = &vr.rule;
        for b in backends {
            let Ok(backend) = &b.backend else {
                continue;
            };
            let mut config = TypedFilterConfigMap::default();
            for (gk, pass) in self.passes.iter_mut() {
                let Some(policy) = self.plugins.merge(gk, b.attached_policies.get(gk)) else {
                    continue;
                };
                let mut ctx = RouteBackendContext {
                    route: &m.route,
                    backend,
                    policy: &policy,
                    typed_filter_config: &mut config,
                };
                if let Err(error) = pass.apply_for_route_backend(&mut ctx) {
                    tracing::warn!(route = %m.route.source, backend = %backend.source, %error, "Backend policy failed");
                    for parent in &vr.parent_refs {
                        self.policies.error(&policy, parent, &error);
                    }
                }
            }
            if config.is_empty() {
                continue;
            }
            match &mut out.action {
                Some(route::Action::Route(RouteAction {
                    cluster_specifier: Some(ClusterSpecifier::WeightedClusters(wc)),
                    ..
                })) => {
                    let name = backend.cluster_name();
                    if let Some(cw) = wc.clusters.iter_mut().find(|cw| cw.name == name) {
                        cw.typed_per_filter_config.extend(config.to_proto());
                    }
                }
                _ => out.typed_per_filter_config.extend(config.to_proto()),
            }
        }
    }

    fn apply_route_plugins(&mut self, vr: &VirtualHostRule, out: &mut Route) {
        let m = &vr.rule;
        let policies = route_policies(m);
        let mut config = TypedFilterConfigMap::default();
        for (gk, pass) in self.passes.iter_mut() {
            let Some(policy) = self.plugins.merge(gk, policies.get(gk)) else {
                continue;
            };
            let mut ctx = RouteContext {
                route: &m.route,
                rule: m.rule(),
                policy: &policy,
                typed_filter_config: &mut config,
            };
            if let Err(error) = pass.apply_for_route(&mut ctx, out) {
                tracing::warn!(route = %m.route.source, %error, "Route policy failed");
                for parent in &vr.parent_refs {
                    self.policies.error(&policy, parent, &error);
                }
            }
        }
        out.typed_per_filter_config.extend(config.to_proto());
    }
}

/// Policies applying to a rule, most specific last: delegation parents from the root, then the
/// rule, then the route.
fn route_policies(m: &HttpRouteRuleMatchIr) -> AttachedPolicies {
    let mut policies = AttachedPolicies::default();
    for parent in &m.route.delegation_parents {
        policies.append(&parent.attached_policies);
    }
    policies.append(&m.rule().attached_policies);
    policies.append(&m.route.attached_policies);
    policies.sorted()
}

fn route_match(m: &HttpRouteMatch) -> RouteMatch {
    let path_specifier = m.path.as_ref().map(|p| match p {
        PathMatch::Exact(p) => PathSpecifier::Path(p.clone()),
        PathMatch::Prefix(p) if p == "/" => PathSpecifier::Prefix(p.clone()),
        PathMatch::Prefix(p) => PathSpecifier::PathSeparatedPrefix(p.trim_end_matches('/').to_string()),
        PathMatch::Regex(r) => PathSpecifier::SafeRegex(regex_matcher(r.as_str())),
    });

    let mut headers = m
        .headers
        .iter()
        .map(|h| match h {
            HeaderMatch::Exact(name, value) => header_matcher(
                name.as_str(),
                MatchPattern::Exact(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            ),
            HeaderMatch::Regex(name, r) => {
                header_matcher(name.as_str(), MatchPattern::SafeRegex(regex_matcher(r.as_str())))
            }
        })
        .collect::<Vec<_>>();
    if let Some(method) = &m.method {
        headers.push(header_matcher(
            ":method",
            MatchPattern::Exact(method.as_str().to_string()),
        ));
    }

    let query_parameters = m
        .query_params
        .iter()
        .map(|q| {
            let (name, pattern) = match q {
                QueryParamMatch::Exact(n, v) => (n, MatchPattern::Exact(v.clone())),
                QueryParamMatch::Regex(n, r) => (n, MatchPattern::SafeRegex(regex_matcher(r.as_str()))),
            };
            QueryParameterMatcher {
                name: name.clone(),
                query_parameter_match_specifier: Some(QueryParameterMatchSpecifier::StringMatch(
                    string_matcher(pattern),
                )),
            }
        })
        .collect();

    RouteMatch {
        path_specifier,
        headers,
        query_parameters,
        ..Default::default()
    }
}

fn regex_matcher(regex: &str) -> RegexMatcher {
    RegexMatcher {
        regex: regex.to_string(),
        ..Default::default()
    }
}

fn string_matcher(pattern: MatchPattern) -> StringMatcher {
    StringMatcher {
        match_pattern: Some(pattern),
        ..Default::default()
    }
}

fn header_matcher(name: &str, pattern: MatchPattern) -> HeaderMatcher {
    HeaderMatcher {
        name: name.to_string(),
        header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(string_matcher(pattern))),
        ..Default::default()
    }
}

fn header_options(f: &HeaderModifierFilter) -> Vec<HeaderValueOption> {
    let option = |name: &http::HeaderName, value: &http::HeaderValue, action: HeaderAppendAction| {
        HeaderValueOption {
            header: Some(EnvoyHeaderValue {
                key: name.to_string(),
                value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
                ..Default::default()
            }),
            append_action: action as i32,
            ..Default::default()
        }
    };
    f.set
        .iter()
        .map(|(n, v)| option(n, v, HeaderAppendAction::OverwriteIfExistsOrAdd))
        .chain(
            f.add
                .iter()
                .map(|(n, v)| option(n, v, HeaderAppendAction::AppendIfExistsOrAdd)),
        )
        .collect()
}

fn url_rewrite(f: &UrlRewriteFilter, m: &HttpRouteMatch, action: &mut RouteAction) {
    if let Some(host) = &f.hostname {
        action.host_rewrite_specifier = Some(HostRewriteSpecifier::HostRewriteLiteral(host.clone()));
    }
    match &f.path {
        Some(PathModifier::Full(path)) => {
            action.regex_rewrite = Some(RegexMatchAndSubstitute {
                pattern: Some(regex_matcher("^/.*$")),
                substitution: path.clone(),
            });
        }
        Some(PathModifier::Prefix(prefix)) => {
            let matched = match &m.path {
                Some(PathMatch::Prefix(p)) => p.trim_end_matches('/'),
                _ => "",
            };
            if prefix == "/" && !matched.is_empty() {
                // Stripping the whole prefix must not leave a leading "//".
                action.regex_rewrite = Some(RegexMatchAndSubstitute {
                    pattern: Some(regex_matcher(&format!("^{}/*", regex::escape(matched)))),
                    substitution: "/".to_string(),
                });
            } else {
                action.prefix_rewrite = prefix.clone();
            }
        }
        None => {}
    }
}

fn redirect(r: &RequestRedirectFilter) -> route::Action {
    let response_code = match r.status.map(|s| s.as_u16()) {
        Some(301) => RedirectResponseCode::MovedPermanently,
        Some(303) => RedirectResponseCode::SeeOther,
        Some(307) => RedirectResponseCode::TemporaryRedirect,
        Some(308) => RedirectResponseCode::PermanentRedirect,
        _ => RedirectResponseCode::Found,
    };
    route::Action::Redirect(RedirectAction {
        scheme_rewrite_specifier: r
            .scheme
            .as_ref()
            .map(|s| SchemeRewriteSpecifier::SchemeRedirect(s.as_str().to_string())),
        host_redirect: r.host.clone().unwrap_or_default(),
        port_redirect: r.port.map(|p| u32::from(p.get())).unwrap_or_default(),
        path_rewrite_specifier: r.path.as_ref().map(|p| match p {
            PathModifier::Full(p) => PathRewriteSpecifier::PathRedirect(p.clone()),
            PathModifier::Prefix(p) => PathRewriteSpecifier::PrefixRewrite(p.clone()),
        }),
        response_code: response_code as i32,
        ..Default::default()
    })
}

fn direct_response(status: StatusCode, body: Option<&str>) -> route::Action {
    route::Action::DirectResponse(DirectResponseAction {
        status: status.as_u16().into(),
        body: body.map(|b| DataSource {
            specifier: Some(data_source::Specifier::InlineString(b.to_string())),
            ..Default::default()
        }),
    })
}
