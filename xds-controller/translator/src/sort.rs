use gateway_xds_controller_core::http_route::{HttpRouteRuleMatchIr, PathMatch};
use std::cmp::Ordering;

/// Orders rule matches within a virtual host, most specific first.
///
/// Envoy evaluates routes in order and picks the first match, so this ordering is the matching
/// priority. It is total over distinct matches, so the result never depends on input order.
pub fn compare_rule_matches(a: &HttpRouteRuleMatchIr, b: &HttpRouteRuleMatchIr) -> Ordering {
    let weight = |m: &HttpRouteRuleMatchIr| m.rule().precedence_weight.unwrap_or(0);
    weight(b)
        .cmp(&weight(a))
        .then_with(|| path_specificity(b).cmp(&path_specificity(a)))
        .then_with(|| field_counts(b).cmp(&field_counts(a)))
        .then_with(|| newest_first(a, b))
        .then_with(|| a.route.source.namespace.cmp(&b.route.source.namespace))
        .then_with(|| a.route.source.name.cmp(&b.route.source.name))
        .then_with(|| a.route.source.group_kind.cmp(&b.route.source.group_kind))
        .then_with(|| a.rule_index.cmp(&b.rule_index))
        .then_with(|| a.match_index.cmp(&b.match_index))
}

/// Exact paths beat regexes beat prefixes; within a kind, longer wins.
fn path_specificity(m: &HttpRouteRuleMatchIr) -> (u8, usize) {
    match &m.route_match.path {
        Some(PathMatch::Exact(p)) => (3, p.len()),
        Some(PathMatch::Regex(r)) => (2, r.as_str().len()),
        Some(PathMatch::Prefix(p)) => (1, p.len()),
        None => (0, 0),
    }
}

fn field_counts(m: &HttpRouteRuleMatchIr) -> (bool, usize, usize) {
    (
        m.route_match.method.is_some(),
        m.route_match.headers.len(),
        m.route_match.query_params.len(),
    )
}

fn newest_first(a: &HttpRouteRuleMatchIr, b: &HttpRouteRuleMatchIr) -> Ordering {
    match (&a.route.creation_timestamp, &b.route.creation_timestamp) {
        (Some(a), Some(b)) => b.cmp(a),
        (None, None) => Ordering::Equal,
        // Routes with timestamps are preferred over routes without.
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{http_route, rule};
    use chrono::{TimeZone, Utc};
    use gateway_xds_controller_core::http_route::{
        HeaderMatch, HeaderName, HeaderValue, HttpRouteMatch, Method,
    };
    use std::sync::Arc;

    fn path(p: PathMatch) -> HttpRouteMatch {
        HttpRouteMatch {
            path: Some(p),
            ..HttpRouteMatch::default()
        }
    }

    fn sorted_names(routes: &[Arc<gateway_xds_controller_core::http_route::HttpRouteIr>]) -> Vec<String> {
        let mut matches = routes
            .iter()
            .flat_map(|r| r.rule_matches().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        matches.sort_by(compare_rule_matches);
        matches.iter().map(|m| m.name()).collect()
    }

    #[test]
    fn path_kinds_and_lengths() {
        let route = Arc::new(http_route(
            "ns",
            "r",
            vec![
                rule(vec![path(PathMatch::Prefix("/".to_string()))]),
                rule(vec![path(PathMatch::Prefix("/api".to_string()))]),
                rule(vec![path(PathMatch::regex("/a.*").unwrap())]),
                rule(vec![path(PathMatch::Exact("/api/v1".to_string()))]),
            ],
        ));
        assert_eq!(
            sorted_names(&[route]),
            vec![
                "httproute-ns-r-rule-3-matcher-0",
                "httproute-ns-r-rule-2-matcher-0",
                "httproute-ns-r-rule-1-matcher-0",
                "httproute-ns-r-rule-0-matcher-0",
            ]
        );
    }

    #[test]
    fn precedence_weight_overrides_specificity() {
        let mut weighted = rule(vec![path(PathMatch::Prefix("/".to_string()))]);
        weighted.precedence_weight = Some(10);
        let route = Arc::new(http_route(
            "ns",
            "r",
            vec![
                rule(vec![path(PathMatch::Exact("/exact".to_string()))]),
                weighted,
            ],
        ));
        assert_eq!(
            sorted_names(&[route]),
            vec![
                "httproute-ns-r-rule-1-matcher-0",
                "httproute-ns-r-rule-0-matcher-0",
            ]
        );
    }

    #[test]
    fn more_match_fields_win() {
        let with_method = HttpRouteMatch {
            method: Some(Method::GET),
            ..HttpRouteMatch::default()
        };
        let with_header = HttpRouteMatch {
            headers: vec![HeaderMatch::Exact(
                HeaderName::from_static("x-env"),
                HeaderValue::from_static("canary"),
            )],
            ..HttpRouteMatch::default()
        };
        let route = Arc::new(http_route(
            "ns",
            "r",
            vec![
                rule(vec![HttpRouteMatch::default()]),
                rule(vec![with_header]),
                rule(vec![with_method]),
            ],
        ));
        assert_eq!(
            sorted_names(&[route]),
            vec![
                "httproute-ns-r-rule-2-matcher-0",
                "httproute-ns-r-rule-1-matcher-0",
                "httproute-ns-r-rule-0-matcher-0",
            ]
        );
    }

    #[test]
    fn newer_routes_then_names_break_ties() {
        let mut old = http_route("ns", "old", vec![rule(vec![])]);
        old.creation_timestamp = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let mut new = http_route("ns", "new", vec![rule(vec![])]);
        new.creation_timestamp = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let b = http_route("ns", "b", vec![rule(vec![])]);
        let a = http_route("ns", "a", vec![rule(vec![])]);

        let routes = [a, b, old, new].map(Arc::new);
        let expected = vec![
            "httproute-ns-new-rule-0-matcher-0",
            "httproute-ns-old-rule-0-matcher-0",
            "httproute-ns-a-rule-0-matcher-0",
            "httproute-ns-b-rule-0-matcher-0",
        ];
        assert_eq!(sorted_names(&routes), expected);

        let mut reversed = routes.to_vec();
        reversed.reverse();
        assert_eq!(sorted_names(&reversed), expected);
    }
}
