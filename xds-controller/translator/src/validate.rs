//! Structural checks on translated routes.
//!
//! These catch the configurations Envoy would reject outright, so that a single bad rule is
//! dropped instead of invalidating the whole route configuration.

use envoy_types::pb::envoy::config::route::v3::{
    redirect_action::PathRewriteSpecifier, route, route_match::PathSpecifier, Route,
};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("invalid rewrite path {path:?}: {reason}")]
    InvalidRewrite { path: String, reason: &'static str },

    #[error("All backend weights are 0. At least one backendRef in the rule must specify a non-zero weight")]
    ZeroWeights,

    #[error("rejected by envoy: {0}")]
    Envoy(String),
}

pub fn validate_route(route: &Route) -> Result<(), ValidationError> {
    if let Some(m) = &route.r#match {
        match &m.path_specifier {
            Some(PathSpecifier::Prefix(p))
            | Some(PathSpecifier::Path(p))
            | Some(PathSpecifier::PathSeparatedPrefix(p)) => {
                check_path(p).map_err(|reason| ValidationError::InvalidPath {
                    path: p.clone(),
                    reason,
                })?
            }
            _ => {}
        }
    }

    match &route.action {
        Some(route::Action::Route(action)) => {
            if !action.prefix_rewrite.is_empty() {
                check_rewrite(&action.prefix_rewrite)?;
            }
            if let Some(rr) = &action.regex_rewrite {
                check_rewrite(&rr.substitution)?;
            }
        }
        Some(route::Action::Redirect(redirect)) => match &redirect.path_rewrite_specifier {
            Some(PathRewriteSpecifier::PathRedirect(p)) | Some(PathRewriteSpecifier::PrefixRewrite(p)) => {
                check_rewrite(p)?
            }
            _ => {}
        },
        _ => {}
    }

    Ok(())
}

fn check_rewrite(path: &str) -> Result<(), ValidationError> {
    check_path(path).map_err(|reason| ValidationError::InvalidRewrite {
        path: path.to_string(),
        reason,
    })
}

/// Accepts an absolute path made of RFC 3986 path characters with no empty or dot segments.
fn check_path(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("must start with '/'");
    }
    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%' {
            let hex = bytes.get(i + 1..i + 3).ok_or("truncated percent-encoding")?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return Err("invalid percent-encoding");
            }
            i += 3;
            continue;
        }
        if !is_path_char(b) {
            return Err("contains invalid characters");
        }
        i += 1;
    }
    if path.contains("//") {
        return Err("contains '//'");
    }
    if path.contains("/../") || path.contains("/./") {
        return Err("contains dot segments");
    }
    if path.ends_with("/..") || path.ends_with("/.") {
        return Err("ends with a dot segment");
    }
    Ok(())
}

fn is_path_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'.' | b'_' | b'~' // unreserved
            | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' // sub-delims
            | b':' | b'@' | b'/'
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::route::v3::{RouteAction, RouteMatch};
    use rstest::rstest;

    #[rstest]
    #[case("/")]
    #[case("/api/v1")]
    #[case("/a-b_c~d.e")]
    #[case("/%20space")]
    #[case("/user@host:80;x=1")]
    fn accepts(#[case] path: &str) {
        assert_eq!(check_path(path), Ok(()));
    }

    #[rstest]
    #[case("relative")]
    #[case("/new//../path")]
    #[case("/a/../b")]
    #[case("/a/./b")]
    #[case("/a/..")]
    #[case("/a/.")]
    #[case("/with space")]
    #[case("/query?x")]
    #[case("/bad%zz")]
    #[case("/trunc%2")]
    fn rejects(#[case] path: &str) {
        assert!(check_path(path).is_err(), "{path} must be rejected");
    }

    #[test]
    fn rejects_invalid_prefix_rewrite() {
        let route = Route {
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix("/old".to_string())),
                ..Default::default()
            }),
            action: Some(route::Action::Route(RouteAction {
                prefix_rewrite: "/new//../path".to_string(),
                ..Default::default()
            })),
            ..Default::default()
        };
        assert_eq!(
            validate_route(&route),
            Err(ValidationError::InvalidRewrite {
                path: "/new//../path".to_string(),
                reason: "contains '//'",
            })
        );
    }
}
