//! Gateway API hostname matching.
//!
//! A hostname prefixed with `*.` matches any name with that suffix and at least one more label.
//! An absent hostname matches everything and is written `*`.

pub const ANY: &str = "*";

/// The hostnames a route serves on a listener: the most specific name from each matching pair.
///
/// Empty when the route declares hostnames and none of them matches the listener.
pub fn intersect(listener: Option<&str>, route: &[String]) -> Vec<String> {
    let mut out = match listener {
        None if route.is_empty() => vec![ANY.to_string()],
        None => route.to_vec(),
        Some(l) if route.is_empty() => vec![l.to_string()],
        Some(l) => route
            .iter()
            .filter_map(|r| {
                if l == r || is_within(r, l) {
                    Some(r.clone())
                } else if is_within(l, r) {
                    Some(l.to_string())
                } else {
                    None
                }
            })
            .collect(),
    };
    out.sort();
    out.dedup();
    out
}

/// How closely a listener hostname matches a virtual host name. Higher is more specific.
pub fn specificity(listener: Option<&str>, vhost: &str) -> (u8, usize) {
    match listener {
        Some(l) if l == vhost => (2, l.len()),
        Some(l) if is_within(vhost, l) => (1, l.len()),
        _ => (0, 0),
    }
}

/// True when `name` is covered by the wildcard `pattern` (and is not the pattern itself).
fn is_within(name: &str, pattern: &str) -> bool {
    let Some(suffix) = pattern.strip_prefix('*') else {
        return false;
    };
    if name == pattern {
        return false;
    }
    let name = name.strip_prefix('*').unwrap_or(name);
    name.len() > suffix.len() && name.ends_with(suffix)
}
