//! Domain normalization for block-list entries.

use std::collections::BTreeSet;

/**
 * Reduce a server-supplied entry to a bare host name
 *
 * "HTTPS://Example.com:8443/path" -> "example.com"
 * Subdomains (www. included) are kept as given. Entries without a dot, or
 * with characters that could break a hosts line, are rejected.
 */
pub fn normalize_domain(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let mut domain = lowered.as_str();

    for scheme in ["http://", "https://"] {
        if let Some(rest) = domain.strip_prefix(scheme) {
            domain = rest;
            break;
        }
    }
    if let Some((host, _path)) = domain.split_once('/') {
        domain = host;
    }
    if let Some((host, _port)) = domain.split_once(':') {
        domain = host;
    }

    if !domain.contains('.') {
        return None;
    }
    let valid = domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !valid {
        return None;
    }

    Some(domain.to_string())
}

/// Normalize every entry, dropping rejects and duplicates (first seen wins).
pub fn normalize_list<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut domains = Vec::with_capacity(raw.len());

    for entry in raw {
        match normalize_domain(entry.as_ref()) {
            Some(domain) => {
                if seen.insert(domain.clone()) {
                    domains.push(domain);
                }
            }
            None => log::debug!("Ignoring block-list entry {:?}", entry.as_ref()),
        }
    }
    domains
}
