//! Host names the serving certificate must cover.

use std::collections::BTreeSet;

use crate::config::MeshConfig;

/// Revision name treated the same as no revision.
pub const DEFAULT_REVISION: &str = "default";

/// Compute the sorted, de-duplicated SAN set for this control plane.
///
/// The set is the union of the namespace-qualified service aliases, the
/// comma separated custom hosts and the host part of the discovery address.
pub fn resolve_san_set(mesh: &MeshConfig) -> Vec<String> {
    let namespace = mesh.namespace.as_str();
    let mut names = BTreeSet::new();

    names.insert(format!("{}.{namespace}.svc", mesh.service_name));
    names.insert(format!("{}-remote.{namespace}.svc", mesh.service_name));
    names.insert(format!("{}.{namespace}.svc", mesh.legacy_service_name));

    let revision = mesh.revision.trim();
    if !revision.is_empty() && revision != DEFAULT_REVISION {
        names.insert(format!("{}-{revision}.{namespace}.svc", mesh.service_name));
    }

    names.extend(
        mesh.custom_hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string),
    );

    if let Some(host) = discovery_host(&mesh.discovery_address) {
        names.insert(host.to_string());
    }

    names.into_iter().collect()
}

/// Host part of a discovery address, without port or IPv6 brackets.
fn discovery_host(address: &str) -> Option<&str> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }

    if let Some(rest) = address.strip_prefix('[') {
        return rest.split_once(']').map(|(host, _)| host).filter(|h| !h.is_empty());
    }

    match address.rsplit_once(':') {
        Some((host, port))
            if !host.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            Some(host).filter(|h| !h.is_empty())
        }
        _ => Some(address),
    }
}
