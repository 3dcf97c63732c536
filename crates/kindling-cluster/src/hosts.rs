//! Hosts-file preflight
//!
//! Platform UIs are served on `<prefix>.<domain>` names that only resolve
//! when the host's hosts file maps them to the loopback address. Missing
//! entries are reported, never written.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, warn};

/// Default hosts file location
pub const HOSTS_FILE: &str = "/etc/hosts";

/// Hostnames from `wanted` that no line of `hosts` maps
pub fn missing_entries(hosts: &str, wanted: &[String]) -> Vec<String> {
    let present: BTreeSet<&str> = hosts
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .flat_map(|line| line.split_whitespace().skip(1))
        .collect();
    wanted
        .iter()
        .filter(|host| !present.contains(host.as_str()))
        .cloned()
        .collect()
}

/// Warn about each hostname missing from the hosts file at `path`.
///
/// Returns the missing names. An unreadable file is logged and treated as
/// having no missing entries.
pub fn check_hosts_file(path: &Path, wanted: &[String]) -> Vec<String> {
    let hosts = match std::fs::read_to_string(path) {
        Ok(hosts) => hosts,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Could not read hosts file, skipping check");
            return Vec::new();
        }
    };
    let missing = missing_entries(&hosts, wanted);
    for host in &missing {
        warn!(
            host = %host,
            "{host} is not in {}; add `127.0.0.1 {host}` to reach it from this machine",
            path.display()
        );
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wanted() -> Vec<String> {
        vec![
            "argocd.kindling.local".to_string(),
            "grafana.kindling.local".to_string(),
        ]
    }

    #[test]
    fn finds_unmapped_hosts() {
        let hosts = "127.0.0.1 localhost\n127.0.0.1\targocd.kindling.local argocd\n";
        assert_eq!(
            missing_entries(hosts, &wanted()),
            vec!["grafana.kindling.local".to_string()]
        );
    }

    #[test]
    fn comments_do_not_count() {
        let hosts = "# 127.0.0.1 argocd.kindling.local\n127.0.0.1 localhost # grafana.kindling.local\n";
        assert_eq!(missing_entries(hosts, &wanted()), wanted());
    }

    #[test]
    fn ip_column_is_not_a_hostname() {
        let hosts = "argocd.kindling.local grafana.kindling.local\n";
        assert_eq!(
            missing_entries(hosts, &wanted()),
            vec!["argocd.kindling.local".to_string()]
        );
    }

    #[test]
    fn unreadable_file_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(check_hosts_file(&dir.path().join("hosts"), &wanted()).is_empty());

        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 argocd.kindling.local grafana.kindling.local\n")
            .expect("write");
        assert!(check_hosts_file(&path, &wanted()).is_empty());
    }
}
