//! Reverse-proxy routing rules
//!
//! Network-exposed containers get Traefik labels derived from their host,
//! TLS, compression, and basic-auth configuration. Labels are returned in a
//! BTreeMap so compiled plans are byte-stable.

use std::collections::BTreeMap;

use drydock_core::domain::Container;

/// Routing labels for a network-exposed container, or an empty map when no
/// public host is configured
pub fn routing_labels(container: &Container, port: u16) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    let Some(host) = container.url.as_deref() else {
        return labels;
    };

    let router = router_name(&container.name);
    labels.insert("traefik.enable".to_string(), "true".to_string());
    labels.insert(
        format!("traefik.http.routers.{}.rule", router),
        format!("Host(`{}`)", host),
    );
    labels.insert(
        format!("traefik.http.services.{}.loadbalancer.server.port", router),
        port.to_string(),
    );

    if container.tls {
        labels.insert(
            format!("traefik.http.routers.{}.entrypoints", router),
            "websecure".to_string(),
        );
        labels.insert(
            format!("traefik.http.routers.{}.tls", router),
            "true".to_string(),
        );
        labels.insert(
            format!("traefik.http.routers.{}.tls.certresolver", router),
            "letsencrypt".to_string(),
        );
    } else {
        labels.insert(
            format!("traefik.http.routers.{}.entrypoints", router),
            "web".to_string(),
        );
    }

    let mut middlewares = Vec::new();
    if container.compress {
        labels.insert(
            format!("traefik.http.middlewares.{}-compress.compress", router),
            "true".to_string(),
        );
        middlewares.push(format!("{}-compress", router));
    }
    if let Some(auth) = &container.basic_auth {
        labels.insert(
            format!("traefik.http.middlewares.{}-auth.basicauth.users", router),
            format!("{}:{}", auth.username, auth.password_hash),
        );
        middlewares.push(format!("{}-auth", router));
    }
    if !middlewares.is_empty() {
        labels.insert(
            format!("traefik.http.routers.{}.middlewares", router),
            middlewares.join(","),
        );
    }

    labels
}

fn router_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
