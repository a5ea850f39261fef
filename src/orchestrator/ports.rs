use crate::config::model::{HealthCheck, ServiceConfig};
use std::net::TcpListener;

#[derive(Debug)]
pub struct PortConflict {
    pub service: String,
    pub port: u16,
    pub owner: Option<String>,
}

impl std::fmt::Display for PortConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.owner {
            Some(owner) => write!(
                f,
                "Port {} checked by '{}' is already in use by {}",
                self.port, self.service, owner
            ),
            None => write!(
                f,
                "Port {} checked by '{}' is already in use",
                self.port, self.service
            ),
        }
    }
}

pub fn check_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

fn is_local(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0" | "::1" | "[::1]")
}

/// The local port a service's health check expects it to listen on.
pub fn health_port(check: &HealthCheck) -> Option<u16> {
    match check {
        HealthCheck::Tcp { host, port, .. } => is_local(host).then_some(*port),
        HealthCheck::Http { url, .. } => {
            let url = reqwest::Url::parse(url).ok()?;
            if !is_local(url.host_str()?) {
                return None;
            }
            url.port_or_known_default()
        }
    }
}

/// Find services whose health port is already taken before they launch.
/// A squatter would otherwise answer the health gate on the new service's
/// behalf.
pub fn check_service_ports<'a>(
    services: impl IntoIterator<Item = &'a ServiceConfig>,
) -> Vec<PortConflict> {
    services
        .into_iter()
        .filter_map(|svc| {
            let port = health_port(svc.health.as_ref()?)?;
            (!check_port_available(port)).then(|| PortConflict {
                service: svc.name.clone(),
                port,
                owner: crate::platform::identify_port_owner(port),
            })
        })
        .collect()
}

/// Format conflicts into a user-friendly error message.
pub fn format_port_conflicts(conflicts: &[PortConflict]) -> String {
    let mut msg = String::from("Port conflicts detected:\n");
    for c in conflicts {
        msg.push_str(&format!("  - {}\n", c));
    }
    msg.push_str("\nRun `stackrig stop` to clear a previous run, or free the ports above.");
    msg
}
