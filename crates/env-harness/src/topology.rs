//! Stack topology: published ports, health endpoints and dependency edges.
//!
//! Infrastructure is gated before the applications, and
//! `connector-admin` only after `platform-registration-service`, which it
//! registers against.

use crate::config::HarnessConfig;
use crate::gate::RetryPolicy;
use crate::probe::ProbeTarget;
use crate::session::Dependency;
use std::time::Duration;

pub const CONSUL: &str = "consul";
pub const MYSQL: &str = "mysql";
pub const KAFKA: &str = "kafka";
pub const APICURIO: &str = "apicurio-registry";
pub const OPENSEARCH: &str = "opensearch";
pub const MINIO: &str = "minio";
pub const GRAFANA: &str = "grafana";
pub const REGISTRATION_SERVICE: &str = "platform-registration-service";
pub const CONNECTOR_ADMIN: &str = "connector-admin";

/// Published host ports of the compose stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackPorts {
    pub consul: u16,
    pub mysql: u16,
    pub kafka: u16,
    pub apicurio: u16,
    pub opensearch: u16,
    pub minio: u16,
    pub grafana: u16,
    /// HTTP and gRPC share one port (unified server).
    pub registration: u16,
    pub connector_admin: u16,
}

impl Default for StackPorts {
    fn default() -> Self {
        Self {
            consul: 8500,
            mysql: 3306,
            kafka: 9094,
            apicurio: 8081,
            opensearch: 9200,
            minio: 9000,
            grafana: 3000,
            registration: 38101,
            connector_admin: 38107,
        }
    }
}

/// Base URLs and addresses of every service in the stack.
#[derive(Debug, Clone)]
pub struct StackEndpoints {
    host: String,
    ports: StackPorts,
}

impl StackEndpoints {
    pub fn new(host: impl Into<String>, ports: StackPorts) -> Self {
        Self {
            host: host.into(),
            ports,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.stack_host.clone(), StackPorts::default())
    }

    pub fn ports(&self) -> &StackPorts {
        &self.ports
    }

    fn http(&self, port: u16) -> String {
        format!("http://{}:{}", self.host, port)
    }

    fn tcp(&self, port: u16) -> String {
        format!("tcp://{}:{}", self.host, port)
    }

    pub fn consul_base_url(&self) -> String {
        self.http(self.ports.consul)
    }

    pub fn registration_base_url(&self) -> String {
        self.http(self.ports.registration)
    }

    pub fn registration_grpc_address(&self) -> String {
        format!("{}:{}", self.host, self.ports.registration)
    }

    pub fn connector_admin_base_url(&self) -> String {
        self.http(self.ports.connector_admin)
    }

    pub fn connector_admin_grpc_address(&self) -> String {
        format!("{}:{}", self.host, self.ports.connector_admin)
    }

    /// Health targets of the infrastructure services, in gating order.
    pub fn infrastructure_targets(&self) -> Vec<(&'static str, String)> {
        vec![
            (CONSUL, format!("{}/v1/status/leader", self.consul_base_url())),
            (MYSQL, self.tcp(self.ports.mysql)),
            (KAFKA, self.tcp(self.ports.kafka)),
            (
                APICURIO,
                format!("{}/health/ready", self.http(self.ports.apicurio)),
            ),
            (
                OPENSEARCH,
                format!("{}/_cluster/health", self.http(self.ports.opensearch)),
            ),
            (
                MINIO,
                format!("{}/minio/health/live", self.http(self.ports.minio)),
            ),
            (GRAFANA, format!("{}/api/health", self.http(self.ports.grafana))),
        ]
    }

    /// Gate dependencies for the infrastructure services.
    pub fn infrastructure_dependencies(
        &self,
        policy: RetryPolicy,
        probe_timeout: Duration,
    ) -> Vec<Dependency> {
        self.infrastructure_targets()
            .into_iter()
            .map(|(name, url)| Dependency::new(name, ProbeTarget::new(url, probe_timeout), policy))
            .collect()
    }

    /// Gate dependency for `platform-registration-service`.
    pub fn registration_dependency(&self, policy: RetryPolicy, probe_timeout: Duration) -> Dependency {
        Dependency::new(
            REGISTRATION_SERVICE,
            ProbeTarget::new(
                format!("{}/q/health/ready", self.registration_base_url()),
                probe_timeout,
            ),
            policy,
        )
        .depends_on(CONSUL)
        .depends_on(MYSQL)
        .depends_on(KAFKA)
        .depends_on(APICURIO)
    }

    /// Gate dependency for `connector-admin`.
    pub fn connector_admin_dependency(&self, policy: RetryPolicy, probe_timeout: Duration) -> Dependency {
        Dependency::new(
            CONNECTOR_ADMIN,
            ProbeTarget::new(
                format!("{}/q/health/ready", self.connector_admin_base_url()),
                probe_timeout,
            ),
            policy,
        )
        .depends_on(REGISTRATION_SERVICE)
        .depends_on(MYSQL)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::SessionSpec;

    fn endpoints() -> StackEndpoints {
        StackEndpoints::new("localhost", StackPorts::default())
    }

    #[test]
    fn test_default_ports() {
        let ports = StackPorts::default();
        assert_eq!(ports.consul, 8500);
        assert_eq!(ports.mysql, 3306);
        assert_eq!(ports.registration, 38101);
        assert_eq!(ports.connector_admin, 38107);
    }

    #[test]
    fn test_mysql_and_kafka_use_tcp_probes() {
        let targets = endpoints().infrastructure_targets();
        let mysql = targets.iter().find(|(name, _)| *name == MYSQL).unwrap();
        let kafka = targets.iter().find(|(name, _)| *name == KAFKA).unwrap();
        assert_eq!(mysql.1, "tcp://localhost:3306");
        assert_eq!(kafka.1, "tcp://localhost:9094");
    }

    #[test]
    fn test_full_stack_gating_order() {
        let policy = RetryPolicy::once();
        let timeout = Duration::from_secs(1);
        let endpoints = endpoints();

        // Declare applications first to prove ordering comes from the edges.
        let spec = SessionSpec::builder("full")
            .dependency(endpoints.connector_admin_dependency(policy, timeout))
            .dependency(endpoints.registration_dependency(policy, timeout))
            .dependencies(endpoints.infrastructure_dependencies(policy, timeout))
            .build()
            .unwrap();

        let order: Vec<&str> = spec.gating_order().collect();
        let position = |name: &str| order.iter().position(|n| *n == name).unwrap();

        assert!(position(CONSUL) < position(REGISTRATION_SERVICE));
        assert!(position(APICURIO) < position(REGISTRATION_SERVICE));
        assert!(position(REGISTRATION_SERVICE) < position(CONNECTOR_ADMIN));
        assert_eq!(order.len(), 9);
    }
}
