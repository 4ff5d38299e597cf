//! Check suites for the two application services.
//!
//! Each suite declares the compose files it needs, the dependencies to gate on
//! and the ordered steps to run once everything is ready.
//!
//! Critical steps are the ones a broken deployment cannot hide: liveness,
//! readiness, and the primary write/read RPC pair of each service. Everything
//! else (startup/full health, metrics, reflection, follow-up RPCs, Consul
//! catalog integration) degrades to a warning.

use crate::compose::ComposeProject;
use crate::config::{select_version, HarnessConfig};
use crate::metrics::MetricsScraper;
use crate::probe::{HttpProbe, Probe, ProbeTarget};
use crate::rpc::{extract_string_field, missing_needles, GrpcurlClient};
use crate::sanitize::sanitize_detail;
use crate::session::{SessionError, SessionSpec};
use crate::steps::{CheckOutcome, Step};
use crate::topology::{StackEndpoints, CONNECTOR_ADMIN, REGISTRATION_SERVICE};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

pub const REGISTRATION_VERSION_ENV: &str = "REGISTRATION_VERSION";
pub const CONNECTOR_ADMIN_VERSION_ENV: &str = "CONNECTOR_ADMIN_VERSION";

pub const INFRA_COMPOSE_FILE: &str = "docker-compose.infra.yml";
pub const REGISTRATION_COMPOSE_FILE: &str = "registration.yml";
pub const CONNECTOR_ADMIN_COMPOSE_FILE: &str = "connector-admin.yml";

pub const REGISTRATION_GRPC_SERVICE: &str =
    "io.pipeline.platform.registration.PlatformRegistration";
const REGISTER_SERVICE: &str =
    "io.pipeline.platform.registration.PlatformRegistration/RegisterService";
const GET_SERVICE: &str = "io.pipeline.platform.registration.PlatformRegistration/GetService";
const LIST_SERVICES: &str = "io.pipeline.platform.registration.PlatformRegistration/ListServices";
const UNREGISTER_SERVICE: &str =
    "io.pipeline.platform.registration.PlatformRegistration/UnregisterService";

pub const CONNECTOR_ADMIN_GRPC_SERVICE: &str = "io.pipeline.connector.intake.ConnectorAdminService";
const REGISTER_CONNECTOR: &str =
    "io.pipeline.connector.intake.ConnectorAdminService/RegisterConnector";
const GET_CONNECTOR: &str = "io.pipeline.connector.intake.ConnectorAdminService/GetConnector";
const LIST_CONNECTORS: &str = "io.pipeline.connector.intake.ConnectorAdminService/ListConnectors";
const SET_CONNECTOR_STATUS: &str =
    "io.pipeline.connector.intake.ConnectorAdminService/SetConnectorStatus";
const VALIDATE_API_KEY: &str = "io.pipeline.connector.intake.ConnectorAdminService/ValidateApiKey";

/// Metric series every Quarkus service is expected to expose.
const EXPECTED_METRICS: &[&str] = &["# TYPE", "jvm_memory_used_bytes"];

/// Account used for connectors registered by the harness.
const TEST_ACCOUNT_ID: &str = "stack-check-account";

/// grpcurl prints responses as indented JSON.
const SUCCESS_NEEDLE: &str = r#""success": true"#;

/// Keys for values captured from earlier responses.
const CAPTURED_CONNECTOR_ID: &str = "connectorId";
const CAPTURED_API_KEY: &str = "apiKey";

/// Which application the session exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    Registration,
    ConnectorAdmin,
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Image tags selected for the application services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versions {
    pub registration: String,
    pub connector_admin: String,
}

impl Versions {
    /// The positional selector applies to the suite's own service; the other
    /// service falls back to its environment variable or `latest`.
    pub fn select(suite: Suite, positional: Option<&str>, vars: &HashMap<String, String>) -> Self {
        let (registration_arg, connector_admin_arg) = match suite {
            Suite::Registration => (positional, None),
            Suite::ConnectorAdmin => (None, positional),
        };
        Self {
            registration: select_version(registration_arg, vars, REGISTRATION_VERSION_ENV),
            connector_admin: select_version(connector_admin_arg, vars, CONNECTOR_ADMIN_VERSION_ENV),
        }
    }
}

impl Suite {
    pub fn name(&self) -> &'static str {
        match self {
            Suite::Registration => REGISTRATION_SERVICE,
            Suite::ConnectorAdmin => CONNECTOR_ADMIN,
        }
    }

    /// Version of the service under test.
    pub fn version<'v>(&self, versions: &'v Versions) -> &'v str {
        match self {
            Suite::Registration => &versions.registration,
            Suite::ConnectorAdmin => &versions.connector_admin,
        }
    }

    /// Compose project layering infrastructure and service overrides.
    pub fn compose_project(&self, config: &HarnessConfig, versions: &Versions) -> ComposeProject {
        let dir = &config.compose_dir;
        let project = ComposeProject::new(config.project_name.clone())
            .file(dir.join(INFRA_COMPOSE_FILE))
            .file(dir.join(REGISTRATION_COMPOSE_FILE))
            .env("REGISTRATION_IMAGE_TAG", versions.registration.clone());

        match self {
            Suite::Registration => project,
            Suite::ConnectorAdmin => project
                .file(dir.join(CONNECTOR_ADMIN_COMPOSE_FILE))
                .env("CONNECTOR_ADMIN_IMAGE_TAG", versions.connector_admin.clone()),
        }
    }

    /// Session declaration: infrastructure first, then the applications.
    pub fn session_spec(
        &self,
        config: &HarnessConfig,
        endpoints: &StackEndpoints,
        versions: &Versions,
    ) -> Result<SessionSpec, SessionError> {
        let policy = config.readiness;
        let timeout = config.probe_timeout;

        let builder = SessionSpec::builder(format!("{} ({})", self.name(), self.version(versions)))
            .dependencies(endpoints.infrastructure_dependencies(policy, timeout))
            .dependency(endpoints.registration_dependency(policy, timeout))
            .diagnostic_lines(config.diagnostic_lines)
            .keep_environment(config.keep_environment);

        match self {
            Suite::Registration => builder.build(),
            Suite::ConnectorAdmin => builder
                .dependency(endpoints.connector_admin_dependency(policy, timeout))
                .build(),
        }
    }

    /// Ordered steps of this suite, borrowing clients from `ctx`.
    pub fn steps<'a>(&self, ctx: &'a SuiteContext) -> Vec<Step<'a>> {
        match self {
            Suite::Registration => registration_steps(ctx),
            Suite::ConnectorAdmin => connector_admin_steps(ctx),
        }
    }
}

/// Clients and per-run state shared by a suite's steps.
pub struct SuiteContext {
    endpoints: StackEndpoints,
    probe: HttpProbe,
    scraper: MetricsScraper,
    registration_grpc: GrpcurlClient,
    connector_admin_grpc: GrpcurlClient,
    grpc_available: bool,
    probe_timeout: Duration,
    run_id: String,
    captured: Mutex<HashMap<&'static str, String>>,
}

impl SuiteContext {
    /// Build clients for `endpoints`. gRPC starts out unavailable until
    /// [`SuiteContext::detect_grpcurl`] runs.
    pub fn new(config: &HarnessConfig, endpoints: StackEndpoints) -> Self {
        let registration_grpc = GrpcurlClient::new(endpoints.registration_grpc_address())
            .with_plaintext(config.grpc_plaintext);
        let connector_admin_grpc = GrpcurlClient::new(endpoints.connector_admin_grpc_address())
            .with_plaintext(config.grpc_plaintext);
        let id = uuid::Uuid::new_v4().simple().to_string();

        Self {
            endpoints,
            probe: HttpProbe::new(),
            scraper: MetricsScraper::new(config.probe_timeout),
            registration_grpc,
            connector_admin_grpc,
            grpc_available: false,
            probe_timeout: config.probe_timeout,
            run_id: id.get(..8).unwrap_or(&id).to_string(),
            captured: Mutex::new(HashMap::new()),
        }
    }

    /// Probe for a usable `grpcurl` binary.
    pub async fn detect_grpcurl(mut self) -> Self {
        self.grpc_available = self.registration_grpc.is_available().await;
        self
    }

    #[must_use]
    pub fn with_grpc_available(mut self, available: bool) -> Self {
        self.grpc_available = available;
        self
    }

    /// Override the clients' executable (tests, non-standard installs).
    #[must_use]
    pub fn with_grpcurl_binary(mut self, binary: &str) -> Self {
        self.registration_grpc = self.registration_grpc.with_binary(binary);
        self.connector_admin_grpc = self.connector_admin_grpc.with_binary(binary);
        self
    }

    pub fn grpc_available(&self) -> bool {
        self.grpc_available
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn probe_service_name(&self) -> String {
        format!("stack-check-probe-{}", self.run_id)
    }

    fn connector_name(&self) -> String {
        format!("stack-check-connector-{}", self.run_id)
    }

    async fn capture(&self, key: &'static str, value: String) {
        self.captured.lock().await.insert(key, value);
    }

    async fn captured(&self, key: &'static str) -> Option<String> {
        self.captured.lock().await.get(key).cloned()
    }
}

async fn health_check(ctx: &SuiteContext, url: String) -> CheckOutcome {
    let target = ProbeTarget::new(url, ctx.probe_timeout);
    if ctx.probe.probe(&target).await {
        CheckOutcome::passed(target.url())
    } else {
        CheckOutcome::failed(format!("{} did not answer 2xx", target.url()))
    }
}

async fn metrics_check(ctx: &SuiteContext, url: String) -> CheckOutcome {
    match ctx.scraper.missing_series(&url, EXPECTED_METRICS).await {
        Ok(missing) if missing.is_empty() => CheckOutcome::passed(url),
        Ok(missing) => CheckOutcome::failed(format!("{url} missing {}", missing.join(", "))),
        Err(e) => CheckOutcome::failed(e.to_string()),
    }
}

async fn consul_catalog_check(ctx: &SuiteContext, service: &str) -> CheckOutcome {
    let url = format!("{}/v1/catalog/services", ctx.endpoints.consul_base_url());
    match ctx.probe.fetch_text(&url, ctx.probe_timeout).await {
        Ok(body) if body.contains(service) => {
            CheckOutcome::passed(format!("{service} registered in Consul"))
        }
        Ok(body) => CheckOutcome::failed(format!(
            "{service} not in Consul catalog: {}",
            sanitize_detail(&body)
        )),
        Err(e) => CheckOutcome::failed(e.to_string()),
    }
}

async fn reflection_check(ctx: &SuiteContext, client: &GrpcurlClient, service: &str) -> CheckOutcome {
    if !ctx.grpc_available {
        return CheckOutcome::skipped("grpcurl not available");
    }
    match client.list_services().await {
        Ok(listing) if listing.contains(service) => {
            CheckOutcome::passed(format!("reflection lists {service}"))
        }
        Ok(listing) => CheckOutcome::failed(format!(
            "reflection does not list {service}: {}",
            sanitize_detail(&listing)
        )),
        Err(e) => CheckOutcome::failed(e.to_string()),
    }
}

/// Call `method` and require every needle in the textual response.
/// Returns the raw response alongside the outcome for field capture.
async fn rpc_check(
    ctx: &SuiteContext,
    client: &GrpcurlClient,
    method: &str,
    body: Value,
    needles: &[&str],
) -> (CheckOutcome, Option<String>) {
    if !ctx.grpc_available {
        return (CheckOutcome::skipped("grpcurl not available"), None);
    }

    match client.call(method, &body).await {
        Ok(response) => {
            let missing = missing_needles(&response, needles);
            if missing.is_empty() {
                (CheckOutcome::passed(format!("{method} ok")), Some(response))
            } else {
                let outcome = CheckOutcome::failed(format!(
                    "{method} response missing {}: {}",
                    missing.join(", "),
                    sanitize_detail(&response)
                ));
                (outcome, Some(response))
            }
        }
        Err(e) => (CheckOutcome::failed(e.to_string()), None),
    }
}

/// Health, metrics and reflection steps shared by both services.
fn service_basics<'a>(
    ctx: &'a SuiteContext,
    label: &str,
    base_url: String,
    client: &'a GrpcurlClient,
    grpc_service: &'static str,
) -> Vec<Step<'a>> {
    let url = |path: &str| format!("{base_url}{path}");
    let (live, ready, started, full, metrics) = (
        url("/q/health/live"),
        url("/q/health/ready"),
        url("/q/health/started"),
        url("/q/health"),
        url("/q/metrics"),
    );

    vec![
        Step::critical(format!("{label} liveness"), move || health_check(ctx, live)),
        Step::critical(format!("{label} readiness"), move || health_check(ctx, ready)),
        Step::non_critical(format!("{label} startup"), move || health_check(ctx, started)),
        Step::non_critical(format!("{label} full health"), move || health_check(ctx, full)),
        Step::non_critical(format!("{label} metrics"), move || metrics_check(ctx, metrics)),
        Step::non_critical(format!("{label} gRPC reflection"), move || {
            reflection_check(ctx, client, grpc_service)
        }),
    ]
}

fn registration_steps(ctx: &SuiteContext) -> Vec<Step<'_>> {
    let client = &ctx.registration_grpc;
    let mut steps = service_basics(
        ctx,
        "registration",
        ctx.endpoints.registration_base_url(),
        client,
        REGISTRATION_GRPC_SERVICE,
    );

    let name = ctx.probe_service_name();
    let registration = json!({
        "serviceName": name,
        "host": "stack-check.local",
        "port": 39999,
        "version": "1.0.0",
        "tags": ["stack-check"],
    });

    steps.push(Step::critical("RegisterService", move || async move {
        rpc_check(ctx, client, REGISTER_SERVICE, registration, &[SUCCESS_NEEDLE]).await.0
    }));
    {
        let name = name.clone();
        steps.push(Step::non_critical("GetService", move || async move {
            let body = json!({ "serviceName": name });
            rpc_check(ctx, client, GET_SERVICE, body, &[name.as_str()]).await.0
        }));
    }
    {
        let name = name.clone();
        steps.push(Step::critical("ListServices", move || async move {
            rpc_check(ctx, client, LIST_SERVICES, json!({}), &[name.as_str()]).await.0
        }));
    }
    steps.push(Step::non_critical("registration Consul catalog", move || {
        consul_catalog_check(ctx, REGISTRATION_SERVICE)
    }));
    steps.push(Step::non_critical("UnregisterService", move || async move {
        let body = json!({
            "serviceName": name,
            "host": "stack-check.local",
            "port": 39999,
        });
        rpc_check(ctx, client, UNREGISTER_SERVICE, body, &[SUCCESS_NEEDLE]).await.0
    }));

    steps
}

fn connector_admin_steps(ctx: &SuiteContext) -> Vec<Step<'_>> {
    let client = &ctx.connector_admin_grpc;
    let mut steps = service_basics(
        ctx,
        "connector-admin",
        ctx.endpoints.connector_admin_base_url(),
        client,
        CONNECTOR_ADMIN_GRPC_SERVICE,
    );

    let name = ctx.connector_name();

    {
        let name = name.clone();
        steps.push(Step::critical("RegisterConnector", move || async move {
            let body = json!({
                "connectorName": name,
                "connectorType": "filesystem",
                "accountId": TEST_ACCOUNT_ID,
                "description": "registered by stack-check",
            });
            let (outcome, response) = rpc_check(
                ctx,
                client,
                REGISTER_CONNECTOR,
                body,
                &[CAPTURED_CONNECTOR_ID, CAPTURED_API_KEY],
            )
            .await;

            if let Some(response) = response {
                for key in [CAPTURED_CONNECTOR_ID, CAPTURED_API_KEY] {
                    if let Some(value) = extract_string_field(&response, key) {
                        debug!(target: "harness.suites", field = key, "Captured response field");
                        ctx.capture(key, value).await;
                    }
                }
            }
            outcome
        }));
    }
    {
        let name = name.clone();
        steps.push(Step::non_critical("GetConnector", move || async move {
            let Some(connector_id) = ctx.captured(CAPTURED_CONNECTOR_ID).await else {
                return CheckOutcome::skipped("no connector registered");
            };
            let body = json!({ "connectorId": connector_id });
            rpc_check(ctx, client, GET_CONNECTOR, body, &[name.as_str()]).await.0
        }));
    }
    {
        let name = name.clone();
        steps.push(Step::critical("ListConnectors", move || async move {
            let body = json!({ "accountId": TEST_ACCOUNT_ID, "pageSize": 50 });
            rpc_check(ctx, client, LIST_CONNECTORS, body, &[name.as_str()]).await.0
        }));
    }
    steps.push(Step::non_critical("ValidateApiKey", move || async move {
        let (Some(connector_id), Some(api_key)) = (
            ctx.captured(CAPTURED_CONNECTOR_ID).await,
            ctx.captured(CAPTURED_API_KEY).await,
        ) else {
            return CheckOutcome::skipped("no connector credentials captured");
        };
        let body = json!({ "connectorId": connector_id, "apiKey": api_key });
        rpc_check(ctx, client, VALIDATE_API_KEY, body, &[r#""valid": true"#]).await.0
    }));
    steps.push(Step::non_critical("SetConnectorStatus", move || async move {
        let Some(connector_id) = ctx.captured(CAPTURED_CONNECTOR_ID).await else {
            return CheckOutcome::skipped("no connector registered");
        };
        let body = json!({
            "connectorId": connector_id,
            "active": false,
            "reason": "stack-check cleanup",
        });
        rpc_check(ctx, client, SET_CONNECTOR_STATUS, body, &[SUCCESS_NEEDLE]).await.0
    }));
    steps.push(Step::non_critical("connector-admin Consul catalog", move || {
        consul_catalog_check(ctx, CONNECTOR_ADMIN)
    }));

    steps
}
