//! Environment Readiness Harness
//!
//! This crate drives integration sessions against the local compose stack:
//! Consul, MySQL, Kafka, Apicurio Registry, OpenSearch, MinIO and Grafana, plus
//! the `platform-registration-service` and `connector-admin` applications.
//!
//! A session brings the stack up, gates on each dependency's health endpoint in
//! dependency order, runs a suite of checks (HTTP health, metrics, gRPC
//! reflection and calls, infrastructure integration), aggregates the results and
//! always tears the stack down again.
//!
//! # Layers
//!
//! - [`probe`]: single-shot endpoint probe (HTTP GET or TCP connect)
//! - [`gate`]: fixed-interval readiness gate built on a probe
//! - [`steps`]: soft-fail step runner and outcome aggregation
//! - [`session`]: session controller with guaranteed teardown
//! - [`compose`]: Docker Compose provisioner
//! - [`rpc`]: `grpcurl` wrapper for gRPC calls
//! - [`suites`]: the registration and connector-admin check catalogues
//!
//! # Prerequisites
//!
//! 1. `docker compose` in PATH
//! 2. `grpcurl` in PATH (optional; gRPC steps are skipped with a warning without it)

pub mod compose;
pub mod config;
pub mod gate;
pub mod metrics;
pub mod probe;
pub mod provision;
pub mod report;
pub mod rpc;
pub mod sanitize;
pub mod session;
pub mod steps;
pub mod suites;
pub mod topology;
