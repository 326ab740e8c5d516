//! Runtime configuration for the controller and webhook processes
//!
//! `main` parses command-line flags (and their environment fallbacks) with
//! clap and converts them into these plain structs, which is all the library
//! code ever sees.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryConfig;
use crate::{Error, DEFAULT_WEBHOOK_PORT};

/// Default number of concurrent reconciliations per controller
pub const DEFAULT_CONCURRENCY: u16 = 2;

/// Longest requeue delay the controllers accept
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for `configpin controller`
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Maximum concurrent reconciliations per controller (distinct keys only)
    pub concurrency: u16,
    /// Requeue backoff for retryable reconcile failures
    pub retry: RetryConfig,
    /// Server-side apply the CRDs on startup
    pub install_crds: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryConfig::default(),
            install_crds: true,
        }
    }
}

impl ControllerConfig {
    /// Reject settings the controllers cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }
        if self.retry.initial_delay.is_zero() {
            return Err(Error::config("initial retry delay must be positive"));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(Error::config(
                "max retry delay must not be shorter than the initial delay",
            ));
        }
        if self.retry.max_delay > MAX_RETRY_DELAY {
            return Err(Error::config(format!(
                "max retry delay must not exceed {}s",
                MAX_RETRY_DELAY.as_secs()
            )));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config("backoff multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

/// Where the API server reaches the webhook, used for self-registration
#[derive(Clone, Debug, PartialEq)]
pub struct WebhookRegistration {
    /// PEM CA bundle that signed the serving certificate
    pub ca_bundle_path: PathBuf,
    /// Name of the Service fronting the webhook pods
    pub service_name: String,
    /// Namespace of that Service
    pub service_namespace: String,
    /// Service port
    pub service_port: i32,
}

/// Configuration for `configpin webhook`
#[derive(Clone, Debug, PartialEq)]
pub struct WebhookConfig {
    /// Address the HTTPS server binds to
    pub addr: SocketAddr,
    /// PEM serving certificate
    pub tls_cert_path: PathBuf,
    /// PEM private key for the serving certificate
    pub tls_key_path: PathBuf,
    /// Install webhook configurations pointing at this server when set
    pub registration: Option<WebhookRegistration>,
    /// How long in-flight admission requests may take to drain on shutdown
    pub shutdown_grace: Duration,
}

impl WebhookConfig {
    /// Configuration with default bind address and grace period
    pub fn new(tls_cert_path: impl Into<PathBuf>, tls_key_path: impl Into<PathBuf>) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_WEBHOOK_PORT)),
            tls_cert_path: tls_cert_path.into(),
            tls_key_path: tls_key_path.into(),
            registration: None,
            shutdown_grace: Duration::from_secs(10),
        }
    }

    /// Reject settings the webhook server cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.tls_cert_path.as_os_str().is_empty() || self.tls_key_path.as_os_str().is_empty() {
            return Err(Error::config(
                "webhook requires both a TLS certificate and key path",
            ));
        }
        if let Some(reg) = &self.registration {
            if reg.service_name.is_empty() || reg.service_namespace.is_empty() {
                return Err(Error::config(
                    "webhook registration requires a service name and namespace",
                ));
            }
            if !(1..=65535).contains(&reg.service_port) {
                return Err(Error::config(format!(
                    "invalid webhook service port {}",
                    reg.service_port
                )));
            }
        }
        Ok(())
    }
}
