//! HTTPS server and webhook registration

use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::Client;
use tracing::{error, info};

use super::kinds::WorkloadKinds;
use super::{webhook_router, WebhookState, FREEZE_PATH, IMMUTABLE_PATH};
use crate::config::{WebhookConfig, WebhookRegistration};
use crate::crd::{API_GROUP, API_VERSION};
use crate::{Error, FIELD_MANAGER};

/// Name of the MutatingWebhookConfiguration for the freeze hook
pub const FREEZE_WEBHOOK_CONFIG: &str = "configpin-freeze";

/// Name of the ValidatingWebhookConfiguration for the immutability guard
pub const GUARD_WEBHOOK_CONFIG: &str = "configpin-snapshot-guard";

/// Label the API server sets on every Namespace to its own name
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

/// Serve both admission hooks over HTTPS until SIGINT/SIGTERM
pub async fn serve(config: &WebhookConfig, state: Arc<WebhookState>) -> Result<(), Error> {
    let cert = tokio::fs::read(&config.tls_cert_path).await.map_err(|e| {
        Error::config(format!(
            "failed to read TLS certificate {}: {e}",
            config.tls_cert_path.display()
        ))
    })?;
    let key = tokio::fs::read(&config.tls_key_path).await.map_err(|e| {
        Error::config(format!(
            "failed to read TLS key {}: {e}",
            config.tls_key_path.display()
        ))
    })?;
    let tls_config = RustlsConfig::from_pem(cert, key)
        .await
        .map_err(|e| Error::config(format!("TLS config error: {e}")))?;

    let handle = Handle::new();
    let grace = config.shutdown_grace;
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!(grace_secs = grace.as_secs(), "draining admission requests");
        shutdown.graceful_shutdown(Some(grace));
    });

    info!(addr = %config.addr, "Starting admission webhook server");
    axum_server::bind_rustls(config.addr, tls_config)
        .handle(handle)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(|e| Error::config(format!("webhook server error: {e}")))?;

    info!("admission webhook server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn client_config(reg: &WebhookRegistration, path: &str, ca_bundle: &[u8]) -> WebhookClientConfig {
    WebhookClientConfig {
        service: Some(ServiceReference {
            name: reg.service_name.clone(),
            namespace: reg.service_namespace.clone(),
            path: Some(path.to_string()),
            port: Some(reg.service_port),
        }),
        ca_bundle: Some(ByteString(ca_bundle.to_vec())),
        ..Default::default()
    }
}

/// Namespaces whose workloads bypass the freeze hook
///
/// The webhook's own namespace must stay admissible while the webhook is
/// down, otherwise its Deployment cannot roll out under `failurePolicy: Fail`.
pub fn exempt_namespaces(reg: &WebhookRegistration) -> Vec<String> {
    let mut namespaces = vec!["kube-system".to_string(), reg.service_namespace.clone()];
    namespaces.dedup();
    namespaces
}

/// MutatingWebhookConfiguration routing workload CREATEs to the freeze hook
pub fn freeze_webhook_config(
    reg: &WebhookRegistration,
    ca_bundle: &[u8],
    kinds: &WorkloadKinds,
) -> MutatingWebhookConfiguration {
    let rules = kinds
        .groups()
        .into_iter()
        .map(|group| {
            let mut versions: Vec<String> = kinds
                .iter()
                .filter(|k| k.group == group)
                .map(|k| k.version.to_string())
                .collect();
            versions.dedup();
            RuleWithOperations {
                operations: Some(vec!["CREATE".to_string()]),
                api_groups: Some(vec![group.to_string()]),
                api_versions: Some(versions),
                resources: Some(
                    kinds
                        .resources_in(group)
                        .into_iter()
                        .map(String::from)
                        .collect(),
                ),
                scope: Some("Namespaced".to_string()),
            }
        })
        .collect();

    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(FREEZE_WEBHOOK_CONFIG.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: format!("freeze.{API_GROUP}"),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            match_policy: Some("Equivalent".to_string()),
            rules: Some(rules),
            client_config: client_config(reg, FREEZE_PATH, ca_bundle),
            namespace_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: NAMESPACE_NAME_LABEL.to_string(),
                    operator: "NotIn".to_string(),
                    values: Some(exempt_namespaces(reg)),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }]),
    }
}

/// ValidatingWebhookConfiguration routing snapshot UPDATEs to the guard
pub fn guard_webhook_config(
    reg: &WebhookRegistration,
    ca_bundle: &[u8],
) -> ValidatingWebhookConfiguration {
    ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(GUARD_WEBHOOK_CONFIG.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![ValidatingWebhook {
            name: format!("snapshot-guard.{API_GROUP}"),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            match_policy: Some("Equivalent".to_string()),
            rules: Some(vec![RuleWithOperations {
                operations: Some(vec!["UPDATE".to_string()]),
                api_groups: Some(vec![API_GROUP.to_string()]),
                api_versions: Some(vec![API_VERSION.to_string()]),
                resources: Some(vec!["configsnapshots".to_string()]),
                scope: Some("Namespaced".to_string()),
            }]),
            client_config: client_config(reg, IMMUTABLE_PATH, ca_bundle),
            ..Default::default()
        }]),
    }
}

/// Server-side apply both webhook configurations
pub async fn ensure_webhook_configs(
    client: &Client,
    reg: &WebhookRegistration,
    kinds: &WorkloadKinds,
) -> Result<(), Error> {
    let ca_bundle = tokio::fs::read(&reg.ca_bundle_path).await.map_err(|e| {
        Error::config(format!(
            "failed to read CA bundle {}: {e}",
            reg.ca_bundle_path.display()
        ))
    })?;
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    mutating
        .patch(
            FREEZE_WEBHOOK_CONFIG,
            &params,
            &Patch::Apply(&freeze_webhook_config(reg, &ca_bundle, kinds)),
        )
        .await?;

    let validating: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    validating
        .patch(
            GUARD_WEBHOOK_CONFIG,
            &params,
            &Patch::Apply(&guard_webhook_config(reg, &ca_bundle)),
        )
        .await?;

    info!(
        service = %reg.service_name,
        namespace = %reg.service_namespace,
        "Webhook configurations installed"
    );
    Ok(())
}
