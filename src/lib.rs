//! configpin - pin Kubernetes workloads to immutable configuration snapshots
//!
//! Users edit [`crd::EditableConfig`] objects in place. Every generation of an
//! EditableConfig is captured as an immutable [`crd::ConfigSnapshot`], which is
//! in turn materialized as a ConfigMap of the same name. Workloads created
//! while a generation is current are rewritten at admission time to reference
//! that generation's ConfigMap, so later edits never change what a running
//! workload sees.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (EditableConfig, ConfigSnapshot)
//! - [`naming`] - The snapshot naming rule shared by controllers and webhooks
//! - [`resources`] - Desired-state builders for snapshots and ConfigMaps
//! - [`controller`] - EditableConfig and ConfigSnapshot reconcilers
//! - [`webhook`] - Freeze (mutating) and immutability (validating) admission hooks
//! - [`config`] - Runtime configuration for the controller and webhook processes
//! - [`retry`] - Backoff helpers
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod naming;
pub mod resources;
pub mod retry;
pub mod webhook;

pub use error::Error;

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "configpin";

/// Standard label identifying objects created by configpin
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on configpin objects
pub const MANAGED_BY_VALUE: &str = "configpin";

/// Label selector matching every object configpin creates
pub const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=configpin";

/// Label recording the EditableConfig a snapshot was copied from
pub const EDITABLE_CONFIG_LABEL: &str = "configpin.dev/editable-config";

/// Label recording the EditableConfig generation a snapshot captures
pub const GENERATION_LABEL: &str = "configpin.dev/generation";

/// Label recording the snapshot an artifact ConfigMap materializes
pub const SNAPSHOT_LABEL: &str = "configpin.dev/snapshot";

/// Default HTTPS port for the admission webhook server
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;
