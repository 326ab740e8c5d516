//! Workload kinds the freeze webhook understands
//!
//! A fixed table from (API group, kind) to the JSON pointer of the embedded
//! pod template. The same table drives both request dispatch and the rules
//! of the registered MutatingWebhookConfiguration.

use kube::core::GroupVersionKind;

/// One workload kind that embeds a pod template
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadKind {
    /// API group (`apps`, `batch`)
    pub group: &'static str,
    /// API version used in webhook rules
    pub version: &'static str,
    /// Kind as it appears in admission requests
    pub kind: &'static str,
    /// Plural resource name used in webhook rules
    pub resource: &'static str,
    /// Path tokens from the object root to the pod template
    pub template_path: &'static [&'static str],
}

const POD_TEMPLATE: &[&str] = &["spec", "template"];
const CRONJOB_POD_TEMPLATE: &[&str] = &["spec", "jobTemplate", "spec", "template"];

const BUILTIN: &[WorkloadKind] = &[
    WorkloadKind {
        group: "apps",
        version: "v1",
        kind: "Deployment",
        resource: "deployments",
        template_path: POD_TEMPLATE,
    },
    WorkloadKind {
        group: "apps",
        version: "v1",
        kind: "ReplicaSet",
        resource: "replicasets",
        template_path: POD_TEMPLATE,
    },
    WorkloadKind {
        group: "apps",
        version: "v1",
        kind: "StatefulSet",
        resource: "statefulsets",
        template_path: POD_TEMPLATE,
    },
    WorkloadKind {
        group: "apps",
        version: "v1",
        kind: "DaemonSet",
        resource: "daemonsets",
        template_path: POD_TEMPLATE,
    },
    WorkloadKind {
        group: "batch",
        version: "v1",
        kind: "Job",
        resource: "jobs",
        template_path: POD_TEMPLATE,
    },
    WorkloadKind {
        group: "batch",
        version: "v1",
        kind: "CronJob",
        resource: "cronjobs",
        template_path: CRONJOB_POD_TEMPLATE,
    },
];

/// The set of workload kinds handed to the freeze webhook at startup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadKinds {
    kinds: Vec<WorkloadKind>,
}

impl Default for WorkloadKinds {
    fn default() -> Self {
        Self::builtin()
    }
}

impl WorkloadKinds {
    /// Deployment, ReplicaSet, StatefulSet, DaemonSet, Job and CronJob
    pub fn builtin() -> Self {
        Self::new(BUILTIN.to_vec())
    }

    /// An explicit table
    pub fn new(kinds: Vec<WorkloadKind>) -> Self {
        Self { kinds }
    }

    /// Look up a kind by group and kind name; the version is not compared
    pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<&WorkloadKind> {
        self.kinds
            .iter()
            .find(|k| k.group == gvk.group && k.kind == gvk.kind)
    }

    /// Iterate over all kinds
    pub fn iter(&self) -> impl Iterator<Item = &WorkloadKind> {
        self.kinds.iter()
    }

    /// Distinct API groups, in table order
    pub fn groups(&self) -> Vec<&'static str> {
        let mut groups: Vec<&'static str> = Vec::new();
        for kind in &self.kinds {
            if !groups.contains(&kind.group) {
                groups.push(kind.group);
            }
        }
        groups
    }

    /// Plural resource names belonging to `group`
    pub fn resources_in(&self, group: &str) -> Vec<&'static str> {
        self.kinds
            .iter()
            .filter(|k| k.group == group)
            .map(|k| k.resource)
            .collect()
    }
}
