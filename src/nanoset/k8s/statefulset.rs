/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use super::intstr::IntOrString;
use super::persistentvolumeclaim::PersistentVolumeClaim;
use super::pod::{ObjectMeta, PodSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Non-live revisions retained when the spec does not set a limit.
pub const DEFAULT_REVISION_HISTORY_LIMIT: i32 = 10;

/// Minimal label selector supporting exact-match labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LabelSelector {
    #[serde(
        rename = "matchLabels",
        default,
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub match_labels: HashMap<String, String>,
}

/// Template describing the pods managed by the stateful set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PodTemplateSpec {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

/// Ordering discipline applied to pod creation and deletion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum PodManagementPolicy {
    /// Pods are created in ordinal order, each waiting for its predecessor to
    /// become running and ready, and terminated in reverse order.
    #[default]
    OrderedReady,
    /// Pods are created and deleted eagerly without ordering guarantees.
    Parallel,
}

/// Supported update strategy types.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum StatefulSetUpdateStrategyType {
    #[default]
    RollingUpdate,
    OnDelete,
}

/// How an individual pod is brought to the update revision.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum PodUpdatePolicy {
    /// Delete the pod and let the controller recreate it at the new revision.
    #[default]
    Recreate,
    /// Patch container images in place when the revision delta allows it,
    /// otherwise fall back to recreation.
    InPlaceIfPossible,
    /// Patch container images in place; never recreate. Ineligible pods stay
    /// at their current revision and count as unavailable.
    InPlaceOnly,
}

/// Rolling update configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RollingUpdateStatefulSetStrategy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    #[serde(rename = "maxUnavailable", skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
    #[serde(rename = "podUpdatePolicy", default)]
    pub pod_update_policy: PodUpdatePolicy,
}

/// Stateful set update behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatefulSetUpdateStrategy {
    #[serde(rename = "type", default)]
    pub r#type: StatefulSetUpdateStrategyType,
    #[serde(rename = "rollingUpdate", skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdateStatefulSetStrategy>,
}

impl Default for StatefulSetUpdateStrategy {
    fn default() -> Self {
        Self {
            r#type: StatefulSetUpdateStrategyType::RollingUpdate,
            rolling_update: Some(RollingUpdateStatefulSetStrategy::default()),
        }
    }
}

impl StatefulSetUpdateStrategy {
    pub fn is_on_delete(&self) -> bool {
        matches!(self.r#type, StatefulSetUpdateStrategyType::OnDelete)
    }

    /// Smallest ordinal eligible for update; pods below it stay at the
    /// current revision.
    pub fn partition(&self) -> i32 {
        self.rolling_update
            .as_ref()
            .and_then(|config| config.partition)
            .unwrap_or(0)
            .max(0)
    }

    pub fn pod_update_policy(&self) -> PodUpdatePolicy {
        self.rolling_update
            .as_ref()
            .map(|config| config.pod_update_policy)
            .unwrap_or_default()
    }
}

/// Stateful set specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatefulSetSpec {
    pub replicas: i32,
    pub selector: LabelSelector,
    #[serde(rename = "serviceName")]
    pub service_name: String,
    pub template: PodTemplateSpec,
    #[serde(rename = "podManagementPolicy", default)]
    pub pod_management_policy: PodManagementPolicy,
    #[serde(rename = "updateStrategy", default)]
    pub update_strategy: StatefulSetUpdateStrategy,
    #[serde(
        rename = "revisionHistoryLimit",
        skip_serializing_if = "Option::is_none"
    )]
    pub revision_history_limit: Option<i32>,
    #[serde(
        rename = "volumeClaimTemplates",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,
}

impl StatefulSetSpec {
    /// Number of non-live revisions retained after truncation.
    pub fn history_limit(&self) -> i32 {
        self.revision_history_limit
            .unwrap_or(DEFAULT_REVISION_HISTORY_LIMIT)
            .max(0)
    }
}

/// Observed state written back by the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatefulSetStatus {
    #[serde(rename = "observedGeneration", default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub replicas: i32,
    #[serde(rename = "readyReplicas", default)]
    pub ready_replicas: i32,
    #[serde(rename = "currentReplicas", default)]
    pub current_replicas: i32,
    #[serde(rename = "updatedReplicas", default)]
    pub updated_replicas: i32,
    #[serde(
        rename = "currentRevision",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub current_revision: String,
    #[serde(
        rename = "updateRevision",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub update_revision: String,
    #[serde(rename = "collisionCount", skip_serializing_if = "Option::is_none")]
    pub collision_count: Option<i32>,
}

/// Stateful set object description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatefulSet {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: StatefulSetSpec,
    #[serde(default)]
    pub status: StatefulSetStatus,
}

impl StatefulSet {
    pub fn new(metadata: ObjectMeta, spec: StatefulSetSpec) -> Self {
        Self {
            api_version: "apps.nanoset.io/v1".to_string(),
            kind: "StatefulSet".to_string(),
            metadata,
            spec,
            status: StatefulSetStatus::default(),
        }
    }

    /// Object name, or the empty string when unset.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    /// Whether pods may be created and deleted without ordering guarantees.
    pub fn allows_burst(&self) -> bool {
        matches!(self.spec.pod_management_policy, PodManagementPolicy::Parallel)
    }
}
