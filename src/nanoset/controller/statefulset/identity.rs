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

use crate::nanoset::controller::statefulset::inplace;
use crate::nanoset::k8s::pod::{
    PersistentVolumeClaimVolumeSource, Pod, PodCondition, PodPhase, VolumeSpec,
};
use crate::nanoset::k8s::statefulset::{
    StatefulSet, StatefulSetUpdateStrategyType,
};
use std::collections::HashSet;

/// Label carrying the name of the revision a pod was rendered from.
pub const CONTROLLER_REVISION_HASH_LABEL: &str = "controller.revision-hash";
/// Identity label mirroring the pod's own name.
pub const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";

/// Condition type marking a pod as ready.
pub const POD_CONDITION_READY: &str = "Ready";
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

/// Splits `"<parent>-<ordinal>"` into its components. Returns `None` when the
/// trailing segment is not a non-negative integer.
pub fn parse_pod_name(name: &str) -> Option<(&str, i32)> {
    let split = name.rfind('-')?;
    let ordinal: i32 = name[split + 1..].parse().ok()?;
    Some((&name[..split], ordinal))
}

/// Ordinal encoded in the pod name, or -1 when the name does not carry one.
pub fn get_ordinal(pod: &Pod) -> i32 {
    parse_pod_name(pod.name())
        .map(|(_, ordinal)| ordinal)
        .unwrap_or(-1)
}

/// Canonical name of the pod at `ordinal` in `set`.
pub fn pod_name(set: &StatefulSet, ordinal: i32) -> String {
    format!("{}-{}", set.name(), ordinal)
}

/// Whether the pod's name claims membership in `set`.
pub fn is_member_of(set: &StatefulSet, pod: &Pod) -> bool {
    parse_pod_name(pod.name())
        .map(|(parent, _)| parent == set.name())
        .unwrap_or(false)
}

/// Revision label on the pod, or the empty string when absent.
pub fn get_pod_revision(pod: &Pod) -> String {
    pod.metadata
        .labels
        .get(CONTROLLER_REVISION_HASH_LABEL)
        .cloned()
        .unwrap_or_default()
}

pub fn set_pod_revision(pod: &mut Pod, revision: &str) {
    pod.metadata
        .labels
        .insert(CONTROLLER_REVISION_HASH_LABEL.to_string(), revision.to_string());
}

/// Whether the pod carries the identity `set` assigns to its ordinal: name,
/// namespace, pod-name label, and the headless-service hostname.
pub fn identity_matches(set: &StatefulSet, pod: &Pod) -> bool {
    let Some((parent, ordinal)) = parse_pod_name(pod.name()) else {
        return false;
    };
    parent == set.name()
        && ordinal >= 0
        && pod.metadata.namespace == set.metadata.namespace
        && pod.metadata.labels.get(POD_NAME_LABEL).map(String::as_str) == Some(pod.name())
        && pod.spec.hostname.as_deref() == Some(pod.name())
        && pod.spec.subdomain.as_deref() == Some(set.spec.service_name.as_str())
}

/// Re-establishes the identity fields checked by [`identity_matches`]. The
/// pod name must already encode the ordinal.
pub fn update_identity(set: &StatefulSet, pod: &mut Pod) {
    let ordinal = get_ordinal(pod);
    if ordinal < 0 {
        return;
    }
    let name = pod_name(set, ordinal);
    pod.metadata.name = Some(name.clone());
    pod.metadata.namespace = set.metadata.namespace.clone();
    pod.metadata
        .labels
        .insert(POD_NAME_LABEL.to_string(), name.clone());
    pod.spec.hostname = Some(name);
    pod.spec.subdomain = Some(set.spec.service_name.clone());
}

/// Name of the claim bound to `ordinal` for a given claim template.
pub fn claim_name(set: &StatefulSet, template_name: &str, ordinal: i32) -> String {
    format!("{}-{}-{}", template_name, set.name(), ordinal)
}

/// Whether the pod mounts exactly the claims templated by `set` for its
/// ordinal. Volumes not named by a claim template are not inspected.
pub fn storage_matches(set: &StatefulSet, pod: &Pod) -> bool {
    let ordinal = get_ordinal(pod);
    if ordinal < 0 {
        return false;
    }
    for template in &set.spec.volume_claim_templates {
        let template_name = template.template_name();
        let expected = claim_name(set, template_name, ordinal);
        let claimed = pod
            .spec
            .volumes
            .iter()
            .find(|volume| volume.name == template_name)
            .and_then(|volume| volume.persistent_volume_claim.as_ref());
        match claimed {
            Some(source) if source.claim_name == expected => {}
            _ => return false,
        }
    }
    true
}

/// Rewrites the pod's claim volumes to reference the claims templated for its
/// ordinal, preserving unrelated volumes.
pub fn update_storage(set: &StatefulSet, pod: &mut Pod) {
    let ordinal = get_ordinal(pod);
    if ordinal < 0 {
        return;
    }
    let template_names: HashSet<&str> = set
        .spec
        .volume_claim_templates
        .iter()
        .map(|template| template.template_name())
        .collect();

    let mut volumes: Vec<VolumeSpec> = set
        .spec
        .volume_claim_templates
        .iter()
        .map(|template| VolumeSpec {
            name: template.template_name().to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name(set, template.template_name(), ordinal),
                read_only: Some(false),
            }),
            ..Default::default()
        })
        .collect();
    volumes.extend(
        pod.spec
            .volumes
            .drain(..)
            .filter(|volume| !template_names.contains(volume.name.as_str())),
    );
    pod.spec.volumes = volumes;
}

/// Renders the pod at `ordinal` from the set's template, wiring identity and
/// storage but leaving the revision label for the caller.
pub fn new_stateful_set_pod(set: &StatefulSet, ordinal: i32) -> Pod {
    let template = &set.spec.template;
    let mut metadata = template.metadata.clone();
    metadata.name = Some(pod_name(set, ordinal));
    metadata.namespace = set.metadata.namespace.clone();
    metadata.resource_version = None;
    let mut pod = Pod::new(metadata, template.spec.clone());
    update_identity(set, &mut pod);
    update_storage(set, &mut pod);
    pod
}

/// Renders the pod at `ordinal` from either the current or the update
/// revision of the set, as dictated by the rolling-update partition.
pub fn new_versioned_pod(
    current_set: &StatefulSet,
    update_set: &StatefulSet,
    current_revision: &str,
    update_revision: &str,
    ordinal: i32,
) -> Pod {
    let use_current = matches!(
        current_set.spec.update_strategy.r#type,
        StatefulSetUpdateStrategyType::RollingUpdate
    ) && match &current_set.spec.update_strategy.rolling_update {
        Some(rolling) => ordinal < rolling.partition.unwrap_or(0),
        None => ordinal < current_set.status.current_replicas,
    };

    if use_current {
        let mut pod = new_stateful_set_pod(current_set, ordinal);
        set_pod_revision(&mut pod, current_revision);
        pod
    } else {
        let mut pod = new_stateful_set_pod(update_set, ordinal);
        set_pod_revision(&mut pod, update_revision);
        pod
    }
}

/// Whether the pod exists in the store.
pub fn is_created(pod: &Pod) -> bool {
    pod.metadata
        .resource_version
        .as_deref()
        .map(|version| !version.is_empty())
        .unwrap_or(false)
}

/// Whether the pod has been marked for graceful deletion.
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

pub fn is_failed(pod: &Pod) -> bool {
    pod.phase() == PodPhase::Failed
}

pub fn get_pod_condition<'a>(pod: &'a Pod, condition_type: &str) -> Option<&'a PodCondition> {
    pod.status.as_ref().and_then(|status| {
        status
            .conditions
            .iter()
            .find(|condition| condition.condition_type == condition_type)
    })
}

pub fn is_pod_ready(pod: &Pod) -> bool {
    get_pod_condition(pod, POD_CONDITION_READY)
        .map(|condition| condition.status == CONDITION_TRUE)
        .unwrap_or(false)
}

pub fn is_running_and_ready(pod: &Pod) -> bool {
    pod.phase() == PodPhase::Running && is_pod_ready(pod)
}

/// Whether the pod can serve traffic: created, not terminating, running and
/// ready, and in-place ready when the readiness gate is declared.
pub fn is_healthy(pod: &Pod) -> bool {
    is_created(pod)
        && !is_terminating(pod)
        && is_running_and_ready(pod)
        && inplace::is_in_place_ready(pod)
}
