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

use crate::nanoset::controller::statefulset::identity::{
    get_pod_condition, get_pod_revision, set_pod_revision, CONDITION_TRUE,
};
use crate::nanoset::k8s::pod::Pod;
use crate::nanoset::k8s::revision::ControllerRevision;
use crate::nanoset::k8s::statefulset::{PodUpdatePolicy, StatefulSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Synthetic readiness condition gating traffic during in-place updates.
/// Users declare it in `template.spec.readinessGates` to opt in.
pub const IN_PLACE_UPDATE_READY: &str = "InPlaceUpdateReady";

/// Annotation recording the imageID of each patched container at the moment
/// the patch was issued, so a later pass can tell a still-pulling pod from a
/// completed one.
pub const IN_PLACE_UPDATE_STATE_ANNOTATION: &str = "nanoset.io/inplace-update-state";

/// Condition reason used when flipping the gate to `False` at patch time.
pub const START_IN_PLACE_UPDATE_REASON: &str = "StartInPlaceUpdate";

/// One container image swap within an in-place update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerImageUpdate {
    pub name: String,
    pub image: String,
}

/// The patch handed to the Pod Controller: the target revision name plus the
/// image swaps that realize it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InPlaceUpdateSpec {
    pub revision: String,
    pub containers: Vec<ContainerImageUpdate>,
}

/// State annotation payload persisted on the pod while an in-place update is
/// reconciling.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InPlaceUpdateState {
    pub revision: String,
    #[serde(default)]
    pub last_container_image_ids: HashMap<String, String>,
}

fn in_place_policy(set: &StatefulSet) -> PodUpdatePolicy {
    set.spec.update_strategy.pod_update_policy()
}

pub fn is_in_place_only(set: &StatefulSet) -> bool {
    in_place_policy(set) == PodUpdatePolicy::InPlaceOnly
}

/// Decides whether the pod at `pod_revision_name` can be moved to
/// `update_revision` in place. Returns the image patch when the delta between
/// the two captured templates is limited to container images; any other
/// structural difference forces delete-recreate.
pub fn should_do_in_place_update(
    set: &StatefulSet,
    update_revision: &ControllerRevision,
    pod_revision_name: &str,
    revisions: &[ControllerRevision],
) -> Option<InPlaceUpdateSpec> {
    if !matches!(
        in_place_policy(set),
        PodUpdatePolicy::InPlaceIfPossible | PodUpdatePolicy::InPlaceOnly
    ) {
        return None;
    }
    let old = revisions
        .iter()
        .find(|revision| revision.name() == pod_revision_name)?;
    let containers = image_only_delta(&old.data, &update_revision.data)?;
    Some(InPlaceUpdateSpec {
        revision: update_revision.name().to_string(),
        containers,
    })
}

/// Returns the image swaps between two captured templates if and only if the
/// templates are otherwise structurally identical.
fn image_only_delta(old: &Value, new: &Value) -> Option<Vec<ContainerImageUpdate>> {
    let old_images = container_images(old)?;
    let new_images = container_images(new)?;
    if old_images.len() != new_images.len() {
        return None;
    }

    let mut updates = Vec::new();
    for ((old_name, old_image), (new_name, new_image)) in
        old_images.iter().zip(new_images.iter())
    {
        if old_name != new_name {
            return None;
        }
        if old_image != new_image {
            updates.push(ContainerImageUpdate {
                name: new_name.clone(),
                image: new_image.clone()?,
            });
        }
    }
    if updates.is_empty() {
        return None;
    }

    let mut old_stripped = old.clone();
    let mut new_stripped = new.clone();
    strip_container_images(&mut old_stripped)?;
    strip_container_images(&mut new_stripped)?;
    if old_stripped != new_stripped {
        return None;
    }
    Some(updates)
}

fn container_images(template: &Value) -> Option<Vec<(String, Option<String>)>> {
    let containers = template.pointer("/spec/containers")?.as_array()?;
    let mut images = Vec::with_capacity(containers.len());
    for container in containers {
        let name = container.get("name")?.as_str()?.to_string();
        let image = container
            .get("image")
            .and_then(Value::as_str)
            .map(str::to_string);
        images.push((name, image));
    }
    Some(images)
}

fn strip_container_images(template: &mut Value) -> Option<()> {
    let containers = template.pointer_mut("/spec/containers")?.as_array_mut()?;
    for container in containers {
        container.as_object_mut()?.remove("image");
    }
    Some(())
}

/// Whether the pod declares `condition_type` as a readiness gate.
pub fn has_readiness_gate(pod: &Pod, condition_type: &str) -> bool {
    pod.spec
        .readiness_gates
        .iter()
        .any(|gate| gate.condition_type == condition_type)
}

/// In-place readiness as it factors into pod health: pods without the gate
/// are always in-place ready.
pub fn is_in_place_ready(pod: &Pod) -> bool {
    if !has_readiness_gate(pod, IN_PLACE_UPDATE_READY) {
        return true;
    }
    get_pod_condition(pod, IN_PLACE_UPDATE_READY)
        .map(|condition| condition.status == CONDITION_TRUE)
        .unwrap_or(false)
}

/// Checks whether the last in-place update has been realized by the node
/// agent. Returns a reason while any patched container still runs the
/// imageID recorded at patch time, `None` once complete or when no in-place
/// update is pending.
pub fn check_in_place_update_completed(pod: &Pod) -> Option<String> {
    let raw = pod
        .metadata
        .annotations
        .get(IN_PLACE_UPDATE_STATE_ANNOTATION)?;
    let state: InPlaceUpdateState = match serde_json::from_str(raw) {
        Ok(state) => state,
        Err(err) => return Some(format!("malformed in-place update state: {}", err)),
    };
    // A stale record from a revision the pod no longer carries is not pending.
    if state.revision != get_pod_revision(pod) {
        return None;
    }

    let statuses: HashMap<&str, &str> = pod
        .status
        .as_ref()
        .map(|status| {
            status
                .container_statuses
                .iter()
                .map(|cs| (cs.name.as_str(), cs.image_id.as_deref().unwrap_or("")))
                .collect()
        })
        .unwrap_or_default();

    for (name, recorded_image_id) in &state.last_container_image_ids {
        match statuses.get(name.as_str()) {
            None => {
                return Some(format!("container {} has not reported status", name));
            }
            Some(current) if current.is_empty() || *current == recorded_image_id.as_str() => {
                return Some(format!(
                    "container {} is still running imageID {}",
                    name, recorded_image_id
                ));
            }
            Some(_) => {}
        }
    }
    None
}

/// Whether the engine should flip the readiness gate back to `True`: the gate
/// is declared, not yet true, and no in-place update is pending.
pub fn should_update_in_place_ready(pod: &Pod) -> bool {
    has_readiness_gate(pod, IN_PLACE_UPDATE_READY)
        && get_pod_condition(pod, IN_PLACE_UPDATE_READY)
            .map(|condition| condition.status != CONDITION_TRUE)
            .unwrap_or(true)
        && check_in_place_update_completed(pod).is_none()
}

/// Applies an in-place update to a pod object: records the pre-patch imageID
/// of every patched container in the state annotation, swaps the images, and
/// relabels the pod at the target revision. Pod Controller implementations
/// persist the result as one write.
pub fn apply_in_place_update(
    pod: &mut Pod,
    update: &InPlaceUpdateSpec,
) -> Result<(), serde_json::Error> {
    let mut state = InPlaceUpdateState {
        revision: update.revision.clone(),
        last_container_image_ids: HashMap::new(),
    };
    for swap in &update.containers {
        let recorded = pod
            .status
            .as_ref()
            .and_then(|status| {
                status
                    .container_statuses
                    .iter()
                    .find(|cs| cs.name == swap.name)
            })
            .and_then(|cs| cs.image_id.clone())
            .unwrap_or_default();
        state
            .last_container_image_ids
            .insert(swap.name.clone(), recorded);
    }

    for swap in &update.containers {
        if let Some(container) = pod
            .spec
            .containers
            .iter_mut()
            .find(|container| container.name == swap.name)
        {
            container.image = Some(swap.image.clone());
        }
    }

    pod.metadata.annotations.insert(
        IN_PLACE_UPDATE_STATE_ANNOTATION.to_string(),
        serde_json::to_string(&state)?,
    );
    set_pod_revision(pod, &update.revision);
    Ok(())
}
