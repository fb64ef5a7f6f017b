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

use crate::nanoset::controller::statefulset::identity::CONTROLLER_REVISION_HASH_LABEL;
use crate::nanoset::controller::statefulset::pod_control::StatefulSetControlError;
use crate::nanoset::k8s::pod::{ObjectMeta, OwnerReference};
use crate::nanoset::k8s::revision::ControllerRevision;
use crate::nanoset::k8s::statefulset::{PodTemplateSpec, StatefulSet};
use serde_json::Value;
use sha1::{Digest, Sha1};

/// Length of the hash suffix in revision names.
const REVISION_HASH_LENGTH: usize = 10;

/// Durable store for [`ControllerRevision`] objects, provided by the
/// embedding process. All calls may block on remote I/O.
pub trait RevisionStore: Send + Sync {
    /// Lists the revisions owned by `set`. Order is not guaranteed; callers
    /// sort with [`sort_controller_revisions`].
    fn list_revisions(
        &self,
        set: &StatefulSet,
    ) -> Result<Vec<ControllerRevision>, StatefulSetControlError>;

    /// Persists `revision`. On a name collision with a different payload the
    /// implementation increments `collision_count`, derives the next
    /// candidate name with [`revision_name`], and retries until the name is
    /// unique. A collision with an equal payload returns the existing object.
    fn create_revision(
        &self,
        set: &StatefulSet,
        revision: &ControllerRevision,
        collision_count: &mut i32,
    ) -> Result<ControllerRevision, StatefulSetControlError>;

    /// Bumps the monotonic revision number of an existing revision, leaving
    /// the payload untouched. Used to express rollback ordering.
    fn update_revision(
        &self,
        revision: &ControllerRevision,
        revision_number: i64,
    ) -> Result<ControllerRevision, StatefulSetControlError>;

    fn delete_revision(
        &self,
        revision: &ControllerRevision,
    ) -> Result<(), StatefulSetControlError>;

    /// Takes ownership of an orphaned revision that matches the set's
    /// selector.
    fn adopt_revision(
        &self,
        set: &StatefulSet,
        revision: &ControllerRevision,
    ) -> Result<ControllerRevision, StatefulSetControlError>;
}

/// Sorts by revision number ascending, breaking ties by name so the order is
/// stable across restarts.
pub fn sort_controller_revisions(revisions: &mut [ControllerRevision]) {
    revisions.sort_by(|a, b| {
        a.revision
            .cmp(&b.revision)
            .then_with(|| a.name().cmp(b.name()))
    });
}

/// Structural equality of the captured template payloads, independent of
/// revision name and number.
pub fn equal_revision(a: &ControllerRevision, b: &ControllerRevision) -> bool {
    a.data == b.data
}

/// Indices of the revisions whose payload equals `needle`, in list order.
pub fn find_equal_revisions(revisions: &[ControllerRevision], needle: &ControllerRevision) -> Vec<usize> {
    revisions
        .iter()
        .enumerate()
        .filter(|(_, revision)| equal_revision(revision, needle))
        .map(|(index, _)| index)
        .collect()
}

/// Revision number for the next revision of a sorted history.
pub fn next_revision(revisions: &[ControllerRevision]) -> i64 {
    revisions
        .last()
        .map(|revision| revision.revision + 1)
        .unwrap_or(1)
}

/// Content-addressed name for a revision of `set` with the given payload.
/// The collision count is folded into the hash so retries after a name
/// collision land on a fresh name.
pub fn revision_name(
    set: &StatefulSet,
    data: &Value,
    collision_count: i32,
) -> Result<String, StatefulSetControlError> {
    let payload = serde_json::to_vec(data).map_err(StatefulSetControlError::Serialization)?;
    let mut hasher = Sha1::new();
    hasher.update(&payload);
    if collision_count > 0 {
        hasher.update(collision_count.to_be_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    Ok(format!("{}-{}", set.name(), &digest[..REVISION_HASH_LENGTH]))
}

/// Owner reference pointing an owned object back at `set`.
pub fn controller_owner_ref(set: &StatefulSet) -> OwnerReference {
    OwnerReference {
        api_version: set.api_version.clone(),
        kind: set.kind.clone(),
        name: set.name().to_string(),
        controller: Some(true),
    }
}

/// Captures the set's pod template as a new (unpersisted) revision carrying
/// `revision_number`. Equal templates hash to equal names across restarts
/// because the payload is canonical JSON with sorted keys.
pub fn new_revision(
    set: &StatefulSet,
    revision_number: i64,
    collision_count: i32,
) -> Result<ControllerRevision, StatefulSetControlError> {
    let data =
        serde_json::to_value(&set.spec.template).map_err(StatefulSetControlError::Serialization)?;
    let name = revision_name(set, &data, collision_count)?;

    let mut metadata = ObjectMeta {
        name: Some(name.clone()),
        namespace: set.metadata.namespace.clone(),
        ..Default::default()
    };
    metadata.labels = set.spec.template.metadata.labels.clone();
    let hash = name.rsplit('-').next().unwrap_or_default().to_string();
    metadata
        .labels
        .insert(CONTROLLER_REVISION_HASH_LABEL.to_string(), hash);
    metadata.owner_references.push(controller_owner_ref(set));

    Ok(ControllerRevision::new(metadata, data, revision_number))
}

/// Re-overlays the captured template onto the live set, so that unversioned
/// fields (replicas, strategy) come from `set` while the template comes from
/// the revision.
pub fn apply_revision(
    set: &StatefulSet,
    revision: &ControllerRevision,
) -> Result<StatefulSet, StatefulSetControlError> {
    let template: PodTemplateSpec = serde_json::from_value(revision.data.clone())
        .map_err(StatefulSetControlError::Serialization)?;
    let mut restored = set.clone();
    restored.spec.template = template;
    Ok(restored)
}
