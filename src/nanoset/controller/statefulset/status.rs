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

use crate::nanoset::k8s::statefulset::{StatefulSet, StatefulSetStatus};

/// Folds a finished rolling update: once every observed replica is updated
/// and ready, the update revision becomes the current revision and the counts
/// mirror.
pub fn complete_rolling_update(set: &StatefulSet, status: &mut StatefulSetStatus) {
    if !set.spec.update_strategy.is_on_delete()
        && status.updated_replicas == status.replicas
        && status.ready_replicas == status.replicas
    {
        status.current_replicas = status.updated_replicas;
        status.current_revision = status.update_revision.clone();
    }
}

/// Whether `status` differs from the status already recorded on `set` in any
/// field the controller owns. Equal statuses skip the write entirely.
pub fn inconsistent_status(set: &StatefulSet, status: &StatefulSetStatus) -> bool {
    status.observed_generation > set.status.observed_generation
        || status.replicas != set.status.replicas
        || status.ready_replicas != set.status.ready_replicas
        || status.current_replicas != set.status.current_replicas
        || status.updated_replicas != set.status.updated_replicas
        || status.current_revision != set.status.current_revision
        || status.update_revision != set.status.update_revision
        || status.collision_count != set.status.collision_count
}
