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

use crate::nanoset::controller::statefulset::inplace::InPlaceUpdateSpec;
use crate::nanoset::k8s::pod::{Pod, PodCondition};
use crate::nanoset::k8s::statefulset::{StatefulSet, StatefulSetStatus};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors surfaced by the stateful set control loop and its collaborators.
#[derive(Debug)]
pub enum StatefulSetControlError {
    /// Transient store failure (network, conflict, throttling). The external
    /// driver retries the reconcile.
    Store(Box<dyn Error + Send + Sync>),
    /// The named object no longer exists. Absorbed on delete paths.
    NotFound(String),
    Serialization(serde_json::Error),
    /// The set specification cannot be acted on (for example a malformed
    /// maxUnavailable percentage).
    InvalidSpec(String),
}

impl StatefulSetControlError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StatefulSetControlError::NotFound(_))
    }
}

impl Display for StatefulSetControlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StatefulSetControlError::Store(err) => {
                write!(f, "StatefulSet store error: {}", err)
            }
            StatefulSetControlError::NotFound(name) => {
                write!(f, "StatefulSet object not found: {}", name)
            }
            StatefulSetControlError::Serialization(err) => {
                write!(f, "StatefulSet serialization error: {}", err)
            }
            StatefulSetControlError::InvalidSpec(message) => {
                write!(f, "StatefulSet spec error: {}", message)
            }
        }
    }
}

impl Error for StatefulSetControlError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StatefulSetControlError::Store(err) => Some(err.as_ref()),
            StatefulSetControlError::Serialization(err) => Some(err),
            StatefulSetControlError::NotFound(_) => None,
            StatefulSetControlError::InvalidSpec(_) => None,
        }
    }
}

/// Primitives for manipulating the pods owned by a stateful set. Implemented
/// over the cluster API; every call may block on remote I/O and fail.
pub trait StatefulPodControl: Send + Sync {
    /// Persists a rendered pod. The pod carries identity, storage, and
    /// revision label when handed over.
    fn create_stateful_pod(
        &self,
        set: &StatefulSet,
        pod: &Pod,
    ) -> Result<(), StatefulSetControlError>;

    /// Writes back a pod whose identity or storage was repaired in memory.
    fn update_stateful_pod(
        &self,
        set: &StatefulSet,
        pod: &Pod,
    ) -> Result<(), StatefulSetControlError>;

    /// Applies an in-place image patch. Implementations must apply the
    /// container images, the in-place state annotation, and the revision
    /// label atomically; [`super::inplace::apply_in_place_update`] performs
    /// exactly that mutation on a pod object.
    fn in_place_update_stateful_pod(
        &self,
        set: &StatefulSet,
        pod: &Pod,
        update: &InPlaceUpdateSpec,
    ) -> Result<(), StatefulSetControlError>;

    /// Upserts a single condition on the pod's status.
    fn update_stateful_pod_condition(
        &self,
        set: &StatefulSet,
        pod: &Pod,
        condition: PodCondition,
    ) -> Result<(), StatefulSetControlError>;

    fn delete_stateful_pod(
        &self,
        set: &StatefulSet,
        pod: &Pod,
    ) -> Result<(), StatefulSetControlError>;
}

/// Writes the observed status back onto the set object.
pub trait StatefulSetStatusUpdater: Send + Sync {
    fn update_stateful_set_status(
        &self,
        set: &StatefulSet,
        status: &StatefulSetStatus,
    ) -> Result<(), StatefulSetControlError>;
}
