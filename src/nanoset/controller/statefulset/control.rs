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

use crate::nanoset::controller::statefulset::history::{
    apply_revision, find_equal_revisions, new_revision, next_revision, sort_controller_revisions,
    RevisionStore,
};
use crate::nanoset::controller::statefulset::identity::{
    get_ordinal, get_pod_revision, identity_matches, is_created, is_failed, is_healthy,
    is_running_and_ready, is_terminating, new_versioned_pod, storage_matches, update_identity,
    update_storage, CONDITION_FALSE, CONDITION_TRUE,
};
use crate::nanoset::controller::statefulset::inplace::{
    check_in_place_update_completed, is_in_place_only, should_do_in_place_update,
    should_update_in_place_ready, InPlaceUpdateSpec, IN_PLACE_UPDATE_READY,
    START_IN_PLACE_UPDATE_REASON,
};
use crate::nanoset::controller::statefulset::pod_control::{
    StatefulPodControl, StatefulSetControlError, StatefulSetStatusUpdater,
};
use crate::nanoset::controller::statefulset::status::{
    complete_rolling_update, inconsistent_status,
};
use crate::nanoset::k8s::intstr::IntOrString;
use crate::nanoset::k8s::pod::{Pod, PodCondition};
use crate::nanoset::k8s::revision::ControllerRevision;
use crate::nanoset::k8s::statefulset::{StatefulSet, StatefulSetStatus};
use crate::nanoset::logger::{log_debug, log_info, log_warn};
use crate::nanoset::observability::metrics::{self, ControllerReconcileResult};
use std::collections::HashSet;
use std::sync::Arc;

const COMPONENT: &str = "statefulset-control";

/// Control logic for converging a stateful set and its pods toward the
/// declared specification. Implemented as a trait so drivers and tests can
/// substitute alternative semantics.
pub trait StatefulSetControl: Send + Sync {
    /// Runs one reconciliation pass against a point-in-time pod snapshot.
    /// A non-nil error means the pass should be retried by the driver with a
    /// rate-limited requeue; waiting is expressed by returning early without
    /// error.
    fn reconcile(&self, set: &StatefulSet, pods: &[Pod]) -> Result<(), StatefulSetControlError>;

    /// Returns the revisions of `set`, sorted by revision number ascending.
    fn list_revisions(
        &self,
        set: &StatefulSet,
    ) -> Result<Vec<ControllerRevision>, StatefulSetControlError>;

    /// Adopts any orphaned revisions that match the set's selector.
    fn adopt_orphan_revisions(
        &self,
        set: &StatefulSet,
        revisions: &[ControllerRevision],
    ) -> Result<(), StatefulSetControlError>;
}

/// Default implementation of [`StatefulSetControl`] driven by the three
/// collaborator interfaces. The external driver guarantees at most one
/// reconcile in flight per set; the engine keeps no state across calls.
pub struct DefaultStatefulSetControl {
    pod_control: Arc<dyn StatefulPodControl>,
    status_updater: Arc<dyn StatefulSetStatusUpdater>,
    history: Arc<dyn RevisionStore>,
}

impl DefaultStatefulSetControl {
    pub fn new(
        pod_control: Arc<dyn StatefulPodControl>,
        status_updater: Arc<dyn StatefulSetStatusUpdater>,
        history: Arc<dyn RevisionStore>,
    ) -> Self {
        Self {
            pod_control,
            status_updater,
            history,
        }
    }
}

impl StatefulSetControl for DefaultStatefulSetControl {
    fn reconcile(&self, set: &StatefulSet, pods: &[Pod]) -> Result<(), StatefulSetControlError> {
        let result = self.run_reconcile(set, pods);
        metrics::record_controller_reconcile(
            "statefulset",
            if result.is_ok() {
                ControllerReconcileResult::Success
            } else {
                ControllerReconcileResult::Error
            },
        );
        result
    }

    fn list_revisions(
        &self,
        set: &StatefulSet,
    ) -> Result<Vec<ControllerRevision>, StatefulSetControlError> {
        let mut revisions = self.history.list_revisions(set)?;
        sort_controller_revisions(&mut revisions);
        Ok(revisions)
    }

    fn adopt_orphan_revisions(
        &self,
        set: &StatefulSet,
        revisions: &[ControllerRevision],
    ) -> Result<(), StatefulSetControlError> {
        for revision in revisions {
            self.history.adopt_revision(set, revision)?;
        }
        Ok(())
    }
}

impl DefaultStatefulSetControl {
    fn run_reconcile(
        &self,
        set: &StatefulSet,
        pods: &[Pod],
    ) -> Result<(), StatefulSetControlError> {
        let revisions = self.list_revisions(set)?;
        let (current, update, collision_count) = self.stateful_set_revisions(set, &revisions)?;

        let status =
            self.perform_update(set, &current, &update, collision_count, pods, &revisions)?;
        let status = self.update_stateful_set_status(set, status)?;

        log_debug(
            COMPONENT,
            "reconciled stateful set",
            &[
                ("namespace", namespace_label(set)),
                ("statefulset", set.name()),
                ("replicas", &status.replicas.to_string()),
                ("ready", &status.ready_replicas.to_string()),
                ("current", &status.current_replicas.to_string()),
                ("updated", &status.updated_replicas.to_string()),
                ("current_revision", &status.current_revision),
                ("update_revision", &status.update_revision),
            ],
        );

        self.truncate_history(set, pods, &revisions, &current, &update)
    }

    /// Computes the current and update revisions for `set` against its sorted
    /// history, creating or bumping revisions as needed. Also returns the
    /// collision count carried into the status.
    fn stateful_set_revisions(
        &self,
        set: &StatefulSet,
        revisions: &[ControllerRevision],
    ) -> Result<(ControllerRevision, ControllerRevision, i32), StatefulSetControlError> {
        let mut collision_count = set.status.collision_count.unwrap_or(0);

        let candidate = new_revision(set, next_revision(revisions), collision_count)?;
        let equal = find_equal_revisions(revisions, &candidate);

        let update = match equal.last().copied() {
            // The template equals the newest revision: nothing has changed.
            Some(index) if index == revisions.len() - 1 => revisions[index].clone(),
            // The template equals an older revision: a rollback is in
            // progress. Bump that revision so it orders after the rest.
            Some(index) => {
                let bumped = self
                    .history
                    .update_revision(&revisions[index], candidate.revision)?;
                log_info(
                    COMPONENT,
                    "rolled back to prior revision",
                    &[
                        ("namespace", namespace_label(set)),
                        ("statefulset", set.name()),
                        ("revision", bumped.name()),
                    ],
                );
                bumped
            }
            None => self
                .history
                .create_revision(set, &candidate, &mut collision_count)?,
        };

        let current = revisions
            .iter()
            .find(|revision| revision.name() == set.status.current_revision)
            .cloned()
            .unwrap_or_else(|| update.clone());

        Ok((current, update, collision_count))
    }

    /// The main update pass: enforces identity and ordering invariants,
    /// creates and recreates pods, scales down condemned ordinals, and walks
    /// the update strategy. Waiting is expressed as an early `Ok(status)`.
    fn perform_update(
        &self,
        set: &StatefulSet,
        current: &ControllerRevision,
        update: &ControllerRevision,
        collision_count: i32,
        pods: &[Pod],
        revisions: &[ControllerRevision],
    ) -> Result<StatefulSetStatus, StatefulSetControlError> {
        let current_set = apply_revision(set, current)?;
        let update_set = apply_revision(set, update)?;

        let mut status = StatefulSetStatus {
            observed_generation: set.metadata.generation.unwrap_or_default(),
            current_revision: current.name().to_string(),
            update_revision: update.name().to_string(),
            collision_count: Some(collision_count),
            ..Default::default()
        };

        let replica_count = set.spec.replicas.max(0) as usize;
        let mut slots: Vec<Option<Pod>> = vec![None; replica_count];
        let mut condemned: Vec<Pod> = Vec::new();

        // Partition the snapshot into ordinal slots and the condemned tail.
        for pod in pods {
            status.replicas += 1;
            if is_running_and_ready(pod) {
                status.ready_replicas += 1;
            }
            if is_created(pod) && !is_terminating(pod) {
                let revision = get_pod_revision(pod);
                if revision == current.name() {
                    status.current_replicas += 1;
                }
                if revision == update.name() {
                    status.updated_replicas += 1;
                }
            }

            let ordinal = get_ordinal(pod);
            if ordinal >= 0 && (ordinal as usize) < replica_count {
                let slot = &mut slots[ordinal as usize];
                if slot.is_some() {
                    // Two pods with one ordinal means something outside the
                    // controller interfered; keep the first, ignore the rest.
                    log_warn(
                        COMPONENT,
                        "ignoring pod with duplicate ordinal",
                        &[
                            ("namespace", namespace_label(set)),
                            ("statefulset", set.name()),
                            ("pod", pod.name()),
                        ],
                    );
                } else {
                    *slot = Some(pod.clone());
                }
            } else if ordinal >= 0 {
                condemned.push(pod.clone());
            }
            // Pods whose names carry no ordinal are not ours to manage.
        }

        let mut replicas: Vec<Pod> = slots
            .into_iter()
            .enumerate()
            .map(|(ordinal, slot)| {
                slot.unwrap_or_else(|| {
                    new_versioned_pod(
                        &current_set,
                        &update_set,
                        current.name(),
                        update.name(),
                        ordinal as i32,
                    )
                })
            })
            .collect();

        condemned.sort_by_key(get_ordinal);

        let mut unhealthy = 0usize;
        let mut first_unhealthy: Option<(i32, String)> = None;
        for pod in replicas.iter().chain(condemned.iter()) {
            if !is_healthy(pod) {
                unhealthy += 1;
                let ordinal = get_ordinal(pod);
                if first_unhealthy
                    .as_ref()
                    .map(|(first, _)| ordinal < *first)
                    .unwrap_or(true)
                {
                    first_unhealthy = Some((ordinal, pod.name().to_string()));
                }
            }
        }
        if unhealthy > 0 {
            log_debug(
                COMPONENT,
                "stateful set has unhealthy pods",
                &[
                    ("namespace", namespace_label(set)),
                    ("statefulset", set.name()),
                    ("unhealthy", &unhealthy.to_string()),
                    (
                        "first_unhealthy",
                        first_unhealthy
                            .as_ref()
                            .map(|(_, name)| name.as_str())
                            .unwrap_or(""),
                    ),
                ],
            );
        }

        // A deleted set gets its status recorded and nothing else.
        if set.metadata.deletion_timestamp.is_some() {
            return Ok(status);
        }

        let monotonic = !set.allows_burst();

        // Forward sweep: enforce identity invariants and ordinal order.
        for ordinal in 0..replica_count {
            if is_failed(&replicas[ordinal]) {
                log_warn(
                    COMPONENT,
                    "recreating failed pod",
                    &[
                        ("namespace", namespace_label(set)),
                        ("statefulset", set.name()),
                        ("pod", replicas[ordinal].name()),
                    ],
                );
                self.delete_pod(set, &replicas[ordinal])?;
                let revision = get_pod_revision(&replicas[ordinal]);
                if revision == current.name() {
                    status.current_replicas -= 1;
                }
                if revision == update.name() {
                    status.updated_replicas -= 1;
                }
                status.replicas -= 1;
                replicas[ordinal] = new_versioned_pod(
                    &current_set,
                    &update_set,
                    current.name(),
                    update.name(),
                    ordinal as i32,
                );
            }
            if !is_created(&replicas[ordinal]) {
                self.pod_control
                    .create_stateful_pod(set, &replicas[ordinal])?;
                status.replicas += 1;
                let revision = get_pod_revision(&replicas[ordinal]);
                if revision == current.name() {
                    status.current_replicas += 1;
                }
                if revision == update.name() {
                    status.updated_replicas += 1;
                }
                if monotonic {
                    return Ok(status);
                }
                continue;
            }
            if is_terminating(&replicas[ordinal]) && monotonic {
                log_debug(
                    COMPONENT,
                    "waiting for pod to terminate",
                    &[
                        ("namespace", namespace_label(set)),
                        ("statefulset", set.name()),
                        ("pod", replicas[ordinal].name()),
                    ],
                );
                return Ok(status);
            }
            if should_update_in_place_ready(&replicas[ordinal]) {
                log_debug(
                    COMPONENT,
                    "marking pod in-place update ready",
                    &[
                        ("namespace", namespace_label(set)),
                        ("statefulset", set.name()),
                        ("pod", replicas[ordinal].name()),
                    ],
                );
                let condition = PodCondition {
                    condition_type: IN_PLACE_UPDATE_READY.to_string(),
                    status: CONDITION_TRUE.to_string(),
                    last_transition_time: None,
                    reason: None,
                    message: None,
                };
                self.pod_control
                    .update_stateful_pod_condition(set, &replicas[ordinal], condition)?;
            }
            if !is_running_and_ready(&replicas[ordinal]) && monotonic {
                log_debug(
                    COMPONENT,
                    "waiting for pod to be running and ready",
                    &[
                        ("namespace", namespace_label(set)),
                        ("statefulset", set.name()),
                        ("pod", replicas[ordinal].name()),
                    ],
                );
                return Ok(status);
            }
            if identity_matches(set, &replicas[ordinal]) && storage_matches(set, &replicas[ordinal])
            {
                continue;
            }
            // Repair on a deep copy; the snapshot stays read-only.
            let mut replica = replicas[ordinal].clone();
            update_identity(set, &mut replica);
            update_storage(set, &mut replica);
            self.pod_control.update_stateful_pod(&update_set, &replica)?;
        }

        // Scale-down sweep: terminate condemned pods, largest ordinal first,
        // never while an earlier pod might still recover.
        for target in (0..condemned.len()).rev() {
            if is_terminating(&condemned[target]) {
                log_debug(
                    COMPONENT,
                    "waiting for condemned pod to terminate",
                    &[
                        ("namespace", namespace_label(set)),
                        ("statefulset", set.name()),
                        ("pod", condemned[target].name()),
                    ],
                );
                if monotonic {
                    return Ok(status);
                }
                continue;
            }
            let is_first_unhealthy = first_unhealthy
                .as_ref()
                .map(|(_, name)| name == condemned[target].name())
                .unwrap_or(false);
            if !is_running_and_ready(&condemned[target]) && monotonic && !is_first_unhealthy {
                log_debug(
                    COMPONENT,
                    "waiting for unhealthy pod before scale down",
                    &[
                        ("namespace", namespace_label(set)),
                        ("statefulset", set.name()),
                        ("pod", condemned[target].name()),
                    ],
                );
                return Ok(status);
            }
            log_info(
                COMPONENT,
                "terminating pod for scale down",
                &[
                    ("namespace", namespace_label(set)),
                    ("statefulset", set.name()),
                    ("pod", condemned[target].name()),
                ],
            );
            self.delete_pod(set, &condemned[target])?;
            let revision = get_pod_revision(&condemned[target]);
            if revision == current.name() {
                status.current_replicas -= 1;
            }
            if revision == update.name() {
                status.updated_replicas -= 1;
            }
            if monotonic {
                return Ok(status);
            }
        }

        // OnDelete never updates proactively; pods move revisions when the
        // user deletes them.
        if set.spec.update_strategy.is_on_delete() {
            return Ok(status);
        }

        let update_min = set.spec.update_strategy.partition().min(set.spec.replicas.max(0)) as usize;
        let max_unavailable = self.resolve_max_unavailable(set)?;
        let mut unavailable: Vec<String> = Vec::new();

        // Update sweep: walk down from the largest ordinal, moving pods to
        // the update revision while the unavailability budget holds.
        for target in (update_min..replica_count).rev() {
            let pod_revision = get_pod_revision(&replicas[target]);
            let in_place_incomplete = check_in_place_update_completed(&replicas[target]);

            if pod_revision != update.name() && !is_terminating(&replicas[target]) {
                let mut skip_updating = false;
                let decision =
                    should_do_in_place_update(set, update, &pod_revision, revisions);
                let mut use_in_place = decision.is_some();

                if let Some(patch) = decision.as_ref() {
                    if let Some(reason) = in_place_incomplete.as_deref() {
                        // The previous in-place update has not reconciled;
                        // patching again would lose the recorded imageIDs.
                        log_debug(
                            COMPONENT,
                            "waiting for previous in-place update",
                            &[
                                ("namespace", namespace_label(set)),
                                ("statefulset", set.name()),
                                ("pod", replicas[target].name()),
                                ("reason", reason),
                            ],
                        );
                        skip_updating = true;
                    } else if self
                        .in_place_update_pod(set, &replicas[target], patch)
                        .is_err()
                        && !is_in_place_only(set)
                    {
                        use_in_place = false;
                    }
                }
                if !use_in_place {
                    if is_in_place_only(set) {
                        // The delta cannot be applied in place and the policy
                        // forbids recreation: leave the pod at its revision
                        // and report it unavailable below.
                        log_warn(
                            COMPONENT,
                            "pod ineligible for in-place update under InPlaceOnly policy",
                            &[
                                ("namespace", namespace_label(set)),
                                ("statefulset", set.name()),
                                ("pod", replicas[target].name()),
                            ],
                        );
                        skip_updating = true;
                    } else {
                        log_info(
                            COMPONENT,
                            "terminating pod for update",
                            &[
                                ("namespace", namespace_label(set)),
                                ("statefulset", set.name()),
                                ("pod", replicas[target].name()),
                            ],
                        );
                        self.delete_pod(set, &replicas[target])?;
                    }
                }
                if !skip_updating && pod_revision == current.name() {
                    status.current_replicas -= 1;
                }
            }

            if pod_revision != update.name() || !is_healthy(&replicas[target]) {
                unavailable.push(replicas[target].name().to_string());
            } else if let Some(reason) = in_place_incomplete.as_deref() {
                log_debug(
                    COMPONENT,
                    "pod in-place update not yet reconciled",
                    &[
                        ("namespace", namespace_label(set)),
                        ("statefulset", set.name()),
                        ("pod", replicas[target].name()),
                        ("reason", reason),
                    ],
                );
                unavailable.push(replicas[target].name().to_string());
            }

            if unavailable.len() >= max_unavailable {
                log_debug(
                    COMPONENT,
                    "waiting for unavailable pods before continuing update",
                    &[
                        ("namespace", namespace_label(set)),
                        ("statefulset", set.name()),
                        ("unavailable", &unavailable.join(",")),
                    ],
                );
                return Ok(status);
            }
        }

        Ok(status)
    }

    fn resolve_max_unavailable(
        &self,
        set: &StatefulSet,
    ) -> Result<usize, StatefulSetControlError> {
        let configured = set
            .spec
            .update_strategy
            .rolling_update
            .as_ref()
            .and_then(|rolling| rolling.max_unavailable.clone())
            .unwrap_or(IntOrString::Int(1));
        let resolved = configured
            .resolve(set.spec.replicas.max(0), false)
            .map_err(|err| StatefulSetControlError::InvalidSpec(err.to_string()))?;
        // At least one pod must be allowed to turn over or no update could
        // ever start.
        Ok(resolved.max(1) as usize)
    }

    /// Flips the readiness gate to `False` and issues the image patch. A pod
    /// stays out of rotation from the moment the gate drops until the node
    /// agent realizes the new image and the gate is raised again.
    fn in_place_update_pod(
        &self,
        set: &StatefulSet,
        pod: &Pod,
        patch: &InPlaceUpdateSpec,
    ) -> Result<(), StatefulSetControlError> {
        let condition = PodCondition {
            condition_type: IN_PLACE_UPDATE_READY.to_string(),
            status: CONDITION_FALSE.to_string(),
            last_transition_time: None,
            reason: Some(START_IN_PLACE_UPDATE_REASON.to_string()),
            message: None,
        };
        if let Err(err) = self
            .pod_control
            .update_stateful_pod_condition(set, pod, condition)
        {
            log_warn(
                COMPONENT,
                "failed to lower readiness gate before in-place update",
                &[
                    ("namespace", namespace_label(set)),
                    ("statefulset", set.name()),
                    ("pod", pod.name()),
                    ("error", &err.to_string()),
                ],
            );
            return Err(err);
        }
        log_info(
            COMPONENT,
            "patching pod for in-place update",
            &[
                ("namespace", namespace_label(set)),
                ("statefulset", set.name()),
                ("pod", pod.name()),
            ],
        );
        if let Err(err) = self
            .pod_control
            .in_place_update_stateful_pod(set, pod, patch)
        {
            log_warn(
                COMPONENT,
                "failed to patch pod for in-place update",
                &[
                    ("namespace", namespace_label(set)),
                    ("statefulset", set.name()),
                    ("pod", pod.name()),
                    ("error", &err.to_string()),
                ],
            );
            return Err(err);
        }
        Ok(())
    }

    /// Deletes a pod, treating an already-gone pod as success.
    fn delete_pod(&self, set: &StatefulSet, pod: &Pod) -> Result<(), StatefulSetControlError> {
        match self.pod_control.delete_stateful_pod(set, pod) {
            Err(err) if err.is_not_found() => {
                log_debug(
                    COMPONENT,
                    "pod already deleted",
                    &[
                        ("namespace", namespace_label(set)),
                        ("statefulset", set.name()),
                        ("pod", pod.name()),
                    ],
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Folds finished rollouts and writes the status back when it differs
    /// from what the set already records.
    fn update_stateful_set_status(
        &self,
        set: &StatefulSet,
        mut status: StatefulSetStatus,
    ) -> Result<StatefulSetStatus, StatefulSetControlError> {
        complete_rolling_update(set, &mut status);

        metrics::record_stateful_set_replicas(
            set.metadata.namespace.as_deref(),
            set.name(),
            status.ready_replicas,
            status.current_replicas,
            status.updated_replicas,
        );

        if !inconsistent_status(set, &status) {
            return Ok(status);
        }
        self.status_updater.update_stateful_set_status(set, &status)?;
        Ok(status)
    }

    /// Deletes non-live revisions, oldest first, until at most the configured
    /// history limit remain. Live revisions are the current and update
    /// revisions and any revision referenced by a pod.
    fn truncate_history(
        &self,
        set: &StatefulSet,
        pods: &[Pod],
        revisions: &[ControllerRevision],
        current: &ControllerRevision,
        update: &ControllerRevision,
    ) -> Result<(), StatefulSetControlError> {
        let mut live: HashSet<String> = HashSet::new();
        live.insert(current.name().to_string());
        live.insert(update.name().to_string());
        for pod in pods {
            live.insert(get_pod_revision(pod));
        }

        let historic: Vec<&ControllerRevision> = revisions
            .iter()
            .filter(|revision| !live.contains(revision.name()))
            .collect();
        let limit = set.spec.history_limit() as usize;
        if historic.len() <= limit {
            return Ok(());
        }
        for revision in &historic[..historic.len() - limit] {
            log_debug(
                COMPONENT,
                "truncating revision history",
                &[
                    ("namespace", namespace_label(set)),
                    ("statefulset", set.name()),
                    ("revision", revision.name()),
                ],
            );
            match self.history.delete_revision(revision) {
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
                Ok(()) => {}
            }
        }
        Ok(())
    }
}

fn namespace_label(set: &StatefulSet) -> &str {
    set.metadata.namespace.as_deref().unwrap_or("default")
}
