#![allow(dead_code)]

use nanoset::nanoset::controller::statefulset::control::{
    DefaultStatefulSetControl, StatefulSetControl,
};
use nanoset::nanoset::controller::statefulset::history::{revision_name, RevisionStore};
use nanoset::nanoset::controller::statefulset::identity::{
    get_ordinal, identity_matches, is_running_and_ready, storage_matches, CONDITION_FALSE,
    CONDITION_TRUE, POD_CONDITION_READY,
};
use nanoset::nanoset::controller::statefulset::inplace::{
    apply_in_place_update, has_readiness_gate, InPlaceUpdateSpec, IN_PLACE_UPDATE_READY,
};
use nanoset::nanoset::controller::statefulset::pod_control::{
    StatefulPodControl, StatefulSetControlError, StatefulSetStatusUpdater,
};
use nanoset::nanoset::k8s::intstr::IntOrString;
use nanoset::nanoset::k8s::persistentvolumeclaim::PersistentVolumeClaim;
use nanoset::nanoset::k8s::pod::{
    ContainerSpec, ContainerStatus, ObjectMeta, OwnerReference, Pod, PodCondition, PodPhase,
    PodReadinessGate, PodSpec, PodStatus,
};
use nanoset::nanoset::k8s::revision::ControllerRevision;
use nanoset::nanoset::k8s::statefulset::{
    LabelSelector, PodManagementPolicy, PodTemplateSpec, PodUpdatePolicy,
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetStatus,
    StatefulSetUpdateStrategy, StatefulSetUpdateStrategyType,
};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const SET_NAME: &str = "db";
pub const NAMESPACE: &str = "default";
pub const IMAGE_V1: &str = "registry.local/app:v1";
pub const IMAGE_V2: &str = "registry.local/app:v2";
pub const IMAGE_V3: &str = "registry.local/app:v3";

/// Write operations the fixture can be told to fail once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FixtureOp {
    CreatePod,
    UpdatePod,
    InPlaceUpdatePod,
    UpdatePodCondition,
    DeletePod,
    UpdateStatus,
    CreateRevision,
    UpdateRevision,
    DeleteRevision,
}

/// In-memory stand-in for the cluster API: stores pods, revisions, and the
/// written-back set status, and plays the node agent when tests advance pod
/// phases. Implements all three collaborator interfaces.
pub struct ClusterFixture {
    pods: Mutex<BTreeMap<String, Pod>>,
    revisions: Mutex<Vec<ControllerRevision>>,
    recorded_status: Mutex<Option<StatefulSetStatus>>,
    created_log: Mutex<Vec<String>>,
    deleted_log: Mutex<Vec<String>>,
    resource_version: AtomicU64,
    writes: AtomicU64,
    fail_once: Mutex<HashSet<FixtureOp>>,
}

impl ClusterFixture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pods: Mutex::new(BTreeMap::new()),
            revisions: Mutex::new(Vec::new()),
            recorded_status: Mutex::new(None),
            created_log: Mutex::new(Vec::new()),
            deleted_log: Mutex::new(Vec::new()),
            resource_version: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            fail_once: Mutex::new(HashSet::new()),
        })
    }

    fn next_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn note_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn check_fail(&self, op: FixtureOp) -> Result<(), StatefulSetControlError> {
        let mut guard = self.fail_once.lock().expect("fail lock");
        if guard.remove(&op) {
            return Err(StatefulSetControlError::Store(
                format!("injected failure for {:?}", op).into(),
            ));
        }
        Ok(())
    }

    /// Arms a one-shot failure for the next matching write.
    pub fn inject_failure(&self, op: FixtureOp) {
        self.fail_once.lock().expect("fail lock").insert(op);
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn created_log(&self) -> Vec<String> {
        self.created_log.lock().expect("created log").clone()
    }

    pub fn deleted_log(&self) -> Vec<String> {
        self.deleted_log.lock().expect("deleted log").clone()
    }

    pub fn recorded_status(&self) -> Option<StatefulSetStatus> {
        self.recorded_status.lock().expect("status lock").clone()
    }

    /// Point-in-time snapshot sorted by ordinal, the shape the informer
    /// hands the reconcile driver.
    pub fn pods_snapshot(&self) -> Vec<Pod> {
        let mut pods: Vec<Pod> = self.pods.lock().expect("pods lock").values().cloned().collect();
        pods.sort_by_key(get_ordinal);
        pods
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.pods_snapshot()
            .iter()
            .map(|pod| pod.name().to_string())
            .collect()
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.pods.lock().expect("pods lock").get(name).cloned()
    }

    pub fn revisions(&self) -> Vec<ControllerRevision> {
        let mut revisions = self.revisions.lock().expect("revisions lock").clone();
        revisions.sort_by(|a, b| a.revision.cmp(&b.revision));
        revisions
    }

    pub fn revision_names(&self) -> Vec<String> {
        self.revisions()
            .iter()
            .map(|revision| revision.name().to_string())
            .collect()
    }

    /// Name of the revision with the highest sequence number.
    pub fn latest_revision_name(&self) -> String {
        self.revisions()
            .last()
            .map(|revision| revision.name().to_string())
            .unwrap_or_default()
    }

    /// Directly mutates a stored pod, bypassing the pod control interface.
    /// Used to model node-agent progress and external interference.
    pub fn mutate_pod<F: FnOnce(&mut Pod)>(&self, name: &str, mutate: F) {
        let mut pods = self.pods.lock().expect("pods lock");
        let pod = pods.get_mut(name).unwrap_or_else(|| panic!("no pod {name}"));
        mutate(pod);
        refresh_ready_condition(pod);
    }

    /// Removes a pod behind the controller's back.
    pub fn remove_pod(&self, name: &str) {
        self.pods.lock().expect("pods lock").remove(name);
    }

    /// Inserts a pod behind the controller's back, as if a foreign workload
    /// matched the selector.
    pub fn seed_pod(&self, mut pod: Pod) {
        pod.metadata.resource_version = Some(self.next_version());
        self.pods
            .lock()
            .expect("pods lock")
            .insert(pod.name().to_string(), pod);
    }

    /// Node agent reports the pod running with every container ready.
    pub fn make_running_and_ready(&self, name: &str) {
        self.mutate_pod(name, |pod| {
            let statuses: Vec<ContainerStatus> = pod
                .spec
                .containers
                .iter()
                .map(|container| ContainerStatus {
                    name: container.name.clone(),
                    ready: true,
                    restart_count: 0,
                    image: container.image.clone(),
                    image_id: container.image.as_deref().map(image_id_for),
                })
                .collect();
            let status = pod.status.get_or_insert_with(PodStatus::default);
            status.phase = PodPhase::Running;
            status.container_statuses = statuses;
        });
    }

    /// Marks every pod that has not started yet as running and ready.
    pub fn advance_pending_pods(&self) {
        let names: Vec<String> = self
            .pods_snapshot()
            .iter()
            .filter(|pod| pod.phase() != PodPhase::Running)
            .map(|pod| pod.name().to_string())
            .collect();
        for name in names {
            self.make_running_and_ready(&name);
        }
    }

    /// Node agent reports the container no longer passing readiness probes.
    pub fn make_unready(&self, name: &str) {
        self.mutate_pod(name, |pod| {
            if let Some(status) = pod.status.as_mut() {
                for container in &mut status.container_statuses {
                    container.ready = false;
                }
            }
        });
    }

    pub fn fail_pod(&self, name: &str) {
        self.mutate_pod(name, |pod| {
            let status = pod.status.get_or_insert_with(PodStatus::default);
            status.phase = PodPhase::Failed;
            for container in &mut status.container_statuses {
                container.ready = false;
            }
        });
    }

    /// Node agent finishes pulling images after an in-place patch: container
    /// statuses converge on the images currently in the pod spec.
    pub fn complete_image_pull(&self, name: &str) {
        self.mutate_pod(name, |pod| {
            let images: Vec<(String, Option<String>)> = pod
                .spec
                .containers
                .iter()
                .map(|container| (container.name.clone(), container.image.clone()))
                .collect();
            if let Some(status) = pod.status.as_mut() {
                for container_status in &mut status.container_statuses {
                    if let Some((_, image)) = images
                        .iter()
                        .find(|(name, _)| *name == container_status.name)
                    {
                        container_status.image = image.clone();
                        container_status.image_id = image.as_deref().map(image_id_for);
                        container_status.ready = true;
                    }
                }
            }
        });
    }
}

impl StatefulPodControl for ClusterFixture {
    fn create_stateful_pod(
        &self,
        _set: &StatefulSet,
        pod: &Pod,
    ) -> Result<(), StatefulSetControlError> {
        self.check_fail(FixtureOp::CreatePod)?;
        self.note_write();
        let mut pods = self.pods.lock().expect("pods lock");
        if pods.contains_key(pod.name()) {
            return Err(StatefulSetControlError::Store(
                format!("pod {} already exists", pod.name()).into(),
            ));
        }
        let mut stored = pod.clone();
        stored.metadata.resource_version = Some(self.next_version());
        stored.status = Some(PodStatus {
            phase: PodPhase::Pending,
            ..Default::default()
        });
        self.created_log
            .lock()
            .expect("created log")
            .push(stored.name().to_string());
        pods.insert(stored.name().to_string(), stored);
        Ok(())
    }

    fn update_stateful_pod(
        &self,
        _set: &StatefulSet,
        pod: &Pod,
    ) -> Result<(), StatefulSetControlError> {
        self.check_fail(FixtureOp::UpdatePod)?;
        self.note_write();
        let mut pods = self.pods.lock().expect("pods lock");
        let stored = pods
            .get_mut(pod.name())
            .ok_or_else(|| StatefulSetControlError::NotFound(pod.name().to_string()))?;
        stored.metadata.labels = pod.metadata.labels.clone();
        stored.metadata.annotations = pod.metadata.annotations.clone();
        stored.spec = pod.spec.clone();
        stored.metadata.resource_version = Some(self.next_version());
        refresh_ready_condition(stored);
        Ok(())
    }

    fn in_place_update_stateful_pod(
        &self,
        _set: &StatefulSet,
        pod: &Pod,
        update: &InPlaceUpdateSpec,
    ) -> Result<(), StatefulSetControlError> {
        self.check_fail(FixtureOp::InPlaceUpdatePod)?;
        self.note_write();
        let mut pods = self.pods.lock().expect("pods lock");
        let stored = pods
            .get_mut(pod.name())
            .ok_or_else(|| StatefulSetControlError::NotFound(pod.name().to_string()))?;
        apply_in_place_update(stored, update).map_err(StatefulSetControlError::Serialization)?;
        stored.metadata.resource_version = Some(self.next_version());
        refresh_ready_condition(stored);
        Ok(())
    }

    fn update_stateful_pod_condition(
        &self,
        _set: &StatefulSet,
        pod: &Pod,
        condition: PodCondition,
    ) -> Result<(), StatefulSetControlError> {
        self.check_fail(FixtureOp::UpdatePodCondition)?;
        self.note_write();
        let mut pods = self.pods.lock().expect("pods lock");
        let stored = pods
            .get_mut(pod.name())
            .ok_or_else(|| StatefulSetControlError::NotFound(pod.name().to_string()))?;
        upsert_condition(stored, condition);
        stored.metadata.resource_version = Some(self.next_version());
        refresh_ready_condition(stored);
        Ok(())
    }

    fn delete_stateful_pod(
        &self,
        _set: &StatefulSet,
        pod: &Pod,
    ) -> Result<(), StatefulSetControlError> {
        self.check_fail(FixtureOp::DeletePod)?;
        self.note_write();
        let mut pods = self.pods.lock().expect("pods lock");
        if pods.remove(pod.name()).is_none() {
            return Err(StatefulSetControlError::NotFound(pod.name().to_string()));
        }
        self.deleted_log
            .lock()
            .expect("deleted log")
            .push(pod.name().to_string());
        Ok(())
    }
}

impl StatefulSetStatusUpdater for ClusterFixture {
    fn update_stateful_set_status(
        &self,
        _set: &StatefulSet,
        status: &StatefulSetStatus,
    ) -> Result<(), StatefulSetControlError> {
        self.check_fail(FixtureOp::UpdateStatus)?;
        self.note_write();
        *self.recorded_status.lock().expect("status lock") = Some(status.clone());
        Ok(())
    }
}

impl RevisionStore for ClusterFixture {
    fn list_revisions(
        &self,
        _set: &StatefulSet,
    ) -> Result<Vec<ControllerRevision>, StatefulSetControlError> {
        Ok(self.revisions.lock().expect("revisions lock").clone())
    }

    fn create_revision(
        &self,
        set: &StatefulSet,
        revision: &ControllerRevision,
        collision_count: &mut i32,
    ) -> Result<ControllerRevision, StatefulSetControlError> {
        self.check_fail(FixtureOp::CreateRevision)?;
        self.note_write();
        let mut revisions = self.revisions.lock().expect("revisions lock");
        let mut candidate = revision.clone();
        loop {
            let existing = revisions
                .iter()
                .find(|persisted| persisted.name() == candidate.name());
            match existing {
                Some(persisted) if persisted.data == candidate.data => {
                    return Ok(persisted.clone());
                }
                Some(_) => {
                    *collision_count += 1;
                    candidate.metadata.name =
                        Some(revision_name(set, &candidate.data, *collision_count)?);
                }
                None => {
                    revisions.push(candidate.clone());
                    return Ok(candidate);
                }
            }
        }
    }

    fn update_revision(
        &self,
        revision: &ControllerRevision,
        revision_number: i64,
    ) -> Result<ControllerRevision, StatefulSetControlError> {
        self.check_fail(FixtureOp::UpdateRevision)?;
        self.note_write();
        let mut revisions = self.revisions.lock().expect("revisions lock");
        let persisted = revisions
            .iter_mut()
            .find(|persisted| persisted.name() == revision.name())
            .ok_or_else(|| StatefulSetControlError::NotFound(revision.name().to_string()))?;
        persisted.revision = revision_number;
        Ok(persisted.clone())
    }

    fn delete_revision(
        &self,
        revision: &ControllerRevision,
    ) -> Result<(), StatefulSetControlError> {
        self.check_fail(FixtureOp::DeleteRevision)?;
        self.note_write();
        let mut revisions = self.revisions.lock().expect("revisions lock");
        let before = revisions.len();
        revisions.retain(|persisted| persisted.name() != revision.name());
        if revisions.len() == before {
            return Err(StatefulSetControlError::NotFound(revision.name().to_string()));
        }
        Ok(())
    }

    fn adopt_revision(
        &self,
        set: &StatefulSet,
        revision: &ControllerRevision,
    ) -> Result<ControllerRevision, StatefulSetControlError> {
        self.note_write();
        let mut revisions = self.revisions.lock().expect("revisions lock");
        let owner = OwnerReference {
            api_version: set.api_version.clone(),
            kind: set.kind.clone(),
            name: set.name().to_string(),
            controller: Some(true),
        };
        if let Some(persisted) = revisions
            .iter_mut()
            .find(|persisted| persisted.name() == revision.name())
        {
            persisted.metadata.owner_references = vec![owner];
            Ok(persisted.clone())
        } else {
            let mut adopted = revision.clone();
            adopted.metadata.owner_references = vec![owner];
            revisions.push(adopted.clone());
            Ok(adopted)
        }
    }
}

/// Recomputes the pod's `Ready` condition the way the node agent would:
/// running, every container ready, and every declared readiness gate true.
fn refresh_ready_condition(pod: &mut Pod) {
    let running = pod.phase() == PodPhase::Running;
    let containers_ready = pod
        .status
        .as_ref()
        .map(|status| {
            status.container_statuses.len() == pod.spec.containers.len()
                && status.container_statuses.iter().all(|cs| cs.ready)
        })
        .unwrap_or(false);
    let gates_ready = !has_readiness_gate(pod, IN_PLACE_UPDATE_READY)
        || pod
            .status
            .as_ref()
            .and_then(|status| {
                status
                    .conditions
                    .iter()
                    .find(|condition| condition.condition_type == IN_PLACE_UPDATE_READY)
            })
            .map(|condition| condition.status == CONDITION_TRUE)
            .unwrap_or(false);

    let ready = running && containers_ready && gates_ready;
    upsert_condition(
        pod,
        PodCondition {
            condition_type: POD_CONDITION_READY.to_string(),
            status: if ready { CONDITION_TRUE } else { CONDITION_FALSE }.to_string(),
            last_transition_time: None,
            reason: None,
            message: None,
        },
    );
}

fn upsert_condition(pod: &mut Pod, condition: PodCondition) {
    let status = pod.status.get_or_insert_with(PodStatus::default);
    if let Some(existing) = status
        .conditions
        .iter_mut()
        .find(|existing| existing.condition_type == condition.condition_type)
    {
        *existing = condition;
    } else {
        status.conditions.push(condition);
    }
}

/// Deterministic pseudo-digest for an image reference, standing in for the
/// imageID the node agent reports once a pull completes.
pub fn image_id_for(image: &str) -> String {
    let digest = Sha1::digest(image.as_bytes());
    format!("docker-pullable://{}@sha256:{:x}", image, digest)
}

/// Drives a [`DefaultStatefulSetControl`] against the fixture the way the
/// external reconcile driver would: snapshot, reconcile, fold the written
/// status back onto the set.
pub struct Harness {
    pub fixture: Arc<ClusterFixture>,
    control: DefaultStatefulSetControl,
    pub set: StatefulSet,
}

impl Harness {
    pub fn new(set: StatefulSet) -> Self {
        let fixture = ClusterFixture::new();
        let pod_control: Arc<dyn StatefulPodControl> = fixture.clone();
        let status_updater: Arc<dyn StatefulSetStatusUpdater> = fixture.clone();
        let history: Arc<dyn RevisionStore> = fixture.clone();
        let control = DefaultStatefulSetControl::new(pod_control, status_updater, history);
        Self {
            fixture,
            control,
            set,
        }
    }

    pub fn reconcile(&mut self) -> Result<(), StatefulSetControlError> {
        let pods = self.fixture.pods_snapshot();
        self.reconcile_with_pods(&pods)
    }

    /// Reconciles against an explicit (possibly stale) snapshot.
    pub fn reconcile_with_pods(
        &mut self,
        pods: &[Pod],
    ) -> Result<(), StatefulSetControlError> {
        let result = self.control.reconcile(&self.set, pods);
        if let Some(status) = self.fixture.recorded_status() {
            self.set.status = status;
        }
        result
    }

    pub fn reconcile_ok(&mut self) {
        self.reconcile().expect("reconcile pass");
    }

    pub fn list_revisions(&self) -> Vec<ControllerRevision> {
        self.control.list_revisions(&self.set).expect("list revisions")
    }

    /// Reconciles until a pass performs no writes, advancing pods with
    /// `advance` between passes. Panics when the set does not settle.
    pub fn converge_with<F: Fn(&ClusterFixture)>(&mut self, max_passes: usize, advance: F) {
        for _ in 0..max_passes {
            let before = self.fixture.write_count();
            self.reconcile_ok();
            if self.fixture.write_count() == before {
                return;
            }
            advance(&self.fixture);
        }
        panic!("stateful set did not converge within {max_passes} passes");
    }

    /// Converges with pending pods advanced to running and ready after each
    /// pass, the common scale-up/rollout driver.
    pub fn converge(&mut self, max_passes: usize) {
        self.converge_with(max_passes, |fixture| fixture.advance_pending_pods());
    }

    pub fn update_spec<F: FnOnce(&mut StatefulSetSpec)>(&mut self, mutate: F) {
        mutate(&mut self.set.spec);
        let generation = self.set.metadata.generation.unwrap_or(0);
        self.set.metadata.generation = Some(generation + 1);
    }

    /// Rebuilds the engine over the same durable store, as after a process
    /// restart. The engine itself keeps no state between passes.
    pub fn restart(self) -> Harness {
        let fixture = self.fixture;
        let pod_control: Arc<dyn StatefulPodControl> = fixture.clone();
        let status_updater: Arc<dyn StatefulSetStatusUpdater> = fixture.clone();
        let history: Arc<dyn RevisionStore> = fixture.clone();
        let control = DefaultStatefulSetControl::new(pod_control, status_updater, history);
        Harness {
            fixture,
            control,
            set: self.set,
        }
    }
}

pub fn sample_template(image: &str) -> PodTemplateSpec {
    let mut metadata = ObjectMeta::default();
    metadata
        .labels
        .insert("app".to_string(), SET_NAME.to_string());
    PodTemplateSpec {
        metadata,
        spec: PodSpec {
            containers: vec![ContainerSpec {
                name: "app".to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        },
    }
}

pub fn new_stateful_set(replicas: i32) -> StatefulSet {
    let mut selector_labels = BTreeMap::new();
    selector_labels.insert("app".to_string(), SET_NAME.to_string());
    let selector = LabelSelector {
        match_labels: selector_labels.into_iter().collect(),
    };
    StatefulSet::new(
        ObjectMeta {
            name: Some(SET_NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        StatefulSetSpec {
            replicas,
            selector,
            service_name: SET_NAME.to_string(),
            template: sample_template(IMAGE_V1),
            pod_management_policy: PodManagementPolicy::OrderedReady,
            update_strategy: StatefulSetUpdateStrategy::default(),
            revision_history_limit: None,
            volume_claim_templates: vec![PersistentVolumeClaim::named("data")],
        },
    )
}

pub fn make_parallel(set: &mut StatefulSet) {
    set.spec.pod_management_policy = PodManagementPolicy::Parallel;
}

pub fn make_on_delete(set: &mut StatefulSet) {
    set.spec.update_strategy = StatefulSetUpdateStrategy {
        r#type: StatefulSetUpdateStrategyType::OnDelete,
        rolling_update: None,
    };
}

pub fn rolling_update_mut(set: &mut StatefulSet) -> &mut RollingUpdateStatefulSetStrategy {
    set.spec
        .update_strategy
        .rolling_update
        .get_or_insert_with(Default::default)
}

pub fn set_partition(set: &mut StatefulSet, partition: i32) {
    rolling_update_mut(set).partition = Some(partition);
}

pub fn set_max_unavailable(set: &mut StatefulSet, value: IntOrString) {
    rolling_update_mut(set).max_unavailable = Some(value);
}

pub fn set_pod_update_policy(set: &mut StatefulSet, policy: PodUpdatePolicy) {
    rolling_update_mut(set).pod_update_policy = policy;
}

pub fn add_in_place_gate(set: &mut StatefulSet) {
    set.spec
        .template
        .spec
        .readiness_gates
        .push(PodReadinessGate {
            condition_type: IN_PLACE_UPDATE_READY.to_string(),
        });
}

pub fn pod_revision_label(pod: &Pod) -> String {
    nanoset::nanoset::controller::statefulset::identity::get_pod_revision(pod)
}

/// P1: under OrderedReady, readiness is monotone over ordinals.
pub fn assert_ordered_ready(pods: &[Pod]) {
    let mut seen_not_ready = false;
    for pod in pods {
        if !is_running_and_ready(pod) {
            seen_not_ready = true;
        } else {
            assert!(
                !seen_not_ready,
                "pod {} is ready after an earlier ordinal that is not",
                pod.name()
            );
        }
    }
}

/// P2: every stored pod carries its set-assigned identity and storage.
pub fn assert_identity(set: &StatefulSet, pods: &[Pod]) {
    for pod in pods {
        assert!(
            identity_matches(set, pod),
            "pod {} lost its identity",
            pod.name()
        );
        assert!(
            storage_matches(set, pod),
            "pod {} lost its storage wiring",
            pod.name()
        );
    }
}

/// P4: in the update range, pods that are out of service because of the
/// rollout (deleted, unhealthy, or mid-in-place-update) stay within the
/// unavailability budget. Healthy pods still waiting their turn at the old
/// revision do not count against it.
pub fn assert_unavailable_bound(
    fixture: &ClusterFixture,
    set: &StatefulSet,
    _update_revision: &str,
    max_unavailable: usize,
) {
    let partition = set.spec.update_strategy.partition();
    let mut disturbed = 0usize;
    for ordinal in partition..set.spec.replicas {
        let name = format!("{}-{}", set.name(), ordinal);
        match fixture.pod(&name) {
            None => disturbed += 1,
            Some(pod) => {
                let healthy =
                    nanoset::nanoset::controller::statefulset::identity::is_healthy(&pod);
                let mid_update =
                    nanoset::nanoset::controller::statefulset::inplace::check_in_place_update_completed(
                        &pod,
                    )
                    .is_some();
                if !healthy || mid_update {
                    disturbed += 1;
                }
            }
        }
    }
    assert!(
        disturbed <= max_unavailable,
        "{} pods disturbed in the update range, budget is {}",
        disturbed,
        max_unavailable
    );
}
