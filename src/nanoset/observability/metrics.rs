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

use std::sync::OnceLock;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

const DEFAULT_NAMESPACE: &str = "default";

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static CONTROLLER_RECONCILES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static STATEFULSET_REPLICAS: OnceLock<IntGaugeVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::new_custom(Some("nanoset".to_string()), None)
            .expect("failed to initialise nanoset metrics registry")
    })
}

fn register_collector<C>(collector: C) -> C
where
    C: Clone + Collector + Send + Sync + 'static,
{
    registry()
        .register(Box::new(collector.clone()))
        .expect("failed to register nanoset metric collector");
    collector
}

fn controller_reconciles_total() -> &'static IntCounterVec {
    CONTROLLER_RECONCILES_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "controller_reconciles_total",
            "Controller reconciliation attempts grouped by result",
        );
        let counter = IntCounterVec::new(opts, &["controller", "result"])
            .expect("failed to build controller reconcile counter");
        register_collector(counter)
    })
}

fn stateful_set_replicas() -> &'static IntGaugeVec {
    STATEFULSET_REPLICAS.get_or_init(|| {
        let opts = Opts::new(
            "statefulset_replicas",
            "Observed replica counts per stateful set, grouped by state",
        );
        let gauge = IntGaugeVec::new(opts, &["namespace", "statefulset", "state"])
            .expect("failed to build statefulset replica gauge");
        register_collector(gauge)
    })
}

/// Outcome of a single reconciliation attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControllerReconcileResult {
    Success,
    Error,
}

impl ControllerReconcileResult {
    fn as_str(self) -> &'static str {
        match self {
            ControllerReconcileResult::Success => "success",
            ControllerReconcileResult::Error => "error",
        }
    }
}

pub fn record_controller_reconcile(controller: &str, result: ControllerReconcileResult) {
    controller_reconciles_total()
        .with_label_values(&[controller, result.as_str()])
        .inc();
}

pub fn record_stateful_set_replicas(
    namespace: Option<&str>,
    name: &str,
    ready: i32,
    current: i32,
    updated: i32,
) {
    let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
    let gauge = stateful_set_replicas();
    gauge
        .with_label_values(&[namespace, name, "ready"])
        .set(i64::from(ready));
    gauge
        .with_label_values(&[namespace, name, "current"])
        .set(i64::from(current));
    gauge
        .with_label_values(&[namespace, name, "updated"])
        .set(i64::from(updated));
}

/// Renders the registry in the Prometheus text exposition format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&registry().gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
