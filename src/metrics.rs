/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use crate::sink::action::{Action, ActionType};
use crate::sink::bulk::Bulk;
use ahash::AHashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionOutcome {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterKey {
    pub action_type: ActionType,
    pub outcome: ActionOutcome,
    pub index_name: String,
}

/// Gauges and counters produced by the bulk subsystem. The counter map has
/// its own mutex so counting never contends with the flush lock.
pub struct BulkMetrics {
    process_latency_ms: AtomicI64,
    bulk_request_process_latency_ms: AtomicI64,
    action_counters: Mutex<AHashMap<CounterKey, u64>>,
}

impl BulkMetrics {
    pub(crate) fn new() -> Self {
        Self {
            process_latency_ms: AtomicI64::new(0),
            bulk_request_process_latency_ms: AtomicI64::new(0),
            action_counters: Mutex::new(AHashMap::new()),
        }
    }

    pub(crate) fn set_process_latency_ms(&self, value: i64) {
        self.process_latency_ms.store(value, Ordering::Relaxed);
    }

    pub(crate) fn set_bulk_request_process_latency_ms(&self, value: i64) {
        self.bulk_request_process_latency_ms
            .store(value, Ordering::Relaxed);
    }

    pub(crate) fn count_success(&self, action: &Action) {
        self.count(action, ActionOutcome::Success);
    }

    pub(crate) fn count_error(&self, action: &Action) {
        self.count(action, ActionOutcome::Error);
    }

    fn count(&self, action: &Action, outcome: ActionOutcome) {
        let key = CounterKey {
            action_type: action.action_type,
            outcome,
            index_name: action.index_name.clone().unwrap_or_default(),
        };
        *self.counters_guard().entry(key).or_insert(0) += 1;
    }

    fn counters_guard(&self) -> MutexGuard<'_, AHashMap<CounterKey, u64>> {
        match self.action_counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut action_counters: Vec<ActionCounter> = self
            .counters_guard()
            .iter()
            .map(|(key, total)| ActionCounter {
                action_type: key.action_type,
                outcome: key.outcome,
                index_name: key.index_name.clone(),
                total: *total,
            })
            .collect();
        action_counters.sort_by(|a, b| {
            (&a.index_name, a.action_type, a.outcome)
                .cmp(&(&b.index_name, b.action_type, b.outcome))
        });

        MetricsSnapshot {
            process_latency_ms: self.process_latency_ms.load(Ordering::Relaxed),
            bulk_request_process_latency_ms: self
                .bulk_request_process_latency_ms
                .load(Ordering::Relaxed),
            action_counters,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionCounter {
    pub action_type: ActionType,
    pub outcome: ActionOutcome,
    pub index_name: String,
    pub total: u64,
}

/// Read-only view over the bulk subsystem's metrics at one point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub process_latency_ms: i64,
    pub bulk_request_process_latency_ms: i64,
    pub action_counters: Vec<ActionCounter>,
}

impl MetricsSnapshot {
    pub fn counter(
        &self,
        action_type: ActionType,
        outcome: ActionOutcome,
        index_name: &str,
    ) -> u64 {
        self.action_counters
            .iter()
            .filter(|counter| {
                counter.action_type == action_type
                    && counter.outcome == outcome
                    && counter.index_name == index_name
            })
            .map(|counter| counter.total)
            .sum()
    }
}

/// Snapshot collector over a running bulk instance; exposition wiring
/// (Prometheus, logs, admin API) is the embedder's concern.
pub struct Collector {
    bulk: Arc<Bulk>,
}

impl Collector {
    pub fn new(bulk: Arc<Bulk>) -> Self {
        Self { bulk }
    }

    pub fn collect(&self) -> MetricsSnapshot {
        self.bulk.metrics().snapshot()
    }
}
