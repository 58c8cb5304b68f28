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

use crate::common::error::ConnectorResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct DcpMutation {
    pub key: Bytes,
    pub value: Bytes,
    pub collection_name: String,
    pub cas: u64,
    pub event_time: DateTime<Utc>,
    pub vb_id: u16,
    pub seq_no: u64,
    pub rev_no: u64,
}

#[derive(Debug, Clone)]
pub struct DcpDeletion {
    pub key: Bytes,
    pub collection_name: String,
    pub cas: u64,
    pub event_time: DateTime<Utc>,
    pub vb_id: u16,
    pub seq_no: u64,
    pub rev_no: u64,
}

#[derive(Debug, Clone)]
pub struct DcpExpiration {
    pub key: Bytes,
    pub collection_name: String,
    pub cas: u64,
    pub event_time: DateTime<Utc>,
    pub vb_id: u16,
    pub seq_no: u64,
    pub rev_no: u64,
}

/// One raw change event as delivered by the DCP stream.
#[derive(Debug, Clone)]
pub enum DcpEvent {
    Mutation(DcpMutation),
    Deletion(DcpDeletion),
    Expiration(DcpExpiration),
}

/// An event plus its acknowledgement callback.
///
/// The source redelivers events that were never acknowledged, so `ack` must
/// be called exactly once per event, and only after the event has been
/// safely absorbed into the batch.
#[derive(Clone)]
pub struct ListenerContext {
    pub event: DcpEvent,
    ack: Arc<dyn Fn() + Send + Sync>,
}

impl ListenerContext {
    pub fn new(event: DcpEvent, ack: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self { event, ack }
    }

    pub fn ack(&self) {
        (self.ack)();
    }
}

impl fmt::Debug for ListenerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerContext")
            .field("event", &self.event)
            .finish()
    }
}

/// Receives every change event on the source's ingestion tasks.
#[async_trait]
pub trait DcpListener: Send + Sync {
    /// A returned error is fatal: the source must stop delivering events.
    async fn on_event(&self, ctx: ListenerContext) -> ConnectorResult<()>;
}

/// Stream lifecycle hooks surfaced by the DCP client around rebalances.
/// All hooks default to no-ops.
#[async_trait]
pub trait DcpStreamEventHandler: Send + Sync {
    async fn before_rebalance_start(&self) {}
    async fn after_rebalance_start(&self) {}
    async fn before_rebalance_end(&self) {}
    async fn after_rebalance_end(&self) {}
    async fn before_stream_start(&self) {}
    async fn after_stream_start(&self) {}
    async fn before_stream_stop(&self) {}
    async fn after_stream_stop(&self) {}
}

/// Durably advances the per-partition checkpoint to the highest
/// acknowledged sequence number.
#[async_trait]
pub trait CheckpointCommitter: Send + Sync {
    async fn commit(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointMode {
    #[default]
    Auto,
    Manual,
}

/// The DCP source client as consumed by the connector.
///
/// Implementations own their networking and partition management; the
/// connector only registers its listener and lifecycle handler, switches
/// the checkpoint to manual mode and drives `start`/`close`.
#[async_trait]
pub trait Dcp: Send {
    fn set_listener(&mut self, listener: Arc<dyn DcpListener>);

    fn set_event_handler(&mut self, handler: Arc<dyn DcpStreamEventHandler>);

    fn set_checkpoint_mode(&mut self, mode: CheckpointMode);

    /// Shared handle used by the flush controller to commit checkpoints.
    fn committer(&self) -> Arc<dyn CheckpointCommitter>;

    /// True when the stream ends on its own (one-shot mode); stream-stop is
    /// then an orderly shutdown, not a rebalance.
    fn is_finite(&self) -> bool {
        false
    }

    /// Resolves to `true` once the streams are open and events may flow.
    fn ready(&self) -> watch::Receiver<bool>;

    /// Runs the stream until the client is closed. Blocks the caller.
    async fn start(&mut self) -> ConnectorResult<()>;

    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn given_listener_context_should_invoke_ack_callback() {
        let acks = Arc::new(AtomicUsize::new(0));
        let counter = acks.clone();
        let ctx = ListenerContext::new(
            DcpEvent::Deletion(DcpDeletion {
                key: Bytes::from_static(b"key"),
                collection_name: "_default".to_string(),
                cas: 1,
                event_time: Utc::now(),
                vb_id: 0,
                seq_no: 1,
                rev_no: 1,
            }),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        ctx.ack();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }
}
