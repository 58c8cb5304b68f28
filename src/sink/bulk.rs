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

use crate::common::client::{is_unexpected_eof, ElasticClient};
use crate::common::error::{ConnectorError, ConnectorResult};
use crate::common::pool::FragmentPool;
use crate::config::Config;
use crate::couchbase::dcp::{CheckpointCommitter, ListenerContext};
use crate::metrics::BulkMetrics;
use crate::sink::action::Action;
use crate::sink::encoder::encode_action;
use crate::sink::handler::SinkResponseHandler;
use crate::sink::response::find_response_errors;
use ahash::AHashMap;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, warn};

pub struct BatchItem {
    pub action: Action,
    pub bytes: BytesMut,
}

struct BatchState {
    items: Vec<BatchItem>,
    keys: AHashMap<String, usize>,
    byte_size: usize,
    rebalancing: bool,
    last_flush: Instant,
    last_commit: Instant,
}

impl BatchState {
    fn new(capacity_hint: usize) -> Self {
        Self {
            items: Vec::new(),
            keys: AHashMap::with_capacity(capacity_hint),
            byte_size: 0,
            rebalancing: false,
            last_flush: Instant::now(),
            last_commit: Instant::now(),
        }
    }
}

struct DispatchFailure {
    error: ConnectorError,
    fatal: bool,
}

fn fatal(error: ConnectorError) -> DispatchFailure {
    DispatchFailure { error, fatal: true }
}

/// The bulk sink: latest-wins batch accumulator, flush controller,
/// rebalance gate and concurrent `_bulk` dispatcher.
///
/// One mutex serialises accumulation, flushing, rebalance transitions and
/// close, and is held across the dispatch by design: producers block while
/// a flush is in flight, which is the connector's back-pressure.
pub struct Bulk {
    client: Arc<dyn ElasticClient>,
    sink_response_handler: Option<Arc<dyn SinkResponseHandler>>,
    committer: Arc<dyn CheckpointCommitter>,
    collection_index_mapping: HashMap<String, String>,
    type_name: Option<String>,
    batch_size_limit: usize,
    batch_byte_size_limit: usize,
    batch_ticker_duration: Duration,
    batch_commit_ticker_duration: Option<Duration>,
    concurrent_request: usize,
    max_retries: u32,
    state: Mutex<BatchState>,
    metrics: BulkMetrics,
    pool: FragmentPool,
    shutdown_tx: watch::Sender<bool>,
}

impl Bulk {
    pub async fn new(
        config: &Arc<Config>,
        client: Arc<dyn ElasticClient>,
        committer: Arc<dyn CheckpointCommitter>,
        sink_response_handler: Option<Arc<dyn SinkResponseHandler>>,
    ) -> ConnectorResult<Self> {
        let es = &config.elasticsearch;
        let batch_size_limit = es.batch_size_limit();
        let (shutdown_tx, _) = watch::channel(false);

        let bulk = Self {
            client,
            sink_response_handler,
            committer,
            collection_index_mapping: es.collection_index_mapping.clone(),
            type_name: es.type_name().map(str::to_string),
            batch_size_limit,
            batch_byte_size_limit: es.batch_byte_size_limit()?,
            batch_ticker_duration: es.batch_ticker_duration()?,
            batch_commit_ticker_duration: es.batch_commit_ticker_duration()?,
            concurrent_request: es.concurrent_request(),
            max_retries: es.max_retries(),
            state: Mutex::new(BatchState::new(batch_size_limit)),
            metrics: BulkMetrics::new(),
            pool: FragmentPool::new(batch_size_limit),
            shutdown_tx,
        };

        if let Some(handler) = &bulk.sink_response_handler {
            handler.on_init(config, &bulk.client).await?;
        }
        Ok(bulk)
    }

    pub fn metrics(&self) -> &BulkMetrics {
        &self.metrics
    }

    /// Appends mapped actions to the batch, acknowledging the source event
    /// on its last chunk, then flushes when a threshold tripped.
    pub async fn add_actions(
        &self,
        ctx: &ListenerContext,
        event_time: DateTime<Utc>,
        actions: Vec<Action>,
        collection_name: &str,
        is_last_chunk: bool,
    ) -> ConnectorResult<()> {
        let should_flush;
        {
            let mut state = self.state.lock().await;
            if state.rebalancing {
                warn!("could not add new actions to the batch while rebalancing");
                return Ok(());
            }

            for mut action in actions {
                let index_name =
                    self.resolve_index_name(collection_name, action.index_name.take())?;
                let mut fragment = self.pool.acquire();
                encode_action(&mut fragment, &action, &index_name, self.type_name.as_deref());
                action.index_name = Some(index_name);

                let key = action_key(&action);
                if let Some(&position) = state.keys.get(&key) {
                    let replaced_len = state.items[position].bytes.len();
                    state.byte_size += fragment.len();
                    state.byte_size -= replaced_len;
                    let previous = std::mem::replace(
                        &mut state.items[position],
                        BatchItem {
                            action,
                            bytes: fragment,
                        },
                    );
                    self.pool.release(previous.bytes);
                } else {
                    state.byte_size += fragment.len();
                    let position = state.items.len();
                    state.keys.insert(key, position);
                    state.items.push(BatchItem {
                        action,
                        bytes: fragment,
                    });
                }
            }

            if is_last_chunk {
                ctx.ack();
            }
            should_flush = state.items.len() >= self.batch_size_limit
                || state.byte_size >= self.batch_byte_size_limit;
        }

        if is_last_chunk {
            self.metrics
                .set_process_latency_ms((Utc::now() - event_time).num_milliseconds());
        }
        if should_flush {
            self.flush_messages().await?;
        }
        Ok(())
    }

    fn resolve_index_name(
        &self,
        collection_name: &str,
        action_index: Option<String>,
    ) -> ConnectorResult<String> {
        if let Some(index) = action_index {
            if !index.is_empty() {
                return Ok(index);
            }
        }
        match self.collection_index_mapping.get(collection_name) {
            Some(index) if !index.is_empty() => Ok(index.clone()),
            _ => {
                let err = ConnectorError::Configuration(format!(
                    "there is no index mapping for collection: {collection_name} in the configuration"
                ));
                error!("could not resolve index name: {err}");
                Err(err)
            }
        }
    }

    /// Closes the ingestion gate and discards the batch. Batched but
    /// uncommitted events will be redelivered by the source after the
    /// rebalance, so nothing is flushed and nothing is committed.
    pub async fn prepare_start_rebalancing(&self) {
        let mut state = self.state.lock().await;
        state.rebalancing = true;
        let items = std::mem::take(&mut state.items);
        for item in items {
            self.pool.release(item.bytes);
        }
        state.keys = AHashMap::with_capacity(self.batch_size_limit);
        state.byte_size = 0;
    }

    pub async fn prepare_end_rebalancing(&self) {
        let mut state = self.state.lock().await;
        state.rebalancing = false;
    }

    /// Periodic flush loop; runs until `close` signals shutdown. A flush
    /// error is fatal and ends the loop.
    pub async fn run_ticker(&self) -> ConnectorResult<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let deadline = {
                let state = self.state.lock().await;
                state.last_flush + self.batch_ticker_duration
            };
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    self.flush_messages().await?;
                }
                result = shutdown.changed() => {
                    if result.is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stops the ticker and performs one final synchronous flush.
    pub async fn close(&self) -> ConnectorResult<()> {
        let _ = self.shutdown_tx.send(true);
        self.flush_messages().await
    }

    pub(crate) async fn flush_messages(&self) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        state.last_flush = Instant::now();
        if state.rebalancing {
            return Ok(());
        }

        if !state.items.is_empty() {
            if let Err(failure) = self.bulk_request(&state.items).await {
                if failure.fatal || self.sink_response_handler.is_none() {
                    error!("error while bulk request: {}", failure.error);
                    return Err(failure.error);
                }
                debug!(
                    "bulk request errors were reported to the sink response handler: {}",
                    failure.error
                );
            }
            state.last_flush = Instant::now();
            let items = std::mem::take(&mut state.items);
            for item in items {
                self.pool.release(item.bytes);
            }
            state.keys = AHashMap::with_capacity(self.batch_size_limit);
            state.byte_size = 0;
        }

        self.check_and_commit(&mut state).await;
        Ok(())
    }

    async fn check_and_commit(&self, state: &mut BatchState) {
        match self.batch_commit_ticker_duration {
            None => {
                self.committer.commit().await;
                state.last_commit = Instant::now();
            }
            Some(interval) => {
                if state.last_commit.elapsed() >= interval {
                    self.committer.commit().await;
                    state.last_commit = Instant::now();
                }
            }
        }
    }

    /// Splits the batch into up to `concurrent_request` contiguous chunks
    /// and dispatches them in parallel. The aggregate result is the first
    /// error seen; handler errors win because they are fatal.
    async fn bulk_request(&self, items: &[BatchItem]) -> Result<(), DispatchFailure> {
        let started = Instant::now();
        let chunk_size = items.len().div_ceil(self.concurrent_request).max(1);
        let results = join_all(items.chunks(chunk_size).map(|chunk| self.request_chunk(chunk))).await;
        self.metrics
            .set_bulk_request_process_latency_ms(started.elapsed().as_millis() as i64);

        let mut first_failure: Option<DispatchFailure> = None;
        for result in results {
            if let Err(failure) = result {
                let replace = match &first_failure {
                    None => true,
                    Some(existing) => failure.fatal && !existing.fatal,
                };
                if replace {
                    first_failure = Some(failure);
                }
            }
        }
        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn request_chunk(&self, chunk: &[BatchItem]) -> Result<(), DispatchFailure> {
        let total: usize = chunk.iter().map(|item| item.bytes.len()).sum();
        let mut body = BytesMut::with_capacity(total);
        for item in chunk {
            body.extend_from_slice(&item.bytes);
        }
        let body = body.freeze();

        if let Some(handler) = &self.sink_response_handler {
            handler.on_before_bulk().await;
        }
        let outcome = self.request_with_retries(chunk, body).await;
        if let Some(handler) = &self.sink_response_handler {
            handler.on_after_bulk().await;
        }
        outcome
    }

    async fn request_with_retries(
        &self,
        chunk: &[BatchItem],
        body: Bytes,
    ) -> Result<(), DispatchFailure> {
        let mut attempt = 1u32;
        loop {
            match self.client.bulk(body.clone()).await {
                Ok(response) => {
                    return match find_response_errors(&response) {
                        Ok(None) => {
                            self.finalize_process(chunk, &HashMap::new())
                                .await
                                .map_err(fatal)?;
                            Ok(())
                        }
                        Ok(Some(errors)) => {
                            self.finalize_process(chunk, &errors.items)
                                .await
                                .map_err(fatal)?;
                            Err(DispatchFailure {
                                error: ConnectorError::ItemFailures(errors.summary),
                                fatal: false,
                            })
                        }
                        Err(parse_error) => {
                            let error = ConnectorError::InvalidBulkResponse(parse_error);
                            let error_data = fill_error_data(chunk, &error);
                            self.finalize_process(chunk, &error_data)
                                .await
                                .map_err(fatal)?;
                            Err(DispatchFailure {
                                error,
                                fatal: false,
                            })
                        }
                    };
                }
                Err(error) => {
                    if is_unexpected_eof(&error) && attempt < self.max_retries {
                        warn!("unexpected eof during bulk request, attempt: {attempt}");
                        attempt += 1;
                        continue;
                    }
                    let error_data = fill_error_data(chunk, &error);
                    self.finalize_process(chunk, &error_data)
                        .await
                        .map_err(fatal)?;
                    return Err(DispatchFailure {
                        error,
                        fatal: false,
                    });
                }
            }
        }
    }

    async fn finalize_process(
        &self,
        chunk: &[BatchItem],
        error_data: &HashMap<String, String>,
    ) -> ConnectorResult<()> {
        for item in chunk {
            let key = action_key(&item.action);
            if let Some(message) = error_data.get(&key) {
                self.metrics.count_error(&item.action);
                if let Some(handler) = &self.sink_response_handler {
                    handler.on_error(&item.action, message).await?;
                }
            } else {
                self.metrics.count_success(&item.action);
                if let Some(handler) = &self.sink_response_handler {
                    handler.on_success(&item.action).await?;
                }
            }
        }
        Ok(())
    }
}

/// Batch identity of an action: `id:index`, or `id:index:routing` for
/// routed actions, matching the keys the response demux produces.
pub(crate) fn action_key(action: &Action) -> String {
    let id = String::from_utf8_lossy(&action.id);
    let index = action.index_name.as_deref().unwrap_or_default();
    match &action.routing {
        Some(routing) => format!("{id}:{index}:{routing}"),
        None => format!("{id}:{index}"),
    }
}

fn fill_error_data(chunk: &[BatchItem], error: &ConnectorError) -> HashMap<String, String> {
    chunk
        .iter()
        .map(|item| (action_key(&item.action), error.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::couchbase::dcp::{DcpEvent, DcpMutation};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const DEFAULT_RESPONSE: &str = r#"{"took":1,"errors":false,"items":[]}"#;

    #[derive(Default)]
    struct MockEsClient {
        bodies: StdMutex<Vec<Bytes>>,
        responses: StdMutex<VecDeque<ConnectorResult<String>>>,
    }

    impl MockEsClient {
        fn push_response(&self, response: ConnectorResult<String>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn bodies(&self) -> Vec<String> {
            self.bodies
                .lock()
                .unwrap()
                .iter()
                .map(|body| String::from_utf8(body.to_vec()).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl ElasticClient for MockEsClient {
        async fn bulk(&self, body: Bytes) -> ConnectorResult<String> {
            self.bodies.lock().unwrap().push(body);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(DEFAULT_RESPONSE.to_string()))
        }

        async fn index_exists(&self, _index: &str) -> ConnectorResult<bool> {
            Ok(true)
        }

        async fn create_index(&self, _index: &str) -> ConnectorResult<()> {
            Ok(())
        }

        async fn index_document(&self, _index: &str, _body: Bytes) -> ConnectorResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingCommitter {
        commits: AtomicUsize,
    }

    #[async_trait]
    impl CheckpointCommitter for CountingCommitter {
        async fn commit(&self) {
            self.commits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        successes: StdMutex<Vec<String>>,
        errors: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SinkResponseHandler for RecordingHandler {
        async fn on_success(&self, action: &Action) -> ConnectorResult<()> {
            self.successes.lock().unwrap().push(action_key(action));
            Ok(())
        }

        async fn on_error(&self, action: &Action, error: &str) -> ConnectorResult<()> {
            self.errors
                .lock()
                .unwrap()
                .push((action_key(action), error.to_string()));
            Ok(())
        }
    }

    fn test_config(mutate: impl FnOnce(&mut Config)) -> Arc<Config> {
        let mut config = Config::default();
        config.elasticsearch.urls = vec!["http://localhost:9200".to_string()];
        config.elasticsearch.collection_index_mapping =
            HashMap::from([("_default".to_string(), "idx1".to_string())]);
        mutate(&mut config);
        config.apply_defaults();
        Arc::new(config)
    }

    async fn new_bulk(
        config: &Arc<Config>,
        client: Arc<MockEsClient>,
        handler: Option<Arc<dyn SinkResponseHandler>>,
    ) -> (Bulk, Arc<CountingCommitter>) {
        let committer = Arc::new(CountingCommitter::default());
        let bulk = Bulk::new(config, client, committer.clone(), handler)
            .await
            .unwrap();
        (bulk, committer)
    }

    fn make_ctx() -> (ListenerContext, Arc<AtomicUsize>) {
        let acks = Arc::new(AtomicUsize::new(0));
        let counter = acks.clone();
        let ctx = ListenerContext::new(
            DcpEvent::Mutation(DcpMutation {
                key: Bytes::from_static(b"key"),
                value: Bytes::from_static(b"{}"),
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
        (ctx, acks)
    }

    async fn add(bulk: &Bulk, ctx: &ListenerContext, actions: Vec<Action>) {
        bulk.add_actions(ctx, Utc::now(), actions, "_default", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn given_duplicate_keys_should_keep_latest_action() {
        let client = Arc::new(MockEsClient::default());
        let (bulk, _) = new_bulk(&test_config(|_| {}), client.clone(), None).await;
        let (ctx, _) = make_ctx();

        add(&bulk, &ctx, vec![Action::index("1", "{\"v\":1}")]).await;
        add(&bulk, &ctx, vec![Action::index("1", "{\"v\":2}")]).await;

        assert_eq!(bulk.state.lock().await.items.len(), 1);
        bulk.flush_messages().await.unwrap();

        assert_eq!(
            client.bodies(),
            vec!["{\"index\":{\"_index\":\"idx1\",\"_id\":\"1\"}}\n{\"v\":2}\n".to_string()]
        );
    }

    #[tokio::test]
    async fn given_delete_then_index_should_dispatch_only_index() {
        let client = Arc::new(MockEsClient::default());
        let (bulk, _) = new_bulk(&test_config(|_| {}), client.clone(), None).await;
        let (ctx, _) = make_ctx();

        add(
            &bulk,
            &ctx,
            vec![Action::delete("k"), Action::index("k", "{\"x\":1}")],
        )
        .await;
        bulk.flush_messages().await.unwrap();

        assert_eq!(
            client.bodies(),
            vec!["{\"index\":{\"_index\":\"idx1\",\"_id\":\"k\"}}\n{\"x\":1}\n".to_string()]
        );
    }

    #[tokio::test]
    async fn given_replaced_action_should_compensate_byte_counter() {
        let client = Arc::new(MockEsClient::default());
        let (bulk, _) = new_bulk(&test_config(|_| {}), client.clone(), None).await;
        let (ctx, _) = make_ctx();

        add(&bulk, &ctx, vec![Action::index("1", "{\"v\":\"a-rather-long-body\"}")]).await;
        add(&bulk, &ctx, vec![Action::index("1", "{\"v\":2}")]).await;
        add(&bulk, &ctx, vec![Action::index("2", "{\"w\":3}")]).await;

        {
            let state = bulk.state.lock().await;
            let fragment_total: usize = state.items.iter().map(|item| item.bytes.len()).sum();
            assert_eq!(state.byte_size, fragment_total);
        }

        bulk.flush_messages().await.unwrap();
        let dispatched: usize = client.bodies().iter().map(String::len).sum();
        let expected = "{\"index\":{\"_index\":\"idx1\",\"_id\":\"1\"}}\n{\"v\":2}\n".len()
            + "{\"index\":{\"_index\":\"idx1\",\"_id\":\"2\"}}\n{\"w\":3}\n".len();
        assert_eq!(dispatched, expected);
    }

    #[tokio::test]
    async fn given_routing_should_keep_separate_entries_per_routing() {
        let client = Arc::new(MockEsClient::default());
        let (bulk, _) = new_bulk(&test_config(|_| {}), client.clone(), None).await;
        let (ctx, _) = make_ctx();

        add(
            &bulk,
            &ctx,
            vec![
                Action::index("1", "{}").with_routing("r1"),
                Action::index("1", "{}").with_routing("r2"),
            ],
        )
        .await;

        assert_eq!(bulk.state.lock().await.items.len(), 2);
    }

    #[tokio::test]
    async fn given_batch_size_limit_should_flush_synchronously() {
        let client = Arc::new(MockEsClient::default());
        let config = test_config(|c| c.elasticsearch.batch_size_limit = Some(2));
        let (bulk, committer) = new_bulk(&config, client.clone(), None).await;
        let (ctx, acks) = make_ctx();

        add(
            &bulk,
            &ctx,
            vec![Action::index("1", "{}"), Action::index("2", "{}")],
        )
        .await;

        assert_eq!(client.bodies().len(), 1);
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert_eq!(committer.commits.load(Ordering::SeqCst), 1);
        assert!(bulk.state.lock().await.items.is_empty());
    }

    #[tokio::test]
    async fn given_byte_size_limit_should_flush_synchronously() {
        let client = Arc::new(MockEsClient::default());
        let config = test_config(|c| {
            c.elasticsearch.batch_byte_size_limit = Some(crate::config::ByteSize::Bytes(1))
        });
        let (bulk, _) = new_bulk(&config, client.clone(), None).await;
        let (ctx, _) = make_ctx();

        add(&bulk, &ctx, vec![Action::index("1", "{}")]).await;
        assert_eq!(client.bodies().len(), 1);
    }

    #[tokio::test]
    async fn given_unresolvable_collection_should_fail_with_configuration_error() {
        let client = Arc::new(MockEsClient::default());
        let (bulk, _) = new_bulk(&test_config(|_| {}), client, None).await;
        let (ctx, acks) = make_ctx();

        let result = bulk
            .add_actions(
                &ctx,
                Utc::now(),
                vec![Action::index("1", "{}")],
                "unmapped-collection",
                true,
            )
            .await;

        assert!(matches!(result, Err(ConnectorError::Configuration(_))));
        assert_eq!(acks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn given_rebalancing_should_discard_batch_and_drop_adds() {
        let client = Arc::new(MockEsClient::default());
        let (bulk, _) = new_bulk(&test_config(|_| {}), client.clone(), None).await;
        let (ctx, acks) = make_ctx();

        add(
            &bulk,
            &ctx,
            vec![
                Action::index("1", "{}"),
                Action::index("2", "{}"),
                Action::index("3", "{}"),
            ],
        )
        .await;
        assert_eq!(acks.load(Ordering::SeqCst), 1);

        bulk.prepare_start_rebalancing().await;
        {
            let state = bulk.state.lock().await;
            assert!(state.items.is_empty());
            assert!(state.keys.is_empty());
            assert_eq!(state.byte_size, 0);
        }

        add(&bulk, &ctx, vec![Action::index("4", "{}")]).await;
        assert!(bulk.state.lock().await.items.is_empty());
        assert_eq!(acks.load(Ordering::SeqCst), 1);

        bulk.flush_messages().await.unwrap();
        assert!(client.bodies().is_empty());

        bulk.prepare_end_rebalancing().await;
        add(&bulk, &ctx, vec![Action::index("5", "{}")]).await;
        bulk.flush_messages().await.unwrap();

        let bodies = client.bodies();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("\"_id\":\"5\""));
    }

    #[tokio::test]
    async fn given_concurrent_request_above_batch_len_should_issue_one_task_per_item() {
        let client = Arc::new(MockEsClient::default());
        let config = test_config(|c| c.elasticsearch.concurrent_request = Some(8));
        let (bulk, _) = new_bulk(&config, client.clone(), None).await;
        let (ctx, _) = make_ctx();

        add(
            &bulk,
            &ctx,
            vec![Action::index("1", "{}"), Action::index("2", "{}")],
        )
        .await;
        bulk.flush_messages().await.unwrap();

        let bodies = client.bodies();
        assert_eq!(bodies.len(), 2);
        assert!(bodies.iter().all(|body| body.ends_with('\n')));
    }

    #[tokio::test]
    async fn given_unexpected_eof_should_retry_up_to_max_retries() {
        let client = Arc::new(MockEsClient::default());
        client.push_response(Err(ConnectorError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof",
        ))));
        client.push_response(Err(ConnectorError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof",
        ))));
        let config = test_config(|c| c.elasticsearch.max_retries = Some(3));
        let (bulk, _) = new_bulk(&config, client.clone(), None).await;
        let (ctx, _) = make_ctx();

        add(&bulk, &ctx, vec![Action::index("1", "{}")]).await;
        bulk.flush_messages().await.unwrap();

        assert_eq!(client.bodies().len(), 3);
    }

    #[tokio::test]
    async fn given_eof_budget_exhausted_should_fail_without_handler() {
        let client = Arc::new(MockEsClient::default());
        client.push_response(Err(ConnectorError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof",
        ))));
        let config = test_config(|c| c.elasticsearch.max_retries = Some(1));
        let (bulk, _) = new_bulk(&config, client.clone(), None).await;
        let (ctx, _) = make_ctx();

        add(&bulk, &ctx, vec![Action::index("1", "{}")]).await;
        assert!(bulk.flush_messages().await.is_err());
        assert_eq!(client.bodies().len(), 1);
    }

    #[tokio::test]
    async fn given_transport_error_with_handler_should_report_items_and_clear_batch() {
        let client = Arc::new(MockEsClient::default());
        client.push_response(Err(ConnectorError::BulkRequest {
            status: 503,
            body: "unavailable".to_string(),
        }));
        let handler = Arc::new(RecordingHandler::default());
        let (bulk, committer) = new_bulk(
            &test_config(|_| {}),
            client.clone(),
            Some(handler.clone() as Arc<dyn SinkResponseHandler>),
        )
        .await;
        let (ctx, _) = make_ctx();

        add(
            &bulk,
            &ctx,
            vec![Action::index("1", "{}"), Action::index("2", "{}")],
        )
        .await;
        bulk.flush_messages().await.unwrap();

        let errors = handler.errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|(_, message)| message.contains("503")));
        assert!(bulk.state.lock().await.items.is_empty());
        assert_eq!(committer.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn given_transport_error_without_handler_should_fail_and_keep_batch() {
        let client = Arc::new(MockEsClient::default());
        client.push_response(Err(ConnectorError::BulkRequest {
            status: 500,
            body: "boom".to_string(),
        }));
        let (bulk, committer) = new_bulk(&test_config(|_| {}), client.clone(), None).await;
        let (ctx, _) = make_ctx();

        add(&bulk, &ctx, vec![Action::index("1", "{}")]).await;
        assert!(bulk.flush_messages().await.is_err());
        assert_eq!(bulk.state.lock().await.items.len(), 1);
        assert_eq!(committer.commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn given_item_errors_should_split_success_and_error_reports() {
        let client = Arc::new(MockEsClient::default());
        client.push_response(Ok(r#"{"errors":true,"items":[
            {"index":{"_id":"1","_index":"idx1","status":200}},
            {"index":{"_id":"2","_index":"idx1","status":400,"error":{"type":"mapper_parsing_exception"}}}
        ]}"#
            .to_string()));
        let handler = Arc::new(RecordingHandler::default());
        let (bulk, _) = new_bulk(
            &test_config(|_| {}),
            client.clone(),
            Some(handler.clone() as Arc<dyn SinkResponseHandler>),
        )
        .await;
        let (ctx, _) = make_ctx();

        add(
            &bulk,
            &ctx,
            vec![Action::index("1", "{}"), Action::index("2", "{}")],
        )
        .await;
        bulk.flush_messages().await.unwrap();

        assert_eq!(
            handler.successes.lock().unwrap().as_slice(),
            ["1:idx1".to_string()]
        );
        let errors = handler.errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "2:idx1");
        assert!(errors[0].1.contains("mapper_parsing_exception"));

        let snapshot = bulk.metrics().snapshot();
        use crate::metrics::ActionOutcome;
        use crate::sink::action::ActionType;
        assert_eq!(
            snapshot.counter(ActionType::Index, ActionOutcome::Success, "idx1"),
            1
        );
        assert_eq!(
            snapshot.counter(ActionType::Index, ActionOutcome::Error, "idx1"),
            1
        );
    }

    #[tokio::test]
    async fn given_unparseable_response_should_report_whole_chunk_as_errors() {
        let client = Arc::new(MockEsClient::default());
        client.push_response(Ok("{not json".to_string()));
        let handler = Arc::new(RecordingHandler::default());
        let (bulk, _) = new_bulk(
            &test_config(|_| {}),
            client.clone(),
            Some(handler.clone() as Arc<dyn SinkResponseHandler>),
        )
        .await;
        let (ctx, _) = make_ctx();

        add(&bulk, &ctx, vec![Action::index("1", "{}")]).await;
        bulk.flush_messages().await.unwrap();

        assert_eq!(handler.errors.lock().unwrap().len(), 1);
        assert!(handler.successes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn given_no_commit_ticker_every_flush_should_commit() {
        let client = Arc::new(MockEsClient::default());
        let (bulk, committer) = new_bulk(&test_config(|_| {}), client, None).await;

        bulk.flush_messages().await.unwrap();
        bulk.flush_messages().await.unwrap();
        assert_eq!(committer.commits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn given_commit_ticker_should_gate_commits_by_interval() {
        let client = Arc::new(MockEsClient::default());
        let config = test_config(|c| {
            c.elasticsearch.batch_commit_ticker_duration = Some("100ms".to_string())
        });
        let (bulk, committer) = new_bulk(&config, client, None).await;

        bulk.flush_messages().await.unwrap();
        assert_eq!(committer.commits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        bulk.flush_messages().await.unwrap();
        assert_eq!(committer.commits.load(Ordering::SeqCst), 1);

        bulk.flush_messages().await.unwrap();
        assert_eq!(committer.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn given_close_should_flush_remaining_batch() {
        let client = Arc::new(MockEsClient::default());
        let (bulk, _) = new_bulk(&test_config(|_| {}), client.clone(), None).await;
        let (ctx, _) = make_ctx();

        add(&bulk, &ctx, vec![Action::index("1", "{}")]).await;
        bulk.close().await.unwrap();
        assert_eq!(client.bodies().len(), 1);
    }

    #[tokio::test]
    async fn given_ticker_should_flush_periodically() {
        let client = Arc::new(MockEsClient::default());
        let config = test_config(|c| {
            c.elasticsearch.batch_ticker_duration = Some("50ms".to_string())
        });
        let (bulk, _) = new_bulk(&config, client.clone(), None).await;
        let bulk = Arc::new(bulk);
        let (ctx, _) = make_ctx();

        add(&bulk, &ctx, vec![Action::index("1", "{}")]).await;

        let runner = bulk.clone();
        let ticker = tokio::spawn(async move { runner.run_ticker().await });
        tokio::time::sleep(Duration::from_millis(120)).await;
        bulk.close().await.unwrap();
        ticker.await.unwrap().unwrap();

        assert!(!client.bodies().is_empty());
    }
}
