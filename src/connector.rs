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

use crate::common::client::{DefaultElasticClient, ElasticClient};
use crate::common::error::ConnectorResult;
use crate::config::{log_effective_config, Config};
use crate::couchbase::dcp::{
    CheckpointMode, Dcp, DcpEvent, DcpListener, DcpStreamEventHandler, ListenerContext,
};
use crate::couchbase::event::Event;
use crate::mapper::{default_mapper, Mapper};
use crate::metrics::{Collector, MetricsSnapshot};
use crate::sink::bulk::Bulk;
use crate::sink::handler::SinkResponseHandler;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};

/// Bridges the DCP stream into the bulk accumulator: converts raw events,
/// runs the mapper and splits oversized action lists into batch-sized
/// chunks so a single event can never exceed one flush.
struct EventListener {
    mapper: Mapper,
    bulk: Arc<Bulk>,
    batch_size_limit: usize,
}

#[async_trait]
impl DcpListener for EventListener {
    async fn on_event(&self, ctx: ListenerContext) -> ConnectorResult<()> {
        let event = match &ctx.event {
            DcpEvent::Mutation(mutation) => Event::mutation(
                mutation.key.clone(),
                mutation.value.clone(),
                mutation.collection_name.clone(),
                mutation.cas,
                mutation.event_time,
                mutation.vb_id,
                mutation.seq_no,
                mutation.rev_no,
            ),
            DcpEvent::Deletion(deletion) => Event::deletion(
                deletion.key.clone(),
                deletion.collection_name.clone(),
                deletion.cas,
                deletion.event_time,
                deletion.vb_id,
                deletion.seq_no,
                deletion.rev_no,
            ),
            DcpEvent::Expiration(expiration) => Event::expiration(
                expiration.key.clone(),
                expiration.collection_name.clone(),
                expiration.cas,
                expiration.event_time,
                expiration.vb_id,
                expiration.seq_no,
                expiration.rev_no,
            ),
        };

        let actions = (self.mapper)(&event);
        if actions.is_empty() {
            ctx.ack();
            return Ok(());
        }

        if actions.len() > self.batch_size_limit {
            let last_chunk = actions.len().div_ceil(self.batch_size_limit) - 1;
            for (index, chunk) in actions.chunks(self.batch_size_limit).enumerate() {
                self.bulk
                    .add_actions(
                        &ctx,
                        event.event_time,
                        chunk.to_vec(),
                        &event.collection_name,
                        index == last_chunk,
                    )
                    .await?;
            }
        } else {
            self.bulk
                .add_actions(&ctx, event.event_time, actions, &event.collection_name, true)
                .await?;
        }
        Ok(())
    }
}

/// Wires the source's stream lifecycle into the rebalance gate. On a
/// finite stream, stream-stop is an orderly end rather than a rebalance.
struct DcpStreamGate {
    bulk: Arc<Bulk>,
    is_finite: bool,
}

#[async_trait]
impl DcpStreamEventHandler for DcpStreamGate {
    async fn before_stream_start(&self) {
        self.bulk.prepare_end_rebalancing().await;
    }

    async fn before_stream_stop(&self) {
        if self.is_finite {
            return;
        }
        self.bulk.prepare_start_rebalancing().await;
    }
}

/// The connector facade: owns the DCP source and the bulk sink, supervises
/// the flush loop and surfaces fatal errors to the caller.
pub struct Connector {
    dcp: Box<dyn Dcp>,
    bulk: Arc<Bulk>,
}

impl Connector {
    /// Runs the connector until the source closes. The batch ticker starts
    /// once the source reports readiness; a fatal flush error closes the
    /// source and is returned to the caller.
    pub async fn start(&mut self) -> ConnectorResult<()> {
        let mut ready = self.dcp.ready();
        let bulk = self.bulk.clone();
        let (fatal_tx, fatal_rx) = oneshot::channel();
        let flusher = tokio::spawn(async move {
            if ready.wait_for(|ready| *ready).await.is_err() {
                return;
            }
            info!("dcp stream is ready, starting the batch ticker");
            if let Err(err) = bulk.run_ticker().await {
                let _ = fatal_tx.send(err);
            }
        });

        let result = tokio::select! {
            result = self.dcp.start() => result,
            Ok(error) = fatal_rx => Err(error),
        };

        flusher.abort();
        if let Err(err) = &result {
            error!("connector stopped on fatal error: {err}");
            self.dcp.close().await;
        }
        result
    }

    /// Closes the source, then drains the sink with one final flush.
    pub async fn close(&mut self) -> ConnectorResult<()> {
        self.dcp.close().await;
        self.bulk.close().await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.bulk.metrics().snapshot()
    }

    pub fn metrics_collector(&self) -> Collector {
        Collector::new(self.bulk.clone())
    }
}

enum ConfigSource {
    Path(PathBuf),
    Value(Box<Config>),
}

pub struct ConnectorBuilder {
    config: ConfigSource,
    mapper: Mapper,
    sink_response_handler: Option<Arc<dyn SinkResponseHandler>>,
    client: Option<Arc<dyn ElasticClient>>,
}

impl ConnectorBuilder {
    /// Loads the configuration from a YAML file, with `${ENV}` expansion.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(ConfigSource::Path(path.into()))
    }

    pub fn from_config(config: Config) -> Self {
        Self::new(ConfigSource::Value(Box::new(config)))
    }

    fn new(config: ConfigSource) -> Self {
        Self {
            config,
            mapper: Arc::new(default_mapper),
            sink_response_handler: None,
            client: None,
        }
    }

    pub fn with_mapper(mut self, mapper: Mapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_sink_response_handler(
        mut self,
        handler: Arc<dyn SinkResponseHandler>,
    ) -> Self {
        self.sink_response_handler = Some(handler);
        self
    }

    /// Overrides the Elasticsearch client, bypassing transport construction.
    pub fn with_client(mut self, client: Arc<dyn ElasticClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub async fn build(self, mut dcp: Box<dyn Dcp>) -> ConnectorResult<Connector> {
        let mut config = match self.config {
            ConfigSource::Path(path) => Config::from_path(path)?,
            ConfigSource::Value(config) => *config,
        };
        config.apply_defaults();
        config.validate()?;
        log_effective_config(&config);
        let config = Arc::new(config);

        let client: Arc<dyn ElasticClient> = match self.client {
            Some(client) => client,
            None => Arc::new(DefaultElasticClient::new(&config.elasticsearch)?),
        };

        dcp.set_checkpoint_mode(CheckpointMode::Manual);
        let committer = dcp.committer();
        let bulk = Arc::new(
            Bulk::new(&config, client, committer, self.sink_response_handler).await?,
        );

        dcp.set_event_handler(Arc::new(DcpStreamGate {
            bulk: bulk.clone(),
            is_finite: dcp.is_finite(),
        }));
        dcp.set_listener(Arc::new(EventListener {
            mapper: self.mapper,
            bulk: bulk.clone(),
            batch_size_limit: config.elasticsearch.batch_size_limit(),
        }));

        Ok(Connector { dcp, bulk })
    }
}
