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

//! Couchbase DCP → Elasticsearch sink connector.
//!
//! Consumes a bucket's change feed (mutations, expirations, deletions),
//! runs each event through a user-supplied mapper and ships the resulting
//! actions to Elasticsearch as deduplicated, back-pressured `_bulk`
//! requests, committing source checkpoints only after dispatch.
//!
//! ```ignore
//! let mut connector = ConnectorBuilder::from_path("config.yml")
//!     .with_mapper(Arc::new(|event| default_mapper(event)))
//!     .build(dcp_client)
//!     .await?;
//! connector.start().await?;
//! connector.close().await?;
//! ```

pub mod common;
pub mod config;
pub mod connector;
pub mod couchbase;
pub mod mapper;
pub mod metrics;
pub mod sink;

pub use common::client::{DefaultElasticClient, ElasticClient};
pub use common::error::{ConnectorError, ConnectorResult};
pub use config::{ByteSize, Config, DcpConfig, ElasticsearchConfig, RejectionLogConfig};
pub use connector::{Connector, ConnectorBuilder};
pub use couchbase::dcp::{
    CheckpointCommitter, CheckpointMode, Dcp, DcpEvent, DcpListener, DcpStreamEventHandler,
    ListenerContext,
};
pub use couchbase::event::Event;
pub use mapper::{default_mapper, Mapper};
pub use metrics::{ActionOutcome, Collector, MetricsSnapshot};
pub use sink::action::{Action, ActionType};
pub use sink::bulk::Bulk;
pub use sink::handler::SinkResponseHandler;
pub use sink::rejection_log::RejectionLogSinkResponseHandler;
