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

use crate::common::client::ElasticClient;
use crate::common::error::{ConnectorError, ConnectorResult};
use crate::config::Config;
use crate::sink::action::Action;
use crate::sink::handler::SinkResponseHandler;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Sink response handler that persists every failed item as a document in a
/// dedicated rejection index. Losing a rejection record would silently lose
/// data, so any failure here is fatal.
#[derive(Default)]
pub struct RejectionLogSinkResponseHandler {
    state: Mutex<Option<RejectionLogState>>,
}

struct RejectionLogState {
    client: Arc<dyn ElasticClient>,
    index: String,
    include_source: bool,
}

#[derive(Serialize)]
struct RejectionLog<'a> {
    index: &'a str,
    action: &'a str,
    document_id: String,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

impl RejectionLogSinkResponseHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> ConnectorResult<(Arc<dyn ElasticClient>, String, bool)> {
        let guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(state) => Ok((state.client.clone(), state.index.clone(), state.include_source)),
            None => Err(ConnectorError::RejectionLog(
                "handler used before on_init".to_string(),
            )),
        }
    }
}

#[async_trait]
impl SinkResponseHandler for RejectionLogSinkResponseHandler {
    async fn on_init(
        &self,
        config: &Arc<Config>,
        client: &Arc<dyn ElasticClient>,
    ) -> ConnectorResult<()> {
        let index = config.elasticsearch.rejection_log.index().to_string();

        if !client.index_exists(&index).await? {
            info!("rejection log index {index} does not exist, creating it");
            client.create_index(&index).await?;
        }

        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(RejectionLogState {
            client: client.clone(),
            index,
            include_source: config.elasticsearch.rejection_log.include_source,
        });
        Ok(())
    }

    async fn on_success(&self, _action: &Action) -> ConnectorResult<()> {
        Ok(())
    }

    async fn on_error(&self, action: &Action, error: &str) -> ConnectorResult<()> {
        let (client, index, include_source) = self.state()?;

        let record = RejectionLog {
            index: action.index_name.as_deref().unwrap_or_default(),
            action: action.action_type.as_str(),
            document_id: String::from_utf8_lossy(&action.id).into_owned(),
            error,
            source: include_source.then(|| {
                String::from_utf8_lossy(action.source.as_deref().unwrap_or_default()).into_owned()
            }),
        };
        let body = serde_json::to_vec(&record).map_err(|err| {
            ConnectorError::RejectionLog(format!("could not serialize rejection log: {err}"))
        })?;

        client
            .index_document(&index, Bytes::from(body))
            .await
            .map_err(|err| {
                ConnectorError::RejectionLog(format!("could not write rejection log: {err}"))
            })
    }
}
