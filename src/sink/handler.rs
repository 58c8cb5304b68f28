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
use crate::common::error::ConnectorResult;
use crate::config::Config;
use crate::sink::action::Action;
use async_trait::async_trait;
use std::sync::Arc;

/// Per-item result callbacks around bulk dispatch.
///
/// Registering a handler changes the failure policy: dispatch errors are no
/// longer fail-stop but are reported here per item, and the checkpoint
/// advances once the flush completes. The handler owns durability for
/// failed items (log, dead-letter, re-enqueue). Errors returned from any
/// callback are fatal to the connector.
#[async_trait]
pub trait SinkResponseHandler: Send + Sync {
    async fn on_init(
        &self,
        _config: &Arc<Config>,
        _client: &Arc<dyn ElasticClient>,
    ) -> ConnectorResult<()> {
        Ok(())
    }

    async fn on_success(&self, action: &Action) -> ConnectorResult<()>;

    async fn on_error(&self, action: &Action, error: &str) -> ConnectorResult<()>;

    async fn on_before_bulk(&self) {}

    async fn on_after_bulk(&self) {}
}
