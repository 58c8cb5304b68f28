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

use crate::common::error::{ConnectorError, ConnectorResult};
use crate::config::ElasticsearchConfig;
use async_trait::async_trait;
use bytes::Bytes;
use elasticsearch::auth::Credentials;
use elasticsearch::http::headers::{HeaderName, HeaderValue};
use elasticsearch::http::transport::{MultiNodeConnectionPool, TransportBuilder};
use elasticsearch::http::Url;
use elasticsearch::indices::{IndicesCreateParts, IndicesExistsParts};
use elasticsearch::{BulkParts, Elasticsearch, IndexParts};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// The slice of the Elasticsearch API the connector talks to.
///
/// The default implementation wraps the official client; tests inject their
/// own implementation instead of a live cluster.
#[async_trait]
pub trait ElasticClient: Send + Sync {
    /// Sends a raw NDJSON `_bulk` body and returns the response body on 2xx.
    async fn bulk(&self, body: Bytes) -> ConnectorResult<String>;

    async fn index_exists(&self, index: &str) -> ConnectorResult<bool>;

    async fn create_index(&self, index: &str) -> ConnectorResult<()>;

    /// Indexes a single document with an auto-generated id.
    async fn index_document(&self, index: &str, body: Bytes) -> ConnectorResult<()>;
}

pub struct DefaultElasticClient {
    client: Elasticsearch,
    compression_enabled: bool,
}

impl DefaultElasticClient {
    pub fn new(config: &ElasticsearchConfig) -> ConnectorResult<Self> {
        let mut urls = Vec::with_capacity(config.urls.len());
        for raw in &config.urls {
            let url = Url::parse(raw).map_err(|err| {
                ConnectorError::Configuration(format!("invalid elasticsearch url {raw}: {err}"))
            })?;
            urls.push(url);
        }

        let mut builder = TransportBuilder::new(MultiNodeConnectionPool::round_robin(urls, None));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.auth(Credentials::Basic(username.clone(), password.clone()));
        }
        let transport = builder.build().map_err(|err| {
            ConnectorError::Configuration(format!("failed to build elasticsearch transport: {err}"))
        })?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            compression_enabled: config.compression_enabled,
        })
    }

    fn compress(body: &[u8]) -> ConnectorResult<Bytes> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 3), Compression::default());
        encoder.write_all(body)?;
        Ok(Bytes::from(encoder.finish()?))
    }
}

#[async_trait]
impl ElasticClient for DefaultElasticClient {
    async fn bulk(&self, body: Bytes) -> ConnectorResult<String> {
        let mut request = self.client.bulk(BulkParts::None);
        let payload = if self.compression_enabled {
            request = request.header(
                HeaderName::from_static("content-encoding"),
                HeaderValue::from_static("gzip"),
            );
            Self::compress(&body)?
        } else {
            body
        };

        let response = request.body(vec![payload]).send().await?;
        let status = response.status_code();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ConnectorError::BulkRequest {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    async fn index_exists(&self, index: &str) -> ConnectorResult<bool> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await?;
        Ok(response.status_code().as_u16() != 404)
    }

    async fn create_index(&self, index: &str) -> ConnectorResult<()> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .send()
            .await?;
        let status = response.status_code();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ConnectorError::IndexRequest {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn index_document(&self, index: &str, body: Bytes) -> ConnectorResult<()> {
        let raw_body = serde_json::value::RawValue::from_string(
            String::from_utf8_lossy(&body).into_owned(),
        )?;
        let response = self
            .client
            .index(IndexParts::Index(index))
            .body(raw_body)
            .send()
            .await?;
        let status = response.status_code();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ConnectorError::IndexRequest {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// True when the error is the transient end-of-stream failure the dispatcher
/// is allowed to retry. All other transport errors are terminal.
pub(crate) fn is_unexpected_eof(error: &ConnectorError) -> bool {
    match error {
        ConnectorError::Transport(err) => source_chain_has_unexpected_eof(err),
        ConnectorError::Io(err) => err.kind() == std::io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}

fn source_chain_has_unexpected_eof(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        current = err.source();
    }
    false
}
