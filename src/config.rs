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
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const DEFAULT_BATCH_SIZE_LIMIT: usize = 1000;
const DEFAULT_BATCH_BYTE_SIZE_LIMIT: &str = "10mb";
const DEFAULT_BATCH_TICKER_DURATION: &str = "10s";
const DEFAULT_CONCURRENT_REQUEST: usize = 1;
const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_REJECTION_LOG_INDEX: &str = "cbes-rejects";

/// Byte quantity given either as a raw number of bytes or as a human
/// readable string such as `"10mb"`. Normalised to bytes once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteSize {
    Bytes(u64),
    Human(String),
}

impl ByteSize {
    pub fn as_bytes(&self) -> ConnectorResult<usize> {
        match self {
            ByteSize::Bytes(value) => Ok(*value as usize),
            ByteSize::Human(value) => parse_human_bytes(value),
        }
    }
}

fn parse_human_bytes(raw: &str) -> ConnectorResult<usize> {
    let normalized = raw.trim().to_ascii_lowercase();
    let split = normalized
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(normalized.len());
    let (digits, suffix) = normalized.split_at(split);
    let value: usize = digits.parse().map_err(|_| {
        ConnectorError::Configuration(format!("invalid byte size value: {raw}"))
    })?;
    let multiplier = match suffix.trim() {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => {
            return Err(ConnectorError::Configuration(format!(
                "invalid byte size unit: {raw}"
            )))
        }
    };
    Ok(value * multiplier)
}

fn parse_duration(raw: &str, option: &str) -> ConnectorResult<Duration> {
    raw.parse::<humantime::Duration>()
        .map(Into::into)
        .map_err(|err| {
            ConnectorError::Configuration(format!("invalid {option} duration {raw}: {err}"))
        })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RejectionLogConfig {
    pub index: Option<String>,
    pub include_source: bool,
}

impl RejectionLogConfig {
    pub fn index(&self) -> &str {
        match self.index.as_deref() {
            Some(index) if !index.is_empty() => index,
            _ => DEFAULT_REJECTION_LOG_INDEX,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElasticsearchConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub collection_index_mapping: HashMap<String, String>,
    pub type_name: Option<String>,
    pub batch_size_limit: Option<usize>,
    pub batch_byte_size_limit: Option<ByteSize>,
    pub batch_ticker_duration: Option<String>,
    pub batch_commit_ticker_duration: Option<String>,
    pub concurrent_request: Option<usize>,
    pub max_retries: Option<u32>,
    pub compression_enabled: bool,
    pub rejection_log: RejectionLogConfig,
}

impl ElasticsearchConfig {
    pub fn batch_size_limit(&self) -> usize {
        self.batch_size_limit.unwrap_or(DEFAULT_BATCH_SIZE_LIMIT)
    }

    pub fn batch_byte_size_limit(&self) -> ConnectorResult<usize> {
        match &self.batch_byte_size_limit {
            Some(limit) => limit.as_bytes(),
            None => parse_human_bytes(DEFAULT_BATCH_BYTE_SIZE_LIMIT),
        }
    }

    pub fn batch_ticker_duration(&self) -> ConnectorResult<Duration> {
        parse_duration(
            self.batch_ticker_duration
                .as_deref()
                .unwrap_or(DEFAULT_BATCH_TICKER_DURATION),
            "batchTickerDuration",
        )
    }

    pub fn batch_commit_ticker_duration(&self) -> ConnectorResult<Option<Duration>> {
        match self.batch_commit_ticker_duration.as_deref() {
            Some(raw) => parse_duration(raw, "batchCommitTickerDuration").map(Some),
            None => Ok(None),
        }
    }

    pub fn concurrent_request(&self) -> usize {
        self.concurrent_request
            .unwrap_or(DEFAULT_CONCURRENT_REQUEST)
            .max(1)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    /// A `typeName` only takes effect when it is non-empty.
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref().filter(|name| !name.is_empty())
    }
}

/// Passthrough configuration for the embedded DCP source client, flattened
/// into the top level of the YAML document. Keys this crate does not model
/// are preserved in `extra` for the source implementation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DcpConfig {
    pub hosts: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub bucket_name: Option<String>,
    pub checkpoint: CheckpointConfig,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckpointConfig {
    #[serde(rename = "type")]
    pub checkpoint_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub elasticsearch: ElasticsearchConfig,
    #[serde(flatten)]
    pub dcp: DcpConfig,
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> ConnectorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> ConnectorResult<Self> {
        let expanded = expand_env_vars(content);
        Ok(serde_yaml::from_str(&expanded)?)
    }

    pub fn apply_defaults(&mut self) {
        let es = &mut self.elasticsearch;
        if es.batch_size_limit.is_none() {
            es.batch_size_limit = Some(DEFAULT_BATCH_SIZE_LIMIT);
        }
        if es.batch_byte_size_limit.is_none() {
            es.batch_byte_size_limit =
                Some(ByteSize::Human(DEFAULT_BATCH_BYTE_SIZE_LIMIT.to_string()));
        }
        if es.batch_ticker_duration.is_none() {
            es.batch_ticker_duration = Some(DEFAULT_BATCH_TICKER_DURATION.to_string());
        }
        if es.concurrent_request.is_none() {
            es.concurrent_request = Some(DEFAULT_CONCURRENT_REQUEST);
        }
        if es.max_retries.is_none() {
            es.max_retries = Some(DEFAULT_MAX_RETRIES);
        }
        if es.rejection_log.index.is_none() {
            es.rejection_log.index = Some(DEFAULT_REJECTION_LOG_INDEX.to_string());
        }
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        let es = &self.elasticsearch;
        if es.urls.is_empty() {
            return Err(ConnectorError::Configuration(
                "elasticsearch.urls cannot be empty".to_string(),
            ));
        }
        if es.batch_size_limit() == 0 {
            return Err(ConnectorError::Configuration(
                "elasticsearch.batchSizeLimit must be greater than 0".to_string(),
            ));
        }
        if es.batch_byte_size_limit()? == 0 {
            return Err(ConnectorError::Configuration(
                "elasticsearch.batchByteSizeLimit must be greater than 0".to_string(),
            ));
        }
        if es.max_retries() == 0 {
            return Err(ConnectorError::Configuration(
                "elasticsearch.maxRetries must be greater than 0".to_string(),
            ));
        }
        es.batch_ticker_duration()?;
        es.batch_commit_ticker_duration()?;
        Ok(())
    }
}

/// Replaces `${VAR}` occurrences with the value of the environment variable
/// when it is set; unset variables are left verbatim.
fn expand_env_vars(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(offset) => {
                let name = &rest[start + 2..start + 2 + offset];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => out.push_str(&rest[start..start + offset + 3]),
                }
                rest = &rest[start + offset + 3..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Startup echo of the effective sink configuration with the password
/// masked, so operators can spot misconfiguration in the logs.
pub(crate) fn log_effective_config(config: &Config) {
    let mut masked = config.elasticsearch.clone();
    if masked.password.is_some() {
        masked.password = Some("*****".to_string());
    }
    match serde_json::to_string(&masked) {
        Ok(json) => info!("using elasticsearch config: {json}"),
        Err(err) => info!("could not render elasticsearch config: {err}"),
    }
}
