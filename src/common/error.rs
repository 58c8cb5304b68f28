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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("could not parse config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("elasticsearch transport error: {0}")]
    Transport(#[from] elasticsearch::Error),

    #[error("bulk request failed with status {status}: {body}")]
    BulkRequest { status: u16, body: String },

    #[error("index request failed with status {status}: {body}")]
    IndexRequest { status: u16, body: String },

    #[error("bulk response could not be parsed: {0}")]
    InvalidBulkResponse(#[from] serde_json::Error),

    #[error("{0}")]
    ItemFailures(String),

    #[error("rejection log failure: {0}")]
    RejectionLog(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;
