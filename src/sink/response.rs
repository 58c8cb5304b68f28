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

use serde_json::Value;
use std::collections::HashMap;

/// Per-item failures extracted from one bulk response: the map is keyed by
/// `id:index[:routing]` and the summary joins every failed item line.
pub(crate) struct BulkItemErrors {
    pub items: HashMap<String, String>,
    pub summary: String,
}

/// Parses a bulk response body. Returns `None` when the response reports no
/// errors. Malformed items are skipped: a corrupt response must not take
/// the pipeline down.
pub(crate) fn find_response_errors(
    body: &str,
) -> Result<Option<BulkItemErrors>, serde_json::Error> {
    let value: Value = serde_json::from_str(body)?;
    if !value.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(None);
    }
    let Some(items) = value.get("items").and_then(Value::as_array) else {
        return Ok(None);
    };

    let mut failed = HashMap::new();
    let mut summary = String::from("bulk request has item errors:\n");
    for item in items {
        let Some(wrapper) = item.as_object() else {
            continue;
        };
        for fields in wrapper.values() {
            let Some(fields) = fields.as_object() else {
                continue;
            };
            if fields.get("error").map(Value::is_null).unwrap_or(true) {
                continue;
            }
            let (Some(id), Some(index)) = (
                fields.get("_id").and_then(Value::as_str),
                fields.get("_index").and_then(Value::as_str),
            ) else {
                continue;
            };
            let key = match fields.get("routing").and_then(Value::as_str) {
                Some(routing) if !routing.is_empty() => format!("{id}:{index}:{routing}"),
                _ => format!("{id}:{index}"),
            };
            let line = item.to_string();
            summary.push_str(&line);
            summary.push('\n');
            failed.insert(key, line);
        }
    }

    Ok(Some(BulkItemErrors {
        items: failed,
        summary,
    }))
}
