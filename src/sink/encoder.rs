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

use crate::sink::action::{Action, ActionType};
use bytes::{BufMut, BytesMut};

const INDEX_PREFIX: &[u8] = b"{\"index\":{\"_index\":\"";
const DELETE_PREFIX: &[u8] = b"{\"delete\":{\"_index\":\"";
const UPDATE_PREFIX: &[u8] = b"{\"update\":{\"_index\":\"";
const ID_PREFIX: &[u8] = b"\",\"_id\":\"";
const ROUTING_PREFIX: &[u8] = b"\",\"routing\":\"";
const TYPE_PREFIX: &[u8] = b"\",\"_type\":\"";
const META_SUFFIX: &[u8] = b"\"}}";
const DOC_PREFIX: &[u8] = b"{\"doc\":";
const DOC_SUFFIX: &[u8] = b", \"doc_as_upsert\":true}";
const SCRIPT_PREFIX: &[u8] = b"{\"script\":";
const SCRIPT_SUFFIX: &[u8] = b",\"scripted_upsert\":true}";

/// Appends the `_bulk` NDJSON fragment for one action: the meta line, the
/// body line when the operation carries one, and a trailing newline.
pub(crate) fn encode_action(
    buf: &mut BytesMut,
    action: &Action,
    index_name: &str,
    type_name: Option<&str>,
) {
    match action.action_type {
        ActionType::Index => buf.extend_from_slice(INDEX_PREFIX),
        ActionType::DocUpdate | ActionType::ScriptUpdate => buf.extend_from_slice(UPDATE_PREFIX),
        ActionType::Delete => buf.extend_from_slice(DELETE_PREFIX),
    }

    buf.extend_from_slice(index_name.as_bytes());
    buf.extend_from_slice(ID_PREFIX);
    append_escaped_id(buf, &action.id);
    if let Some(routing) = &action.routing {
        buf.extend_from_slice(ROUTING_PREFIX);
        buf.extend_from_slice(routing.as_bytes());
    }
    if let Some(type_name) = type_name {
        buf.extend_from_slice(TYPE_PREFIX);
        buf.extend_from_slice(type_name.as_bytes());
    }
    buf.extend_from_slice(META_SUFFIX);

    let source = action.source.as_deref().unwrap_or_default();
    match action.action_type {
        ActionType::Index => {
            buf.put_u8(b'\n');
            buf.extend_from_slice(source);
        }
        ActionType::DocUpdate => {
            buf.put_u8(b'\n');
            buf.extend_from_slice(DOC_PREFIX);
            buf.extend_from_slice(source);
            buf.extend_from_slice(DOC_SUFFIX);
        }
        ActionType::ScriptUpdate => {
            buf.put_u8(b'\n');
            buf.extend_from_slice(SCRIPT_PREFIX);
            buf.extend_from_slice(source);
            buf.extend_from_slice(SCRIPT_SUFFIX);
        }
        ActionType::Delete => {}
    }
    buf.put_u8(b'\n');
}

/// Document ids come from the source protocol and are JSON-safe except for
/// raw `"` bytes, which get a backslash prefix.
fn append_escaped_id(buf: &mut BytesMut, id: &[u8]) {
    for &byte in id {
        if byte == b'"' {
            buf.put_u8(b'\\');
        }
        buf.put_u8(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_INDEX: &str = "test-index";
    const TEST_DOC: &str = "{\"name\":\"test\"}";

    fn encode(action: &Action, type_name: Option<&str>) -> String {
        let mut buf = BytesMut::new();
        encode_action(&mut buf, action, TEST_INDEX, type_name);
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn given_index_action_should_emit_meta_and_body() {
        let action = Action::index("123", TEST_DOC);
        assert_eq!(
            encode(&action, None),
            format!("{{\"index\":{{\"_index\":\"{TEST_INDEX}\",\"_id\":\"123\"}}}}\n{TEST_DOC}\n")
        );
    }

    #[test]
    fn given_routing_should_include_it_in_meta() {
        let action = Action::index("123", TEST_DOC).with_routing("shard-1");
        assert_eq!(
            encode(&action, None),
            format!(
                "{{\"index\":{{\"_index\":\"{TEST_INDEX}\",\"_id\":\"123\",\"routing\":\"shard-1\"}}}}\n{TEST_DOC}\n"
            )
        );
    }

    #[test]
    fn given_type_name_should_include_it_in_meta() {
        let action = Action::index("123", TEST_DOC);
        assert_eq!(
            encode(&action, Some("_doc")),
            format!(
                "{{\"index\":{{\"_index\":\"{TEST_INDEX}\",\"_id\":\"123\",\"_type\":\"_doc\"}}}}\n{TEST_DOC}\n"
            )
        );
    }

    #[test]
    fn given_delete_action_should_emit_single_line() {
        let action = Action::delete("123");
        assert_eq!(
            encode(&action, None),
            format!("{{\"delete\":{{\"_index\":\"{TEST_INDEX}\",\"_id\":\"123\"}}}}\n")
        );
    }

    #[test]
    fn given_doc_update_should_wrap_source_as_upsert() {
        let action = Action::doc_update("123", "{\"name\":\"updated\"}");
        assert_eq!(
            encode(&action, None),
            format!(
                "{{\"update\":{{\"_index\":\"{TEST_INDEX}\",\"_id\":\"123\"}}}}\n{{\"doc\":{{\"name\":\"updated\"}}, \"doc_as_upsert\":true}}\n"
            )
        );
    }

    #[test]
    fn given_script_update_should_wrap_source_as_scripted_upsert() {
        let script = "{\"source\":\"ctx._source.counter += params.count\",\"lang\":\"painless\",\"params\":{\"count\":4}}";
        let action = Action::script_update("123", script);
        assert_eq!(
            encode(&action, None),
            format!(
                "{{\"update\":{{\"_index\":\"{TEST_INDEX}\",\"_id\":\"123\"}}}}\n{{\"script\":{script},\"scripted_upsert\":true}}\n"
            )
        );
    }

    #[test]
    fn given_quote_in_id_should_escape_it() {
        let action = Action::index("a\"b", "{}");
        let encoded = encode(&action, None);
        assert!(encoded.contains("\"_id\":\"a\\\"b\""), "got: {encoded}");
    }

    #[test]
    fn given_identical_actions_should_encode_identically() {
        let first = encode(&Action::index("1", TEST_DOC).with_routing("r"), Some("_doc"));
        let second = encode(&Action::index("1", TEST_DOC).with_routing("r"), Some("_doc"));
        assert_eq!(first, second);
    }
}
