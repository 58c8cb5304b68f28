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

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionType {
    Index,
    Delete,
    DocUpdate,
    ScriptUpdate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Index => "Index",
            ActionType::Delete => "Delete",
            ActionType::DocUpdate => "DocUpdate",
            ActionType::ScriptUpdate => "ScriptUpdate",
        }
    }
}

/// One Elasticsearch operation emitted by the mapper.
///
/// When `index_name` is unset the batch accumulator resolves it from the
/// configured collection-index mapping.
#[derive(Debug, Clone)]
pub struct Action {
    pub id: Bytes,
    pub action_type: ActionType,
    pub index_name: Option<String>,
    pub routing: Option<String>,
    pub source: Option<Bytes>,
}

impl Action {
    pub fn index(id: impl Into<Bytes>, source: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            action_type: ActionType::Index,
            index_name: None,
            routing: None,
            source: Some(source.into()),
        }
    }

    pub fn delete(id: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            action_type: ActionType::Delete,
            index_name: None,
            routing: None,
            source: None,
        }
    }

    /// Partial update; `source` is the partial document body, applied with
    /// `doc_as_upsert`.
    pub fn doc_update(id: impl Into<Bytes>, source: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            action_type: ActionType::DocUpdate,
            index_name: None,
            routing: None,
            source: Some(source.into()),
        }
    }

    /// Partial update of a single field: the source is wrapped as
    /// `{"<field>":<source>}` before being applied.
    pub fn doc_update_field(id: impl Into<Bytes>, field: &str, source: &[u8]) -> Self {
        let mut wrapped = Vec::with_capacity(field.len() + source.len() + 4);
        wrapped.push(b'{');
        wrapped.push(b'"');
        wrapped.extend_from_slice(field.as_bytes());
        wrapped.extend_from_slice(b"\":");
        wrapped.extend_from_slice(source);
        wrapped.push(b'}');
        Self {
            id: id.into(),
            action_type: ActionType::DocUpdate,
            index_name: None,
            routing: None,
            source: Some(Bytes::from(wrapped)),
        }
    }

    /// Scripted update; `script` is a painless script object, applied with
    /// `scripted_upsert`.
    pub fn script_update(id: impl Into<Bytes>, script: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            action_type: ActionType::ScriptUpdate,
            index_name: None,
            routing: None,
            source: Some(script.into()),
        }
    }

    pub fn with_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_constructors_should_set_action_type_and_payload() {
        let index = Action::index("1", "{\"v\":1}");
        assert_eq!(index.action_type, ActionType::Index);
        assert_eq!(index.source.as_deref(), Some(b"{\"v\":1}" as &[u8]));

        let delete = Action::delete("1");
        assert_eq!(delete.action_type, ActionType::Delete);
        assert!(delete.source.is_none());
    }

    #[test]
    fn given_doc_update_field_should_wrap_source() {
        let action = Action::doc_update_field("1", "details", b"{\"stock\":3}");
        assert_eq!(
            action.source.as_deref(),
            Some(b"{\"details\":{\"stock\":3}}" as &[u8])
        );
    }

    #[test]
    fn given_builder_methods_should_attach_index_and_routing() {
        let action = Action::delete("k").with_index("idx1").with_routing("shard-1");
        assert_eq!(action.index_name.as_deref(), Some("idx1"));
        assert_eq!(action.routing.as_deref(), Some("shard-1"));
    }
}
