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

use crate::couchbase::event::Event;
use crate::sink::action::Action;
use std::sync::Arc;

/// Turns one source event into zero or more sink actions. Returning an
/// empty vector acknowledges the event with no downstream effect.
pub type Mapper = Arc<dyn Fn(&Event) -> Vec<Action> + Send + Sync>;

/// Mirrors the source document one-to-one: mutations index the whole
/// value, deletions and expirations delete by key.
pub fn default_mapper(event: &Event) -> Vec<Action> {
    if event.is_mutated {
        vec![Action::index(event.key.clone(), event.value.clone())]
    } else {
        vec![Action::delete(event.key.clone())]
    }
}
