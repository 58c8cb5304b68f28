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
use chrono::{DateTime, Utc};

/// The mapper-facing view of a single document change.
///
/// Exactly one of `is_mutated`, `is_deleted` and `is_expired` is set,
/// depending on the DCP event the connector received.
#[derive(Debug, Clone)]
pub struct Event {
    pub collection_name: String,
    pub event_time: DateTime<Utc>,
    pub key: Bytes,
    pub value: Bytes,
    pub cas: u64,
    pub vb_id: u16,
    pub seq_no: u64,
    pub rev_no: u64,
    pub is_deleted: bool,
    pub is_expired: bool,
    pub is_mutated: bool,
}

impl Event {
    #[allow(clippy::too_many_arguments)]
    pub fn mutation(
        key: Bytes,
        value: Bytes,
        collection_name: String,
        cas: u64,
        event_time: DateTime<Utc>,
        vb_id: u16,
        seq_no: u64,
        rev_no: u64,
    ) -> Self {
        Self {
            collection_name,
            event_time,
            key,
            value,
            cas,
            vb_id,
            seq_no,
            rev_no,
            is_deleted: false,
            is_expired: false,
            is_mutated: true,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn deletion(
        key: Bytes,
        collection_name: String,
        cas: u64,
        event_time: DateTime<Utc>,
        vb_id: u16,
        seq_no: u64,
        rev_no: u64,
    ) -> Self {
        Self {
            collection_name,
            event_time,
            key,
            value: Bytes::new(),
            cas,
            vb_id,
            seq_no,
            rev_no,
            is_deleted: true,
            is_expired: false,
            is_mutated: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn expiration(
        key: Bytes,
        collection_name: String,
        cas: u64,
        event_time: DateTime<Utc>,
        vb_id: u16,
        seq_no: u64,
        rev_no: u64,
    ) -> Self {
        Self {
            collection_name,
            event_time,
            key,
            value: Bytes::new(),
            cas,
            vb_id,
            seq_no,
            rev_no,
            is_deleted: false,
            is_expired: true,
            is_mutated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_constructors_should_set_exactly_one_flag() {
        let now = Utc::now();
        let mutation = Event::mutation(
            Bytes::from_static(b"key"),
            Bytes::from_static(b"{}"),
            "_default".to_string(),
            1,
            now,
            0,
            1,
            1,
        );
        assert!(mutation.is_mutated && !mutation.is_deleted && !mutation.is_expired);

        let deletion = Event::deletion(Bytes::from_static(b"key"), "_default".to_string(), 1, now, 0, 2, 1);
        assert!(deletion.is_deleted && !deletion.is_mutated && !deletion.is_expired);
        assert!(deletion.value.is_empty());

        let expiration =
            Event::expiration(Bytes::from_static(b"key"), "_default".to_string(), 1, now, 0, 3, 1);
        assert!(expiration.is_expired && !expiration.is_mutated && !expiration.is_deleted);
    }
}
