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

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

const DEFAULT_FRAGMENT_CAPACITY: usize = 1024;

/// Free-list of reusable fragment buffers.
///
/// Fragments are acquired at encode time, handed to the dispatcher and must
/// be released after the bulk request completes. Buffers released while the
/// queue is full are simply dropped.
pub struct FragmentPool {
    buffers: ArrayQueue<BytesMut>,
    fragment_capacity: usize,
}

impl FragmentPool {
    pub fn new(slots: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(slots.max(1)),
            fragment_capacity: DEFAULT_FRAGMENT_CAPACITY,
        }
    }

    pub fn acquire(&self) -> BytesMut {
        match self.buffers.pop() {
            Some(mut buffer) => {
                buffer.clear();
                buffer
            }
            None => BytesMut::with_capacity(self.fragment_capacity),
        }
    }

    pub fn release(&self, buffer: BytesMut) {
        let _ = self.buffers.push(buffer);
    }
}
