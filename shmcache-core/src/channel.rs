// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The bounded POSIX message queue carrying fixed-size
//! [`RequestRecord`]s from proxy workers to cache workers.

use nix::mqueue::{self, MqAttr, MqdT, MQ_OFlag};
use nix::sys::stat::Mode;

use shmcache_protocol::{RequestRecord, REQUEST_QUEUE_DEPTH, REQUEST_QUEUE_NAME};

use crate::error::ChannelError;

/// One end of the request queue. Created by the cache daemon
/// ([`RequestChannel::create`]), opened for writing by the proxy
/// ([`RequestChannel::open`]).
pub struct RequestChannel {
    mqd: MqdT,
    owner: bool,
}

impl RequestChannel {
    /// Cache daemon side. Unlinks any queue left behind by a previous,
    /// uncleanly-terminated run before creating a fresh one, so a stale
    /// `msgsize` from an older binary can't wedge the new one.
    pub fn create() -> Result<RequestChannel, ChannelError> {
        match mqueue::mq_unlink(REQUEST_QUEUE_NAME) {
            Ok(()) | Err(nix::errno::Errno::ENOENT) => {}
            Err(source) => {
                return Err(ChannelError::Open { name: REQUEST_QUEUE_NAME.to_string(), source })
            }
        }

        let attr = MqAttr::new(0, REQUEST_QUEUE_DEPTH, RequestRecord::WIRE_SIZE as i64, 0);
        let mqd = mqueue::mq_open(
            REQUEST_QUEUE_NAME,
            MQ_OFlag::O_CREAT | MQ_OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
            Some(&attr),
        )
        .map_err(|source| ChannelError::Open { name: REQUEST_QUEUE_NAME.to_string(), source })?;

        Ok(RequestChannel { mqd, owner: true })
    }

    /// Proxy side: opens the queue the cache daemon already created.
    /// Fails if the daemon hasn't started yet.
    pub fn open() -> Result<RequestChannel, ChannelError> {
        let mqd = mqueue::mq_open(REQUEST_QUEUE_NAME, MQ_OFlag::O_WRONLY, Mode::empty(), None)
            .map_err(|source| ChannelError::Open { name: REQUEST_QUEUE_NAME.to_string(), source })?;
        Ok(RequestChannel { mqd, owner: false })
    }

    /// Blocks until the queue has room, then enqueues `record`.
    pub fn send(&self, record: &RequestRecord) -> Result<(), ChannelError> {
        let bytes = record.to_bytes().map_err(|source| ChannelError::Encode { source })?;
        mqueue::mq_send(&self.mqd, &bytes, 0).map_err(|source| ChannelError::Send { source })
    }

    /// Blocks until a record is available, then dequeues and decodes
    /// it.
    pub fn receive(&self) -> Result<RequestRecord, ChannelError> {
        let mut buf = vec![0u8; RequestRecord::WIRE_SIZE];
        let mut priority = 0u32;
        let received = mqueue::mq_receive(&self.mqd, &mut buf, &mut priority)
            .map_err(|source| ChannelError::Receive { source })?;
        if received != RequestRecord::WIRE_SIZE {
            return Err(ChannelError::SizeMismatch {
                got: received,
                want: RequestRecord::WIRE_SIZE,
            });
        }
        RequestRecord::from_bytes(&buf).map_err(|source| ChannelError::Decode { source })
    }
}

impl Drop for RequestChannel {
    fn drop(&mut self) {
        if self.owner {
            if let Err(error) = mqueue::mq_unlink(REQUEST_QUEUE_NAME) {
                tracing::warn!(%error, "unlinking request queue");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // The request queue name is a single global path, so these tests
    // share it and must run serially; `cargo test` runs a crate's unit
    // tests single-threaded by default only when `--test-threads=1` is
    // passed, so we serialize by hand with a process-wide lock.
    static QUEUE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn round_trip_through_the_queue() {
        let _guard = QUEUE_LOCK.lock().unwrap();
        let daemon_side = RequestChannel::create().expect("create queue");
        let proxy_side = RequestChannel::open().expect("open queue");

        let record = RequestRecord::new("/a/b.txt", "/shm_1_0", 4096).expect("build record");
        proxy_side.send(&record).expect("send");
        let received = daemon_side.receive().expect("receive");
        assert_eq!(record, received);
    }
}
