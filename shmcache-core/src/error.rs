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

use thiserror::Error;

/// Failures touching one [`crate::segment::Segment`]: its shared memory
/// mapping, its embedded semaphores, or the rendezvous protocol run over
/// it.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("segment name {name:?} does not fit in the wire format (max {max} bytes incl. NUL)")]
    NameTooLong { name: String, max: usize },

    #[error("creating shared memory object {name:?}: {source}")]
    ShmOpen { name: String, #[source] source: nix::Error },

    #[error("opening shared memory object {name:?}: {source}")]
    ShmAttach { name: String, #[source] source: nix::Error },

    #[error("sizing shared memory object {name:?} to {size} bytes: {source}")]
    Resize { name: String, size: u64, #[source] source: std::io::Error },

    #[error("mapping shared memory object {name:?}: {source}")]
    Mmap { name: String, #[source] source: std::io::Error },

    #[error("{op} semaphore on segment {name:?}: {source}")]
    Sem { name: String, op: &'static str, #[source] source: std::io::Error },

    #[error("unlinking shared memory object {name:?}: {source}")]
    ShmUnlink { name: String, #[source] source: nix::Error },
}

/// Failures creating or operating the segment pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("creating segment {index}: {source}")]
    Create { index: usize, #[source] source: SegmentError },
}

/// Failures touching the request channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("opening request queue {name:?}: {source}")]
    Open { name: String, #[source] source: nix::Error },

    #[error("encoding request record: {source}")]
    Encode {
        #[source]
        source: shmcache_protocol::RecordError,
    },

    #[error("decoding request record: {source}")]
    Decode {
        #[source]
        source: shmcache_protocol::RecordError,
    },

    #[error("sending on request queue: {source}")]
    Send { #[source] source: nix::Error },

    #[error("receiving from request queue: {source}")]
    Receive { #[source] source: nix::Error },

    #[error("received record is {got} bytes, expected exactly {want}")]
    SizeMismatch { got: usize, want: usize },
}
