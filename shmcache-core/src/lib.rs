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

//! Shared memory IPC and flow control between `proxy` and
//! `simplecached`.
//!
//! A [`pool::Pool`] owns a fixed set of [`segment::Segment`]s. The
//! proxy acquires one per request, hands its name to the cache daemon
//! over a [`channel::RequestChannel`], and the two sides run the
//! [`rendezvous`] handshake over the shared mapping until the daemon
//! signals EOF.

mod channel;
mod error;
mod pool;
mod rendezvous;
mod sem;
mod segment;

pub use channel::RequestChannel;
pub use error::{ChannelError, PoolError, SegmentError};
pub use pool::{Lease, Pool};
pub use rendezvous::{Frame, Header};
pub use segment::Segment;
