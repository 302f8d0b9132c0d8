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

//! The proxy's fixed-size pool of transfer segments: a mutex-protected
//! FIFO of idle segments, with waiters blocking on a condition variable
//! until one is released.

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

use nix::sys::mman;

use crate::error::PoolError;
use crate::segment::Segment;

/// Owns every segment's shared memory object for the lifetime of the
/// proxy process. Segments are handed out via [`Pool::acquire`] as
/// [`Lease`] guards, which return them to the idle queue automatically
/// on drop — there's no separate manual `release` call to forget.
pub struct Pool {
    idle: Mutex<VecDeque<Segment>>,
    cond: Condvar,
    total: usize,
    /// Every segment name this pool created, regardless of whether it's
    /// currently idle or leased out. Lets a shutdown handler unlink the
    /// whole pool's shared memory objects without needing every lease
    /// back first (see `shmcache-proxy::signals`).
    names: Vec<String>,
}

impl Pool {
    /// Creates `count` segments, each `/shm_<proxy_pid>_<i>`, sized to
    /// hold `segsize` bytes of payload. If any creation past the first
    /// fails, every segment already created is unlinked before
    /// returning the error — a half-built pool is not left behind.
    pub fn create(proxy_pid: u32, count: usize, segsize: usize) -> Result<Pool, PoolError> {
        let mut segments = Vec::with_capacity(count);
        let mut names = Vec::with_capacity(count);
        for index in 0..count {
            let name = shmcache_protocol::segment_name(proxy_pid, index);
            match Segment::create(&name, segsize) {
                Ok(segment) => {
                    names.push(name);
                    segments.push(segment);
                }
                Err(source) => {
                    for mut segment in segments {
                        let _ = segment.unlink();
                    }
                    return Err(PoolError::Create { index, source });
                }
            }
        }
        Ok(Pool { idle: Mutex::new(segments.into()), cond: Condvar::new(), total: count, names })
    }

    /// Every segment name this pool created, idle or leased.
    pub fn segment_names(&self) -> &[String] {
        &self.names
    }

    /// Blocks until a segment is idle, then removes it from the queue
    /// and hands it out wrapped in a [`Lease`].
    pub fn acquire(&self) -> Lease<'_> {
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        loop {
            if let Some(segment) = idle.pop_front() {
                return Lease { pool: self, segment: Some(segment) };
            }
            idle = self.cond.wait(idle).expect("pool mutex poisoned");
        }
    }

    /// Number of segments currently idle. Exposed for metrics/tests,
    /// not for flow control — use [`Pool::acquire`] for that.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().expect("pool mutex poisoned").len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn release(&self, mut segment: Segment) {
        if let Err(error) = segment.reset() {
            // A segment that can't be reset can't be trusted to serve
            // another request safely; drop it from the pool rather than
            // requeue something possibly wedged. The pool shrinks by
            // one instead of risking a stuck consumer on the next
            // acquire.
            tracing::error!(segment = segment.name(), %error, "dropping segment that failed to reset");
            return;
        }
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        idle.push_back(segment);
        drop(idle);
        self.cond.notify_one();
    }

    /// Tears the whole pool down: every currently idle segment is fully
    /// unlinked, semaphores and all, via [`Segment::unlink`]. A segment
    /// still out on lease at shutdown can't have its semaphores
    /// destroyed safely — the cache worker holding it may still be
    /// waiting or posting on them — so its name is unlinked from the
    /// filesystem namespace only, the same way [`Segment::create`]'s
    /// teardown path does for a partially initialized segment.
    pub fn destroy(&self) {
        let idle = {
            let mut idle = self.idle.lock().expect("pool mutex poisoned");
            std::mem::take(&mut *idle)
        };

        let mut torn_down: HashSet<String> = HashSet::with_capacity(idle.len());
        for mut segment in idle {
            torn_down.insert(segment.name().to_string());
            if let Err(error) = segment.unlink() {
                tracing::warn!(segment = segment.name(), %error, "unlinking segment during pool teardown");
            }
        }

        for name in &self.names {
            if torn_down.contains(name) {
                continue;
            }
            if let Err(error) = mman::shm_unlink(name.as_str()) {
                tracing::warn!(segment = name, %error, "unlinking leased-out segment during pool teardown");
            }
        }
    }
}

/// An acquired segment. Returns itself to the pool's idle queue on
/// drop, on every exit path including panics unwinding through a
/// worker thread, so a segment can never leak out of circulation.
pub struct Lease<'p> {
    pool: &'p Pool,
    segment: Option<Segment>,
}

impl<'p> std::ops::Deref for Lease<'p> {
    type Target = Segment;
    fn deref(&self) -> &Segment {
        self.segment.as_ref().expect("segment taken only on drop")
    }
}

impl<'p> std::ops::DerefMut for Lease<'p> {
    fn deref_mut(&mut self) -> &mut Segment {
        self.segment.as_mut().expect("segment taken only on drop")
    }
}

impl<'p> Drop for Lease<'p> {
    fn drop(&mut self) {
        if let Some(segment) = self.segment.take() {
            self.pool.release(segment);
        }
    }
}
