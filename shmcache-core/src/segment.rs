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

//! The shared memory mapping backing one transfer segment: its raw
//! header layout, and the create/attach/unlink lifecycle. The
//! producer/consumer handshake run over a mapped segment lives in
//! [`crate::rendezvous`].

use std::fs::File;
use std::mem;

use memmap2::MmapMut;
use nix::fcntl::OFlag;
use nix::sys::mman;
use nix::sys::stat::Mode;

use crate::error::SegmentError;
use crate::sem;

/// Laid out identically in both processes: a fixed header followed by
/// `segsize` bytes of payload. `repr(C)` pins field order and alignment
/// to the platform ABI both `proxy` and `simplecached` are built for;
/// there is no cross-platform compatibility story beyond that.
#[repr(C)]
pub(crate) struct RawHeader {
    pub(crate) segsize: u64,
    pub(crate) file_size: u64,
    pub(crate) bytes_written: u32,
    pub(crate) status: u32,
    pub(crate) sem_w: libc::sem_t,
    pub(crate) sem_r: libc::sem_t,
}

/// One mapped transfer segment, owned either by a [`crate::pool::Pool`]
/// (the proxy side, which created the underlying shared memory object)
/// or attached ad hoc by the cache daemon to serve a single request.
pub struct Segment {
    pub(crate) name: String,
    pub(crate) segsize: usize,
    pub(crate) mmap: MmapMut,
}

impl Segment {
    /// Creates a new shared memory object named `name` sized to hold a
    /// header plus `segsize` bytes of payload, and initializes both
    /// semaphores to their starting state: `sem_w = 0` (no header or
    /// frame published yet), `sem_r = 1` (one free header slot).
    ///
    /// Fails if an object of that name already exists; segment names
    /// are namespaced by the creating proxy's pid specifically so this
    /// shouldn't happen in practice (spec.md §6).
    pub fn create(name: &str, segsize: usize) -> Result<Segment, SegmentError> {
        if name.len() + 1 > shmcache_protocol::SHM_NAME_MAX {
            return Err(SegmentError::NameTooLong {
                name: name.to_string(),
                max: shmcache_protocol::SHM_NAME_MAX,
            });
        }

        let fd = mman::shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|source| SegmentError::ShmOpen { name: name.to_string(), source })?;

        // From here on, the named shared memory object exists on the
        // system; any failure below must unlink it before returning, or
        // the name is leaked and a future create under it fails with
        // EEXIST.
        let result = (|| -> Result<Segment, SegmentError> {
            let file = File::from(fd);

            let total_size = (mem::size_of::<RawHeader>() + segsize) as u64;
            file.set_len(total_size).map_err(|source| SegmentError::Resize {
                name: name.to_string(),
                size: total_size,
                source,
            })?;

            let mmap = unsafe { MmapMut::map_mut(&file) }
                .map_err(|source| SegmentError::Mmap { name: name.to_string(), source })?;

            let mut segment = Segment { name: name.to_string(), segsize, mmap };
            {
                let header = segment.header_mut();
                header.segsize = segsize as u64;
                header.file_size = 0;
                header.bytes_written = 0;
                header.status = 0;
                unsafe {
                    sem::init(&mut header.sem_w, 0)
                }
                .map_err(|source| SegmentError::Sem {
                    name: name.to_string(),
                    op: "initializing sem_w",
                    source,
                })?;
                unsafe {
                    sem::init(&mut header.sem_r, 1)
                }
                .map_err(|source| SegmentError::Sem {
                    name: name.to_string(),
                    op: "initializing sem_r",
                    source,
                })?;
            }
            Ok(segment)
        })();

        if result.is_err() {
            if let Err(unlink_error) = mman::shm_unlink(name) {
                tracing::warn!(segment = name, error = %unlink_error, "unlinking segment after failed create");
            }
        }
        result
    }

    /// Attaches to a segment the proxy already created, as named in a
    /// [`shmcache_protocol::RequestRecord`]. Does not touch the
    /// semaphores; they were initialized once, at creation, and are
    /// reset only by [`Segment::reset`] once the cache daemon has fully
    /// detached (spec.md Open Question: semaphores are never
    /// reinitialized mid-request).
    pub fn attach(name: &str, segsize: usize) -> Result<Segment, SegmentError> {
        let fd = mman::shm_open(name, OFlag::O_RDWR, Mode::empty())
            .map_err(|source| SegmentError::ShmAttach { name: name.to_string(), source })?;
        let file = File::from(fd);
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|source| SegmentError::Mmap { name: name.to_string(), source })?;
        Ok(Segment { name: name.to_string(), segsize, mmap })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segsize(&self) -> usize {
        self.segsize
    }

    pub(crate) fn header(&self) -> &RawHeader {
        unsafe { &*(self.mmap.as_ptr() as *const RawHeader) }
    }

    pub(crate) fn header_mut(&mut self) -> &mut RawHeader {
        unsafe { &mut *(self.mmap.as_mut_ptr() as *mut RawHeader) }
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.mmap[mem::size_of::<RawHeader>()..]
    }

    pub(crate) fn payload_mut(&mut self) -> &mut [u8] {
        let header_size = mem::size_of::<RawHeader>();
        &mut self.mmap[header_size..]
    }

    /// Restores a segment to its just-created state: both semaphores
    /// torn down and rebuilt at `(sem_w = 0, sem_r = 1)`, header fields
    /// zeroed. Called by [`crate::pool::Pool`] before a segment
    /// re-enters the idle queue.
    ///
    /// Rebuilding the semaphores from scratch, rather than trying to
    /// walk their counts back to the expected rest state by hand, makes
    /// every release idempotent regardless of exactly where in the
    /// handshake the previous transfer ended.
    pub(crate) fn reset(&mut self) -> Result<(), SegmentError> {
        let name = self.name.clone();
        let header = self.header_mut();
        unsafe {
            sem::destroy(&mut header.sem_w);
            sem::destroy(&mut header.sem_r);
        }
        header.file_size = 0;
        header.bytes_written = 0;
        header.status = 0;
        unsafe { sem::init(&mut header.sem_w, 0) }
            .map_err(|source| SegmentError::Sem { name: name.clone(), op: "resetting sem_w", source })?;
        unsafe { sem::init(&mut header.sem_r, 1) }
            .map_err(|source| SegmentError::Sem { name, op: "resetting sem_r", source })?;
        Ok(())
    }

    /// Tears down the semaphores and unlinks the backing shared memory
    /// object. Only ever called by the proxy, which created it; the
    /// cache daemon just unmaps on drop, matching spec.md's "unmap S;
    /// handle next request" (no unlink on the consumer side).
    pub fn unlink(&mut self) -> Result<(), SegmentError> {
        let name = self.name.clone();
        let header = self.header_mut();
        unsafe {
            sem::destroy(&mut header.sem_w);
            sem::destroy(&mut header.sem_r);
        }
        mman::shm_unlink(name.as_str()).map_err(|source| SegmentError::ShmUnlink { name, source })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/shmcache_test_{}_{}", tag, std::process::id())
    }

    #[test]
    fn create_then_attach_share_memory() {
        let name = unique_name("create_attach");
        let mut creator = Segment::create(&name, 64).expect("create");
        creator.payload_mut()[..5].copy_from_slice(b"hello");

        let attached = Segment::attach(&name, 64).expect("attach");
        assert_eq!(&attached.payload()[..5], b"hello");

        creator.unlink().expect("unlink");
    }

    #[test]
    fn create_twice_fails() {
        let name = unique_name("create_twice");
        let _first = Segment::create(&name, 16).expect("first create");
        let err = Segment::create(&name, 16).unwrap_err();
        assert!(matches!(err, SegmentError::ShmOpen { .. }));

        let mut first = _first;
        first.unlink().expect("unlink");
    }

    #[test]
    fn reset_restores_initial_semaphore_state() {
        let name = unique_name("reset");
        let mut seg = Segment::create(&name, 8).expect("create");
        unsafe {
            sem::wait(&mut seg.header_mut().sem_r).expect("drain sem_r to 0");
            sem::post(&mut seg.header_mut().sem_w).expect("post sem_w to 1");
        }
        seg.reset().expect("reset");
        unsafe {
            // sem_r should be back at 1: a wait should not block.
            sem::wait(&mut seg.header_mut().sem_r).expect("sem_r available after reset");
            // sem_w should be back at 0: post once then two waits should
            // leave the second one available to block, which we don't
            // assert directly, but one wait should succeed.
            sem::post(&mut seg.header_mut().sem_w).unwrap();
            sem::wait(&mut seg.header_mut().sem_w).expect("sem_w available after single post");
        }
        seg.unlink().expect("unlink");
    }
}
