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

//! Thin wrappers around the POSIX unnamed-semaphore calls, used on
//! `sem_t` values embedded directly in a shared memory mapping.
//!
//! These are not the `sem_open`-style named semaphores `nix` exposes;
//! the segment header carries the semaphores' storage itself, so every
//! attaching process sees the same bytes once `init` has run once on
//! the creator's side. Callers must hold that storage behind a mapping
//! that outlives every caller on every process, which is the contract
//! [`crate::segment::Segment`] upholds.

use std::io;

/// Initializes a process-shared counting semaphore in place at `sem`.
///
/// # Safety
/// `sem` must point at writable memory, valid for the lifetime of the
/// segment, that no thread is concurrently waiting or posting on.
pub(crate) unsafe fn init(sem: *mut libc::sem_t, value: u32) -> io::Result<()> {
    if libc::sem_init(sem, 1, value) != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// # Safety
/// `sem` must point at a semaphore no thread is concurrently waiting or
/// posting on.
pub(crate) unsafe fn destroy(sem: *mut libc::sem_t) {
    // Only fails if sem is invalid, which would already be a caller bug;
    // nothing useful to do with the return value here.
    libc::sem_destroy(sem);
}

/// # Safety
/// `sem` must point at a live, initialized semaphore.
pub(crate) unsafe fn wait(sem: *mut libc::sem_t) -> io::Result<()> {
    loop {
        if libc::sem_wait(sem) == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

/// # Safety
/// `sem` must point at a live, initialized semaphore.
pub(crate) unsafe fn post(sem: *mut libc::sem_t) -> io::Result<()> {
    if libc::sem_post(sem) != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
