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

//! Wire types shared between `proxy` and `simplecached`.
//!
//! Everything in this crate has to be bit-identical in both processes:
//! the [`RequestRecord`] layout, its size (which must equal the request
//! queue's configured `msgsize` exactly), and the numeric [`Status`]
//! codes embedded in a segment's header.

use std::ffi::CStr;

use thiserror::Error;

/// Maximum length of a request path, including the NUL terminator.
pub const PATH_MAX: usize = 6112;
/// Maximum length of a segment name, including the NUL terminator.
pub const SHM_NAME_MAX: usize = 100;

/// Name of the request queue. Created by the cache daemon, unlinking any
/// stale queue of the same name first; unlinked again on shutdown.
pub const REQUEST_QUEUE_NAME: &str = "/cache_command_q";

/// Default `maxmsg` for the request queue (spec.md §6).
pub const REQUEST_QUEUE_DEPTH: i64 = 10;

/// HTTP-flavored status codes carried in a segment's header.
///
/// `Ok` and `NotFound` are the two statuses the cache daemon can
/// distinguish explicitly; anything else collapses to `Error` with the
/// offending numeric code preserved for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    Error(u32),
}

const STATUS_OK: u32 = 200;
const STATUS_NOT_FOUND: u32 = 404;
/// Used when the cache has no more specific code for a failure (e.g. a
/// read error after a successful lookup).
pub const STATUS_ERROR_GENERIC: u32 = 500;

impl Status {
    pub fn to_code(self) -> u32 {
        match self {
            Status::Ok => STATUS_OK,
            Status::NotFound => STATUS_NOT_FOUND,
            Status::Error(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            STATUS_OK => Status::Ok,
            STATUS_NOT_FOUND => Status::NotFound,
            other => Status::Error(other),
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// Errors produced while encoding or decoding a [`RequestRecord`].
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("path is {len} bytes, which does not fit (with its NUL) in {max}")]
    PathTooLong { len: usize, max: usize },
    #[error("segment name is {len} bytes, which does not fit (with its NUL) in {max}")]
    NameTooLong { len: usize, max: usize },
    #[error("path contains an interior NUL byte")]
    PathHasInteriorNul,
    #[error("segment name contains an interior NUL byte")]
    NameHasInteriorNul,
    #[error("buffer is {got} bytes, want exactly {want}")]
    WrongSize { got: usize, want: usize },
    #[error("path field is not NUL-terminated")]
    PathNotTerminated,
    #[error("segment name field is not NUL-terminated")]
    NameNotTerminated,
    #[error("path is not valid UTF-8")]
    PathNotUtf8,
    #[error("segment name is not valid UTF-8")]
    NameNotUtf8,
}

/// The request a proxy worker posts to the cache daemon: which file to
/// serve, and which segment to serve it through.
///
/// This is the only versioning signal between the two processes: the
/// request queue's `msgsize` attribute must equal
/// `RequestRecord::WIRE_SIZE` exactly, and peers that disagree fail at
/// open (spec.md §4.2/§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub path: String,
    pub segment_name: String,
    pub segsize: u64,
}

impl RequestRecord {
    /// `path` field width, `segment_name` field width, and an 8-byte
    /// `segsize` (we pin this to `u64` rather than a platform `size_t`
    /// so the layout is identical regardless of target pointer width).
    pub const WIRE_SIZE: usize = PATH_MAX + SHM_NAME_MAX + 8;

    pub fn new(
        path: impl Into<String>,
        segment_name: impl Into<String>,
        segsize: u64,
    ) -> Result<Self, RecordError> {
        let record = RequestRecord { path: path.into(), segment_name: segment_name.into(), segsize };
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<(), RecordError> {
        if self.path.as_bytes().contains(&0) {
            return Err(RecordError::PathHasInteriorNul);
        }
        if self.path.len() + 1 > PATH_MAX {
            return Err(RecordError::PathTooLong { len: self.path.len() + 1, max: PATH_MAX });
        }
        if self.segment_name.as_bytes().contains(&0) {
            return Err(RecordError::NameHasInteriorNul);
        }
        if self.segment_name.len() + 1 > SHM_NAME_MAX {
            return Err(RecordError::NameTooLong {
                len: self.segment_name.len() + 1,
                max: SHM_NAME_MAX,
            });
        }
        Ok(())
    }

    /// Encode into the exact on-the-wire byte layout: two NUL-terminated,
    /// NUL-padded fixed-width fields followed by a little-endian `u64`.
    pub fn to_bytes(&self) -> Result<[u8; Self::WIRE_SIZE], RecordError> {
        self.validate()?;

        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[..self.path.len()].copy_from_slice(self.path.as_bytes());
        buf[PATH_MAX..PATH_MAX + self.segment_name.len()]
            .copy_from_slice(self.segment_name.as_bytes());
        buf[PATH_MAX + SHM_NAME_MAX..].copy_from_slice(&self.segsize.to_le_bytes());
        Ok(buf)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, RecordError> {
        if buf.len() != Self::WIRE_SIZE {
            return Err(RecordError::WrongSize { got: buf.len(), want: Self::WIRE_SIZE });
        }

        let path = read_cstr_field(&buf[..PATH_MAX])
            .ok_or(RecordError::PathNotTerminated)?
            .to_str()
            .map_err(|_| RecordError::PathNotUtf8)?
            .to_owned();
        let segment_name = read_cstr_field(&buf[PATH_MAX..PATH_MAX + SHM_NAME_MAX])
            .ok_or(RecordError::NameNotTerminated)?
            .to_str()
            .map_err(|_| RecordError::NameNotUtf8)?
            .to_owned();
        let mut segsize_bytes = [0u8; 8];
        segsize_bytes.copy_from_slice(&buf[PATH_MAX + SHM_NAME_MAX..]);
        let segsize = u64::from_le_bytes(segsize_bytes);

        Ok(RequestRecord { path, segment_name, segsize })
    }
}

fn read_cstr_field(field: &[u8]) -> Option<&CStr> {
    let nul_at = field.iter().position(|&b| b == 0)?;
    CStr::from_bytes_with_nul(&field[..=nul_at]).ok()
}

/// Derives the name of the `i`th segment owned by the proxy process
/// with the given pid, per spec.md §6: `/shm_<pid>_<i>`.
pub fn segment_name(proxy_pid: u32, index: usize) -> String {
    format!("/shm_{}_{}", proxy_pid, index)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let cases = vec![
            RequestRecord::new("/a/b/c.txt", "/shm_123_0", 4096).unwrap(),
            RequestRecord::new("", "/shm_1_1", 1).unwrap(),
            RequestRecord::new("x".repeat(PATH_MAX - 1), "/shm_99_7", 8192).unwrap(),
        ];

        for record in cases {
            let bytes = record.to_bytes().expect("encode to succeed");
            assert_eq!(bytes.len(), RequestRecord::WIRE_SIZE);
            let decoded = RequestRecord::from_bytes(&bytes).expect("decode to succeed");
            assert_eq!(record, decoded);
        }
    }

    #[test]
    fn path_too_long_is_rejected() {
        let err = RequestRecord::new("x".repeat(PATH_MAX), "/shm_1_0", 1).unwrap_err();
        assert!(matches!(err, RecordError::PathTooLong { .. }));
    }

    #[test]
    fn wrong_size_buffer_is_rejected() {
        let err = RequestRecord::from_bytes(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, RecordError::WrongSize { got: 10, .. }));
    }

    #[test]
    fn status_round_trips_through_numeric_code() {
        assert_eq!(Status::from_code(200), Status::Ok);
        assert_eq!(Status::from_code(404), Status::NotFound);
        assert_eq!(Status::from_code(500), Status::Error(500));
        assert_eq!(Status::Ok.to_code(), 200);
        assert_eq!(Status::NotFound.to_code(), 404);
        assert_eq!(Status::Error(503).to_code(), 503);
    }

    #[test]
    fn segment_names_are_namespaced_by_pid() {
        assert_eq!(segment_name(42, 0), "/shm_42_0");
        assert_eq!(segment_name(42, 7), "/shm_42_7");
        assert_ne!(segment_name(42, 0), segment_name(43, 0));
    }
}
