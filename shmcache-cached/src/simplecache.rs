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

//! A deliberately minimal stand-in for the real simplecache: resolves a
//! request path under the configured cache root and opens it. No
//! hashing, no eviction, no admission policy, no persistence of lookup
//! state across restarts — those are out of scope (see this crate's
//! non-goals).

use std::fs::File;
use std::io;
use std::path::{Component, Path};

/// Opens `request_path` under `cache_dir`, if it exists.
///
/// Rejects any path containing a `..` component instead of resolving
/// it, treating an attempted escape the same as a miss rather than
/// serving a file outside `cache_dir`.
pub fn lookup(cache_dir: &Path, request_path: &str) -> io::Result<Option<File>> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    if relative.components().any(|component| matches!(component, Component::ParentDir)) {
        return Ok(None);
    }

    match File::open(cache_dir.join(relative)) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
