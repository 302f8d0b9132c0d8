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

//! Locates the `proxy` and `simplecached` binaries for the end-to-end
//! test, which drives both real processes the way a deployment would.
//!
//! `CARGO_BIN_EXE_<name>` only covers binaries owned by the package the
//! test is compiled into, so it gives us `proxy` for free but not
//! `simplecached`, which lives in a sibling workspace crate. We locate
//! that one the same way the teacher's own test harness does: build
//! the workspace with `--message-format=json` and scrape the emitted
//! artifact paths.
#![allow(dead_code)]

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, Context};

fn workspace_root() -> PathBuf {
    let mut dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    dir.pop();
    dir
}

fn bin_cache() -> &'static Mutex<Vec<(String, PathBuf)>> {
    static CACHE: OnceLock<Mutex<Vec<(String, PathBuf)>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(Vec::new()))
}

/// Finds the absolute path to the compiled `name` binary somewhere in
/// this workspace, building it first if needed. Caches the result per
/// process so repeated calls across tests don't re-invoke cargo.
pub fn find_bin(name: &str) -> anyhow::Result<PathBuf> {
    {
        let cache = bin_cache().lock().unwrap();
        if let Some((_, path)) = cache.iter().find(|(n, _)| n == name) {
            return Ok(path.clone());
        }
    }

    let out = Command::new(env!("CARGO"))
        .arg("build")
        .arg("--message-format=json")
        .current_dir(workspace_root())
        .output()
        .context("invoking cargo build to locate test binaries")?;
    if !out.status.success() {
        return Err(anyhow!(
            "cargo build failed while locating {name}: {}",
            String::from_utf8_lossy(&out.stderr)
        ));
    }

    for line in std::io::BufReader::new(&out.stdout[..]).lines() {
        let line = line.context("reading a line of cargo's json output")?;
        let entry: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let kind = entry.get("target").and_then(|t| t.get("kind")).and_then(|k| k.get(0)).and_then(|k| k.as_str());
        if kind != Some("bin") {
            continue;
        }
        let Some(exe) = entry.get("executable").and_then(|e| e.as_str()) else { continue };
        let Some(basename) = Path::new(exe).file_name().and_then(|f| f.to_str()) else { continue };
        if basename == name {
            let path = PathBuf::from(exe);
            bin_cache().lock().unwrap().push((name.to_string(), path.clone()));
            return Ok(path);
        }
    }

    Err(anyhow!("could not find a `{name}` binary in cargo's build output"))
}

/// Kills its child on drop so a failing assertion never leaves a
/// `proxy` or `simplecached` process running past the test.
pub struct ChildGuard(pub Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Polls `pred` with exponential backoff until it returns `true` or the
/// overall budget is exhausted, for waiting on a unix socket to appear.
pub fn wait_until<P: FnMut() -> bool>(mut pred: P) -> anyhow::Result<()> {
    let mut delay = Duration::from_millis(5);
    for _ in 0..12 {
        if pred() {
            return Ok(());
        }
        std::thread::sleep(delay);
        delay *= 2;
    }
    Err(anyhow!("condition never became true"))
}
