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

//! One cache worker thread: pull a request off the queue, attach to
//! its segment, and run the producer side of the rendezvous protocol.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shmcache_core::{RequestChannel, Segment};
use shmcache_protocol::{RequestRecord, Status, STATUS_ERROR_GENERIC};
use tracing::{error, info, instrument, warn};

use crate::simplecache;

pub fn run(worker_id: u32, channel: Arc<RequestChannel>, cache_dir: PathBuf, delay: Duration) {
    info!(worker_id, "worker started");
    loop {
        let record = match channel.receive() {
            Ok(record) => record,
            Err(error) => {
                error!(worker_id, %error, "receiving request, retrying");
                continue;
            }
        };
        if let Err(error) = handle_one(&record, &cache_dir, delay) {
            error!(
                worker_id,
                path = %record.path,
                segment = %record.segment_name,
                %error,
                "serving request",
            );
        }
    }
}

#[instrument(skip(record, cache_dir, delay), fields(path = %record.path, segment = %record.segment_name))]
fn handle_one(record: &RequestRecord, cache_dir: &Path, delay: Duration) -> anyhow::Result<()> {
    let mut segment = match Segment::attach(&record.segment_name, record.segsize as usize) {
        Ok(segment) => segment,
        Err(error) => {
            // The proxy that posted this request is now blocked forever
            // waiting on this segment's header; there is no out-of-band
            // channel to tell it otherwise. Known limitation, see
            // DESIGN.md.
            warn!(%error, "attaching to segment, dropping request");
            return Ok(());
        }
    };

    match simplecache::lookup(cache_dir, &record.path) {
        Ok(Some(mut file)) => {
            let file_size = file.metadata().context("statting cache file")?.len();
            segment.publish_header(Status::Ok, file_size).context("publishing header")?;
            stream_file(&mut segment, &mut file, delay)?;
        }
        Ok(None) => {
            segment.publish_header(Status::NotFound, 0).context("publishing not-found header")?;
        }
        Err(error) => {
            warn!(%error, "reading cache file");
            segment
                .publish_header(Status::Error(STATUS_ERROR_GENERIC), 0)
                .context("publishing error header")?;
        }
    }
    Ok(())
}

fn stream_file(segment: &mut Segment, file: &mut File, delay: Duration) -> anyhow::Result<()> {
    let mut buf = vec![0u8; segment.segsize()];
    loop {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let read = file.read(&mut buf).context("reading cache file")?;
        segment.publish_frame(&buf[..read]).context("publishing frame")?;
        if read == 0 {
            return Ok(());
        }
    }
}
