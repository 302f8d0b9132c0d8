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

//! One proxy acceptor thread: accept a connection, read a request, and
//! run the consumer side of the rendezvous protocol against a leased
//! segment.
//!
//! The client-facing protocol here is a deliberately minimal stand-in
//! for the real GetFile wire protocol (out of scope — see this crate's
//! non-goals): a newline-terminated request path in, a one-line status
//! ("200 <size>", "404", or the numeric error code) followed by the
//! raw file bytes on success.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;

use anyhow::Context;
use shmcache_core::{Frame, Pool, RequestChannel};
use shmcache_protocol::{RequestRecord, Status};
use tracing::{error, info, instrument, warn};

pub fn accept_loop(worker_id: u32, listener: Arc<UnixListener>, pool: Arc<Pool>, channel: Arc<RequestChannel>) {
    info!(worker_id, "worker started");
    loop {
        let stream = match listener.accept() {
            Ok((stream, _addr)) => stream,
            Err(error) => {
                error!(worker_id, %error, "accepting connection, retrying");
                continue;
            }
        };
        if let Err(error) = handle_connection(stream, &pool, &channel) {
            error!(worker_id, %error, "serving connection");
        }
    }
}

#[instrument(skip(stream, pool, channel))]
fn handle_connection(mut stream: UnixStream, pool: &Pool, channel: &RequestChannel) -> anyhow::Result<()> {
    let path = read_request_line(&stream).context("reading request")?;

    let mut lease = pool.acquire();
    let record = RequestRecord::new(path.clone(), lease.name().to_string(), lease.segsize() as u64)
        .context("building request record")?;
    channel.send(&record).context("sending request")?;

    let header = lease.consume_header().context("consuming header")?;
    match header.status {
        Status::Ok => {
            writeln!(stream, "200 {}", header.file_size).context("writing status line")?;
            forward_frames(&mut lease, &mut stream)?;
        }
        Status::NotFound => {
            writeln!(stream, "404").context("writing status line")?;
        }
        Status::Error(code) => {
            writeln!(stream, "{code}").context("writing status line")?;
        }
    }
    Ok(())
}

fn read_request_line(stream: &UnixStream) -> anyhow::Result<String> {
    let mut reader = BufReader::new(stream.try_clone().context("cloning client stream")?);
    let mut line = String::new();
    reader.read_line(&mut line).context("reading request line")?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

/// Grants and consumes frames until EOF. A write failure (the client
/// hung up mid-transfer) doesn't stop the loop: the cache worker is
/// still going to publish every remaining frame, so we hand off to
/// [`shmcache_core::Segment::drain`] to keep granting and discarding
/// until EOF so the segment comes back to the pool clean rather than
/// wedged mid-handshake.
fn forward_frames(segment: &mut shmcache_core::Segment, stream: &mut UnixStream) -> anyhow::Result<()> {
    loop {
        segment.grant().context("granting next frame")?;
        match segment.consume_frame().context("consuming frame")? {
            Frame::Eof => return Ok(()),
            Frame::Data(data) => {
                if let Err(error) = stream.write_all(data) {
                    warn!(%error, "client disconnected mid-transfer, draining remaining frames");
                    return segment.drain().context("draining after client disconnect");
                }
            }
        }
    }
}
