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

//! proxy is the front door of shmcache. It owns a pool of shared memory
//! segments, accepts client connections on a unix domain socket, and
//! relays each request to `simplecached` over the request queue and a
//! leased segment.

use std::fs;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use shmcache_core::{Pool, RequestChannel};
use tracing::info;

mod signals;
mod worker;

#[derive(Parser, Debug)]
#[clap(author, about = "front-end proxy that relays file requests to simplecached over shared memory")]
struct Args {
    #[clap(long, help = "unix domain socket path to accept requests on")]
    listen: PathBuf,

    #[clap(
        long,
        default_value_t = 4,
        value_parser = clap::value_parser!(u32).range(1..=256),
        help = "number of acceptor worker threads"
    )]
    workers: u32,

    #[clap(
        long,
        default_value_t = 8,
        value_parser = clap::value_parser!(u32).range(1..=1024),
        help = "number of shared memory segments in the pool"
    )]
    segments: u32,

    #[clap(long, default_value_t = 65536, help = "payload capacity of each segment, in bytes")]
    segsize: u64,

    #[clap(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "show more in logs, may be provided multiple times"
    )]
    verbose: u8,

    #[clap(long, help = "file to write logs to; defaults to stderr")]
    log_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.log_file.as_deref())?;

    if args.listen.exists() {
        fs::remove_file(&args.listen)
            .with_context(|| format!("removing stale listen socket {:?}", args.listen))?;
    }
    let listener =
        UnixListener::bind(&args.listen).with_context(|| format!("binding {:?}", args.listen))?;

    let pool = Arc::new(
        Pool::create(std::process::id(), args.segments as usize, args.segsize as usize)
            .context("creating segment pool")?,
    );
    let channel = Arc::new(
        RequestChannel::open().context("opening request queue (is simplecached running?)")?,
    );

    signals::install(args.listen.clone(), Arc::clone(&pool))?;

    info!(
        listen = %args.listen.display(),
        workers = args.workers,
        segments = args.segments,
        segsize = args.segsize,
        "starting proxy"
    );

    let listener = Arc::new(listener);
    let handles: Vec<_> = (0..args.workers)
        .map(|id| {
            let listener = Arc::clone(&listener);
            let pool = Arc::clone(&pool);
            let channel = Arc::clone(&channel);
            thread::spawn(move || worker::accept_loop(id, listener, pool, channel))
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn init_logging(verbose: u8, log_file: Option<&std::path::Path>) -> anyhow::Result<()> {
    let trace_level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber =
        tracing_subscriber::fmt().with_max_level(trace_level).with_thread_ids(true).with_target(false);
    match log_file {
        Some(path) => {
            let file = fs::File::create(path).with_context(|| format!("opening log file {:?}", path))?;
            subscriber.with_writer(std::sync::Mutex::new(file)).init();
        }
        None => subscriber.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
