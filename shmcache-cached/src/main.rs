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

//! simplecached is the cache daemon half of shmcache. It owns the
//! request queue, reads files off disk out of `--cache-dir`, and
//! streams them back to the proxy over the shared memory segment named
//! in each request.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

mod signals;
mod simplecache;
mod worker;

#[derive(Parser, Debug)]
#[clap(author, about = "cache daemon serving files to the shmcache proxy over shared memory")]
struct Args {
    #[clap(short = 'c', long, help = "root directory the cache resolves request paths under")]
    cache_dir: PathBuf,

    #[clap(
        short = 't',
        long,
        default_value_t = 4,
        value_parser = clap::value_parser!(u32).range(1..=100),
        help = "number of worker threads"
    )]
    threads: u32,

    #[clap(
        short = 'd',
        long = "delay-us",
        default_value_t = 0,
        value_parser = clap::value_parser!(u64).range(0..=2_500_000),
        help = "synthetic per-chunk read delay, in microseconds (for exercising backpressure)"
    )]
    delay_us: u64,

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

    let cache_dir = fs::canonicalize(&args.cache_dir)
        .with_context(|| format!("resolving cache dir {:?}", args.cache_dir))?;

    let channel =
        Arc::new(shmcache_core::RequestChannel::create().context("creating request queue")?);
    signals::install()?;

    info!(
        threads = args.threads,
        cache_dir = %cache_dir.display(),
        delay_us = args.delay_us,
        "starting simplecached"
    );

    let delay = Duration::from_micros(args.delay_us);
    let handles: Vec<_> = (0..args.threads)
        .map(|id| {
            let channel = Arc::clone(&channel);
            let cache_dir = cache_dir.clone();
            thread::spawn(move || worker::run(id, channel, cache_dir, delay))
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
