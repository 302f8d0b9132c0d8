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

//! On SIGTERM/SIGINT, unlink the request queue and exit.
//!
//! Cleanup happens by hand here rather than through `RequestChannel`'s
//! `Drop` impl: `std::process::exit` never runs destructors, and we
//! want to exit immediately on a second signal rather than wait on
//! worker threads that are blocked in a long `mq_receive`/`sem_wait`.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::{flag, iterator::Signals};
use tracing::{error, info};

pub fn install() -> anyhow::Result<()> {
    let term_now = Arc::new(AtomicBool::new(false));
    for sig in TERM_SIGNALS {
        // Exit immediately on a second term signal.
        flag::register_conditional_shutdown(*sig, 1, Arc::clone(&term_now))?;
        flag::register(*sig, Arc::clone(&term_now))?;
    }

    let mut signals = Signals::new(TERM_SIGNALS).context("creating signal iterator")?;
    thread::spawn(move || {
        #[allow(clippy::never_loop)]
        for signal in &mut signals {
            assert!(TERM_SIGNALS.contains(&signal));

            info!("term signal received, unlinking request queue");
            if let Err(error) = nix::mqueue::mq_unlink(shmcache_protocol::REQUEST_QUEUE_NAME) {
                error!(%error, "unlinking request queue on shutdown");
            }
            std::process::exit(0);
        }
    });

    Ok(())
}
