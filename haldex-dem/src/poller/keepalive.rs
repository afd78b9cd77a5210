//! Keep-alive task
//!
//! The DEM drops into a sleep mode when it is not addressed for a while. The
//! task re-sends one fixed request on an interval through the writer queue.

use super::Outbound;
use crate::types::{DemError, RawFrame, Result};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to a running keep-alive thread
pub(crate) struct KeepAlive {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl KeepAlive {
    pub(crate) fn spawn(
        frame: RawFrame,
        interval: Duration,
        outbound: Sender<Outbound>,
    ) -> Result<Self> {
        let (stop, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("dem-keep-alive".to_string())
            .spawn(move || {
                let mut sent: u64 = 0;
                loop {
                    if outbound.send(Outbound { frame, ack: None }).is_err() {
                        log::debug!("Writer gone, keep-alive exiting");
                        break;
                    }
                    sent += 1;
                    log::trace!("Keep-alive #{}: {}", sent, frame.hex());

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("Keep-alive exited after {} requests", sent);
            })
            .map_err(DemError::Spawn)?;

        Ok(Self { stop, handle })
    }

    /// Signal the thread and wait for it to exit
    pub(crate) fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            log::error!("Keep-alive thread panicked");
        }
    }
}
