//! Poll scheduler
//!
//! [`DemPoller`] is the entry point of the library. It owns two worker
//! threads around a [`CanTransport`]:
//! - the writer, the only code that calls `send`, fed through an mpsc queue
//!   shared by sensor requests and the keep-alive task
//! - the receiver, which pushes inbound frames into the reassembly buffer and
//!   routes complete messages to the request waiting for them
//!
//! The reassembly buffer and the pending-request table sit behind one mutex
//! that is only held for insert/complete/evict, never across transport I/O.
//!
//! # Example
//!
//! ```no_run
//! use haldex_dem::{DemPoller, PollerConfig, SimulatedDem};
//! use std::time::Duration;
//!
//! let poller = DemPoller::new(SimulatedDem::default(), PollerConfig::new()).unwrap();
//! poller.start_keep_alive(Duration::from_millis(500)).unwrap();
//!
//! for reading in poller.poll_sensor("oil_temperature").unwrap() {
//!     println!("{}", reading);
//! }
//! ```

mod keepalive;
pub mod state;

pub use state::{Outcome, PollState, RequestState};

use crate::codec;
use crate::config::PollerConfig;
use crate::reassembly::{Ingest, LogicalMessage, ReassemblyBuffer};
use crate::sensors::{self, SensorId};
use crate::transport::CanTransport;
use crate::types::{DemError, RawFrame, Result, SensorReading, TransportError};
use keepalive::KeepAlive;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Frame queued for the writer thread
pub(crate) struct Outbound {
    frame: RawFrame,
    /// Where to report the send result; `None` for fire-and-forget frames
    ack: Option<Sender<std::result::Result<(), TransportError>>>,
}

/// Reply channel of an outstanding request
struct Slot {
    seq: u64,
    reply: Sender<Result<Vec<SensorReading>>>,
}

/// State guarded by the table mutex
struct Table {
    reassembly: ReassemblyBuffer,
    slots: HashMap<SensorId, Slot>,
    states: HashMap<SensorId, PollState>,
    unsolicited: Vec<Sender<Vec<SensorReading>>>,
    next_seq: u64,
}

/// State shared between the poller, its workers and pending requests
struct Shared {
    table: Mutex<Table>,
    config: PollerConfig,
    running: AtomicBool,
    link_closed: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed one received frame through reassembly and deliver complete messages
    fn ingest(&self, frame: &RawFrame, now: Instant) {
        let pushed = self.lock().reassembly.push(frame, now);

        match pushed {
            Ok(Ingest::Complete(message)) => self.deliver(message, now),
            Ok(Ingest::Pending { .. }) | Ok(Ingest::Ignored) => {}
            Err(e @ DemError::UnexpectedResponseType { .. }) => {
                log::warn!("Ignoring response {}: {}", frame, e);
            }
            Err(e) => {
                log::warn!("Dropping frame {}: {}", frame, e);
            }
        }
    }

    /// Decode a complete message and hand it to whoever is waiting for it
    fn deliver(&self, message: LogicalMessage, now: Instant) {
        let (sensor, result) = match sensors::decode_message(&message, now) {
            Ok((sensor, readings)) => (sensor, Ok(readings)),
            Err(e) => match e.sensor() {
                Some(sensor) => (sensor, Err(e)),
                None => {
                    log::debug!("Discarding response ({} bytes): {}", message.len(), e);
                    return;
                }
            },
        };

        let mut table = self.lock();
        let state = table.states.entry(sensor).or_default();
        state.last_response_received = Some(now);

        match table.slots.remove(&sensor) {
            Some(slot) => {
                let outcome = if result.is_ok() {
                    Outcome::Decoded
                } else {
                    Outcome::Errored
                };
                table.states.entry(sensor).or_default().finish(outcome);
                // Sent under the lock so a waiter that lost the slot always finds the reply
                let _ = slot.reply.send(result);
            }
            None => match result {
                Ok(readings) => {
                    log::debug!("Unsolicited response for {} (keep-alive)", sensor);
                    table
                        .unsolicited
                        .retain(|tx| tx.send(readings.clone()).is_ok());
                }
                Err(e) => log::warn!("Failed to decode unsolicited response: {}", e),
            },
        }
    }

    /// Free a sensor slot if it still belongs to request `seq`
    ///
    /// Returns false when the slot was already resolved or reused.
    fn release(&self, sensor: SensorId, seq: u64, outcome: Outcome) -> bool {
        let mut table = self.lock();
        if table.slots.get(&sensor).map(|s| s.seq) != Some(seq) {
            return false;
        }
        table.slots.remove(&sensor);

        let operation_id = sensors::definition(sensor).request.operation_id;
        table
            .reassembly
            .discard(self.config.response_id, operation_id);
        table.states.entry(sensor).or_default().finish(outcome);
        true
    }

    /// Resolve every outstanding request with an error
    fn fail_all(&self, error: impl Fn(SensorId) -> DemError) {
        let mut table = self.lock();
        let slots: Vec<(SensorId, Slot)> = table.slots.drain().collect();
        for (sensor, slot) in slots {
            table.states.entry(sensor).or_default().finish(Outcome::Errored);
            let _ = slot.reply.send(Err(error(sensor)));
        }
    }

    /// Drop stale partial messages and time out the requests waiting on them
    fn evict_expired(&self, now: Instant) {
        let mut table = self.lock();
        let evicted = table
            .reassembly
            .evict_expired(now, self.config.reassembly_timeout());

        for message in evicted {
            let Some(def) = sensors::definition_for_operation(message.operation_id) else {
                continue;
            };
            let Some(slot) = table.slots.remove(&def.id) else {
                log::debug!("Evicted unsolicited partial response for {}", def.id);
                continue;
            };

            log::warn!(
                "Incomplete response for {} after {} bytes, timing out request",
                def.id,
                message.len()
            );
            table.states.entry(def.id).or_default().finish(Outcome::TimedOut);
            let _ = slot.reply.send(Err(DemError::Timeout {
                sensor: def.id,
                timeout_ms: self.config.reassembly_timeout_ms,
            }));
        }
    }
}

/// Receiver thread: pull frames until shutdown or the link closes
fn receive_loop(shared: Arc<Shared>, transport: Arc<dyn CanTransport>) {
    let slice = shared.config.receive_slice();
    log::debug!("Receiver started (slice {:?})", slice);

    while shared.running.load(Ordering::Acquire) {
        match transport.receive(slice) {
            Ok(frame) => {
                log::trace!("Received {}", frame);
                shared.ingest(&frame, Instant::now());
            }
            Err(TransportError::Timeout(_)) => {}
            Err(TransportError::Closed) => {
                log::warn!("Transport closed, receiver stopping");
                shared.link_closed.store(true, Ordering::Release);
                shared.fail_all(|_| DemError::Transport(TransportError::Closed));
                break;
            }
            Err(e) => {
                log::error!("Error receiving frame: {}", e);
                thread::sleep(slice);
            }
        }
        shared.evict_expired(Instant::now());
    }

    log::debug!("Receiver stopped");
}

/// Writer thread: the single caller of `send`
fn write_loop(outbound: Receiver<Outbound>, transport: Arc<dyn CanTransport>) {
    for Outbound { frame, ack } in outbound {
        let result = transport.send(&frame);
        match ack {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => {
                if let Err(e) = result {
                    log::warn!("Failed to send {}: {}", frame, e);
                } else {
                    log::trace!("Sent {}", frame);
                }
            }
        }
    }
    log::debug!("Writer stopped");
}

/// Request/response engine for the DEM module
pub struct DemPoller {
    shared: Arc<Shared>,
    outbound: Option<Sender<Outbound>>,
    keep_alive: Mutex<Option<KeepAlive>>,
    workers: Vec<JoinHandle<()>>,
}

impl DemPoller {
    /// Start the poller on a transport
    ///
    /// Spawns the receiver and writer threads. They stop when the poller is
    /// dropped or [`shutdown`](Self::shutdown) is called.
    pub fn new<T: CanTransport + 'static>(transport: T, config: PollerConfig) -> Result<Self> {
        let transport: Arc<dyn CanTransport> = Arc::new(transport);

        if let Err(e) = transport.subscribe_filter(config.response_id) {
            log::warn!("Transport filter not applied, filtering in software: {}", e);
        }

        let shared = Arc::new(Shared {
            table: Mutex::new(Table {
                reassembly: ReassemblyBuffer::new(config.response_id, config.module_id),
                slots: HashMap::new(),
                states: HashMap::new(),
                unsolicited: Vec::new(),
                next_seq: 0,
            }),
            config,
            running: AtomicBool::new(true),
            link_closed: AtomicBool::new(false),
        });

        let (outbound_tx, outbound_rx) = mpsc::channel();

        let writer = {
            let transport = Arc::clone(&transport);
            thread::Builder::new()
                .name("dem-writer".to_string())
                .spawn(move || write_loop(outbound_rx, transport))
                .map_err(DemError::Spawn)?
        };

        let receiver = {
            let shared = Arc::clone(&shared);
            let transport = Arc::clone(&transport);
            thread::Builder::new()
                .name("dem-receiver".to_string())
                .spawn(move || receive_loop(shared, transport))
                .map_err(DemError::Spawn)?
        };

        log::info!("DEM poller started");

        Ok(Self {
            shared,
            outbound: Some(outbound_tx),
            keep_alive: Mutex::new(None),
            workers: vec![writer, receiver],
        })
    }

    /// Active configuration
    pub fn config(&self) -> &PollerConfig {
        &self.shared.config
    }

    fn outbound(&self) -> Result<&Sender<Outbound>> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(DemError::Shutdown);
        }
        if self.shared.link_closed.load(Ordering::Acquire) {
            return Err(DemError::Transport(TransportError::Closed));
        }
        self.outbound.as_ref().ok_or(DemError::Shutdown)
    }

    /// Send a request for one sensor and return a handle to wait on
    ///
    /// Fails with `AlreadyInFlight` while an earlier request for the same
    /// sensor is outstanding. Different sensors may be in flight together.
    pub fn request_sensor(&self, sensor: SensorId) -> Result<PendingRequest> {
        let outbound = self.outbound()?;
        let def = sensors::definition(sensor);
        let frame = codec::encode_request(&def.request);
        let (reply_tx, reply_rx) = mpsc::channel();

        let seq = {
            let mut table = self.shared.lock();
            if table.slots.contains_key(&sensor) {
                return Err(DemError::AlreadyInFlight { sensor });
            }
            // Last request wins: leftovers of an abandoned answer must not merge into this one
            table
                .reassembly
                .discard(self.shared.config.response_id, def.request.operation_id);

            let seq = table.next_seq;
            table.next_seq += 1;
            table.slots.insert(
                sensor,
                Slot {
                    seq,
                    reply: reply_tx,
                },
            );
            table
                .states
                .entry(sensor)
                .or_default()
                .on_sent(def.request.operation_id, Instant::now());
            seq
        };

        // The timeout covers the time spent queued behind the writer
        let deadline = Instant::now() + self.shared.config.request_timeout();
        let mut pending = PendingRequest {
            shared: Arc::clone(&self.shared),
            sensor,
            seq,
            deadline,
            reply: reply_rx,
            finished: false,
        };

        let (ack_tx, ack_rx) = mpsc::channel();
        if outbound
            .send(Outbound {
                frame,
                ack: Some(ack_tx),
            })
            .is_err()
        {
            return Err(pending.send_failed(TransportError::Closed));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match ack_rx.recv_timeout(remaining) {
            Ok(Ok(())) => {
                log::info!("Sent request for {}: {}", sensor, frame.hex());
                Ok(pending)
            }
            Ok(Err(source)) => Err(pending.send_failed(source)),
            Err(RecvTimeoutError::Disconnected) => Err(pending.send_failed(TransportError::Closed)),
            Err(RecvTimeoutError::Timeout) => {
                // Still resolvable if an answer or a shutdown won the race
                if pending.expire() {
                    log::warn!("Request for {} still queued at its deadline", sensor);
                    Err(pending.timeout_error())
                } else {
                    Ok(pending)
                }
            }
        }
    }

    /// Request one sensor and wait for its readings
    pub fn poll(&self, sensor: SensorId) -> Result<Vec<SensorReading>> {
        self.request_sensor(sensor)?.wait()
    }

    /// Request a sensor by name (`pump_current`, `oil_pressure`, ...)
    pub fn poll_sensor(&self, name: &str) -> Result<Vec<SensorReading>> {
        let sensor: SensorId = name.parse()?;
        self.poll(sensor)
    }

    /// Poll every sensor once, in table order
    ///
    /// Requests are spaced by the configured minimum poll interval. One
    /// failing sensor does not stop the cycle.
    pub fn poll_all(&self) -> Vec<(SensorId, Result<Vec<SensorReading>>)> {
        let mut results = Vec::with_capacity(SensorId::ALL.len());
        for (i, sensor) in SensorId::ALL.into_iter().enumerate() {
            if i > 0 {
                thread::sleep(self.shared.config.min_poll_interval());
            }
            let result = self.poll(sensor);
            if let Err(e) = &result {
                log::warn!("Failed to get {}: {}", sensor, e);
            }
            results.push((sensor, result));
        }
        results
    }

    /// Start sending keep-alive requests every `interval`
    ///
    /// Restarts the task if it is already running. Keep-alive requests go
    /// through the same writer as sensor requests and never occupy a sensor
    /// slot; their answers reach [`subscribe_unsolicited`](Self::subscribe_unsolicited)
    /// receivers, or complete an outstanding request for the same sensor.
    pub fn start_keep_alive(&self, interval: Duration) -> Result<()> {
        let outbound = self.outbound()?.clone();
        let sensor = self.shared.config.keep_alive_sensor;
        let frame = codec::encode_request(&sensors::definition(sensor).request);

        let mut keep_alive = self
            .keep_alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = keep_alive.take() {
            previous.stop();
        }

        log::info!(
            "Starting keep-alive mode (interval: {:?}, request: {})",
            interval,
            sensor
        );
        *keep_alive = Some(KeepAlive::spawn(frame, interval, outbound)?);
        Ok(())
    }

    /// Start keep-alive with the configured interval
    pub fn start_keep_alive_default(&self) -> Result<()> {
        self.start_keep_alive(self.shared.config.keep_alive_interval())
    }

    /// Stop the keep-alive task; does nothing if it is not running
    pub fn stop_keep_alive(&self) {
        let previous = self
            .keep_alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.stop();
            log::info!("Keep-alive mode stopped");
        }
    }

    /// True while the keep-alive task runs
    pub fn keep_alive_running(&self) -> bool {
        self.keep_alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Receive readings from responses no request was waiting for
    pub fn subscribe_unsolicited(&self) -> Receiver<Vec<SensorReading>> {
        let (tx, rx) = mpsc::channel();
        self.shared.lock().unsolicited.push(tx);
        rx
    }

    /// Snapshot of a sensor's request bookkeeping
    pub fn poll_state(&self, sensor: SensorId) -> PollState {
        self.shared
            .lock()
            .states
            .get(&sensor)
            .cloned()
            .unwrap_or_default()
    }

    /// Stop all worker threads and fail outstanding requests
    pub fn shutdown(mut self) {
        self.stop_workers();
    }

    fn stop_workers(&mut self) {
        self.stop_keep_alive();
        self.shared.running.store(false, Ordering::Release);
        // Dropping the last sender ends the writer loop
        self.outbound.take();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("DEM worker thread panicked");
            }
        }
        self.shared.fail_all(|_| DemError::Shutdown);
        log::info!("DEM poller stopped");
    }
}

impl Drop for DemPoller {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop_workers();
        }
    }
}

/// Handle to one outstanding sensor request
///
/// Dropping the handle without waiting cancels the request.
pub struct PendingRequest {
    shared: Arc<Shared>,
    sensor: SensorId,
    seq: u64,
    deadline: Instant,
    reply: Receiver<Result<Vec<SensorReading>>>,
    finished: bool,
}

impl PendingRequest {
    /// Sensor this request is for
    pub fn sensor(&self) -> SensorId {
        self.sensor
    }

    /// Instant after which the request times out
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Block until the readings arrive or the deadline passes
    ///
    /// On timeout the sensor slot is freed immediately and
    /// `consecutive_timeouts` is incremented. No retry is attempted.
    pub fn wait(mut self) -> Result<Vec<SensorReading>> {
        self.finished = true;
        let remaining = self.deadline.saturating_duration_since(Instant::now());

        match self.reply.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if self.expire() {
                    log::warn!("Timeout waiting for {} response", self.sensor);
                    Err(self.timeout_error())
                } else {
                    // Resolved between the timeout and taking the lock
                    self.reply.try_recv().unwrap_or(Err(DemError::Shutdown))
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(DemError::Shutdown),
        }
    }

    /// Free the slot as timed out; false if the request was already resolved
    fn expire(&mut self) -> bool {
        self.finished = true;
        self.shared.release(self.sensor, self.seq, Outcome::TimedOut)
    }

    fn timeout_error(&self) -> DemError {
        DemError::Timeout {
            sensor: self.sensor,
            timeout_ms: self.shared.config.request_timeout_ms,
        }
    }

    fn send_failed(mut self, source: TransportError) -> DemError {
        log::error!("Failed to send request for {}: {}", self.sensor, source);
        self.finished = true;
        self.shared.release(self.sensor, self.seq, Outcome::Errored);
        DemError::SendFailed {
            sensor: self.sensor,
            source,
        }
    }

    /// Abandon the request, freeing its slot and partial state
    pub fn cancel(mut self) {
        self.finished = true;
        if self.shared.release(self.sensor, self.seq, Outcome::Cancelled) {
            log::debug!("Request for {} cancelled", self.sensor);
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.release(self.sensor, self.seq, Outcome::Cancelled);
        }
    }
}
