//! Single-threaded session loop.
//!
//! Every iteration:
//!
//! 1. Idle sources whose reconnect interval elapsed get a connect attempt.
//! 2. Wait for readability until the next tick deadline (capped by
//!    `max_wait`). With no live stream the loop sleeps instead.
//! 3. Readable streams are drained into their framers.
//! 4. If the deadline passed: snapshot, run the controller, emit one record
//!    stamped with the deadline, close the window, advance the grid.
//!
//! The only suspension point is step 2. Nothing here spawns threads or takes
//! locks; the session owns every socket it touches.

use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::{Events, Poll};

use crate::config::{ControlConfig, SOURCE_COUNT, SessionConfig};
use crate::connection::{Connection, SourceId};
use crate::control::{ControlChannel, ThresholdController};
use crate::framer::INBOUND_CAPACITY;
use crate::net::Endpoint;
use crate::output::{JsonLines, Record, RecordSink};
use crate::trace::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::tick::TickGrid;

/// Readiness events handled per wakeup.
const EVENTS_CAPACITY: usize = 8;

/// Bytes requested per read call.
const READ_CHUNK: usize = INBOUND_CAPACITY;

/// Startup failures. Nothing after construction is fatal.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Could not create the readiness poller.
    #[error("failed to create poller: {0}")]
    Poll(#[source] io::Error),
    /// Could not bind the control channel's socket.
    #[error("failed to open control socket for {destination}: {source}")]
    ControlSocket {
        destination: Endpoint,
        source: io::Error,
    },
}

/// Threshold controller plus the channel it drives.
struct Control {
    source: SourceId,
    threshold: ThresholdController,
    channel: ControlChannel,
}

impl Control {
    fn open(config: &ControlConfig) -> Result<Self, SessionError> {
        let channel =
            ControlChannel::open(config.destination).map_err(|source| SessionError::ControlSocket {
                destination: config.destination,
                source,
            })?;
        Ok(Self {
            source: config.source,
            threshold: ThresholdController::new(
                config.threshold,
                config.object,
                config.at_or_above,
                config.below,
                config.verify,
            ),
            channel,
        })
    }

    fn evaluate(&mut self, value: Option<&str>) {
        let Some(transition) = self.threshold.evaluate(value) else {
            return;
        };
        info!(
            source = %self.source,
            from = %transition.from,
            to = %transition.to,
            value = value.unwrap_or_default(),
            threshold = self.threshold.threshold(),
            "threshold crossed"
        );
        let _accepted = self.channel.send_all(&transition.commands);
        debug!(
            accepted = _accepted,
            total = transition.commands.len(),
            "control commands sent"
        );
    }
}

/// The telemetry client's event loop.
pub struct Session<S = JsonLines<io::Stdout>, C = SystemClock> {
    poll: Poll,
    events: Events,
    connections: [Connection; SOURCE_COUNT],
    grid: TickGrid,
    control: Option<Control>,
    sink: S,
    clock: C,
    reconnect_interval: Duration,
    max_wait: Duration,
    /// Reusable buffer for stream reads.
    read_buf: Vec<u8>,
    records: u64,
}

impl<S: RecordSink> Session<S, SystemClock> {
    /// Creates a session on the system clocks.
    ///
    /// No connection is attempted until the first iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if the poller or the control socket cannot be
    /// created.
    pub fn new(config: &SessionConfig, sink: S) -> Result<Self, SessionError> {
        Self::with_clock(config, sink, SystemClock::new())
    }
}

impl<S: RecordSink, C: Clock> Session<S, C> {
    /// Creates a session reading time from `clock`.
    ///
    /// The first tick is the first multiple of the window at or after the
    /// clock's current wall time.
    ///
    /// # Errors
    ///
    /// Returns an error if the poller or the control socket cannot be
    /// created.
    pub fn with_clock(config: &SessionConfig, sink: S, clock: C) -> Result<Self, SessionError> {
        let poll = Poll::new().map_err(SessionError::Poll)?;
        let control = config.control.as_ref().map(Control::open).transpose()?;
        let connections =
            SourceId::ALL.map(|id| Connection::new(id, config.sources[id.index()]));
        let grid = TickGrid::starting_at(clock.wall_ms(), config.window);

        info!(
            window = %config.window,
            sources = ?config.sources,
            control = ?config.control.as_ref().map(|c| c.destination),
            first_tick = grid.deadline(),
            "session started"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            connections,
            grid,
            control,
            sink,
            clock,
            reconnect_interval: config.reconnect_interval,
            max_wait: config.max_wait,
            read_buf: vec![0u8; READ_CHUNK],
            records: 0,
        })
    }

    /// Runs until `shutdown` is set. The flag is checked once per iteration,
    /// so the loop exits within one wait budget.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Acquire) {
            self.turn();
        }
        info!(records = self.records, "session stopped");
    }

    /// One loop iteration. Returns the timestamp of the record emitted, if
    /// any.
    pub fn turn(&mut self) -> Option<u64> {
        self.reconnect_idle();
        self.wait_and_dispatch();
        self.tick_if_due(self.clock.wall_ms())
    }

    /// Deadline of the next record.
    #[must_use]
    pub const fn next_deadline(&self) -> u64 {
        self.grid.deadline()
    }

    /// Records emitted so far.
    #[must_use]
    pub const fn records(&self) -> u64 {
        self.records
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    #[must_use]
    pub fn connection(&self, source: SourceId) -> &Connection {
        &self.connections[source.index()]
    }

    fn reconnect_idle(&mut self) {
        let now = self.clock.mono_ms();
        for conn in &mut self.connections {
            conn.expire_pending(self.poll.registry(), now, self.reconnect_interval);
            if conn.reconnect_due(now, self.reconnect_interval) {
                conn.try_connect(self.poll.registry(), now);
            }
        }
    }

    fn wait_and_dispatch(&mut self) {
        let timeout = self.grid.wait_budget(self.clock.wall_ms(), self.max_wait);

        if self.connections.iter().all(Connection::is_idle) {
            std::thread::sleep(timeout);
            return;
        }

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return,
            Err(_e) => {
                error!(error = %_e, "poll failed");
                return;
            }
        }

        let registry = self.poll.registry();
        for event in &self.events {
            if let Some(conn) = self.connections.get_mut(event.token().0) {
                conn.on_event(registry, event, &mut self.read_buf);
            } else {
                warn!(token = event.token().0, "event for unknown token");
            }
        }
    }

    /// Emits the record for the current deadline if `now` has reached it.
    ///
    /// Returns the emitted timestamp.
    pub fn tick_if_due(&mut self, now: u64) -> Option<u64> {
        if !self.grid.is_due(now) {
            return None;
        }

        if let Some(control) = &mut self.control {
            control.evaluate(self.connections[control.source.index()].snapshot());
        }

        let timestamp = self.grid.advance(now);
        let [out1, out2, out3] = &self.connections;
        let record = Record::new(timestamp, [out1.rendered(), out2.rendered(), out3.rendered()]);
        if let Err(_e) = self.sink.emit(&record) {
            warn!(timestamp, error = %_e, "failed to emit record");
        }
        self.records += 1;

        for conn in &mut self.connections {
            conn.end_window();
        }
        Some(timestamp)
    }
}
