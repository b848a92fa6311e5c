//! Command dispatcher: the bridge loop.
//!
//! The dispatcher owns the connection handle and moves through
//!
//! ```text
//! AwaitingMessage -> Decoding -> Applying -> Responding -> AwaitingMessage | Closed
//! ```
//!
//! once per [`Dispatcher::cycle`]. A cycle handles at most one message and
//! then hands control back to the simulator, which calls in again through
//! the service system task. Waiting for a frame is the only blocking step;
//! decode, apply and respond never suspend.
//!
//! An `advance` suspends the session instead of answering. Until the delay
//! callback calls [`Dispatcher::resume`], cycles return
//! [`CycleOutcome::Suspended`] without touching the connection.
//!
//! There is no timeout on that wait. A controller that stops talking
//! without closing its socket hangs the simulator.
//!
//! Error policy:
//! - apply errors become failed responses and the session continues
//! - protocol and connection errors close the handle; the state is terminal

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connection::ConnectionHandle;
use crate::error::{ApplyError, BridgeError, ProtocolError};
use crate::protocol::{frame, Command, Operation, Reply, Response};
use crate::sim::{SimInterface, WriteMode};

/// Dispatcher states.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Blocked on, or about to block on, the next frame.
    AwaitingMessage,
    Decoding,
    Applying,
    Responding,
    /// Terminal.
    Closed,
}

/// Why the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The controller closed the connection between frames.
    PeerClosed,
    /// The controller asked the simulation to finish.
    Finished,
    /// A malformed frame or undecodable command.
    Protocol(String),
    /// Reading or writing the connection failed.
    Connection(String),
    /// The simulation ended with the connection still open.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "controller closed the connection"),
            Self::Finished => write!(f, "controller finished the simulation"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Connection(msg) => write!(f, "connection error: {msg}"),
            Self::Shutdown => write!(f, "simulation ended"),
        }
    }
}

impl CloseReason {
    /// Returns true for closes caused by an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Connection(_))
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// One command was answered; the session is open.
    Served,
    /// The controller asked for `ticks` of simulation time. The answer is
    /// written by [`Dispatcher::resume`].
    Yielded {
        /// Simulation time to let pass before the next cycle.
        ticks: u64,
    },
    /// An advance is outstanding; nothing was read or written.
    Suspended,
    /// The session is closed.
    Closed(CloseReason),
}

/// Per-session counters.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Commands decoded, including ones that failed to apply.
    pub commands: u64,
    pub apply_failures: u64,
}

/// An advance received but not yet answered.
#[derive(Debug, Clone, Copy)]
struct PendingAdvance {
    request_id: Uuid,
    ticks: u64,
}

impl PendingAdvance {
    const fn operation(self) -> Operation {
        Operation::Advance { ticks: self.ticks }
    }
}

/// Result of applying one command.
enum Applied {
    Reply(Reply),
    Advance(u64),
    Finish,
}

/// Owns the connection and runs the message cycle.
#[derive(Debug)]
pub struct Dispatcher {
    handle: ConnectionHandle,
    state: DispatchState,
    pending_advance: Option<PendingAdvance>,
    close_reason: Option<CloseReason>,
    max_frame_bytes: usize,
    stats: SessionStats,
}

impl Dispatcher {
    /// Takes ownership of an open handle.
    #[must_use]
    pub fn new(handle: ConnectionHandle, max_frame_bytes: usize) -> Self {
        let stats = SessionStats {
            session_id: handle.session_id(),
            started_at: Utc::now(),
            commands: 0,
            apply_failures: 0,
        };
        Self {
            handle,
            state: DispatchState::AwaitingMessage,
            pending_advance: None,
            close_reason: None,
            max_frame_bytes,
            stats,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> DispatchState {
        self.state
    }

    /// Returns true once the session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == DispatchState::Closed
    }

    /// Why the session ended, if it has.
    #[must_use]
    pub const fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Returns true while an advance is waiting for its delay to elapse.
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        self.pending_advance.is_some()
    }

    /// Counters for this session.
    #[must_use]
    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Runs one message exchange.
    ///
    /// Does nothing while an advance is outstanding.
    pub fn cycle(&mut self, sim: &mut dyn SimInterface) -> CycleOutcome {
        if let Some(reason) = &self.close_reason {
            return CycleOutcome::Closed(reason.clone());
        }
        if let Some(pending) = self.pending_advance {
            debug!(
                session = %self.stats.session_id,
                request_id = %pending.request_id,
                ticks = pending.ticks,
                "cycle skipped while advance is outstanding"
            );
            return CycleOutcome::Suspended;
        }

        self.state = DispatchState::AwaitingMessage;
        let bytes = match self.handle.read_frame() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return self.close(CloseReason::PeerClosed),
            Err(err) => return self.close(close_reason(&err)),
        };

        self.state = DispatchState::Decoding;
        let command: Command = match frame::decode(&bytes) {
            Ok(command) => command,
            Err(err) => return self.close(CloseReason::Protocol(err.to_string())),
        };
        self.stats.commands += 1;
        debug!(
            session = %self.stats.session_id,
            request_id = %command.request_id,
            op = command.op.name(),
            "command received"
        );

        self.state = DispatchState::Applying;
        let applied = apply(sim, &command.op);

        self.state = DispatchState::Responding;
        let resp = match applied {
            Ok(Applied::Reply(reply)) => Response::ok(command.request_id, reply),
            Ok(Applied::Advance(ticks)) => {
                self.pending_advance = Some(PendingAdvance {
                    request_id: command.request_id,
                    ticks,
                });
                self.state = DispatchState::AwaitingMessage;
                return CycleOutcome::Yielded { ticks };
            }
            Ok(Applied::Finish) => {
                let resp = Response::ok(command.request_id, Reply::Ack);
                if let Err(reason) = self.respond(&resp, &command.op) {
                    return self.close(reason);
                }
                sim.finish();
                return self.close(CloseReason::Finished);
            }
            Err(err) => {
                self.stats.apply_failures += 1;
                warn!(
                    session = %self.stats.session_id,
                    request_id = %command.request_id,
                    op = command.op.name(),
                    error = %err,
                    "command failed"
                );
                Response::failed(command.request_id, &err)
            }
        };

        if let Err(reason) = self.respond(&resp, &command.op) {
            return self.close(reason);
        }
        self.state = DispatchState::AwaitingMessage;
        CycleOutcome::Served
    }

    /// Answers the outstanding advance with the current time, then runs one
    /// message exchange. Called when the advance's delay has elapsed.
    pub fn resume(&mut self, sim: &mut dyn SimInterface) -> CycleOutcome {
        if let Some(reason) = &self.close_reason {
            return CycleOutcome::Closed(reason.clone());
        }
        if let Some(pending) = self.pending_advance.take() {
            let resp = Response::ok(pending.request_id, Reply::Time { time: sim.time() });
            if let Err(reason) = self.respond(&resp, &pending.operation()) {
                return self.close(reason);
            }
        }
        self.cycle(sim)
    }

    /// Closes the session because the simulation is ending. Idempotent.
    ///
    /// An outstanding advance is answered first with the final time.
    pub fn shutdown(&mut self, sim: &dyn SimInterface) {
        if self.close_reason.is_some() {
            return;
        }
        if let Some(pending) = self.pending_advance.take() {
            let resp = Response::ok(pending.request_id, Reply::Time { time: sim.time() });
            if let Err(reason) = self.respond(&resp, &pending.operation()) {
                debug!(
                    session = %self.stats.session_id,
                    request_id = %pending.request_id,
                    %reason,
                    "advance answer lost at shutdown"
                );
            }
        }
        let _ = self.close(CloseReason::Shutdown);
    }

    fn respond(&mut self, resp: &Response, op: &Operation) -> Result<(), CloseReason> {
        let bytes = match frame::encode(resp, self.max_frame_bytes) {
            Ok(bytes) => bytes,
            // The value is too wide for the frame limit; the command fails, the session does not.
            Err(ProtocolError::FrameTooLarge { len, max }) => {
                let err = ApplyError::Rejected {
                    operation: op.name(),
                    path: op.path().unwrap_or_default().to_string(),
                    reason: format!("response of {len} bytes exceeds frame limit {max}"),
                };
                self.stats.apply_failures += 1;
                warn!(
                    session = %self.stats.session_id,
                    request_id = %resp.request_id,
                    op = op.name(),
                    error = %err,
                    "response too large"
                );
                frame::encode(&Response::failed(resp.request_id, &err), self.max_frame_bytes)
                    .map_err(|e| CloseReason::Protocol(e.to_string()))?
            }
            Err(e) => return Err(CloseReason::Protocol(e.to_string())),
        };
        self.handle
            .write_frame(&bytes)
            .map_err(|e| CloseReason::Connection(e.to_string()))
    }

    fn close(&mut self, reason: CloseReason) -> CycleOutcome {
        self.handle.close();
        self.state = DispatchState::Closed;
        if reason.is_error() {
            error!(session = %self.stats.session_id, %reason, "session aborted");
        } else {
            info!(
                session = %self.stats.session_id,
                %reason,
                commands = self.stats.commands,
                apply_failures = self.stats.apply_failures,
                elapsed_ms = (Utc::now() - self.stats.started_at).num_milliseconds(),
                "session closed"
            );
        }
        self.close_reason = Some(reason.clone());
        CycleOutcome::Closed(reason)
    }
}

fn close_reason(err: &BridgeError) -> CloseReason {
    match err {
        BridgeError::Protocol(_) => CloseReason::Protocol(err.to_string()),
        _ => CloseReason::Connection(err.to_string()),
    }
}

fn apply(sim: &mut dyn SimInterface, op: &Operation) -> Result<Applied, ApplyError> {
    let reply = match op {
        Operation::Ping => Reply::Pong { time: sim.time() },
        Operation::Lookup { path } => {
            sim.lookup(path)?;
            Reply::Found { path: path.clone() }
        }
        Operation::Read { path } => {
            let obj = sim.lookup(path)?;
            let value = sim.read(obj, path)?;
            Reply::Value {
                path: path.clone(),
                value,
            }
        }
        Operation::Write { path, value } | Operation::Force { path, value } => {
            value.validate(path)?;
            let mode = if matches!(op, Operation::Force { .. }) {
                WriteMode::Force
            } else {
                WriteMode::Deposit
            };
            let obj = sim.lookup(path)?;
            sim.write(obj, path, value, mode)?;
            Reply::Ack
        }
        Operation::Release { path } => {
            let obj = sim.lookup(path)?;
            let value = sim.release(obj, path)?;
            Reply::Value {
                path: path.clone(),
                value,
            }
        }
        Operation::Time => Reply::Time { time: sim.time() },
        Operation::Advance { ticks: 0 } => Reply::Time { time: sim.time() },
        Operation::Advance { ticks } => return Ok(Applied::Advance(*ticks)),
        Operation::Print { message } => {
            sim.print(message);
            Reply::Ack
        }
        Operation::Finish => return Ok(Applied::Finish),
    };
    Ok(Applied::Reply(reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::MemoryChannel;
    use crate::protocol::{Status, SignalValue, DEFAULT_MAX_FRAME_BYTES};
    use crate::sim::{MemorySim, SimTime};
    use std::io::Cursor;

    fn frames(ops: &[Operation]) -> (Vec<u8>, Vec<Uuid>) {
        let mut bytes = Vec::new();
        let mut ids = Vec::new();
        for op in ops {
            let cmd = Command::new(op.clone());
            ids.push(cmd.request_id);
            bytes.extend(frame::encode(&cmd, DEFAULT_MAX_FRAME_BYTES).unwrap());
        }
        (bytes, ids)
    }

    fn responses(bytes: &[u8]) -> Vec<Response> {
        let mut cursor = Cursor::new(bytes);
        let mut out = Vec::new();
        while let Some(data) = frame::read_frame(&mut cursor, DEFAULT_MAX_FRAME_BYTES).unwrap() {
            out.push(frame::decode(&data).unwrap());
        }
        out
    }

    fn dispatcher(input: &[u8]) -> (Dispatcher, MemoryChannel) {
        let chan = MemoryChannel::with_input(input);
        let handle = ConnectionHandle::from_channel(chan.clone(), "memory", DEFAULT_MAX_FRAME_BYTES);
        (Dispatcher::new(handle, DEFAULT_MAX_FRAME_BYTES), chan)
    }

    fn sim() -> MemorySim {
        MemorySim::default().with_signal("tb.dut.x", SignalValue::Int(9))
    }

    #[test]
    fn test_one_response_per_frame_in_order() {
        let ops = vec![
            Operation::Ping,
            Operation::Read { path: "tb.dut.x".to_string() },
            Operation::Time,
            Operation::Ping,
        ];
        let (input, ids) = frames(&ops);
        let (mut d, chan) = dispatcher(&input);
        let mut sim = sim();

        for _ in 0..ops.len() {
            assert_eq!(d.cycle(&mut sim), CycleOutcome::Served);
        }
        assert_eq!(d.state(), DispatchState::AwaitingMessage);

        let resps = responses(&chan.written());
        let got: Vec<Uuid> = resps.iter().map(|r| r.request_id).collect();
        assert_eq!(got, ids);
        assert_eq!(d.stats().commands, 4);

        assert_eq!(d.cycle(&mut sim), CycleOutcome::Closed(CloseReason::PeerClosed));
        assert!(d.is_closed());
    }

    #[test]
    fn test_read_returns_current_value_and_stays_open() {
        let (input, ids) = frames(&[Operation::Read { path: "tb.dut.x".to_string() }]);
        let (mut d, chan) = dispatcher(&input);

        assert_eq!(d.cycle(&mut sim()), CycleOutcome::Served);
        assert!(!d.is_closed());

        let resps = responses(&chan.written());
        assert_eq!(resps.len(), 1);
        assert_eq!(resps[0].request_id, ids[0]);
        assert_eq!(
            resps[0].reply(),
            Some(&Reply::Value {
                path: "tb.dut.x".to_string(),
                value: SignalValue::Int(9)
            })
        );
    }

    #[test]
    fn test_apply_error_keeps_session_open() {
        let (input, _) = frames(&[
            Operation::Read { path: "tb.dut.missing".to_string() },
            Operation::Write {
                path: "tb.dut.x".to_string(),
                value: SignalValue::bits("2"),
            },
            Operation::Ping,
        ]);
        let (mut d, chan) = dispatcher(&input);
        let mut sim = sim();

        for _ in 0..3 {
            assert_eq!(d.cycle(&mut sim), CycleOutcome::Served);
        }
        let resps = responses(&chan.written());
        assert!(matches!(&resps[0].status, Status::Error { kind, .. } if kind == "unknown_object"));
        assert!(matches!(&resps[1].status, Status::Error { kind, .. } if kind == "invalid_value"));
        assert!(resps[2].is_ok());
        assert_eq!(d.stats().apply_failures, 2);
        assert_eq!(sim.value("tb.dut.x"), Some(&SignalValue::Int(9)));
    }

    #[test]
    fn test_truncated_frame_closes_without_response() {
        let (mut input, _) = frames(&[Operation::Ping, Operation::Ping]);
        let (tail, _) = frames(&[Operation::Time]);
        input.truncate(input.len() - 3);
        input.extend(tail);

        let (mut d, chan) = dispatcher(&input);
        let mut sim = sim();
        assert_eq!(d.cycle(&mut sim), CycleOutcome::Served);
        let outcome = d.cycle(&mut sim);
        assert!(matches!(outcome, CycleOutcome::Closed(CloseReason::Protocol(_))), "{outcome:?}");

        // Nothing after the corruption point is answered.
        assert!(matches!(d.cycle(&mut sim), CycleOutcome::Closed(_)));
        assert_eq!(responses(&chan.written()).len(), 1);
    }

    #[test]
    fn test_unknown_operation_closes() {
        let body = format!(r#"{{"request_id":"{}","op":"reboot"}}"#, Uuid::nil());
        let bytes = frame::encode(&serde_json::from_str::<serde_json::Value>(&body).unwrap(), DEFAULT_MAX_FRAME_BYTES).unwrap();
        let (mut d, chan) = dispatcher(&bytes);

        let outcome = d.cycle(&mut sim());
        assert!(matches!(outcome, CycleOutcome::Closed(CloseReason::Protocol(_))));
        assert!(chan.written().is_empty());
    }

    #[test]
    fn test_write_force_release() {
        let path = "tb.dut.x".to_string();
        let (input, _) = frames(&[
            Operation::Force {
                path: path.clone(),
                value: SignalValue::Int(1),
            },
            Operation::Write {
                path: path.clone(),
                value: SignalValue::Int(2),
            },
            Operation::Release { path: path.clone() },
        ]);
        let (mut d, chan) = dispatcher(&input);
        let mut sim = sim();

        d.cycle(&mut sim);
        assert!(sim.is_forced(&path));
        d.cycle(&mut sim);
        assert_eq!(sim.value(&path), Some(&SignalValue::Int(1)));
        d.cycle(&mut sim);
        assert!(!sim.is_forced(&path));

        let resps = responses(&chan.written());
        assert_eq!(
            resps[2].reply(),
            Some(&Reply::Value {
                path,
                value: SignalValue::Int(2)
            })
        );
    }

    #[test]
    fn test_advance_answers_on_resume() {
        let (input, ids) = frames(&[Operation::Advance { ticks: 100 }, Operation::Ping]);
        let (mut d, chan) = dispatcher(&input);
        let mut sim = sim();

        assert_eq!(d.cycle(&mut sim), CycleOutcome::Yielded { ticks: 100 });
        assert!(d.is_suspended());
        assert!(chan.written().is_empty());

        sim.advance(100);
        assert_eq!(d.resume(&mut sim), CycleOutcome::Served);
        assert!(!d.is_suspended());

        let resps = responses(&chan.written());
        assert_eq!(resps.len(), 2);
        assert_eq!(resps[0].request_id, ids[0]);
        assert_eq!(resps[0].reply(), Some(&Reply::Time { time: SimTime(100) }));
        assert_eq!(resps[1].request_id, ids[1]);
    }

    #[test]
    fn test_service_cycle_during_advance_is_noop() {
        let (input, ids) = frames(&[Operation::Advance { ticks: 100 }, Operation::Ping]);
        let (mut d, chan) = dispatcher(&input);
        let mut sim = sim();

        assert_eq!(d.cycle(&mut sim), CycleOutcome::Yielded { ticks: 100 });
        sim.advance(10);
        assert_eq!(d.cycle(&mut sim), CycleOutcome::Suspended);
        assert_eq!(d.cycle(&mut sim), CycleOutcome::Suspended);
        assert!(chan.written().is_empty());
        assert_eq!(d.stats().commands, 1);

        sim.advance(90);
        assert_eq!(d.resume(&mut sim), CycleOutcome::Served);
        let resps = responses(&chan.written());
        assert_eq!(resps.len(), 2);
        assert_eq!(resps[0].request_id, ids[0]);
        assert_eq!(resps[0].reply(), Some(&Reply::Time { time: SimTime(100) }));
    }

    #[test]
    fn test_shutdown_answers_outstanding_advance() {
        let (input, ids) = frames(&[Operation::Advance { ticks: 100 }]);
        let (mut d, chan) = dispatcher(&input);
        let mut sim = sim();

        assert_eq!(d.cycle(&mut sim), CycleOutcome::Yielded { ticks: 100 });
        sim.advance(40);
        d.shutdown(&sim);

        let resps = responses(&chan.written());
        assert_eq!(resps.len(), 1);
        assert_eq!(resps[0].request_id, ids[0]);
        assert_eq!(resps[0].reply(), Some(&Reply::Time { time: SimTime(40) }));
        assert_eq!(d.close_reason(), Some(&CloseReason::Shutdown));
        assert!(!d.is_suspended());
    }

    #[test]
    fn test_oversized_response_fails_command_not_session() {
        let (input, ids) = frames(&[Operation::Read { path: "tb.dut.bus".to_string() }, Operation::Ping]);
        let chan = MemoryChannel::with_input(&input);
        let handle = ConnectionHandle::from_channel(chan.clone(), "memory", 256);
        let mut d = Dispatcher::new(handle, 256);
        let mut sim = sim().with_signal("tb.dut.bus", SignalValue::bits("10".repeat(100)));

        assert_eq!(d.cycle(&mut sim), CycleOutcome::Served);
        assert_eq!(d.cycle(&mut sim), CycleOutcome::Served);
        assert!(!d.is_closed());
        assert_eq!(d.stats().apply_failures, 1);

        let resps = responses(&chan.written());
        assert_eq!(resps.len(), 2);
        assert_eq!(resps[0].request_id, ids[0]);
        match &resps[0].status {
            Status::Error { kind, message } => {
                assert_eq!(kind, "rejected");
                assert!(message.contains("frame limit"), "{message}");
                assert!(message.contains("tb.dut.bus"), "{message}");
            }
            other => panic!("expected an error, got {other:?}"),
        }
        assert!(resps[1].is_ok());
    }

    #[test]
    fn test_zero_advance_answers_immediately() {
        let (input, _) = frames(&[Operation::Advance { ticks: 0 }]);
        let (mut d, chan) = dispatcher(&input);
        assert_eq!(d.cycle(&mut sim()), CycleOutcome::Served);
        assert_eq!(responses(&chan.written()).len(), 1);
    }

    #[test]
    fn test_finish_acks_then_closes() {
        let (input, _) = frames(&[Operation::Finish, Operation::Ping]);
        let (mut d, chan) = dispatcher(&input);
        let mut sim = sim();

        assert_eq!(d.cycle(&mut sim), CycleOutcome::Closed(CloseReason::Finished));
        assert!(sim.finished());
        let resps = responses(&chan.written());
        assert_eq!(resps.len(), 1);
        assert_eq!(resps[0].reply(), Some(&Reply::Ack));
    }

    #[test]
    fn test_print_goes_to_simulator_output() {
        let (input, _) = frames(&[Operation::Print {
            message: "hello from controller".to_string(),
        }]);
        let (mut d, _) = dispatcher(&input);
        let mut sim = sim();
        d.cycle(&mut sim);
        assert_eq!(sim.output(), ["hello from controller".to_string()]);
    }

    #[test]
    fn test_write_failure_closes() {
        let (input, _) = frames(&[Operation::Ping, Operation::Ping]);
        let mut chan = MemoryChannel::with_input(&input);
        chan.fail_writes = true;
        let handle = ConnectionHandle::from_channel(chan, "memory", DEFAULT_MAX_FRAME_BYTES);
        let mut d = Dispatcher::new(handle, DEFAULT_MAX_FRAME_BYTES);

        let outcome = d.cycle(&mut sim());
        assert!(matches!(outcome, CycleOutcome::Closed(CloseReason::Connection(_))));
        assert_eq!(d.state(), DispatchState::Closed);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (input, _) = frames(&[Operation::Ping]);
        let (mut d, chan) = dispatcher(&input);
        let shut_sim = sim();
        d.shutdown(&shut_sim);
        d.shutdown(&shut_sim);
        assert_eq!(d.close_reason(), Some(&CloseReason::Shutdown));
        assert!(matches!(d.cycle(&mut sim()), CycleOutcome::Closed(CloseReason::Shutdown)));
        assert_eq!(d.resume(&mut sim()), CycleOutcome::Closed(CloseReason::Shutdown));
        assert!(chan.written().is_empty());
    }
}
