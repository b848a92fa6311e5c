use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use tempfile::TempDir;

use hdl_bridge::{
    Bridge, CloseReason, Controller, ControllerListener, DispatchState, EntryPoint, InvocationArgs, MemorySim,
    Operation, RecordingScheduler, Reply, Response, SignalValue, SimTime, Status, STATUS_FATAL, STATUS_OK,
};

const TIMEOUT: Duration = Duration::from_secs(10);

struct Harness {
    _dir: TempDir,
    socket: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("ctl.sock");
        Self { _dir: dir, socket }
    }

    fn plus_arg(&self) -> String {
        format!("+socket+{}", self.socket.display())
    }

    fn bridge(&self, extra: &[&str]) -> (Bridge<MemorySim>, RecordingScheduler) {
        let mut args = vec![self.plus_arg()];
        args.extend(extra.iter().map(|s| (*s).to_string()));
        let sim = MemorySim::new(InvocationArgs::new(args))
            .with_signal("tb.dut.a", SignalValue::Int(7))
            .with_signal("tb.dut.b", SignalValue::bits("0000"));
        let recorder = RecordingScheduler::new();
        let mut bridge = Bridge::new(sim, Box::new(recorder.clone())).unwrap();
        bridge.register_callbacks().unwrap();
        (bridge, recorder)
    }

    /// Binds the controller socket and runs `script` against the first
    /// connection on its own thread. The script's result arrives on the
    /// returned channel.
    fn controller<T, F>(&self, script: F) -> (Receiver<T>, JoinHandle<()>)
    where
        T: Send + 'static,
        F: FnOnce(&mut Controller) -> T + Send + 'static,
    {
        let listener = ControllerListener::bind(&self.socket).unwrap();
        let (tx, rx) = bounded(1);
        let handle = thread::spawn(move || {
            let mut controller = listener.accept().unwrap();
            let out = script(&mut controller);
            tx.send(out).unwrap();
            controller.close();
        });
        (rx, handle)
    }
}

fn value_of(resp: &Response) -> &SignalValue {
    match resp.reply() {
        Some(Reply::Value { value, .. }) => value,
        other => panic!("expected a value reply, got {other:?}"),
    }
}

#[test]
fn pipelined_commands_get_one_response_each_in_order() {
    let h = Harness::new();
    let (rx, ctl) = h.controller(|c| {
        let ids = vec![
            c.send(Operation::Ping).unwrap(),
            c.send(Operation::Read { path: "tb.dut.a".into() }).unwrap(),
            c.send(Operation::Read { path: "tb.dut.missing".into() }).unwrap(),
            c.send(Operation::Write {
                path: "tb.dut.b".into(),
                value: SignalValue::bits("1010"),
            })
            .unwrap(),
        ];
        let responses: Vec<Response> = (0..ids.len()).map(|_| c.recv().unwrap().unwrap()).collect();
        (ids, responses)
    });

    let (mut bridge, _) = h.bridge(&[]);
    assert_eq!(bridge.on_start(), STATUS_OK);
    for _ in 0..3 {
        assert_eq!(bridge.invoke(EntryPoint::Service), STATUS_OK);
    }

    let (ids, responses) = rx.recv_timeout(TIMEOUT).unwrap();
    let got: Vec<_> = responses.iter().map(|r| r.request_id).collect();
    assert_eq!(got, ids);

    assert!(matches!(responses[0].reply(), Some(Reply::Pong { time: SimTime(0) })));
    assert_eq!(value_of(&responses[1]).as_u64(), Some(7));
    match &responses[2].status {
        Status::Error { kind, message } => {
            assert_eq!(kind, "unknown_object");
            assert!(message.contains("tb.dut.missing"));
        }
        other => panic!("expected an error, got {other:?}"),
    }
    assert!(matches!(responses[3].reply(), Some(Reply::Ack)));
    assert_eq!(bridge.sim().value("tb.dut.b"), Some(&SignalValue::bits("1010")));

    let stats = bridge.session().unwrap().stats();
    assert_eq!(stats.commands, 4);
    assert_eq!(stats.apply_failures, 1);

    // Controller hangs up; the next cycle sees a clean close.
    ctl.join().unwrap();
    assert_eq!(bridge.on_service(), STATUS_OK);
    assert!(bridge.session().is_none());
    assert_eq!(bridge.last_close(), Some(&CloseReason::PeerClosed));
    assert!(bridge.sim().finished());
}

#[test]
fn truncated_frame_ends_session_with_error() {
    let h = Harness::new();
    let (rx, ctl) = h.controller(|c| {
        let mut partial = vec![1u8];
        partial.extend_from_slice(&100u32.to_le_bytes());
        partial.extend_from_slice(b"{\"request_");
        c.send_raw(&partial).unwrap();
        c.close();
    });

    let (mut bridge, _) = h.bridge(&[]);
    assert_eq!(bridge.on_start(), STATUS_FATAL);
    rx.recv_timeout(TIMEOUT).unwrap();
    ctl.join().unwrap();

    assert!(bridge.session().is_none());
    match bridge.last_close() {
        Some(CloseReason::Protocol(msg)) => assert!(msg.contains("payload"), "{msg}"),
        other => panic!("expected a protocol close, got {other:?}"),
    }
    assert!(bridge.sim().output().iter().any(|l| l.starts_with("[hdl-bridge] ERROR:")));
    assert!(bridge.sim().finished());
    // Later callbacks are harmless.
    assert_eq!(bridge.on_service(), STATUS_OK);
    assert_eq!(bridge.on_end(), STATUS_OK);
}

#[test]
fn missing_listener_fails_start() {
    let h = Harness::new();
    let (mut bridge, _) = h.bridge(&[]);

    assert_eq!(bridge.on_start(), STATUS_FATAL);
    assert!(bridge.session().is_none());
    let out = bridge.sim().output();
    assert!(out.iter().any(|l| l.contains("ERROR") && l.contains("ctl.sock")));
    assert!(out.iter().any(|l| l.contains("couldn't connect")));
}

#[test]
fn advance_yields_to_simulator_and_resumes_after_delay() {
    let h = Harness::new();
    let (rx, ctl) = h.controller(|c| {
        let advanced = c.call(Operation::Advance { ticks: 10 }).unwrap();
        let finished = c.call(Operation::Finish).unwrap();
        let after = c.recv().unwrap();
        (advanced, finished, after)
    });

    let (mut bridge, recorder) = h.bridge(&[]);
    assert_eq!(bridge.on_start(), STATUS_OK);
    assert_eq!(bridge.session().unwrap().state(), DispatchState::AwaitingMessage);

    let delays = recorder.take_delays();
    assert_eq!(delays, vec![(10, EntryPoint::Resume)]);

    // Host runs the scheduled delay, then fires the callback.
    bridge.sim_mut().advance(10);
    assert_eq!(bridge.invoke(EntryPoint::Resume), STATUS_OK);

    let (advanced, finished, after) = rx.recv_timeout(TIMEOUT).unwrap();
    ctl.join().unwrap();

    assert!(matches!(advanced.reply(), Some(Reply::Time { time: SimTime(10) })));
    assert!(matches!(finished.reply(), Some(Reply::Ack)));
    assert!(after.is_none(), "bridge should hang up after finish");
    assert_eq!(bridge.last_close(), Some(&CloseReason::Finished));
    assert!(bridge.sim().finished());
    // Permanent registrations are untouched by the delay.
    assert_eq!(bridge.registrar().registrations().len(), 3);
}

#[test]
fn drain_mode_serves_until_the_controller_yields() {
    let h = Harness::new();
    let (rx, ctl) = h.controller(|c| {
        c.send(Operation::Write {
            path: "tb.dut.a".into(),
            value: SignalValue::Int(5),
        })
        .unwrap();
        c.send(Operation::Read { path: "tb.dut.a".into() }).unwrap();
        c.send(Operation::Advance { ticks: 3 }).unwrap();
        let write = c.recv().unwrap().unwrap();
        let read = c.recv().unwrap().unwrap();
        (write, read)
    });

    let (mut bridge, recorder) = h.bridge(&["+bridge_mode+drain"]);
    assert_eq!(bridge.on_start(), STATUS_OK);
    assert_eq!(bridge.session().unwrap().stats().commands, 3);
    assert_eq!(recorder.take_delays(), vec![(3, EntryPoint::Resume)]);

    let (write, read) = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(write.is_ok());
    assert_eq!(value_of(&read).as_u64(), Some(5));

    ctl.join().unwrap();
    assert_eq!(bridge.on_end(), STATUS_OK);
    assert_eq!(bridge.last_close(), Some(&CloseReason::Shutdown));
}

#[test]
fn end_of_simulation_closes_the_connection() {
    let h = Harness::new();
    let (rx, ctl) = h.controller(|c| {
        let pong = c.call(Operation::Ping).unwrap();
        let after = c.recv().unwrap();
        (pong, after)
    });

    let (mut bridge, _) = h.bridge(&[]);
    assert_eq!(bridge.on_start(), STATUS_OK);
    assert_eq!(bridge.on_end(), STATUS_OK);
    assert!(bridge.session().is_none());

    let (pong, after) = rx.recv_timeout(TIMEOUT).unwrap();
    ctl.join().unwrap();
    assert!(pong.is_ok());
    assert!(after.is_none());
    assert_eq!(bridge.last_close(), Some(&CloseReason::Shutdown));
    assert_eq!(bridge.on_end(), STATUS_OK);
}

#[test]
fn service_task_before_the_delay_leaves_the_advance_pending() {
    let h = Harness::new();
    let (rx, ctl) = h.controller(|c| {
        let advanced = c.call(Operation::Advance { ticks: 100 }).unwrap();
        let pong = c.call(Operation::Ping).unwrap();
        (advanced, pong)
    });

    let (mut bridge, recorder) = h.bridge(&[]);
    assert_eq!(bridge.on_start(), STATUS_OK);
    assert_eq!(recorder.take_delays(), vec![(100, EntryPoint::Resume)]);

    // The testbench calls the service task partway through the delay.
    bridge.sim_mut().advance(10);
    assert_eq!(bridge.invoke(EntryPoint::Service), STATUS_OK);
    assert!(bridge.session().unwrap().is_suspended());
    assert!(recorder.take_delays().is_empty());

    bridge.sim_mut().advance(90);
    assert_eq!(bridge.invoke(EntryPoint::Resume), STATUS_OK);

    let (advanced, pong) = rx.recv_timeout(TIMEOUT).unwrap();
    ctl.join().unwrap();
    assert!(matches!(advanced.reply(), Some(Reply::Time { time: SimTime(100) })), "{advanced:?}");
    assert!(matches!(pong.reply(), Some(Reply::Pong { time: SimTime(100) })));
    assert_eq!(bridge.session().unwrap().stats().commands, 2);
}

#[test]
fn end_of_simulation_answers_an_outstanding_advance() {
    let h = Harness::new();
    let (rx, ctl) = h.controller(|c| {
        c.send(Operation::Advance { ticks: 100 }).unwrap();
        let answer = c.recv().unwrap();
        let after = c.recv().unwrap();
        (answer, after)
    });

    let (mut bridge, _) = h.bridge(&[]);
    assert_eq!(bridge.on_start(), STATUS_OK);
    bridge.sim_mut().advance(60);
    assert_eq!(bridge.on_end(), STATUS_OK);

    let (answer, after) = rx.recv_timeout(TIMEOUT).unwrap();
    ctl.join().unwrap();
    let answer = answer.expect("advance should be answered before the hang-up");
    assert!(matches!(answer.reply(), Some(Reply::Time { time: SimTime(60) })));
    assert!(after.is_none());
    assert_eq!(bridge.last_close(), Some(&CloseReason::Shutdown));
}

#[test]
fn response_over_the_frame_limit_fails_only_that_command() {
    let h = Harness::new();
    let (rx, ctl) = h.controller(|c| {
        let wide = c.call(Operation::Read { path: "tb.dut.wide".into() }).unwrap();
        let pong = c.call(Operation::Ping).unwrap();
        (wide, pong)
    });

    let (mut bridge, _) = h.bridge(&["+bridge_max_frame+256"]);
    bridge.sim_mut().set_signal("tb.dut.wide", SignalValue::bits("1".repeat(200)));
    assert_eq!(bridge.on_start(), STATUS_OK);
    assert_eq!(bridge.on_service(), STATUS_OK);

    let (wide, pong) = rx.recv_timeout(TIMEOUT).unwrap();
    match &wide.status {
        Status::Error { kind, message } => {
            assert_eq!(kind, "rejected");
            assert!(message.contains("tb.dut.wide"), "{message}");
        }
        other => panic!("expected an error, got {other:?}"),
    }
    assert!(pong.is_ok());

    let session = bridge.session().unwrap();
    assert_eq!(session.stats().apply_failures, 1);
    assert!(bridge.last_close().is_none());
    ctl.join().unwrap();
}
