//! Scheduling tests for epa-kernel

use std::cell::RefCell;

use epa_kernel::{
    Action, Agent, BlockHeap, DeferPolicy, EpaError, Event, EventRef, Hierarchy, Kernel,
    KernelConfig, LogLevel, LogMsg, LogSink, MemClass, NullSink, Policy, Priority, RefCount,
    SchedStatus, Signal, StateMachine, Tick,
};

const FORWARD: Signal = Signal::new(10);
const PING: Signal = Signal::new(11);
const DONE: Signal = Signal::new(12);
const WAIT: Signal = Signal::new(13);
const GO: Signal = Signal::new(14);
const DATA: Signal = Signal::new(15);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    id: u8,
    signal: Signal,
    generator: Option<Priority>,
    payload: Vec<u8>,
}

type Log = RefCell<Vec<Entry>>;

type WorkerAgent<'l> = Agent<Worker<'l>>;

fn signals(log: &Log) -> Vec<(u8, Signal)> {
    log.borrow().iter().map(|e| (e.id, e.signal)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Top,
    Active,
    Idle,
    Busy,
}

/// Records every user signal it handles. `WAIT` is deferred until `GO`
/// moves it from `Idle` to `Busy`; `FORWARD` posts a `PING` to `target`.
struct Worker<'l> {
    id: u8,
    log: &'l Log,
    target: Option<Priority>,
}

impl<'l> Worker<'l> {
    fn new(id: u8, log: &'l Log) -> Self {
        Self {
            id,
            log,
            target: None,
        }
    }

    fn forwarding_to(mut self, target: Priority) -> Self {
        self.target = Some(target);
        self
    }

    fn record<M: MemClass>(&self, kernel: &Kernel<'_, M>, signal: Signal, event: &Event) {
        self.log.borrow_mut().push(Entry {
            id: self.id,
            signal,
            generator: event.generator(),
            payload: kernel.with_payload(event.handle(), |p| p.to_vec()),
        });
    }
}

impl Hierarchy for Worker<'_> {
    type State = Phase;
    const TOP: Phase = Phase::Top;
}

impl<'a, M: MemClass> StateMachine<Kernel<'a, M>> for Worker<'_> {
    fn handle(&mut self, kernel: &Kernel<'a, M>, state: Phase, event: &Event) -> Action<Phase> {
        let sig = event.signal();
        match state {
            Phase::Top => match sig {
                Signal::INIT => Action::Tran(Phase::Idle),
                _ => Action::Ignored,
            },
            Phase::Active => match sig {
                FORWARD => {
                    self.record(kernel, sig, event);
                    if let Some(target) = self.target {
                        if let Ok(ping) = kernel.new_event(PING, 0) {
                            let _ = kernel.post_to(target, ping);
                        }
                    }
                    self.record(kernel, DONE, event);
                    Action::Handled
                }
                s if !s.is_reserved() => {
                    self.record(kernel, sig, event);
                    Action::Handled
                }
                _ => Action::Super(Phase::Top),
            },
            Phase::Idle => match sig {
                WAIT => Action::Deferred,
                GO => {
                    self.record(kernel, sig, event);
                    Action::Tran(Phase::Busy)
                }
                _ => Action::Super(Phase::Active),
            },
            Phase::Busy => Action::Super(Phase::Active),
        }
    }
}

#[derive(Default)]
struct Capture(RefCell<Vec<(LogLevel, LogMsg, u32)>>);

impl LogSink for Capture {
    fn log_msg(&self, level: LogLevel, msg: LogMsg, value: u32) {
        self.0.borrow_mut().push((level, msg, value));
    }
}

fn prio(raw: u8) -> Priority {
    Priority::new(raw).unwrap()
}

fn cooperative() -> KernelConfig {
    KernelConfig::builder().name("test").build()
}

fn preemptive() -> KernelConfig {
    KernelConfig::builder()
        .name("test")
        .policy(Policy::Preemptive)
        .build()
}

#[test]
fn test_config_builder() {
    fn on_idle() {}

    let config = KernelConfig::builder()
        .name("bench")
        .policy(Policy::Preemptive)
        .timestamps(true)
        .queue_capacity(16)
        .idle_callback(on_idle)
        .build();

    assert_eq!(config.name, "bench");
    assert_eq!(config.policy, Policy::Preemptive);
    assert!(config.timestamps);
    assert_eq!(config.queue_capacity, 16);
    assert!(config.idle_callback.is_some());

    let defaults = KernelConfig::default();
    assert_eq!(defaults.policy, Policy::Cooperative);
    assert_eq!(defaults.queue_capacity, epa_kernel::DEFAULT_QUEUE_CAPACITY);
}

#[test]
fn test_start_runs_initial_transition() {
    let log = Log::default();
    let agent = WorkerAgent::new(prio(4), Worker::new(4, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap());

    kernel.start_agent(&agent, 4).unwrap();
    assert!(kernel.is_ready(prio(4)));
    assert_eq!(agent.state(), Some(Phase::Top));

    assert_eq!(kernel.run_until_idle(), 1);
    assert_eq!(agent.state(), Some(Phase::Idle));
    assert!(agent.is_in(&kernel, Phase::Active));
    assert!(kernel.is_idle());
}

#[test]
fn test_higher_priority_dispatched_first() {
    let log = Log::default();
    let low = WorkerAgent::new(prio(3), Worker::new(3, &log));
    let high = WorkerAgent::new(prio(7), Worker::new(7, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap());
    kernel.start_agent(&low, 4).unwrap();
    kernel.start_agent(&high, 4).unwrap();
    kernel.run_until_idle();

    kernel.post(&low, EventRef::Const(DATA)).unwrap();
    kernel.post(&high, EventRef::Const(DATA)).unwrap();
    kernel.run_until_idle();

    assert_eq!(signals(&log), vec![(7, DATA), (3, DATA)]);
}

#[test]
fn test_fifo_and_lifo_through_kernel() {
    let log = Log::default();
    let agent = WorkerAgent::new(prio(2), Worker::new(2, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap()).with_sink(&NullSink);
    kernel.start_agent(&agent, 4).unwrap();
    kernel.run_until_idle();

    let a = Signal::new(20);
    let b = Signal::new(21);
    kernel.post(&agent, EventRef::Const(a)).unwrap();
    kernel.post(&agent, EventRef::Const(b)).unwrap();
    kernel.run_until_idle();
    assert_eq!(signals(&log), vec![(2, a), (2, b)]);

    log.borrow_mut().clear();
    kernel.post(&agent, EventRef::Const(a)).unwrap();
    kernel.post_ahead(&agent, EventRef::Const(b)).unwrap();
    kernel.run_until_idle();
    assert_eq!(signals(&log), vec![(2, b), (2, a)]);
}

#[test]
fn test_full_queue_drops_and_logs() {
    let log = Log::default();
    let capture = Capture::default();
    let agent = WorkerAgent::new(prio(6), Worker::new(6, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap()).with_sink(&capture);
    kernel.start_agent(&agent, 2).unwrap();
    kernel.run_until_idle();
    let baseline = kernel.free_space();

    let mut posted = Vec::new();
    for raw in 30..33 {
        let evt = kernel.new_event(Signal::new(raw), 4).unwrap();
        posted.push(kernel.post(&agent, evt));
    }

    assert_eq!(posted, vec![Ok(()), Ok(()), Err(EpaError::QueueFull)]);
    assert!(capture
        .0
        .borrow()
        .contains(&(LogLevel::Warn, LogMsg::QueueOverflow, 6)));

    kernel.run_until_idle();
    assert_eq!(
        signals(&log),
        vec![(6, Signal::new(30)), (6, Signal::new(31))]
    );
    assert_eq!(kernel.free_space(), baseline);
}

#[test]
fn test_event_posted_twice_reclaimed_once() {
    let log = Log::default();
    let first = WorkerAgent::new(prio(8), Worker::new(8, &log));
    let second = WorkerAgent::new(prio(9), Worker::new(9, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap());
    kernel.start_agent(&first, 4).unwrap();
    kernel.start_agent(&second, 4).unwrap();
    kernel.run_until_idle();
    let baseline = kernel.free_space();

    let evt = kernel.new_event(DATA, 3).unwrap();
    kernel.write_payload(evt, &[1, 2, 3]);
    kernel.post(&first, evt).unwrap();
    kernel.post(&second, evt).unwrap();
    assert_eq!(kernel.header(evt).map(|h| h.refs.count()), Some(2));

    assert!(kernel.dispatch_once());
    assert_eq!(kernel.header(evt).map(|h| h.refs.count()), Some(1));
    assert!(kernel.free_space() < baseline);

    assert!(kernel.dispatch_once());
    assert!(!kernel.dispatch_once());
    assert_eq!(kernel.free_space(), baseline);

    let entries = log.borrow();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.payload == vec![1, 2, 3]));
}

#[test]
fn test_post_past_reference_limit_is_refused() {
    let log = Log::default();
    let capture = Capture::default();
    let agent = WorkerAgent::new(prio(6), Worker::new(6, &log));
    let mut arena = [0u8; 2048];
    let kernel = Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap()).with_sink(&capture);
    kernel.start_agent(&agent, 64).unwrap();
    kernel.run_until_idle();
    let baseline = kernel.free_space();

    let evt = kernel.new_event(DATA, 1).unwrap();
    for _ in 0..RefCount::MAX {
        kernel.post(&agent, evt).unwrap();
    }
    assert_eq!(kernel.post(&agent, evt), Err(EpaError::RefCountExhausted));
    assert!(capture
        .0
        .borrow()
        .contains(&(LogLevel::Warn, LogMsg::RefOverflow, 6)));

    assert_eq!(kernel.run_until_idle(), RefCount::MAX as usize);
    assert_eq!(log.borrow().len(), RefCount::MAX as usize);
    assert_eq!(kernel.free_space(), baseline);
    assert!(!capture
        .0
        .borrow()
        .iter()
        .any(|(_, msg, _)| *msg == LogMsg::NoAgent));
}

#[test]
fn test_preemptive_post_runs_higher_agent_immediately() {
    let log = Log::default();
    let low = WorkerAgent::new(prio(2), Worker::new(2, &log).forwarding_to(prio(5)));
    let high = WorkerAgent::new(prio(5), Worker::new(5, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(preemptive(), BlockHeap::new(&mut arena).unwrap());
    kernel.start_agent(&low, 4).unwrap();
    kernel.start_agent(&high, 4).unwrap();
    kernel.run_until_idle();
    let baseline = kernel.free_space();

    kernel.post(&low, EventRef::Const(FORWARD)).unwrap();

    assert_eq!(
        signals(&log),
        vec![(2, FORWARD), (5, PING), (2, DONE)]
    );
    // The PING was minted while priority 2 was running.
    assert_eq!(log.borrow()[1].generator, Some(prio(2)));
    assert_eq!(kernel.active_priority(), 0);
    assert_eq!(kernel.free_space(), baseline);
}

#[test]
fn test_cooperative_post_waits_for_completion() {
    let log = Log::default();
    let low = WorkerAgent::new(prio(2), Worker::new(2, &log).forwarding_to(prio(5)));
    let high = WorkerAgent::new(prio(5), Worker::new(5, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap());
    kernel.start_agent(&low, 4).unwrap();
    kernel.start_agent(&high, 4).unwrap();
    kernel.run_until_idle();

    kernel.post(&low, EventRef::Const(FORWARD)).unwrap();
    assert!(log.borrow().is_empty());

    kernel.run_until_idle();
    assert_eq!(
        signals(&log),
        vec![(2, FORWARD), (2, DONE), (5, PING)]
    );
}

#[test]
fn test_isr_guard_defers_scheduling_to_exit() {
    let log = Log::default();
    let agent = WorkerAgent::new(prio(3), Worker::new(3, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(preemptive(), BlockHeap::new(&mut arena).unwrap());
    kernel.start_agent(&agent, 4).unwrap();
    kernel.run_until_idle();

    {
        let _outer = kernel.isr_enter();
        {
            let _inner = kernel.isr_enter();
            let evt = kernel.new_event(DATA, 0).unwrap();
            critical_section::with(|cs| kernel.post_i(cs, &agent, evt)).unwrap();
        }
        assert!(log.borrow().is_empty());
        assert!(kernel.is_ready(prio(3)));
    }

    assert_eq!(signals(&log), vec![(3, DATA)]);
    assert!(kernel.is_idle());
}

#[test]
fn test_scheduler_lock_holds_back_low_priorities() {
    let log = Log::default();
    let agent = WorkerAgent::new(prio(3), Worker::new(3, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(preemptive(), BlockHeap::new(&mut arena).unwrap());
    kernel.start_agent(&agent, 4).unwrap();
    kernel.run_until_idle();

    let status = kernel.lock_scheduler(5);
    assert_eq!(status, SchedStatus::Locked(0));
    assert_eq!(kernel.lock_scheduler(4), SchedStatus::Unlocked);

    kernel.post(&agent, EventRef::Const(DATA)).unwrap();
    assert!(!kernel.dispatch_once());
    assert!(log.borrow().is_empty());

    kernel.unlock_scheduler(status);
    assert_eq!(signals(&log), vec![(3, DATA)]);
}

#[test]
fn test_deferred_event_waits_for_state_change() {
    let log = Log::default();
    let agent = WorkerAgent::new(prio(4), Worker::new(4, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap());
    kernel.start_agent(&agent, 4).unwrap();
    kernel.run_until_idle();
    let baseline = kernel.free_space();

    let wait = kernel.new_event(WAIT, 0).unwrap();
    kernel.post(&agent, wait).unwrap();
    kernel.post(&agent, EventRef::Const(GO)).unwrap();

    assert_eq!(kernel.run_until_idle(), 3);
    assert_eq!(signals(&log), vec![(4, GO), (4, WAIT)]);
    assert_eq!(agent.state(), Some(Phase::Busy));
    assert_eq!(kernel.free_space(), baseline);
}

#[test]
fn test_deferred_to_head_is_retried_first() {
    let log = Log::default();
    let agent = WorkerAgent::new(prio(4), Worker::new(4, &log)).with_defer_policy(DeferPolicy::Head);
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap());
    kernel.start_agent(&agent, 4).unwrap();
    kernel.run_until_idle();

    kernel.post(&agent, EventRef::Const(WAIT)).unwrap();
    kernel.post(&agent, EventRef::Const(DATA)).unwrap();

    // WAIT keeps bouncing back to the head while the agent stays Idle.
    for _ in 0..3 {
        assert!(kernel.dispatch_once());
    }
    assert!(log.borrow().is_empty());
    assert_eq!(
        kernel.queue_stats(&agent).map(|s| s.len),
        Some(2)
    );
}

#[test]
fn test_deinit_drains_and_destroy_frees() {
    let log = Log::default();
    let capture = Capture::default();
    let agent = WorkerAgent::new(prio(11), Worker::new(11, &log));
    let mut arena = [0u8; 1024];
    let kernel = Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap()).with_sink(&capture);
    let empty = kernel.free_space();

    kernel.start_agent(&agent, 4).unwrap();
    kernel.run_until_idle();
    for raw in 40..43 {
        let evt = kernel.new_event(Signal::new(raw), 8).unwrap();
        kernel.post(&agent, evt).unwrap();
    }

    assert_eq!(kernel.destroy_agent(&agent), Ok(3));
    assert!(kernel.agent(prio(11)).is_none());
    assert!(!kernel.is_ready(prio(11)));
    assert!(!agent.is_started());
    assert_eq!(kernel.free_space(), empty);
    assert!(log.borrow().is_empty());
    assert!(capture
        .0
        .borrow()
        .contains(&(LogLevel::Info, LogMsg::AgentStopped, 11)));

    // The agent can be brought back up.
    kernel.start_agent(&agent, 4).unwrap();
    kernel.run_until_idle();
    assert_eq!(agent.state(), Some(Phase::Idle));
}

#[test]
fn test_post_to_unknown_priority() {
    let capture = Capture::default();
    let mut arena = [0u8; 512];
    let kernel =
        Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap()).with_sink(&capture);
    let empty = kernel.free_space();

    let evt = kernel.new_event(DATA, 4).unwrap();
    assert_eq!(kernel.post_to(prio(12), evt), Err(EpaError::NotRegistered(12)));
    assert_eq!(kernel.free_space(), empty);
    assert!(capture
        .0
        .borrow()
        .contains(&(LogLevel::Warn, LogMsg::NoAgent, 12)));
}

#[test]
fn test_timestamps_follow_tick() {
    let log = Log::default();
    let agent = WorkerAgent::new(prio(2), Worker::new(2, &log));
    let mut arena = [0u8; 1024];
    let config = KernelConfig::builder().timestamps(true).build();
    let kernel = Kernel::new(config, BlockHeap::new(&mut arena).unwrap());
    kernel.start_agent(&agent, 4).unwrap();

    kernel.tick();
    assert_eq!(kernel.tick(), Tick::new(2));

    let evt = kernel.new_event(DATA, 0).unwrap();
    kernel.tick();
    kernel.post(&agent, evt).unwrap();
    assert_eq!(kernel.header(evt).map(|h| h.timestamp), Some(Tick::new(3)));
}

#[test]
fn test_out_of_memory_is_reported() {
    let capture = Capture::default();
    let mut arena = [0u8; 128];
    let kernel =
        Kernel::new(cooperative(), BlockHeap::new(&mut arena).unwrap()).with_sink(&capture);

    let err = kernel.new_event(DATA, 1000).unwrap_err();
    assert!(matches!(err, EpaError::OutOfMemory(_)));
    assert!(capture
        .0
        .borrow()
        .iter()
        .any(|(level, msg, _)| *level == LogLevel::Error && *msg == LogMsg::OutOfMemory));
}
