//! Kernel context and scheduling services.
//!
//! One [`Kernel`] owns the memory class, the ready list and the scheduler
//! status. Everything that touches them runs inside a critical section; the
//! `*_i` methods take the caller's [`CriticalSection`] token instead of
//! opening their own.

use core::cell::{Cell, RefCell};

use critical_section::{CriticalSection, Mutex};
use epa_core::{
    CriticalGuard, EpaError, EpaResult, Event, EventRef, LogFacade, LogLevel, LogMsg, LogSink,
    MemClass, Priority, Signal, Tick, INIT_EVENT,
};
use epa_hsm::Outcome;
use epa_mem::SharedMem;

use crate::agent::{DeferPolicy, Runnable, AGENT_SIGNATURE};
use crate::event::{self, Header};
use crate::queue::{EventQueue, QueueStats};
use crate::ready::{ReadyQueue, ReadySlot};

static FACADE: LogFacade = LogFacade;

/// How ready agents get the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// One event runs to completion before the next agent is picked
    #[default]
    Cooperative,
    /// A post from thread context immediately runs any higher-priority agent
    Preemptive,
}

/// Configuration for the kernel.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    pub policy: Policy,
    /// Stamp events with the current tick when they are queued
    pub timestamps: bool,
    /// Queue capacity used by [`Kernel::start_agent_default`]
    pub queue_capacity: usize,
    pub idle_callback: Option<fn()>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "EPA",
            policy: Policy::Cooperative,
            timestamps: false,
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            idle_callback: None,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the scheduling policy.
    pub fn policy(mut self, policy: Policy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Enables or disables event timestamps.
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.config.timestamps = enabled;
        self
    }

    /// Sets the default agent queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Sets the idle callback function.
    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    /// Builds the kernel configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}

const SCHED_UNLOCKED: u8 = 0xFF;

/// Previous lock state returned by [`Kernel::lock_scheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedStatus {
    Locked(u8),
    Unlocked,
}

impl SchedStatus {
    pub fn from_raw(raw: u8) -> Self {
        if raw == SCHED_UNLOCKED {
            Self::Unlocked
        } else {
            Self::Locked(raw)
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            Self::Locked(value) => value,
            Self::Unlocked => SCHED_UNLOCKED,
        }
    }

    pub fn is_locked(self) -> bool {
        matches!(self, Self::Locked(_))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SchedState {
    /// Priority of the agent currently dispatching, 0 when none
    active: u8,
    /// Agents at or below this priority are held back
    ceiling: u8,
    isr_nest: u8,
    now: Tick,
}

/// Reference to a registered agent
pub type AgentRef<'a, M> = &'a dyn Runnable<'a, M>;

/// The kernel context
pub struct Kernel<'a, M: MemClass> {
    config: KernelConfig,
    mem: SharedMem<M>,
    ready: Mutex<RefCell<ReadyQueue<AgentRef<'a, M>>>>,
    sched: Mutex<Cell<SchedState>>,
    sink: &'a dyn LogSink,
}

impl<'a, M: MemClass> Kernel<'a, M> {
    /// A kernel allocating agents' queues and dynamic events from `mem`
    pub fn new(config: KernelConfig, mem: M) -> Self {
        log::info!("{}: {:?} kernel, {} bytes free", config.name, config.policy, mem.free_space());
        Self {
            config,
            mem: SharedMem::new(mem),
            ready: Mutex::new(RefCell::new(ReadyQueue::new())),
            sched: Mutex::new(Cell::new(SchedState::default())),
            sink: &FACADE,
        }
    }

    /// Route kernel messages to `sink` instead of the `log` facade
    pub fn with_sink(mut self, sink: &'a dyn LogSink) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn memory(&self) -> &SharedMem<M> {
        &self.mem
    }

    pub fn free_space(&self) -> usize {
        self.mem.free_space()
    }

    fn status(&self, cs: CriticalSection<'_>) -> SchedState {
        self.sched.borrow(cs).get()
    }

    fn update(&self, cs: CriticalSection<'_>, f: impl FnOnce(&mut SchedState)) -> SchedState {
        let cell = self.sched.borrow(cs);
        let mut state = cell.get();
        f(&mut state);
        cell.set(state);
        state
    }

    fn log(&self, level: LogLevel, msg: LogMsg, value: u32) {
        self.sink.log_msg(level, msg, value);
    }

    fn check(&self, agent: &dyn Runnable<'a, M>) -> EpaResult<()> {
        if cfg!(debug_assertions) && agent.signature() != AGENT_SIGNATURE {
            return Err(EpaError::BadSignature);
        }
        Ok(())
    }
}

/// Time
impl<'a, M: MemClass> Kernel<'a, M> {
    /// Advance the tick counter by one and return the new value
    pub fn tick(&self) -> Tick {
        critical_section::with(|cs| self.update(cs, |s| s.now = s.now.next()).now)
    }

    pub fn now(&self) -> Tick {
        critical_section::with(|cs| self.status(cs).now)
    }
}

/// Events
impl<'a, M: MemClass> Kernel<'a, M> {
    /// Allocate a dynamic event with a zeroed `size`-byte payload
    pub fn new_event(&self, signal: Signal, size: usize) -> EpaResult<EventRef> {
        critical_section::with(|cs| self.new_event_i(cs, signal, size))
    }

    /// [`Kernel::new_event`] for callers already inside a critical section
    pub fn new_event_i(
        &self,
        cs: CriticalSection<'_>,
        signal: Signal,
        size: usize,
    ) -> EpaResult<EventRef> {
        let status = self.status(cs);
        let generator = match status.active {
            0 => None,
            raw => Some(Priority::new_unchecked(raw)),
        };
        let created = self
            .mem
            .with(cs, |mem| event::create(mem, signal, size, generator, status.now));
        if let Err(EpaError::OutOfMemory(bytes)) = created {
            self.log(LogLevel::Error, LogMsg::OutOfMemory, bytes as u32);
        }
        created
    }

    /// Reclaim an event nobody references; returns whether it was freed
    pub fn destroy_event(&self, evt: EventRef) -> bool {
        critical_section::with(|cs| self.destroy_event_i(cs, evt))
    }

    pub fn destroy_event_i(&self, cs: CriticalSection<'_>, evt: EventRef) -> bool {
        self.mem.with(cs, |mem| event::destroy(mem, evt))
    }

    /// Exempt an event from reclamation
    pub fn reserve_event(&self, evt: EventRef) {
        critical_section::with(|cs| self.mem.with(cs, |mem| event::set_reserved(mem, evt, true)));
    }

    pub fn unreserve_event(&self, evt: EventRef) {
        critical_section::with(|cs| self.mem.with(cs, |mem| event::set_reserved(mem, evt, false)));
    }

    /// Handler-facing view of an event
    pub fn event(&self, evt: EventRef) -> Event {
        critical_section::with(|cs| self.mem.with(cs, |mem| event::view(mem, evt)))
    }

    /// Header of a dynamic event; `None` for constants
    pub fn header(&self, evt: EventRef) -> Option<Header> {
        critical_section::with(|cs| self.mem.with(cs, |mem| event::header(mem, evt)))
    }

    /// Copy `data` into the payload, returning the bytes written
    pub fn write_payload(&self, evt: EventRef, data: &[u8]) -> usize {
        critical_section::with(|cs| {
            self.mem.with(cs, |mem| {
                let dst = event::payload_mut(mem, evt);
                let n = dst.len().min(data.len());
                dst[..n].copy_from_slice(&data[..n]);
                n
            })
        })
    }

    /// Run `f` on the payload inside a critical section
    pub fn with_payload<R>(&self, evt: EventRef, f: impl FnOnce(&[u8]) -> R) -> R {
        critical_section::with(|cs| self.mem.with(cs, |mem| f(event::payload(mem, evt))))
    }

    /// Copy the payload into `out`, returning the bytes read
    pub fn read_payload(&self, evt: EventRef, out: &mut [u8]) -> usize {
        self.with_payload(evt, |src| {
            let n = src.len().min(out.len());
            out[..n].copy_from_slice(&src[..n]);
            n
        })
    }
}

/// Agent lifecycle
impl<'a, M: MemClass> Kernel<'a, M> {
    /// Give `agent` an event queue of `capacity` slots
    pub fn create_agent(&self, agent: &dyn Runnable<'a, M>, capacity: usize) -> EpaResult<()> {
        self.check(agent)?;
        let created = critical_section::with(|cs| {
            let mut queue = agent.queue().borrow_ref_mut(cs);
            debug_assert!(queue.is_none(), "agent {} created twice", agent.priority());
            if queue.is_some() {
                return Ok(());
            }
            *queue = Some(self.mem.with(cs, |mem| EventQueue::init(mem, capacity))?);
            Ok(())
        });
        if let Err(EpaError::OutOfMemory(bytes)) = created {
            self.log(LogLevel::Error, LogMsg::OutOfMemory, bytes as u32);
        }
        created
    }

    /// Register `agent`, seed its initial transition and mark it ready, all
    /// in one critical section
    pub fn init_agent(&self, agent: AgentRef<'a, M>) -> EpaResult<()> {
        self.check(agent)?;
        let prio = agent.priority();
        critical_section::with(|cs| {
            let mut queue = agent.queue().borrow_ref_mut(cs);
            let queue = queue.as_mut().ok_or(EpaError::NoQueue(prio.raw()))?;
            let mut ready = self.ready.borrow_ref_mut(cs);
            ready.register(prio, agent)?;
            // Ahead of anything posted before registration.
            if let Err(err) = self.mem.with(cs, |mem| queue.put_ahead(mem, INIT_EVENT, None)) {
                let _ = ready.unregister(prio);
                return Err(err);
            }
            ready.insert(agent.slot());
            Ok(())
        })?;
        self.log(LogLevel::Info, LogMsg::AgentStarted, prio.raw() as u32);
        Ok(())
    }

    /// [`Kernel::create_agent`] followed by [`Kernel::init_agent`]
    pub fn start_agent(&self, agent: AgentRef<'a, M>, capacity: usize) -> EpaResult<()> {
        self.create_agent(agent, capacity)?;
        if let Err(err) = self.init_agent(agent) {
            critical_section::with(|cs| self.release_queue(cs, agent));
            return Err(err);
        }
        Ok(())
    }

    /// [`Kernel::start_agent`] with the configured queue capacity
    pub fn start_agent_default(&self, agent: AgentRef<'a, M>) -> EpaResult<()> {
        self.start_agent(agent, self.config.queue_capacity)
    }

    /// Unregister `agent` and destroy everything still queued for it. The
    /// queue itself stays allocated. Returns how many events were dropped.
    pub fn deinit_agent(&self, agent: &dyn Runnable<'a, M>) -> EpaResult<usize> {
        self.check(agent)?;
        let prio = agent.priority();
        let drained = critical_section::with(|cs| {
            // An agent that was created but never initialised has no slot.
            let _ = self.ready.borrow_ref_mut(cs).unregister(prio);
            let mut queue = agent.queue().borrow_ref_mut(cs);
            match queue.as_mut() {
                Some(queue) => self.mem.with(cs, |mem| queue.drain(mem)),
                None => 0,
            }
        });
        agent.reset();
        self.log(LogLevel::Info, LogMsg::AgentStopped, prio.raw() as u32);
        Ok(drained)
    }

    /// [`Kernel::deinit_agent`] and give the queue back to the memory class
    pub fn destroy_agent(&self, agent: &dyn Runnable<'a, M>) -> EpaResult<usize> {
        let drained = self.deinit_agent(agent)?;
        critical_section::with(|cs| self.release_queue(cs, agent));
        Ok(drained)
    }

    fn release_queue(&self, cs: CriticalSection<'_>, agent: &dyn Runnable<'a, M>) {
        if let Some(queue) = agent.queue().borrow_ref_mut(cs).take() {
            self.mem.with(cs, |mem| queue.deinit(mem));
        }
    }

    /// Agent registered at `priority`
    pub fn agent(&self, priority: Priority) -> Option<AgentRef<'a, M>> {
        critical_section::with(|cs| self.ready.borrow_ref(cs).agent(priority))
    }

    pub fn queue_stats(&self, agent: &dyn Runnable<'a, M>) -> Option<QueueStats> {
        critical_section::with(|cs| agent.queue().borrow_ref(cs).as_ref().map(EventQueue::stats))
    }

    /// Whether `priority` has events waiting
    pub fn is_ready(&self, priority: Priority) -> bool {
        critical_section::with(|cs| {
            self.ready.borrow_ref(cs).contains(ReadySlot::of(priority))
        })
    }

    /// No agent has events waiting
    pub fn is_idle(&self) -> bool {
        critical_section::with(|cs| self.ready.borrow_ref(cs).is_empty())
    }
}

/// Posting
impl<'a, M: MemClass> Kernel<'a, M> {
    /// Queue `evt` behind everything pending for `agent` and mark it ready.
    ///
    /// A full queue drops the event and reports [`EpaError::QueueFull`].
    pub fn post(&self, agent: &dyn Runnable<'a, M>, evt: EventRef) -> EpaResult<()> {
        let posted = critical_section::with(|cs| self.post_i(cs, agent, evt));
        self.schedule();
        posted
    }

    /// Queue `evt` in front of everything pending for `agent`
    pub fn post_ahead(&self, agent: &dyn Runnable<'a, M>, evt: EventRef) -> EpaResult<()> {
        let posted = critical_section::with(|cs| self.post_ahead_i(cs, agent, evt));
        self.schedule();
        posted
    }

    /// [`Kernel::post`] inside an existing critical section; never schedules
    pub fn post_i(
        &self,
        cs: CriticalSection<'_>,
        agent: &dyn Runnable<'a, M>,
        evt: EventRef,
    ) -> EpaResult<()> {
        self.enqueue(cs, agent, evt, false)
    }

    pub fn post_ahead_i(
        &self,
        cs: CriticalSection<'_>,
        agent: &dyn Runnable<'a, M>,
        evt: EventRef,
    ) -> EpaResult<()> {
        self.enqueue(cs, agent, evt, true)
    }

    /// Post to whichever agent is registered at `priority`
    pub fn post_to(&self, priority: Priority, evt: EventRef) -> EpaResult<()> {
        let posted = critical_section::with(|cs| {
            let target = self.ready.borrow_ref(cs).agent(priority);
            match target {
                Some(agent) => self.enqueue(cs, agent, evt, false),
                None => {
                    self.destroy_event_i(cs, evt);
                    Err(EpaError::NotRegistered(priority.raw()))
                }
            }
        });
        if let Err(EpaError::NotRegistered(raw)) = posted {
            self.log(LogLevel::Warn, LogMsg::NoAgent, raw as u32);
        }
        self.schedule();
        posted
    }

    fn enqueue(
        &self,
        cs: CriticalSection<'_>,
        agent: &dyn Runnable<'a, M>,
        evt: EventRef,
        ahead: bool,
    ) -> EpaResult<()> {
        let prio = agent.priority();
        if let Err(err) = self.check(agent) {
            self.destroy_event_i(cs, evt);
            return Err(err);
        }
        let now = self.config.timestamps.then(|| self.status(cs).now);

        let mut queue = agent.queue().borrow_ref_mut(cs);
        let Some(queue) = queue.as_mut() else {
            self.destroy_event_i(cs, evt);
            return Err(EpaError::NoQueue(prio.raw()));
        };
        let admitted = self.mem.with(cs, |mem| {
            if ahead {
                queue.put_ahead(mem, evt, now)
            } else {
                queue.put(mem, evt, now)
            }
        });
        if let Err(err) = admitted {
            let msg = match err {
                EpaError::RefCountExhausted => LogMsg::RefOverflow,
                _ => LogMsg::QueueOverflow,
            };
            self.log(LogLevel::Warn, msg, prio.raw() as u32);
            return Err(err);
        }

        let mut ready = self.ready.borrow_ref_mut(cs);
        // Agents not yet registered become ready when they are initialised.
        if ready.agent(prio).is_some() {
            ready.insert(agent.slot());
        }
        Ok(())
    }
}

/// Scheduling
impl<'a, M: MemClass> Kernel<'a, M> {
    /// Dispatch one event to the highest-priority ready agent.
    ///
    /// Returns `false` when nothing above the running priority and the lock
    /// ceiling is ready.
    pub fn dispatch_once(&self) -> bool {
        let threshold = critical_section::with(|cs| self.status(cs).active);
        match self.next_ready(threshold) {
            Some(prio) => {
                self.activate(prio);
                true
            }
            None => false,
        }
    }

    /// Dispatch until no agent is ready, then call the idle callback.
    /// Returns how many events were dispatched.
    pub fn run_until_idle(&self) -> usize {
        let mut dispatched = 0;
        while self.dispatch_once() {
            dispatched += 1;
        }
        if let Some(idle) = self.config.idle_callback {
            idle();
        }
        dispatched
    }

    /// The kernel main loop
    pub fn run(&self) -> ! {
        log::info!("{}: running", self.config.name);
        loop {
            while self.dispatch_once() {}
            self.idle();
        }
    }

    fn idle(&self) {
        if let Some(idle) = self.config.idle_callback {
            idle();
            return;
        }
        #[cfg(target_arch = "arm")]
        {
            // Wait for interrupt on ARM
            cortex_m::asm::wfi();
        }
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }

    /// Mark the start of an interrupt handler. Dropping the returned guard
    /// of the outermost handler lets a preemptive kernel run whatever the
    /// handler made ready.
    pub fn isr_enter(&self) -> IsrGuard<'_, 'a, M> {
        critical_section::with(|cs| self.update(cs, |s| s.isr_nest += 1));
        IsrGuard { kernel: self }
    }

    /// Hold back every agent at or below `ceiling`
    pub fn lock_scheduler(&self, ceiling: u8) -> SchedStatus {
        let previous = critical_section::with(|cs| {
            let status = self.status(cs);
            if ceiling > status.ceiling {
                self.update(cs, |s| s.ceiling = ceiling);
                Some(status.ceiling)
            } else {
                None
            }
        });
        match previous {
            Some(prev) => {
                self.log(LogLevel::Debug, LogMsg::SchedLocked, ceiling as u32);
                SchedStatus::Locked(prev)
            }
            None => SchedStatus::Unlocked,
        }
    }

    /// Undo the matching [`Kernel::lock_scheduler`]
    pub fn unlock_scheduler(&self, prev: SchedStatus) {
        if let SchedStatus::Locked(value) = prev {
            let lowered = critical_section::with(|cs| {
                let status = self.status(cs);
                if status.ceiling > value {
                    self.update(cs, |s| s.ceiling = value);
                    true
                } else {
                    false
                }
            });
            if lowered {
                self.log(LogLevel::Debug, LogMsg::SchedUnlocked, value as u32);
                self.schedule();
            }
        }
    }

    /// Priority of the agent currently dispatching, 0 when none
    pub fn active_priority(&self) -> u8 {
        critical_section::with(|cs| self.status(cs).active)
    }

    /// Run every ready agent above the current priority. Only a preemptive
    /// kernel in thread context does anything here.
    fn schedule(&self) {
        if self.config.policy != Policy::Preemptive {
            return;
        }
        let threshold = critical_section::with(|cs| {
            let status = self.status(cs);
            (status.isr_nest == 0).then_some(status.active)
        });
        let Some(threshold) = threshold else {
            return;
        };
        while let Some(prio) = self.next_ready(threshold) {
            self.activate(prio);
        }
    }

    fn next_ready(&self, threshold: u8) -> Option<Priority> {
        let guard = CriticalGuard::enter();
        let cs = guard.token();
        let status = self.status(cs);
        let prio = self.ready.borrow_ref(cs).highest()?;
        (prio.raw() > threshold && prio.raw() > status.ceiling).then_some(prio)
    }

    /// Take one event off `prio`'s queue and run it to completion
    fn activate(&self, prio: Priority) {
        let mut missing = false;
        let picked = critical_section::with(|cs| {
            let mut ready = self.ready.borrow_ref_mut(cs);
            let slot = ReadySlot::of(prio);
            let Some(agent) = ready.agent(prio) else {
                ready.remove(slot);
                missing = true;
                return None;
            };
            let mut queue = agent.queue().borrow_ref_mut(cs);
            let Some(queue) = queue.as_mut() else {
                ready.remove(slot);
                return None;
            };
            let taken = self.mem.with(cs, |mem| {
                let evt = queue.get(mem)?;
                // The dispatcher holds its own reference until it is done.
                // `get` just gave one up, so this only fails on a corrupt count.
                let held = event::acquire(mem, evt);
                debug_assert!(held, "dispatch hold refused");
                Some((evt, held))
            });
            if queue.is_empty() {
                ready.remove(agent.slot());
            }
            let (evt, held) = taken?;
            let previous = self.status(cs).active;
            self.update(cs, |s| s.active = prio.raw());
            let view = self.mem.with(cs, |mem| event::view(mem, evt));
            Some((agent, evt, held, view, previous))
        });

        let Some((agent, evt, held, view, previous)) = picked else {
            if missing {
                self.log(LogLevel::Warn, LogMsg::NoAgent, prio.raw() as u32);
            }
            return;
        };

        let outcome = agent.dispatch(self, &view);

        critical_section::with(|cs| {
            if outcome == Outcome::Deferred {
                let ahead = agent.defer_policy() == DeferPolicy::Head;
                if self.enqueue(cs, agent, evt, ahead).is_ok() {
                    self.log(LogLevel::Debug, LogMsg::EventDeferred, view.signal().raw() as u32);
                }
            }
            self.mem.with(cs, |mem| {
                if held {
                    event::gc(mem, evt);
                } else {
                    event::destroy(mem, evt);
                }
            });
            self.update(cs, |s| s.active = previous);
        });
    }
}

/// Interrupt nesting marker returned by [`Kernel::isr_enter`]
pub struct IsrGuard<'k, 'a, M: MemClass> {
    kernel: &'k Kernel<'a, M>,
}

impl<M: MemClass> Drop for IsrGuard<'_, '_, M> {
    fn drop(&mut self) {
        let outermost = critical_section::with(|cs| {
            let status = self.kernel.update(cs, |s| s.isr_nest = s.isr_nest.saturating_sub(1));
            status.isr_nest == 0
        });
        if outermost {
            self.kernel.schedule();
        }
    }
}
