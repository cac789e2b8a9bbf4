//! The single-threaded event loop (spec.md §4.1).
//!
//! One [`Reactor`] owns one OS thread, one `mio::Poll`, and every
//! `Session`/`Server` registered with it. All of their state is mutated
//! exclusively from inside that thread's dispatch loop; every other
//! caller reaches in by [`ReactorHandle::post`]ing a closure, which the
//! teacher's own `Reactor` (`cyclone::reactor::Reactor`) does not do —
//! the teacher dispatches events through an `Arc<dyn EventHandler>` map
//! reachable from any thread holding the `Arc`. That shape does not fit
//! a design where sessions/servers are owned outright by the reactor
//! (spec.md §3's ownership rules), so here the registry maps a token to
//! a [`Target`] key instead of a trait object, and the reactor itself is
//! the only thing ever holding `&mut Session`/`&mut Server`.
//!
//! Timers are still drained before I/O on every iteration, exactly as
//! `cyclone::reactor::Reactor::poll_once` does.

use crate::error::{Error, Result};
use crate::server::{self, Server, ServerId};
use crate::session::{self, Session, SessionId};
use crate::timer::TimerWheel;
use mio::{Events, Poll, Token, Waker};
use slotmap::SlotMap;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Token under which the cross-thread waker is registered; never handed
/// out to a session or server.
const WAKER_TOKEN: Token = Token(usize::MAX);
/// Bounded poll timeout used while a [`ReactorGuard`] is held and no
/// timer is pending, so the loop stays responsive instead of blocking
/// forever with nothing registered.
const GUARDED_IDLE_TIMEOUT: Duration = Duration::from_millis(250);

/// Event classification handed to session/server dispatch, kept under
/// the teacher's naming (`cyclone::reactor::EventType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Data is available to read.
    Readable,
    /// The descriptor is ready to accept a write.
    Writable,
    /// The descriptor reported an error.
    Error,
    /// The peer half-closed or fully closed the connection.
    Hangup,
}

fn classify(event: &mio::event::Event) -> Option<EventType> {
    if event.is_error() {
        Some(EventType::Error)
    } else if event.is_read_closed() || event.is_write_closed() {
        Some(EventType::Hangup)
    } else if event.is_readable() {
        Some(EventType::Readable)
    } else if event.is_writable() {
        Some(EventType::Writable)
    } else {
        None
    }
}

/// What a registered `mio::Token` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    /// A TCP client/peer/serial session.
    Session(SessionId),
    /// A TCP server's listening socket.
    Listener(ServerId),
}

/// A unit of work guaranteed to run on the reactor thread, in the order
/// it was posted relative to other posts from the same sender.
pub type Task = Box<dyn FnOnce(&mut Reactor) + Send>;

thread_local! {
    static ON_REACTOR_THREAD: Cell<bool> = Cell::new(false);
    static CURRENT_REACTOR: Cell<*mut Reactor> = Cell::new(std::ptr::null_mut());
}

/// True for the lifetime of a thread that is running a [`Reactor`]'s
/// loop (used by [`crate::channel::Channel::send`] to decide whether a
/// call is reentrant from a callback — spec.md §9's re-entrancy note).
pub(crate) fn on_reactor_thread() -> bool {
    ON_REACTOR_THREAD.with(Cell::get)
}

/// Run `f` with direct access to the reactor driving the current
/// thread's dispatch. Only valid while [`on_reactor_thread`] is true.
pub(crate) fn with_current_reactor<R>(f: impl FnOnce(&mut Reactor) -> R) -> R {
    let ptr = CURRENT_REACTOR.with(Cell::get);
    debug_assert!(!ptr.is_null(), "with_current_reactor called off the reactor thread");
    // SAFETY: the pointer is set in `Reactor::run` to `self` for the
    // entire lifetime of that thread's loop, and cleared before `run`
    // returns. It is only ever read back on that same thread (a
    // reentrant callback invoked from inside `poll_once`'s dispatch),
    // so this is a same-thread reborrow of the `&mut Reactor` that is
    // paused on the stack, not a second thread observing it.
    let reactor = unsafe { &mut *ptr };
    f(reactor)
}

/// RAII keep-alive token. While any `ReactorGuard` is outstanding, the
/// loop bounds its poll timeout instead of blocking indefinitely with no
/// I/O or timers pending; dropping the last one lifts that bound.
pub struct ReactorGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for ReactorGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A `Send + Sync` handle to a running [`Reactor`], usable from any
/// thread to post work, request a shutdown, or query liveness.
#[derive(Clone)]
pub struct ReactorHandle {
    task_tx: mpsc::Sender<Task>,
    waker: Arc<Waker>,
    running: Arc<AtomicBool>,
    guard_count: Arc<AtomicUsize>,
}

impl ReactorHandle {
    /// Enqueue `task` to run on the reactor thread. FIFO with respect to
    /// other posts from this same handle clone's sender.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce(&mut Reactor) + Send + 'static,
    {
        if self.task_tx.send(Box::new(task)).is_ok() {
            let _ = self.waker.wake();
        }
    }

    /// Cooperatively stop the loop. Implemented as a post so it observes
    /// FIFO order with respect to work already queued.
    pub fn stop(&self) {
        let running = self.running.clone();
        self.post(move |_reactor| {
            running.store(false, Ordering::SeqCst);
        });
    }

    /// Whether the loop is currently running.
    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Acquire a work guard keeping the loop responsive even when idle.
    pub fn guard(&self) -> ReactorGuard {
        self.guard_count.fetch_add(1, Ordering::SeqCst);
        ReactorGuard { count: self.guard_count.clone() }
    }
}

/// The event loop itself. Not `Send`/`Sync` — reached only through
/// [`ReactorHandle`] from other threads, or as `&mut Reactor` from inside
/// dispatch on its own thread.
pub struct Reactor {
    pub(crate) poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    task_rx: mpsc::Receiver<Task>,
    task_tx: mpsc::Sender<Task>,
    running: Arc<AtomicBool>,
    guard_count: Arc<AtomicUsize>,

    pub(crate) tokens: HashMap<Token, Target>,
    next_token: usize,

    pub(crate) sessions: SlotMap<SessionId, Session>,
    pub(crate) servers: SlotMap<ServerId, Server>,
    pub(crate) timers: TimerWheel<Target>,
}

static GLOBAL: OnceLock<ReactorHandle> = OnceLock::new();

impl Reactor {
    fn new() -> Result<Self> {
        crate::logger::install_default_logger();
        let poll = Poll::new().map_err(|e| Error::system(format!("failed to create poll: {e}")))?;
        let waker = Arc::new(
            Waker::new(poll.registry(), WAKER_TOKEN)
                .map_err(|e| Error::system(format!("failed to register waker: {e}")))?,
        );
        let (task_tx, task_rx) = mpsc::channel();

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            waker,
            task_rx,
            task_tx,
            running: Arc::new(AtomicBool::new(true)),
            guard_count: Arc::new(AtomicUsize::new(0)),
            tokens: HashMap::new(),
            next_token: 0,
            sessions: SlotMap::with_key(),
            servers: SlotMap::with_key(),
            timers: TimerWheel::new(),
        })
    }

    fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            task_tx: self.task_tx.clone(),
            waker: self.waker.clone(),
            running: self.running.clone(),
            guard_count: self.guard_count.clone(),
        }
    }

    /// The process-wide reactor, created on first use and never torn down.
    pub fn global() -> &'static ReactorHandle {
        GLOBAL.get_or_init(Reactor::spawn)
    }

    /// A freshly created reactor with its own thread, `Poll`, and timer
    /// wheel, sharing no state with the process singleton. Intended for
    /// test isolation (spec.md §4.1/§9).
    pub fn create_independent() -> ReactorHandle {
        Reactor::spawn()
    }

    fn spawn() -> ReactorHandle {
        let mut reactor = Reactor::new().expect("failed to initialize reactor");
        let handle = reactor.handle();
        std::thread::Builder::new()
            .name("conduit-reactor".into())
            .spawn(move || {
                if let Err(err) = reactor.run() {
                    tracing::error!(component = "reactor", operation = "run", "event loop exited: {err}");
                }
            })
            .expect("failed to spawn reactor thread");
        handle
    }

    /// Allocate the next free mio `Token`, skipping the reserved waker token.
    pub(crate) fn next_token(&mut self) -> Token {
        loop {
            let token = Token(self.next_token);
            self.next_token = self.next_token.wrapping_add(1);
            if token != WAKER_TOKEN {
                return token;
            }
        }
    }

    fn drain_tasks(&mut self) {
        while let Ok(task) = self.task_rx.try_recv() {
            task(self);
        }
    }

    fn poll_timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        let timer_timeout = self
            .timers
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now));
        if self.guard_count.load(Ordering::SeqCst) > 0 {
            Some(timer_timeout.unwrap_or(GUARDED_IDLE_TIMEOUT))
        } else {
            timer_timeout
        }
    }

    /// Drain expired timers, then block for at most one `mio::Poll::poll`
    /// call and dispatch whatever is ready. Returns the number of timer
    /// fires plus I/O events handled.
    pub fn poll_once(&mut self) -> Result<usize> {
        let fired = self.timers.advance_time(Instant::now());
        let mut count = fired.len();
        for target in fired {
            self.dispatch_timer(target);
        }

        let timeout = self.poll_timeout();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(count),
            Err(e) => return Err(Error::system(format!("poll failed: {e}"))),
        }

        // Copy out what fired before dispatching: dispatch needs `&mut
        // self`, which would conflict with an active borrow of `self.events`.
        let mut ready: Vec<(Token, EventType)> = Vec::new();
        let mut woke = false;
        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                woke = true;
                continue;
            }
            if let Some(kind) = classify(event) {
                ready.push((event.token(), kind));
            }
        }

        if woke {
            self.drain_tasks();
        }

        for (token, kind) in ready {
            count += 1;
            if let Some(target) = self.tokens.get(&token).copied() {
                self.dispatch_io(target, kind);
            }
        }

        Ok(count)
    }

    fn dispatch_timer(&mut self, target: Target) {
        match target {
            Target::Session(id) => session::on_retry_timer(self, id),
            Target::Listener(id) => server::on_port_retry_timer(self, id),
        }
    }

    fn dispatch_io(&mut self, target: Target, kind: EventType) {
        match target {
            Target::Session(id) => session::on_event(self, id, kind),
            Target::Listener(id) => server::on_event(self, id, kind),
        }
    }

    /// Run the loop until [`ReactorHandle::stop`] is called from any thread.
    pub fn run(&mut self) -> Result<()> {
        ON_REACTOR_THREAD.with(|flag| flag.set(true));
        CURRENT_REACTOR.with(|cell| cell.set(self as *mut Reactor));

        let result = (|| {
            while self.running.load(Ordering::SeqCst) {
                self.poll_once()?;
            }
            Ok(())
        })();

        CURRENT_REACTOR.with(|cell| cell.set(std::ptr::null_mut()));
        ON_REACTOR_THREAD.with(|flag| flag.set(false));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn post_runs_on_the_reactor_thread_and_wakes_a_blocked_poll() {
        let handle = Reactor::create_independent();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        handle.post(move |_reactor| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        handle.stop();
    }

    #[test]
    fn stop_halts_the_loop() {
        let handle = Reactor::create_independent();
        assert!(handle.running());
        handle.stop();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.running());
    }

    #[test]
    fn guard_keeps_poll_timeout_bounded() {
        let handle = Reactor::create_independent();
        let _guard = handle.guard();
        std::thread::sleep(Duration::from_millis(50));
        assert!(handle.running());
        handle.stop();
    }
}
