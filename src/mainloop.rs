//! Single-threaded cooperative dispatcher.
//!
//! Everything asynchronous in the selection machinery runs on one
//! [`MainLoop`]: transport event sources, periodic sweep timers and idle
//! callbacks. Blocking waits re-enter the loop through [`MainLoop::iterate`]
//! (directly or via [`MainLoop::block_on`]), so loops nest.
//!
//! No `RefCell` borrow is held while a callback runs: callbacks may add or
//! remove sources, including their own.
//!
//! The clock is either real time or a virtual clock that jumps straight to
//! the next timer when nothing else is ready, which keeps timeout behaviour
//! deterministic and instant in tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::task::noop_waker;
use tracing::trace;

/// Handle for removing a timer, idle or event source.
pub type SourceId = u64;

/// A source of externally generated events, polled every iteration.
pub trait EventSource {
    /// True if `dispatch` has work to do.
    fn pending(&self) -> bool;

    /// Handle one pending event.
    fn dispatch(&self);
}

type TimerCallback = Box<dyn FnMut() -> ControlFlow<()>>;

struct Timer {
    id: SourceId,
    due: u64,
    interval: u64,
    /// `None` while the callback is running.
    callback: Option<TimerCallback>,
}

enum Clock {
    Virtual(Cell<u64>),
    Real(Instant),
}

struct LoopInner {
    clock: Clock,
    next_id: Cell<SourceId>,
    timers: RefCell<Vec<Timer>>,
    idles: RefCell<VecDeque<(SourceId, Box<dyn FnOnce()>)>>,
    sources: RefCell<Vec<(SourceId, Rc<dyn EventSource>)>>,
    depth: Cell<u32>,
}

/// Cooperative event loop shared by every selection context of a process.
#[derive(Clone)]
pub struct MainLoop {
    inner: Rc<LoopInner>,
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop")
            .field("now_ms", &self.now_ms())
            .field("timers", &self.inner.timers.borrow().len())
            .field("sources", &self.inner.sources.borrow().len())
            .field("depth", &self.inner.depth.get())
            .finish()
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop {
    /// Loop driven by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Clock::Real(Instant::now()))
    }

    /// Loop driven by a virtual clock starting at zero.
    pub fn with_virtual_clock() -> Self {
        Self::with_clock(Clock::Virtual(Cell::new(0)))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                clock,
                next_id: Cell::new(1),
                timers: RefCell::new(Vec::new()),
                idles: RefCell::new(VecDeque::new()),
                sources: RefCell::new(Vec::new()),
                depth: Cell::new(0),
            }),
        }
    }

    /// Milliseconds since the loop was created.
    pub fn now_ms(&self) -> u64 {
        match &self.inner.clock {
            Clock::Virtual(now) => now.get(),
            Clock::Real(start) => start.elapsed().as_millis() as u64,
        }
    }

    /// True when the loop runs on the virtual clock
    pub fn is_virtual(&self) -> bool {
        matches!(self.inner.clock, Clock::Virtual(_))
    }

    /// Current nesting depth of `iterate`.
    pub fn depth(&self) -> u32 {
        self.inner.depth.get()
    }

    fn allocate_id(&self) -> SourceId {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    /// Call `callback` every `interval_ms` until it returns `Break`.
    pub fn add_timeout<F>(&self, interval_ms: u64, callback: F) -> SourceId
    where
        F: FnMut() -> ControlFlow<()> + 'static,
    {
        let id = self.allocate_id();
        let interval = interval_ms.max(1);
        self.inner.timers.borrow_mut().push(Timer {
            id,
            due: self.now_ms() + interval,
            interval,
            callback: Some(Box::new(callback)),
        });
        id
    }

    /// Run `callback` once when nothing else is ready.
    pub fn add_idle<F>(&self, callback: F) -> SourceId
    where
        F: FnOnce() + 'static,
    {
        let id = self.allocate_id();
        self.inner.idles.borrow_mut().push_back((id, Box::new(callback)));
        id
    }

    /// Poll `source` on every iteration.
    pub fn add_source(&self, source: Rc<dyn EventSource>) -> SourceId {
        let id = self.allocate_id();
        self.inner.sources.borrow_mut().push((id, source));
        id
    }

    /// Remove a timer, idle or event source; false if it was already gone.
    pub fn remove_source(&self, id: SourceId) -> bool {
        let mut removed = false;
        {
            let mut timers = self.inner.timers.borrow_mut();
            let before = timers.len();
            timers.retain(|t| t.id != id);
            removed |= timers.len() != before;
        }
        {
            let mut idles = self.inner.idles.borrow_mut();
            let before = idles.len();
            idles.retain(|(i, _)| *i != id);
            removed |= idles.len() != before;
        }
        {
            let mut sources = self.inner.sources.borrow_mut();
            let before = sources.len();
            sources.retain(|(i, _)| *i != id);
            removed |= sources.len() != before;
        }
        removed
    }

    /// True if any timer, idle or source is registered.
    pub fn has_work(&self) -> bool {
        !self.inner.timers.borrow().is_empty()
            || !self.inner.idles.borrow().is_empty()
            || !self.inner.sources.borrow().is_empty()
    }

    fn dispatch_sources(&self) -> bool {
        let sources: Vec<Rc<dyn EventSource>> = self
            .inner
            .sources
            .borrow()
            .iter()
            .map(|(_, source)| Rc::clone(source))
            .collect();
        let mut dispatched = false;
        for source in sources {
            if source.pending() {
                source.dispatch();
                dispatched = true;
            }
        }
        dispatched
    }

    /// Fire the earliest due timer, if any.
    fn dispatch_one_timer(&self) -> bool {
        let now = self.now_ms();
        let (id, mut callback) = {
            let mut timers = self.inner.timers.borrow_mut();
            let next = timers
                .iter_mut()
                .filter(|t| t.due <= now && t.callback.is_some())
                .min_by_key(|t| (t.due, t.id));
            let Some(timer) = next else {
                return false;
            };
            match timer.callback.take() {
                Some(callback) => (timer.id, callback),
                None => return false,
            }
        };

        trace!(timer = id, now, "timer fired");
        let flow = callback();

        let mut timers = self.inner.timers.borrow_mut();
        match (flow, timers.iter().position(|t| t.id == id)) {
            (ControlFlow::Continue(()), Some(index)) => {
                let timer = &mut timers[index];
                timer.due = self.now_ms() + timer.interval;
                timer.callback = Some(callback);
            }
            (ControlFlow::Break(()), Some(index)) => {
                timers.remove(index);
            }
            // removed by its own callback
            (_, None) => {}
        }
        true
    }

    fn dispatch_due_timers(&self) -> bool {
        let mut dispatched = false;
        let now = self.now_ms();
        let due: Vec<SourceId> = self
            .inner
            .timers
            .borrow()
            .iter()
            .filter(|t| t.due <= now)
            .map(|t| t.id)
            .collect();
        for _ in due {
            if !self.dispatch_one_timer() {
                break;
            }
            dispatched = true;
        }
        dispatched
    }

    fn dispatch_idle(&self) -> bool {
        let next = self.inner.idles.borrow_mut().pop_front();
        match next {
            Some((_, callback)) => {
                callback();
                true
            }
            None => false,
        }
    }

    fn next_due(&self) -> Option<u64> {
        self.inner
            .timers
            .borrow()
            .iter()
            .filter(|t| t.callback.is_some())
            .map(|t| t.due)
            .min()
    }

    /// Wait for the next timer: jump the virtual clock or sleep.
    fn advance_to_next_timer(&self) -> bool {
        let Some(due) = self.next_due() else {
            return false;
        };
        match &self.inner.clock {
            Clock::Virtual(now) => {
                if due > now.get() {
                    now.set(due);
                }
            }
            Clock::Real(_) => {
                let now = self.now_ms();
                if due > now {
                    std::thread::sleep(Duration::from_millis(due - now));
                }
            }
        }
        true
    }

    /// Run one loop iteration.
    ///
    /// Dispatches pending sources and due timers, or one idle callback when
    /// neither had work. With `may_block`, an otherwise empty iteration waits
    /// for the next timer. Returns false if nothing was dispatched.
    pub fn iterate(&self, may_block: bool) -> bool {
        self.inner.depth.set(self.inner.depth.get() + 1);
        let mut dispatched = self.dispatch_sources();
        dispatched |= self.dispatch_due_timers();
        if !dispatched {
            dispatched = self.dispatch_idle();
        }
        if !dispatched && may_block && self.advance_to_next_timer() {
            dispatched = self.dispatch_due_timers();
        }
        self.inner.depth.set(self.inner.depth.get() - 1);
        dispatched
    }

    /// Iterate until `done` holds; false if the loop ran dry first.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> bool {
        while !done() {
            if !self.iterate(true) {
                return done();
            }
        }
        true
    }

    /// Move the virtual clock forward by `ms`, firing timers on the way.
    ///
    /// On a real clock this only dispatches what is already due.
    pub fn advance(&self, ms: u64) {
        let target = self.now_ms() + ms;
        if let Clock::Virtual(now) = &self.inner.clock {
            while let Some(due) = self.next_due().filter(|&due| due <= target) {
                if due > now.get() {
                    now.set(due);
                }
                self.dispatch_sources();
                self.dispatch_due_timers();
            }
            now.set(target);
        }
        self.dispatch_sources();
        self.dispatch_due_timers();
    }

    /// Drive the loop until `future` resolves.
    ///
    /// Returns `None` if the loop runs out of work while the future is still
    /// pending; nothing could ever complete it.
    pub fn block_on<F: Future>(&self, future: F) -> Option<F::Output> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future);
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Some(output);
            }
            if !self.iterate(true) {
                return match future.as_mut().poll(&mut cx) {
                    Poll::Ready(output) => Some(output),
                    Poll::Pending => None,
                };
            }
        }
    }
}
