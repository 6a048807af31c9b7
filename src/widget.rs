//! Widget stand-in for the selection machinery.
//!
//! A [`Widget`] is the unit that owns selections, answers conversion
//! requests and receives retrieval results. On an X11 display realizing it
//! creates a server window; native displays have no windows, so widgets
//! there only exist to carry handlers.
//!
//! Handlers are plain closures. Emission clones the handler list before
//! calling out, so a handler may connect, disconnect or even destroy the
//! widget it runs on.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use btk_selection_backends::{Timestamp, WindowId};
use btk_selection_core::{Atom, SelectionData};
use tracing::trace;

use crate::context::{ContextInner, Display, SelectionContext};

/// Process-unique widget identifier.
pub type WidgetId = u64;

/// Handle returned by the `connect_*` methods.
pub type HandlerId = u64;

/// A selection event addressed to a widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionEvent {
    /// Selection the event is about
    pub selection: Atom,
    /// Target of the conversion; NONE for clear events
    pub target: Atom,
    /// Property holding the result; NONE when refused or for clear events
    pub property: Atom,
    /// Event time
    pub time: Timestamp,
}

type GetHandler = Rc<dyn Fn(&Widget, &mut SelectionData, u32, Timestamp)>;
type ReceivedHandler = Rc<dyn Fn(&Widget, &SelectionData, Timestamp)>;
type EventHandler = Rc<dyn Fn(&Widget, &SelectionEvent) -> bool>;

#[derive(Default)]
struct Handlers {
    get: Vec<(HandlerId, GetHandler)>,
    received: Vec<(HandlerId, ReceivedHandler)>,
    clear: Vec<(HandlerId, EventHandler)>,
    notify: Vec<(HandlerId, EventHandler)>,
}

pub(crate) struct WidgetInner {
    id: WidgetId,
    context: Weak<ContextInner>,
    display: Display,
    window: Cell<Option<WindowId>>,
    realized: Cell<bool>,
    destroyed: Cell<bool>,
    handlers: RefCell<Handlers>,
    next_handler: Cell<HandlerId>,
}

/// A selection-capable widget.
#[derive(Clone)]
pub struct Widget {
    inner: Rc<WidgetInner>,
}

impl PartialEq for Widget {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Widget {}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("id", &self.inner.id)
            .field("display", &self.inner.display.id())
            .field("window", &self.inner.window.get())
            .field("realized", &self.inner.realized.get())
            .finish()
    }
}

impl Widget {
    /// New unrealized widget on `display`.
    pub fn new(context: &SelectionContext, display: &Display) -> Self {
        Self {
            inner: Rc::new(WidgetInner {
                id: context.allocate_widget_id(),
                context: context.downgrade_inner(),
                display: display.clone(),
                window: Cell::new(None),
                realized: Cell::new(false),
                destroyed: Cell::new(false),
                handlers: RefCell::new(Handlers::default()),
                next_handler: Cell::new(1),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<WidgetInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<WidgetInner> {
        Rc::downgrade(&self.inner)
    }

    /// Widget identifier
    pub fn id(&self) -> WidgetId {
        self.inner.id
    }

    /// Display the widget lives on
    pub fn display(&self) -> &Display {
        &self.inner.display
    }

    /// Server window, once realized on an X11 display
    pub fn window(&self) -> Option<WindowId> {
        self.inner.window.get()
    }

    /// True between `realize` and `destroy`
    pub fn is_realized(&self) -> bool {
        self.inner.realized.get()
    }

    /// True once `destroy` ran
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Create the server-side window. Does nothing if already realized.
    pub fn realize(&self) {
        if self.is_realized() || self.is_destroyed() {
            return;
        }
        if let Some(transport) = self.inner.display.transport() {
            let window = transport.create_window();
            self.inner.window.set(Some(window));
            if let Some(context) = self.context() {
                context.register_window(self.inner.display.id(), window, self);
            }
        }
        self.inner.realized.set(true);
        trace!(widget = self.inner.id, window = ?self.inner.window.get(), "widget realized");
    }

    /// Drop every selection this widget owns or waits for, then its window.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        if let Some(context) = self.context() {
            context.selection_remove_all(self);
            if let Some(window) = self.inner.window.get() {
                context.unregister_window(self.inner.display.id(), window);
            }
        }
        if let (Some(window), Some(transport)) = (self.inner.window.take(), self.inner.display.transport()) {
            transport.destroy_window(window);
        }
        self.inner.realized.set(false);
        *self.inner.handlers.borrow_mut() = Handlers::default();
        trace!(widget = self.inner.id, "widget destroyed");
    }

    fn context(&self) -> Option<SelectionContext> {
        SelectionContext::from_weak(&self.inner.context)
    }

    fn next_handler_id(&self) -> HandlerId {
        let id = self.inner.next_handler.get();
        self.inner.next_handler.set(id + 1);
        id
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Provide data for a conversion request.
    ///
    /// Called with the data to fill, the `info` registered with the target
    /// and the request time. Leaving the data untouched rejects the target.
    pub fn connect_selection_get<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Widget, &mut SelectionData, u32, Timestamp) + 'static,
    {
        let id = self.next_handler_id();
        self.inner.handlers.borrow_mut().get.push((id, Rc::new(handler)));
        id
    }

    /// Receive the result of a retrieval started with `selection_convert`.
    pub fn connect_selection_received<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Widget, &SelectionData, Timestamp) + 'static,
    {
        let id = self.next_handler_id();
        self.inner.handlers.borrow_mut().received.push((id, Rc::new(handler)));
        id
    }

    /// Called when the widget loses a selection. Returning true stops
    /// further handlers.
    pub fn connect_selection_clear_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Widget, &SelectionEvent) -> bool + 'static,
    {
        let id = self.next_handler_id();
        self.inner.handlers.borrow_mut().clear.push((id, Rc::new(handler)));
        id
    }

    /// Called for every SelectionNotify addressed to the widget, before the
    /// retrieval machinery sees it. Returning true consumes the event.
    pub fn connect_selection_notify_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Widget, &SelectionEvent) -> bool + 'static,
    {
        let id = self.next_handler_id();
        self.inner.handlers.borrow_mut().notify.push((id, Rc::new(handler)));
        id
    }

    /// Remove a handler; false if it was not connected.
    pub fn disconnect(&self, handler: HandlerId) -> bool {
        let mut handlers = self.inner.handlers.borrow_mut();
        let before =
            handlers.get.len() + handlers.received.len() + handlers.clear.len() + handlers.notify.len();
        handlers.get.retain(|(id, _)| *id != handler);
        handlers.received.retain(|(id, _)| *id != handler);
        handlers.clear.retain(|(id, _)| *id != handler);
        handlers.notify.retain(|(id, _)| *id != handler);
        let after = handlers.get.len() + handlers.received.len() + handlers.clear.len() + handlers.notify.len();
        before != after
    }

    #[cfg(test)]
    pub(crate) fn notify_handler_count(&self) -> usize {
        self.inner.handlers.borrow().notify.len()
    }

    pub(crate) fn emit_selection_get(&self, data: &mut SelectionData, info: u32, time: Timestamp) {
        let handlers: Vec<GetHandler> = self.inner.handlers.borrow().get.iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(self, data, info, time);
        }
    }

    pub(crate) fn emit_selection_received(&self, data: &SelectionData, time: Timestamp) {
        let handlers: Vec<ReceivedHandler> =
            self.inner.handlers.borrow().received.iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(self, data, time);
        }
    }

    pub(crate) fn emit_selection_clear_event(&self, event: &SelectionEvent) -> bool {
        let handlers: Vec<EventHandler> = self.inner.handlers.borrow().clear.iter().map(|(_, h)| h.clone()).collect();
        handlers.iter().any(|handler| handler(self, event))
    }

    pub(crate) fn emit_selection_notify_event(&self, event: &SelectionEvent) -> bool {
        let handlers: Vec<EventHandler> =
            self.inner.handlers.borrow().notify.iter().map(|(_, h)| h.clone()).collect();
        handlers.iter().any(|handler| handler(self, event))
    }
}
