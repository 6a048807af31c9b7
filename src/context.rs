//! The selection registry.
//!
//! A [`SelectionContext`] plays the part of one application process: it
//! holds the ownership table, the in-flight transfers, the widgets with
//! windows and the clipboard singletons for every display it opened. Two
//! contexts sharing one X11 server behave like two applications on the
//! same desktop.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use btk_selection_backends::{
    BackendKind, PlatformConnection, PropertyState, SelectionTransport, Timestamp, TransportEvent, WindowId,
};
use btk_selection_core::{atoms, Atom, DisplayId};
use tracing::{debug, info, trace};

use crate::clipboard::{Clipboard, ClipboardWidget, OwnerChangeEvent};
use crate::config::{ClipboardPolicy, Config, SelectionPolicy};
use crate::mainloop::{EventSource, MainLoop, SourceId};
use crate::selection::{EngineState, OwnershipTable};
use crate::widget::{SelectionEvent, Widget, WidgetId, WidgetInner};

struct DisplayInner {
    id: DisplayId,
    connection: PlatformConnection,
    source: Cell<Option<SourceId>>,
}

/// An open connection to one platform, as seen by a context.
#[derive(Clone)]
pub struct Display {
    inner: Rc<DisplayInner>,
}

impl PartialEq for Display {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display")
            .field("id", &self.inner.id)
            .field("kind", &self.kind())
            .finish()
    }
}

impl Display {
    /// Identifier within the owning context
    pub fn id(&self) -> DisplayId {
        self.inner.id
    }

    /// Platform behind the display
    pub fn kind(&self) -> BackendKind {
        self.inner.connection.kind()
    }

    /// The platform connection
    pub fn connection(&self) -> &PlatformConnection {
        &self.inner.connection
    }

    /// The ICCCM transport; `None` on native pasteboard platforms.
    pub fn transport(&self) -> Option<&dyn SelectionTransport> {
        match &self.inner.connection {
            PlatformConnection::X11(connection) => Some(connection),
            PlatformConnection::Win32(_) | PlatformConnection::Quartz(_) => None,
        }
    }

    /// Whether owner-change notifications are delivered
    pub fn supports_selection_notification(&self) -> bool {
        self.transport()
            .is_some_and(|transport| transport.supports_selection_notification())
    }

    /// Whether a clipboard manager can persist the clipboard
    pub fn supports_clipboard_persistence(&self) -> bool {
        self.transport()
            .is_some_and(|transport| transport.supports_clipboard_persistence())
    }
}

/// Feeds a display's transport events into its context.
struct DisplaySource {
    context: Weak<ContextInner>,
    display: Display,
}

impl EventSource for DisplaySource {
    fn pending(&self) -> bool {
        self.display.transport().is_some_and(|t| t.has_pending())
    }

    fn dispatch(&self) {
        let Some(event) = self.display.transport().and_then(|t| t.next_event()) else {
            return;
        };
        if let Some(context) = SelectionContext::from_weak(&self.context) {
            context.handle_event(&self.display, event);
        }
    }
}

pub(crate) struct ContextInner {
    pub(crate) main_loop: MainLoop,
    pub(crate) policy: SelectionPolicy,
    pub(crate) clipboard_policy: ClipboardPolicy,
    displays: RefCell<Vec<Display>>,
    next_display: Cell<u32>,
    next_widget: Cell<WidgetId>,
    pub(crate) ownership: RefCell<OwnershipTable<Widget>>,
    pub(crate) engine: RefCell<EngineState>,
    windows: RefCell<HashMap<(DisplayId, WindowId), Weak<WidgetInner>>>,
    pub(crate) clipboards: RefCell<HashMap<(DisplayId, Atom), Clipboard>>,
    pub(crate) clipboard_widgets: RefCell<HashMap<DisplayId, ClipboardWidget>>,
    current_event_time: Cell<Option<Timestamp>>,
}

/// Per-process selection state.
#[derive(Clone)]
pub struct SelectionContext {
    inner: Rc<ContextInner>,
}

impl fmt::Debug for SelectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionContext")
            .field("displays", &self.inner.displays.borrow().len())
            .field("owned", &self.inner.ownership.borrow().len())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl SelectionContext {
    /// Context with default policies.
    pub fn new(main_loop: MainLoop) -> Self {
        Self::with_policies(main_loop, SelectionPolicy::default(), ClipboardPolicy::default())
    }

    /// Context with the policies from `config`.
    pub fn from_config(main_loop: MainLoop, config: &Config) -> Self {
        Self::with_policies(main_loop, config.selection, config.clipboard)
    }

    /// Context with explicit policies.
    pub fn with_policies(main_loop: MainLoop, policy: SelectionPolicy, clipboard_policy: ClipboardPolicy) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                main_loop,
                policy,
                clipboard_policy,
                displays: RefCell::new(Vec::new()),
                next_display: Cell::new(0),
                next_widget: Cell::new(1),
                ownership: RefCell::new(OwnershipTable::new()),
                engine: RefCell::new(EngineState::default()),
                windows: RefCell::new(HashMap::new()),
                clipboards: RefCell::new(HashMap::new()),
                clipboard_widgets: RefCell::new(HashMap::new()),
                current_event_time: Cell::new(None),
            }),
        }
    }

    pub(crate) fn from_weak(weak: &Weak<ContextInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade_inner(&self) -> Weak<ContextInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn inner(&self) -> &ContextInner {
        &self.inner
    }

    /// The loop everything runs on
    pub fn main_loop(&self) -> &MainLoop {
        &self.inner.main_loop
    }

    /// Conversion engine policy
    pub fn policy(&self) -> &SelectionPolicy {
        &self.inner.policy
    }

    /// Clipboard policy
    pub fn clipboard_policy(&self) -> &ClipboardPolicy {
        &self.inner.clipboard_policy
    }

    /// Time of the transport event being dispatched, if any.
    pub fn current_event_time(&self) -> Option<Timestamp> {
        self.inner.current_event_time.get()
    }

    pub(crate) fn allocate_widget_id(&self) -> WidgetId {
        let id = self.inner.next_widget.get();
        self.inner.next_widget.set(id + 1);
        id
    }

    // =========================================================================
    // Displays
    // =========================================================================

    /// Start using a platform connection.
    pub fn open_display(&self, connection: PlatformConnection) -> Display {
        let id = DisplayId(self.inner.next_display.get());
        self.inner.next_display.set(id.0 + 1);

        let display = Display {
            inner: Rc::new(DisplayInner {
                id,
                connection,
                source: Cell::new(None),
            }),
        };
        if display.transport().is_some() {
            let source = DisplaySource {
                context: self.downgrade_inner(),
                display: display.clone(),
            };
            let source_id = self.inner.main_loop.add_source(Rc::new(source));
            display.inner.source.set(Some(source_id));
        }

        let kind = display.kind();
        info!(display = id.0, kind = %kind, "display opened");
        self.inner.displays.borrow_mut().push(display.clone());
        display
    }

    /// Stop using a display: its clipboards go away and its clipboard widget
    /// gives up every selection.
    pub fn close_display(&self, display: &Display) {
        if let Some(source) = display.inner.source.take() {
            self.inner.main_loop.remove_source(source);
        }

        let clipboard_widget = self.inner.clipboard_widgets.borrow_mut().remove(&display.id());
        if let Some(clipboard_widget) = clipboard_widget {
            clipboard_widget.widget.destroy();
        }
        self.inner
            .clipboards
            .borrow_mut()
            .retain(|(id, _), _| *id != display.id());
        self.inner.displays.borrow_mut().retain(|d| d != display);
        let display_id = display.id().0;
        info!(display = display_id, "display closed");
    }

    /// Displays currently open
    pub fn displays(&self) -> Vec<Display> {
        self.inner.displays.borrow().clone()
    }

    /// The first display opened and still open
    pub fn default_display(&self) -> Option<Display> {
        self.inner.displays.borrow().first().cloned()
    }

    // =========================================================================
    // Windows
    // =========================================================================

    pub(crate) fn register_window(&self, display: DisplayId, window: WindowId, widget: &Widget) {
        self.inner
            .windows
            .borrow_mut()
            .insert((display, window), widget.downgrade());
    }

    pub(crate) fn unregister_window(&self, display: DisplayId, window: WindowId) {
        self.inner.windows.borrow_mut().remove(&(display, window));
    }

    /// Local widget behind a server window.
    pub fn widget_for_window(&self, display: &Display, window: WindowId) -> Option<Widget> {
        self.inner
            .windows
            .borrow()
            .get(&(display.id(), window))
            .and_then(Weak::upgrade)
            .map(Widget::from_inner)
    }

    // =========================================================================
    // Event dispatch
    // =========================================================================

    pub(crate) fn handle_event(&self, display: &Display, event: TransportEvent) {
        let time = match &event {
            TransportEvent::SelectionRequest { time, .. }
            | TransportEvent::SelectionNotify { time, .. }
            | TransportEvent::SelectionClear { time, .. }
            | TransportEvent::PropertyNotify { time, .. }
            | TransportEvent::OwnerChange { time, .. } => *time,
        };
        let display_id = display.id().0;
        trace!(display = display_id, ?event, "dispatch");
        let previous = self.inner.current_event_time.replace(Some(time));

        match event {
            TransportEvent::SelectionRequest {
                owner,
                requestor,
                selection,
                target,
                property,
                time,
            } => match self.widget_for_window(display, owner) {
                Some(widget) => self.handle_selection_request(&widget, requestor, selection, target, property, time),
                None => {
                    debug!(owner = owner.0, selection = %selection, "request for unknown window refused");
                    if let Some(transport) = display.transport() {
                        transport.send_selection_notify(requestor, selection, target, atoms::NONE, time);
                    }
                }
            },
            TransportEvent::SelectionNotify {
                requestor,
                selection,
                target,
                property,
                time,
            } => {
                if let Some(widget) = self.widget_for_window(display, requestor) {
                    let event = SelectionEvent {
                        selection,
                        target,
                        property,
                        time,
                    };
                    if !widget.emit_selection_notify_event(&event) {
                        self.handle_selection_notify(&widget, &event);
                    }
                }
            }
            TransportEvent::SelectionClear { window, selection, time } => {
                // A clear that raced with a reclaim by the same window is stale.
                let stale = display
                    .transport()
                    .is_some_and(|t| t.selection_owner(selection) == Some(window));
                if stale {
                    debug!(window = window.0, selection = %selection, "stale selection clear ignored");
                } else if let Some(widget) = self.widget_for_window(display, window) {
                    let event = SelectionEvent {
                        selection,
                        target: atoms::NONE,
                        property: atoms::NONE,
                        time,
                    };
                    self.handle_selection_clear(&widget, &event);
                }
            }
            TransportEvent::PropertyNotify {
                window,
                atom,
                state: PropertyState::Deleted,
                ..
            } => {
                self.handle_incr_event(display, window, atom);
            }
            TransportEvent::PropertyNotify {
                window,
                atom,
                state: PropertyState::NewValue,
                time,
            } => {
                if let Some(widget) = self.widget_for_window(display, window) {
                    self.handle_property_notify(&widget, atom, time);
                }
            }
            TransportEvent::OwnerChange {
                selection, owner, time, ..
            } => {
                let clipboard = self
                    .inner
                    .clipboards
                    .borrow()
                    .get(&(display.id(), selection))
                    .cloned();
                if let Some(clipboard) = clipboard {
                    clipboard.handle_owner_change(&OwnerChangeEvent { selection, owner, time });
                }
            }
        }

        self.inner.current_event_time.set(previous);
    }
}
