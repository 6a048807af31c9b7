//! Where clipboard contents actually go.
//!
//! [`SelectionPlatform`] drives the selection engine through one hidden
//! widget per display. [`NativePlatform`] wraps a native pasteboard backend
//! and hands it an owner token that renders declared targets on demand.

use std::cell::{Cell, RefCell};
use std::ops::ControlFlow;
use std::rc::{Rc, Weak};

use btk_selection_backends::{ClipboardBackend, PasteboardOwner};
use btk_selection_core::{atoms, Atom, SelectionData, TargetEntry};
use tracing::{debug, info, trace, warn};

use super::{Clipboard, ClipboardInner};
use crate::context::{Display, SelectionContext};
use crate::widget::Widget;

/// Completion of one clipboard request.
pub(crate) type RequestCallback = Box<dyn FnOnce(&SelectionData)>;

type RequestSlot = Rc<RefCell<Option<RequestCallback>>>;

/// Platform half of a clipboard.
pub(crate) trait ClipboardPlatform {
    /// The clipboard was just registered with its context.
    fn attach(&self, clipboard: &Clipboard);

    /// Take ownership of the clipboard's selection for `targets`.
    fn claim(&self, clipboard: &Clipboard, targets: &[TargetEntry], same_owner: bool) -> bool;

    /// Advertise the installed targets.
    fn publish_targets(&self, clipboard: &Clipboard, targets: &[TargetEntry]);

    /// Give up the selection.
    fn release(&self, clipboard: &Clipboard);

    /// Retrieve `target` from the current owner; `callback` runs exactly once.
    fn request(&self, clipboard: &Clipboard, target: Atom, callback: RequestCallback);

    /// True if someone else replaced the contents since our last claim.
    fn ownership_stale(&self, clipboard: &Clipboard) -> bool;

    /// Whether owner changes are reported, making a TARGETS cache safe.
    fn supports_owner_change(&self, clipboard: &Clipboard) -> bool;

    /// Contents became storable for the first time since they were set.
    fn enable_store(&self, clipboard: &Clipboard);

    /// Persist the contents beyond the application's lifetime.
    fn store(&self, clipboard: &Clipboard, targets: &[Atom]);
}

fn rejected(clipboard: &Clipboard, target: Atom) -> SelectionData {
    SelectionData::for_display(clipboard.display().id(), clipboard.selection(), target)
}

// =============================================================================
// Selection engine platform
// =============================================================================

/// The hidden widget serving all clipboards of one display.
#[derive(Clone)]
pub(crate) struct ClipboardWidget {
    pub(crate) widget: Widget,
    request: RequestSlot,
}

/// A realized widget whose `selection-received` completes the callback in
/// its slot. Transient widgets destroy themselves after delivering.
fn request_widget(context: &SelectionContext, display: &Display, transient: bool) -> (Widget, RequestSlot) {
    let widget = Widget::new(context, display);
    widget.realize();
    let slot: RequestSlot = Rc::new(RefCell::new(None));
    let pending = Rc::clone(&slot);
    widget.connect_selection_received(move |widget, data, _| {
        let callback = pending.borrow_mut().take();
        if let Some(callback) = callback {
            callback(data);
        }
        if transient {
            widget.destroy();
        }
    });
    (widget, slot)
}

impl SelectionContext {
    /// The display's clipboard widget, created on first use.
    pub(crate) fn clipboard_widget(&self, display: &Display) -> ClipboardWidget {
        if let Some(existing) = self.inner().clipboard_widgets.borrow().get(&display.id()) {
            return existing.clone();
        }

        let (widget, request) = request_widget(self, display, false);
        let weak = self.downgrade_inner();
        widget.connect_selection_get(move |widget, data, info, _| {
            let clipboard = SelectionContext::from_weak(&weak)
                .and_then(|context| context.clipboard_lookup(widget.display().id(), data.selection()));
            if let Some(clipboard) = clipboard {
                clipboard.provide(data, info);
            }
        });
        let weak = self.downgrade_inner();
        widget.connect_selection_clear_event(move |widget, event| {
            let clipboard = SelectionContext::from_weak(&weak)
                .and_then(|context| context.clipboard_lookup(widget.display().id(), event.selection));
            if let Some(clipboard) = clipboard {
                clipboard.lose_selection();
            }
            false
        });

        let display_id = display.id().0;
        trace!(display = display_id, widget = widget.id(), "clipboard widget created");
        let clipboard_widget = ClipboardWidget { widget, request };
        self.inner()
            .clipboard_widgets
            .borrow_mut()
            .insert(display.id(), clipboard_widget.clone());
        clipboard_widget
    }
}

/// Clipboards built on ICCCM selections.
pub(crate) struct SelectionPlatform;

impl ClipboardPlatform for SelectionPlatform {
    fn attach(&self, clipboard: &Clipboard) {
        let Some(context) = clipboard.context() else {
            return;
        };
        let clipboard_widget = context.clipboard_widget(clipboard.display());
        if let (Some(transport), Some(window)) = (clipboard.display().transport(), clipboard_widget.widget.window()) {
            transport.select_owner_change(window, clipboard.selection());
        }
    }

    fn claim(&self, clipboard: &Clipboard, _targets: &[TargetEntry], _same_owner: bool) -> bool {
        let Some(context) = clipboard.context() else {
            return false;
        };
        let clipboard_widget = context.clipboard_widget(clipboard.display());
        let time = clipboard.next_timestamp();
        context.selection_owner_set(
            clipboard.display(),
            Some(&clipboard_widget.widget),
            clipboard.selection(),
            time,
        )
    }

    fn publish_targets(&self, clipboard: &Clipboard, targets: &[TargetEntry]) {
        let Some(context) = clipboard.context() else {
            return;
        };
        let widget = context.clipboard_widget(clipboard.display()).widget;
        context.selection_clear_targets(&widget, clipboard.selection());
        context.selection_add_targets(&widget, clipboard.selection(), targets);
    }

    fn release(&self, clipboard: &Clipboard) {
        let Some(context) = clipboard.context() else {
            return;
        };
        let time = clipboard.next_timestamp();
        if !context.selection_owner_set(clipboard.display(), None, clipboard.selection(), time) {
            debug!(selection = %clipboard.selection(), time, "clipboard release refused");
        }
    }

    fn request(&self, clipboard: &Clipboard, target: Atom, callback: RequestCallback) {
        let Some(context) = clipboard.context() else {
            callback(&rejected(clipboard, target));
            return;
        };
        let display = clipboard.display();
        let main = context.clipboard_widget(display);
        let busy = main.request.borrow().is_some();
        let (widget, slot) = if busy {
            trace!(target = %target, "clipboard widget busy, using a secondary widget");
            request_widget(&context, display, true)
        } else {
            (main.widget, main.request)
        };

        *slot.borrow_mut() = Some(callback);
        let time = clipboard.next_timestamp();
        if !context.selection_convert(&widget, clipboard.selection(), target, time) {
            debug!(target = %target, "clipboard conversion could not start");
            let callback = slot.borrow_mut().take();
            if let Some(callback) = callback {
                callback(&rejected(clipboard, target));
            }
            if busy {
                widget.destroy();
            }
        }
    }

    fn ownership_stale(&self, _clipboard: &Clipboard) -> bool {
        false
    }

    fn supports_owner_change(&self, clipboard: &Clipboard) -> bool {
        clipboard.display().supports_selection_notification()
    }

    fn enable_store(&self, clipboard: &Clipboard) {
        if let Some(context) = clipboard.context() {
            let widget = context.clipboard_widget(clipboard.display()).widget;
            context.selection_add_target(&widget, clipboard.selection(), atoms::SAVE_TARGETS, 0);
        }
    }

    fn store(&self, clipboard: &Clipboard, targets: &[Atom]) {
        let Some(context) = clipboard.context() else {
            return;
        };
        let display = clipboard.display();
        let Some(transport) = display.transport() else {
            return;
        };
        if !transport.supports_clipboard_persistence() {
            debug!("no clipboard manager, nothing to store into");
            return;
        }
        let widget = context.clipboard_widget(display).widget;
        let Some(window) = widget.window() else {
            return;
        };

        let answered = Rc::new(Cell::new(false));
        let seen = Rc::clone(&answered);
        let weak = clipboard.downgrade();
        let handler = widget.connect_selection_notify_event(move |_, event| {
            let storing = Clipboard::from_weak(&weak).is_some_and(|c| c.is_storing());
            if event.selection == atoms::CLIPBOARD_MANAGER && storing {
                seen.set(true);
            }
            false
        });

        let time = clipboard.next_timestamp();
        transport.store_clipboard(window, time, targets);

        let timeout_ms = context.clipboard_policy().store_timeout_ms;
        let expired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&expired);
        let main_loop = context.main_loop();
        let timer = main_loop.add_timeout(timeout_ms, move || {
            flag.set(true);
            ControlFlow::Break(())
        });
        main_loop.run_until(|| answered.get() || expired.get());
        main_loop.remove_source(timer);
        widget.disconnect(handler);

        if answered.get() {
            info!(targets = targets.len(), "clipboard handed to the clipboard manager");
        } else {
            warn!(timeout_ms, "clipboard manager did not answer");
        }
    }
}

// =============================================================================
// Native pasteboard platform
// =============================================================================

/// Declared owner of a native pasteboard.
///
/// A token stays registered with the backend after the clipboard moves on,
/// so it is deactivated instead of dropped.
struct OwnerToken {
    clipboard: Weak<ClipboardInner>,
    active: Cell<bool>,
    setting_same_owner: Cell<bool>,
}

impl PasteboardOwner for OwnerToken {
    fn provide(&self, target: Atom) -> SelectionData {
        match Clipboard::from_weak(&self.clipboard) {
            Some(clipboard) if self.active.get() => clipboard.provide_target(target),
            _ => SelectionData::new(atoms::NONE, target),
        }
    }

    fn ownership_lost(&self) {
        if !self.active.get() || self.setting_same_owner.get() {
            return;
        }
        self.active.set(false);
        if let Some(clipboard) = Clipboard::from_weak(&self.clipboard) {
            clipboard.lose_selection();
        }
    }
}

/// Clipboards on a native pasteboard.
pub(crate) struct NativePlatform<B> {
    backend: B,
    owner: RefCell<Option<Rc<OwnerToken>>>,
    change_count: Cell<i64>,
}

impl<B: ClipboardBackend> NativePlatform<B> {
    pub(crate) fn new(backend: B) -> Self {
        Self {
            backend,
            owner: RefCell::new(None),
            change_count: Cell::new(0),
        }
    }

    fn deactivate_owner(&self) {
        if let Some(token) = self.owner.borrow_mut().take() {
            token.active.set(false);
        }
    }
}

impl<B: ClipboardBackend> ClipboardPlatform for NativePlatform<B> {
    fn attach(&self, clipboard: &Clipboard) {
        self.change_count.set(self.backend.change_count(clipboard.selection()));
        debug!(backend = self.backend.name(), selection = %clipboard.selection(), "native clipboard attached");
    }

    fn claim(&self, clipboard: &Clipboard, targets: &[TargetEntry], same_owner: bool) -> bool {
        let current = self.owner.borrow().clone();
        let token = match current {
            Some(token) if same_owner && token.active.get() => token,
            _ => {
                self.deactivate_owner();
                Rc::new(OwnerToken {
                    clipboard: clipboard.downgrade(),
                    active: Cell::new(true),
                    setting_same_owner: Cell::new(false),
                })
            }
        };

        let targets: Vec<Atom> = targets.iter().map(|entry| entry.target).collect();
        token.setting_same_owner.set(true);
        let count = self
            .backend
            .declare(clipboard.selection(), &targets, Rc::clone(&token) as Rc<dyn PasteboardOwner>);
        token.setting_same_owner.set(false);

        *self.owner.borrow_mut() = Some(token);
        self.change_count.set(count);
        true
    }

    fn publish_targets(&self, _clipboard: &Clipboard, _targets: &[TargetEntry]) {}

    fn release(&self, clipboard: &Clipboard) {
        self.deactivate_owner();
        clipboard.lose_selection();
        self.backend.release(clipboard.selection());
        self.change_count.set(self.backend.change_count(clipboard.selection()));
    }

    fn request(&self, clipboard: &Clipboard, target: Atom, callback: RequestCallback) {
        let read = self.backend.get(clipboard.selection(), target);
        let mut data = rejected(clipboard, target);
        if !read.is_rejected() {
            data.set(read.data_type(), read.format(), read.data());
        }
        callback(&data);
    }

    fn ownership_stale(&self, clipboard: &Clipboard) -> bool {
        let current = self.backend.change_count(clipboard.selection());
        if current > self.change_count.get() {
            self.change_count.set(current);
            self.deactivate_owner();
            true
        } else {
            false
        }
    }

    fn supports_owner_change(&self, _clipboard: &Clipboard) -> bool {
        false
    }

    fn enable_store(&self, _clipboard: &Clipboard) {}

    fn store(&self, clipboard: &Clipboard, _targets: &[Atom]) {
        // Every offered target is rendered now; the provider may change or
        // clear the contents, so re-check before each one.
        let entries = clipboard.offered_targets();
        let mut stored = 0;
        for entry in entries {
            if clipboard.offered_targets().is_empty() {
                break;
            }
            let data = clipboard.provide_target(entry.target);
            if data.is_rejected() {
                continue;
            }
            match self.backend.put(clipboard.selection(), &data) {
                Ok(()) => stored += 1,
                Err(e) => warn!(error = %e, target = %entry.target, "failed to store target"),
            }
        }
        info!(backend = self.backend.name(), stored, "clipboard rendered into the pasteboard");
    }
}
