//! Clipboard façade.
//!
//! One [`Clipboard`] exists per `(display, selection)`, created on first
//! lookup through [`SelectionContext::clipboard_for_display`]. Setting
//! contents claims the selection and installs a provider callback; requests
//! retrieve whatever the current owner offers, in this process or another.
//!
//! # Platforms
//!
//! ```text
//!                 ┌──────────────┐
//!                 │  Clipboard   │  set_* / request_* / wait_* / store
//!                 └──────┬───────┘
//!                        │ ClipboardPlatform
//!          ┌─────────────┴──────────────┐
//!          ▼                            ▼
//!  ┌──────────────────┐        ┌─────────────────────┐
//!  │ SelectionPlatform │        │ NativePlatform<B>   │
//!  │ (shared widget,   │        │ (owner token,       │
//!  │  selection engine)│        │  change count)      │
//!  └──────────────────┘        └─────────────────────┘
//!        X11                       Win32 / Quartz
//! ```
//!
//! On X11 every clipboard of a display is served by one hidden widget that
//! owns the selections and runs the retrievals. Native pasteboards are
//! driven through their [`ClipboardBackend`](btk_selection_backends::ClipboardBackend)
//! directly, with delayed rendering calling back into the provider.
//!
//! # Re-entrancy
//!
//! Clear callbacks may call back into the clipboard, including setting new
//! contents. `set_*` re-checks the state after running the previous clear
//! callback and backs out if it was replaced underneath.

mod platform;
mod requests;
mod store;

use std::any::Any;
use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use btk_selection_backends::{PlatformConnection, Timestamp, WindowId, CURRENT_TIME};
use btk_selection_core::image::Pixbuf;
use btk_selection_core::{atoms, Atom, DisplayId, SelectionData, TargetEntry, TargetList};
use tracing::debug;

use crate::context::{ContextInner, Display, SelectionContext};
use crate::widget::HandlerId;

pub(crate) use platform::ClipboardWidget;
use platform::{ClipboardPlatform, NativePlatform, SelectionPlatform};

/// Application data installed with the contents.
pub type UserData = Rc<dyn Any>;

/// Renders one target: fill the data, or leave it untouched to reject.
pub type ClipboardGetFunc = Rc<dyn Fn(&Clipboard, &mut SelectionData, u32, &UserData)>;

/// Called once when installed contents are replaced or cleared.
pub type ClipboardClearFunc = Rc<dyn Fn(&Clipboard, &UserData)>;

type OwnerChangeHandler = Rc<dyn Fn(&Clipboard, &OwnerChangeEvent)>;

/// The owner of a clipboard's selection changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerChangeEvent {
    /// Selection whose owner changed
    pub selection: Atom,
    /// New owner window, `None` when unowned
    pub owner: Option<WindowId>,
    /// Time of the change
    pub time: Timestamp,
}

#[derive(Default)]
struct ClipboardState {
    get_func: Option<ClipboardGetFunc>,
    clear_func: Option<ClipboardClearFunc>,
    user_data: Option<UserData>,
    have_owner: bool,
    have_selection: bool,
    target_list: Option<TargetList>,
    timestamp: Timestamp,
    cached_targets: Option<Vec<Atom>>,
    /// `None` until `set_can_store` is called for the current contents
    storable_targets: Option<Vec<Atom>>,
    storing: bool,
}

pub(crate) struct ClipboardInner {
    context: Weak<ContextInner>,
    display: Display,
    selection: Atom,
    platform: Box<dyn ClipboardPlatform>,
    state: RefCell<ClipboardState>,
    owner_change: RefCell<Vec<(HandlerId, OwnerChangeHandler)>>,
    next_handler: Cell<HandlerId>,
}

/// Clipboard for one selection on one display.
#[derive(Clone)]
pub struct Clipboard {
    inner: Rc<ClipboardInner>,
}

impl fmt::Debug for Clipboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Clipboard")
            .field("display", &self.inner.display.id())
            .field("selection", &self.inner.selection)
            .field("have_selection", &state.have_selection)
            .field("have_owner", &state.have_owner)
            .finish()
    }
}

impl PartialEq for Clipboard {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Snap `candidate` forward to `last` if `last` is newer, comparing the
/// 32-bit timestamps with wraparound. A `last` of `CURRENT_TIME` means no
/// timestamp was used yet.
pub fn snap_timestamp(candidate: Timestamp, last: Timestamp) -> Timestamp {
    if last == CURRENT_TIME {
        return candidate;
    }
    let max = candidate.wrapping_add(0x8000_0000);
    let last_is_newer = if max > candidate {
        last > candidate && last <= max
    } else {
        last > candidate || last <= max
    };
    if last_is_newer {
        last
    } else {
        candidate
    }
}

fn same_user_data(a: &UserData, b: &UserData) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

impl Clipboard {
    fn new(context: &SelectionContext, display: &Display, selection: Atom) -> Self {
        let platform: Box<dyn ClipboardPlatform> = match display.connection() {
            PlatformConnection::X11(_) => Box::new(SelectionPlatform),
            PlatformConnection::Win32(backend) => Box::new(NativePlatform::new(backend.clone())),
            PlatformConnection::Quartz(backend) => Box::new(NativePlatform::new(backend.clone())),
        };
        Self {
            inner: Rc::new(ClipboardInner {
                context: context.downgrade_inner(),
                display: display.clone(),
                selection,
                platform,
                state: RefCell::new(ClipboardState::default()),
                owner_change: RefCell::new(Vec::new()),
                next_handler: Cell::new(1),
            }),
        }
    }

    pub(crate) fn from_weak(weak: &Weak<ClipboardInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<ClipboardInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn context(&self) -> Option<SelectionContext> {
        SelectionContext::from_weak(&self.inner.context)
    }

    fn state(&self) -> RefMut<'_, ClipboardState> {
        self.inner.state.borrow_mut()
    }

    /// Display this clipboard belongs to
    pub fn display(&self) -> &Display {
        &self.inner.display
    }

    /// Selection this clipboard stands for
    pub fn selection(&self) -> Atom {
        self.inner.selection
    }

    /// True while contents set through this clipboard own the selection.
    pub fn has_selection(&self) -> bool {
        self.inner.state.borrow().have_selection
    }

    /// Targets offered by the installed contents.
    pub fn offered_targets(&self) -> Vec<TargetEntry> {
        self.inner
            .state
            .borrow()
            .target_list
            .as_ref()
            .map(TargetList::entries)
            .unwrap_or_default()
    }

    /// Timestamp for the next ownership change.
    ///
    /// The time of the event being dispatched when there is one, otherwise
    /// the server time; never earlier than the previous timestamp.
    pub(crate) fn next_timestamp(&self) -> Timestamp {
        let candidate = self
            .context()
            .and_then(|context| context.current_event_time())
            .filter(|time| *time != CURRENT_TIME)
            .or_else(|| self.inner.display.transport().map(|t| t.server_time()))
            .unwrap_or(CURRENT_TIME);
        let mut state = self.state();
        let time = snap_timestamp(candidate, state.timestamp);
        state.timestamp = time;
        time
    }

    // =========================================================================
    // Setting contents
    // =========================================================================

    fn installed_by(&self, user_data: &UserData, have_owner: bool) -> bool {
        let state = self.inner.state.borrow();
        state.have_owner
            && have_owner
            && state
                .user_data
                .as_ref()
                .is_some_and(|current| same_user_data(current, user_data))
    }

    fn set_contents(
        &self,
        targets: &[TargetEntry],
        get_func: ClipboardGetFunc,
        clear_func: ClipboardClearFunc,
        user_data: UserData,
        have_owner: bool,
    ) -> bool {
        let same_owner = self.installed_by(&user_data, have_owner);
        if !self.inner.platform.claim(self, targets, same_owner) {
            debug!(selection = %self.inner.selection, "clipboard ownership claim failed");
            return false;
        }
        {
            let mut state = self.state();
            state.have_selection = true;
            state.cached_targets = None;
        }

        if !same_owner {
            self.unset();
            let reset = self.inner.state.borrow().get_func.is_some();
            if reset {
                // The old clear callback installed new contents.
                if self.installed_by(&user_data, have_owner) {
                    return true;
                }
                clear_func(self, &user_data);
                return false;
            }
            let mut state = self.state();
            state.user_data = Some(user_data);
            state.have_owner = have_owner;
        }

        {
            let mut state = self.state();
            state.get_func = Some(get_func);
            state.clear_func = Some(clear_func);
            state.target_list = Some(TargetList::new(targets));
        }
        self.inner.platform.publish_targets(self, targets);
        debug!(
            selection = %self.inner.selection,
            targets = targets.len(),
            have_owner,
            "clipboard contents set"
        );
        true
    }

    /// Offer `targets`, rendered on demand by `get`.
    ///
    /// `clear` runs once when the contents are replaced or cleared. Returns
    /// false if the selection could not be claimed; the previous contents
    /// stay in place then.
    pub fn set_with_data<G, C>(&self, targets: &[TargetEntry], get: G, clear: C, user_data: UserData) -> bool
    where
        G: Fn(&Clipboard, &mut SelectionData, u32, &UserData) + 'static,
        C: Fn(&Clipboard, &UserData) + 'static,
    {
        self.set_contents(targets, Rc::new(get), Rc::new(clear), user_data, false)
    }

    /// Like [`set_with_data`](Self::set_with_data), with `owner` reported by
    /// [`get_owner`](Self::get_owner). Setting again with the same owner
    /// keeps the installation without running the clear callback.
    pub fn set_with_owner<G, C>(&self, targets: &[TargetEntry], get: G, clear: C, owner: UserData) -> bool
    where
        G: Fn(&Clipboard, &mut SelectionData, u32, &UserData) + 'static,
        C: Fn(&Clipboard, &UserData) + 'static,
    {
        self.set_contents(targets, Rc::new(get), Rc::new(clear), owner, true)
    }

    /// Offer `text` in every text target.
    pub fn set_text(&self, text: &str) -> bool {
        let list = TargetList::new(&[]);
        list.add_text_targets(0);
        let text: UserData = Rc::new(text.to_owned());
        let set = self.set_with_data(
            &list.entries(),
            |_, data, _, user_data| {
                if let Some(text) = user_data.downcast_ref::<String>() {
                    data.set_text(text);
                }
            },
            |_, _| {},
            text,
        );
        if set {
            self.set_can_store(&[]);
        }
        set
    }

    /// Offer `pixbuf` in every writable image target.
    pub fn set_image(&self, pixbuf: &Pixbuf) -> bool {
        let list = TargetList::new(&[]);
        list.add_image_targets(0, true);
        let pixbuf: UserData = Rc::new(pixbuf.clone());
        let set = self.set_with_data(
            &list.entries(),
            |_, data, _, user_data| {
                if let Some(pixbuf) = user_data.downcast_ref::<Pixbuf>() {
                    data.set_pixbuf(pixbuf);
                }
            },
            |_, _| {},
            pixbuf,
        );
        if set {
            self.set_can_store(&[]);
        }
        set
    }

    /// Owner installed with [`set_with_owner`](Self::set_with_owner), while
    /// its contents are still current.
    pub fn get_owner(&self) -> Option<UserData> {
        self.check_stale();
        let state = self.inner.state.borrow();
        if state.have_owner {
            state.user_data.clone()
        } else {
            None
        }
    }

    /// Give up the selection if contents set here own it.
    pub fn clear(&self) {
        if self.has_selection() {
            self.inner.platform.release(self);
        }
    }

    /// Drop the installed contents, running their clear callback.
    pub(crate) fn unset(&self) {
        let (clear, user_data) = {
            let mut state = self.state();
            state.get_func = None;
            state.target_list = None;
            state.storable_targets = None;
            state.have_owner = false;
            (state.clear_func.take(), state.user_data.take())
        };
        if let (Some(clear), Some(user_data)) = (clear, user_data) {
            clear(self, &user_data);
        }
    }

    /// The selection went to someone else.
    pub(crate) fn lose_selection(&self) {
        let had = std::mem::replace(&mut self.state().have_selection, false);
        if had {
            debug!(selection = %self.inner.selection, "clipboard lost selection");
            self.unset();
        }
    }

    fn check_stale(&self) {
        if self.inner.platform.ownership_stale(self) {
            debug!(selection = %self.inner.selection, "pasteboard changed behind our back");
            self.state().have_selection = false;
            self.unset();
        }
    }

    /// Run the provider for `data`.
    pub(crate) fn provide(&self, data: &mut SelectionData, info: u32) {
        let (get, user_data) = {
            let state = self.inner.state.borrow();
            (state.get_func.clone(), state.user_data.clone())
        };
        if let (Some(get), Some(user_data)) = (get, user_data) {
            get(self, data, info, &user_data);
        }
    }

    /// Render `target` from the installed contents; rejected if not offered.
    pub(crate) fn provide_target(&self, target: Atom) -> SelectionData {
        let mut data = SelectionData::for_display(self.inner.display.id(), self.inner.selection, target);
        let info = self
            .inner
            .state
            .borrow()
            .target_list
            .as_ref()
            .and_then(|list| list.find(target));
        if let Some(info) = info {
            self.provide(&mut data, info);
        }
        data
    }

    // =========================================================================
    // Owner change
    // =========================================================================

    /// Called whenever the selection's owner changes, when the platform
    /// reports it.
    pub fn connect_owner_change<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Clipboard, &OwnerChangeEvent) + 'static,
    {
        let id = self.inner.next_handler.get();
        self.inner.next_handler.set(id + 1);
        self.inner.owner_change.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    /// Remove an owner-change handler.
    pub fn disconnect_owner_change(&self, handler: HandlerId) -> bool {
        let mut handlers = self.inner.owner_change.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != handler);
        before != handlers.len()
    }

    pub(crate) fn handle_owner_change(&self, event: &OwnerChangeEvent) {
        self.state().cached_targets = None;
        let handlers: Vec<OwnerChangeHandler> = self.inner.owner_change.borrow().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(self, event);
        }
    }
}

impl SelectionContext {
    /// The clipboard for `selection` on `display`, created on first use.
    ///
    /// `NONE` stands for CLIPBOARD.
    pub fn clipboard_for_display(&self, display: &Display, selection: Atom) -> Clipboard {
        let selection = if selection.is_none() { atoms::CLIPBOARD } else { selection };
        if let Some(clipboard) = self.clipboard_lookup(display.id(), selection) {
            return clipboard;
        }

        let clipboard = Clipboard::new(self, display, selection);
        self.inner()
            .clipboards
            .borrow_mut()
            .insert((display.id(), selection), clipboard.clone());
        clipboard.inner.platform.attach(&clipboard);
        let display_id = display.id().0;
        debug!(display = display_id, selection = %selection, "clipboard created");
        clipboard
    }

    /// The clipboard for `selection` on the default display.
    pub fn clipboard(&self, selection: Atom) -> Option<Clipboard> {
        self.default_display()
            .map(|display| self.clipboard_for_display(&display, selection))
    }

    pub(crate) fn clipboard_lookup(&self, display: DisplayId, selection: Atom) -> Option<Clipboard> {
        self.inner().clipboards.borrow().get(&(display, selection)).cloned()
    }

    /// Hand the CLIPBOARD contents of every open display to the platform
    /// for safekeeping, typically right before exiting.
    pub fn store_all(&self) {
        for display in self.displays() {
            if let Some(clipboard) = self.clipboard_lookup(display.id(), atoms::CLIPBOARD) {
                clipboard.store();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mainloop::MainLoop;
    use btk_selection_backends::{BackendFactory, BackendKind};
    use btk_selection_core::TargetFlags;
    use proptest::prelude::*;

    fn setup(kind: BackendKind) -> (SelectionContext, Clipboard) {
        let context = SelectionContext::new(MainLoop::with_virtual_clock());
        let display = context.open_display(BackendFactory::new(kind).connect());
        let clipboard = context.clipboard_for_display(&display, atoms::CLIPBOARD);
        (context, clipboard)
    }

    fn text_entry() -> [TargetEntry; 1] {
        [TargetEntry::new(atoms::UTF8_STRING, TargetFlags::NONE, 0)]
    }

    #[test]
    fn test_snap_timestamp() {
        assert_eq!(snap_timestamp(100, CURRENT_TIME), 100);
        assert_eq!(snap_timestamp(100, 50), 100);
        assert_eq!(snap_timestamp(100, 150), 150);
        // 5 is newer than u32::MAX - 5 across the wrap
        assert_eq!(snap_timestamp(u32::MAX - 5, 5), 5);
        assert_eq!(snap_timestamp(5, u32::MAX - 5), 5);
    }

    proptest! {
        #[test]
        fn prop_snap_never_goes_back(candidate in 1u32..=u32::MAX, last in 1u32..=u32::MAX) {
            let snapped = snap_timestamp(candidate, last);
            prop_assert!(snapped == candidate || snapped == last);
            // The result is never older than the last timestamp used.
            prop_assert_eq!(snap_timestamp(last, snapped), snapped);
        }
    }

    #[test]
    fn test_lookup_is_singleton_and_normalizes_none() {
        let (context, clipboard) = setup(BackendKind::X11);
        let display = clipboard.display().clone();
        assert_eq!(context.clipboard_for_display(&display, atoms::NONE), clipboard);
        assert_ne!(context.clipboard_for_display(&display, atoms::PRIMARY), clipboard);
        assert_eq!(context.clipboard(atoms::CLIPBOARD), Some(clipboard));
    }

    #[test]
    fn test_set_replaces_and_clears_once() {
        for kind in [BackendKind::X11, BackendKind::Win32, BackendKind::Quartz] {
            let (_context, clipboard) = setup(kind);
            let cleared = Rc::new(Cell::new(0));

            let count = Rc::clone(&cleared);
            assert!(clipboard.set_with_data(
                &text_entry(),
                |_, data, _, _| {
                    data.set_text("first");
                },
                move |_, _| count.set(count.get() + 1),
                Rc::new(()),
            ));
            assert!(clipboard.has_selection());

            assert!(clipboard.set_text("second"));
            assert_eq!(cleared.get(), 1, "{kind}");

            clipboard.clear();
            assert_eq!(cleared.get(), 1, "{kind}");
            assert!(!clipboard.has_selection(), "{kind}");
            assert!(clipboard.offered_targets().is_empty(), "{kind}");
        }
    }

    #[test]
    fn test_same_owner_keeps_installation() {
        let (_context, clipboard) = setup(BackendKind::X11);
        let owner: UserData = Rc::new(String::from("owner"));
        let cleared = Rc::new(Cell::new(0));

        for _ in 0..2 {
            let count = Rc::clone(&cleared);
            assert!(clipboard.set_with_owner(
                &text_entry(),
                |_, data, _, _| {
                    data.set_text("x");
                },
                move |_, _| count.set(count.get() + 1),
                Rc::clone(&owner),
            ));
        }
        assert_eq!(cleared.get(), 0);
        let current = clipboard.get_owner().unwrap();
        assert_eq!(current.downcast_ref::<String>().map(String::as_str), Some("owner"));
    }

    #[test]
    fn test_get_owner_is_none_for_plain_data() {
        let (_context, clipboard) = setup(BackendKind::Quartz);
        assert!(clipboard.set_text("plain"));
        assert!(clipboard.get_owner().is_none());
    }

    #[test]
    fn test_clear_callback_that_resets_contents() {
        let (_context, clipboard) = setup(BackendKind::X11);
        let new_cleared = Rc::new(Cell::new(0));

        // The first contents' clear callback installs replacement text.
        assert!(clipboard.set_with_data(
            &text_entry(),
            |_, _, _, _| {},
            |clipboard, _| {
                clipboard.set_text("from clear callback");
            },
            Rc::new(()),
        ));

        let count = Rc::clone(&new_cleared);
        let set = clipboard.set_with_data(
            &text_entry(),
            |_, data, _, _| {
                data.set_text("never installed");
            },
            move |_, _| count.set(count.get() + 1),
            Rc::new(()),
        );
        assert!(!set);
        assert_eq!(new_cleared.get(), 1);
        assert_eq!(clipboard.wait_for_text().as_deref(), Some("from clear callback"));
    }

    #[test]
    fn test_owner_change_invalidates_cache() {
        let (context, clipboard) = setup(BackendKind::X11);
        clipboard.state().cached_targets = Some(vec![atoms::STRING]);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let handler = clipboard.connect_owner_change(move |_, event| log.borrow_mut().push(event.owner));

        assert!(clipboard.set_text("owned"));
        while context.main_loop().iterate(false) {}

        assert!(clipboard.state().cached_targets.is_none());
        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].is_some());
        assert!(clipboard.disconnect_owner_change(handler));
    }
}
