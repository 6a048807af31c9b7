//! In-process X11 display server.
//!
//! Implements the parts of the core protocol the selection machinery relies
//! on: window properties with PropertyNotify, selection ownership with
//! SelectionClear, ConvertSelection routing, and XFixes-style owner change
//! notification. Every client gets its own event queue; nothing is
//! delivered until the client polls its [`X11Connection`].
//!
//! The server clock advances by one millisecond per request so ownership
//! timestamps are strictly ordered.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use btk_selection_core::{atoms, Atom, SelectionError, SelectionResult};
use tracing::{debug, trace};

use super::manager::ClipboardManager;
use super::X11Connection;
use crate::transport::{PropMode, Property, PropertyState, Timestamp, TransportEvent, WindowId, CURRENT_TIME};

/// Identifies one client connection.
pub type ClientId = u32;

/// Default per-request payload limit: one 256 KiB chunk plus request overhead.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 262_144 + 100;

/// Server start time; timestamps below this are never issued.
const INITIAL_TIME: Timestamp = 1000;

/// Counters for protocol traffic, used to observe behaviour in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// ConvertSelection requests
    pub conversions: usize,
    /// ChangeProperty requests that succeeded
    pub property_writes: usize,
    /// SelectionNotify events sent with property NONE
    pub refusals: usize,
}

/// One ChangeProperty request, recorded when the property log is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyWrite {
    /// Window written to
    pub window: WindowId,
    /// Property name
    pub property: Atom,
    /// Type of the written value
    pub data_type: Atom,
    /// Bytes written by this request
    pub len: usize,
}

#[derive(Debug, Default)]
struct WindowState {
    client: ClientId,
    properties: HashMap<Atom, Property>,
    listeners: Vec<ClientId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SelectionState {
    owner: Option<WindowId>,
    last_change: Timestamp,
}

#[derive(Debug)]
struct ServerState {
    time: Timestamp,
    next_window: u32,
    next_client: ClientId,
    max_request_size: usize,
    windows: HashMap<WindowId, WindowState>,
    selections: HashMap<Atom, SelectionState>,
    queues: HashMap<ClientId, VecDeque<TransportEvent>>,
    owner_listeners: Vec<(ClientId, WindowId, Atom)>,
    stats: ServerStats,
    property_log: Option<Vec<PropertyWrite>>,
}

impl ServerState {
    fn tick(&mut self) -> Timestamp {
        self.time = self.time.wrapping_add(1);
        self.time
    }

    fn resolve(&self, time: Timestamp) -> Timestamp {
        if time == CURRENT_TIME {
            self.time
        } else {
            time
        }
    }

    fn queue(&mut self, client: ClientId, event: TransportEvent) {
        trace!(client, ?event, "queue event");
        self.queues.entry(client).or_default().push_back(event);
    }

    fn notify_property(&mut self, window: WindowId, atom: Atom, state: PropertyState) {
        let Some(win) = self.windows.get(&window) else {
            return;
        };
        let mut clients = vec![win.client];
        for &listener in &win.listeners {
            if !clients.contains(&listener) {
                clients.push(listener);
            }
        }
        let time = self.time;
        for client in clients {
            self.queue(
                client,
                TransportEvent::PropertyNotify {
                    window,
                    atom,
                    state,
                    time,
                },
            );
        }
    }

    fn notify_owner_change(&mut self, selection: Atom, owner: Option<WindowId>) {
        let time = self.time;
        let targets: Vec<(ClientId, WindowId)> = self
            .owner_listeners
            .iter()
            .filter(|(_, _, sel)| *sel == selection)
            .map(|&(client, window, _)| (client, window))
            .collect();
        for (client, window) in targets {
            self.queue(
                client,
                TransportEvent::OwnerChange {
                    window,
                    selection,
                    owner,
                    time,
                },
            );
        }
    }

    fn client_of(&self, window: WindowId) -> Option<ClientId> {
        self.windows.get(&window).map(|w| w.client)
    }
}

struct ServerInner {
    state: RefCell<ServerState>,
    manager: RefCell<Option<ClipboardManager>>,
}

/// Shared handle to the in-process display server.
#[derive(Clone)]
pub struct X11Server {
    inner: Rc<ServerInner>,
}

impl Default for X11Server {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for X11Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("X11Server")
            .field("time", &state.time)
            .field("windows", &state.windows.len())
            .field("max_request_size", &state.max_request_size)
            .finish()
    }
}

impl X11Server {
    /// New server with the default request size limit and no clipboard manager.
    pub fn new() -> Self {
        Self::with_max_request_size(DEFAULT_MAX_REQUEST_SIZE)
    }

    /// New server that rejects property writes larger than `max_request_size`.
    pub fn with_max_request_size(max_request_size: usize) -> Self {
        let state = ServerState {
            time: INITIAL_TIME,
            next_window: 1,
            next_client: 1,
            max_request_size,
            windows: HashMap::new(),
            selections: HashMap::new(),
            queues: HashMap::new(),
            owner_listeners: Vec::new(),
            stats: ServerStats::default(),
            property_log: None,
        };
        Self {
            inner: Rc::new(ServerInner {
                state: RefCell::new(state),
                manager: RefCell::new(None),
            }),
        }
    }

    /// Open a new client connection.
    pub fn connect(&self) -> X11Connection {
        let client = {
            let mut state = self.inner.state.borrow_mut();
            let client = state.next_client;
            state.next_client += 1;
            state.queues.insert(client, VecDeque::new());
            client
        };
        debug!(client, "client connected");
        X11Connection::new(self.clone(), client)
    }

    /// Start a clipboard manager on its own connection.
    ///
    /// It claims CLIPBOARD_MANAGER, answers SAVE_TARGETS requests by copying
    /// the clipboard, and takes over CLIPBOARD when the owner goes away.
    pub fn start_clipboard_manager(&self) {
        if self.inner.manager.borrow().is_some() {
            return;
        }
        let conn = self.connect();
        let manager = ClipboardManager::start(&conn);
        *self.inner.manager.borrow_mut() = Some(manager);
    }

    /// Targets the clipboard manager currently holds.
    pub fn stored_clipboard_targets(&self) -> Vec<Atom> {
        self.inner
            .manager
            .borrow()
            .as_ref()
            .map(ClipboardManager::stored_targets)
            .unwrap_or_default()
    }

    /// Value the clipboard manager holds for `target`.
    pub fn stored_clipboard_value(&self, target: Atom) -> Option<Property> {
        self.inner
            .manager
            .borrow()
            .as_ref()
            .and_then(|m| m.stored_value(target))
    }

    /// Traffic counters since the server started.
    pub fn stats(&self) -> ServerStats {
        self.inner.state.borrow().stats
    }

    /// Record every successful property write from now on.
    pub fn enable_property_log(&self) {
        let mut state = self.inner.state.borrow_mut();
        if state.property_log.is_none() {
            state.property_log = Some(Vec::new());
        }
    }

    /// Writes recorded since the log was enabled.
    pub fn property_log(&self) -> Vec<PropertyWrite> {
        self.inner.state.borrow().property_log.clone().unwrap_or_default()
    }

    /// Move the server clock forward.
    pub fn advance_time(&self, ms: u32) {
        let mut state = self.inner.state.borrow_mut();
        state.time = state.time.wrapping_add(ms);
    }

    /// Let the clipboard manager process its queued events.
    ///
    /// Runs whenever another client polls, so the manager behaves like a
    /// separate process scheduled between client requests.
    pub(crate) fn pump_manager(&self, caller: ClientId) {
        let Ok(mut slot) = self.inner.manager.try_borrow_mut() else {
            return;
        };
        if let Some(manager) = slot.as_mut() {
            if manager.client() != caller {
                let conn = X11Connection::new(self.clone(), manager.client());
                manager.pump(&conn);
            }
        }
    }

    pub(crate) fn has_clipboard_manager(&self) -> bool {
        self.selection_owner(atoms::CLIPBOARD_MANAGER).is_some()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    pub(crate) fn create_window(&self, client: ClientId) -> WindowId {
        let mut state = self.inner.state.borrow_mut();
        state.tick();
        let window = WindowId(state.next_window);
        state.next_window += 1;
        state.windows.insert(
            window,
            WindowState {
                client,
                ..Default::default()
            },
        );
        trace!(client, window = window.0, "create window");
        window
    }

    pub(crate) fn destroy_window(&self, window: WindowId) {
        let mut state = self.inner.state.borrow_mut();
        state.tick();
        if state.windows.remove(&window).is_none() {
            return;
        }
        state.owner_listeners.retain(|(_, w, _)| *w != window);

        let owned: Vec<Atom> = state
            .selections
            .iter()
            .filter(|(_, s)| s.owner == Some(window))
            .map(|(&sel, _)| sel)
            .collect();
        for selection in owned {
            let time = state.time;
            if let Some(sel) = state.selections.get_mut(&selection) {
                sel.owner = None;
                sel.last_change = time;
            }
            debug!(window = window.0, selection = %selection, "owner destroyed");
            state.notify_owner_change(selection, None);
        }
    }

    pub(crate) fn server_time(&self) -> Timestamp {
        self.inner.state.borrow().time
    }

    pub(crate) fn max_request_size(&self) -> usize {
        self.inner.state.borrow().max_request_size
    }

    pub(crate) fn set_selection_owner(&self, owner: Option<WindowId>, selection: Atom, time: Timestamp) -> bool {
        let mut state = self.inner.state.borrow_mut();
        let now = state.tick();
        let time = state.resolve(time);
        let current = state.selections.get(&selection).copied().unwrap_or_default();

        if time < current.last_change || time > now {
            debug!(selection = %selection, time, last_change = current.last_change, "stale ownership change ignored");
            return false;
        }
        if let Some(window) = owner {
            if !state.windows.contains_key(&window) {
                return false;
            }
        }

        state.selections.insert(
            selection,
            SelectionState {
                owner,
                last_change: time,
            },
        );

        if let Some(old) = current.owner {
            if Some(old) != owner {
                let old_client = state.client_of(old);
                let new_client = owner.and_then(|w| state.client_of(w));
                if let Some(old_client) = old_client {
                    if old_client_differs(old_client, new_client) {
                        state.queue(
                            old_client,
                            TransportEvent::SelectionClear {
                                window: old,
                                selection,
                                time,
                            },
                        );
                    }
                }
            }
        }
        state.notify_owner_change(selection, owner);
        true
    }

    pub(crate) fn selection_owner(&self, selection: Atom) -> Option<WindowId> {
        self.inner.state.borrow().selections.get(&selection).and_then(|s| s.owner)
    }

    pub(crate) fn convert_selection(
        &self,
        requestor: WindowId,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) {
        let mut state = self.inner.state.borrow_mut();
        state.tick();
        state.stats.conversions += 1;
        let time = state.resolve(time);

        let Some(requestor_client) = state.client_of(requestor) else {
            return;
        };
        let owner = state.selections.get(&selection).and_then(|s| s.owner);
        match owner.and_then(|w| state.client_of(w).map(|c| (w, c))) {
            Some((owner, owner_client)) => state.queue(
                owner_client,
                TransportEvent::SelectionRequest {
                    owner,
                    requestor,
                    selection,
                    target,
                    property,
                    time,
                },
            ),
            None => {
                state.stats.refusals += 1;
                state.queue(
                    requestor_client,
                    TransportEvent::SelectionNotify {
                        requestor,
                        selection,
                        target,
                        property: atoms::NONE,
                        time,
                    },
                );
            }
        }
    }

    pub(crate) fn change_property(
        &self,
        window: WindowId,
        property: Atom,
        data_type: Atom,
        format: i32,
        mode: PropMode,
        data: &[u8],
    ) -> SelectionResult<()> {
        let mut state = self.inner.state.borrow_mut();
        state.tick();
        if data.len() > state.max_request_size {
            return Err(SelectionError::DataSizeExceeded {
                actual: data.len(),
                max: state.max_request_size,
            });
        }
        let win = state.windows.get_mut(&window).ok_or(SelectionError::BadWindow(window.0))?;

        match (mode, win.properties.get_mut(&property)) {
            (PropMode::Append, Some(existing)) => {
                if existing.data_type != data_type || existing.format != format {
                    return Err(SelectionError::InvalidState(format!(
                        "append to {property} with mismatched type or format"
                    )));
                }
                existing.data.extend_from_slice(data);
            }
            _ => {
                win.properties.insert(
                    property,
                    Property {
                        data_type,
                        format,
                        data: data.to_vec(),
                    },
                );
            }
        }

        state.stats.property_writes += 1;
        if let Some(log) = state.property_log.as_mut() {
            log.push(PropertyWrite {
                window,
                property,
                data_type,
                len: data.len(),
            });
        }
        state.notify_property(window, property, PropertyState::NewValue);
        Ok(())
    }

    pub(crate) fn get_property(&self, window: WindowId, property: Atom, delete: bool) -> Option<Property> {
        let mut state = self.inner.state.borrow_mut();
        state.tick();
        let win = state.windows.get_mut(&window)?;
        if !delete {
            return win.properties.get(&property).cloned();
        }
        let value = win.properties.remove(&property)?;
        state.notify_property(window, property, PropertyState::Deleted);
        Some(value)
    }

    pub(crate) fn delete_property(&self, window: WindowId, property: Atom) {
        let mut state = self.inner.state.borrow_mut();
        state.tick();
        let removed = state
            .windows
            .get_mut(&window)
            .and_then(|w| w.properties.remove(&property))
            .is_some();
        if removed {
            state.notify_property(window, property, PropertyState::Deleted);
        }
    }

    pub(crate) fn send_selection_notify(
        &self,
        requestor: WindowId,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) {
        let mut state = self.inner.state.borrow_mut();
        state.tick();
        let Some(client) = state.client_of(requestor) else {
            debug!(requestor = requestor.0, "selection notify for vanished requestor dropped");
            return;
        };
        if property.is_none() {
            state.stats.refusals += 1;
        }
        state.queue(
            client,
            TransportEvent::SelectionNotify {
                requestor,
                selection,
                target,
                property,
                time,
            },
        );
    }

    pub(crate) fn select_property_events(&self, client: ClientId, window: WindowId) {
        let mut state = self.inner.state.borrow_mut();
        if let Some(win) = state.windows.get_mut(&window) {
            if !win.listeners.contains(&client) {
                win.listeners.push(client);
            }
        }
    }

    pub(crate) fn select_owner_change(&self, client: ClientId, window: WindowId, selection: Atom) {
        let mut state = self.inner.state.borrow_mut();
        let entry = (client, window, selection);
        if !state.owner_listeners.contains(&entry) {
            state.owner_listeners.push(entry);
        }
    }

    pub(crate) fn next_event(&self, client: ClientId) -> Option<TransportEvent> {
        self.pump_manager(client);
        self.inner
            .state
            .borrow_mut()
            .queues
            .get_mut(&client)
            .and_then(VecDeque::pop_front)
    }

    pub(crate) fn has_pending(&self, client: ClientId) -> bool {
        self.pump_manager(client);
        self.inner
            .state
            .borrow()
            .queues
            .get(&client)
            .is_some_and(|q| !q.is_empty())
    }
}

/// SelectionClear is only delivered across clients; a client replacing its
/// own ownership already knows about it.
fn old_client_differs(old: ClientId, new: Option<ClientId>) -> bool {
    new != Some(old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SelectionTransport;

    fn drain(conn: &X11Connection) -> Vec<TransportEvent> {
        std::iter::from_fn(|| conn.next_event()).collect()
    }

    #[test]
    fn test_selection_clear_goes_to_other_client() {
        let server = X11Server::new();
        let a = server.connect();
        let b = server.connect();
        let wa = a.create_window();
        let wa2 = a.create_window();
        let wb = b.create_window();

        assert!(a.set_selection_owner(Some(wa), atoms::PRIMARY, CURRENT_TIME));
        assert!(a.set_selection_owner(Some(wa2), atoms::PRIMARY, CURRENT_TIME));
        assert!(drain(&a).is_empty());

        assert!(b.set_selection_owner(Some(wb), atoms::PRIMARY, CURRENT_TIME));
        let events = drain(&a);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            TransportEvent::SelectionClear { window, selection, .. } if window == wa2 && selection == atoms::PRIMARY
        ));
        assert_eq!(b.selection_owner(atoms::PRIMARY), Some(wb));
    }

    #[test]
    fn test_stale_claim_is_ignored() {
        let server = X11Server::new();
        let a = server.connect();
        let w = a.create_window();

        let now = a.server_time();
        assert!(a.set_selection_owner(Some(w), atoms::CLIPBOARD, now));
        assert!(!a.set_selection_owner(None, atoms::CLIPBOARD, now - 1));
        assert!(!a.set_selection_owner(None, atoms::CLIPBOARD, now + 1000));
        assert_eq!(a.selection_owner(atoms::CLIPBOARD), Some(w));
    }

    #[test]
    fn test_convert_without_owner_refuses() {
        let server = X11Server::new();
        let a = server.connect();
        let w = a.create_window();

        a.convert_selection(w, atoms::PRIMARY, atoms::STRING, atoms::BTK_SELECTION, CURRENT_TIME);
        let events = drain(&a);
        assert!(matches!(
            events[..],
            [TransportEvent::SelectionNotify { property, .. }] if property == atoms::NONE
        ));
        assert_eq!(server.stats().conversions, 1);
        assert_eq!(server.stats().refusals, 1);
    }

    #[test]
    fn test_property_events_reach_listeners() {
        let server = X11Server::new();
        let a = server.connect();
        let b = server.connect();
        let w = a.create_window();
        b.select_property_events(w);

        a.change_property(w, atoms::BTK_SELECTION, atoms::STRING, 8, PropMode::Replace, b"ab")
            .unwrap();
        a.change_property(w, atoms::BTK_SELECTION, atoms::STRING, 8, PropMode::Append, b"cd")
            .unwrap();
        let value = b.get_property(w, atoms::BTK_SELECTION, true).unwrap();
        assert_eq!(value.data, b"abcd");

        let states: Vec<PropertyState> = drain(&b)
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::PropertyNotify { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![PropertyState::NewValue, PropertyState::NewValue, PropertyState::Deleted]
        );
        assert_eq!(drain(&a).len(), 3);
    }

    #[test]
    fn test_oversized_write_rejected() {
        let server = X11Server::with_max_request_size(8);
        let a = server.connect();
        let w = a.create_window();
        let err = a
            .change_property(w, atoms::BTK_SELECTION, atoms::STRING, 8, PropMode::Replace, &[0; 9])
            .unwrap_err();
        assert!(matches!(err, SelectionError::DataSizeExceeded { actual: 9, max: 8 }));

        let err = a
            .change_property(WindowId(999), atoms::BTK_SELECTION, atoms::STRING, 8, PropMode::Replace, b"x")
            .unwrap_err();
        assert!(matches!(err, SelectionError::BadWindow(999)));
    }

    #[test]
    fn test_destroy_releases_selection_and_notifies() {
        let server = X11Server::new();
        let a = server.connect();
        let b = server.connect();
        let wa = a.create_window();
        let wb = b.create_window();
        b.select_owner_change(wb, atoms::CLIPBOARD);

        a.set_selection_owner(Some(wa), atoms::CLIPBOARD, CURRENT_TIME);
        a.destroy_window(wa);
        assert_eq!(a.selection_owner(atoms::CLIPBOARD), None);

        let owners: Vec<Option<WindowId>> = drain(&b)
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::OwnerChange { owner, .. } => Some(owner),
                _ => None,
            })
            .collect();
        assert_eq!(owners, vec![Some(wa), None]);
    }

    #[test]
    fn test_property_log() {
        let server = X11Server::new();
        server.enable_property_log();
        let a = server.connect();
        let w = a.create_window();
        a.change_property(w, atoms::BTK_SELECTION, atoms::INCR, 32, PropMode::Replace, &[0; 4])
            .unwrap();
        assert_eq!(
            server.property_log(),
            vec![PropertyWrite {
                window: w,
                property: atoms::BTK_SELECTION,
                data_type: atoms::INCR,
                len: 4,
            }]
        );
    }
}
