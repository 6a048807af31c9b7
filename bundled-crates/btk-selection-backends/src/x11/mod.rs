//! X11 selection transport backed by an in-process display server.
//!
//! Several [`X11Connection`]s on one [`X11Server`] behave like separate
//! client processes: each sees only its own events, and selection data
//! moves between them through window properties exactly as on a real
//! display.

mod manager;
mod server;

pub use server::{ClientId, PropertyWrite, ServerStats, X11Server, DEFAULT_MAX_REQUEST_SIZE};

use btk_selection_core::{atoms, atoms_to_bytes, Atom, SelectionResult};
use tracing::{debug, warn};

use crate::transport::{PropMode, Property, SelectionTransport, Timestamp, TransportEvent, WindowId};

/// One client connection to an [`X11Server`].
#[derive(Debug, Clone)]
pub struct X11Connection {
    server: X11Server,
    client: ClientId,
}

impl X11Connection {
    pub(crate) fn new(server: X11Server, client: ClientId) -> Self {
        Self { server, client }
    }

    /// Server this connection talks to
    pub fn server(&self) -> &X11Server {
        &self.server
    }

    /// Client id assigned by the server
    pub fn client_id(&self) -> ClientId {
        self.client
    }
}

impl SelectionTransport for X11Connection {
    fn create_window(&self) -> WindowId {
        self.server.create_window(self.client)
    }

    fn destroy_window(&self, window: WindowId) {
        self.server.destroy_window(window);
    }

    fn server_time(&self) -> Timestamp {
        self.server.server_time()
    }

    fn max_request_size(&self) -> usize {
        self.server.max_request_size()
    }

    fn set_selection_owner(&self, owner: Option<WindowId>, selection: Atom, time: Timestamp) -> bool {
        self.server.set_selection_owner(owner, selection, time)
    }

    fn selection_owner(&self, selection: Atom) -> Option<WindowId> {
        self.server.selection_owner(selection)
    }

    fn convert_selection(&self, requestor: WindowId, selection: Atom, target: Atom, property: Atom, time: Timestamp) {
        self.server.convert_selection(requestor, selection, target, property, time);
    }

    fn change_property(
        &self,
        window: WindowId,
        property: Atom,
        data_type: Atom,
        format: i32,
        mode: PropMode,
        data: &[u8],
    ) -> SelectionResult<()> {
        self.server.change_property(window, property, data_type, format, mode, data)
    }

    fn get_property(&self, window: WindowId, property: Atom, delete: bool) -> Option<Property> {
        self.server.get_property(window, property, delete)
    }

    fn delete_property(&self, window: WindowId, property: Atom) {
        self.server.delete_property(window, property);
    }

    fn send_selection_notify(&self, requestor: WindowId, selection: Atom, target: Atom, property: Atom, time: Timestamp) {
        self.server.send_selection_notify(requestor, selection, target, property, time);
    }

    fn select_property_events(&self, window: WindowId) {
        self.server.select_property_events(self.client, window);
    }

    fn select_owner_change(&self, window: WindowId, selection: Atom) {
        self.server.select_owner_change(self.client, window, selection);
    }

    fn supports_selection_notification(&self) -> bool {
        true
    }

    fn supports_clipboard_persistence(&self) -> bool {
        self.server.has_clipboard_manager()
    }

    fn store_clipboard(&self, window: WindowId, time: Timestamp, targets: &[Atom]) {
        if !self.supports_clipboard_persistence() {
            return;
        }
        let property = if targets.is_empty() {
            atoms::NONE
        } else {
            let data = atoms_to_bytes(targets);
            if let Err(e) = self.change_property(window, atoms::BTK_SELECTION, atoms::ATOM, 32, PropMode::Replace, &data) {
                warn!(error = %e, "failed to publish targets to store");
                return;
            }
            atoms::BTK_SELECTION
        };
        debug!(window = window.0, targets = targets.len(), "asking clipboard manager to store");
        self.convert_selection(window, atoms::CLIPBOARD_MANAGER, atoms::SAVE_TARGETS, property, time);
    }

    fn next_event(&self) -> Option<TransportEvent> {
        self.server.next_event(self.client)
    }

    fn has_pending(&self) -> bool {
        self.server.has_pending(self.client)
    }
}
