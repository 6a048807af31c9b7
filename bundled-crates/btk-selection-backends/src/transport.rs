//! The ICCCM selection transport seen by the conversion engine.
//!
//! A transport is one client's connection to a display server that arbitrates
//! selection ownership and stores window properties. The engine never touches
//! the server directly: it claims selections, writes and reads properties,
//! and consumes the resulting [`TransportEvent`] stream.

use btk_selection_core::{Atom, SelectionResult};

/// Server timestamp in milliseconds; wraps at 32 bits.
pub type Timestamp = u32;

/// Timestamp meaning "the server's current time".
pub const CURRENT_TIME: Timestamp = 0;

/// A server-side window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

/// How `change_property` combines new data with an existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropMode {
    /// Discard the old value
    Replace,
    /// Append to the old value (type and format must match)
    Append,
}

/// Whether a property changed or went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyState {
    /// The property was written
    NewValue,
    /// The property was deleted
    Deleted,
}

/// A property value as stored on a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Type atom of the value
    pub data_type: Atom,
    /// Item width in bits
    pub format: i32,
    /// Raw bytes
    pub data: Vec<u8>,
}

/// Events delivered to a transport client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A requestor asks the owner of `selection` to convert it.
    SelectionRequest {
        /// Owner window the request is addressed to
        owner: WindowId,
        /// Window to write the result on
        requestor: WindowId,
        /// Selection to convert
        selection: Atom,
        /// Requested target
        target: Atom,
        /// Destination property on `requestor`
        property: Atom,
        /// Request time
        time: Timestamp,
    },
    /// The owner finished (or refused) a conversion.
    SelectionNotify {
        /// Window that asked
        requestor: WindowId,
        /// Selection that was converted
        selection: Atom,
        /// Target that was requested
        target: Atom,
        /// Property holding the result, or NONE when refused
        property: Atom,
        /// Request time
        time: Timestamp,
    },
    /// The window lost ownership of `selection`.
    SelectionClear {
        /// Former owner
        window: WindowId,
        /// Selection that was lost
        selection: Atom,
        /// Time of the ownership change
        time: Timestamp,
    },
    /// A property changed on a window this client watches.
    PropertyNotify {
        /// Window holding the property
        window: WindowId,
        /// Property name
        atom: Atom,
        /// New value or deletion
        state: PropertyState,
        /// Time of the change
        time: Timestamp,
    },
    /// The owner of a watched selection changed.
    OwnerChange {
        /// Window that asked for notifications
        window: WindowId,
        /// Selection whose owner changed
        selection: Atom,
        /// New owner, `None` when the selection became unowned
        owner: Option<WindowId>,
        /// Time of the change
        time: Timestamp,
    },
}

/// One client connection to a selection-arbitrating display server.
pub trait SelectionTransport {
    /// Create a window owned by this client.
    fn create_window(&self) -> WindowId;

    /// Destroy a window; selections it owns become unowned.
    fn destroy_window(&self, window: WindowId);

    /// Current server time.
    fn server_time(&self) -> Timestamp;

    /// Largest property write the server accepts in one request, in bytes.
    fn max_request_size(&self) -> usize;

    /// Claim (or with `None`, release) `selection`.
    ///
    /// Returns true if the server recorded the change; claims with a
    /// timestamp older than the last change or newer than the server clock
    /// are ignored.
    fn set_selection_owner(&self, owner: Option<WindowId>, selection: Atom, time: Timestamp) -> bool;

    /// Current owner of `selection`.
    fn selection_owner(&self, selection: Atom) -> Option<WindowId>;

    /// Ask the owner of `selection` to write `target` to `property` on `requestor`.
    fn convert_selection(&self, requestor: WindowId, selection: Atom, target: Atom, property: Atom, time: Timestamp);

    /// Write a property.
    fn change_property(
        &self,
        window: WindowId,
        property: Atom,
        data_type: Atom,
        format: i32,
        mode: PropMode,
        data: &[u8],
    ) -> SelectionResult<()>;

    /// Read a property, optionally deleting it.
    fn get_property(&self, window: WindowId, property: Atom, delete: bool) -> Option<Property>;

    /// Delete a property.
    fn delete_property(&self, window: WindowId, property: Atom);

    /// Answer a SelectionRequest.
    fn send_selection_notify(&self, requestor: WindowId, selection: Atom, target: Atom, property: Atom, time: Timestamp);

    /// Receive PropertyNotify events for a window created by another client.
    fn select_property_events(&self, window: WindowId);

    /// Receive OwnerChange events for `selection`, addressed to `window`.
    fn select_owner_change(&self, window: WindowId, selection: Atom);

    /// Whether OwnerChange events are available.
    fn supports_selection_notification(&self) -> bool;

    /// Whether a clipboard manager is running.
    fn supports_clipboard_persistence(&self) -> bool;

    /// Ask the clipboard manager to save `targets` (all targets when empty)
    /// of the CLIPBOARD owned by `window`.
    fn store_clipboard(&self, window: WindowId, time: Timestamp, targets: &[Atom]);

    /// Pop the next queued event.
    fn next_event(&self) -> Option<TransportEvent>;

    /// True if an event is queued.
    fn has_pending(&self) -> bool;
}
