//! Clipboard manager client.
//!
//! Owns CLIPBOARD_MANAGER. A SAVE_TARGETS conversion makes it copy the
//! current CLIPBOARD contents (one MULTIPLE request, INCR aware) so they
//! survive the owner; when the owner's window goes away the manager claims
//! CLIPBOARD and serves the saved targets itself.

use std::collections::HashMap;

use btk_selection_core::{atoms, atoms_from_bytes, atoms_to_bytes, Atom, ChunkAssembler};
use tracing::{debug, info, warn};

use super::server::ClientId;
use super::X11Connection;
use crate::transport::{PropMode, Property, PropertyState, SelectionTransport, Timestamp, TransportEvent, WindowId, CURRENT_TIME};

struct Incoming {
    target: Atom,
    data_type: Atom,
    format: i32,
    assembler: ChunkAssembler,
}

enum SavePhase {
    QueryingTargets,
    Converting {
        pairs: Vec<(Atom, Atom)>,
    },
    Receiving {
        values: Vec<(Atom, Property)>,
        incoming: HashMap<Atom, Incoming>,
    },
}

struct SaveRequest {
    requestor: WindowId,
    property: Atom,
    time: Timestamp,
    phase: SavePhase,
}

pub(crate) struct ClipboardManager {
    client: ClientId,
    window: WindowId,
    stored: Vec<(Atom, Property)>,
    save: Option<SaveRequest>,
    multiple_property: Atom,
    targets_property: Atom,
}

impl ClipboardManager {
    pub(crate) fn start(conn: &X11Connection) -> Self {
        let window = conn.create_window();
        if !conn.set_selection_owner(Some(window), atoms::CLIPBOARD_MANAGER, CURRENT_TIME) {
            warn!("clipboard manager could not claim CLIPBOARD_MANAGER");
        }
        conn.select_owner_change(window, atoms::CLIPBOARD);
        info!(window = window.0, "clipboard manager running");

        Self {
            client: conn.client_id(),
            window,
            stored: Vec::new(),
            save: None,
            multiple_property: Atom::intern("BTK_MANAGER_MULTIPLE"),
            targets_property: Atom::intern("BTK_MANAGER_TARGETS"),
        }
    }

    pub(crate) fn client(&self) -> ClientId {
        self.client
    }

    pub(crate) fn stored_targets(&self) -> Vec<Atom> {
        self.stored.iter().map(|(target, _)| *target).collect()
    }

    pub(crate) fn stored_value(&self, target: Atom) -> Option<Property> {
        self.stored
            .iter()
            .find(|(t, _)| *t == target)
            .map(|(_, value)| value.clone())
    }

    pub(crate) fn pump(&mut self, conn: &X11Connection) {
        while let Some(event) = conn.next_event() {
            self.handle(conn, event);
        }
    }

    fn handle(&mut self, conn: &X11Connection, event: TransportEvent) {
        match event {
            TransportEvent::SelectionRequest {
                requestor,
                selection,
                target,
                property,
                time,
                ..
            } => {
                if selection == atoms::CLIPBOARD_MANAGER && target == atoms::SAVE_TARGETS {
                    self.begin_save(conn, requestor, property, time);
                } else if selection == atoms::CLIPBOARD {
                    self.serve(conn, requestor, target, property, time);
                } else {
                    conn.send_selection_notify(requestor, selection, target, atoms::NONE, time);
                }
            }
            TransportEvent::SelectionNotify {
                selection,
                target,
                property,
                ..
            } if selection == atoms::CLIPBOARD => {
                if target == atoms::TARGETS {
                    self.targets_received(conn, property);
                } else if target == atoms::MULTIPLE {
                    self.multiple_received(conn, property);
                }
            }
            TransportEvent::PropertyNotify {
                window,
                atom,
                state: PropertyState::NewValue,
                ..
            } if window == self.window => self.chunk_received(conn, atom),
            TransportEvent::SelectionClear { selection, .. } if selection == atoms::CLIPBOARD => {
                debug!("clipboard manager lost CLIPBOARD, dropping saved contents");
                self.stored.clear();
            }
            TransportEvent::OwnerChange {
                selection, owner, ..
            } if selection == atoms::CLIPBOARD => self.owner_changed(conn, owner),
            _ => {}
        }
    }

    fn begin_save(&mut self, conn: &X11Connection, requestor: WindowId, property: Atom, time: Timestamp) {
        if self.save.is_some() || conn.selection_owner(atoms::CLIPBOARD).is_none() {
            conn.send_selection_notify(requestor, atoms::CLIPBOARD_MANAGER, atoms::SAVE_TARGETS, atoms::NONE, time);
            return;
        }

        let requested = if property.is_none() {
            Vec::new()
        } else {
            conn.get_property(requestor, property, false)
                .filter(|p| p.data_type == atoms::ATOM && p.format == 32)
                .map(|p| atoms_from_bytes(&p.data))
                .unwrap_or_default()
        };

        self.save = Some(SaveRequest {
            requestor,
            property,
            time,
            phase: SavePhase::QueryingTargets,
        });

        if requested.is_empty() {
            conn.convert_selection(self.window, atoms::CLIPBOARD, atoms::TARGETS, self.targets_property, time);
        } else {
            self.convert_targets(conn, requested);
        }
    }

    fn targets_received(&mut self, conn: &X11Connection, property: Atom) {
        if !matches!(self.save.as_ref().map(|s| &s.phase), Some(SavePhase::QueryingTargets)) {
            return;
        }
        let targets = if property.is_none() {
            None
        } else {
            conn.get_property(self.window, property, true)
                .filter(|p| p.data_type == atoms::ATOM)
                .map(|p| atoms_from_bytes(&p.data))
        };
        match targets {
            Some(targets) => {
                let storable: Vec<Atom> = targets
                    .into_iter()
                    .filter(|t| ![atoms::TARGETS, atoms::MULTIPLE, atoms::TIMESTAMP, atoms::SAVE_TARGETS].contains(t))
                    .collect();
                if storable.is_empty() {
                    self.finish(conn, Vec::new(), false);
                } else {
                    self.convert_targets(conn, storable);
                }
            }
            None => self.finish(conn, Vec::new(), false),
        }
    }

    fn convert_targets(&mut self, conn: &X11Connection, targets: Vec<Atom>) {
        let pairs: Vec<(Atom, Atom)> = targets
            .into_iter()
            .enumerate()
            .map(|(n, target)| (target, Atom::intern(&format!("BTK_MANAGER_{n}"))))
            .collect();
        let list: Vec<Atom> = pairs.iter().flat_map(|&(t, p)| [t, p]).collect();

        let Some(save) = self.save.as_mut() else {
            return;
        };
        let time = save.time;
        save.phase = SavePhase::Converting { pairs };

        let written = conn.change_property(
            self.window,
            self.multiple_property,
            atoms::ATOM_PAIR,
            32,
            PropMode::Replace,
            &atoms_to_bytes(&list),
        );
        if let Err(e) = written {
            warn!(error = %e, "clipboard manager could not write MULTIPLE list");
            self.finish(conn, Vec::new(), false);
            return;
        }
        conn.convert_selection(self.window, atoms::CLIPBOARD, atoms::MULTIPLE, self.multiple_property, time);
    }

    fn multiple_received(&mut self, conn: &X11Connection, property: Atom) {
        let pairs = match self.save.as_ref().map(|s| &s.phase) {
            Some(SavePhase::Converting { pairs }) => pairs.clone(),
            _ => return,
        };
        if property.is_none() {
            self.finish(conn, Vec::new(), false);
            return;
        }

        // The owner rewrites the pair list with NONE for rejected targets.
        let answered = conn
            .get_property(self.window, property, true)
            .map(|p| atoms_from_bytes(&p.data))
            .unwrap_or_default();
        let accepted: Vec<(Atom, Atom)> = answered
            .chunks_exact(2)
            .zip(&pairs)
            .filter(|(answer, _)| !answer[1].is_none())
            .map(|(_, &pair)| pair)
            .collect();

        let mut values = Vec::new();
        let mut incoming = HashMap::new();
        for (target, prop) in accepted {
            let Some(value) = conn.get_property(self.window, prop, true) else {
                continue;
            };
            if value.data_type == atoms::INCR {
                incoming.insert(
                    prop,
                    Incoming {
                        target,
                        data_type: atoms::NONE,
                        format: 8,
                        assembler: ChunkAssembler::new(),
                    },
                );
            } else {
                values.push((target, value));
            }
        }

        if incoming.is_empty() {
            self.finish(conn, values, true);
        } else if let Some(save) = self.save.as_mut() {
            save.phase = SavePhase::Receiving { values, incoming };
        }
    }

    fn chunk_received(&mut self, conn: &X11Connection, property: Atom) {
        let Some(SaveRequest {
            phase: SavePhase::Receiving { values, incoming },
            ..
        }) = self.save.as_mut()
        else {
            return;
        };
        if !incoming.contains_key(&property) {
            return;
        }
        let Some(chunk) = conn.get_property(self.window, property, true) else {
            return;
        };
        let Some(entry) = incoming.get_mut(&property) else {
            return;
        };

        if chunk.data.is_empty() {
            if let Some(done) = incoming.remove(&property) {
                values.push((
                    done.target,
                    Property {
                        data_type: done.data_type,
                        format: done.format,
                        data: done.assembler.finish(),
                    },
                ));
            }
        } else {
            entry.data_type = chunk.data_type;
            entry.format = chunk.format;
            entry.assembler.append(&chunk.data);
            return;
        }

        if incoming.is_empty() {
            let values = std::mem::take(values);
            self.finish(conn, values, true);
        }
    }

    fn finish(&mut self, conn: &X11Connection, values: Vec<(Atom, Property)>, success: bool) {
        let Some(save) = self.save.take() else {
            return;
        };
        let property = if success {
            info!(targets = values.len(), "clipboard contents saved");
            self.stored = values;
            save.property
        } else {
            warn!("clipboard save failed");
            atoms::NONE
        };
        conn.send_selection_notify(save.requestor, atoms::CLIPBOARD_MANAGER, atoms::SAVE_TARGETS, property, save.time);
    }

    fn owner_changed(&mut self, conn: &X11Connection, owner: Option<WindowId>) {
        match owner {
            Some(window) if window == self.window => {}
            Some(_) => {
                if self.save.is_none() && !self.stored.is_empty() {
                    debug!("new clipboard owner, dropping saved contents");
                    self.stored.clear();
                }
            }
            None => {
                if !self.stored.is_empty() && conn.set_selection_owner(Some(self.window), atoms::CLIPBOARD, CURRENT_TIME) {
                    info!(targets = self.stored.len(), "clipboard manager took over CLIPBOARD");
                }
            }
        }
    }

    fn serve(&self, conn: &X11Connection, requestor: WindowId, target: Atom, property: Atom, time: Timestamp) {
        let written = if target == atoms::TARGETS {
            let mut targets = vec![atoms::TARGETS];
            targets.extend(self.stored_targets());
            conn.change_property(requestor, property, atoms::ATOM, 32, PropMode::Replace, &atoms_to_bytes(&targets))
                .is_ok()
        } else {
            match self.stored_value(target) {
                Some(value) => conn
                    .change_property(requestor, property, value.data_type, value.format, PropMode::Replace, &value.data)
                    .is_ok(),
                None => false,
            }
        };
        let property = if written { property } else { atoms::NONE };
        conn.send_selection_notify(requestor, atoms::CLIPBOARD, target, property, time);
    }
}
