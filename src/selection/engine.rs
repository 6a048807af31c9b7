//! Conversion and retrieval engine.
//!
//! Owner side: a SelectionRequest is answered by running the owner widget's
//! `selection-get` handlers (or the built-in TIMESTAMP / TARGETS /
//! SAVE_TARGETS handlers) once per requested target. Payloads larger than
//! one property write go out incrementally: an INCR placeholder holding the
//! item count first, then one chunk each time the requestor deletes the
//! property, then an empty chunk.
//!
//! Requestor side: `selection_convert` starts at most one retrieval per
//! widget. A local owner is asked directly; otherwise the request goes
//! through the transport and the result arrives as a SelectionNotify,
//! possibly followed by INCR chunks as PropertyNotify events.
//!
//! Both sides run a periodic sweep. Each state counts sweep ticks without
//! transport activity and is abandoned once the count reaches
//! `idle_abort_ticks`; an abandoned retrieval still reports, with rejected
//! data.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::rc::Weak;

use btk_selection_backends::{PropMode, Timestamp, WindowId, CURRENT_TIME};
use btk_selection_core::{
    atoms, atoms_from_bytes, atoms_to_bytes, bytes_per_item, Atom, ChunkAssembler, DisplayId, IncrCursor, SelectionData,
    TargetEntry, TargetFlags, TargetList,
};
use tracing::{debug, info, trace, warn};

use crate::context::{ContextInner, Display, SelectionContext};
use crate::mainloop::SourceId;
use crate::widget::{SelectionEvent, Widget, WidgetId};

/// Data collected from INCR chunks.
struct Incoming {
    assembler: ChunkAssembler,
    data_type: Atom,
    format: i32,
}

/// A retrieval waiting for its owner.
struct Retrieval {
    serial: u64,
    widget: Widget,
    selection: Atom,
    target: Atom,
    time: Timestamp,
    idle_ticks: u32,
    /// `None` until the owner announced an INCR transfer
    incoming: Option<Incoming>,
    timer: Option<SourceId>,
}

/// One sub-conversion being sent incrementally.
struct OutgoingIncr {
    property: Atom,
    data: SelectionData,
    cursor: IncrCursor,
}

/// All INCR sub-conversions of one request.
struct IncrSend {
    serial: u64,
    display: DisplayId,
    requestor: WindowId,
    selection: Atom,
    conversions: Vec<OutgoingIncr>,
    pending: usize,
    idle_ticks: u32,
}

/// A property write prepared under the engine borrow.
struct ChunkWrite {
    property: Atom,
    data_type: Atom,
    format: i32,
    bytes: Vec<u8>,
}

/// Per-context engine state.
#[derive(Default)]
pub(crate) struct EngineState {
    target_lists: HashMap<(WidgetId, Atom), TargetList>,
    retrievals: HashMap<WidgetId, Retrieval>,
    incr_sends: Vec<IncrSend>,
    next_serial: u64,
}

impl EngineState {
    fn next_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }
}

/// Largest chunk no bigger than `max` that does not split an item of
/// `format` width.
fn item_aligned(max: usize, format: i32) -> usize {
    let item = bytes_per_item(format);
    (max / item).max(1) * item
}

/// What a requested conversion turned into.
struct Conversion {
    target: Atom,
    property: Atom,
}

impl SelectionContext {
    // =========================================================================
    // Targets
    // =========================================================================

    /// The target list `widget` offers for `selection`, created on first use.
    ///
    /// The list is shared: changes made through the returned handle are seen
    /// by the engine.
    pub fn selection_target_list(&self, widget: &Widget, selection: Atom) -> TargetList {
        self.inner()
            .engine
            .borrow_mut()
            .target_lists
            .entry((widget.id(), selection))
            .or_insert_with(|| TargetList::new(&[]))
            .clone()
    }

    fn existing_target_list(&self, widget: WidgetId, selection: Atom) -> Option<TargetList> {
        self.inner()
            .engine
            .borrow()
            .target_lists
            .get(&(widget, selection))
            .cloned()
    }

    /// Offer `target` for `selection`; `info` is handed to `selection-get`.
    pub fn selection_add_target(&self, widget: &Widget, selection: Atom, target: Atom, info: u32) {
        self.selection_target_list(widget, selection)
            .add(target, TargetFlags::NONE, info);
    }

    /// Offer every entry of `targets` for `selection`.
    pub fn selection_add_targets(&self, widget: &Widget, selection: Atom, targets: &[TargetEntry]) {
        self.selection_target_list(widget, selection).add_table(targets);
    }

    /// Stop offering anything for `selection`.
    pub fn selection_clear_targets(&self, widget: &Widget, selection: Atom) {
        self.inner()
            .engine
            .borrow_mut()
            .target_lists
            .remove(&(widget.id(), selection));
    }

    /// Forget everything about `widget`: its retrieval, its selections and
    /// its target lists.
    pub fn selection_remove_all(&self, widget: &Widget) {
        let timer = {
            let mut engine = self.inner().engine.borrow_mut();
            engine.target_lists.retain(|(id, _), _| *id != widget.id());
            engine.retrievals.remove(&widget.id()).and_then(|r| r.timer)
        };
        if let Some(timer) = timer {
            self.main_loop().remove_source(timer);
        }

        let released = self.inner().ownership.borrow_mut().release_owner(widget);
        if let Some(transport) = widget.display().transport() {
            for record in released {
                if transport.selection_owner(record.selection) == widget.window() {
                    transport.set_selection_owner(None, record.selection, CURRENT_TIME);
                }
                debug!(widget = widget.id(), selection = %record.selection, "selection disclaimed");
            }
        }
    }

    // =========================================================================
    // Ownership
    // =========================================================================

    /// Local widget owning `selection` on `display`.
    pub fn selection_owner(&self, display: &Display, selection: Atom) -> Option<Widget> {
        self.inner().ownership.borrow().owner(display.id(), selection)
    }

    /// Make `widget` the owner of `selection`, or release it with `None`.
    ///
    /// Fails if the widget is not realized on `display` or the transport
    /// refuses the claim. A different local widget that held the selection
    /// receives a selection-clear event.
    pub fn selection_owner_set(
        &self,
        display: &Display,
        widget: Option<&Widget>,
        selection: Atom,
        time: Timestamp,
    ) -> bool {
        let Some(transport) = display.transport() else {
            let display_id = display.id().0;
            debug!(display = display_id, "display has no selection transport");
            return false;
        };
        let window = match widget {
            Some(widget) => {
                if widget.display() != display || !widget.is_realized() {
                    return false;
                }
                match widget.window() {
                    Some(window) => Some(window),
                    None => return false,
                }
            }
            None => None,
        };

        let old_owner = self.inner().ownership.borrow().owner(display.id(), selection);
        if !transport.set_selection_owner(window, selection, time) {
            debug!(selection = %selection, time, "ownership claim refused");
            return false;
        }

        let time = if time == CURRENT_TIME { transport.server_time() } else { time };
        {
            let mut table = self.inner().ownership.borrow_mut();
            match widget {
                Some(widget) => {
                    table.claim(display.id(), selection, widget.clone(), time);
                }
                None => {
                    table.release(display.id(), selection);
                }
            }
        }
        info!(
            selection = %selection,
            owner = ?widget.map(Widget::id),
            time,
            "selection owner set"
        );

        if let Some(old_owner) = old_owner {
            if Some(&old_owner) != widget {
                let event = SelectionEvent {
                    selection,
                    target: atoms::NONE,
                    property: atoms::NONE,
                    time,
                };
                self.handle_selection_clear(&old_owner, &event);
            }
        }
        true
    }

    /// `widget` lost `event.selection`: drop the record if it still names
    /// the widget and run its clear handlers.
    pub(crate) fn handle_selection_clear(&self, widget: &Widget, event: &SelectionEvent) -> bool {
        let removed = self
            .inner()
            .ownership
            .borrow_mut()
            .release_if_owner(widget.display().id(), event.selection, widget);
        debug!(widget = widget.id(), selection = %event.selection, removed, "selection cleared");
        widget.emit_selection_clear_event(event)
    }

    // =========================================================================
    // Owner side
    // =========================================================================

    /// Fill `data` for a request on `widget`.
    fn invoke_handler(&self, widget: &Widget, data: &mut SelectionData, time: Timestamp) {
        let info = if data.target() == atoms::SAVE_TARGETS {
            None
        } else {
            self.existing_target_list(widget.id(), data.selection())
                .and_then(|list| list.find(data.target()))
        };
        match info {
            Some(info) => widget.emit_selection_get(data, info, time),
            None => self.default_handler(widget, data),
        }
    }

    fn default_handler(&self, widget: &Widget, data: &mut SelectionData) {
        let target = data.target();
        if target == atoms::TIMESTAMP {
            let owned_since =
                self.inner()
                    .ownership
                    .borrow()
                    .time_owned_by(widget.display().id(), data.selection(), widget);
            if let Some(time) = owned_since {
                data.set(atoms::INTEGER, 32, &time.to_le_bytes());
            }
        } else if target == atoms::TARGETS {
            let mut targets = vec![atoms::TIMESTAMP, atoms::TARGETS, atoms::MULTIPLE];
            if let Some(list) = self.existing_target_list(widget.id(), data.selection()) {
                targets.extend(list.targets());
            }
            data.set(atoms::ATOM, 32, &atoms_to_bytes(&targets));
        } else if target == atoms::SAVE_TARGETS {
            data.set(atoms::NULL, 32, &[]);
        } else {
            data.reject();
        }
    }

    fn chunk_size(&self, display: &Display) -> usize {
        let max_request_size = display
            .transport()
            .map_or(self.policy().max_chunk_size, |t| t.max_request_size());
        self.policy().chunk_size_for(max_request_size)
    }

    /// Answer a SelectionRequest addressed to `widget`.
    pub(crate) fn handle_selection_request(
        &self,
        widget: &Widget,
        requestor: WindowId,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) {
        let display = widget.display().clone();
        let Some(transport) = display.transport() else {
            return;
        };

        let owns = self.inner().ownership.borrow().owner(display.id(), selection).as_ref() == Some(widget);
        if !owns {
            debug!(widget = widget.id(), selection = %selection, "request for selection we don't own refused");
            transport.send_selection_notify(requestor, selection, target, atoms::NONE, time);
            return;
        }

        let multiple = target == atoms::MULTIPLE;
        let mut conversions = if multiple {
            let pairs = transport
                .get_property(requestor, property, false)
                .filter(|p| p.format == 32 && !p.data.is_empty());
            let Some(pairs) = pairs else {
                warn!(requestor = requestor.0, "unreadable MULTIPLE request refused");
                transport.send_selection_notify(requestor, selection, target, atoms::NONE, time);
                return;
            };
            atoms_from_bytes(&pairs.data)
                .chunks_exact(2)
                .map(|pair| Conversion {
                    target: pair[0],
                    property: pair[1],
                })
                .collect()
        } else {
            vec![Conversion { target, property }]
        };

        let max_chunk = self.chunk_size(&display);
        let mut outgoing = Vec::new();

        for conversion in conversions.iter_mut() {
            let mut data = SelectionData::for_display(display.id(), selection, conversion.target);
            self.invoke_handler(widget, &mut data, time);
            if data.is_rejected() {
                debug!(target = %conversion.target, "conversion rejected");
                conversion.property = atoms::NONE;
                continue;
            }

            let items = data.item_count();
            let written = if data.data().len() > max_chunk {
                debug!(
                    target = %conversion.target,
                    len = data.data().len(),
                    max_chunk,
                    "sending incrementally"
                );
                let placeholder = (items as u32).to_le_bytes();
                transport
                    .change_property(
                        requestor,
                        conversion.property,
                        atoms::INCR,
                        32,
                        PropMode::Replace,
                        &placeholder,
                    )
                    .map(|()| {
                        outgoing.push(OutgoingIncr {
                            property: conversion.property,
                            cursor: IncrCursor::new(data.data().len()),
                            data,
                        });
                    })
            } else {
                transport.change_property(
                    requestor,
                    conversion.property,
                    data.data_type(),
                    data.format(),
                    PropMode::Replace,
                    data.data(),
                )
            };
            if let Err(e) = written {
                warn!(error = %e, target = %conversion.target, "failed to write conversion result");
                conversion.property = atoms::NONE;
            }
        }

        if !outgoing.is_empty() {
            transport.select_property_events(requestor);
            let serial = {
                let mut engine = self.inner().engine.borrow_mut();
                let serial = engine.next_serial();
                engine.incr_sends.push(IncrSend {
                    serial,
                    display: display.id(),
                    requestor,
                    selection,
                    pending: outgoing.len(),
                    conversions: outgoing,
                    idle_ticks: 0,
                });
                serial
            };
            let weak = self.downgrade_inner();
            let abort_after = self.policy().idle_abort_ticks;
            self.main_loop()
                .add_timeout(self.policy().tick_interval_ms, move || incr_sweep(&weak, serial, abort_after));
        }

        if multiple {
            let pairs: Vec<Atom> = conversions.iter().flat_map(|c| [c.target, c.property]).collect();
            if let Err(e) = transport.change_property(
                requestor,
                property,
                atoms::ATOM_PAIR,
                32,
                PropMode::Replace,
                &atoms_to_bytes(&pairs),
            ) {
                warn!(error = %e, "failed to write MULTIPLE results");
            }
        }

        let refused = conversions.len() == 1 && conversions[0].property.is_none();
        let reply = if refused { atoms::NONE } else { property };
        transport.send_selection_notify(requestor, selection, target, reply, time);
    }

    /// The requestor deleted `property` on `window`: send the next chunk of
    /// any INCR transfer writing there.
    pub(crate) fn handle_incr_event(&self, display: &Display, window: WindowId, property: Atom) -> bool {
        let Some(transport) = display.transport() else {
            return false;
        };
        let max_chunk = self.chunk_size(display);

        let writes = {
            let mut engine = self.inner().engine.borrow_mut();
            let mut writes = Vec::new();
            let mut matched = false;

            // One requestor window may receive several INCR sends at once,
            // each writing to its own properties.
            for send in engine
                .incr_sends
                .iter_mut()
                .filter(|s| s.display == display.id() && s.requestor == window)
            {
                matched = true;
                for conversion in send
                    .conversions
                    .iter_mut()
                    .filter(|c| c.property == property && !c.cursor.is_done())
                {
                    send.idle_ticks = 0;
                    let limit = item_aligned(max_chunk, conversion.data.format());
                    let Some(range) = conversion.cursor.next_chunk(limit) else {
                        continue;
                    };
                    trace!(property = %property, start = range.start, len = range.len(), "INCR chunk");
                    writes.push(ChunkWrite {
                        property,
                        data_type: conversion.data.data_type(),
                        format: conversion.data.format(),
                        bytes: conversion.data.data()[range].to_vec(),
                    });
                    if conversion.cursor.is_done() {
                        send.pending -= 1;
                    }
                }
                if send.pending == 0 {
                    debug!(requestor = window.0, selection = %send.selection, "INCR transfer complete");
                }
            }
            if !matched {
                return false;
            }
            engine.incr_sends.retain(|s| s.pending > 0);
            writes
        };

        for write in writes {
            if let Err(e) = transport.change_property(
                window,
                write.property,
                write.data_type,
                write.format,
                PropMode::Replace,
                &write.bytes,
            ) {
                warn!(error = %e, property = %write.property, "failed to write INCR chunk");
            }
        }
        true
    }

    // =========================================================================
    // Requestor side
    // =========================================================================

    /// Ask the owner of `selection` for `target`; the result arrives through
    /// `widget`'s `selection-received` handlers.
    ///
    /// Returns false if the widget is unrealized, has no window or already
    /// has a retrieval in flight.
    pub fn selection_convert(&self, widget: &Widget, selection: Atom, target: Atom, time: Timestamp) -> bool {
        if !widget.is_realized() {
            return false;
        }
        let display = widget.display().clone();
        let (Some(transport), Some(window)) = (display.transport(), widget.window()) else {
            return false;
        };

        let serial = {
            let mut engine = self.inner().engine.borrow_mut();
            if engine.retrievals.contains_key(&widget.id()) {
                debug!(widget = widget.id(), target = %target, "retrieval already in flight");
                return false;
            }
            let serial = engine.next_serial();
            engine.retrievals.insert(
                widget.id(),
                Retrieval {
                    serial,
                    widget: widget.clone(),
                    selection,
                    target,
                    time,
                    idle_ticks: 0,
                    incoming: None,
                    timer: None,
                },
            );
            serial
        };

        let local_owner = transport
            .selection_owner(selection)
            .and_then(|owner| self.widget_for_window(&display, owner));
        if let Some(owner) = local_owner {
            trace!(widget = widget.id(), owner = owner.id(), target = %target, "local conversion");
            let mut data = SelectionData::for_display(display.id(), selection, target);
            self.invoke_handler(&owner, &mut data, time);
            let bytes = (!data.is_rejected()).then(|| data.data());
            self.retrieval_report(widget.id(), data.data_type(), data.format(), bytes, time);
            return true;
        }

        debug!(widget = widget.id(), selection = %selection, target = %target, "converting selection");
        transport.convert_selection(window, selection, target, atoms::BTK_SELECTION, time);

        let weak = self.downgrade_inner();
        let widget_id = widget.id();
        let abort_after = self.policy().idle_abort_ticks;
        let timer = self.main_loop().add_timeout(self.policy().tick_interval_ms, move || {
            retrieval_sweep(&weak, widget_id, serial, abort_after)
        });
        if let Some(retrieval) = self.inner().engine.borrow_mut().retrievals.get_mut(&widget_id) {
            retrieval.timer = Some(timer);
        }
        true
    }

    /// True if `widget` has a retrieval in flight.
    pub fn selection_retrieval_pending(&self, widget: &Widget) -> bool {
        self.inner().engine.borrow().retrievals.contains_key(&widget.id())
    }

    /// Number of incremental sends still in flight.
    pub fn selection_incr_sends_pending(&self) -> usize {
        self.inner().engine.borrow().incr_sends.len()
    }

    /// Finish the retrieval of `widget` and hand the result to its handlers.
    fn retrieval_report(
        &self,
        widget: WidgetId,
        data_type: Atom,
        format: i32,
        bytes: Option<&[u8]>,
        time: Timestamp,
    ) {
        let Some(retrieval) = self.inner().engine.borrow_mut().retrievals.remove(&widget) else {
            return;
        };
        if let Some(timer) = retrieval.timer {
            self.main_loop().remove_source(timer);
        }

        let mut data = SelectionData::for_display(
            retrieval.widget.display().id(),
            retrieval.selection,
            retrieval.target,
        );
        match bytes {
            Some(bytes) => data.set(data_type, format, bytes),
            None => debug!(widget, target = %retrieval.target, "retrieval failed"),
        }
        retrieval.widget.emit_selection_received(&data, time);
    }

    /// The owner answered a conversion started by `widget`.
    pub(crate) fn handle_selection_notify(&self, widget: &Widget, event: &SelectionEvent) -> bool {
        let waiting = self
            .inner()
            .engine
            .borrow()
            .retrievals
            .get(&widget.id())
            .is_some_and(|r| r.selection == event.selection && r.incoming.is_none());
        if !waiting {
            return false;
        }
        let (Some(transport), Some(window)) = (widget.display().transport(), widget.window()) else {
            return false;
        };

        let value = if event.property.is_none() {
            None
        } else {
            transport.get_property(window, event.property, false)
        };
        let Some(value) = value else {
            self.retrieval_report(widget.id(), atoms::NONE, 0, None, event.time);
            return true;
        };

        if value.data_type == atoms::INCR {
            debug!(widget = widget.id(), "incremental transfer announced");
            if let Some(retrieval) = self.inner().engine.borrow_mut().retrievals.get_mut(&widget.id()) {
                retrieval.idle_ticks = 0;
                retrieval.time = event.time;
                retrieval.incoming = Some(Incoming {
                    assembler: ChunkAssembler::new(),
                    data_type: atoms::NONE,
                    format: 8,
                });
            }
            transport.delete_property(window, event.property);
        } else {
            transport.delete_property(window, event.property);
            self.retrieval_report(
                widget.id(),
                value.data_type,
                value.format,
                Some(&value.data),
                event.time,
            );
        }
        true
    }

    /// A chunk of an incremental transfer arrived on `widget`'s window.
    pub(crate) fn handle_property_notify(&self, widget: &Widget, property: Atom, _time: Timestamp) -> bool {
        if property != atoms::BTK_SELECTION {
            return false;
        }
        let started = self
            .inner()
            .engine
            .borrow()
            .retrievals
            .get(&widget.id())
            .is_some_and(|r| r.incoming.is_some());
        if !started {
            return false;
        }
        let (Some(transport), Some(window)) = (widget.display().transport(), widget.window()) else {
            return false;
        };

        let chunk = transport.get_property(window, property, false);
        transport.delete_property(window, property);

        let finished = {
            let mut engine = self.inner().engine.borrow_mut();
            let Some(retrieval) = engine.retrievals.get_mut(&widget.id()) else {
                return false;
            };
            retrieval.idle_ticks = 0;
            let Some(incoming) = retrieval.incoming.as_mut() else {
                return false;
            };
            match chunk {
                Some(chunk) if !chunk.data.is_empty() && !chunk.data_type.is_none() => {
                    trace!(widget = widget.id(), len = chunk.data.len(), total = incoming.assembler.len(), "INCR chunk received");
                    incoming.assembler.append(&chunk.data);
                    incoming.data_type = chunk.data_type;
                    incoming.format = chunk.format;
                    None
                }
                Some(chunk) if !chunk.data_type.is_none() => {
                    let assembler = std::mem::take(&mut incoming.assembler);
                    Some((chunk.data_type, chunk.format, Some(assembler.finish()), retrieval.time))
                }
                _ => Some((atoms::NONE, 0, None, retrieval.time)),
            }
        };

        if let Some((data_type, format, bytes, time)) = finished {
            self.retrieval_report(widget.id(), data_type, format, bytes.as_deref(), time);
        }
        true
    }
}

/// Periodic check of an incremental send.
fn incr_sweep(context: &Weak<ContextInner>, serial: u64, abort_after: u32) -> ControlFlow<()> {
    let Some(context) = SelectionContext::from_weak(context) else {
        return ControlFlow::Break(());
    };
    let mut engine = context.inner().engine.borrow_mut();
    let Some(index) = engine.incr_sends.iter().position(|s| s.serial == serial) else {
        // finished
        return ControlFlow::Break(());
    };

    let send = &mut engine.incr_sends[index];
    send.idle_ticks += 1;
    if send.idle_ticks >= abort_after {
        warn!(
            requestor = send.requestor.0,
            selection = %send.selection,
            ticks = send.idle_ticks,
            "INCR transfer abandoned"
        );
        engine.incr_sends.remove(index);
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}

/// Periodic check of a retrieval.
fn retrieval_sweep(context: &Weak<ContextInner>, widget: WidgetId, serial: u64, abort_after: u32) -> ControlFlow<()> {
    let Some(context) = SelectionContext::from_weak(context) else {
        return ControlFlow::Break(());
    };
    let expired = {
        let mut engine = context.inner().engine.borrow_mut();
        match engine.retrievals.get_mut(&widget) {
            Some(retrieval) if retrieval.serial == serial => {
                retrieval.idle_ticks += 1;
                (retrieval.idle_ticks >= abort_after).then_some(retrieval.time)
            }
            _ => return ControlFlow::Break(()),
        }
    };

    match expired {
        Some(time) => {
            warn!(widget, ticks = abort_after, "retrieval timed out");
            context.retrieval_report(widget, atoms::NONE, 0, None, time);
            ControlFlow::Break(())
        }
        None => ControlFlow::Continue(()),
    }
}
