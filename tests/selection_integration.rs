//! Two applications on one X11 desktop, talking ICCCM through the selection
//! engine.

use std::cell::RefCell;
use std::rc::Rc;

use btk_selection::prelude::*;
use btk_selection_backends::x11::X11Server;
use btk_selection_backends::{PropMode, SelectionTransport};
use btk_selection_core::{atoms_from_bytes, atoms_to_bytes};

const BLOB: &str = "application/x-btk-blob";

struct Desktop {
    factory: BackendFactory,
    main_loop: MainLoop,
}

impl Desktop {
    fn new() -> Self {
        let server = X11Server::new();
        server.enable_property_log();
        Self {
            factory: BackendFactory::with_x11_server(server),
            main_loop: MainLoop::with_virtual_clock(),
        }
    }

    fn server(&self) -> &X11Server {
        self.factory.x11_server().unwrap()
    }

    fn app(&self) -> (SelectionContext, Display) {
        let context = SelectionContext::new(self.main_loop.clone());
        let display = context.open_display(self.factory.connect());
        (context, display)
    }

    fn settle(&self) {
        while self.main_loop.iterate(false) {}
    }
}

fn realized(context: &SelectionContext, display: &Display) -> Widget {
    let widget = Widget::new(context, display);
    widget.realize();
    widget
}

/// A requestor widget recording every `selection-received`.
fn receiver(context: &SelectionContext, display: &Display) -> (Widget, Rc<RefCell<Vec<SelectionData>>>) {
    let widget = realized(context, display);
    let received = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&received);
    widget.connect_selection_received(move |_, data, _| log.borrow_mut().push(data.clone()));
    (widget, received)
}

/// Claim PRIMARY for `widget`, answering `target` with `payload`.
fn serve_payload(context: &SelectionContext, display: &Display, widget: &Widget, target: Atom, payload: Vec<u8>) {
    context.selection_add_target(widget, atoms::PRIMARY, target, 7);
    widget.connect_selection_get(move |_, data, info, _| {
        assert_eq!(info, 7);
        data.set(data.target(), 8, &payload);
    });
    assert!(context.selection_owner_set(display, Some(widget), atoms::PRIMARY, CURRENT_TIME));
}

#[test]
fn test_cross_process_conversion() {
    let desktop = Desktop::new();
    let (owner_ctx, owner_display) = desktop.app();
    let (requestor_ctx, requestor_display) = desktop.app();

    let owner = realized(&owner_ctx, &owner_display);
    serve_payload(&owner_ctx, &owner_display, &owner, atoms::UTF8_STRING, b"over the wire".to_vec());

    let (requestor, received) = receiver(&requestor_ctx, &requestor_display);
    assert!(requestor_ctx.selection_convert(&requestor, atoms::PRIMARY, atoms::UTF8_STRING, CURRENT_TIME));
    assert!(requestor_ctx.selection_retrieval_pending(&requestor));

    desktop.main_loop.run_until(|| !received.borrow().is_empty());
    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].data(), b"over the wire");
    assert_eq!(received[0].data_type(), atoms::UTF8_STRING);
    assert!(!requestor_ctx.selection_retrieval_pending(&requestor));
}

#[test]
fn test_incr_transfer_of_one_megabyte() {
    let desktop = Desktop::new();
    let (owner_ctx, owner_display) = desktop.app();
    let (requestor_ctx, requestor_display) = desktop.app();
    let target = Atom::intern(BLOB);

    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let owner = realized(&owner_ctx, &owner_display);
    serve_payload(&owner_ctx, &owner_display, &owner, target, payload.clone());

    let (requestor, received) = receiver(&requestor_ctx, &requestor_display);
    assert!(requestor_ctx.selection_convert(&requestor, atoms::PRIMARY, target, CURRENT_TIME));
    desktop.main_loop.run_until(|| !received.borrow().is_empty());

    assert_eq!(received.borrow()[0].data(), payload.as_slice());
    assert_eq!(owner_ctx.selection_incr_sends_pending(), 0);

    let window = requestor.window().unwrap();
    let chunks: Vec<usize> = desktop
        .server()
        .property_log()
        .iter()
        .filter(|w| w.window == window && w.data_type == target)
        .map(|w| w.len)
        .collect();
    assert_eq!(chunks, vec![262_144, 262_144, 262_144, 262_144, 0]);

    let placeholders = desktop
        .server()
        .property_log()
        .iter()
        .filter(|w| w.window == window && w.data_type == atoms::INCR)
        .count();
    assert_eq!(placeholders, 1);
}

#[test]
fn test_multiple_conversion() {
    let desktop = Desktop::new();
    let (owner_ctx, owner_display) = desktop.app();
    let (requestor_ctx, requestor_display) = desktop.app();

    let owner = realized(&owner_ctx, &owner_display);
    owner_ctx.selection_add_target(&owner, atoms::PRIMARY, atoms::UTF8_STRING, 1);
    owner_ctx.selection_add_target(&owner, atoms::PRIMARY, atoms::TEXT_HTML, 2);
    // html is advertised but never produced
    owner.connect_selection_get(|_, data, info, _| {
        if info == 1 {
            data.set_text("plain");
        }
    });
    assert!(owner_ctx.selection_owner_set(&owner_display, Some(&owner), atoms::PRIMARY, CURRENT_TIME));

    let (requestor, received) = receiver(&requestor_ctx, &requestor_display);
    let window = requestor.window().unwrap();
    let transport = requestor_display.transport().unwrap();
    let text_property = Atom::intern("BTK_TEST_TEXT");
    let html_property = Atom::intern("BTK_TEST_HTML");
    let request = atoms_to_bytes(&[atoms::UTF8_STRING, text_property, atoms::TEXT_HTML, html_property]);
    transport
        .change_property(window, atoms::BTK_SELECTION, atoms::ATOM_PAIR, 32, PropMode::Replace, &request)
        .unwrap();

    assert!(requestor_ctx.selection_convert(&requestor, atoms::PRIMARY, atoms::MULTIPLE, CURRENT_TIME));
    desktop.main_loop.run_until(|| !received.borrow().is_empty());

    let reply = received.borrow()[0].clone();
    assert_eq!(reply.data_type(), atoms::ATOM_PAIR);
    assert_eq!(
        atoms_from_bytes(reply.data()),
        vec![atoms::UTF8_STRING, text_property, atoms::TEXT_HTML, atoms::NONE]
    );
    let text = transport.get_property(window, text_property, true).unwrap();
    assert_eq!(text.data, b"plain");
    assert!(transport.get_property(window, html_property, false).is_none());
}

#[test]
fn test_timestamp_and_targets_defaults() {
    let desktop = Desktop::new();
    let (owner_ctx, owner_display) = desktop.app();
    let (requestor_ctx, requestor_display) = desktop.app();

    let owner = realized(&owner_ctx, &owner_display);
    owner_ctx.selection_add_target(&owner, atoms::PRIMARY, atoms::UTF8_STRING, 0);
    let claimed_at = owner_display.transport().unwrap().server_time();
    assert!(owner_ctx.selection_owner_set(&owner_display, Some(&owner), atoms::PRIMARY, claimed_at));

    let (requestor, received) = receiver(&requestor_ctx, &requestor_display);
    assert!(requestor_ctx.selection_convert(&requestor, atoms::PRIMARY, atoms::TIMESTAMP, CURRENT_TIME));
    desktop.main_loop.run_until(|| received.borrow().len() == 1);
    assert!(requestor_ctx.selection_convert(&requestor, atoms::PRIMARY, atoms::TARGETS, CURRENT_TIME));
    desktop.main_loop.run_until(|| received.borrow().len() == 2);

    let received = received.borrow();
    let timestamp = &received[0];
    assert_eq!(timestamp.data_type(), atoms::INTEGER);
    assert_eq!(timestamp.format(), 32);
    assert_eq!(timestamp.data(), claimed_at.to_le_bytes());

    assert_eq!(
        received[1].targets(),
        Some(vec![atoms::TIMESTAMP, atoms::TARGETS, atoms::MULTIPLE, atoms::UTF8_STRING])
    );
}

#[test]
fn test_request_for_lost_selection_is_refused() {
    let desktop = Desktop::new();
    let (owner_ctx, owner_display) = desktop.app();
    let (requestor_ctx, requestor_display) = desktop.app();

    let owner = realized(&owner_ctx, &owner_display);
    serve_payload(&owner_ctx, &owner_display, &owner, atoms::UTF8_STRING, b"gone".to_vec());
    assert!(owner_ctx.selection_owner_set(&owner_display, None, atoms::PRIMARY, CURRENT_TIME));
    assert!(owner_ctx.selection_owner(&owner_display, atoms::PRIMARY).is_none());

    let refusals = desktop.server().stats().refusals;
    let (requestor, received) = receiver(&requestor_ctx, &requestor_display);
    assert!(requestor_ctx.selection_convert(&requestor, atoms::PRIMARY, atoms::UTF8_STRING, CURRENT_TIME));
    desktop.main_loop.run_until(|| !received.borrow().is_empty());

    assert!(received.borrow()[0].length() < 0);
    assert_eq!(desktop.server().stats().refusals, refusals + 1);
}

#[test]
fn test_second_retrieval_on_same_widget_refused() {
    let desktop = Desktop::new();
    let (owner_ctx, owner_display) = desktop.app();
    let (requestor_ctx, requestor_display) = desktop.app();

    let owner = realized(&owner_ctx, &owner_display);
    serve_payload(&owner_ctx, &owner_display, &owner, atoms::UTF8_STRING, b"first".to_vec());

    let (requestor, received) = receiver(&requestor_ctx, &requestor_display);
    assert!(requestor_ctx.selection_convert(&requestor, atoms::PRIMARY, atoms::TARGETS, CURRENT_TIME));
    assert!(!requestor_ctx.selection_convert(&requestor, atoms::PRIMARY, atoms::UTF8_STRING, CURRENT_TIME));

    desktop.settle();
    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].target(), atoms::TARGETS);
}

#[test]
fn test_claim_notifies_previous_owner_across_processes() {
    let desktop = Desktop::new();
    let (first_ctx, first_display) = desktop.app();
    let (second_ctx, second_display) = desktop.app();

    let first = realized(&first_ctx, &first_display);
    let cleared = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&cleared);
    first.connect_selection_clear_event(move |_, event| {
        log.borrow_mut().push(event.selection);
        false
    });
    assert!(first_ctx.selection_owner_set(&first_display, Some(&first), atoms::PRIMARY, CURRENT_TIME));

    let second = realized(&second_ctx, &second_display);
    assert!(second_ctx.selection_owner_set(&second_display, Some(&second), atoms::PRIMARY, CURRENT_TIME));
    desktop.settle();

    assert_eq!(*cleared.borrow(), vec![atoms::PRIMARY]);
    assert!(first_ctx.selection_owner(&first_display, atoms::PRIMARY).is_none());
    assert_eq!(second_ctx.selection_owner(&second_display, atoms::PRIMARY), Some(second));
}

#[test]
fn test_retrieval_times_out_after_idle_ticks() {
    let desktop = Desktop::new();
    let (requestor_ctx, requestor_display) = desktop.app();

    // A client that owns PRIMARY but never answers.
    let PlatformConnection::X11(silent) = desktop.factory.connect() else {
        unreachable!()
    };
    let silent_window = silent.create_window();
    assert!(silent.set_selection_owner(Some(silent_window), atoms::PRIMARY, CURRENT_TIME));

    let (requestor, received) = receiver(&requestor_ctx, &requestor_display);
    assert!(requestor_ctx.selection_convert(&requestor, atoms::PRIMARY, atoms::UTF8_STRING, CURRENT_TIME));

    let ticks = u64::from(requestor_ctx.policy().idle_abort_ticks);
    let tick_ms = requestor_ctx.policy().tick_interval_ms;
    desktop.main_loop.advance((ticks - 1) * tick_ms);
    assert!(received.borrow().is_empty());
    assert!(requestor_ctx.selection_retrieval_pending(&requestor));

    desktop.main_loop.advance(tick_ms);
    assert_eq!(received.borrow().len(), 1);
    assert!(received.borrow()[0].length() < 0);
    assert!(!requestor_ctx.selection_retrieval_pending(&requestor));
}

#[test]
fn test_stalled_incr_send_is_abandoned() {
    let desktop = Desktop::new();
    let (owner_ctx, owner_display) = desktop.app();
    let target = Atom::intern(BLOB);

    let owner = realized(&owner_ctx, &owner_display);
    serve_payload(&owner_ctx, &owner_display, &owner, target, vec![1; 600_000]);

    // A requestor that reads the placeholder but never deletes it.
    let PlatformConnection::X11(stalled) = desktop.factory.connect() else {
        unreachable!()
    };
    let window = stalled.create_window();
    stalled.convert_selection(window, atoms::PRIMARY, target, atoms::BTK_SELECTION, CURRENT_TIME);
    desktop.settle();

    assert_eq!(owner_ctx.selection_incr_sends_pending(), 1);
    let placeholder = stalled.get_property(window, atoms::BTK_SELECTION, false).unwrap();
    assert_eq!(placeholder.data_type, atoms::INCR);
    assert_eq!(placeholder.data, 600_000u32.to_le_bytes());

    let ticks = u64::from(owner_ctx.policy().idle_abort_ticks);
    desktop.main_loop.advance(ticks * owner_ctx.policy().tick_interval_ms);
    assert_eq!(owner_ctx.selection_incr_sends_pending(), 0);
}

#[test]
fn test_destroyed_owner_releases_selection() {
    let desktop = Desktop::new();
    let (owner_ctx, owner_display) = desktop.app();
    let (other_ctx, other_display) = desktop.app();

    let owner = realized(&owner_ctx, &owner_display);
    serve_payload(&owner_ctx, &owner_display, &owner, atoms::UTF8_STRING, b"short lived".to_vec());
    owner.destroy();

    assert!(owner_ctx.selection_owner(&owner_display, atoms::PRIMARY).is_none());
    assert!(other_display.transport().unwrap().selection_owner(atoms::PRIMARY).is_none());

    let (requestor, received) = receiver(&other_ctx, &other_display);
    assert!(other_ctx.selection_convert(&requestor, atoms::PRIMARY, atoms::UTF8_STRING, CURRENT_TIME));
    desktop.main_loop.run_until(|| !received.borrow().is_empty());
    assert!(received.borrow()[0].length() < 0);
}

#[test]
fn test_concurrent_incr_sends_to_one_window() {
    let desktop = Desktop::new();
    let (owner_ctx, owner_display) = desktop.app();
    let first = Atom::intern("application/x-btk-first");
    let second = Atom::intern("application/x-btk-second");

    let owner = realized(&owner_ctx, &owner_display);
    owner_ctx.selection_add_target(&owner, atoms::PRIMARY, first, 1);
    owner_ctx.selection_add_target(&owner, atoms::PRIMARY, second, 2);
    owner.connect_selection_get(|_, data, info, _| {
        let fill = if info == 1 { 0xaa } else { 0xbb };
        data.set(data.target(), 8, &vec![fill; 600_000]);
    });
    assert!(owner_ctx.selection_owner_set(&owner_display, Some(&owner), atoms::PRIMARY, CURRENT_TIME));

    let PlatformConnection::X11(client) = desktop.factory.connect() else {
        unreachable!()
    };
    let window = client.create_window();
    let prop_a = Atom::intern("BTK_PROP_A");
    let prop_b = Atom::intern("BTK_PROP_B");
    client.convert_selection(window, atoms::PRIMARY, first, prop_a, CURRENT_TIME);
    client.convert_selection(window, atoms::PRIMARY, second, prop_b, CURRENT_TIME);
    desktop.settle();
    assert_eq!(owner_ctx.selection_incr_sends_pending(), 2);

    // Reading the second transfer first must not wait on the first one.
    client.delete_property(window, prop_b);
    desktop.settle();
    let chunk = client.get_property(window, prop_b, false).unwrap();
    assert_eq!(chunk.data_type, second);
    assert_eq!(chunk.data.len(), 262_144);
    assert!(chunk.data.iter().all(|&b| b == 0xbb));

    client.delete_property(window, prop_a);
    desktop.settle();
    let chunk = client.get_property(window, prop_a, false).unwrap();
    assert_eq!(chunk.data_type, first);
    assert!(chunk.data.iter().all(|&b| b == 0xaa));
}

#[test]
fn test_incr_chunks_keep_whole_items() {
    // 1102 - 100 bytes of header margin leaves 1002, not a multiple of 4.
    let server = X11Server::with_max_request_size(1102);
    server.enable_property_log();
    let factory = BackendFactory::with_x11_server(server);
    let main_loop = MainLoop::with_virtual_clock();
    let owner_ctx = SelectionContext::new(main_loop.clone());
    let owner_display = owner_ctx.open_display(factory.connect());
    let requestor_ctx = SelectionContext::new(main_loop.clone());
    let requestor_display = requestor_ctx.open_display(factory.connect());
    let target = Atom::intern("application/x-btk-words");

    let words: Vec<u8> = (0u32..750).flat_map(|i| i.to_le_bytes()).collect();
    let owner = realized(&owner_ctx, &owner_display);
    owner_ctx.selection_add_target(&owner, atoms::PRIMARY, target, 0);
    let payload = words.clone();
    owner.connect_selection_get(move |_, data, _, _| data.set(data.target(), 32, &payload));
    assert!(owner_ctx.selection_owner_set(&owner_display, Some(&owner), atoms::PRIMARY, CURRENT_TIME));

    let (requestor, received) = receiver(&requestor_ctx, &requestor_display);
    assert!(requestor_ctx.selection_convert(&requestor, atoms::PRIMARY, target, CURRENT_TIME));
    main_loop.run_until(|| !received.borrow().is_empty());
    assert_eq!(received.borrow()[0].data(), words.as_slice());

    let window = requestor.window().unwrap();
    let chunks: Vec<usize> = factory
        .x11_server()
        .unwrap()
        .property_log()
        .iter()
        .filter(|w| w.window == window && w.data_type == target)
        .map(|w| w.len)
        .collect();
    assert_eq!(chunks, vec![1000, 1000, 1000, 0]);
}
