//! Clipboard façade across applications and platforms.

use std::cell::Cell;
use std::rc::Rc;

use btk_selection::prelude::*;
use btk_selection_backends::x11::X11Server;
use btk_selection_backends::SelectionTransport;

fn app(factory: &BackendFactory, main_loop: &MainLoop) -> (SelectionContext, Clipboard) {
    let context = SelectionContext::new(main_loop.clone());
    let display = context.open_display(factory.connect());
    let clipboard = context.clipboard_for_display(&display, atoms::CLIPBOARD);
    (context, clipboard)
}

fn settle(main_loop: &MainLoop) {
    while main_loop.iterate(false) {}
}

#[test]
fn test_set_then_wait_in_same_process() {
    let factory = BackendFactory::new(BackendKind::X11);
    let main_loop = MainLoop::with_virtual_clock();
    let (_context, clipboard) = app(&factory, &main_loop);
    let server = factory.x11_server().unwrap();

    assert!(clipboard.set_with_data(
        &[TargetEntry::new(atoms::UTF8_STRING, TargetFlags::NONE, 0)],
        |_, data, _, _| {
            data.set_text("hello");
        },
        |_, _| {},
        Rc::new(()),
    ));

    let conversions = server.stats().conversions;
    assert_eq!(clipboard.wait_for_text().as_deref(), Some("hello"));
    assert_eq!(server.stats().conversions, conversions);
}

#[test]
fn test_rejected_target_across_processes() {
    let factory = BackendFactory::new(BackendKind::X11);
    let main_loop = MainLoop::with_virtual_clock();
    let (_owner_ctx, owner) = app(&factory, &main_loop);
    let (_reader_ctx, reader) = app(&factory, &main_loop);
    let server = factory.x11_server().unwrap();

    assert!(owner.set_with_data(
        &[TargetEntry::new(atoms::IMAGE_PNG, TargetFlags::NONE, 0)],
        |_, _, _, _| {},
        |_, _| {},
        Rc::new(()),
    ));
    settle(&main_loop);

    let refusals = server.stats().refusals;
    let data = reader.wait_for_contents(atoms::IMAGE_PNG);
    assert!(data.length() < 0);
    assert_eq!(server.stats().refusals, refusals + 1);
}

#[test]
fn test_supersession_across_processes() {
    let factory = BackendFactory::new(BackendKind::X11);
    let main_loop = MainLoop::with_virtual_clock();
    let (_first_ctx, first) = app(&factory, &main_loop);
    let (_second_ctx, second) = app(&factory, &main_loop);

    let cleared = Rc::new(Cell::new(0));
    let count = Rc::clone(&cleared);
    let first_owner: UserData = Rc::new("first");
    assert!(first.set_with_owner(
        &[TargetEntry::new(atoms::UTF8_STRING, TargetFlags::NONE, 0)],
        |_, data, _, _| {
            data.set_text("from first");
        },
        move |_, _| count.set(count.get() + 1),
        first_owner,
    ));
    settle(&main_loop);

    let second_owner: UserData = Rc::new("second");
    assert!(second.set_with_owner(
        &[TargetEntry::new(atoms::UTF8_STRING, TargetFlags::NONE, 0)],
        |_, data, _, _| {
            data.set_text("from second");
        },
        |_, _| {},
        Rc::clone(&second_owner),
    ));
    settle(&main_loop);

    assert_eq!(cleared.get(), 1);
    assert!(!first.has_selection());
    assert!(first.get_owner().is_none());
    let owner = second.get_owner().unwrap();
    assert!(Rc::ptr_eq(&owner, &second_owner));

    assert_eq!(first.wait_for_text().as_deref(), Some("from second"));
}

#[test]
fn test_owner_change_reaches_other_process() {
    let factory = BackendFactory::new(BackendKind::X11);
    let main_loop = MainLoop::with_virtual_clock();
    let (_watcher_ctx, watcher) = app(&factory, &main_loop);
    let (_writer_ctx, writer) = app(&factory, &main_loop);

    let changes = Rc::new(Cell::new(0));
    let count = Rc::clone(&changes);
    watcher.connect_owner_change(move |_, event| {
        assert_eq!(event.selection, atoms::CLIPBOARD);
        count.set(count.get() + 1);
    });

    assert!(writer.set_text("news"));
    settle(&main_loop);
    assert_eq!(changes.get(), 1);

    writer.clear();
    settle(&main_loop);
    assert_eq!(changes.get(), 2);
}

#[test]
fn test_contents_survive_exit_through_manager() {
    let server = X11Server::new();
    server.start_clipboard_manager();
    let factory = BackendFactory::with_x11_server(server);
    let main_loop = MainLoop::with_virtual_clock();

    let (writer_ctx, writer) = app(&factory, &main_loop);
    let (_reader_ctx, reader) = app(&factory, &main_loop);

    assert!(writer.set_text("persisted"));
    writer_ctx.store_all();
    assert!(factory
        .x11_server()
        .unwrap()
        .stored_clipboard_targets()
        .contains(&atoms::UTF8_STRING));

    let display = writer.display().clone();
    drop(writer);
    writer_ctx.close_display(&display);
    settle(&main_loop);

    let owner = reader.display().transport().unwrap().selection_owner(atoms::CLIPBOARD);
    assert!(owner.is_some());
    assert_eq!(reader.wait_for_text().as_deref(), Some("persisted"));
}

#[test]
fn test_win32_clipboard_between_processes() {
    let factory = BackendFactory::new(BackendKind::Win32);
    let main_loop = MainLoop::with_virtual_clock();
    let (_writer_ctx, writer) = app(&factory, &main_loop);
    let (_reader_ctx, reader) = app(&factory, &main_loop);

    let cleared = Rc::new(Cell::new(0));
    let count = Rc::clone(&cleared);
    assert!(writer.set_with_data(
        &[TargetEntry::new(atoms::UTF8_STRING, TargetFlags::NONE, 0)],
        |_, data, _, _| {
            data.set_text("copied on win32");
        },
        move |_, _| count.set(count.get() + 1),
        Rc::new(()),
    ));

    assert!(reader.wait_is_text_available());
    assert_eq!(reader.wait_for_text().as_deref(), Some("copied on win32"));

    assert!(reader.set_text("reply"));
    assert_eq!(cleared.get(), 1);
    assert!(!writer.has_selection());
    assert_eq!(writer.wait_for_text().as_deref(), Some("reply"));
}

#[test]
fn test_quartz_named_pasteboards_are_separate() {
    let factory = BackendFactory::new(BackendKind::Quartz);
    let main_loop = MainLoop::with_virtual_clock();
    let context = SelectionContext::new(main_loop);
    let display = context.open_display(factory.connect());
    let clipboard = context.clipboard_for_display(&display, atoms::CLIPBOARD);
    let primary = context.clipboard_for_display(&display, atoms::PRIMARY);

    assert!(primary.set_text("selected"));
    assert_eq!(primary.wait_for_text().as_deref(), Some("selected"));
    assert!(clipboard.wait_for_text().is_none());
    assert!(!clipboard.wait_is_text_available());
}

#[test]
fn test_quartz_uris_roundtrip() {
    let factory = BackendFactory::new(BackendKind::Quartz);
    let main_loop = MainLoop::with_virtual_clock();
    let (_writer_ctx, writer) = app(&factory, &main_loop);
    let (_reader_ctx, reader) = app(&factory, &main_loop);

    assert!(writer.set_with_data(
        &[TargetEntry::new(atoms::TEXT_URI_LIST, TargetFlags::NONE, 0)],
        |_, data, _, _| {
            data.set_uris(&["file:///tmp/report.pdf"]);
        },
        |_, _| {},
        Rc::new(()),
    ));

    assert!(reader.wait_is_uris_available());
    assert_eq!(reader.wait_for_uris(), Some(vec!["file:///tmp/report.pdf".to_string()]));
}
