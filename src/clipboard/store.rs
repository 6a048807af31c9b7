//! Keeping clipboard contents alive after the application exits.

use btk_selection_core::{atoms, TargetEntry};
use tracing::debug;

use super::Clipboard;

impl Clipboard {
    /// Mark the installed contents as storable.
    ///
    /// `targets` limits what a clipboard manager saves; an empty slice means
    /// every target the contents offer. Only CLIPBOARD can be stored, and
    /// the hint is dropped along with the contents.
    pub fn set_can_store(&self, targets: &[TargetEntry]) {
        if self.selection() != atoms::CLIPBOARD {
            return;
        }
        let first = self.inner.state.borrow().storable_targets.is_none();
        if first {
            self.inner.platform.enable_store(self);
        }
        self.state().storable_targets = Some(targets.iter().map(|entry| entry.target).collect());
    }

    /// Hand the contents to the platform so they survive this process.
    ///
    /// Blocks in a nested loop until the clipboard manager answers or the
    /// configured timeout expires. Does nothing unless this clipboard owns
    /// storable contents.
    pub fn store(&self) {
        let targets = {
            let state = self.inner.state.borrow();
            if state.storing || !state.have_selection || state.get_func.is_none() {
                return;
            }
            match (&state.storable_targets, self.display().transport()) {
                (Some(targets), _) => targets.clone(),
                (None, Some(_)) => {
                    debug!(selection = %self.selection(), "contents not marked storable");
                    return;
                }
                (None, None) => Vec::new(),
            }
        };

        self.state().storing = true;
        self.inner.platform.store(self, &targets);
        self.state().storing = false;
    }

    pub(crate) fn is_storing(&self) -> bool {
        self.inner.state.borrow().storing
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use btk_selection_backends::x11::X11Server;
    use btk_selection_backends::{
        BackendFactory, BackendKind, ClipboardBackend, PlatformConnection, SelectionTransport, CURRENT_TIME,
    };
    use btk_selection_core::{atoms, TargetFlags};

    use super::*;
    use crate::context::SelectionContext;
    use crate::mainloop::MainLoop;

    fn x11_with_manager() -> (BackendFactory, SelectionContext, Clipboard) {
        let server = X11Server::new();
        server.start_clipboard_manager();
        let factory = BackendFactory::with_x11_server(server);
        let context = SelectionContext::new(MainLoop::with_virtual_clock());
        let display = context.open_display(factory.connect());
        let clipboard = context.clipboard_for_display(&display, atoms::CLIPBOARD);
        (factory, context, clipboard)
    }

    #[test]
    fn test_store_hands_text_to_manager() {
        let (factory, _context, clipboard) = x11_with_manager();
        let server = factory.x11_server().unwrap();

        assert!(clipboard.set_text("keep me"));
        clipboard.store();
        assert!(!clipboard.is_storing());

        assert!(server.stored_clipboard_targets().contains(&atoms::UTF8_STRING));
        let value = server.stored_clipboard_value(atoms::UTF8_STRING).unwrap();
        assert_eq!(value.data_type, atoms::UTF8_STRING);
        assert!(value.data.starts_with(b"keep me"));
    }

    #[test]
    fn test_store_limited_to_storable_targets() {
        let (factory, _context, clipboard) = x11_with_manager();
        let server = factory.x11_server().unwrap();

        let entries = [
            TargetEntry::new(atoms::UTF8_STRING, TargetFlags::NONE, 0),
            TargetEntry::new(atoms::STRING, TargetFlags::NONE, 0),
        ];
        assert!(clipboard.set_with_data(
            &entries,
            |_, data, _, _| {
                data.set_text("only utf8");
            },
            |_, _| {},
            Rc::new(()),
        ));
        clipboard.set_can_store(&entries[..1]);
        clipboard.store();

        assert_eq!(server.stored_clipboard_targets(), vec![atoms::UTF8_STRING]);
    }

    #[test]
    fn test_store_requires_storable_contents() {
        let (factory, _context, clipboard) = x11_with_manager();
        let server = factory.x11_server().unwrap();

        assert!(clipboard.set_with_data(
            &[TargetEntry::new(atoms::UTF8_STRING, TargetFlags::NONE, 0)],
            |_, data, _, _| {
                data.set_text("volatile");
            },
            |_, _| {},
            Rc::new(()),
        ));
        clipboard.store();
        assert!(server.stored_clipboard_targets().is_empty());
    }

    #[test]
    fn test_can_store_ignored_off_clipboard() {
        let (_factory, context, _clipboard) = x11_with_manager();
        let display = context.default_display().unwrap();
        let primary = context.clipboard_for_display(&display, atoms::PRIMARY);
        assert!(primary.set_text("primary"));
        assert!(primary.inner.state.borrow().storable_targets.is_none());
    }

    #[test]
    fn test_store_without_manager_returns() {
        let context = SelectionContext::new(MainLoop::with_virtual_clock());
        let display = context.open_display(BackendFactory::new(BackendKind::X11).connect());
        let clipboard = context.clipboard_for_display(&display, atoms::CLIPBOARD);
        assert!(clipboard.set_text("nobody listens"));
        clipboard.store();
        assert!(!clipboard.is_storing());
        assert_eq!(context.main_loop().now_ms(), 0);
    }

    #[test]
    fn test_store_gives_up_on_silent_manager() {
        let factory = BackendFactory::new(BackendKind::X11);
        let context = SelectionContext::new(MainLoop::with_virtual_clock());
        let display = context.open_display(factory.connect());
        let clipboard = context.clipboard_for_display(&display, atoms::CLIPBOARD);

        // Claims the manager selection but never reads its requests.
        let PlatformConnection::X11(manager) = factory.connect() else {
            unreachable!()
        };
        let manager_window = manager.create_window();
        assert!(manager.set_selection_owner(Some(manager_window), atoms::CLIPBOARD_MANAGER, CURRENT_TIME));
        assert!(display.supports_clipboard_persistence());

        assert!(clipboard.set_text("nobody answers"));
        let widget = context.clipboard_widget(&display).widget;
        let handlers = widget.notify_handler_count();

        clipboard.store();

        let timeout = context.clipboard_policy().store_timeout_ms;
        assert!(context.main_loop().now_ms() >= timeout);
        assert!(!clipboard.is_storing());
        assert_eq!(widget.notify_handler_count(), handlers);
        assert!(manager.has_pending());
    }

    #[test]
    fn test_native_store_renders_eagerly() {
        let factory = BackendFactory::new(BackendKind::Win32);
        let reader = match factory.connect() {
            PlatformConnection::Win32(backend) => backend,
            _ => unreachable!(),
        };

        {
            let context = SelectionContext::new(MainLoop::with_virtual_clock());
            let display = context.open_display(factory.connect());
            let clipboard = context.clipboard_for_display(&display, atoms::CLIPBOARD);
            assert!(clipboard.set_text("rendered now"));
            clipboard.store();
        }

        // The provider is gone; only the rendered data can answer.
        let data = reader.get(atoms::CLIPBOARD, atoms::UTF8_STRING);
        assert_eq!(data.text().as_deref(), Some("rendered now"));
    }
}
