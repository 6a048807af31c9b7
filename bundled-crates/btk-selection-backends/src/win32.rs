//! Win32-style clipboard.
//!
//! One system clipboard per selection, keyed by numeric format ids. Fixed
//! formats cover text, file drops, HTML and bitmaps; any other target is
//! registered by name and gets an id at or above [`CF_REGISTERED_BASE`].
//! Declared formats start out empty and are rendered on first read.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use btk_selection_core::formats::{
    clipboard_format_to_target, target_to_clipboard_format, CF_DIB, CF_HDROP, CF_HTML, CF_PNG, CF_REGISTERED_BASE,
    CF_UNICODETEXT,
};
use btk_selection_core::image::{bmp_to_dib, dib_to_bmp, dib_to_png, pixbuf_to_dib, Pixbuf};
use btk_selection_core::{atoms, atoms_to_bytes, Atom, FormatConverter, SelectionData, SelectionError, SelectionResult};
use tracing::{debug, trace};

use crate::backend::{ClipboardBackend, PasteboardOwner};

#[derive(Debug, Clone)]
struct Slot {
    format: u32,
    target: Atom,
    data: Option<Vec<u8>>,
}

#[derive(Default)]
struct Board {
    sequence: i64,
    owner: Option<Rc<dyn PasteboardOwner>>,
    slots: Vec<Slot>,
}

#[derive(Default)]
struct Win32State {
    boards: HashMap<Atom, Board>,
    registered: Vec<String>,
}

/// The process-wide clipboard all [`Win32Backend`]s on a machine share.
#[derive(Clone, Default)]
pub struct Win32Clipboard {
    inner: Rc<RefCell<Win32State>>,
}

impl std::fmt::Debug for Win32Clipboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Win32Clipboard")
            .field("boards", &state.boards.len())
            .field("registered", &state.registered)
            .finish()
    }
}

impl Win32Clipboard {
    /// Empty clipboard system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for a registered format name, allocating one on first use.
    pub fn register_format(&self, name: &str) -> u32 {
        let mut state = self.inner.borrow_mut();
        let index = match state.registered.iter().position(|n| n == name) {
            Some(index) => index,
            None => {
                state.registered.push(name.to_string());
                state.registered.len() - 1
            }
        };
        CF_REGISTERED_BASE + index as u32
    }

    /// Name of a registered format id.
    pub fn registered_name(&self, id: u32) -> Option<String> {
        let index = id.checked_sub(CF_REGISTERED_BASE)? as usize;
        self.inner.borrow().registered.get(index).cloned()
    }

    /// Declared format ids on `selection`, in declaration order.
    pub fn formats(&self, selection: Atom) -> Vec<u32> {
        self.inner
            .borrow()
            .boards
            .get(&selection)
            .map(|b| b.slots.iter().map(|s| s.format).collect())
            .unwrap_or_default()
    }

    /// Whether `format` on `selection` holds rendered data.
    pub fn is_rendered(&self, selection: Atom, format: u32) -> bool {
        self.inner
            .borrow()
            .boards
            .get(&selection)
            .and_then(|b| b.slots.iter().find(|s| s.format == format))
            .is_some_and(|s| s.data.is_some())
    }
}

/// One application's view of a [`Win32Clipboard`].
#[derive(Debug, Clone)]
pub struct Win32Backend {
    system: Win32Clipboard,
    converter: FormatConverter,
}

impl Win32Backend {
    /// Backend on the given clipboard system.
    pub fn new(system: Win32Clipboard) -> Self {
        Self {
            system,
            converter: FormatConverter::new(),
        }
    }

    /// The shared clipboard system
    pub fn system(&self) -> &Win32Clipboard {
        &self.system
    }

    fn format_for(&self, target: Atom) -> u32 {
        match target_to_clipboard_format(target) {
            Some(format) => format.id,
            None => self.system.register_format(target.name()),
        }
    }

    fn store(&self, selection: Atom, format: u32, target: Atom, data: Vec<u8>) {
        let mut state = self.system.inner.borrow_mut();
        let board = state.boards.entry(selection).or_default();
        match board.slots.iter_mut().find(|s| s.format == format) {
            Some(slot) => slot.data = Some(data),
            None => board.slots.push(Slot {
                format,
                target,
                data: Some(data),
            }),
        }
    }

    fn slot(&self, selection: Atom, format: u32) -> Option<Slot> {
        self.system
            .inner
            .borrow()
            .boards
            .get(&selection)
            .and_then(|b| b.slots.iter().find(|s| s.format == format).cloned())
    }

    /// Read `format`, rendering it through the owner if it is only declared.
    fn render(&self, selection: Atom, format: u32) -> Option<Vec<u8>> {
        let slot = self.slot(selection, format)?;
        if let Some(data) = slot.data {
            return Some(data);
        }

        let owner = self
            .system
            .inner
            .borrow()
            .boards
            .get(&selection)
            .and_then(|b| b.owner.clone())?;
        trace!(format, target = %slot.target, "delayed rendering");
        let rendered = owner.provide(slot.target);
        if rendered.is_rejected() {
            return None;
        }
        if let Err(e) = self.put(selection, &rendered) {
            debug!(error = %e, format, "delayed rendering failed");
            return None;
        }
        self.slot(selection, format).and_then(|s| s.data)
    }

    fn decode(&self, selection: Atom, target: Atom) -> SelectionResult<SelectionData> {
        let mut result = SelectionData::new(selection, target);
        let format = self.format_for(target);

        match format {
            CF_UNICODETEXT => {
                if let Some(raw) = self.render(selection, CF_UNICODETEXT) {
                    let text = self.converter.unicode_to_text(&raw)?;
                    result.set_text(&text);
                }
            }
            CF_HDROP => {
                if let Some(raw) = self.render(selection, CF_HDROP) {
                    let uris = self.converter.hdrop_to_uris(&raw)?;
                    result.set_uris(&uris);
                }
            }
            CF_HTML => {
                if let Some(raw) = self.render(selection, CF_HTML) {
                    let html = self.converter.cf_html_to_html(&raw)?;
                    result.set(atoms::TEXT_HTML, 8, html.as_bytes());
                }
            }
            CF_PNG => {
                if let Some(png) = self.render(selection, CF_PNG) {
                    result.set(atoms::IMAGE_PNG, 8, &png);
                } else if let Some(dib) = self.render(selection, CF_DIB) {
                    result.set(atoms::IMAGE_PNG, 8, &dib_to_png(&dib)?);
                }
            }
            CF_DIB => {
                if let Some(dib) = self.render(selection, CF_DIB) {
                    result.set(atoms::IMAGE_BMP, 8, &dib_to_bmp(&dib)?);
                }
            }
            other => {
                if let Some(raw) = self.render(selection, other) {
                    result.set(target, 8, &raw);
                }
            }
        }
        Ok(result)
    }
}

impl ClipboardBackend for Win32Backend {
    type PlatformType = u32;

    fn name(&self) -> &'static str {
        "win32"
    }

    fn declare(&self, selection: Atom, targets: &[Atom], owner: Rc<dyn PasteboardOwner>) -> i64 {
        let mut slots: Vec<Slot> = Vec::new();
        for &target in targets {
            let format = self.format_for(target);
            let mut wanted = vec![format];
            if format == CF_PNG {
                wanted.push(CF_DIB);
            }
            for format in wanted {
                if !slots.iter().any(|s| s.format == format) {
                    slots.push(Slot {
                        format,
                        target,
                        data: None,
                    });
                }
            }
        }

        let (previous, sequence) = {
            let mut state = self.system.inner.borrow_mut();
            let board = state.boards.entry(selection).or_default();
            board.sequence += 1;
            board.slots = slots;
            (board.owner.replace(owner), board.sequence)
        };
        debug!(selection = %selection, sequence, targets = targets.len(), "clipboard declared");

        if let Some(previous) = previous {
            previous.ownership_lost();
        }
        sequence
    }

    fn put(&self, selection: Atom, data: &SelectionData) -> SelectionResult<()> {
        if data.is_rejected() {
            return Err(SelectionError::InvalidState("cannot put rejected data".to_string()));
        }
        let target = data.target();
        let format = self.format_for(target);

        match format {
            CF_UNICODETEXT => {
                let text = data
                    .text()
                    .ok_or_else(|| SelectionError::FormatConversion(format!("{target} is not text")))?;
                self.store(selection, format, target, self.converter.text_to_unicode(&text)?);
            }
            CF_HDROP => {
                let uris = data.uris().unwrap_or_default();
                self.store(selection, format, target, self.converter.uri_list_to_hdrop(&uris.join("\n"))?);
            }
            CF_HTML => {
                let html = std::str::from_utf8(data.data()).map_err(|_| SelectionError::InvalidUtf8)?;
                self.store(selection, format, target, self.converter.html_to_cf_html(html)?);
            }
            CF_PNG => {
                self.converter.check_size(data.data().len())?;
                let pixbuf = Pixbuf::decode(data.data())?;
                self.store(selection, CF_PNG, target, data.data().to_vec());
                self.store(selection, CF_DIB, target, pixbuf_to_dib(&pixbuf));
            }
            CF_DIB => {
                self.store(selection, CF_DIB, target, bmp_to_dib(data.data())?);
            }
            other => {
                self.converter.check_size(data.data().len())?;
                self.store(selection, other, target, data.data().to_vec());
            }
        }
        Ok(())
    }

    fn get(&self, selection: Atom, target: Atom) -> SelectionData {
        if target == atoms::TARGETS {
            let mut result = SelectionData::new(selection, target);
            result.set(atoms::ATOM, 32, &atoms_to_bytes(&self.available_targets(selection)));
            return result;
        }
        match self.decode(selection, target) {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, target = %target, "clipboard read failed");
                SelectionData::new(selection, target)
            }
        }
    }

    fn available_targets(&self, selection: Atom) -> Vec<Atom> {
        let mut targets = Vec::new();
        for format in self.system.formats(selection) {
            let offered: Vec<Atom> = match format {
                CF_UNICODETEXT => vec![atoms::UTF8_STRING, atoms::STRING, atoms::TEXT, atoms::COMPOUND_TEXT],
                CF_DIB => vec![atoms::IMAGE_BMP, atoms::IMAGE_PNG],
                id => match clipboard_format_to_target(id) {
                    Some(target) => vec![target],
                    None => self.system.registered_name(id).map(|n| Atom::intern(&n)).into_iter().collect(),
                },
            };
            for target in offered {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        targets
    }

    fn change_count(&self, selection: Atom) -> i64 {
        self.system
            .inner
            .borrow()
            .boards
            .get(&selection)
            .map_or(0, |b| b.sequence)
    }

    fn release(&self, selection: Atom) {
        let mut state = self.system.inner.borrow_mut();
        if let Some(board) = state.boards.get_mut(&selection) {
            board.owner = None;
            board.slots.clear();
        }
    }

    fn format_name_to_platform_type(&self, name: &str) -> u32 {
        self.format_for(Atom::intern(name))
    }

    fn platform_type_to_format_name(&self, ty: &u32) -> String {
        match clipboard_format_to_target(*ty) {
            Some(target) => target.name().to_string(),
            None => self.system.registered_name(*ty).unwrap_or_else(|| format!("#{ty}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockPasteboardOwner;
    use proptest::prelude::*;

    fn text_owner(text: &'static str) -> MockPasteboardOwner {
        let mut owner = MockPasteboardOwner::new();
        owner.expect_provide().returning(move |target| {
            let mut data = SelectionData::new(atoms::CLIPBOARD, target);
            data.set_text(text);
            data
        });
        owner
    }

    #[test]
    fn test_registered_formats() {
        let system = Win32Clipboard::new();
        let backend = Win32Backend::new(system.clone());
        let id = backend.format_name_to_platform_type("application/x-btk-test");
        assert!(id >= CF_REGISTERED_BASE);
        assert_eq!(backend.format_name_to_platform_type("application/x-btk-test"), id);
        assert_eq!(backend.platform_type_to_format_name(&id), "application/x-btk-test");
        assert_eq!(backend.format_name_to_platform_type("text/html"), CF_HTML);
        assert_eq!(backend.platform_type_to_format_name(&CF_UNICODETEXT), "UTF8_STRING");
    }

    #[test]
    fn test_delayed_rendering_renders_once() {
        let backend = Win32Backend::new(Win32Clipboard::new());
        let mut owner = MockPasteboardOwner::new();
        owner.expect_provide().times(1).returning(|target| {
            let mut data = SelectionData::new(atoms::CLIPBOARD, target);
            data.set_text("line one\nline two");
            data
        });

        let sequence = backend.declare(atoms::CLIPBOARD, &[atoms::UTF8_STRING], Rc::new(owner));
        assert_eq!(sequence, 1);
        assert!(!backend.system().is_rendered(atoms::CLIPBOARD, CF_UNICODETEXT));

        let first = backend.get(atoms::CLIPBOARD, atoms::UTF8_STRING);
        assert_eq!(first.text().as_deref(), Some("line one\nline two"));
        assert!(backend.system().is_rendered(atoms::CLIPBOARD, CF_UNICODETEXT));

        let second = backend.get(atoms::CLIPBOARD, atoms::STRING);
        assert_eq!(second.data_type(), atoms::STRING);
        assert_eq!(second.text().as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn test_declare_notifies_previous_owner() {
        let system = Win32Clipboard::new();
        let app_a = Win32Backend::new(system.clone());
        let app_b = Win32Backend::new(system);

        let mut first = text_owner("a");
        first.expect_ownership_lost().times(1).return_const(());
        app_a.declare(atoms::CLIPBOARD, &[atoms::UTF8_STRING], Rc::new(first));

        let mut second = text_owner("b");
        second.expect_ownership_lost().never();
        let sequence = app_b.declare(atoms::CLIPBOARD, &[atoms::UTF8_STRING], Rc::new(second));
        assert_eq!(sequence, 2);
        assert_eq!(app_a.change_count(atoms::CLIPBOARD), 2);
        assert_eq!(app_a.get(atoms::CLIPBOARD, atoms::UTF8_STRING).text().as_deref(), Some("b"));
    }

    #[test]
    fn test_targets_expand_text_family() {
        let backend = Win32Backend::new(Win32Clipboard::new());
        backend.declare(
            atoms::CLIPBOARD,
            &[atoms::UTF8_STRING, atoms::STRING, atoms::TEXT_URI_LIST],
            Rc::new(text_owner("x")),
        );
        let targets = backend.get(atoms::CLIPBOARD, atoms::TARGETS).targets().unwrap();
        assert_eq!(
            targets,
            vec![atoms::UTF8_STRING, atoms::STRING, atoms::TEXT, atoms::COMPOUND_TEXT, atoms::TEXT_URI_LIST]
        );
    }

    #[test]
    fn test_uri_and_html_roundtrip() {
        let backend = Win32Backend::new(Win32Clipboard::new());

        let mut uris = SelectionData::new(atoms::CLIPBOARD, atoms::TEXT_URI_LIST);
        uris.set_uris(&["file:///tmp/a.txt"]);
        backend.put(atoms::CLIPBOARD, &uris).unwrap();
        let read = backend.get(atoms::CLIPBOARD, atoms::TEXT_URI_LIST);
        assert_eq!(read.uris().unwrap(), vec!["file:///tmp/a.txt"]);

        let mut html = SelectionData::new(atoms::CLIPBOARD, atoms::TEXT_HTML);
        html.set(atoms::TEXT_HTML, 8, b"<b>hi</b>");
        backend.put(atoms::CLIPBOARD, &html).unwrap();
        let read = backend.get(atoms::CLIPBOARD, atoms::TEXT_HTML);
        assert_eq!(read.data(), b"<b>hi</b>");
    }

    #[test]
    fn test_png_also_publishes_dib() {
        let backend = Win32Backend::new(Win32Clipboard::new());
        let mut pixbuf = Pixbuf::new(false, 2, 2);
        pixbuf.put_pixel(0, 0, &[255, 0, 0]);

        let mut png = SelectionData::new(atoms::CLIPBOARD, atoms::IMAGE_PNG);
        assert!(png.set_pixbuf(&pixbuf));
        backend.put(atoms::CLIPBOARD, &png).unwrap();

        assert!(backend.system().is_rendered(atoms::CLIPBOARD, CF_DIB));
        let bmp = backend.get(atoms::CLIPBOARD, atoms::IMAGE_BMP);
        assert_eq!(bmp.pixbuf().unwrap(), pixbuf);
    }

    #[test]
    fn test_release_drops_contents() {
        let backend = Win32Backend::new(Win32Clipboard::new());
        backend.declare(atoms::CLIPBOARD, &[atoms::UTF8_STRING], Rc::new(text_owner("x")));
        backend.release(atoms::CLIPBOARD);
        assert!(backend.available_targets(atoms::CLIPBOARD).is_empty());
        assert!(backend.get(atoms::CLIPBOARD, atoms::UTF8_STRING).is_rejected());
        assert_eq!(backend.change_count(atoms::CLIPBOARD), 1);
    }

    proptest! {
        #[test]
        fn test_text_survives_unicode_format(text in "[^\u{0}\r]{1,64}") {
            let backend = Win32Backend::new(Win32Clipboard::new());
            let mut data = SelectionData::new(atoms::CLIPBOARD, atoms::UTF8_STRING);
            prop_assert!(data.set_text(&text));
            backend.put(atoms::CLIPBOARD, &data).unwrap();

            let read = backend.get(atoms::CLIPBOARD, atoms::UTF8_STRING);
            prop_assert_eq!(read.text(), Some(text));
        }

        #[test]
        fn test_file_uris_survive_hdrop(paths in proptest::collection::vec("(/[a-z0-9]{1,8}){1,3}", 1..4)) {
            let backend = Win32Backend::new(Win32Clipboard::new());
            let uris: Vec<String> = paths.iter().map(|p| format!("file://{p}")).collect();
            let mut data = SelectionData::new(atoms::CLIPBOARD, atoms::TEXT_URI_LIST);
            prop_assert!(data.set_uris(&uris));
            backend.put(atoms::CLIPBOARD, &data).unwrap();

            let read = backend.get(atoms::CLIPBOARD, atoms::TEXT_URI_LIST);
            prop_assert_eq!(read.uris(), Some(uris));
        }
    }
}
