//! Quartz-style pasteboards.
//!
//! Each selection maps to a named pasteboard: CLIPBOARD is the general
//! pasteboard, any other selection gets a private `_BTK_<name>` board.
//! Values are stored as typed objects (strings, colors, file names, bitmaps)
//! rather than raw bytes, so every put and get converts between the
//! selection representation and the pasteboard object model.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use btk_selection_core::image::{codecs, NativeImage, Pixbuf};
use btk_selection_core::text::{file_uri_to_path, path_to_file_uri};
use btk_selection_core::{atoms, atoms_to_bytes, Atom, SelectionData, SelectionError, SelectionResult};
use tracing::{debug, trace};

use crate::backend::{ClipboardBackend, PasteboardOwner};

/// Name of the pasteboard backing CLIPBOARD.
pub const GENERAL_PASTEBOARD: &str = "NSGeneralPboard";

/// Pasteboard data type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QuartzType {
    /// Plain text
    String,
    /// RGBA color
    Color,
    /// A single URL
    Url,
    /// A list of file system paths
    Filenames,
    /// Bitmap image
    Tiff,
    /// Application-defined type
    Other(String),
}

impl QuartzType {
    /// Platform name of the type.
    pub fn name(&self) -> &str {
        match self {
            QuartzType::String => "NSStringPboardType",
            QuartzType::Color => "NSColorPboardType",
            QuartzType::Url => "NSURLPboardType",
            QuartzType::Filenames => "NSFilenamesPboardType",
            QuartzType::Tiff => "NSTIFFPboardType",
            QuartzType::Other(name) => name.as_str(),
        }
    }

    /// Pasteboard type that carries `target`.
    pub fn for_target(target: Atom) -> QuartzType {
        if target == atoms::UTF8_STRING
            || target == atoms::STRING
            || target == atoms::TEXT
            || target == atoms::COMPOUND_TEXT
            || target == atoms::TEXT_PLAIN
            || target == atoms::TEXT_PLAIN_UTF8
        {
            QuartzType::String
        } else if target == atoms::APPLICATION_X_COLOR {
            QuartzType::Color
        } else if target == atoms::TEXT_URI_LIST {
            QuartzType::Url
        } else if is_image_target(target) {
            QuartzType::Tiff
        } else {
            QuartzType::Other(target.name().to_string())
        }
    }
}

fn is_image_target(target: Atom) -> bool {
    codecs().iter().any(|codec| codec.mime_types.contains(&target.name()))
}

/// A typed pasteboard value.
#[derive(Debug, Clone, PartialEq)]
pub enum PasteboardValue {
    /// Text
    String(String),
    /// Red, green, blue, alpha in 0.0..=1.0
    Color([f64; 4]),
    /// URL string
    Url(String),
    /// File system paths
    Filenames(Vec<String>),
    /// Bitmap
    Image(NativeImage),
    /// Opaque bytes
    Data(Vec<u8>),
}

#[derive(Default)]
struct Pasteboard {
    change_count: i64,
    owner: Option<Rc<dyn PasteboardOwner>>,
    declared: Vec<(QuartzType, Atom)>,
    values: HashMap<QuartzType, PasteboardValue>,
}

/// The pasteboard server all [`QuartzBackend`]s on a machine share.
#[derive(Clone, Default)]
pub struct QuartzPasteboards {
    inner: Rc<RefCell<HashMap<String, Pasteboard>>>,
}

impl std::fmt::Debug for QuartzPasteboards {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let boards = self.inner.borrow();
        f.debug_struct("QuartzPasteboards")
            .field("pasteboards", &boards.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl QuartzPasteboards {
    /// Empty pasteboard server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored value of `ty` on the named pasteboard.
    pub fn value(&self, pasteboard: &str, ty: &QuartzType) -> Option<PasteboardValue> {
        self.inner.borrow().get(pasteboard).and_then(|pb| pb.values.get(ty).cloned())
    }

    /// Types present on the named pasteboard, declared first.
    pub fn types(&self, pasteboard: &str) -> Vec<QuartzType> {
        let boards = self.inner.borrow();
        let Some(pb) = boards.get(pasteboard) else {
            return Vec::new();
        };
        let mut types: Vec<QuartzType> = Vec::new();
        for ty in pb.declared.iter().map(|(ty, _)| ty).chain(pb.values.keys()) {
            if !types.contains(ty) {
                types.push(ty.clone());
            }
        }
        types
    }
}

/// Pasteboard name used for `selection`.
pub fn pasteboard_name(selection: Atom) -> String {
    if selection == atoms::CLIPBOARD {
        GENERAL_PASTEBOARD.to_string()
    } else {
        format!("_BTK_{}", selection.name())
    }
}

/// One application's view of the [`QuartzPasteboards`].
#[derive(Debug, Clone)]
pub struct QuartzBackend {
    pasteboards: QuartzPasteboards,
}

impl QuartzBackend {
    /// Backend on the given pasteboard server.
    pub fn new(pasteboards: QuartzPasteboards) -> Self {
        Self { pasteboards }
    }

    /// The shared pasteboard server
    pub fn pasteboards(&self) -> &QuartzPasteboards {
        &self.pasteboards
    }

    fn set_value(&self, selection: Atom, ty: QuartzType, value: PasteboardValue) {
        let mut boards = self.pasteboards.inner.borrow_mut();
        boards.entry(pasteboard_name(selection)).or_default().values.insert(ty, value);
    }

    /// Value for `ty`, asking the owner to render its declared target first.
    fn fetch(&self, selection: Atom, ty: &QuartzType) -> Option<PasteboardValue> {
        let name = pasteboard_name(selection);
        if let Some(value) = self.pasteboards.value(&name, ty) {
            return Some(value);
        }

        let (owner, target) = {
            let boards = self.pasteboards.inner.borrow();
            let pb = boards.get(&name)?;
            let target = pb.declared.iter().find(|(t, _)| t == ty).map(|(_, target)| *target)?;
            (pb.owner.clone()?, target)
        };
        trace!(pasteboard = %name, target = %target, "rendering declared type");
        let rendered = owner.provide(target);
        if rendered.is_rejected() {
            return None;
        }
        if let Err(e) = self.put(selection, &rendered) {
            debug!(error = %e, target = %target, "pasteboard render failed");
            return None;
        }
        self.pasteboards.value(&name, ty)
    }

    fn read(&self, selection: Atom, target: Atom) -> SelectionResult<SelectionData> {
        let mut result = SelectionData::new(selection, target);

        match QuartzType::for_target(target) {
            QuartzType::String => {
                if let Some(PasteboardValue::String(text)) = self.fetch(selection, &QuartzType::String) {
                    result.set_text(&text);
                }
            }
            QuartzType::Color => {
                if let Some(PasteboardValue::Color(rgba)) = self.fetch(selection, &QuartzType::Color) {
                    let bytes: Vec<u8> = rgba
                        .iter()
                        .flat_map(|c| ((c.clamp(0.0, 1.0) * 65535.0).round() as u16).to_le_bytes())
                        .collect();
                    result.set(atoms::APPLICATION_X_COLOR, 16, &bytes);
                }
            }
            QuartzType::Url | QuartzType::Filenames => {
                // Rendering the URL also fills in file names when all URIs are local.
                let url = self.fetch(selection, &QuartzType::Url);
                let filenames = self
                    .pasteboards
                    .value(&pasteboard_name(selection), &QuartzType::Filenames);
                let uris = match (filenames, url) {
                    (Some(PasteboardValue::Filenames(paths)), _) => paths.iter().map(|p| path_to_file_uri(p)).collect(),
                    (_, Some(PasteboardValue::Url(url))) => vec![url],
                    _ => Vec::new(),
                };
                if !uris.is_empty() {
                    result.set_uris(&uris);
                }
            }
            QuartzType::Tiff => {
                if let Some(PasteboardValue::Image(image)) = self.fetch(selection, &QuartzType::Tiff) {
                    result.set_pixbuf(&image.to_pixbuf()?);
                }
            }
            other => {
                if let Some(PasteboardValue::Data(bytes)) = self.fetch(selection, &other) {
                    result.set(target, 8, &bytes);
                }
            }
        }
        Ok(result)
    }
}

impl ClipboardBackend for QuartzBackend {
    type PlatformType = QuartzType;

    fn name(&self) -> &'static str {
        "quartz"
    }

    fn declare(&self, selection: Atom, targets: &[Atom], owner: Rc<dyn PasteboardOwner>) -> i64 {
        let mut declared: Vec<(QuartzType, Atom)> = Vec::new();
        for &target in targets {
            let ty = QuartzType::for_target(target);
            if !declared.iter().any(|(t, _)| *t == ty) {
                declared.push((ty, target));
            }
        }

        let (previous, count) = {
            let mut boards = self.pasteboards.inner.borrow_mut();
            let pb = boards.entry(pasteboard_name(selection)).or_default();
            pb.change_count += 1;
            pb.values.clear();
            pb.declared = declared;
            (pb.owner.replace(owner), pb.change_count)
        };
        debug!(selection = %selection, change_count = count, "pasteboard declared");

        if let Some(previous) = previous {
            previous.ownership_lost();
        }
        count
    }

    fn put(&self, selection: Atom, data: &SelectionData) -> SelectionResult<()> {
        if data.is_rejected() {
            return Err(SelectionError::InvalidState("cannot put rejected data".to_string()));
        }
        let target = data.target();

        match QuartzType::for_target(target) {
            QuartzType::String => {
                let text = data
                    .text()
                    .ok_or_else(|| SelectionError::FormatConversion(format!("{target} is not text")))?;
                self.set_value(selection, QuartzType::String, PasteboardValue::String(text));
            }
            QuartzType::Color => {
                if data.format() != 16 || data.data().len() != 8 {
                    return Err(SelectionError::FormatConversion(
                        "color must be four 16-bit channels".to_string(),
                    ));
                }
                let mut rgba = [0.0; 4];
                for (channel, chunk) in rgba.iter_mut().zip(data.data().chunks_exact(2)) {
                    *channel = f64::from(u16::from_le_bytes([chunk[0], chunk[1]])) / 65535.0;
                }
                self.set_value(selection, QuartzType::Color, PasteboardValue::Color(rgba));
            }
            QuartzType::Url | QuartzType::Filenames => {
                let uris = data
                    .uris()
                    .ok_or_else(|| SelectionError::FormatConversion("not a URI list".to_string()))?;
                let Some(first) = uris.first() else {
                    return Err(SelectionError::FormatConversion("empty URI list".to_string()));
                };
                self.set_value(selection, QuartzType::Url, PasteboardValue::Url(first.clone()));

                let paths: Vec<String> = uris.iter().filter_map(|uri| file_uri_to_path(uri)).collect();
                if paths.len() == uris.len() {
                    self.set_value(selection, QuartzType::Filenames, PasteboardValue::Filenames(paths));
                }
            }
            QuartzType::Tiff => {
                let pixbuf = Pixbuf::decode(data.data())?;
                self.set_value(
                    selection,
                    QuartzType::Tiff,
                    PasteboardValue::Image(NativeImage::from_pixbuf(&pixbuf)),
                );
            }
            other => {
                self.set_value(selection, other, PasteboardValue::Data(data.data().to_vec()));
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
        match self.read(selection, target) {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, target = %target, "pasteboard read failed");
                SelectionData::new(selection, target)
            }
        }
    }

    fn available_targets(&self, selection: Atom) -> Vec<Atom> {
        let mut targets = Vec::new();
        for ty in self.pasteboards.types(&pasteboard_name(selection)) {
            let offered: Vec<Atom> = match ty {
                QuartzType::String => vec![atoms::UTF8_STRING, atoms::STRING, atoms::TEXT, atoms::COMPOUND_TEXT],
                QuartzType::Color => vec![atoms::APPLICATION_X_COLOR],
                QuartzType::Url | QuartzType::Filenames => vec![atoms::TEXT_URI_LIST],
                QuartzType::Tiff => codecs()
                    .iter()
                    .filter(|codec| codec.writable)
                    .flat_map(|codec| codec.mime_types.iter().map(|mime| Atom::intern(mime)))
                    .collect(),
                QuartzType::Other(name) => vec![Atom::intern(&name)],
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
        self.pasteboards
            .inner
            .borrow()
            .get(&pasteboard_name(selection))
            .map_or(0, |pb| pb.change_count)
    }

    fn release(&self, selection: Atom) {
        let mut boards = self.pasteboards.inner.borrow_mut();
        if let Some(pb) = boards.get_mut(&pasteboard_name(selection)) {
            pb.change_count += 1;
            pb.owner = None;
            pb.declared.clear();
            pb.values.clear();
        }
    }

    fn format_name_to_platform_type(&self, name: &str) -> QuartzType {
        QuartzType::for_target(Atom::intern(name))
    }

    fn platform_type_to_format_name(&self, ty: &QuartzType) -> String {
        match ty {
            QuartzType::String => atoms::UTF8_STRING.name().to_string(),
            QuartzType::Color => atoms::APPLICATION_X_COLOR.name().to_string(),
            QuartzType::Url | QuartzType::Filenames => atoms::TEXT_URI_LIST.name().to_string(),
            QuartzType::Tiff => atoms::IMAGE_TIFF.name().to_string(),
            QuartzType::Other(name) => name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockPasteboardOwner;

    #[test]
    fn test_pasteboard_names() {
        assert_eq!(pasteboard_name(atoms::CLIPBOARD), GENERAL_PASTEBOARD);
        assert_eq!(pasteboard_name(atoms::PRIMARY), "_BTK_PRIMARY");
    }

    #[test]
    fn test_type_mapping() {
        let backend = QuartzBackend::new(QuartzPasteboards::new());
        assert_eq!(backend.format_name_to_platform_type("UTF8_STRING"), QuartzType::String);
        assert_eq!(backend.format_name_to_platform_type("image/png"), QuartzType::Tiff);
        assert_eq!(
            backend.format_name_to_platform_type("application/x-btk-test"),
            QuartzType::Other("application/x-btk-test".to_string())
        );
        assert_eq!(backend.platform_type_to_format_name(&QuartzType::Filenames), "text/uri-list");
        assert_eq!(QuartzType::Tiff.name(), "NSTIFFPboardType");
    }

    #[test]
    fn test_file_uris_become_filenames() {
        let backend = QuartzBackend::new(QuartzPasteboards::new());
        let mut data = SelectionData::new(atoms::CLIPBOARD, atoms::TEXT_URI_LIST);
        data.set_uris(&["file:///Users/me/a%20b.txt"]);
        backend.put(atoms::CLIPBOARD, &data).unwrap();

        assert_eq!(
            backend.pasteboards().value(GENERAL_PASTEBOARD, &QuartzType::Filenames),
            Some(PasteboardValue::Filenames(vec!["/Users/me/a b.txt".to_string()]))
        );
        let read = backend.get(atoms::CLIPBOARD, atoms::TEXT_URI_LIST);
        assert_eq!(read.uris().unwrap(), vec!["file:///Users/me/a%20b.txt"]);
    }

    #[test]
    fn test_web_url_has_no_filenames() {
        let backend = QuartzBackend::new(QuartzPasteboards::new());
        let mut data = SelectionData::new(atoms::CLIPBOARD, atoms::TEXT_URI_LIST);
        data.set_uris(&["https://example.org/"]);
        backend.put(atoms::CLIPBOARD, &data).unwrap();

        assert!(backend
            .pasteboards()
            .value(GENERAL_PASTEBOARD, &QuartzType::Filenames)
            .is_none());
        let read = backend.get(atoms::CLIPBOARD, atoms::TEXT_URI_LIST);
        assert_eq!(read.uris().unwrap(), vec!["https://example.org/"]);
    }

    #[test]
    fn test_color_roundtrip() {
        let backend = QuartzBackend::new(QuartzPasteboards::new());
        let mut data = SelectionData::new(atoms::CLIPBOARD, atoms::APPLICATION_X_COLOR);
        let channels: Vec<u8> = [65535u16, 0, 32768, 65535].iter().flat_map(|c| c.to_le_bytes()).collect();
        data.set(atoms::APPLICATION_X_COLOR, 16, &channels);
        backend.put(atoms::CLIPBOARD, &data).unwrap();

        let read = backend.get(atoms::CLIPBOARD, atoms::APPLICATION_X_COLOR);
        assert_eq!(read.format(), 16);
        assert_eq!(read.data(), &channels[..]);
    }

    #[test]
    fn test_image_stored_as_bitmap() {
        let backend = QuartzBackend::new(QuartzPasteboards::new());
        let mut pixbuf = Pixbuf::new(true, 3, 2);
        pixbuf.put_pixel(2, 1, &[1, 2, 3, 255]);

        let mut png = SelectionData::new(atoms::CLIPBOARD, atoms::IMAGE_PNG);
        assert!(png.set_pixbuf(&pixbuf));
        backend.put(atoms::CLIPBOARD, &png).unwrap();

        let targets = backend.available_targets(atoms::CLIPBOARD);
        assert!(targets.contains(&atoms::IMAGE_PNG));
        assert!(targets.contains(&atoms::IMAGE_TIFF));
        assert!(!targets.contains(&atoms::IMAGE_GIF));

        let read = backend.get(atoms::CLIPBOARD, atoms::IMAGE_PNG);
        assert_eq!(read.pixbuf().unwrap(), pixbuf);
    }

    #[test]
    fn test_declared_type_rendered_on_demand() {
        let backend = QuartzBackend::new(QuartzPasteboards::new());
        let mut owner = MockPasteboardOwner::new();
        owner.expect_provide().times(1).returning(|target| {
            let mut data = SelectionData::new(atoms::CLIPBOARD, target);
            data.set_text("rendered");
            data
        });
        owner.expect_ownership_lost().times(1).return_const(());

        let count = backend.declare(atoms::CLIPBOARD, &[atoms::UTF8_STRING, atoms::STRING], Rc::new(owner));
        assert_eq!(count, 1);
        assert_eq!(backend.pasteboards().types(GENERAL_PASTEBOARD), vec![QuartzType::String]);

        assert_eq!(backend.get(atoms::CLIPBOARD, atoms::STRING).text().as_deref(), Some("rendered"));
        assert_eq!(backend.get(atoms::CLIPBOARD, atoms::UTF8_STRING).text().as_deref(), Some("rendered"));

        let mut replacement = MockPasteboardOwner::new();
        replacement.expect_provide().never();
        assert_eq!(backend.declare(atoms::CLIPBOARD, &[], Rc::new(replacement)), 2);
    }
}
