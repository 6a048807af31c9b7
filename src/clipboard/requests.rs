//! Retrieving clipboard contents.
//!
//! Every `request_*` call completes its callback exactly once, with empty
//! results on failure. The typed requests walk a fixed fallback chain of
//! targets, moving on only when a step produced nothing usable. The
//! `wait_*` variants spin the main loop until the matching request
//! completes, so anything else scheduled on the loop may run meanwhile.

use std::future::Future;

use btk_selection_core::image::Pixbuf;
use btk_selection_core::{
    atoms, targets_include_image, targets_include_rich_text, targets_include_text, targets_include_uri, Atom,
    SelectionData,
};
use futures::channel::oneshot;
use tracing::trace;

use super::Clipboard;

const TEXT_CHAIN: [Atom; 3] = [atoms::UTF8_STRING, atoms::COMPOUND_TEXT, atoms::STRING];

const IMAGE_CHAIN: [Atom; 4] = [atoms::IMAGE_PNG, atoms::IMAGE_JPEG, atoms::IMAGE_GIF, atoms::IMAGE_BMP];

impl Clipboard {
    /// Retrieve `target` from whoever owns the selection.
    pub fn request_contents<F>(&self, target: Atom, callback: F)
    where
        F: FnOnce(&Clipboard, &SelectionData) + 'static,
    {
        self.check_stale();
        let clipboard = self.clone();
        trace!(selection = %self.selection(), target = %target, "clipboard request");
        self.inner
            .platform
            .request(self, target, Box::new(move |data| callback(&clipboard, data)));
    }

    /// [`request_contents`](Self::request_contents) as a future.
    ///
    /// Dropping the future abandons the result; the retrieval itself still
    /// runs to completion or timeout.
    pub fn request_contents_future(&self, target: Atom) -> impl Future<Output = SelectionData> {
        let fallback = SelectionData::for_display(self.display().id(), self.selection(), target);
        let (tx, rx) = oneshot::channel();
        self.request_contents(target, move |_, data| {
            let _ = tx.send(data.clone());
        });
        async move { rx.await.unwrap_or(fallback) }
    }

    /// Retrieve the contents as text, trying UTF8_STRING, COMPOUND_TEXT and
    /// STRING in that order.
    pub fn request_text<F>(&self, callback: F)
    where
        F: FnOnce(&Clipboard, Option<&str>) + 'static,
    {
        self.request_text_from(0, callback);
    }

    fn request_text_from<F>(&self, step: usize, callback: F)
    where
        F: FnOnce(&Clipboard, Option<&str>) + 'static,
    {
        let Some(&target) = TEXT_CHAIN.get(step) else {
            callback(self, None);
            return;
        };
        self.request_contents(target, move |clipboard, data| match data.text() {
            Some(text) => callback(clipboard, Some(&text)),
            None => clipboard.request_text_from(step + 1, callback),
        });
    }

    /// Retrieve the first of `formats` the owner provides.
    ///
    /// The callback gets the format that answered, or `NONE` and no data.
    pub fn request_rich_text<F>(&self, formats: &[Atom], callback: F)
    where
        F: FnOnce(&Clipboard, Atom, Option<&[u8]>) + 'static,
    {
        self.request_rich_text_from(formats.to_vec(), 0, callback);
    }

    fn request_rich_text_from<F>(&self, formats: Vec<Atom>, step: usize, callback: F)
    where
        F: FnOnce(&Clipboard, Atom, Option<&[u8]>) + 'static,
    {
        let Some(&format) = formats.get(step) else {
            callback(self, atoms::NONE, None);
            return;
        };
        self.request_contents(format, move |clipboard, data| {
            if data.length() > 0 {
                callback(clipboard, format, Some(data.data()));
            } else {
                clipboard.request_rich_text_from(formats, step + 1, callback);
            }
        });
    }

    /// Retrieve the contents as an image, trying PNG, JPEG, GIF and BMP.
    pub fn request_image<F>(&self, callback: F)
    where
        F: FnOnce(&Clipboard, Option<Pixbuf>) + 'static,
    {
        self.request_image_from(0, callback);
    }

    fn request_image_from<F>(&self, step: usize, callback: F)
    where
        F: FnOnce(&Clipboard, Option<Pixbuf>) + 'static,
    {
        let Some(&target) = IMAGE_CHAIN.get(step) else {
            callback(self, None);
            return;
        };
        self.request_contents(target, move |clipboard, data| match data.pixbuf() {
            Some(pixbuf) => callback(clipboard, Some(pixbuf)),
            None => clipboard.request_image_from(step + 1, callback),
        });
    }

    /// Retrieve a `text/uri-list`.
    pub fn request_uris<F>(&self, callback: F)
    where
        F: FnOnce(&Clipboard, Option<Vec<String>>) + 'static,
    {
        self.request_contents(atoms::TEXT_URI_LIST, move |clipboard, data| {
            callback(clipboard, data.uris());
        });
    }

    /// Retrieve the targets the owner offers; empty if there is no owner.
    ///
    /// Answered from the cache when owner changes are reported, which keeps
    /// it valid.
    pub fn request_targets<F>(&self, callback: F)
    where
        F: FnOnce(&Clipboard, &[Atom]) + 'static,
    {
        let cached = self.inner.state.borrow().cached_targets.clone();
        if let Some(targets) = cached {
            trace!(selection = %self.selection(), "targets answered from cache");
            callback(self, &targets);
            return;
        }

        self.request_contents(atoms::TARGETS, move |clipboard, data| {
            let targets = data.targets().unwrap_or_default();
            if clipboard.caches_targets() {
                clipboard.state().cached_targets = Some(targets.clone());
            }
            callback(clipboard, &targets);
        });
    }

    fn caches_targets(&self) -> bool {
        self.inner.platform.supports_owner_change(self)
            && self
                .context()
                .is_some_and(|context| context.clipboard_policy().cache_targets)
    }

    // =========================================================================
    // Waiting
    // =========================================================================

    fn wait<T: 'static>(&self, start: impl FnOnce(oneshot::Sender<T>)) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        start(tx);
        let context = self.context()?;
        context.main_loop().block_on(rx).and_then(Result::ok)
    }

    /// Block until `target` is retrieved; rejected data on failure.
    pub fn wait_for_contents(&self, target: Atom) -> SelectionData {
        let fallback = SelectionData::for_display(self.display().id(), self.selection(), target);
        let future = self.request_contents_future(target);
        self.context()
            .and_then(|context| context.main_loop().block_on(future))
            .unwrap_or(fallback)
    }

    /// Block until the contents are retrieved as text.
    pub fn wait_for_text(&self) -> Option<String> {
        self.wait(|tx| {
            self.request_text(move |_, text| {
                let _ = tx.send(text.map(str::to_owned));
            });
        })
        .flatten()
    }

    /// Block until one of `formats` is retrieved.
    pub fn wait_for_rich_text(&self, formats: &[Atom]) -> Option<(Atom, Vec<u8>)> {
        self.wait(|tx| {
            self.request_rich_text(formats, move |_, format, data| {
                let _ = tx.send(data.map(|data| (format, data.to_vec())));
            });
        })
        .flatten()
    }

    /// Block until the contents are retrieved as an image.
    pub fn wait_for_image(&self) -> Option<Pixbuf> {
        self.wait(|tx| {
            self.request_image(move |_, pixbuf| {
                let _ = tx.send(pixbuf);
            });
        })
        .flatten()
    }

    /// Block until a URI list is retrieved.
    pub fn wait_for_uris(&self) -> Option<Vec<String>> {
        self.wait(|tx| {
            self.request_uris(move |_, uris| {
                let _ = tx.send(uris);
            });
        })
        .flatten()
    }

    /// Block until the offered targets are known; `None` if nothing is
    /// offered.
    pub fn wait_for_targets(&self) -> Option<Vec<Atom>> {
        self.wait(|tx| {
            self.request_targets(move |_, targets| {
                let _ = tx.send(targets.to_vec());
            });
        })
        .filter(|targets| !targets.is_empty())
    }

    /// True if the owner offers a text target.
    pub fn wait_is_text_available(&self) -> bool {
        self.wait_for_targets()
            .is_some_and(|targets| targets_include_text(&targets))
    }

    /// True if the owner offers one of `formats`.
    pub fn wait_is_rich_text_available(&self, formats: &[Atom]) -> bool {
        self.wait_for_targets()
            .is_some_and(|targets| targets_include_rich_text(&targets, formats))
    }

    /// True if the owner offers an image this crate can decode.
    pub fn wait_is_image_available(&self) -> bool {
        self.wait_for_targets()
            .is_some_and(|targets| targets_include_image(&targets, false))
    }

    /// True if the owner offers a URI list.
    pub fn wait_is_uris_available(&self) -> bool {
        self.wait_for_targets()
            .is_some_and(|targets| targets_include_uri(&targets))
    }

    /// True if the owner offers `target`.
    pub fn wait_is_target_available(&self, target: Atom) -> bool {
        self.wait_for_targets()
            .is_some_and(|targets| targets.contains(&target))
    }
}
