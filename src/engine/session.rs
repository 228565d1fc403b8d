//! Page session: owns the live document and every engine component for one
//! page view, and is driven by the host through [`Session::poll`] plus the
//! interaction and command entry points.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Instant;

use crate::dom::filter::{TextFilter, DEFINITIONS_HIDDEN_CLASS, FAB_ID};
use crate::dom::{Document, NodeId};
use crate::engine::matcher::MatchCompiler;
use crate::engine::render::{
    self, annotation_for, highlight_text, is_css_color, set_caption_state, unwrap_annotations,
    update_captions, update_colors, wrap_range, Annotation, CaptionState, RenderStats, FAILED_CAPTION,
};
use crate::engine::selection::{
    self, hide_action_control, show_action_control, Activation, SelectionFlow, SelectionState, Viewport,
    DEFAULT_CONTROL_SIZE,
};
use crate::engine::watch::{WatchLoop, WatchState};
use crate::error::{Error, PronounceError, Result, TranslateError};
use crate::messages::Command;
use crate::net::{DictionaryPronouncer, GoogleTranslator, Pronouncer, TranslationRequest, Translator};
use crate::settings::{EngineConfig, Settings};
use crate::vocab::store::KeyValueStore;
use crate::vocab::{VocabularyEntry, VocabularyIndex};

pub type SharedTranslator = Arc<dyn Translator + Send + Sync>;
pub type SharedPronouncer = Arc<dyn Pronouncer + Send + Sync>;

/// Something the host should show or play.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Notice(String),
    PlayAudio { url: String },
    /// Local speech fallback when no recording was found.
    Speak { text: String, lang: String },
    Annotated { word: String },
    TranslationFailed { word: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MenuAction {
    Delete,
    /// Set (`Some`) or clear (`None`) the word's color override.
    Recolor(Option<String>),
    Pronounce,
}

/// Inline edit opened from a caption.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionEdit {
    pub annotation: Annotation,
    pub word: String,
    pub current: String,
}

/// Action menu opened from a highlight.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionMenu {
    pub annotation: Annotation,
    pub word: String,
    pub palette: Vec<String>,
}

struct PendingPronunciation {
    word: String,
    rx: Receiver<std::result::Result<String, PronounceError>>,
}

pub struct Session {
    doc: Document,
    page_url: String,
    store: Box<dyn KeyValueStore>,
    index: VocabularyIndex,
    compiler: MatchCompiler,
    filter: TextFilter,
    watch: WatchLoop,
    selection: SelectionFlow,
    settings: Settings,
    config: EngineConfig,
    translator: SharedTranslator,
    pronouncer: SharedPronouncer,
    viewport: Viewport,
    control_size: (f32, f32),
    open_menu: Option<ActionMenu>,
    translation_rx: Option<Receiver<std::result::Result<String, TranslateError>>>,
    pronunciation: Option<PendingPronunciation>,
    events: Vec<SessionEvent>,
    context_valid: bool,
    enabled: bool,
}

impl Session {
    pub fn new(doc: Document, store: Box<dyn KeyValueStore>, config: EngineConfig) -> Self {
        let page_url = doc.url.clone();
        Self {
            doc,
            index: VocabularyIndex::new(page_url.clone()),
            page_url,
            store,
            compiler: MatchCompiler::new(config.boundary),
            filter: TextFilter::new(),
            watch: WatchLoop::new(config.debounce()),
            selection: SelectionFlow::new(config.settle(), config.max_selection_words),
            settings: Settings::default(),
            translator: Arc::new(GoogleTranslator::new(config.translate_timeout())),
            pronouncer: Arc::new(DictionaryPronouncer::default()),
            config,
            viewport: Viewport::default(),
            control_size: DEFAULT_CONTROL_SIZE,
            open_menu: None,
            translation_rx: None,
            pronunciation: None,
            events: Vec::new(),
            context_valid: true,
            enabled: false,
        }
    }

    pub fn with_translator(mut self, translator: SharedTranslator) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_pronouncer(mut self, pronouncer: SharedPronouncer) -> Self {
        self.pronouncer = pronouncer;
        self
    }

    pub fn with_filter(mut self, filter: TextFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Host-side access for page scripts; changes are picked up on the next poll.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    pub fn vocabulary(&self) -> &VocabularyIndex {
        &self.index
    }

    pub fn compiler(&self) -> &MatchCompiler {
        &self.compiler
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn selection_state(&self) -> &SelectionState {
        self.selection.state()
    }

    pub fn watch_state(&self) -> WatchState {
        self.watch.state()
    }

    pub fn pending_work(&self) -> usize {
        self.watch.pending_len()
    }

    pub fn open_menu(&self) -> Option<&ActionMenu> {
        self.open_menu.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_context_valid(&self) -> bool {
        self.context_valid
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Measured size of the floating control.
    pub fn set_control_size(&mut self, size: (f32, f32)) {
        self.control_size = size;
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.context_valid {
            Ok(())
        } else {
            Err(Error::ContextInvalidated)
        }
    }

    fn page_host(&self) -> Option<String> {
        url::Url::parse(&self.page_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Load settings and, unless this site is disabled, annotate the page and
    /// start observing it.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_valid()?;
        self.settings = Settings::load(self.store.as_ref())?;
        let disabled = self
            .page_host()
            .map(|h| self.settings.is_site_disabled(&h))
            .unwrap_or(false);
        if disabled {
            log::info!("annotation is disabled for {}", self.page_url);
            self.enabled = false;
            return Ok(());
        }
        self.attach()
    }

    fn attach(&mut self) -> Result<()> {
        let url = self.page_url.clone();
        self.index.load(self.store.as_ref(), &url)?;
        self.enabled = true;

        let palette = self.settings.color_palette.clone();
        let theme = self.settings.theme_color.clone();
        self.watch.suspended(&mut self.doc, |doc| {
            if doc.get_element_by_id(FAB_ID).is_none() {
                selection::create_action_control(doc, &palette);
            }
            if let Some(color) = theme.as_deref() {
                apply_theme(doc, color);
            }
        });
        let stats = self.render_page();
        log::info!(
            "session started for {} ({} words, {} annotations)",
            self.page_url,
            self.index.entries().len(),
            stats.annotations
        );

        self.watch.clear();
        self.doc.take_records();
        self.watch.observe(&mut self.doc);
        Ok(())
    }

    /// Remove every trace of the engine from the page and stop observing.
    fn teardown(&mut self) {
        self.watch.suspend(&mut self.doc);
        self.watch.clear();
        self.doc.take_records();
        self.translation_rx = None;
        self.pronunciation = None;
        self.open_menu = None;
        self.selection.reset();

        if let Some(body) = self.doc.body() {
            let removed = unwrap_annotations(&mut self.doc, body, None);
            log::debug!("teardown removed {} annotations", removed);
        }
        if let Some(fab) = self.doc.get_element_by_id(FAB_ID) {
            match self.doc.remove(fab) {
                Ok(()) => {
                    let _ = self.doc.release(fab);
                }
                Err(e) => log::warn!("could not remove action control: {}", e),
            }
        }
    }

    pub fn disable(&mut self) -> Result<()> {
        self.ensure_valid()?;
        if self.enabled {
            self.teardown();
            self.enabled = false;
            log::info!("annotation disabled for {}", self.page_url);
        }
        Ok(())
    }

    pub fn enable(&mut self) -> Result<()> {
        self.ensure_valid()?;
        if self.enabled {
            return Ok(());
        }
        self.attach()
    }

    /// Tear down and rebuild all annotations from the stored vocabulary.
    pub fn reload(&mut self) -> Result<()> {
        self.ensure_valid()?;
        if !self.enabled {
            return Ok(());
        }
        self.teardown();
        self.attach()
    }

    /// The hosting context is gone: stop touching the page.
    pub fn invalidate_context(&mut self) {
        if !self.context_valid {
            return;
        }
        log::warn!("hosting context invalidated for {}", self.page_url);
        self.context_valid = false;
        self.watch.suspend(&mut self.doc);
        self.watch.clear();
        self.translation_rx = None;
        self.pronunciation = None;
        self.open_menu = None;
        self.selection.reset();
        self.events.push(SessionEvent::Notice(Error::ContextInvalidated.to_string()));
    }

    /// Render the whole body with observation suspended.
    fn render_page(&mut self) -> RenderStats {
        let Some(body) = self.doc.body() else {
            return RenderStats::default();
        };
        let Some(pattern) = self.compiler.compile(self.index.entries()) else {
            return RenderStats::default();
        };
        let entries = self.index.entries();
        let filter = &self.filter;
        self.watch
            .suspended(&mut self.doc, |doc| render::render(doc, entries, &pattern, body, filter))
    }

    // ─── Event loop ─────────────────────────────────────────────────────

    /// One tick of the host event loop.
    pub fn poll(&mut self, now: Instant) -> Result<()> {
        self.ensure_valid()?;
        if !self.enabled {
            return Ok(());
        }
        let translated = self.poll_translation(now);
        self.poll_pronunciation();
        self.poll_selection(now);

        let records = self.doc.take_records();
        if !records.is_empty() {
            self.watch.on_mutations(&self.doc, records, now);
        }
        if self.watch.is_due(now) {
            let pattern = self.compiler.compile(self.index.entries());
            let entries = self.index.entries();
            let filter = &self.filter;
            self.watch.drain(&mut self.doc, now, |doc, node| {
                if let Some(pattern) = &pattern {
                    render::render(doc, entries, pattern, node, filter);
                }
            });
        }
        translated
    }

    fn poll_translation(&mut self, now: Instant) -> Result<()> {
        let Some(rx) = &self.translation_rx else {
            return Ok(());
        };
        let outcome = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => {
                let expired = self.selection.pending_deadline().map(|d| now >= d).unwrap_or(true);
                if !expired {
                    return Ok(());
                }
                Err(TranslateError::Timeout)
            }
            Err(TryRecvError::Disconnected) => Err(TranslateError::Request("translation worker stopped".into())),
        };
        self.translation_rx = None;
        let Some((word, color, annotation)) = self.selection.take_pending() else {
            return Ok(());
        };
        self.finish_translation(word, color, annotation, outcome)
    }

    fn finish_translation(
        &mut self,
        word: String,
        color: Option<String>,
        annotation: Option<Annotation>,
        outcome: std::result::Result<String, TranslateError>,
    ) -> Result<()> {
        let (translation, caption, state) = match outcome {
            Ok(text) => (text.clone(), text, CaptionState::Ready),
            Err(e) => {
                log::warn!("translation of '{}' failed: {}", word, e);
                self.events.push(SessionEvent::TranslationFailed {
                    word: word.clone(),
                    reason: e.to_string(),
                });
                (String::new(), FAILED_CAPTION.to_string(), CaptionState::Failed)
            }
        };

        let annotation = annotation.filter(|a| self.doc.is_attached(a.wrapper));
        let entry = VocabularyEntry::new(word.clone(), translation, self.page_url.clone()).with_color(color);
        if let Err(e) = self.index.add(self.store.as_mut(), entry) {
            // Nothing was saved; drop the placeholder.
            if let Some(annotation) = annotation {
                self.watch.suspended(&mut self.doc, |doc| {
                    unwrap_annotations(doc, annotation.wrapper, None);
                });
            }
            self.selection.reset();
            self.events.push(SessionEvent::Notice(format!("could not save \"{}\": {}", word, e)));
            return Err(e);
        }

        if let Some(annotation) = annotation {
            self.watch.suspended(&mut self.doc, |doc| {
                if let Err(e) = doc.set_text_content(annotation.caption, caption) {
                    log::warn!("could not update pending caption: {}", e);
                }
                set_caption_state(doc, annotation.caption, state);
            });
        }
        self.render_page();
        self.selection.finish(word.clone());
        if state == CaptionState::Ready {
            self.events.push(SessionEvent::Annotated { word });
        }
        Ok(())
    }

    fn poll_pronunciation(&mut self) {
        let Some(pending) = &self.pronunciation else {
            return;
        };
        let outcome = match pending.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err(PronounceError::Request("pronunciation worker stopped".into())),
        };
        let word = pending.word.clone();
        self.pronunciation = None;
        match outcome {
            Ok(url) => self.events.push(SessionEvent::PlayAudio { url }),
            Err(e) => {
                log::warn!("pronunciation of '{}' unavailable: {}", word, e);
                let lang = match self.settings.source_language.as_str() {
                    "" | "auto" => "en-US".to_string(),
                    other => other.to_string(),
                };
                self.events.push(SessionEvent::Speak { text: word, lang });
            }
        }
    }

    fn poll_selection(&mut self, now: Instant) {
        if !self.selection.settle_due(now) {
            return;
        }
        if self.selection.settle(&self.doc, &self.viewport, self.control_size, now) {
            if let SelectionState::Selected(captured) = self.selection.state() {
                show_action_control(&mut self.doc, captured.control_position);
            }
        } else if self.selection.is_idle() {
            hide_action_control(&mut self.doc);
        }
    }

    // ─── Selection flow ─────────────────────────────────────────────────

    /// Pointer released over the page.
    pub fn pointer_up(&mut self, now: Instant) -> Result<()> {
        self.ensure_valid()?;
        if self.enabled {
            self.selection.pointer_up(now);
        }
        Ok(())
    }

    /// Floating control pressed, optionally with a palette color.
    pub fn activate(&mut self, color: Option<String>, now: Instant) -> Result<()> {
        self.ensure_valid()?;
        if let Some(c) = color.as_deref() {
            if !is_css_color(c) {
                return Err(Error::Validation(format!("invalid color {:?}", c)));
            }
        }
        match self.selection.activate(color, self.settings.auto_translate) {
            Activation::Ignored => Ok(()),
            Activation::AwaitingInput => {
                hide_action_control(&mut self.doc);
                Ok(())
            }
            Activation::Translate { selection, color } => {
                hide_action_control(&mut self.doc);
                let word = selection.text.clone();
                let url = self.page_url.clone();
                let range = selection.range.filter(|r| self.filter.accepts(&self.doc, r.node));
                let annotation = range.and_then(|range| {
                    let color = color.as_deref();
                    self.watch
                        .suspended(&mut self.doc, |doc| wrap_range(doc, &range, None, &url, color))
                        .map_err(|e| log::warn!("could not place pending annotation: {}", e))
                        .ok()
                });
                self.doc.set_selection(None);

                let request = TranslationRequest::new(
                    word.clone(),
                    self.settings.source_language.clone(),
                    self.settings.target_language.clone(),
                );
                let translator = Arc::clone(&self.translator);
                let (tx, rx) = mpsc::channel();
                std::thread::spawn(move || {
                    let _ = tx.send(translator.translate(&request));
                });
                self.translation_rx = Some(rx);

                let deadline = now + self.config.translate_timeout();
                self.selection.begin_translation(word, color, annotation, deadline);
                Ok(())
            }
        }
    }

    /// Complete manual input. `None` or blank text cancels the flow.
    pub fn submit_manual(&mut self, translation: Option<&str>) -> Result<()> {
        self.ensure_valid()?;
        let Some((selection, color)) = self.selection.take_manual() else {
            return Ok(());
        };
        let Some(translation) = translation.map(str::trim).filter(|t| !t.is_empty()) else {
            log::debug!("manual translation cancelled for '{}'", selection.text);
            self.doc.set_selection(None);
            return Ok(());
        };

        let word = selection.text.clone();
        let entry = VocabularyEntry::new(word.clone(), translation, self.page_url.clone()).with_color(color.clone());
        self.index.add(self.store.as_mut(), entry)?;

        let url = self.page_url.clone();
        if let Some(range) = selection.range.filter(|r| self.filter.accepts(&self.doc, r.node)) {
            let placed = self.watch.suspended(&mut self.doc, |doc| {
                wrap_range(doc, &range, Some(translation), &url, color.as_deref())
            });
            if let Err(e) = placed {
                log::warn!("could not place annotation: {}", e);
            }
        }
        self.doc.set_selection(None);
        self.render_page();
        self.selection.finish(word.clone());
        self.events.push(SessionEvent::Annotated { word });
        Ok(())
    }

    /// Abandon the selection flow. A pending annotation is removed and
    /// nothing is persisted.
    pub fn cancel_selection(&mut self) -> Result<()> {
        self.ensure_valid()?;
        if let Some((word, _, annotation)) = self.selection.take_pending() {
            self.translation_rx = None;
            if let Some(annotation) = annotation {
                self.watch.suspended(&mut self.doc, |doc| {
                    unwrap_annotations(doc, annotation.wrapper, None);
                });
            }
            log::debug!("selection flow for '{}' cancelled", word);
        }
        self.selection.reset();
        hide_action_control(&mut self.doc);
        Ok(())
    }

    // ─── Annotation interaction ─────────────────────────────────────────

    /// Clicked a caption: open the inline translation editor.
    pub fn click_caption(&mut self, node: NodeId) -> Result<Option<CaptionEdit>> {
        self.ensure_valid()?;
        let Some(annotation) = annotation_for(&self.doc, node) else {
            return Ok(None);
        };
        let word = highlight_text(&self.doc, &annotation);
        let current = self
            .index
            .find(&word)
            .map(|e| e.translation.clone())
            .unwrap_or_default();
        Ok(Some(CaptionEdit {
            annotation,
            word,
            current,
        }))
    }

    /// Save an edited translation and update every caption for the word.
    pub fn edit_translation(&mut self, word: &str, translation: &str) -> Result<()> {
        self.ensure_valid()?;
        let translation = translation.trim();
        if translation.is_empty() {
            return Err(Error::Validation("translation must not be empty".into()));
        }
        let url = self.page_url.clone();
        self.index
            .update_translation(self.store.as_mut(), word, &url, translation)?;
        if let Some(body) = self.doc.body() {
            self.watch.suspended(&mut self.doc, |doc| {
                update_captions(doc, body, word, translation);
            });
        }
        Ok(())
    }

    /// Clicked a highlight: open its action menu, replacing any open one.
    pub fn click_highlight(&mut self, node: NodeId) -> Result<Option<ActionMenu>> {
        self.ensure_valid()?;
        let Some(annotation) = annotation_for(&self.doc, node) else {
            self.open_menu = None;
            return Ok(None);
        };
        let menu = ActionMenu {
            word: highlight_text(&self.doc, &annotation),
            annotation,
            palette: self.settings.color_palette.clone(),
        };
        self.open_menu = Some(menu.clone());
        Ok(Some(menu))
    }

    pub fn close_menu(&mut self) {
        self.open_menu = None;
    }

    /// Run an action from the open menu, closing it.
    pub fn choose_action(&mut self, action: MenuAction) -> Result<()> {
        self.ensure_valid()?;
        let menu = self
            .open_menu
            .take()
            .ok_or_else(|| Error::Validation("no action menu is open".into()))?;
        match action {
            MenuAction::Delete => self.delete_word(&menu.word),
            MenuAction::Recolor(color) => self.recolor(&menu.word, color.as_deref()),
            MenuAction::Pronounce => {
                self.pronounce(&menu.word);
                Ok(())
            }
        }
    }

    /// Delete the `(word, page url)` entry and unwrap its annotations.
    pub fn delete_word(&mut self, word: &str) -> Result<()> {
        self.ensure_valid()?;
        let url = self.page_url.clone();
        let removed = self.index.remove(self.store.as_mut(), word, &url)?;
        let unwrapped = self.unwrap_word(word);
        log::info!("deleted '{}' ({} records, {} annotations)", word, removed, unwrapped);
        Ok(())
    }

    fn unwrap_word(&mut self, word: &str) -> usize {
        let Some(body) = self.doc.body() else {
            return 0;
        };
        self.watch
            .suspended(&mut self.doc, |doc| unwrap_annotations(doc, body, Some(word)))
    }

    pub fn recolor(&mut self, word: &str, color: Option<&str>) -> Result<()> {
        self.ensure_valid()?;
        if let Some(c) = color {
            if !is_css_color(c) {
                return Err(Error::Validation(format!("invalid color {:?}", c)));
            }
        }
        let url = self.page_url.clone();
        self.index.update_color(self.store.as_mut(), word, &url, color)?;
        if let Some(body) = self.doc.body() {
            update_colors(&mut self.doc, body, word, color);
        }
        Ok(())
    }

    /// Look up a recording in the background; the result arrives as an event.
    pub fn pronounce(&mut self, word: &str) {
        let pronouncer = Arc::clone(&self.pronouncer);
        let language = self.settings.source_language.clone();
        let owned = word.to_string();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(pronouncer.audio_url(&owned, &language));
        });
        self.pronunciation = Some(PendingPronunciation {
            word: word.to_string(),
            rx,
        });
    }

    // ─── Commands ───────────────────────────────────────────────────────

    /// Apply a management command. Every command is idempotent.
    pub fn handle_command(&mut self, command: Command) -> Result<()> {
        self.ensure_valid()?;
        log::debug!("command: {:?}", command);
        match command {
            Command::DeleteWord { word } => {
                self.index.remove_local(&word);
                self.unwrap_word(&word);
            }
            Command::UpdateColor { color } => {
                if !is_css_color(&color) {
                    return Err(Error::Validation(format!("invalid color {:?}", color)));
                }
                apply_theme(&mut self.doc, &color);
                self.settings.theme_color = Some(color);
            }
            Command::UpdatePalette { palette } => {
                let palette: Vec<String> = palette.into_iter().filter(|c| is_css_color(c)).collect();
                self.watch
                    .suspended(&mut self.doc, |doc| selection::update_palette(doc, &palette));
                self.settings.color_palette = palette;
            }
            Command::ToggleExtension { disabled } => {
                if disabled {
                    self.disable()?;
                } else {
                    self.enable()?;
                }
            }
            Command::ToggleDefinitions { visible } => {
                if let Some(body) = self.doc.body() {
                    if visible {
                        self.doc.remove_class(body, DEFINITIONS_HIDDEN_CLASS);
                    } else {
                        self.doc.add_class(body, DEFINITIONS_HIDDEN_CLASS);
                    }
                }
            }
            Command::RefreshVocabulary => self.reload()?,
        }
        Ok(())
    }
}

/// Expose the theme color to page styles and tint the floating control.
fn apply_theme(doc: &mut Document, color: &str) {
    if let Some(html) = doc.document_element() {
        doc.set_attr(html, "data-vo-theme", color);
    }
    if let Some(main) = doc.get_element_by_id("vo-fab-main") {
        doc.set_attr(main, "style", format!("background-color: {}", color));
    }
}
