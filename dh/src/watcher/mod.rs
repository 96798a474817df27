//! Directory watcher for template roots
//!
//! The notify callback runs on notify's own thread. It only classifies
//! events and sends them over a channel; the engine applies them on its own
//! thread between requests.

mod config;

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use config::WatcherConfig;

use crate::engine::Engine;
use crate::engine::loader::EXTENSION;
use crate::error::Result;

/// A template file appeared, changed, or went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Changed(PathBuf),
    Removed(PathBuf),
}

fn is_template(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == EXTENSION)
}

/// Template changes described by one notify event
pub fn classify(event: &Event) -> Vec<ChangeEvent> {
    let templates = || event.paths.iter().filter(|p| is_template(p)).cloned();
    match &event.kind {
        EventKind::Create(_) => templates().map(ChangeEvent::Changed).collect(),
        EventKind::Remove(_) => templates().map(ChangeEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => templates().map(ChangeEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::new();
            if let Some(from) = event.paths.first().filter(|p| is_template(p)) {
                changes.push(ChangeEvent::Removed(from.clone()));
            }
            if let Some(to) = event.paths.get(1).filter(|p| is_template(p)) {
                changes.push(ChangeEvent::Changed(to.clone()));
            }
            changes
        }
        EventKind::Modify(ModifyKind::Name(_)) => templates()
            .map(|path| {
                if path.exists() {
                    ChangeEvent::Changed(path)
                } else {
                    ChangeEvent::Removed(path)
                }
            })
            .collect(),
        EventKind::Modify(_) => templates().map(ChangeEvent::Changed).collect(),
        _ => Vec::new(),
    }
}

/// Keeps the notify watcher alive; dropping it stops the events
pub struct TemplateWatcher {
    _watcher: RecommendedWatcher,
}

impl TemplateWatcher {
    /// Watch every root recursively
    pub fn start(roots: &[PathBuf]) -> Result<(Self, mpsc::UnboundedReceiver<ChangeEvent>)> {
        debug!(?roots, "TemplateWatcher::start: called");
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                for change in classify(&event) {
                    if tx.send(change).is_err() {
                        debug!("TemplateWatcher: receiver dropped");
                        return;
                    }
                }
            }
            Err(err) => warn!(error = %err, "Watch error"),
        })?;
        for root in roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            info!(root = %root.display(), "Watching template root");
        }
        Ok((Self { _watcher: watcher }, rx))
    }
}

/// Apply one change to the engine
pub fn apply(engine: &Engine, change: &ChangeEvent, config: &WatcherConfig) {
    debug!(?change, "apply: called");
    match change {
        ChangeEvent::Changed(path) => {
            if engine.reload(path).is_none() {
                warn!(path = %path.display(), "Change was not applied to any module");
            }
        }
        ChangeEvent::Removed(path) if config.rescan_on_remove => {
            info!(path = %path.display(), "Template removed; rescanning");
            engine.rescan();
        }
        ChangeEvent::Removed(path) => {
            engine.reload(path);
        }
    }
}
