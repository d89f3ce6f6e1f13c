//! Filesystem event handler for the notify watcher (hot-reload).

use std::fs;
use std::sync::{Arc, RwLock};

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};
use tracing::{info, warn};

use super::core::{is_yaml, parse_recipes, Catalog};

pub(super) fn handle_fs_event(event: &Event, catalog: &Arc<RwLock<Catalog>>) {
    for path in &event.paths {
        if !is_yaml(path) {
            continue;
        }
        // Skip dotfiles (editor swap and temp files).
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with('.') {
                continue;
            }
        }

        match &event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_)) => {
                let contents = match fs::read_to_string(path) {
                    Ok(contents) => contents,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to read file during hot-reload");
                        continue;
                    }
                };
                let replaced = parse_recipes(&contents).map_err(|e| e.to_string()).and_then(|file| {
                    catalog
                        .write()
                        .expect("catalog lock poisoned")
                        .replace_file(path, file)
                });
                match replaced {
                    Ok(records) => {
                        info!(path = %path.display(), ?records, "hot-reloaded recipes");
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to parse recipes during hot-reload, keeping previous version"
                        );
                    }
                }
            }
            EventKind::Remove(RemoveKind::File) => {
                let removed = catalog.write().expect("catalog lock poisoned").remove_file(path);
                if !removed.is_empty() {
                    info!(path = %path.display(), records = ?removed, "removed recipes after file deletion");
                }
            }
            _ => {}
        }
    }
}
