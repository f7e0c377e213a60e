// ABOUTME: Watches the config file and wakes the event loop when it changes.
// ABOUTME: Only sends a message; the reload itself runs on the render thread between frames.

use std::ffi::OsString;
use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use winit::event_loop::EventLoopProxy;

use crate::AppEvent;

pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watch the file's directory so editors that replace the file are noticed
    pub fn spawn(path: &Path, proxy: EventLoopProxy<AppEvent>) -> notify::Result<Self> {
        let file_name: Option<OsString> = path.file_name().map(|n| n.to_os_string());
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&event, file_name.as_deref())
                    && proxy.send_event(AppEvent::ConfigChanged).is_err()
                {
                    tracing::debug!("Event loop closed; dropping config change");
                }
            }
            Err(e) => tracing::warn!("Config watch error: {}", e),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!("Watching {} for config changes", dir.display());

        Ok(Self { _watcher: watcher })
    }
}

fn is_relevant(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};
    use std::path::PathBuf;

    #[test]
    fn only_changes_to_the_config_file_count() {
        let name = OsString::from("config.toml");
        let modify = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/tmp/retro/config.toml"));
        assert!(is_relevant(&modify, Some(name.as_os_str())));

        let other = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tmp/retro/other.toml"));
        assert!(!is_relevant(&other, Some(name.as_os_str())));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/tmp/retro/config.toml"));
        assert!(!is_relevant(&access, Some(name.as_os_str())));
    }
}
