//! Archive inspection helpers

use openphone_archiver::Event;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use tokio::sync::broadcast;

/// Every entry of the ZIP at `path`, folders included with empty content
pub fn read_archive(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let bytes = std::fs::read(path).unwrap();
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

    let mut entries = BTreeMap::new();
    for index in 0..zip.len() {
        let mut file = zip.by_index(index).unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        entries.insert(file.name().to_string(), content);
    }
    entries
}

/// Entry names, sorted
pub fn archive_names(path: &Path) -> Vec<String> {
    read_archive(path).into_keys().collect()
}

/// UTF-8 content of one entry
pub fn archive_text(path: &Path, name: &str) -> String {
    let entries = read_archive(path);
    let content = entries
        .get(name)
        .unwrap_or_else(|| panic!("{name} missing from archive"));
    String::from_utf8(content.clone()).unwrap()
}

/// Events already queued on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Completed plus Failed events
pub fn terminal_events(events: &[Event]) -> Vec<&Event> {
    events
        .iter()
        .filter(|e| matches!(e, Event::Completed { .. } | Event::Failed { .. }))
        .collect()
}

/// Number of entries directly inside `dir`, zero if it does not exist
pub fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
