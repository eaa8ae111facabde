use std::path::Path;

/// Directory listing returned by the server.
///
/// Wire format: `<root>||<entry>|<entry>|...`. Directories are reported
/// with a trailing `/`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FileListing {
    pub path: String,
    pub entries: Vec<String>,
}

impl FileListing {
    const ROOT_SEPARATOR: &'static str = "||";
    const ENTRY_SEPARATOR: char = '|';

    const VIDEO_EXTENSIONS: [&'static str; 3] = ["avi", "mp4", "mkv"];
    const SUBTITLE_EXTENSIONS: [&'static str; 1] = ["srt"];

    /// Parses a file listing reply. Every input is accepted: a reply without
    /// separator is a root without entries.
    #[must_use]
    pub fn parse(payload: &str) -> Self {
        let (path, entries) = payload
            .split_once(Self::ROOT_SEPARATOR)
            .unwrap_or((payload, ""));

        Self {
            path: path.to_owned(),
            entries: entries
                .split(Self::ENTRY_SEPARATOR)
                .filter(|entry| !entry.is_empty())
                .map(ToOwned::to_owned)
                .collect(),
        }
    }

    pub fn directories(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(String::as_str)
            .filter(|entry| is_directory(entry))
    }

    pub fn videos(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(String::as_str)
            .filter(|entry| is_video(entry))
    }

    pub fn subtitles(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(String::as_str)
            .filter(|entry| is_subtitle(entry))
    }
}

#[must_use]
pub fn is_directory(entry: &str) -> bool {
    entry.ends_with('/')
}

#[must_use]
pub fn is_video(entry: &str) -> bool {
    has_extension(entry, &FileListing::VIDEO_EXTENSIONS)
}

#[must_use]
pub fn is_subtitle(entry: &str) -> bool {
    has_extension(entry, &FileListing::SUBTITLE_EXTENSIONS)
}

fn has_extension(entry: &str, extensions: &[&str]) -> bool {
    !is_directory(entry)
        && Path::new(entry)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}
