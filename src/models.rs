//! Core data models used throughout the catalog.
//!
//! These types represent the clips, format sets, and tag records that flow
//! between the directory walk, the reconciler, and the catalog store.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Parent value used for files that sit directly in the scan root.
pub const ROOT_PARENT: &str = ".";

/// One of the tracked encodings. Declaration order is the canonical-source
/// priority used for tag extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    M4a,
    M4r,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 3] = [AudioFormat::Mp3, AudioFormat::M4a, AudioFormat::M4r];

    /// Map a file extension (without the dot) to a format, ignoring ASCII case.
    pub fn from_extension(ext: &str) -> Option<Self> {
        AudioFormat::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(ext))
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::M4r => "m4r",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Presence flags for the three tracked formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormatSet {
    pub mp3: bool,
    pub m4a: bool,
    pub m4r: bool,
}

impl FormatSet {
    pub fn new(mp3: bool, m4a: bool, m4r: bool) -> Self {
        Self { mp3, m4a, m4r }
    }

    pub fn insert(&mut self, format: AudioFormat) {
        match format {
            AudioFormat::Mp3 => self.mp3 = true,
            AudioFormat::M4a => self.m4a = true,
            AudioFormat::M4r => self.m4r = true,
        }
    }

    pub fn contains(&self, format: AudioFormat) -> bool {
        match format {
            AudioFormat::Mp3 => self.mp3,
            AudioFormat::M4a => self.m4a,
            AudioFormat::M4r => self.m4r,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.mp3 || self.m4a || self.m4r)
    }

    /// Highest-priority format present: mp3, then m4a, then m4r.
    pub fn canonical(&self) -> Option<AudioFormat> {
        AudioFormat::ALL.into_iter().find(|f| self.contains(*f))
    }
}

impl fmt::Display for FormatSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: Vec<&str> = AudioFormat::ALL
            .iter()
            .filter(|fmt| self.contains(**fmt))
            .map(|fmt| fmt.extension())
            .collect();
        if present.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&present.join(","))
        }
    }
}

/// Composite identity of a clip: relative parent directory plus file stem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClipKey {
    pub parent: String,
    pub stem: String,
}

impl ClipKey {
    pub fn new(parent: impl Into<String>, stem: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            stem: stem.into(),
        }
    }

    /// Relative path without extension, e.g. `clips/a` (or `a` at the root).
    pub fn key(&self) -> String {
        if self.parent == ROOT_PARENT || self.parent.is_empty() {
            self.stem.clone()
        } else {
            format!("{}/{}", self.parent, self.stem)
        }
    }
}

/// All sibling files on disk that make up one logical clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipGroup {
    pub key: String,
    pub stem: String,
    pub parent: String,
    pub formats: FormatSet,
    /// File name on disk for each present format, as spelled on disk.
    pub file_names: BTreeMap<AudioFormat, String>,
}

impl ClipGroup {
    pub fn new(clip_key: &ClipKey) -> Self {
        Self {
            key: clip_key.key(),
            stem: clip_key.stem.clone(),
            parent: clip_key.parent.clone(),
            formats: FormatSet::default(),
            file_names: BTreeMap::new(),
        }
    }

    /// Record a file for this clip. When two spellings of the same format exist
    /// (`a.mp3` and `a.MP3`), the lexically first name wins so walks stay stable.
    pub fn add_file(&mut self, format: AudioFormat, file_name: &str) {
        self.formats.insert(format);
        self.file_names
            .entry(format)
            .and_modify(|existing| {
                if file_name < existing.as_str() {
                    *existing = file_name.to_string();
                }
            })
            .or_insert_with(|| file_name.to_string());
    }

    pub fn clip_key(&self) -> ClipKey {
        ClipKey::new(self.parent.clone(), self.stem.clone())
    }

    /// Root-relative path of the canonical source file, with `/` separators.
    pub fn canonical_source(&self) -> Option<(AudioFormat, String)> {
        let format = self.formats.canonical()?;
        let name = self.file_names.get(&format)?;
        let rel = if self.parent == ROOT_PARENT || self.parent.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", self.parent, name)
        };
        Some((format, rel))
    }
}

/// A row of the `clips` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clip {
    pub id: i64,
    pub key: String,
    pub stem: String,
    pub parent: String,
    pub formats: FormatSet,
}

impl Clip {
    pub fn clip_key(&self) -> ClipKey {
        ClipKey::new(self.parent.clone(), self.stem.clone())
    }
}

/// Tag metadata extracted from, or stored for, a clip.
///
/// Equality is exact per field: `None` and `Some("")` differ.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagData {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub year: Option<u32>,
}

impl TagData {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none() && self.album.is_none() && self.title.is_none() && self.year.is_none()
    }
}
