//! Display labels from file tags.

use std::path::Path;

use lofty::{Accessor, TaggedFileExt, read_from_path};

/// `title | genre | artist | album`, skipping empty fields.
///
/// The title defaults to the file stem; unreadable tags yield the stem alone.
pub fn track_label(path: &Path) -> String {
    let stem = file_stem(path);
    let tagged = match read_from_path(path) {
        Ok(tagged) => tagged,
        Err(e) => {
            tracing::debug!(path = %path.display(), "no tags: {e}");
            return stem;
        }
    };
    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return stem;
    };

    let title = tag
        .title()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or(stem);
    let rest = [tag.genre(), tag.artist(), tag.album()]
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_string());
    join_label(std::iter::once(title).chain(rest))
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn join_label(fields: impl Iterator<Item = String>) -> String {
    fields
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}
