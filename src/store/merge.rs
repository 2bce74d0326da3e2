//! Field-level merge rules and the meaningful-diff predicate.
//!
//! Merging never lowers completeness: subtitles are written once, a known
//! subfield is never replaced by the placeholder or by a different value,
//! and film lists only grow.

use super::models::{Episode, EpisodePatch, Field, FieldValue, Structured};
use super::Collection;

/// Apply `patch` to `existing`. Returns true if the record changed.
pub fn merge(existing: &mut Episode, patch: EpisodePatch) -> bool {
    let before = existing.clone();

    // Metadata is not semantically sensitive; newer values win.
    if let Some(title) = patch.title {
        existing.title = title;
    }
    if let Some(url) = patch.url {
        existing.url = Some(url);
    }
    if let Some(published_at) = patch.published_at {
        existing.published_at = Some(published_at);
    }
    if let Some(view_count) = patch.view_count {
        existing.view_count = Some(view_count);
    }
    for (key, value) in patch.extra {
        existing.extra.insert(key, value);
    }

    if existing.subtitles.is_none() {
        if let Some(text) = patch.subtitles {
            existing.subtitles = Some(text);
        }
    }

    if let Some(incoming) = patch.structured {
        let merged = match existing.structured.take() {
            Some(current) => merge_structured(current, incoming),
            None => incoming,
        };
        existing.structured = Some(merged);
    }

    *existing != before
}

/// Per-subfield merge. Known values are kept; `movies` is a union in
/// first-seen order.
pub fn merge_structured(current: Structured, incoming: Structured) -> Structured {
    Structured {
        guest: fill_gap(current.guest, incoming.guest),
        year: fill_gap(current.year, incoming.year),
        movies: union_movies(current.movies, incoming.movies),
    }
}

fn fill_gap<T: FieldValue>(current: Field<T>, incoming: Field<T>) -> Field<T> {
    match current {
        Field::Known(v) => Field::Known(v),
        Field::Unresolved => incoming,
    }
}

fn union_movies(current: Field<Vec<String>>, incoming: Field<Vec<String>>) -> Field<Vec<String>> {
    match (current, incoming) {
        (Field::Known(mut known), Field::Known(new)) => {
            for title in new {
                if !known.contains(&title) {
                    known.push(title);
                }
            }
            Field::Known(known)
        }
        (Field::Known(known), Field::Unresolved) => Field::Known(known),
        (Field::Unresolved, incoming) => incoming,
    }
}

/// True if going from `before` to `after` changed subtitle presence or any
/// structured subfield of at least one record. View counts, titles and
/// other metadata do not count, and neither does retry bookkeeping.
///
/// A record only present in `after` is compared against a bare stub, so a
/// newly discovered but not yet enriched video is not meaningful on its own.
pub fn diff_is_meaningful(before: &Collection, after: &Collection) -> bool {
    after.iter().any(|new| {
        let stub;
        let old = match before.get(&new.id) {
            Some(old) => old,
            None => {
                stub = Episode::stub(new.id.clone());
                &stub
            }
        };
        old.subtitle_state() != new.subtitle_state() || old.structured != new.structured
    }) || before.iter().any(|old| after.get(&old.id).is_none() && has_enrichment(old))
}

fn has_enrichment(episode: &Episode) -> bool {
    episode.subtitles.is_some() || episode.structured.is_some()
}
