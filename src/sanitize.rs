//! Mapping of remote document names to safe local file names.

use std::collections::HashSet;

/// Characters rejected by at least one common local filesystem
const ILLEGAL_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Common filesystem limit for a single path component
const MAX_NAME_BYTES: usize = 255;

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Map an arbitrary remote name to a name that is safe on common local filesystems.
///
/// Deterministic and idempotent: `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(remote_name: &str) -> String {
    let mut name: String = remote_name
        .chars()
        .map(|c| {
            if c.is_control() || ILLEGAL_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    truncate_to_boundary(&mut name, MAX_NAME_BYTES);
    trim_trailing(&mut name);

    if name.is_empty() {
        return "_".to_string();
    }

    if is_reserved(&name) {
        // Leave room for the prefix so a second pass does not truncate again
        truncate_to_boundary(&mut name, MAX_NAME_BYTES - 1);
        trim_trailing(&mut name);
        name.insert(0, '_');
    }

    name
}

/// Sanitize a name and make sure it carries the extension of the download format
pub fn local_file_name(remote_name: &str, format: &str) -> String {
    let mut base = sanitize(remote_name);
    let ext = sanitize(format.trim_start_matches('.'));
    if format.trim_start_matches('.').is_empty() || has_extension(&base, &ext) {
        return base;
    }

    truncate_to_boundary(&mut base, MAX_NAME_BYTES.saturating_sub(ext.len() + 1));
    trim_trailing(&mut base);
    sanitize(&format!("{base}.{ext}"))
}

/// Sanitize a batch of names and disambiguate collisions in listing order.
///
/// The first occurrence of a local name keeps it; later duplicates get
/// `-1`, `-2`, ... before the extension. Candidates already used by
/// another member of the batch are skipped, so the outputs are pairwise
/// distinct.
pub fn disambiguate<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    resolve_collisions(names.iter().map(|n| sanitize(n.as_ref())).collect())
}

/// Like [`disambiguate`], using [`local_file_name`] for each member
pub fn local_file_names<S: AsRef<str>>(names: &[S], format: &str) -> Vec<String> {
    resolve_collisions(
        names
            .iter()
            .map(|n| local_file_name(n.as_ref(), format))
            .collect(),
    )
}

fn resolve_collisions(sanitized: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = sanitized.iter().cloned().collect();
    let mut claimed: HashSet<&str> = HashSet::with_capacity(sanitized.len());
    let mut out = Vec::with_capacity(sanitized.len());

    for name in &sanitized {
        if claimed.insert(name.as_str()) {
            out.push(name.clone());
            continue;
        }

        let mut counter = 1;
        let candidate = loop {
            let candidate = with_counter(name, counter);
            if !taken.contains(&candidate) {
                break candidate;
            }
            counter += 1;
        };
        taken.insert(candidate.clone());
        out.push(candidate);
    }

    out
}

fn with_counter(name: &str, counter: usize) -> String {
    let suffix = format!("-{counter}");
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    };
    let mut stem = stem.to_string();
    truncate_to_boundary(
        &mut stem,
        MAX_NAME_BYTES.saturating_sub(suffix.len() + ext.len()),
    );
    format!("{stem}{suffix}{ext}")
}

fn has_extension(name: &str, ext: &str) -> bool {
    let name = name.to_lowercase();
    let ext = ext.to_lowercase();
    name.len() > ext.len() + 1 && name.ends_with(&format!(".{ext}"))
}

fn is_reserved(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).trim_end();
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
}

fn truncate_to_boundary(name: &mut String, max_bytes: usize) {
    if name.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    name.truncate(cut);
}

fn trim_trailing(name: &mut String) {
    let keep = name.trim_end_matches(['.', ' ']).len();
    name.truncate(keep);
}
