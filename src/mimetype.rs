//! Mimetype guessing for filenames and resource URLs.
//!
//! Mirrors the upload path's logic: encoding suffixes (`.gz`, `.bz2`, ...)
//! are peeled, compound aliases (`.tgz`) are expanded, and a fixed set of
//! well-known extensionless names resolve to `text/plain`.

const TEXT_FILENAMES: &[&str] = &[
    ".editorconfig",
    ".gitattributes",
    ".gitignore",
    ".gitmodules",
    ".hgignore",
    ".htaccess",
    ".npmignore",
    "authors",
    "changelog",
    "changes",
    "contributing",
    "copying",
    "dockerfile",
    "install",
    "license",
    "makefile",
    "news",
    "readme",
    "todo",
];

const ENCODING_SUFFIXES: &[&str] = &["gz", "z", "bz2", "xz", "br"];

/// Compound suffix aliases, expanded before encodings are peeled.
const SUFFIX_ALIASES: &[(&str, &str)] = &[
    ("svgz", "svg.gz"),
    ("tgz", "tar.gz"),
    ("taz", "tar.gz"),
    ("tz", "tar.gz"),
    ("tbz2", "tar.bz2"),
    ("txz", "tar.xz"),
];

/// Strip any URL query/fragment and directory components.
pub fn basename(filename: &str) -> &str {
    let end = filename.find(['?', '#']).unwrap_or(filename.len());
    let path = filename[..end].trim_end_matches('/');
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Guess the mimetype of a filename or URL. `None` when nothing is known.
pub fn guess_mimetype(filename: &str) -> Option<String> {
    let name = basename(filename).to_lowercase();
    if name.is_empty() {
        return None;
    }
    if TEXT_FILENAMES.contains(&name.as_str()) {
        return Some("text/plain".to_string());
    }

    let mut stem = name;
    loop {
        let (rest, ext) = match stem.rsplit_once('.') {
            Some((rest, ext)) if !rest.is_empty() && !ext.is_empty() => {
                (rest.to_string(), ext.to_string())
            }
            _ => return None,
        };

        if let Some((_, expanded)) = SUFFIX_ALIASES.iter().find(|(alias, _)| *alias == ext) {
            stem = format!("{}.{}", rest, expanded);
            continue;
        }
        if ENCODING_SUFFIXES.contains(&ext.as_str()) {
            stem = rest;
            continue;
        }
        return mime_guess::from_ext(&ext)
            .first()
            .map(|mime| mime.essence_str().to_string());
    }
}
