//! Mapping between real file paths and paths inside the backup store
//!
//! The store mirrors the real filesystem with the leading separator removed:
//! `/home/u/notes.txt` is kept at `<store>/home/u/notes.txt` and tracked by git
//! as `home/u/notes.txt`.
//!
//! Mapping goes through [`Path::components`], so repeated separators and
//! interior `.` components collapse. Paths with `..` are refused; otherwise two
//! spellings of one file could land on different store entries, and a mapped
//! path could climb out of the store.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// True iff the first character of `path` is the path separator
pub fn is_absolute(path: &Path) -> bool {
    path.as_os_str()
        .as_encoded_bytes()
        .first()
        .is_some_and(|b| *b == MAIN_SEPARATOR as u8)
}

/// Convert an absolute path into its store-relative form
///
/// Returns `None` for empty or relative input, for the root itself and for
/// paths containing `..`.
///
/// ```
/// use git_backup::path_map::to_store_relative;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(
///     to_store_relative(Path::new("/home/u/notes.txt")),
///     Some(PathBuf::from("home/u/notes.txt"))
/// );
/// assert_eq!(to_store_relative(Path::new("notes.txt")), None);
/// ```
pub fn to_store_relative(abs: &Path) -> Option<PathBuf> {
    if !is_absolute(abs) {
        return None;
    }

    let mut components = abs.components();
    if components.next() != Some(Component::RootDir) {
        return None;
    }

    let mut relative = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Re-prepend the root to a store-relative path
pub fn to_absolute(relative: &Path) -> PathBuf {
    let mut abs = PathBuf::from(MAIN_SEPARATOR.to_string());
    abs.push(relative);
    abs
}

/// Location of the snapshot file for `abs` inside `store_root`
pub fn store_location(store_root: &Path, abs: &Path) -> Option<PathBuf> {
    to_store_relative(abs).map(|rel| store_root.join(rel))
}

/// `/`-separated spelling of a store-relative path
///
/// This is the form git prints in `ls-files` and the form recorded in the
/// `Backup-Path` trailer of every backup commit.
pub fn trailer_value(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Spelling of `owner` safe to put on a commit message line
///
/// Git trims whitespace around trailer values and message lines, and a
/// newline would end the trailer. Values with surrounding whitespace, control
/// characters, quotes or backslashes are written C-style in double quotes;
/// every other value is written as is.
///
/// ```
/// use git_backup::path_map::{quote_trailer, unquote_trailer};
///
/// assert_eq!(quote_trailer("home/u/notes.txt"), "home/u/notes.txt");
/// assert_eq!(quote_trailer("home/u/notes "), "\"home/u/notes \"");
/// assert_eq!(unquote_trailer(&quote_trailer("a\nb")), "a\nb");
/// ```
pub fn quote_trailer(owner: &str) -> String {
    let needs_quotes = owner.is_empty()
        || owner.trim() != owner
        || owner.chars().any(|c| c.is_ascii_control() || c == '"' || c == '\\');
    if !needs_quotes {
        return owner.to_string();
    }

    let mut quoted = String::with_capacity(owner.len() + 2);
    quoted.push('"');
    for c in owner.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            c if c.is_ascii_control() => quoted.push_str(&format!("\\{:03o}", c as u32)),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Inverse of [`quote_trailer`]; unquoted values are returned unchanged
pub fn unquote_trailer(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut owner = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            owner.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => owner.push('\n'),
            Some('t') => owner.push('\t'),
            Some('r') => owner.push('\r'),
            Some(d @ '0'..='7') => {
                let mut code = d.to_digit(8).unwrap_or_default();
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                owner.extend(char::from_u32(code));
            }
            Some(other) => owner.push(other),
            None => owner.push('\\'),
        }
    }
    owner
}
