//! Path sanitizing for model-suggested names.
//!
//! Backends return free text for categories and filenames. Everything that
//! ends up in a destination path goes through [`PathSanitizer`] first.

use once_cell::sync::Lazy;
use regex::Regex;

/// Category used whenever nothing usable is left after sanitizing.
pub const FALLBACK_CATEGORY: &str = "uncategorized";

/// Filename used when a suggestion sanitizes to nothing.
pub const FALLBACK_FILENAME: &str = "untitled";

/// Maximum length of a single sanitized segment, in characters.
pub const MAX_SEGMENT_LENGTH: usize = 200;

const FORBIDDEN_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Pure, total sanitizers for filename and directory suggestions
pub struct PathSanitizer;

impl PathSanitizer {
    /// Turn a suggested filename into a single safe path segment.
    ///
    /// Trims, folds newlines into spaces, replaces `<>:"/\|?*` and control
    /// characters with `-`, collapses whitespace runs into one `-` and caps
    /// the result at [`MAX_SEGMENT_LENGTH`] characters.
    pub fn sanitize_filename(input: &str) -> String {
        let folded = input.trim().replace("\r\n", " ").replace(['\r', '\n'], " ");

        let replaced: String = folded
            .chars()
            .map(|c| {
                if FORBIDDEN_CHARS.contains(&c) || (c.is_control() && !c.is_whitespace()) {
                    '-'
                } else {
                    c
                }
            })
            .collect();

        let collapsed = WHITESPACE_RUN.replace_all(&replaced, "-");
        let capped: String = collapsed.chars().take(MAX_SEGMENT_LENGTH).collect();

        if capped.is_empty() {
            FALLBACK_FILENAME.to_string()
        } else {
            capped
        }
    }

    /// Turn a suggested category into a `/`-joined relative directory path.
    ///
    /// Splits on both slash kinds, drops empty, `.` and `..` segments and
    /// sanitizes the rest individually. Returns [`FALLBACK_CATEGORY`] when
    /// nothing survives.
    pub fn sanitize_dir_path(input: &str) -> String {
        let segments: Vec<String> = input
            .split(['/', '\\'])
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .map(Self::sanitize_filename)
            .collect();

        if segments.is_empty() {
            FALLBACK_CATEGORY.to_string()
        } else {
            segments.join("/")
        }
    }
}
