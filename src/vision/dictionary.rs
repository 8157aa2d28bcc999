//! Character dictionary for CTC recognition
//!
//! One glyph per line, UTF-8 with a GBK fallback for legacy Chinese tables.
//! Index 0 is always the CTC blank.

use std::path::Path;

use encoding_rs::GBK;
use tracing::{debug, info};

use crate::error::{OcrError, Result};

/// Symbol reserved for the CTC blank at index 0
pub const BLANK_SYMBOL: &str = "";

/// Ordered glyph table of a recognition model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    symbols: Vec<String>,
}

impl Dictionary {
    /// Load a dictionary file, prepending the blank symbol
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_options(path, false)
    }

    /// Load a dictionary file, optionally appending a trailing space symbol
    /// (models exported with `use_space_char`)
    pub fn load_with_options(path: &Path, append_space: bool) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| OcrError::io(path, e))?;
        let content = decode_table(&bytes).ok_or_else(|| {
            OcrError::Dictionary(format!("{:?} is neither valid UTF-8 nor GBK", path))
        })?;

        let mut dictionary = Self::from_lines(content.split('\n'));
        if append_space {
            dictionary.symbols.push(" ".to_string());
        }

        info!(
            "Loaded dictionary {:?}: {} symbols (including blank)",
            path,
            dictionary.len()
        );
        Ok(dictionary)
    }

    /// Build a dictionary from glyph lines (the blank is prepended)
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut symbols = vec![BLANK_SYMBOL.to_string()];
        symbols.extend(
            lines
                .into_iter()
                .map(|line| line.as_ref().trim_end_matches('\r').to_string()),
        );

        // A trailing newline leaves one empty segment that is not a glyph
        if symbols.len() > 1 && symbols.last().is_some_and(|s| s.is_empty()) {
            symbols.pop();
        }

        Self { symbols }
    }

    /// Number of symbols, blank included
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True when the table holds no glyph besides the blank.
    /// `len()` is never 0, so there is no `is_empty`.
    pub fn has_no_glyphs(&self) -> bool {
        self.symbols.len() <= 1
    }

    /// Symbol at `index`, `None` when out of range
    pub fn get(&self, index: usize) -> Option<&str> {
        self.symbols.get(index).map(String::as_str)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

fn decode_table(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text.to_string()),
        Err(e) => {
            debug!("Dictionary is not UTF-8 ({}), retrying as GBK", e);
            GBK.decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned())
        }
    }
}
