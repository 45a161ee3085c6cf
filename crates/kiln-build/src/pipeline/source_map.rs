//! Line-level source maps
//!
//! Maps are tracked per output line while a file moves through the pipeline
//! and serialised as Source Map v3 JSON on write. Every mapped line points at
//! column 0 of a line in the single original source.

use serde::Serialize;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// An in-flight source map for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMap {
    file: String,
    source: String,
    content: String,
    /// Original line for each output line, if any
    lines: Vec<Option<u32>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapV3<'a> {
    version: u8,
    file: &'a str,
    sources: [&'a str; 1],
    sources_content: [&'a str; 1],
    names: [&'a str; 0],
    mappings: String,
}

impl SourceMap {
    /// Map every line of `content` to itself
    pub fn identity(file: impl Into<String>, source: impl Into<String>, content: &str) -> Self {
        let lines = (0..content.lines().count() as u32).map(Some).collect();
        Self {
            file: file.into(),
            source: source.into(),
            content: content.to_string(),
            lines,
        }
    }

    /// Output file name recorded in the map
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn set_file(&mut self, file: impl Into<String>) {
        self.file = file.into();
    }

    /// Original source name
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Original line for each output line
    pub fn lines(&self) -> &[Option<u32>] {
        &self.lines
    }

    /// Rebuild the map after a transform that reordered or dropped lines
    ///
    /// `origins[i]` is the pre-transform output line that became line `i`.
    pub fn remap(&mut self, origins: &[usize]) {
        self.lines = origins
            .iter()
            .map(|&origin| self.lines.get(origin).copied().flatten())
            .collect();
    }

    /// Collapse to a file-level mapping for `line_count` output lines
    ///
    /// Used after whole-file transforms where per-line origins are unknown.
    pub fn collapse(&mut self, line_count: usize) {
        self.lines = (0..line_count)
            .map(|i| if i == 0 { Some(0) } else { None })
            .collect();
    }

    /// Encode the `mappings` field
    pub fn mappings(&self) -> String {
        let mut previous_line = 0i64;
        let mut first = true;
        let mut out = String::new();

        for (index, line) in self.lines.iter().enumerate() {
            if index > 0 {
                out.push(';');
            }
            let Some(line) = line else {
                continue;
            };
            let line = i64::from(*line);
            // [generated column, source index, source line, source column]
            encode_vlq(&mut out, 0);
            encode_vlq(&mut out, 0);
            encode_vlq(&mut out, if first { line } else { line - previous_line });
            encode_vlq(&mut out, 0);
            previous_line = line;
            first = false;
        }

        out
    }

    /// Serialise as Source Map v3 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&SourceMapV3 {
            version: 3,
            file: &self.file,
            sources: [&self.source],
            sources_content: [&self.content],
            names: [],
            mappings: self.mappings(),
        })
    }
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = (vlq & 0b1_1111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b10_0000;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}
