//! Extension to Content-Type lookup.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::File;
use std::io::BufRead;

use anyhow::{Context, Result};

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const DEFAULT_EXTENSIONS: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("png", "image/png"),
];

/// Immutable once the server starts; shared by every connection.
#[derive(Debug)]
pub struct MimeMap {
    mimetypes: HashMap<String, String>,
    pub default_mimetype: String,
}

impl MimeMap {
    /// Add extension map from a file.
    pub fn parse_extension_map_file(&mut self, filename: &OsStr) -> Result<()> {
        let file = File::open(filename)
            .with_context(|| format!("failed to open {}", filename.to_string_lossy()))?;
        for line in std::io::BufReader::new(file).lines() {
            let line =
                line.with_context(|| format!("failed to read {}", filename.to_string_lossy()))?;
            self.add_mimetype_line(&line);
        }
        Ok(())
    }

    /// Add line from an extension map, e.g. `image/gif  gif`.
    pub fn add_mimetype_line(&mut self, line: &str) {
        let mut fields = line.split_whitespace();
        let mimetype = match fields.next() {
            Some(mimetype) => mimetype,
            None => return, // empty line
        };
        if mimetype.starts_with('#') {
            return; // comment
        }
        for extension in fields {
            self.mimetypes
                .insert(extension.to_string(), mimetype.to_string());
        }
    }

    /// Content type for a resolved path, keyed on whatever follows its last dot.
    pub fn content_type(&self, path: &str) -> &str {
        path.rfind('.')
            .and_then(|dot| self.mimetypes.get(&path[dot + 1..]))
            .unwrap_or(&self.default_mimetype)
    }
}

impl Default for MimeMap {
    fn default() -> Self {
        let mimetypes = DEFAULT_EXTENSIONS
            .iter()
            .map(|(extension, mimetype)| (extension.to_string(), mimetype.to_string()))
            .collect();
        Self {
            mimetypes,
            default_mimetype: DEFAULT_MIME_TYPE.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use test_case::test_case;

    #[test_case("index.html", "text/html; charset=utf-8" ; "html")]
    #[test_case("img/logo.png", "image/png" ; "png")]
    #[test_case("archive.tar.png", "image/png" ; "last dot wins")]
    #[test_case("notes.txt", DEFAULT_MIME_TYPE ; "unknown extension")]
    #[test_case("Makefile", DEFAULT_MIME_TYPE ; "no dot")]
    #[test_case("html", DEFAULT_MIME_TYPE ; "bare extension name")]
    #[test_case("v1.html/data", DEFAULT_MIME_TYPE ; "dot in directory")]
    #[test_case("trailing.", DEFAULT_MIME_TYPE ; "empty extension")]
    fn default_map_works(path: &str, content_type: &str) {
        assert_eq!(MimeMap::default().content_type(path), content_type);
    }

    #[test]
    fn mimetype_lines_extend_map() {
        let mut mime_map = MimeMap::default();
        mime_map.add_mimetype_line("text/css\tcss");
        mime_map.add_mimetype_line("# text/plain txt");
        mime_map.add_mimetype_line("");
        mime_map.add_mimetype_line("  image/jpeg jpeg jpg  ");
        mime_map.add_mimetype_line("image/x-png png");
        assert_eq!(mime_map.content_type("a.css"), "text/css");
        assert_eq!(mime_map.content_type("a.txt"), DEFAULT_MIME_TYPE);
        assert_eq!(mime_map.content_type("a.jpg"), "image/jpeg");
        assert_eq!(mime_map.content_type("a.jpeg"), "image/jpeg");
        assert_eq!(mime_map.content_type("a.png"), "image/x-png");
    }

    #[test]
    fn default_mimetype_can_be_replaced() {
        let mut mime_map = MimeMap::default();
        mime_map.default_mimetype = "test/default".to_string();
        assert_eq!(mime_map.content_type("a.bin"), "test/default");
    }
}
