//! Mapping request targets to paths below the document root.

use std::cmp::max;

pub const DEFAULT_INDEX_NAME: &str = "index.html";

#[derive(Debug, Clone)]
pub struct Router {
    index_name: String,
}

impl Router {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Resolve a request target to a path relative to the document root.
    ///
    /// Returns None if the target is invalid or would escape the root. No filesystem access
    /// happens here.
    pub fn resolve(&self, target: &str) -> Option<String> {
        // strip query params
        let stripped = target.splitn(2, '?').next().unwrap_or(target);

        let decoded = String::from_utf8(url_decode(stripped)).ok()?;
        if decoded.contains('\0') {
            return None;
        }
        let safe = make_safe_url(&decoded)?;

        // does it end in a slash? serve up url/index_name
        let mut path = safe[1..].to_string();
        if safe.ends_with('/') {
            path.push_str(&self.index_name);
        }
        Some(path)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_NAME)
    }
}

/// Resolve //, /./, and /../ in a URL.
///
/// Returns None if the URL is invalid/unsafe.
fn make_safe_url(url: &str) -> Option<String> {
    let mut url = url.as_bytes().to_vec();

    // URLs not starting with a slash are illegal.
    if !url.starts_with(b"/") {
        return None;
    }

    let mut src_index = 0;
    let mut dst_index = 0;
    while src_index < url.len() {
        if url[src_index] == b'/' && url.get(src_index + 1) == Some(&b'/') {
            // skip slash
            src_index += 1;
        } else if url[src_index] == b'/'
            && url.get(src_index + 1) == Some(&b'.')
            && matches!(url.get(src_index + 2), Some(&b'/') | None)
        {
            // skip slash dot slash
            src_index += 2;
        } else if url[src_index] == b'/'
            && url.get(src_index + 1) == Some(&b'.')
            && url.get(src_index + 2) == Some(&b'.')
            && matches!(url.get(src_index + 3), Some(&b'/') | None)
        {
            // skip slash dot dot slash
            src_index += 3;
            // overwrite previous component
            loop {
                if dst_index == 0 {
                    return None;
                }
                dst_index -= 1;
                if url[dst_index] == b'/' {
                    break;
                }
            }
        } else {
            url[dst_index] = url[src_index];
            src_index += 1;
            dst_index += 1;
        }
    }

    // Always preserve leading slash
    dst_index = max(dst_index, 1);
    url.truncate(dst_index);

    String::from_utf8(url).ok()
}

/// Decode URL by converting %XX (where XX are hexadecimal digits) to the byte it represents.
fn url_decode(url: &str) -> Vec<u8> {
    let url = url.as_bytes();
    let mut decoded = Vec::with_capacity(url.len());
    let mut i = 0;
    while i < url.len() {
        let c = url[i];
        if c == b'%'
            && i + 2 < url.len()
            && url[i + 1].is_ascii_hexdigit()
            && url[i + 2].is_ascii_hexdigit()
        {
            decoded.push(hex_to_digit(url[i + 1]) * 16 + hex_to_digit(url[i + 2]));
            i += 3;
        } else {
            decoded.push(c);
            i += 1;
        }
    }
    decoded
}

/// Convert hex digit to integer.
fn hex_to_digit(hex: u8) -> u8 {
    if (b'A'..=b'F').contains(&hex) {
        hex - b'A' + 10
    } else if (b'a'..=b'f').contains(&hex) {
        hex - b'a' + 10
    } else {
        hex - b'0'
    }
}
