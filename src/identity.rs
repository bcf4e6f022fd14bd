//! Device identity derived from a hardware unique identifier.

use std::fmt::Write;

/// Read the unique-id source at `path` and render it as the device identity.
pub fn from_file(path: &str) -> Result<String, String> {
    let raw = std::fs::read(path).map_err(|e| format!("Failed to read {path}: {e}"))?;
    let id = render(&unique_id_bytes(&raw));
    if id.is_empty() {
        return Err(format!("Unique-id source {path} is empty"));
    }
    Ok(id)
}

/// `machine-id` style sources already hold hex text; decode those so the
/// rendered identity is the id itself rather than the hex of its characters.
fn unique_id_bytes(raw: &[u8]) -> Vec<u8> {
    let trimmed = raw.trim_ascii();
    decode_hex(trimmed).unwrap_or_else(|| trimmed.to_vec())
}

fn decode_hex(text: &[u8]) -> Option<Vec<u8>> {
    if text.is_empty() || text.len() % 2 != 0 {
        return None;
    }
    text.chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

/// Render each byte as two uppercase hex digits.
pub fn render(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02X}");
        out
    })
}
