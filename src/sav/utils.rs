//! Low-level byte helpers

use std::io::{self, Read};

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

/// Round `n` up to a multiple of `align`.
pub fn round_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

/// Read until `buf` is full or the stream ends, returning the byte count.
///
/// Unlike `read_exact`, a short stream is not an error.
pub fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Strip trailing spaces (and NULs) from a fixed-width field.
pub fn trim_end_spaces(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Lossy text for fields that are plain ASCII in every known writer.
pub fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(trim_end_spaces(bytes)).into_owned()
}

/// Render bytes as text, escaping anything that is not printable ASCII.
pub fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|&b| std::ascii::escape_default(b))
        .map(char::from)
        .collect()
}

/// Map the character code of the machine integer info record to an encoding.
///
/// Codes 2 and 3 are the historical ASCII identifiers; anything else is a
/// Windows code page number.
pub fn code_page_encoding(code: i32) -> Option<&'static Encoding> {
    match code {
        2 | 3 | 20127 | 1252 => Some(WINDOWS_1252),
        65001 => Some(UTF_8),
        code if code > 0 => Encoding::for_label(format!("windows-{}", code).as_bytes())
            .or_else(|| Encoding::for_label(format!("cp{}", code).as_bytes())),
        _ => None,
    }
}
