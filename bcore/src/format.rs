/// How many leading bytes of a file `sniff` looks at.
pub const SNIFF_LEN: usize = 512;

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_EMPTY: &str = "text/empty";
pub const APPLICATION_BINARY: &str = "application/binary";

// Checked in order, the first prefix that matches wins
const MAGIC: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"II*\x00", "image/tiff"),
    (b"MM\x00*", "image/tiff"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
    (b"<?xml", "application/xml"),
];

/// Best guess at a mime type from the first bytes of a file.
///
/// Unknown content that looks like text is `text/plain`, anything else
/// is `application/binary`.
pub fn sniff(head: &[u8]) -> &'static str {
    if head.is_empty() {
        return TEXT_EMPTY;
    }

    if let Some((_, mime)) = MAGIC.iter().find(|(magic, _)| head.starts_with(magic)) {
        return mime;
    }

    if looks_like_text(head) {
        TEXT_PLAIN
    } else {
        APPLICATION_BINARY
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut off by the end of the sniffed window
        Err(e) => e.error_len().is_none(),
    }
}
