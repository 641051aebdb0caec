//! Hex dump formatting for packet diagnostics

use std::fmt::Write;

/// Format `data` as an offset / hex / ASCII dump, 16 bytes per line.
///
/// Intended for `log::debug!` output while chasing malformed packets.
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 16);

    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}  ", line * 16);

        for i in 0..16 {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                }
                None => out.push_str("   "),
            }
        }

        out.push(' ');
        for &byte in chunk {
            out.push(if (0x20..=0x7E).contains(&byte) {
                byte as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }

    out
}
