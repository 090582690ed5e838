use std::fmt::Write;

const ROW: usize = 16;

/// Offset, hex and printable-ASCII columns, 16 bytes per row.
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();

    for (row, chunk) in data.chunks(ROW).enumerate() {
        let _ = write!(out, "{:04x}  ", row * ROW);

        for i in 0..ROW {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                }
                None => out.push_str("   "),
            }
        }

        out.push(' ');
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }

    out
}
