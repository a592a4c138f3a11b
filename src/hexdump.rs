//! Dword hexdump of read-back buffers.

use std::fmt::Write;

const WORDS_PER_LINE: usize = 8;

/// Format `words` eight per line, each line prefixed by its byte offset.
///
/// ```
/// let text = render_node_compute::hexdump_dwords(&[0, 1, 0xdeadbeef]);
/// assert_eq!(text, "\t00000000:    00000000 00000001 deadbeef\n");
/// ```
pub fn hexdump_dwords(words: &[u32]) -> String {
    let mut out = String::new();
    for (i, line) in words.chunks(WORDS_PER_LINE).enumerate() {
        let _ = write!(out, "\t{:08X}:   ", i * WORDS_PER_LINE * 4);
        for word in line {
            let _ = write!(out, " {word:08x}");
        }
        out.push('\n');
    }
    out
}
