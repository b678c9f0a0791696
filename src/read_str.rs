// rust-xmpp
// Copyright (c) 2014 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::io;
use std::io::BufRead;
use std::str;

// https://tools.ietf.org/html/rfc3629
#[rustfmt::skip]
static UTF8_CHAR_WIDTH: [u8; 256] = [
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1, // 0x1F
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1, // 0x3F
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1, // 0x5F
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1, // 0x7F
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, // 0x9F
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, // 0xBF
    0,0,2,2,2,2,2,2,2,2,2,2,2,2,2,2,
    2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2, // 0xDF
    3,3,3,3,3,3,3,3,3,3,3,3,3,3,3,3, // 0xEF
    4,4,4,4,4,0,0,0,0,0,0,0,0,0,0,0, // 0xFF
];

/// Given a first byte, determine how many bytes are in this UTF-8 character
#[inline]
fn utf8_char_width(b: u8) -> usize {
    UTF8_CHAR_WIDTH[b as usize] as usize
}

// Length of the longest prefix of `bytes` that ends on a character
// boundary.
fn complete_prefix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    let mut last = len.saturating_sub(3);
    while last < len {
        let width = utf8_char_width(bytes[last]);
        if width == 0 {
            last += 1;
            continue;
        }
        if last + width <= len {
            last += width;
        } else {
            break;
        }
    }
    last
}

fn invalid_utf8() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "stream did not contain valid UTF-8",
    )
}

pub trait ReadString {
    /// Reads whatever is available as a string. An empty string means the
    /// peer closed the connection.
    fn read_str(&mut self) -> io::Result<String>;
}

impl<T: BufRead> ReadString for T {
    fn read_str(&mut self) -> io::Result<String> {
        // Bytes of a character split across two reads.
        let mut partial = Vec::new();
        loop {
            let (result, used) = {
                let available = self.fill_buf()?;
                if available.is_empty() {
                    return if partial.is_empty() {
                        Ok(String::new())
                    } else {
                        Err(invalid_utf8())
                    };
                }
                let mut combined = partial.clone();
                combined.extend_from_slice(available);
                let last = complete_prefix(&combined);
                if last <= partial.len() {
                    let used = available.len();
                    partial = combined;
                    (None, used)
                } else {
                    let res = str::from_utf8(&combined[..last])
                        .map(|x| x.to_string())
                        .map_err(|_| invalid_utf8());
                    (Some(res), last - partial.len())
                }
            };
            self.consume(used);

            if let Some(result) = result {
                return result;
            }
        }
    }
}
