// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Rendering of raw link traffic for the log, and parsing of typed input

use thiserror::Error;

/// How inbound traffic is rendered when nothing has claimed the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Ascii,
    Hex,
}

impl DisplayMode {
    pub fn render(self, data: &[u8]) -> String {
        match self {
            DisplayMode::Ascii => to_ascii(data),
            DisplayMode::Hex => to_hex(data),
        }
    }
}

/// Space separated upper-case hex pairs
pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lossy UTF-8 with control characters (other than CR and LF) shown as '.'
pub fn to_ascii(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .chars()
        .map(|ch| match ch {
            '\n' | '\r' => ch,
            '\u{00}'..='\u{1F}' | '\u{7F}' => '.',
            _ => ch,
        })
        .collect()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("Invalid hex string: {0} digits, expected an even number")]
    OddLength(usize),

    #[error("Invalid hex digit '{0}'")]
    InvalidDigit(char),
}

/// Parse pairs of hex digits such as `"AA BB cc"`. Whitespace anywhere is
/// ignored, so `"A ABB"` is the same as `"AA BB"`.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, HexError> {
    let digits: Vec<char> = input.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength(digits.len()));
    }

    digits
        .chunks(2)
        .map(|pair| -> Result<u8, HexError> { Ok(hex_value(pair[0])? << 4 | hex_value(pair[1])?) })
        .collect()
}

fn hex_value(digit: char) -> Result<u8, HexError> {
    digit
        .to_digit(16)
        .map(|value| value as u8)
        .ok_or(HexError::InvalidDigit(digit))
}
