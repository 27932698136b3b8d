//! 5x7 bitmap font for overlay labels.
//!
//! Each glyph packs 35 bits row-major with bit 0 at the top-left cell, so
//! cell `(col, row)` lives at bit `row * 5 + col`.

pub const GLYPH_COLUMNS: u32 = 5;
pub const GLYPH_ROWS: u32 = 7;

const GLYPH_MASK: u64 = (1 << (GLYPH_COLUMNS * GLYPH_ROWS)) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Glyph(u64);

impl Glyph {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & GLYPH_MASK)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn is_set(self, col: u32, row: u32) -> bool {
        col < GLYPH_COLUMNS && row < GLYPH_ROWS && (self.0 >> (row * GLYPH_COLUMNS + col)) & 1 == 1
    }
}

/// Drawn for any character outside the table: every other cell lit.
pub const UNKNOWN_GLYPH: Glyph = Glyph::from_bits(0x5_5555_5555);

/// Pack seven `0bLMMMR` row literals (leftmost column in the high bit).
const fn pack(rows: [u8; 7]) -> Glyph {
    let mut bits = 0u64;
    let mut row = 0;
    while row < GLYPH_ROWS as usize {
        let mut col = 0;
        while col < GLYPH_COLUMNS as usize {
            if (rows[row] >> (4 - col)) & 1 == 1 {
                bits |= 1 << (row * GLYPH_COLUMNS as usize + col);
            }
            col += 1;
        }
        row += 1;
    }
    Glyph::from_bits(bits)
}

static GLYPHS: [(char, Glyph); 43] = [
    ('A', pack([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001])),
    ('B', pack([0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110])),
    ('C', pack([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110])),
    ('D', pack([0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100])),
    ('E', pack([0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111])),
    ('F', pack([0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000])),
    ('G', pack([0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111])),
    ('H', pack([0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001])),
    ('I', pack([0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110])),
    ('J', pack([0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100])),
    ('K', pack([0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001])),
    ('L', pack([0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111])),
    ('M', pack([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001])),
    ('N', pack([0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001])),
    ('O', pack([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110])),
    ('P', pack([0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000])),
    ('Q', pack([0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101])),
    ('R', pack([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001])),
    ('S', pack([0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110])),
    ('T', pack([0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100])),
    ('U', pack([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110])),
    ('V', pack([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100])),
    ('W', pack([0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010])),
    ('X', pack([0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001])),
    ('Y', pack([0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100])),
    ('Z', pack([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111])),
    ('0', pack([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110])),
    ('1', pack([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110])),
    ('2', pack([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111])),
    ('3', pack([0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110])),
    ('4', pack([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010])),
    ('5', pack([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110])),
    ('6', pack([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110])),
    ('7', pack([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000])),
    ('8', pack([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110])),
    ('9', pack([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100])),
    ('/', pack([0b00000, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b00000])),
    (':', pack([0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000])),
    ('.', pack([0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100])),
    ('-', pack([0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000])),
    ('_', pack([0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111])),
    ('?', pack([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100])),
    (' ', Glyph::from_bits(0)),
];

/// Look up `ch`, folding lowercase ASCII to uppercase first.
pub fn glyph_for(ch: char) -> Glyph {
    let upper = ch.to_ascii_uppercase();
    GLYPHS
        .iter()
        .find(|(key, _)| *key == upper)
        .map(|(_, glyph)| *glyph)
        .unwrap_or(UNKNOWN_GLYPH)
}
