//! The 2-octet float format (KNX DPT 9.001) used for every temperature-like quantity on the bus.
//!
//! Layout of the 16-bit word, most significant bit first:
//!
//! ```text
//! MEEEEMMM MMMMMMMM
//! ```
//!
//! `M` is the sign bit followed by an 11-bit two's complement mantissa, `E` is a 4-bit exponent.
//! The represented value is `0.01 * mantissa * 2^exponent`.

/// Largest value the format can represent (`0.01 * 2047 * 2^15`).
pub const MAXIMUM: f32 = 670760.96;
/// Smallest value the format can represent (`0.01 * -2048 * 2^15`).
pub const MINIMUM: f32 = -671088.64;

const MANTISSA_MAX: i32 = 2047;
const MANTISSA_MIN: i32 = -2048;

/// Decode a register value into a number rounded to two decimal places.
pub fn decode(word: u16) -> f32 {
    let [h, l] = word.to_be_bytes();
    let mut mantissa = i32::from(h & 0x07) << 8 | i32::from(l);
    if h & 0x80 != 0 {
        mantissa -= 2048;
    }
    let exponent = (h >> 3) & 0x0F;
    let value = 0.01 * mantissa as f32 * (1u32 << exponent) as f32;
    ((f64::from(value) * 100.0).round() / 100.0) as f32
}

/// Encode a number, saturating at [`MINIMUM`] and [`MAXIMUM`].
///
/// The mantissa is obtained by truncating `value * 100` and then halved (truncating again) until
/// it fits into 11 bits. This loses up to one unit of precision per halving compared to proper
/// rounding, and matches the controller's own encoder bit for bit.
pub fn encode(value: f32) -> u16 {
    let value = value.clamp(MINIMUM, MAXIMUM);
    let mut mantissa = (value * 100.0) as i32;
    let mut exponent = 0u8;
    while mantissa > MANTISSA_MAX || mantissa < MANTISSA_MIN {
        mantissa /= 2;
        exponent += 1;
    }
    let mut h = (exponent & 0x0F) << 3;
    if mantissa < 0 {
        mantissa += 2048;
        h |= 0x80;
    }
    let mantissa = mantissa as u16;
    h |= ((mantissa >> 8) & 0x07) as u8;
    u16::from_be_bytes([h, mantissa as u8])
}

/// The exponent stored in an encoded word.
///
/// Useful to know the resolution of an encoded value, which is `0.01 * 2^exponent`.
pub fn exponent(word: u16) -> u8 {
    ((word >> 11) & 0x0F) as u8
}
