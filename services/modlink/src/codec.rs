//! Register decoding
//!
//! Turns raw 16-bit register words into a numeric value. 32-bit types are
//! read high word first; low-word-first and byte-swapped devices are not
//! supported.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModlinkError, Result};

/// Value encoding of a mapped register range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
}

impl DataType {
    /// Number of 16-bit words read for this type
    pub fn word_count(&self) -> u16 {
        match self {
            DataType::Uint16 | DataType::Int16 => 1,
            DataType::Uint32 | DataType::Int32 | DataType::Float32 => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Uint16 => "uint16",
            DataType::Int16 => "int16",
            DataType::Uint32 => "uint32",
            DataType::Int32 => "int32",
            DataType::Float32 => "float32",
        }
    }

    /// Decode `words` according to this type
    pub fn decode(&self, words: &[u16]) -> Result<f64> {
        let expected = self.word_count() as usize;
        if words.len() != expected {
            return Err(ModlinkError::decode(format!(
                "{} expects {} word(s), got {}",
                self,
                expected,
                words.len()
            )));
        }

        let value = match self {
            DataType::Uint16 => f64::from(words[0]),
            DataType::Int16 => f64::from(words[0] as i16),
            DataType::Uint32 => f64::from(combine(words[0], words[1])),
            DataType::Int32 => f64::from(combine(words[0], words[1]) as i32),
            DataType::Float32 => f64::from(f32::from_bits(combine(words[0], words[1]))),
        };
        Ok(value)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[inline]
fn combine(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// Widen coil/discrete-input bits to words (`0`/`1`)
pub fn bits_to_words(bits: &[bool]) -> Vec<u16> {
    bits.iter().map(|&bit| u16::from(bit)).collect()
}
