//! Solidity ABI codec for the PixelPortal contract.
//!
//! Only the shapes the contract uses are supported: `uint256`, `address`,
//! `string`, and a dynamic array of `(address,uint256,string,string)`.

use px_types::{AccountId, Pixel};
use sha3::{Digest, Keccak256};
use thiserror::Error;

pub const GET_TOTAL_PIXELS: &str = "getTotalPixels()";
pub const GET_ALL_PIXELS: &str = "getAllPixels()";
pub const PIXELISE: &str = "pixelise(string,string)";
pub const NEW_PIXEL_EVENT: &str = "NewPixel(address,uint256,string,string)";

const WORD: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("abi: {0}")]
pub struct AbiError(pub String);

pub fn keccak256(input: &[u8]) -> [u8; 32] {
    Keccak256::digest(input).into()
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `0x`-prefixed topic 0 of an event.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", to_hex(&keccak256(signature.as_bytes())))
}

/// Calldata for a function without arguments.
pub fn encode_call(signature: &str) -> Vec<u8> {
    selector(signature).to_vec()
}

pub fn encode_pixelise(color_a: &str, color_b: &str) -> Vec<u8> {
    let tail_a = encode_string(color_a);
    let tail_b = encode_string(color_b);

    let mut out = Vec::with_capacity(4 + 2 * WORD + tail_a.len() + tail_b.len());
    out.extend_from_slice(&selector(PIXELISE));
    out.extend_from_slice(&uint_word((2 * WORD) as u64));
    out.extend_from_slice(&uint_word((2 * WORD + tail_a.len()) as u64));
    out.extend_from_slice(&tail_a);
    out.extend_from_slice(&tail_b);
    out
}

fn encode_string(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(WORD + padded);
    out.extend_from_slice(&uint_word(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out.resize(WORD + padded, 0);
    out
}

pub fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0_u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn decode_u64(data: &[u8]) -> Result<u64, AbiError> {
    Reader::new(data).u64_at(0)
}

/// Return data of `getAllPixels()`.
pub fn decode_pixels(data: &[u8]) -> Result<Vec<Pixel>, AbiError> {
    let reader = Reader::new(data);
    let array = reader.usize_at(0)?;
    let len = reader.usize_at(array)?;
    if len > data.len() / WORD {
        return Err(AbiError(format!("array length {len} exceeds return data")));
    }

    let base = add(array, WORD)?;
    let mut pixels = Vec::with_capacity(len);
    for index in 0..len {
        let slot = add(base, index * WORD)?;
        let tuple = add(base, reader.usize_at(slot)?)?;
        pixels.push(reader.pixel_tuple(tuple)?);
    }
    Ok(pixels)
}

/// A `NewPixel` log. Handles both an indexed `from` (topic 1) and all four
/// fields in data.
pub fn decode_new_pixel(topics: &[Vec<u8>], data: &[u8]) -> Result<Pixel, AbiError> {
    let reader = Reader::new(data);
    match topics.get(1) {
        Some(indexed_from) => {
            let submitter = Reader::new(indexed_from).address_at(0)?;
            Ok(Pixel::new(
                submitter,
                reader.u64_at(0)?,
                reader.string_at(reader.usize_at(WORD)?)?,
                reader.string_at(reader.usize_at(2 * WORD)?)?,
            ))
        }
        None => reader.pixel_tuple(0),
    }
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn word(&self, offset: usize) -> Result<&'a [u8], AbiError> {
        let end = add(offset, WORD)?;
        self.data
            .get(offset..end)
            .ok_or_else(|| AbiError(format!("word at {offset} out of bounds")))
    }

    fn u64_at(&self, offset: usize) -> Result<u64, AbiError> {
        let word = self.word(offset)?;
        if word[..24].iter().any(|byte| *byte != 0) {
            return Err(AbiError(format!("integer at {offset} does not fit in 64 bits")));
        }
        Ok(word[24..]
            .iter()
            .fold(0_u64, |acc, byte| (acc << 8) | u64::from(*byte)))
    }

    fn usize_at(&self, offset: usize) -> Result<usize, AbiError> {
        let value = self.u64_at(offset)?;
        usize::try_from(value).map_err(|_| AbiError(format!("offset {value} too large")))
    }

    fn address_at(&self, offset: usize) -> Result<AccountId, AbiError> {
        let word = self.word(offset)?;
        Ok(AccountId(format!("0x{}", to_hex(&word[12..]))))
    }

    fn string_at(&self, offset: usize) -> Result<String, AbiError> {
        let len = self.usize_at(offset)?;
        let start = add(offset, WORD)?;
        let end = add(start, len)?;
        let bytes = self
            .data
            .get(start..end)
            .ok_or_else(|| AbiError(format!("string at {offset} out of bounds")))?;
        String::from_utf8(bytes.to_vec()).map_err(|err| AbiError(err.to_string()))
    }

    fn pixel_tuple(&self, start: usize) -> Result<Pixel, AbiError> {
        let submitter = self.address_at(start)?;
        let submitted_at = self.u64_at(add(start, WORD)?)?;
        let color_a = self.string_at(add(start, self.usize_at(add(start, 2 * WORD)?)?)?)?;
        let color_b = self.string_at(add(start, self.usize_at(add(start, 3 * WORD)?)?)?)?;
        Ok(Pixel::new(submitter, submitted_at, color_a, color_b))
    }
}

fn add(a: usize, b: usize) -> Result<usize, AbiError> {
    a.checked_add(b)
        .ok_or_else(|| AbiError("offset overflow".to_owned()))
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// Decodes hex with or without the `0x` prefix.
pub fn from_hex(input: &str) -> Result<Vec<u8>, AbiError> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    if digits.len() % 2 != 0 {
        return Err(AbiError("odd-length hex".to_owned()));
    }
    digits
        .as_bytes()
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| match (hex_digit(pair[0]), hex_digit(pair[1])) {
            (Some(high), Some(low)) => Ok(high << 4 | low),
            _ => Err(AbiError(format!("invalid hex at {}", i * 2))),
        })
        .collect()
}

fn hex_digit(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|digit| digit as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_hex(value: u64) -> String {
        to_hex(&uint_word(value))
    }

    fn string_hex(value: &str) -> String {
        to_hex(&encode_string(value))
    }

    fn address_word(address: &str) -> String {
        format!("{:0>64}", address.trim_start_matches("0x"))
    }

    #[test]
    fn keccak_matches_known_erc20_values() {
        assert_eq!(to_hex(&selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(
            event_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn pixelise_calldata_layout() {
        let data = encode_pixelise("ff0000", "00ff00");
        assert_eq!(&data[..4], &selector(PIXELISE));
        let expected = [
            word_hex(0x40),
            word_hex(0x80),
            string_hex("ff0000"),
            string_hex("00ff00"),
        ]
        .concat();
        assert_eq!(to_hex(&data[4..]), expected);
        assert_eq!(data.len(), 4 + 6 * 32);
    }

    #[test]
    fn decodes_uint() {
        let data = from_hex(&word_hex(3)).expect("valid hex");
        assert_eq!(decode_u64(&data), Ok(3));
        assert!(decode_u64(&data[..31]).is_err());
    }

    #[test]
    fn rejects_uint_wider_than_u64() {
        let mut word = uint_word(1);
        word[0] = 1;
        assert!(decode_u64(&word).is_err());
    }

    #[test]
    fn decodes_pixel_array() {
        let submitter = "00000000000000000000000000000000000000aa";
        // tuple: address, timestamp, offset a, offset b, string a, string b
        let tuple = [
            address_word(submitter),
            word_hex(1_650_000_001),
            word_hex(0x80),
            word_hex(0xc0),
            string_hex("ff0000"),
            string_hex("00ff00"),
        ]
        .concat();
        let encoded = [word_hex(0x20), word_hex(1), word_hex(0x20), tuple].concat();

        let pixels = decode_pixels(&from_hex(&encoded).expect("valid hex")).expect("decodes");
        assert_eq!(
            pixels,
            vec![Pixel::new(
                AccountId(format!("0x{submitter}")),
                1_650_000_001,
                "ff0000",
                "00ff00"
            )]
        );
    }

    #[test]
    fn decodes_empty_pixel_array() {
        let encoded = [word_hex(0x20), word_hex(0)].concat();
        assert_eq!(decode_pixels(&from_hex(&encoded).expect("valid hex")), Ok(Vec::new()));
    }

    #[test]
    fn rejects_truncated_pixel_array() {
        let encoded = [word_hex(0x20), word_hex(1), word_hex(0x20)].concat();
        assert!(decode_pixels(&from_hex(&encoded).expect("valid hex")).is_err());
    }

    #[test]
    fn decodes_log_with_indexed_sender() {
        let topics = vec![
            from_hex(&event_topic(NEW_PIXEL_EVENT)).expect("valid hex"),
            from_hex(&address_word("0xAB")).expect("valid hex"),
        ];
        let data = [
            word_hex(7),
            word_hex(0x60),
            word_hex(0xa0),
            string_hex("123456"),
            string_hex("abcdef"),
        ]
        .concat();

        let pixel = decode_new_pixel(&topics, &from_hex(&data).expect("valid hex")).expect("decodes");
        assert_eq!(pixel.submitter.as_str(), format!("0x{:0>40}", "ab"));
        assert_eq!(pixel.submitted_at, 7);
        assert_eq!((pixel.color_a.as_str(), pixel.color_b.as_str()), ("123456", "abcdef"));
    }

    #[test]
    fn decodes_log_with_sender_in_data() {
        let topics = vec![from_hex(&event_topic(NEW_PIXEL_EVENT)).expect("valid hex")];
        let data = [
            address_word("0xab"),
            word_hex(9),
            word_hex(0x80),
            word_hex(0xc0),
            string_hex("123456"),
            string_hex("abcdef"),
        ]
        .concat();

        let pixel = decode_new_pixel(&topics, &from_hex(&data).expect("valid hex")).expect("decodes");
        assert_eq!(pixel.submitted_at, 9);
        assert_eq!(pixel.color_b, "abcdef");
    }

    #[test]
    fn hex_round_trip_and_errors() {
        assert_eq!(from_hex("0x00ff"), Ok(vec![0x00, 0xff]));
        assert!(from_hex("0xabc").is_err());
        assert!(from_hex("zz").is_err());
        // Two-byte characters must not split at a char boundary.
        assert!(from_hex("0xé").is_err());
        assert!(from_hex("0xa1é").is_err());
    }
}
