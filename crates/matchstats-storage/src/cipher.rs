//! Timestamp-keyed AES-CBC codec for the statistics API's obfuscated payloads.

use aes::Aes128;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chrono::{DateTime, Datelike, Utc};
use matchstats_core::DecryptedArtifact;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;

const KEY_CORE_LEN: usize = 14;
const BLOCK_LEN: usize = 16;
const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `#` + 14 derived characters + `$`; the AES key (as-is) and IV (uppercased).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimestampKey(String);

impl TimestampKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn key_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn iv_bytes(&self) -> Vec<u8> {
        self.0.to_uppercase().into_bytes()
    }
}

impl std::fmt::Display for TimestampKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire shape of an encrypted API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    #[serde(rename = "response")]
    pub cipher_text: String,
    #[serde(rename = "lastModified")]
    pub last_modified: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecryptionStage {
    Cipher,
    Parse,
}

#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("timestamp {0} cannot be used for key derivation")]
    InvalidTimestamp(i64),
    #[error("cipher text is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("cipher text of {0} bytes is not a whole number of AES blocks")]
    BlockLength(usize),
    #[error("derived key material has the wrong length")]
    KeyLength,
    #[error("decrypted payload is empty")]
    EmptyPlaintext,
    #[error("decrypted payload is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("decrypted payload is not json: {0}")]
    Json(#[from] serde_json::Error),
}

impl DecryptionError {
    /// Cipher-stage errors mean protocol drift or feed corruption; parse-stage
    /// errors are specific to one artifact. Neither is retryable.
    pub fn stage(&self) -> DecryptionStage {
        match self {
            Self::Utf8(_) | Self::Json(_) => DecryptionStage::Parse,
            _ => DecryptionStage::Cipher,
        }
    }
}

/// Derives the per-payload key from the envelope's `lastModified` epoch-millis.
pub fn derive_key(timestamp_ms: i64) -> Result<TimestampKey, DecryptionError> {
    if timestamp_ms < 0 {
        return Err(DecryptionError::InvalidTimestamp(timestamp_ms));
    }
    let moment: DateTime<Utc> = DateTime::from_timestamp_millis(timestamp_ms)
        .ok_or(DecryptionError::InvalidTimestamp(timestamp_ms))?;

    let day = u128::from(moment.day());
    let day_reversed = reverse_digits(&format!("{day:02}"));
    let year = u128::try_from(moment.year()).map_err(|_| DecryptionError::InvalidTimestamp(timestamp_ms))?;
    let year_reversed = reverse_digits(&year.to_string());

    // The decimal digits are read back as a hexadecimal numeral.
    let as_hex = u128::from_str_radix(&timestamp_ms.to_string(), 16)
        .map_err(|_| DecryptionError::InvalidTimestamp(timestamp_ms))?;

    let mut core = to_radix(as_hex, 36);
    core.push_str(&to_radix((year + year_reversed) * (day + day_reversed), 24));
    core.truncate(KEY_CORE_LEN);
    while core.len() < KEY_CORE_LEN {
        core.push('0');
    }

    Ok(TimestampKey(format!("#{core}$")))
}

/// Decrypts an envelope into its JSON document.
pub fn decrypt(envelope: &EncryptedEnvelope) -> Result<DecryptedArtifact, DecryptionError> {
    let key = derive_key(envelope.last_modified)?;
    let mut buf = BASE64.decode(envelope.cipher_text.trim())?;
    let len = buf.len();
    if len == 0 || len % BLOCK_LEN != 0 {
        return Err(DecryptionError::BlockLength(len));
    }

    let decryptor = Aes128CbcDec::new_from_slices(key.key_bytes(), &key.iv_bytes())
        .map_err(|_| DecryptionError::KeyLength)?;
    let plaintext = decryptor
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| DecryptionError::BlockLength(len))?;

    let text = String::from_utf8(strip_trailing_marker(plaintext)?.to_vec())?;
    let value: JsonValue = serde_json::from_str(&text)?;
    Ok(DecryptedArtifact::new(value))
}

/// Inverse of [`decrypt`], producing a standards-padded envelope. Used to build fixtures.
pub fn seal(value: &JsonValue, last_modified: i64) -> Result<EncryptedEnvelope, DecryptionError> {
    let key = derive_key(last_modified)?;
    let plaintext = serde_json::to_vec(value)?;
    let encryptor = Aes128CbcEnc::new_from_slices(key.key_bytes(), &key.iv_bytes())
        .map_err(|_| DecryptionError::KeyLength)?;
    let cipher_bytes = encryptor.encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
    Ok(EncryptedEnvelope {
        cipher_text: BASE64.encode(cipher_bytes),
        last_modified,
    })
}

/// The API's padding is not reliably PKCS#7, so the final byte is treated as a
/// marker and the whole trailing run of that byte is dropped.
fn strip_trailing_marker(plaintext: &[u8]) -> Result<&[u8], DecryptionError> {
    let Some(&marker) = plaintext.last() else {
        return Err(DecryptionError::EmptyPlaintext);
    };
    let end = plaintext
        .iter()
        .rposition(|&b| b != marker)
        .map_or(0, |idx| idx + 1);
    Ok(&plaintext[..end])
}

fn reverse_digits(digits: &str) -> u128 {
    digits
        .chars()
        .rev()
        .filter_map(|c| c.to_digit(10))
        .fold(0u128, |acc, d| acc * 10 + u128::from(d))
}

fn to_radix(mut value: u128, radix: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % radix) as usize]);
        value /= radix;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derive_key_matches_golden_values() {
        assert_eq!(derive_key(1_700_000_000_000).unwrap().as_str(), "#3zfbzn55vkkiln$");
        // core shorter than 14 chars is right-padded
        assert_eq!(derive_key(0).unwrap().as_str(), "#024hb000000000$");
        // core longer than 14 chars is truncated
        assert_eq!(derive_key(1_709_251_199_000).unwrap().as_str(), "#3zncono6ww26bl$");
    }

    #[test]
    fn derive_key_is_pure_and_fixed_width() {
        for ts in [0, 1_000, 1_704_067_200_000, 1_700_000_000_000, 4_102_444_800_000] {
            let first = derive_key(ts).unwrap();
            let second = derive_key(ts).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.as_str().len(), 16);
            assert!(first.as_str().starts_with('#') && first.as_str().ends_with('$'));
        }
    }

    #[test]
    fn negative_timestamps_are_rejected() {
        assert!(matches!(derive_key(-1), Err(DecryptionError::InvalidTimestamp(-1))));
    }

    #[test]
    fn iv_is_the_uppercased_key() {
        let key = derive_key(1_700_000_000_000).unwrap();
        assert_eq!(key.key_bytes(), b"#3zfbzn55vkkiln$");
        assert_eq!(key.iv_bytes(), b"#3ZFBZN55VKKILN$".to_vec());
    }

    #[test]
    fn sealed_payload_decrypts_back() {
        let doc = json!({"setsCompleted": 2, "players": [{"player1Id": "A"}, {"player1Id": "B"}]});
        let envelope = seal(&doc, 1_700_000_000_000).unwrap();
        let artifact = decrypt(&envelope).unwrap();
        assert_eq!(artifact.value(), &doc);
    }

    #[test]
    fn single_marker_byte_is_stripped() {
        let key = derive_key(1_700_000_000_000).unwrap();
        // 15 bytes of JSON + one non-standard marker byte = exactly one block
        let mut block = br#"{"a":"1234567"}"#.to_vec();
        block.push(b'\x07');
        let encryptor = Aes128CbcEnc::new_from_slices(key.key_bytes(), &key.iv_bytes()).unwrap();
        let cipher = encryptor.encrypt_padded_vec_mut::<NoPadding>(&block);
        let envelope = EncryptedEnvelope {
            cipher_text: BASE64.encode(cipher),
            last_modified: 1_700_000_000_000,
        };
        assert_eq!(decrypt(&envelope).unwrap().value(), &json!({"a": "1234567"}));
    }

    #[test]
    fn corrupt_base64_is_a_cipher_stage_error() {
        let envelope = EncryptedEnvelope {
            cipher_text: "***not base64***".into(),
            last_modified: 1_700_000_000_000,
        };
        let err = decrypt(&envelope).unwrap_err();
        assert_eq!(err.stage(), DecryptionStage::Cipher);
    }

    #[test]
    fn truncated_cipher_text_is_a_cipher_stage_error() {
        let envelope = EncryptedEnvelope {
            cipher_text: BASE64.encode([1u8; 20]),
            last_modified: 1_700_000_000_000,
        };
        let err = decrypt(&envelope).unwrap_err();
        assert!(matches!(err, DecryptionError::BlockLength(20)));
        assert_eq!(err.stage(), DecryptionStage::Cipher);
    }

    #[test]
    fn wrong_timestamp_fails_at_parse_stage() {
        let mut envelope = seal(&json!({"ok": true}), 1_700_000_000_000).unwrap();
        envelope.last_modified = 1_600_000_000_000;
        let err = decrypt(&envelope).unwrap_err();
        assert_eq!(err.stage(), DecryptionStage::Parse);
    }
}
