use crate::HandleError;
use serde::{Deserialize, Serialize};

/// Text encoding a handle uses for string keys and values.
///
/// Each [`DatabaseHandle`](crate::DatabaseHandle) carries its own encoding,
/// even when it shares the native handle with other instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    /// ISO-8859-1. Only code points up to U+00FF can be encoded.
    Latin1,
}

impl Encoding {
    pub fn encode(self, text: &str) -> Result<Vec<u8>, HandleError> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Encoding::Utf16Be => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            Encoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        HandleError::Encoding(format!("'{}' is not representable in Latin-1", c))
                    })
                })
                .collect(),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<String, HandleError> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| HandleError::Encoding(e.to_string())),
            Encoding::Utf16Le | Encoding::Utf16Be => {
                if bytes.len() % 2 != 0 {
                    return Err(HandleError::Encoding(
                        "UTF-16 input has an odd number of bytes".into(),
                    ));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| {
                        let pair = [pair[0], pair[1]];
                        if self == Encoding::Utf16Le {
                            u16::from_le_bytes(pair)
                        } else {
                            u16::from_be_bytes(pair)
                        }
                    })
                    .collect();
                String::from_utf16(&units).map_err(|e| HandleError::Encoding(e.to_string()))
            }
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_byte_order() {
        assert_eq!(Encoding::Utf16Le.encode("A").unwrap(), vec![0x41, 0x00]);
        assert_eq!(Encoding::Utf16Be.encode("A").unwrap(), vec![0x00, 0x41]);
        assert_eq!(Encoding::Utf16Be.decode(&[0x00, 0xE9]).unwrap(), "é");
    }

    #[test]
    fn test_latin1_rejects_wide_chars() {
        assert_eq!(Encoding::Latin1.encode("café").unwrap(), b"caf\xE9".to_vec());
        assert!(matches!(
            Encoding::Latin1.encode("€"),
            Err(HandleError::Encoding(_))
        ));
    }

    #[test]
    fn test_decode_errors() {
        assert!(Encoding::Utf8.decode(&[0xFF]).is_err());
        assert!(Encoding::Utf16Le.decode(&[0x41]).is_err());
    }
}
