//! Extra files mounted next to the NGINX configuration

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, RpaasError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraFile {
    pub name: String,
    #[serde(serialize_with = "as_base64", deserialize_with = "from_base64")]
    pub content: Vec<u8>,
}

impl ExtraFile {
    pub fn validate(&self, max_size: usize) -> Result<()> {
        validate_file_name(&self.name)?;
        if self.content.len() > max_size {
            return Err(RpaasError::validation(format!(
                "file {:?} exceeds the maximum size of {} bytes",
                self.name, max_size
            )));
        }
        Ok(())
    }
}

/// Names are relative path fragments: no absolute paths, no parent traversal.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RpaasError::validation("file name is required"));
    }
    if name.starts_with('/') || name.split('/').any(|part| part == ".." || part.is_empty()) {
        return Err(RpaasError::validation(format!(
            "invalid file name {:?}",
            name
        )));
    }
    Ok(())
}

fn as_base64<S: Serializer>(content: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(content))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        assert!(validate_file_name("www/index.html").is_ok());
        assert!(validate_file_name("waf.cfg").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("/etc/passwd").is_err());
        assert!(validate_file_name("../secret").is_err());
        assert!(validate_file_name("a//b").is_err());
    }

    #[test]
    fn size_is_bounded() {
        let file = ExtraFile {
            name: "big.bin".to_string(),
            content: vec![0u8; 11],
        };
        assert!(file.validate(10).is_err());
        assert!(file.validate(11).is_ok());
    }

    #[test]
    fn content_is_base64_on_the_wire() {
        let file = ExtraFile {
            name: "hello.txt".to_string(),
            content: b"hello".to_vec(),
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["content"], "aGVsbG8=");
        let back: ExtraFile = serde_json::from_value(json).unwrap();
        assert_eq!(back, file);
    }
}
