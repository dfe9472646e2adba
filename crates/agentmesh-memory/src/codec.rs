//! Value encoding with size-triggered compression

use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::{error::Result, models::Payload};

/// Serialize `value`, gzip-compressing it when the JSON form is larger than
/// `threshold` bytes
pub fn encode(value: &serde_json::Value, threshold: usize) -> Result<Payload> {
    let data = serde_json::to_vec(value)?;
    if data.len() <= threshold {
        return Ok(Payload::Plain { data });
    }

    let original_len = data.len();
    let mut encoder = GzEncoder::new(Vec::with_capacity(original_len / 2), Compression::default());
    encoder.write_all(&data)?;
    let compressed = encoder.finish()?;
    Ok(Payload::Compressed {
        data: compressed,
        original_len,
    })
}

/// Reverse of [`encode`]
pub fn decode(payload: &Payload) -> Result<serde_json::Value> {
    match payload {
        Payload::Plain { data } => Ok(serde_json::from_slice(data)?),
        Payload::Compressed { data, original_len } => {
            let mut raw = Vec::with_capacity(*original_len);
            GzDecoder::new(data.as_slice()).read_to_end(&mut raw)?;
            Ok(serde_json::from_slice(&raw)?)
        }
    }
}
