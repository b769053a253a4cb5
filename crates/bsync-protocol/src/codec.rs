use crate::error::{ProtocolError, ProtocolResult};
use crate::relink::{RelinkEntry, MAX_FRAME_SIZE};

/// Codec for relink entry streams.
pub struct RelinkCodec;

impl RelinkCodec {
    /// Encode one entry with framing: [4 bytes len][1 byte tag][payload]
    pub fn encode(entry: &RelinkEntry) -> ProtocolResult<Vec<u8>> {
        let payload =
            bincode::serialize(entry).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(4 + 1 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(entry.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode one framed entry. Returns (entry, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(RelinkEntry, usize)> {
        if data.len() < 5 {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len - 1,
                max: MAX_FRAME_SIZE,
            });
        }
        let total = 4 + len;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let tag = data[4];
        let entry: RelinkEntry = bincode::deserialize(&data[5..total])
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if entry.type_tag() != tag {
            return Err(ProtocolError::InvalidEntryType(tag));
        }
        Ok((entry, total))
    }

    /// Encode a whole entry list as consecutive frames.
    pub fn encode_all(entries: &[RelinkEntry]) -> ProtocolResult<Vec<u8>> {
        let mut out = Vec::new();
        for entry in entries {
            out.extend_from_slice(&Self::encode(entry)?);
        }
        Ok(out)
    }

    /// Decode consecutive frames until the input is exhausted.
    pub fn decode_all(mut data: &[u8]) -> ProtocolResult<Vec<RelinkEntry>> {
        let mut entries = Vec::new();
        while !data.is_empty() {
            let (entry, consumed) = Self::decode(data)?;
            entries.push(entry);
            data = &data[consumed..];
        }
        Ok(entries)
    }
}
