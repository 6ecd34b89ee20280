use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Encodes one transport chunk for a base64 content save.
///
/// Standard RFC 4648 alphabet, `=` padding, no line wrapping. Each chunk is
/// encoded on its own, so padding can appear at every chunk boundary.
pub fn encode_chunk(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_chunk(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text.trim())
}
