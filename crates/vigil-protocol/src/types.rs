//! Domain types shared by the codec and the verdict wire format.

use std::net::IpAddr;

/// Tagged chunk kind carried by every inbound ring frame (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ChunkType {
    RequestStart = 0,
    RequestHeader = 1,
    RequestBody = 2,
    RequestEnd = 3,
    ResponseCode = 4,
    ResponseHeader = 5,
    ResponseBody = 6,
    ResponseEnd = 7,
    ContentLength = 8,
    MetricFromPlugin = 9,
    HoldData = 10,
}

impl ChunkType {
    pub fn from_u16(value: u16) -> Option<Self> {
        use ChunkType::*;
        Some(match value {
            0 => RequestStart,
            1 => RequestHeader,
            2 => RequestBody,
            3 => RequestEnd,
            4 => ResponseCode,
            5 => ResponseHeader,
            6 => ResponseBody,
            7 => ResponseEnd,
            8 => ContentLength,
            9 => MetricFromPlugin,
            10 => HoldData,
            _ => return None,
        })
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            ChunkType::RequestStart
                | ChunkType::RequestHeader
                | ChunkType::RequestBody
                | ChunkType::RequestEnd
        )
    }

    /// Header-like chunks that the verdict responder marks `is_header` on
    /// (§4.7 step i).
    pub fn is_header_like(self) -> bool {
        matches!(
            self,
            ChunkType::RequestHeader | ChunkType::ResponseHeader | ChunkType::ContentLength
        )
    }
}

/// Recognized `Content-Encoding` tokens (§3); multi-token and unknown
/// values are rejected by the codec rather than represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Gzip,
    Zlib,
    Brotli,
}

impl CompressionType {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "identity" => Some(CompressionType::None),
            "gzip" => Some(CompressionType::Gzip),
            "deflate" => Some(CompressionType::Zlib),
            _ => None,
        }
    }
}

/// Transaction metadata parsed from `RequestStart` (§3). `parsed_host` and
/// `parsed_uri` are optional for backward compatibility with older
/// plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMetadata {
    pub http_proto: String,
    pub method: String,
    pub host: String,
    pub listening_ip: IpAddr,
    pub listening_port: u16,
    pub uri: String,
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub parsed_host: Option<String>,
    pub parsed_uri: Option<String>,
    pub response_content_encoding: CompressionType,
}

/// One parsed body chunk (§3/§4.2). `raw` has already been decompressed by
/// the codec if the session's current direction carries a non-`None`
/// compression type.
#[derive(Debug, Clone)]
pub struct HttpBody {
    pub data: Vec<u8>,
    pub is_last_part: bool,
    pub chunk_index: u8,
}

impl HttpBody {
    pub fn is_last_chunk(&self) -> bool {
        self.is_last_part
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_type_round_trips_through_u16() {
        for raw in 0u16..=10 {
            let ty = ChunkType::from_u16(raw).unwrap();
            assert_eq!(ty as u16, raw);
        }
        assert!(ChunkType::from_u16(11).is_none());
    }

    #[test]
    fn compression_token_mapping() {
        assert_eq!(CompressionType::from_token("identity"), Some(CompressionType::None));
        assert_eq!(CompressionType::from_token("gzip"), Some(CompressionType::Gzip));
        assert_eq!(CompressionType::from_token("deflate"), Some(CompressionType::Zlib));
        assert_eq!(CompressionType::from_token("br"), None);
    }
}
