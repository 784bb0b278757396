//! Pure parse functions for the chunk wire format (§3).
//!
//! Every frame on the ring is `chunk_type:u16` (see [`crate::types::ChunkType`])
//! followed by a chunk-specific body; this module only concerns itself with
//! the body, the ring reader peels off the tag first. All multi-byte
//! integers are little-endian, matching a same-host shared-memory transport
//! rather than a routed network protocol.

use std::net::IpAddr;

use vigil_common::{IntakeError, IntakeResult};

use crate::headers::{HeaderList, HttpHeader};
use crate::types::{CompressionType, HttpBody, TransactionMetadata};

struct ChunkReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        ChunkReader { buf, pos: 0 }
    }

    fn require(&self, n: usize) -> IntakeResult<()> {
        if self.pos + n > self.buf.len() {
            return Err(IntakeError::parse(format!(
                "chunk truncated: need {n} more bytes at offset {}, have {}",
                self.pos,
                self.buf.len()
            )));
        }
        Ok(())
    }

    fn read_u8(&mut self) -> IntakeResult<u8> {
        self.require(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn read_u16(&mut self) -> IntakeResult<u16> {
        self.require(2)?;
        let v = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    fn read_u32(&mut self) -> IntakeResult<u32> {
        self.require(4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_bool(&mut self) -> IntakeResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_bytes(&mut self, n: usize) -> IntakeResult<&'a [u8]> {
        self.require(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_lp_string(&mut self) -> IntakeResult<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| IntakeError::parse(format!("non-utf8 field: {e}")))
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Errors unless every byte of the chunk body has been consumed;
    /// trailing bytes mean the wire layout and the parser disagree.
    fn finish(&self) -> IntakeResult<()> {
        if self.pos != self.buf.len() {
            return Err(IntakeError::parse(format!(
                "{} trailing bytes after parsing chunk body",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

/// Reads a length-prefixed ASCII address and parses it as v4 or v6
/// (`deserializeIpAddrParam`: `deserializeStrParam` then `IPAddr::createIPAddr`).
fn read_ip(reader: &mut ChunkReader<'_>) -> IntakeResult<IpAddr> {
    let raw = reader.read_lp_string()?;
    raw.parse::<IpAddr>()
        .map_err(|e| IntakeError::parse(format!("invalid ip address {raw:?}: {e}")))
}

/// Parses a `RequestStart` chunk body into [`TransactionMetadata`].
///
/// The 8 mandatory fields (`createTransactionData`) are always present;
/// `parsed_host`/`parsed_uri` carry no presence flag on the wire — if any
/// bytes remain after the mandatory fields, both are read unconditionally,
/// and either way the body must then be exactly consumed.
pub fn parse_transaction_metadata(buf: &[u8]) -> IntakeResult<TransactionMetadata> {
    let mut reader = ChunkReader::new(buf);

    let http_proto = reader.read_lp_string()?;
    let method = reader.read_lp_string()?;
    let host = reader.read_lp_string()?;
    let listening_ip = read_ip(&mut reader)?;
    let listening_port = reader.read_u16()?;
    let uri = reader.read_lp_string()?;
    let client_ip = read_ip(&mut reader)?;
    let client_port = reader.read_u16()?;

    let (parsed_host, parsed_uri) = if reader.remaining() == 0 {
        (None, None)
    } else {
        let parsed_host = reader.read_lp_string()?;
        let parsed_uri = reader.read_lp_string()?;
        (Some(parsed_host), Some(parsed_uri))
    };

    reader.finish()?;

    Ok(TransactionMetadata {
        http_proto,
        method,
        host,
        listening_ip,
        listening_port,
        uri,
        client_ip,
        client_port,
        parsed_host,
        parsed_uri,
        response_content_encoding: CompressionType::None,
    })
}

/// Parses a `ResponseCode` chunk body: the numeric status followed by the
/// declared response `Content-Encoding` token, if any.
pub fn parse_response_code(buf: &[u8]) -> IntakeResult<(u16, CompressionType)> {
    let mut reader = ChunkReader::new(buf);
    let status = reader.read_u16()?;
    let has_encoding = reader.read_bool()?;
    let encoding = if has_encoding {
        let token = reader.read_lp_string()?;
        parse_content_encoding_token(&token)?
    } else {
        CompressionType::None
    };
    Ok((status, encoding))
}

/// Parses a `ContentLength` chunk body.
pub fn parse_content_length(buf: &[u8]) -> IntakeResult<u64> {
    let mut reader = ChunkReader::new(buf);
    let low = reader.read_u32()?;
    let high = reader.read_u32()?;
    Ok(((high as u64) << 32) | low as u64)
}

/// Parses one header bulk (`RequestHeader`/`ResponseHeader`) into headers to
/// append, plus whether this was the bulk's final header overall. Mirrors
/// `genHeaders`: `is_last_header_bulk:u8`, `part_count:u8`, then
/// `part_count` `(key, value)` length-prefixed pairs.
pub fn parse_header_bulk(buf: &[u8], next_global_index: u8) -> IntakeResult<(HeaderList, u8)> {
    let mut reader = ChunkReader::new(buf);
    let is_last_header_bulk = reader.read_bool()?;
    let part_count = reader.read_u8()?;

    let mut headers = HeaderList::new();
    let mut index = next_global_index;
    for i in 0..part_count {
        let key = reader.read_lp_string()?;
        let value = reader.read_lp_string()?;
        let is_terminal = is_last_header_bulk && i + 1 == part_count;
        headers.push(HttpHeader::new(key, value, index, is_terminal));
        index = index.saturating_add(1);
    }

    Ok((headers, index))
}

/// Parses a `RequestBody`/`ResponseBody` chunk body. Mirrors `genBody`:
/// `is_last_part:u8`, `chunk_index:u8`, then the raw (possibly compressed)
/// bytes running to the end of the chunk.
pub fn parse_body(buf: &[u8]) -> IntakeResult<HttpBody> {
    let mut reader = ChunkReader::new(buf);
    let is_last_part = reader.read_bool()?;
    let chunk_index = reader.read_u8()?;
    let data = reader.rest().to_vec();
    Ok(HttpBody {
        data,
        is_last_part,
        chunk_index,
    })
}

/// Looks up and validates the `Content-Encoding` header, rejecting
/// multi-token values and unrecognized tokens (`convertToContentEncoding`).
pub fn parse_content_encoding(headers: &HeaderList) -> IntakeResult<CompressionType> {
    match headers.find(crate::headers::names::CONTENT_ENCODING) {
        None => Ok(CompressionType::None),
        Some(header) => parse_content_encoding_token(header.value.trim()),
    }
}

fn parse_content_encoding_token(token: &str) -> IntakeResult<CompressionType> {
    if token.contains(',') {
        return Err(IntakeError::parse(format!(
            "multiple content encodings are not supported: {token}"
        )));
    }
    CompressionType::from_token(token)
        .ok_or_else(|| IntakeError::parse(format!("unrecognized content encoding: {token}")))
}

/// Splits a tenant/profile header value on `,`, always returning exactly two
/// elements (the profile is empty when only a tenant id is present).
pub fn parse_active_tenant_and_profile(raw: &str) -> (String, String) {
    let mut parts = raw.splitn(2, ',');
    let tenant = parts.next().unwrap_or("").to_string();
    let profile = parts.next().unwrap_or("").to_string();
    (tenant, profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lp(s: &str) -> Vec<u8> {
        let mut out = (s.len() as u16).to_le_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn parses_header_bulk_with_terminal_flag() {
        let mut buf = vec![1u8, 2u8]; // is_last_header_bulk=true, part_count=2
        buf.extend(lp("Host"));
        buf.extend(lp("example.com"));
        buf.extend(lp("Accept"));
        buf.extend(lp("*/*"));

        let (headers, next_index) = parse_header_bulk(&buf, 0).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(next_index, 2);
        assert!(headers.terminal().is_some());
        assert_eq!(headers.terminal().unwrap().key, "Accept");
    }

    #[test]
    fn parses_body_chunk() {
        let mut buf = vec![1u8, 3u8];
        buf.extend_from_slice(b"payload");
        let body = parse_body(&buf).unwrap();
        assert!(body.is_last_part);
        assert_eq!(body.chunk_index, 3);
        assert_eq!(body.data, b"payload");
    }

    #[test]
    fn rejects_multi_token_content_encoding() {
        let mut headers = HeaderList::new();
        headers.push(HttpHeader::new(
            "Content-Encoding".into(),
            "gzip, br".into(),
            0,
            true,
        ));
        assert!(parse_content_encoding(&headers).is_err());
    }

    #[test]
    fn unknown_content_encoding_token_errors() {
        let mut headers = HeaderList::new();
        headers.push(HttpHeader::new(
            "Content-Encoding".into(),
            "br".into(),
            0,
            true,
        ));
        assert!(parse_content_encoding(&headers).is_err());
    }

    #[test]
    fn tenant_profile_split_always_has_two_elements() {
        assert_eq!(
            parse_active_tenant_and_profile("tenant-a"),
            ("tenant-a".to_string(), String::new())
        );
        assert_eq!(
            parse_active_tenant_and_profile("tenant-a,profile-b"),
            ("tenant-a".to_string(), "profile-b".to_string())
        );
    }

    fn transaction_metadata_buf(with_parsed: bool, trailing_garbage: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(lp("HTTP/1.1"));
        buf.extend(lp("GET"));
        buf.extend(lp("example.com"));
        buf.extend(lp("10.0.0.1"));
        buf.extend_from_slice(&8080u16.to_le_bytes());
        buf.extend(lp("/index"));
        buf.extend(lp("::1"));
        buf.extend_from_slice(&54321u16.to_le_bytes());
        if with_parsed {
            buf.extend(lp("example.com"));
            buf.extend(lp("/index"));
        }
        if trailing_garbage {
            buf.push(0xff);
        }
        buf
    }

    #[test]
    fn transaction_metadata_without_parsed_fields() {
        let buf = transaction_metadata_buf(false, false);
        let metadata = parse_transaction_metadata(&buf).unwrap();
        assert_eq!(metadata.listening_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(metadata.client_ip, "::1".parse::<IpAddr>().unwrap());
        assert_eq!(metadata.listening_port, 8080);
        assert!(metadata.parsed_host.is_none());
        assert!(metadata.parsed_uri.is_none());
    }

    #[test]
    fn transaction_metadata_with_parsed_fields() {
        let buf = transaction_metadata_buf(true, false);
        let metadata = parse_transaction_metadata(&buf).unwrap();
        assert_eq!(metadata.parsed_host.as_deref(), Some("example.com"));
        assert_eq!(metadata.parsed_uri.as_deref(), Some("/index"));
    }

    #[test]
    fn transaction_metadata_rejects_trailing_garbage() {
        let buf = transaction_metadata_buf(false, true);
        assert!(parse_transaction_metadata(&buf).is_err());

        let buf = transaction_metadata_buf(true, true);
        assert!(parse_transaction_metadata(&buf).is_err());
    }

    #[test]
    fn content_length_reassembles_64_bit_value() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&42u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(parse_content_length(&buf).unwrap(), 42);
    }
}
