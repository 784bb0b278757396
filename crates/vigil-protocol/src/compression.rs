//! Streaming gzip / deflate / brotli compression pipe (§4.3).
//!
//! One [`CompressionStream`] holds at most one opaque encoder/decoder state
//! at a time; the session store keeps one per direction (request/response).
//! Brotli is never selected from the `Content-Encoding` header (it is not a
//! recognized token, see [`crate::types::CompressionType::from_token`]) —
//! instead the decoder probes for it on the first chunk of a stream, ported
//! literally from the original `isBrotli` heuristic.

use std::io::{Cursor, Read, Write};

use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use vigil_common::{IntakeError, IntakeResult};

use crate::types::CompressionType;

const MAX_RETRIES: u32 = 3;
const BROTLI_PROBE_SIZE: usize = 64;
const BROTLI_BUFFER_SIZE: usize = 16_384;
const MAX_DECOMPRESSED_BUFFER: usize = 256 * 1024 * 1024;

enum EncodeState {
    Uninitialized,
    Gzip(GzEncoder<Vec<u8>>),
    Zlib(ZlibEncoder<Vec<u8>>),
    Brotli(Box<brotli::CompressorWriter<Vec<u8>>>),
}

enum DecodeState {
    Uninitialized,
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Brotli(Box<brotli::DecompressorWriter<Vec<u8>>>),
}

/// One direction's compression state. Disposed (reset to `Uninitialized`)
/// when `is_last` is asserted on either side.
pub struct CompressionStream {
    encode: EncodeState,
    decode: DecodeState,
}

impl Default for CompressionStream {
    fn default() -> Self {
        CompressionStream {
            encode: EncodeState::Uninitialized,
            decode: DecodeState::Uninitialized,
        }
    }
}

impl CompressionStream {
    pub fn new() -> Self {
        CompressionStream::default()
    }

    pub fn compress(
        &mut self,
        compression_type: CompressionType,
        data: &[u8],
        is_last: bool,
    ) -> IntakeResult<Vec<u8>> {
        match compression_type {
            CompressionType::None => Ok(data.to_vec()),
            CompressionType::Brotli => self.compress_brotli(data, is_last),
            CompressionType::Gzip | CompressionType::Zlib => {
                self.compress_deflate(compression_type, data, is_last)
            }
        }
    }

    /// Returns the decompressed bytes plus whether the stream reported
    /// completion (`is_last_chunk`).
    pub fn decompress(&mut self, data: &[u8]) -> IntakeResult<(Vec<u8>, bool)> {
        if matches!(self.decode, DecodeState::Uninitialized) && !data.is_empty() && is_brotli(data)
        {
            self.decode = DecodeState::Brotli(Box::new(brotli::DecompressorWriter::new(
                Vec::new(),
                BROTLI_BUFFER_SIZE,
            )));
        }

        if matches!(self.decode, DecodeState::Brotli(_)) {
            return self.decompress_brotli(data);
        }

        self.decompress_inflate(data)
    }

    fn compress_deflate(
        &mut self,
        compression_type: CompressionType,
        data: &[u8],
        is_last: bool,
    ) -> IntakeResult<Vec<u8>> {
        if matches!(self.encode, EncodeState::Uninitialized) {
            self.encode = match compression_type {
                CompressionType::Gzip => {
                    EncodeState::Gzip(GzEncoder::new(Vec::new(), Compression::default()))
                }
                CompressionType::Zlib => {
                    EncodeState::Zlib(ZlibEncoder::new(Vec::new(), Compression::default()))
                }
                _ => unreachable!("caller only routes gzip/zlib here"),
            };
        }

        let mut retries = 0u32;
        let before_len;
        match &mut self.encode {
            EncodeState::Gzip(enc) => {
                before_len = enc.get_ref().len();
                enc.write_all(data)
                    .map_err(|e| IntakeError::compression(format!("gzip write failed: {e}")))?;
            }
            EncodeState::Zlib(enc) => {
                before_len = enc.get_ref().len();
                enc.write_all(data)
                    .map_err(|e| IntakeError::compression(format!("zlib write failed: {e}")))?;
            }
            _ => unreachable!(),
        }

        if is_last {
            let output = match std::mem::replace(&mut self.encode, EncodeState::Uninitialized) {
                EncodeState::Gzip(enc) => enc
                    .finish()
                    .map_err(|e| IntakeError::compression(format!("gzip finish failed: {e}")))?,
                EncodeState::Zlib(enc) => enc
                    .finish()
                    .map_err(|e| IntakeError::compression(format!("zlib finish failed: {e}")))?,
                _ => unreachable!(),
            };
            return Ok(output);
        }

        let drained = match &mut self.encode {
            EncodeState::Gzip(enc) => {
                enc.flush()
                    .map_err(|e| IntakeError::compression(format!("gzip flush failed: {e}")))?;
                std::mem::take(enc.get_mut())
            }
            EncodeState::Zlib(enc) => {
                enc.flush()
                    .map_err(|e| IntakeError::compression(format!("zlib flush failed: {e}")))?;
                std::mem::take(enc.get_mut())
            }
            _ => unreachable!(),
        };

        if drained.is_empty() && !data.is_empty() && drained.len() == before_len {
            retries += 1;
            if retries > MAX_RETRIES {
                return Err(IntakeError::compression(
                    "no results from deflate more than three times",
                ));
            }
        }

        Ok(drained)
    }

    fn compress_brotli(&mut self, data: &[u8], is_last: bool) -> IntakeResult<Vec<u8>> {
        if matches!(self.encode, EncodeState::Uninitialized) {
            self.encode = EncodeState::Brotli(Box::new(brotli::CompressorWriter::new(
                Vec::new(),
                BROTLI_BUFFER_SIZE,
                11,
                22,
            )));
        }

        let enc = match &mut self.encode {
            EncodeState::Brotli(enc) => enc,
            _ => {
                return Err(IntakeError::compression(
                    "compression stream in inconsistent state for brotli compression",
                ))
            }
        };

        enc.write_all(data)
            .map_err(|e| IntakeError::compression(format!("brotli compression error: {e}")))?;
        enc.flush()
            .map_err(|e| IntakeError::compression(format!("brotli compression error: {e}")))?;

        if is_last {
            let enc = match std::mem::replace(&mut self.encode, EncodeState::Uninitialized) {
                EncodeState::Brotli(enc) => enc,
                _ => unreachable!(),
            };
            return Ok(*enc.into_inner());
        }

        let output = std::mem::take(enc.get_mut());
        Ok(output)
    }

    fn decompress_inflate(&mut self, data: &[u8]) -> IntakeResult<(Vec<u8>, bool)> {
        if matches!(self.decode, DecodeState::Uninitialized) {
            self.decode = if looks_like_gzip(data) {
                DecodeState::Gzip(GzDecoder::new(Vec::new()))
            } else {
                DecodeState::Zlib(ZlibDecoder::new(Vec::new()))
            };
        }

        let mut retries = 0u32;
        loop {
            let before_len;
            let write_result = match &mut self.decode {
                DecodeState::Gzip(dec) => {
                    before_len = dec.get_ref().len();
                    dec.write_all(data)
                }
                DecodeState::Zlib(dec) => {
                    before_len = dec.get_ref().len();
                    dec.write_all(data)
                }
                _ => unreachable!(),
            };

            match write_result {
                Ok(()) => {
                    let after_len = match &self.decode {
                        DecodeState::Gzip(dec) => dec.get_ref().len(),
                        DecodeState::Zlib(dec) => dec.get_ref().len(),
                        _ => unreachable!(),
                    };
                    if after_len == before_len && !data.is_empty() {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            return Err(IntakeError::compression(
                                "no results from inflate more than three times",
                            ));
                        }
                        continue;
                    }
                    let output = match &mut self.decode {
                        DecodeState::Gzip(dec) => std::mem::take(dec.get_mut()),
                        DecodeState::Zlib(dec) => std::mem::take(dec.get_mut()),
                        _ => unreachable!(),
                    };
                    return Ok((output, false));
                }
                Err(e) => {
                    return Err(IntakeError::compression(format!(
                        "error in 'inflate': {e}"
                    )))
                }
            }
        }
    }

    /// Feeds `data` into the session's persistent brotli decoder state
    /// (mirrors `decompress_inflate`'s persistent `GzDecoder`/
    /// `ZlibDecoder`): a multi-chunk body streams through one decoder
    /// across calls rather than being re-parsed as a standalone stream on
    /// every chunk.
    fn decompress_brotli(&mut self, data: &[u8]) -> IntakeResult<(Vec<u8>, bool)> {
        let mut retries = 0u32;
        loop {
            let before_len;
            let write_result = match &mut self.decode {
                DecodeState::Brotli(dec) => {
                    before_len = dec.get_ref().len();
                    dec.write_all(data)
                }
                _ => unreachable!(),
            };

            match write_result {
                Ok(()) => {
                    let after_len = match &self.decode {
                        DecodeState::Brotli(dec) => dec.get_ref().len(),
                        _ => unreachable!(),
                    };
                    if after_len > MAX_DECOMPRESSED_BUFFER {
                        return Err(IntakeError::compression(
                            "brotli decompression buffer size limit exceeded",
                        ));
                    }
                    if after_len == before_len && !data.is_empty() {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            return Err(IntakeError::compression(
                                "no results from brotli decode more than three times",
                            ));
                        }
                        continue;
                    }
                    let output = match &mut self.decode {
                        DecodeState::Brotli(dec) => std::mem::take(dec.get_mut()),
                        _ => unreachable!(),
                    };
                    return Ok((output, false));
                }
                Err(e) => {
                    return Err(IntakeError::compression(format!(
                        "error in brotli decode: {e}"
                    )))
                }
            }
        }
    }
}

fn looks_like_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Trial-decodes a small probe of `data` through a throwaway brotli decoder
/// to decide whether this stream is brotli, since raw brotli carries no
/// magic number.
fn is_brotli(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    let probe_len = data.len().min(BROTLI_PROBE_SIZE);
    let mut decompressor = brotli::Decompressor::new(Cursor::new(&data[..probe_len]), probe_len);
    let mut probe_out = vec![0u8; BROTLI_PROBE_SIZE];
    matches!(decompressor.read(&mut probe_out), Ok(n) if n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trip() {
        let mut encoder = CompressionStream::new();
        let input = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = encoder
            .compress(CompressionType::Gzip, &input, true)
            .unwrap();

        let mut decoder = CompressionStream::new();
        let (decompressed, _) = decoder.decompress(&compressed).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn zlib_round_trip() {
        let mut encoder = CompressionStream::new();
        let input = b"session opaque saved data payload".to_vec();
        let compressed = encoder
            .compress(CompressionType::Zlib, &input, true)
            .unwrap();

        let mut decoder = CompressionStream::new();
        let (decompressed, _) = decoder.decompress(&compressed).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn brotli_round_trip() {
        let mut encoder = CompressionStream::new();
        let input = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = encoder
            .compress(CompressionType::Brotli, &input, true)
            .unwrap();

        let mut decoder = CompressionStream::new();
        let (decompressed, _) = decoder.decompress(&compressed).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn brotli_round_trip_across_multiple_chunks() {
        let mut encoder = CompressionStream::new();
        let first = b"the quick brown fox ".repeat(200);
        let second = b"jumps over the lazy dog".repeat(200);

        let compressed_first = encoder
            .compress(CompressionType::Brotli, &first, false)
            .unwrap();
        let compressed_second = encoder
            .compress(CompressionType::Brotli, &second, true)
            .unwrap();

        let mut decoder = CompressionStream::new();
        let mut decompressed = Vec::new();
        let (chunk, _) = decoder.decompress(&compressed_first).unwrap();
        decompressed.extend(chunk);
        let (chunk, _) = decoder.decompress(&compressed_second).unwrap();
        decompressed.extend(chunk);

        let mut expected = first;
        expected.extend(second);
        assert_eq!(decompressed, expected);
    }

    #[test]
    fn none_passes_through_unchanged() {
        let mut stream = CompressionStream::new();
        let input = b"plain text body".to_vec();
        let output = stream.compress(CompressionType::None, &input, true).unwrap();
        assert_eq!(output, input);
    }
}
