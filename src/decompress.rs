// SPDX-License-Identifier: GPL-3.0-or-later
//! Expansion of compressed containers.
//!
//! A compressed container starts with the magic `"oZlB"` and a little-endian
//! `u32` decompressed size, followed by a sequence of chunk records: zero or
//! more 4-byte zero padding words, a non-zero `u32` chunk size, then either an
//! LZO1X-compressed chunk (`size < 0x8000`) or exactly `0x8000` bytes stored
//! verbatim. The input realigns to a 4-byte boundary between chunks.
//!
//! The LZO1X decoder below implements the standard minilzo wire format.

use crate::error::{DisasmError, Result};
use crate::reader::Reader;

pub const COMPRESSED_MAGIC: &[u8; 4] = b"oZlB";

const MAX_CHUNK_SIZE: u32 = 0x8000;

/// A container is compressed iff it starts with the `"oZlB"` magic.
pub fn is_compressed(data: &[u8]) -> bool {
    data.starts_with(COMPRESSED_MAGIC)
}

/// Expand a compressed container. The input must start with the magic.
pub fn expand(data: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(data);
    reader.skip(4)?;
    let decompressed_size = reader.read_u32()? as usize;
    let mut out = vec![0u8; decompressed_size];
    let mut out_offset = 0usize;

    loop {
        // seek past alignment/padding words and read the next chunk size
        let mut chunk_size = 0u32;
        while chunk_size == 0 {
            chunk_size = reader.read_u32()?;
        }

        if chunk_size < MAX_CHUNK_SIZE {
            let chunk = reader.read_bytes(chunk_size as usize)?;
            let written = lzo1x_decompress(chunk, &mut out[out_offset..])?;
            out_offset += written;
        } else {
            // chunk sizes >= the max are stored verbatim, always max-sized
            let chunk = reader.read_bytes(MAX_CHUNK_SIZE as usize)?;
            let end = out_offset + chunk.len();
            if end > out.len() {
                return Err(DisasmError::Decompress(
                    "verbatim chunk overruns the declared output size".into(),
                ));
            }
            out[out_offset..end].copy_from_slice(chunk);
            out_offset = end;
        }

        if out_offset >= decompressed_size {
            break;
        }
        reader.align4()?;
    }

    if out_offset != decompressed_size {
        return Err(DisasmError::Decompress(format!(
            "expanded {out_offset:#x} bytes, expected {decompressed_size:#x}"
        )));
    }
    Ok(out)
}

fn overrun() -> DisasmError {
    DisasmError::Decompress("input overrun in LZO stream".into())
}

fn bad_distance() -> DisasmError {
    DisasmError::Decompress("match distance reaches before output start".into())
}

/// Decompress one LZO1X chunk into `dst`, returning the number of bytes
/// written. The chunk must be exactly one compressed stream, end marker
/// included.
pub fn lzo1x_decompress(src: &[u8], dst: &mut [u8]) -> Result<usize> {
    let mut ip = 0usize;
    let mut op = 0usize;

    macro_rules! take {
        () => {{
            let b = *src.get(ip).ok_or_else(overrun)?;
            ip += 1;
            b as usize
        }};
    }

    macro_rules! literals {
        ($n:expr) => {{
            let n = $n;
            if ip + n > src.len() {
                return Err(overrun());
            }
            if op + n > dst.len() {
                return Err(DisasmError::Decompress("output overrun in LZO stream".into()));
            }
            dst[op..op + n].copy_from_slice(&src[ip..ip + n]);
            ip += n;
            op += n;
        }};
    }

    // Matches may overlap their own output, so the copy must run forward a
    // byte at a time.
    macro_rules! copy_match {
        ($m:expr, $n:expr) => {{
            let mut m = $m;
            let n = $n;
            if op + n > dst.len() {
                return Err(DisasmError::Decompress("output overrun in LZO stream".into()));
            }
            for _ in 0..n {
                dst[op] = dst[m];
                op += 1;
                m += 1;
            }
        }};
    }

    // Zero bytes extend a run length by 255 each; the terminator adds base+b.
    macro_rules! run_length {
        ($base:expr) => {{
            let mut t = 0usize;
            loop {
                let b = take!();
                if b != 0 {
                    break t + $base + b;
                }
                t += 255;
            }
        }};
    }

    #[derive(PartialEq)]
    enum Mode {
        Run,       // code < 16 is a literal run
        FirstRun,  // code < 16 is a 3-byte match (follows a literal run)
        Match,     // code < 16 is a 2-byte match (follows trailing literals)
    }
    let mut mode = Mode::Run;

    // A first byte above 17 encodes an opening literal run.
    if src.first().copied().unwrap_or(0) > 17 {
        ip = 1;
        let t = src[0] as usize - 17;
        literals!(t);
        mode = if t < 4 { Mode::Match } else { Mode::FirstRun };
    }

    loop {
        let code = take!();
        let state; // trailing literals owed after a match
        if code < 16 {
            match mode {
                Mode::Run => {
                    let t = if code == 0 { run_length!(15) } else { code };
                    literals!(t + 3);
                    mode = Mode::FirstRun;
                    continue;
                }
                Mode::FirstRun => {
                    let dist = 0x801 + (code >> 2) + (take!() << 2);
                    let m = op.checked_sub(dist).ok_or_else(bad_distance)?;
                    copy_match!(m, 3);
                    state = code & 3;
                }
                Mode::Match => {
                    let dist = 1 + (code >> 2) + (take!() << 2);
                    let m = op.checked_sub(dist).ok_or_else(bad_distance)?;
                    copy_match!(m, 2);
                    state = code & 3;
                }
            }
        } else if code >= 64 {
            // M2: short match, distance up to 0x800
            let dist = 1 + ((code >> 2) & 7) + (take!() << 3);
            let m = op.checked_sub(dist).ok_or_else(bad_distance)?;
            copy_match!(m, (code >> 5) + 1);
            state = code & 3;
        } else if code >= 32 {
            // M3: distance up to 0x4000
            let t = if code & 31 == 0 {
                run_length!(31)
            } else {
                code & 31
            };
            let d = take!() | (take!() << 8);
            let m = op.checked_sub(1 + (d >> 2)).ok_or_else(bad_distance)?;
            copy_match!(m, t + 2);
            state = d & 3;
        } else {
            // M4: distance 0x4000..0xbfff, also carries the end marker
            let base = (code & 8) << 11;
            let t = if code & 7 == 0 { run_length!(7) } else { code & 7 };
            let d = take!() | (take!() << 8);
            if base + (d >> 2) == 0 {
                // end of stream
                if ip != src.len() {
                    return Err(DisasmError::Decompress(
                        "LZO stream end marker before the end of the chunk".into(),
                    ));
                }
                return Ok(op);
            }
            let m = op
                .checked_sub(base + (d >> 2) + 0x4000)
                .ok_or_else(bad_distance)?;
            copy_match!(m, t + 2);
            state = d & 3;
        }

        if state == 0 {
            mode = Mode::Run;
        } else {
            literals!(state);
            mode = Mode::Match;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};

    const EOF_MARKER: [u8; 3] = [0x11, 0x00, 0x00];

    /// Encode `data` as a single all-literal LZO1X stream.
    fn literal_stream(data: &[u8]) -> Vec<u8> {
        assert!((4..=238).contains(&data.len()));
        let mut stream = vec![17 + data.len() as u8];
        stream.extend_from_slice(data);
        stream.extend_from_slice(&EOF_MARKER);
        stream
    }

    fn ozlb_container(decompressed_size: u32, chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(COMPRESSED_MAGIC);
        out.write_u32::<LittleEndian>(decompressed_size).unwrap();
        for chunk in chunks {
            out.write_u32::<LittleEndian>(chunk.len() as u32).unwrap();
            out.extend_from_slice(chunk);
            while out.len() % 4 != 0 {
                out.push(0);
            }
        }
        out
    }

    #[test]
    fn test_literal_only_chunk() {
        let stream = literal_stream(b"hello world");
        let mut out = [0u8; 11];
        let n = lzo1x_decompress(&stream, &mut out).unwrap();
        assert_eq!(&out[..n], b"hello world");
    }

    #[test]
    fn test_m2_match() {
        // "abcd" literals, then a 3-byte match at distance 4, then EOF
        let stream = [21, b'a', b'b', b'c', b'd', 76, 0, 0x11, 0x00, 0x00];
        let mut out = [0u8; 7];
        let n = lzo1x_decompress(&stream, &mut out).unwrap();
        assert_eq!(&out[..n], b"abcdabc");
    }

    #[test]
    fn test_truncated_stream() {
        let stream = [21, b'a', b'b'];
        let mut out = [0u8; 16];
        assert!(lzo1x_decompress(&stream, &mut out).is_err());
    }

    #[test]
    fn test_expand_compressed_container() {
        let payload = b"some object data";
        let container = ozlb_container(payload.len() as u32, &[&literal_stream(payload)]);
        assert!(is_compressed(&container));
        assert_eq!(expand(&container).unwrap(), payload);
    }

    #[test]
    fn test_expand_verbatim_chunk() {
        let payload = vec![0xAB; MAX_CHUNK_SIZE as usize];
        let mut container = Vec::new();
        container.extend_from_slice(COMPRESSED_MAGIC);
        container
            .write_u32::<LittleEndian>(payload.len() as u32)
            .unwrap();
        // stored chunks keep their true size in the header even when >= max
        container.write_u32::<LittleEndian>(MAX_CHUNK_SIZE).unwrap();
        container.extend_from_slice(&payload);
        assert_eq!(expand(&container).unwrap(), payload);
    }

    #[test]
    fn test_expand_skips_padding_words() {
        let payload = b"padded chunk";
        let stream = literal_stream(payload);
        let mut container = Vec::new();
        container.extend_from_slice(COMPRESSED_MAGIC);
        container
            .write_u32::<LittleEndian>(payload.len() as u32)
            .unwrap();
        container.write_u32::<LittleEndian>(0).unwrap();
        container.write_u32::<LittleEndian>(0).unwrap();
        container.write_u32::<LittleEndian>(stream.len() as u32).unwrap();
        container.extend_from_slice(&stream);
        assert_eq!(expand(&container).unwrap(), payload);
    }

    #[test]
    fn test_uncompressed_passthrough_detection() {
        assert!(!is_compressed(b"DGO\0plain"));
    }
}
