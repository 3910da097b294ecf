// SPDX-License-Identifier: GPL-3.0-or-later
//! Object wire formats.
//!
//! A v2 object is a single (data-only) segment; a v3 object has exactly three
//! segments: main, debug, top-level. Both carry their word payload first and
//! a link table after it. The link table is a stream of tagged records, each
//! retagging one or two previously plain words:
//!
//! ```text
//! u32 version (2 | 3)
//! v3 only: u32 segment_count (= 3)
//! u32 word_count per segment
//! payload words, segment-major, little-endian
//! link records:
//!   0x00 end
//!   0x01 pointer:       u8 src_seg, u8 dst_seg, u32 src_off, u32 dst_off
//!   0x02 split pointer: u8 src_seg, u8 dst_seg, u32 hi_off, u32 lo_off, u32 dst_off
//!   0x03 symbol:        u8 src_seg, u32 src_off, name NUL-terminated
//!   0x04 type:          u8 src_seg, u32 src_off, name NUL-terminated
//!   0x05 empty list:    u8 src_seg, u32 src_off
//!   0x06 symbol offset: u8 src_seg, u32 src_off, name NUL-terminated
//! zero padding to the end of the object
//! ```
//!
//! Source offsets must be word aligned and the targeted words must still be
//! plain; violations are structural errors.

use crate::error::{DisasmError, Result};
use crate::linker::{LinkedObjectFile, SymbolLinkKind};
use crate::reader::Reader;

const LINK_END: u8 = 0x00;
const LINK_POINTER: u8 = 0x01;
const LINK_SPLIT_POINTER: u8 = 0x02;
const LINK_SYMBOL: u8 = 0x03;
const LINK_TYPE: u8 = 0x04;
const LINK_EMPTY_LIST: u8 = 0x05;
const LINK_SYMBOL_OFFSET: u8 = 0x06;

fn read_cstr(reader: &mut Reader) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let b = reader.read_u8()?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    String::from_utf8(bytes)
        .map_err(|_| DisasmError::MalformedContainer("non-UTF-8 symbol name".into()))
}

/// Parse one raw object into its linked form.
pub fn to_linked_object(data: &[u8]) -> Result<LinkedObjectFile> {
    let mut reader = Reader::new(data);
    let version = reader.read_u32()?;
    let n_segments = match version {
        2 => 1,
        3 => {
            let n = reader.read_u32()?;
            if n != 3 {
                return Err(DisasmError::Unsupported(format!(
                    "v3 object with {n} segments"
                )));
            }
            3
        }
        v => return Err(DisasmError::Unsupported(format!("object version {v}"))),
    };

    let mut word_counts = Vec::with_capacity(n_segments);
    for _ in 0..n_segments {
        word_counts.push(reader.read_u32()? as usize);
    }

    let mut obj = LinkedObjectFile::new(n_segments);
    for (seg, &count) in word_counts.iter().enumerate() {
        for _ in 0..count {
            let word = reader.read_u32()?;
            obj.push_word(seg, word);
        }
    }
    let payload_bytes = 4 * word_counts.iter().sum::<usize>() as u32;

    let link_start = reader.pos();
    loop {
        let opcode = reader.read_u8()?;
        match opcode {
            LINK_END => break,
            LINK_POINTER => {
                let src_seg = reader.read_u8()? as usize;
                let dst_seg = reader.read_u8()? as usize;
                let src_off = reader.read_u32()? as usize;
                let dst_off = reader.read_u32()? as usize;
                obj.pointer_link_word(src_seg, src_off, dst_seg, dst_off)?;
                if version == 2 {
                    obj.stats.v2_pointers += 1;
                } else {
                    obj.stats.v3_word_pointers += 1;
                }
            }
            LINK_SPLIT_POINTER => {
                let src_seg = reader.read_u8()? as usize;
                let dst_seg = reader.read_u8()? as usize;
                let hi_off = reader.read_u32()? as usize;
                let lo_off = reader.read_u32()? as usize;
                let dst_off = reader.read_u32()? as usize;
                obj.pointer_link_split_word(src_seg, hi_off, lo_off, dst_seg, dst_off)?;
                obj.stats.v3_split_pointers += 1;
            }
            LINK_SYMBOL | LINK_TYPE => {
                let src_seg = reader.read_u8()? as usize;
                let src_off = reader.read_u32()? as usize;
                let name = read_cstr(&mut reader)?;
                let kind = if opcode == LINK_SYMBOL {
                    SymbolLinkKind::SymPtr
                } else {
                    SymbolLinkKind::TypePtr
                };
                obj.symbol_link_word(src_seg, src_off, &name, kind)?;
                if version == 2 {
                    obj.stats.v2_symbol_links += 1;
                } else {
                    obj.stats.v3_symbol_link_word += 1;
                }
            }
            LINK_EMPTY_LIST => {
                let src_seg = reader.read_u8()? as usize;
                let src_off = reader.read_u32()? as usize;
                obj.symbol_link_word(src_seg, src_off, "", SymbolLinkKind::EmptyListPtr)?;
                if version == 2 {
                    obj.stats.v2_symbol_links += 1;
                } else {
                    obj.stats.v3_symbol_link_word += 1;
                }
            }
            LINK_SYMBOL_OFFSET => {
                let src_seg = reader.read_u8()? as usize;
                let src_off = reader.read_u32()? as usize;
                let name = read_cstr(&mut reader)?;
                obj.symbol_link_offset(src_seg, src_off, &name)?;
                if version == 2 {
                    obj.stats.v2_symbol_links += 1;
                } else {
                    obj.stats.v3_symbol_link_offset += 1;
                }
            }
            op => {
                return Err(DisasmError::Unsupported(format!("link opcode {op:#04x}")));
            }
        }
    }
    let link_bytes = (reader.pos() - link_start) as u32;

    // anything after the link table is alignment padding
    while reader.remaining() > 0 {
        if reader.read_u8()? != 0 {
            return Err(DisasmError::MalformedContainer(
                "non-zero bytes after the link table".into(),
            ));
        }
    }

    if version == 2 {
        obj.stats.v2_code_bytes = payload_bytes;
        obj.stats.v2_link_bytes = link_bytes;
    } else {
        obj.stats.v3_code_bytes = payload_bytes;
        obj.stats.v3_link_bytes = link_bytes;
    }
    Ok(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::word::WordKind;
    use byteorder::{LittleEndian, WriteBytesExt};

    struct ObjectBuilder {
        version: u32,
        segments: Vec<Vec<u32>>,
        links: Vec<u8>,
    }

    impl ObjectBuilder {
        fn v2() -> Self {
            ObjectBuilder {
                version: 2,
                segments: vec![Vec::new()],
                links: Vec::new(),
            }
        }

        fn v3() -> Self {
            ObjectBuilder {
                version: 3,
                segments: vec![Vec::new(), Vec::new(), Vec::new()],
                links: Vec::new(),
            }
        }

        fn words(mut self, seg: usize, words: &[u32]) -> Self {
            self.segments[seg].extend_from_slice(words);
            self
        }

        fn pointer(mut self, src_seg: usize, src_off: u32, dst_seg: usize, dst_off: u32) -> Self {
            self.links.push(LINK_POINTER);
            self.links.push(src_seg as u8);
            self.links.push(dst_seg as u8);
            self.links.write_u32::<LittleEndian>(src_off).unwrap();
            self.links.write_u32::<LittleEndian>(dst_off).unwrap();
            self
        }

        fn type_tag(mut self, seg: usize, off: u32, name: &str) -> Self {
            self.links.push(LINK_TYPE);
            self.links.push(seg as u8);
            self.links.write_u32::<LittleEndian>(off).unwrap();
            self.links.extend_from_slice(name.as_bytes());
            self.links.push(0);
            self
        }

        fn sym_offset(mut self, seg: usize, off: u32, name: &str) -> Self {
            self.links.push(LINK_SYMBOL_OFFSET);
            self.links.push(seg as u8);
            self.links.write_u32::<LittleEndian>(off).unwrap();
            self.links.extend_from_slice(name.as_bytes());
            self.links.push(0);
            self
        }

        fn build(self) -> Vec<u8> {
            let mut out = Vec::new();
            out.write_u32::<LittleEndian>(self.version).unwrap();
            if self.version == 3 {
                out.write_u32::<LittleEndian>(self.segments.len() as u32)
                    .unwrap();
            }
            for seg in &self.segments {
                out.write_u32::<LittleEndian>(seg.len() as u32).unwrap();
            }
            for seg in &self.segments {
                for &w in seg {
                    out.write_u32::<LittleEndian>(w).unwrap();
                }
            }
            out.extend_from_slice(&self.links);
            out.push(LINK_END);
            while out.len() % 4 != 0 {
                out.push(0);
            }
            out
        }
    }

    #[test]
    fn test_parse_v2_with_pointer() {
        let data = ObjectBuilder::v2()
            .words(0, &[0, 0, 0, 0])
            .pointer(0, 0, 0, 8)
            .build();
        let obj = to_linked_object(&data).unwrap();
        assert_eq!(obj.segments.len(), 1);
        assert!(matches!(obj.segments[0].words[0].kind, WordKind::Ptr { .. }));
        assert_eq!(obj.stats.v2_pointers, 1);
        assert_eq!(obj.stats.v2_code_bytes, 16);
    }

    #[test]
    fn test_parse_v3_with_type_and_sym_offset() {
        let data = ObjectBuilder::v3()
            .words(0, &[0, 0x0000_1025, 0x03e0_0008, 0x03a0_e82d])
            .words(2, &[0, 0x0000_1025, 0x03e0_0008, 0x03a0_e82d])
            .type_tag(0, 0, "function")
            .type_tag(2, 0, "function")
            .sym_offset(0, 4, "*kernel-version*")
            .build();
        let obj = to_linked_object(&data).unwrap();
        assert_eq!(obj.segments.len(), 3);
        assert!(obj.segments[0].words[0].is_type_tag("function"));
        assert!(matches!(
            obj.segments[0].words[1].kind,
            WordKind::SymOffset { .. }
        ));
        assert_eq!(obj.stats.v3_symbol_link_word, 2);
        assert_eq!(obj.stats.v3_symbol_link_offset, 1);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(4).unwrap();
        assert!(matches!(
            to_linked_object(&data),
            Err(DisasmError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut data = ObjectBuilder::v2().words(0, &[0]).build();
        // stomp the end marker (version + count + one word = 12 bytes in)
        data[12] = 0x7f;
        assert!(matches!(
            to_linked_object(&data),
            Err(DisasmError::Unsupported(_))
        ));
    }

    #[test]
    fn test_retag_rejected_through_wire_format() {
        let data = ObjectBuilder::v2()
            .words(0, &[0, 0])
            .pointer(0, 0, 0, 4)
            .pointer(0, 0, 0, 4)
            .build();
        assert!(matches!(
            to_linked_object(&data),
            Err(DisasmError::Malformed { .. })
        ));
    }
}
