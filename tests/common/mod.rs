// SPDX-License-Identifier: GPL-3.0-or-later
//! Builders for container and object fixtures used by the pipeline tests.

use byteorder::{LittleEndian, WriteBytesExt};

pub const JR_RA: u32 = 0x03e0_0008;
pub const DADDU_SP_SP_R0: u32 = 0x03a0_e82d;
pub const OR_V0_R0_R0: u32 = 0x0000_1025;

/// `beq r0, r0, offset` (word offset from the delay slot)
pub fn beq_r0_r0(offset: i16) -> u32 {
    0x1000_0000 | (offset as u16 as u32)
}

pub struct ObjectBuilder {
    version: u32,
    segments: Vec<Vec<u32>>,
    links: Vec<u8>,
}

impl ObjectBuilder {
    pub fn v2() -> Self {
        ObjectBuilder {
            version: 2,
            segments: vec![Vec::new()],
            links: Vec::new(),
        }
    }

    pub fn v3() -> Self {
        ObjectBuilder {
            version: 3,
            segments: vec![Vec::new(), Vec::new(), Vec::new()],
            links: Vec::new(),
        }
    }

    pub fn words(mut self, seg: usize, words: &[u32]) -> Self {
        self.segments[seg].extend_from_slice(words);
        self
    }

    pub fn pointer(mut self, src_seg: usize, src_off: u32, dst_seg: usize, dst_off: u32) -> Self {
        self.links.push(0x01);
        self.links.push(src_seg as u8);
        self.links.push(dst_seg as u8);
        self.links.write_u32::<LittleEndian>(src_off).unwrap();
        self.links.write_u32::<LittleEndian>(dst_off).unwrap();
        self
    }

    pub fn split_pointer(
        mut self,
        src_seg: usize,
        hi_off: u32,
        lo_off: u32,
        dst_seg: usize,
        dst_off: u32,
    ) -> Self {
        self.links.push(0x02);
        self.links.push(src_seg as u8);
        self.links.push(dst_seg as u8);
        self.links.write_u32::<LittleEndian>(hi_off).unwrap();
        self.links.write_u32::<LittleEndian>(lo_off).unwrap();
        self.links.write_u32::<LittleEndian>(dst_off).unwrap();
        self
    }

    fn named_link(mut self, opcode: u8, seg: usize, off: u32, name: &str) -> Self {
        self.links.push(opcode);
        self.links.push(seg as u8);
        self.links.write_u32::<LittleEndian>(off).unwrap();
        self.links.extend_from_slice(name.as_bytes());
        self.links.push(0);
        self
    }

    pub fn symbol(self, seg: usize, off: u32, name: &str) -> Self {
        self.named_link(0x03, seg, off, name)
    }

    pub fn type_tag(self, seg: usize, off: u32, name: &str) -> Self {
        self.named_link(0x04, seg, off, name)
    }

    pub fn empty_list(mut self, seg: usize, off: u32) -> Self {
        self.links.push(0x05);
        self.links.push(seg as u8);
        self.links.write_u32::<LittleEndian>(off).unwrap();
        self
    }

    pub fn function_tag(self, seg: usize, off: u32) -> Self {
        self.type_tag(seg, off, "function")
    }

    pub fn build(self) -> Vec<u8> {
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
        out.push(0x00);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }
}

/// A v3 object whose top-level segment holds one trivial function, as every
/// real code-bearing object does.
pub fn v3_with_main(main_words: &[u32]) -> ObjectBuilder {
    ObjectBuilder::v3()
        .words(0, main_words)
        .words(2, &[0, OR_V0_R0_R0, JR_RA, DADDU_SP_SP_R0])
        .function_tag(0, 0)
        .function_tag(2, 0)
}

fn push_header(out: &mut Vec<u8>, size: u32, name: &str) {
    out.write_u32::<LittleEndian>(size).unwrap();
    let mut field = [0u8; 60];
    field[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&field);
}

pub fn build_dgo(base_name: &str, objects: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    push_header(&mut out, objects.len() as u32, base_name);
    for (name, data) in objects {
        push_header(&mut out, data.len() as u32, name);
        out.extend_from_slice(data);
    }
    out
}

/// Wrap raw bytes as an "oZlB" container of all-literal LZO chunks.
pub fn compress_literal(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"oZlB");
    out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
    for chunk in data.chunks(200) {
        let mut stream = vec![17 + chunk.len() as u8];
        stream.extend_from_slice(chunk);
        stream.extend_from_slice(&[0x11, 0x00, 0x00]);
        out.write_u32::<LittleEndian>(stream.len() as u32).unwrap();
        out.extend_from_slice(&stream);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
    out
}

pub fn test_config_json(find_basic_blocks: bool) -> String {
    format!(
        r#"{{
            "game_version": 1,
            "dgo_names": [],
            "write_disassembly": true,
            "write_hexdump": true,
            "write_scripts": true,
            "write_hexdump_on_v3_only": false,
            "disassemble_objects_without_functions": true,
            "find_basic_blocks": {find_basic_blocks},
            "write_hex_near_instructions": true
        }}"#
    )
}
