// SPDX-License-Identifier: GPL-3.0-or-later
//! Outer container parsing.
//!
//! A container is an outer header `{ size: u32, name: char[60] }` followed by
//! `size` contiguous inner records `{ size: u32, name: char[60], bytes }`.
//! The stream must end exactly at the last record, and the outer name must
//! match the container's own base name.

use crate::error::{DisasmError, Result};
use crate::reader::Reader;

pub struct DgoHeader {
    pub size: u32,
    pub name: String,
}

fn read_header(reader: &mut Reader) -> Result<DgoHeader> {
    let size = reader.read_u32()?;
    let name = reader.read_name60()?;
    Ok(DgoHeader { size, name })
}

/// One inner object, still raw (unlinked).
pub struct RawObject<'a> {
    pub name: String,
    pub data: &'a [u8],
}

/// Parse an (already decompressed) container into its inner objects.
pub fn parse_dgo<'a>(data: &'a [u8], base_name: &str) -> Result<Vec<RawObject<'a>>> {
    let mut reader = Reader::new(data);
    let header = read_header(&mut reader)?;
    if header.name != base_name {
        return Err(DisasmError::MalformedContainer(format!(
            "container header names \"{}\" but the file is \"{}\"",
            header.name, base_name
        )));
    }

    let mut objects = Vec::with_capacity(header.size as usize);
    for _ in 0..header.size {
        let obj_header = read_header(&mut reader)?;
        let data = reader.read_bytes(obj_header.size as usize)?;
        objects.push(RawObject {
            name: obj_header.name,
            data,
        });
    }

    if reader.remaining() != 0 {
        return Err(DisasmError::MalformedContainer(format!(
            "{} bytes of trailing data after the last object",
            reader.remaining()
        )));
    }
    Ok(objects)
}

#[cfg(test)]
pub mod test_support {
    use byteorder::{LittleEndian, WriteBytesExt};

    pub fn push_header(out: &mut Vec<u8>, size: u32, name: &str) {
        out.write_u32::<LittleEndian>(size).unwrap();
        let mut field = [0u8; 60];
        field[..name.len()].copy_from_slice(name.as_bytes());
        out.extend_from_slice(&field);
    }

    /// Build a container from (name, bytes) pairs.
    pub fn build_dgo(base_name: &str, objects: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        push_header(&mut out, objects.len() as u32, base_name);
        for (name, data) in objects {
            push_header(&mut out, data.len() as u32, name);
            out.extend_from_slice(data);
        }
        out
    }
}
