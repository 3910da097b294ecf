// SPDX-License-Identifier: GPL-3.0-or-later
//! Linked object files: segmented word streams with relocation tags.
//!
//! Linking retags words (pointer, split pointer, symbol, symbol offset) and
//! interns the labels those tags reference. After linking, the code/data
//! boundary is found with the `function` type tags, functions are carved and
//! decoded, and frame-pointer-relative accesses are rewritten to labels.

pub mod labels;
pub mod parse;
pub mod word;

use crate::error::{DisasmError, Result};
use crate::function::Function;
use crate::mips::format::format_instruction;
use crate::mips::insn::{Atom, InstructionKind};
use crate::mips::{decode_instruction, gpr, Register, JR_RA_WORD};
use labels::{LabelId, LabelTable};
use word::{LinkedWord, WordKind};

pub const FUNCTION_TYPE_TAG: &str = "function";

/// Segment indices of a three-segment (code-bearing) object.
pub const SEG_MAIN: usize = 0;
pub const SEG_DEBUG: usize = 1;
pub const SEG_TOP_LEVEL: usize = 2;

pub fn segment_name(seg: usize) -> &'static str {
    ["main segment", "debug segment", "top-level segment"][seg]
}

#[derive(Debug, Default, Clone)]
pub struct LinkStats {
    pub v2_code_bytes: u32,
    pub v2_link_bytes: u32,
    pub v2_pointers: u32,
    pub v2_symbol_links: u32,
    pub v3_code_bytes: u32,
    pub v3_link_bytes: u32,
    pub v3_word_pointers: u32,
    pub v3_split_pointers: u32,
    pub v3_symbol_link_word: u32,
    pub v3_symbol_link_offset: u32,
    pub code_bytes: u32,
    pub data_bytes: u32,
    pub function_count: u32,
    pub decoded_ops: u32,
    pub n_fp_reg_use: u32,
    pub n_fp_reg_use_resolved: u32,
}

impl LinkStats {
    pub fn add(&mut self, other: &LinkStats) {
        self.v2_code_bytes += other.v2_code_bytes;
        self.v2_link_bytes += other.v2_link_bytes;
        self.v2_pointers += other.v2_pointers;
        self.v2_symbol_links += other.v2_symbol_links;
        self.v3_code_bytes += other.v3_code_bytes;
        self.v3_link_bytes += other.v3_link_bytes;
        self.v3_word_pointers += other.v3_word_pointers;
        self.v3_split_pointers += other.v3_split_pointers;
        self.v3_symbol_link_word += other.v3_symbol_link_word;
        self.v3_symbol_link_offset += other.v3_symbol_link_offset;
        self.code_bytes += other.code_bytes;
        self.data_bytes += other.data_bytes;
        self.function_count += other.function_count;
        self.decoded_ops += other.decoded_ops;
        self.n_fp_reg_use += other.n_fp_reg_use;
        self.n_fp_reg_use_resolved += other.n_fp_reg_use_resolved;
    }
}

#[derive(Debug, Default)]
pub struct Segment {
    pub words: Vec<LinkedWord>,
    /// Word index where data starts; everything before it is code.
    pub data_start: usize,
    pub functions: Vec<Function>,
}

/// The kinds a symbol link may retag a word with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLinkKind {
    SymPtr,
    TypePtr,
    EmptyListPtr,
}

#[derive(Debug, Default)]
pub struct LinkedObjectFile {
    pub segments: Vec<Segment>,
    pub labels: LabelTable,
    pub stats: LinkStats,
}

impl LinkedObjectFile {
    pub fn new(n_segments: usize) -> Self {
        let mut segments = Vec::with_capacity(n_segments);
        segments.resize_with(n_segments, Segment::default);
        LinkedObjectFile {
            segments,
            labels: LabelTable::new(n_segments),
            stats: LinkStats::default(),
        }
    }

    pub fn push_word(&mut self, seg: usize, data: u32) {
        self.segments[seg].words.push(LinkedWord::plain(data));
    }

    pub fn has_any_functions(&self) -> bool {
        self.segments.iter().any(|s| !s.functions.is_empty())
    }

    /// The word at a link-table source offset. Checks alignment and bounds.
    fn word_for_link(&mut self, seg: usize, offset: usize) -> Result<&mut LinkedWord> {
        if offset % 4 != 0 {
            return Err(DisasmError::malformed(
                "unaligned link source offset",
                seg,
                offset,
            ));
        }
        let n_words = self
            .segments
            .get(seg)
            .map(|s| s.words.len())
            .ok_or_else(|| DisasmError::malformed("link into a missing segment", seg, offset))?;
        if offset / 4 >= n_words {
            return Err(DisasmError::malformed(
                "link source offset past the segment",
                seg,
                offset,
            ));
        }
        let word = &mut self.segments[seg].words[offset / 4];
        if !word.is_plain() {
            return Err(DisasmError::malformed(
                "retag of an already-linked word",
                seg,
                offset,
            ));
        }
        Ok(word)
    }

    /// Retag a word as a pointer to `(dst_seg, dst_offset)`.
    pub fn pointer_link_word(
        &mut self,
        src_seg: usize,
        src_offset: usize,
        dst_seg: usize,
        dst_offset: usize,
    ) -> Result<()> {
        let dst_words = self
            .segments
            .get(dst_seg)
            .map(|s| s.words.len())
            .ok_or_else(|| {
                DisasmError::malformed("pointer into a missing segment", dst_seg, dst_offset)
            })?;
        if dst_offset / 4 > dst_words {
            return Err(DisasmError::malformed(
                "pointer destination past the segment",
                dst_seg,
                dst_offset,
            ));
        }
        let label = self.labels.get_or_create(dst_seg, dst_offset);
        let word = self.word_for_link(src_seg, src_offset)?;
        word.kind = WordKind::Ptr { label };
        Ok(())
    }

    /// Retag a `lui`/`ori` pair as the two halves of one pointer.
    pub fn pointer_link_split_word(
        &mut self,
        src_seg: usize,
        hi_offset: usize,
        lo_offset: usize,
        dst_seg: usize,
        dst_offset: usize,
    ) -> Result<()> {
        let label = self.labels.get_or_create(dst_seg, dst_offset);
        let hi = self.word_for_link(src_seg, hi_offset)?;
        hi.kind = WordKind::HiPtr { label };
        let lo = self.word_for_link(src_seg, lo_offset)?;
        lo.kind = WordKind::LoPtr { label };
        Ok(())
    }

    /// Retag a word as a symbol, type, or empty-list reference.
    pub fn symbol_link_word(
        &mut self,
        src_seg: usize,
        src_offset: usize,
        name: &str,
        kind: SymbolLinkKind,
    ) -> Result<()> {
        let word = self.word_for_link(src_seg, src_offset)?;
        word.kind = match kind {
            SymbolLinkKind::SymPtr => WordKind::SymPtr { name: name.to_string() },
            SymbolLinkKind::TypePtr => WordKind::TypePtr { name: name.to_string() },
            SymbolLinkKind::EmptyListPtr => WordKind::EmptyListPtr,
        };
        Ok(())
    }

    /// Retag a word whose low 16 bits are an offset from the symbol-table
    /// register.
    pub fn symbol_link_offset(&mut self, src_seg: usize, src_offset: usize, name: &str) -> Result<()> {
        let word = self.word_for_link(src_seg, src_offset)?;
        word.kind = WordKind::SymOffset { name: name.to_string() };
        Ok(())
    }

    /// Canonical `L1..Ln` renaming; returns the label count.
    pub fn set_ordered_label_names(&mut self) -> usize {
        self.labels.set_ordered_names()
    }

    /// Find the code/data boundary of every segment.
    ///
    /// Code-bearing objects place all functions before all static data, so
    /// the boundary is right after the delay slot of the last `jr ra`
    /// following the last `function` type tag.
    pub fn find_code(&mut self) -> Result<()> {
        match self.segments.len() {
            1 => {
                // single segment objects never contain code
                let seg = &mut self.segments[0];
                for (i, word) in seg.words.iter().enumerate() {
                    if word.is_type_tag(FUNCTION_TYPE_TAG) {
                        return Err(DisasmError::malformed(
                            "function type tag in a data-only object",
                            0,
                            i * 4,
                        ));
                    }
                }
                seg.data_start = 0;
                self.stats.data_bytes += 4 * seg.words.len() as u32;
            }
            3 => {
                for seg_idx in 0..3 {
                    let seg = &mut self.segments[seg_idx];
                    let last_tag = seg
                        .words
                        .iter()
                        .rposition(|w| w.is_type_tag(FUNCTION_TYPE_TAG));

                    match last_tag {
                        Some(tag_idx) => {
                            let jr_ra = seg.words[tag_idx..]
                                .iter()
                                .rposition(|w| w.is_plain() && w.data == JR_RA_WORD)
                                .map(|rel| tag_idx + rel);
                            let jr_ra = jr_ra.ok_or_else(|| {
                                DisasmError::malformed(
                                    "no return after the last function tag",
                                    seg_idx,
                                    tag_idx * 4,
                                )
                            })?;
                            // the delay slot must exist
                            if jr_ra + 1 >= seg.words.len() {
                                return Err(DisasmError::malformed(
                                    "return at the very end of the segment",
                                    seg_idx,
                                    jr_ra * 4,
                                ));
                            }
                            seg.data_start = jr_ra + 2;
                        }
                        None => seg.data_start = 0,
                    }

                    // no functions may appear in the data region
                    for (i, word) in seg.words.iter().enumerate().skip(seg.data_start) {
                        if word.is_type_tag(FUNCTION_TYPE_TAG) {
                            return Err(DisasmError::malformed(
                                "function type tag in the data region",
                                seg_idx,
                                i * 4,
                            ));
                        }
                    }

                    self.stats.code_bytes += 4 * seg.data_start as u32;
                    self.stats.data_bytes += 4 * (seg.words.len() - seg.data_start) as u32;

                    // transient label for debugging word dumps
                    if seg.data_start < seg.words.len() {
                        let data_start = seg.data_start;
                        let id = self.labels.get_or_create(seg_idx, 4 * data_start);
                        self.labels.set_name(id, "L-data-start");
                    }
                }
            }
            n => {
                return Err(DisasmError::Unsupported(format!(
                    "object with {n} segments"
                )))
            }
        }
        Ok(())
    }

    /// Carve each code region into functions, bounded by `function` tags.
    pub fn find_functions(&mut self) -> Result<()> {
        if self.segments.len() == 1 {
            // data-only objects have no code region at all
            debug_assert_eq!(self.segments[0].data_start, 0);
            return Ok(());
        }

        for (seg_idx, seg) in self.segments.iter_mut().enumerate() {
            let mut function_end = seg.data_start;
            while function_end > 0 {
                let tag_loc = seg.words[..function_end]
                    .iter()
                    .rposition(|w| w.is_type_tag(FUNCTION_TYPE_TAG))
                    .ok_or_else(|| {
                        DisasmError::malformed(
                            "code region with no function type tag",
                            seg_idx,
                            function_end * 4,
                        )
                    })?;
                seg.functions.push(Function::new(seg_idx, tag_loc, function_end));
                self.stats.function_count += 1;
                function_end = tag_loc;
            }
            seg.functions.reverse();
        }
        Ok(())
    }

    /// Decode every function's words into instructions.
    pub fn disassemble_functions(&mut self) {
        let labels = &mut self.labels;
        for (seg_idx, seg) in self.segments.iter_mut().enumerate() {
            let Segment { words, functions, .. } = seg;
            for function in functions.iter_mut() {
                for word_idx in function.start_word..function.end_word {
                    let instr =
                        decode_instruction(&words[word_idx], labels, seg_idx, word_idx);
                    if instr.is_valid() {
                        self.stats.decoded_ops += 1;
                    }
                    function.instructions.push(instr);
                }
            }
        }
    }

    /// Rewrite fp-relative loads, stores, and address computations into label
    /// references. The fp register holds the address of the word after the
    /// function's type tag.
    pub fn process_fp_relative_links(&mut self) -> Result<()> {
        let fp = Register::gpr(gpr::FP);
        let labels = &mut self.labels;

        for (seg_idx, seg) in self.segments.iter_mut().enumerate() {
            let Segment { functions, .. } = seg;
            for function in functions.iter_mut() {
                for instr_idx in 0..function.instructions.len() {
                    let instr = &function.instructions[instr_idx];

                    // saving fp to the stack is not a use of its value
                    if matches!(instr.kind, InstructionKind::Sd | InstructionKind::Sq)
                        && instr.srcs[0].reg() == Some(fp)
                    {
                        continue;
                    }
                    // the 128-bit unpack shows up with fp for unrelated
                    // reasons
                    if instr.kind == InstructionKind::Pextlw {
                        continue;
                    }
                    if !instr.srcs.iter().any(|a| a.reg() == Some(fp)) {
                        continue;
                    }

                    self.stats.n_fp_reg_use += 1;
                    function.uses_fp_register = true;
                    let current_fp = 4 * (function.start_word as i64 + 1);

                    match instr.kind {
                        // direct fp-relative load, or address generation in
                        // one instruction
                        InstructionKind::Lw
                        | InstructionKind::Lwc1
                        | InstructionKind::Ld
                        | InstructionKind::Daddiu => {
                            let imm = instr.imm_src_value().ok_or_else(|| {
                                DisasmError::malformed(
                                    "fp-relative access without an immediate",
                                    seg_idx,
                                    (function.start_word + instr_idx) * 4,
                                )
                            })?;
                            let target = current_fp + imm as i64;
                            let label = fp_target_label(labels, seg_idx, target, function, instr_idx)?;
                            if let Some(atom) = function.instructions[instr_idx].imm_src_mut() {
                                *atom = Atom::Label(label);
                            }
                            self.stats.n_fp_reg_use_resolved += 1;
                        }

                        // when the 16-bit immediate can't reach, the address
                        // is built with ori (+0..2^16) or lui+ori (anywhere),
                        // then added to fp
                        InstructionKind::Daddu | InstructionKind::Addu => {
                            let offset_reg = instr
                                .srcs
                                .iter()
                                .filter_map(Atom::reg)
                                .find(|r| *r != fp)
                                .ok_or_else(|| {
                                    DisasmError::malformed(
                                        "fp added to itself",
                                        seg_idx,
                                        (function.start_word + instr_idx) * 4,
                                    )
                                })?;

                            let bad = |what: &str| {
                                DisasmError::malformed(
                                    format!("fp-relative add: {what}"),
                                    seg_idx,
                                    (function.start_word + instr_idx) * 4,
                                )
                            };

                            let prev = instr_idx
                                .checked_sub(1)
                                .and_then(|i| function.instructions.get(i))
                                .ok_or_else(|| bad("no preceding instruction"))?;
                            if prev.kind != InstructionKind::Ori {
                                return Err(bad("offset not built with ori"));
                            }
                            if prev.dsts[0].reg() != Some(offset_reg)
                                || prev.srcs[0].reg() != Some(offset_reg)
                            {
                                return Err(bad("ori works on a different register"));
                            }
                            let ori_imm =
                                prev.imm_src_value().ok_or_else(|| bad("ori already linked"))?;

                            let mut additional_offset = 0i64;
                            if let Some(pprev) = instr_idx
                                .checked_sub(2)
                                .and_then(|i| function.instructions.get(i))
                            {
                                if pprev.kind == InstructionKind::Lui {
                                    if pprev.dsts[0].reg() != Some(offset_reg) {
                                        return Err(bad("lui loads a different register"));
                                    }
                                    additional_offset =
                                        (pprev.imm_src_value().unwrap_or(0) as i64) << 16;
                                }
                            }

                            let target = current_fp + ori_imm as i64 + additional_offset;
                            let label = fp_target_label(labels, seg_idx, target, function, instr_idx)?;
                            if let Some(atom) = function.instructions[instr_idx - 1].imm_src_mut() {
                                *atom = Atom::Label(label);
                            }
                            self.stats.n_fp_reg_use_resolved += 1;
                        }

                        _ => {
                            let text = format_instruction(instr, labels);
                            return Err(DisasmError::Unsupported(format!(
                                "fp-relative use in \"{text}\""
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn fp_target_label(
    labels: &mut LabelTable,
    seg: usize,
    target: i64,
    function: &Function,
    instr_idx: usize,
) -> Result<LabelId> {
    if target < 0 {
        return Err(DisasmError::malformed(
            "fp-relative target before the segment",
            seg,
            (function.start_word + instr_idx) * 4,
        ));
    }
    Ok(labels.get_or_create(seg, target as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_seg_object(main_words: &[u32]) -> LinkedObjectFile {
        let mut obj = LinkedObjectFile::new(3);
        for &w in main_words {
            obj.push_word(SEG_MAIN, w);
        }
        obj
    }

    fn tag_function(obj: &mut LinkedObjectFile, seg: usize, word_idx: usize) {
        obj.symbol_link_word(seg, word_idx * 4, FUNCTION_TYPE_TAG, SymbolLinkKind::TypePtr)
            .unwrap();
    }

    #[test]
    fn test_retag_twice_rejected() {
        let mut obj = three_seg_object(&[0, 0, 0, 0]);
        obj.pointer_link_word(0, 0, 0, 8).unwrap();
        assert!(obj.pointer_link_word(0, 0, 0, 12).is_err());
    }

    #[test]
    fn test_unaligned_link_rejected() {
        let mut obj = three_seg_object(&[0, 0]);
        assert!(obj.pointer_link_word(0, 2, 0, 4).is_err());
    }

    #[test]
    fn test_split_pointer_shares_label() {
        let mut obj = three_seg_object(&[0x3c01_0000, 0x3421_0000, 0, 0]);
        obj.pointer_link_split_word(0, 0, 4, 0, 12).unwrap();
        let hi = obj.segments[0].words[0].label().unwrap();
        let lo = obj.segments[0].words[1].label().unwrap();
        assert_eq!(hi, lo);
        assert_eq!(obj.labels.get(hi).offset, 12);
    }

    #[test]
    fn test_find_code_data_only() {
        let mut obj = LinkedObjectFile::new(1);
        for _ in 0..4 {
            obj.push_word(0, 0);
        }
        obj.find_code().unwrap();
        assert_eq!(obj.segments[0].data_start, 0);
        assert_eq!(obj.stats.data_bytes, 16);
    }

    #[test]
    fn test_find_code_rejects_function_in_v2() {
        let mut obj = LinkedObjectFile::new(1);
        obj.push_word(0, 0);
        tag_function(&mut obj, 0, 0);
        assert!(obj.find_code().is_err());
    }

    #[test]
    fn test_find_code_and_carve_v3() {
        // one function then two data words
        let mut obj = three_seg_object(&[
            0,           // function tag
            0x0000_1025, // or v0, r0, r0
            0x03e0_0008, // jr ra
            0x03a0_e82d, // daddu sp, sp, r0
            0xdead_beef, // data
            0x1234_5678, // data
        ]);
        tag_function(&mut obj, SEG_MAIN, 0);
        obj.find_code().unwrap();
        assert_eq!(obj.segments[SEG_MAIN].data_start, 4);
        obj.find_functions().unwrap();
        let funcs = &obj.segments[SEG_MAIN].functions;
        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].start_word, 0);
        assert_eq!(funcs[0].end_word, 4);

        obj.disassemble_functions();
        assert_eq!(obj.segments[SEG_MAIN].functions[0].instructions.len(), 4);
        assert_eq!(obj.stats.decoded_ops, 4);
    }

    #[test]
    fn test_segment_count_rejected() {
        let mut obj = LinkedObjectFile::new(2);
        obj.push_word(0, 0);
        assert!(matches!(
            obj.find_code(),
            Err(DisasmError::Unsupported(_))
        ));
    }

    #[test]
    fn test_fp_relative_direct_load() {
        // tag / lw v1, 4(fp) / jr ra / daddu
        let mut obj = three_seg_object(&[
            0,
            0x8fc3_0004, // lw v1, 4(fp)
            0x03e0_0008,
            0x03a0_e82d,
            0,
        ]);
        tag_function(&mut obj, SEG_MAIN, 0);
        obj.find_code().unwrap();
        obj.find_functions().unwrap();
        obj.disassemble_functions();
        obj.process_fp_relative_links().unwrap();

        // fp points at word 1 (byte 4); 4(fp) resolves to byte 8
        let label = obj.labels.get_at(SEG_MAIN, 8).expect("label created");
        let instr = &obj.segments[SEG_MAIN].functions[0].instructions[1];
        assert_eq!(instr.imm_src(), Some(&Atom::Label(label)));
        assert_eq!(obj.stats.n_fp_reg_use, 1);
        assert_eq!(obj.stats.n_fp_reg_use_resolved, 1);
        assert!(obj.segments[SEG_MAIN].functions[0].uses_fp_register);
    }

    #[test]
    fn test_fp_relative_ori_daddu() {
        // tag / ori at, at, 16 / daddu v1, at, fp / jr ra / daddu sp
        let mut obj = three_seg_object(&[
            0,
            0x3421_0010, // ori at, at, 16
            0x003e_182d, // daddu v1, at, fp
            0x03e0_0008,
            0x03a0_e82d,
            0,
        ]);
        tag_function(&mut obj, SEG_MAIN, 0);
        obj.find_code().unwrap();
        obj.find_functions().unwrap();
        obj.disassemble_functions();
        obj.process_fp_relative_links().unwrap();

        // fp = 4, ori imm = 16 -> byte 20
        let label = obj.labels.get_at(SEG_MAIN, 20).expect("label created");
        let ori = &obj.segments[SEG_MAIN].functions[0].instructions[1];
        assert_eq!(ori.imm_src(), Some(&Atom::Label(label)));
        assert_eq!(obj.stats.n_fp_reg_use_resolved, 1);
    }
}
