// SPDX-License-Identifier: GPL-3.0-or-later
//! Function records and the stack frame analyzer.
//!
//! The compiler emits a rigid prologue/epilogue template. Matching it tells
//! us the stack layout; any deviation means the function is hand-written
//! assembly, which is flagged and left alone rather than treated as an error.

pub mod blocks;

use crate::cfg::Cfg;
use crate::linker::labels::LabelTable;
use crate::mips::format::format_instruction;
use crate::mips::insn::{
    get_gpr_store_offset, is_gpr_2_imm, is_gpr_3, is_jr_ra, is_no_link_fpr_load,
    is_no_link_fpr_store, is_no_link_gpr_load, is_no_link_gpr_store, is_nop, Instruction,
    InstructionKind,
};
use crate::mips::{gpr, Register};
use blocks::BasicBlock;

/// GPR save priority order. The compiler saves the tail of this list, so
/// `n` saved registers are the last `n` entries in reverse.
const GPR_BACKUPS: [Register; 7] = [
    Register::gpr(gpr::GP),
    Register::gpr(gpr::S5),
    Register::gpr(gpr::S4),
    Register::gpr(gpr::S3),
    Register::gpr(gpr::S2),
    Register::gpr(gpr::S1),
    Register::gpr(gpr::S0),
];

const FPR_BACKUPS: [Register; 6] = [
    Register::fpr(30),
    Register::fpr(28),
    Register::fpr(26),
    Register::fpr(24),
    Register::fpr(22),
    Register::fpr(20),
];

fn expected_gpr_backup(n: usize, total: usize) -> Register {
    GPR_BACKUPS[(total - 1) - n]
}

fn expected_fpr_backup(n: usize, total: usize) -> Register {
    FPR_BACKUPS[(total - 1) - n]
}

fn align4(v: i32) -> i32 {
    (v + 3) & !3
}

fn align8(v: i32) -> i32 {
    (v + 7) & !7
}

fn align16(v: i32) -> i32 {
    (v + 15) & !15
}

#[derive(Debug, Default, Clone)]
pub struct Prologue {
    pub decoded: bool,
    pub total_stack_usage: i32,
    pub ra_backed_up: bool,
    pub ra_backup_offset: i32,
    pub fp_backed_up: bool,
    pub fp_backup_offset: i32,
    pub fp_set: bool,
    pub n_gpr_backup: usize,
    pub gpr_backup_offset: i32,
    pub n_fpr_backup: usize,
    pub fpr_backup_offset: i32,
    pub n_stack_var_bytes: i32,
    pub stack_var_offset: i32,
    pub epilogue_ok: bool,
}

#[derive(Debug)]
pub struct Function {
    pub segment: usize,
    /// Word index of the `function` type tag. Instruction 0 is that tag and
    /// is not executable.
    pub start_word: usize,
    pub end_word: usize,
    pub guessed_name: String,
    pub instructions: Vec<Instruction>,
    pub basic_blocks: Vec<BasicBlock>,
    pub prologue: Prologue,
    pub prologue_start: usize,
    pub prologue_end: usize,
    pub epilogue_start: Option<usize>,
    pub uses_fp_register: bool,
    pub suspected_asm: bool,
    pub warnings: Vec<String>,
    pub cfg: Option<Cfg>,
}

impl Function {
    pub fn new(segment: usize, start_word: usize, end_word: usize) -> Self {
        Function {
            segment,
            start_word,
            end_word,
            guessed_name: String::new(),
            instructions: Vec::new(),
            basic_blocks: Vec::new(),
            prologue: Prologue::default(),
            prologue_start: 0,
            prologue_end: 1,
            epilogue_start: None,
            uses_fp_register: false,
            suspected_asm: false,
            warnings: Vec::new(),
            cfg: None,
        }
    }

    fn bail(&mut self, msg: String) {
        log::warn!("{}: {}", self.display_name(), msg);
        self.warnings.push(msg);
        self.suspected_asm = true;
    }

    fn display_name(&self) -> &str {
        if self.guessed_name.is_empty() {
            "(anon-function)"
        } else {
            &self.guessed_name
        }
    }

    /// Match the prologue template, record the frame layout, and trim the
    /// prologue out of the first basic block. Deviations flag the function as
    /// suspected assembly and stop analysis of it; nothing here is fatal.
    pub fn analyze_prologue(&mut self, labels: &LabelTable) {
        let sp = Register::gpr(gpr::SP);
        let r0 = Register::gpr(gpr::R0);

        let mut idx = 1;

        // stack adjustment comes first, if there is one
        match self.instructions.get(1) {
            Some(instr)
                if is_gpr_2_imm(instr, InstructionKind::Daddiu, Some(sp), Some(sp), None) =>
            {
                self.prologue.total_stack_usage = -instr.get_src(1).imm().unwrap_or(0);
                idx += 1;
            }
            Some(_) => self.prologue.total_stack_usage = 0,
            None => {
                return self.bail("function too short for a prologue".into());
            }
        }
        if self.prologue.total_stack_usage < 0 {
            return self.bail("stack adjustment grows the frame the wrong way".into());
        }

        self.prologue_end = 1;

        if self.prologue.total_stack_usage != 0 {
            macro_rules! instr_at {
                ($i:expr) => {
                    match self.instructions.get($i) {
                        Some(instr) => instr,
                        None => {
                            return self.bail("prologue runs off the end of the function".into())
                        }
                    }
                };
            }

            // storing the stack pointer itself is something only hand-written
            // kernel code does
            {
                let instr = instr_at!(idx);
                if instr.kind == InstructionKind::Sw && instr.srcs[0].reg() == Some(sp) {
                    let text = format_instruction(instr, labels);
                    return self.bail(format!("Flagged as ASM function because of {}", text));
                }
            }

            // ra backup is always first
            if is_no_link_gpr_store(
                instr_at!(idx),
                Some(8),
                Some(Register::gpr(gpr::RA)),
                None,
                Some(sp),
            ) {
                self.prologue.ra_backed_up = true;
                self.prologue.ra_backup_offset = get_gpr_store_offset(instr_at!(idx));
                if self.prologue.ra_backup_offset != 0 {
                    return self.bail("return address saved at a nonzero offset".into());
                }
                idx += 1;
            }

            // interrupt handlers save s7; not supported
            {
                let instr = instr_at!(idx);
                if instr.kind == InstructionKind::Sd
                    && instr.srcs[0].reg() == Some(Register::gpr(gpr::S7))
                {
                    let text = format_instruction(instr, labels);
                    return self.bail(format!("Flagged as ASM function because of {}", text));
                }
            }

            // fp backup, then fp is always set from t9
            if is_no_link_gpr_store(
                instr_at!(idx),
                Some(8),
                Some(Register::gpr(gpr::FP)),
                None,
                Some(sp),
            ) {
                self.prologue.fp_backed_up = true;
                self.prologue.fp_backup_offset = get_gpr_store_offset(instr_at!(idx));
                if self.prologue.fp_backup_offset != 8 {
                    // also rejects an fp save without a preceding ra save
                    return self.bail("fp saved at an unexpected offset".into());
                }
                idx += 1;

                self.prologue.fp_set = is_gpr_3(
                    instr_at!(idx),
                    InstructionKind::Or,
                    Some(Register::gpr(gpr::FP)),
                    Some(Register::gpr(gpr::T9)),
                    Some(r0),
                );
                if !self.prologue.fp_set {
                    return self.bail("fp backup not followed by fp = t9".into());
                }
                idx += 1;
            }

            // gpr backups: count them first, the register order is fixed
            let mut n_gpr_backups = 0;
            let mut gpr_idx = idx;
            let mut expect_nothing_after_gprs = false;

            while is_no_link_gpr_store(instr_at!(gpr_idx), Some(16), None, None, Some(sp)) {
                let store_reg = instr_at!(gpr_idx).srcs[0].reg();

                // stack memory zeroed right after the backups looks like one
                if store_reg == Some(r0) {
                    self.warnings
                        .push("Stack Zeroing Detected, prologue may be wrong".into());
                    log::warn!(
                        "{}: stack zeroing detected in prologue",
                        self.display_name()
                    );
                    expect_nothing_after_gprs = true;
                    break;
                }

                // a few functions per game store a0; that's assembly
                if store_reg == Some(Register::gpr(gpr::A0)) {
                    return self.bail("a0 on stack detected, flagging as asm".into());
                }

                n_gpr_backups += 1;
                gpr_idx += 1;
            }

            if n_gpr_backups > 0 {
                self.prologue.gpr_backup_offset = get_gpr_store_offset(instr_at!(idx));
                for i in 0..n_gpr_backups {
                    let instr = instr_at!(idx + i);
                    let this_offset = get_gpr_store_offset(instr);
                    let this_reg = instr.srcs[0].reg();
                    if this_offset != self.prologue.gpr_backup_offset + 16 * i as i32 {
                        return self.bail("gpr backups are not contiguous".into());
                    }
                    if this_reg != Some(expected_gpr_backup(i, n_gpr_backups)) {
                        let text = format_instruction(instr, labels);
                        return self
                            .bail(format!("Suspected asm function due to stack store: {}", text));
                    }
                }
            }
            self.prologue.n_gpr_backup = n_gpr_backups;
            idx = gpr_idx;

            // fpr backups
            let mut n_fpr_backups = 0;
            let mut fpr_idx = idx;
            if !expect_nothing_after_gprs {
                while is_no_link_fpr_store(instr_at!(fpr_idx), None, None, Some(sp)) {
                    n_fpr_backups += 1;
                    fpr_idx += 1;
                }

                if n_fpr_backups > 0 {
                    self.prologue.fpr_backup_offset =
                        instr_at!(idx).get_src(1).imm().unwrap_or(-1);
                    for i in 0..n_fpr_backups {
                        let instr = instr_at!(idx + i);
                        let this_offset = instr.get_src(1).imm().unwrap_or(-1);
                        let this_reg = instr.srcs[0].reg();
                        if this_offset != self.prologue.fpr_backup_offset + 4 * i as i32 {
                            return self.bail("fpr backups are not contiguous".into());
                        }
                        if this_reg != Some(expected_fpr_backup(i, n_fpr_backups)) {
                            let text = format_instruction(instr, labels);
                            return self.bail(format!(
                                "Suspected asm function due to stack store: {}",
                                text
                            ));
                        }
                    }
                }
            }
            self.prologue.n_fpr_backup = n_fpr_backups;
            idx = fpr_idx;

            self.prologue_start = 1;
            self.prologue_end = idx;

            self.prologue.stack_var_offset = 0;
            if self.prologue.ra_backed_up {
                self.prologue.stack_var_offset = 8;
            }
            if self.prologue.fp_backed_up {
                self.prologue.stack_var_offset = 16;
            }

            self.prologue.n_stack_var_bytes = if n_gpr_backups == 0 && n_fpr_backups == 0 {
                self.prologue.total_stack_usage - self.prologue.stack_var_offset
            } else if n_gpr_backups == 0 {
                self.prologue.fpr_backup_offset - self.prologue.stack_var_offset
            } else if n_fpr_backups == 0 {
                self.prologue.gpr_backup_offset - self.prologue.stack_var_offset
            } else {
                if self.prologue.fpr_backup_offset <= self.prologue.gpr_backup_offset {
                    return self.bail("fpr backups below the gpr backups".into());
                }
                self.prologue.gpr_backup_offset - self.prologue.stack_var_offset
            };

            if self.prologue.n_stack_var_bytes < 0 {
                return self.bail("negative stack variable area".into());
            }

            // rebuild the layout in order and check it accounts for the
            // whole frame
            let mut total_stack = 0;
            if self.prologue.ra_backed_up {
                total_stack = align8(total_stack);
                if self.prologue.ra_backup_offset != total_stack {
                    return self.bail("ra backup misplaced in the frame".into());
                }
                total_stack += 8;
            }
            if !self.prologue.ra_backed_up && self.prologue.fp_backed_up {
                // the compiler leaves the ra slot in place anyway
                total_stack += 8;
            }
            if self.prologue.fp_backed_up {
                total_stack = align8(total_stack);
                if self.prologue.fp_backup_offset != total_stack {
                    return self.bail("fp backup misplaced in the frame".into());
                }
                total_stack += 8;
            }
            if self.prologue.n_stack_var_bytes != 0 {
                // stack var padding counts toward this section
                if self.prologue.stack_var_offset != total_stack {
                    return self.bail("stack variable area misplaced in the frame".into());
                }
                total_stack += self.prologue.n_stack_var_bytes;
            }
            if self.prologue.n_gpr_backup != 0 {
                total_stack = align16(total_stack);
                if self.prologue.gpr_backup_offset != total_stack {
                    return self.bail("gpr backups misplaced in the frame".into());
                }
                total_stack += 16 * self.prologue.n_gpr_backup as i32;
            }
            if self.prologue.n_fpr_backup != 0 {
                total_stack = align4(total_stack);
                if self.prologue.fpr_backup_offset != total_stack {
                    return self.bail("fpr backups misplaced in the frame".into());
                }
                total_stack += 4 * self.prologue.n_fpr_backup as i32;
            }
            total_stack = align16(total_stack);

            if self.prologue.total_stack_usage != total_stack {
                return self.bail(format!(
                    "frame layout accounts for {} bytes of a {} byte frame",
                    total_stack, self.prologue.total_stack_usage
                ));
            }
        }

        // the whole first block may be prologue; a loop can come back to the
        // first instruction after it
        match self.basic_blocks.first() {
            Some(first) if first.end_word >= self.prologue_end => {
                self.basic_blocks[0].start_word = self.prologue_end;
            }
            _ => {
                return self.bail("first basic block smaller than the prologue".into());
            }
        }
        self.prologue.decoded = true;

        self.check_epilogue(labels);
    }

    /// Mirror-match the epilogue against the recorded prologue and trim it
    /// from the last basic block.
    fn check_epilogue(&mut self, labels: &LabelTable) {
        if !self.prologue.decoded || self.suspected_asm {
            return;
        }
        let sp = Register::gpr(gpr::SP);
        let r0 = Register::gpr(gpr::R0);

        macro_rules! instr_at {
            ($i:expr) => {
                match self.instructions.get($i) {
                    Some(instr) => instr,
                    None => return self.bail("epilogue runs off the function start".into()),
                }
            };
        }
        macro_rules! step_back {
            ($i:expr) => {
                match $i.checked_sub(1) {
                    Some(v) => v,
                    None => return self.bail("epilogue runs off the function start".into()),
                }
            };
        }

        let mut idx = self.instructions.len() - 1;

        // alignment nops after the return
        while is_nop(instr_at!(idx)) {
            idx = step_back!(idx);
        }

        if self.prologue.total_stack_usage != 0 {
            // an asm function sometimes hides behind a compiler-inserted
            // second return; skip it, with a warning
            if is_gpr_3(
                instr_at!(idx),
                InstructionKind::Daddu,
                Some(sp),
                Some(sp),
                Some(r0),
            ) {
                idx = step_back!(idx);
                if !is_jr_ra(instr_at!(idx)) {
                    return self.bail("unmatched stack restore at the function end".into());
                }
                idx = step_back!(idx);
                self.warnings
                    .push("Double Return Epilogue - this is probably an ASM function".into());
                log::warn!("{}: double return epilogue", self.display_name());
                self.suspected_asm = true;
            }
            // the delay slot pops the frame
            if !is_gpr_2_imm(
                instr_at!(idx),
                InstructionKind::Daddiu,
                Some(sp),
                Some(sp),
                Some(self.prologue.total_stack_usage),
            ) {
                let text = format_instruction(instr_at!(idx), labels);
                return self.bail(format!(
                    "epilogue does not restore the stack pointer: {}",
                    text
                ));
            }
            idx = step_back!(idx);
        } else {
            // no frame: the delay slot is daddu sp, sp, r0
            if !is_gpr_3(
                instr_at!(idx),
                InstructionKind::Daddu,
                Some(sp),
                Some(sp),
                Some(r0),
            ) {
                return self.bail("epilogue delay slot is not a stack no-op".into());
            }
            idx = step_back!(idx);
        }

        if !is_jr_ra(instr_at!(idx)) {
            return self.bail("no jr ra at the end of the function".into());
        }
        idx = step_back!(idx);

        // restores mirror the saves
        for i in 0..self.prologue.n_gpr_backup {
            let expected_reg = GPR_BACKUPS[self.prologue.n_gpr_backup - (1 + i)];
            let expected_offset = self.prologue.gpr_backup_offset + 16 * i as i32;
            if !is_no_link_gpr_load(
                instr_at!(idx),
                16,
                true,
                Some(expected_reg),
                Some(expected_offset),
                Some(sp),
            ) {
                return self.bail("gpr restore does not mirror its backup".into());
            }
            idx = step_back!(idx);
        }

        for i in 0..self.prologue.n_fpr_backup {
            let expected_reg = FPR_BACKUPS[self.prologue.n_fpr_backup - (1 + i)];
            let expected_offset = self.prologue.fpr_backup_offset + 4 * i as i32;
            if !is_no_link_fpr_load(
                instr_at!(idx),
                Some(expected_reg),
                Some(expected_offset),
                Some(sp),
            ) {
                return self.bail("fpr restore does not mirror its backup".into());
            }
            idx = step_back!(idx);
        }

        if self.prologue.fp_backed_up {
            if !is_no_link_gpr_load(
                instr_at!(idx),
                8,
                true,
                Some(Register::gpr(gpr::FP)),
                Some(self.prologue.fp_backup_offset),
                Some(sp),
            ) {
                return self.bail("fp restore does not mirror its backup".into());
            }
            idx = step_back!(idx);
        }

        if self.prologue.ra_backed_up {
            if !is_no_link_gpr_load(
                instr_at!(idx),
                8,
                true,
                Some(Register::gpr(gpr::RA)),
                Some(self.prologue.ra_backup_offset),
                Some(sp),
            ) {
                return self.bail("ra restore does not mirror its backup".into());
            }
            idx = step_back!(idx);
        }

        match self.basic_blocks.last() {
            Some(last) if idx + 1 >= last.start_word => {
                let n = self.basic_blocks.len();
                self.basic_blocks[n - 1].end_word = idx + 1;
            }
            _ => return self.bail("epilogue overlaps the last basic block".into()),
        }
        self.prologue.epilogue_ok = true;
        self.epilogue_start = Some(idx + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::blocks::find_blocks_in_function;
    use crate::linker::word::LinkedWord;
    use crate::mips::decode_instruction;

    fn make_function(words: &[u32]) -> (Function, LabelTable) {
        let mut labels = LabelTable::new(1);
        let mut func = Function::new(0, 0, words.len());
        for (i, &w) in words.iter().enumerate() {
            func.instructions
                .push(decode_instruction(&LinkedWord::plain(w), &mut labels, 0, i));
        }
        func.basic_blocks = find_blocks_in_function(&func, &labels, 0).unwrap();
        (func, labels)
    }

    #[test]
    fn test_trivial_function_no_frame() {
        // tag, or v0 r0 r0, jr ra, daddu sp sp r0
        let (mut func, labels) = make_function(&[0, 0x0000_1025, 0x03e0_0008, 0x03a0_e82d]);
        func.analyze_prologue(&labels);
        assert!(func.prologue.decoded);
        assert_eq!(func.prologue.total_stack_usage, 0);
        assert!(func.prologue.epilogue_ok);
        assert!(!func.suspected_asm);
        assert_eq!(func.basic_blocks[0].start_word, 1);
        // the return and its delay slot are trimmed from the last block
        assert_eq!(func.basic_blocks.last().unwrap().end_word, 2);
    }

    #[test]
    fn test_frame_with_ra_backup() {
        // daddiu sp,sp,-16 / sd ra,0(sp) / ... / ld ra,0(sp) / jr ra /
        // daddiu sp,sp,16
        let (mut func, labels) = make_function(&[
            0,           // tag
            0x67bd_fff0, // daddiu sp, sp, -16
            0xffbf_0000, // sd ra, 0(sp)
            0x0000_1025, // or v0, r0, r0
            0xdfbf_0000, // ld ra, 0(sp)
            0x03e0_0008, // jr ra
            0x67bd_0010, // daddiu sp, sp, 16
        ]);
        func.analyze_prologue(&labels);
        assert!(func.prologue.decoded, "warnings: {:?}", func.warnings);
        assert_eq!(func.prologue.total_stack_usage, 16);
        assert!(func.prologue.ra_backed_up);
        assert_eq!(func.prologue.ra_backup_offset, 0);
        assert_eq!(func.prologue.n_stack_var_bytes, 8);
        assert!(func.prologue.epilogue_ok);
        assert!(!func.suspected_asm);
    }

    #[test]
    fn test_gpr_backup_order_enforced() {
        // one sq of the wrong register (s3 instead of s0) flags asm
        let (mut func, labels) = make_function(&[
            0,
            0x67bd_fff0, // daddiu sp, sp, -16
            0x7fb3_0000, // sq s3, 0(sp)
            0x03e0_0008,
            0x67bd_0010,
        ]);
        func.analyze_prologue(&labels);
        assert!(func.suspected_asm);
        assert!(!func.prologue.decoded);
        assert!(!func.warnings.is_empty());
    }

    #[test]
    fn test_single_gpr_backup_decodes() {
        // a single backup is always gp, the head of the priority list
        let (mut func, labels) = make_function(&[
            0,
            0x67bd_fff0, // daddiu sp, sp, -16
            0x7fbc_0000, // sq gp, 0(sp)
            0x0000_1025, // or v0, r0, r0
            0x7bbc_0000, // lq gp, 0(sp)
            0x03e0_0008, // jr ra
            0x67bd_0010, // daddiu sp, sp, 16
        ]);
        func.analyze_prologue(&labels);
        assert!(func.prologue.decoded, "warnings: {:?}", func.warnings);
        assert_eq!(func.prologue.n_gpr_backup, 1);
        assert_eq!(func.prologue.gpr_backup_offset, 0);
        assert_eq!(func.prologue.n_stack_var_bytes, 0);
        assert!(func.prologue.epilogue_ok);
    }

    #[test]
    fn test_double_return_tolerated_with_warning() {
        let (mut func, labels) = make_function(&[
            0,
            0x67bd_fff0, // daddiu sp, sp, -16
            0x0000_1025, // or v0, r0, r0
            0x03e0_0008, // jr ra
            0x67bd_0010, // daddiu sp, sp, 16
            0x03e0_0008, // jr ra            (compiler-inserted second return)
            0x03a0_e82d, // daddu sp, sp, r0
        ]);
        func.analyze_prologue(&labels);
        assert!(func.prologue.epilogue_ok);
        assert!(func.suspected_asm);
        assert!(func
            .warnings
            .iter()
            .any(|w| w.contains("Double Return Epilogue")));
    }
}
