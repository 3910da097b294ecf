// SPDX-License-Identifier: GPL-3.0-or-later
//! Word-to-instruction decoding.
//!
//! The decoder is a static table keyed on the primary opcode field, with
//! secondary dispatch on `funct`, `rt`, `rs`, or `sa` where the architecture
//! does the same. Unrecognized encodings decode to `Invalid` and still
//! consume one word.
//!
//! Branch offsets are PC-relative word counts; they are interned as labels in
//! the enclosing segment at decode time. A word that carries a link tag
//! propagates that tag into the instruction's immediate slot, so a tagged
//! `lui`/`ori` pair renders with its target label instead of raw halves.

use crate::linker::labels::{LabelId, LabelTable};
use crate::linker::word::{LinkedWord, WordKind};
use crate::mips::insn::{Atom, Instruction, InstructionKind as IK};
use crate::mips::Register;

/// Decode the word at `word_idx` (a word index into segment `seg`).
pub fn decode_instruction(
    word: &LinkedWord,
    labels: &mut LabelTable,
    seg: usize,
    word_idx: usize,
) -> Instruction {
    let mut instr = decode_raw(word.data, labels, seg, word_idx);

    // Propagate the word's link tag into the immediate operand.
    match &word.kind {
        WordKind::Ptr { label } | WordKind::HiPtr { label } | WordKind::LoPtr { label } => {
            if let Some(atom) = instr.imm_src_mut() {
                *atom = Atom::Label(*label);
            }
        }
        WordKind::SymOffset { name } => {
            if let Some(atom) = instr.imm_src_mut() {
                *atom = Atom::Symbol(name.clone());
            }
        }
        _ => {}
    }
    instr
}

/// Label for a PC-relative branch offset, or `None` if the target would be
/// before the start of the segment.
fn branch_dest(
    labels: &mut LabelTable,
    seg: usize,
    word_idx: usize,
    offset: i32,
) -> Option<LabelId> {
    let target = word_idx as i64 + 1 + offset as i64;
    if target < 0 {
        return None;
    }
    Some(labels.get_or_create(seg, target as usize * 4))
}

fn decode_raw(data: u32, labels: &mut LabelTable, seg: usize, word_idx: usize) -> Instruction {
    let op = (data >> 26) & 0x3f;
    let rs = ((data >> 21) & 31) as u8;
    let rt = ((data >> 16) & 31) as u8;
    let rd = ((data >> 11) & 31) as u8;
    let sa = ((data >> 6) & 31) as u8;
    let funct = data & 0x3f;
    let simm = data as u16 as i16 as i32;
    let uimm = (data & 0xffff) as i32;

    let gpr = Register::gpr;
    let fpr = Register::fpr;

    let rt_rs_imm = |kind, imm| {
        Instruction::new(
            kind,
            vec![Atom::Reg(gpr(rt))],
            vec![Atom::Reg(gpr(rs)), Atom::Imm(imm)],
        )
    };
    let load = |kind| {
        Instruction::new(
            kind,
            vec![Atom::Reg(gpr(rt))],
            vec![Atom::Imm(simm), Atom::Reg(gpr(rs))],
        )
    };
    let store = |kind| {
        Instruction::new(
            kind,
            vec![],
            vec![Atom::Reg(gpr(rt)), Atom::Imm(simm), Atom::Reg(gpr(rs))],
        )
    };

    match op {
        0x00 => decode_special(data, rs, rt, rd, sa, funct),
        0x01 => decode_regimm(labels, seg, word_idx, rs, rt, simm, uimm),
        0x02 => Instruction::new(IK::J, vec![], vec![Atom::Imm((data & 0x03ff_ffff) as i32)]),
        0x03 => Instruction::new(IK::Jal, vec![], vec![Atom::Imm((data & 0x03ff_ffff) as i32)]),
        0x04 | 0x05 | 0x14 | 0x15 => {
            let kind = match op {
                0x04 => IK::Beq,
                0x05 => IK::Bne,
                0x14 => IK::Beql,
                _ => IK::Bnel,
            };
            match branch_dest(labels, seg, word_idx, simm) {
                Some(label) => Instruction::new(
                    kind,
                    vec![],
                    vec![
                        Atom::Reg(gpr(rs)),
                        Atom::Reg(gpr(rt)),
                        Atom::Branch(label),
                    ],
                ),
                None => Instruction::invalid(),
            }
        }
        0x06 | 0x07 | 0x16 | 0x17 => {
            let kind = match op {
                0x06 => IK::Blez,
                0x07 => IK::Bgtz,
                0x16 => IK::Blezl,
                _ => IK::Bgtzl,
            };
            match branch_dest(labels, seg, word_idx, simm) {
                Some(label) => Instruction::new(
                    kind,
                    vec![],
                    vec![Atom::Reg(gpr(rs)), Atom::Branch(label)],
                ),
                None => Instruction::invalid(),
            }
        }
        0x08 => rt_rs_imm(IK::Addi, simm),
        0x09 => rt_rs_imm(IK::Addiu, simm),
        0x0a => rt_rs_imm(IK::Slti, simm),
        0x0b => rt_rs_imm(IK::Sltiu, simm),
        0x0c => rt_rs_imm(IK::Andi, uimm),
        0x0d => rt_rs_imm(IK::Ori, uimm),
        0x0e => rt_rs_imm(IK::Xori, uimm),
        0x0f => Instruction::new(IK::Lui, vec![Atom::Reg(gpr(rt))], vec![Atom::Imm(uimm)]),
        0x10 => decode_cop0(rs, rt, rd, funct),
        0x11 => decode_cop1(labels, seg, word_idx, rs, rt, rd, sa, funct, simm),
        0x12 => decode_cop2(rs, rt, rd, sa, funct, data),
        0x18 => rt_rs_imm(IK::Daddi, simm),
        0x19 => rt_rs_imm(IK::Daddiu, simm),
        0x1a => load(IK::Ldl),
        0x1b => load(IK::Ldr),
        0x1c => decode_mmi(rs, rt, rd, sa, funct),
        0x1e => load(IK::Lq),
        0x1f => store(IK::Sq),
        0x20 => load(IK::Lb),
        0x21 => load(IK::Lh),
        0x22 => load(IK::Lwl),
        0x23 => load(IK::Lw),
        0x24 => load(IK::Lbu),
        0x25 => load(IK::Lhu),
        0x26 => load(IK::Lwr),
        0x27 => load(IK::Lwu),
        0x28 => store(IK::Sb),
        0x29 => store(IK::Sh),
        0x2a => store(IK::Swl),
        0x2b => store(IK::Sw),
        0x2c => store(IK::Sdl),
        0x2d => store(IK::Sdr),
        0x2e => store(IK::Swr),
        0x2f => Instruction::new(
            IK::Cache,
            vec![],
            vec![Atom::Imm(rt as i32), Atom::Imm(simm), Atom::Reg(gpr(rs))],
        ),
        0x31 => Instruction::new(
            IK::Lwc1,
            vec![Atom::Reg(fpr(rt))],
            vec![Atom::Imm(simm), Atom::Reg(gpr(rs))],
        ),
        0x33 => Instruction::new(
            IK::Pref,
            vec![],
            vec![Atom::Imm(rt as i32), Atom::Imm(simm), Atom::Reg(gpr(rs))],
        ),
        0x36 => Instruction::new(
            IK::Lqc2,
            vec![Atom::Reg(Register::vf(rt))],
            vec![Atom::Imm(simm), Atom::Reg(gpr(rs))],
        ),
        0x37 => load(IK::Ld),
        0x39 => Instruction::new(
            IK::Swc1,
            vec![],
            vec![Atom::Reg(fpr(rt)), Atom::Imm(simm), Atom::Reg(gpr(rs))],
        ),
        0x3e => Instruction::new(
            IK::Sqc2,
            vec![],
            vec![Atom::Reg(Register::vf(rt)), Atom::Imm(simm), Atom::Reg(gpr(rs))],
        ),
        0x3f => store(IK::Sd),
        _ => Instruction::invalid(),
    }
}

fn decode_special(data: u32, rs: u8, rt: u8, rd: u8, sa: u8, funct: u32) -> Instruction {
    let gpr = Register::gpr;
    let rd_rs_rt = |kind| {
        Instruction::new(
            kind,
            vec![Atom::Reg(gpr(rd))],
            vec![Atom::Reg(gpr(rs)), Atom::Reg(gpr(rt))],
        )
    };
    let rd_rt_sa = |kind| {
        Instruction::new(
            kind,
            vec![Atom::Reg(gpr(rd))],
            vec![Atom::Reg(gpr(rt)), Atom::Imm(sa as i32)],
        )
    };
    let rd_rt_rs = |kind| {
        Instruction::new(
            kind,
            vec![Atom::Reg(gpr(rd))],
            vec![Atom::Reg(gpr(rt)), Atom::Reg(gpr(rs))],
        )
    };
    let rs_rt = |kind| {
        Instruction::new(kind, vec![], vec![Atom::Reg(gpr(rs)), Atom::Reg(gpr(rt))])
    };

    match funct {
        0x00 => rd_rt_sa(IK::Sll),
        0x02 => rd_rt_sa(IK::Srl),
        0x03 => rd_rt_sa(IK::Sra),
        0x04 => rd_rt_rs(IK::Sllv),
        0x06 => rd_rt_rs(IK::Srlv),
        0x07 => rd_rt_rs(IK::Srav),
        0x08 => Instruction::new(IK::Jr, vec![], vec![Atom::Reg(gpr(rs))]),
        0x09 => Instruction::new(IK::Jalr, vec![Atom::Reg(gpr(rd))], vec![Atom::Reg(gpr(rs))]),
        0x0a => rd_rs_rt(IK::Movz),
        0x0b => rd_rs_rt(IK::Movn),
        0x0c => Instruction::new(
            IK::Syscall,
            vec![],
            vec![Atom::Imm(((data >> 6) & 0xfffff) as i32)],
        ),
        0x0d => Instruction::new(
            IK::Break,
            vec![],
            vec![Atom::Imm(((data >> 6) & 0xfffff) as i32)],
        ),
        0x0f => Instruction::new(IK::Sync, vec![], vec![]),
        0x10 => Instruction::new(IK::Mfhi, vec![Atom::Reg(gpr(rd))], vec![]),
        0x11 => Instruction::new(IK::Mthi, vec![], vec![Atom::Reg(gpr(rs))]),
        0x12 => Instruction::new(IK::Mflo, vec![Atom::Reg(gpr(rd))], vec![]),
        0x13 => Instruction::new(IK::Mtlo, vec![], vec![Atom::Reg(gpr(rs))]),
        0x14 => rd_rt_rs(IK::Dsllv),
        0x16 => rd_rt_rs(IK::Dsrlv),
        0x17 => rd_rt_rs(IK::Dsrav),
        0x18 => rd_rs_rt(IK::Mult),
        0x19 => rd_rs_rt(IK::Multu),
        0x1a => rs_rt(IK::Div),
        0x1b => rs_rt(IK::Divu),
        0x20 => rd_rs_rt(IK::Add),
        0x21 => rd_rs_rt(IK::Addu),
        0x22 => rd_rs_rt(IK::Sub),
        0x23 => rd_rs_rt(IK::Subu),
        0x24 => rd_rs_rt(IK::And),
        0x25 => rd_rs_rt(IK::Or),
        0x26 => rd_rs_rt(IK::Xor),
        0x27 => rd_rs_rt(IK::Nor),
        0x28 => Instruction::new(IK::Mfsa, vec![Atom::Reg(gpr(rd))], vec![]),
        0x29 => Instruction::new(IK::Mtsa, vec![], vec![Atom::Reg(gpr(rs))]),
        0x2a => rd_rs_rt(IK::Slt),
        0x2b => rd_rs_rt(IK::Sltu),
        0x2c => rd_rs_rt(IK::Dadd),
        0x2d => rd_rs_rt(IK::Daddu),
        0x2e => rd_rs_rt(IK::Dsub),
        0x2f => rd_rs_rt(IK::Dsubu),
        0x38 => rd_rt_sa(IK::Dsll),
        0x3a => rd_rt_sa(IK::Dsrl),
        0x3b => rd_rt_sa(IK::Dsra),
        0x3c => rd_rt_sa(IK::Dsll32),
        0x3e => rd_rt_sa(IK::Dsrl32),
        0x3f => rd_rt_sa(IK::Dsra32),
        _ => Instruction::invalid(),
    }
}

fn decode_regimm(
    labels: &mut LabelTable,
    seg: usize,
    word_idx: usize,
    rs: u8,
    rt: u8,
    simm: i32,
    uimm: i32,
) -> Instruction {
    let gpr = Register::gpr;
    let kind = match rt {
        0x00 => IK::Bltz,
        0x01 => IK::Bgez,
        0x02 => IK::Bltzl,
        0x03 => IK::Bgezl,
        0x10 => IK::Bltzal,
        0x11 => IK::Bgezal,
        0x12 => IK::Bltzall,
        0x13 => IK::Bgezall,
        0x18 => {
            return Instruction::new(
                IK::Mtsab,
                vec![],
                vec![Atom::Reg(gpr(rs)), Atom::Imm(uimm)],
            )
        }
        0x19 => {
            return Instruction::new(
                IK::Mtsah,
                vec![],
                vec![Atom::Reg(gpr(rs)), Atom::Imm(uimm)],
            )
        }
        _ => return Instruction::invalid(),
    };
    match branch_dest(labels, seg, word_idx, simm) {
        Some(label) => Instruction::new(
            kind,
            vec![],
            vec![Atom::Reg(gpr(rs)), Atom::Branch(label)],
        ),
        None => Instruction::invalid(),
    }
}

fn decode_cop0(rs: u8, rt: u8, rd: u8, funct: u32) -> Instruction {
    let gpr = Register::gpr;
    match rs {
        0x00 => Instruction::new(
            IK::Mfc0,
            vec![Atom::Reg(gpr(rt))],
            vec![Atom::Reg(Register::cop0(rd))],
        ),
        0x04 => Instruction::new(
            IK::Mtc0,
            vec![Atom::Reg(Register::cop0(rd))],
            vec![Atom::Reg(gpr(rt))],
        ),
        0x10 => match funct {
            0x18 => Instruction::new(IK::Eret, vec![], vec![]),
            0x38 => Instruction::new(IK::Ei, vec![], vec![]),
            0x39 => Instruction::new(IK::Di, vec![], vec![]),
            _ => Instruction::invalid(),
        },
        _ => Instruction::invalid(),
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_cop1(
    labels: &mut LabelTable,
    seg: usize,
    word_idx: usize,
    rs: u8,
    rt: u8,
    rd: u8,
    sa: u8,
    funct: u32,
    simm: i32,
) -> Instruction {
    let gpr = Register::gpr;
    let fpr = Register::fpr;
    let ft = fpr(rt);
    let fs = fpr(rd);
    let fd = fpr(sa);

    let fd_fs_ft = |kind| {
        Instruction::new(
            kind,
            vec![Atom::Reg(fd)],
            vec![Atom::Reg(fs), Atom::Reg(ft)],
        )
    };
    let fd_fs = |kind| Instruction::new(kind, vec![Atom::Reg(fd)], vec![Atom::Reg(fs)]);
    let fs_ft = |kind| Instruction::new(kind, vec![], vec![Atom::Reg(fs), Atom::Reg(ft)]);

    match rs {
        0x00 => Instruction::new(IK::Mfc1, vec![Atom::Reg(gpr(rt))], vec![Atom::Reg(fs)]),
        0x02 => Instruction::new(IK::Cfc1, vec![Atom::Reg(gpr(rt))], vec![Atom::Reg(fs)]),
        0x04 => Instruction::new(IK::Mtc1, vec![Atom::Reg(fs)], vec![Atom::Reg(gpr(rt))]),
        0x06 => Instruction::new(IK::Ctc1, vec![Atom::Reg(fs)], vec![Atom::Reg(gpr(rt))]),
        0x08 => {
            let kind = match rt {
                0x00 => IK::Bc1f,
                0x01 => IK::Bc1t,
                0x02 => IK::Bc1fl,
                0x03 => IK::Bc1tl,
                _ => return Instruction::invalid(),
            };
            match branch_dest(labels, seg, word_idx, simm) {
                Some(label) => Instruction::new(kind, vec![], vec![Atom::Branch(label)]),
                None => Instruction::invalid(),
            }
        }
        0x10 => match funct {
            0x00 => fd_fs_ft(IK::AddS),
            0x01 => fd_fs_ft(IK::SubS),
            0x02 => fd_fs_ft(IK::MulS),
            0x03 => fd_fs_ft(IK::DivS),
            0x04 => Instruction::new(IK::SqrtS, vec![Atom::Reg(fd)], vec![Atom::Reg(ft)]),
            0x05 => fd_fs(IK::AbsS),
            0x06 => fd_fs(IK::MovS),
            0x07 => fd_fs(IK::NegS),
            0x16 => fd_fs_ft(IK::RsqrtS),
            0x18 => fs_ft(IK::AddaS),
            0x19 => fs_ft(IK::SubaS),
            0x1a => fs_ft(IK::MulaS),
            0x1c => fd_fs_ft(IK::MaddS),
            0x1d => fd_fs_ft(IK::MsubS),
            0x1e => fs_ft(IK::MaddaS),
            0x1f => fs_ft(IK::MsubaS),
            0x24 => fd_fs(IK::CvtWS),
            0x28 => fd_fs_ft(IK::MaxS),
            0x29 => fd_fs_ft(IK::MinS),
            0x30 => fs_ft(IK::CFS),
            0x32 => fs_ft(IK::CEqS),
            0x34 => fs_ft(IK::CLtS),
            0x36 => fs_ft(IK::CLeS),
            _ => Instruction::invalid(),
        },
        0x14 => match funct {
            0x20 => fd_fs(IK::CvtSW),
            _ => Instruction::invalid(),
        },
        _ => Instruction::invalid(),
    }
}

fn decode_cop2(rs: u8, rt: u8, rd: u8, sa: u8, funct: u32, data: u32) -> Instruction {
    let gpr = Register::gpr;
    let vf = Register::vf;
    let vi = Register::vi;
    let ft = vf(rt);
    let fs = vf(rd);
    let fd = vf(sa);

    let fd_fs_ft = |kind| {
        Instruction::new(
            kind,
            vec![Atom::Reg(fd)],
            vec![Atom::Reg(fs), Atom::Reg(ft)],
        )
    };
    let ft_fs = |kind| Instruction::new(kind, vec![Atom::Reg(ft)], vec![Atom::Reg(fs)]);

    if rs & 0x10 == 0 {
        return match rs {
            0x01 => Instruction::new(IK::Qmfc2, vec![Atom::Reg(gpr(rt))], vec![Atom::Reg(fs)]),
            0x02 => Instruction::new(
                IK::Cfc2,
                vec![Atom::Reg(gpr(rt))],
                vec![Atom::Reg(vi(rd))],
            ),
            0x05 => Instruction::new(IK::Qmtc2, vec![Atom::Reg(fs)], vec![Atom::Reg(gpr(rt))]),
            0x06 => Instruction::new(
                IK::Ctc2,
                vec![Atom::Reg(vi(rd))],
                vec![Atom::Reg(gpr(rt))],
            ),
            _ => Instruction::invalid(),
        };
    }

    // macro-mode vector ops
    match funct {
        0x28 => fd_fs_ft(IK::Vadd),
        0x29 => fd_fs_ft(IK::Vmadd),
        0x2a => fd_fs_ft(IK::Vmul),
        0x2c => fd_fs_ft(IK::Vsub),
        0x2d => fd_fs_ft(IK::Vmsub),
        0x2e => fd_fs_ft(IK::Vopmsub),
        0x30 => Instruction::new(
            IK::Viadd,
            vec![Atom::Reg(vi(sa))],
            vec![Atom::Reg(vi(rd)), Atom::Reg(vi(rt))],
        ),
        0x31 => Instruction::new(
            IK::Visub,
            vec![Atom::Reg(vi(sa))],
            vec![Atom::Reg(vi(rd)), Atom::Reg(vi(rt))],
        ),
        0x32 => Instruction::new(
            IK::Viaddi,
            vec![Atom::Reg(vi(rt))],
            vec![Atom::Reg(vi(rd)), Atom::Imm(((data >> 6) & 0x1f) as i32)],
        ),
        0x38 => Instruction::new(
            IK::Vcallms,
            vec![],
            vec![Atom::Imm(((data >> 6) & 0x7fff) as i32)],
        ),
        0x39 => Instruction::new(IK::Vcallmsr, vec![], vec![Atom::Reg(vi(rd))]),
        0x3c..=0x3f => {
            // second-level table: ((funct & 3) << 5) | sa
            match ((funct & 3) << 5) | sa as u32 {
                0x30 => ft_fs(IK::Vmove),
                0x31 => ft_fs(IK::Vmr32),
                0x35 => ft_fs(IK::Vsqi),
                0x36 => ft_fs(IK::Vlqi),
                0x38 => Instruction::new(
                    IK::Vdiv,
                    vec![],
                    vec![Atom::Reg(fs), Atom::Reg(ft)],
                ),
                0x39 => Instruction::new(IK::Vsqrt, vec![], vec![Atom::Reg(ft)]),
                0x3a => Instruction::new(
                    IK::Vrsqrt,
                    vec![],
                    vec![Atom::Reg(fs), Atom::Reg(ft)],
                ),
                0x3b => Instruction::new(IK::Vwaitq, vec![], vec![]),
                0x1d => Instruction::new(IK::Vabs, vec![Atom::Reg(ft)], vec![Atom::Reg(fs)]),
                0x2f => Instruction::new(IK::Vnop, vec![], vec![]),
                0x40 => ft_fs(IK::Vrget),
                0x42 => ft_fs(IK::Vrnext),
                _ => Instruction::invalid(),
            }
        }
        _ => Instruction::invalid(),
    }
}

fn decode_mmi(rs: u8, rt: u8, rd: u8, sa: u8, funct: u32) -> Instruction {
    let gpr = Register::gpr;
    let rd_rs_rt = |kind| {
        Instruction::new(
            kind,
            vec![Atom::Reg(gpr(rd))],
            vec![Atom::Reg(gpr(rs)), Atom::Reg(gpr(rt))],
        )
    };
    let rd_rt = |kind| Instruction::new(kind, vec![Atom::Reg(gpr(rd))], vec![Atom::Reg(gpr(rt))]);
    let rd_rt_sa = |kind| {
        Instruction::new(
            kind,
            vec![Atom::Reg(gpr(rd))],
            vec![Atom::Reg(gpr(rt)), Atom::Imm(sa as i32)],
        )
    };
    let rd_rt_rs = |kind| {
        Instruction::new(
            kind,
            vec![Atom::Reg(gpr(rd))],
            vec![Atom::Reg(gpr(rt)), Atom::Reg(gpr(rs))],
        )
    };
    let rs_rt = |kind| {
        Instruction::new(kind, vec![], vec![Atom::Reg(gpr(rs)), Atom::Reg(gpr(rt))])
    };
    let rd_only = |kind| Instruction::new(kind, vec![Atom::Reg(gpr(rd))], vec![]);
    let rs_only = |kind| Instruction::new(kind, vec![], vec![Atom::Reg(gpr(rs))]);

    match funct {
        0x00 => rd_rs_rt(IK::Madd),
        0x01 => rd_rs_rt(IK::Maddu),
        0x04 => Instruction::new(IK::Plzcw, vec![Atom::Reg(gpr(rd))], vec![Atom::Reg(gpr(rs))]),
        0x08 => {
            // MMI0 table, keyed on sa
            let kind = match sa {
                0x00 => IK::Paddw,
                0x01 => IK::Psubw,
                0x02 => IK::Pcgtw,
                0x03 => IK::Pmaxw,
                0x04 => IK::Paddh,
                0x05 => IK::Psubh,
                0x06 => IK::Pcgth,
                0x07 => IK::Pmaxh,
                0x08 => IK::Paddb,
                0x09 => IK::Psubb,
                0x0a => IK::Pcgtb,
                0x10 => IK::Paddsw,
                0x11 => IK::Psubsw,
                0x12 => IK::Pextlw,
                0x13 => IK::Ppacw,
                0x14 => IK::Paddsh,
                0x15 => IK::Psubsh,
                0x16 => IK::Pextlh,
                0x17 => IK::Ppach,
                0x18 => IK::Paddsb,
                0x19 => IK::Psubsb,
                0x1a => IK::Pextlb,
                0x1b => IK::Ppacb,
                0x1e => IK::Pext5,
                0x1f => IK::Ppac5,
                _ => return Instruction::invalid(),
            };
            rd_rs_rt(kind)
        }
        0x09 => {
            // MMI2
            match sa {
                0x00 => rd_rs_rt(IK::Pmaddw),
                0x02 => rd_rt_rs(IK::Psllvw),
                0x03 => rd_rt_rs(IK::Psrlvw),
                0x04 => rd_rs_rt(IK::Pmsubw),
                0x08 => rd_only(IK::Pmfhi),
                0x09 => rd_only(IK::Pmflo),
                0x0a => rd_rs_rt(IK::Pinth),
                0x0c => rd_rs_rt(IK::Pmultw),
                0x0d => rs_rt(IK::Pdivw),
                0x0e => rd_rs_rt(IK::Pcpyld),
                0x10 => rd_rs_rt(IK::Pmaddh),
                0x11 => rd_rs_rt(IK::Phmadh),
                0x12 => rd_rs_rt(IK::Pand),
                0x13 => rd_rs_rt(IK::Pxor),
                0x14 => rd_rs_rt(IK::Pmsubh),
                0x15 => rd_rs_rt(IK::Phmsbh),
                0x1a => rd_rt(IK::Pexeh),
                0x1b => rd_rt(IK::Prevh),
                0x1c => rd_rs_rt(IK::Pmulth),
                0x1d => rs_rt(IK::Pdivbw),
                0x1e => rd_rt(IK::Pexew),
                0x1f => rd_rt(IK::Prot3w),
                _ => Instruction::invalid(),
            }
        }
        0x10 => rd_only(IK::Mfhi1),
        0x11 => rs_only(IK::Mthi1),
        0x12 => rd_only(IK::Mflo1),
        0x13 => rs_only(IK::Mtlo1),
        0x18 => rd_rs_rt(IK::Mult1),
        0x19 => rd_rs_rt(IK::Multu1),
        0x1a => rs_rt(IK::Div1),
        0x1b => rs_rt(IK::Divu1),
        0x20 => rd_rs_rt(IK::Madd1),
        0x21 => rd_rs_rt(IK::Maddu1),
        0x28 => {
            // MMI1
            match sa {
                0x01 => rd_rt(IK::Pabsw),
                0x02 => rd_rs_rt(IK::Pceqw),
                0x03 => rd_rs_rt(IK::Pminw),
                0x04 => rd_rs_rt(IK::Padsbh),
                0x05 => rd_rt(IK::Pabsh),
                0x06 => rd_rs_rt(IK::Pceqh),
                0x07 => rd_rs_rt(IK::Pminh),
                0x0a => rd_rs_rt(IK::Pceqb),
                0x10 => rd_rs_rt(IK::Padduw),
                0x11 => rd_rs_rt(IK::Psubuw),
                0x12 => rd_rs_rt(IK::Pextuw),
                0x14 => rd_rs_rt(IK::Padduh),
                0x15 => rd_rs_rt(IK::Psubuh),
                0x16 => rd_rs_rt(IK::Pextuh),
                0x18 => rd_rs_rt(IK::Paddub),
                0x19 => rd_rs_rt(IK::Psubub),
                0x1a => rd_rs_rt(IK::Pextub),
                0x1b => rd_rs_rt(IK::Qfsrv),
                _ => Instruction::invalid(),
            }
        }
        0x29 => {
            // MMI3
            match sa {
                0x00 => rd_rs_rt(IK::Pmadduw),
                0x03 => rd_rt_rs(IK::Psravw),
                0x08 => rs_only(IK::Pmthi),
                0x09 => rs_only(IK::Pmtlo),
                0x0a => rd_rs_rt(IK::Pinteh),
                0x0c => rd_rs_rt(IK::Pmultuw),
                0x0d => rs_rt(IK::Pdivuw),
                0x0e => rd_rs_rt(IK::Pcpyud),
                0x12 => rd_rs_rt(IK::Por),
                0x13 => rd_rs_rt(IK::Pnor),
                0x1a => rd_rt(IK::Pexch),
                0x1b => rd_rt(IK::Pcpyh),
                0x1e => rd_rt(IK::Pexcw),
                _ => Instruction::invalid(),
            }
        }
        0x30 => rd_only(IK::Pmfhl),
        0x31 => rs_only(IK::Pmthl),
        0x34 => rd_rt_sa(IK::Psllh),
        0x36 => rd_rt_sa(IK::Psrlh),
        0x37 => rd_rt_sa(IK::Psrah),
        0x3c => rd_rt_sa(IK::Psllw),
        0x3e => rd_rt_sa(IK::Psrlw),
        0x3f => rd_rt_sa(IK::Psraw),
        _ => Instruction::invalid(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mips::{gpr, insn, JR_RA_WORD};

    fn decode_plain(data: u32) -> Instruction {
        let mut labels = LabelTable::new(1);
        decode_instruction(&LinkedWord::plain(data), &mut labels, 0, 0)
    }

    #[test]
    fn test_decode_jr_ra() {
        let instr = decode_plain(JR_RA_WORD);
        assert_eq!(instr.kind, IK::Jr);
        assert!(insn::is_jr_ra(&instr));
        assert!(instr.info().has_delay_slot);
        assert!(!instr.info().is_branch);
    }

    #[test]
    fn test_decode_stack_adjust() {
        // daddiu sp, sp, -16
        let instr = decode_plain(0x67bd_fff0);
        assert_eq!(instr.kind, IK::Daddiu);
        assert_eq!(instr.dsts[0].reg(), Some(Register::gpr(gpr::SP)));
        assert_eq!(instr.srcs[0].reg(), Some(Register::gpr(gpr::SP)));
        assert_eq!(instr.srcs[1].imm(), Some(-16));
    }

    #[test]
    fn test_decode_ra_save() {
        // sd ra, 0(sp)
        let instr = decode_plain(0xffbf_0000);
        assert_eq!(instr.kind, IK::Sd);
        assert!(insn::is_no_link_gpr_store(
            &instr,
            Some(8),
            Some(Register::gpr(gpr::RA)),
            Some(0),
            Some(Register::gpr(gpr::SP)),
        ));
    }

    #[test]
    fn test_decode_branch_creates_label() {
        let mut labels = LabelTable::new(1);
        // beq r0, r0, +2 at word index 4 -> target word 7, byte 28
        let word = LinkedWord::plain(0x1000_0002);
        let instr = decode_instruction(&word, &mut labels, 0, 4);
        assert_eq!(instr.kind, IK::Beq);
        assert!(insn::is_always_branch(&instr));
        let target = instr.label_target().unwrap();
        assert_eq!(labels.get(target).offset, 28);
        // same target decodes to the same label
        let again = decode_instruction(&word, &mut labels, 0, 4);
        assert_eq!(again.label_target(), Some(target));
    }

    #[test]
    fn test_decode_nop() {
        let instr = decode_plain(0);
        assert!(insn::is_nop(&instr));
    }

    #[test]
    fn test_decode_invalid_still_invalid() {
        // an unassigned SPECIAL funct
        let instr = decode_plain(0x0000_0039);
        assert!(!instr.is_valid());
    }

    #[test]
    fn test_decode_pextlw() {
        // pextlw rd=v0, rs=a0, rt=a1: op 0x1c, funct 0x08, sa 0x12
        let word = (0x1c << 26) | (4 << 21) | (5 << 16) | (2 << 11) | (0x12 << 6) | 0x08;
        let instr = decode_plain(word);
        assert_eq!(instr.kind, IK::Pextlw);
    }

    #[test]
    fn test_tag_propagates_to_immediate() {
        let mut labels = LabelTable::new(1);
        let label = labels.get_or_create(0, 0x40);
        let word = LinkedWord {
            data: 0x3c01_0000, // lui at, 0
            kind: WordKind::HiPtr { label },
        };
        let instr = decode_instruction(&word, &mut labels, 0, 0);
        assert_eq!(instr.kind, IK::Lui);
        assert_eq!(instr.imm_src(), Some(&Atom::Label(label)));
    }
}
