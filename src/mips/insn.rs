// SPDX-License-Identifier: GPL-3.0-or-later
//! Decoded instructions, operand atoms, and the pattern-matching helpers used
//! by the frame analyzer.

use crate::linker::labels::LabelId;
use crate::mips::{gpr, Register};

/// One operand slot of a decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    Reg(Register),
    Imm(i32),
    /// An immediate rewritten to a known location (literal pool, fp-relative).
    Label(LabelId),
    /// A branch target.
    Branch(LabelId),
    /// A symbol reference propagated from the word's link tag.
    Symbol(String),
}

impl Atom {
    pub fn reg(&self) -> Option<Register> {
        match self {
            Atom::Reg(r) => Some(*r),
            _ => None,
        }
    }

    pub fn imm(&self) -> Option<i32> {
        match self {
            Atom::Imm(v) => Some(*v),
            _ => None,
        }
    }

    /// True for operands that reference linked data rather than plain values.
    pub fn is_link_or_label(&self) -> bool {
        matches!(self, Atom::Label(_) | Atom::Branch(_) | Atom::Symbol(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub mnemonic: &'static str,
    pub is_branch: bool,
    pub is_branch_likely: bool,
    pub has_delay_slot: bool,
}

const fn op(mnemonic: &'static str) -> OpInfo {
    OpInfo {
        mnemonic,
        is_branch: false,
        is_branch_likely: false,
        has_delay_slot: false,
    }
}

const fn branch(mnemonic: &'static str) -> OpInfo {
    OpInfo {
        mnemonic,
        is_branch: true,
        is_branch_likely: false,
        has_delay_slot: true,
    }
}

const fn branch_likely(mnemonic: &'static str) -> OpInfo {
    OpInfo {
        mnemonic,
        is_branch: true,
        is_branch_likely: true,
        has_delay_slot: true,
    }
}

/// Jumps have delay slots but no label target.
const fn jump(mnemonic: &'static str) -> OpInfo {
    OpInfo {
        mnemonic,
        is_branch: false,
        is_branch_likely: false,
        has_delay_slot: true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[rustfmt::skip]
pub enum InstructionKind {
    Invalid,
    // shifts
    Sll, Srl, Sra, Sllv, Srlv, Srav,
    Dsll, Dsrl, Dsra, Dsll32, Dsrl32, Dsra32, Dsllv, Dsrlv, Dsrav,
    // register jumps
    Jr, Jalr,
    Movz, Movn, Syscall, Break, Sync,
    Mfhi, Mthi, Mflo, Mtlo, Mfsa, Mtsa,
    Mult, Multu, Div, Divu,
    Add, Addu, Sub, Subu, And, Or, Xor, Nor, Slt, Sltu,
    Dadd, Daddu, Dsub, Dsubu,
    // regimm branches and sa writes
    Bltz, Bgez, Bltzl, Bgezl, Bltzal, Bgezal, Bltzall, Bgezall, Mtsab, Mtsah,
    // primary opcodes
    J, Jal, Beq, Bne, Blez, Bgtz, Beql, Bnel, Blezl, Bgtzl,
    Addi, Addiu, Slti, Sltiu, Andi, Ori, Xori, Lui, Daddi, Daddiu,
    // loads and stores
    Lb, Lbu, Lh, Lhu, Lw, Lwu, Lwl, Lwr, Ld, Ldl, Ldr, Lq,
    Sb, Sh, Sw, Swl, Swr, Sd, Sdl, Sdr, Sq, Cache, Pref,
    Lwc1, Swc1, Lqc2, Sqc2,
    // cop0
    Mfc0, Mtc0, Eret, Ei, Di,
    // cop1
    Mfc1, Cfc1, Mtc1, Ctc1, Bc1f, Bc1t, Bc1fl, Bc1tl,
    AddS, SubS, MulS, DivS, SqrtS, AbsS, MovS, NegS, RsqrtS,
    AddaS, SubaS, MulaS, MaddS, MsubS, MaddaS, MsubaS,
    CvtWS, CvtSW, MaxS, MinS, CEqS, CLtS, CLeS, CFS,
    // multimedia (128-bit) unit
    Madd, Maddu, Plzcw, Madd1, Maddu1,
    Mfhi1, Mthi1, Mflo1, Mtlo1, Mult1, Multu1, Div1, Divu1,
    Psllh, Psrlh, Psrah, Psllw, Psrlw, Psraw, Pmfhl, Pmthl,
    Paddw, Psubw, Pcgtw, Pmaxw, Paddh, Psubh, Pcgth, Pmaxh,
    Paddb, Psubb, Pcgtb, Paddsw, Psubsw, Pextlw, Ppacw,
    Paddsh, Psubsh, Pextlh, Ppach, Paddsb, Psubsb, Pextlb, Ppacb, Pext5, Ppac5,
    Pabsw, Pceqw, Pminw, Padsbh, Pabsh, Pceqh, Pminh, Pceqb,
    Padduw, Psubuw, Pextuw, Padduh, Psubuh, Pextuh, Paddub, Psubub, Pextub, Qfsrv,
    Pmaddw, Psllvw, Psrlvw, Pmsubw, Pmfhi, Pmflo, Pinth, Pmultw, Pdivw, Pcpyld,
    Pmaddh, Phmadh, Pand, Pxor, Pmsubh, Phmsbh, Pexeh, Prevh, Pmulth, Pdivbw, Pexew, Prot3w,
    Pmadduw, Psravw, Pmthi, Pmtlo, Pinteh, Pmultuw, Pdivuw, Pcpyud, Por, Pnor,
    Pexch, Pcpyh, Pexcw,
    // vector unit, macro mode
    Qmfc2, Qmtc2, Cfc2, Ctc2,
    Vadd, Vsub, Vmul, Vmadd, Vmsub, Vmula, Vmadda, Vmsuba, Vopmula, Vopmsub,
    Vabs, Vmove, Vmr32, Vsqi, Vlqi, Vdiv, Vsqrt, Vrsqrt, Vrget, Vrnext,
    Viadd, Visub, Viaddi, Vnop, Vwaitq, Vcallms, Vcallmsr,
}

impl InstructionKind {
    #[rustfmt::skip]
    pub fn info(self) -> OpInfo {
        use InstructionKind::*;
        match self {
            Invalid => op("invalid"),

            Sll => op("sll"), Srl => op("srl"), Sra => op("sra"),
            Sllv => op("sllv"), Srlv => op("srlv"), Srav => op("srav"),
            Dsll => op("dsll"), Dsrl => op("dsrl"), Dsra => op("dsra"),
            Dsll32 => op("dsll32"), Dsrl32 => op("dsrl32"), Dsra32 => op("dsra32"),
            Dsllv => op("dsllv"), Dsrlv => op("dsrlv"), Dsrav => op("dsrav"),

            Jr => jump("jr"), Jalr => jump("jalr"),
            Movz => op("movz"), Movn => op("movn"),
            Syscall => op("syscall"), Break => op("break"), Sync => op("sync.l"),
            Mfhi => op("mfhi"), Mthi => op("mthi"), Mflo => op("mflo"), Mtlo => op("mtlo"),
            Mfsa => op("mfsa"), Mtsa => op("mtsa"),
            Mult => op("mult"), Multu => op("multu"), Div => op("div"), Divu => op("divu"),
            Add => op("add"), Addu => op("addu"), Sub => op("sub"), Subu => op("subu"),
            And => op("and"), Or => op("or"), Xor => op("xor"), Nor => op("nor"),
            Slt => op("slt"), Sltu => op("sltu"),
            Dadd => op("dadd"), Daddu => op("daddu"), Dsub => op("dsub"), Dsubu => op("dsubu"),

            Bltz => branch("bltz"), Bgez => branch("bgez"),
            Bltzl => branch_likely("bltzl"), Bgezl => branch_likely("bgezl"),
            Bltzal => branch("bltzal"), Bgezal => branch("bgezal"),
            Bltzall => branch_likely("bltzall"), Bgezall => branch_likely("bgezall"),
            Mtsab => op("mtsab"), Mtsah => op("mtsah"),

            J => jump("j"), Jal => jump("jal"),
            Beq => branch("beq"), Bne => branch("bne"),
            Blez => branch("blez"), Bgtz => branch("bgtz"),
            Beql => branch_likely("beql"), Bnel => branch_likely("bnel"),
            Blezl => branch_likely("blezl"), Bgtzl => branch_likely("bgtzl"),
            Addi => op("addi"), Addiu => op("addiu"), Slti => op("slti"), Sltiu => op("sltiu"),
            Andi => op("andi"), Ori => op("ori"), Xori => op("xori"), Lui => op("lui"),
            Daddi => op("daddi"), Daddiu => op("daddiu"),

            Lb => op("lb"), Lbu => op("lbu"), Lh => op("lh"), Lhu => op("lhu"),
            Lw => op("lw"), Lwu => op("lwu"), Lwl => op("lwl"), Lwr => op("lwr"),
            Ld => op("ld"), Ldl => op("ldl"), Ldr => op("ldr"), Lq => op("lq"),
            Sb => op("sb"), Sh => op("sh"), Sw => op("sw"), Swl => op("swl"), Swr => op("swr"),
            Sd => op("sd"), Sdl => op("sdl"), Sdr => op("sdr"), Sq => op("sq"),
            Cache => op("cache"), Pref => op("pref"),
            Lwc1 => op("lwc1"), Swc1 => op("swc1"), Lqc2 => op("lqc2"), Sqc2 => op("sqc2"),

            Mfc0 => op("mfc0"), Mtc0 => op("mtc0"), Eret => op("eret"),
            Ei => op("ei"), Di => op("di"),

            Mfc1 => op("mfc1"), Cfc1 => op("cfc1"), Mtc1 => op("mtc1"), Ctc1 => op("ctc1"),
            Bc1f => branch("bc1f"), Bc1t => branch("bc1t"),
            Bc1fl => branch_likely("bc1fl"), Bc1tl => branch_likely("bc1tl"),
            AddS => op("add.s"), SubS => op("sub.s"), MulS => op("mul.s"), DivS => op("div.s"),
            SqrtS => op("sqrt.s"), AbsS => op("abs.s"), MovS => op("mov.s"), NegS => op("neg.s"),
            RsqrtS => op("rsqrt.s"),
            AddaS => op("adda.s"), SubaS => op("suba.s"), MulaS => op("mula.s"),
            MaddS => op("madd.s"), MsubS => op("msub.s"),
            MaddaS => op("madda.s"), MsubaS => op("msuba.s"),
            CvtWS => op("cvt.w.s"), CvtSW => op("cvt.s.w"),
            MaxS => op("max.s"), MinS => op("min.s"),
            CEqS => op("c.eq.s"), CLtS => op("c.lt.s"), CLeS => op("c.le.s"), CFS => op("c.f.s"),

            Madd => op("madd"), Maddu => op("maddu"), Plzcw => op("plzcw"),
            Madd1 => op("madd1"), Maddu1 => op("maddu1"),
            Mfhi1 => op("mfhi1"), Mthi1 => op("mthi1"), Mflo1 => op("mflo1"), Mtlo1 => op("mtlo1"),
            Mult1 => op("mult1"), Multu1 => op("multu1"), Div1 => op("div1"), Divu1 => op("divu1"),
            Psllh => op("psllh"), Psrlh => op("psrlh"), Psrah => op("psrah"),
            Psllw => op("psllw"), Psrlw => op("psrlw"), Psraw => op("psraw"),
            Pmfhl => op("pmfhl"), Pmthl => op("pmthl"),
            Paddw => op("paddw"), Psubw => op("psubw"), Pcgtw => op("pcgtw"), Pmaxw => op("pmaxw"),
            Paddh => op("paddh"), Psubh => op("psubh"), Pcgth => op("pcgth"), Pmaxh => op("pmaxh"),
            Paddb => op("paddb"), Psubb => op("psubb"), Pcgtb => op("pcgtb"),
            Paddsw => op("paddsw"), Psubsw => op("psubsw"), Pextlw => op("pextlw"),
            Ppacw => op("ppacw"),
            Paddsh => op("paddsh"), Psubsh => op("psubsh"), Pextlh => op("pextlh"),
            Ppach => op("ppach"), Paddsb => op("paddsb"), Psubsb => op("psubsb"),
            Pextlb => op("pextlb"), Ppacb => op("ppacb"), Pext5 => op("pext5"), Ppac5 => op("ppac5"),
            Pabsw => op("pabsw"), Pceqw => op("pceqw"), Pminw => op("pminw"),
            Padsbh => op("padsbh"), Pabsh => op("pabsh"), Pceqh => op("pceqh"), Pminh => op("pminh"),
            Pceqb => op("pceqb"), Padduw => op("padduw"), Psubuw => op("psubuw"),
            Pextuw => op("pextuw"), Padduh => op("padduh"), Psubuh => op("psubuh"),
            Pextuh => op("pextuh"), Paddub => op("paddub"), Psubub => op("psubub"),
            Pextub => op("pextub"), Qfsrv => op("qfsrv"),
            Pmaddw => op("pmaddw"), Psllvw => op("psllvw"), Psrlvw => op("psrlvw"),
            Pmsubw => op("pmsubw"), Pmfhi => op("pmfhi"), Pmflo => op("pmflo"),
            Pinth => op("pinth"), Pmultw => op("pmultw"), Pdivw => op("pdivw"),
            Pcpyld => op("pcpyld"), Pmaddh => op("pmaddh"), Phmadh => op("phmadh"),
            Pand => op("pand"), Pxor => op("pxor"), Pmsubh => op("pmsubh"), Phmsbh => op("phmsbh"),
            Pexeh => op("pexeh"), Prevh => op("prevh"), Pmulth => op("pmulth"),
            Pdivbw => op("pdivbw"), Pexew => op("pexew"), Prot3w => op("prot3w"),
            Pmadduw => op("pmadduw"), Psravw => op("psravw"), Pmthi => op("pmthi"),
            Pmtlo => op("pmtlo"), Pinteh => op("pinteh"), Pmultuw => op("pmultuw"),
            Pdivuw => op("pdivuw"), Pcpyud => op("pcpyud"), Por => op("por"), Pnor => op("pnor"),
            Pexch => op("pexch"), Pcpyh => op("pcpyh"), Pexcw => op("pexcw"),

            Qmfc2 => op("qmfc2"), Qmtc2 => op("qmtc2"), Cfc2 => op("cfc2"), Ctc2 => op("ctc2"),
            Vadd => op("vadd"), Vsub => op("vsub"), Vmul => op("vmul"),
            Vmadd => op("vmadd"), Vmsub => op("vmsub"),
            Vmula => op("vmula"), Vmadda => op("vmadda"), Vmsuba => op("vmsuba"),
            Vopmula => op("vopmula"), Vopmsub => op("vopmsub"),
            Vabs => op("vabs"), Vmove => op("vmove"), Vmr32 => op("vmr32"),
            Vsqi => op("vsqi"), Vlqi => op("vlqi"),
            Vdiv => op("vdiv"), Vsqrt => op("vsqrt"), Vrsqrt => op("vrsqrt"),
            Vrget => op("vrget"), Vrnext => op("vrnext"),
            Viadd => op("viadd"), Visub => op("visub"), Viaddi => op("viaddi"),
            Vnop => op("vnop"), Vwaitq => op("vwaitq"),
            Vcallms => op("vcallms"), Vcallmsr => op("vcallmsr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub dsts: Vec<Atom>,
    pub srcs: Vec<Atom>,
}

impl Instruction {
    pub fn new(kind: InstructionKind, dsts: Vec<Atom>, srcs: Vec<Atom>) -> Self {
        Instruction { kind, dsts, srcs }
    }

    pub fn invalid() -> Self {
        Instruction {
            kind: InstructionKind::Invalid,
            dsts: Vec::new(),
            srcs: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.kind != InstructionKind::Invalid
    }

    pub fn info(&self) -> OpInfo {
        self.kind.info()
    }

    pub fn get_src(&self, i: usize) -> &Atom {
        &self.srcs[i]
    }

    pub fn get_dst(&self, i: usize) -> &Atom {
        &self.dsts[i]
    }

    /// The immediate source slot, if any.
    pub fn imm_src(&self) -> Option<&Atom> {
        self.srcs
            .iter()
            .find(|a| matches!(a, Atom::Imm(_) | Atom::Label(_) | Atom::Symbol(_)))
    }

    pub fn imm_src_mut(&mut self) -> Option<&mut Atom> {
        self.srcs
            .iter_mut()
            .find(|a| matches!(a, Atom::Imm(_) | Atom::Label(_) | Atom::Symbol(_)))
    }

    pub fn imm_src_value(&self) -> Option<i32> {
        self.imm_src().and_then(|a| a.imm())
    }

    /// Branch target, for branch kinds.
    pub fn label_target(&self) -> Option<LabelId> {
        self.srcs.iter().find_map(|a| match a {
            Atom::Branch(id) => Some(*id),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Matching helpers for the frame analyzer. `None` parameters are wildcards.
// ---------------------------------------------------------------------------

/// 128-bit down to byte GPR stores.
pub const GPR_STORES: &[InstructionKind] = &[
    InstructionKind::Sb,
    InstructionKind::Sh,
    InstructionKind::Sw,
    InstructionKind::Sd,
    InstructionKind::Sq,
];

pub const GPR_LOADS: &[InstructionKind] = &[
    InstructionKind::Lb,
    InstructionKind::Lbu,
    InstructionKind::Lh,
    InstructionKind::Lhu,
    InstructionKind::Lw,
    InstructionKind::Lwu,
    InstructionKind::Ld,
    InstructionKind::Lq,
];

pub fn is_gpr_store(instr: &Instruction) -> bool {
    GPR_STORES.contains(&instr.kind)
}

fn store_kind_for_size(size: u32) -> InstructionKind {
    match size {
        1 => InstructionKind::Sb,
        2 => InstructionKind::Sh,
        4 => InstructionKind::Sw,
        8 => InstructionKind::Sd,
        16 => InstructionKind::Sq,
        _ => unreachable!("no store of size {size}"),
    }
}

fn load_kind_for_size(size: u32, signed: bool) -> InstructionKind {
    match (size, signed) {
        (1, true) => InstructionKind::Lb,
        (1, false) => InstructionKind::Lbu,
        (2, true) => InstructionKind::Lh,
        (2, false) => InstructionKind::Lhu,
        (4, true) => InstructionKind::Lw,
        (4, false) => InstructionKind::Lwu,
        (8, _) => InstructionKind::Ld,
        (16, _) => InstructionKind::Lq,
        _ => unreachable!("no load of size {size}"),
    }
}

fn no_linked_operands(instr: &Instruction) -> bool {
    !instr.srcs.iter().chain(instr.dsts.iter()).any(Atom::is_link_or_label)
}

/// Match a GPR store `s? value, offset(base)` with no linked operands.
pub fn is_no_link_gpr_store(
    instr: &Instruction,
    size: Option<u32>,
    src: Option<Register>,
    offset: Option<i32>,
    base: Option<Register>,
) -> bool {
    match size {
        Some(s) => {
            if instr.kind != store_kind_for_size(s) {
                return false;
            }
        }
        None => {
            if !is_gpr_store(instr) {
                return false;
            }
        }
    }
    if !no_linked_operands(instr) {
        return false;
    }
    let value_ok = src.is_none_or(|r| instr.srcs[0].reg() == Some(r));
    let offset_ok = offset.is_none_or(|o| instr.srcs[1].imm() == Some(o));
    let base_ok = base.is_none_or(|r| instr.srcs[2].reg() == Some(r));
    value_ok && offset_ok && base_ok
}

/// Match a GPR load `l? reg, offset(base)` with no linked operands.
pub fn is_no_link_gpr_load(
    instr: &Instruction,
    size: u32,
    signed: bool,
    dst: Option<Register>,
    offset: Option<i32>,
    base: Option<Register>,
) -> bool {
    if instr.kind != load_kind_for_size(size, signed) || !no_linked_operands(instr) {
        return false;
    }
    let dst_ok = dst.is_none_or(|r| instr.dsts[0].reg() == Some(r));
    let offset_ok = offset.is_none_or(|o| instr.srcs[0].imm() == Some(o));
    let base_ok = base.is_none_or(|r| instr.srcs[1].reg() == Some(r));
    dst_ok && offset_ok && base_ok
}

/// Match `swc1 value, offset(base)` with no linked operands.
pub fn is_no_link_fpr_store(
    instr: &Instruction,
    src: Option<Register>,
    offset: Option<i32>,
    base: Option<Register>,
) -> bool {
    instr.kind == InstructionKind::Swc1
        && no_linked_operands(instr)
        && src.is_none_or(|r| instr.srcs[0].reg() == Some(r))
        && offset.is_none_or(|o| instr.srcs[1].imm() == Some(o))
        && base.is_none_or(|r| instr.srcs[2].reg() == Some(r))
}

/// Match `lwc1 reg, offset(base)` with no linked operands.
pub fn is_no_link_fpr_load(
    instr: &Instruction,
    dst: Option<Register>,
    offset: Option<i32>,
    base: Option<Register>,
) -> bool {
    instr.kind == InstructionKind::Lwc1
        && no_linked_operands(instr)
        && dst.is_none_or(|r| instr.dsts[0].reg() == Some(r))
        && offset.is_none_or(|o| instr.srcs[0].imm() == Some(o))
        && base.is_none_or(|r| instr.srcs[1].reg() == Some(r))
}

pub fn get_gpr_store_offset(instr: &Instruction) -> i32 {
    debug_assert!(is_gpr_store(instr));
    instr.srcs[1].imm().expect("store without an offset")
}

/// Match a three-register op `kind dst, src0, src1`.
pub fn is_gpr_3(
    instr: &Instruction,
    kind: InstructionKind,
    dst: Option<Register>,
    src0: Option<Register>,
    src1: Option<Register>,
) -> bool {
    instr.kind == kind
        && dst.is_none_or(|r| instr.dsts.first().and_then(Atom::reg) == Some(r))
        && src0.is_none_or(|r| instr.srcs.first().and_then(Atom::reg) == Some(r))
        && src1.is_none_or(|r| instr.srcs.get(1).and_then(Atom::reg) == Some(r))
}

/// Match a register-immediate op `kind dst, src, imm`.
pub fn is_gpr_2_imm(
    instr: &Instruction,
    kind: InstructionKind,
    dst: Option<Register>,
    src: Option<Register>,
    imm: Option<i32>,
) -> bool {
    instr.kind == kind
        && dst.is_none_or(|r| instr.dsts.first().and_then(Atom::reg) == Some(r))
        && src.is_none_or(|r| instr.srcs.first().and_then(Atom::reg) == Some(r))
        && imm.is_none_or(|v| instr.srcs.get(1).and_then(Atom::imm) == Some(v))
}

/// `sll r0, r0, 0`
pub fn is_nop(instr: &Instruction) -> bool {
    instr.kind == InstructionKind::Sll
        && instr.dsts[0].reg() == Some(Register::gpr(gpr::R0))
        && instr.srcs[0].reg() == Some(Register::gpr(gpr::R0))
        && instr.srcs[1].imm() == Some(0)
}

pub fn is_jr_ra(instr: &Instruction) -> bool {
    instr.kind == InstructionKind::Jr && instr.srcs[0].reg() == Some(Register::gpr(gpr::RA))
}

/// An unconditional branch: `beq r0, r0, target`.
pub fn is_always_branch(instr: &Instruction) -> bool {
    instr.kind == InstructionKind::Beq
        && instr.srcs[0].reg() == Some(Register::gpr(gpr::R0))
        && instr.srcs[1].reg() == Some(Register::gpr(gpr::R0))
}
