// SPDX-License-Identifier: GPL-3.0-or-later
//! Register and instruction model for the target CPU: a MIPS-family core
//! with 128-bit multimedia extensions and a macro-mode vector unit.

use std::fmt;

pub mod decode;
pub mod format;
pub mod insn;

pub use decode::decode_instruction;
pub use format::format_instruction;
pub use insn::*;

/// Encoded `jr ra`, the terminal return instruction.
pub const JR_RA_WORD: u32 = 0x03e0_0008;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    Gpr,
    Fpr,
    Cop0,
    Vf,
    Vi,
}

/// General purpose register names, in the compiler's own convention
/// (`r0` for the zero register, `fp` for $30).
pub const GPR_NAMES: [&str; 32] = [
    "r0", "at", "v0", "v1", "a0", "a1", "a2", "a3", // 0-7
    "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7", // 8-15
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", // 16-23
    "t8", "t9", "k0", "k1", "gp", "sp", "fp", "ra", // 24-31
];

/// System control (COP0) register names indexed by register number.
pub const COP0_NAMES: [&str; 32] = [
    "Index", "Random", "EntryLo0", "EntryLo1", "Context", "PageMask", "Wired", "reserved7",
    "BadVAddr", "Count", "EntryHi", "Compare", "Status", "Cause", "EPC", "PRId", "Config",
    "reserved17", "reserved18", "reserved19", "reserved20", "reserved21", "reserved22", "BadPAddr",
    "Debug", "Perf", "reserved26", "reserved27", "TagLo", "TagHi", "ErrorEPC", "reserved31",
];

/// GPR index constants, named for use in matchers and the frame analyzer.
pub mod gpr {
    pub const R0: u8 = 0;
    pub const V0: u8 = 2;
    pub const A0: u8 = 4;
    pub const S0: u8 = 16;
    pub const S1: u8 = 17;
    pub const S2: u8 = 18;
    pub const S3: u8 = 19;
    pub const S4: u8 = 20;
    pub const S5: u8 = 21;
    pub const S6: u8 = 22;
    pub const S7: u8 = 23;
    pub const T9: u8 = 25;
    pub const GP: u8 = 28;
    pub const SP: u8 = 29;
    pub const FP: u8 = 30;
    pub const RA: u8 = 31;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub class: RegClass,
    pub index: u8,
}

impl Register {
    pub const fn gpr(index: u8) -> Self {
        Register {
            class: RegClass::Gpr,
            index,
        }
    }

    pub const fn fpr(index: u8) -> Self {
        Register {
            class: RegClass::Fpr,
            index,
        }
    }

    pub const fn cop0(index: u8) -> Self {
        Register {
            class: RegClass::Cop0,
            index,
        }
    }

    pub const fn vf(index: u8) -> Self {
        Register {
            class: RegClass::Vf,
            index,
        }
    }

    pub const fn vi(index: u8) -> Self {
        Register {
            class: RegClass::Vi,
            index,
        }
    }

    pub fn is_gpr(&self, index: u8) -> bool {
        self.class == RegClass::Gpr && self.index == index
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            RegClass::Gpr => write!(f, "{}", GPR_NAMES[self.index as usize]),
            RegClass::Fpr => write!(f, "f{}", self.index),
            RegClass::Cop0 => write!(f, "{}", COP0_NAMES[self.index as usize]),
            RegClass::Vf => write!(f, "vf{}", self.index),
            RegClass::Vi => write!(f, "vi{}", self.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_names() {
        assert_eq!(Register::gpr(gpr::R0).to_string(), "r0");
        assert_eq!(Register::gpr(gpr::SP).to_string(), "sp");
        assert_eq!(Register::gpr(gpr::FP).to_string(), "fp");
        assert_eq!(Register::fpr(30).to_string(), "f30");
        assert_eq!(Register::cop0(12).to_string(), "Status");
        assert_eq!(Register::vf(1).to_string(), "vf1");
    }
}
