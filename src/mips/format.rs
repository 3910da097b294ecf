// SPDX-License-Identifier: GPL-3.0-or-later
//! Text rendering of decoded instructions.

use crate::linker::labels::LabelTable;
use crate::mips::insn::{is_nop, Atom, Instruction, InstructionKind};

/// Kinds rendered `mn dst, offset(base)`.
fn is_load_format(kind: InstructionKind) -> bool {
    use InstructionKind::*;
    matches!(
        kind,
        Lb | Lbu | Lh | Lhu | Lw | Lwu | Lwl | Lwr | Ld | Ldl | Ldr | Lq | Lwc1 | Lqc2
    )
}

/// Kinds rendered `mn value, offset(base)`.
fn is_store_format(kind: InstructionKind) -> bool {
    use InstructionKind::*;
    matches!(
        kind,
        Sb | Sh | Sw | Swl | Swr | Sd | Sdl | Sdr | Sq | Swc1 | Sqc2
    )
}

fn format_atom(atom: &Atom, labels: &LabelTable) -> String {
    match atom {
        Atom::Reg(r) => r.to_string(),
        Atom::Imm(v) => v.to_string(),
        Atom::Label(id) | Atom::Branch(id) => labels.name(*id).to_string(),
        Atom::Symbol(name) => name.clone(),
    }
}

pub fn format_instruction(instr: &Instruction, labels: &LabelTable) -> String {
    if is_nop(instr) {
        return "nop".to_string();
    }
    let mnemonic = instr.info().mnemonic;

    if is_load_format(instr.kind) && instr.dsts.len() == 1 && instr.srcs.len() == 2 {
        return format!(
            "{} {}, {}({})",
            mnemonic,
            format_atom(&instr.dsts[0], labels),
            format_atom(&instr.srcs[0], labels),
            format_atom(&instr.srcs[1], labels),
        );
    }
    if is_store_format(instr.kind) && instr.srcs.len() == 3 {
        return format!(
            "{} {}, {}({})",
            mnemonic,
            format_atom(&instr.srcs[0], labels),
            format_atom(&instr.srcs[1], labels),
            format_atom(&instr.srcs[2], labels),
        );
    }

    let operands: Vec<String> = instr
        .dsts
        .iter()
        .chain(instr.srcs.iter())
        .map(|a| format_atom(a, labels))
        .collect();
    if operands.is_empty() {
        mnemonic.to_string()
    } else {
        format!("{} {}", mnemonic, operands.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::word::LinkedWord;
    use crate::mips::decode_instruction;

    fn render(data: u32) -> String {
        let mut labels = LabelTable::new(1);
        let instr = decode_instruction(&LinkedWord::plain(data), &mut labels, 0, 0);
        format_instruction(&instr, &labels)
    }

    #[test]
    fn test_render_common_forms() {
        assert_eq!(render(0x03e0_0008), "jr ra");
        assert_eq!(render(0x67bd_fff0), "daddiu sp, sp, -16");
        assert_eq!(render(0xffbf_0000), "sd ra, 0(sp)");
        assert_eq!(render(0x03a0_e82d), "daddu sp, sp, r0");
        assert_eq!(render(0x0000_1025), "or v0, r0, r0");
        assert_eq!(render(0x0000_0000), "nop");
    }

    #[test]
    fn test_render_branch_label() {
        let mut labels = LabelTable::new(1);
        let instr = decode_instruction(&LinkedWord::plain(0x1000_0002), &mut labels, 0, 0);
        labels.set_ordered_names();
        assert_eq!(format_instruction(&instr, &labels), "beq r0, r0, L1");
    }
}
