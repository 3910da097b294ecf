// SPDX-License-Identifier: GPL-3.0-or-later
//! Disassembly rendering: function banners, instructions with their labels,
//! then the data region of each segment.

use crate::linker::{segment_name, LinkedObjectFile};
use crate::mips::format_instruction;
use crate::output::word_to_string;

const FUNCTION_BANNER: &str =
    ";;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;\n";

/// Instruction text is padded to this column before the word echo.
const INSTRUCTION_COLUMN: usize = 60;

/// Render the disassembly of every segment, high-index first: each function
/// with per-instruction labels, then the segment's data region.
///
/// Only a word's first byte can label an instruction; labels at mid-word
/// offsets inside code get a warning line but are still shown.
pub fn print_disassembly(obj: &LinkedObjectFile, hex_near_instructions: bool) -> String {
    let mut result = String::new();

    for seg in (0..obj.segments.len()).rev() {
        result += ";------------------------------------------\n;  ";
        result += segment_name(seg);
        result += "\n;------------------------------------------\n";

        for func in &obj.segments[seg].functions {
            result += FUNCTION_BANNER;
            result += &format!("; .function {}\n", func.guessed_name);
            if !func.warnings.is_empty() {
                result += ";; Warnings:\n";
                for warning in &func.warnings {
                    result += &format!(";; - {}\n", warning);
                }
            }

            let mut in_delay_slot = false;
            for i in 1..(func.end_word - func.start_word) {
                let byte_offset = (func.start_word + i) * 4;
                if let Some(label_id) = obj.labels.get_at(seg, byte_offset) {
                    result += obj.labels.name(label_id);
                    result += ":\n";
                }
                for j in 1..4 {
                    if let Some(label_id) = obj.labels.get_at(seg, byte_offset + j) {
                        let name = obj.labels.name(label_id);
                        log::warn!("mid-word label {} at byte {} in code", name, byte_offset + j);
                        result += &format!("BAD OFFSET LABEL: {} (offset {})\n", name, j);
                    }
                }

                let instr = &func.instructions[i];
                let mut line = format!("    {}", format_instruction(instr, &obj.labels));
                if hex_near_instructions {
                    if line.len() < INSTRUCTION_COLUMN {
                        line.push_str(&" ".repeat(INSTRUCTION_COLUMN - line.len()));
                    }
                    line += " ;;";
                    line += &word_to_string(&obj.segments[seg].words[func.start_word + i], &obj.labels);
                } else {
                    line += "\n";
                }
                result += &line;

                if in_delay_slot {
                    result += "\n";
                    in_delay_slot = false;
                }
                if instr.info().has_delay_slot {
                    in_delay_slot = true;
                }
            }
        }

        for i in obj.segments[seg].data_start..obj.segments[seg].words.len() {
            for j in 0..4 {
                if let Some(label_id) = obj.labels.get_at(seg, i * 4 + j) {
                    result += obj.labels.name(label_id);
                    result += ":";
                    if j != 0 {
                        result += &format!(" (offset {})", j);
                    }
                    result += "\n";
                }
            }
            result += &word_to_string(&obj.segments[seg].words[i], &obj.labels);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::{SymbolLinkKind, FUNCTION_TYPE_TAG, SEG_MAIN};

    fn trivial_object() -> LinkedObjectFile {
        let mut obj = LinkedObjectFile::new(3);
        for &w in &[0, 0x0000_1025, 0x03e0_0008, 0x03a0_e82d, 0xdead_beef] {
            obj.push_word(SEG_MAIN, w);
        }
        obj.symbol_link_word(SEG_MAIN, 0, FUNCTION_TYPE_TAG, SymbolLinkKind::TypePtr)
            .unwrap();
        obj.find_code().unwrap();
        obj.find_functions().unwrap();
        obj.disassemble_functions();
        obj.set_ordered_label_names();
        obj
    }

    #[test]
    fn test_function_renders_with_word_echo() {
        let text = print_disassembly(&trivial_object(), true);
        assert!(text.contains("; .function \n"));
        let or_line = text
            .lines()
            .find(|l| l.contains("or v0, r0, r0"))
            .expect("or line present");
        assert!(or_line.contains(";;    .word 0x1025"));
        // the instruction column is padded
        assert_eq!(or_line.find(";;"), Some(INSTRUCTION_COLUMN + 1));
        // data region renders after the functions
        assert!(text.contains("    .word 0xdeadbeef\n"));
    }

    #[test]
    fn test_delay_slot_gets_blank_line() {
        let text = print_disassembly(&trivial_object(), false);
        let lines: Vec<&str> = text.lines().collect();
        let jr = lines.iter().position(|l| l.contains("jr ra")).unwrap();
        assert!(lines[jr + 1].contains("daddu sp, sp, r0"));
        assert_eq!(lines[jr + 2], "");
    }

    #[test]
    fn test_mid_word_label_warns_but_does_not_abort() {
        let mut obj = trivial_object();
        obj.labels.get_or_create(SEG_MAIN, 6); // inside the jr ra word
        obj.set_ordered_label_names();
        let text = print_disassembly(&obj, false);
        assert!(text.contains("BAD OFFSET LABEL:"));
        // rendering continued to the data region
        assert!(text.contains("0xdeadbeef"));
    }
}
