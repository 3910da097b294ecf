// SPDX-License-Identifier: GPL-3.0-or-later
//! Basic block partitioning.
//!
//! Blocks are found by collecting dividers: the function boundaries, the word
//! after each branch's delay slot, and each branch target. Delay slot
//! instructions always stay in the same block as their branch.

use crate::error::{DisasmError, Result};
use crate::function::Function;
use crate::linker::labels::LabelTable;

/// Half-open range of function-relative word indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlock {
    pub start_word: usize,
    pub end_word: usize,
}

pub fn find_blocks_in_function(
    func: &Function,
    labels: &LabelTable,
    seg: usize,
) -> Result<Vec<BasicBlock>> {
    let n = func.instructions.len();
    let mut dividers: Vec<usize> = vec![0, n];

    for (i, instr) in func.instructions.iter().enumerate() {
        let info = instr.info();
        if !info.is_branch && !info.is_branch_likely {
            continue;
        }
        // the delay slot must fit inside the function
        if i + func.start_word >= func.end_word - 1 {
            return Err(DisasmError::malformed(
                "branch with its delay slot outside the function",
                seg,
                func.start_word + i,
            ));
        }
        dividers.push(i + 2);

        let label_id = instr.label_target().ok_or_else(|| {
            DisasmError::malformed("branch without a target label", seg, func.start_word + i)
        })?;
        let label = labels.get(label_id);
        if label.target_segment != seg || label.offset % 4 != 0 {
            return Err(DisasmError::malformed(
                "branch target outside the segment",
                seg,
                label.offset,
            ));
        }
        let target_word = label.offset / 4;
        // branches may only jump within their own function
        if target_word <= func.start_word || target_word >= func.end_word - 1 {
            return Err(DisasmError::malformed(
                "branch target outside the function",
                seg,
                label.offset,
            ));
        }
        dividers.push(target_word - func.start_word);
    }

    dividers.sort_unstable();

    let mut blocks = Vec::new();
    for pair in dividers.windows(2) {
        if pair[0] != pair[1] {
            blocks.push(BasicBlock {
                start_word: pair[0],
                end_word: pair[1],
            });
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::word::LinkedWord;
    use crate::mips::decode_instruction;

    fn make_function(words: &[u32], labels: &mut LabelTable) -> Function {
        let mut func = Function::new(0, 0, words.len());
        for (i, &w) in words.iter().enumerate() {
            func.instructions
                .push(decode_instruction(&LinkedWord::plain(w), labels, 0, i));
        }
        func
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let mut labels = LabelTable::new(1);
        let func = make_function(&[0, 0x0000_1025, 0x03e0_0008, 0x03a0_e82d], &mut labels);
        let blocks = find_blocks_in_function(&func, &labels, 0).unwrap();
        assert_eq!(blocks, vec![BasicBlock { start_word: 0, end_word: 4 }]);
    }

    #[test]
    fn test_branch_splits_after_delay_slot() {
        // 0: tag, 1: beq r0, r0, +2 (-> word 4), 2: nop, 3: nop, 4: jr ra, 5: daddu
        let mut labels = LabelTable::new(1);
        let func = make_function(
            &[0, 0x1000_0002, 0, 0, 0x03e0_0008, 0x03a0_e82d],
            &mut labels,
        );
        let blocks = find_blocks_in_function(&func, &labels, 0).unwrap();
        assert_eq!(
            blocks,
            vec![
                BasicBlock { start_word: 0, end_word: 3 },
                BasicBlock { start_word: 3, end_word: 4 },
                BasicBlock { start_word: 4, end_word: 6 },
            ]
        );
    }

    #[test]
    fn test_branch_outside_function_rejected() {
        // beq target lands past the function end
        let mut labels = LabelTable::new(1);
        let func = make_function(&[0, 0x1000_0020, 0, 0x03e0_0008, 0x03a0_e82d], &mut labels);
        assert!(find_blocks_in_function(&func, &labels, 0).is_err());
    }

    #[test]
    fn test_branch_at_function_end_rejected() {
        // branch in the last word has no room for its delay slot
        let mut labels = LabelTable::new(1);
        let func = make_function(&[0, 0, 0x1000_fffe], &mut labels);
        assert!(find_blocks_in_function(&func, &labels, 0).is_err());
    }
}
