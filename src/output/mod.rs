// SPDX-License-Identifier: GPL-3.0-or-later
//! Text rendering of linked objects: raw word dumps, disassembly, and
//! recovered script tables.

pub mod disasm;
pub mod scripts;
pub mod words;

pub use disasm::print_disassembly;
pub use scripts::print_scripts;
pub use words::print_words;

use crate::linker::labels::LabelTable;
use crate::linker::word::{LinkedWord, WordKind};

/// One word in its linked form, as a directive line.
pub fn word_to_string(word: &LinkedWord, labels: &LabelTable) -> String {
    match &word.kind {
        WordKind::Plain => format!("    .word 0x{:x}\n", word.data),
        WordKind::Ptr { label } => format!("    .word {}\n", labels.name(*label)),
        WordKind::SymPtr { name } => format!("    .symbol {}\n", name),
        WordKind::TypePtr { name } => format!("    .type {}\n", name),
        WordKind::EmptyListPtr => "    .empty-list\n".to_string(),
        WordKind::HiPtr { label } => {
            format!("    .ptr-hi 0x{:x} {}\n", word.data >> 16, labels.name(*label))
        }
        WordKind::LoPtr { label } => {
            format!("    .ptr-lo 0x{:x} {}\n", word.data >> 16, labels.name(*label))
        }
        WordKind::SymOffset { name } => {
            format!("    .sym-off 0x{:x} {}\n", word.data >> 16, name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_to_string_plain_and_symbol() {
        let labels = LabelTable::new(1);
        assert_eq!(
            word_to_string(&LinkedWord::plain(0), &labels),
            "    .word 0x0\n"
        );
        let sym = LinkedWord {
            data: 0,
            kind: WordKind::SymPtr { name: "*active-pool*".into() },
        };
        assert_eq!(word_to_string(&sym, &labels), "    .symbol *active-pool*\n");
    }

    #[test]
    fn test_word_to_string_split_pointer() {
        let mut labels = LabelTable::new(1);
        let label = labels.get_or_create(0, 64);
        labels.set_ordered_names();
        let hi = LinkedWord {
            data: 0x3c01_0012,
            kind: WordKind::HiPtr { label },
        };
        assert_eq!(word_to_string(&hi, &labels), "    .ptr-hi 0x3c01 L1\n");
    }
}
