// SPDX-License-Identifier: GPL-3.0-or-later
//! Recovery of static script tables.
//!
//! Script data is stored as chains of two-word pairs. A pointer to a pair is
//! tagged by its address: the label lands two bytes into the pair's first
//! word. Each chain is walked through its cdr side and rendered as a flat
//! s-expression of label names, symbols, and unboxed integers.

use std::collections::HashSet;

use crate::linker::labels::LabelId;
use crate::linker::word::WordKind;
use crate::linker::LinkedObjectFile;

/// Longest chain we will follow; anything longer is data corruption or a cycle
/// the visited set missed.
const MAX_LIST_LEN: usize = 512;

/// Word index of the pair a label points at, if the label is a pair pointer
/// in this segment.
fn pair_target(obj: &LinkedObjectFile, seg: usize, label: LabelId) -> Option<usize> {
    let l = obj.labels.get(label);
    if l.target_segment == seg && l.offset % 8 == 2 {
        Some((l.offset - 2) / 4)
    } else {
        None
    }
}

fn render_car(
    obj: &LinkedObjectFile,
    seg: usize,
    word_idx: usize,
    visited: &mut HashSet<usize>,
    depth: usize,
) -> String {
    let word = &obj.segments[seg].words[word_idx];
    match &word.kind {
        WordKind::Ptr { label } => match pair_target(obj, seg, *label) {
            Some(pair) if depth < 8 => render_list(obj, seg, pair, visited, depth + 1),
            _ => obj.labels.name(*label).to_string(),
        },
        WordKind::SymPtr { name } => name.clone(),
        WordKind::EmptyListPtr => "'()".to_string(),
        WordKind::TypePtr { name } => name.clone(),
        // unboxed integers carry their value in the upper 29 bits
        WordKind::Plain if word.data % 8 == 0 => ((word.data as i32) >> 3).to_string(),
        _ => format!("#x{:x}", word.data),
    }
}

fn render_list(
    obj: &LinkedObjectFile,
    seg: usize,
    mut pair_idx: usize,
    visited: &mut HashSet<usize>,
    depth: usize,
) -> String {
    let words = &obj.segments[seg].words;
    let mut elements = Vec::new();

    for _ in 0..MAX_LIST_LEN {
        if pair_idx + 1 >= words.len() {
            elements.push("#<truncated>".to_string());
            break;
        }
        visited.insert(pair_idx);
        elements.push(render_car(obj, seg, pair_idx, visited, depth));

        match &words[pair_idx + 1].kind {
            WordKind::EmptyListPtr => break,
            WordKind::Ptr { label } => match pair_target(obj, seg, *label) {
                Some(next) if !visited.contains(&next) => pair_idx = next,
                Some(_) => {
                    elements.push("#<cycle>".to_string());
                    break;
                }
                None => {
                    elements.push(format!(". {}", obj.labels.name(*label)));
                    break;
                }
            },
            _ => {
                elements.push(format!(". #x{:x}", words[pair_idx + 1].data));
                break;
            }
        }
    }

    format!("({})", elements.join(" "))
}

/// Find and render every script chain reachable from the data regions.
/// Returns an empty string when the object has none.
pub fn print_scripts(obj: &LinkedObjectFile) -> String {
    let mut result = String::new();

    for seg in 0..obj.segments.len() {
        let mut visited: HashSet<usize> = HashSet::new();
        let words = &obj.segments[seg].words;
        for i in obj.segments[seg].data_start..words.len() {
            let WordKind::Ptr { label } = &words[i].kind else {
                continue;
            };
            let Some(pair) = pair_target(obj, seg, *label) else {
                continue;
            };
            if visited.contains(&pair) {
                continue;
            }
            result += &render_list(obj, seg, pair, &mut visited, 0);
            result += "\n";
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lay out: a root pointer, then two 8-byte-aligned pairs forming
    /// ("*sym*" 6). Pair pointers land 2 bytes into their pair.
    fn object_with_list() -> LinkedObjectFile {
        let mut obj = LinkedObjectFile::new(1);
        obj.push_word(0, 0); // 0: root pointer -> pair at word 2
        obj.push_word(0, 0); // 1: padding
        obj.push_word(0, 0); // 2: car of first pair (symbol)
        obj.push_word(0, 0); // 3: cdr -> pair at word 4
        obj.push_word(0, 48); // 4: car of second pair: integer 6, unboxed
        obj.push_word(0, 0); // 5: cdr -> empty list

        obj.pointer_link_word(0, 0, 0, 8 + 2).unwrap();
        obj.symbol_link_word(0, 8, "*sym*", crate::linker::SymbolLinkKind::SymPtr)
            .unwrap();
        obj.pointer_link_word(0, 12, 0, 16 + 2).unwrap();
        obj.symbol_link_word(0, 20, "", crate::linker::SymbolLinkKind::EmptyListPtr)
            .unwrap();
        obj.find_code().unwrap();
        obj
    }

    #[test]
    fn test_list_rendering() {
        let obj = object_with_list();
        assert_eq!(print_scripts(&obj), "(*sym* 6)\n");
    }

    #[test]
    fn test_no_scripts_is_empty() {
        let mut obj = LinkedObjectFile::new(1);
        obj.push_word(0, 0);
        obj.find_code().unwrap();
        assert_eq!(print_scripts(&obj), "");
    }
}
