// SPDX-License-Identifier: GPL-3.0-or-later
//! Raw word dumps with link annotations and labels.

use crate::linker::{segment_name, LinkedObjectFile};
use crate::output::word_to_string;

/// Render every word of every segment with its labels. Segments print
/// high-index first, matching the on-disk layout of the objects.
pub fn print_words(obj: &LinkedObjectFile) -> String {
    let mut result = String::new();

    for seg in (0..obj.segments.len()).rev() {
        result += ";------------------------------------------\n;  ";
        result += segment_name(seg);
        result += "\n;------------------------------------------\n";

        for (i, word) in obj.segments[seg].words.iter().enumerate() {
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
            result += &word_to_string(word, &obj.labels);
        }
    }

    result
}
