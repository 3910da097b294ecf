// SPDX-License-Identifier: GPL-3.0-or-later
//! Control flow graphs and structural reduction.
//!
//! Vertices live in an arena and refer to each other by index, so the graph
//! can hold back edges and shared successors without ownership cycles. The
//! top level is a doubly linked chain (`prev`/`next`) from entry to exit;
//! reduction repeatedly collapses chain windows into `While`, `IfElse`, and
//! `Sequence` vertices until a full pass changes nothing. A claimed child
//! keeps only its `parent` link; all of its other link fields are cleared.

use crate::error::{DisasmError, Result};
use crate::function::Function;
use crate::linker::labels::LabelTable;
use crate::mips::insn::is_always_branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VtxId(usize);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndBranch {
    pub has_branch: bool,
    pub branch_likely: bool,
    pub branch_always: bool,
}

#[derive(Debug, Default)]
pub struct VtxLinks {
    pub parent: Option<VtxId>,
    pub prev: Option<VtxId>,
    pub next: Option<VtxId>,
    pub pred: Vec<VtxId>,
    pub succ_ft: Option<VtxId>,
    pub succ_branch: Option<VtxId>,
}

#[derive(Debug)]
pub enum VtxKind {
    Entry,
    Exit,
    Block { block_id: usize },
    Sequence { children: Vec<VtxId> },
    IfElse { condition: VtxId, true_case: VtxId, false_case: VtxId },
    While { condition: VtxId, body: VtxId },
}

#[derive(Debug)]
pub struct CfgVtx {
    pub kind: VtxKind,
    pub links: VtxLinks,
    pub end: EndBranch,
}

#[derive(Debug)]
pub struct Cfg {
    vertices: Vec<CfgVtx>,
    entry: VtxId,
    exit: VtxId,
    resolved: bool,
}

impl Cfg {
    fn new() -> Self {
        let mut cfg = Cfg {
            vertices: Vec::new(),
            entry: VtxId(0),
            exit: VtxId(0),
            resolved: false,
        };
        cfg.entry = cfg.alloc(VtxKind::Entry);
        cfg.exit = cfg.alloc(VtxKind::Exit);
        cfg
    }

    fn alloc(&mut self, kind: VtxKind) -> VtxId {
        let id = VtxId(self.vertices.len());
        self.vertices.push(CfgVtx {
            kind,
            links: VtxLinks::default(),
            end: EndBranch::default(),
        });
        id
    }

    pub fn entry(&self) -> VtxId {
        self.entry
    }

    pub fn exit(&self) -> VtxId {
        self.exit
    }

    pub fn vtx(&self, id: VtxId) -> &CfgVtx {
        &self.vertices[id.0]
    }

    fn vtx_mut(&mut self, id: VtxId) -> &mut CfgVtx {
        &mut self.vertices[id.0]
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.resolved
    }

    fn is_terminal(&self, id: VtxId) -> bool {
        matches!(self.vtx(id).kind, VtxKind::Entry | VtxKind::Exit)
    }

    /// Top-level vertices in chain order, entry and exit included.
    pub fn top_level(&self) -> Vec<VtxId> {
        let mut out = Vec::new();
        let mut cur = Some(self.entry);
        while let Some(id) = cur {
            out.push(id);
            cur = self.vtx(id).links.next;
        }
        out
    }

    fn link_fallthrough(&mut self, from: VtxId, to: VtxId) {
        self.vtx_mut(from).links.succ_ft = Some(to);
        self.vtx_mut(to).links.pred.push(from);
    }

    fn link_branch(&mut self, from: VtxId, to: VtxId) {
        self.vtx_mut(from).links.succ_branch = Some(to);
        self.vtx_mut(to).links.pred.push(from);
    }

    /// Rewrite `of`'s successor pointers that target `old` to `new`.
    fn replace_succ(&mut self, of: VtxId, old: VtxId, new: VtxId) {
        let links = &mut self.vtx_mut(of).links;
        if links.succ_ft == Some(old) {
            links.succ_ft = Some(new);
        }
        if links.succ_branch == Some(old) {
            links.succ_branch = Some(new);
        }
    }

    /// Rewrite `of`'s pred entries equal to `old` to `new`, deduplicating.
    fn replace_pred(&mut self, of: VtxId, old: VtxId, new: VtxId) {
        let pred = &mut self.vtx_mut(of).links.pred;
        for p in pred.iter_mut() {
            if *p == old {
                *p = new;
            }
        }
        pred.dedup();
    }

    fn remove_pred(&mut self, of: VtxId, gone: VtxId) {
        self.vtx_mut(of).links.pred.retain(|&p| p != gone);
    }

    /// Absorb `child` into `parent`, clearing every local link field.
    fn parent_claim(&mut self, child: VtxId, parent: VtxId) {
        let links = &mut self.vtx_mut(child).links;
        *links = VtxLinks {
            parent: Some(parent),
            ..VtxLinks::default()
        };
    }

    /// Splice `new` into the top-level chain in place of `first..=last`.
    fn splice_chain(&mut self, first: VtxId, last: VtxId, new: VtxId) {
        let before = self.vtx(first).links.prev;
        let after = self.vtx(last).links.next;
        self.vtx_mut(new).links.prev = before;
        self.vtx_mut(new).links.next = after;
        if let Some(b) = before {
            self.vtx_mut(b).links.next = Some(new);
        }
        if let Some(a) = after {
            self.vtx_mut(a).links.prev = Some(new);
        }
    }

    // -- reduction ---------------------------------------------------------

    pub fn reduce(&mut self) {
        loop {
            let mut changed = false;
            changed |= self.find_while_loops();
            changed |= self.find_if_else();
            changed |= self.find_sequences();
            if !changed {
                break;
            }
        }
        let tops: Vec<VtxId> = self
            .top_level()
            .into_iter()
            .filter(|&id| !self.is_terminal(id))
            .collect();
        if tops.len() == 1 {
            self.resolved = true;
            // the survivor's links are now structural noise
            let top = tops[0];
            let links = &mut self.vtx_mut(top).links;
            links.pred.clear();
            links.succ_ft = None;
            links.succ_branch = None;
        }
    }

    /// Rule 1: `B0` jumps unconditionally over the body `B1` to the
    /// condition `B2`, which branches back to `B1`. `B0` stays top-level;
    /// the new vertex takes its place as branch successor.
    fn find_while_loops(&mut self) -> bool {
        let mut changed = false;
        'restart: loop {
            let tops = self.top_level();
            for w in tops.windows(3) {
                let (b0, b1, b2) = (w[0], w[1], w[2]);
                if self.is_while_loop(b0, b1, b2) {
                    self.make_while(b0, b1, b2);
                    changed = true;
                    continue 'restart;
                }
            }
            return changed;
        }
    }

    fn is_while_loop(&self, b0: VtxId, b1: VtxId, b2: VtxId) -> bool {
        if self.is_terminal(b0) || self.is_terminal(b1) || self.is_terminal(b2) {
            return false;
        }
        let v0 = self.vtx(b0);
        let v1 = self.vtx(b1);
        let v2 = self.vtx(b2);

        // b0 unconditionally jumps forward to the condition
        if !v0.end.has_branch
            || !v0.end.branch_always
            || v0.end.branch_likely
            || v0.links.succ_branch != Some(b2)
            || v0.links.succ_ft.is_some()
        {
            return false;
        }
        // the body falls into the condition and does not branch
        if v1.end.has_branch || v1.links.succ_ft != Some(b2) || v1.links.succ_branch.is_some() {
            return false;
        }
        // the condition branches back to the body
        if !v2.end.has_branch
            || v2.end.branch_always
            || v2.end.branch_likely
            || v2.links.succ_branch != Some(b1)
        {
            return false;
        }
        // the body is entered only from the condition, and the condition only
        // from b0 and the body
        v1.links.pred == [b2] && v2.links.pred.iter().all(|&p| p == b0 || p == b1)
            && v2.links.pred.contains(&b0)
    }

    fn make_while(&mut self, b0: VtxId, b1: VtxId, b2: VtxId) {
        let succ = self.vtx(b2).links.succ_ft;
        let w = self.alloc(VtxKind::While {
            condition: b2,
            body: b1,
        });

        self.splice_chain(b1, b2, w);
        self.replace_succ(b0, b2, w);
        self.vtx_mut(w).links.pred = vec![b0];
        self.vtx_mut(w).links.succ_ft = succ;
        if let Some(s) = succ {
            self.replace_pred(s, b2, w);
        }
        self.parent_claim(b1, w);
        self.parent_claim(b2, w);
    }

    /// Rule 2: `B0` conditionally branches to the else case `B2`, falling
    /// through to the then case `B1`, which jumps over `B2` to the join
    /// point `B3`.
    fn find_if_else(&mut self) -> bool {
        let mut changed = false;
        'restart: loop {
            let tops = self.top_level();
            for w in tops.windows(4) {
                let (b0, b1, b2, b3) = (w[0], w[1], w[2], w[3]);
                if self.is_if_else(b0, b1, b2, b3) {
                    self.make_if_else(b0, b1, b2, b3);
                    changed = true;
                    continue 'restart;
                }
            }
            return changed;
        }
    }

    fn is_if_else(&self, b0: VtxId, b1: VtxId, b2: VtxId, b3: VtxId) -> bool {
        if self.is_terminal(b0) || self.is_terminal(b1) || self.is_terminal(b2) || self.is_terminal(b3)
        {
            return false;
        }
        let v0 = self.vtx(b0);
        let v1 = self.vtx(b1);
        let v2 = self.vtx(b2);
        let v3 = self.vtx(b3);

        if !v0.end.has_branch
            || v0.end.branch_always
            || v0.end.branch_likely
            || v0.links.succ_branch != Some(b2)
            || v0.links.succ_ft != Some(b1)
        {
            return false;
        }
        if !v1.end.has_branch
            || !v1.end.branch_always
            || v1.end.branch_likely
            || v1.links.succ_branch != Some(b3)
            || v1.links.succ_ft.is_some()
        {
            return false;
        }
        if v2.end.has_branch || v2.links.succ_ft != Some(b3) || v2.links.succ_branch.is_some() {
            return false;
        }
        v1.links.pred == [b0]
            && v2.links.pred == [b0]
            && v3.links.pred.contains(&b1)
            && v3.links.pred.contains(&b2)
    }

    fn make_if_else(&mut self, b0: VtxId, b1: VtxId, b2: VtxId, b3: VtxId) {
        let preds = std::mem::take(&mut self.vtx_mut(b0).links.pred);
        let v = self.alloc(VtxKind::IfElse {
            condition: b0,
            true_case: b1,
            false_case: b2,
        });

        self.splice_chain(b0, b2, v);
        for &p in &preds {
            self.replace_succ(p, b0, v);
        }
        self.vtx_mut(v).links.pred = preds;
        self.vtx_mut(v).links.succ_ft = Some(b3);
        self.remove_pred(b3, b1);
        self.remove_pred(b3, b2);
        self.vtx_mut(b3).links.pred.push(v);
        self.parent_claim(b0, v);
        self.parent_claim(b1, v);
        self.parent_claim(b2, v);
    }

    /// Rule 3: fold a straight-line pair into a `Sequence`. Existing
    /// sequences are never extended or nested by this rule.
    fn find_sequences(&mut self) -> bool {
        let mut changed = false;
        'restart: loop {
            let tops = self.top_level();
            for w in tops.windows(2) {
                let (b0, b1) = (w[0], w[1]);
                if self.is_sequence(b0, b1) {
                    self.make_sequence(b0, b1);
                    changed = true;
                    continue 'restart;
                }
            }
            return changed;
        }
    }

    fn is_sequence(&self, b0: VtxId, b1: VtxId) -> bool {
        if self.is_terminal(b0) || self.is_terminal(b1) {
            return false;
        }
        if matches!(self.vtx(b0).kind, VtxKind::Sequence { .. })
            || matches!(self.vtx(b1).kind, VtxKind::Sequence { .. })
        {
            return false;
        }
        let v0 = self.vtx(b0);
        let v1 = self.vtx(b1);
        let only_succ = (v0.links.succ_ft == Some(b1) && v0.links.succ_branch.is_none())
            || (v0.links.succ_branch == Some(b1) && v0.links.succ_ft.is_none());
        only_succ && v1.links.pred == [b0]
    }

    fn make_sequence(&mut self, b0: VtxId, b1: VtxId) {
        let preds = std::mem::take(&mut self.vtx_mut(b0).links.pred);
        let succ_ft = self.vtx(b1).links.succ_ft;
        let succ_branch = self.vtx(b1).links.succ_branch;
        let end = self.vtx(b1).end;
        let s = self.alloc(VtxKind::Sequence {
            children: vec![b0, b1],
        });

        self.splice_chain(b0, b1, s);
        for &p in &preds {
            self.replace_succ(p, b0, s);
        }
        self.vtx_mut(s).links.pred = preds;
        self.vtx_mut(s).links.succ_ft = succ_ft;
        self.vtx_mut(s).links.succ_branch = succ_branch;
        self.vtx_mut(s).end = end;
        if let Some(t) = succ_ft {
            self.replace_pred(t, b1, s);
        }
        if let Some(t) = succ_branch {
            self.replace_pred(t, b1, s);
        }
        self.parent_claim(b0, s);
        self.parent_claim(b1, s);
    }

    // -- rendering ---------------------------------------------------------

    fn form(&self, id: VtxId) -> String {
        match &self.vtx(id).kind {
            VtxKind::Entry => "entry".to_string(),
            VtxKind::Exit => "exit".to_string(),
            VtxKind::Block { block_id } => format!("b{block_id}"),
            VtxKind::Sequence { children } => {
                let inner: Vec<String> = children.iter().map(|&c| self.form(c)).collect();
                format!("(seq {})", inner.join(" "))
            }
            VtxKind::IfElse { condition, true_case, false_case } => format!(
                "(if {} {} {})",
                self.form(*condition),
                self.form(*true_case),
                self.form(*false_case)
            ),
            VtxKind::While { condition, body } => {
                format!("(while {} {})", self.form(*condition), self.form(*body))
            }
        }
    }

    /// The reduced structure as an s-expression, or `(ungrouped ...)` when
    /// reduction did not get down to a single region.
    pub fn to_form_string(&self) -> String {
        let tops: Vec<VtxId> = self
            .top_level()
            .into_iter()
            .filter(|&id| !self.is_terminal(id))
            .collect();
        if self.resolved && tops.len() == 1 {
            self.form(tops[0])
        } else {
            let inner: Vec<String> = tops.iter().map(|&t| self.form(t)).collect();
            format!("(ungrouped {})", inner.join(" "))
        }
    }
}

/// Build the block graph for one function.
///
/// Each basic block becomes a `Block` vertex chained between entry and exit.
/// A block's control transfer is decided by its last non-delay-slot
/// instruction. Block targets are looked up by start word, scanning blocks in
/// reverse so that when zero-length blocks share a start address the later
/// one wins.
pub fn build_cfg(func: &Function, labels: &LabelTable, seg: usize) -> Result<Cfg> {
    let mut cfg = Cfg::new();
    if func.basic_blocks.is_empty() {
        let (entry, exit) = (cfg.entry(), cfg.exit());
        cfg.vtx_mut(entry).links.next = Some(exit);
        cfg.vtx_mut(exit).links.prev = Some(entry);
        cfg.link_fallthrough(entry, exit);
        cfg.resolved = true;
        return Ok(cfg);
    }

    let blocks: Vec<VtxId> = (0..func.basic_blocks.len())
        .map(|i| cfg.alloc(VtxKind::Block { block_id: i }))
        .collect();

    // chain: entry <-> b0 <-> ... <-> bn <-> exit
    let chain: Vec<VtxId> = std::iter::once(cfg.entry())
        .chain(blocks.iter().copied())
        .chain(std::iter::once(cfg.exit()))
        .collect();
    for pair in chain.windows(2) {
        cfg.vtx_mut(pair[0]).links.next = Some(pair[1]);
        cfg.vtx_mut(pair[1]).links.prev = Some(pair[0]);
    }

    cfg.link_fallthrough(cfg.entry(), blocks[0]);

    for (i, bb) in func.basic_blocks.iter().enumerate() {
        let this = blocks[i];
        let next = blocks.get(i + 1).copied().unwrap_or(cfg.exit());

        // a branch needs room for itself and its delay slot
        if bb.end_word - bb.start_word >= 2 {
            let candidate = &func.instructions[bb.end_word - 2];
            let info = candidate.info();
            if info.is_branch || info.is_branch_likely {
                let label_id = candidate.label_target().ok_or_else(|| {
                    DisasmError::malformed(
                        "branch without a target label",
                        seg,
                        (func.start_word + bb.end_word - 2) * 4,
                    )
                })?;
                let label = labels.get(label_id);
                let target_word = (label.offset / 4)
                    .checked_sub(func.start_word)
                    .ok_or_else(|| {
                        DisasmError::malformed(
                            "branch target before the function",
                            seg,
                            label.offset,
                        )
                    })?;

                // reverse scan: with zero-length blocks at the same start,
                // the later block wins
                let target_block = (0..func.basic_blocks.len())
                    .rev()
                    .find(|&j| func.basic_blocks[j].start_word == target_word)
                    .ok_or_else(|| {
                        DisasmError::malformed(
                            "branch target is not a block boundary",
                            seg,
                            label.offset,
                        )
                    })?;

                cfg.vtx_mut(this).end = EndBranch {
                    has_branch: true,
                    branch_likely: info.is_branch_likely,
                    branch_always: is_always_branch(candidate),
                };
                cfg.link_branch(this, blocks[target_block]);
                if !cfg.vtx(this).end.branch_always {
                    cfg.link_fallthrough(this, next);
                }
                continue;
            }
        }
        cfg.link_fallthrough(this, next);
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::blocks::{find_blocks_in_function, BasicBlock};
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

    /// beq r0, r0, offset
    fn b_always(offset: i16) -> u32 {
        0x1000_0000 | (offset as u16 as u32)
    }

    /// bne v0, r0, offset
    fn b_cond(offset: i16) -> u32 {
        0x1440_0000 | (offset as u16 as u32)
    }

    #[test]
    fn test_single_block_reduces_trivially() {
        let (func, labels) = make_function(&[0, 0x0000_1025, 0x03e0_0008, 0x03a0_e82d]);
        let mut cfg = build_cfg(&func, &labels, 0).unwrap();
        cfg.reduce();
        assert!(cfg.is_fully_resolved());
        assert_eq!(cfg.to_form_string(), "b0");
    }

    #[test]
    fn test_if_else_reduces() {
        // 0 tag, 1 bne -> 6, 2 nop | 3 then, 4 beq -> 7, 5 nop | 6 else |
        // 7.. join
        let (func, labels) = make_function(&[
            0,
            b_cond(4),   // 1: to word 6
            0,           // 2: delay
            0x2402_0001, // 3: addiu v0, r0, 1
            b_always(2), // 4: to word 7
            0,           // 5: delay
            0x2402_0002, // 6: addiu v0, r0, 2
            0x0000_1825, // 7: or v1, r0, r0
            0x03e0_0008, // 8
        ]);
        assert_eq!(func.basic_blocks.len(), 4);
        let mut cfg = build_cfg(&func, &labels, 0).unwrap();
        cfg.reduce();
        assert!(cfg.is_fully_resolved(), "{}", cfg.to_form_string());
        assert_eq!(cfg.to_form_string(), "(seq (if b0 b1 b2) b3)");

        // claimed children keep only their parent link
        let claimed = cfg
            .top_level()
            .iter()
            .filter(|&&id| !cfg.is_terminal(id))
            .count();
        assert_eq!(claimed, 1);
    }

    #[test]
    fn test_while_loop_reduces() {
        // 0 tag, 1 beq -> 4 (condition), 2 nop | 3 body | 4 bne -> 3, 5 nop |
        // 6 after
        let (func, labels) = make_function(&[
            0,
            b_always(2), // 1: to word 4
            0,           // 2: delay
            0x2442_0001, // 3: addiu v0, v0, 1 (body)
            b_cond(-2),  // 4: back to word 3
            0,           // 5: delay
            0x0000_1825, // 6: or v1, r0, r0
        ]);
        assert_eq!(func.basic_blocks.len(), 4);
        let mut cfg = build_cfg(&func, &labels, 0).unwrap();
        cfg.reduce();

        // rule 3 never folds a sequence into a sequence, so the tail block
        // stays top-level and the graph is only partially resolved
        assert!(!cfg.is_fully_resolved());
        assert_eq!(
            cfg.to_form_string(),
            "(ungrouped (seq b0 (while b2 b1)) b3)"
        );
    }

    #[test]
    fn test_while_children_are_claimed() {
        let (func, labels) = make_function(&[
            0,
            b_always(2),
            0,
            0x2442_0001,
            b_cond(-2),
            0,
            0x0000_1825,
        ]);
        let mut cfg = build_cfg(&func, &labels, 0).unwrap();
        cfg.reduce();

        let whiles: Vec<&CfgVtx> = (0..cfg.vertices.len())
            .map(VtxId)
            .map(|id| cfg.vtx(id))
            .filter(|v| matches!(v.kind, VtxKind::While { .. }))
            .collect();
        assert_eq!(whiles.len(), 1);
        if let VtxKind::While { condition, body } = whiles[0].kind {
            for child in [condition, body] {
                let links = &cfg.vtx(child).links;
                assert!(links.parent.is_some());
                assert!(links.pred.is_empty());
                assert!(links.succ_ft.is_none());
                assert!(links.succ_branch.is_none());
                assert!(links.next.is_none());
                assert!(links.prev.is_none());
            }
        }
    }

    #[test]
    fn test_zero_length_block_tie_break() {
        // Two blocks share start word 1 after the first is emptied; the
        // branch target lookup must pick the later one. This mirrors the
        // degenerate case the builder resolves by scanning in reverse.
        let mut labels = LabelTable::new(1);
        let words = [0u32, 0, 0, b_cond(-3), 0];
        let mut func = Function::new(0, 0, words.len());
        for (i, &w) in words.iter().enumerate() {
            func.instructions
                .push(decode_instruction(&LinkedWord::plain(w), &mut labels, 0, i));
        }
        func.basic_blocks = vec![
            BasicBlock { start_word: 1, end_word: 1 },
            BasicBlock { start_word: 1, end_word: 5 },
        ];
        let cfg = build_cfg(&func, &labels, 0).unwrap();

        let tops = cfg.top_level();
        let b1 = tops[2]; // entry, b0, b1, exit
        assert!(matches!(cfg.vtx(b1).kind, VtxKind::Block { block_id: 1 }));
        // the self-loop proves the reverse-scan tie-break picked block 1
        assert_eq!(cfg.vtx(b1).links.succ_branch, Some(b1));
    }
}
