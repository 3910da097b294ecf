// SPDX-License-Identifier: GPL-3.0-or-later
//! DGO Disassembler Library
//!
//! This library ingests packed object archives from a MIPS-based game,
//! deduplicates the objects they contain, reconstructs link information,
//! decodes the machine code, and performs control-flow analysis, producing
//! structured disassembly and recovered script tables.

pub mod cfg;
pub mod config;
pub mod db;
pub mod decompress;
pub mod dgo;
pub mod error;
pub mod function;
pub mod linker;
pub mod mips;
pub mod output;
pub mod reader;
