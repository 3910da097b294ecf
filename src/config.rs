// SPDX-License-Identifier: GPL-3.0-or-later
//! Run configuration.
//!
//! All fields are required; a config file missing any of them is rejected so
//! that silently-defaulted output settings can't mask a bad run.

use serde::Deserialize;

use crate::error::{DisasmError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Selects per-version quirks (e.g. which objects skip FP resolution).
    pub game_version: u32,
    /// Container base names to ingest, in order.
    pub dgo_names: Vec<String>,
    pub write_disassembly: bool,
    pub write_hexdump: bool,
    pub write_scripts: bool,
    pub write_hexdump_on_v3_only: bool,
    pub disassemble_objects_without_functions: bool,
    pub find_basic_blocks: bool,
    /// Echo the raw word next to each rendered instruction.
    pub write_hex_near_instructions: bool,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| DisasmError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config_json() -> &'static str {
        r#"{
            "game_version": 2,
            "dgo_names": ["ENGINE.CGO", "ART.CGO"],
            "write_disassembly": true,
            "write_hexdump": false,
            "write_scripts": true,
            "write_hexdump_on_v3_only": false,
            "disassemble_objects_without_functions": false,
            "find_basic_blocks": true,
            "write_hex_near_instructions": true
        }"#
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_json(full_config_json()).unwrap();
        assert_eq!(config.game_version, 2);
        assert_eq!(config.dgo_names.len(), 2);
        assert!(config.find_basic_blocks);
    }

    #[test]
    fn test_missing_field_rejected() {
        let json = r#"{ "game_version": 2 }"#;
        assert!(matches!(
            Config::from_json(json),
            Err(DisasmError::Config(_))
        ));
    }
}
