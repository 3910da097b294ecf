// SPDX-License-Identifier: GPL-3.0-or-later
//! The object file database.
//!
//! Containers are ingested into a per-name store; identical blobs (same name,
//! size, and CRC32) are deduplicated with a reference count and a `(name,
//! version)` identity. The database then drives the analysis passes over
//! every unique object, in a deterministic order, and produces the rendered
//! outputs.
//!
//! Once ingestion finishes the per-name vectors are never touched again, so
//! records handed out during ingestion stay valid for the whole run.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{Context, Result};

use crate::cfg::build_cfg;
use crate::config::Config;
use crate::decompress;
use crate::dgo::parse_dgo;
use crate::error::DisasmError;
use crate::function::blocks::find_blocks_in_function;
use crate::linker::parse::to_linked_object;
use crate::linker::{LinkStats, LinkedObjectFile, Segment, SEG_TOP_LEVEL};
use crate::output::{print_disassembly, print_scripts, print_words};

// -- CRC32 (IEEE 802.3), table built on first use ---------------------------

static CRC_TABLE: OnceLock<[u32; 256]> = OnceLock::new();

fn crc_table() -> &'static [u32; 256] {
    CRC_TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = i as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    0xedb8_8320 ^ (crc >> 1)
                } else {
                    crc >> 1
                };
            }
            *entry = crc;
        }
        table
    })
}

pub fn crc32(data: &[u8]) -> u32 {
    let table = crc_table();
    let mut crc = 0xffff_ffffu32;
    for &byte in data {
        crc = table[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8);
    }
    !crc
}

// -- records ----------------------------------------------------------------

/// Identity of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFileRecord {
    pub name: String,
    pub version: usize,
    pub hash: u32,
}

impl ObjectFileRecord {
    pub fn unique_name(&self) -> String {
        format!("{}-v{}", self.name, self.version)
    }
}

/// All the data for one unique object.
#[derive(Debug)]
pub struct ObjectFileData {
    pub data: Vec<u8>,
    pub linked: LinkedObjectFile,
    pub record: ObjectFileRecord,
    pub reference_count: u32,
}

#[derive(Debug, Default)]
pub struct DbStats {
    pub total_dgo_bytes: u32,
    pub total_obj_files: u32,
    pub unique_obj_files: u32,
    pub unique_obj_bytes: u32,
}

pub struct ObjectFileDB {
    config: Config,
    obj_files_by_name: HashMap<String, Vec<ObjectFileData>>,
    obj_files_by_dgo: HashMap<String, Vec<ObjectFileRecord>>,
    /// Names in first-seen order, so passes iterate deterministically.
    obj_file_order: Vec<String>,
    pub stats: DbStats,
}

impl ObjectFileDB {
    /// Ingest the given containers (`(base name, raw bytes)` pairs), in
    /// order. Compressed containers are expanded transparently.
    pub fn from_dgos(config: Config, dgos: Vec<(String, Vec<u8>)>) -> Result<Self> {
        let mut db = ObjectFileDB {
            config,
            obj_files_by_name: HashMap::new(),
            obj_files_by_dgo: HashMap::new(),
            obj_file_order: Vec::new(),
            stats: DbStats::default(),
        };

        log::info!("initializing the object file database");
        for (name, data) in dgos {
            db.get_objs_from_dgo(&name, &data)
                .with_context(|| format!("while ingesting container {name}"))?;
        }

        log::info!(
            "database initialized: {} containers, {} bytes, {} objects, {} unique ({} bytes)",
            db.obj_files_by_dgo.len(),
            db.stats.total_dgo_bytes,
            db.stats.total_obj_files,
            db.stats.unique_obj_files,
            db.stats.unique_obj_bytes
        );
        Ok(db)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn get_objs_from_dgo(&mut self, base_name: &str, data: &[u8]) -> Result<()> {
        self.stats.total_dgo_bytes += data.len() as u32;

        let expanded;
        let data = if decompress::is_compressed(data) {
            expanded = decompress::expand(data)?;
            &expanded[..]
        } else {
            data
        };

        for obj in parse_dgo(data, base_name)? {
            self.add_obj_from_dgo(&obj.name, obj.data, base_name);
        }
        Ok(())
    }

    /// Add one object blob, deduplicating against previous blobs of the same
    /// name by `(size, crc32)`.
    fn add_obj_from_dgo(&mut self, obj_name: &str, obj_data: &[u8], dgo_name: &str) {
        self.stats.total_obj_files += 1;
        let hash = crc32(obj_data);

        let entries = self.obj_files_by_name.entry(obj_name.to_string()).or_default();
        for entry in entries.iter_mut() {
            if entry.data.len() == obj_data.len() && entry.record.hash == hash {
                entry.reference_count += 1;
                let record = entry.record.clone();
                self.obj_files_by_dgo
                    .entry(dgo_name.to_string())
                    .or_default()
                    .push(record);
                return;
            }
        }

        if entries.is_empty() {
            self.obj_file_order.push(obj_name.to_string());
        }
        let record = ObjectFileRecord {
            name: obj_name.to_string(),
            version: entries.len(),
            hash,
        };
        self.obj_files_by_dgo
            .entry(dgo_name.to_string())
            .or_default()
            .push(record.clone());
        entries.push(ObjectFileData {
            data: obj_data.to_vec(),
            linked: LinkedObjectFile::default(),
            record,
            reference_count: 1,
        });
        self.stats.unique_obj_files += 1;
        self.stats.unique_obj_bytes += obj_data.len() as u32;
    }

    fn for_each_obj<F: FnMut(&ObjectFileData)>(&self, mut f: F) {
        for name in &self.obj_file_order {
            for obj in &self.obj_files_by_name[name] {
                f(obj);
            }
        }
    }

    fn for_each_obj_mut<F: FnMut(&mut ObjectFileData) -> Result<()>>(
        &mut self,
        mut f: F,
    ) -> Result<()> {
        for name in &self.obj_file_order {
            for obj in self.obj_files_by_name.get_mut(name).expect("order is in sync") {
                f(obj).with_context(|| format!("in object {}", obj.record.unique_name()))?;
            }
        }
        Ok(())
    }

    /// Look up one object by its unique `name-vN` identity.
    pub fn lookup(&self, name: &str, version: usize) -> Option<&ObjectFileData> {
        self.obj_files_by_name.get(name)?.get(version)
    }

    // -- passes -------------------------------------------------------------

    /// Parse every object's wire format and link table.
    pub fn process_link_data(&mut self) -> Result<LinkStats> {
        log::info!("processing link data");
        let mut combined = LinkStats::default();
        self.for_each_obj_mut(|obj| {
            obj.linked = to_linked_object(&obj.data)?;
            combined.add(&obj.linked.stats);
            Ok(())
        })?;
        log::info!(
            "link data: v2 {} payload / {} link bytes, v3 {} payload / {} link bytes, \
             {} pointers, {} split, {} symbol links",
            combined.v2_code_bytes,
            combined.v2_link_bytes,
            combined.v3_code_bytes,
            combined.v3_link_bytes,
            combined.v2_pointers + combined.v3_word_pointers,
            combined.v3_split_pointers,
            combined.v2_symbol_links + combined.v3_symbol_link_word + combined.v3_symbol_link_offset
        );
        Ok(combined)
    }

    /// Split code from data, carve functions, decode, and resolve fp uses.
    pub fn find_code(&mut self) -> Result<LinkStats> {
        log::info!("finding code in object files");
        let mut combined = LinkStats::default();
        let game_version = self.config.game_version;
        self.for_each_obj_mut(|obj| {
            obj.linked.find_code()?;
            obj.linked.find_functions()?;
            obj.linked.disassemble_functions();

            // one object in the second game links fp against data the
            // resolver cannot model
            if game_version == 1 || obj.record.unique_name() != "effect-control-v0" {
                obj.linked.process_fp_relative_links()?;
            } else {
                log::info!(
                    "skipping fp-relative resolution in {}",
                    obj.record.unique_name()
                );
            }

            let stats = &obj.linked.stats;
            if stats.code_bytes / 4 > stats.decoded_ops {
                log::warn!(
                    "failed to decode all of {} ({} / {})",
                    obj.record.unique_name(),
                    stats.decoded_ops,
                    stats.code_bytes / 4
                );
            }
            combined.add(stats);
            Ok(())
        })?;
        log::info!(
            "found code: {} code bytes, {} data bytes, {} functions, \
             fp uses resolved {} / {}, decoded {} / {}",
            combined.code_bytes,
            combined.data_bytes,
            combined.function_count,
            combined.n_fp_reg_use_resolved,
            combined.n_fp_reg_use,
            combined.decoded_ops,
            combined.code_bytes / 4
        );
        Ok(combined)
    }

    /// Canonical label renaming across every object. Returns the label count.
    pub fn process_labels(&mut self) -> Result<u32> {
        log::info!("processing labels");
        let mut total = 0u32;
        self.for_each_obj_mut(|obj| {
            total += obj.linked.set_ordered_label_names() as u32;
            Ok(())
        })?;
        log::info!("processed {} labels", total);
        Ok(total)
    }

    /// Basic blocks, frame analysis, and CFG reduction, plus naming of each
    /// top-level init function.
    pub fn analyze_functions(&mut self) -> Result<()> {
        log::info!("analyzing functions");
        let find_basic_blocks = self.config.find_basic_blocks;
        let mut total_blocks = 0usize;
        let mut resolved = 0usize;
        let mut total_cfgs = 0usize;

        self.for_each_obj_mut(|obj| {
            if find_basic_blocks {
                let LinkedObjectFile { segments, labels, .. } = &mut obj.linked;
                for (seg_idx, seg) in segments.iter_mut().enumerate() {
                    let Segment { functions, .. } = seg;
                    for func in functions.iter_mut() {
                        func.basic_blocks = find_blocks_in_function(func, labels, seg_idx)?;
                        total_blocks += func.basic_blocks.len();
                        func.analyze_prologue(labels);

                        if !func.suspected_asm {
                            let mut cfg = build_cfg(func, labels, seg_idx)?;
                            cfg.reduce();
                            total_cfgs += 1;
                            if cfg.is_fully_resolved() {
                                resolved += 1;
                            }
                            func.cfg = Some(cfg);
                        }
                    }
                }
            }

            // every code-bearing object has exactly one top-level init
            if obj.linked.segments.len() == 3 {
                let top = &mut obj.linked.segments[SEG_TOP_LEVEL];
                if top.functions.len() != 1 {
                    return Err(DisasmError::malformed(
                        "top-level segment without exactly one function",
                        SEG_TOP_LEVEL,
                        0,
                    )
                    .into());
                }
                let func = &mut top.functions[0];
                debug_assert!(func.guessed_name.is_empty());
                func.guessed_name = "(top-level-init)".to_string();
            }
            Ok(())
        })?;

        if find_basic_blocks {
            log::info!(
                "found {} basic blocks; {} / {} CFGs fully resolved",
                total_blocks,
                resolved,
                total_cfgs
            );
        }
        Ok(())
    }

    // -- outputs ------------------------------------------------------------

    /// Which objects go in which containers, with their versions.
    pub fn generate_dgo_listing(&self) -> String {
        let mut result = String::from(";; DGO File Listing\n\n");
        let mut dgo_names: Vec<&String> = self.obj_files_by_dgo.keys().collect();
        dgo_names.sort();

        for name in dgo_names {
            result += &format!("(\"{}\"\n", name);
            for record in &self.obj_files_by_dgo[name] {
                result += &format!("  {} :version {}\n", record.name, record.version);
            }
            result += "  )\n\n";
        }
        result
    }

    /// Raw word dumps, one `(file name, text)` pair per object.
    pub fn write_object_file_words(&self, v3_only: bool) -> Vec<(String, String)> {
        log::info!(
            "writing object file dumps ({})",
            if v3_only { "v3 only" } else { "all" }
        );
        let mut out = Vec::new();
        self.for_each_obj(|obj| {
            if obj.linked.segments.len() == 3 || !v3_only {
                out.push((
                    format!("{}.txt", obj.record.unique_name()),
                    print_words(&obj.linked),
                ));
            }
        });
        out
    }

    /// Disassembly, one `(file name, text)` pair per code-bearing object
    /// (or for every object when `include_objects_without_functions`).
    pub fn write_disassembly(&self, include_objects_without_functions: bool) -> Vec<(String, String)> {
        log::info!("writing disassembly");
        let hex_near = self.config.write_hex_near_instructions;
        let mut out = Vec::new();
        self.for_each_obj(|obj| {
            if obj.linked.has_any_functions() || include_objects_without_functions {
                out.push((
                    format!("{}.func", obj.record.unique_name()),
                    print_disassembly(&obj.linked, hex_near),
                ));
            }
        });
        out
    }

    /// All recovered scripts, concatenated with per-object headers.
    pub fn find_and_write_scripts(&self) -> String {
        log::info!("finding scripts in object files");
        let mut all_scripts = String::new();
        self.for_each_obj(|obj| {
            let scripts = print_scripts(&obj.linked);
            if !scripts.is_empty() {
                all_scripts += ";--------------------------------------\n";
                all_scripts += &format!("; {}\n", obj.record.unique_name());
                all_scripts += ";---------------------------------------\n";
                all_scripts += &scripts;
            }
        });
        all_scripts
    }
}
