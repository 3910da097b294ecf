// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use dgo_disassembler::{config::Config, db::ObjectFileDB};

#[derive(Parser)]
#[command(name = "dgo-disassembler")]
#[command(about = "Disassemble MIPS game code packed in DGO archives")]
struct Args {
    /// Path to the JSON configuration file
    config: PathBuf,

    /// Directory containing the input containers named by the config
    #[arg(short, long, default_value = ".")]
    input: PathBuf,

    /// Output directory for disassembly and dumps
    #[arg(short, long, default_value = "out")]
    output: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn write_output(dir: &Path, name: &str, text: &str) -> Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, text).with_context(|| format!("failed to write {:?}", path))
}

fn run(args: &Args) -> Result<()> {
    let config_text = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read config file {:?}", args.config))?;
    let config = Config::from_json(&config_text)?;

    let mut dgos = Vec::new();
    for name in &config.dgo_names {
        let path = args.input.join(name);
        let data = std::fs::read(&path)
            .with_context(|| format!("failed to read container {:?}", path))?;
        dgos.push((name.clone(), data));
    }

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("failed to create output directory {:?}", args.output))?;

    let mut db = ObjectFileDB::from_dgos(config.clone(), dgos)?;
    write_output(&args.output, "dgo.txt", &db.generate_dgo_listing())?;

    db.process_link_data()?;
    db.find_code()?;
    db.process_labels()?;
    db.analyze_functions()?;

    if config.write_scripts {
        write_output(&args.output, "all_scripts.lisp", &db.find_and_write_scripts())?;
    }
    if config.write_hexdump {
        for (name, text) in db.write_object_file_words(config.write_hexdump_on_v3_only) {
            write_output(&args.output, &name, &text)?;
        }
    }
    if config.write_disassembly {
        for (name, text) in db.write_disassembly(config.disassemble_objects_without_functions) {
            write_output(&args.output, &name, &text)?;
        }
    }

    Ok(())
}
