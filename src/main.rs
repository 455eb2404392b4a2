use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use zdasm::chunk::Chunk;
use zdasm::config::DisasmConfig;
use zdasm::explorer::{explore, StoryMap};
use zdasm::text::decode_text_for_header;

/// Classify every byte of a Z-machine story file by following its control flow
#[derive(Parser, Debug)]
#[command(name = "zdasm", version)]
struct Args {
    /// Story file to explore
    story: PathBuf,

    /// TOML file with exploration settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Treat the story as this version (3-8) regardless of its header
    #[arg(short = 'z', long)]
    zversion: Option<u8>,

    /// Print the decoded header first
    #[arg(long)]
    header: bool,

    /// List the instructions inside each routine
    #[arg(short, long)]
    verbose: bool,
}

fn describe(chunk: &Chunk, map: &StoryMap) -> String {
    match chunk {
        Chunk::Header(h) => format!("version {} release {} serial {}", h.version, h.release, h.serial_string()),
        Chunk::Data(d) if d.is_zero() => "zeros".to_string(),
        Chunk::Data(d) => format!("{} bytes", d.bytes.len()),
        Chunk::Instruction(inst) => match &inst.text {
            Some(words) => match decode_text_for_header(words, &map.header) {
                Ok(text) => format!("{} {:?}", inst, text),
                Err(e) => format!("{} <{}>", inst, e),
            },
            None => inst.to_string(),
        },
        Chunk::Compound(c) => format!("{} chunks", c.children().len()),
        Chunk::Routine(r) => format!(
            "{} locals, {} instructions",
            r.locals.len(),
            r.instructions().count()
        ),
        Chunk::Globals(g) => format!("{} globals", g.values.len()),
    }
}

fn print_map(map: &StoryMap, verbose: bool) {
    let mut previous: Option<&Chunk> = None;
    for interval in &map.chunks {
        let chunk = &interval.value;
        if previous.map_or(false, |p| chunk.wants_new_paragraph(p)) {
            println!();
        }
        for label in map.landmarks.labels_at(interval.start) {
            println!("{}::", label);
        }

        chunk.visit(&mut |c: &Chunk, depth: usize| {
            if depth > 0 && !verbose {
                return;
            }
            println!(
                "{:indent$}{:05x} {:6} {:<11} {}",
                "",
                c.start(),
                c.len(),
                c.kind(),
                describe(c, map),
                indent = depth * 2
            );
        });
        previous = Some(chunk);
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DisasmConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => DisasmConfig::default(),
    };
    if args.zversion.is_some() {
        config.version = args.zversion;
    }
    debug!("Using {:?}", config);

    let memory = fs::read(&args.story)
        .with_context(|| format!("reading story file {}", args.story.display()))?;
    info!("Loaded {} bytes from {}", memory.len(), args.story.display());

    let map = explore(&memory, &config)
        .with_context(|| format!("exploring {}", args.story.display()))?;

    if args.header {
        println!("{}", map.header);
    }
    print_map(&map, args.verbose);

    if !map.diagnostics.is_empty() {
        eprintln!();
        eprintln!("{} problems found:", map.diagnostics.len());
        for d in &map.diagnostics {
            eprintln!("  {:05x}: {}", d.address(), d);
        }
    }
    Ok(())
}
