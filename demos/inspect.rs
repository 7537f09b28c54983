//! Model inspection tool
//!
//! Check which nodes of an ONNX model can be imported, then import it and
//! print the resulting network.
//!
//! Run with: cargo run --release --example inspect -- model.onnx [verbosity]

use std::env;
use std::fs;
use std::path::Path;

use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

use onnx_importer::importer::verbosity_filter;
use onnx_importer::io::get_model_info;
use onnx_importer::prelude::*;

fn init_log(level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("[{h({l})} - {t}] {m}{n}")))
        .build();
    let appender = Appender::builder().build("stdout", Box::new(stdout));

    log4rs::init_config(
        Config::builder()
            .appender(appender)
            .build(Root::builder().appender("stdout").build(level))?,
    )?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <model.onnx> [verbosity 0-4]", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);
    let verbosity: i32 = args.get(2).map(|v| v.parse()).transpose()?.unwrap_or(2);
    init_log(verbosity_filter(verbosity))?;

    let info = get_model_info(path)?;
    println!("Inspecting: {}", path.display());
    println!("{}", "=".repeat(60));
    println!("  IR Version: {}", info.ir_version);
    println!("  Producer: {} {}", info.producer_name, info.producer_version);
    for (domain, version) in &info.opsets {
        let domain = if domain.is_empty() { "ai.onnx" } else { domain };
        println!("  Opset {}: {}", domain, version);
    }
    println!(
        "  Graph '{}': {} nodes, {} initializers, {} local functions",
        info.graph_name, info.node_count, info.initializer_count, info.function_count
    );

    // Support query
    let bytes = fs::read(path)?;
    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    let mut partitions = SubGraphCollection::new();
    let all_supported = importer.supports_model(&bytes, &mut partitions, Some(path));

    println!("\n## Support");
    for part in &partitions {
        let first = part.nodes.first().copied().unwrap_or(0);
        let last = part.nodes.last().copied().unwrap_or(0);
        let verdict = if part.supported { "supported" } else { "UNSUPPORTED" };
        println!("  nodes {:>4}..={:<4} {}", first, last, verdict);
    }
    for diagnostic in importer.errors() {
        println!("  {}", diagnostic);
    }
    importer.clear_errors();

    if !all_supported {
        println!("\nModel is not fully supported, importing anyway");
    }

    // Import
    let ok = importer.parse_from_file(path, verbosity);
    println!("\n## Import: {}", if ok { "success" } else { "failed" });
    for diagnostic in importer.errors() {
        println!("  {}", diagnostic);
    }
    let libraries = importer.used_plugin_libraries();
    if !libraries.is_empty() {
        println!("  Plugin libraries: {}", libraries.join(", "));
    }
    drop(importer);

    println!("\n## Network");
    println!("  Inputs: {}", network.inputs().len());
    println!("  Outputs: {}", network.outputs().len());
    println!("  Layers: {}", network.num_layers());
    for layer in network.layers().iter().take(50) {
        println!("    {:<40} {}", layer.name, layer.kind.type_name());
    }
    if network.num_layers() > 50 {
        println!("    ... {} more", network.num_layers() - 50);
    }

    Ok(())
}
