//! Command line entry point: search, index building and weight setup.

use std::path::PathBuf;

use iconsketch::config::{self, AppSettings};
use iconsketch::index::{IndexSource, load_index};
use iconsketch::model::{
    SharedSketchModel, SketchNetConfig, backend::CpuBackend, bundle_exists,
    init_sketch_model, resolve_backend, save_weights,
};
use iconsketch::preprocess::load_sketch;
use iconsketch::retrieval::{build_or_reload_index, start_serving};
use iconsketch::{app_dirs, logging};

fn main() {
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

enum Command {
    Search {
        image: PathBuf,
        k: Option<usize>,
        json: bool,
    },
    BuildIndex {
        icons: Option<PathBuf>,
        out: Option<PathBuf>,
    },
    InitWeights {
        class_num: Option<usize>,
        out: Option<PathBuf>,
    },
    Info,
}

fn run() -> Result<(), String> {
    let Some(command) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    let settings = config::load_or_default().map_err(|err| err.to_string())?;
    match command {
        Command::Search { image, k, json } => search(&settings, image, k, json),
        Command::BuildIndex { icons, out } => build(settings, icons, out),
        Command::InitWeights { class_num, out } => init_weights(&settings, class_num, out),
        Command::Info => info(&settings),
    }
}

fn search(settings: &AppSettings, image: PathBuf, k: Option<usize>, json: bool) -> Result<(), String> {
    let k = k.unwrap_or(settings.search.top_k);
    let sketch = load_sketch(&image).map_err(|err| err.to_string())?;
    let retriever = start_serving(settings).map_err(|err| err.to_string())?;
    if json {
        let scored = retriever
            .embed_and_rank_scored(&sketch, k)
            .map_err(|err| err.to_string())?;
        let text = serde_json::to_string_pretty(&scored).map_err(|err| err.to_string())?;
        println!("{text}");
    } else {
        for record in retriever
            .embed_and_rank(&sketch, k)
            .map_err(|err| err.to_string())?
        {
            println!("{record}");
        }
    }
    Ok(())
}

fn build(mut settings: AppSettings, icons: Option<PathBuf>, out: Option<PathBuf>) -> Result<(), String> {
    if out.is_some() {
        settings.index.dir = out;
    }
    let root = icons
        .or_else(|| settings.index.icon_root.clone())
        .ok_or_else(|| "No icon tree given: pass --icons or set index.icon_root".to_string())?;
    init_sketch_model(&settings.model).map_err(|err| err.to_string())?;
    let embedder = SharedSketchModel::new(settings.model.clone());
    let index = build_or_reload_index(&IndexSource::IconTree { root }, &embedder, &settings.index)
        .map_err(|err| err.to_string())?;
    println!("Indexed {} icons", index.len());
    Ok(())
}

fn init_weights(settings: &AppSettings, class_num: Option<usize>, out: Option<PathBuf>) -> Result<(), String> {
    let class_num = class_num.unwrap_or(settings.model.class_num);
    let path = match out {
        Some(path) => path,
        None => settings
            .model
            .resolved_weights_path()
            .map_err(|err| err.to_string())?,
    };
    let config = SketchNetConfig::new(class_num);
    let model = config.init::<CpuBackend>(&Default::default());
    save_weights(&model, &config, &path).map_err(|err| err.to_string())?;
    println!("Wrote untrained weights for {class_num} classes to {}", path.display());
    Ok(())
}

fn info(settings: &AppSettings) -> Result<(), String> {
    let root = app_dirs::app_root_dir().map_err(|err| err.to_string())?;
    let config_path = config::config_path().map_err(|err| err.to_string())?;
    let weights = settings
        .model
        .resolved_weights_path()
        .map_err(|err| err.to_string())?;
    let index_dir = settings.index.resolved_dir().map_err(|err| err.to_string())?;
    println!("app root:    {}", root.display());
    println!("settings:    {}", config_path.display());
    println!(
        "weights:     {} ({})",
        weights.display(),
        if bundle_exists(&weights) { "present" } else { "missing" }
    );
    println!("classes:     {}", settings.model.class_num);
    println!("backend:     {}", resolve_backend(settings.model.backend).as_str());
    match load_index(&index_dir) {
        Ok(index) => println!("index:       {} ({} icons)", index_dir.display(), index.len()),
        Err(err) => println!("index:       {} ({err})", index_dir.display()),
    }
    println!("top k:       {}", settings.search.top_k);
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Option<Command>, String> {
    if args.is_empty() || args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(None);
    }
    let mut it = args.into_iter();
    let name = it.next().unwrap_or_default();
    let mut positional = Vec::new();
    let mut k = None;
    let mut json = false;
    let mut icons = None;
    let mut out = None;
    let mut class_num = None;
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--k" => {
                let value = it.next().ok_or_else(|| "Missing value for --k".to_string())?;
                k = Some(parse_count("--k", &value)?);
            }
            "--json" => json = true,
            "--icons" => {
                let value = it.next().ok_or_else(|| "Missing value for --icons".to_string())?;
                icons = Some(PathBuf::from(value));
            }
            "--out" => {
                let value = it.next().ok_or_else(|| "Missing value for --out".to_string())?;
                out = Some(PathBuf::from(value));
            }
            "--class-num" => {
                let value = it
                    .next()
                    .ok_or_else(|| "Missing value for --class-num".to_string())?;
                let value = parse_count("--class-num", &value)?;
                if value == 0 {
                    return Err("--class-num must be at least 1".into());
                }
                class_num = Some(value);
            }
            _ if arg.starts_with("--") => return Err(format!("Unknown argument: {arg}")),
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    let command = match name.as_str() {
        "search" => {
            let mut positional = positional.into_iter();
            let image = positional
                .next()
                .ok_or_else(|| "search needs an image path".to_string())?;
            if positional.next().is_some() {
                return Err("search takes exactly one image path".into());
            }
            Command::Search { image, k, json }
        }
        "build-index" => Command::BuildIndex { icons, out },
        "init-weights" => Command::InitWeights {
            class_num,
            out,
        },
        "info" => Command::Info,
        other => return Err(format!("Unknown command: {other}")),
    };
    Ok(Some(command))
}

fn parse_count(flag: &str, value: &str) -> Result<usize, String> {
    value
        .parse::<usize>()
        .map_err(|_| format!("Invalid value for {flag}: {value}"))
}

fn print_help() {
    println!("Usage: iconsketch <command> [options]");
    println!();
    println!("Commands:");
    println!("  search <image> [--k N] [--json]     Rank reference icons for a sketch");
    println!("  build-index [--icons DIR] [--out DIR]");
    println!("                                      Embed an icon tree and save the index");
    println!("  init-weights [--class-num N] [--out PATH]");
    println!("                                      Write freshly initialized weights");
    println!("  info                                Show resolved settings");
}
