//! Turn a drawn canvas into the stored sketch upload for one reference icon.

use std::path::PathBuf;

use iconsketch::IconRecord;
use iconsketch::collect::{canvas_has_ink, encode_upload_png, sketch_upload_path};
use iconsketch::logging;
use tracing::info;

fn main() {
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

struct Options {
    canvas: PathBuf,
    user: String,
    record: IconRecord,
    out_dir: PathBuf,
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    let canvas = image::open(&options.canvas)
        .map_err(|err| format!("Failed to open canvas {}: {err}", options.canvas.display()))?;
    if !canvas_has_ink(&canvas) {
        return Err("Canvas is blank; nothing to upload".into());
    }
    let bytes = encode_upload_png(&canvas).map_err(|err| err.to_string())?;
    let key = sketch_upload_path(&options.user, &options.record);
    let target = options.out_dir.join(&key);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create {}: {err}", parent.display()))?;
    }
    std::fs::write(&target, bytes).map_err(|err| format!("Failed to write {}: {err}", target.display()))?;
    info!("Prepared sketch upload {key}");
    println!("{}", target.display());
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Option<Options>, String> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(None);
    }
    let mut canvas = None;
    let mut user = None;
    let mut category = None;
    let mut filename = None;
    let mut out_dir = PathBuf::from(".");
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| {
            it.next()
                .ok_or_else(|| format!("Missing value for {flag}"))
        };
        match arg.as_str() {
            "--canvas" => canvas = Some(PathBuf::from(value("--canvas")?)),
            "--user" => user = Some(value("--user")?),
            "--category" => category = Some(value("--category")?),
            "--filename" => filename = Some(value("--filename")?),
            "--out" => out_dir = PathBuf::from(value("--out")?),
            _ => return Err(format!("Unknown argument: {arg}")),
        }
    }
    let missing = |flag: &str| format!("Missing required argument {flag}");
    Ok(Some(Options {
        canvas: canvas.ok_or_else(|| missing("--canvas"))?,
        user: user.ok_or_else(|| missing("--user"))?,
        record: IconRecord::new(
            category.ok_or_else(|| missing("--category"))?,
            filename.ok_or_else(|| missing("--filename"))?,
        ),
        out_dir,
    }))
}

fn print_help() {
    println!(
        "Usage: iconsketch-prepare-upload --canvas <path> --user <id> --category <name> --filename <icon> [--out <dir>]"
    );
    println!();
    println!("Writes <out>/sketch/<user>/<category>/<icon as .png>, a 256x256 RGB PNG.");
    println!("Blank canvases are rejected.");
}
