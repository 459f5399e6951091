use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::mpsc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use yoga_thumbnails::config::{default_config_path, Config};
use yoga_thumbnails::{Placeholder, Thumbnailer};

struct Args {
    config: Option<PathBuf>,
    inputs: Vec<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut config = None;
    let mut inputs = Vec::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            _ => inputs.push(PathBuf::from(arg)),
        }
    }
    if inputs.is_empty() {
        return Err("no input images".into());
    }
    Ok(Args { config, inputs })
}

fn load_config(explicit: Option<&Path>) -> Result<Config, String> {
    match explicit {
        Some(path) => Config::load(path).map_err(|e| e.to_string()),
        None => {
            let path = default_config_path(Path::new("."));
            if path.is_file() {
                Config::load(&path).map_err(|e| e.to_string())
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Usage: yoga-thumbnails [--config <file.toml>] <image>...");
            process::exit(1);
        }
    };
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let t0 = Instant::now();
    let placeholder = match Placeholder::from_config(&config.thumbnails) {
        Ok(placeholder) => placeholder,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    let thumbnailer = match Thumbnailer::new(&config.thumbnails, placeholder.clone()) {
        Ok(thumbnailer) => thumbnailer,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let (tx, rx) = mpsc::channel();
    for (row, input) in args.inputs.iter().enumerate() {
        let tx = tx.clone();
        thumbnailer.generate(row, input, move |row, bitmap| {
            let _ = tx.send((row, bitmap));
        });
    }
    drop(tx);

    for (row, bitmap) in rx.iter().take(args.inputs.len()) {
        let status = if placeholder.is(&bitmap) { " (broken)" } else { "" };
        println!(
            "{}: {}x{}{}",
            args.inputs[row].display(),
            bitmap.width(),
            bitmap.height(),
            status
        );
    }

    if config.timings {
        eprintln!("Timings: thumbnails={:?}", t0.elapsed());
    }
}
