use crate::cli::{Cli, Commands, EncodeArgs, flag_pair};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use stillcast::config::Config;
use stillcast::engine::{
    self, EncodeOptions, EncodeRequest, EncodeResult, Engine, ProgressReporter, Supervisor,
    hardware,
};

pub fn run(cli: Cli) {
    let outcome = match cli.command {
        Commands::Encode { args, json } => handle_encode(args, json),
        Commands::Plan { args, json } => handle_plan(args, json),
        Commands::Inventory {
            audio_dir,
            image,
            json,
        } => handle_inventory(audio_dir, image, json),
        Commands::ProbeHost { json } => handle_probe_host(json),
        Commands::CheckEngine => handle_check_engine(),
        Commands::InitConfig => {
            handle_init_config();
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable config: {:#}", e);
        Config::default()
    })
}

/// CLI flags over config values over built-in defaults
fn resolve_options(args: &EncodeArgs, config: &Config) -> Result<EncodeOptions> {
    let output_dir = match args
        .output_dir
        .clone()
        .or_else(|| config.defaults.last_output_dir.clone())
    {
        Some(dir) => dir,
        None => std::env::current_dir().context("Could not determine current directory")?,
    };
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| config.defaults.output_basename.clone());

    let options = EncodeOptions::new(
        args.quality.unwrap_or(config.defaults.quality),
        flag_pair(args.hardware, args.no_hardware).unwrap_or(config.defaults.use_hardware),
        flag_pair(args.fade, args.no_fade).unwrap_or(config.defaults.fade),
        output_dir,
        &name,
    )?;
    Ok(options)
}

fn locate_engine(config: &Config) -> Result<Engine> {
    Ok(Engine::locate(
        config.engine.ffmpeg_path.as_deref(),
        config.engine.ffprobe_path.as_deref(),
    )?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Single-line progress on stderr
struct ConsoleReporter {
    quiet: bool,
}

impl ProgressReporter for ConsoleReporter {
    fn on_progress(&self, percent: f64, message: &str) {
        if self.quiet {
            return;
        }
        eprint!("\rProgress: {:5.1}% | {:<60}", percent, message);
        std::io::stderr().flush().ok();
    }

    fn on_fallback(&self, message: &str) {
        if !self.quiet {
            eprintln!();
            eprintln!("{}", message);
        }
    }

    fn on_completed(&self, _result: &EncodeResult) {
        if !self.quiet {
            eprintln!();
        }
    }
}

fn handle_encode(args: EncodeArgs, json: bool) -> Result<()> {
    let mut config = load_config();
    let options = resolve_options(&args, &config)?;
    let request = EncodeRequest {
        audio_dir: args.audio_dir,
        image_path: args.image,
        options,
    };

    let supervisor = Supervisor::new(
        config.supervisor_config(),
        Arc::new(ConsoleReporter { quiet: json }),
    );
    let handle = supervisor.start(&request)?;
    crate::interrupt::install();
    while !handle.is_finished() {
        if crate::interrupt::take() {
            eprintln!("Cancelling...");
            handle.cancel();
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let result = handle.wait();

    if json {
        print_json(&result)?;
    } else {
        match &result.outcome {
            engine::EncodeOutcome::Succeeded { output_path } => {
                match std::fs::metadata(output_path) {
                    Ok(meta) => println!(
                        "Created: {} ({})",
                        output_path.display(),
                        format_size(meta.len())
                    ),
                    Err(_) => println!("Created: {}", output_path.display()),
                }
                if result.fallback_used {
                    println!("Note: hardware encoding failed, software encoding was used");
                }
                println!("Elapsed: {:.1}s", result.elapsed_s);
            }
            engine::EncodeOutcome::Failed { kind, message } => {
                eprintln!("Encoding failed ({}): {}", kind, message);
            }
            engine::EncodeOutcome::Cancelled => eprintln!("Encoding cancelled"),
        }
    }

    if !result.success() {
        process::exit(1);
    }

    config.defaults.last_output_dir = Some(request.options.output_dir().to_path_buf());
    if let Err(e) = config.save() {
        tracing::warn!("Could not remember output directory: {:#}", e);
    }
    Ok(())
}

fn handle_plan(args: EncodeArgs, json: bool) -> Result<()> {
    let config = load_config();
    let options = resolve_options(&args, &config)?;
    let engine = locate_engine(&config)?;

    let inventory = engine::build_inventory(&args.audio_dir, &args.image, &engine)?;
    let caps = hardware::probe(&engine);
    let plan = engine::plan(&inventory, &options, &caps);

    if json {
        print_json(&plan)?;
    } else {
        println!("# codec: {}", plan.codec.display_name());
        println!("# threads: {}", plan.thread_count);
        println!("# duration: {:.3}s", plan.total_duration_s);
        println!("{}", engine::format_ffmpeg_cmd(&engine.ffmpeg, &plan));
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn format_duration(total_s: f64) -> String {
    let whole = total_s.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", whole / 3600, (whole / 60) % 60, whole % 60)
}

fn handle_inventory(audio_dir: PathBuf, image: PathBuf, json: bool) -> Result<()> {
    let config = load_config();
    let engine = locate_engine(&config)?;
    let inventory = engine::build_inventory(&audio_dir, &image, &engine)?;

    if json {
        return print_json(&inventory);
    }

    println!(
        "Image: {} ({}x{})",
        inventory.image.path.display(),
        inventory.image.width,
        inventory.image.height
    );
    for track in &inventory.tracks {
        println!(
            "{:>3}. {} [{}]",
            track.sequence_index + 1,
            track.path.display(),
            format_duration(track.duration_s)
        );
    }
    println!(
        "Total: {} tracks, {}",
        inventory.tracks.len(),
        format_duration(inventory.total_duration_s())
    );
    Ok(())
}

fn handle_probe_host(json: bool) -> Result<()> {
    let config = load_config();
    let engine = locate_engine(&config)?;
    let caps = hardware::probe(&engine);

    if json {
        return print_json(&caps);
    }

    println!("CPU cores: {}", caps.core_count);
    println!("CPU load: {:.0}%", caps.load_fraction * 100.0);
    match &caps.hardware_encoder {
        Some(kind) => println!(
            "Hardware encoder: {} ({})",
            kind.display_name(),
            kind.ffmpeg_name()
        ),
        None => println!("Hardware encoder: none (software only)"),
    }
    Ok(())
}

fn handle_check_engine() -> Result<()> {
    let config = load_config();
    let engine = locate_engine(&config)?;

    println!("ffmpeg: {}", engine.ffmpeg.display());
    println!("  {}", engine.version()?);
    println!("ffprobe: {}", engine.ffprobe.display());
    println!("  {}", engine.ffprobe_version()?);
    Ok(())
}

fn handle_init_config() {
    match Config::config_path() {
        Ok(path) if path.exists() => match Config::load_from(&path) {
            Ok(cfg) => {
                println!("Config loaded successfully from {}", path.display());
                println!("{:#?}", cfg);
            }
            Err(e) => {
                eprintln!("Config invalid: {:#}", e);
                process::exit(1);
            }
        },
        Ok(path) => {
            println!("Config missing, creating default config...");
            if let Err(err) = Config::ensure_default() {
                eprintln!("Failed to save default config: {:#}", err);
                process::exit(1);
            }
            println!("Default config saved to {}", path.display());
        }
        Err(e) => {
            eprintln!("Config path unknown: {:#}", e);
            process::exit(1);
        }
    }
}
