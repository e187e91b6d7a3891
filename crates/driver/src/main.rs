mod console;
mod hid;
mod output;
mod settings;
mod setup;

use crate::console::{ConsoleDisplay, show_calibration};
use crate::hid::DeviceEntry;
use crate::output::MidirSink;
use crate::settings::Settings;
use crate::setup::Prompter;
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use config::Config;
use hidapi::HidApi;
use hidmidi_library::calibration::CalibrationEngine;
use hidmidi_library::mapping::{MappingConfig, list_mappings, with_extension};
use hidmidi_library::monitor::MonitorLoop;
use hidmidi_library::status::mapping_summary;
use hidmidi_library::{ControlDescriptor, HidReportDecoder, ReportLayout, RuntimeState};
use std::io::{self, StdinLock, Stdout};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(
    name = "HID to MIDI mapper",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Args {
    #[clap(short, long, help = "Settings file (see example_config.toml)")]
    config: Option<String>,

    #[clap(short, long, help = "Load this mapping instead of showing the menu")]
    mapping: Option<PathBuf>,

    #[clap(short, long, help = "Skip the menu and create a new mapping")]
    new: bool,

    #[clap(short, long, help = "List HID devices, their controls and MIDI outputs, then exit")]
    list: bool,
}

type Console = Prompter<StdinLock<'static>, Stdout>;

/// Where the mapping for this session came from.
enum Origin {
    Loaded(PathBuf),
    New,
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut cfg = Config::builder();

    if let Some(config_fn) = &args.config {
        cfg = cfg.add_source(config::File::with_name(config_fn.as_str()));
    }
    cfg = cfg.add_source(config::Environment::with_prefix("HIDMIDI").try_parsing(true));

    let settings: Settings = cfg
        .build()
        .context("Can't create settings")?
        .try_deserialize()
        .context("Can't parse settings")?;
    settings.validate().map_err(|e| anyhow!(e))?;
    Ok(settings)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&settings.log_level);
    info!(?settings, "starting");

    match run(&args, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\nError: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, settings: &Settings) -> Result<()> {
    let api = HidApi::new().context("Failed to initialize HidApi")?;

    if args.list {
        return list_everything(&api, settings);
    }

    let runtime = Arc::new(RuntimeState::new(0));
    {
        let runtime = Arc::clone(&runtime);
        ctrlc::set_handler(move || {
            if runtime.quit_requested() {
                std::process::exit(130);
            }
            runtime.request_quit();
        })
        .context("Couldn't install the Ctrl+C handler")?;
    }

    let mut console = Prompter::new(io::stdin().lock(), io::stdout());
    println!("--- HID to MIDI Mapper ---\n");

    let (device, layout, mut mapping, origin) = match pick_mapping(args, settings, &mut console) {
        Some((mapping, origin)) => {
            println!("Finding configured HID device: {}", mapping.hid_device_name);
            let device = hid::open_device(&api, &mapping.hid_device_path)?;
            let layout = hid::read_layout(&device)?;
            (device, layout, mapping, origin)
        }
        None => {
            let Some(entry) = select_device(&api, settings, &mut console)? else {
                return Ok(());
            };
            let device = hid::open_device(&api, &entry.path)?;
            let layout = hid::read_layout(&device)?;
            let Some(control) = select_control(&layout, &mut console)? else {
                return Ok(());
            };
            let mut mapping = MappingConfig::new(entry.path, control);
            mapping.hid_device_name = entry.name;
            mapping.midi_send_interval_ms = settings.default_send_interval_ms;
            (device, layout, mapping, Origin::New)
        }
    };

    let decoder = HidReportDecoder::new(&layout, &mapping.control)
        .with_context(|| format!("Control {} is not available on this device", mapping.control))?;
    let sampler = hid::spawn_sampler(device, decoder, Arc::clone(&runtime))?;

    let session = configure_and_monitor(settings, &runtime, &mut mapping, &origin, &mut console);

    runtime.request_quit();
    if sampler.join().is_err() {
        warn!("HID sampling thread panicked");
    }
    session?;

    println!("\nMonitoring stopped.");
    Ok(())
}

fn configure_and_monitor(
    settings: &Settings,
    runtime: &RuntimeState,
    mapping: &mut MappingConfig,
    origin: &Origin,
    console: &mut Console,
) -> Result<()> {
    let ports = output::port_names(&settings.client_name)?;
    if !ports.contains(&mapping.midi_device_name) {
        if matches!(origin, Origin::Loaded(_)) {
            println!(
                "Configured MIDI port '{}' not found. Please select an alternative.",
                mapping.midi_device_name
            );
        } else {
            println!("\n--- Step 3: Select MIDI Output ---\n");
        }
        if ports.is_empty() {
            bail!("No MIDI output ports available");
        }
        let Some(idx) = console.choose("Available MIDI Output ports:", &ports) else {
            return Ok(());
        };
        mapping.midi_device_name = ports[idx].clone();
        if let Origin::Loaded(path) = origin {
            save(mapping, path);
        }
    }
    let sink = MidirSink::connect(&settings.client_name, &mapping.midi_device_name)?;
    println!("Opened MIDI Port: {}", mapping.midi_device_name);

    if matches!(origin, Origin::New) {
        println!("\n--- Step 4: Configure MIDI Mapping ---\n");
        if console.configure_mapping(mapping).is_none() {
            return Ok(());
        }

        if !mapping.control.is_button {
            println!("\n--- Step 5: Calibrate Axis ---\n");
            println!("Calibrating: {}", mapping.control.name);
            println!(
                "Axis Hardware Logical Range: {} to {}",
                mapping.control.logical_min, mapping.control.logical_max
            );
            let mut engine = CalibrationEngine::new(runtime);
            match engine.run(&mapping.control, |_| {}, show_calibration(&mapping.control.name)) {
                Ok(calibration) => mapping.calibration = calibration,
                Err(e) => {
                    println!("\n{e}.");
                    return Ok(());
                }
            }
            println!("\nCalibration complete.");
        }

        println!("\n--- Step 6: Save Configuration ---\n");
        let Some(name) = console.text(&format!(
            "Enter filename to save configuration (e.g., my_joystick_mapping{}):",
            hidmidi_library::mapping::MAPPING_EXTENSION
        )) else {
            return Ok(());
        };
        save(mapping, &Path::new(&settings.mapping_dir).join(with_extension(&name)));
    }

    if runtime.quit_requested() {
        return Ok(());
    }

    print_header(mapping);
    let mut monitor = MonitorLoop::new(runtime, mapping.clone(), settings.display_fps);
    monitor.run(sink, &mut ConsoleDisplay, || {});
    println!("\n\nExiting monitoring loop...");
    Ok(())
}

fn save(mapping: &MappingConfig, path: &Path) {
    match mapping.save(path) {
        Ok(()) => println!("Configuration saved successfully to {}", path.display()),
        Err(e) => warn!("{e}; continuing with the unsaved configuration"),
    }
}

/// Returns a loaded mapping, or `None` when a new one is to be created.
/// Unreadable files fall back to creating a new mapping.
fn pick_mapping(args: &Args, settings: &Settings, console: &mut Console) -> Option<(MappingConfig, Origin)> {
    let path = match (&args.mapping, args.new) {
        (Some(path), _) => path.clone(),
        (None, true) => return None,
        (None, false) => {
            let found = list_mappings(&settings.mapping_dir);
            if found.is_empty() {
                println!("No existing configurations found. Starting new setup...");
                return None;
            }
            let mut items: Vec<String> = found
                .iter()
                .map(|p| p.file_name().unwrap_or_default().to_string_lossy().into_owned())
                .collect();
            items.push("Create New Configuration".to_string());
            let idx = console.choose("Found existing configurations:", &items)?;
            found.get(idx)?.clone()
        }
    };

    println!("\nLoading configuration: {}...", path.display());
    match MappingConfig::load(&path) {
        Ok(mapping) => {
            println!("Configuration loaded successfully.");
            Some((mapping, Origin::Loaded(path)))
        }
        Err(e) => {
            warn!("{e}");
            println!("Failed to load configuration. Starting new configuration setup...");
            None
        }
    }
}

fn select_device(api: &HidApi, settings: &Settings, console: &mut Console) -> Result<Option<DeviceEntry>> {
    println!("--- Step 1: Select HID Controller ---\n");
    let mut devices = hid::list_devices(api, settings);
    if devices.is_empty() {
        bail!("No HID game controllers found");
    }
    let names: Vec<String> = devices.iter().map(ToString::to_string).collect();
    Ok(console
        .choose("Select Controller:", &names)
        .map(|idx| devices.swap_remove(idx)))
}

fn select_control(layout: &ReportLayout, console: &mut Console) -> Result<Option<ControlDescriptor>> {
    println!("\n--- Step 2: Select Control to Map ---\n");
    let mut controls = layout.controls();
    if controls.is_empty() {
        bail!("The selected device reports no usable inputs");
    }
    let names: Vec<String> = controls.iter().map(ToString::to_string).collect();
    Ok(console
        .choose("Available Controls:", &names)
        .map(|idx| controls.swap_remove(idx)))
}

fn print_header(mapping: &MappingConfig) {
    println!("\n--- Monitoring Active ---");
    println!("Device: {}", mapping.hid_device_name);
    println!("Control: {}", mapping.control.name);
    println!("MIDI Port: {}", mapping.midi_device_name);
    println!("Mapping: {}", mapping_summary(mapping));
    println!("MIDI Send Interval: {}ms\n", mapping.midi_send_interval_ms);
    println!("(Press Ctrl+C to exit)\n");
}

fn list_everything(api: &HidApi, settings: &Settings) -> Result<()> {
    let devices = hid::list_devices(api, settings);
    println!("HID game controllers:");
    if devices.is_empty() {
        println!("  (none)");
    }
    for dev in &devices {
        println!("  {dev}");
        println!("    path: {}", dev.path);
        let controls = hid::open_device(api, &dev.path).and_then(|d| hid::read_layout(&d));
        match controls {
            Ok(layout) => {
                for control in layout.controls() {
                    println!("    - {control} [{}]", control.locator);
                }
            }
            Err(e) => println!("    (controls unavailable: {e:#})"),
        }
    }

    println!("\nMIDI output ports:");
    let ports = output::port_names(&settings.client_name)?;
    if ports.is_empty() {
        println!("  (none)");
    }
    for (i, port) in ports.iter().enumerate() {
        println!("  [{i}]: {port}");
    }

    println!("\nSaved mappings in {}:", settings.mapping_dir);
    for path in list_mappings(&settings.mapping_dir) {
        println!("  {}", path.display());
    }
    Ok(())
}
