use crate::settings::Settings;
use anyhow::{Context, Result, anyhow};
use hidapi::{HidApi, HidDevice};
use hidmidi_library::{HidReportDecoder, ReportLayout, RuntimeState, ingest_report};
use std::collections::HashSet;
use std::ffi::CString;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

const MAX_REPORT_DESCRIPTOR_SIZE: usize = 4096;
const MAX_REPORT_SIZE: usize = 512;
/// Bounds how long the sampler can miss a quit request.
const READ_TIMEOUT_MS: i32 = 100;

/// A HID interface offered for mapping.
#[derive(Debug, Clone)]
pub(crate) struct DeviceEntry {
    pub path: String,
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl std::fmt::Display for DeviceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (VID: 0x{:04X}, PID: 0x{:04X})",
            self.name, self.vendor_id, self.product_id
        )
    }
}

/// Interfaces whose top-level usage is one of the configured ones, each path once.
pub(crate) fn list_devices(api: &HidApi, settings: &Settings) -> Vec<DeviceEntry> {
    let mut seen = HashSet::new();
    api.device_list()
        .filter(|dev| settings.accepts(dev.usage_page(), dev.usage()))
        .filter_map(|dev| {
            let path = dev.path().to_string_lossy().into_owned();
            if !seen.insert(path.clone()) {
                return None;
            }
            let name = match (dev.manufacturer_string(), dev.product_string()) {
                (Some(m), Some(p)) if !m.is_empty() => format!("{m} {p}"),
                (_, Some(p)) if !p.is_empty() => p.to_string(),
                _ => "Unknown HID Device".to_string(),
            };
            Some(DeviceEntry {
                path,
                name,
                vendor_id: dev.vendor_id(),
                product_id: dev.product_id(),
            })
        })
        .collect()
}

pub(crate) fn open_device(api: &HidApi, path: &str) -> Result<HidDevice> {
    let c_path = CString::new(path).with_context(|| format!("Invalid HID device path {path:?}"))?;
    api.open_path(&c_path)
        .with_context(|| format!("Could not open HID device {path}"))
}

pub(crate) fn read_layout(device: &HidDevice) -> Result<ReportLayout> {
    let mut buf = [0u8; MAX_REPORT_DESCRIPTOR_SIZE];
    let len = device
        .get_report_descriptor(&mut buf)
        .context("Could not read the HID report descriptor")?;
    debug!(len, "read report descriptor");
    ReportLayout::parse(&buf[..len]).context("Could not parse the HID report descriptor")
}

/// Moves `device` onto its own thread, which feeds every input report into
/// `runtime` until quit is requested. A read error is treated as a
/// disconnect and raises the quit flag itself.
pub(crate) fn spawn_sampler(
    device: HidDevice,
    decoder: HidReportDecoder,
    runtime: Arc<RuntimeState>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("hid-sampler".to_string())
        .spawn(move || sample(device, decoder, &runtime))
        .map_err(|e| anyhow!("Could not start the HID sampling thread: {e}"))
}

fn sample(device: HidDevice, decoder: HidReportDecoder, runtime: &RuntimeState) {
    let mut buf = [0u8; MAX_REPORT_SIZE];
    info!("HID sampling started");

    while !runtime.quit_requested() {
        match device.read_timeout(&mut buf, READ_TIMEOUT_MS) {
            Ok(0) => continue,
            Ok(n) => {
                ingest_report(&decoder, runtime, &buf[..n]);
            }
            Err(e) => {
                error!("HID read failed, stopping: {e}");
                runtime.request_quit();
            }
        }
    }

    debug!("HID sampling stopped");
}
