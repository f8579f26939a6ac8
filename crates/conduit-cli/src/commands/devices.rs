//! List audio devices.

use clap::Args;

use super::Backend;

#[derive(Args)]
pub struct DevicesArgs {
    /// Backend to enumerate
    #[arg(long, value_enum, default_value_t = Backend::Cpal)]
    backend: Backend,
}

pub fn run(args: DevicesArgs) -> anyhow::Result<()> {
    let backend = args.backend.create(None);
    let devices = backend.list_devices()?;

    if devices.is_empty() {
        println!("No audio devices found.");
        return Ok(());
    }

    println!("Available Audio Devices ({})", backend.name());
    println!("=======================\n");

    for (idx, device) in devices.iter().enumerate() {
        let direction = match (device.is_input, device.is_output) {
            (true, true) => "input/output",
            (true, false) => "input",
            _ => "output",
        };
        let rate = device
            .default_sample_rate
            .map_or_else(|| "-".to_string(), |rate| format!("{rate} Hz"));
        println!("  [{idx}] {} ({direction}, {rate})", device.name);
    }

    println!();
    println!("Tip: select a device with config.device on a hardware node:");
    println!("  [[node]]");
    println!("  object.type = \"hardware\"");
    println!("  config.device = \"USB\"");
    Ok(())
}
