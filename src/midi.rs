use anyhow::{anyhow, Result};
use midir::{MidiOutput, MidiOutputPort};

use crate::audio::MidiSink;

/// Names of the available MIDI output ports.
pub fn output_port_names() -> Vec<String> {
    let Ok(midi_out) = MidiOutput::new("retroloop") else {
        return Vec::new();
    };
    midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect()
}

/// Open a MIDI output connection and wrap it as the engine's byte sink.
/// Picks the named port, or the first available one when `port_name` is
/// `None`.
pub fn open_midi_sink(port_name: Option<&str>) -> Result<MidiSink> {
    let midi_out = MidiOutput::new("retroloop")?;
    let ports = midi_out.ports();

    let port: &MidiOutputPort = match port_name {
        Some(name) => ports
            .iter()
            .find(|p| midi_out.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("MIDI output port '{}' not found", name))?,
        None => ports
            .first()
            .ok_or_else(|| anyhow!("no MIDI output ports available"))?,
    };

    let name = midi_out
        .port_name(port)
        .unwrap_or_else(|_| "unknown".to_string());
    let mut conn = midi_out
        .connect(port, "retroloop-clock")
        .map_err(|e| anyhow!("failed to connect MIDI output: {}", e))?;
    log::info!("MIDI clock output on '{}'", name);

    Ok(Box::new(move |byte: u8| {
        if let Err(e) = conn.send(&[byte]) {
            log::warn!("MIDI output: failed to send message: {}", e);
        }
    }))
}
