use anyhow::{Context, Result, anyhow};
use hidmidi_library::error::MidiSendError;
use hidmidi_library::midi::MidiSink;
use midir::{MidiOutput, MidiOutputConnection};

/// Names of the MIDI outputs currently visible to `client_name`.
pub(crate) fn port_names(client_name: &str) -> Result<Vec<String>> {
    let output = MidiOutput::new(client_name).context("Couldn't open MIDI output")?;
    Ok(output
        .ports()
        .iter()
        .map(|port| output.port_name(port).unwrap_or_else(|e| format!("<unnamed: {e}>")))
        .collect())
}

/// An open output port. Dropping it closes the connection.
pub(crate) struct MidirSink {
    conn: MidiOutputConnection,
}

impl MidirSink {
    pub(crate) fn connect(client_name: &str, port_name: &str) -> Result<Self> {
        let output = MidiOutput::new(client_name).context("Couldn't open MIDI output")?;
        let port = output
            .ports()
            .into_iter()
            .find(|p| output.port_name(p).is_ok_and(|name| name == port_name))
            .ok_or_else(|| anyhow!("MIDI output port {port_name:?} not found"))?;
        let conn = output
            .connect(&port, "hidmidi-out")
            .map_err(|e| anyhow!("Couldn't connect to MIDI output {port_name:?}: {e}"))?;
        Ok(Self { conn })
    }
}

impl MidiSink for MidirSink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), MidiSendError> {
        self.conn
            .send(bytes)
            .map_err(|e| MidiSendError(e.to_string()))
    }
}
