pub mod calibration;
pub mod controls;
pub mod decode;
pub mod descriptor;
pub mod error;
pub mod mapping;
pub mod midi;
pub mod monitor;
pub mod runtime;
pub mod status;

pub use calibration::{CalibrationEngine, CalibrationEvent, CalibrationPhase, CalibrationTiming};
pub use controls::{ControlDescriptor, HidUsage, usage_name};
pub use decode::{HidReportDecoder, SampleDecoder, ingest_report};
pub use descriptor::ReportLayout;
pub use error::{Error, Result};
pub use mapping::{CalibrationState, MappingConfig, MessageKind};
pub use midi::{ChannelMessage, MidiMapper, MidiSink};
pub use monitor::{DisplaySink, MonitorLoop, StatusSnapshot};
pub use runtime::RuntimeState;
