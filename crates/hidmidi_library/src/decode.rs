//! Turning raw input reports into a control value.

use crate::controls::ControlDescriptor;
use crate::descriptor::{FieldKind, ReportField, ReportLayout};
use crate::error::DescriptorError;
use crate::runtime::RuntimeState;

/// Decodes one report for one control.
///
/// `None` means the report carries nothing about the control (another report
/// ID, a short read, ...). It is not an error and the stored value is kept.
pub trait SampleDecoder {
    fn decode(&self, report: &[u8]) -> Option<i64>;
}

impl<F> SampleDecoder for F
where
    F: Fn(&[u8]) -> Option<i64>,
{
    fn decode(&self, report: &[u8]) -> Option<i64> {
        self(report)
    }
}

/// Decodes `report` and feeds the result into `state`. Returns true when the
/// stored value changed.
pub fn ingest_report<D>(decoder: &D, state: &RuntimeState, report: &[u8]) -> bool
where
    D: SampleDecoder + ?Sized,
{
    match decoder.decode(report) {
        Some(value) => state.record_sample(value),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Value {
        bit_offset: u32,
        bit_size: u32,
        signed: bool,
        as_button: bool,
    },
    ArrayMember {
        bit_offset: u32,
        bit_size: u32,
        count: u32,
        logical_min: i64,
        index: i64,
    },
}

/// Descriptor-driven decoder for a single control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidReportDecoder {
    uses_report_ids: bool,
    report_id: Option<u8>,
    target: Target,
}

impl HidReportDecoder {
    pub fn new(layout: &ReportLayout, control: &ControlDescriptor) -> Result<Self, DescriptorError> {
        let usage = control.locator;
        let located = layout.fields().iter().find_map(|field| locate(field, control).map(|t| (field, t)));

        let (field, target) = located.ok_or(DescriptorError::ControlNotFound {
            usage_page: usage.usage_page,
            usage: usage.usage,
        })?;

        Ok(Self {
            uses_report_ids: layout.uses_report_ids(),
            report_id: field.report_id,
            target,
        })
    }
}

fn locate(field: &ReportField, control: &ControlDescriptor) -> Option<Target> {
    match field.kind {
        FieldKind::Variable => {
            // Axes live in multi-bit fields; a 1-bit slot is only ever a button.
            if !control.is_button && field.bit_size == 1 {
                return None;
            }
            let slot = field.slot_of(control.locator)?;
            let bit_offset = slot
                .checked_mul(field.bit_size)
                .and_then(|bits| field.bit_offset.checked_add(bits))?;
            Some(Target::Value {
                bit_offset,
                bit_size: field.bit_size,
                signed: field.is_signed(),
                as_button: control.is_button,
            })
        }
        FieldKind::Array if control.is_button => {
            let index = field.usages.position(control.locator)?;
            Some(Target::ArrayMember {
                bit_offset: field.bit_offset,
                bit_size: field.bit_size,
                count: field.count,
                logical_min: field.logical_min,
                index: index as i64,
            })
        }
        FieldKind::Array => None,
    }
}

impl SampleDecoder for HidReportDecoder {
    fn decode(&self, report: &[u8]) -> Option<i64> {
        let data = if self.uses_report_ids {
            let (&id, rest) = report.split_first()?;
            if Some(id) != self.report_id {
                return None;
            }
            rest
        } else {
            report
        };

        match self.target {
            Target::Value {
                bit_offset,
                bit_size,
                signed,
                as_button,
            } => {
                let bits = extract_bits(data, bit_offset, bit_size)?;
                let value = if signed {
                    sign_extend(bits, bit_size)
                } else {
                    i64::from(bits)
                };
                Some(if as_button { i64::from(value != 0) } else { value })
            }
            Target::ArrayMember {
                bit_offset,
                bit_size,
                count,
                logical_min,
                index,
            } => {
                let mut pressed = false;
                for slot in 0..count {
                    let start = slot.checked_mul(bit_size).and_then(|bits| bit_offset.checked_add(bits))?;
                    let raw = extract_bits(data, start, bit_size)?;
                    if i64::from(raw) - logical_min == index {
                        pressed = true;
                    }
                }
                Some(i64::from(pressed))
            }
        }
    }
}

/// Little-endian bit field starting at `bit_offset`; `None` if the report is too short.
fn extract_bits(data: &[u8], bit_offset: u32, bit_size: u32) -> Option<u32> {
    let mut value = 0u32;
    for i in 0..bit_size.min(32) {
        let bit = bit_offset.checked_add(i)?;
        let byte = *data.get((bit / 8) as usize)?;
        if (byte >> (bit % 8)) & 1 == 1 {
            value |= 1 << i;
        }
    }
    Some(value)
}

fn sign_extend(value: u32, bits: u32) -> i64 {
    match bits {
        0 => 0,
        32.. => i64::from(value as i32),
        _ => {
            let shift = 32 - bits;
            i64::from(((value << shift) as i32) >> shift)
        }
    }
}
