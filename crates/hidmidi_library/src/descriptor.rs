//! HID report descriptor parsing.
//!
//! Walks the short items of a USB HID report descriptor and records where
//! every input field lives inside its report: report ID, bit offset, bit size,
//! slot count, logical range and the usages assigned to the slots. The layout
//! is enough to enumerate the controls of a device and to pull one control's
//! value out of a raw input report.

use crate::controls::{ControlDescriptor, HidUsage, pages};
use crate::error::DescriptorError;
use num_derive::FromPrimitive;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

const LONG_ITEM_PREFIX: u8 = 0xFE;

#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
enum ItemType {
    Main = 0,
    Global = 1,
    Local = 2,
    Reserved = 3,
}

#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
enum MainTag {
    Input = 0x8,
    Output = 0x9,
    Collection = 0xA,
    Feature = 0xB,
    EndCollection = 0xC,
}

#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
enum GlobalTag {
    UsagePage = 0x0,
    LogicalMinimum = 0x1,
    LogicalMaximum = 0x2,
    PhysicalMinimum = 0x3,
    PhysicalMaximum = 0x4,
    UnitExponent = 0x5,
    Unit = 0x6,
    ReportSize = 0x7,
    ReportId = 0x8,
    ReportCount = 0x9,
    Push = 0xA,
    Pop = 0xB,
}

#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
enum LocalTag {
    Usage = 0x0,
    UsageMinimum = 0x1,
    UsageMaximum = 0x2,
}

const INPUT_CONSTANT: u32 = 1 << 0;
const INPUT_VARIABLE: u32 = 1 << 1;

/// One decoded short item.
struct Item {
    kind: ItemType,
    tag: u8,
    size: usize,
    data: u32,
}

impl Item {
    fn signed(&self) -> i64 {
        match self.size {
            1 => self.data as u8 as i8 as i64,
            2 => self.data as u16 as i16 as i64,
            4 => self.data as i32 as i64,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct GlobalState {
    usage_page: u16,
    logical_min: i64,
    logical_max: i64,
    logical_max_unsigned: i64,
    report_size: u32,
    report_id: Option<u8>,
    report_count: u32,
}

impl GlobalState {
    /// Devices routinely encode e.g. 255 as the one-byte item `0xFF`, which
    /// reads as -1 when sign-extended.
    fn logical_range(&self) -> (i64, i64) {
        if self.logical_min >= 0 && self.logical_max < self.logical_min {
            (self.logical_min, self.logical_max_unsigned)
        } else {
            (self.logical_min, self.logical_max)
        }
    }
}

/// Usage id with an optional explicit page from an extended (4-byte) item.
#[derive(Debug, Clone, Copy)]
struct PendingUsage {
    page: Option<u16>,
    id: u16,
}

impl PendingUsage {
    fn from_item(item: &Item) -> Self {
        if item.size == 4 {
            Self {
                page: Some((item.data >> 16) as u16),
                id: (item.data & 0xFFFF) as u16,
            }
        } else {
            Self {
                page: None,
                id: item.data as u16,
            }
        }
    }

    fn resolve(self, usage_page: u16) -> HidUsage {
        HidUsage::new(self.page.unwrap_or(usage_page), self.id)
    }
}

#[derive(Debug, Default)]
struct LocalState {
    usages: Vec<PendingUsage>,
    usage_min: Option<PendingUsage>,
    usage_max: Option<PendingUsage>,
}

impl LocalState {
    fn usage_set(&self, usage_page: u16) -> UsageSet {
        if !self.usages.is_empty() {
            return UsageSet::List(self.usages.iter().map(|u| u.resolve(usage_page)).collect());
        }
        match (self.usage_min, self.usage_max) {
            (Some(min), Some(max)) => {
                let min = min.resolve(usage_page);
                UsageSet::Range {
                    usage_page: min.usage_page,
                    min: min.usage,
                    max: max.id.max(min.usage),
                }
            }
            (Some(only), None) | (None, Some(only)) => UsageSet::List(vec![only.resolve(usage_page)]),
            (None, None) => UsageSet::List(Vec::new()),
        }
    }
}

/// Usages attached to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageSet {
    List(Vec<HidUsage>),
    Range { usage_page: u16, min: u16, max: u16 },
}

impl UsageSet {
    pub fn len(&self) -> usize {
        match self {
            UsageSet::List(list) => list.len(),
            UsageSet::Range { min, max, .. } => usize::from(max - min) + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<HidUsage> {
        match self {
            UsageSet::List(list) => list.get(index).copied(),
            UsageSet::Range {
                usage_page,
                min,
                max,
            } => {
                let id = usize::from(*min) + index;
                (id <= usize::from(*max)).then(|| HidUsage::new(*usage_page, id as u16))
            }
        }
    }

    pub fn position(&self, usage: HidUsage) -> Option<usize> {
        match self {
            UsageSet::List(list) => list.iter().position(|u| *u == usage),
            UsageSet::Range {
                usage_page,
                min,
                max,
            } => (usage.usage_page == *usage_page && (*min..=*max).contains(&usage.usage))
                .then(|| usize::from(usage.usage - min)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = HidUsage> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One value per slot, slot `i` carrying usage `i` (the last usage repeats).
    Variable,
    /// Slots hold indices into the usage set of whatever is currently active.
    Array,
}

/// One non-constant input main item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportField {
    pub report_id: Option<u8>,
    /// Offset from the first data byte, i.e. after the report ID if any.
    pub bit_offset: u32,
    pub bit_size: u32,
    pub count: u32,
    pub logical_min: i64,
    pub logical_max: i64,
    pub kind: FieldKind,
    pub usages: UsageSet,
}

impl ReportField {
    /// Usage carried by variable slot `slot`.
    pub fn slot_usage(&self, slot: u32) -> Option<HidUsage> {
        if slot >= self.count || self.usages.is_empty() {
            return None;
        }
        let index = (slot as usize).min(self.usages.len() - 1);
        self.usages.get(index)
    }

    /// Variable slot that carries `usage`.
    pub fn slot_of(&self, usage: HidUsage) -> Option<u32> {
        (0..self.distinct_slots()).find(|slot| self.slot_usage(*slot) == Some(usage))
    }

    /// Slots past the last usage repeat it, so only these can carry a new one.
    pub fn distinct_slots(&self) -> u32 {
        let usages = u32::try_from(self.usages.len()).unwrap_or(u32::MAX);
        self.count.min(usages)
    }

    pub fn is_signed(&self) -> bool {
        self.logical_min < 0
    }
}

/// Input fields of a device, in descriptor order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportLayout {
    fields: Vec<ReportField>,
    uses_report_ids: bool,
}

impl ReportLayout {
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.is_empty() {
            return Err(DescriptorError::Empty);
        }

        let mut layout = ReportLayout::default();
        let mut global = GlobalState::default();
        let mut stack: Vec<GlobalState> = Vec::new();
        let mut local = LocalState::default();
        let mut offsets: BTreeMap<Option<u8>, u32> = BTreeMap::new();
        let mut depth = 0usize;

        let mut pos = 0;
        while pos < bytes.len() {
            let offset = pos;
            let prefix = bytes[pos];

            if prefix == LONG_ITEM_PREFIX {
                let size = *bytes
                    .get(pos + 1)
                    .ok_or(DescriptorError::Truncated { offset })? as usize;
                pos += 3 + size;
                if pos > bytes.len() {
                    return Err(DescriptorError::Truncated { offset });
                }
                continue;
            }

            let size = match prefix & 0x03 {
                3 => 4,
                n => n as usize,
            };
            let payload = bytes
                .get(pos + 1..pos + 1 + size)
                .ok_or(DescriptorError::Truncated { offset })?;
            let data = payload
                .iter()
                .rev()
                .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
            let item = Item {
                kind: num::FromPrimitive::from_u8((prefix >> 2) & 0x03).unwrap_or(ItemType::Reserved),
                tag: prefix >> 4,
                size,
                data,
            };
            pos += 1 + size;

            match item.kind {
                ItemType::Main => {
                    let tag: Option<MainTag> = num::FromPrimitive::from_u8(item.tag);
                    match tag {
                        Some(MainTag::Input) => {
                            let cursor = offsets.entry(global.report_id).or_insert(0);
                            let bit_offset = *cursor;
                            let bits = global.report_size.checked_mul(global.report_count);
                            *cursor = bits
                                .and_then(|bits| bit_offset.checked_add(bits))
                                .ok_or(DescriptorError::ReportTooLong { offset })?;
                            let bits = *cursor - bit_offset;

                            if item.data & INPUT_CONSTANT == 0 && bits > 0 {
                                if global.report_size > 32 {
                                    return Err(DescriptorError::FieldTooWide {
                                        offset,
                                        size: global.report_size,
                                    });
                                }
                                let (logical_min, logical_max) = global.logical_range();
                                layout.fields.push(ReportField {
                                    report_id: global.report_id,
                                    bit_offset,
                                    bit_size: global.report_size,
                                    count: global.report_count,
                                    logical_min,
                                    logical_max,
                                    kind: if item.data & INPUT_VARIABLE != 0 {
                                        FieldKind::Variable
                                    } else {
                                        FieldKind::Array
                                    },
                                    usages: local.usage_set(global.usage_page),
                                });
                            }
                        }
                        Some(MainTag::Collection) => depth += 1,
                        Some(MainTag::EndCollection) => depth = depth.saturating_sub(1),
                        Some(MainTag::Output) | Some(MainTag::Feature) | None => {}
                    }
                    local = LocalState::default();
                }
                ItemType::Global => {
                    let tag: Option<GlobalTag> = num::FromPrimitive::from_u8(item.tag);
                    match tag {
                        Some(GlobalTag::UsagePage) => global.usage_page = item.data as u16,
                        Some(GlobalTag::LogicalMinimum) => global.logical_min = item.signed(),
                        Some(GlobalTag::LogicalMaximum) => {
                            global.logical_max = item.signed();
                            global.logical_max_unsigned = i64::from(item.data);
                        }
                        Some(GlobalTag::ReportSize) => global.report_size = item.data,
                        Some(GlobalTag::ReportCount) => global.report_count = item.data,
                        Some(GlobalTag::ReportId) => {
                            global.report_id = Some(item.data as u8);
                            layout.uses_report_ids = true;
                        }
                        Some(GlobalTag::Push) => stack.push(global.clone()),
                        Some(GlobalTag::Pop) => {
                            global = stack.pop().ok_or(DescriptorError::UnbalancedPop { offset })?;
                        }
                        Some(GlobalTag::PhysicalMinimum)
                        | Some(GlobalTag::PhysicalMaximum)
                        | Some(GlobalTag::UnitExponent)
                        | Some(GlobalTag::Unit)
                        | None => {}
                    }
                }
                ItemType::Local => {
                    let tag: Option<LocalTag> = num::FromPrimitive::from_u8(item.tag);
                    match tag {
                        Some(LocalTag::Usage) => local.usages.push(PendingUsage::from_item(&item)),
                        Some(LocalTag::UsageMinimum) => local.usage_min = Some(PendingUsage::from_item(&item)),
                        Some(LocalTag::UsageMaximum) => local.usage_max = Some(PendingUsage::from_item(&item)),
                        None => {}
                    }
                }
                ItemType::Reserved => {}
            }
        }

        if depth != 0 {
            debug!(depth, "report descriptor ends inside an open collection");
        }
        Ok(layout)
    }

    pub fn fields(&self) -> &[ReportField] {
        &self.fields
    }

    /// True when every report starts with a report ID byte.
    pub fn uses_report_ids(&self) -> bool {
        self.uses_report_ids
    }

    /// Selectable controls, one entry per usage, in descriptor order.
    pub fn controls(&self) -> Vec<ControlDescriptor> {
        let mut seen = HashSet::new();
        let mut controls = Vec::new();

        for field in &self.fields {
            match field.kind {
                FieldKind::Variable => {
                    for slot in 0..field.distinct_slots() {
                        let Some(usage) = field.slot_usage(slot) else { continue };
                        let is_button = field.bit_size == 1
                            || (usage.usage_page == pages::BUTTON && field.logical_max <= 1);
                        if !seen.insert((usage, is_button)) {
                            continue;
                        }
                        controls.push(if is_button {
                            ControlDescriptor::button(usage)
                        } else {
                            ControlDescriptor::axis(usage, field.logical_min, field.logical_max)
                        });
                    }
                }
                FieldKind::Array => {
                    for usage in field.usages.iter().filter(|u| u.usage != 0) {
                        if seen.insert((usage, true)) {
                            controls.push(ControlDescriptor::button(usage));
                        }
                    }
                }
            }
        }

        controls
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Gamepad with report ID 1: 8 buttons, 16-bit X/Y (0..1023), signed 8-bit Z, one pad byte.
    pub(crate) const GAMEPAD: &[u8] = &[
        0x05, 0x01, // Usage Page (Generic Desktop)
        0x09, 0x05, // Usage (Gamepad)
        0xA1, 0x01, // Collection (Application)
        0x85, 0x01, //   Report ID (1)
        0x05, 0x09, //   Usage Page (Button)
        0x19, 0x01, //   Usage Minimum (1)
        0x29, 0x08, //   Usage Maximum (8)
        0x15, 0x00, //   Logical Minimum (0)
        0x25, 0x01, //   Logical Maximum (1)
        0x75, 0x01, //   Report Size (1)
        0x95, 0x08, //   Report Count (8)
        0x81, 0x02, //   Input (Data,Var,Abs)
        0x05, 0x01, //   Usage Page (Generic Desktop)
        0x09, 0x30, //   Usage (X)
        0x09, 0x31, //   Usage (Y)
        0x16, 0x00, 0x00, // Logical Minimum (0)
        0x26, 0xFF, 0x03, // Logical Maximum (1023)
        0x75, 0x10, //   Report Size (16)
        0x95, 0x02, //   Report Count (2)
        0x81, 0x02, //   Input (Data,Var,Abs)
        0x09, 0x32, //   Usage (Z)
        0x15, 0x81, //   Logical Minimum (-127)
        0x25, 0x7F, //   Logical Maximum (127)
        0x75, 0x08, //   Report Size (8)
        0x95, 0x01, //   Report Count (1)
        0x81, 0x02, //   Input (Data,Var,Abs)
        0x75, 0x08, //   Report Size (8)
        0x95, 0x01, //   Report Count (1)
        0x81, 0x03, //   Input (Const)
        0xC0, // End Collection
    ];

    /// A single button usage repeated across 0x0FFFFFFF one-bit slots.
    pub(crate) const HUGE_BUTTON_COUNT: &[u8] = &[
        0x05, 0x09, 0x09, 0x01, // Button 1
        0x75, 0x01, // Report Size (1)
        0x97, 0xFF, 0xFF, 0xFF, 0x0F, // Report Count (0x0FFFFFFF)
        0x81, 0x02, // Input (Data,Var,Abs)
    ];

    /// No report IDs: two array slots holding pressed button numbers 1..16.
    pub(crate) const BUTTON_ARRAY: &[u8] = &[
        0x05, 0x01, 0x09, 0x04, 0xA1, 0x01, // Joystick application
        0x05, 0x09, 0x19, 0x01, 0x29, 0x10, // Buttons 1..16
        0x15, 0x01, 0x25, 0x10, // Logical 1..16
        0x75, 0x08, 0x95, 0x02, // 2 x 8 bits
        0x81, 0x00, // Input (Data,Array,Abs)
        0x05, 0x02, 0x09, 0xBB, // Simulation / Throttle
        0x15, 0x00, 0x25, 0xFF, // Logical 0..255 (one-byte max)
        0x75, 0x08, 0x95, 0x01, 0x81, 0x02, 0xC0,
    ];
}
