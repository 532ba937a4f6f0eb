//! Shared test doubles: an in-memory register reader and register frames
//! captured from a real device.

#![allow(dead_code)]

use std::collections::HashMap;

use async_trait::async_trait;

use pvbridge::error::{BridgeError, Result};
use pvbridge::reader::RegisterReader;
use pvbridge::registry::Batch;

#[derive(Default)]
pub struct MockReader {
    open: bool,
    frames: HashMap<&'static str, Vec<u16>>,
}

impl MockReader {
    pub fn with_frame(batch: &'static Batch, registers: Vec<u16>) -> Self {
        let mut reader = Self::default();
        reader.set_frame(batch, registers);
        reader
    }

    pub fn set_frame(&mut self, batch: &'static Batch, registers: Vec<u16>) {
        assert_eq!(batch.count, registers.len(), "bad frame for '{}'", batch.name);
        self.frames.insert(batch.name, registers);
    }
}

#[async_trait]
impl RegisterReader for MockReader {
    async fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn read(&mut self, batch: &Batch) -> Result<Vec<u16>> {
        self.frames
            .get(batch.name)
            .cloned()
            .ok_or_else(|| BridgeError::transport(format!("no frame for '{}'", batch.name)))
    }

    fn log_last_registers(&self) {}
}

/// Inverter in standby at night.
pub fn inverter_no_sun_frame() -> Vec<u16> {
    vec![
        60, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 32704, 0,
        32704, 0, 32704, 0, 19157, 42320, 32704, 0, 32704, 0, 0, 0, 32704, 0, 32704, 0, 32704, 0,
        32704, 0, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]
}

/// Feeding at 282 W AC / 316.7 W DC.
pub fn inverter_sun_frame() -> Vec<u16> {
    vec![
        60, 16280, 20972, 16076, 52429, 16076, 52429, 16071, 44564, 17354, 45875, 17355, 39322,
        17355, 58982, 17258, 13107, 17258, 39322, 17259, 58982, 17293, 0, 16967, 55050, 17293, 58,
        16256, 0, 49863, 65454, 19158, 29366, 32704, 0, 32704, 0, 17310, 22938, 32704, 0, 32704, 0,
        32704, 0, 32704, 0, 4, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]
}

/// Feeding at 3449 W AC / 3582 W DC.
pub fn inverter_afternoon_frame() -> Vec<u16> {
    vec![
        60, 16744, 52429, 16539, 34079, 16539, 34079, 16538, 36700, 17355, 52429, 17357, 39322,
        17357, 52429, 17258, 45875, 17261, 26214, 17262, 13107, 17751, 36864, 16967, 62915, 17751,
        37126, 49576, 0, 17095, 65293, 19158, 64272, 32704, 0, 32704, 0, 17759, 57344, 32704, 0,
        32704, 0, 32704, 0, 32704, 0, 4, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]
}

pub fn storage_frame(raw_fill: u16, state: u16) -> Vec<u16> {
    vec![
        124, 24, 3328, 100, 100, 0, 65535, 0, raw_fill, 65535, 65535, state, 10000, 10000, 65535,
        65535, 65535, 1, 0, 0, 32768, 65534, 65534, 65534, 65534, 65534,
    ]
}

/// Module string feeding, battery discharging a small magnitude.
pub fn mppt_frame() -> Vec<u16> {
    vec![
        160, 48, 65534, 65534, 65534, 32768, 0, 0, 2, 65535, 1, 21364, 29289, 28263, 8241, 0, 0, 0,
        0, 55, 56620, 31141, 0, 0, 9155, 20421, 32768, 4, 65535, 65535, 2, 21364, 29289, 28263,
        8242, 0, 0, 0, 0, 2, 18320, 366, 0, 0, 9155, 20421, 32768, 4,
    ]
}

/// The device reports 0xFFFF for the module power when the trackers are
/// not feeding.
pub fn mppt_idle_frame() -> Vec<u16> {
    vec![
        160, 48, 65534, 65534, 65534, 32768, 0, 0, 2, 65535, 1, 21364, 29289, 28263, 8241, 0, 0, 0,
        0, 0, 350, 65535, 0, 0, 9161, 6067, 32768, 3, 65535, 65535, 2, 21364, 29289, 28263, 8242,
        0, 0, 0, 0, 0, 260, 0, 0, 0, 9161, 6067, 32768, 3,
    ]
}

/// Grid meter importing 4.53 W.
pub fn meter_frame() -> Vec<u16> {
    vec![
        16384, 16968, 0, 16528, 62915, 16967, 55050, 16831, 2621, 49802, 40632, 17298, 61932,
        17197, 16187, 17236, 42362, 17172, 54788, 50066, 61932, 49840, 57672, 49929, 53084, 49799,
        18350, 15395, 55050, 16122, 57672, 15918, 5243, 48949, 49807, 19079, 34320, 32704, 0,
        32704, 0, 32704, 0, 18772, 13440, 32704, 0, 32704, 0, 32704,
    ]
}

/// Grid meter feeding in 1280 W.
pub fn meter_feed_in_frame() -> Vec<u16> {
    vec![
        3277, 16968, 0, 50336, 573, 17489, 164, 50308, 49889, 50307, 49070, 17571, 49152, 17494,
        1720, 17543, 25876, 17540, 39715, 50059, 12124, 49841, 47186, 49936, 28180, 49716, 20972,
        49016, 20972, 16253, 28836, 49021, 28836, 49021, 28836, 19079, 35284, 32704, 0, 32704, 0,
        32704, 0, 18772, 13440, 32704, 0, 32704, 0, 32704,
    ]
}
