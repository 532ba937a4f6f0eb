//! Decode/derive engine: turns raw register batches into named values,
//! computes the cross-item derived quantities and queues everything per
//! publication tier.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, error};

use crate::eflow::{EflowAggregate, EflowChannel};
use crate::error::{BridgeError, Result};
use crate::reader::RegisterReader;
use crate::registry::{
    item, Batch, DecodeKind, Item, Tier, INVERTER_BATCH, METER_BATCH, MPPT_BATCH, STORAGE_BATCH,
};
use crate::registry::{format_battery_state, format_inverter_vendor_state, format_mppt_state};

/// Module power at or above this level triggers a raw register dump.
const MOD_POWER_DUMP_LIMIT: f64 = 5500.0;
/// Battery power magnitude at or above this level triggers a raw register dump.
const BAT_POWER_DUMP_LIMIT: f64 = 3300.0;

/// Latest value per item name, drained on flush.
pub type TierQueue = BTreeMap<&'static str, Value>;

/// Per-item outcome of one batch pass.
///
/// `ready` is distinct from value presence: after an error reset an item is
/// ready with a null value.
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub item: &'static Item,
    pub value: Value,
    pub ready: bool,
}

type Results = BTreeMap<&'static str, ItemResult>;

pub struct Processor {
    reader: Box<dyn RegisterReader>,

    send_quick: TierQueue,
    send_medium: TierQueue,
    send_slow: TierQueue,

    eflow_inv_dc: EflowChannel,
    eflow_inv_ac: EflowChannel,
    eflow_bat: EflowChannel,
    eflow_mod: EflowChannel,

    // session caches for cross-model math; survive read faults untouched
    value_inv_ac_power: Option<f64>,
    value_inv_dc_power: Option<f64>,
    value_met_ac_power: Option<f64>,
}

impl Processor {
    pub fn new(reader: Box<dyn RegisterReader>) -> Self {
        Self {
            reader,
            send_quick: TierQueue::new(),
            send_medium: TierQueue::new(),
            send_slow: TierQueue::new(),
            eflow_inv_dc: EflowChannel::new(
                item::INV_DC_POWER,
                EflowAggregate::new(item::EFLOW_INV_DC_OUT),
                Some(EflowAggregate::new(item::EFLOW_INV_DC_IN)),
            ),
            eflow_inv_ac: EflowChannel::new(
                item::INV_AC_POWER,
                EflowAggregate::new(item::EFLOW_INV_AC_OUT),
                Some(EflowAggregate::new(item::EFLOW_INV_AC_IN)),
            ),
            eflow_bat: EflowChannel::new(
                item::MPPT_BAT_POWER,
                EflowAggregate::new(item::EFLOW_BAT_OUT),
                Some(EflowAggregate::new(item::EFLOW_BAT_IN)),
            ),
            // module strings only ever produce
            eflow_mod: EflowChannel::new(
                item::MPPT_MOD_POWER,
                EflowAggregate::new(item::EFLOW_MOD_OUT),
                None,
            ),
            value_inv_ac_power: None,
            value_inv_dc_power: None,
            value_met_ac_power: None,
        }
    }

    pub async fn open(&mut self) -> Result<()> {
        if !self.reader.is_open() {
            self.reader.open().await?;
        }
        Ok(())
    }

    pub async fn close(&mut self) {
        debug!("closing register reader");
        self.reader.close().await;
    }

    /// Inverter model; must run first in a cycle, it feeds the AC/DC caches.
    pub async fn process_inverter(&mut self) -> Result<()> {
        match self.process_inverter_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reset_items(&INVERTER_BATCH);
                Err(e)
            },
        }
    }

    async fn process_inverter_inner(&mut self) -> Result<()> {
        let mut results = self.process_model(&INVERTER_BATCH).await?;

        self.process_text(
            &mut results,
            item::INV_STATE_CODE,
            item::INV_STATE_TEXT,
            format_inverter_vendor_state,
        );

        Self::push_eflow(&mut self.eflow_inv_dc, &results);
        Self::push_eflow(&mut self.eflow_inv_ac, &results);

        self.value_inv_ac_power = Self::value_of(&results, item::INV_AC_POWER);
        self.value_inv_dc_power = Self::value_of(&results, item::INV_DC_POWER);

        self.process_self_consumption(&mut results);
        self.process_efficiency(&mut results);
        Ok(())
    }

    /// Storage model (battery fill level and state).
    pub async fn process_storage(&mut self) -> Result<()> {
        match self.process_storage_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reset_items(&STORAGE_BATCH);
                Err(e)
            },
        }
    }

    async fn process_storage_inner(&mut self) -> Result<()> {
        let mut results = self.process_model(&STORAGE_BATCH).await?;

        self.process_scale(
            &mut results,
            item::RAW_BAT_FILL_LEVEL,
            item::RAW_BAT_FILL_LEVEL_SF,
            item::BAT_FILL_LEVEL,
        );
        self.process_text(
            &mut results,
            item::BAT_STATE_CODE,
            item::BAT_STATE_TEXT,
            format_battery_state,
        );
        Ok(())
    }

    /// MPPT model; depends on the DC power cached by the inverter model.
    pub async fn process_mppt(&mut self) -> Result<()> {
        match self.process_mppt_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reset_items(&MPPT_BATCH);
                Err(e)
            },
        }
    }

    async fn process_mppt_inner(&mut self) -> Result<()> {
        let mut results = self.process_model(&MPPT_BATCH).await?;

        self.process_scale(
            &mut results,
            item::RAW_MPPT_MOD_VOLTAGE,
            item::RAW_MPPT_VOLTAGE_SF,
            item::MPPT_MOD_VOLTAGE,
        );
        self.process_scale(
            &mut results,
            item::RAW_MPPT_MOD_POWER,
            item::RAW_MPPT_POWER_SF,
            item::MPPT_MOD_POWER,
        );
        self.log_registers_when_at_least(&results, item::MPPT_MOD_POWER, MOD_POWER_DUMP_LIMIT);

        self.process_scale(
            &mut results,
            item::RAW_MPPT_BAT_POWER,
            item::RAW_MPPT_POWER_SF,
            item::RAW2_MPPT_BAT_POWER,
        );

        self.process_text(
            &mut results,
            item::MPPT_BAT_STATE_CODE,
            item::MPPT_BAT_STATE_TEXT,
            format_mppt_state,
        );
        self.process_text(
            &mut results,
            item::MPPT_MOD_STATE_CODE,
            item::MPPT_MOD_STATE_TEXT,
            format_mppt_state,
        );

        self.process_bat_power_sign(&mut results);
        self.log_registers_when_at_least(&results, item::MPPT_BAT_POWER, BAT_POWER_DUMP_LIMIT);

        Self::push_eflow(&mut self.eflow_bat, &results);
        Self::push_eflow(&mut self.eflow_mod, &results);
        Ok(())
    }

    /// Meter model; completes the self-consumption pair.
    pub async fn process_meter(&mut self) -> Result<()> {
        match self.process_meter_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reset_items(&METER_BATCH);
                Err(e)
            },
        }
    }

    async fn process_meter_inner(&mut self) -> Result<()> {
        let mut results = self.process_model(&METER_BATCH).await?;

        self.value_met_ac_power = Self::value_of(&results, item::MET_AC_POWER);
        self.process_self_consumption(&mut results);
        Ok(())
    }

    /// Atomically return and clear the tier queue. The medium tier also
    /// drains every energy-flow aggregate; zero sums are omitted ("no flow"
    /// is an absent key, not an explicit zero).
    pub fn drain_tier(&mut self, tier: Tier) -> TierQueue {
        let mut out = match tier {
            Tier::Quick => std::mem::take(&mut self.send_quick),
            Tier::Medium => std::mem::take(&mut self.send_medium),
            Tier::Slow => std::mem::take(&mut self.send_slow),
        };

        if tier == Tier::Medium {
            let channels = [
                &mut self.eflow_inv_dc,
                &mut self.eflow_inv_ac,
                &mut self.eflow_bat,
                &mut self.eflow_mod,
            ];
            for channel in channels {
                for (name, sum) in channel.drain_and_reset() {
                    if sum != 0.0 {
                        out.insert(name, Value::from(sum));
                    }
                }
            }
        }

        out
    }

    /// Queue a null for every tier-tagged item of the batch; used after a
    /// read fault so subscribers see explicit unknowns, not stale values.
    fn reset_items(&mut self, batch: &'static Batch) {
        for it in batch.items {
            if it.tiers.is_empty() {
                continue;
            }
            self.queue(&ItemResult { item: it, value: Value::Null, ready: true });
        }
    }

    async fn process_model(&mut self, batch: &'static Batch) -> Result<Results> {
        let raw = match self.reader.read(batch).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("reading batch '{}' failed: {e}", batch.name);
                return Err(e);
            },
        };
        if raw.len() != batch.count {
            return Err(BridgeError::transport(format!(
                "batch '{}' returned {} registers, expected {}",
                batch.name,
                raw.len(),
                batch.count
            )));
        }

        let mut results = Results::new();
        for it in batch.items {
            let result = match (it.offset, it.kind) {
                (Some(offset), Some(kind)) => ItemResult {
                    item: it,
                    value: decode_register(&raw, offset, kind),
                    ready: true,
                },
                _ => ItemResult { item: it, value: Value::Null, ready: false },
            };
            self.queue(&result);
            results.insert(it.name, result);
        }
        Ok(results)
    }

    /// Scale a raw register by its sunssf companion into the target item.
    /// Scaling faults are non-fatal: the target goes null but stays ready.
    fn process_scale(
        &mut self,
        results: &mut Results,
        value_name: &'static str,
        scale_name: &'static str,
        target_name: &'static str,
    ) {
        let value = match scale_item(results.get(value_name), results.get(scale_name)) {
            Ok(v) => Value::from(v),
            Err(e) => {
                error!("scaling failed ({value_name} + {scale_name} => {target_name}): {e}");
                Value::Null
            },
        };
        self.finish(results, target_name, value);
    }

    /// Map a status code to its text item through a registry table.
    fn process_text(
        &mut self,
        results: &mut Results,
        source_name: &'static str,
        target_name: &'static str,
        convert: fn(Option<i64>) -> Option<String>,
    ) {
        let code = results.get(source_name).and_then(|r| r.value.as_i64());
        let value = match convert(code) {
            Some(text) => Value::from(text),
            None => Value::Null,
        };
        self.finish(results, target_name, value);
    }

    /// `-0.001 * (inverter AC + meter AC)`, only once both caches are known.
    fn process_self_consumption(&mut self, results: &mut Results) {
        let value = match (self.value_inv_ac_power, self.value_met_ac_power) {
            (Some(inv_ac), Some(met_ac)) => Value::from(-0.001 * (inv_ac + met_ac)),
            _ => Value::Null,
        };
        self.finish(results, item::SELF_CONSUMPTION, value);
    }

    /// AC/DC conversion efficiency in percent; exactly 0 when no DC power.
    fn process_efficiency(&mut self, results: &mut Results) {
        let value = match (self.value_inv_ac_power, self.value_inv_dc_power) {
            (Some(_), Some(dc)) if dc == 0.0 => Value::from(0),
            (Some(ac), Some(dc)) => Value::from(100.0 * ac / dc),
            _ => Value::Null,
        };
        self.finish(results, item::INV_EFFICIENCY, value);
    }

    /// The battery string reports a signless power magnitude. Test which
    /// sign better explains the cached total DC power and apply it; with an
    /// unknown DC power the multiplier defaults to 0.
    fn process_bat_power_sign(&mut self, results: &mut Results) {
        let dc_power = self.value_inv_dc_power;
        let computed = (|| -> Option<f64> {
            let raw = results.get(item::RAW2_MPPT_BAT_POWER).filter(|r| r.ready)?;
            let mod_power = results.get(item::MPPT_MOD_POWER).filter(|r| r.ready)?;
            let raw_value = raw.value.as_f64()?;

            let charge_factor = match dc_power {
                None => 0.0,
                Some(dc) => {
                    let mod_value = mod_power.value.as_f64()?;
                    let discharge_residual = (dc - mod_value + raw_value).abs();
                    let charge_residual = (dc - mod_value - raw_value).abs();
                    // strict less-than: a tie resolves to charging (+1)
                    if discharge_residual < charge_residual {
                        -1.0
                    } else {
                        1.0
                    }
                },
            };
            Some(raw_value * charge_factor)
        })();

        let value = computed.map_or(Value::Null, Value::from);
        self.finish(results, item::MPPT_BAT_POWER, value);
    }

    /// Store a derived value, mark it ready and queue it.
    fn finish(&mut self, results: &mut Results, target_name: &'static str, value: Value) {
        let target = results
            .get_mut(target_name)
            .unwrap_or_else(|| panic!("unknown target item '{target_name}'"));
        target.value = value;
        target.ready = true;
        let result = target.clone();
        self.queue(&result);
    }

    fn queue(&mut self, result: &ItemResult) {
        if !result.ready {
            return;
        }
        for tier in result.item.tiers {
            let queue = match tier {
                Tier::Quick => &mut self.send_quick,
                Tier::Medium => &mut self.send_medium,
                Tier::Slow => &mut self.send_slow,
            };
            queue.insert(result.item.name, result.value.clone());
        }
    }

    /// Feed a signed power sample into its energy-flow channel. Pushing a
    /// value that is not ready is a programmer error.
    fn push_eflow(channel: &mut EflowChannel, results: &Results) {
        let result = results
            .get(channel.source_name)
            .unwrap_or_else(|| panic!("unknown eflow source '{}'", channel.source_name));
        assert!(result.ready, "can only push ready values");
        channel.push(result.value.as_f64());
    }

    /// Numeric value of a ready item; unknown stays `None`.
    fn value_of(results: &Results, name: &'static str) -> Option<f64> {
        let result = results
            .get(name)
            .unwrap_or_else(|| panic!("unknown item '{name}'"));
        assert!(result.ready, "can only deliver ready values");
        result.value.as_f64()
    }

    fn log_registers_when_at_least(&self, results: &Results, name: &'static str, limit: f64) {
        let Some(value) = results.get(name).and_then(|r| r.value.as_f64()) else {
            return;
        };
        if value.abs() >= limit {
            self.reader.log_last_registers();
        }
    }
}

/// Decode one item from the raw register slice. Non-finite floats (the
/// device pads unused float registers with NaN) decode to null, and an
/// unsigned 0xFFFF is the device's "not available" sentinel and reads as 0.
fn decode_register(raw: &[u16], offset: usize, kind: DecodeKind) -> Value {
    match kind {
        DecodeKind::U16 => {
            let value = raw[offset];
            Value::from(if value == u16::MAX { 0 } else { value })
        },
        DecodeKind::I16 => Value::from(raw[offset] as i16),
        DecodeKind::F32 => {
            let bits = ((raw[offset] as u32) << 16) | raw[offset + 1] as u32;
            Value::from(f32::from_bits(bits) as f64)
        },
    }
}

/// `raw * 10^round(sunssf)`; fails when either side is unknown or the
/// exponent is outside [-10, 10].
fn scale_item(value: Option<&ItemResult>, scale: Option<&ItemResult>) -> Result<f64> {
    let value = value
        .and_then(|r| r.value.as_f64())
        .ok_or_else(|| BridgeError::data("scale source value is unknown"))?;
    Ok(value * convert_scale_factor(scale.and_then(|r| r.value.as_f64()))?)
}

/// Turn a sunssf exponent into the multiplier `10^round(sunssf)`.
fn convert_scale_factor(sunssf: Option<f64>) -> Result<f64> {
    let sunssf = sunssf.ok_or_else(|| BridgeError::data("scale factor is unknown"))?;
    let rounded = sunssf.round();
    if !(-10.0..=10.0).contains(&rounded) {
        return Err(BridgeError::data(format!("scale factor {rounded} out of range")));
    }
    Ok(10f64.powi(rounded as i32))
}
