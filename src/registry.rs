//! Static register map for the SunSpec-style inverter, storage, MPPT and
//! meter models, plus the status-code text tables.
//!
//! Item offsets are 0-based indices into the raw register slice of their
//! batch. The device documentation numbers model registers starting at 1,
//! so a documented register N of a batch lands at slice index N-1.

use std::collections::BTreeSet;

/// Number of sub-ticks the quick cycle is stretched over.
pub const TICK_COUNT: u32 = 4;

/// Publication cadence tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Quick,
    Medium,
    Slow,
}

/// How a raw register maps to a value. Derived items carry no kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    U16,
    I16,
    /// Two consecutive registers, big-endian IEEE 754.
    F32,
}

/// One named physical or derived quantity.
#[derive(Debug)]
pub struct Item {
    pub name: &'static str,
    /// Slice index within the batch; `None` for purely derived items.
    pub offset: Option<usize>,
    pub kind: Option<DecodeKind>,
    pub tiers: &'static [Tier],
}

/// A contiguous register range read in one request.
#[derive(Debug)]
pub struct Batch {
    /// Modbus unit id.
    pub unit: u8,
    pub name: &'static str,
    pub start: u16,
    pub count: usize,
    pub items: &'static [Item],
}

/// Item names as they appear in published JSON payloads.
pub mod item {
    // inverter
    pub const INV_AC_ENERGY_TOT: &str = "invAcEnergyTot";
    pub const INV_EFFICIENCY: &str = "invEfficiency";
    pub const INV_STATE_CODE: &str = "invStateCode";
    pub const INV_STATE_TEXT: &str = "invStateText";
    pub const INV_AC_POWER: &str = "invAcPower";
    pub const INV_DC_POWER: &str = "invDcPower";

    // storage
    pub const BAT_FILL_LEVEL: &str = "batFillLevel";
    pub const BAT_STATE_CODE: &str = "batStateCode";
    pub const RAW_BAT_FILL_LEVEL: &str = "rawBatFillState";
    pub const RAW_BAT_FILL_LEVEL_SF: &str = "rawBatFillStateSf";
    pub const BAT_STATE_TEXT: &str = "batStateText";

    // mppt
    pub const MPPT_BAT_STATE_CODE: &str = "mpptBatStateCode";
    pub const MPPT_BAT_STATE_TEXT: &str = "mpptBatStateText";
    pub const MPPT_MOD_STATE_CODE: &str = "mpptModStateCode";
    pub const MPPT_MOD_STATE_TEXT: &str = "mpptModStateText";
    pub const MPPT_MOD_VOLTAGE: &str = "mpptModVoltage";
    pub const RAW2_MPPT_BAT_POWER: &str = "raw2BatPower";
    pub const RAW_MPPT_BAT_POWER: &str = "rawMpptBattPower";
    pub const RAW_MPPT_MOD_POWER: &str = "rawMpptModPower";
    pub const RAW_MPPT_MOD_VOLTAGE: &str = "rawMpptModVoltage";
    pub const RAW_MPPT_POWER_SF: &str = "rawMpptPowerSfBase";
    pub const RAW_MPPT_VOLTAGE_SF: &str = "rawMpptVoltageSfBase";
    pub const MPPT_BAT_POWER: &str = "mpptBatPower";
    pub const MPPT_MOD_POWER: &str = "mpptModPower";

    // meter
    pub const MET_AC_FREQUENCY: &str = "metFrequency";
    pub const MET_AC_POWER: &str = "metAcPower";
    pub const MET_ENERGY_EXP_TOT: &str = "metEnergyExpTot";
    pub const MET_ENERGY_IMP_TOT: &str = "metEnergyImpTot";

    // energy flow
    pub const EFLOW_BAT_IN: &str = "eflowBatIn";
    pub const EFLOW_BAT_OUT: &str = "eflowBatOut";
    pub const EFLOW_INV_AC_IN: &str = "eflowInvAcIn";
    pub const EFLOW_INV_AC_OUT: &str = "eflowInvAcOut";
    pub const EFLOW_INV_DC_IN: &str = "eflowInvDcIn";
    pub const EFLOW_INV_DC_OUT: &str = "eflowInvDcOut";
    pub const EFLOW_MOD_OUT: &str = "eflowModOut";

    // comprehensive
    pub const SELF_CONSUMPTION: &str = "selfConsumption";
}

use item::*;

const QUICK: &[Tier] = &[Tier::Quick];
const MEDIUM: &[Tier] = &[Tier::Medium];
const SLOW: &[Tier] = &[Tier::Slow];
const NONE: &[Tier] = &[];

/// Common & Inverter Model (registers 40070..).
pub static INVERTER_BATCH: Batch = Batch {
    unit: 1,
    name: "inverter",
    start: 40070,
    count: 60,
    items: &[
        // 40092 40093 W float32: AC power
        Item { name: INV_AC_POWER, offset: Some(21), kind: Some(DecodeKind::F32), tiers: QUICK },
        // 40102 40103 WH float32: AC lifetime energy
        Item { name: INV_AC_ENERGY_TOT, offset: Some(31), kind: Some(DecodeKind::F32), tiers: MEDIUM },
        // 40108 40109 DCW float32: total DC power of all MPPT trackers
        Item { name: INV_DC_POWER, offset: Some(37), kind: Some(DecodeKind::F32), tiers: QUICK },
        // 40119 StVnd enum16: vendor operating state
        Item { name: INV_STATE_CODE, offset: Some(48), kind: Some(DecodeKind::I16), tiers: MEDIUM },
        Item { name: INV_EFFICIENCY, offset: None, kind: None, tiers: QUICK },
        Item { name: SELF_CONSUMPTION, offset: None, kind: None, tiers: QUICK },
        Item { name: INV_STATE_TEXT, offset: None, kind: None, tiers: MEDIUM },
    ],
};

/// Basic Storage Control Model IC124 (registers 40313..).
pub static STORAGE_BATCH: Batch = Batch {
    unit: 1,
    name: "storage",
    start: 40313,
    count: 26,
    items: &[
        // reg 9 ChaState uint16: available energy percent
        Item { name: RAW_BAT_FILL_LEVEL, offset: Some(8), kind: Some(DecodeKind::U16), tiers: NONE },
        // reg 23 ChaState_SF sunssf
        Item { name: RAW_BAT_FILL_LEVEL_SF, offset: Some(22), kind: Some(DecodeKind::I16), tiers: NONE },
        Item { name: BAT_FILL_LEVEL, offset: None, kind: None, tiers: SLOW },
        // reg 12 ChaSt enum16: battery state
        Item { name: BAT_STATE_CODE, offset: Some(11), kind: Some(DecodeKind::U16), tiers: SLOW },
        Item { name: BAT_STATE_TEXT, offset: None, kind: None, tiers: SLOW },
    ],
};

/// Multiple MPPT Inverter Extension Model I160 (registers 40263..).
pub static MPPT_BATCH: Batch = Batch {
    unit: 1,
    name: "mppt",
    start: 40263,
    count: 48,
    items: &[
        // reg 4 DCV_SF sunssf: voltage scale factor
        Item { name: RAW_MPPT_VOLTAGE_SF, offset: Some(3), kind: Some(DecodeKind::I16), tiers: NONE },
        // reg 5 DCW_SF sunssf: power scale factor
        Item { name: RAW_MPPT_POWER_SF, offset: Some(4), kind: Some(DecodeKind::I16), tiers: NONE },
        // reg 21 1_DCV uint16: module string voltage
        Item { name: RAW_MPPT_MOD_VOLTAGE, offset: Some(20), kind: Some(DecodeKind::U16), tiers: NONE },
        // reg 22 1_DCW uint16: module string power
        Item { name: RAW_MPPT_MOD_POWER, offset: Some(21), kind: Some(DecodeKind::U16), tiers: NONE },
        // reg 28 1_DCSt enum16: module operating state
        Item { name: MPPT_MOD_STATE_CODE, offset: Some(27), kind: Some(DecodeKind::I16), tiers: MEDIUM },
        // reg 42 2_DCW uint16: battery string power (signless)
        Item { name: RAW_MPPT_BAT_POWER, offset: Some(41), kind: Some(DecodeKind::U16), tiers: NONE },
        // reg 48 2_DCSt enum16: battery operating state
        Item { name: MPPT_BAT_STATE_CODE, offset: Some(47), kind: Some(DecodeKind::I16), tiers: MEDIUM },
        Item { name: RAW2_MPPT_BAT_POWER, offset: None, kind: None, tiers: NONE },
        Item { name: MPPT_BAT_POWER, offset: None, kind: None, tiers: QUICK },
        Item { name: MPPT_MOD_POWER, offset: None, kind: None, tiers: QUICK },
        Item { name: MPPT_MOD_VOLTAGE, offset: None, kind: None, tiers: QUICK },
        Item { name: MPPT_BAT_STATE_TEXT, offset: None, kind: None, tiers: MEDIUM },
        Item { name: MPPT_MOD_STATE_TEXT, offset: None, kind: None, tiers: MEDIUM },
    ],
};

/// Meter Model (registers 40094..), separate unit id.
pub static METER_BATCH: Batch = Batch {
    unit: 240,
    name: "meter",
    start: 40094,
    count: 50,
    items: &[
        // 40096 40097 Hz float32: AC frequency
        Item { name: MET_AC_FREQUENCY, offset: Some(1), kind: Some(DecodeKind::F32), tiers: MEDIUM },
        // 40098 40099 W float32: AC power (negative = feed-in)
        Item { name: MET_AC_POWER, offset: Some(3), kind: Some(DecodeKind::F32), tiers: QUICK },
        // 40130 40131 TotWhExp float32: total Wh exported
        Item { name: MET_ENERGY_EXP_TOT, offset: Some(35), kind: Some(DecodeKind::F32), tiers: MEDIUM },
        // 40138 40139 TotWhImp float32: total Wh imported
        Item { name: MET_ENERGY_IMP_TOT, offset: Some(43), kind: Some(DecodeKind::F32), tiers: MEDIUM },
        Item { name: SELF_CONSUMPTION, offset: None, kind: None, tiers: QUICK },
    ],
};

/// All batches in model-dependency order.
pub static BATCHES: [&Batch; 4] = [&INVERTER_BATCH, &MPPT_BATCH, &STORAGE_BATCH, &METER_BATCH];

/// Item names tagged with the given tier, across all batches.
pub fn items_for_tier(tier: Tier) -> BTreeSet<&'static str> {
    let mut names = BTreeSet::new();
    for batch in BATCHES {
        for it in batch.items {
            if it.tiers.contains(&tier) {
                names.insert(it.name);
            }
        }
    }
    names
}

/// Sorted, comma-joined item listing for one tier (startup logging).
pub fn list_items(tier: Tier) -> String {
    items_for_tier(tier).into_iter().collect::<Vec<_>>().join(", ")
}

/// SunSpec base operating state of the inverter.
pub fn format_inverter_state(code: Option<i64>) -> Option<String> {
    let code = code?;
    let label = match code {
        1 => "OFF",
        2 => "AUTO-SHUTDOWN",
        3 => "RUN-UP",
        4 => "NORMAL",
        5 => "POWER REDUCTION",
        6 => "SWITCH-OFF",
        7 => "ERROR",
        8 => "STANDBY",
        _ => "?",
    };
    Some(format!("({code}) {label}"))
}

/// Vendor operating state of the inverter; 1..=8 match the base states.
pub fn format_inverter_vendor_state(code: Option<i64>) -> Option<String> {
    let code = code?;
    if (1..=8).contains(&code) {
        return format_inverter_state(Some(code));
    }
    let label = match code {
        9 => "NO SOLARNET COMMUNICATION",
        10 => "NO COMMUNICATION",
        11 => "OVER-CURRENT SOLARNET SOCKET",
        12 => "UPDATE",
        13 => "AFCI EVENT (ARC)",
        _ => "?",
    };
    Some(format!("({code}) {label}"))
}

/// Battery charge state.
pub fn format_battery_state(code: Option<i64>) -> Option<String> {
    let code = code?;
    let label = match code {
        1 => "OFF",
        2 => "EMPTY",
        3 => "DISCHARGE",
        4 => "CHARGING",
        5 => "FULL",
        6 => "HOLDING",
        7 => "TESTING",
        _ => "?",
    };
    Some(format!("({code}) {label}"))
}

/// MPPT tracker operating state. The device reports 0xFFFF for trackers
/// that are not feeding.
pub fn format_mppt_state(code: Option<i64>) -> Option<String> {
    let code = code?;
    let label = match code {
        1 => "OFF",
        2 => "IN OPERATION (NO FEED-IN)",
        3 => "RUN-UP",
        4 => "NORMAL",
        5 => "POWER REDUCTION",
        6 => "SWITCH-OFF",
        7 => "ERROR",
        8 => "STANDBY",
        65535 => "(0xFFFF) ?",
        _ => "?",
    };
    Some(format!("({code}) {label}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_offsets_stay_within_batch() {
        for batch in BATCHES {
            for it in batch.items {
                if let Some(offset) = it.offset {
                    let regs = match it.kind {
                        Some(DecodeKind::F32) => 2,
                        _ => 1,
                    };
                    assert!(
                        offset + regs <= batch.count,
                        "{}/{} out of range",
                        batch.name,
                        it.name
                    );
                }
            }
        }
    }

    #[test]
    fn derived_items_have_no_decode_kind() {
        for batch in BATCHES {
            for it in batch.items {
                assert_eq!(it.offset.is_none(), it.kind.is_none(), "{}", it.name);
            }
        }
    }

    #[test]
    fn tier_membership_is_complete() {
        let quick = items_for_tier(Tier::Quick);
        let expected: BTreeSet<&str> = [
            item::INV_AC_POWER,
            item::INV_DC_POWER,
            item::INV_EFFICIENCY,
            item::SELF_CONSUMPTION,
            item::MPPT_BAT_POWER,
            item::MPPT_MOD_POWER,
            item::MPPT_MOD_VOLTAGE,
            item::MET_AC_POWER,
        ]
        .into_iter()
        .collect();
        assert_eq!(expected, quick);

        let medium = items_for_tier(Tier::Medium);
        let expected: BTreeSet<&str> = [
            item::INV_AC_ENERGY_TOT,
            item::INV_STATE_CODE,
            item::INV_STATE_TEXT,
            item::MPPT_BAT_STATE_CODE,
            item::MPPT_BAT_STATE_TEXT,
            item::MPPT_MOD_STATE_CODE,
            item::MPPT_MOD_STATE_TEXT,
            item::MET_AC_FREQUENCY,
            item::MET_ENERGY_EXP_TOT,
            item::MET_ENERGY_IMP_TOT,
        ]
        .into_iter()
        .collect();
        assert_eq!(expected, medium);

        let slow = items_for_tier(Tier::Slow);
        let expected: BTreeSet<&str> =
            [item::BAT_FILL_LEVEL, item::BAT_STATE_CODE, item::BAT_STATE_TEXT]
                .into_iter()
                .collect();
        assert_eq!(expected, slow);
    }

    #[test]
    fn inverter_state_formatting() {
        assert_eq!(None, format_inverter_state(None));
        assert_eq!(Some("(4) NORMAL".to_string()), format_inverter_state(Some(4)));
        assert_eq!(Some("(99) ?".to_string()), format_inverter_state(Some(99)));
    }

    #[test]
    fn inverter_vendor_state_formatting() {
        assert_eq!(None, format_inverter_vendor_state(None));
        assert_eq!(
            Some("(3) RUN-UP".to_string()),
            format_inverter_vendor_state(Some(3))
        );
        assert_eq!(
            Some("(9) NO SOLARNET COMMUNICATION".to_string()),
            format_inverter_vendor_state(Some(9))
        );
        assert_eq!(Some("(42) ?".to_string()), format_inverter_vendor_state(Some(42)));
    }

    #[test]
    fn battery_state_formatting() {
        assert_eq!(None, format_battery_state(None));
        assert_eq!(Some("(3) DISCHARGE".to_string()), format_battery_state(Some(3)));
        assert_eq!(Some("(0) ?".to_string()), format_battery_state(Some(0)));
    }

    #[test]
    fn mppt_state_formatting() {
        assert_eq!(None, format_mppt_state(None));
        assert_eq!(Some("(4) NORMAL".to_string()), format_mppt_state(Some(4)));
        assert_eq!(
            Some("(65535) (0xFFFF) ?".to_string()),
            format_mppt_state(Some(65535))
        );
        assert_eq!(Some("(77) ?".to_string()), format_mppt_state(Some(77)));
    }
}
