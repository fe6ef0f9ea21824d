use std::{
    collections::{ BTreeMap, HashMap },
    fs,
    path::PathBuf,
};

use bitcoin::Amount;
use serde_json::Value;
use tracing::warn;

use crate::method::FeeMethod;
use crate::policy::{ ConfigStore, FeePolicy, FeeSliderInfo, FeeTarget, FeeWarning };

/// Confirmation targets (blocks) selectable on the dynamic-target
/// slider, slowest first. One extra top position means "next block".
pub const FEE_ETA_TARGETS: [u32; 4] = [25, 10, 5, 2];

/// Mempool depth targets (vbytes from the tip) selectable on the
/// mempool slider, deepest first.
pub const FEE_DEPTH_TARGETS: [u64; 9] = [
    10_000_000, 5_000_000, 2_000_000, 1_000_000, 800_000, 600_000, 400_000, 250_000, 100_000,
];

/// Static rates (sat/kvB) selectable on the static slider.
pub const FEERATE_STATIC_VALUES: [u64; 10] = [
    1_000, 2_000, 5_000, 10_000, 20_000, 30_000, 50_000, 70_000, 100_000, 200_000,
];

/// Static rate used before the user ever touches the slider (sat/kvB).
pub const FEERATE_FALLBACK_STATIC_FEE: u64 = 150_000;

/// Default relay floor (sat/kvB).
pub const FEERATE_DEFAULT_RELAY: u64 = 1_000;

/// Rates above this line (sat/kvB) are flagged as unusually high.
pub const FEERATE_WARNING_HIGH_FEE: u64 = 600_000;

/// Fee-to-amount ratio above which the fee is flagged as unusually high.
pub const FEE_RATIO_HIGH_WARNING: f64 = 0.05;

const DEFAULT_DEPTH_LEVEL: u32 = 2;
const DEFAULT_FEE_LEVEL: u32 = 2;

/// Key-value wallet config doubling as the fee policy store.
///
/// Fee curves are data injected by the surrounding wallet: a
/// blocks-to-rate estimate table for the confirmation-target strategy
/// and a `(sat/vB, vsize)` histogram, highest rate first, for the
/// mempool-depth strategy. Values persist to a JSON file when a path is
/// set; persistence is best effort and never surfaces into recomputes.
#[derive(Debug, Default)]
pub struct WalletConfig {
    values: HashMap<String, Value>,
    path: Option<PathBuf>,
    fee_estimates: BTreeMap<u32, u64>,
    mempool_histogram: Vec<(u64, u64)>,
    relay_fee_per_kvb: u64,
}

impl WalletConfig {
    pub fn new() -> Self {
        WalletConfig {
            relay_fee_per_kvb: FEERATE_DEFAULT_RELAY,
            ..WalletConfig::default()
        }
    }

    /// Open a config backed by `path`, loading any existing contents.
    /// A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), %err, "discarding malformed config file");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        WalletConfig {
            values,
            path: Some(path),
            relay_fee_per_kvb: FEERATE_DEFAULT_RELAY,
            ..WalletConfig::default()
        }
    }

    /// Replace the confirmation-target estimate table (blocks → sat/kvB).
    pub fn set_fee_estimates(&mut self, estimates: BTreeMap<u32, u64>) {
        self.fee_estimates = estimates;
    }

    /// Replace the mempool fee histogram: `(sat/vB, vsize)` buckets
    /// sorted highest rate first.
    pub fn set_mempool_histogram(&mut self, histogram: Vec<(u64, u64)>) {
        self.mempool_histogram = histogram;
    }

    pub fn set_relay_fee_per_kvb(&mut self, relay_fee: u64) {
        self.relay_fee_per_kvb = relay_fee;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn get_bool(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn get_depth_level(&self) -> u32 {
        let maxp = FEE_DEPTH_TARGETS.len() as u32 - 1;
        self.get_u64("depth_level")
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_DEPTH_LEVEL)
            .min(maxp)
    }

    pub fn get_fee_level(&self) -> u32 {
        let maxp = FEE_ETA_TARGETS.len() as u32;
        self.get_u64("fee_level")
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_FEE_LEVEL)
            .min(maxp)
    }

    /// Confirmation target (blocks) for a dynamic-target slider position.
    /// The position above the table's fastest entry means next block.
    pub fn eta_target(&self, level: u32) -> u32 {
        if level as usize >= FEE_ETA_TARGETS.len() {
            return 1;
        }
        FEE_ETA_TARGETS[level as usize]
    }

    /// Depth target (vbytes from tip) for a mempool slider position.
    pub fn depth_target(&self, level: u32) -> u64 {
        let i = (level as usize).min(FEE_DEPTH_TARGETS.len() - 1);
        FEE_DEPTH_TARGETS[i]
    }

    /// Closest static-table index for a persisted rate.
    pub fn static_fee_index(&self, rate: u64) -> u32 {
        let mut best = 0;
        let mut best_dist = u64::MAX;
        for (i, value) in FEERATE_STATIC_VALUES.iter().enumerate() {
            let dist = value.abs_diff(rate);
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        best as u32
    }

    fn static_fee_rate(&self) -> u64 {
        self.get_u64("fee_per_kb").unwrap_or(FEERATE_FALLBACK_STATIC_FEE)
    }

    fn eta_to_fee(&self, level: u32) -> Option<u64> {
        let target = self.eta_target(level);
        if let Some(rate) = self.fee_estimates.get(&target) {
            return Some(*rate);
        }
        // no estimate for this exact target, take the nearest known one
        self.fee_estimates
            .iter()
            .min_by_key(|(blocks, _)| blocks.abs_diff(target))
            .map(|(_, rate)| *rate)
    }

    fn depth_to_fee(&self, level: u32) -> Option<u64> {
        if self.mempool_histogram.is_empty() {
            return None;
        }
        let target = self.depth_target(level);
        let mut depth = 0;
        for (rate, vsize) in &self.mempool_histogram {
            depth += vsize;
            if depth > target {
                return Some(rate * 1_000);
            }
        }
        // whole backlog fits above the target: the relay floor suffices
        Some(self.relay_fee_per_kvb)
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_string_pretty(&self.values)
            .map_err(|err| err.to_string())
            .and_then(|raw| fs::write(path, raw).map_err(|err| err.to_string()));
        if let Err(err) = result {
            warn!(path = %path.display(), %err, "could not persist config");
        }
    }
}

impl FeePolicy for WalletConfig {
    fn is_dynfee(&self) -> bool {
        self.get_bool("dynamic_fees")
    }

    fn use_mempool_fees(&self) -> bool {
        self.get_bool("mempool_fees")
    }

    fn get_fee_slider(&self, dynamic: bool, mempool: bool) -> FeeSliderInfo {
        if dynamic {
            if mempool {
                let position = self.get_depth_level();
                FeeSliderInfo {
                    steps: FEE_DEPTH_TARGETS.len() as u32 - 1,
                    position,
                    fee_rate: self.depth_to_fee(position),
                }
            } else {
                let position = self.get_fee_level();
                FeeSliderInfo {
                    steps: FEE_ETA_TARGETS.len() as u32,
                    position,
                    fee_rate: self.eta_to_fee(position),
                }
            }
        } else {
            let rate = self.static_fee_rate();
            FeeSliderInfo {
                steps: FEERATE_STATIC_VALUES.len() as u32 - 1,
                position: self.static_fee_index(rate),
                fee_rate: Some(rate),
            }
        }
    }

    fn static_fee(&self, position: u32) -> u64 {
        let i = (position as usize).min(FEERATE_STATIC_VALUES.len() - 1);
        FEERATE_STATIC_VALUES[i]
    }

    fn fee_per_kb(&self) -> Option<u64> {
        if self.is_dynfee() {
            if self.use_mempool_fees() {
                self.depth_to_fee(self.get_depth_level())
            } else {
                self.eta_to_fee(self.get_fee_level())
            }
        } else {
            Some(self.static_fee_rate())
        }
    }

    fn get_fee_target(&self) -> FeeTarget {
        let method = FeeMethod::from_flags(self.is_dynfee(), self.use_mempool_fees());
        match method {
            FeeMethod::StaticRate => FeeTarget {
                label: format!("{:.1} sat/vB", self.static_fee_rate() as f64 / 1_000.0),
                tooltip: String::from("Fixed fee rate"),
                is_dynamic: false,
            },
            FeeMethod::DynamicTarget => {
                let target = self.eta_target(self.get_fee_level());
                let label = if target == 1 {
                    String::from("next block")
                } else {
                    format!("within {target} blocks")
                };
                FeeTarget {
                    label,
                    tooltip: String::from("Confirmation time target"),
                    is_dynamic: true,
                }
            }
            FeeMethod::DynamicMempoolDepth => {
                let target = self.depth_target(self.get_depth_level());
                FeeTarget {
                    label: format!("{:.1} MB from tip", target as f64 / 1_000_000.0),
                    tooltip: String::from("Mempool depth target"),
                    is_dynamic: true,
                }
            }
        }
    }

    fn get_tx_fee_warning(
        &self,
        invoice_amount: Amount,
        tx_size: usize,
        fee: Amount,
    ) -> Option<FeeWarning> {
        if tx_size == 0 {
            return None;
        }
        let feerate = fee.to_sat() as f64 / tx_size as f64;
        let fee_ratio = if invoice_amount > Amount::ZERO {
            fee.to_sat() as f64 / invoice_amount.to_sat() as f64
        } else {
            1.0
        };
        if feerate < self.relay_fee_per_kvb as f64 / 1_000.0 {
            Some(FeeWarning {
                allow_send: false,
                long_message: String::from(
                    "This transaction requires a higher fee, or it will not be propagated by your current server.",
                ),
                short_message: String::from("below relay fee"),
            })
        } else if fee_ratio >= FEE_RATIO_HIGH_WARNING {
            Some(FeeWarning {
                allow_send: true,
                long_message: format!(
                    "The fee for this transaction seems unusually high. ({:.2}% of amount)",
                    fee_ratio * 100.0
                ),
                short_message: String::from("high fee ratio"),
            })
        } else if feerate > FEERATE_WARNING_HIGH_FEE as f64 / 1_000.0 {
            Some(FeeWarning {
                allow_send: true,
                long_message: format!(
                    "The fee for this transaction seems unusually high. (feerate: {feerate:.2} sat/vB)"
                ),
                short_message: String::from("high fee rate"),
            })
        } else {
            None
        }
    }
}

impl ConfigStore for WalletConfig {
    fn set_key(&mut self, key: &str, value: Value, save: bool) {
        self.values.insert(key.to_string(), value);
        if save {
            self.persist();
        }
    }
}
