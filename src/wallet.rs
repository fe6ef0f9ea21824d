use std::collections::HashSet;

use bdk_coin_select::{
    metrics::LowestFee, Candidate, ChangePolicy, CoinSelector, DrainWeights, FeeRate,
    InsufficientFunds, Replace, Target, TargetFee, TargetOutputs,
};
use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::Hash;
use bitcoin::{ Address, Amount, Network, OutPoint, Txid };
use tracing::{ debug, info };

use crate::draft::{ DraftOutput, PaymentAmount, PaymentOutput, TransactionDraft };
use crate::error::BuildError;
use crate::{ SEGWIT_V1_TXIN_VBYTES, SEGWIT_V1_TXOUT_VBYTES, TX_OVERHEAD_VBYTES };

/// Output value below which no output gets created.
pub const DUST_LIMIT_SATS: u64 = 546;

/// Long-term feerate (sat/vB) used for change-policy considerations.
pub const LONG_TERM_FEERATE_VB: f32 = 10.0;

const BNB_MAX_ROUNDS: usize = 100_000;
const WITNESS_SCALE: usize = 4;

/// A spendable wallet coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub amount: Amount,
}

/// Supplies the coins eligible for spending. `filter` narrows the set to
/// specific outpoints (coin control); `None` means the full eligible set.
pub trait CoinSource {
    fn spendable_coins(&self, filter: Option<&[OutPoint]>) -> Vec<Coin>;
}

/// Assembles an unsigned transaction candidate.
///
/// `fee` requests a minimum absolute fee: a single-output sweep pays
/// exactly that, a fixed-amount payment treats it as a floor the
/// selection must reach and may pay more when change considerations
/// require it. When `None` the fee is derived from `fee_rate_per_kvb`
/// and the candidate's size. `rbf` is propagated as a transaction-level
/// signaling flag.
pub trait TxConstructor {
    fn build_unsigned(
        &self,
        coins: &[Coin],
        outputs: &[PaymentOutput],
        fee: Option<Amount>,
        fee_rate_per_kvb: u64,
        rbf: bool,
    ) -> Result<TransactionDraft, BuildError>;
}

/// Where a confirmed draft is handed off for signing and broadcast.
pub trait TxSink {
    fn sign_and_broadcast(&mut self, draft: &TransactionDraft);
}

/// In-memory wallet backend: a UTXO set, an ownership oracle and a
/// broadcast log. Selection runs branch-and-bound on the lowest-fee
/// metric and falls back to taking candidates by descending value until
/// the target is met.
#[derive(Debug)]
pub struct MemoryWallet {
    network: Network,
    utxos: Vec<Coin>,
    own_addresses: HashSet<String>,
    change_address: Option<String>,
    dust_limit: u64,
    broadcast: Vec<TransactionDraft>,
}

impl MemoryWallet {
    pub fn new(network: Network) -> Self {
        MemoryWallet {
            network,
            utxos: Vec::new(),
            own_addresses: HashSet::new(),
            change_address: None,
            dust_limit: DUST_LIMIT_SATS,
            broadcast: Vec::new(),
        }
    }

    /// Add a coin with a synthesized outpoint.
    pub fn fund(&mut self, amount: Amount) {
        let outpoint = OutPoint::new(Txid::all_zeros(), self.utxos.len() as u32);
        self.utxos.push(Coin { outpoint, amount });
    }

    pub fn add_own_address(&mut self, address: impl Into<String>) {
        self.own_addresses.insert(address.into());
    }

    pub fn set_change_address(&mut self, address: impl Into<String>) {
        let address = address.into();
        self.own_addresses.insert(address.clone());
        self.change_address = Some(address);
    }

    pub fn set_dust_limit(&mut self, dust_limit: u64) {
        self.dust_limit = dust_limit;
    }

    pub fn balance(&self) -> Amount {
        self.utxos
            .iter()
            .fold(Amount::ZERO, |sum, coin| sum + coin.amount)
    }

    /// Drafts handed off through [`TxSink::sign_and_broadcast`].
    pub fn broadcasts(&self) -> &[TransactionDraft] {
        &self.broadcast
    }

    fn is_mine(&self, address: &str) -> bool {
        self.own_addresses.contains(address)
    }

    fn check_address(&self, address: &str) -> Result<String, BuildError> {
        let parsed = address
            .parse::<Address<NetworkUnchecked>>()
            .map_err(|err| BuildError::InvalidAddress(err.to_string()))?;
        let checked = parsed
            .require_network(self.network)
            .map_err(|err| BuildError::InvalidAddress(err.to_string()))?;
        Ok(checked.to_string())
    }

    fn estimated_size(inputs: usize, outputs: usize) -> usize {
        TX_OVERHEAD_VBYTES + inputs * SEGWIT_V1_TXIN_VBYTES + outputs * SEGWIT_V1_TXOUT_VBYTES
    }

    /// Spend every coin into a single output, fee deducted from it.
    fn build_sweep(
        &self,
        coins: &[Coin],
        address: &str,
        fee: Option<Amount>,
        fee_rate_per_kvb: u64,
        rbf: bool,
    ) -> Result<TransactionDraft, BuildError> {
        if coins.is_empty() {
            return Err(BuildError::InsufficientFunds { missing: self.dust_limit });
        }
        let estimated_size = Self::estimated_size(coins.len(), 1);
        let fee = fee
            .map(|f| f.to_sat())
            .unwrap_or((estimated_size as u64 * fee_rate_per_kvb + 999) / 1_000);
        let total: u64 = coins.iter().map(|coin| coin.amount.to_sat()).sum();
        let value = total.saturating_sub(fee);
        if value < self.dust_limit {
            return Err(BuildError::InsufficientFunds {
                missing: (fee + self.dust_limit).saturating_sub(total),
            });
        }
        Ok(TransactionDraft {
            inputs_count: coins.len(),
            outputs: vec![DraftOutput {
                address: address.to_string(),
                value: Amount::from_sat(value),
                is_mine: self.is_mine(address),
            }],
            fee: Amount::from_sat(fee),
            estimated_size,
            rbf,
        })
    }

    fn build_payment(
        &self,
        coins: &[Coin],
        address: &str,
        amount: Amount,
        fee: Option<Amount>,
        fee_rate_per_kvb: u64,
        rbf: bool,
    ) -> Result<TransactionDraft, BuildError> {
        if amount.to_sat() < self.dust_limit {
            return Err(BuildError::DustOutput {
                value: amount,
                dust_limit: Amount::from_sat(self.dust_limit),
            });
        }

        let candidates: Vec<Candidate> = coins
            .iter()
            .map(|coin| Candidate {
                input_count: 1,
                value: coin.amount.to_sat(),
                weight: (SEGWIT_V1_TXIN_VBYTES * WITNESS_SCALE) as u32,
                is_segwit: true,
            })
            .collect();
        let mut selector = CoinSelector::new(&candidates);

        let target = Target {
            fee: TargetFee {
                rate: FeeRate::from_sat_per_vb(fee_rate_per_kvb as f32 / 1_000.0),
                replace: fee.map(|f| Replace {
                    fee: f.to_sat(),
                    incremental_relay_feerate: FeeRate::ZERO,
                }),
            },
            outputs: TargetOutputs {
                value_sum: amount.to_sat(),
                weight_sum: (SEGWIT_V1_TXOUT_VBYTES * WITNESS_SCALE) as u32,
                n_outputs: 1,
            },
        };
        let long_term_feerate = FeeRate::from_sat_per_vb(LONG_TERM_FEERATE_VB);
        let drain_weights = DrainWeights {
            output_weight: (SEGWIT_V1_TXOUT_VBYTES * WITNESS_SCALE) as u32,
            spend_weight: (SEGWIT_V1_TXIN_VBYTES * WITNESS_SCALE) as u32,
            n_outputs: 1,
        };
        let change_policy = ChangePolicy::min_value_and_waste(
            drain_weights,
            self.dust_limit,
            target.fee.rate,
            long_term_feerate,
        );

        let metric = LowestFee {
            target,
            long_term_feerate,
            change_policy,
        };
        if let Err(err) = selector.run_bnb(metric, BNB_MAX_ROUNDS) {
            debug!(%err, "bnb found no solution, selecting by descending value");
            selector.sort_candidates_by_descending_value_pwu();
            loop {
                let drain = selector.drain(target, change_policy);
                if selector.is_target_met_with_drain(target, drain) {
                    break;
                }
                if !selector.select_next() {
                    let missing = selector.excess(target, drain).unsigned_abs();
                    return Err(InsufficientFunds { missing }.into());
                }
            }
        }

        let drain = selector.drain(target, change_policy);
        let inputs_count = selector.selected_indices().len();
        let fee_paid = selector
            .selected_value()
            .saturating_sub(amount.to_sat())
            .saturating_sub(drain.value);

        let mut outputs = vec![DraftOutput {
            address: address.to_string(),
            value: amount,
            is_mine: self.is_mine(address),
        }];
        if drain.is_some() {
            outputs.push(DraftOutput {
                address: self.change_address.clone().unwrap_or_default(),
                value: Amount::from_sat(drain.value),
                is_mine: true,
            });
        }
        let estimated_size = Self::estimated_size(inputs_count, outputs.len());

        Ok(TransactionDraft {
            inputs_count,
            outputs,
            fee: Amount::from_sat(fee_paid),
            estimated_size,
            rbf,
        })
    }
}

impl CoinSource for MemoryWallet {
    fn spendable_coins(&self, filter: Option<&[OutPoint]>) -> Vec<Coin> {
        match filter {
            None => self.utxos.clone(),
            Some(outpoints) => self
                .utxos
                .iter()
                .filter(|coin| outpoints.contains(&coin.outpoint))
                .copied()
                .collect(),
        }
    }
}

impl TxConstructor for MemoryWallet {
    fn build_unsigned(
        &self,
        coins: &[Coin],
        outputs: &[PaymentOutput],
        fee: Option<Amount>,
        fee_rate_per_kvb: u64,
        rbf: bool,
    ) -> Result<TransactionDraft, BuildError> {
        let payment = match outputs {
            [payment] => payment,
            _ => {
                return Err(BuildError::Construction(String::from(
                    "expected exactly one recipient output",
                )))
            }
        };
        let address = self.check_address(&payment.address)?;
        match payment.value {
            PaymentAmount::Max => self.build_sweep(coins, &address, fee, fee_rate_per_kvb, rbf),
            PaymentAmount::Sats(amount) => {
                self.build_payment(coins, &address, amount, fee, fee_rate_per_kvb, rbf)
            }
        }
    }
}

impl TxSink for MemoryWallet {
    fn sign_and_broadcast(&mut self, draft: &TransactionDraft) {
        info!(
            fee = draft.fee.to_sat(),
            inputs = draft.inputs_count,
            outputs = draft.outputs.len(),
            "handing draft off for signing and broadcast"
        );
        self.broadcast.push(draft.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP-173 test vector, valid mainnet P2WPKH
    const DEST: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
    const CHANGE: &str = "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3";

    fn wallet_with_coins(values: &[u64]) -> MemoryWallet {
        let mut wallet = MemoryWallet::new(Network::Bitcoin);
        wallet.set_change_address(CHANGE);
        for value in values {
            wallet.fund(Amount::from_sat(*value));
        }
        wallet
    }

    fn pay(value: u64) -> Vec<PaymentOutput> {
        vec![PaymentOutput {
            address: DEST.to_string(),
            value: PaymentAmount::Sats(Amount::from_sat(value)),
        }]
    }

    #[test]
    fn spendable_coins_unfiltered_returns_everything() {
        let wallet = wallet_with_coins(&[100_000, 200_000]);
        assert_eq!(wallet.spendable_coins(None).len(), 2);
    }

    #[test]
    fn spendable_coins_filter_narrows() {
        let wallet = wallet_with_coins(&[100_000, 200_000]);
        let keep = [wallet.utxos[1].outpoint];
        let coins = wallet.spendable_coins(Some(&keep));
        assert_eq!(coins.len(), 1);
        assert_eq!(coins[0].amount, Amount::from_sat(200_000));
    }

    #[test]
    fn payment_covers_amount_and_fee() {
        let wallet = wallet_with_coins(&[1_000_000]);
        let coins = wallet.spendable_coins(None);
        let draft = wallet
            .build_unsigned(&coins, &pay(100_000), None, 10_000, true)
            .expect("funds are ample");
        assert!(draft.rbf);
        assert_eq!(draft.outputs[0].value, Amount::from_sat(100_000));
        assert!(!draft.outputs[0].is_mine);
        assert!(draft.fee > Amount::ZERO);
        // all value is accounted for
        let consumed = draft.output_value() + draft.fee;
        assert_eq!(consumed, Amount::from_sat(1_000_000));
    }

    #[test]
    fn change_output_goes_back_to_the_wallet() {
        let wallet = wallet_with_coins(&[1_000_000]);
        let coins = wallet.spendable_coins(None);
        let draft = wallet
            .build_unsigned(&coins, &pay(100_000), None, 10_000, false)
            .expect("funds are ample");
        assert_eq!(draft.outputs.len(), 2);
        assert_eq!(draft.outputs[1].address, CHANGE);
        assert!(draft.outputs[1].is_mine);
    }

    #[test]
    fn insufficient_funds_is_classified() {
        let wallet = wallet_with_coins(&[50_000]);
        let coins = wallet.spendable_coins(None);
        let err = wallet
            .build_unsigned(&coins, &pay(100_000), None, 10_000, false)
            .unwrap_err();
        assert!(matches!(err, BuildError::InsufficientFunds { .. }));
    }

    #[test]
    fn dust_output_is_rejected() {
        let wallet = wallet_with_coins(&[50_000]);
        let coins = wallet.spendable_coins(None);
        let err = wallet
            .build_unsigned(&coins, &pay(100), None, 10_000, false)
            .unwrap_err();
        assert!(matches!(err, BuildError::DustOutput { .. }));
    }

    #[test]
    fn raised_dust_limit_rejects_small_outputs() {
        let mut wallet = wallet_with_coins(&[1_000_000]);
        let coins = wallet.spendable_coins(None);
        // clears the default floor
        wallet
            .build_unsigned(&coins, &pay(1_000), None, 10_000, false)
            .expect("1000 sat is above the default dust limit");

        wallet.set_dust_limit(5_000);
        let err = wallet
            .build_unsigned(&coins, &pay(1_000), None, 10_000, false)
            .unwrap_err();
        assert!(matches!(err, BuildError::DustOutput { .. }));
    }

    #[test]
    fn malformed_address_is_rejected() {
        let wallet = wallet_with_coins(&[50_000]);
        let coins = wallet.spendable_coins(None);
        let outputs = vec![PaymentOutput {
            address: String::from("not-an-address"),
            value: PaymentAmount::Sats(Amount::from_sat(10_000)),
        }];
        let err = wallet
            .build_unsigned(&coins, &outputs, None, 10_000, false)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidAddress(_)));
    }

    #[test]
    fn wrong_network_address_is_rejected() {
        let mut wallet = MemoryWallet::new(Network::Testnet);
        wallet.fund(Amount::from_sat(50_000));
        let coins = wallet.spendable_coins(None);
        let err = wallet
            .build_unsigned(&coins, &pay(10_000), None, 10_000, false)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidAddress(_)));
    }

    #[test]
    fn sweep_consumes_all_coins() {
        let wallet = wallet_with_coins(&[300_000, 700_000]);
        let coins = wallet.spendable_coins(None);
        let outputs = vec![PaymentOutput {
            address: DEST.to_string(),
            value: PaymentAmount::Max,
        }];
        let draft = wallet
            .build_unsigned(&coins, &outputs, None, 10_000, false)
            .expect("funds are ample");
        assert_eq!(draft.inputs_count, 2);
        assert_eq!(draft.outputs.len(), 1);
        // overhead 11 + 2 inputs * 68 + 1 output * 31 = 178 vb at 10 sat/vb
        assert_eq!(draft.estimated_size, 178);
        assert_eq!(draft.fee, Amount::from_sat(1_780));
        assert_eq!(draft.outputs[0].value, Amount::from_sat(998_220));
        assert_eq!(draft.output_value() + draft.fee, wallet.balance());
    }

    #[test]
    fn sweep_of_nothing_is_insufficient() {
        let wallet = wallet_with_coins(&[]);
        let outputs = vec![PaymentOutput {
            address: DEST.to_string(),
            value: PaymentAmount::Max,
        }];
        let err = wallet
            .build_unsigned(&[], &outputs, None, 10_000, false)
            .unwrap_err();
        assert!(matches!(err, BuildError::InsufficientFunds { .. }));
    }

    #[test]
    fn fixed_fee_overrides_the_rate_for_sweeps() {
        let wallet = wallet_with_coins(&[1_000_000]);
        let coins = wallet.spendable_coins(None);
        let outputs = vec![PaymentOutput {
            address: DEST.to_string(),
            value: PaymentAmount::Max,
        }];
        let draft = wallet
            .build_unsigned(&coins, &outputs, Some(Amount::from_sat(1_000)), 10_000, false)
            .expect("funds are ample");
        assert_eq!(draft.fee, Amount::from_sat(1_000));
        assert_eq!(draft.outputs[0].value, Amount::from_sat(999_000));
    }

    #[test]
    fn fixed_fee_is_a_floor_for_payments() {
        let wallet = wallet_with_coins(&[1_000_000]);
        let coins = wallet.spendable_coins(None);
        // 1 sat/vB alone would come to well under 10k sat
        let draft = wallet
            .build_unsigned(&coins, &pay(100_000), Some(Amount::from_sat(10_000)), 1_000, false)
            .expect("funds are ample");
        assert!(draft.fee >= Amount::from_sat(10_000), "fee was {}", draft.fee);
    }

    #[test]
    fn broadcast_log_records_handoffs() {
        let mut wallet = wallet_with_coins(&[1_000_000]);
        let coins = wallet.spendable_coins(None);
        let draft = wallet
            .build_unsigned(&coins, &pay(100_000), None, 10_000, false)
            .expect("funds are ample");
        wallet.sign_and_broadcast(&draft);
        assert_eq!(wallet.broadcasts().len(), 1);
    }
}
