#![allow(dead_code)]

use anchor_client::solana_sdk::hash::Hash;
use anchor_client::solana_sdk::message::{v0, VersionedMessage};
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_client::solana_sdk::signature::{Keypair, Signature};
use anchor_client::solana_sdk::signer::Signer;
use anchor_client::solana_sdk::system_instruction;
use anchor_client::solana_sdk::transaction::VersionedTransaction;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lp_autopilot::config::{Config, LiquidityConfig, TimingConfig};
use lp_autopilot::discovery::CandidateSource;
use lp_autopilot::liquidity::{ActiveBin, AmmPoolClient, DepositRequest, OwnerPosition, PoolInfo};
use lp_autopilot::oracle::PriceOracle;
use lp_autopilot::swap::{Quote, SwapAggregator, SwapPayload};
use lp_autopilot::types::{AnchorSide, BinRange, Candidate, LiquidityMode, StrategyKind, SOL_MINT};
use lp_autopilot::utils::PendingSet;
use lp_autopilot::wallet::ChainClient;
use lp_autopilot::{LiquidityManager, LpError, MonitorContext, StateStore, SwapManager};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const MINT: &str = "MintX1111111111111111111111111111111111111";
pub const POOL: &str = "Pool11111111111111111111111111111111111111";
pub const MINUTE: i64 = 60 * 1000;
pub const HOUR: i64 = 60 * MINUTE;

struct PendingSwap {
    input: String,
    output: String,
    amount_in: u64,
    amount_out: u64,
}

// 所有假组件共享的链上状态
#[derive(Default)]
pub struct Ledger {
    pub balances: HashMap<(String, String), u64>,
    pub positions: HashMap<String, Vec<OwnerPosition>>,
    pub swaps: Vec<(String, String, u64)>,
    pub deposits: u32,
    pub withdrawals: u32,
    // 提取的代币在这么多次余额查询之后才到账
    pub credit_delay: u32,
    late_credits: Vec<(String, u64, u32)>,
    pending: HashMap<String, PendingSwap>,
    next_position: u32,
}

pub type SharedLedger = Arc<Mutex<Ledger>>;

impl Ledger {
    pub fn balance(&self, owner: &str, mint: &str) -> u64 {
        self.balances.get(&(owner.to_string(), mint.to_string())).copied().unwrap_or(0)
    }

    pub fn set_balance(&mut self, owner: &str, mint: &str, amount: u64) {
        self.balances.insert((owner.to_string(), mint.to_string()), amount);
    }

    pub fn add_position(&mut self, owner: &str, position: OwnerPosition) {
        self.positions.entry(owner.to_string()).or_default().push(position);
    }

    fn credit(&mut self, owner: &str, amount: u64) {
        if self.credit_delay == 0 {
            let total = self.balance(owner, MINT) + amount;
            self.set_balance(owner, MINT, total);
        } else {
            self.late_credits.push((owner.to_string(), amount, self.credit_delay));
        }
    }

    fn settle_late_credits(&mut self) {
        let mut due = vec![];
        for credit in self.late_credits.iter_mut() {
            credit.2 -= 1;
            if credit.2 == 0 {
                due.push((credit.0.clone(), credit.1));
            }
        }
        self.late_credits.retain(|c| c.2 > 0);
        for (owner, amount) in due {
            let total = self.balance(&owner, MINT) + amount;
            self.set_balance(&owner, MINT, total);
        }
    }
}

pub fn position(key: &str, range: BinRange, amount_x: u64) -> OwnerPosition {
    OwnerPosition {
        position: key.to_string(),
        lower_bin_id: range.lower_bin_id,
        upper_bin_id: range.upper_bin_id,
        amount_x,
        ..OwnerPosition::default()
    }
}

pub struct FakeAggregator {
    pub ledger: SharedLedger,
    pub token_out: u64,
    pub quotes: Mutex<u32>,
}

#[async_trait]
impl SwapAggregator for FakeAggregator {
    async fn quote(&self, input: &str, output: &str, amount: u64, _: u16, _: bool) -> Result<Quote> {
        *self.quotes.lock().unwrap() += 1;
        let out = if output == SOL_MINT { amount } else { self.token_out };
        Ok(Quote {
            in_amount: amount,
            out_amount: out,
            raw: json!({"inputMint": input, "outputMint": output, "inAmount": amount, "outAmount": out}),
        })
    }

    async fn build_swap_transaction(&self, quote: &Quote, user: &Pubkey, _: bool) -> Result<SwapPayload> {
        let pending = PendingSwap {
            input: quote.raw["inputMint"].as_str().unwrap_or_default().to_string(),
            output: quote.raw["outputMint"].as_str().unwrap_or_default().to_string(),
            amount_in: quote.in_amount,
            amount_out: quote.out_amount,
        };
        self.ledger.lock().unwrap().pending.insert(user.to_string(), pending);

        let ix = system_instruction::transfer(user, &Pubkey::new_unique(), 1);
        let message = v0::Message::try_compile(user, &[ix], &[], Hash::new_unique())?;
        let tx = VersionedTransaction { signatures: vec![], message: VersionedMessage::V0(message) };
        Ok(SwapPayload {
            swap_transaction: STANDARD.encode(bincode::serialize(&tx)?),
            last_valid_block_height: Some(1_000),
        })
    }
}

pub struct FakeChain {
    pub ledger: SharedLedger,
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn send_and_confirm(&self, tx: &VersionedTransaction, _: Option<u64>) -> Result<Signature> {
        let payer = tx.message.static_account_keys()[0].to_string();
        let mut ledger = self.ledger.lock().unwrap();
        let swap = ledger.pending.remove(&payer).ok_or_else(|| anyhow!("没有待执行的兑换"))?;
        if swap.input != SOL_MINT {
            let left = ledger.balance(&payer, &swap.input).saturating_sub(swap.amount_in);
            ledger.set_balance(&payer, &swap.input, left);
        }
        if swap.output != SOL_MINT {
            let total = ledger.balance(&payer, &swap.output) + swap.amount_out;
            ledger.set_balance(&payer, &swap.output, total);
        }
        ledger.swaps.push((swap.input, swap.output, swap.amount_in));
        Ok(Signature::new_unique())
    }

    async fn token_balance(&self, owner: &Pubkey, mint: &str) -> Result<u64> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.settle_late_credits();
        Ok(ledger.balance(&owner.to_string(), mint))
    }

    async fn sol_balance(&self, _: &Pubkey) -> Result<u64> {
        Ok(1_000_000_000)
    }

    async fn unwrap_wsol(&self, _: &Keypair) -> Result<Option<Signature>> {
        Ok(None)
    }
}

pub struct FakePool {
    pub ledger: SharedLedger,
    pub active_bin: Mutex<i32>,
    pub missing_bin: bool,
    pub create_position: bool,
    pub fail_deposit: bool,
    pub fail_withdraw: bool,
}

impl FakePool {
    pub fn new(ledger: SharedLedger) -> Self {
        Self {
            ledger,
            active_bin: Mutex::new(0),
            missing_bin: false,
            create_position: true,
            fail_deposit: false,
            fail_withdraw: false,
        }
    }

    pub fn set_active_bin(&self, bin_id: i32) {
        *self.active_bin.lock().unwrap() = bin_id;
    }
}

#[async_trait]
impl AmmPoolClient for FakePool {
    async fn pool_info(&self, pool: &str) -> Result<PoolInfo> {
        Ok(PoolInfo {
            address: pool.to_string(),
            mint_x: MINT.to_string(),
            mint_y: SOL_MINT.to_string(),
            bin_step: 100,
            decimals_x: 6,
            decimals_y: 9,
        })
    }

    async fn get_active_bin(&self, _: &str) -> Result<ActiveBin> {
        Ok(ActiveBin { bin_id: *self.active_bin.lock().unwrap(), price: 1.0 })
    }

    // 以X为锚定时 Y 取一半
    async fn compute_counter_amount(&self, _: &str, _: i32, _: BinRange, amount: u64, anchor: AnchorSide, _: StrategyKind) -> Result<u64> {
        match anchor {
            AnchorSide::X => Ok(amount / 2),
            AnchorSide::Y => Err(anyhow!("只支持以X为锚定")),
        }
    }

    async fn deposit_liquidity(&self, owner: &Keypair, request: &DepositRequest) -> Result<Signature> {
        let owner = owner.pubkey().to_string();
        let mut ledger = self.ledger.lock().unwrap();
        ledger.deposits += 1;
        if self.fail_deposit {
            return Err(LpError::ExecutionRejected("custom program error: 0x1774".into()).into());
        }
        if self.create_position {
            let left = ledger.balance(&owner, MINT).saturating_sub(request.amount_x);
            ledger.set_balance(&owner, MINT, left);
            ledger.next_position += 1;
            let key = format!("pos{}", ledger.next_position);
            let mut created = position(&key, request.range, request.amount_x);
            created.amount_y = request.amount_y;
            ledger.add_position(&owner, created);
        }
        Ok(Signature::new_unique())
    }

    async fn withdraw_liquidity(&self, owner: &Keypair, _: &str, key: &str) -> Result<Vec<Signature>> {
        let owner = owner.pubkey().to_string();
        let mut ledger = self.ledger.lock().unwrap();
        ledger.withdrawals += 1;
        if self.fail_withdraw {
            return Err(LpError::ExecutionRejected("custom program error: 0x1771".into()).into());
        }
        let positions = ledger.positions.entry(owner.clone()).or_default();
        let index = positions
            .iter()
            .position(|p| p.position == key)
            .ok_or_else(|| anyhow!("仓位不存在"))?;
        let removed = positions.remove(index);
        ledger.credit(&owner, removed.amount_x + removed.fee_x);
        Ok(vec![Signature::new_unique()])
    }

    async fn list_owner_positions(&self, _: &str, owner: &Pubkey) -> Result<Vec<OwnerPosition>> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger.positions.get(&owner.to_string()).cloned().unwrap_or_default())
    }

    async fn list_initialized_bins(&self, _: &str, range: BinRange) -> Result<Vec<i32>> {
        let mut bins: Vec<i32> = (range.lower_bin_id..=range.upper_bin_id).collect();
        if self.missing_bin {
            bins.pop();
        }
        Ok(bins)
    }
}

pub struct FakeOracle {
    pub prices: Mutex<HashMap<String, f64>>,
}

impl FakeOracle {
    pub fn new(price_x: f64) -> Self {
        let prices = HashMap::from([(MINT.to_string(), price_x), (SOL_MINT.to_string(), 150.0)]);
        Self { prices: Mutex::new(prices) }
    }

    pub fn set_price(&self, mint: &str, price: f64) {
        self.prices.lock().unwrap().insert(mint.to_string(), price);
    }
}

#[async_trait]
impl PriceOracle for FakeOracle {
    async fn price_of(&self, mints: &[String]) -> Result<HashMap<String, f64>> {
        let prices = self.prices.lock().unwrap();
        Ok(mints
            .iter()
            .filter_map(|m| prices.get(m).map(|p| (m.clone(), *p)))
            .collect())
    }
}

pub struct FakeSource {
    pub candidates: Vec<Candidate>,
}

#[async_trait]
impl CandidateSource for FakeSource {
    async fn fetch_candidates(&self) -> Result<Vec<Candidate>> {
        Ok(self.candidates.clone())
    }

    async fn resolve_pool(&self, _: &Candidate) -> Result<Option<String>> {
        Ok(Some(POOL.to_string()))
    }
}

pub fn candidate() -> Candidate {
    Candidate {
        mint: MINT.to_string(),
        symbol: "MINTX".to_string(),
        score: 90.0,
        pool_address: None,
    }
}

// 单边X、零等待
pub fn test_config() -> Config {
    Config {
        timing: TimingConfig::immediate(),
        liquidity: LiquidityConfig {
            mode: LiquidityMode::OneSided,
            anchor: AnchorSide::X,
            ..LiquidityConfig::default()
        },
        ..Config::default()
    }
}

pub struct Harness {
    pub ledger: SharedLedger,
    pub pool: Arc<FakePool>,
    pub aggregator: Arc<FakeAggregator>,
    pub oracle: Arc<FakeOracle>,
    pub ctx: Arc<MonitorContext>,
}

pub fn harness(dir: &Path, config: Config, pool: FakePool, ledger: SharedLedger, oracle: FakeOracle) -> Harness {
    let config = Arc::new(config);
    let pool = Arc::new(pool);
    let oracle = Arc::new(oracle);
    let aggregator = Arc::new(FakeAggregator {
        ledger: ledger.clone(),
        token_out: 50_000,
        quotes: Mutex::new(0),
    });
    let chain = Arc::new(FakeChain { ledger: ledger.clone() });

    let ctx = Arc::new(MonitorContext {
        config: config.clone(),
        store: Arc::new(StateStore::open(dir).unwrap()),
        liquidity: Arc::new(LiquidityManager::new(pool.clone(), &config)),
        swaps: Arc::new(SwapManager::new(aggregator.clone(), chain, &config.timing, 100)),
        oracle: oracle.clone(),
        pending_exits: PendingSet::new(),
    });

    Harness { ledger, pool, aggregator, oracle, ctx }
}
