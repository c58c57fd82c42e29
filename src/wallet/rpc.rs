use crate::error::LpError;
use crate::wallet::balance::{get_sol_balance, get_token_balance_native};
use anchor_client::solana_sdk::commitment_config::CommitmentConfig;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_client::solana_sdk::signature::{Keypair, Signature};
use anchor_client::solana_sdk::signer::Signer;
use anchor_client::solana_sdk::transaction::{Transaction, VersionedTransaction};
use anchor_spl::associated_token::get_associated_token_address;
use anchor_spl::token::spl_token;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_transaction_status::TransactionStatus;
use std::time::Duration;
use tokio::time::sleep;

// 一个blockhash大约在150个区块后过期
const BLOCKHASH_VALIDITY: u64 = 150;
const CONFIRM_POLL_MS: u64 = 1_000;
const MAX_CONFIRM_POLLS: u32 = 90;

/// 链上读写的最小接口，便于测试时替换
#[async_trait]
pub trait ChainClient: Send + Sync {
    // 发送已签名交易，确认前出现链上错误返回 ExecutionRejected
    async fn send_and_confirm(
        &self,
        tx: &VersionedTransaction,
        last_valid_block_height: Option<u64>,
    ) -> Result<Signature>;

    async fn token_balance(&self, owner: &Pubkey, mint: &str) -> Result<u64>;

    async fn sol_balance(&self, owner: &Pubkey) -> Result<u64>;

    // 关闭WSOL账户取回SOL，没有WSOL时返回None
    async fn unwrap_wsol(&self, owner: &Keypair) -> Result<Option<Signature>>;
}

pub struct RpcChain {
    pub client: RpcClient,
}

impl RpcChain {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            client: RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed()),
        }
    }
}

// Some(Ok) 已确认，Some(Err) 链上失败，None 尚未确认
pub fn classify_status(status: &TransactionStatus) -> Option<Result<()>> {
    if let Some(err) = &status.err {
        return Some(Err(LpError::ExecutionRejected(format!("{:?}", err)).into()));
    }
    if status.satisfies_commitment(CommitmentConfig::confirmed()) {
        return Some(Ok(()));
    }
    None
}

#[async_trait]
impl ChainClient for RpcChain {
    async fn send_and_confirm(
        &self,
        tx: &VersionedTransaction,
        last_valid_block_height: Option<u64>,
    ) -> Result<Signature> {
        let last_valid = match last_valid_block_height {
            Some(height) => height,
            None => self.client.get_block_height().await? + BLOCKHASH_VALIDITY,
        };

        let signature = self
            .client
            .send_transaction(tx)
            .await
            .map_err(|e| LpError::ExecutionRejected(format!("发送交易失败: {}", e)))?;
        debug!("交易已发送: {}", signature);

        for _ in 0..MAX_CONFIRM_POLLS {
            let statuses = self.client.get_signature_statuses(&[signature]).await?.value;
            if let Some(Some(status)) = statuses.first() {
                if let Some(outcome) = classify_status(status) {
                    return outcome.map(|_| signature);
                }
            }

            let height = self.client.get_block_height().await?;
            if height > last_valid {
                return Err(LpError::ExecutionRejected(format!(
                    "交易 {} 在区块高度 {} 前未确认",
                    signature, last_valid
                ))
                .into());
            }
            sleep(Duration::from_millis(CONFIRM_POLL_MS)).await;
        }

        Err(LpError::TransientNetwork(format!("交易 {} 确认超时", signature)).into())
    }

    async fn token_balance(&self, owner: &Pubkey, mint: &str) -> Result<u64> {
        get_token_balance_native(&self.client, owner, mint).await
    }

    async fn sol_balance(&self, owner: &Pubkey) -> Result<u64> {
        get_sol_balance(&self.client, owner).await
    }

    async fn unwrap_wsol(&self, owner: &Keypair) -> Result<Option<Signature>> {
        let owner_pk = owner.pubkey();
        let ata = get_associated_token_address(&owner_pk, &spl_token::native_mint::id());

        let amount = match self.client.get_token_account_balance(&ata).await {
            Ok(balance) => balance.amount.parse::<u64>().unwrap_or(0),
            Err(_) => return Ok(None),
        };
        if amount == 0 {
            return Ok(None);
        }

        let ix = spl_token::instruction::close_account(&spl_token::id(), &ata, &owner_pk, &owner_pk, &[])?;
        let blockhash = self.client.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(&[ix], Some(&owner_pk), &[owner], blockhash);
        let signature = self
            .client
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| LpError::ExecutionRejected(format!("关闭WSOL账户失败: {}", e)))?;

        info!("💧 已解包 {} lamports WSOL: {}", amount, signature);
        Ok(Some(signature))
    }
}
