use crate::types::SOL_MINT;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_spl::associated_token::get_associated_token_address;
use anyhow::Result;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::TokenAccountsFilter;
use std::str::FromStr;

pub async fn get_sol_balance(client: &RpcClient, pubkey: &Pubkey) -> Result<u64> {
    Ok(client.get_balance(pubkey).await?)
}

// 代币原始数量；SOL返回lamports
pub async fn get_token_balance_native(
    client: &RpcClient,
    owner: &Pubkey,
    mint: &str,
) -> Result<u64> {
    if mint == SOL_MINT {
        return get_sol_balance(client, owner).await;
    }

    let mint_pk = Pubkey::from_str(mint)?;
    let ata = get_associated_token_address(owner, &mint_pk);
    if let Ok(amount) = client.get_token_account_balance(&ata).await {
        return parse_amount(&amount.amount);
    }

    // ATA不存在或是Token-2022账户时，取该代币所有账户中的最大值
    let accounts = client
        .get_token_accounts_by_owner(owner, TokenAccountsFilter::Mint(mint_pk))
        .await?;
    let mut max_balance = 0u64;
    for keyed in accounts {
        let account = Pubkey::from_str(&keyed.pubkey)?;
        if let Ok(amount) = client.get_token_account_balance(&account).await {
            max_balance = max_balance.max(parse_amount(&amount.amount)?);
        }
    }
    Ok(max_balance)
}

fn parse_amount(amount: &str) -> Result<u64> {
    amount
        .parse::<u64>()
        .map_err(|_| anyhow::anyhow!("无法解析代币数量: {}", amount))
}
