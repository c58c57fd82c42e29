use anchor_client::solana_sdk::signature::Keypair;
use anyhow::*;
use solana_sdk::signature::read_keypair_file;
use solana_sdk::signer::keypair::keypair_from_seed as keypair_from_seed_bytes;
use std::fs;
use std::path::Path;
use bs58;
use hmac::Hmac;
use sha2::Sha512;
use pbkdf2::pbkdf2;

// 从助记词派生钱包（PBKDF2-HMAC-SHA512，非BIP44路径）
pub fn keypair_from_seed(seed_phrase: &str) -> Result<Keypair> {
    let mut seed = [0u8; 64];
    let salt = b"mnemonic";

    pbkdf2::<Hmac<Sha512>>(
        seed_phrase.as_bytes(),
        salt,
        2048,
        &mut seed,
    );

    // 取前32字节作为ed25519种子
    keypair_from_seed_bytes(&seed[..32])
        .map_err(|e| anyhow!("从种子创建密钥对失败: {}", e))
}

// 从Base58私钥创建钱包
pub fn keypair_from_base58(base58_str: &str) -> Result<Keypair> {
    let bytes = bs58::decode(base58_str.trim())
        .into_vec()
        .map_err(|_| anyhow!("无效的Base58字符串"))?;

    Keypair::from_bytes(&bytes)
        .map_err(|_| anyhow!("无效的密钥对字节"))
}

// 单个条目可以是Base58私钥、密钥文件路径或助记词
pub fn read_wallet(entry: &str) -> Result<Keypair> {
    if let std::result::Result::Ok(keypair) = keypair_from_base58(entry) {
        return Ok(keypair);
    }

    let expanded = shellexpand::tilde(entry);
    let path = Path::new(expanded.as_ref());
    if path.is_file() {
        return read_keypair_file(path)
            .map_err(|_| anyhow!(format!("无法读取钱包文件: {}", path.display())));
    }

    if entry.split_whitespace().count() >= 12 {
        return keypair_from_seed(entry);
    }

    Err(anyhow!("无法识别的钱包条目"))
}

// 读取钱包列表文件（JSON字符串数组）
pub fn read_roster(path: &str) -> Result<Vec<Keypair>> {
    let expanded = shellexpand::tilde(path);
    let raw = fs::read_to_string(expanded.as_ref())
        .with_context(|| format!("无法读取钱包列表: {}", path))?;
    let entries: Vec<String> = serde_json::from_str(&raw)
        .with_context(|| format!("钱包列表格式错误: {}", path))?;

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| read_wallet(entry).with_context(|| format!("第{}个钱包无效", i + 1)))
        .collect()
}
