use super::*;
use std::fs;

#[test]
fn test_keypair_from_seed() {
    // 使用简单的测试种子
    let seed = "test wallet seed phrase for development only";
    let first = keypair_from_seed(seed).unwrap();
    let second = keypair_from_seed(seed).unwrap();
    assert_eq!(first.pubkey(), second.pubkey());
}

#[test]
fn test_base58_round_trip() {
    let keypair = Keypair::new();
    let encoded = keypair.to_base58_string();
    let decoded = keypair_from_base58(&encoded).unwrap();
    assert_eq!(decoded.pubkey(), keypair.pubkey());
}

#[test]
fn test_roster_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wallets.json");
    let a = Keypair::new();
    let b = Keypair::new();
    fs::write(
        &path,
        serde_json::to_string(&vec![a.to_base58_string(), b.to_base58_string()]).unwrap(),
    )
    .unwrap();

    let manager = WalletManager::load(path.to_str().unwrap()).unwrap();
    assert_eq!(manager.len(), 2);
    assert_eq!(manager.addresses(), vec![a.pubkey().to_string(), b.pubkey().to_string()]);
}

#[test]
fn test_roster_rejects_bad_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wallets.json");
    fs::write(&path, r#"["not-a-key"]"#).unwrap();
    assert!(WalletManager::load(path.to_str().unwrap()).is_err());
}

#[test]
fn test_empty_roster_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wallets.json");
    fs::write(&path, "[]").unwrap();
    assert!(WalletManager::load(path.to_str().unwrap()).is_err());
}
