use crate::error::LpError;
use anchor_client::solana_sdk::signature::Keypair;
use anchor_client::solana_sdk::signer::Signer;
use anchor_client::solana_sdk::transaction::VersionedTransaction;
use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// base64编码的序列化交易
pub fn decode_transaction(encoded: &str) -> Result<VersionedTransaction> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| LpError::InvariantViolation(format!("交易载荷不是有效的base64: {}", e)))?;
    let tx: VersionedTransaction = bincode::deserialize(&bytes)
        .map_err(|e| LpError::InvariantViolation(format!("交易载荷反序列化失败: {}", e)))?;
    Ok(tx)
}

// 用本地密钥签名外部构建的交易，签名放在该账户在静态账户列表中的位置
pub fn sign_transaction(mut tx: VersionedTransaction, signer: &Keypair) -> Result<VersionedTransaction> {
    let required = tx.message.header().num_required_signatures as usize;
    let index = tx
        .message
        .static_account_keys()
        .iter()
        .take(required)
        .position(|key| *key == signer.pubkey())
        .ok_or_else(|| LpError::InvariantViolation(format!("交易不需要钱包 {} 签名", signer.pubkey())))?;

    if tx.signatures.len() < required {
        tx.signatures.resize(required, Default::default());
    }
    tx.signatures[index] = signer.sign_message(&tx.message.serialize());
    Ok(tx)
}

// 同一个key同时只允许一个操作，守卫释放时自动移除
#[derive(Clone, Default)]
pub struct PendingSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

pub struct PendingGuard {
    inner: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    // 已经有进行中的操作时返回None
    pub fn try_acquire(&self, key: &str) -> Option<PendingGuard> {
        let mut set = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(key.to_string()) {
            return None;
        }
        Some(PendingGuard {
            inner: self.inner.clone(),
            key: key.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(key)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut set = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_client::solana_sdk::hash::Hash;
    use anchor_client::solana_sdk::message::{v0, VersionedMessage};
    use anchor_client::solana_sdk::pubkey::Pubkey;
    use anchor_client::solana_sdk::system_instruction;

    #[test]
    fn test_pending_guard_blocks_second_caller() {
        let set = PendingSet::new();
        let guard = set.try_acquire("pos1").unwrap();
        assert!(set.try_acquire("pos1").is_none());
        assert!(set.try_acquire("pos2").is_some());
        drop(guard);
        assert!(!set.contains("pos1"));
        assert!(set.try_acquire("pos1").is_some());
    }

    #[test]
    fn test_sign_places_signature_at_payer_index() {
        let payer = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let message = v0::Message::try_compile(&payer.pubkey(), &[ix], &[], Hash::default()).unwrap();
        let unsigned = VersionedTransaction {
            signatures: vec![],
            message: VersionedMessage::V0(message),
        };

        let encoded = STANDARD.encode(bincode::serialize(&unsigned).unwrap());
        let decoded = decode_transaction(&encoded).unwrap();
        let signed = sign_transaction(decoded, &payer).unwrap();
        assert_eq!(signed.signatures.len(), 1);
        assert!(signed.signatures[0].verify(payer.pubkey().as_ref(), &signed.message.serialize()));
    }

    #[test]
    fn test_sign_rejects_foreign_transaction() {
        let payer = Keypair::new();
        let other = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let message = v0::Message::try_compile(&payer.pubkey(), &[ix], &[], Hash::default()).unwrap();
        let tx = VersionedTransaction {
            signatures: vec![],
            message: VersionedMessage::V0(message),
        };
        assert!(sign_transaction(tx, &other).is_err());
    }

    #[test]
    fn test_garbage_payload_is_invariant_violation() {
        let err = decode_transaction("!!!").unwrap_err();
        assert!(matches!(err.downcast_ref::<LpError>(), Some(LpError::InvariantViolation(_))));
    }
}
