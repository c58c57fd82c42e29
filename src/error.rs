use thiserror::Error;

/// 生命周期各环节的失败分类，决定是否重试以及如何补偿
#[derive(Debug, Error)]
pub enum LpError {
    // 报价、价格、池子查询等网络错误
    #[error("网络请求失败: {0}")]
    TransientNetwork(String),

    // 交易确认元数据里带有链上错误
    #[error("交易被链上拒绝: {0}")]
    ExecutionRejected(String),

    // 缺少报价/交易载荷、签名无效等
    #[error("数据不符合预期: {0}")]
    InvariantViolation(String),

    // 交易已确认但预期效果(仓位出现、余额变化)未观察到
    #[error("部分失败，需要人工核对: {0}")]
    PartialFailure(String),

    // 主动放弃，不应重试
    #[error("跳过: {0}")]
    Skip(String),
}

impl LpError {
    pub fn is_retryable(err: &anyhow::Error) -> bool {
        match err.downcast_ref::<LpError>() {
            Some(LpError::Skip(_)) | Some(LpError::PartialFailure(_)) => false,
            _ => true,
        }
    }

    pub fn is_skip(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<LpError>(), Some(LpError::Skip(_)))
    }

    pub fn is_partial_failure(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<LpError>(), Some(LpError::PartialFailure(_)))
    }
}

impl From<reqwest::Error> for LpError {
    fn from(err: reqwest::Error) -> Self {
        LpError::TransientNetwork(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_retryable_classification() {
        assert!(LpError::is_retryable(&anyhow!("plain failure")));
        assert!(LpError::is_retryable(&LpError::TransientNetwork("timeout".into()).into()));
        assert!(LpError::is_retryable(&LpError::ExecutionRejected("custom 6001".into()).into()));
        assert!(!LpError::is_retryable(&LpError::Skip("bins".into()).into()));
        assert!(!LpError::is_retryable(&LpError::PartialFailure("no position".into()).into()));
    }

    #[test]
    fn test_classification_survives_context() {
        let err = anyhow::Error::from(LpError::Skip("bins".into())).context("deposit");
        assert!(LpError::is_skip(&err));
        assert!(!LpError::is_retryable(&err));
    }
}
