//! Request/response surface a wire layer mounts.
//!
//! Every call returns a response; failures are reported in its
//! [`ResponseError`] and never as a transport error.

use std::sync::Arc;

use fsv_common::HashAlgo;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::account::{BlockRange, FarmerAccount};
use crate::controller::AccountController;
use crate::error::{ErrorType, Result, SupervisorError};

pub const RESPONSE_OK_MESSAGE: &str = "every thing is ok";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub kind: ErrorType,
    pub message: String,
}

impl ResponseError {
    pub fn ok() -> Self {
        Self {
            kind: ErrorType::None,
            message: RESPONSE_OK_MESSAGE.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.kind == ErrorType::None
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self::ok()
    }
}

impl From<&SupervisorError> for ResponseError {
    fn from(e: &SupervisorError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmerOnLineReq {
    pub farmer_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FarmerOnLineRsp {
    pub account: Option<FarmerAccount>,
    pub next_ping_time: u64,
    pub error: ResponseError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmerPingReq {
    pub farmer_id: String,
    pub block_range: Option<BlockRange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FarmerPingRsp {
    pub need_challenge: bool,
    pub block_range: Option<BlockRange>,
    pub hash_algo: Option<HashAlgo>,
    pub account: Option<FarmerAccount>,
    pub next_ping_time: u64,
    pub error: ResponseError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmerConquerChallengeReq {
    pub farmer_id: String,
    pub block_range: Option<BlockRange>,
    pub hash_algo: HashAlgo,
    pub blocks_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FarmerConquerChallengeRsp {
    pub conquer_ok: bool,
    pub account: Option<FarmerAccount>,
    pub error: ResponseError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmerOffLineReq {
    pub farmer_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FarmerOffLineRsp {
    pub account: Option<FarmerAccount>,
    pub error: ResponseError,
}

/// Farmer-facing operations backed by the shared controller.
#[derive(Clone)]
pub struct FarmerPublic {
    controller: Arc<AccountController>,
}

impl FarmerPublic {
    pub fn new(controller: Arc<AccountController>) -> Self {
        Self { controller }
    }

    pub fn farmer_on_line(&self, req: &FarmerOnLineReq) -> FarmerOnLineRsp {
        debug!(farmer = %req.farmer_id, "FarmerOnLine");
        let res = self.controller.with_handler(&req.farmer_id, |h| -> Result<_> {
            h.on_line()?;
            Ok((h.account().clone(), h.next_ping_time()))
        });

        match res.and_then(|r| r) {
            Ok((account, next_ping_time)) => FarmerOnLineRsp {
                account: Some(account),
                next_ping_time,
                error: ResponseError::ok(),
            },
            Err(e) => FarmerOnLineRsp {
                error: (&e).into(),
                ..Default::default()
            },
        }
    }

    pub fn farmer_ping(&self, req: &FarmerPingReq) -> FarmerPingRsp {
        debug!(farmer = %req.farmer_id, "FarmerPing");
        let Some(range) = req.block_range else {
            return FarmerPingRsp {
                error: (&missing_range()).into(),
                ..Default::default()
            };
        };

        let res = self.controller.with_handler(&req.farmer_id, |h| -> Result<_> {
            let outcome = h.ping(range.high, range.low)?;
            Ok((outcome, h.account().clone(), h.next_ping_time()))
        });

        match res.and_then(|r| r) {
            Ok((outcome, account, next_ping_time)) => FarmerPingRsp {
                need_challenge: outcome.need_challenge(),
                block_range: outcome.challenge.as_ref().map(|c| c.range),
                hash_algo: outcome.challenge.as_ref().map(|c| c.hash_algo),
                account: Some(account),
                next_ping_time,
                error: ResponseError::ok(),
            },
            Err(e) => FarmerPingRsp {
                error: (&e).into(),
                ..Default::default()
            },
        }
    }

    pub fn farmer_conquer_challenge(&self, req: &FarmerConquerChallengeReq) -> FarmerConquerChallengeRsp {
        debug!(farmer = %req.farmer_id, "FarmerConquerChallenge");
        let Some(range) = req.block_range else {
            return FarmerConquerChallengeRsp {
                error: (&missing_range()).into(),
                ..Default::default()
            };
        };

        let res = self.controller.with_handler(&req.farmer_id, |h| -> Result<_> {
            h.conquer_challenge(range, req.hash_algo, &req.blocks_hash)?;
            Ok(h.account().clone())
        });

        match res.and_then(|r| r) {
            Ok(account) => FarmerConquerChallengeRsp {
                conquer_ok: true,
                account: Some(account),
                error: ResponseError::ok(),
            },
            Err(e) => FarmerConquerChallengeRsp {
                error: (&e).into(),
                ..Default::default()
            },
        }
    }

    pub fn farmer_off_line(&self, req: &FarmerOffLineReq) -> FarmerOffLineRsp {
        debug!(farmer = %req.farmer_id, "FarmerOffLine");
        let res = self.controller.with_handler(&req.farmer_id, |h| -> Result<_> {
            h.off_line()?;
            Ok(h.account().clone())
        });

        match res.and_then(|r| r) {
            Ok(account) => FarmerOffLineRsp {
                account: Some(account),
                error: ResponseError::ok(),
            },
            Err(e) => FarmerOffLineRsp {
                account: None,
                error: (&e).into(),
            },
        }
    }
}

fn missing_range() -> SupervisorError {
    SupervisorError::InvalidArgument("block range is required".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::FarmerState;
    use crate::block_source::EmptyBlockSource;
    use crate::clock::SystemClock;
    use fsv_common::SupervisorConfig;
    use fsv_storage::MemoryStore;

    fn api() -> (FarmerPublic, Arc<AccountController>) {
        let mut cfg = SupervisorConfig::default();
        cfg.store.backend = "memory".to_string();
        let ctl = AccountController::new(
            &cfg,
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            Arc::new(EmptyBlockSource),
        )
        .expect("controller");
        (FarmerPublic::new(Arc::clone(&ctl)), ctl)
    }

    #[tokio::test]
    async fn test_on_line_response() {
        let (api, ctl) = api();
        let rsp = api.farmer_on_line(&FarmerOnLineReq { farmer_id: "f1".into() });
        assert!(rsp.error.is_ok());
        assert_eq!(rsp.error.message, RESPONSE_OK_MESSAGE);
        assert_eq!(rsp.account.expect("account").state, FarmerState::Online);
        assert!(rsp.next_ping_time > 0);

        let again = api.farmer_on_line(&FarmerOnLineReq { farmer_id: "f1".into() });
        assert_eq!(again.error.kind, ErrorType::InvalidTransition);
        assert!(again.account.is_none());
        ctl.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_missing_range_is_invalid_argument() {
        let (api, ctl) = api();
        api.farmer_on_line(&FarmerOnLineReq { farmer_id: "f1".into() });
        let rsp = api.farmer_ping(&FarmerPingReq {
            farmer_id: "f1".into(),
            block_range: None,
        });
        assert_eq!(rsp.error.kind, ErrorType::InvalidArgument);

        let rsp = api.farmer_conquer_challenge(&FarmerConquerChallengeReq {
            farmer_id: "f1".into(),
            block_range: None,
            hash_algo: HashAlgo::Sha256,
            blocks_hash: String::new(),
        });
        assert!(!rsp.conquer_ok);
        assert_eq!(rsp.error.kind, ErrorType::InvalidArgument);
        ctl.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_empty_farmer_id() {
        let (api, ctl) = api();
        let rsp = api.farmer_off_line(&FarmerOffLineReq { farmer_id: String::new() });
        assert_eq!(rsp.error.kind, ErrorType::InvalidArgument);
        ctl.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_unissued_challenge_fails() {
        let (api, ctl) = api();
        api.farmer_on_line(&FarmerOnLineReq { farmer_id: "f1".into() });
        let rsp = api.farmer_conquer_challenge(&FarmerConquerChallengeReq {
            farmer_id: "f1".into(),
            block_range: Some(BlockRange::new(50, 40)),
            hash_algo: HashAlgo::Sha256,
            blocks_hash: "deadbeef".into(),
        });
        assert!(!rsp.conquer_ok);
        assert_eq!(rsp.error.kind, ErrorType::VerificationFailed);
        ctl.close().await.expect("close");
    }

    #[test]
    fn test_response_error_serializes() {
        let json = serde_json::to_string(&ResponseError::ok()).expect("json");
        assert!(json.contains("every thing is ok"));
        let back: ResponseError = serde_json::from_str(&json).expect("parse");
        assert!(back.is_ok());
    }
}
