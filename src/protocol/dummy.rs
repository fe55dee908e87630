//! The shared dummy decoder used for CANCEL/CLEANUP responses: these
//! operations have no meaningful response body, so decoding them always
//! yields the same fixed result rather than going through a real handler.

use std::time::Duration;

use crate::error::Status;
use super::{ProtoData, ProtoResult, NextOp};

pub fn result() -> ProtoResult {
    ProtoResult {
        next: NextOp::Finish,
        delay: Duration::ZERO,
        status: Status::Good,
        data: ProtoData::default(),
        error: None,
    }
}
