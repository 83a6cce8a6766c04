//! Swap-out fee solicitation from channel peers.

pub mod feerates;

#[cfg(test)]
mod feerates_test;

pub use feerates::{
    CmdStartSwapOutSearch, SwapMsg, SwapOutFeeratesHandler, SwapOutListener, SwapOutResponseExt,
    FIRST_RESPONSE_TIMEOUT, MIN_CHAIN_FEE, REST_OF_RESPONSES_TIMEOUT,
};
