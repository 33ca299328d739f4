//! Protocol module - init-data wire format and codecs.
//!
//! This module implements the two fixed byte layouts exchanged with the
//! browser layer:
//! - Layout A: key-id info (`KeyIdInfo`)
//! - Layout B: challenge parameters (`ChallengeParameters`)
//!
//! Decoding is pure and never reads past the end of the input.

mod challenge;
mod key_id_info;
mod wire_format;

pub use challenge::ChallengeParameters;
pub use key_id_info::KeyIdInfo;
pub use wire_format::{
    ActionId, ActionParam, KeyIdInfoType, RequestType, CHALLENGE_MIN_SIZE,
    KEY_ID_INFO_HEADER_SIZE, LENGTH_SIZE, PRIVATE_DATA_SIZE, SERVER_URI_OFFSET,
    USAGE_RULE_REF_SIZE,
};
