//! Uniform access to legacy and v0 messages
//!
//! Quote services hand back either message version; callers here only need the
//! header, the signer keys and the blockhash, so both are flattened to one API.

use solana_sdk::{
    hash::Hash,
    message::{MessageHeader, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};

#[inline]
#[must_use]
pub fn get_message_header(message: &VersionedMessage) -> &MessageHeader {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.header,
        VersionedMessage::V0(v0_msg) => &v0_msg.header,
    }
}

#[inline]
#[must_use]
pub fn get_static_account_keys(message: &VersionedMessage) -> &[Pubkey] {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.account_keys,
        VersionedMessage::V0(v0_msg) => &v0_msg.account_keys,
    }
}

/// Accounts that must sign, fee payer first
#[must_use]
pub fn get_required_signers(message: &VersionedMessage) -> &[Pubkey] {
    let keys = get_static_account_keys(message);
    let n = get_message_header(message).num_required_signatures as usize;
    &keys[..n.min(keys.len())]
}

#[inline]
#[must_use]
pub fn get_recent_blockhash(message: &VersionedMessage) -> Hash {
    match message {
        VersionedMessage::Legacy(legacy_msg) => legacy_msg.recent_blockhash,
        VersionedMessage::V0(v0_msg) => v0_msg.recent_blockhash,
    }
}

/// The fee payer's signature, which is the transaction id
#[must_use]
pub fn first_signature(tx: &VersionedTransaction) -> Option<Signature> {
    tx.signatures
        .first()
        .copied()
        .filter(|sig| *sig != Signature::default())
}
