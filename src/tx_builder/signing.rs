//! Local signing of transactions assembled by remote services

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use solana_sdk::{
    instruction::CompiledInstruction,
    message::{MessageHeader, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction, system_program,
    transaction::VersionedTransaction,
};

use super::BuildError;
use crate::compat;

/// Decode a base64 bincode transaction and sign it as its only required signer
pub fn sign_serialized(encoded: &str, signer: &Keypair) -> Result<VersionedTransaction, BuildError> {
    sign_message(decode_transaction(encoded)?, signer)
}

/// Like [`sign_serialized`], appending a lamport transfer from the signer
/// before signing. Used to attach relay tips to service-built transactions.
pub fn sign_serialized_with_transfer(
    encoded: &str,
    signer: &Keypair,
    to: &Pubkey,
    lamports: u64,
) -> Result<VersionedTransaction, BuildError> {
    let mut unsigned = decode_transaction(encoded)?;
    append_transfer(&mut unsigned.message, &signer.pubkey(), to, lamports)?;
    sign_message(unsigned, signer)
}

fn decode_transaction(encoded: &str) -> Result<VersionedTransaction, BuildError> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| BuildError::InvalidTransaction(format!("base64: {e}")))?;
    bincode::deserialize(&bytes).map_err(|e| BuildError::InvalidTransaction(format!("bincode: {e}")))
}

/// Compiled view of a message that instructions can be appended to
struct MessageParts<'a> {
    header: &'a mut MessageHeader,
    keys: &'a mut Vec<Pubkey>,
    instructions: &'a mut Vec<CompiledInstruction>,
    /// Accounts loaded from lookup tables, indexed after the static keys
    loaded: usize,
}

impl MessageParts<'_> {
    fn is_writable(&self, index: usize) -> bool {
        let signed = self.header.num_required_signatures as usize;
        if index < signed {
            index < signed - self.header.num_readonly_signed_accounts as usize
        } else {
            index < self.keys.len() - self.header.num_readonly_unsigned_accounts as usize
        }
    }

    /// Index of `key` among the static keys, inserting it into the writable
    /// or readonly unsigned section when absent
    fn ensure_key(&mut self, key: Pubkey, writable: bool) -> Result<u8, BuildError> {
        if let Some(index) = self.keys.iter().position(|k| *k == key) {
            if writable && !self.is_writable(index) {
                return Err(BuildError::InvalidTransaction(format!("{key} is readonly in the message")));
            }
            return to_index(index);
        }
        if self.keys.len() + self.loaded >= usize::from(u8::MAX) + 1 {
            return Err(BuildError::InvalidTransaction("message has no room for another account".into()));
        }

        let position = if writable {
            self.keys.len() - self.header.num_readonly_unsigned_accounts as usize
        } else {
            self.header.num_readonly_unsigned_accounts += 1;
            self.keys.len()
        };
        let shift_from = to_index(position)?;
        for ix in self.instructions.iter_mut() {
            for index in std::iter::once(&mut ix.program_id_index).chain(ix.accounts.iter_mut()) {
                if *index >= shift_from {
                    *index += 1;
                }
            }
        }
        self.keys.insert(position, key);
        Ok(shift_from)
    }
}

fn to_index(index: usize) -> Result<u8, BuildError> {
    u8::try_from(index).map_err(|_| BuildError::InvalidTransaction(format!("account index {index} out of range")))
}

/// Append a system transfer signed by `from`, which must be a writable signer
pub fn append_transfer(message: &mut VersionedMessage, from: &Pubkey, to: &Pubkey, lamports: u64) -> Result<(), BuildError> {
    let mut parts = match message {
        VersionedMessage::Legacy(m) => MessageParts {
            header: &mut m.header,
            keys: &mut m.account_keys,
            instructions: &mut m.instructions,
            loaded: 0,
        },
        VersionedMessage::V0(m) => MessageParts {
            loaded: m
                .address_table_lookups
                .iter()
                .map(|l| l.writable_indexes.len() + l.readonly_indexes.len())
                .sum(),
            header: &mut m.header,
            keys: &mut m.account_keys,
            instructions: &mut m.instructions,
        },
    };

    let from_index = parts
        .keys
        .iter()
        .position(|k| k == from)
        .filter(|i| *i < parts.header.num_required_signatures as usize && parts.is_writable(*i))
        .ok_or_else(|| BuildError::Signing(format!("{from} is not a writable signer of the message")))?;
    // Inserting the destination and program never moves a signer
    let from_index = to_index(from_index)?;
    let to_slot = parts.ensure_key(*to, true)?;
    let program_index = parts.ensure_key(system_program::id(), false)?;

    let transfer = system_instruction::transfer(from, to, lamports);
    parts.instructions.push(CompiledInstruction::new_from_raw_parts(
        program_index,
        transfer.data,
        vec![from_index, to_slot],
    ));
    Ok(())
}

fn sign_message(unsigned: VersionedTransaction, signer: &Keypair) -> Result<VersionedTransaction, BuildError> {
    let required = compat::get_required_signers(&unsigned.message);
    match required {
        [only] if *only == signer.pubkey() => {}
        [] => return Err(BuildError::InvalidTransaction("message requires no signers".into())),
        [first, ..] if *first != signer.pubkey() => {
            return Err(BuildError::Signing(format!(
                "fee payer {first} does not match signer {}",
                signer.pubkey()
            )))
        }
        _ => {
            return Err(BuildError::Signing(format!(
                "message requires {} signers",
                required.len()
            )))
        }
    }
    VersionedTransaction::try_new(unsigned.message, &[signer])
        .map_err(|e| BuildError::Signing(e.to_string()))
}

/// Base64 of the bincode wire format
pub fn encode_transaction(tx: &VersionedTransaction) -> Result<String, bincode::Error> {
    Ok(BASE64_STANDARD.encode(bincode::serialize(tx)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::unsigned_transfer;
    use solana_sdk::pubkey::Pubkey;

    #[test]
    fn test_signs_service_transaction() {
        let signer = Keypair::new();
        let unsigned = unsigned_transfer(&signer.pubkey());
        let encoded = encode_transaction(&unsigned).unwrap();

        let signed = sign_serialized(&encoded, &signer).unwrap();
        assert!(compat::first_signature(&signed).is_some());
        assert!(signed.verify_with_results().iter().all(|ok| *ok));
    }

    #[test]
    fn test_rejects_foreign_fee_payer() {
        let signer = Keypair::new();
        let unsigned = unsigned_transfer(&Pubkey::new_unique());
        let encoded = encode_transaction(&unsigned).unwrap();
        assert!(matches!(
            sign_serialized(&encoded, &signer),
            Err(BuildError::Signing(_))
        ));
    }

    #[test]
    fn test_appended_transfer_keeps_existing_instructions_intact() {
        let signer = Keypair::new();
        let unsigned = unsigned_transfer(&signer.pubkey());
        let before = unsigned.message.clone();
        let tip = Pubkey::new_unique();
        let encoded = encode_transaction(&unsigned).unwrap();

        let signed = sign_serialized_with_transfer(&encoded, &signer, &tip, 5_000).unwrap();
        assert!(signed.verify_with_results().iter().all(|ok| *ok));

        let keys = signed.message.static_account_keys();
        let old_keys = before.static_account_keys();
        // Original instructions still resolve to the same accounts
        for (old, new) in before.instructions().iter().zip(signed.message.instructions()) {
            assert_eq!(old_keys[old.program_id_index as usize], keys[new.program_id_index as usize]);
            let old_accounts: Vec<Pubkey> = old.accounts.iter().map(|i| old_keys[*i as usize]).collect();
            let new_accounts: Vec<Pubkey> = new.accounts.iter().map(|i| keys[*i as usize]).collect();
            assert_eq!(old_accounts, new_accounts);
        }

        let added = signed.message.instructions().last().unwrap();
        assert_eq!(signed.message.instructions().len(), before.instructions().len() + 1);
        assert_eq!(keys[added.program_id_index as usize], system_program::id());
        assert_eq!(keys[added.accounts[0] as usize], signer.pubkey());
        assert_eq!(keys[added.accounts[1] as usize], tip);
        let header = signed.message.header();
        assert!((added.accounts[1] as usize) < keys.len() - header.num_readonly_unsigned_accounts as usize);
        assert_eq!(
            added.data,
            system_instruction::transfer(&signer.pubkey(), &tip, 5_000).data
        );
    }

    #[test]
    fn test_transfer_requires_signer_in_message() {
        let signer = Keypair::new();
        let mut message = unsigned_transfer(&Pubkey::new_unique()).message;
        assert!(matches!(
            append_transfer(&mut message, &signer.pubkey(), &Pubkey::new_unique(), 1),
            Err(BuildError::Signing(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        let signer = Keypair::new();
        assert!(matches!(
            sign_serialized("@@@", &signer),
            Err(BuildError::InvalidTransaction(_))
        ));
        assert!(matches!(
            sign_serialized("AAAA", &signer),
            Err(BuildError::InvalidTransaction(_))
        ));
    }
}
