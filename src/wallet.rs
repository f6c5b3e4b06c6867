//! Wallet management module

use anyhow::{Context, Result};
use dashmap::DashMap;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::path::Path;
use std::sync::Arc;
use zeroize::Zeroize;

/// Keyring of the wallets the engine is allowed to sign for
#[derive(Clone, Default)]
pub struct WalletManager {
    keypairs: Arc<DashMap<Pubkey, Arc<Keypair>>>,
}

impl WalletManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a wallet manager from keypair files
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let manager = Self::new();
        for path in paths {
            manager.load_file(path.as_ref())?;
        }
        Ok(manager)
    }

    /// Create a new wallet manager from a keypair
    pub fn from_keypair(keypair: Keypair) -> Self {
        let manager = Self::new();
        manager.insert(keypair);
        manager
    }

    /// Load a keypair file (raw 64 bytes or a JSON byte array) and return its pubkey
    pub fn load_file(&self, path: &Path) -> Result<Pubkey> {
        let mut keypair_bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;

        let parsed = if keypair_bytes.len() == 64 {
            keypair_from_bytes(&keypair_bytes)
        } else {
            let mut json: Vec<u8> = serde_json::from_slice(&keypair_bytes)
                .context("Failed to parse keypair JSON")?;
            let keypair = keypair_from_bytes(&json);
            json.zeroize();
            keypair
        };
        keypair_bytes.zeroize();

        let keypair = parsed.with_context(|| format!("Invalid keypair in {}", path.display()))?;
        Ok(self.insert(keypair))
    }

    /// Load a base58-encoded 64-byte secret key
    pub fn load_base58(&self, secret: &str) -> Result<Pubkey> {
        let mut bytes = bs58::decode(secret.trim())
            .into_vec()
            .context("Secret key is not valid base58")?;
        let keypair = keypair_from_bytes(&bytes);
        bytes.zeroize();
        Ok(self.insert(keypair?))
    }

    pub fn insert(&self, keypair: Keypair) -> Pubkey {
        let pubkey = keypair.pubkey();
        self.keypairs.insert(pubkey, Arc::new(keypair));
        pubkey
    }

    /// Signer for `pubkey`, if this process holds its key
    pub fn signer_for(&self, pubkey: &Pubkey) -> Option<Arc<Keypair>> {
        self.keypairs.get(pubkey).map(|entry| Arc::clone(entry.value()))
    }

    pub fn pubkeys(&self) -> Vec<Pubkey> {
        self.keypairs.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.keypairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypairs.is_empty()
    }
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != 64 {
        anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
    }
    if bytes.iter().all(|&b| b == 0) {
        anyhow::bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(bytes).context("Invalid keypair bytes")
}
