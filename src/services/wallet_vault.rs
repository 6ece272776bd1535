//! Wallet Key Vault
//!
//! # Interview Q&A
//!
//! Q: 사용자별 입금 주소는 어떻게 만드는가?
//! A: 결정적 파생 (deterministic derivation)
//!
//!    seed = HMAC-SHA256(key = secret salt, message = user id)
//!    private key = BIP-32 m/44'/60'/0'/0/0 (seed 기준)
//!
//!    같은 (user id, salt)는 항상 같은 주소 → seed를 따로 저장하지 않아도 복구 가능
//!
//! Q: 개인키는 어떻게 저장하는가?
//! A: AES-256-GCM 암호문 "iv:tag:ciphertext" (각각 hex)
//!    - iv: 12바이트 랜덤
//!    - key: SHA-256(passphrase)
//!    - tag: 16바이트 인증 태그 → 변조/잘못된 passphrase는 복호화 자체가 실패

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use coins_bip32::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::HotWalletKey;
use crate::types::EthAddress;

/// EVM 표준 파생 경로 (첫 번째 계정)
pub const DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("malformed ciphertext: {0}")]
    Format(String),

    /// 인증 태그 불일치 (변조 또는 잘못된 passphrase)
    #[error("decryption failed")]
    Decryption,

    #[error("invalid private key: {0}")]
    InvalidKey(String),
}

type HmacSha256 = Hmac<Sha256>;

/// 파생된 지갑 (평문 키는 저장 전에 반드시 암호화)
pub struct DerivedWallet {
    pub address: EthAddress,
    pub private_key_hex: String,
}

impl std::fmt::Debug for DerivedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// HMAC seed → BIP-32 private key
pub fn derive_wallet(user_id: &str, secret_salt: &str) -> Result<DerivedWallet, VaultError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret_salt.as_bytes())
        .map_err(|e| VaultError::Derivation(e.to_string()))?;
    mac.update(user_id.as_bytes());
    let seed = mac.finalize().into_bytes();

    let xpriv = XPriv::root_from_seed(&seed, None)
        .and_then(|root| root.derive_path(DERIVATION_PATH))
        .map_err(|e| VaultError::Derivation(e.to_string()))?;
    let key: &coins_bip32::prelude::SigningKey = xpriv.as_ref();
    let key_bytes = key.to_bytes();

    let wallet = LocalWallet::from_bytes(&key_bytes).map_err(|e| VaultError::InvalidKey(e.to_string()))?;

    Ok(DerivedWallet {
        address: EthAddress::from_h160(wallet.address()),
        private_key_hex: hex::encode(key_bytes),
    })
}

pub fn derive_address(user_id: &str, secret_salt: &str) -> Result<EthAddress, VaultError> {
    Ok(derive_wallet(user_id, secret_salt)?.address)
}

fn cipher_for(passphrase: &str) -> Result<Aes256Gcm, VaultError> {
    let key = Sha256::digest(passphrase.as_bytes());
    Aes256Gcm::new_from_slice(&key).map_err(|e| VaultError::InvalidKey(e.to_string()))
}

/// "iv:tag:ciphertext"
pub fn encrypt(private_key_hex: &str, passphrase: &str) -> Result<String, VaultError> {
    let cipher = cipher_for(passphrase)?;

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    // aes-gcm 출력 = ciphertext || tag
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), private_key_hex.as_bytes())
        .map_err(|_| VaultError::Format("encryption failed".into()))?;
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(format!("{}:{}:{}", hex::encode(iv), hex::encode(tag), hex::encode(sealed)))
}

pub fn decrypt(encrypted: &str, passphrase: &str) -> Result<String, VaultError> {
    let parts: Vec<&str> = encrypted.split(':').collect();
    let [iv, tag, ciphertext] = parts.as_slice() else {
        return Err(VaultError::Format("expected iv:tag:ciphertext".into()));
    };

    let iv = hex::decode(iv).map_err(|e| VaultError::Format(format!("iv: {}", e)))?;
    let tag = hex::decode(tag).map_err(|e| VaultError::Format(format!("tag: {}", e)))?;
    let mut sealed = hex::decode(ciphertext).map_err(|e| VaultError::Format(format!("ciphertext: {}", e)))?;
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(VaultError::Format("bad iv or tag length".into()));
    }
    sealed.extend_from_slice(&tag);

    let plaintext = cipher_for(passphrase)?
        .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
        .map_err(|_| VaultError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| VaultError::Decryption)
}

/// 사용자 지갑 파생 + 키 암호화
///
/// 서비스는 전역 설정 대신 이 구조체를 주입받음
#[derive(Clone)]
pub struct WalletKeyVault {
    secret_salt: String,
    encryption_key: String,
}

impl WalletKeyVault {
    pub fn new(secret_salt: impl Into<String>, encryption_key: impl Into<String>) -> Self {
        Self {
            secret_salt: secret_salt.into(),
            encryption_key: encryption_key.into(),
        }
    }

    pub fn derive_address(&self, user_id: &str) -> Result<EthAddress, VaultError> {
        derive_address(user_id, &self.secret_salt)
    }

    /// (주소, 암호화된 개인키)
    pub fn seal_wallet(&self, user_id: &str) -> Result<(EthAddress, String), VaultError> {
        let wallet = derive_wallet(user_id, &self.secret_salt)?;
        let encrypted = encrypt(&wallet.private_key_hex, &self.encryption_key)?;
        Ok((wallet.address, encrypted))
    }

    pub fn open(&self, encrypted: &str) -> Result<String, VaultError> {
        decrypt(encrypted, &self.encryption_key)
    }

    /// Hot wallet signer (chain id는 호출 측에서 지정)
    pub fn hot_wallet(&self, key: &HotWalletKey) -> Result<LocalWallet, VaultError> {
        let hex_key = match key {
            HotWalletKey::Encrypted(enc) => self.open(enc)?,
            HotWalletKey::Plain(plain) => plain.clone(),
        };
        let bytes = hex::decode(hex_key.trim().trim_start_matches("0x"))
            .map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        LocalWallet::from_bytes(&bytes).map_err(|e| VaultError::InvalidKey(e.to_string()))
    }
}
