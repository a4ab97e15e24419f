//! At-rest encryption of store files
//!
//! Every file is sealed with ChaCha20-Poly1305 under a key derived from the
//! store's master key and the file's store-relative path, so a file copied to
//! another path no longer decrypts. Encrypted files have this layout:
//!
//! ```text
//! "CERTSYNC" | version (1 byte) | nonce (12 bytes) | ciphertext + tag
//! ```
//!
//! The 9-byte header is authenticated as associated data.

use std::fmt;
use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use certsync_core::config::{EncryptionConfig, EncryptionMode, KdfConfig};

use crate::docs::README_FILE;
use crate::error::{Result, StoreError};
use crate::tree::{write_atomic, TreeState, WorkingTree};

/// Magic bytes opening every encrypted file
pub const MAGIC: &[u8; 8] = b"CERTSYNC";

/// Current file format version
pub const FORMAT_VERSION: u8 = 0x01;

const HEADER_LEN: usize = 9;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

const SALT_CONTEXT: &str = "certsync/v1/";
const FILE_KEY_CONTEXT: &str = "certsync/v1/file:";

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        KdfConfig::default().into()
    }
}

impl From<KdfConfig> for KdfParams {
    fn from(config: KdfConfig) -> Self {
        Self {
            memory_kib: config.memory_kib,
            iterations: config.iterations,
            parallelism: config.parallelism,
        }
    }
}

/// Secret the master key is derived from
pub enum EncryptionKey {
    /// Shared team passphrase, stretched with Argon2id
    Passphrase(Zeroizing<String>),
    /// 256-bit master key used as is
    Raw(Zeroizing<[u8; KEY_LEN]>),
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase(_) => f.write_str("EncryptionKey::Passphrase(<redacted>)"),
            Self::Raw(_) => f.write_str("EncryptionKey::Raw(<redacted>)"),
        }
    }
}

impl EncryptionKey {
    /// Passphrase key
    pub fn passphrase(passphrase: impl Into<String>) -> Self {
        Self::Passphrase(Zeroizing::new(passphrase.into()))
    }

    /// Raw master key
    pub fn raw(key: [u8; KEY_LEN]) -> Self {
        Self::Raw(Zeroizing::new(key))
    }

    /// Decode a base64 (standard alphabet) 32-byte key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| StoreError::KeyDerivation(format!("key is not valid base64: {}", e)))?,
        );
        let key: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            StoreError::KeyDerivation(format!(
                "key must be {} bytes, got {}",
                KEY_LEN,
                decoded.len()
            ))
        })?;
        Ok(Self::raw(key))
    }

    /// Fresh random key from the OS generator
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut key[..]);
        Self::Raw(key)
    }

    /// Base64 form of a raw key, for handing to teammates
    pub fn to_base64(&self) -> Option<Zeroizing<String>> {
        match self {
            Self::Raw(key) => Some(Zeroizing::new(
                base64::engine::general_purpose::STANDARD.encode(&key[..]),
            )),
            Self::Passphrase(_) => None,
        }
    }

    /// Read the configured secret from the environment; `None` when encryption is off
    pub fn from_config(config: &EncryptionConfig) -> Result<Option<Self>> {
        match config.mode {
            EncryptionMode::Passphrase => Ok(Some(Self::passphrase(config.resolve_passphrase()?))),
            EncryptionMode::Key => {
                let encoded = Zeroizing::new(config.resolve_key()?);
                Ok(Some(Self::from_base64(&encoded)?))
            }
            EncryptionMode::None => Ok(None),
        }
    }
}

/// Encryption layer bound to one store's master key
pub struct Encryption {
    master: Option<Zeroizing<[u8; KEY_LEN]>>,
}

impl fmt::Debug for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryption")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Encryption {
    /// Derive the master key for `store_id` from `key`
    #[instrument(skip(key, params))]
    pub fn new(key: &EncryptionKey, store_id: &str, params: &KdfParams) -> Result<Self> {
        let master = match key {
            EncryptionKey::Raw(raw) => Zeroizing::new(**raw),
            EncryptionKey::Passphrase(passphrase) => {
                if passphrase.is_empty() {
                    return Err(StoreError::KeyDerivation("passphrase is empty".to_string()));
                }
                let start = std::time::Instant::now();
                let master = derive_master_key(passphrase.as_bytes(), store_id, params)?;
                debug!(duration_ms = start.elapsed().as_millis() as u64, "derived master key");
                master
            }
        };
        Ok(Self {
            master: Some(master),
        })
    }

    /// Layer that stores files as plaintext
    pub fn disabled() -> Self {
        Self { master: None }
    }

    /// Build the layer described by `config`, reading secrets from the environment
    pub fn from_config(config: &EncryptionConfig) -> Result<Self> {
        match EncryptionKey::from_config(config)? {
            Some(key) => Self::new(&key, &config.store_id, &config.kdf.into()),
            None => {
                warn!("store encryption is disabled");
                Ok(Self::disabled())
            }
        }
    }

    /// Whether files are actually encrypted
    pub fn is_enabled(&self) -> bool {
        self.master.is_some()
    }

    /// Seal `plaintext` stored at `relative`
    pub fn encrypt_bytes(&self, relative: &Path, plaintext: &[u8]) -> Result<Vec<u8>> {
        let Some(master) = &self.master else {
            return Ok(plaintext.to_vec());
        };

        let cipher = file_cipher(master, relative).map_err(|reason| StoreError::EncryptionFailed {
            path: relative.to_path_buf(),
            reason,
        })?;
        let header = header();
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|e| StoreError::EncryptionFailed {
                path: relative.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + sealed.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open `data` stored at `relative`
    pub fn decrypt_bytes(&self, relative: &Path, data: &[u8]) -> Result<Vec<u8>> {
        let failed = |reason: &str| StoreError::DecryptionFailed {
            path: relative.to_path_buf(),
            reason: reason.to_string(),
        };

        let Some(master) = &self.master else {
            if data.starts_with(MAGIC) {
                return Err(failed("file is encrypted but store encryption is disabled"));
            }
            return Ok(data.to_vec());
        };

        if data.len() < HEADER_LEN || !data.starts_with(MAGIC) {
            return Err(failed("missing encryption header"));
        }
        if data[MAGIC.len()] != FORMAT_VERSION {
            return Err(failed(&format!(
                "unsupported format version {}",
                data[MAGIC.len()]
            )));
        }
        if data.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
            return Err(failed("file is truncated"));
        }

        let (header, rest) = data.split_at(HEADER_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        let cipher = file_cipher(master, relative).map_err(|reason| failed(&reason))?;

        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: header,
                },
            )
            .map_err(|_| failed("authentication failed (wrong key or tampered file)"))
    }

    /// Encrypt every store file in place
    #[instrument(skip(self, tree), fields(root = %tree.root().display()))]
    pub fn encrypt_files(&self, tree: &mut WorkingTree) -> Result<usize> {
        tree.require(TreeState::Plaintext)?;
        let count = self.transform(tree, |relative, data| self.encrypt_bytes(relative, data))?;
        tree.set_state(TreeState::Encrypted);
        info!(files = count, enabled = self.is_enabled(), "encrypted working tree");
        Ok(count)
    }

    /// Decrypt every store file in place
    #[instrument(skip(self, tree), fields(root = %tree.root().display()))]
    pub fn decrypt_files(&self, tree: &mut WorkingTree) -> Result<usize> {
        tree.require(TreeState::Encrypted)?;
        let count = self.transform(tree, |relative, data| self.decrypt_bytes(relative, data))?;
        tree.set_state(TreeState::Plaintext);
        info!(files = count, enabled = self.is_enabled(), "decrypted working tree");
        Ok(count)
    }

    fn transform<F>(&self, tree: &mut WorkingTree, op: F) -> Result<usize>
    where
        F: Fn(&Path, &[u8]) -> Result<Vec<u8>>,
    {
        let files: Vec<PathBuf> = tree
            .files()?
            .into_iter()
            .filter(|path| path != Path::new(README_FILE))
            .collect();

        for relative in &files {
            let result = tree
                .read_file(relative)
                .and_then(|data| op(relative, &data))
                .and_then(|out| write_atomic(&tree.path_for(relative), &out));
            if let Err(e) = result {
                tree.set_state(TreeState::Inconsistent);
                return Err(e);
            }
            debug!(path = %relative.display(), "transformed store file");
        }

        Ok(files.len())
    }
}

/// Re-encrypt every file of an encrypted tree from `old` to `new`
#[instrument(skip_all, fields(root = %tree.root().display()))]
pub fn rekey(tree: &mut WorkingTree, old: &Encryption, new: &Encryption) -> Result<Vec<PathBuf>> {
    old.decrypt_files(tree)?;
    new.encrypt_files(tree)?;
    let files = tree
        .files()?
        .into_iter()
        .filter(|path| path != Path::new(README_FILE))
        .collect();
    Ok(files)
}

fn header() -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..MAGIC.len()].copy_from_slice(MAGIC);
    header[MAGIC.len()] = FORMAT_VERSION;
    header
}

fn derive_master_key(
    passphrase: &[u8],
    store_id: &str,
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let salt = Sha256::digest(format!("{}{}", SALT_CONTEXT, store_id).as_bytes());
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| StoreError::KeyDerivation(format!("invalid Argon2 params: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut master = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase, &salt, &mut master[..])
        .map_err(|e| StoreError::KeyDerivation(format!("Argon2id hash failed: {}", e)))?;
    Ok(master)
}

fn file_cipher(
    master: &[u8; KEY_LEN],
    relative: &Path,
) -> std::result::Result<ChaCha20Poly1305, String> {
    let info = format!("{}{}", FILE_KEY_CONTEXT, path_label(relative));
    let hk = Hkdf::<Sha256>::new(None, master);
    let mut file_key = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info.as_bytes(), &mut file_key[..])
        .map_err(|e| format!("HKDF expand failed: {}", e))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&file_key[..])))
}

/// `/`-joined path components, independent of the host separator
fn path_label(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
