//! The `sccg` container format: chunked ChaCha20-Poly1305.
//!
//! ```text
//! header:
//!   magic        4   b"SCCG"
//!   version      1   1
//!   flags        1   bit0 = keyfile required
//!   chunk_size   4   plaintext bytes per frame, u32 BE
//!   salt        16
//!   nonce_prefix 8
//!   [name_len    2   u16 BE, only with the keyfile flag]
//!   [name        n   UTF-8 keyfile name]
//! body:
//!   frame*       u32 BE length (bit31 = final) + ciphertext
//! ```
//!
//! Frame `i` uses the nonce `nonce_prefix || be32(i | final_bit)` and the
//! whole header as associated data. Every non-final frame holds exactly
//! `chunk_size` plaintext bytes; the final frame holds the rest, possibly
//! none. A stream that ends without a final frame is truncated.
//!
//! The key is `SHA-256("sccg/v1" || salt || be32(len(password)) || password ||
//! keyfile)`, re-hashed until `kdf_rounds` hashes have been applied.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::{DecryptError, DecryptResult};
use crate::plugin::{
    ContainerHeader, DecryptPlugin, FrameDecoder, HeaderProbe, SettingField, StreamKey,
};

/// Container magic.
pub const MAGIC: &[u8; 4] = b"SCCG";
/// Supported format version.
pub const VERSION: u8 = 1;
/// Header flag: a keyfile is required.
pub const FLAG_KEYFILE: u8 = 0x01;
/// Length of the header without the keyfile name.
pub const FIXED_HEADER_LEN: usize = 34;
/// Largest accepted plaintext chunk size.
pub const MAX_CHUNK_SIZE: u32 = 16 * 1024 * 1024;
/// Default plaintext chunk size for [`seal`].
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

const FINAL_BIT: u32 = 1 << 31;
const TAG_LEN: usize = 16;
const KDF_CONTEXT: &[u8] = b"sccg/v1";
const MAX_KDF_ROUNDS: i64 = 1_000_000;

/// Plugin name and setting field names.
pub const PLUGIN_NAME: &str = "sccg";
const FIELD_KDF_ROUNDS: &str = "kdf_rounds";
const FIELD_ALLOW_KEYFILE: &str = "allow_keyfile";

/// Fixed header fields.
struct Fields {
    flags: u8,
    chunk_size: u32,
    salt: [u8; 16],
    nonce_prefix: [u8; 8],
}

fn read_fields(buf: &[u8]) -> DecryptResult<Fields> {
    if buf.len() < FIXED_HEADER_LEN || &buf[..4] != MAGIC {
        return Err(DecryptError::Header("missing sccg header".to_owned()));
    }
    let version = buf[4];
    if version != VERSION {
        return Err(DecryptError::Header(format!("unsupported version {version}")));
    }
    let flags = buf[5];
    if flags & !FLAG_KEYFILE != 0 {
        return Err(DecryptError::Header(format!("unknown flags {flags:#04x}")));
    }
    let chunk_size = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(DecryptError::Header(format!("invalid chunk size {chunk_size}")));
    }
    let mut salt = [0u8; 16];
    salt.copy_from_slice(&buf[10..26]);
    let mut nonce_prefix = [0u8; 8];
    nonce_prefix.copy_from_slice(&buf[26..34]);
    Ok(Fields {
        flags,
        chunk_size,
        salt,
        nonce_prefix,
    })
}

fn validate_keyfile_name(name: &str) -> DecryptResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(DecryptError::Header(format!("invalid keyfile name {name:?}")));
    }
    Ok(())
}

/// Parse an sccg header from the start of `buf`.
///
/// # Errors
///
/// Returns [`DecryptError::Header`] when the magic matches but the header is
/// invalid.
pub fn parse_header(buf: &[u8]) -> DecryptResult<HeaderProbe> {
    if buf.len() < MAGIC.len() {
        return Ok(if MAGIC.starts_with(buf) {
            HeaderProbe::Incomplete
        } else {
            HeaderProbe::Foreign
        });
    }
    if &buf[..4] != MAGIC {
        return Ok(HeaderProbe::Foreign);
    }
    if buf.len() < FIXED_HEADER_LEN {
        return Ok(HeaderProbe::Incomplete);
    }
    let fields = read_fields(buf)?;

    let (len, keyfile) = if fields.flags & FLAG_KEYFILE == 0 {
        (FIXED_HEADER_LEN, None)
    } else {
        let Some(len_bytes) = buf.get(FIXED_HEADER_LEN..FIXED_HEADER_LEN + 2) else {
            return Ok(HeaderProbe::Incomplete);
        };
        let name_len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
        let start = FIXED_HEADER_LEN + 2;
        let Some(name) = buf.get(start..start + name_len) else {
            return Ok(HeaderProbe::Incomplete);
        };
        let name = std::str::from_utf8(name)
            .map_err(|_| DecryptError::Header("keyfile name is not UTF-8".to_owned()))?;
        validate_keyfile_name(name)?;
        (start + name_len, Some(name.to_owned()))
    };

    Ok(HeaderProbe::Parsed(ContainerHeader {
        len,
        keyfile,
        raw: Bytes::copy_from_slice(&buf[..len]),
    }))
}

fn derive_key(salt: &[u8; 16], password: &str, keyfile: Option<&[u8]>, rounds: u32) -> [u8; 32] {
    let password_len = u32::try_from(password.len()).unwrap_or(u32::MAX);
    let mut hasher = Sha256::new();
    hasher.update(KDF_CONTEXT);
    hasher.update(salt);
    hasher.update(password_len.to_be_bytes());
    hasher.update(password.as_bytes());
    hasher.update(keyfile.unwrap_or_default());

    let mut key = [0u8; 32];
    key.copy_from_slice(hasher.finalize().as_slice());
    for _ in 1..rounds {
        let next = Sha256::digest(key);
        key.copy_from_slice(next.as_slice());
    }
    key
}

fn frame_nonce(prefix: &[u8; 8], index: u32, last: bool) -> [u8; 12] {
    let counter = if last { index | FINAL_BIT } else { index };
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(prefix);
    nonce[8..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn kdf_rounds(config: &Value) -> u32 {
    let rounds = config
        .get(FIELD_KDF_ROUNDS)
        .and_then(Value::as_i64)
        .unwrap_or(1)
        .clamp(1, MAX_KDF_ROUNDS);
    u32::try_from(rounds).unwrap_or(1)
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// The built-in `sccg` plugin.
#[derive(Debug, Clone, Copy, Default)]
pub struct SccgPlugin;

impl DecryptPlugin for SccgPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn setting_fields(&self) -> Vec<SettingField> {
        vec![
            SettingField::new(
                FIELD_KDF_ROUNDS,
                "number",
                json!(1),
                "Number of SHA-256 rounds used to derive container keys.",
            ),
            SettingField::new(
                FIELD_ALLOW_KEYFILE,
                "bool",
                json!(true),
                "Allow containers that require a keyfile stored next to them.",
            ),
        ]
    }

    fn probe(&self, buf: &[u8]) -> DecryptResult<HeaderProbe> {
        parse_header(buf)
    }

    fn accepts_keyfile(&self, config: &Value) -> bool {
        config
            .get(FIELD_ALLOW_KEYFILE)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    fn open(
        &self,
        header: &ContainerHeader,
        credential: &str,
        keyfile: Option<&[u8]>,
        config: &Value,
    ) -> DecryptResult<Arc<dyn StreamKey>> {
        let fields = read_fields(&header.raw)?;
        if let Some(name) = &header.keyfile {
            if !self.accepts_keyfile(config) {
                return Err(DecryptError::KeyfileDisallowed(name.clone()));
            }
            if keyfile.is_none() {
                return Err(DecryptError::Header(format!("keyfile {name} was not supplied")));
            }
        }
        let key = derive_key(&fields.salt, credential, keyfile, kdf_rounds(config));
        Ok(Arc::new(SccgKey {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            nonce_prefix: fields.nonce_prefix,
            chunk_size: fields.chunk_size,
            aad: header.raw.clone(),
        }))
    }
}

/// Key material of an opened container.
pub struct SccgKey {
    cipher: ChaCha20Poly1305,
    nonce_prefix: [u8; 8],
    chunk_size: u32,
    aad: Bytes,
}

impl fmt::Debug for SccgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SccgKey")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl StreamKey for SccgKey {
    fn decoder(&self) -> Box<dyn FrameDecoder> {
        Box::new(SccgDecoder {
            cipher: self.cipher.clone(),
            nonce_prefix: self.nonce_prefix,
            chunk_size: self.chunk_size,
            aad: self.aad.clone(),
            index: 0,
            finished: false,
        })
    }
}

struct SccgDecoder {
    cipher: ChaCha20Poly1305,
    nonce_prefix: [u8; 8],
    chunk_size: u32,
    aad: Bytes,
    index: u32,
    finished: bool,
}

impl FrameDecoder for SccgDecoder {
    fn decode(&mut self, buf: &mut BytesMut) -> DecryptResult<Option<Bytes>> {
        if self.finished {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(DecryptError::Header("data after final frame".to_owned()));
        }
        if buf.len() < 4 {
            return Ok(None);
        }
        let word = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let last = word & FINAL_BIT != 0;
        let len = (word & !FINAL_BIT) as usize;
        let max = self.chunk_size as usize + TAG_LEN;
        if !(TAG_LEN..=max).contains(&len) {
            return Err(DecryptError::Header(format!(
                "frame {} has invalid length {len}",
                self.index
            )));
        }
        if buf.len() < 4 + len {
            return Ok(None);
        }
        if self.index & FINAL_BIT != 0 {
            return Err(DecryptError::Header("too many frames".to_owned()));
        }

        buf.advance(4);
        let ciphertext = buf.split_to(len);
        let nonce = frame_nonce(&self.nonce_prefix, self.index, last);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &self.aad,
                },
            )
            .map_err(|_| DecryptError::Authentication { index: self.index })?;

        if !last && plaintext.len() != self.chunk_size as usize {
            return Err(DecryptError::Header(format!(
                "frame {} is shorter than the chunk size",
                self.index
            )));
        }
        self.index += 1;
        self.finished = last;
        Ok(Some(Bytes::from(plaintext)))
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

// ---------------------------------------------------------------------------
// Sealing
// ---------------------------------------------------------------------------

/// Parameters for [`seal`].
#[derive(Clone)]
pub struct SealOptions {
    /// Plaintext bytes per frame.
    pub chunk_size: u32,
    /// SHA-256 rounds for key derivation.
    pub kdf_rounds: u32,
    /// Keyfile name and content, when the container should require one.
    pub keyfile: Option<(String, Vec<u8>)>,
    /// Key derivation salt.
    pub salt: [u8; 16],
    /// Nonce prefix.
    pub nonce_prefix: [u8; 8],
}

impl fmt::Debug for SealOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealOptions")
            .field("chunk_size", &self.chunk_size)
            .field("kdf_rounds", &self.kdf_rounds)
            .field("keyfile", &self.keyfile.as_ref().map(|(name, _)| name))
            .finish_non_exhaustive()
    }
}

impl Default for SealOptions {
    /// Default chunk size, one KDF round, no keyfile, random salt and nonce.
    fn default() -> Self {
        let salt = uuid::Uuid::new_v4().into_bytes();
        let nonce = uuid::Uuid::new_v4().into_bytes();
        let mut nonce_prefix = [0u8; 8];
        nonce_prefix.copy_from_slice(&nonce[..8]);
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf_rounds: 1,
            keyfile: None,
            salt,
            nonce_prefix,
        }
    }
}

/// Encrypt `plaintext` into an sccg container.
///
/// # Errors
///
/// Returns [`DecryptError::Header`] for an invalid chunk size or keyfile name.
pub fn seal(plaintext: &[u8], password: &str, options: &SealOptions) -> DecryptResult<Vec<u8>> {
    if options.chunk_size == 0 || options.chunk_size > MAX_CHUNK_SIZE {
        return Err(DecryptError::Header(format!(
            "invalid chunk size {}",
            options.chunk_size
        )));
    }

    let mut header = Vec::with_capacity(FIXED_HEADER_LEN + 64);
    header.extend_from_slice(MAGIC);
    header.push(VERSION);
    header.push(if options.keyfile.is_some() { FLAG_KEYFILE } else { 0 });
    header.extend_from_slice(&options.chunk_size.to_be_bytes());
    header.extend_from_slice(&options.salt);
    header.extend_from_slice(&options.nonce_prefix);
    if let Some((name, _)) = &options.keyfile {
        validate_keyfile_name(name)?;
        let name_len = u16::try_from(name.len())
            .map_err(|_| DecryptError::Header("keyfile name is too long".to_owned()))?;
        header.extend_from_slice(&name_len.to_be_bytes());
        header.extend_from_slice(name.as_bytes());
    }

    let keyfile = options.keyfile.as_ref().map(|(_, content)| content.as_slice());
    let key = derive_key(&options.salt, password, keyfile, options.kdf_rounds.max(1));
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

    let chunks: Vec<&[u8]> = if plaintext.is_empty() {
        vec![plaintext]
    } else {
        plaintext.chunks(options.chunk_size as usize).collect()
    };
    let frame_count = chunks.len();

    let mut out = header.clone();
    for (i, chunk) in chunks.into_iter().enumerate() {
        let index = u32::try_from(i)
            .ok()
            .filter(|i| i & FINAL_BIT == 0)
            .ok_or_else(|| DecryptError::Header("too many frames".to_owned()))?;
        let last = i + 1 == frame_count;
        let nonce = frame_nonce(&options.nonce_prefix, index, last);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: chunk,
                    aad: &header,
                },
            )
            .map_err(|_| DecryptError::Header("encryption failed".to_owned()))?;
        let len = u32::try_from(ciphertext.len())
            .map_err(|_| DecryptError::Header("frame is too large".to_owned()))?;
        let word = if last { len | FINAL_BIT } else { len };
        out.extend_from_slice(&word.to_be_bytes());
        out.extend_from_slice(&ciphertext);
    }
    Ok(out)
}
