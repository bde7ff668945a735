//! 外部令牌编解码：把内部句柄 AEAD 加密成二维码里可见的不透明字符串。
//!
//! 格式：`qrt_v1.<base64url(nonce ‖ ciphertext ‖ tag)>`，明文为 `{"t": handle, "ts": ms}`。

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::rendezvous::{Handle, MIN_HANDLE_BYTES};

/// 外部令牌版本前缀。
const TOKEN_PREFIX: &str = "qrt_v1.";
/// 密钥派生上下文。
const KDF_CONTEXT: &[u8] = b"rdv/qr-token/v1";
const NONCE_SIZE: usize = 12;
/// 外部令牌长度下限（字节）。
pub(crate) const MIN_TOKEN_LEN: usize = 50;
/// 外部令牌长度上限（字节），超出直接拒绝，不进入解密。
pub(crate) const MAX_TOKEN_LEN: usize = 500;

type HmacSha256 = Hmac<Sha256>;

/// 编解码错误。对调用方而言两者都等价于“令牌无效”。
#[derive(Debug, thiserror::Error)]
pub(crate) enum CodecError {
    /// 密钥为空。
    #[error("token codec secret is empty")]
    EmptySecret,
    /// 长度/字符集/前缀不合法（解密前的廉价拒绝）。
    #[error("token format is invalid")]
    Format,
    /// 解密、认证或明文解析失败。
    #[error("token is invalid")]
    Invalid,
}

/// 令牌明文。
#[derive(Debug, Serialize, Deserialize)]
struct TokenPlain {
    t: String,
    ts: u64,
}

/// 解码结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnwrappedToken {
    pub(crate) handle: Handle,
    pub(crate) issued_at_ms: u64,
}

/// 外部令牌长度与字符集检查；合法令牌只含 base64url 字符、`_` 与单个 `.`。
pub(crate) fn precheck(token: &str) -> Result<(), CodecError> {
    let len = token.len();
    if !(MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&len) {
        return Err(CodecError::Format);
    }
    let charset_ok = token
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if !charset_ok || !token.starts_with(TOKEN_PREFIX) {
        return Err(CodecError::Format);
    }
    Ok(())
}

/// AES-256-GCM 令牌编解码器。密钥在构造时派生一次。
#[derive(Clone)]
pub(crate) struct TokenCodec {
    cipher: Aes256Gcm,
}

impl TokenCodec {
    /// 由配置密钥派生 AES-256 密钥：`HMAC-SHA256(key = 上下文, msg = secret)`。
    pub(crate) fn new(secret: &str) -> Result<Self, CodecError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(CodecError::EmptySecret);
        }
        let mut mac = <HmacSha256 as Mac>::new_from_slice(KDF_CONTEXT)
            .map_err(|_| CodecError::EmptySecret)?;
        mac.update(secret.as_bytes());
        let key = mac.finalize().into_bytes();
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CodecError::EmptySecret)?;
        Ok(Self { cipher })
    }

    /// 加密句柄与签发时间。
    pub(crate) fn wrap(&self, handle: &Handle, issued_at_ms: u64) -> Result<String, CodecError> {
        let plain = serde_json::to_vec(&TokenPlain {
            t: handle.as_str().to_string(),
            ts: issued_at_ms,
        })
        .map_err(|_| CodecError::Invalid)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plain.as_slice())
            .map_err(|_| CodecError::Invalid)?;

        let mut raw = Vec::with_capacity(NONCE_SIZE + sealed.len());
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&sealed);
        Ok(format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(raw)))
    }

    /// 解密外部令牌。任何篡改、截断、解析失败都返回 `Invalid`。
    pub(crate) fn unwrap(&self, token: &str) -> Result<UnwrappedToken, CodecError> {
        let token = token.trim();
        precheck(token)?;
        let body = token
            .strip_prefix(TOKEN_PREFIX)
            .ok_or(CodecError::Format)?;
        let raw = URL_SAFE_NO_PAD
            .decode(body.as_bytes())
            .map_err(|_| CodecError::Invalid)?;
        if raw.len() <= NONCE_SIZE {
            return Err(CodecError::Invalid);
        }
        let (nonce_bytes, sealed) = raw.split_at(NONCE_SIZE);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| CodecError::Invalid)?;
        let plain: TokenPlain = serde_json::from_slice(&plain).map_err(|_| CodecError::Invalid)?;

        let handle_ok = plain.t.len() >= MIN_HANDLE_BYTES * 2
            && plain.t.chars().all(|c| c.is_ascii_hexdigit());
        if !handle_ok {
            return Err(CodecError::Invalid);
        }
        Ok(UnwrappedToken {
            handle: Handle::from_raw(plain.t),
            issued_at_ms: plain.ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

    use super::{CodecError, MAX_TOKEN_LEN, TOKEN_PREFIX, TokenCodec, precheck};
    use crate::rendezvous::Handle;

    fn codec() -> TokenCodec {
        TokenCodec::new("unit-test-secret").expect("codec")
    }

    #[test]
    fn wrapped_handle_unwraps_to_same_handle_and_time() {
        let codec = codec();
        let handle = Handle::generate(32);
        let token = codec.wrap(&handle, 1_700_000_000_123).expect("wrap");
        assert!(token.starts_with(TOKEN_PREFIX));
        assert!(!token.contains(handle.as_str()));

        let out = codec.unwrap(&token).expect("unwrap");
        assert_eq!(out.handle, handle);
        assert_eq!(out.issued_at_ms, 1_700_000_000_123);
    }

    #[test]
    fn same_handle_wraps_differently_each_time() {
        let codec = codec();
        let handle = Handle::generate(32);
        assert_ne!(
            codec.wrap(&handle, 1).expect("wrap"),
            codec.wrap(&handle, 1).expect("wrap")
        );
    }

    #[test]
    fn every_single_bit_flip_is_rejected() {
        let codec = codec();
        let token = codec.wrap(&Handle::generate(32), 42).expect("wrap");
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim_start_matches(TOKEN_PREFIX))
            .expect("decode");

        for index in 0..raw.len() {
            for bit in 0..8 {
                let mut flipped = raw.clone();
                flipped[index] ^= 1 << bit;
                let tampered = format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(&flipped));
                assert!(
                    matches!(codec.unwrap(&tampered), Err(CodecError::Invalid)),
                    "byte {index} bit {bit} was accepted"
                );
            }
        }
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let token = codec().wrap(&Handle::generate(32), 42).expect("wrap");
        let other = TokenCodec::new("another-secret").expect("codec");
        assert!(matches!(other.unwrap(&token), Err(CodecError::Invalid)));
    }

    #[test]
    fn precheck_rejects_wrong_length_charset_or_prefix() {
        assert!(matches!(precheck("qrt_v1.short"), Err(CodecError::Format)));
        let oversized = format!("{TOKEN_PREFIX}{}", "A".repeat(MAX_TOKEN_LEN));
        assert!(matches!(precheck(&oversized), Err(CodecError::Format)));
        let bad_charset = format!("{TOKEN_PREFIX}{}", "A/".repeat(40));
        assert!(matches!(precheck(&bad_charset), Err(CodecError::Format)));
        let bad_prefix = format!("zzz_v1.{}", "A".repeat(80));
        assert!(matches!(precheck(&bad_prefix), Err(CodecError::Format)));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(matches!(TokenCodec::new("  "), Err(CodecError::EmptySecret)));
    }
}
