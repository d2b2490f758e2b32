use std::{
    fmt::Write as _,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::debug;
use wasmtime::{Engine, Module};

use crate::error::{Error, Result};

const CACHE_KEY_DOMAIN: &[u8] = b"tsbridge-cache-v1\0";
const CACHE_EXTENSION: &str = "cwasm";

/// Streams `Hash` input straight into the digest, so the key does not depend
/// on the toolchain's `DefaultHasher` algorithm.
struct DigestWriter<'a>(&'a mut Sha256);

impl Hasher for DigestWriter<'_> {
    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    // Only `write` feeds the digest.
    fn finish(&self) -> u64 {
        0
    }
}

/// Hex SHA-256 over the image digest and the engine's compatibility hash.
pub fn cache_key(engine: &Engine, image: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(CACHE_KEY_DOMAIN);
    h.update(Sha256::digest(image));
    engine
        .precompile_compatibility_hash()
        .hash(&mut DigestWriter(&mut h));

    h.finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

/// Compiles `image` on a blocking worker.
pub async fn compile(engine: &Engine, image: Bytes) -> Result<Module> {
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || Module::from_binary(&engine, &image).map_err(Error::Compile))
        .await
        .map_err(|e| Error::Engine(e.into()))?
}

fn entry_path(cache_dir: &Path, key: &str) -> PathBuf {
    cache_dir.join(key).with_extension(CACHE_EXTENSION)
}

pub async fn load_or_compile(engine: &Engine, image: Bytes, cache_dir: &Path) -> Result<Module> {
    tokio::fs::create_dir_all(cache_dir).await?;
    let key = cache_key(engine, &image);
    let path = entry_path(cache_dir, &key);

    if tokio::fs::try_exists(&path).await? {
        // SAFETY: entries are only ever produced by `Module::serialize` below
        // under a key that includes the engine's compatibility hash. wasmtime
        // validates the header, so a truncated or foreign file is an error.
        match unsafe { Module::deserialize_file(engine, &path) } {
            Ok(module) => {
                debug!(path = %path.display(), "loaded precompiled module from cache");
                return Ok(module);
            }
            Err(error) => {
                debug!(path = %path.display(), %error, "discarding unusable cache entry");
            }
        }
    }

    let module = compile(engine, image).await?;
    let artifact = module.serialize().map_err(Error::Engine)?;
    store_entry(cache_dir, &key, &artifact).await?;
    debug!(path = %path.display(), size = artifact.len(), "stored precompiled module in cache");
    Ok(module)
}

/// Publishes `bytes` as the entry for `key`. Readers only ever see a complete
/// file: the bytes go to a hidden staging file that is renamed into place.
pub async fn store_entry(cache_dir: &Path, key: &str, bytes: &[u8]) -> Result<()> {
    static STAGING_SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let path = entry_path(cache_dir, key);
    let staging = cache_dir.join(format!(
        ".{key}.{}-{}.partial",
        std::process::id(),
        STAGING_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ));

    tokio::fs::write(&staging, bytes).await?;
    let Err(e) = tokio::fs::rename(&staging, &path).await else {
        return Ok(());
    };
    let _ = tokio::fs::remove_file(&staging).await;
    // Another writer published the same key first; its artifact is equivalent.
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(());
    }
    Err(e.into())
}
