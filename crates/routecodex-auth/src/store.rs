use std::path::{Path, PathBuf};

use crate::error::{AuthError, AuthResult};
use crate::token::{StoredToken, sanitize};

/// Root of the on-disk credential layout, `~/.routecodex/auth` by default.
/// Tests point it at a temp directory.
#[derive(Debug, Clone)]
pub struct AuthHome {
    root: PathBuf,
}

impl AuthHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn default_home() -> Self {
        let base = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: base.join(".routecodex").join("auth"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".oauth-interactive.lock.json")
    }

    pub fn cooldown_path(&self) -> PathBuf {
        self.root.join(".oauth-repair-cooldown.json")
    }

    /// Resolve the token file for `(provider, alias)`.
    ///
    /// Files are named `<provider>-oauth-<seq>-<alias>.json`; the highest
    /// sequence for the alias wins. When none exist a fresh path with
    /// `seq = max + 1` (across the provider) is returned.
    pub fn resolve_token_file(&self, provider: &str, alias: &str) -> PathBuf {
        let mut best: Option<(u32, PathBuf)> = None;
        let mut max_seq = 0u32;

        if let Ok(entries) = std::fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Some((seq, file_alias)) = parse_token_file_name(name, provider) else {
                    continue;
                };
                max_seq = max_seq.max(seq);
                if file_alias == alias {
                    match &best {
                        Some((best_seq, _)) if *best_seq >= seq => {}
                        _ => best = Some((seq, entry.path())),
                    }
                }
            }
        }

        match best {
            Some((_, path)) => path,
            None => self
                .root
                .join(format!("{provider}-oauth-{}-{alias}.json", max_seq + 1)),
        }
    }
}

fn parse_token_file_name<'a>(name: &'a str, provider: &str) -> Option<(u32, &'a str)> {
    let rest = name.strip_prefix(provider)?.strip_prefix("-oauth-")?;
    let rest = rest.strip_suffix(".json")?;
    let (seq, alias) = rest.split_once('-')?;
    let seq = seq.parse().ok()?;
    if alias.is_empty() {
        return None;
    }
    Some((seq, alias))
}

/// Owns all file I/O for token paths. Writes are atomic on the rename
/// boundary; a crash leaves either the old or the new content.
#[derive(Debug, Clone, Default)]
pub struct TokenStore;

impl TokenStore {
    pub fn new() -> Self {
        Self
    }

    /// Missing or unparseable files read as `None`; IO absence is not an
    /// error here.
    pub fn load(&self, path: &Path) -> Option<StoredToken> {
        let bytes = std::fs::read(path).ok()?;
        let raw = serde_json::from_slice(&bytes).ok()?;
        sanitize(raw)
    }

    pub fn save(&self, path: &Path, token: &StoredToken) -> AuthResult<()> {
        let value =
            serde_json::to_value(token).map_err(|err| AuthError::Io(err.to_string()))?;
        self.write_atomic(path, &value)
    }

    /// Gemini-CLI family layout: the token object nested under `token`,
    /// with the fields duplicated at top level for older readers.
    pub fn save_enveloped(&self, path: &Path, token: &StoredToken) -> AuthResult<()> {
        let inner =
            serde_json::to_value(token).map_err(|err| AuthError::Io(err.to_string()))?;
        let mut body = inner.clone();
        if let Some(object) = body.as_object_mut() {
            object.insert("token".to_string(), inner);
        }
        self.write_atomic(path, &body)
    }

    fn write_atomic(&self, path: &Path, value: &serde_json::Value) -> AuthResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| AuthError::Io(format!("token path has no parent: {}", path.display())))?;
        std::fs::create_dir_all(parent)?;

        let tmp = parent.join(format!(
            ".{}.tmp-{}",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("token.json"),
            std::process::id()
        ));
        let body = serde_json::to_vec_pretty(value)
            .map_err(|err| AuthError::Io(err.to_string()))?;
        std::fs::write(&tmp, &body)?;
        set_owner_only(&tmp)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Copy the current token aside so an aborted interactive flow can roll
    /// back. Returns `None` when there is nothing to back up.
    pub fn backup(&self, path: &Path) -> AuthResult<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }
        let backup = path.with_extension("json.bak");
        std::fs::copy(path, &backup)?;
        set_owner_only(&backup)?;
        Ok(Some(backup))
    }

    pub fn restore(&self, backup: &Path, path: &Path) -> AuthResult<()> {
        std::fs::rename(backup, path)?;
        Ok(())
    }

    pub fn discard(&self, backup: &Path) -> AuthResult<()> {
        match std::fs::remove_file(backup) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> AuthResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> AuthResult<()> {
    Ok(())
}
