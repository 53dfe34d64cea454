//! Last.fm account credentials (`secrets.toml`).
//!
//! The password is never stored; only its md5 hex digest, which is what
//! Last.fm's mobile session handshake expects. A missing or unusable file is
//! replaced by asking the user for each value.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::config::config_dir;
use crate::error::{Result, SyncError};

static MD5_HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{32}$").unwrap());

pub fn default_secrets_path() -> PathBuf {
    config_dir().join("secrets.toml")
}

/// md5 hex digest of a password, as Last.fm expects it.
pub fn password_hash(password: &str) -> String {
    format!("{:x}", md5::compute(password.as_bytes()))
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password_hash: String,
    pub api_key: String,
    pub api_secret: String,
}

// Keeps secrets out of debug logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Reads and validates the secrets file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Credentials(format!("cannot read {}: {}", path.display(), e))
        })?;
        let creds: Credentials = toml::from_str(&content).map_err(|e| {
            SyncError::Credentials(format!("cannot parse {}: {}", path.display(), e))
        })?;
        creds.validate()?;
        Ok(creds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(SyncError::Credentials("username is empty".to_string()));
        }
        if !MD5_HEX.is_match(&self.password_hash) {
            return Err(SyncError::Credentials(
                "password_hash is not an md5 hex digest".to_string(),
            ));
        }
        if self.api_key.trim().is_empty() || self.api_secret.trim().is_empty() {
            return Err(SyncError::Credentials(
                "api_key and api_secret are required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Credentials(format!("cannot serialize: {}", e)))?;
        let write = || -> io::Result<()> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(path)?;
            // `mode` only applies to new files; tighten an existing one too.
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(fs::Permissions::from_mode(0o600))?;
            }
            file.write_all(content.as_bytes())
        };
        write().map_err(|e| {
            SyncError::Credentials(format!(
                "error saving secrets file {}: {}",
                path.display(),
                e
            ))
        })?;
        log::info!("Saved credentials to {}", path.display());
        Ok(())
    }

    /// Asks for every value and hashes the password.
    pub fn prompt(prompt: &mut dyn Prompt) -> Result<Self> {
        let username = ask(prompt, "Enter Last.fm username: ", false)?;
        let password = ask(prompt, "Enter Last.fm password: ", true)?;
        let api_key = ask(prompt, "Enter Last.fm API key: ", false)?;
        let api_secret = ask(prompt, "Enter Last.fm API secret: ", true)?;

        let creds = Credentials {
            username,
            password_hash: password_hash(&password),
            api_key,
            api_secret,
        };
        creds.validate()?;
        Ok(creds)
    }

    /// Loads the secrets file, or prompts for new credentials and saves them
    /// when the file is missing or unusable.
    pub fn load_or_create(path: &Path, prompt: &mut dyn Prompt) -> Result<Self> {
        if path.exists() {
            match Self::load(path) {
                Ok(creds) => {
                    log::debug!("Loaded credentials from {}", path.display());
                    return Ok(creds);
                }
                Err(e) => log::warn!("{}; asking for new credentials", e),
            }
        }
        let creds = Self::prompt(prompt)?;
        creds.save(path)?;
        Ok(creds)
    }
}

// ============================================================================
// Prompting
// ============================================================================

fn ask(prompt: &mut dyn Prompt, label: &str, secret: bool) -> Result<String> {
    let value = prompt
        .ask(label, secret)
        .map_err(|e| SyncError::Credentials(format!("cannot read input: {}", e)))?;
    Ok(value.trim().to_string())
}

/// Source of interactive answers.
pub trait Prompt {
    /// Shows `label` and returns one line of input. `secret` marks values
    /// that should not be echoed where the terminal allows it.
    fn ask(&mut self, label: &str, secret: bool) -> io::Result<String>;
}

/// Reads answers from stdin.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&mut self, label: &str, _secret: bool) -> io::Result<String> {
        let mut stdout = io::stdout();
        stdout.write_all(label.as_bytes())?;
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stdin closed",
            ));
        }
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<&'static str>);

    impl Prompt for Scripted {
        fn ask(&mut self, _label: &str, _secret: bool) -> io::Result<String> {
            self.0
                .pop_front()
                .map(str::to_string)
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no more answers"))
        }
    }

    fn scripted() -> Scripted {
        Scripted(VecDeque::from(vec![
            " dummy \n",
            "secretpw\n",
            "0123456789abcdef0123456789abcdef\n",
            "fedcba9876543210fedcba9876543210\n",
        ]))
    }

    #[test]
    fn test_password_hash() {
        assert_eq!(password_hash("secretpw"), "51149f6fea1a3179b364f1994e06e4d4");
        assert_eq!(password_hash(""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_prompt_trims_and_hashes() {
        let creds = Credentials::prompt(&mut scripted()).unwrap();
        assert_eq!(creds.username, "dummy");
        assert_eq!(creds.password_hash, "51149f6fea1a3179b364f1994e06e4d4");
        assert_eq!(creds.api_key, "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn test_load_or_create_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");

        let creds = Credentials::load_or_create(&path, &mut scripted()).unwrap();
        assert!(path.exists());
        assert_eq!(Credentials::load(&path).unwrap(), creds);
    }

    #[test]
    fn test_load_or_create_uses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(
            &path,
            "username = \"dummy\"\n\
             password_hash = \"00000000000000000000000000000000\"\n\
             api_key = \"00000000000000000000000000000000\"\n\
             api_secret = \"00000000000000000000000000000000\"\n",
        )
        .unwrap();

        let mut no_answers = Scripted(VecDeque::new());
        let creds = Credentials::load_or_create(&path, &mut no_answers).unwrap();
        assert_eq!(creds.username, "dummy");
        assert_eq!(creds.password_hash, "00000000000000000000000000000000");
    }

    #[test]
    fn test_corrupt_file_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "").unwrap();

        let creds = Credentials::load_or_create(&path, &mut scripted()).unwrap();
        assert_eq!(creds.username, "dummy");
        assert_eq!(Credentials::load(&path).unwrap(), creds);
    }

    #[cfg(unix)]
    #[test]
    fn test_secrets_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "stale").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let creds = Credentials::prompt(&mut scripted()).unwrap();
        creds.save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(Credentials::load(&path).unwrap(), creds);
    }

    #[test]
    fn test_plaintext_password_rejected() {
        let creds = Credentials {
            username: "dummy".to_string(),
            password_hash: "hunter2".to_string(),
            api_key: "k".to_string(),
            api_secret: "s".to_string(),
        };
        assert!(matches!(creds.validate(), Err(SyncError::Credentials(_))));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let creds = Credentials::prompt(&mut scripted()).unwrap();
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("fedcba"));
        assert!(!shown.contains("51149f"));
    }
}
