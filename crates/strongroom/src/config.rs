use std::collections::HashMap;
use std::path::PathBuf;

use tracing::info;

use strongroom_crypto::{ConfigError, MasterKey, MasterKeyRing};

pub const MASTER_KEY_VAR: &str = "STRONGROOM_MASTER_KEY";
pub const MASTER_KEY_VERSION_VAR: &str = "STRONGROOM_MASTER_KEY_VERSION";
/// Prefix of retired master keys: `STRONGROOM_MASTER_KEY_V<version>`.
pub const RETIRED_KEY_PREFIX: &str = "STRONGROOM_MASTER_KEY_V";
pub const DB_PATH_VAR: &str = "STRONGROOM_DB_PATH";

const DEFAULT_KEY_VERSION: u32 = 1;
const DEFAULT_DB_PATH: &str = "strongroom.db";

/// Everything read from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub ring: MasterKeyRing,
    pub db_path: PathBuf,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env if present
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let current_version = match vars.get(MASTER_KEY_VERSION_VAR) {
            Some(value) => parse_version(MASTER_KEY_VERSION_VAR, value)?,
            None => DEFAULT_KEY_VERSION,
        };
        let current = MasterKey::from_base64(
            MASTER_KEY_VAR,
            vars.get(MASTER_KEY_VAR).map(String::as_str).unwrap_or_default(),
        )?;
        let mut ring = MasterKeyRing::new(current_version, current);

        let mut retired: Vec<(&String, &String)> = vars
            .iter()
            .filter(|(name, _)| name.starts_with(RETIRED_KEY_PREFIX) && name.as_str() != MASTER_KEY_VERSION_VAR)
            .collect();
        retired.sort();
        for (name, value) in retired {
            let version = parse_version(name, &name[RETIRED_KEY_PREFIX.len()..])?;
            ring = ring.with_retired(version, MasterKey::from_base64(name, value)?)?;
        }

        let db_path = vars
            .get(DB_PATH_VAR)
            .cloned()
            .unwrap_or_else(|| DEFAULT_DB_PATH.into())
            .into();

        info!(
            current_version = ring.current_version(),
            versions = ?ring.versions(),
            "Configuration loaded"
        );
        Ok(Self { ring, db_path })
    }
}

fn parse_version(name: &str, value: &str) -> Result<u32, ConfigError> {
    let invalid = || ConfigError::InvalidVersion {
        name: name.to_string(),
        value: value.to_string(),
    };
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse().map_err(|_| invalid())
}
