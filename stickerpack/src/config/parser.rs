//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;

use super::file::ConfigFileError;
use super::settings::{ConfigFile, MirrorConfig, StorageBackend};

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "expected a non-negative integer"))
}

fn parse_positive(section: &str, key: &str, value: &str) -> Result<usize, ConfigFileError> {
    match parse_number::<usize>(section, key, value)? {
        0 => Err(invalid(section, key, value, "must be at least 1")),
        n => Ok(n),
    }
}

fn parse_secs(section: &str, key: &str, value: &str) -> Result<Duration, ConfigFileError> {
    match parse_number::<u64>(section, key, value)? {
        0 => Err(invalid(section, key, value, "timeout must be at least 1 second")),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" | "" => Ok(false),
        _ => Err(invalid(section, key, value, "expected true or false")),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [pipeline] section
    if let Some(section) = ini.section(Some("pipeline")) {
        if let Some(v) = section.get("work_dir").and_then(non_empty) {
            config.pipeline.work_dir = expand_tilde(&v);
        }
        if let Some(v) = section.get("image_workers") {
            config.pipeline.image_workers = parse_positive("pipeline", "image_workers", v)?;
        }
        if let Some(v) = section.get("fetch_concurrency") {
            config.pipeline.fetch_concurrency = parse_positive("pipeline", "fetch_concurrency", v)?;
        }
        if let Some(v) = section.get("upload_concurrency") {
            config.pipeline.upload_concurrency =
                parse_positive("pipeline", "upload_concurrency", v)?;
        }
    }

    // [storage] section
    if let Some(section) = ini.section(Some("storage")) {
        if let Some(v) = section.get("backend") {
            config.storage.backend = StorageBackend::from_str(v)
                .map_err(|_| invalid("storage", "backend", v, "must be 'local' or 's3'"))?;
        }
        if let Some(v) = section.get("root").and_then(non_empty) {
            config.storage.root = expand_tilde(&v);
        }
        if let Some(v) = section.get("endpoint") {
            config.storage.endpoint = non_empty(v);
        }
        if let Some(v) = section.get("region") {
            config.storage.region = non_empty(v);
        }
        if let Some(v) = section.get("allow_http") {
            config.storage.allow_http = parse_bool("storage", "allow_http", v)?;
        }
        if let Some(v) = section.get("source_bucket_suffix").and_then(non_empty) {
            config.pipeline.source_bucket_suffix = v;
        }
        if let Some(v) = section.get("package_bucket_suffix").and_then(non_empty) {
            config.pipeline.package_bucket_suffix = v;
        }
        if let Some(v) = section.get("fetch_timeout") {
            config.pipeline.fetch_timeout = parse_secs("storage", "fetch_timeout", v)?;
        }
        if let Some(v) = section.get("upload_timeout") {
            config.pipeline.upload_timeout = parse_secs("storage", "upload_timeout", v)?;
        }
        if let Some(v) = section.get("retry_attempts") {
            let attempts: u32 = parse_number("storage", "retry_attempts", v)?;
            if attempts == 0 {
                return Err(invalid("storage", "retry_attempts", v, "must be at least 1"));
            }
            config.pipeline.retry_attempts = attempts;
        }
    }

    // [mirror] section
    if let Some(section) = ini.section(Some("mirror")) {
        let brand = section.get("brand").and_then(non_empty);
        let bucket = section.get("bucket").and_then(non_empty);
        config.pipeline.mirror = match (brand, bucket) {
            (Some(brand), Some(bucket)) => Some(MirrorConfig::new(brand, bucket)),
            (None, None) => None,
            (Some(brand), None) => {
                return Err(invalid("mirror", "bucket", "", &format!(
                    "required when brand '{}' is set",
                    brand
                )))
            }
            (None, Some(bucket)) => {
                return Err(invalid("mirror", "brand", "", &format!(
                    "required when bucket '{}' is set",
                    bucket
                )))
            }
        };
        if let Some(v) = section.get("endpoint") {
            config.storage.mirror_endpoint = non_empty(v);
        }
    }

    // [bucket_overrides] section: tenant prefix = bucket
    if let Some(section) = ini.section(Some("bucket_overrides")) {
        for (prefix, bucket) in section.iter() {
            let Some(bucket) = non_empty(bucket) else {
                return Err(invalid("bucket_overrides", prefix, bucket, "bucket name is empty"));
            };
            config
                .pipeline
                .bucket_overrides
                .insert(prefix.trim().to_string(), bucket);
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory").and_then(non_empty) {
            config.logging.directory = expand_tilde(&v);
        }
        if let Some(v) = section.get("file").and_then(non_empty) {
            config.logging.file = v;
        }
    }

    Ok(config)
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
