//! INI serialization logic for converting `ConfigFile` → INI string.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let pipeline = &config.pipeline;
    let storage = &config.storage;
    let (mirror_brand, mirror_bucket) = pipeline
        .mirror
        .as_ref()
        .map(|m| (m.brand.as_str(), m.bucket.as_str()))
        .unwrap_or(("", ""));
    let overrides: String = pipeline
        .bucket_overrides
        .iter()
        .map(|(prefix, bucket)| format!("{} = {}\n", prefix, bucket))
        .collect();

    format!(
        r#"[pipeline]
; Directory holding package working trees between build and publish
work_dir = {}
; Concurrent image resize/encode jobs
image_workers = {}
; Concurrent source asset downloads per build
fetch_concurrency = {}
; Concurrent uploads per platform tree
upload_concurrency = {}

[storage]
; Object store backend:
;   local - one directory per bucket under `root`
;   s3    - S3 API; credentials come from the standard AWS chain
;           (AWS_* environment variables, profile, instance metadata)
backend = {}
root = {}
; S3-compatible service URL; leave empty for AWS
endpoint = {}
region = {}
allow_http = {}
; Buckets are <tenant prefix>-<suffix>
source_bucket_suffix = {}
package_bucket_suffix = {}
; Per-call deadlines in seconds
fetch_timeout = {}
upload_timeout = {}
; Attempts per storage call, including the first
retry_attempts = {}

[mirror]
; Secondary white-label destination; leave brand and bucket empty to disable
brand = {}
bucket = {}
; Endpoint for the mirror bucket (defaults to storage.endpoint)
endpoint = {}

[bucket_overrides]
; tenant_prefix = bucket
{}
[logging]
directory = {}
file = {}
"#,
        path_to_string(&pipeline.work_dir),
        pipeline.image_workers,
        pipeline.fetch_concurrency,
        pipeline.upload_concurrency,
        storage.backend,
        path_to_string(&storage.root),
        storage.endpoint.as_deref().unwrap_or(""),
        storage.region.as_deref().unwrap_or(""),
        storage.allow_http,
        pipeline.source_bucket_suffix,
        pipeline.package_bucket_suffix,
        pipeline.fetch_timeout.as_secs(),
        pipeline.upload_timeout.as_secs(),
        pipeline.retry_attempts,
        mirror_brand,
        mirror_bucket,
        storage.mirror_endpoint.as_deref().unwrap_or(""),
        overrides,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
