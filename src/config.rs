use std::{env, path::PathBuf};

use anyhow::{Context, Result, anyhow, bail};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TOKEN_AUDIENCE: &str = "society-cms";
const DEFAULT_TOKEN_ISSUER: &str = "society-cms";
const DEFAULT_TOKEN_EXPIRY_MINUTES: i64 = 60;
const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;
const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];
const DEFAULT_MAX_BATCH: usize = 20;
const DEFAULT_UPLOAD_ROOT: &str = "storage/uploads";
const DEFAULT_PUBLIC_PREFIX: &str = "/uploads";
const DEFAULT_SUPABASE_BUCKET: &str = "uploads";
const MIN_SECRET_LEN: usize = 32;

/// Process-wide settings, read once at startup and shared read-only.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub development: bool,
    pub token: TokenSettings,
    pub upload: UploadSettings,
    pub storage: StorageSettings,
    pub seed_admin: SeedAdmin,
}

#[derive(Clone, Debug)]
pub struct TokenSettings {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub expiry_minutes: i64,
}

#[derive(Clone, Debug)]
pub struct UploadSettings {
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    pub max_batch: usize,
}

#[derive(Clone, Debug)]
pub enum StorageSettings {
    Local {
        root: PathBuf,
        public_prefix: String,
    },
    Supabase {
        url: String,
        service_key: String,
        bucket: String,
    },
}

#[derive(Clone, Debug)]
pub struct SeedAdmin {
    pub username: String,
    pub password: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = get("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let port = match get("PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PORT must be a port number, got `{raw}`"))?,
            None => DEFAULT_PORT,
        };

        let development = get("APP_ENV")
            .map(|value| value.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        let secret = get("JWT_SECRET").context("JWT_SECRET env var is missing")?;
        if secret.len() < MIN_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} bytes long");
        }

        let expiry_minutes = match get("JWT_EXPIRY_MINUTES") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|minutes| *minutes > 0)
                .ok_or_else(|| anyhow!("JWT_EXPIRY_MINUTES must be a positive integer"))?,
            None => DEFAULT_TOKEN_EXPIRY_MINUTES,
        };

        let token = TokenSettings {
            secret,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| DEFAULT_TOKEN_ISSUER.to_string()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| DEFAULT_TOKEN_AUDIENCE.to_string()),
            expiry_minutes,
        };

        let max_file_size = match get("UPLOAD_MAX_FILE_SIZE") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| anyhow!("UPLOAD_MAX_FILE_SIZE must be a positive byte count"))?,
            None => DEFAULT_MAX_FILE_SIZE,
        };

        let allowed_extensions = match get("UPLOAD_ALLOWED_EXTENSIONS") {
            Some(raw) => parse_extensions(&raw),
            None => DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        };
        if allowed_extensions.is_empty() {
            bail!("UPLOAD_ALLOWED_EXTENSIONS must list at least one extension");
        }

        let max_batch = match get("UPLOAD_MAX_BATCH") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|count| *count > 0)
                .ok_or_else(|| anyhow!("UPLOAD_MAX_BATCH must be a positive integer"))?,
            None => DEFAULT_MAX_BATCH,
        };

        let storage = match get("STORAGE_BACKEND").as_deref() {
            None | Some("local") => StorageSettings::Local {
                root: PathBuf::from(
                    get("UPLOAD_ROOT").unwrap_or_else(|| DEFAULT_UPLOAD_ROOT.to_string()),
                ),
                public_prefix: public_prefix(
                    &get("UPLOAD_PUBLIC_PREFIX")
                        .unwrap_or_else(|| DEFAULT_PUBLIC_PREFIX.to_string()),
                )?,
            },
            Some("supabase") => StorageSettings::Supabase {
                url: get("SUPABASE_URL")
                    .context("SUPABASE_URL is required when STORAGE_BACKEND=supabase")?
                    .trim_end_matches('/')
                    .to_string(),
                service_key: get("SUPABASE_SERVICE_KEY")
                    .context("SUPABASE_SERVICE_KEY is required when STORAGE_BACKEND=supabase")?,
                bucket: get("SUPABASE_BUCKET")
                    .unwrap_or_else(|| DEFAULT_SUPABASE_BUCKET.to_string()),
            },
            Some(other) => bail!("unknown STORAGE_BACKEND `{other}` (expected local or supabase)"),
        };

        let seed_admin = SeedAdmin {
            username: get("ADMIN_USERNAME").unwrap_or_else(|| "admin".to_string()),
            password: get("ADMIN_PASSWORD").unwrap_or_else(|| "admin123".to_string()),
        };

        Ok(Self {
            database_url,
            port,
            development,
            token,
            upload: UploadSettings {
                max_file_size,
                allowed_extensions,
                max_batch,
            },
            storage,
            seed_admin,
        })
    }
}

/// Normalizes `jpg, .PNG ,webp` into `[".jpg", ".png", ".webp"]`.
fn parse_extensions(raw: &str) -> Vec<String> {
    let mut extensions: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim().trim_start_matches('.').to_ascii_lowercase();
        if trimmed.is_empty() {
            continue;
        }
        let ext = format!(".{trimmed}");
        if !extensions.contains(&ext) {
            extensions.push(ext);
        }
    }
    extensions
}

/// Normalizes the mount point of local uploads to `/segment[/segment]`.
/// The root path is rejected.
fn public_prefix(raw: &str) -> Result<String> {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        bail!("UPLOAD_PUBLIC_PREFIX must name a path below `/`, got `{raw}`");
    }
    Ok(format!("/{trimmed}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_optional_keys_are_absent() {
        let config = load(&[("DATABASE_URL", "postgres://db"), ("JWT_SECRET", SECRET)])
            .expect("config");

        assert_eq!(config.port, 8080);
        assert!(!config.development);
        assert_eq!(config.token.expiry_minutes, 60);
        assert_eq!(config.token.issuer, "society-cms");
        assert_eq!(config.upload.max_file_size, 5 * 1024 * 1024);
        assert_eq!(
            config.upload.allowed_extensions,
            vec![".jpg", ".jpeg", ".png", ".webp"]
        );
        assert_eq!(config.seed_admin.username, "admin");
        match config.storage {
            StorageSettings::Local {
                root,
                public_prefix,
            } => {
                assert_eq!(root, PathBuf::from("storage/uploads"));
                assert_eq!(public_prefix, "/uploads");
            }
            other => panic!("unexpected storage settings: {other:?}"),
        }
    }

    #[test]
    fn extensions_are_normalized_and_deduplicated() {
        assert_eq!(
            parse_extensions("jpg, .PNG ,webp,,.jpg"),
            vec![".jpg", ".png", ".webp"]
        );
    }

    #[test]
    fn missing_secret_is_rejected() {
        let err = load(&[("DATABASE_URL", "postgres://db")]).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(load(&[("DATABASE_URL", "postgres://db"), ("JWT_SECRET", "short")]).is_err());
    }

    #[test]
    fn supabase_backend_requires_credentials() {
        let err = load(&[
            ("DATABASE_URL", "postgres://db"),
            ("JWT_SECRET", SECRET),
            ("STORAGE_BACKEND", "supabase"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("SUPABASE_URL"));

        let config = load(&[
            ("DATABASE_URL", "postgres://db"),
            ("JWT_SECRET", SECRET),
            ("STORAGE_BACKEND", "supabase"),
            ("SUPABASE_URL", "https://project.supabase.co/"),
            ("SUPABASE_SERVICE_KEY", "service"),
        ])
        .expect("config");
        match config.storage {
            StorageSettings::Supabase { url, bucket, .. } => {
                assert_eq!(url, "https://project.supabase.co");
                assert_eq!(bucket, "uploads");
            }
            other => panic!("unexpected storage settings: {other:?}"),
        }
    }

    #[test]
    fn development_mode_and_overrides_are_read() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db"),
            ("JWT_SECRET", SECRET),
            ("APP_ENV", "Development"),
            ("JWT_EXPIRY_MINUTES", "15"),
            ("UPLOAD_MAX_FILE_SIZE", "1024"),
            ("UPLOAD_PUBLIC_PREFIX", "media/"),
        ])
        .expect("config");

        assert!(config.development);
        assert_eq!(config.token.expiry_minutes, 15);
        assert_eq!(config.upload.max_file_size, 1024);
        match config.storage {
            StorageSettings::Local { public_prefix, .. } => assert_eq!(public_prefix, "/media"),
            other => panic!("unexpected storage settings: {other:?}"),
        }
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(
            load(&[
                ("DATABASE_URL", "postgres://db"),
                ("JWT_SECRET", SECRET),
                ("JWT_EXPIRY_MINUTES", "0"),
            ])
            .is_err()
        );
        assert!(
            load(&[
                ("DATABASE_URL", "postgres://db"),
                ("JWT_SECRET", SECRET),
                ("PORT", "not-a-port"),
            ])
            .is_err()
        );
    }

    #[test]
    fn root_public_prefix_is_rejected() {
        for prefix in ["/", "//", " / "] {
            let err = load(&[
                ("DATABASE_URL", "postgres://db"),
                ("JWT_SECRET", SECRET),
                ("UPLOAD_PUBLIC_PREFIX", prefix),
            ])
            .expect_err("root prefix");
            assert!(err.to_string().contains("UPLOAD_PUBLIC_PREFIX"));
        }
    }

    #[test]
    fn nested_public_prefix_is_trimmed() {
        assert_eq!(public_prefix("//static/media//").expect("prefix"), "/static/media");
    }
}
