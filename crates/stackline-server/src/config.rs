use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use stackline_api::validation::{normalize_email, validate_email, validate_password};

const PLACEHOLDER_SECRETS: &[&str] = &[
    "dev-secret-change-me",
    "change-me",
    "changeme",
    "secret",
    "your-secret-here",
];
const MIN_SECRET_LEN: usize = 16;

/// Bootstrap admin seeded on every start.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub addr: SocketAddr,
    /// `None` leaves CORS permissive.
    pub allowed_origin: Option<String>,
    pub google_client_id: Option<String>,
    pub admin: Option<AdminSeed>,
}

impl Config {
    /// Read the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("STACKLINE_JWT_SECRET").context("STACKLINE_JWT_SECRET must be set")?;
        check_secret(&jwt_secret)?;

        let host = var("STACKLINE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = match var("STACKLINE_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("STACKLINE_PORT '{}' is not a port number", raw))?,
            None => 3000,
        };
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

        let admin = match (var("STACKLINE_ADMIN_EMAIL"), var("STACKLINE_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => {
                let email = normalize_email(&email);
                validate_email(&email).map_err(anyhow::Error::msg)?;
                validate_password(&password).map_err(anyhow::Error::msg)?;
                Some(AdminSeed { email, password })
            }
            (None, None) => None,
            _ => bail!("STACKLINE_ADMIN_EMAIL and STACKLINE_ADMIN_PASSWORD must be set together"),
        };

        Ok(Self {
            db_path: PathBuf::from(var("STACKLINE_DB_PATH").unwrap_or_else(|| "stackline.db".into())),
            jwt_secret,
            addr,
            allowed_origin: var("STACKLINE_ALLOWED_ORIGIN"),
            google_client_id: var("GOOGLE_CLIENT_ID"),
            admin,
        })
    }
}

fn check_secret(secret: &str) -> Result<()> {
    if PLACEHOLDER_SECRETS.contains(&secret.to_ascii_lowercase().as_str()) {
        bail!("STACKLINE_JWT_SECRET is a placeholder, set a real secret");
    }
    if secret.len() < MIN_SECRET_LEN {
        bail!(
            "STACKLINE_JWT_SECRET must be at least {} characters",
            MIN_SECRET_LEN
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    const SECRET: (&str, &str) = ("STACKLINE_JWT_SECRET", "0f4c1d9e7a2b8c3d5e6f");

    #[test]
    fn defaults() {
        let config = load(&[SECRET]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("stackline.db"));
        assert_eq!(config.addr, "0.0.0.0:3000".parse().unwrap());
        assert!(config.allowed_origin.is_none());
        assert!(config.google_client_id.is_none());
        assert!(config.admin.is_none());
    }

    #[test]
    fn secret_is_required_and_not_a_placeholder() {
        assert!(load(&[]).is_err());
        assert!(load(&[("STACKLINE_JWT_SECRET", "dev-secret-change-me")]).is_err());
        assert!(load(&[("STACKLINE_JWT_SECRET", "short")]).is_err());
    }

    #[test]
    fn overrides() {
        let config = load(&[
            SECRET,
            ("STACKLINE_HOST", "127.0.0.1"),
            ("STACKLINE_PORT", "8080"),
            ("STACKLINE_DB_PATH", "/var/lib/stackline/data.db"),
            ("STACKLINE_ALLOWED_ORIGIN", "https://dashboard.example.com"),
            ("GOOGLE_CLIENT_ID", "123.apps.googleusercontent.com"),
        ])
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.db_path, PathBuf::from("/var/lib/stackline/data.db"));
        assert_eq!(config.allowed_origin.as_deref(), Some("https://dashboard.example.com"));
        assert_eq!(config.google_client_id.as_deref(), Some("123.apps.googleusercontent.com"));

        assert!(load(&[SECRET, ("STACKLINE_PORT", "http")]).is_err());
    }

    #[test]
    fn admin_seed_needs_both_halves() {
        let config = load(&[
            SECRET,
            ("STACKLINE_ADMIN_EMAIL", " Root@Example.com "),
            ("STACKLINE_ADMIN_PASSWORD", "correct-horse"),
        ])
        .unwrap();
        let admin = config.admin.unwrap();
        assert_eq!(admin.email, "root@example.com");

        assert!(load(&[SECRET, ("STACKLINE_ADMIN_EMAIL", "root@example.com")]).is_err());
        assert!(load(&[
            SECRET,
            ("STACKLINE_ADMIN_EMAIL", "root@example.com"),
            ("STACKLINE_ADMIN_PASSWORD", "short"),
        ])
        .is_err());
    }
}
