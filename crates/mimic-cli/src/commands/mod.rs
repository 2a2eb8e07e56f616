use anyhow::{anyhow, Result};

pub mod channels;
pub mod harvest;

/// Resolve a required identifier from its flag or environment fallback.
pub fn required(flag: Option<String>, env_key: &str, what: &str) -> Result<String> {
    if let Some(value) = flag {
        return Ok(value);
    }
    std::env::var(env_key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("missing {}: pass the flag or set {}", what, env_key))
}

/// Bot token comes from the environment only; it never belongs on argv.
pub fn token() -> Result<String> {
    std::env::var("MIMIC_TOKEN")
        .or_else(|_| std::env::var("BOT_TOKEN"))
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("missing bot token: set MIMIC_TOKEN"))
}
