//! `turnstore config` — Configuration display commands.

use turnstore_config::AppConfig;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");

    if !config.has_api_key() {
        eprintln!("  No API key set (set TURNSTORE_API_KEY or OPENAI_API_KEY); only --offline works.");
    }
    Ok(())
}

pub async fn defaults() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
