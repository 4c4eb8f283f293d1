use sa_domain::config::{AuthMode, Config, ConfigSeverity};

/// Parse and validate the config, printing any issues.
///
/// Exits with code 0 when valid, code 1 when errors are found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!(
        "\n{} error(s), {} warning(s) in {config_path}",
        error_count, warning_count,
    );

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}

/// Find the provider's `service`/`account` keychain coordinates, requiring
/// `auth.mode = "keychain"` since that's the only mode backed by the OS
/// keychain (see `sa_providers::util::resolve_api_key`'s precedence order).
fn keychain_coords<'a>(config: &'a Config, provider_id: &str) -> anyhow::Result<(&'a str, &'a str)> {
    let provider = config
        .llm
        .providers
        .iter()
        .find(|p| p.id == provider_id)
        .ok_or_else(|| anyhow::anyhow!("no provider with id '{provider_id}' in config"))?;

    if provider.auth.mode != AuthMode::Keychain {
        anyhow::bail!(
            "provider '{provider_id}' has auth.mode = {:?}, not 'keychain' — \
             set-secret/get-secret only apply to keychain-backed providers",
            provider.auth.mode
        );
    }

    let service = provider
        .auth
        .service
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("provider '{provider_id}' is missing auth.service"))?;
    let account = provider
        .auth
        .account
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("provider '{provider_id}' is missing auth.account"))?;

    Ok((service, account))
}

/// Prompt for a secret on stdin and store it in the OS keychain under the
/// provider's configured `service`/`account` coordinates.
pub fn set_secret(config: &Config, provider_id: &str) -> anyhow::Result<()> {
    let (service, account) = keychain_coords(config, provider_id)?;

    print!("Enter API key for '{provider_id}' ({service}/{account}): ");
    std::io::Write::flush(&mut std::io::stdout())?;
    let secret = rpassword::read_password()?;
    if secret.is_empty() {
        anyhow::bail!("empty secret, not storing");
    }

    keyring::Entry::new(service, account)?.set_password(&secret)?;
    println!("Stored API key for '{provider_id}' in the OS keychain.");
    Ok(())
}

/// Read the stored secret back and print a masked preview, confirming it's
/// present without echoing the full value to the terminal.
pub fn get_secret(config: &Config, provider_id: &str) -> anyhow::Result<()> {
    let (service, account) = keychain_coords(config, provider_id)?;

    let secret = keyring::Entry::new(service, account)?.get_password()?;
    let masked = if secret.len() <= 8 {
        "*".repeat(secret.len())
    } else {
        format!("{}...{}", &secret[..4], &secret[secret.len() - 4..])
    };
    println!("'{provider_id}' ({service}/{account}): {masked}");
    Ok(())
}
