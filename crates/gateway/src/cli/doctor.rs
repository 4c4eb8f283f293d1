use sa_domain::config::{Config, ConfigSeverity};
use sa_providers::registry::ProviderRegistry;

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("serialagent doctor");
    println!("==================\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_llm_providers(config, &mut all_passed);
    check_stt_backend(config, &mut all_passed);

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_llm_providers(config: &Config, all_passed: &mut bool) {
    match ProviderRegistry::from_config(&config.llm) {
        Ok(registry) => {
            let ready = registry.len();
            let failed = registry.init_errors().len();
            let ok = ready > 0 || failed == 0;
            let detail = if failed == 0 {
                format!("{ready} provider(s) ready")
            } else {
                format!("{ready} provider(s) ready, {failed} failed to initialize")
            };
            print_check("LLM providers", ok, detail);
            for err in registry.init_errors() {
                println!("      {} ({}): {}", err.provider_id, err.kind, err.error);
            }
            if !ok {
                *all_passed = false;
            }
        }
        Err(e) => {
            print_check("LLM providers", false, e.to_string());
            *all_passed = false;
        }
    }
}

fn check_stt_backend(config: &Config, all_passed: &mut bool) {
    let backend = &config.stt.default_backend;
    let ok = backend == "mock";
    print_check(
        "STT backend",
        ok,
        if ok {
            format!("{backend} (only backend shipped)")
        } else {
            format!("{backend} (unrecognized, falls back to mock at runtime)")
        },
    );
    if !ok {
        *all_passed = false;
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
