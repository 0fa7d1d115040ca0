//! `headspace config` subcommands.

use hs_domain::config::{Config, ConfigSeverity};

/// Returns `false` when the configuration has hard errors.
pub fn validate(config: &Config, path: &std::path::Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: ok", path.display());
        return true;
    }
    for issue in &issues {
        let tag = match issue.severity {
            ConfigSeverity::Warning => "warning",
            ConfigSeverity::Error => "error",
        };
        println!("{tag}: {issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("could not render config: {e}"),
    }
}
