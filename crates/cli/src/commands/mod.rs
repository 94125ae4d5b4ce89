//! CLI command implementations

pub mod bounds;
pub mod check;
pub mod status;

use anyhow::Result;

use crate::config::Config;
use crate::output::{print_info, print_json, print_success, OutputFormat};

/// Save any given settings, then show the effective configuration
pub fn update_config(
    mut config: Config,
    api_url: Option<String>,
    format: Option<OutputFormat>,
    output: OutputFormat,
) -> Result<()> {
    let changed = api_url.is_some() || format.is_some();
    if let Some(url) = api_url {
        url::Url::parse(&url)?;
        config.api_url = Some(url);
    }
    if let Some(format) = format {
        config.default_format = Some(format);
    }

    if changed {
        config.save()?;
        print_success(&format!("Saved {}", Config::config_path()?.display()));
    }

    match output {
        OutputFormat::Json => print_json(&config)?,
        OutputFormat::Table => {
            print_info(&format!(
                "API URL: {}",
                config.api_url.as_deref().unwrap_or("(default)")
            ));
            print_info(&format!(
                "Format:  {:?}",
                config.default_format.unwrap_or_default()
            ));
        }
    }
    Ok(())
}
