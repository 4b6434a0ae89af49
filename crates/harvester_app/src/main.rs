mod cli;
mod config;
mod logging;

use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use harvest_logging::{harvest_error, level_for_verbosity};
use harvester_core::{FetchResult, HarvestRequest, MimeKind};
use harvester_engine::Harvester;
use serde_json::json;

use crate::cli::{Cli, Command};
use crate::config::{AppConfig, API_KEY_VAR};
use crate::logging::LogDestination;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let destination = LogDestination::for_log_file(cli.log_file.clone(), cli.quiet);
    logging::initialize(&destination, level_for_verbosity(cli.verbose));

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            harvest_error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let api_key = env::var(API_KEY_VAR).with_context(|| format!("{API_KEY_VAR} is not set"))?;
    let harvester = Harvester::from_config(config.into_engine_config(api_key))?;
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;

    let output = match cli.command {
        Command::Harvest {
            target,
            native_id,
            namespace,
        } => {
            let mut request = HarvestRequest::new(target);
            if let (Some(namespace), Some(native_id)) = (namespace, native_id) {
                request = request.with_native_id(namespace, native_id);
            }
            let result = runtime
                .block_on(harvester.harvest(&request))
                .with_context(|| format!("harvesting {}", request.url))?;
            serde_json::to_string_pretty(&result.to_response())?
        }
        Command::Fetch { target } => {
            let fetch = runtime
                .block_on(harvester.fetch(&target))
                .with_context(|| format!("fetching {target}"))?;
            let is_soft_block = harvester.is_soft_block(&fetch);
            serde_json::to_string_pretty(&fetch_summary(&fetch, is_soft_block))?
        }
    };

    println!("{output}");
    Ok(())
}

fn fetch_summary(fetch: &FetchResult, is_soft_block: bool) -> serde_json::Value {
    json!({
        "resolved_url": fetch.final_url(),
        "status": fetch.status(),
        "content_type": fetch.content_type(),
        "mime": MimeKind::sniff(fetch.body(), fetch.content_type()).as_str(),
        "is_soft_block": is_soft_block,
        "bytes": fetch.byte_len(),
        "redirect_chain": fetch.redirect_chain().hops(),
    })
}

#[cfg(test)]
mod tests {
    use super::fetch_summary;
    use harvester_core::{FetchResult, RedirectChain};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn fetch_summary_omits_the_body() {
        let fetch = FetchResult::new(
            RedirectChain::new("https://doi.org/10.1/x"),
            "https://publisher.example.org/x",
            200,
            Some("application/pdf".to_string()),
            b"%PDF-1.7 body".to_vec(),
        );

        assert_eq!(
            fetch_summary(&fetch, false),
            json!({
                "resolved_url": "https://publisher.example.org/x",
                "status": 200,
                "content_type": "application/pdf",
                "mime": "pdf",
                "is_soft_block": false,
                "bytes": 13,
                "redirect_chain": ["https://doi.org/10.1/x", "https://publisher.example.org/x"],
            })
        );
    }
}
