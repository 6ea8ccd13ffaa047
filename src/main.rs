mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use scour::metadata::ModuleMetadata;
use scour::modules::{FunctionName, ModuleConfig};
use scour::orchestrator::Outcome;
use scour::providers::{SelectorProvider, SelectorRules};
use scour::subtitles::SubtitleTrack;
use scour::Scour;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Subtitles { file, offset } = &cli.command {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        let track = SubtitleTrack::parse_with_offset(
            &content,
            file.file_name().and_then(|n| n.to_str()),
            *offset,
        );
        println!("{} cues", track.len());
        for cue in &track.cues {
            println!("[{:>9.3} -> {:>9.3}] {}", cue.start_time, cue.end_time, cue.text);
        }
        return Ok(());
    }

    let (scour, module_id, meta) = setup(&cli)?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Modules => {
            for id in scour.list_modules() {
                let caps = scour.capabilities(&id).unwrap_or_default();
                println!("Module: {}", id);
                for (name, present) in [
                    (FunctionName::SearchResults, caps.search_results),
                    (FunctionName::ExtractDetails, caps.extract_details),
                    (FunctionName::ExtractEpisodes, caps.extract_episodes),
                    (FunctionName::ExtractStreamUrl, caps.extract_stream_url),
                ] {
                    println!("  {}: {}", name, if present { "yes" } else { "no" });
                }
            }
        }
        Commands::Search { query } => {
            match scour.search(&module_id, &meta, &query, false, &cancel).await? {
                Outcome::Complete(items) => {
                    for item in items {
                        println!("{} ({})", item.title, item.href);
                    }
                }
                Outcome::Empty => println!("No results."),
                Outcome::Cancelled => println!("Cancelled."),
            }
        }
        Commands::Details { url } => {
            match scour
                .details_and_episodes(&module_id, &meta, &url, &cancel)
                .await?
            {
                Outcome::Complete(bundle) => {
                    for detail in &bundle.details {
                        println!("Description: {}", detail.description);
                        if !detail.aliases.is_empty() {
                            println!("Aliases: {}", detail.aliases);
                        }
                        if !detail.airdate.is_empty() {
                            println!("Airdate: {}", detail.airdate);
                        }
                    }
                    println!("{} episodes", bundle.episodes.len());
                    for ep in &bundle.episodes {
                        println!("  {:>4}  {}  {}", ep.number, ep.title, ep.href);
                    }
                }
                Outcome::Empty => println!("Nothing extracted."),
                Outcome::Cancelled => println!("Cancelled."),
            }
        }
        Commands::Streams { url } => {
            match scour.stream_url(&module_id, &meta, &url, false, &cancel).await? {
                Outcome::Complete(result) => {
                    for stream in result.streams.unwrap_or_default() {
                        println!("stream: {}", stream);
                    }
                    for source in result.sources.unwrap_or_default() {
                        println!(
                            "source: {} [{}]",
                            source.url,
                            source.quality.or(source.label).unwrap_or_default()
                        );
                    }
                    for subtitle in result.subtitles.unwrap_or_default() {
                        println!("subtitles: {}", subtitle);
                    }
                }
                Outcome::Empty => println!("No streams found."),
                Outcome::Cancelled => println!("Cancelled."),
            }
            for message in scour.console_messages(&module_id) {
                eprintln!("[module] {}", message.text);
            }
        }
        Commands::Subtitles { .. } => unreachable!(),
    }

    Ok(())
}

fn setup(cli: &Cli) -> Result<(Scour, String, ModuleMetadata)> {
    let Some(metadata_path) = &cli.metadata else {
        bail!("--metadata <file.json> is required for this command");
    };
    let Some(rules_path) = &cli.rules else {
        bail!("--rules <file.toml> is required for this command");
    };

    let payload = std::fs::read_to_string(metadata_path)
        .with_context(|| format!("reading {}", metadata_path.display()))?;
    let meta = ModuleMetadata::from_json(&payload).context("parsing module metadata")?;

    let rules_payload = std::fs::read_to_string(rules_path)
        .with_context(|| format!("reading {}", rules_path.display()))?;
    let rules = SelectorRules::from_toml(&rules_payload).context("parsing selector rules")?;

    let config = cli
        .config
        .as_ref()
        .map(|p| ModuleConfig::load(p))
        .unwrap_or_default();

    let scour = Scour::new()?;
    let module_id = meta.source_name.clone();
    scour.load_module(
        &module_id,
        &meta.source_name,
        &SelectorProvider::factory(rules),
        &config,
    )?;
    Ok((scour, module_id, meta))
}
