use std::path::PathBuf;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workshop_core::ItemId;
use workshopd::daemon::{DaemonConfig, DaemonRuntime, publish_local_item, reset_progress};
use workshopd::sync::publish::LocalItem;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run,
    ResetProgress { include_flags: bool },
    Publish { item: LocalItem, update: Option<ItemId> },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut reset = false;
    let mut keep_flags = false;
    let mut help = false;
    let mut files: Option<(PathBuf, PathBuf)> = None;
    let mut title = None;
    let mut description = None;
    let mut update = None;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--reset-progress" => reset = true,
            "--keep-flags" => keep_flags = true,
            "--publish" => {
                let content = flag_value(&mut args, "--publish")?;
                let preview = flag_value(&mut args, "--publish")?;
                files = Some((PathBuf::from(content), PathBuf::from(preview)));
            }
            "--title" => title = Some(flag_value(&mut args, "--title")?),
            "--description" => description = Some(flag_value(&mut args, "--description")?),
            "--update" => update = Some(ItemId::from(flag_value(&mut args, "--update")?)),
            "--help" | "-h" => help = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    if help {
        return Ok(CliMode::Help);
    }
    if keep_flags && !reset {
        anyhow::bail!("--keep-flags requires --reset-progress");
    }
    if let Some((content_path, preview_path)) = files {
        if reset {
            anyhow::bail!("--publish cannot be combined with --reset-progress");
        }
        let title = title.context("--publish requires --title")?;
        return Ok(CliMode::Publish {
            item: LocalItem {
                content_path,
                preview_path,
                title,
                description: description.unwrap_or_default(),
            },
            update,
        });
    }
    if title.is_some() || description.is_some() || update.is_some() {
        anyhow::bail!("--title, --description and --update require --publish");
    }
    Ok(if reset {
        CliMode::ResetProgress {
            include_flags: !keep_flags,
        }
    } else {
        CliMode::Run
    })
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    args.next().with_context(|| format!("{flag} expects a value"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workshopd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: workshopd [--reset-progress [--keep-flags]]");
            println!("       workshopd --publish CONTENT PREVIEW --title TITLE [--description TEXT] [--update ID]");
            println!("  --reset-progress   Reset remote player progress and exit");
            println!("  --keep-flags       With --reset-progress, keep unlocked flags");
            println!("  --publish          Upload a local item and publish it, then exit");
            println!("  --update ID        With --publish, replace an item you already published");
            return Ok(());
        }
        CliMode::Publish { item, update } => {
            let config = DaemonConfig::from_env()?;
            match publish_local_item(&config, &item, update.as_ref()).await? {
                Some(receipt) => tracing::info!(
                    item_id = %receipt.id,
                    needs_legal_agreement = receipt.needs_legal_agreement,
                    "workshop item published"
                ),
                None => tracing::info!("workshop item updated"),
            }
            return Ok(());
        }
        CliMode::ResetProgress { include_flags } => {
            let config = DaemonConfig::from_env()?;
            reset_progress(&config, include_flags).await?;
            tracing::info!(include_flags, "player progress reset");
            return Ok(());
        }
        CliMode::Run => {}
    }
    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    daemon.run().await
}
