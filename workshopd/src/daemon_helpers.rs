fn build_client(base_url: Option<&str>, token: &str) -> anyhow::Result<WorkshopClient> {
    let client = match base_url {
        Some(url) => WorkshopClient::with_base_url(url, token.to_string())
            .with_context(|| format!("invalid WORKSHOP_API_URL: {url}"))?,
        None => WorkshopClient::new(token.to_string())?,
    };
    Ok(client)
}

async fn run_catalog_loop(
    engine: Arc<SyncEngine>,
    poll_interval: Duration,
    mut retry: RetryPolicy,
) {
    loop {
        let delay = match engine.run_catalog_pass().await {
            Ok(report) => {
                retry.reset();
                if !report.committed.is_empty() || !report.removed.is_empty() {
                    tracing::info!(
                        committed = report.committed.len(),
                        removed = report.removed.len(),
                        "workshop cache updated"
                    );
                }
                poll_interval
            }
            Err(err) if err.is_retryable() => {
                let delay = retry.record_failure(err.retry_after_secs());
                tracing::warn!(
                    error = %err,
                    attempt = retry.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "catalog pass failed"
                );
                delay
            }
            Err(err) => {
                retry.reset();
                tracing::error!(error = %err, "catalog pass failed");
                poll_interval
            }
        };
        tokio::time::sleep(delay).await;
    }
}

async fn run_event_loop(engine: Arc<SyncEngine>, mut events: mpsc::Receiver<PlatformEvent>) {
    while let Some(event) = events.recv().await {
        let engine = Arc::clone(&engine);
        // On-demand downloads must not wait behind a running catalog pass.
        tokio::spawn(async move {
            if let Err(err) = engine.handle_event(event).await {
                tracing::warn!(error = %err, "platform event failed");
            }
        });
    }
}

async fn seed_progress(progress: &ProgressSync, mut retry: RetryPolicy) {
    while let Err(err) = progress.ensure_loaded().await {
        let delay = retry.record_failure(err.retry_after_secs());
        tracing::warn!(
            error = %err,
            attempt = retry.failures(),
            retry_in_ms = delay.as_millis() as u64,
            "failed to load player progress"
        );
        tokio::time::sleep(delay).await;
    }
}

async fn run_progress_loop(
    progress: Arc<ProgressSync>,
    flush_interval: Duration,
    retry: RetryPolicy,
) {
    seed_progress(&progress, retry).await;
    let mut tick = tokio::time::interval(flush_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = progress.changed() => {}
        }
        match progress.flush(false).await {
            Ok(FlushOutcome::Uploaded) => tracing::debug!("player progress uploaded"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "player progress upload failed"),
        }
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_data_root() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir().context("data directory is unavailable")?;
    Ok(base.join(DEFAULT_DATA_DIR_NAME))
}

fn required_env<F>(lookup: &F, name: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{name} is not set"))
}

fn read_u64_env<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
