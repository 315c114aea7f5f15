//! The scan-job worker: claim, run, finish. Multiple workers across
//! processes are safe because claiming takes a row-level lock with
//! skip-locked semantics in a single statement.

use crate::config::Config;
use crate::spider::Spider;
use keyspider_sql::scan_jobs::{self, ScanJob};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn serve(
    cfg: Arc<Config>,
    pool: sqlx::PgPool,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let spider = Spider::new(cfg, pool.clone());

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        match scan_jobs::claim_next(&pool).await {
            Ok(Some(job)) => {
                tracing::info!(
                    job_id = job.id,
                    host = %job.target_host,
                    since_s = job.since_interval_seconds,
                    depth = job.spider_depth,
                    "running scan job"
                );
                let result = run_job(&spider, &job).await;
                if let Err(err) = &result {
                    tracing::warn!(job_id = job.id, error = %format!("{err:#}"), "scan job failed");
                }
                let error = result.as_ref().err().map(|err| format!("{err:#}"));
                if let Err(err) = scan_jobs::finish(job.id, error.as_deref(), &pool).await {
                    tracing::error!(job_id = job.id, error = %err, "finish scan job failed");
                }
            }
            Ok(None) => {}
            Err(err) => {
                // No distinction between "no work" and a transient failure;
                // either way the next poll retries.
                tracing::warn!(error = %err, "claim scan job failed");
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

async fn run_job(spider: &Spider, job: &ScanJob) -> anyhow::Result<()> {
    if job.kind != "scan" {
        anyhow::bail!("unknown job kind {:?}", job.kind);
    }
    let since = Duration::from_secs(job.since_interval_seconds.max(0) as u64);
    let depth = job.spider_depth.max(0) as u32;
    spider.scan_host(&job.target_host, since, depth).await?;
    Ok(())
}
