//! Command execution
//!
//! Each command runs against one [`GenflowClient`] and honors the shared
//! cancellation token installed by the signal handler. Results go to stdout
//! as JSON; progress goes to the log.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use genflow_core::{
    AsyncOperation, ConnectOptions, GenflowClient, JobId, JobKind, JobRecord, JobUpdate,
    NarrationKind, NarrationRequest, NarrationUpdate, StreamEvent, StreamOutcome,
};

use crate::{Command, JobCommand};

/// Runs parsed commands against a client
pub struct CommandRunner {
    client: GenflowClient,
    cancel: CancellationToken,
}

impl CommandRunner {
    /// Create a runner
    pub fn new(client: GenflowClient, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    /// Execute one command to completion
    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Job(job) => self.run_job(job).await,
            Command::Stream { connection_id, url } => self.stream(&connection_id, url).await,
            Command::Narrate {
                organization_id,
                kind,
                audience,
                topic,
                legacy,
            } => {
                let kind: NarrationKind = kind.parse().map_err(|e: String| anyhow!(e))?;
                let mut request = NarrationRequest::new(kind, organization_id);
                if let Some(audience) = audience {
                    request = request.with_audience(audience);
                }
                if let Some(topic) = topic {
                    request = request.with_topic(topic);
                }
                self.narrate(request, legacy).await
            }
            Command::Account => self.account().await,
        }
    }

    async fn run_job(&self, command: JobCommand) -> Result<()> {
        match command {
            JobCommand::Create {
                kind,
                payload,
                watch,
            } => {
                let kind: JobKind = kind.parse().map_err(|e: String| anyhow!(e))?;
                let payload: Value =
                    serde_json::from_str(&payload).context("--payload is not valid JSON")?;
                let handle = self.client.create_job(kind, &payload).await?;
                info!(job_id = %handle.job_id, kind = %kind, "Job created");
                if watch {
                    self.watch(handle.job_id).await
                } else {
                    emit(&json!({ "jobId": handle.job_id }))
                }
            }
            JobCommand::Status { job_id } => {
                let record = self.client.jobs().get_status(&JobId::new(job_id)).await?;
                emit(&record)
            }
            JobCommand::Watch { job_id } => self.watch(JobId::new(job_id)).await,
            JobCommand::Retry { job_id } => {
                let job_id = JobId::new(job_id);
                self.client.jobs().retry_job(&job_id).await?;
                info!(job_id = %job_id, "Retry requested");
                emit(&json!({ "jobId": job_id, "retried": true }))
            }
            JobCommand::Cancel { job_id } => {
                let response = self.client.cancel_job(&JobId::new(job_id)).await?;
                emit(&response)
            }
        }
    }

    async fn watch(&self, job_id: JobId) -> Result<()> {
        let watch = self.client.job_watch(job_id.clone());
        info!(job_id = %job_id, transport = %watch.transport(), "Following job");

        let record = watch
            .subscribe(&mut |update: JobUpdate| log_job_update(&update), &self.cancel)
            .await?;
        emit(&record)
    }

    async fn stream(&self, connection_id: &str, url: Option<String>) -> Result<()> {
        let mut options = ConnectOptions::default();
        if let Some(url) = url {
            options = options.with_stream_url(url);
        }

        let handle = self.client.connect_stream(
            connection_id,
            |event: StreamEvent| {
                let line = json!({ "event": event.kind.as_str(), "data": event.payload.to_value() });
                println!("{line}");
            },
            options,
        );

        let outcome = tokio::select! {
            outcome = handle.wait() => outcome,
            () = self.cancel.cancelled() => StreamOutcome::Closed,
        };

        match outcome {
            StreamOutcome::Completed(_) => Ok(()),
            StreamOutcome::Failed(e) => Err(e.into()),
            StreamOutcome::Closed => {
                warn!(connection_id, "Stream closed before completion");
                Ok(())
            }
        }
    }

    async fn narrate(&self, request: NarrationRequest, legacy: bool) -> Result<()> {
        let feed = if legacy {
            self.client.legacy_narration_feed(request)
        } else {
            self.client.narration_feed(request)
        };
        info!(transport = %feed.transport(), "Narration started");

        let text = feed
            .subscribe(
                &mut |update: NarrationUpdate| match update {
                    NarrationUpdate::Chunk(chunk) => print!("{chunk}"),
                    NarrationUpdate::Complete(_) => println!(),
                    NarrationUpdate::BusinessProfile(profile) => {
                        info!(profile = %profile, "Business profile");
                    }
                },
                &self.cancel,
            )
            .await?;
        info!(chars = text.chars().count(), "Narration complete");
        Ok(())
    }

    async fn account(&self) -> Result<()> {
        let (credits, organization, recent) = tokio::join!(
            self.client.credits(),
            self.client.current_organization(),
            self.client.recent_analysis(),
        );
        emit(&json!({
            "credits": credits?.into_option(),
            "organization": organization?.into_option(),
            "recentAnalysis": recent?.into_option(),
        }))
    }
}

fn log_job_update(update: &JobUpdate) {
    match update {
        JobUpdate::Status(record) => log_record(record),
        JobUpdate::Stream(event) => info!(event = %event.kind, "Stream event"),
    }
}

fn log_record(record: &JobRecord) {
    info!(
        job_id = %record.job_id,
        status = %record.status,
        progress = record.progress,
        step = record.current_step.as_deref().unwrap_or(""),
        "Job status"
    );
}

/// Print a value as pretty JSON on stdout
fn emit<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
