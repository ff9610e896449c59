use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use super::coordinator::{Command, RequestId};
use crate::error::PinError;
use crate::model::{PinId, PinRecord, PinStats};
use crate::staging::{DraftId, PreviewOutcome};
use crate::storage::{CreateTicket, LoadTicket, PinBackend};

#[derive(Debug)]
pub enum Job {
    Load { ticket: LoadTicket },
    Run(Command),
    Shutdown,
}

/// A finished job, delivered back to the UI thread in completion order.
#[derive(Debug)]
pub enum Completion {
    Loaded {
        ticket: LoadTicket,
        result: Result<Vec<PinRecord>, PinError>,
    },
    Created {
        request: RequestId,
        ticket: CreateTicket,
        result: Result<PinRecord, PinError>,
    },
    Updated {
        request: RequestId,
        pin: PinId,
        result: Result<PinRecord, PinError>,
    },
    Deleted {
        request: RequestId,
        pin: PinId,
        result: Result<(), PinError>,
    },
    Copied {
        pin: PinId,
        result: Result<(), PinError>,
    },
    Stats {
        request: RequestId,
        result: Result<PinStats, PinError>,
    },
    ImageRead {
        draft: DraftId,
        file_name: String,
        result: Result<Vec<u8>, String>,
    },
    Preview(PreviewOutcome),
}

/// Channels to the worker thread that owns the async runtime.
pub struct BackendHandle {
    job_tx: Sender<Job>,
    completion_rx: Receiver<Completion>,
    thread: Option<thread::JoinHandle<()>>,
}

impl BackendHandle {
    pub fn spawn<B>(backend: B) -> Result<Self>
    where
        B: PinBackend + 'static,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("starting async runtime")?;
        let (job_tx, job_rx) = unbounded();
        let (completion_tx, completion_rx) = unbounded();
        let backend = Arc::new(backend);
        let thread = thread::Builder::new()
            .name("pintrav-backend".into())
            .spawn(move || worker_loop(runtime, backend, job_rx, completion_tx))
            .context("spawning backend worker")?;
        Ok(Self {
            job_tx,
            completion_rx,
            thread: Some(thread),
        })
    }

    pub fn submit(&self, job: Job) {
        if self.job_tx.send(job).is_err() {
            tracing::error!("backend worker is gone, job dropped");
        }
    }

    pub fn try_completion(&self) -> Option<Completion> {
        match self.completion_rx.try_recv() {
            Ok(completion) => Some(completion),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::error!("backend worker disconnected");
                None
            }
        }
    }

    pub fn wait_completion(&self, timeout: Duration) -> Option<Completion> {
        self.completion_rx.recv_timeout(timeout).ok()
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        let _ = self.job_tx.send(Job::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop<B>(
    runtime: tokio::runtime::Runtime,
    backend: Arc<B>,
    jobs: Receiver<Job>,
    completions: Sender<Completion>,
) where
    B: PinBackend + 'static,
{
    for job in jobs.iter() {
        let command = match job {
            Job::Shutdown => break,
            Job::Load { ticket } => {
                let backend = Arc::clone(&backend);
                let completions = completions.clone();
                runtime.spawn(async move {
                    let result = backend.fetch(ticket.scope).await;
                    let _ = completions.send(Completion::Loaded { ticket, result });
                });
                continue;
            }
            Job::Run(command) => command,
        };
        let backend = Arc::clone(&backend);
        let completions = completions.clone();
        match command {
            Command::Create {
                request,
                ticket,
                submission,
            } => {
                runtime.spawn(async move {
                    let result = backend.create(&submission).await;
                    let _ = completions.send(Completion::Created {
                        request,
                        ticket,
                        result,
                    });
                });
            }
            Command::Update {
                request,
                pin,
                submission,
            } => {
                runtime.spawn(async move {
                    let result = backend.update(pin, &submission).await;
                    let _ = completions.send(Completion::Updated {
                        request,
                        pin,
                        result,
                    });
                });
            }
            Command::Delete { request, pin } => {
                runtime.spawn(async move {
                    let result = backend.delete(pin).await;
                    let _ = completions.send(Completion::Deleted {
                        request,
                        pin,
                        result,
                    });
                });
            }
            Command::Copy { request, pin } => {
                runtime.spawn(async move {
                    tracing::debug!(%request, %pin, "copying pin");
                    let result = backend.copy(pin).await;
                    let _ = completions.send(Completion::Copied { pin, result });
                });
            }
            Command::LoadStats { request } => {
                runtime.spawn(async move {
                    let result = backend.stats().await;
                    let _ = completions.send(Completion::Stats { request, result });
                });
            }
            Command::ReadImage { draft, path } => {
                runtime.spawn_blocking(move || {
                    let file_name = file_name_of(&path);
                    let result = std::fs::read(&path)
                        .map_err(|err| format!("{}: {err}", path.display()));
                    let _ = completions.send(Completion::ImageRead {
                        draft,
                        file_name,
                        result,
                    });
                });
            }
            Command::DerivePreview(job) => {
                runtime.spawn_blocking(move || {
                    if let Some(outcome) = job.run() {
                        let _ = completions.send(Completion::Preview(outcome));
                    }
                });
            }
        }
    }
    runtime.shutdown_timeout(Duration::from_secs(2));
    tracing::debug!("backend worker stopped");
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
