//! Consensus TCP endpoint
//!
//! Each connection is read by its own task. Parsed messages go through a
//! bounded queue to a dispatcher that runs them under a fixed worker budget;
//! the connection waits for each reply, so messages on one connection are
//! answered in order.

use crate::{error::ConsensusError, service::ConsensusService};
use stakechain_ledger::{
    wire::{self, Envelope, SubmissionAck},
    Submission,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Semaphore};

struct Job {
    envelope: Envelope,
    reply: oneshot::Sender<Result<SubmissionAck, ConsensusError>>,
}

impl ConsensusService {
    /// Bind and serve submissions
    pub async fn run(self: Arc<Self>, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Consensus service listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        let (jobs, queue) = mpsc::channel(self.config.max_inflight_messages);
        tokio::spawn(self.clone().dispatch(queue));

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            tracing::debug!("Consensus connection from {}", peer_addr);

            let service = self.clone();
            let jobs = jobs.clone();
            tokio::spawn(async move {
                if let Err(e) = service.handle_connection(stream, jobs).await {
                    tracing::warn!("Consensus connection from {} closed: {}", peer_addr, e);
                }
            });
        }
    }

    async fn dispatch(self: Arc<Self>, mut queue: mpsc::Receiver<Job>) {
        let workers = Arc::new(Semaphore::new(self.config.max_workers));

        while let Some(job) = queue.recv().await {
            let Ok(permit) = workers.clone().acquire_owned().await else {
                break;
            };
            let service = self.clone();
            tokio::spawn(async move {
                let result = service.handle_message(job.envelope).await;
                let _ = job.reply.send(result);
                drop(permit);
            });
        }
        tracing::debug!("Consensus dispatcher stopped");
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        jobs: mpsc::Sender<Job>,
    ) -> anyhow::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            let next =
                tokio::time::timeout(self.config.idle_timeout, wire::read_message(&mut reader)).await;
            let envelope: Envelope = match next {
                Err(_) => {
                    tracing::debug!("Consensus connection idle, closing");
                    return Ok(());
                }
                Ok(Ok(None)) => return Ok(()),
                Ok(Ok(Some(envelope))) => envelope,
                Ok(Err(e)) => return Err(e.into()),
            };

            if envelope.is_close() {
                return Ok(());
            }

            let (reply, response) = oneshot::channel();
            jobs.send(Job { envelope, reply })
                .await
                .map_err(|_| ConsensusError::DispatcherStopped)?;
            let ack = response
                .await
                .map_err(|_| ConsensusError::DispatcherStopped)??;

            wire::write_message(&mut write_half, &ack).await?;
        }
    }

    /// Parse and submit one consensus message
    pub async fn handle_message(self: &Arc<Self>, envelope: Envelope) -> Result<SubmissionAck, ConsensusError> {
        let submission: Submission = serde_json::from_value(envelope.message_data)?;
        self.submit(envelope.message_type, submission).await
    }
}
