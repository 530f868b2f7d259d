use anyhow::Result;
use async_trait::async_trait;
use axum::body::Bytes;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tokio::time::{Instant, interval};

use crate::config::BatchConfig;
use crate::engine::BatchedEngine;
use crate::engine::Engine;

type ResponseSender = oneshot::Sender<Result<Vec<f32>>>;

#[derive(Debug)]
struct QueuedImage {
    image: Bytes,
    response_tx: ResponseSender,
}

/// Funnels single-image calls from concurrent requests into batched forward passes.
pub struct BatchedEngineWrapper {
    request_tx: flume::Sender<QueuedImage>,
}

impl BatchedEngineWrapper {
    pub fn new<T: BatchedEngine + 'static>(
        config: BatchConfig,
        batched_engine: T,
    ) -> (Self, BatchProcessor<T>) {
        let (request_tx, request_rx) = flume::bounded(0); // Rendezvous channel

        let processor = BatchProcessor {
            request_rx,
            config,
            queue: VecDeque::new(),
            batched_engine,
        };

        (Self { request_tx }, processor)
    }
}

#[async_trait]
impl Engine for BatchedEngineWrapper {
    #[tracing::instrument(skip(self, image), fields(image_bytes = image.len()))]
    async fn probabilities(&self, image: Bytes) -> Result<Vec<f32>> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send_async(QueuedImage { image, response_tx })
            .await
            .map_err(|_| anyhow::anyhow!("Engine queue is closed"))?;

        response_rx
            .await
            .map_err(|_| anyhow::anyhow!("Response channel closed"))?
    }
}

pub struct BatchProcessor<T: BatchedEngine> {
    request_rx: flume::Receiver<QueuedImage>,
    config: BatchConfig,
    queue: VecDeque<QueuedImage>,
    batched_engine: T,
}

impl<T: BatchedEngine> BatchProcessor<T> {
    #[tracing::instrument(skip(self))]
    pub async fn run_forever(mut self) -> Result<()> {
        let mut tick_timer = interval(self.config.tick_duration);

        loop {
            tokio::select! {
                request = self.request_rx.recv_async() => {
                    match request {
                        Ok(req) => {
                            self.queue.push_back(req);
                            tracing::debug!(queue_size = self.queue.len(), "Image queued");

                            if self.queue.len() >= self.config.batch_size {
                                self.process_batch().await;
                            }
                        }
                        Err(_) => {
                            tracing::info!("Channel closed, draining queue and exiting");
                            while !self.queue.is_empty() {
                                self.process_batch().await;
                            }
                            break Ok(());
                        }
                    }
                }

                _ = tick_timer.tick() => {
                    if !self.queue.is_empty() {
                        tracing::debug!(pending = self.queue.len(), "Tick fired, flushing partial batch");
                        self.process_batch().await;
                    }
                }
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn process_batch(&mut self) {
        let batch_start = Instant::now();

        let batch: Vec<_> = self
            .queue
            .drain(..self.config.batch_size.min(self.queue.len()))
            .collect();

        if batch.is_empty() {
            return;
        }

        let batch_size = batch.len();
        let (images, response_channels): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|queued| (queued.image, queued.response_tx))
            .unzip();

        match self.batched_engine.probabilities_batch(images).await {
            Ok(results) => {
                for (response_tx, result) in response_channels.into_iter().zip(results) {
                    // The caller may have gone away; nothing to do then.
                    let _ = response_tx.send(result);
                }
            }
            Err(err) => {
                tracing::error!("Batch inference failed: {}", err);
                for response_tx in response_channels {
                    let _ = response_tx.send(Err(anyhow::anyhow!("Batch inference failed: {}", err)));
                }
            }
        }

        tracing::debug!(
            batch_size,
            processing_time_ms = batch_start.elapsed().as_millis(),
            "Batch processed"
        );
    }
}
