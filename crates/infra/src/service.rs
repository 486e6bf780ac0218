//! Control thread hosting the audio engine
//!
//! All requests are serialized onto one thread through a crossbeam channel.
//! The same thread runs the periodic update (liveness sweep and 3D). Every
//! notification a request produces is broadcast to subscribers before the
//! requester's reply is sent, and only after the request has fully applied.

use crossbeam::channel::{self, Receiver, Sender};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tenuto_core::domain::engine::AudioEngine;
use tenuto_core::domain::layout::{BusLayoutData, LayoutError};
use tenuto_core::domain::request::{Notification, Request, RequestExecutor};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, trace};

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Audio service has stopped")]
    Stopped,

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Failed to start control thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Unexpected reply to {0}")]
    UnexpectedReply(&'static str),
}

enum Envelope {
    Request {
        request: Request,
        reply: Option<oneshot::Sender<Vec<Notification>>>,
    },
    Shutdown,
}

/// Cloneable handle to a running [`AudioService`]
#[derive(Clone)]
pub struct ServiceHandle {
    tx: Sender<Envelope>,
    notifications: broadcast::Sender<Notification>,
}

impl ServiceHandle {
    /// Queue a request without waiting for it
    pub fn submit(&self, request: Request) -> Result<()> {
        self.tx
            .send(Envelope::Request {
                request,
                reply: None,
            })
            .map_err(|_| ServiceError::Stopped)
    }

    /// Queue a request and wait for its notifications
    pub async fn try_execute(&self, request: Request) -> Result<Vec<Notification>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Request {
                request,
                reply: Some(reply),
            })
            .map_err(|_| ServiceError::Stopped)?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    /// Every notification produced on the control thread, in order
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Read a layout file and load it into the engine
    pub async fn load_layout_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Notification>> {
        let layout = BusLayoutData::load_from_file(path).await?;
        self.try_execute(Request::LoadLayout { layout }).await
    }

    /// Write the engine's current layout to a file
    pub async fn save_layout_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let replies = self.try_execute(Request::GetLayout).await?;
        let layout = replies
            .into_iter()
            .find_map(|n| match n {
                Notification::LayoutUpdated { layout } => Some(layout),
                _ => None,
            })
            .ok_or(ServiceError::UnexpectedReply("GetLayout"))?;
        layout.save_to_file(path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RequestExecutor for ServiceHandle {
    async fn execute(&self, request: Request) -> Vec<Notification> {
        match self.try_execute(request).await {
            Ok(notifications) => notifications,
            Err(e) => {
                error!(error = %e, "Request dropped");
                Vec::new()
            }
        }
    }
}

/// Owns the control thread; stopping or dropping it shuts the engine down
pub struct AudioService {
    handle: ServiceHandle,
    thread: Option<JoinHandle<()>>,
}

impl AudioService {
    /// Move `engine` onto a new control thread ticking every `tick`
    pub fn spawn(engine: AudioEngine, tick: Duration) -> Result<Self> {
        let (tx, rx) = channel::unbounded();
        let (notifications, _) = broadcast::channel(256);

        let thread_notifications = notifications.clone();
        let thread = thread::Builder::new()
            .name("tenuto-control".to_string())
            .spawn(move || control_loop(engine, rx, thread_notifications, tick))?;

        info!(tick_ms = tick.as_millis() as u64, "Audio service started");
        Ok(Self {
            handle: ServiceHandle { tx, notifications },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    /// Stop the control thread after it drains queued requests
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // Already gone if the thread exited on its own
        let _ = self.handle.tx.send(Envelope::Shutdown);
        if thread.join().is_err() {
            error!("Control thread panicked");
        }
        info!("Audio service stopped");
    }
}

impl Drop for AudioService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn control_loop(
    mut engine: AudioEngine,
    rx: Receiver<Envelope>,
    notifications: broadcast::Sender<Notification>,
    tick: Duration,
) {
    let ticker = channel::tick(tick);
    debug!("Control thread running");

    loop {
        channel::select! {
            recv(rx) -> message => match message {
                Ok(Envelope::Request { request, reply }) => {
                    let produced = engine.handle(request);
                    if notifications.receiver_count() > 0 {
                        for notification in &produced {
                            // Lagging subscribers drop old notifications
                            let _ = notifications.send(notification.clone());
                        }
                    }
                    if let Some(reply) = reply {
                        // Requester may have given up waiting
                        let _ = reply.send(produced);
                    }
                }
                Ok(Envelope::Shutdown) | Err(_) => break,
            },
            recv(ticker) -> _ => {
                let swept = engine.update();
                if swept > 0 {
                    trace!(swept, "Finished voices swept");
                }
            }
        }
    }

    engine.shutdown();
    debug!("Control thread exiting");
}
