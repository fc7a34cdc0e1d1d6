//! Mailbox actors for the agent.
//!
//! An [`Actor`] owns its state and sees one message at a time. A
//! [`Supervisor`] starts actors, hands back an [`ActorHandle`] for each
//! mailbox, and stops all of them with a single signal.

use std::fmt::Debug;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Message;

    fn name(&self) -> &str;

    /// Returns `Ok(false)` once the actor is done.
    async fn handle(&mut self, msg: Self::Message, ctx: &mut ActorContext) -> Result<bool, ActorError>;

    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &mut ActorContext) {}
}

/// Per-actor bookkeeping passed into every callback.
pub struct ActorContext {
    pub actor_id: String,
    pub stop: watch::Receiver<bool>,
    pub handled: u64,
    pub last_handled_at: Option<Instant>,
}

impl ActorContext {
    fn new(actor_id: String, stop: watch::Receiver<bool>) -> Self {
        Self {
            actor_id,
            stop,
            handled: 0,
            last_handled_at: None,
        }
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }
}

#[derive(Debug, Error)]
pub enum ActorError {
    /// Logged, and the next message is handled as usual.
    #[error("recoverable actor failure: {0}")]
    Transient(String),

    /// Ends the actor.
    #[error("fatal actor failure: {0}")]
    Permanent(String),

    #[error("actor mailbox is full")]
    MailboxFull,

    #[error("actor is no longer running")]
    ActorStopped,
}

/// Sending side of an actor's mailbox.
#[derive(Debug)]
pub struct ActorHandle<M: Message> {
    actor_id: String,
    mailbox: mpsc::Sender<M>,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            actor_id: self.actor_id.clone(),
            mailbox: self.mailbox.clone(),
        }
    }
}

impl<M: Message> ActorHandle<M> {
    /// Waits for mailbox space.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.mailbox.send(msg).await.map_err(|_| ActorError::ActorStopped)
    }

    /// Fails with [`ActorError::MailboxFull`] instead of waiting.
    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        use mpsc::error::TrySendError;

        match self.mailbox.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ActorError::MailboxFull),
            Err(TrySendError::Closed(_)) => Err(ActorError::ActorStopped),
        }
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

/// Starts actors and stops them together. Stopped actors stay stopped.
pub struct Supervisor {
    stop_tx: watch::Sender<bool>,
    tasks: JoinSet<String>,
    spawned: u64,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx,
            tasks: JoinSet::new(),
            spawned: 0,
        }
    }

    pub fn spawn<A: Actor>(&mut self, actor: A, mailbox_size: usize) -> ActorHandle<A::Message> {
        self.spawned += 1;
        let actor_id = format!("{}-{}", actor.name(), self.spawned);
        let (mailbox, inbox) = mpsc::channel(mailbox_size);

        let ctx = ActorContext::new(actor_id.clone(), self.stop_tx.subscribe());
        self.tasks.spawn(drive(actor, inbox, ctx));

        info!(actor_id = %actor_id, mailbox_size, "Actor spawned");
        ActorHandle { actor_id, mailbox }
    }

    /// Number of actors whose task has not returned yet.
    pub fn running_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signals every actor and waits up to `grace` for them to finish; the
    /// rest are aborted.
    pub async fn stop_all(&mut self, grace: Duration) {
        info!(running = self.tasks.len(), "Stopping actors");
        self.stop_tx.send_replace(true);

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                match joined {
                    Ok(actor_id) => debug!(actor_id = %actor_id, "Actor joined"),
                    Err(e) => error!(error = %e, "Actor task panicked"),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = self.tasks.len(), "Aborting actors that missed the grace period");
            self.tasks.shutdown().await;
        }
    }
}

/// Receives until the mailbox closes, the stop signal fires, or the actor
/// asks to stop.
async fn drive<A: Actor>(mut actor: A, mut inbox: mpsc::Receiver<A::Message>, mut ctx: ActorContext) -> String {
    if let Err(e) = actor.on_start(&mut ctx).await {
        error!(actor_id = %ctx.actor_id, error = %e, "Actor did not start");
        return ctx.actor_id;
    }

    let mut stop = ctx.stop.clone();
    loop {
        let msg = tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    debug!(actor_id = %ctx.actor_id, "Stop signal received");
                    break;
                }
                continue;
            }
            msg = inbox.recv() => msg,
        };

        let Some(msg) = msg else {
            debug!(actor_id = %ctx.actor_id, "Mailbox closed");
            break;
        };
        ctx.handled += 1;
        ctx.last_handled_at = Some(Instant::now());

        match actor.handle(msg, &mut ctx).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(ActorError::Permanent(reason)) => {
                error!(actor_id = %ctx.actor_id, reason = %reason, "Actor failed");
                break;
            }
            Err(e) => warn!(actor_id = %ctx.actor_id, error = %e, "Message handling failed"),
        }
    }

    actor.on_stop(&mut ctx).await;
    info!(actor_id = %ctx.actor_id, handled = ctx.handled, "Actor stopped");
    ctx.actor_id
}
