//! Dispatcher: the single consumer of the update channel.

use crate::bot::Bot;
use async_trait::async_trait;
use courier_core::{
    error::CourierError,
    update::{Update, UpdateReceiver},
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Update handler trait.
///
/// Handlers see every update they accept, in registration order, each update
/// on its own task.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Human-readable handler name, used in logs.
    fn name(&self) -> &str;

    /// Whether this handler wants `update`. Defaults to everything.
    fn accepts(&self, _update: &Update) -> bool {
        true
    }

    async fn handle(&self, bot: &Bot, update: &Update) -> Result<(), CourierError>;
}

/// Routes updates from the channel to the registered handlers.
pub struct Dispatcher {
    bot: Bot,
    updates: UpdateReceiver,
    handlers: Vec<Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new(bot: Bot, updates: UpdateReceiver) -> Self {
        Self {
            bot,
            updates,
            handlers: Vec::new(),
        }
    }

    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Give up dispatching and hand the raw stream to the caller.
    pub fn into_receiver(self) -> UpdateReceiver {
        self.updates
    }

    /// Consume updates in arrival order until the channel closes or `cancel` fires.
    ///
    /// On cancel the channel is closed and the updates already queued are
    /// still dispatched. Returns once every handler task has finished.
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            bot,
            mut updates,
            handlers,
        } = self;
        let handlers: Arc<[Arc<dyn Handler>]> = handlers.into();
        let mut workers = JoinSet::new();

        info!("dispatcher started with {} handlers", handlers.len());

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    updates.close();
                    updates.recv().await
                }
                next = updates.recv() => next,
            };
            let Some(update) = next else { break };

            let bot = bot.clone();
            let handlers = Arc::clone(&handlers);
            workers.spawn(async move {
                dispatch(&bot, &handlers, &update).await;
            });

            while let Some(result) = workers.try_join_next() {
                if let Err(e) = result {
                    error!("handler task crashed: {e}");
                }
            }
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("handler task crashed: {e}");
            }
        }

        info!("dispatcher stopped");
    }
}

async fn dispatch(bot: &Bot, handlers: &[Arc<dyn Handler>], update: &Update) {
    let mut handled = false;
    for handler in handlers {
        if !handler.accepts(update) {
            continue;
        }
        handled = true;
        if let Err(e) = handler.handle(bot, update).await {
            warn!(
                "handler {} failed on update {}: {e}",
                handler.name(),
                update.id()
            );
        }
    }
    if !handled {
        debug!("no handler accepted update {}", update.id());
    }
}
