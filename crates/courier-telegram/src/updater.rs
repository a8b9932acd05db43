//! Updater: startup protocol and lifecycle of the acquisition tasks.

use crate::bot::Bot;
use crate::dispatcher::{Dispatcher, Handler};
use crate::polling::{Poller, PollerOptions};
use crate::types::WebhookInfo;
use crate::webhook::{self, Webhook};
use courier_core::{
    error::CourierError,
    traits::Transport,
    update::{self, UpdateReceiver, UpdateSender},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the update channel and starts exactly one acquisition mode.
pub struct Updater {
    bot: Bot,
    tx: UpdateSender,
    dispatcher: Option<Dispatcher>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl Updater {
    /// Resolve the bot identity, then remove any registered webhook.
    ///
    /// Both steps must succeed before any acquisition mode can start.
    pub async fn new(transport: Arc<dyn Transport>) -> Result<Self, CourierError> {
        let bot = Bot::connect(transport).await?;

        let removed = bot
            .delete_webhook()
            .await
            .map_err(|e| CourierError::Setup(format!("failed to remove webhook: {e}")))?;
        if !removed {
            return Err(CourierError::Setup("failed to remove webhook".into()));
        }

        let (tx, rx) = update::channel();
        let dispatcher = Dispatcher::new(bot.clone(), rx);

        Ok(Self {
            bot,
            tx,
            dispatcher: Some(dispatcher),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            started: false,
        })
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Register a handler on the built-in dispatcher.
    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) -> Result<(), CourierError> {
        match self.dispatcher.as_mut() {
            Some(d) if !self.started => {
                d.add_handler(handler);
                Ok(())
            }
            _ => Err(CourierError::Config(
                "handlers must be added before the updater starts".into(),
            )),
        }
    }

    /// Take the raw update stream instead of using the built-in dispatcher.
    pub fn take_updates(&mut self) -> Option<UpdateReceiver> {
        if self.started {
            return None;
        }
        self.dispatcher.take().map(Dispatcher::into_receiver)
    }

    /// Token that stops polling, the webhook server, and the dispatcher.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll `getUpdates` in the background.
    pub fn start_polling(&mut self, options: PollerOptions) -> Result<(), CourierError> {
        self.mark_started()?;
        self.start_dispatcher();

        let poller = Poller::new(self.bot.transport(), options);
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            poller.run(tx, cancel).await;
        }));
        Ok(())
    }

    /// Poll, discarding the backlog pending at startup.
    pub fn start_clean_polling(&mut self, mut options: PollerOptions) -> Result<(), CourierError> {
        options.clean = true;
        self.start_polling(options)
    }

    /// Serve the webhook endpoint and register it with the Bot API.
    ///
    /// The listener is bound before registering so the API never points at a
    /// port nobody listens on. With an empty `url` the registration step is
    /// skipped and left to the caller. On failure the updater stays unstarted,
    /// so another mode can still be tried.
    pub async fn start_webhook(&mut self, webhook: &Webhook) -> Result<SocketAddr, CourierError> {
        webhook.validate()?;
        self.ensure_not_started()?;

        let listener = self.cancel.child_token();
        let (addr, handle) = webhook::serve(webhook, self.tx.clone(), listener.clone()).await?;

        if webhook.url.is_empty() {
            warn!("webhook url not set, skipping setWebhook");
        } else {
            let registered = self.bot.set_webhook(webhook).await;
            if !matches!(registered, Ok(true)) {
                // Nothing will be delivered here; release the port.
                listener.cancel();
                if let Err(e) = handle.await {
                    warn!("webhook listener ended abnormally: {e}");
                }
                let reason = match registered {
                    Err(e) => format!("failed to set webhook: {e}"),
                    Ok(_) => "failed to set webhook".to_string(),
                };
                return Err(CourierError::Setup(reason));
            }
            info!("webhook registered at {}", webhook.public_url());
        }

        self.started = true;
        self.tasks.push(handle);
        self.start_dispatcher();
        Ok(addr)
    }

    pub async fn remove_webhook(&self) -> Result<bool, CourierError> {
        self.bot.delete_webhook().await
    }

    pub async fn set_webhook(&self, webhook: &Webhook) -> Result<bool, CourierError> {
        self.bot.set_webhook(webhook).await
    }

    pub async fn get_webhook_info(&self) -> Result<WebhookInfo, CourierError> {
        self.bot.get_webhook_info().await
    }

    /// Block until the updater is stopped.
    pub async fn idle(&self) {
        self.cancel.cancelled().await;
    }

    /// Signal every task to stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for every task to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("updater task ended abnormally: {e}");
            }
        }
        info!("updater shut down");
    }

    fn ensure_not_started(&self) -> Result<(), CourierError> {
        if self.started {
            return Err(CourierError::Config("updater already started".into()));
        }
        Ok(())
    }

    fn mark_started(&mut self) -> Result<(), CourierError> {
        self.ensure_not_started()?;
        self.started = true;
        Ok(())
    }

    fn start_dispatcher(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            let cancel = self.cancel.clone();
            self.tasks.push(tokio::spawn(dispatcher.run(cancel)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{batch, me, MockTransport};
    use courier_core::update::{ApiResponse, Update};
    use serde_json::json;
    use std::time::Duration;

    fn ok_true() -> ApiResponse {
        ApiResponse::success(json!(true))
    }

    fn scripted() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.push("getMe", me());
        transport.push("deleteWebhook", ok_true());
        transport
    }

    #[tokio::test]
    async fn test_new_resolves_identity_then_removes_webhook() {
        let transport = scripted();
        let updater = Updater::new(transport.clone()).await.unwrap();
        assert_eq!(updater.bot().me().id, 7);
        assert_eq!(transport.methods(), vec!["getMe", "deleteWebhook"]);
    }

    #[tokio::test]
    async fn test_new_fails_when_webhook_not_removed() {
        let transport = Arc::new(MockTransport::new());
        transport.push("getMe", me());
        transport.push("deleteWebhook", ApiResponse::success(json!(false)));
        let err = Updater::new(transport).await.err().unwrap();
        assert!(matches!(err, CourierError::Setup(_)));
    }

    #[tokio::test]
    async fn test_new_fails_when_webhook_removal_errors() {
        let transport = Arc::new(MockTransport::new());
        transport.push("getMe", me());
        transport.push("deleteWebhook", ApiResponse::failure(401, "Unauthorized"));
        let err = Updater::new(transport).await.err().unwrap();
        assert!(matches!(err, CourierError::Setup(_)));
    }

    #[tokio::test]
    async fn test_new_fails_without_identity() {
        let transport = Arc::new(MockTransport::new());
        transport.push("getMe", ApiResponse::failure(404, "Not Found"));
        let err = Updater::new(transport.clone()).await.err().unwrap();
        assert!(matches!(err, CourierError::Setup(_)));
        assert_eq!(transport.methods(), vec!["getMe"]);
    }

    #[tokio::test]
    async fn test_polling_feeds_update_stream() {
        let transport = scripted();
        transport.push("getUpdates", batch(&[5, 6, 7]));
        let mut updater = Updater::new(transport.clone()).await.unwrap();
        let mut updates = updater.take_updates().unwrap();

        updater.start_polling(PollerOptions::default()).unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(updates.recv().await.unwrap().id());
        }
        assert_eq!(ids, vec![5, 6, 7]);

        updater.shutdown().await;
        // Removal always precedes the first fetch.
        let methods = transport.methods();
        assert_eq!(methods[..3], ["getMe", "deleteWebhook", "getUpdates"]);
    }

    #[tokio::test]
    async fn test_clean_polling_skips_backlog() {
        let transport = scripted();
        transport.push("getUpdates", batch(&[1, 2]));
        transport.push("getUpdates", batch(&[3]));
        let mut updater = Updater::new(transport.clone()).await.unwrap();
        let mut updates = updater.take_updates().unwrap();

        updater.start_clean_polling(PollerOptions::default()).unwrap();

        assert_eq!(updates.recv().await.unwrap().id(), 3);
        updater.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut updater = Updater::new(scripted()).await.unwrap();
        updater.start_polling(PollerOptions::default()).unwrap();
        assert!(updater.start_polling(PollerOptions::default()).is_err());

        let webhook = Webhook {
            listen: "127.0.0.1".into(),
            port: 0,
            ..Webhook::default()
        };
        assert!(updater.start_webhook(&webhook).await.is_err());
        updater.shutdown().await;
    }

    #[tokio::test]
    async fn test_handlers_rejected_after_start() {
        struct Noop;

        #[async_trait::async_trait]
        impl Handler for Noop {
            fn name(&self) -> &str {
                "noop"
            }
            async fn handle(&self, _bot: &Bot, _update: &Update) -> Result<(), CourierError> {
                Ok(())
            }
        }

        let mut updater = Updater::new(scripted()).await.unwrap();
        updater.add_handler(Arc::new(Noop)).unwrap();
        updater.start_polling(PollerOptions::default()).unwrap();
        assert!(updater.add_handler(Arc::new(Noop)).is_err());
        assert!(updater.take_updates().is_none());
        updater.shutdown().await;
    }

    #[tokio::test]
    async fn test_webhook_mode_registers_and_feeds_stream() {
        let transport = scripted();
        transport.push("setWebhook", ok_true());
        let mut updater = Updater::new(transport.clone()).await.unwrap();
        let mut updates = updater.take_updates().unwrap();

        let webhook = Webhook {
            listen: "127.0.0.1".into(),
            port: 0,
            path: "hook".into(),
            url: "https://bot.example.com".into(),
            ..Webhook::default()
        };
        let addr = updater.start_webhook(&webhook).await.unwrap();

        let set = &transport.calls_to("setWebhook")[0];
        assert_eq!(set.params["url"], "https://bot.example.com/hook");

        let body = r#"{"update_id": 64, "message": {"text": "pushed"}}"#;
        let status = reqwest::Client::new()
            .post(format!("http://{addr}/hook"))
            .body(body)
            .send()
            .await
            .unwrap()
            .status();
        assert!(status.is_success());

        let update = updates.recv().await.unwrap();
        assert_eq!(update.id(), 64);
        assert_eq!(update.raw(), body);

        updater.shutdown().await;
    }

    #[tokio::test]
    async fn test_webhook_registration_refused_leaves_updater_usable() {
        let transport = scripted();
        transport.push("setWebhook", ApiResponse::success(json!(false)));
        transport.push("getUpdates", batch(&[8]));
        let mut updater = Updater::new(transport).await.unwrap();
        let mut updates = updater.take_updates().unwrap();

        let webhook = Webhook {
            listen: "127.0.0.1".into(),
            port: 0,
            url: "https://bot.example.com".into(),
            ..Webhook::default()
        };
        let err = updater.start_webhook(&webhook).await.unwrap_err();
        assert!(matches!(err, CourierError::Setup(_)));
        assert!(!updater.cancellation_token().is_cancelled());

        updater.start_polling(PollerOptions::default()).unwrap();
        assert_eq!(updates.recv().await.unwrap().id(), 8);
        updater.shutdown().await;
    }

    #[tokio::test]
    async fn test_polling_fallback_after_webhook_bind_failure() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let transport = scripted();
        transport.push("getUpdates", batch(&[3]));
        let mut updater = Updater::new(transport.clone()).await.unwrap();
        let mut updates = updater.take_updates().unwrap();

        let webhook = Webhook {
            listen: "127.0.0.1".into(),
            port,
            url: "https://bot.example.com".into(),
            ..Webhook::default()
        };
        let err = updater.start_webhook(&webhook).await.unwrap_err();
        assert!(matches!(err, CourierError::Setup(_)));
        assert!(transport.calls_to("setWebhook").is_empty());

        updater.start_polling(PollerOptions::default()).unwrap();
        assert_eq!(updates.recv().await.unwrap().id(), 3);
        updater.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_returns_after_stop() {
        let updater = Updater::new(scripted()).await.unwrap();
        let token = updater.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), updater.idle())
            .await
            .expect("idle should return once stopped");
    }
}
