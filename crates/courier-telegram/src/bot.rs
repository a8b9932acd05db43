//! Bot handle: a transport plus the identity resolved at startup.

use crate::types::{User, WebhookInfo};
use crate::webhook::Webhook;
use courier_core::{
    error::CourierError,
    traits::{Params, Transport},
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

/// A connected bot.
#[derive(Clone)]
pub struct Bot {
    transport: Arc<dyn Transport>,
    me: User,
}

impl Bot {
    /// Resolve the bot identity with `getMe`.
    ///
    /// Fails with [`CourierError::Setup`] if the identity cannot be resolved.
    pub async fn connect(transport: Arc<dyn Transport>) -> Result<Self, CourierError> {
        let me: User = call(transport.as_ref(), "getMe", &Params::new())
            .await
            .map_err(|e| CourierError::Setup(format!("unable to resolve bot identity: {e}")))?;
        info!("connected as {} (id {})", me.display_name(), me.id);
        Ok(Self { transport, me })
    }

    pub fn me(&self) -> &User {
        &self.me
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Call any Bot API method and decode its result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &Params,
    ) -> Result<T, CourierError> {
        call(self.transport.as_ref(), method, params).await
    }

    pub async fn get_me(&self) -> Result<User, CourierError> {
        self.call("getMe", &Params::new()).await
    }

    /// Remove any registered webhook. Succeeds whether or not one was set.
    pub async fn delete_webhook(&self) -> Result<bool, CourierError> {
        self.call("deleteWebhook", &Params::new()).await
    }

    /// Register `webhook.public_url()` as the delivery target.
    pub async fn set_webhook(&self, webhook: &Webhook) -> Result<bool, CourierError> {
        webhook.validate()?;

        let allowed = serde_json::to_string(&webhook.allowed_updates)?;
        let mut params = Params::new();
        params.insert("url".into(), webhook.public_url());
        params.insert("allowed_updates".into(), allowed);
        if let Some(max) = webhook.max_connections {
            params.insert("max_connections".into(), max.to_string());
        }
        if let Some(ref secret) = webhook.secret_token {
            params.insert("secret_token".into(), secret.clone());
        }

        self.call("setWebhook", &params).await
    }

    pub async fn get_webhook_info(&self) -> Result<WebhookInfo, CourierError> {
        self.call("getWebhookInfo", &Params::new()).await
    }
}

async fn call<T: DeserializeOwned>(
    transport: &dyn Transport,
    method: &str,
    params: &Params,
) -> Result<T, CourierError> {
    transport.call(method, params).await?.decode()
}
