use async_trait::async_trait;

use crate::domain::models::SecurityAlert;

/// Subscriber notified of every dispatched security alert.
///
/// A failing subscriber never affects other subscribers or the loop that
/// raised the alert; its error is logged and dropped.
#[async_trait]
pub trait AlertCallback: Send + Sync {
    async fn on_alert(&self, alert: &SecurityAlert) -> anyhow::Result<()>;

    fn name(&self) -> &str {
        "alert_callback"
    }
}

/// Adapter turning a plain closure into an `AlertCallback`.
pub struct FnAlertCallback<F> {
    name: String,
    f: F,
}

impl<F> FnAlertCallback<F>
where
    F: Fn(&SecurityAlert) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F> AlertCallback for FnAlertCallback<F>
where
    F: Fn(&SecurityAlert) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_alert(&self, alert: &SecurityAlert) -> anyhow::Result<()> {
        (self.f)(alert)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
