//! Shared context for the controllers.
//!
//! The Context struct holds shared state that is passed to every reconcile:
//! the Kubernetes client, the event reporter, the health signal cache, the
//! per-object backoff, and the operator configuration.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::config::OperatorConfig;
use crate::controller::backoff::Backoff;
use crate::health::HealthState;
use crate::signals::SignalCache;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "redis-operator";

/// Shared context for the controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Latest scraped health signals
    pub signals: Arc<SignalCache>,
    /// Error backoff, per object
    pub backoff: Backoff,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        signals: Arc<SignalCache>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            signals,
            backoff: Backoff::new(config.backoff_cap()),
            config,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish<K>(
        &self,
        resource: &K,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        let object_ref = resource.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }
}
