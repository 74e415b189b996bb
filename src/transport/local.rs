use super::{Query, QueryReply, Transport};
use crate::error::Result;
use crate::record::AlarmRecord;
use crate::registry::AlarmRegistry;
use crate::router::{SubscriptionHandle, Topic};
use crate::sink::AlarmSink;
use async_trait::async_trait;
use std::sync::Arc;

/// Transport for participants living in the registry's own process
#[derive(Debug, Clone)]
pub struct LocalTransport {
    registry: AlarmRegistry,
}

impl LocalTransport {
    pub fn new(registry: AlarmRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AlarmRegistry {
        &self.registry
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, record: AlarmRecord) -> Result<()> {
        self.registry.update(record)
    }

    async fn request(&self, query: Query) -> Result<QueryReply> {
        Ok(match query {
            Query::Alarm(name) => QueryReply::Alarm(self.registry.query(&name)),
            Query::All => QueryReply::All(self.registry.query_all()),
        })
    }

    async fn subscribe(&self, topic: Topic, sink: Arc<dyn AlarmSink>) -> Result<SubscriptionHandle> {
        self.registry.router().subscribe(topic, sink)
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        self.registry.unsubscribe(handle);
        Ok(())
    }

    fn is_subscribed(&self, handle: &SubscriptionHandle) -> bool {
        self.registry.router().is_subscribed(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_to_registry() {
        let registry = AlarmRegistry::new();
        let transport = LocalTransport::new(registry.clone());

        transport
            .send(AlarmRecord::raise("leak", "/hull", "water", "", 5))
            .await
            .unwrap();
        assert!(registry.query("leak").unwrap().raised);

        let reply = transport.request(Query::Alarm("leak".into())).await.unwrap();
        assert!(matches!(reply, QueryReply::Alarm(Some(r)) if r.severity == 5));

        let reply = transport.request(Query::All).await.unwrap();
        assert!(matches!(reply, QueryReply::All(all) if all.len() == 1));
    }
}
