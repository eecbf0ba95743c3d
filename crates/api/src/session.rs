use async_trait::async_trait;
use services::auth::ClientSession;
use tower_sessions::Session;

/// Cookie session from `tower-sessions`, seen through the engine's port.
///
/// Each request works on its own loaded copy of the record, so `take` is not
/// atomic across concurrent requests of one client. Single use of OAuth
/// states is decided by the engine's state store instead.
#[derive(Clone)]
pub struct TowerClientSession {
    session: Session,
}

impl TowerClientSession {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ClientSession for TowerClientSession {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.session.get::<String>(key).await?)
    }

    async fn insert(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.session.insert(key, value).await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.session.remove::<String>(key).await?)
    }
}
