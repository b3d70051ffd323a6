//! MongoDB-backed `SessionBacking` (spec §6 `MONGODB_URI`) — the second of
//! the two dual-write backings `SessionStore` fans writes out to.

use mongodb::bson::{doc, DateTime as BsonDateTime};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};

use crate::core::errors::StoreError;
use crate::core::{ConnectionStatus, Session, SessionBacking, SessionId, Source};

#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    session_id: String,
    user_id: i64,
    phone_number: Option<String>,
    is_connected: bool,
    connection_status: String,
    reconnect_attempts: i32,
    source: String,
    detected: bool,
    updated_at: BsonDateTime,
}

impl TryFrom<SessionDocument> for Session {
    type Error = anyhow::Error;

    fn try_from(doc: SessionDocument) -> Result<Self, Self::Error> {
        Ok(Session {
            session_id: doc.session_id.parse::<SessionId>().map_err(|e| anyhow::anyhow!(e))?,
            user_id: doc.user_id as u64,
            phone_number: doc.phone_number,
            is_connected: doc.is_connected,
            connection_status: doc.connection_status.parse::<ConnectionStatus>()?,
            reconnect_attempts: doc.reconnect_attempts as u32,
            source: doc.source.parse::<Source>().map_err(|e| anyhow::anyhow!(e))?,
            detected: doc.detected,
            updated_at: doc.updated_at.to_chrono(),
        })
    }
}

impl From<&Session> for SessionDocument {
    fn from(session: &Session) -> Self {
        SessionDocument {
            session_id: session.session_id.to_string(),
            user_id: session.user_id as i64,
            phone_number: session.phone_number.clone(),
            is_connected: session.is_connected,
            connection_status: session.connection_status.as_str().to_owned(),
            reconnect_attempts: session.reconnect_attempts as i32,
            source: session.source.as_str().to_owned(),
            detected: session.detected,
            updated_at: BsonDateTime::from_chrono(session.updated_at),
        }
    }
}

pub struct MongoSessionBacking {
    collection: Collection<SessionDocument>,
    client: Client,
}

impl MongoSessionBacking {
    pub async fn connect(uri: &str, database: &str) -> anyhow::Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let collection = client.database(database).collection("sessions");
        Ok(Self { collection, client })
    }
}

#[async_trait::async_trait]
impl SessionBacking for MongoSessionBacking {
    async fn get(&self, session_id: &SessionId) -> Option<Session> {
        let doc = self
            .collection
            .find_one(doc! { "session_id": session_id.as_str() })
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "mongo session read failed"))
            .ok()
            .flatten()?;
        Session::try_from(doc).ok()
    }

    async fn get_by_phone(&self, phone_number: &str) -> Option<Session> {
        let doc = self
            .collection
            .find_one(doc! { "phone_number": phone_number })
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "mongo session phone lookup failed"))
            .ok()
            .flatten()?;
        Session::try_from(doc).ok()
    }

    async fn list_all(&self) -> Vec<Session> {
        use futures::stream::TryStreamExt;
        let Ok(mut cursor) = self.collection.find(doc! {}).await else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Ok(Some(doc)) = cursor.try_next().await {
            if let Ok(session) = Session::try_from(doc) {
                out.push(session);
            }
        }
        out
    }

    async fn upsert(&self, session: &Session) -> Result<(), StoreError> {
        let document = SessionDocument::from(session);
        self.collection
            .replace_one(doc! { "session_id": session.session_id.as_str() }, document)
            .upsert(true)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.collection
            .delete_one(doc! { "session_id": session_id.as_str() })
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        // The driver manages its own connection pool and reconnects
        // transparently; a lightweight liveness signal isn't exposed
        // synchronously, so this mirrors the client's own assumption that
        // it's usable until an operation actually fails.
        let _ = &self.client;
        true
    }
}
