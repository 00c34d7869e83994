//! Response caches persisted in SQLite.

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use tokio_rusqlite::rusqlite::OptionalExtension;
use tokio_rusqlite::{Connection, params};

use super::ResponseCache;
use crate::Error;
use crate::net::{Response, ResponseKind};

/// Row shape of `cached_responses`, decoded off the database thread.
struct StoredResponse {
    status: u16,
    headers_json: String,
    body: Vec<u8>,
    response_url: Option<String>,
    kind: String,
}

impl StoredResponse {
    fn into_response(self) -> Result<Response, Error> {
        let pairs: Vec<(String, String)> = serde_json::from_str(&self.headers_json)?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| Error::Storage(format!("stored status {}: {e}", self.status)))?;
        let kind = match self.kind.as_str() {
            "opaque" => ResponseKind::Opaque,
            _ => ResponseKind::Basic,
        };
        Ok(Response {
            status,
            headers: Response::headers_from_pairs(&pairs),
            body: Bytes::from(self.body),
            url: self.response_url,
            kind,
        })
    }
}

fn kind_label(kind: ResponseKind) -> &'static str {
    match kind {
        ResponseKind::Basic => "basic",
        ResponseKind::Opaque => "opaque",
    }
}

/// One named response cache inside the shared database.
#[derive(Clone, Debug)]
pub struct SqliteCache {
    conn: Connection,
    name: String,
}

impl SqliteCache {
    pub(crate) fn new(conn: Connection, name: &str) -> Self {
        Self { conn, name: name.to_string() }
    }
}

#[async_trait]
impl ResponseCache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<Response>, Error> {
        let store = self.name.clone();
        let key = key.to_string();
        let stored = self
            .conn
            .call(move |conn| -> Result<Option<StoredResponse>, Error> {
                let row = conn
                    .query_row(
                        "SELECT status, headers_json, body, response_url, kind
                         FROM cached_responses WHERE store = ?1 AND key = ?2",
                        params![store, key],
                        |row| {
                            Ok(StoredResponse {
                                status: row.get(0)?,
                                headers_json: row.get(1)?,
                                body: row.get(2)?,
                                response_url: row.get(3)?,
                                kind: row.get(4)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(Error::from)?;

        stored.map(StoredResponse::into_response).transpose()
    }

    async fn put(&self, key: &str, res: &Response) -> Result<(), Error> {
        let store = self.name.clone();
        let key = key.to_string();
        let status = res.status.as_u16();
        let headers_json = serde_json::to_string(&res.header_pairs())?;
        let body = res.body.to_vec();
        let response_url = res.url.clone();
        let kind = kind_label(res.kind);
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cached_responses
                        (store, key, status, headers_json, body, response_url, kind, stored_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(store, key) DO UPDATE SET
                        status = excluded.status,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        response_url = excluded.response_url,
                        kind = excluded.kind,
                        stored_at = excluded.stored_at",
                    params![
                        store,
                        key,
                        status,
                        headers_json,
                        body,
                        response_url,
                        kind,
                        chrono::Utc::now().to_rfc3339()
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let store = self.name.clone();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let rows = conn.execute(
                    "DELETE FROM cached_responses WHERE store = ?1 AND key = ?2",
                    params![store, key],
                )?;
                Ok(rows > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        let store = self.name.clone();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT key FROM cached_responses WHERE store = ?1 ORDER BY key")?;
                let keys = stmt
                    .query_map(params![store], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }
}
