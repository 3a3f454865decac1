//! Demo composition root: a presence server plus a synthetic CRUD layer.
//!
//! Everything the real deployment wires up happens here explicitly: the
//! verifier, the server, and the publish handle handed to the (here:
//! simulated) mutation handlers. Connect any WebSocket client, send
//! `{"type":"authenticate","token":"<name>"}`, and watch task events for
//! the `demo` user roll in.

use std::time::Duration;

use serde_json::json;
use taskpulse::prelude::*;

/// Accepts any non-empty token and uses it as the user id. Stand-in for
/// the store-backed verifier of the real deployment.
struct DevVerifier;

impl TokenVerifier for DevVerifier {
    async fn verify(
        &self,
        token: &str,
    ) -> Result<UserIdentity, PresenceError> {
        if token.is_empty() {
            return Err(PresenceError::AuthFailed("empty token".into()));
        }
        Ok(UserIdentity {
            user_id: UserId::from(token),
            email: format!("{token}@dev.local"),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), TaskpulseError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,taskpulse=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let server = PresenceServer::<DevVerifier>::builder()
        .config(config)
        .build(DevVerifier)
        .await?;
    tracing::info!(
        addr = %server.local_addr()?,
        "task board presence server up"
    );

    // Stand-in for the CRUD handlers: publish a synthetic task lifecycle
    // for the `demo` user every few seconds.
    let hub = server.hub();
    tokio::spawn(async move {
        let owner = UserId::from("demo");
        let mut n: u64 = 0;
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            n += 1;
            let task_id = TaskId(format!("task-{n}"));
            hub.task_created(
                &owner,
                json!({
                    "id": task_id.as_str(),
                    "title": format!("demo task #{n}"),
                    "completed": false,
                }),
            )
            .await;
            hub.task_updated(
                &owner,
                &task_id,
                json!({
                    "id": task_id.as_str(),
                    "title": format!("demo task #{n}"),
                    "completed": true,
                }),
            )
            .await;
            if n % 3 == 0 {
                hub.task_deleted(&owner, &task_id).await;
            }
        }
    });

    server.run().await
}
