use crate::errors::ClientError;
use crate::models::StoredSession;
use std::path::Path;
use tokio::fs;
use tracing::error;

pub async fn load_session(path: &Path) -> StoredSession {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(session) => session,
            Err(err) => {
                error!("failed to parse session file: {err}");
                StoredSession::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoredSession::default(),
        Err(err) => {
            error!("failed to read session file: {err}");
            StoredSession::default()
        }
    }
}

pub async fn persist_session(path: &Path, session: &StoredSession) -> Result<(), ClientError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(session).map_err(ClientError::io)?;
    fs::write(path, payload).await?;
    Ok(())
}

pub async fn clear_session(path: &Path) -> Result<(), ClientError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
