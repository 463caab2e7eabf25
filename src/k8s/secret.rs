//! Credential secrets referenced by secret-authenticated volumes

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use tracing::debug;

use super::{ignore_not_found, KubeClient};
use crate::error::Result;
use crate::s3::S3Credentials;

/// Secret key holding the access key id
pub const KEY_ID: &str = "key_id";

/// Secret key holding the secret access key
pub const ACCESS_KEY: &str = "access_key";

/// Build the Opaque secret the driver reads through `nodePublishSecretRef`
pub fn credential_secret(namespace: &str, name: &str, credentials: &S3Credentials) -> Secret {
    let data = BTreeMap::from([
        (KEY_ID.to_string(), credentials.access_key_id.clone()),
        (ACCESS_KEY.to_string(), credentials.secret_access_key.clone()),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}

/// Create a credential secret in `namespace`
pub async fn create_credential_secret(
    client: &KubeClient,
    namespace: &str,
    name: &str,
    credentials: &S3Credentials,
) -> Result<Secret> {
    let secret = credential_secret(namespace, name, credentials);
    let created = client
        .secrets(namespace)
        .create(&PostParams::default(), &secret)
        .await?;
    debug!("Created credential secret {}/{}", namespace, name);
    Ok(created)
}

/// Delete a secret; a missing secret is not an error
pub async fn delete_secret(client: &KubeClient, namespace: &str, name: &str) -> Result<()> {
    match client
        .secrets(namespace)
        .delete(name, &DeleteParams::default())
        .await
    {
        Ok(_) => Ok(()),
        Err(e) => ignore_not_found(e.into()),
    }
}
