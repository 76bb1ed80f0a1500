//! oVirt engine implementation of the snapshot registry.
//!
//! Talks to the engine's REST API v4 in JSON. Authentication uses the SSO
//! password grant; the resulting bearer token is revoked on disconnect.

mod error;
mod types;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::EngineCredentials;
use crate::registry::{
    DiskImageId, RegistryFuture, Snapshot, SnapshotId, SnapshotRegistry, Vm,
};
use types::{DiskAttachmentList, SnapshotCreate, TokenResponse, VmList, WireSnapshot, WireVm};

pub use error::OvirtError;

const API_VERSION: &str = "4";
const SSO_SCOPE: &str = "ovirt-app-api";

/// Authenticated session against an oVirt engine.
#[derive(Clone, Debug)]
pub struct OvirtRegistry {
    client: Client,
    api_url: String,
    engine_url: String,
    token: String,
}

impl OvirtRegistry {
    /// Authenticates against the engine and returns a session.
    ///
    /// # Errors
    ///
    /// Returns [`OvirtError::InvalidUrl`] when the API URL does not end in
    /// `/api`, [`OvirtError::Authentication`] when the engine rejects the
    /// credentials, or [`OvirtError::Transport`] when it cannot be reached.
    pub async fn connect(credentials: &EngineCredentials) -> Result<Self, OvirtError> {
        let (api_url, engine_url) = split_engine_url(&credentials.server)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("version", HeaderValue::from_static(API_VERSION));
        let client = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(credentials.insecure)
            .build()?;

        info!(server = %api_url, user = %credentials.user_name, "connecting to engine");
        let response = client
            .post(format!("{engine_url}/sso/oauth/token"))
            .form(&[
                ("grant_type", "password"),
                ("scope", SSO_SCOPE),
                ("username", credentials.user_name.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;
        let body = response.text().await?;
        let token_response: TokenResponse =
            serde_json::from_str(&body).map_err(|err| OvirtError::Parse {
                resource: String::from("token"),
                message: err.to_string(),
            })?;
        let token = issued_token(token_response, &credentials.user_name)?;

        Ok(Self {
            client,
            api_url,
            engine_url,
            token,
        })
    }

    fn authorised(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }

    fn vm_url(&self, vm: &Vm) -> String {
        format!("{}/vms/{}", self.api_url, vm.id)
    }

    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        resource: &str,
    ) -> Result<Option<T>, OvirtError> {
        let response = self.authorised(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;
        optional_body(status, body, resource)?
            .map(|found| decode(&found, resource))
            .transpose()
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        resource: &str,
    ) -> Result<T, OvirtError> {
        let response = self.authorised(builder).send().await?;
        let body = checked_body(response, resource).await?;
        decode(&body, resource)
    }
}

impl SnapshotRegistry for OvirtRegistry {
    type Error = OvirtError;

    fn list_vms(&self, max: u32) -> RegistryFuture<'_, Vec<Vm>, Self::Error> {
        Box::pin(async move {
            let request = self
                .client
                .get(format!("{}/vms", self.api_url))
                .query(&[("max", max.to_string())]);
            let list: VmList = self.fetch(request, "vms").await?;
            Ok(list.vm.into_iter().map(Vm::from).collect())
        })
    }

    fn get_vm<'a>(&'a self, name: &'a str) -> RegistryFuture<'a, Option<Vm>, Self::Error> {
        Box::pin(async move {
            let request = self
                .client
                .get(format!("{}/vms", self.api_url))
                .query(&[("search", format!("name={name}"))]);
            let list: VmList = self.fetch(request, "vm").await?;
            Ok(pick_vm_by_name(list.vm, name))
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        vm: &'a Vm,
        description: &'a str,
    ) -> RegistryFuture<'a, Snapshot, Self::Error> {
        Box::pin(async move {
            let request = self
                .client
                .post(format!("{}/snapshots", self.vm_url(vm)))
                .json(&SnapshotCreate {
                    description,
                    persist_memorystate: false,
                });
            let snapshot: WireSnapshot = self.fetch(request, "snapshot create").await?;
            Ok(snapshot.into())
        })
    }

    fn get_snapshot<'a>(
        &'a self,
        vm: &'a Vm,
        id: &'a SnapshotId,
    ) -> RegistryFuture<'a, Option<Snapshot>, Self::Error> {
        Box::pin(async move {
            let request = self
                .client
                .get(format!("{}/snapshots/{id}", self.vm_url(vm)));
            let snapshot: Option<WireSnapshot> = self.fetch_optional(request, "snapshot").await?;
            Ok(snapshot.map(Snapshot::from))
        })
    }

    fn delete_snapshot<'a>(
        &'a self,
        vm: &'a Vm,
        id: &'a SnapshotId,
    ) -> RegistryFuture<'a, bool, Self::Error> {
        Box::pin(async move {
            let request = self
                .client
                .delete(format!("{}/snapshots/{id}", self.vm_url(vm)));
            let response = self.authorised(request).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok(optional_body(status, body, "snapshot delete")?.is_some())
        })
    }

    fn list_disk_images<'a>(
        &'a self,
        vm: &'a Vm,
    ) -> RegistryFuture<'a, Vec<DiskImageId>, Self::Error> {
        Box::pin(async move {
            let request = self
                .client
                .get(format!("{}/diskattachments", self.vm_url(vm)))
                .query(&[("follow", "disk")]);
            let attachments: DiskAttachmentList = self.fetch(request, "disk attachments").await?;
            Ok(attachments.image_ids())
        })
    }

    fn disconnect(self) -> RegistryFuture<'static, (), Self::Error> {
        Box::pin(async move {
            let response = self
                .client
                .get(format!("{}/services/sso-logout", self.engine_url))
                .query(&[("token", self.token.as_str())])
                .send()
                .await?;
            checked_body(response, "logout").await?;
            debug!(server = %self.api_url, "disconnected from engine");
            Ok(())
        })
    }
}

/// Splits `https://host/ovirt-engine/api` into the API root and the engine
/// root that hosts the SSO services.
fn split_engine_url(server: &str) -> Result<(String, String), OvirtError> {
    let api_url = server.trim().trim_end_matches('/');
    if !(api_url.starts_with("https://") || api_url.starts_with("http://")) {
        return Err(OvirtError::InvalidUrl {
            url: server.to_owned(),
            message: String::from("expected an http(s) URL"),
        });
    }
    let engine_url = api_url
        .strip_suffix("/api")
        .ok_or_else(|| OvirtError::InvalidUrl {
            url: server.to_owned(),
            message: String::from("expected the URL to end in /api"),
        })?;
    Ok((api_url.to_owned(), engine_url.to_owned()))
}

fn pick_vm_by_name(candidates: Vec<WireVm>, name: &str) -> Option<Vm> {
    candidates
        .into_iter()
        .find(|vm| vm.name == name)
        .map(Vm::from)
}

/// Extracts the bearer token, or the engine's reason for refusing one.
fn issued_token(response: TokenResponse, user: &str) -> Result<String, OvirtError> {
    match response {
        TokenResponse {
            access_token: Some(token),
            ..
        } if !token.is_empty() => Ok(token),
        TokenResponse {
            error,
            error_description,
            ..
        } => Err(OvirtError::Authentication {
            user: user.to_owned(),
            message: error_description
                .or(error)
                .unwrap_or_else(|| String::from("no access token issued")),
        }),
    }
}

async fn checked_body(response: Response, resource: &str) -> Result<String, OvirtError> {
    let status = response.status();
    let body = response.text().await?;
    status_body(status, body, resource)
}

/// Accepts a 2xx body; any other status is an API error.
fn status_body(status: StatusCode, body: String, resource: &str) -> Result<String, OvirtError> {
    if status.is_success() {
        return Ok(body);
    }
    Err(OvirtError::Api {
        resource: resource.to_owned(),
        status: status.as_u16(),
        message: body.trim().to_owned(),
    })
}

/// Like [`status_body`], but 404 means the resource does not exist.
fn optional_body(
    status: StatusCode,
    body: String,
    resource: &str,
) -> Result<Option<String>, OvirtError> {
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    status_body(status, body, resource).map(Some)
}

fn decode<T: DeserializeOwned>(body: &str, resource: &str) -> Result<T, OvirtError> {
    if body.trim().is_empty() {
        return serde_json::from_str("{}").map_err(|err| OvirtError::Parse {
            resource: resource.to_owned(),
            message: err.to_string(),
        });
    }
    serde_json::from_str(body).map_err(|err| OvirtError::Parse {
        resource: resource.to_owned(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests;
