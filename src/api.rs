use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ClientError;
use crate::models::sound::{CreateSound, Sound, UploadSlot};
use crate::models::user::{AuthResponse, CurrentUser, LoginRequest, RegisterRequest, SessionToken, User};
use crate::models::PlaybackLink;
use crate::session::AuthHandle;

/// Thin wrapper over the soundboard REST API.
///
/// Every request races the client's shutdown token. Authenticated calls carry
/// the current bearer token, and a 401 on such a call expires the session it
/// was made with.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    auth: AuthHandle,
    shutdown: CancellationToken,
}

impl ApiClient {
    pub fn new(config: &Config, auth: AuthHandle) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self::with_client(client, config.api_url.clone(), auth))
    }

    pub fn with_client(client: Client, base_url: String, auth: AuthHandle) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn auth(&self) -> &AuthHandle {
        &self.auth
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Abort every in-flight and future request made through this client.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// The token [`ApiClient::shutdown`] cancels, for callers that wait on
    /// something other than a request.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::Protocol(format!("invalid API url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Protocol(format!("API url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ClientError> {
        Ok(self.client.request(method, self.endpoint(segments)?))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ClientError::Cancelled),
            result = builder.send() => Ok(result?),
        }
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
        credential: Option<&SessionToken>,
    ) -> Result<Response, ClientError> {
        let builder = match credential {
            Some(token) => builder.bearer_auth(token.expose()),
            None => builder,
        };
        let resp = self.send(builder).await?;
        let status = resp.status();
        tracing::debug!(
            path = %resp.url().path(),
            status = status.as_u16(),
            "api response"
        );

        if status.is_success() {
            return Ok(resp);
        }

        let body = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ClientError::Cancelled),
            body = resp.text() => body.unwrap_or_default(),
        };
        let err = ClientError::from_status(status.as_u16(), &body);
        if let (ClientError::Unauthorized(_), Some(token)) = (&err, credential) {
            self.auth.expire(token).await;
        }
        Err(err)
    }

    /// Run a request with the current session's credential.
    async fn authorized(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let token = self.auth.token().ok_or_else(|| {
            ClientError::Unauthorized("You must be logged in to do that.".to_string())
        })?;
        self.execute(builder, Some(&token)).await
    }

    /// Headers arriving is not the end of a request; the body read races the
    /// shutdown token too.
    async fn read_json<T: DeserializeOwned>(&self, resp: Response) -> Result<T, ClientError> {
        let bytes = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ClientError::Cancelled),
            bytes = resp.bytes() => bytes?,
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let builder = self
            .request(Method::POST, &["users", "login"])?
            .json(&LoginRequest { email, password });
        let resp = self.execute(builder, None).await?;
        self.read_json(resp).await
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ClientError> {
        let builder = self
            .request(Method::POST, &["users", "register"])?
            .json(&RegisterRequest {
                username,
                email,
                password,
            });
        let resp = self.execute(builder, None).await?;
        self.read_json(resp).await
    }

    /// Resolve the user behind `token`. Used while restoring a session, so it
    /// takes the token explicitly rather than reading the session state.
    pub async fn current_user(&self, token: &SessionToken) -> Result<User, ClientError> {
        let builder = self.request(Method::GET, &["users", "me"])?;
        let resp = self.execute(builder, Some(token)).await?;
        let body: CurrentUser = self.read_json(resp).await?;
        Ok(body.user)
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        let builder = self.request(Method::POST, &["users", "logout"])?;
        self.authorized(builder).await?;
        Ok(())
    }

    pub async fn list_sounds(&self) -> Result<Vec<Sound>, ClientError> {
        let builder = self.request(Method::GET, &["sounds"])?;
        let resp = self.authorized(builder).await?;
        self.read_json(resp).await
    }

    /// Short-lived link the clip can be downloaded from.
    pub async fn sound_url(&self, sound_id: &str) -> Result<String, ClientError> {
        let builder = self.request(Method::GET, &["sounds", sound_id, "url"])?;
        let resp = self.authorized(builder).await?;
        let link: PlaybackLink = self.read_json(resp).await?;
        Ok(link.url)
    }

    pub async fn upload_slot(
        &self,
        file_type: &str,
        file_name: &str,
    ) -> Result<UploadSlot, ClientError> {
        let builder = self
            .request(Method::GET, &["sounds", "upload-url"])?
            .query(&[("fileType", file_type), ("fileName", file_name)]);
        let resp = self.authorized(builder).await?;
        self.read_json(resp).await
    }

    pub async fn create_sound(&self, body: &CreateSound) -> Result<Sound, ClientError> {
        let builder = self.request(Method::POST, &["sounds"])?.json(body);
        let resp = self.authorized(builder).await?;
        self.read_json(resp).await
    }

    pub async fn delete_sound(&self, sound_id: &str) -> Result<(), ClientError> {
        let builder = self.request(Method::DELETE, &["sounds", sound_id])?;
        self.authorized(builder).await?;
        Ok(())
    }

    /// Write `bytes` to a pre-signed storage URL. The URL is the credential,
    /// so no bearer token is attached.
    pub async fn put_object(
        &self,
        url: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ClientError> {
        let builder = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        let resp = self.send(builder).await?;
        if !resp.status().is_success() {
            return Err(ClientError::Storage {
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Download a clip from a short-lived storage link.
    pub async fn fetch_object(&self, url: &str) -> Result<Vec<u8>, ClientError> {
        let resp = self.send(self.client.get(url)).await?;
        if !resp.status().is_success() {
            return Err(ClientError::Storage {
                status: resp.status().as_u16(),
            });
        }
        let bytes = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ClientError::Cancelled),
            bytes = resp.bytes() => bytes?,
        };
        Ok(bytes.to_vec())
    }
}
